use serde::Deserialize;

use crate::constants::DEFAULT_COMMAND_BUFFER_SIZE;
use crate::constants::DEFAULT_MAX_WATCH_STREAM_FAILURES;
use crate::constants::DEFAULT_SIGNAL_BUFFER_SIZE;

/// Parameters of the online-state classifier.
#[derive(Debug, Deserialize, Clone, Copy)]
pub struct OnlineStateConfig {
    /// Consecutive failed stream-open attempts before reporting `Offline`.
    /// Below this threshold the classifier stays `Unknown` so a single
    /// transient blip does not flap the UI.
    #[serde(default = "default_max_watch_stream_failures")]
    pub max_watch_stream_failures: u32,
}

impl Default for OnlineStateConfig {
    fn default() -> Self {
        OnlineStateConfig {
            max_watch_stream_failures: DEFAULT_MAX_WATCH_STREAM_FAILURES,
        }
    }
}

/// Capacities of the controller's serialized mailboxes.
#[derive(Debug, Deserialize, Clone, Copy)]
pub struct ChannelConfig {
    /// Public-API commands awaiting the controller task.
    #[serde(default = "default_command_buffer_size")]
    pub command_buffer_size: usize,

    /// Transport signals awaiting the controller task. Sized larger than
    /// the command mailbox since a busy stream can burst many changes.
    #[serde(default = "default_signal_buffer_size")]
    pub signal_buffer_size: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        ChannelConfig {
            command_buffer_size: DEFAULT_COMMAND_BUFFER_SIZE,
            signal_buffer_size: DEFAULT_SIGNAL_BUFFER_SIZE,
        }
    }
}

fn default_max_watch_stream_failures() -> u32 {
    DEFAULT_MAX_WATCH_STREAM_FAILURES
}
fn default_command_buffer_size() -> usize {
    DEFAULT_COMMAND_BUFFER_SIZE
}
fn default_signal_buffer_size() -> usize {
    DEFAULT_SIGNAL_BUFFER_SIZE
}
