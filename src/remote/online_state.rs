use tokio::sync::watch;
use tonic::Status;
use tracing::debug;
use tracing::warn;

use crate::config::OnlineStateConfig;

/// Best-effort classification of connectivity health, for UI/status
/// purposes. Distinct from the user's network-enable intent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OnlineState {
    /// Initial state, and the state after every stream restart attempt
    /// until health is re-established.
    #[default]
    Unknown,
    /// The watch stream is open and healthy.
    Online,
    /// Repeated failed open attempts, or the user disabled the network.
    Offline,
}

/// Classifies lifecycle events into an [`OnlineState`] with hysteresis: an
/// explicit failure counter, reset on any successful open, instead of
/// timestamp inference. Written to only by the controller; the rest of the
/// system reads through the published watch channel.
pub(crate) struct OnlineStateTracker {
    state: OnlineState,
    /// Consecutive failures since the last successful open.
    watch_stream_failures: u32,
    max_watch_stream_failures: u32,
    state_tx: watch::Sender<OnlineState>,
}

impl OnlineStateTracker {
    pub(crate) fn new(config: OnlineStateConfig) -> (Self, watch::Receiver<OnlineState>) {
        let (state_tx, state_rx) = watch::channel(OnlineState::Unknown);
        (
            OnlineStateTracker {
                state: OnlineState::Unknown,
                watch_stream_failures: 0,
                max_watch_stream_failures: config.max_watch_stream_failures,
                state_tx,
            },
            state_rx,
        )
    }

    pub(crate) fn state(&self) -> OnlineState {
        self.state
    }

    /// The stream reached `Open`: connectivity is healthy again.
    pub(crate) fn handle_stream_open(&mut self) {
        self.watch_stream_failures = 0;
        self.set_state(OnlineState::Online);
    }

    /// One broken stream session. Stays `Unknown` until the configured
    /// threshold is reached so a single transient blip does not flap the
    /// UI.
    pub(crate) fn handle_stream_failure(
        &mut self,
        status: &Status,
    ) {
        self.watch_stream_failures += 1;
        if self.watch_stream_failures >= self.max_watch_stream_failures {
            warn!(
                "watch stream failed {} consecutive times, reporting Offline: {}",
                self.watch_stream_failures, status
            );
            self.set_state(OnlineState::Offline);
        } else {
            debug!(
                "watch stream failure {} of {}: {}",
                self.watch_stream_failures, self.max_watch_stream_failures, status
            );
            self.set_state(OnlineState::Unknown);
        }
    }

    /// The user disabled the network: report `Offline` until re-enabled.
    pub(crate) fn force_offline(&mut self) {
        self.watch_stream_failures = 0;
        self.set_state(OnlineState::Offline);
    }

    /// Health is unknown again, e.g. the network was just re-enabled or the
    /// stream went idle.
    pub(crate) fn reset(&mut self) {
        self.watch_stream_failures = 0;
        self.set_state(OnlineState::Unknown);
    }

    fn set_state(
        &mut self,
        new_state: OnlineState,
    ) {
        if self.state != new_state {
            debug!("online state {:?} -> {:?}", self.state, new_state);
            self.state = new_state;
            // Receivers may all be gone during shutdown
            let _ = self.state_tx.send(new_state);
        }
    }
}
