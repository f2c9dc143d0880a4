// -
// Controller defaults

/// Consecutive failed stream-open attempts before the online-state tracker
/// reports `Offline`.
pub(crate) const DEFAULT_MAX_WATCH_STREAM_FAILURES: u32 = 2;

/// Capacity of the public-API command mailbox.
pub(crate) const DEFAULT_COMMAND_BUFFER_SIZE: usize = 64;

/// Capacity of the transport signal mailbox.
pub(crate) const DEFAULT_SIGNAL_BUFFER_SIZE: usize = 256;
