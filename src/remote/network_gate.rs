use tokio::sync::watch;
use tracing::debug;

/// User-level network intent, set by explicit enable/disable calls and
/// independent of transport-level connectivity. The transport may only be
/// started while the flag is true.
///
/// Written to only by the controller; `can_use_network` reads go through
/// the published watch channel so they stay lock-free from any task.
pub(crate) struct NetworkGate {
    enabled: bool,
    enabled_tx: watch::Sender<bool>,
}

impl NetworkGate {
    pub(crate) fn new() -> (Self, watch::Receiver<bool>) {
        let (enabled_tx, enabled_rx) = watch::channel(false);
        (
            NetworkGate {
                enabled: false,
                enabled_tx,
            },
            enabled_rx,
        )
    }

    pub(crate) fn set_enabled(
        &mut self,
        enabled: bool,
    ) {
        if self.enabled != enabled {
            debug!("network {}", if enabled { "enabled" } else { "disabled" });
            self.enabled = enabled;
            let _ = self.enabled_tx.send(enabled);
        }
    }

    pub(crate) fn is_enabled(&self) -> bool {
        self.enabled
    }
}
