//! The watch-stream lifecycle controller.
//!
//! Owns the decision of when to (re)start or tear down the transport
//! stream, replays the registry onto a freshly opened stream, forwards
//! transport signals to the aggregator and online-state tracker, and emits
//! committed [`RemoteEvent`]s and target-error rejections to the sync
//! engine.
//!
//! [`RemoteEvent`]: super::RemoteEvent

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio::sync::watch;
use tonic::Status;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use super::ExistenceFilterChange;
use super::ExistenceFilterResult;
use super::LocalStore;
use super::NetworkGate;
use super::OnlineState;
use super::OnlineStateTracker;
use super::RemoteSyncer;
use super::StoreCommand;
use super::StreamSignal;
use super::TargetRegistry;
use super::WatchChange;
use super::WatchChangeAggregator;
use super::WatchRequest;
use super::WatchTargetChange;
use super::WatchTargetChangeState;
use super::WatchTransport;
use crate::config::WatchSettings;
use crate::errors::ListenError;
use crate::errors::ProtocolError;
use crate::model::QueryData;
use crate::model::QueryPurpose;
use crate::model::SnapshotVersion;
use crate::model::TargetId;
use crate::Result;

/// Lifecycle of the transport stream as the controller tracks it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamState {
    Stopped,
    /// First connection attempt in flight.
    Starting,
    Open,
    /// Reconnection requested after an error; the transport is backing off
    /// before it attempts again.
    Backoff,
}

impl StreamState {
    fn is_started(self) -> bool {
        matches!(
            self,
            StreamState::Starting | StreamState::Open | StreamState::Backoff
        )
    }
}

/// The controller core. Single-writer: all registry mutation, state-machine
/// transitions and aggregator updates happen on the task driving [`run`],
/// so no internal locking exists.
///
/// [`run`]: RemoteStore::run
pub struct RemoteStore {
    sync_engine: Arc<dyn RemoteSyncer>,
    local_store: Arc<dyn LocalStore>,
    transport: Arc<dyn WatchTransport>,

    registry: TargetRegistry,
    aggregator: WatchChangeAggregator,
    online_state: OnlineStateTracker,
    gate: NetworkGate,

    stream_state: StreamState,
    /// Version of the last raised snapshot; markers must move strictly past
    /// it.
    last_snapshot_version: SnapshotVersion,

    command_rx: mpsc::Receiver<StoreCommand>,
    signal_rx: mpsc::Receiver<StreamSignal>,

    shutdown_signal: watch::Receiver<()>,
}

/// Cloneable public surface. Commands are marshaled onto the controller
/// task; the two reads go through published watch channels.
#[derive(Clone)]
pub struct RemoteStoreHandle {
    command_tx: mpsc::Sender<StoreCommand>,
    network_enabled_rx: watch::Receiver<bool>,
    online_state_rx: watch::Receiver<OnlineState>,
}

impl RemoteStore {
    /// Wires up a controller with its collaborators.
    ///
    /// Returns the store itself (drive it with [`run`] on its own task),
    /// the public handle, and the sender the transport must use to deliver
    /// its lifecycle signals.
    ///
    /// [`run`]: RemoteStore::run
    pub fn new(
        settings: &WatchSettings,
        sync_engine: Arc<dyn RemoteSyncer>,
        local_store: Arc<dyn LocalStore>,
        transport: Arc<dyn WatchTransport>,
        shutdown_signal: watch::Receiver<()>,
    ) -> (Self, RemoteStoreHandle, mpsc::Sender<StreamSignal>) {
        let (command_tx, command_rx) = mpsc::channel(settings.channel.command_buffer_size);
        let (signal_tx, signal_rx) = mpsc::channel(settings.channel.signal_buffer_size);
        let (gate, network_enabled_rx) = NetworkGate::new();
        let (online_state, online_state_rx) = OnlineStateTracker::new(settings.online);

        let store = RemoteStore {
            sync_engine,
            local_store,
            transport,

            registry: TargetRegistry::new(),
            aggregator: WatchChangeAggregator::new(),
            online_state,
            gate,

            stream_state: StreamState::Stopped,
            last_snapshot_version: SnapshotVersion::NONE,

            command_rx,
            signal_rx,

            shutdown_signal,
        };
        let handle = RemoteStoreHandle {
            command_tx,
            network_enabled_rx,
            online_state_rx,
        };

        (store, handle, signal_tx)
    }

    /// The controller loop. Commands and transport signals are each
    /// processed to completion before the next is taken, so from this
    /// task's point of view nothing interleaves.
    pub async fn run(&mut self) -> Result<()> {
        loop {
            tokio::select! {
                // Use biased to ensure branch order
                biased;
                // P0: shutdown received
                _ = self.shutdown_signal.changed() => {
                    warn!("remote store shutdown signal received");
                    self.disable_network_internal().await;
                    return Ok(());
                }
                // P1: public API commands
                Some(command) = self.command_rx.recv() => {
                    debug!("receive store command: {:?}", command);
                    self.handle_command(command).await;
                }
                // P2: transport signals
                Some(signal) = self.signal_rx.recv() => {
                    debug!("receive stream signal: {:?}", signal);
                    self.handle_signal(signal).await;
                }
                else => {
                    warn!("all remote store channels closed");
                    return Ok(());
                }
            }
        }
    }

    async fn handle_command(
        &mut self,
        command: StoreCommand,
    ) {
        match command {
            StoreCommand::Listen { query_data, reply } => {
                let result = self.listen_to_target(query_data).await;
                if reply.send(result).is_err() {
                    debug!("listen reply receiver dropped");
                }
            }
            StoreCommand::StopListening { target_id } => {
                self.stop_listening(target_id).await;
            }
            StoreCommand::EnableNetwork => self.enable_network().await,
            StoreCommand::DisableNetwork => self.disable_network().await,
        }
    }

    async fn handle_signal(
        &mut self,
        signal: StreamSignal,
    ) {
        match signal {
            StreamSignal::Opened => self.on_watch_stream_open().await,
            StreamSignal::Change {
                change,
                snapshot_version,
            } => self.on_watch_stream_change(change, snapshot_version).await,
            StreamSignal::Errored { status } => self.on_watch_stream_error(status).await,
        }
    }

    // Public surface
    // -------------------------------------------------------------------------

    async fn listen_to_target(
        &mut self,
        query_data: QueryData,
    ) -> Result<()> {
        self.registry.register(query_data.clone())?;

        if self.can_use_network() {
            if self.stream_state == StreamState::Open {
                self.send_watch_request(query_data).await;
            } else if self.should_start_watch_stream() {
                self.start_watch_stream().await;
            }
        }
        Ok(())
    }

    async fn stop_listening(
        &mut self,
        target_id: TargetId,
    ) {
        // Unlisten is idempotent
        if self.registry.unregister(target_id).is_none() {
            debug!("stop_listening for unknown target {}", target_id);
            return;
        }
        self.aggregator.remove_target(target_id);

        if self.stream_state == StreamState::Open {
            self.send_unwatch_request(target_id).await;
        }

        if self.registry.is_empty() && self.stream_state.is_started() {
            // Last listen removed: the stream has no purpose anymore.
            self.stop_watch_stream().await;
            if self.can_use_network() {
                self.online_state.reset();
            }
        }
    }

    async fn enable_network(&mut self) {
        if self.gate.is_enabled() {
            return;
        }
        self.gate.set_enabled(true);
        self.online_state.reset();

        if self.should_start_watch_stream() {
            self.start_watch_stream().await;
        }
    }

    async fn disable_network(&mut self) {
        if !self.gate.is_enabled() {
            return;
        }
        self.gate.set_enabled(false);
        self.disable_network_internal().await;
        // The user asked for this: report Offline, not Unknown.
        self.online_state.force_offline();
    }

    /// Tear down without touching the intent flag; also the shutdown path.
    async fn disable_network_internal(&mut self) {
        if self.stream_state.is_started() {
            self.transport.stop().await;
        }
        self.clean_up_watch_stream_state();
        self.stream_state = StreamState::Stopped;
    }

    fn can_use_network(&self) -> bool {
        self.gate.is_enabled()
    }

    // Stream lifecycle
    // -------------------------------------------------------------------------

    /// Strict policy: a stream is only held open while at least one target
    /// is registered; removing the last target tears it down.
    fn should_start_watch_stream(&self) -> bool {
        self.can_use_network() && !self.stream_state.is_started() && !self.registry.is_empty()
    }

    async fn start_watch_stream(&mut self) {
        self.stream_state = StreamState::Starting;
        self.aggregator.reset();
        self.transport.start().await;
        info!("watch stream starting, {} targets pending", self.registry.len());
    }

    async fn stop_watch_stream(&mut self) {
        self.transport.stop().await;
        self.clean_up_watch_stream_state();
        self.stream_state = StreamState::Stopped;
        info!("watch stream stopped");
    }

    /// Accumulated state is stream-session-scoped.
    fn clean_up_watch_stream_state(&mut self) {
        self.aggregator.reset();
    }

    async fn on_watch_stream_open(&mut self) {
        match self.stream_state {
            StreamState::Starting | StreamState::Backoff => {}
            state => {
                // Late signal from a session already torn down
                debug!("ignoring stream open in state {:?}", state);
                return;
            }
        }

        self.stream_state = StreamState::Open;
        self.online_state.handle_stream_open();

        // Replay the registry in its stable order; targets removed before
        // this point are simply absent from the snapshot.
        self.aggregator.reset();
        let replay = self.registry.snapshot();
        let replayed = replay.len();
        for query_data in replay {
            self.send_watch_request(query_data).await;
        }
        info!("watch stream open, {} targets replayed", replayed);
    }

    async fn on_watch_stream_error(
        &mut self,
        status: Status,
    ) {
        if self.stream_state == StreamState::Stopped {
            // The error raced a deliberate teardown
            debug!("ignoring stream error while stopped: {}", status);
            return;
        }
        warn!("watch stream error: {}", status);

        // Targets still tracked by the aggregator are recoverable: the
        // registry is left untouched and they are replayed on the next
        // open, invisible to the caller. Server-rejected targets were
        // already evicted when their removal change arrived.
        self.clean_up_watch_stream_state();
        self.online_state.handle_stream_failure(&status);
        debug!("online state now {:?}", self.online_state.state());

        self.stream_state = StreamState::Stopped;
        if self.should_start_watch_stream() {
            // The transport owns backoff timing; this only re-arms it.
            self.stream_state = StreamState::Backoff;
            self.transport.start().await;
        }
    }

    // Watch change handling
    // -------------------------------------------------------------------------

    async fn on_watch_stream_change(
        &mut self,
        change: WatchChange,
        snapshot_version: SnapshotVersion,
    ) {
        if self.stream_state != StreamState::Open {
            debug!("ignoring watch change in state {:?}", self.stream_state);
            return;
        }

        match &change {
            WatchChange::TargetChange(target_change)
                if target_change.state == WatchTargetChangeState::Removed
                    && target_change.cause.is_some() =>
            {
                // A target-scoped rejection, never conflated with a
                // transport error: no automatic resubscription.
                if let Err(e) = self.process_target_error(target_change).await {
                    error!("consistency fault: {}", e);
                    self.restart_stream_session().await;
                }
                return;
            }
            WatchChange::TargetChange(target_change) => {
                self.aggregator.handle_target_change(target_change, &self.registry);
            }
            WatchChange::DocumentChange(document_change) => {
                self.aggregator.handle_document_change(document_change, &self.registry);
            }
            WatchChange::DocumentDelete(document_delete) => {
                self.aggregator.handle_document_delete(document_delete, &self.registry);
            }
            WatchChange::ExistenceFilter(filter) => {
                self.handle_existence_filter(*filter).await;
                return;
            }
        }

        // A global no-change carrying a version is the server's snapshot
        // marker: everything sent so far is consistent at that version.
        if !snapshot_version.is_none() && change.is_snapshot_marker() {
            self.raise_watch_snapshot(snapshot_version).await;
        }
    }

    async fn handle_existence_filter(
        &mut self,
        filter: ExistenceFilterChange,
    ) {
        let result =
            self.aggregator
                .handle_existence_filter(&filter, &self.registry, self.sync_engine.as_ref());
        match result {
            ExistenceFilterResult::Ignored | ExistenceFilterResult::Matched => {}
            ExistenceFilterResult::Mismatch { expected, actual } => {
                warn!(
                    "existence filter mismatch for target {}: server expects {}, client has {}",
                    filter.target_id, expected, actual
                );
                // Never resolved locally: the local cache for the target is
                // invalidated and the target refetched from scratch.
                self.local_store
                    .resolve_existence_filter_mismatch(filter.target_id)
                    .await;
                self.aggregator.reset_target(filter.target_id);

                if let Some(query_data) = self.registry.get(filter.target_id).cloned() {
                    let mut refreshed = query_data;
                    refreshed.resume_token.clear();
                    refreshed.purpose = QueryPurpose::ExistenceFilterMismatch;
                    self.registry.update(refreshed);
                }
            }
        }
    }

    /// Removes the rejected targets from the registry and notifies the sync
    /// engine, exactly once per target.
    async fn process_target_error(
        &mut self,
        change: &WatchTargetChange,
    ) -> Result<()> {
        let status = match &change.cause {
            Some(status) => status.clone(),
            None => return Err(ProtocolError::MalformedTargetError.into()),
        };
        if change.is_global() {
            // Rejections must name their targets
            return Err(ProtocolError::MalformedTargetError.into());
        }

        for &target_id in &change.target_ids {
            if self.registry.unregister(target_id).is_some() {
                self.aggregator.remove_target(target_id);
                error!(
                    "listen for target {} rejected by server: {}",
                    target_id, status
                );
                self.sync_engine.reject_listen(target_id, status.clone()).await;
            } else {
                debug!("target error for unknown target {}", target_id);
            }
        }

        if self.registry.is_empty() && self.stream_state.is_started() {
            // The rejection emptied the registry; the stream has no
            // purpose anymore.
            self.stop_watch_stream().await;
        }
        Ok(())
    }

    // Snapshot emission
    // -------------------------------------------------------------------------

    async fn raise_watch_snapshot(
        &mut self,
        snapshot_version: SnapshotVersion,
    ) {
        if snapshot_version <= self.last_snapshot_version {
            // Protocol invariant, not a recoverable error: drop the marker
            // and restart the stream session.
            let fault = ProtocolError::NonMonotonicSnapshot {
                received: snapshot_version,
                last_raised: self.last_snapshot_version,
            };
            error!("consistency fault: {}", fault);
            self.restart_stream_session().await;
            return;
        }

        let event = self.aggregator.create_remote_event(
            snapshot_version,
            &self.registry,
            self.sync_engine.as_ref(),
        );

        // Persist refreshed resume tokens so the next replay resumes here
        // instead of refetching.
        for (&target_id, target_change) in &event.target_changes {
            if target_change.resume_token.is_empty() {
                continue;
            }
            if let Some(query_data) = self.registry.get(target_id).cloned() {
                let mut refreshed = query_data;
                refreshed.resume_token = target_change.resume_token.clone();
                refreshed.snapshot_version = snapshot_version;
                self.registry.update(refreshed);
            }
        }

        self.last_snapshot_version = snapshot_version;
        debug!(
            "raising snapshot at {:?}: {} target changes, {} resets",
            snapshot_version,
            event.target_changes.len(),
            event.target_resets.len()
        );
        self.sync_engine.apply_remote_event(event).await;
    }

    /// A consistency fault is fatal to the stream session only: discard it
    /// and, if the gate still permits, start a fresh one.
    async fn restart_stream_session(&mut self) {
        if self.stream_state.is_started() {
            self.transport.stop().await;
        }
        self.clean_up_watch_stream_state();
        self.stream_state = StreamState::Stopped;

        if self.should_start_watch_stream() {
            self.stream_state = StreamState::Backoff;
            self.transport.start().await;
        }
    }

    // Transport requests
    // -------------------------------------------------------------------------

    async fn send_watch_request(
        &mut self,
        query_data: QueryData,
    ) {
        let target_id = query_data.target_id;
        self.aggregator.record_pending_target_request(target_id);
        if let Err(e) = self.transport.send(WatchRequest::Watch(query_data)).await {
            // The stream surfaces its own error signal; nothing else to do
            warn!("failed to send watch request for target {}: {}", target_id, e);
        }
    }

    async fn send_unwatch_request(
        &mut self,
        target_id: TargetId,
    ) {
        if let Err(e) = self.transport.send(WatchRequest::Unwatch(target_id)).await {
            warn!("failed to send unwatch request for target {}: {}", target_id, e);
        }
    }
}

impl RemoteStoreHandle {
    /// Starts listening to the given target. Fails with
    /// [`ListenError::AlreadyRegistered`] if its id is still registered.
    pub async fn listen_to_target(
        &self,
        query_data: QueryData,
    ) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.command_tx
            .send(StoreCommand::Listen {
                query_data,
                reply: reply_tx,
            })
            .await
            .map_err(|_| ListenError::StoreShutDown)?;

        match reply_rx.await {
            Ok(result) => result,
            Err(_) => Err(ListenError::StoreShutDown.into()),
        }
    }

    /// Stops listening to the given target. Idempotent.
    pub async fn stop_listening(
        &self,
        target_id: TargetId,
    ) -> Result<()> {
        self.command_tx
            .send(StoreCommand::StopListening { target_id })
            .await
            .map_err(|_| ListenError::StoreShutDown.into())
    }

    /// Allows network use and starts the stream if targets are registered.
    pub async fn enable_network(&self) -> Result<()> {
        self.command_tx
            .send(StoreCommand::EnableNetwork)
            .await
            .map_err(|_| ListenError::StoreShutDown.into())
    }

    /// Forbids network use and tears down any in-flight stream state.
    pub async fn disable_network(&self) -> Result<()> {
        self.command_tx
            .send(StoreCommand::DisableNetwork)
            .await
            .map_err(|_| ListenError::StoreShutDown.into())
    }

    /// The user-preferred network state. Pure intent; actual connectivity
    /// is [`online_state`].
    ///
    /// [`online_state`]: RemoteStoreHandle::online_state
    pub fn can_use_network(&self) -> bool {
        *self.network_enabled_rx.borrow()
    }

    pub fn online_state(&self) -> OnlineState {
        *self.online_state_rx.borrow()
    }

    /// A subscribable view of the online state for UI/status consumers.
    pub fn online_state_watcher(&self) -> watch::Receiver<OnlineState> {
        self.online_state_rx.clone()
    }
}
