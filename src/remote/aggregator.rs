//! Accumulates the incremental watch changes received since the last
//! emitted snapshot into a pending [`RemoteEvent`].
//!
//! Accumulated state is stream-session-scoped: it is discarded whenever the
//! stream is torn down and restarted, and never persisted. Targets are only
//! tracked while the registry still lists them.

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use tracing::debug;

use super::DocumentChange;
use super::DocumentDelete;
use super::ExistenceFilterChange;
use super::RemoteEvent;
use super::RemoteSyncer;
use super::TargetChange;
use super::TargetRegistry;
use super::WatchTargetChange;
use super::WatchTargetChangeState;
use crate::model::DocumentKey;
use crate::model::SnapshotVersion;
use crate::model::TargetId;

/// Accumulated membership delta for one document within one target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MembershipDelta {
    /// The document entered the target, or changed while inside it.
    Upserted,
    /// The document left the target.
    Removed,
}

/// Outcome of comparing a server existence filter against the client's
/// tracked count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ExistenceFilterResult {
    /// The target is unknown or has unacknowledged requests in flight; the
    /// filter refers to a membership the client no longer tracks.
    Ignored,
    Matched,
    Mismatch { expected: u32, actual: u32 },
}

#[derive(Debug, Default)]
struct TargetState {
    /// Outstanding watch requests the server has not yet acknowledged.
    /// While non-zero the target cannot be reported current: any snapshot
    /// would reflect a membership the server is still reworking.
    pending_responses: u32,
    current: bool,
    resume_token: Vec<u8>,
    document_changes: BTreeMap<DocumentKey, MembershipDelta>,
    /// Whether anything observable happened since the last flush.
    has_changes: bool,
}

impl TargetState {
    fn is_pending(&self) -> bool {
        self.pending_responses > 0
    }

    fn record_request(&mut self) {
        self.pending_responses += 1;
    }

    fn record_response(&mut self) {
        self.pending_responses = self.pending_responses.saturating_sub(1);
    }

    fn mark_current(&mut self) {
        self.current = true;
        self.has_changes = true;
    }

    fn update_resume_token(
        &mut self,
        resume_token: &[u8],
    ) {
        if !resume_token.is_empty() {
            self.resume_token = resume_token.to_vec();
            self.has_changes = true;
        }
    }

    fn upsert_document(
        &mut self,
        key: DocumentKey,
    ) {
        self.document_changes.insert(key, MembershipDelta::Upserted);
        self.has_changes = true;
    }

    fn remove_document(
        &mut self,
        key: DocumentKey,
    ) {
        self.document_changes.insert(key, MembershipDelta::Removed);
        self.has_changes = true;
    }
}

#[derive(Debug, Default)]
pub(crate) struct WatchChangeAggregator {
    target_states: BTreeMap<TargetId, TargetState>,
    /// Targets whose local cache must be rebuilt after an existence-filter
    /// mismatch or a server-side reset; drained into the next RemoteEvent.
    pending_target_resets: BTreeSet<TargetId>,
}

impl WatchChangeAggregator {
    pub(crate) fn new() -> Self {
        WatchChangeAggregator::default()
    }

    /// A watch request went out for this target; the server will answer
    /// with an `Added` target change.
    pub(crate) fn record_pending_target_request(
        &mut self,
        target_id: TargetId,
    ) {
        self.target_state(target_id).record_request();
    }

    pub(crate) fn handle_document_change(
        &mut self,
        change: &DocumentChange,
        registry: &TargetRegistry,
    ) {
        for &target_id in &change.updated_target_ids {
            if registry.contains(target_id) {
                self.target_state(target_id).upsert_document(change.key.clone());
            }
        }
        for &target_id in &change.removed_target_ids {
            if registry.contains(target_id) {
                self.target_state(target_id).remove_document(change.key.clone());
            }
        }
    }

    pub(crate) fn handle_document_delete(
        &mut self,
        delete: &DocumentDelete,
        registry: &TargetRegistry,
    ) {
        for &target_id in &delete.removed_target_ids {
            if registry.contains(target_id) {
                self.target_state(target_id).remove_document(delete.key.clone());
            }
        }
    }

    /// Rejections (`Removed` with a cause) never reach here; the controller
    /// evicts those targets before the aggregator sees them.
    pub(crate) fn handle_target_change(
        &mut self,
        change: &WatchTargetChange,
        registry: &TargetRegistry,
    ) {
        for target_id in self.effective_target_ids(change, registry) {
            match change.state {
                WatchTargetChangeState::NoChange => {}
                WatchTargetChangeState::Added => {
                    self.target_state(target_id).record_response();
                }
                WatchTargetChangeState::Removed => {
                    // Ack of a graceful unwatch; the state, if any, is
                    // already being torn down.
                    if let Some(state) = self.target_states.get_mut(&target_id) {
                        state.record_response();
                    }
                    continue;
                }
                WatchTargetChangeState::Current => {
                    self.target_state(target_id).mark_current();
                }
                WatchTargetChangeState::Reset => {
                    // The server discarded its state: the next updates are
                    // a full refetch, so the local view must start over.
                    self.reset_target(target_id);
                }
            }
            self.target_state(target_id).update_resume_token(&change.resume_token);
        }
    }

    /// Compares the server-reported count against the remote key set the
    /// sync engine last applied, adjusted by the deltas accumulated this
    /// session.
    pub(crate) fn handle_existence_filter(
        &self,
        filter: &ExistenceFilterChange,
        registry: &TargetRegistry,
        syncer: &dyn RemoteSyncer,
    ) -> ExistenceFilterResult {
        if !registry.contains(filter.target_id) {
            return ExistenceFilterResult::Ignored;
        }
        if self
            .target_states
            .get(&filter.target_id)
            .is_some_and(TargetState::is_pending)
        {
            return ExistenceFilterResult::Ignored;
        }

        let actual = self.current_document_count(filter.target_id, syncer);
        if actual == filter.count {
            ExistenceFilterResult::Matched
        } else {
            ExistenceFilterResult::Mismatch {
                expected: filter.count,
                actual,
            }
        }
    }

    /// Discard everything accumulated for the target and queue it for a
    /// full reset in the next emitted event. The target stays tracked.
    pub(crate) fn reset_target(
        &mut self,
        target_id: TargetId,
    ) {
        let state = self.target_state(target_id);
        state.document_changes.clear();
        state.current = false;
        state.resume_token.clear();
        state.has_changes = true;
        self.pending_target_resets.insert(target_id);
        debug!("target {} queued for full reset", target_id);
    }

    /// Forget the target entirely (unlisten or server rejection).
    pub(crate) fn remove_target(
        &mut self,
        target_id: TargetId,
    ) {
        self.target_states.remove(&target_id);
        self.pending_target_resets.remove(&target_id);
    }

    /// Discard the whole session's accumulated state (stream restart).
    pub(crate) fn reset(&mut self) {
        self.target_states.clear();
        self.pending_target_resets.clear();
    }

    /// Flush the accumulated state into one immutable event at the given
    /// version. Document deltas are classified against the sync engine's
    /// last-known remote key set: a key the server already assigned is
    /// "modified", an unknown key is "added", and a removal of a key the
    /// server never assigned is dropped.
    pub(crate) fn create_remote_event(
        &mut self,
        snapshot_version: SnapshotVersion,
        registry: &TargetRegistry,
        syncer: &dyn RemoteSyncer,
    ) -> RemoteEvent {
        let mut target_changes = BTreeMap::new();

        for (&target_id, state) in self.target_states.iter_mut() {
            if !registry.contains(target_id) || !state.has_changes {
                continue;
            }

            let remote_keys = syncer.remote_keys_for_target(target_id);
            let mut target_change = TargetChange {
                resume_token: state.resume_token.clone(),
                current: state.current && !state.is_pending(),
                ..Default::default()
            };

            for (key, delta) in &state.document_changes {
                match delta {
                    MembershipDelta::Upserted => {
                        if remote_keys.contains(key) {
                            target_change.modified_documents.insert(key.clone());
                        } else {
                            target_change.added_documents.insert(key.clone());
                        }
                    }
                    MembershipDelta::Removed => {
                        if remote_keys.contains(key) {
                            target_change.removed_documents.insert(key.clone());
                        }
                    }
                }
            }

            target_changes.insert(target_id, target_change);
            state.document_changes.clear();
            state.has_changes = false;
        }

        RemoteEvent {
            snapshot_version,
            target_changes,
            target_resets: std::mem::take(&mut self.pending_target_resets),
        }
    }

    fn current_document_count(
        &self,
        target_id: TargetId,
        syncer: &dyn RemoteSyncer,
    ) -> u32 {
        let remote_keys = syncer.remote_keys_for_target(target_id);
        let mut count = remote_keys.len() as i64;

        if let Some(state) = self.target_states.get(&target_id) {
            for (key, delta) in &state.document_changes {
                match delta {
                    MembershipDelta::Upserted => {
                        if !remote_keys.contains(key) {
                            count += 1;
                        }
                    }
                    MembershipDelta::Removed => {
                        if remote_keys.contains(key) {
                            count -= 1;
                        }
                    }
                }
            }
        }

        count.max(0) as u32
    }

    /// An empty target list addresses every target still in the registry.
    fn effective_target_ids(
        &self,
        change: &WatchTargetChange,
        registry: &TargetRegistry,
    ) -> Vec<TargetId> {
        if change.is_global() {
            registry.target_ids()
        } else {
            change
                .target_ids
                .iter()
                .copied()
                .filter(|&target_id| registry.contains(target_id))
                .collect()
        }
    }

    fn target_state(
        &mut self,
        target_id: TargetId,
    ) -> &mut TargetState {
        self.target_states.entry(target_id).or_default()
    }
}
