//! The authoritative record of which targets the user wants watched right
//! now, independent of what the server has acknowledged.
//!
//! Entries live from a successful `register` until `unregister` or a
//! server-side rejection evicts them; absence means "not interesting",
//! regardless of what the server still thinks. On re-establishing the
//! stream the full content is replayed; targets removed by unlistens are
//! dropped eagerly without waiting for server confirmation.

use std::collections::BTreeMap;

use tracing::debug;

use crate::errors::ListenError;
use crate::model::QueryData;
use crate::model::TargetId;
use crate::Result;

/// Single-writer: mutated only from the controller task.
#[derive(Debug, Default)]
pub(crate) struct TargetRegistry {
    targets: BTreeMap<TargetId, QueryData>,
}

impl TargetRegistry {
    pub(crate) fn new() -> Self {
        TargetRegistry {
            targets: BTreeMap::new(),
        }
    }

    pub(crate) fn register(
        &mut self,
        query_data: QueryData,
    ) -> Result<()> {
        let target_id = query_data.target_id;
        if self.targets.contains_key(&target_id) {
            return Err(ListenError::AlreadyRegistered(target_id).into());
        }

        debug!("watch target {} registered", target_id);
        self.targets.insert(target_id, query_data);
        Ok(())
    }

    /// Idempotent; returns the evicted entry if one existed.
    pub(crate) fn unregister(
        &mut self,
        target_id: TargetId,
    ) -> Option<QueryData> {
        let evicted = self.targets.remove(&target_id);
        if evicted.is_some() {
            debug!("watch target {} unregistered", target_id);
        }
        evicted
    }

    /// Replaces an existing entry in place. Unknown targets are ignored: a
    /// resume-token refresh racing an unlisten must not resurrect the
    /// entry.
    pub(crate) fn update(
        &mut self,
        query_data: QueryData,
    ) {
        if let Some(entry) = self.targets.get_mut(&query_data.target_id) {
            *entry = query_data;
        }
    }

    pub(crate) fn get(
        &self,
        target_id: TargetId,
    ) -> Option<&QueryData> {
        self.targets.get(&target_id)
    }

    pub(crate) fn contains(
        &self,
        target_id: TargetId,
    ) -> bool {
        self.targets.contains_key(&target_id)
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.targets.len()
    }

    pub(crate) fn target_ids(&self) -> Vec<TargetId> {
        self.targets.keys().copied().collect()
    }

    /// The full current mapping in ascending target-id order; the stable
    /// replay order used on every stream restart.
    pub(crate) fn snapshot(&self) -> Vec<QueryData> {
        self.targets.values().cloned().collect()
    }
}
