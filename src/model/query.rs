use crate::model::SnapshotVersion;
use crate::model::TargetId;

/// Why a target is being listened to. Re-listens issued during recovery
/// carry a distinct purpose so the server can treat them accordingly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryPurpose {
    /// An ordinary client-initiated listen.
    Listen,
    /// A refetch after the server's existence filter disagreed with the
    /// local document count.
    ExistenceFilterMismatch,
    /// Resolution of a document the client can no longer prove membership
    /// for.
    LimboResolution,
}

/// A target definition as the user wants it watched: the canonical query,
/// plus the resume metadata needed to re-establish the listen efficiently.
///
/// Query compilation is out of scope here; the query travels as its
/// canonical string form.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryData {
    pub target_id: TargetId,
    pub query: String,
    pub purpose: QueryPurpose,
    /// Opaque server token; resuming with it skips changes the client has
    /// already seen. Empty means "start from scratch".
    pub resume_token: Vec<u8>,
    /// The last snapshot version at which this target was consistent.
    pub snapshot_version: SnapshotVersion,
}

impl QueryData {
    pub fn new(
        target_id: TargetId,
        query: impl Into<String>,
    ) -> Self {
        QueryData {
            target_id,
            query: query.into(),
            purpose: QueryPurpose::Listen,
            resume_token: Vec::new(),
            snapshot_version: SnapshotVersion::NONE,
        }
    }

    pub fn with_resume_token(
        mut self,
        resume_token: Vec<u8>,
    ) -> Self {
        self.resume_token = resume_token;
        self
    }

    pub fn with_purpose(
        mut self,
        purpose: QueryPurpose,
    ) -> Self {
        self.purpose = purpose;
        self
    }
}
