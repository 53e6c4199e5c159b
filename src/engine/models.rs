use serde::{Deserialize, Serialize};

/// One desired file as declared by the server.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub name: String,
    pub url: String,
    pub hash: String,
}

/// The server's desired set of managed files, in descriptor order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub files: Vec<ManifestEntry>,
}

impl Manifest {
    pub fn contains(&self, name: &str) -> bool {
        self.files.iter().any(|entry| entry.name == name)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SyncOutcome {
    Ready,
    Degraded(String),
}

impl SyncOutcome {
    pub fn is_ready(&self) -> bool {
        matches!(self, SyncOutcome::Ready)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeletionFailure {
    pub name: String,
    pub reason: String,
}

/// What a single reconciliation run did. Only lives for the run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyncReport {
    pub outcome: SyncOutcome,
    pub deleted: Vec<String>,
    pub fetched: Vec<String>,
    pub verified: Vec<String>,
    pub deletion_failures: Vec<DeletionFailure>,
}

impl SyncReport {
    pub(crate) fn new() -> Self {
        Self {
            outcome: SyncOutcome::Ready,
            deleted: Vec::new(),
            fetched: Vec::new(),
            verified: Vec::new(),
            deletion_failures: Vec::new(),
        }
    }

    pub(crate) fn degraded(mut self, reason: impl Into<String>) -> Self {
        self.outcome = SyncOutcome::Degraded(reason.into());
        self
    }
}
