use std::sync::Arc;

use parking_lot::RwLock;
use podsweep_types::Credential;

/// Holds the credential currently installed on the cluster client.
///
/// Readers get a snapshot `Arc`; a refresh swaps in a new credential without
/// touching the one readers already hold.
#[derive(Debug, Default)]
pub struct CredentialStore {
    current: RwLock<Option<Arc<Credential>>>,
}

impl CredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<Arc<Credential>> {
        self.current.read().clone()
    }

    /// Install `credential`, returning the one it supersedes
    pub fn replace(&self, credential: Credential) -> Option<Arc<Credential>> {
        self.current.write().replace(Arc::new(credential))
    }
}
