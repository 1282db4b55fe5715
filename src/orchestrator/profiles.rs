//! Browser-profile lookup seam
//!
//! Profiles are orchestrator-owned; workers only ever see snapshots
//! embedded in task metadata, never this store.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::model::BrowserProfile;
use crate::store::StoreError;

/// Read surface over the profile table
#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn get(&self, profile_id: &str) -> Result<Option<BrowserProfile>, StoreError>;
}

/// In-memory profile store
#[derive(Default)]
pub struct MemoryProfileStore {
    profiles: RwLock<HashMap<String, BrowserProfile>>,
}

impl MemoryProfileStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, profile: BrowserProfile) {
        self.profiles
            .write()
            .await
            .insert(profile.id.clone(), profile);
    }
}

#[async_trait]
impl ProfileStore for MemoryProfileStore {
    async fn get(&self, profile_id: &str) -> Result<Option<BrowserProfile>, StoreError> {
        Ok(self.profiles.read().await.get(profile_id).cloned())
    }
}
