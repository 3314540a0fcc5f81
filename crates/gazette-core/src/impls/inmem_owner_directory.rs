//! InMemoryOwnerDirectory - 開発用の所有者ディレクトリ

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;

use crate::domain::{OwnerId, StoreError};
use crate::ports::{OwnerContext, OwnerDirectory};

struct OwnerEntry {
    context: OwnerContext,
    interests: Vec<String>,
}

/// Owners and their interests, kept in id order.
#[derive(Default)]
pub struct InMemoryOwnerDirectory {
    owners: RwLock<BTreeMap<OwnerId, OwnerEntry>>,
}

impl InMemoryOwnerDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an owner.
    pub fn upsert(&self, context: OwnerContext, interests: Vec<String>) {
        let mut owners = self.owners.write().unwrap_or_else(PoisonError::into_inner);
        owners.insert(context.id, OwnerEntry { context, interests });
    }

    pub fn set_interests(&self, id: OwnerId, interests: Vec<String>) -> bool {
        let mut owners = self.owners.write().unwrap_or_else(PoisonError::into_inner);
        match owners.get_mut(&id) {
            Some(entry) => {
                entry.interests = interests;
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, id: OwnerId) -> bool {
        let mut owners = self.owners.write().unwrap_or_else(PoisonError::into_inner);
        owners.remove(&id).is_some()
    }
}

#[async_trait]
impl OwnerDirectory for InMemoryOwnerDirectory {
    async fn get_owner(&self, id: OwnerId) -> Result<Option<OwnerContext>, StoreError> {
        let owners = self.owners.read().unwrap_or_else(PoisonError::into_inner);
        Ok(owners.get(&id).map(|entry| entry.context.clone()))
    }

    async fn interests(&self, id: OwnerId) -> Result<Vec<String>, StoreError> {
        let owners = self.owners.read().unwrap_or_else(PoisonError::into_inner);
        Ok(owners
            .get(&id)
            .map(|entry| entry.interests.clone())
            .unwrap_or_default())
    }

    async fn list_owners(&self) -> Result<Vec<OwnerContext>, StoreError> {
        let owners = self.owners.read().unwrap_or_else(PoisonError::into_inner);
        Ok(owners.values().map(|entry| entry.context.clone()).collect())
    }
}
