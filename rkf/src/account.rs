//! Read-modify-write of account records.
//!
//! The storage engine only offers "read the whole record" and "replace the
//! whole record", so every edit copies the record, changes the copy and
//! writes it back through the setter obtained with the read. There is no
//! version check on the write: two concurrent edits of one account race and
//! the later write wins.

use std::sync::Arc;

use common::{
    AccountRecord, Assigned, GrainId, GrainRef, RpcError, Setter, StorageRoot,
    account_object_name,
};
use log::debug;

/// An account record as read, together with the setter that replaces it.
pub struct AccountSnapshot {
    owner_id: String,
    record: AccountRecord,
    setter: Arc<dyn Setter<AccountRecord>>,
}

impl AccountSnapshot {
    /// Read `user-<owner_id>`, creating an empty record on first use.
    pub async fn open(storage: &dyn StorageRoot, owner_id: &str) -> Result<Self, RpcError> {
        let assignable = storage
            .get_or_create_account(&account_object_name(owner_id), AccountRecord::default())
            .await?;
        let Assigned { value, setter } = assignable.get().await?;
        Ok(Self {
            owner_id: owner_id.to_string(),
            record: value,
            setter,
        })
    }

    pub fn record(&self) -> &AccountRecord {
        &self.record
    }

    pub fn find(&self, grain_id: &GrainId) -> Option<&GrainRef> {
        self.record.find(grain_id)
    }

    /// Write the record back with `grain` appended.
    pub async fn append(self, grain: GrainRef) -> Result<(), RpcError> {
        debug!("account {}: adding grain {}", self.owner_id, grain.id);
        let updated = with_grain(&self.record, grain);
        self.setter.set(updated).await
    }

    /// Write the record back without `grain_id`. Returns `false`, and writes
    /// nothing, when the grain is not listed.
    pub async fn remove(self, grain_id: &GrainId) -> Result<bool, RpcError> {
        let Some(updated) = without_grain(&self.record, grain_id) else {
            return Ok(false);
        };
        debug!("account {}: removing grain {grain_id}", self.owner_id);
        self.setter.set(updated).await?;
        Ok(true)
    }
}

/// Copy of `record` grown by one slot holding `grain`.
pub fn with_grain(record: &AccountRecord, grain: GrainRef) -> AccountRecord {
    let mut copy = record.clone();
    copy.grains.reserve_exact(1);
    copy.grains.push(grain);
    copy
}

/// Copy of `record` with `grain_id` removed: the last entry takes its slot
/// and the list shrinks by one. `None` if the grain is absent.
pub fn without_grain(record: &AccountRecord, grain_id: &GrainId) -> Option<AccountRecord> {
    let index = record.grains.iter().position(|g| &g.id == grain_id)?;
    let mut copy = record.clone();
    copy.grains.swap_remove(index);
    Some(copy)
}
