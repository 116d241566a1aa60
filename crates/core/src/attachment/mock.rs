//! In-memory catalog and fault-injecting store for service tests.

use std::collections::{BTreeSet, HashSet};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use chrono::{DateTime, Duration, TimeZone, Utc};
use tokio::sync::Barrier;

use postvault_shared::types::{AccountId, AttachmentId, EmailId, UserId};

use super::error::AttachmentError;
use super::service::AttachmentRepository;
use super::types::{Attachment, AttachmentKind, FieldRemoval, NewAttachment, OwnerField};
use crate::storage::{ObjectMetadata, ObjectStore, StorageError, StorageService};

/// Catalog kept in a vector, with a manual clock.
pub struct MockCatalog {
    rows: Mutex<Vec<Attachment>>,
    next_id: Mutex<i64>,
    now: Mutex<DateTime<Utc>>,
    failing_ids: Mutex<HashSet<AttachmentId>>,
    total_size_gate: Mutex<Option<(Arc<Barrier>, usize)>>,
}

impl MockCatalog {
    pub fn new() -> Self {
        Self {
            rows: Mutex::new(Vec::new()),
            next_id: Mutex::new(1),
            now: Mutex::new(Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()),
            failing_ids: Mutex::new(HashSet::new()),
            total_size_gate: Mutex::new(None),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock().unwrap() += by;
    }

    pub fn rows(&self) -> Vec<Attachment> {
        self.rows.lock().unwrap().clone()
    }

    pub fn sum(&self) -> u64 {
        self.rows.lock().unwrap().iter().map(|r| r.size).sum()
    }

    pub fn has_key(&self, key: &str) -> bool {
        self.rows.lock().unwrap().iter().any(|r| r.key == key)
    }

    /// Make catalog deletion of `id` fail.
    pub fn fail_delete(&self, id: AttachmentId) {
        self.failing_ids.lock().unwrap().insert(id);
    }

    /// The next `callers` calls to `total_size` wait for each other after
    /// reading the sum.
    pub fn gate_total_size(&self, callers: usize) {
        *self.total_size_gate.lock().unwrap() = Some((Arc::new(Barrier::new(callers)), callers));
    }

    fn insert_now(&self, row: NewAttachment) -> Attachment {
        let mut next_id = self.next_id.lock().unwrap();
        let attachment = Attachment {
            id: AttachmentId::new(*next_id),
            key: row.key,
            owner: row.owner,
            filename: row.filename,
            mime_type: row.mime_type,
            size: row.size,
            kind: row.kind,
            content_id: row.content_id,
            create_time: self.now(),
        };
        *next_id += 1;
        self.rows.lock().unwrap().push(attachment.clone());
        attachment
    }
}

fn field_value(row: &Attachment, field: OwnerField) -> Option<i64> {
    match field {
        OwnerField::User => row.owner.user_id.map(UserId::into_inner),
        OwnerField::Account => row.owner.account_id.map(AccountId::into_inner),
        OwnerField::Email => row.owner.email_id.map(EmailId::into_inner),
    }
}

impl AttachmentRepository for MockCatalog {
    async fn insert_many(
        &self,
        rows: Vec<NewAttachment>,
    ) -> Result<Vec<Attachment>, AttachmentError> {
        Ok(rows.into_iter().map(|row| self.insert_now(row)).collect())
    }

    async fn total_size(&self) -> Result<u64, AttachmentError> {
        let total = self.sum();
        let gate = {
            let mut gate = self.total_size_gate.lock().unwrap();
            match gate.as_mut() {
                Some((barrier, remaining)) if *remaining > 0 => {
                    *remaining -= 1;
                    Some(Arc::clone(barrier))
                }
                _ => None,
            }
        };
        if let Some(barrier) = gate {
            barrier.wait().await;
        }
        Ok(total)
    }

    async fn list_oldest_first(&self) -> Result<Vec<Attachment>, AttachmentError> {
        let mut rows = self.rows();
        rows.sort_by_key(|r| (r.create_time, r.id));
        Ok(rows)
    }

    async fn list_created_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Attachment>, AttachmentError> {
        let mut rows: Vec<Attachment> = self
            .rows()
            .into_iter()
            .filter(|r| r.create_time < cutoff)
            .collect();
        rows.sort_by_key(|r| (r.create_time, r.id));
        Ok(rows)
    }

    async fn find_latest_by_keys(
        &self,
        keys: &[String],
    ) -> Result<Vec<Attachment>, AttachmentError> {
        let rows = self.rows();
        Ok(keys
            .iter()
            .filter_map(|key| {
                rows.iter()
                    .filter(|r| &r.key == key)
                    .max_by_key(|r| r.id)
                    .cloned()
            })
            .collect())
    }

    async fn delete_by_id(&self, id: AttachmentId) -> Result<Option<u64>, AttachmentError> {
        if self.failing_ids.lock().unwrap().contains(&id) {
            return Err(AttachmentError::repository("injected delete failure"));
        }
        let mut rows = self.rows.lock().unwrap();
        let Some(pos) = rows.iter().position(|r| r.id == id) else {
            return Ok(None);
        };
        let removed = rows.remove(pos);
        let remaining = rows.iter().filter(|r| r.key == removed.key).count();
        Ok(Some(remaining as u64))
    }

    async fn remove_by_field(
        &self,
        field: OwnerField,
        values: &[i64],
    ) -> Result<FieldRemoval, AttachmentError> {
        let mut rows = self.rows.lock().unwrap();
        let mut removal = FieldRemoval::default();

        for &value in values {
            let (matched, rest): (Vec<Attachment>, Vec<Attachment>) = rows
                .drain(..)
                .partition(|r| field_value(r, field) == Some(value));
            let outside: HashSet<&str> = rest.iter().map(|r| r.key.as_str()).collect();
            let keys: BTreeSet<String> = matched
                .iter()
                .filter(|r| !outside.contains(r.key.as_str()))
                .map(|r| r.key.clone())
                .collect();
            removal.unreferenced_keys.extend(keys);
            removal.rows_deleted += matched.len() as u64;
            *rows = rest;
        }

        Ok(removal)
    }

    async fn list_for_email(
        &self,
        email_id: EmailId,
        user_id: UserId,
    ) -> Result<Vec<Attachment>, AttachmentError> {
        Ok(self
            .rows()
            .into_iter()
            .filter(|r| {
                r.owner.email_id == Some(email_id)
                    && r.owner.user_id == Some(user_id)
                    && r.kind == AttachmentKind::Attachment
                    && r.content_id.is_none()
            })
            .collect())
    }

    async fn list_by_email_ids(
        &self,
        email_ids: &[EmailId],
    ) -> Result<Vec<Attachment>, AttachmentError> {
        Ok(self
            .rows()
            .into_iter()
            .filter(|r| {
                r.kind == AttachmentKind::Attachment
                    && r.owner.email_id.is_some_and(|id| email_ids.contains(&id))
            })
            .collect())
    }
}

/// OpenDAL memory store that fails on chosen keys and records calls.
pub struct FlakyStore {
    inner: StorageService,
    failing_keys: Mutex<HashSet<String>>,
    fail_puts_after: Mutex<Option<usize>>,
    puts: Mutex<Vec<(String, ObjectMetadata)>>,
    delete_batches: Mutex<Vec<usize>>,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self {
            inner: StorageService::from_provider(&postvault_shared::StorageProvider::Memory)
                .expect("memory store"),
            failing_keys: Mutex::new(HashSet::new()),
            fail_puts_after: Mutex::new(None),
            puts: Mutex::new(Vec::new()),
            delete_batches: Mutex::new(Vec::new()),
        }
    }

    pub fn fail_key(&self, key: &str) {
        self.failing_keys.lock().unwrap().insert(key.to_string());
    }

    /// Let `n` more puts succeed, then fail every put.
    pub fn fail_puts_after(&self, n: usize) {
        *self.fail_puts_after.lock().unwrap() = Some(n);
    }

    pub async fn exists(&self, key: &str) -> bool {
        self.inner.exists(key).await
    }

    pub fn puts(&self) -> Vec<(String, ObjectMetadata)> {
        self.puts.lock().unwrap().clone()
    }

    pub fn delete_batches(&self) -> Vec<usize> {
        self.delete_batches.lock().unwrap().clone()
    }

    fn injected(&self, key: &str) -> Option<StorageError> {
        self.failing_keys
            .lock()
            .unwrap()
            .contains(key)
            .then(|| StorageError::operation(format!("injected failure for {key}")))
    }
}

impl ObjectStore for FlakyStore {
    fn is_configured(&self) -> bool {
        true
    }

    async fn put(
        &self,
        key: &str,
        content: Bytes,
        metadata: &ObjectMetadata,
    ) -> Result<(), StorageError> {
        {
            let mut budget = self.fail_puts_after.lock().unwrap();
            if let Some(left) = budget.as_mut() {
                if *left == 0 {
                    return Err(StorageError::operation("injected put failure"));
                }
                *left -= 1;
            }
        }
        if let Some(err) = self.injected(key) {
            return Err(err);
        }
        self.puts
            .lock()
            .unwrap()
            .push((key.to_string(), metadata.clone()));
        self.inner.put(key, content, metadata).await
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        if let Some(err) = self.injected(key) {
            return Err(err);
        }
        self.inner.delete(key).await
    }

    async fn delete_many(&self, keys: &[String]) -> Result<(), StorageError> {
        self.delete_batches.lock().unwrap().push(keys.len());
        if let Some(err) = keys.iter().find_map(|key| self.injected(key)) {
            return Err(err);
        }
        self.inner.delete_many(keys).await
    }
}
