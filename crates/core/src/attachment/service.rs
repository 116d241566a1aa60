//! Attachment service implementation.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, error, info, warn};

use postvault_shared::types::{AccountId, AttachmentId, EmailId, UserId};

use super::error::AttachmentError;
use super::html::{decode_data_uri, rewrite_embedded_images};
use super::key::derive_key;
use super::settings::SettingsProvider;
use super::types::{
    Attachment, AttachmentKind, BulkRemoval, DeleteOutcome, EmbeddedImage, ExtractedImage,
    FieldRemoval, IngestRequest, NewAttachment, OutgoingAttachment, Owner, OwnerField,
    PreparedHtml, QuotaReport, SweepReport, UploadedAttachment,
};
use crate::storage::{ObjectMetadata, ObjectStore};

/// Maximum keys per batched object store delete.
pub const DELETE_BATCH_SIZE: usize = 1000;

/// `Cache-Control` sent with embedded images.
pub const EMBEDDED_CACHE_CONTROL: &str = "max-age=259200";

/// Repository trait for the attachment catalog.
///
/// This trait is implemented by the db crate to provide actual database operations.
pub trait AttachmentRepository: Send + Sync {
    /// Insert every row in one transaction.
    fn insert_many(
        &self,
        rows: Vec<NewAttachment>,
    ) -> impl Future<Output = Result<Vec<Attachment>, AttachmentError>> + Send;

    /// Sum of `size` over all rows.
    fn total_size(&self) -> impl Future<Output = Result<u64, AttachmentError>> + Send;

    /// All rows ordered by `create_time`, then `id`, ascending.
    fn list_oldest_first(
        &self,
    ) -> impl Future<Output = Result<Vec<Attachment>, AttachmentError>> + Send;

    /// Rows with `create_time` strictly before `cutoff`.
    fn list_created_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> impl Future<Output = Result<Vec<Attachment>, AttachmentError>> + Send;

    /// The most recent row (highest id) for each of `keys`. Absent keys are
    /// left out.
    fn find_latest_by_keys(
        &self,
        keys: &[String],
    ) -> impl Future<Output = Result<Vec<Attachment>, AttachmentError>> + Send;

    /// Delete one row and count the rows still referencing its key, in one
    /// transaction. `None` when the row no longer exists.
    fn delete_by_id(
        &self,
        id: AttachmentId,
    ) -> impl Future<Output = Result<Option<u64>, AttachmentError>> + Send;

    /// For each value in order, collect the keys of matching rows that no
    /// other row references, then delete the matching rows. One transaction.
    fn remove_by_field(
        &self,
        field: OwnerField,
        values: &[i64],
    ) -> impl Future<Output = Result<FieldRemoval, AttachmentError>> + Send;

    /// Regular attachments of an email owned by a user.
    fn list_for_email(
        &self,
        email_id: EmailId,
        user_id: UserId,
    ) -> impl Future<Output = Result<Vec<Attachment>, AttachmentError>> + Send;

    /// Regular attachments of a set of emails.
    fn list_by_email_ids(
        &self,
        email_ids: &[EmailId],
    ) -> impl Future<Output = Result<Vec<Attachment>, AttachmentError>> + Send;
}

/// A normalized row plus the bytes to write, if any.
struct Staged {
    row: NewAttachment,
    content: Option<Bytes>,
}

/// Attachment lifecycle: ingestion, quota, expiration and safe deletion.
pub struct AttachmentService<R, S, C> {
    repo: Arc<R>,
    store: Arc<S>,
    settings: Arc<C>,
}

impl<R, S, C> Clone for AttachmentService<R, S, C> {
    fn clone(&self) -> Self {
        Self {
            repo: Arc::clone(&self.repo),
            store: Arc::clone(&self.store),
            settings: Arc::clone(&self.settings),
        }
    }
}

impl<R, S, C> AttachmentService<R, S, C>
where
    R: AttachmentRepository,
    S: ObjectStore,
    C: SettingsProvider,
{
    /// Create a new attachment service.
    #[must_use]
    pub fn new(repo: Arc<R>, store: Arc<S>, settings: Arc<C>) -> Self {
        Self {
            repo,
            store,
            settings,
        }
    }

    // ========================================================================
    // Ingestion
    // ========================================================================

    /// Ingest one batch.
    ///
    /// Payloads are decoded first, so invalid content fails the batch before
    /// any side effect. Quota enforcement then runs with the batch size as the
    /// incoming hint, sparing every row whose key a reference in the batch
    /// points at. Objects are written, and finally all rows are inserted
    /// in one transaction. A failed write aborts before the insert; objects
    /// written earlier in the batch stay in the store unreferenced.
    pub async fn ingest(&self, request: IngestRequest) -> Result<Vec<Attachment>, AttachmentError> {
        let staged = stage(request)?;
        if staged.is_empty() {
            return Ok(Vec::new());
        }

        let incoming = staged
            .iter()
            .fold(0u64, |total, s| total.saturating_add(s.row.size));
        let referenced: HashSet<&str> = staged
            .iter()
            .filter(|s| s.content.is_none())
            .map(|s| s.row.key.as_str())
            .collect();
        self.evict(incoming, &referenced).await?;

        for (written, item) in staged.iter().enumerate() {
            let Some(content) = &item.content else {
                continue;
            };
            let metadata = object_metadata(&item.row);
            if let Err(e) = self.store.put(&item.row.key, content.clone(), &metadata).await {
                error!(
                    key = %item.row.key,
                    written,
                    error = %e,
                    "object write failed, batch aborted before catalog insert"
                );
                return Err(e.into());
            }
        }

        let rows: Vec<NewAttachment> = staged.into_iter().map(|s| s.row).collect();
        let count = rows.len();
        let inserted = self.repo.insert_many(rows).await?;
        debug!(count, incoming, "attachments ingested");
        Ok(inserted)
    }

    /// Store files uploaded from the editor.
    pub async fn add_attachments(
        &self,
        uploads: Vec<UploadedAttachment>,
    ) -> Result<Vec<Attachment>, AttachmentError> {
        self.ingest(IngestRequest::Upload(uploads)).await
    }

    /// Store the base64 attachments of an outgoing email.
    pub async fn save_send_attachments(
        &self,
        owner: Owner,
        attachments: Vec<OutgoingAttachment>,
    ) -> Result<Vec<Attachment>, AttachmentError> {
        self.ingest(IngestRequest::Outgoing { owner, attachments })
            .await
    }

    /// Store the images extracted from an email body.
    pub async fn save_article_images(
        &self,
        owner: Owner,
        images: Vec<EmbeddedImage>,
    ) -> Result<Vec<Attachment>, AttachmentError> {
        self.ingest(IngestRequest::Article { owner, images }).await
    }

    // ========================================================================
    // Embedded images
    // ========================================================================

    /// Rewrite the images of an HTML body and resolve references to stored
    /// objects.
    ///
    /// References whose key has no catalog row are dropped; their `src` keeps
    /// the rewritten `cid:` token.
    pub async fn prepare_embedded_images(
        &self,
        html: &str,
    ) -> Result<PreparedHtml, AttachmentError> {
        let settings = self.settings.attachment_settings().await?;
        let extracted = rewrite_embedded_images(html, settings.public_object_domain.as_deref());

        let keys: Vec<String> = {
            let mut seen = HashSet::new();
            extracted
                .images
                .iter()
                .filter_map(|image| match image {
                    ExtractedImage::Reference { key, .. } if seen.insert(key.as_str()) => {
                        Some(key.clone())
                    }
                    _ => None,
                })
                .collect()
        };

        let mut stored: HashMap<String, Attachment> = HashMap::new();
        if !keys.is_empty() {
            for row in self.repo.find_latest_by_keys(&keys).await? {
                match stored.get(&row.key) {
                    Some(existing) if existing.id >= row.id => {}
                    _ => {
                        stored.insert(row.key.clone(), row);
                    }
                }
            }
        }

        let images = extracted
            .images
            .into_iter()
            .filter_map(|image| match image {
                ExtractedImage::Inline(image) => Some(image),
                ExtractedImage::Reference { key, content_id } => {
                    let Some(row) = stored.get(&key) else {
                        debug!(%key, "dropping reference to unknown object");
                        return None;
                    };
                    Some(EmbeddedImage {
                        key,
                        filename: row.filename.clone(),
                        mime_type: row.mime_type.clone(),
                        size: row.size,
                        content_id,
                        content: None,
                    })
                }
            })
            .collect();

        Ok(PreparedHtml {
            html: extracted.html,
            images,
        })
    }

    // ========================================================================
    // Quota
    // ========================================================================

    /// Evict the oldest rows until `current + incoming` fits the ceiling.
    ///
    /// A row counts toward the freed bytes once it has left the catalog, even
    /// when its object could not be deleted. Running out of rows is reported,
    /// not an error.
    pub async fn enforce_quota(&self, incoming: u64) -> Result<QuotaReport, AttachmentError> {
        self.evict(incoming, &HashSet::new()).await
    }

    /// Quota walk that never touches rows whose key is in `protected`.
    async fn evict(
        &self,
        incoming: u64,
        protected: &HashSet<&str>,
    ) -> Result<QuotaReport, AttachmentError> {
        let settings = self.settings.attachment_settings().await?;
        let ceiling = settings.storage_max_size_bytes;
        let current = self.repo.total_size().await?;
        let projected = current.saturating_add(incoming);

        let mut report = QuotaReport {
            ceiling,
            current,
            incoming,
            ..QuotaReport::default()
        };
        if projected <= ceiling {
            return Ok(report);
        }
        report.deficit = projected - ceiling;

        if !self.store.is_configured() {
            warn!(
                deficit = report.deficit,
                "object store not configured, skipping quota eviction"
            );
            report.skipped = true;
            return Ok(report);
        }

        let candidates = self.repo.list_oldest_first().await?;
        for row in &candidates {
            if report.freed >= report.deficit {
                break;
            }
            if protected.contains(row.key.as_str()) {
                report.protected += 1;
                continue;
            }
            let outcome = self.safe_delete(row).await;
            if outcome.frees_quota() {
                report.freed = report.freed.saturating_add(row.size);
                report.evicted += 1;
                if outcome == DeleteOutcome::Orphaned {
                    report.orphaned += 1;
                }
            } else {
                report.failed += 1;
            }
        }

        if report.satisfied() {
            info!(
                deficit = report.deficit,
                freed = report.freed,
                evicted = report.evicted,
                orphaned = report.orphaned,
                "quota enforced"
            );
        } else {
            report.exhausted = true;
            warn!(
                deficit = report.deficit,
                freed = report.freed,
                evicted = report.evicted,
                failed = report.failed,
                protected = report.protected,
                "quota eviction ran out of candidates"
            );
        }

        Ok(report)
    }

    // ========================================================================
    // Expiration
    // ========================================================================

    /// Delete every row older than the retention window.
    pub async fn clean_expired(&self) -> Result<SweepReport, AttachmentError> {
        self.clean_expired_at(Utc::now()).await
    }

    /// Delete every row created strictly before `now - file_expire_days`.
    /// A retention of zero days disables the sweep.
    pub async fn clean_expired_at(&self, now: DateTime<Utc>) -> Result<SweepReport, AttachmentError> {
        let settings = self.settings.attachment_settings().await?;
        if settings.file_expire_days == 0 {
            debug!("expiration disabled");
            return Ok(SweepReport::default());
        }

        let cutoff = now - Duration::days(i64::from(settings.file_expire_days));
        let expired = self.repo.list_created_before(cutoff).await?;

        let mut report = SweepReport {
            cutoff: Some(cutoff),
            ..SweepReport::default()
        };
        for row in &expired {
            report.record(self.safe_delete(row).await);
        }

        info!(
            %cutoff,
            examined = report.examined,
            deleted = report.deleted,
            retained = report.retained,
            failed = report.failed + report.orphaned,
            "expiration sweep finished"
        );
        Ok(report)
    }

    // ========================================================================
    // Safe deletion
    // ========================================================================

    /// Delete one row, and its object when no other row references the key.
    ///
    /// The catalog row goes first, so an interruption can only leave an
    /// unreferenced object behind. Never fails; the outcome says what happened.
    pub async fn safe_delete(&self, row: &Attachment) -> DeleteOutcome {
        if !self.store.is_configured() {
            warn!(id = %row.id, key = %row.key, "object store not configured, skipping deletion");
            return DeleteOutcome::Skipped;
        }

        let remaining = match self.repo.delete_by_id(row.id).await {
            Ok(Some(remaining)) => remaining,
            Ok(None) => return DeleteOutcome::Missing,
            Err(e) => {
                error!(id = %row.id, key = %row.key, error = %e, "catalog delete failed");
                return DeleteOutcome::Failed;
            }
        };

        if remaining > 0 {
            return DeleteOutcome::Retained;
        }

        match self.store.delete(&row.key).await {
            Ok(()) => DeleteOutcome::Deleted,
            Err(e) => {
                error!(id = %row.id, key = %row.key, error = %e, "object delete failed, object orphaned");
                DeleteOutcome::Orphaned
            }
        }
    }

    /// Delete every row owned by any of `values` in `field`, then the objects
    /// no surviving row references.
    ///
    /// Catalog failures propagate and leave everything in place. Object store
    /// failures are logged and counted.
    pub async fn remove_by_field(
        &self,
        field: OwnerField,
        values: &[i64],
    ) -> Result<BulkRemoval, AttachmentError> {
        if values.is_empty() {
            return Ok(BulkRemoval::default());
        }

        let removal = self.repo.remove_by_field(field, values).await?;
        let mut report = BulkRemoval {
            rows_deleted: removal.rows_deleted,
            ..BulkRemoval::default()
        };
        let keys = removal.unreferenced_keys;
        if keys.is_empty() {
            return Ok(report);
        }

        if !self.store.is_configured() {
            warn!(
                field = field.column(),
                keys = keys.len(),
                "object store not configured, leaving objects in place"
            );
            report.objects_failed = keys.len();
            return Ok(report);
        }

        for batch in keys.chunks(DELETE_BATCH_SIZE) {
            match self.store.delete_many(batch).await {
                Ok(()) => report.objects_deleted += batch.len(),
                Err(e) => {
                    error!(
                        field = field.column(),
                        keys = batch.len(),
                        error = %e,
                        "batch object delete failed, objects orphaned"
                    );
                    report.objects_failed += batch.len();
                }
            }
        }

        info!(
            field = field.column(),
            rows = report.rows_deleted,
            objects = report.objects_deleted,
            "attachments removed"
        );
        Ok(report)
    }

    /// Remove the attachments of deleted users.
    pub async fn remove_by_user_ids(
        &self,
        user_ids: &[UserId],
    ) -> Result<BulkRemoval, AttachmentError> {
        let values: Vec<i64> = user_ids.iter().map(|id| id.into_inner()).collect();
        self.remove_by_field(OwnerField::User, &values).await
    }

    /// Remove the attachments of deleted emails.
    pub async fn remove_by_email_ids(
        &self,
        email_ids: &[EmailId],
    ) -> Result<BulkRemoval, AttachmentError> {
        let values: Vec<i64> = email_ids.iter().map(|id| id.into_inner()).collect();
        self.remove_by_field(OwnerField::Email, &values).await
    }

    /// Remove the attachments of a deleted account.
    pub async fn remove_by_account_id(
        &self,
        account_id: AccountId,
    ) -> Result<BulkRemoval, AttachmentError> {
        self.remove_by_field(OwnerField::Account, &[account_id.into_inner()])
            .await
    }

    // ========================================================================
    // Listing
    // ========================================================================

    /// Regular attachments of an email, as shown to its owner.
    pub async fn list(
        &self,
        email_id: EmailId,
        user_id: UserId,
    ) -> Result<Vec<Attachment>, AttachmentError> {
        self.repo.list_for_email(email_id, user_id).await
    }

    /// Regular attachments of a set of emails.
    pub async fn list_by_email_ids(
        &self,
        email_ids: &[EmailId],
    ) -> Result<Vec<Attachment>, AttachmentError> {
        if email_ids.is_empty() {
            return Ok(Vec::new());
        }
        self.repo.list_by_email_ids(email_ids).await
    }
}

/// Normalize a request into rows, decoding payloads and deriving keys.
fn stage(request: IngestRequest) -> Result<Vec<Staged>, AttachmentError> {
    match request {
        IngestRequest::Upload(uploads) => Ok(uploads
            .into_iter()
            .map(|upload| {
                let kind = if upload.content_id.is_some() {
                    AttachmentKind::EmbeddedImage
                } else {
                    AttachmentKind::Attachment
                };
                Staged {
                    row: NewAttachment {
                        key: derive_key(&upload.content, &upload.filename),
                        owner: upload.owner,
                        size: upload.content.len() as u64,
                        filename: upload.filename,
                        mime_type: upload.mime_type,
                        kind,
                        content_id: upload.content_id,
                    },
                    content: Some(upload.content),
                }
            })
            .collect()),
        IngestRequest::Outgoing { owner, attachments } => attachments
            .into_iter()
            .map(|attachment| {
                let bytes = decode_base64(&attachment.filename, &attachment.content)?;
                Ok(Staged {
                    row: NewAttachment {
                        key: derive_key(&bytes, &attachment.filename),
                        owner,
                        size: bytes.len() as u64,
                        filename: attachment.filename,
                        mime_type: attachment.mime_type,
                        kind: AttachmentKind::Attachment,
                        content_id: None,
                    },
                    content: Some(Bytes::from(bytes)),
                })
            })
            .collect(),
        IngestRequest::Article { owner, images } => Ok(images
            .into_iter()
            .map(|image| Staged {
                row: NewAttachment {
                    key: image.key,
                    owner,
                    filename: image.filename,
                    mime_type: image.mime_type,
                    size: image
                        .content
                        .as_ref()
                        .map_or(image.size, |bytes| bytes.len() as u64),
                    kind: AttachmentKind::EmbeddedImage,
                    content_id: Some(image.content_id),
                },
                content: image.content,
            })
            .collect()),
    }
}

fn decode_base64(filename: &str, content: &str) -> Result<Vec<u8>, AttachmentError> {
    if content.starts_with("data:") {
        return decode_data_uri(content)
            .map(|(_, bytes)| bytes)
            .ok_or_else(|| AttachmentError::invalid_content(filename, "malformed data URI"));
    }
    let payload: String = content.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    STANDARD
        .decode(payload)
        .map_err(|e| AttachmentError::invalid_content(filename, e.to_string()))
}

fn object_metadata(row: &NewAttachment) -> ObjectMetadata {
    match row.kind {
        AttachmentKind::Attachment => ObjectMetadata {
            content_type: row.mime_type.clone(),
            content_disposition: format!("attachment;filename={}", row.filename),
            cache_control: None,
        },
        AttachmentKind::EmbeddedImage => ObjectMetadata {
            content_type: row.mime_type.clone(),
            content_disposition: format!("inline;filename={}", row.filename),
            cache_control: Some(EMBEDDED_CACHE_CONTROL.to_string()),
        },
    }
}
