//! Attachment types and data structures.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use postvault_shared::types::{AccountId, AttachmentId, EmailId, UserId};

/// Classification of a catalog row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentKind {
    /// Regular file attachment, served with `attachment` disposition.
    Attachment,
    /// Image referenced from the HTML body through a `cid:` token.
    EmbeddedImage,
}

/// Parent entities a row belongs to. All three are absent for staging rows
/// created before an email is sent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Owner {
    /// Owning mailbox user.
    pub user_id: Option<UserId>,
    /// Owning mail account.
    pub account_id: Option<AccountId>,
    /// Owning email.
    pub email_id: Option<EmailId>,
}

impl Owner {
    /// Owner with every parent set.
    #[must_use]
    pub fn new(user_id: UserId, account_id: AccountId, email_id: EmailId) -> Self {
        Self {
            user_id: Some(user_id),
            account_id: Some(account_id),
            email_id: Some(email_id),
        }
    }

    /// Owner with no parents.
    #[must_use]
    pub fn staging() -> Self {
        Self::default()
    }
}

/// Owner column used by bulk removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwnerField {
    /// `user_id`
    User,
    /// `account_id`
    Account,
    /// `email_id`
    Email,
}

impl OwnerField {
    /// Catalog column name.
    #[must_use]
    pub fn column(&self) -> &'static str {
        match self {
            Self::User => "user_id",
            Self::Account => "account_id",
            Self::Email => "email_id",
        }
    }
}

/// A catalog row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    /// Store-assigned id, increasing with insertion order.
    pub id: AttachmentId,
    /// Content-addressed object key. Several rows may share one key.
    pub key: String,
    /// Owning parents.
    pub owner: Owner,
    /// Original filename.
    pub filename: String,
    /// MIME type.
    pub mime_type: String,
    /// Object size in bytes.
    pub size: u64,
    /// Row classification.
    pub kind: AttachmentKind,
    /// `cid:` token for embedded images.
    pub content_id: Option<String>,
    /// Insertion time.
    pub create_time: DateTime<Utc>,
}

/// A row ready to be inserted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAttachment {
    /// Content-addressed object key.
    pub key: String,
    /// Owning parents.
    pub owner: Owner,
    /// Original filename.
    pub filename: String,
    /// MIME type.
    pub mime_type: String,
    /// Object size in bytes.
    pub size: u64,
    /// Row classification.
    pub kind: AttachmentKind,
    /// `cid:` token for embedded images.
    pub content_id: Option<String>,
}

/// File uploaded from the editor with its raw bytes.
#[derive(Debug, Clone)]
pub struct UploadedAttachment {
    /// Owning parents.
    pub owner: Owner,
    /// Original filename.
    pub filename: String,
    /// MIME type.
    pub mime_type: String,
    /// File bytes.
    pub content: Bytes,
    /// Set when the upload is an inline image.
    pub content_id: Option<String>,
}

/// Attachment of an outgoing email, base64 encoded.
#[derive(Debug, Clone)]
pub struct OutgoingAttachment {
    /// Original filename.
    pub filename: String,
    /// MIME type.
    pub mime_type: String,
    /// Base64 payload, optionally wrapped in a `data:` URI.
    pub content: String,
}

/// Image taken out of an HTML body.
///
/// Inline images carry their bytes. References to images already in the store
/// carry none and alias the key of an existing row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddedImage {
    /// Content-addressed object key.
    pub key: String,
    /// Filename, synthesized for inline images.
    pub filename: String,
    /// MIME type.
    pub mime_type: String,
    /// Object size in bytes.
    pub size: u64,
    /// Token the rewritten `src` points at.
    pub content_id: String,
    /// Image bytes, `None` for references.
    pub content: Option<Bytes>,
}

impl EmbeddedImage {
    /// Whether the image points at an already stored object.
    #[must_use]
    pub fn is_reference(&self) -> bool {
        self.content.is_none()
    }
}

/// One ingestion batch, tagged by entry point.
#[derive(Debug, Clone)]
pub enum IngestRequest {
    /// Editor uploads.
    Upload(Vec<UploadedAttachment>),
    /// Attachments of an outgoing email.
    Outgoing {
        /// Owning parents.
        owner: Owner,
        /// Base64 encoded files.
        attachments: Vec<OutgoingAttachment>,
    },
    /// Images extracted from an email body.
    Article {
        /// Owning parents.
        owner: Owner,
        /// Extractor output.
        images: Vec<EmbeddedImage>,
    },
}

/// Result of deleting one row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// Row and object are gone.
    Deleted,
    /// Row is gone, object kept for other rows.
    Retained,
    /// Row was already gone.
    Missing,
    /// Row is gone, object deletion failed.
    Orphaned,
    /// Object store not configured, nothing done.
    Skipped,
    /// Catalog deletion failed, nothing done.
    Failed,
}

impl DeleteOutcome {
    /// Whether the catalog row is gone, so its bytes no longer count toward
    /// the aggregate size. An orphaned object still counts as freed.
    #[must_use]
    pub fn frees_quota(&self) -> bool {
        matches!(self, Self::Deleted | Self::Retained | Self::Orphaned)
    }
}

/// Summary of one quota enforcement pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QuotaReport {
    /// Ceiling read from settings.
    pub ceiling: u64,
    /// Aggregate size before the pass.
    pub current: u64,
    /// Incoming bytes hint.
    pub incoming: u64,
    /// Bytes that had to be freed.
    pub deficit: u64,
    /// Bytes whose catalog rows were removed.
    pub freed: u64,
    /// Rows removed from the catalog.
    pub evicted: usize,
    /// Evicted rows whose object could not be deleted.
    pub orphaned: usize,
    /// Rows the catalog could not delete.
    pub failed: usize,
    /// Rows passed over because the incoming batch references their key.
    pub protected: usize,
    /// The walk ran out of rows before covering the deficit.
    pub exhausted: bool,
    /// Eviction skipped because the object store is not configured.
    pub skipped: bool,
}

impl QuotaReport {
    /// Whether the pass brought the aggregate under the ceiling.
    #[must_use]
    pub fn satisfied(&self) -> bool {
        self.freed >= self.deficit
    }
}

/// Summary of one expiration sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Rows created before this instant were selected. `None` when the sweep
    /// is disabled.
    pub cutoff: Option<DateTime<Utc>>,
    /// Rows selected.
    pub examined: usize,
    /// Rows and objects deleted.
    pub deleted: usize,
    /// Rows deleted, objects kept.
    pub retained: usize,
    /// Rows already gone.
    pub missing: usize,
    /// Rows deleted, objects left behind.
    pub orphaned: usize,
    /// Rows skipped, object store not configured.
    pub skipped: usize,
    /// Rows whose catalog deletion failed.
    pub failed: usize,
}

impl SweepReport {
    /// Count one outcome.
    pub fn record(&mut self, outcome: DeleteOutcome) {
        self.examined += 1;
        match outcome {
            DeleteOutcome::Deleted => self.deleted += 1,
            DeleteOutcome::Retained => self.retained += 1,
            DeleteOutcome::Missing => self.missing += 1,
            DeleteOutcome::Orphaned => self.orphaned += 1,
            DeleteOutcome::Skipped => self.skipped += 1,
            DeleteOutcome::Failed => self.failed += 1,
        }
    }
}

/// What the catalog reports after a bulk removal transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldRemoval {
    /// Rows deleted.
    pub rows_deleted: u64,
    /// Distinct keys no surviving row references.
    pub unreferenced_keys: Vec<String>,
}

/// Summary of a bulk removal.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkRemoval {
    /// Rows deleted.
    pub rows_deleted: u64,
    /// Objects deleted.
    pub objects_deleted: usize,
    /// Objects whose deletion failed or was skipped.
    pub objects_failed: usize,
}

/// Output of the pure HTML pass.
#[derive(Debug, Clone, Default)]
pub struct ExtractedHtml {
    /// Rewritten document.
    pub html: String,
    /// Images in document order.
    pub images: Vec<ExtractedImage>,
}

/// Image found by the pure HTML pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractedImage {
    /// Decoded `data:` image.
    Inline(EmbeddedImage),
    /// Image served from the public object domain, not yet resolved.
    Reference {
        /// Object key taken from the URL path.
        key: String,
        /// Token the rewritten `src` points at.
        content_id: String,
    },
}

/// HTML body ready to be sent, with the images to ingest.
#[derive(Debug, Clone, Default)]
pub struct PreparedHtml {
    /// Rewritten document.
    pub html: String,
    /// Inline images and resolved references, in document order.
    pub images: Vec<EmbeddedImage>,
}
