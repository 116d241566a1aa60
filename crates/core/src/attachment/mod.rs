//! Attachment lifecycle.
//!
//! This module provides business logic for email attachments including:
//! - Content-addressed keys
//! - Embedded image extraction from HTML bodies
//! - Ingestion with quota enforcement
//! - Expiration sweeps
//! - Reference-counted deletion

mod error;
pub mod html;
pub mod key;
mod service;
mod settings;
mod types;

pub use error::AttachmentError;
pub use html::rewrite_embedded_images;
pub use key::derive_key;
pub use service::{
    AttachmentRepository, AttachmentService, DELETE_BATCH_SIZE, EMBEDDED_CACHE_CONTROL,
};
pub use settings::SettingsProvider;
pub use types::{
    Attachment, AttachmentKind, BulkRemoval, DeleteOutcome, EmbeddedImage, ExtractedHtml,
    ExtractedImage, FieldRemoval, IngestRequest, NewAttachment, OutgoingAttachment, Owner,
    OwnerField, PreparedHtml, QuotaReport, SweepReport, UploadedAttachment,
};

#[cfg(test)]
mod mock;


#[cfg(test)]
mod service_props;
