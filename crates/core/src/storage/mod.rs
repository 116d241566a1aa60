//! Object store access using Apache OpenDAL.
//!
//! Objects are immutable, content-addressed blobs: they are written once and
//! later deleted, never modified in place. Supported backends:
//! - S3-compatible: Cloudflare R2, Supabase Storage, AWS S3, DigitalOcean Spaces
//! - Azure Blob Storage
//! - Local filesystem (development only)
//! - Memory (tests)
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      Apache OpenDAL                              │
//! │                   (Unified Storage API)                          │
//! ├─────────────────────────────────────────────────────────────────┤
//! │ op.write_with("key", data) │ op.delete("key")                   │
//! │ op.stat("key") (exists)    │ op.delete_iter(keys)               │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

mod error;
mod service;

pub use error::StorageError;
pub use postvault_shared::StorageProvider;
pub use service::{ObjectMetadata, ObjectStore, StorageService};
