//! Attachment lifecycle logic for Postvault.
//!
//! This crate holds the parts of the webmail backend that treat the catalog
//! and the object store as one logical resource. It has no database
//! dependency: the catalog is reached through
//! [`attachment::AttachmentRepository`], implemented by `postvault-db`.
//!
//! # Modules
//!
//! - `storage` - Object store access through Apache OpenDAL
//! - `attachment` - Key derivation, embedded image extraction, ingestion,
//!   quota enforcement, expiration and safe deletion

pub mod attachment;
pub mod storage;
