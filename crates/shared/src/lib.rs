//! Shared types and configuration for Postvault.
//!
//! This crate provides common types used across all other crates:
//! - Typed IDs for type-safe owner references
//! - Configuration management

pub mod config;
pub mod types;

pub use config::{AppConfig, AttachmentSettings, StorageProvider};
