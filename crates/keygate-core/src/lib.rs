//! # Keygate Core
//!
//! Core types and configuration for Keygate.
//!
//! This crate provides:
//! - The permission and role catalog, audited at startup
//! - The bit-group permission set carried in token claims
//! - Configuration loading and validation (JSON5 format)

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod bitgroup;
pub mod catalog;
pub mod config;

pub use bitgroup::{CodecError, PermissionId, PermissionSet};
pub use catalog::{AuditIssue, CatalogError, Permission, PermissionCatalog, Role, perm};
pub use config::{CacheBackend, CacheConfig, Config, ConfigError, FailPolicy};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::bitgroup::{PermissionId, PermissionSet};
    pub use crate::catalog::{PermissionCatalog, perm};
    pub use crate::config::Config;
}
