//! # kompass-types
//!
//! Shared domain types for the KOMpass storage layer.
//!
//! This crate defines the vocabulary every other crate speaks:
//! - Records: `Scope`, `Category` and listing metadata (`RecordMeta`)
//! - Backends: `BackendKind`, `BackendConfig` and the byte ceilings in `QuotaLimits`
//! - Settings: layered configuration loaded once at process start
//!
//! ## Usage
//!
//! ```rust
//! use kompass_types::{Category, Scope};
//!
//! let scope = Scope::user("athlete-42").unwrap();
//! assert_eq!(scope.as_str(), "athlete-42");
//! assert!(Category::Fitness.is_pii_bearing());
//! ```

pub mod backend;
pub mod config;
pub mod error;
pub mod record;

pub use backend::{BackendConfig, BackendKind, QuotaLimits};
pub use config::Settings;
pub use error::KompassError;
pub use record::{validate_key, Category, RecordMeta, Scope};
