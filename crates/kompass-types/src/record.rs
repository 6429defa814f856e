//! Record identity: scope, category and key.
//!
//! A record is addressed by the triple `(scope, category, key)`, which is
//! unique per backend. Scopes partition records by user; the literal
//! `global` scope holds shared data (models and training data only).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::KompassError;

/// Longest accepted scope or key, in bytes.
const MAX_SEGMENT_LEN: usize = 255;

/// Partition a record belongs to: one user, or the shared global space.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Scope {
    /// Shared records not owned by any user
    Global,
    /// Records owned by a single user
    User(String),
}

impl Scope {
    /// Literal used for the global scope in paths and configuration.
    pub const GLOBAL: &'static str = "global";

    /// Create a user scope, validating the identifier.
    pub fn user(id: impl Into<String>) -> Result<Self, KompassError> {
        let id = id.into();
        if id == Self::GLOBAL {
            return Err(KompassError::InvalidScope(format!(
                "'{}' is reserved for the global scope",
                Self::GLOBAL
            )));
        }
        check_segment(&id).map_err(KompassError::InvalidScope)?;
        Ok(Scope::User(id))
    }

    /// Parse a scope, mapping the literal `global` to [`Scope::Global`].
    pub fn parse(s: &str) -> Result<Self, KompassError> {
        if s == Self::GLOBAL {
            Ok(Scope::Global)
        } else {
            Self::user(s)
        }
    }

    pub fn is_global(&self) -> bool {
        matches!(self, Scope::Global)
    }

    /// String form used in paths and object names.
    pub fn as_str(&self) -> &str {
        match self {
            Scope::Global => Self::GLOBAL,
            Scope::User(id) => id,
        }
    }

    /// Check that this scope may hold records of `category`.
    ///
    /// Only models and training data live in the global scope.
    pub fn check_category(&self, category: Category) -> Result<(), KompassError> {
        if self.is_global() && !category.allows_global() {
            return Err(KompassError::InvalidScope(format!(
                "category '{}' cannot be stored in the global scope",
                category
            )));
        }
        Ok(())
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scope {
    type Err = KompassError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Scope::parse(s)
    }
}

impl TryFrom<String> for Scope {
    type Error = KompassError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Scope::parse(&s)
    }
}

impl From<Scope> for String {
    fn from(scope: Scope) -> Self {
        scope.as_str().to_string()
    }
}

/// Kind of data a record holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Routes,
    Fitness,
    Models,
    TrainingData,
}

impl Category {
    /// Every category, in the order cleanup visits them.
    pub const ALL: [Category; 4] = [
        Category::Routes,
        Category::Fitness,
        Category::Models,
        Category::TrainingData,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Routes => "routes",
            Category::Fitness => "fitness",
            Category::Models => "models",
            Category::TrainingData => "training_data",
        }
    }

    /// Whether records of this category must be scrubbed of PII before storage.
    pub fn is_pii_bearing(&self) -> bool {
        matches!(self, Category::Fitness)
    }

    /// Whether this category may be stored in the global scope.
    pub fn allows_global(&self) -> bool {
        matches!(self, Category::Models | Category::TrainingData)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = KompassError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "routes" => Ok(Category::Routes),
            "fitness" => Ok(Category::Fitness),
            "models" => Ok(Category::Models),
            "training_data" | "training-data" => Ok(Category::TrainingData),
            other => Err(KompassError::InvalidCategory(other.to_string())),
        }
    }
}

/// Listing entry for a stored record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordMeta {
    /// Filename-like key, unique within `(scope, category)`
    pub key: String,

    /// Assigned by the backend at write time
    pub created_at: DateTime<Utc>,

    /// Size of the serialized payload
    pub size_bytes: u64,
}

impl RecordMeta {
    pub fn new(key: impl Into<String>, created_at: DateTime<Utc>, size_bytes: u64) -> Self {
        Self {
            key: key.into(),
            created_at,
            size_bytes,
        }
    }
}

/// Validate a record key.
///
/// Keys become file and object names, so path separators, traversal
/// segments and hidden names are rejected.
pub fn validate_key(key: &str) -> Result<(), KompassError> {
    check_segment(key).map_err(KompassError::InvalidKey)
}

fn check_segment(s: &str) -> Result<(), String> {
    if s.is_empty() {
        return Err("must not be empty".to_string());
    }
    if s.len() > MAX_SEGMENT_LEN {
        return Err(format!("longer than {MAX_SEGMENT_LEN} bytes"));
    }
    if s.starts_with('.') {
        return Err(format!("'{s}' must not start with '.'"));
    }
    if s.chars().any(|c| c == '/' || c == '\\' || c.is_control()) {
        return Err(format!("'{s}' contains a path separator or control character"));
    }
    Ok(())
}
