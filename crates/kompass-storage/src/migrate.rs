//! Verified, resumable migration between backends.
//!
//! A record is copied, read back from the destination and compared byte
//! for byte; only a confirmed copy is deleted from the source. Records
//! already present and identical on the destination are skipped, so a
//! re-run after a partial failure only touches what is still pending.
//! Failures are collected in the report and never abort the batch.

use kompass_types::{Category, Scope};
use serde::Serialize;
use tracing::{info, warn};

use crate::backend::{categories_for, BackendAdapter};
use crate::error::BackendError;

/// A record (or listing) that could not be migrated.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MigrationFailure {
    pub scope: Scope,
    pub category: Category,
    /// `None` when the whole category listing failed
    pub key: Option<String>,
    pub reason: String,
}

/// Outcome of a migration run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MigrationReport {
    /// Records found on the source
    pub scanned: usize,
    /// Records copied, verified and removed from the source
    pub migrated: usize,
    /// Records already identical on the destination
    pub skipped: usize,
    pub bytes_migrated: u64,
    pub failures: Vec<MigrationFailure>,
    /// Set when the run could not start at all
    pub aborted: Option<String>,
}

impl MigrationReport {
    pub fn aborted(reason: impl Into<String>) -> Self {
        Self {
            aborted: Some(reason.into()),
            ..Default::default()
        }
    }

    /// No failures and not aborted.
    pub fn is_success(&self) -> bool {
        self.aborted.is_none() && self.failures.is_empty()
    }
}

enum Outcome {
    Migrated(u64),
    Skipped,
}

/// Moves records from one backend to another.
pub struct Migrator<'a> {
    source: &'a dyn BackendAdapter,
    dest: &'a dyn BackendAdapter,
}

impl<'a> Migrator<'a> {
    pub fn new(source: &'a dyn BackendAdapter, dest: &'a dyn BackendAdapter) -> Self {
        Self { source, dest }
    }

    /// Migrate one scope, or every scope on the source when `scope` is `None`.
    pub async fn migrate(&self, scope: Option<&Scope>) -> MigrationReport {
        let source_kind = self.source.kind();
        let dest_kind = self.dest.kind();
        if source_kind == dest_kind {
            return MigrationReport::aborted(format!(
                "source and destination are both {source_kind}"
            ));
        }

        let scopes = match scope {
            Some(scope) => vec![scope.clone()],
            None => match self.source.list_scopes().await {
                Ok(scopes) => scopes,
                Err(e) => {
                    warn!(source = %source_kind, error = %e, "Could not enumerate scopes");
                    return MigrationReport::aborted(format!("listing scopes failed: {e}"));
                }
            },
        };

        info!(source = %source_kind, dest = %dest_kind, scopes = scopes.len(), "Starting migration");
        let mut report = MigrationReport::default();

        for scope in &scopes {
            for category in categories_for(scope) {
                self.migrate_category(scope, category, &mut report).await;
            }
        }

        info!(
            source = %source_kind,
            dest = %dest_kind,
            scanned = report.scanned,
            migrated = report.migrated,
            skipped = report.skipped,
            failed = report.failures.len(),
            "Migration complete"
        );
        report
    }

    async fn migrate_category(&self, scope: &Scope, category: Category, report: &mut MigrationReport) {
        let records = match self.source.list(scope, category).await {
            Ok(records) => records,
            Err(e) => {
                warn!(scope = %scope, category = %category, error = %e, "Source listing failed");
                report.failures.push(MigrationFailure {
                    scope: scope.clone(),
                    category,
                    key: None,
                    reason: e.to_string(),
                });
                return;
            }
        };

        for record in records {
            report.scanned += 1;
            match self.migrate_record(scope, category, &record.key).await {
                Ok(Outcome::Migrated(bytes)) => {
                    report.migrated += 1;
                    report.bytes_migrated += bytes;
                }
                Ok(Outcome::Skipped) => report.skipped += 1,
                Err(e) => {
                    warn!(scope = %scope, category = %category, key = %record.key, error = %e, "Record migration failed");
                    report.failures.push(MigrationFailure {
                        scope: scope.clone(),
                        category,
                        key: Some(record.key),
                        reason: e.to_string(),
                    });
                }
            }
        }
    }

    async fn migrate_record(
        &self,
        scope: &Scope,
        category: Category,
        key: &str,
    ) -> Result<Outcome, BackendError> {
        let bytes = self.source.get(scope, category, key).await?;

        match self.dest.get(scope, category, key).await {
            Ok(existing) if existing == bytes => {
                // Confirmed by an earlier run that stopped before the delete
                self.source.delete(scope, category, key).await?;
                return Ok(Outcome::Skipped);
            }
            Ok(_) | Err(BackendError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }

        self.dest.put(scope, category, key, &bytes).await?;
        let echoed = self.dest.get(scope, category, key).await?;
        if echoed != bytes {
            return Err(BackendError::Serialization(format!(
                "read-back of {scope}/{category}/{key} differs from source"
            )));
        }

        self.source.delete(scope, category, key).await?;
        Ok(Outcome::Migrated(bytes.len() as u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MemoryBackend, Operation};
    use kompass_types::{BackendConfig, BackendKind, QuotaLimits};

    fn memory(kind: BackendKind) -> MemoryBackend {
        MemoryBackend::new(BackendConfig::new(kind, 0, QuotaLimits::default()))
    }

    #[tokio::test]
    async fn test_moves_records_and_empties_source() {
        let source = memory(BackendKind::Local);
        let dest = memory(BackendKind::Object);
        let u1 = Scope::user("u1").unwrap();
        source.put(&u1, Category::Routes, "a.json", b"{\"a\":1}").await.unwrap();
        source.put(&Scope::Global, Category::Models, "m.json", b"[]").await.unwrap();

        let report = Migrator::new(&source, &dest).migrate(None).await;
        assert!(report.is_success());
        assert_eq!(report.migrated, 2);
        assert!(source.is_empty());
        assert_eq!(
            dest.get(&u1, Category::Routes, "a.json").await.unwrap(),
            b"{\"a\":1}"
        );
    }

    #[tokio::test]
    async fn test_identical_destination_record_is_skipped() {
        let source = memory(BackendKind::Local);
        let dest = memory(BackendKind::Object);
        let u1 = Scope::user("u1").unwrap();
        source.put(&u1, Category::Routes, "a.json", b"{}").await.unwrap();
        dest.put(&u1, Category::Routes, "a.json", b"{}").await.unwrap();

        let report = Migrator::new(&source, &dest).migrate(Some(&u1)).await;
        assert_eq!(report.skipped, 1);
        assert_eq!(report.migrated, 0);
        assert_eq!(dest.write_count(), 1);
    }

    #[tokio::test]
    async fn test_failure_is_recorded_and_batch_continues() {
        let source = memory(BackendKind::Local);
        let dest = memory(BackendKind::Document);
        let u1 = Scope::user("u1").unwrap();
        source.put(&u1, Category::Routes, "a.json", b"{}").await.unwrap();
        source.put(&u1, Category::Routes, "b.json", b"[]").await.unwrap();
        dest.fail_next(Operation::Put, 1);

        let report = Migrator::new(&source, &dest).migrate(Some(&u1)).await;
        assert_eq!(report.scanned, 2);
        assert_eq!(report.migrated, 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].key.as_deref(), Some("a.json"));
        // The failed record stays on the source for the next run
        assert_eq!(source.len(), 1);
    }

    #[tokio::test]
    async fn test_same_backend_kind_aborts() {
        let a = memory(BackendKind::Local);
        let b = memory(BackendKind::Local);
        let report = Migrator::new(&a, &b).migrate(None).await;
        assert!(report.aborted.is_some());
    }
}
