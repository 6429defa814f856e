//! Build a [`StorageManager`] from [`Settings`].

use kompass_types::{BackendConfig, BackendKind, Settings};
use secrecy::SecretString;
use std::sync::Arc;
use tracing::{info, warn};

use crate::backend::{
    BackendAdapter, DocumentStoreBackend, DocumentStoreSettings, LocalBackend, ObjectStoreBackend,
    ObjectStoreSettings,
};
use crate::error::StorageError;
use crate::manager::StorageManager;
use crate::retry::RetryPolicy;

/// Construct every enabled backend and connect the manager.
///
/// Credentials are read from the environment variables named in the
/// settings, never from the settings themselves.
pub async fn build_manager(settings: &Settings) -> Result<StorageManager, StorageError> {
    build_manager_with(settings, |name| std::env::var(name).ok()).await
}

/// Like [`build_manager`], resolving credential variables with `lookup`.
pub async fn build_manager_with<F>(
    settings: &Settings,
    lookup: F,
) -> Result<StorageManager, StorageError>
where
    F: Fn(&str) -> Option<String>,
{
    settings.validate()?;
    let limits = settings.limits();
    let timeout = settings.backend_timeout();

    let mut candidates: Vec<Arc<dyn BackendAdapter>> = Vec::new();
    for (priority, kind) in settings.enabled_backends()?.into_iter().enumerate() {
        let config = BackendConfig::new(kind, priority as u32, limits.clone());
        let backend: Arc<dyn BackendAdapter> = match kind {
            BackendKind::Local => Arc::new(LocalBackend::open(
                settings.expanded_data_directory(),
                config,
            )?),
            BackendKind::Object => Arc::new(ObjectStoreBackend::new(
                ObjectStoreSettings {
                    endpoint: settings.object_store_endpoint.clone(),
                    bucket: settings.object_store_bucket.clone().unwrap_or_default(),
                    token: resolve_token(&lookup, &settings.object_store_token_env),
                    timeout,
                },
                config,
            )?),
            BackendKind::Document => Arc::new(DocumentStoreBackend::new(
                DocumentStoreSettings {
                    endpoint: settings.document_store_endpoint.clone(),
                    project_id: settings.document_store_project_id.clone().unwrap_or_default(),
                    token: resolve_token(&lookup, &settings.document_store_token_env),
                    timeout,
                },
                config,
            )?),
        };
        info!(backend = %kind, priority, "Configured backend");
        candidates.push(backend);
    }

    if candidates.is_empty() {
        return Err(StorageError::Config("no storage backend is enabled".into()));
    }

    let retry = RetryPolicy {
        max_retries: settings.backend_retry_attempts,
        initial_interval: settings.retry_initial_interval(),
        ..Default::default()
    };
    StorageManager::connect(candidates, retry).await
}

fn resolve_token<F>(lookup: &F, var: &str) -> Option<SecretString>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(var).filter(|v| !v.is_empty()) {
        Some(token) => Some(SecretString::from(token)),
        None => {
            warn!(env = var, "Credential variable not set; requests will be unauthenticated");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn local_settings(dir: &TempDir) -> Settings {
        Settings {
            data_directory: dir.path().to_string_lossy().into_owned(),
            object_store_enabled: false,
            document_store_enabled: false,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_local_only() {
        let dir = TempDir::new().unwrap();
        let manager = build_manager_with(&local_settings(&dir), |_| None)
            .await
            .unwrap();
        assert_eq!(manager.storage_info().active, BackendKind::Local);
        assert!(dir.path().join("routes").is_dir());
    }

    #[tokio::test]
    async fn test_unreachable_object_store_falls_back_to_local() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let settings = Settings {
            object_store_enabled: true,
            object_store_bucket: Some("kompass-data".into()),
            object_store_endpoint: server.uri(),
            ..local_settings(&dir)
        };

        let manager = build_manager_with(&settings, |_| Some("token".into()))
            .await
            .unwrap();
        let info = manager.storage_info();
        assert_eq!(info.active, BackendKind::Local);
        assert_eq!(info.demoted, vec![BackendKind::Object]);
    }

    #[tokio::test]
    async fn test_nothing_enabled() {
        let dir = TempDir::new().unwrap();
        let settings = Settings {
            local_storage_enabled: false,
            ..local_settings(&dir)
        };
        let err = build_manager_with(&settings, |_| None).await.err().unwrap();
        assert!(matches!(err, StorageError::Config(_)));
    }
}
