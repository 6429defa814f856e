//! Cloud document store backend (REST API).
//!
//! Each record is one document at `users/{scope}/{category}/{key}` or
//! `{category}/{key}` for global records. A marker document at
//! `users/{scope}` makes user scopes enumerable, since the store does not
//! list collections that only hold subcollections.

use async_trait::async_trait;
use kompass_types::{BackendConfig, Category, RecordMeta, Scope};
use reqwest::{Client, Url};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;
use tracing::{debug, info};

use super::http::{authorize, build_client, check_status, endpoint_url};
use super::{check_record_size, micros_to_datetime, sort_oldest_first, BackendAdapter, CreationClock};
use crate::error::BackendError;

const USERS_COLLECTION: &str = "users";
const PAGE_SIZE: &str = "300";

/// Connection settings for a document store project.
#[derive(Debug, Clone)]
pub struct DocumentStoreSettings {
    /// Base URL, e.g. `https://firestore.googleapis.com`
    pub endpoint: String,
    pub project_id: String,
    pub token: Option<SecretString>,
    pub timeout: Duration,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FieldValue {
    #[serde(skip_serializing_if = "Option::is_none")]
    string_value: Option<String>,
    /// int64 values travel as decimal strings
    #[serde(skip_serializing_if = "Option::is_none")]
    integer_value: Option<String>,
}

impl FieldValue {
    fn string(s: impl Into<String>) -> Self {
        Self {
            string_value: Some(s.into()),
            ..Default::default()
        }
    }

    fn integer(n: i64) -> Self {
        Self {
            integer_value: Some(n.to_string()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Document {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    name: String,
    #[serde(default)]
    fields: HashMap<String, FieldValue>,
}

impl Document {
    fn string_field(&self, field: &str) -> Option<&str> {
        self.fields.get(field)?.string_value.as_deref()
    }

    fn integer_field(&self, field: &str) -> Result<i64, BackendError> {
        self.fields
            .get(field)
            .and_then(|v| v.integer_value.as_deref())
            .ok_or_else(|| {
                BackendError::Serialization(format!("{}: missing field '{field}'", self.name))
            })?
            .parse()
            .map_err(|e| BackendError::Serialization(format!("{}: bad '{field}': {e}", self.name)))
    }

    /// Last path segment of the document name.
    fn id(&self) -> &str {
        self.name.rsplit('/').next().unwrap_or_default()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DocumentPage {
    #[serde(default)]
    documents: Vec<Document>,
    next_page_token: Option<String>,
}

/// Backend storing each record as one document.
#[derive(Debug)]
pub struct DocumentStoreBackend {
    client: Client,
    settings: DocumentStoreSettings,
    config: BackendConfig,
    clock: CreationClock,
}

impl DocumentStoreBackend {
    pub fn new(
        settings: DocumentStoreSettings,
        config: BackendConfig,
    ) -> Result<Self, BackendError> {
        let client = build_client(settings.timeout)?;
        info!(endpoint = %settings.endpoint, project = %settings.project_id, "Configured document store");
        Ok(Self {
            client,
            settings,
            config,
            clock: CreationClock::new(),
        })
    }

    fn collection_path(scope: &Scope, category: Category) -> Vec<String> {
        match scope {
            Scope::Global => vec![category.to_string()],
            Scope::User(id) => vec![
                USERS_COLLECTION.to_string(),
                id.clone(),
                category.to_string(),
            ],
        }
    }

    fn document_path(scope: &Scope, category: Category, key: &str) -> Vec<String> {
        let mut path = Self::collection_path(scope, category);
        path.push(key.to_string());
        path
    }

    fn url(&self, path: &[String]) -> Result<Url, BackendError> {
        let mut segments = vec![
            "v1",
            "projects",
            self.settings.project_id.as_str(),
            "databases",
            "(default)",
            "documents",
        ];
        segments.extend(path.iter().map(String::as_str));
        endpoint_url(&self.settings.endpoint, &segments)
    }

    async fn patch(&self, path: &[String], doc: &Document) -> Result<(), BackendError> {
        let req = authorize(
            self.client.patch(self.url(path)?).json(doc),
            self.settings.token.as_ref(),
        );
        check_status(req.send().await?, &path.join("/")).await?;
        Ok(())
    }

    /// Every document in a collection, following page tokens.
    async fn list_documents(
        &self,
        collection: &[String],
        page_size: &str,
        first_page_only: bool,
    ) -> Result<Vec<Document>, BackendError> {
        let mut documents = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut url = self.url(collection)?;
            {
                let mut query = url.query_pairs_mut();
                query.append_pair("pageSize", page_size);
                if let Some(token) = &page_token {
                    query.append_pair("pageToken", token);
                }
            }
            let req = authorize(self.client.get(url), self.settings.token.as_ref());
            let resp = check_status(req.send().await?, &collection.join("/")).await;
            let page: DocumentPage = match resp {
                Ok(resp) => resp.json().await?,
                // Collections that were never written do not exist
                Err(BackendError::NotFound(_)) => return Ok(documents),
                Err(e) => return Err(e),
            };
            documents.extend(page.documents);

            match page.next_page_token {
                Some(token) if !token.is_empty() && !first_page_only => page_token = Some(token),
                _ => return Ok(documents),
            }
        }
    }

    fn to_meta(doc: &Document) -> Result<RecordMeta, BackendError> {
        let key = doc.string_field("key").unwrap_or_else(|| doc.id()).to_string();
        let size = doc.integer_field("size_bytes")?;
        let created_at = micros_to_datetime(doc.integer_field("created_at")?);
        Ok(RecordMeta::new(key, created_at, size.max(0) as u64))
    }
}

#[async_trait]
impl BackendAdapter for DocumentStoreBackend {
    fn config(&self) -> &BackendConfig {
        &self.config
    }

    async fn health_check(&self) -> Result<(), BackendError> {
        self.list_documents(&[USERS_COLLECTION.to_string()], "1", true)
            .await
            .map(|_| ())
    }

    async fn put(
        &self,
        scope: &Scope,
        category: Category,
        key: &str,
        bytes: &[u8],
    ) -> Result<(), BackendError> {
        check_record_size(&self.config, bytes.len())?;
        let payload = std::str::from_utf8(bytes)
            .map_err(|e| BackendError::Serialization(format!("payload is not UTF-8: {e}")))?;

        if let Scope::User(id) = scope {
            let marker = Document {
                fields: HashMap::from([("scope".to_string(), FieldValue::string(id.clone()))]),
                ..Default::default()
            };
            self.patch(&[USERS_COLLECTION.to_string(), id.clone()], &marker)
                .await?;
        }

        let created_at = self.clock.next();
        let doc = Document {
            fields: HashMap::from([
                ("key".to_string(), FieldValue::string(key)),
                ("payload".to_string(), FieldValue::string(payload)),
                ("size_bytes".to_string(), FieldValue::integer(bytes.len() as i64)),
                (
                    "created_at".to_string(),
                    FieldValue::integer(created_at.timestamp_micros()),
                ),
            ]),
            ..Default::default()
        };
        let path = Self::document_path(scope, category, key);
        self.patch(&path, &doc).await?;
        debug!(document = %path.join("/"), size = bytes.len(), "Wrote document");
        Ok(())
    }

    async fn get(
        &self,
        scope: &Scope,
        category: Category,
        key: &str,
    ) -> Result<Vec<u8>, BackendError> {
        let path = Self::document_path(scope, category, key);
        let req = authorize(self.client.get(self.url(&path)?), self.settings.token.as_ref());
        let resp = check_status(req.send().await?, &path.join("/")).await?;
        let doc: Document = resp.json().await?;
        doc.string_field("payload")
            .map(|p| p.as_bytes().to_vec())
            .ok_or_else(|| BackendError::Serialization(format!("{}: missing payload", doc.name)))
    }

    async fn list(
        &self,
        scope: &Scope,
        category: Category,
    ) -> Result<Vec<RecordMeta>, BackendError> {
        let collection = Self::collection_path(scope, category);
        let documents = self.list_documents(&collection, PAGE_SIZE, false).await?;
        let mut records = documents
            .iter()
            .map(Self::to_meta)
            .collect::<Result<Vec<_>, _>>()?;
        sort_oldest_first(&mut records);
        Ok(records)
    }

    async fn delete(
        &self,
        scope: &Scope,
        category: Category,
        key: &str,
    ) -> Result<(), BackendError> {
        let path = Self::document_path(scope, category, key);
        let req = authorize(self.client.delete(self.url(&path)?), self.settings.token.as_ref());
        match check_status(req.send().await?, &path.join("/")).await {
            Ok(_) | Err(BackendError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn list_scopes(&self) -> Result<Vec<Scope>, BackendError> {
        let mut scopes = BTreeSet::new();
        let markers = self
            .list_documents(&[USERS_COLLECTION.to_string()], PAGE_SIZE, false)
            .await?;
        for marker in &markers {
            if let Ok(scope) = Scope::user(marker.id()) {
                scopes.insert(scope);
            }
        }

        for category in super::categories_for(&Scope::Global) {
            let collection = Self::collection_path(&Scope::Global, category);
            if !self.list_documents(&collection, "1", true).await?.is_empty() {
                scopes.insert(Scope::Global);
                break;
            }
        }
        Ok(scopes.into_iter().collect())
    }
}
