//! Cloud object store backend (JSON API).
//!
//! Objects are named `users/{scope}/{category}/{key}` for user records and
//! `{category}/{key}` for global ones. Each upload carries a creation
//! stamp from the adapter's clock in its custom metadata; listings order
//! on that stamp and fall back to the store's `timeCreated` for objects
//! written without one.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kompass_types::{BackendConfig, Category, RecordMeta, Scope};
use reqwest::Client;
use secrecy::SecretString;
use serde::Deserialize;
use serde_json::json;
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;
use tracing::{debug, info};

use super::http::{authorize, build_client, check_status, endpoint_url};
use super::{
    check_record_size, micros_to_datetime, sort_oldest_first, BackendAdapter, CreationClock,
};
use crate::error::BackendError;

const USERS_PREFIX: &str = "users/";

/// Custom metadata key holding the creation stamp in microseconds.
const CREATED_AT_KEY: &str = "kompass_created_at";

/// Connection settings for an object store bucket.
#[derive(Debug, Clone)]
pub struct ObjectStoreSettings {
    /// Base URL, e.g. `https://storage.googleapis.com`
    pub endpoint: String,
    pub bucket: String,
    pub token: Option<SecretString>,
    pub timeout: Duration,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ObjectPage {
    #[serde(default)]
    items: Vec<ObjectItem>,
    #[serde(default)]
    prefixes: Vec<String>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ObjectItem {
    name: String,
    /// Decimal string in the JSON API
    size: String,
    time_created: DateTime<Utc>,
    #[serde(default)]
    metadata: HashMap<String, String>,
}

impl ObjectItem {
    fn created_at(&self) -> DateTime<Utc> {
        self.metadata
            .get(CREATED_AT_KEY)
            .and_then(|v| v.parse::<i64>().ok())
            .map(micros_to_datetime)
            .unwrap_or(self.time_created)
    }
}

#[derive(Debug, Default)]
struct Listing {
    items: Vec<ObjectItem>,
    prefixes: Vec<String>,
}

/// Backend storing each record as one object in a bucket.
#[derive(Debug)]
pub struct ObjectStoreBackend {
    client: Client,
    settings: ObjectStoreSettings,
    config: BackendConfig,
    clock: CreationClock,
}

impl ObjectStoreBackend {
    pub fn new(settings: ObjectStoreSettings, config: BackendConfig) -> Result<Self, BackendError> {
        let client = build_client(settings.timeout)?;
        info!(endpoint = %settings.endpoint, bucket = %settings.bucket, "Configured object store");
        Ok(Self {
            client,
            settings,
            config,
            clock: CreationClock::new(),
        })
    }

    fn object_name(scope: &Scope, category: Category, key: &str) -> String {
        format!("{}{}", Self::prefix(scope, category), key)
    }

    fn prefix(scope: &Scope, category: Category) -> String {
        match scope {
            Scope::Global => format!("{category}/"),
            Scope::User(id) => format!("{USERS_PREFIX}{id}/{category}/"),
        }
    }

    fn bucket_url(&self) -> Result<reqwest::Url, BackendError> {
        endpoint_url(
            &self.settings.endpoint,
            &["storage", "v1", "b", &self.settings.bucket],
        )
    }

    fn objects_url(&self) -> Result<reqwest::Url, BackendError> {
        endpoint_url(
            &self.settings.endpoint,
            &["storage", "v1", "b", &self.settings.bucket, "o"],
        )
    }

    fn object_url(&self, name: &str) -> Result<reqwest::Url, BackendError> {
        endpoint_url(
            &self.settings.endpoint,
            &["storage", "v1", "b", &self.settings.bucket, "o", name],
        )
    }

    fn upload_url(&self, name: &str) -> Result<reqwest::Url, BackendError> {
        let mut url = endpoint_url(
            &self.settings.endpoint,
            &["upload", "storage", "v1", "b", &self.settings.bucket, "o"],
        )?;
        url.query_pairs_mut()
            .append_pair("uploadType", "multipart")
            .append_pair("name", name);
        Ok(url)
    }

    /// Every object under `prefix`, following page tokens.
    async fn list_objects(
        &self,
        prefix: Option<&str>,
        delimiter: Option<&str>,
    ) -> Result<Listing, BackendError> {
        let mut listing = Listing::default();
        let mut page_token: Option<String> = None;

        loop {
            let mut url = self.objects_url()?;
            {
                let mut query = url.query_pairs_mut();
                if let Some(prefix) = prefix {
                    query.append_pair("prefix", prefix);
                }
                if let Some(delimiter) = delimiter {
                    query.append_pair("delimiter", delimiter);
                }
                if let Some(token) = &page_token {
                    query.append_pair("pageToken", token);
                }
            }

            let req = authorize(self.client.get(url), self.settings.token.as_ref());
            let resp = check_status(req.send().await?, "object listing").await?;
            let page: ObjectPage = resp.json().await?;

            listing.items.extend(page.items);
            listing.prefixes.extend(page.prefixes);

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => return Ok(listing),
            }
        }
    }

    fn to_meta(item: ObjectItem, key: &str) -> Result<RecordMeta, BackendError> {
        let size = item.size.parse::<u64>().map_err(|e| {
            BackendError::Serialization(format!("bad size for {}: {e}", item.name))
        })?;
        Ok(RecordMeta::new(key, item.created_at(), size))
    }
}

/// `multipart/related` upload body: object resource, then the media.
///
/// Returns the boundary alongside the body.
fn multipart_body(name: &str, created_at: DateTime<Utc>, bytes: &[u8]) -> (String, Vec<u8>) {
    let mut boundary = format!("kompass-{}", created_at.timestamp_micros());
    while bytes
        .windows(boundary.len())
        .any(|w| w == boundary.as_bytes())
    {
        boundary.push('x');
    }

    let resource = json!({
        "name": name,
        "contentType": "application/json",
        "metadata": { CREATED_AT_KEY: created_at.timestamp_micros().to_string() },
    });

    let mut body = Vec::with_capacity(bytes.len() + 512);
    body.extend_from_slice(
        format!("--{boundary}\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n{resource}\r\n")
            .as_bytes(),
    );
    body.extend_from_slice(
        format!("--{boundary}\r\nContent-Type: application/json\r\n\r\n").as_bytes(),
    );
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
    (boundary, body)
}

#[async_trait]
impl BackendAdapter for ObjectStoreBackend {
    fn config(&self) -> &BackendConfig {
        &self.config
    }

    async fn health_check(&self) -> Result<(), BackendError> {
        let req = authorize(self.client.get(self.bucket_url()?), self.settings.token.as_ref());
        check_status(req.send().await?, &self.settings.bucket).await?;
        Ok(())
    }

    async fn put(
        &self,
        scope: &Scope,
        category: Category,
        key: &str,
        bytes: &[u8],
    ) -> Result<(), BackendError> {
        check_record_size(&self.config, bytes.len())?;
        let name = Self::object_name(scope, category, key);
        let created_at = self.clock.next();
        let (boundary, body) = multipart_body(&name, created_at, bytes);
        let req = self
            .client
            .post(self.upload_url(&name)?)
            .header(
                reqwest::header::CONTENT_TYPE,
                format!("multipart/related; boundary={boundary}"),
            )
            .body(body);
        let req = authorize(req, self.settings.token.as_ref());
        check_status(req.send().await?, &name).await?;
        debug!(object = %name, size = bytes.len(), "Uploaded object");
        Ok(())
    }

    async fn get(
        &self,
        scope: &Scope,
        category: Category,
        key: &str,
    ) -> Result<Vec<u8>, BackendError> {
        let name = Self::object_name(scope, category, key);
        let mut url = self.object_url(&name)?;
        url.query_pairs_mut().append_pair("alt", "media");
        let req = authorize(self.client.get(url), self.settings.token.as_ref());
        let resp = check_status(req.send().await?, &name).await?;
        Ok(resp.bytes().await?.to_vec())
    }

    async fn list(
        &self,
        scope: &Scope,
        category: Category,
    ) -> Result<Vec<RecordMeta>, BackendError> {
        let prefix = Self::prefix(scope, category);
        let listing = self.list_objects(Some(&prefix), Some("/")).await?;

        let mut records = Vec::with_capacity(listing.items.len());
        for item in listing.items {
            let key = match item.name.strip_prefix(&prefix) {
                Some(key) if !key.is_empty() && !key.contains('/') => key.to_string(),
                _ => continue,
            };
            let meta = Self::to_meta(item, &key)?;
            self.clock.observe(meta.created_at);
            records.push(meta);
        }
        sort_oldest_first(&mut records);
        Ok(records)
    }

    async fn delete(
        &self,
        scope: &Scope,
        category: Category,
        key: &str,
    ) -> Result<(), BackendError> {
        let name = Self::object_name(scope, category, key);
        let req = authorize(
            self.client.delete(self.object_url(&name)?),
            self.settings.token.as_ref(),
        );
        match check_status(req.send().await?, &name).await {
            Ok(_) => Ok(()),
            Err(BackendError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn list_scopes(&self) -> Result<Vec<Scope>, BackendError> {
        let mut scopes = BTreeSet::new();

        let users = self.list_objects(Some(USERS_PREFIX), Some("/")).await?;
        for prefix in users.prefixes {
            let id = prefix
                .trim_start_matches(USERS_PREFIX)
                .trim_end_matches('/');
            if let Ok(scope) = Scope::user(id) {
                scopes.insert(scope);
            }
        }

        for category in super::categories_for(&Scope::Global) {
            let prefix = Self::prefix(&Scope::Global, category);
            let listing = self.list_objects(Some(&prefix), Some("/")).await?;
            if !listing.items.is_empty() {
                scopes.insert(Scope::Global);
                break;
            }
        }

        Ok(scopes.into_iter().collect())
    }

    async fn usage(&self, scope: &Scope) -> Result<u64, BackendError> {
        let mut total = 0;
        match scope {
            Scope::User(id) => {
                let prefix = format!("{USERS_PREFIX}{id}/");
                for item in self.list_objects(Some(&prefix), None).await?.items {
                    total += Self::to_meta(item, "")?.size_bytes;
                }
            }
            Scope::Global => {
                for category in super::categories_for(scope) {
                    total += self
                        .list(scope, category)
                        .await?
                        .iter()
                        .map(|r| r.size_bytes)
                        .sum::<u64>();
                }
            }
        }
        Ok(total)
    }

    async fn usage_total(&self) -> Result<u64, BackendError> {
        let mut total = 0;
        for item in self.list_objects(None, None).await?.items {
            total += Self::to_meta(item, "")?.size_bytes;
        }
        Ok(total)
    }
}
