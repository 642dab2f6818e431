//! External dependency loading.
//!
//! `external-dependencies` cells list resources one per line. The manager
//! loads each resource at most once per session; a second cell naming the
//! same resource gets the existing record back.

use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::host::Environment;

/// Prefix of comment lines in dependency lists.
const COMMENT_PREFIX: &str = "//";

/// Load status of an external resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DependencyStatus {
    Ok,
    Error,
}

impl fmt::Display for DependencyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => f.write_str("ok"),
            Self::Error => f.write_str("error"),
        }
    }
}

/// A loaded (or failed) external resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyRecord {
    pub src: String,
    pub status: DependencyStatus,
}

/// Loads one external resource into the execution environment.
pub trait DependencyLoader: Send + Sync {
    fn load<'a>(&'a self, src: &'a str) -> BoxFuture<'a, DependencyStatus>;
}

/// Loader that fetches resources over HTTP and stores their bodies in the
/// [`Environment`] resource table.
pub struct HttpDependencyLoader {
    client: reqwest::Client,
    environment: Arc<Environment>,
}

impl HttpDependencyLoader {
    pub fn new(environment: Arc<Environment>, user_agent: &str) -> Result<Self> {
        let client = reqwest::Client::builder().user_agent(user_agent).build()?;
        Ok(Self::with_client(client, environment))
    }

    pub fn with_client(client: reqwest::Client, environment: Arc<Environment>) -> Self {
        Self {
            client,
            environment,
        }
    }

    async fn fetch(&self, src: &str) -> std::result::Result<Vec<u8>, String> {
        let response = self
            .client
            .get(src)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        if !response.status().is_success() {
            return Err(format!("HTTP {}", response.status()));
        }
        let body = response.bytes().await.map_err(|e| e.to_string())?;
        Ok(body.to_vec())
    }
}

impl DependencyLoader for HttpDependencyLoader {
    fn load<'a>(&'a self, src: &'a str) -> BoxFuture<'a, DependencyStatus> {
        Box::pin(async move {
            match self.fetch(src).await {
                Ok(body) => {
                    tracing::debug!(src, bytes = body.len(), "external dependency loaded");
                    self.environment.store_resource(src, body);
                    DependencyStatus::Ok
                }
                Err(reason) => {
                    tracing::warn!(src, %reason, "external dependency failed to load");
                    DependencyStatus::Error
                }
            }
        })
    }
}

/// Result of [`DependencyManager::load`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadOutcome {
    pub record: DependencyRecord,
    /// False when the record already existed and no load was attempted.
    pub newly_loaded: bool,
}

/// Deduplicated registry of external resources.
pub struct DependencyManager {
    records: Vec<DependencyRecord>,
    loader: Arc<dyn DependencyLoader>,
}

impl DependencyManager {
    pub fn new(loader: Arc<dyn DependencyLoader>) -> Self {
        Self {
            records: Vec::new(),
            loader,
        }
    }

    /// Load `src` unless a record for it already exists.
    pub async fn load(&mut self, src: &str) -> LoadOutcome {
        if let Some(record) = self.get(src) {
            return LoadOutcome {
                record: record.clone(),
                newly_loaded: false,
            };
        }

        let status = self.loader.load(src).await;
        let record = DependencyRecord {
            src: src.to_string(),
            status,
        };
        self.records.push(record.clone());
        LoadOutcome {
            record,
            newly_loaded: true,
        }
    }

    pub fn get(&self, src: &str) -> Option<&DependencyRecord> {
        self.records.iter().find(|record| record.src == src)
    }

    pub fn contains(&self, src: &str) -> bool {
        self.get(src).is_some()
    }

    /// Records in load order.
    pub fn records(&self) -> &[DependencyRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }
}

/// Split dependency-cell content into resource identifiers, skipping blank
/// and `//` comment lines.
pub fn parse_dependency_list(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with(COMMENT_PREFIX))
        .map(str::to_string)
        .collect()
}
