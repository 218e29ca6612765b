//! Dapp session records
//!
//! One small record per approved session, keyed by session topic, for the wallet UI
//! to show which dapp is connected.

use crate::types::DappSessionRecord;
use crate::{Error, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn put(&self, topic: &str, record: &DappSessionRecord) -> Result<()>;

    async fn get(&self, topic: &str) -> Result<Option<DappSessionRecord>>;

    async fn remove(&self, topic: &str) -> Result<()>;
}

/// Records that live as long as the process
#[derive(Debug, Default, Clone)]
pub struct MemorySessionStore {
    records: Arc<RwLock<HashMap<String, DappSessionRecord>>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn put(&self, topic: &str, record: &DappSessionRecord) -> Result<()> {
        self.records
            .write()
            .await
            .insert(topic.to_string(), record.clone());
        Ok(())
    }

    async fn get(&self, topic: &str) -> Result<Option<DappSessionRecord>> {
        Ok(self.records.read().await.get(topic).cloned())
    }

    async fn remove(&self, topic: &str) -> Result<()> {
        self.records.write().await.remove(topic);
        Ok(())
    }
}

/// Records kept in a JSON object file, rewritten on every change
pub struct FileSessionStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileSessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<HashMap<String, DappSessionRecord>> {
        if !self.path.exists() {
            return Ok(HashMap::new());
        }
        let content = tokio::fs::read_to_string(&self.path).await?;
        if content.trim().is_empty() {
            return Ok(HashMap::new());
        }
        serde_json::from_str(&content).map_err(|e| {
            Error::Store(format!(
                "corrupt session store {}: {}",
                self.path.display(),
                e
            ))
        })
    }

    async fn save(&self, records: &HashMap<String, DappSessionRecord>) -> Result<()> {
        let json = serde_json::to_string_pretty(records)?;
        tokio::fs::write(&self.path, json).await?;
        Ok(())
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn put(&self, topic: &str, record: &DappSessionRecord) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut records = self.load().await?;
        records.insert(topic.to_string(), record.clone());
        self.save(&records).await
    }

    async fn get(&self, topic: &str) -> Result<Option<DappSessionRecord>> {
        let _guard = self.lock.lock().await;
        Ok(self.load().await?.remove(topic))
    }

    async fn remove(&self, topic: &str) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut records = self.load().await?;
        if records.remove(topic).is_some() {
            self.save(&records).await?;
        }
        Ok(())
    }
}
