//! Record store: the external collaborator that supplies problem records.

use crate::error::{AnalyticsError, Result};
use crate::schemas::{ProblemDocument, ProblemRecord};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tokio::sync::{Mutex, RwLock};

#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn list(&self) -> Result<Vec<ProblemRecord>>;
    async fn get(&self, id: &str) -> Result<ProblemRecord>;
    /// Insert a record, assigning an id and timestamps where absent.
    async fn create(&self, record: ProblemRecord) -> Result<ProblemRecord>;
    /// Shallow-merge `patch` into the stored record and refresh `updated_at`.
    async fn update(&self, id: &str, patch: Value) -> Result<ProblemRecord>;
    /// Returns whether a record was removed.
    async fn delete(&self, id: &str) -> Result<bool>;
    /// Insert a copy of an exported record under a fresh id.
    async fn import(&self, record: ProblemRecord) -> Result<ProblemRecord>;
}

fn now_iso() -> String {
    Utc::now().to_rfc3339()
}

fn not_found(id: &str) -> AnalyticsError {
    AnalyticsError::NotFound {
        message: format!("Problem {} not found", id),
    }
}

fn stamp_new(mut record: ProblemRecord) -> ProblemRecord {
    if record.id.trim().is_empty() {
        record.id = uuid::Uuid::new_v4().to_string();
    }
    let now = now_iso();
    if record.created_at.is_none() {
        record.created_at = Some(now.clone());
    }
    if record.updated_at.is_none() {
        record.updated_at = Some(now);
    }
    record
}

fn stamp_import(mut record: ProblemRecord) -> ProblemRecord {
    let now = now_iso();
    record.id = uuid::Uuid::new_v4().to_string();
    record.created_at = Some(now.clone());
    record.updated_at = Some(now);
    record
}

fn apply_patch(existing: &ProblemRecord, patch: Value) -> Result<ProblemRecord> {
    let Value::Object(fields) = patch else {
        return Err(AnalyticsError::InvalidParams {
            message: "update body must be a JSON object".into(),
        });
    };
    let mut merged = serde_json::to_value(existing)?;
    if let Value::Object(target) = &mut merged {
        for (key, value) in fields {
            if key != "id" {
                target.insert(key, value);
            }
        }
    }
    let mut record: ProblemRecord = serde_json::from_value(merged)?;
    record.id = existing.id.clone();
    record.updated_at = Some(now_iso());
    Ok(record)
}

/// Flat JSON file holding `{"problems": [...]}`. Writes go through a temp
/// file and rename; a missing file reads as an empty store.
pub struct JsonFileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_doc(&self) -> Result<ProblemDocument> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) if bytes.iter().all(|b| b.is_ascii_whitespace()) => Ok(ProblemDocument::default()),
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| AnalyticsError::Store {
                message: format!("Failed to parse {}: {}", self.path.display(), e),
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("Record file {} missing, starting empty", self.path.display());
                Ok(ProblemDocument::default())
            }
            Err(e) => Err(AnalyticsError::Store {
                message: format!("Failed to read {}: {}", self.path.display(), e),
            }),
        }
    }

    async fn write_doc(&self, doc: &ProblemDocument) -> Result<()> {
        let store_err = |e: std::io::Error| AnalyticsError::Store {
            message: format!("Failed to write {}: {}", self.path.display(), e),
        };
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await.map_err(store_err)?;
        }
        let bytes = serde_json::to_vec_pretty(doc)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes).await.map_err(store_err)?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(store_err)?;
        Ok(())
    }
}

#[async_trait]
impl RecordStore for JsonFileStore {
    async fn list(&self) -> Result<Vec<ProblemRecord>> {
        let _guard = self.lock.lock().await;
        Ok(self.read_doc().await?.problems)
    }

    async fn get(&self, id: &str) -> Result<ProblemRecord> {
        let _guard = self.lock.lock().await;
        self.read_doc()
            .await?
            .problems
            .into_iter()
            .find(|p| p.id == id)
            .ok_or_else(|| not_found(id))
    }

    async fn create(&self, record: ProblemRecord) -> Result<ProblemRecord> {
        let _guard = self.lock.lock().await;
        let mut doc = self.read_doc().await?;
        let record = stamp_new(record);
        doc.problems.push(record.clone());
        self.write_doc(&doc).await?;
        Ok(record)
    }

    async fn update(&self, id: &str, patch: Value) -> Result<ProblemRecord> {
        let _guard = self.lock.lock().await;
        let mut doc = self.read_doc().await?;
        let slot = doc
            .problems
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or_else(|| not_found(id))?;
        *slot = apply_patch(slot, patch)?;
        let updated = slot.clone();
        self.write_doc(&doc).await?;
        Ok(updated)
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let _guard = self.lock.lock().await;
        let mut doc = self.read_doc().await?;
        let before = doc.problems.len();
        doc.problems.retain(|p| p.id != id);
        let removed = doc.problems.len() != before;
        self.write_doc(&doc).await?;
        Ok(removed)
    }

    async fn import(&self, record: ProblemRecord) -> Result<ProblemRecord> {
        let _guard = self.lock.lock().await;
        let mut doc = self.read_doc().await?;
        let record = stamp_import(record);
        doc.problems.push(record.clone());
        self.write_doc(&doc).await?;
        Ok(record)
    }
}

/// In-memory store for tests and the offline CLI.
#[derive(Default)]
pub struct MemoryStore {
    records: RwLock<Vec<ProblemRecord>>,
}

impl MemoryStore {
    pub fn new(records: Vec<ProblemRecord>) -> Self {
        Self {
            records: RwLock::new(records),
        }
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn list(&self) -> Result<Vec<ProblemRecord>> {
        Ok(self.records.read().await.clone())
    }

    async fn get(&self, id: &str) -> Result<ProblemRecord> {
        self.records
            .read()
            .await
            .iter()
            .find(|p| p.id == id)
            .cloned()
            .ok_or_else(|| not_found(id))
    }

    async fn create(&self, record: ProblemRecord) -> Result<ProblemRecord> {
        let record = stamp_new(record);
        self.records.write().await.push(record.clone());
        Ok(record)
    }

    async fn update(&self, id: &str, patch: Value) -> Result<ProblemRecord> {
        let mut records = self.records.write().await;
        let slot = records
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or_else(|| not_found(id))?;
        *slot = apply_patch(slot, patch)?;
        Ok(slot.clone())
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|p| p.id != id);
        Ok(records.len() != before)
    }

    async fn import(&self, record: ProblemRecord) -> Result<ProblemRecord> {
        let record = stamp_import(record);
        self.records.write().await.push(record.clone());
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schemas::CauseType;
    use serde_json::json;

    #[tokio::test]
    async fn file_store_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("data").join("problems.json"));
        assert!(store.list().await.unwrap().is_empty());

        let created = store
            .create(ProblemRecord::new("", "Traffic", "jams").with_cause("cars", CauseType::Primary))
            .await
            .unwrap();
        assert!(!created.id.is_empty());
        assert!(created.created_at.is_some());

        let fetched = store.get(&created.id).await.unwrap();
        assert_eq!(fetched, created);

        let raw = std::fs::read_to_string(store.path()).unwrap();
        let doc: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(doc["problems"][0]["title"], "Traffic");
    }

    #[tokio::test]
    async fn update_merges_and_keeps_id() {
        let store = MemoryStore::default();
        let created = store
            .create(ProblemRecord::new("p1", "Old", "desc"))
            .await
            .unwrap();
        let updated = store
            .update("p1", json!({"id": "hijack", "title": "New"}))
            .await
            .unwrap();
        assert_eq!(updated.id, "p1");
        assert_eq!(updated.title, "New");
        assert_eq!(updated.description, "desc");
        assert_eq!(updated.created_at, created.created_at);
        assert!(store.update("p1", json!([1, 2])).await.is_err());
    }

    #[tokio::test]
    async fn missing_records_are_not_found() {
        let store = MemoryStore::default();
        assert_eq!(store.get("nope").await.unwrap_err().code(), "not_found");
        assert!(!store.delete("nope").await.unwrap());
    }

    #[tokio::test]
    async fn import_assigns_fresh_identity() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("problems.json"));
        let original = store.create(ProblemRecord::new("a", "t", "d")).await.unwrap();
        let copy = store.import(original.clone()).await.unwrap();
        assert_ne!(copy.id, original.id);
        assert_eq!(store.list().await.unwrap().len(), 2);
        assert!(store.delete(&original.id).await.unwrap());
        assert_eq!(store.list().await.unwrap().len(), 1);
    }
}
