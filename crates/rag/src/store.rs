use std::path::{Path, PathBuf};

use bytemuck::{cast_slice, pod_collect_to_vec};
use citerag_core::{ChunkPayload, RagError, Result, ScoredPoint, VectorPoint, VectorStore};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

/// SQLite-backed vector store plus the per-document ingestion status table.
#[derive(Clone)]
pub struct RagStore {
    path: PathBuf,
}

impl RagStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let store = Self {
            path: path.as_ref().to_path_buf(),
        };
        store.init()?;
        Ok(store)
    }

    fn connection(&self) -> Result<Connection> {
        Connection::open(&self.path).storage()
    }

    pub fn init(&self) -> Result<()> {
        let conn = self.connection()?;
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            CREATE TABLE IF NOT EXISTS points (
                namespace TEXT NOT NULL,
                id TEXT NOT NULL,
                embedding BLOB NOT NULL,
                payload TEXT NOT NULL,
                created_at TEXT DEFAULT CURRENT_TIMESTAMP,
                PRIMARY KEY(namespace, id)
            );
            CREATE TABLE IF NOT EXISTS documents (
                doc_id TEXT PRIMARY KEY,
                status TEXT NOT NULL,
                pages INTEGER,
                chunks INTEGER,
                error TEXT,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_points_namespace ON points(namespace);
            "#,
        )
        .storage()?;
        Ok(())
    }

    pub fn set_status(&self, doc_id: &str, status: &DocumentStatus) -> Result<()> {
        let conn = self.connection()?;
        let (pages, chunks, error) = match status {
            DocumentStatus::Ready { pages, chunks } => (Some(*pages as i64), Some(*chunks as i64), None),
            DocumentStatus::Failed { error } => (None, None, Some(error.as_str())),
            _ => (None, None, None),
        };
        conn.execute(
            r#"
            INSERT INTO documents (doc_id, status, pages, chunks, error, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(doc_id) DO UPDATE SET
                status = excluded.status,
                pages = excluded.pages,
                chunks = excluded.chunks,
                error = excluded.error,
                updated_at = excluded.updated_at
            "#,
            params![
                doc_id,
                status.label(),
                pages,
                chunks,
                error,
                chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
            ],
        )
        .storage()?;
        Ok(())
    }

    pub fn status(&self, doc_id: &str) -> Result<Option<StatusRecord>> {
        let conn = self.connection()?;
        let mut stmt = conn
            .prepare(
                "SELECT status, pages, chunks, error, updated_at FROM documents WHERE doc_id = ?1",
            )
            .storage()?;
        let row = stmt
            .query_row([doc_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<i64>>(1)?,
                    row.get::<_, Option<i64>>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })
            .optional()
            .storage()?;
        Ok(row.map(|(label, pages, chunks, error, updated_at)| StatusRecord {
            doc_id: doc_id.to_string(),
            status: DocumentStatus::from_row(&label, pages, chunks, error),
            updated_at,
        }))
    }

    /// Removes the status row; returns whether one existed.
    pub fn delete_document(&self, doc_id: &str) -> Result<bool> {
        let conn = self.connection()?;
        let removed = conn
            .execute("DELETE FROM documents WHERE doc_id = ?1", [doc_id])
            .storage()?;
        Ok(removed > 0)
    }

    /// Most recently updated documents first, optionally only those whose
    /// status label equals `status`.
    pub fn list_documents(&self, limit: usize, status: Option<&str>) -> Result<Vec<StatusRecord>> {
        let conn = self.connection()?;
        let mut stmt = conn
            .prepare(
                r#"
                SELECT doc_id, status, pages, chunks, error, updated_at FROM documents
                WHERE ?1 IS NULL OR status = ?1
                ORDER BY updated_at DESC, doc_id
                LIMIT ?2
                "#,
            )
            .storage()?;
        let rows = stmt
            .query_map(params![status, limit as i64], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<i64>>(2)?,
                    row.get::<_, Option<i64>>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, String>(5)?,
                ))
            })
            .storage()?;
        let mut records = Vec::new();
        for row in rows {
            let (doc_id, label, pages, chunks, error, updated_at) = row.storage()?;
            records.push(StatusRecord {
                doc_id,
                status: DocumentStatus::from_row(&label, pages, chunks, error),
                updated_at,
            });
        }
        Ok(records)
    }

    pub fn count_points(&self, namespace: &str) -> Result<usize> {
        let conn = self.connection()?;
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM points WHERE namespace = ?1",
                [namespace],
                |row| row.get(0),
            )
            .storage()?;
        Ok(count as usize)
    }
}

impl VectorStore for RagStore {
    fn upsert(&self, namespace: &str, points: &[VectorPoint]) -> Result<()> {
        if points.is_empty() {
            return Ok(());
        }
        let mut conn = self.connection()?;
        let tx = conn.transaction().storage()?;
        for point in points {
            let embedding_blob = cast_slice::<f32, u8>(&point.vector);
            let payload = serde_json::to_string(&point.payload)?;
            tx.execute(
                "INSERT OR REPLACE INTO points (namespace, id, embedding, payload) VALUES (?1, ?2, ?3, ?4)",
                params![namespace, point.id, embedding_blob, payload],
            )
            .storage()?;
        }
        tx.commit().storage()?;
        Ok(())
    }

    fn search(&self, namespace: &str, vector: &[f32], k: usize) -> Result<Vec<ScoredPoint>> {
        let conn = self.connection()?;
        let mut stmt = conn
            .prepare("SELECT id, embedding, payload FROM points WHERE namespace = ?1")
            .storage()?;
        let mut rows = stmt.query([namespace]).storage()?;
        let mut hits = Vec::new();
        while let Some(row) = rows.next().storage()? {
            let id: String = row.get(0).storage()?;
            let embedding_blob: Vec<u8> = row.get(1).storage()?;
            if embedding_blob.len() % std::mem::size_of::<f32>() != 0 {
                return Err(RagError::Storage(format!("invalid embedding for point {id}")));
            }
            let embedding: Vec<f32> = pod_collect_to_vec(&embedding_blob);
            if embedding.len() != vector.len() {
                return Err(RagError::Storage(format!(
                    "point {id} has {} dimensions, query has {}",
                    embedding.len(),
                    vector.len()
                )));
            }
            let payload: ChunkPayload = serde_json::from_str(&row.get::<_, String>(2).storage()?)?;
            hits.push(ScoredPoint {
                id,
                score: cosine_similarity(vector, &embedding),
                payload,
            });
        }
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(k);
        Ok(hits)
    }

    fn delete_namespace(&self, namespace: &str) -> Result<()> {
        let conn = self.connection()?;
        conn.execute("DELETE FROM points WHERE namespace = ?1", [namespace])
            .storage()?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DocumentStatus {
    Queued,
    Processing,
    Ready { pages: usize, chunks: usize },
    Failed { error: String },
}

impl DocumentStatus {
    pub fn label(&self) -> &'static str {
        match self {
            DocumentStatus::Queued => "queued",
            DocumentStatus::Processing => "processing",
            DocumentStatus::Ready { .. } => "ready",
            DocumentStatus::Failed { .. } => "failed",
        }
    }

    fn from_row(label: &str, pages: Option<i64>, chunks: Option<i64>, error: Option<String>) -> Self {
        match label {
            "processing" => DocumentStatus::Processing,
            "ready" => DocumentStatus::Ready {
                pages: pages.unwrap_or(0) as usize,
                chunks: chunks.unwrap_or(0) as usize,
            },
            "failed" => DocumentStatus::Failed {
                error: error.unwrap_or_default(),
            },
            _ => DocumentStatus::Queued,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusRecord {
    pub doc_id: String,
    #[serde(flatten)]
    pub status: DocumentStatus,
    pub updated_at: String,
}

/// Maps rusqlite failures onto the storage error variant.
trait StorageResultExt<T> {
    fn storage(self) -> Result<T>;
}

impl<T> StorageResultExt<T> for rusqlite::Result<T> {
    fn storage(self) -> Result<T> {
        self.map_err(|e| RagError::Storage(e.to_string()))
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut a_norm = 0.0f32;
    let mut b_norm = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        a_norm += x * x;
        b_norm += y * y;
    }
    if a_norm == 0.0 || b_norm == 0.0 {
        return 0.0;
    }
    dot / (a_norm.sqrt() * b_norm.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(id: &str, vector: Vec<f32>, text: &str) -> VectorPoint {
        VectorPoint {
            id: id.to_string(),
            vector,
            payload: ChunkPayload {
                chunk_id: id.to_string(),
                text: text.to_string(),
                page_start: 1,
                page_end: 1,
                section: None,
            },
        }
    }

    fn temp_store() -> (tempfile::TempDir, RagStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = RagStore::open(dir.path().join("rag.sqlite")).unwrap();
        (dir, store)
    }

    #[test]
    fn search_is_scoped_sorted_and_truncated() {
        let (_dir, store) = temp_store();
        store
            .upsert(
                "doc_a",
                &[
                    point("a:1:0", vec![1.0, 0.0], "x"),
                    point("a:1:1", vec![0.6, 0.8], "y"),
                    point("a:1:2", vec![0.0, 1.0], "z"),
                ],
            )
            .unwrap();
        store
            .upsert("doc_b", &[point("b:1:0", vec![1.0, 0.0], "other")])
            .unwrap();
        let hits = store.search("doc_a", &[1.0, 0.0], 2).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, "a:1:0");
        assert!((hits[0].score - 1.0).abs() < 1e-6);
        assert_eq!(hits[1].payload.text, "y");
    }

    #[test]
    fn upsert_replaces_by_id_and_delete_clears_namespace() {
        let (_dir, store) = temp_store();
        store.upsert("ns", &[point("p", vec![1.0], "old")]).unwrap();
        store.upsert("ns", &[point("p", vec![1.0], "new")]).unwrap();
        assert_eq!(store.count_points("ns").unwrap(), 1);
        let hits = store.search("ns", &[1.0], 5).unwrap();
        assert_eq!(hits[0].payload.text, "new");
        store.delete_namespace("ns").unwrap();
        assert_eq!(store.count_points("ns").unwrap(), 0);
    }

    #[test]
    fn status_roundtrips() {
        let (_dir, store) = temp_store();
        assert!(store.status("d1").unwrap().is_none());
        store.set_status("d1", &DocumentStatus::Processing).unwrap();
        store
            .set_status("d1", &DocumentStatus::Failed { error: "boom".into() })
            .unwrap();
        let record = store.status("d1").unwrap().unwrap();
        assert_eq!(record.status, DocumentStatus::Failed { error: "boom".into() });
        store
            .set_status("d1", &DocumentStatus::Ready { pages: 3, chunks: 9 })
            .unwrap();
        let record = store.status("d1").unwrap().unwrap();
        assert_eq!(record.status, DocumentStatus::Ready { pages: 3, chunks: 9 });
    }

    #[test]
    fn deleted_document_has_no_status() {
        let (_dir, store) = temp_store();
        store
            .set_status("d1", &DocumentStatus::Ready { pages: 1, chunks: 3 })
            .unwrap();
        assert!(store.delete_document("d1").unwrap());
        assert!(store.status("d1").unwrap().is_none());
        assert!(!store.delete_document("d1").unwrap());
    }

    #[test]
    fn listing_filters_by_status_and_limits() {
        let (_dir, store) = temp_store();
        store.set_status("a", &DocumentStatus::Processing).unwrap();
        store
            .set_status("b", &DocumentStatus::Ready { pages: 1, chunks: 1 })
            .unwrap();
        store
            .set_status("c", &DocumentStatus::Failed { error: "x".into() })
            .unwrap();
        store
            .set_status("d", &DocumentStatus::Ready { pages: 2, chunks: 4 })
            .unwrap();

        let all = store.list_documents(10, None).unwrap();
        assert_eq!(all.len(), 4);
        assert!(all.windows(2).all(|w| w[0].updated_at >= w[1].updated_at));

        let ready = store.list_documents(10, Some("ready")).unwrap();
        let mut ids: Vec<&str> = ready.iter().map(|r| r.doc_id.as_str()).collect();
        ids.sort();
        assert_eq!(ids, vec!["b", "d"]);

        assert_eq!(store.list_documents(2, None).unwrap().len(), 2);
        assert!(store.list_documents(10, Some("queued")).unwrap().is_empty());
    }

    #[test]
    fn dimension_mismatch_is_a_storage_error() {
        let (_dir, store) = temp_store();
        store.upsert("ns", &[point("p", vec![1.0, 0.0], "x")]).unwrap();
        let err = store.search("ns", &[1.0, 0.0, 0.0], 5).unwrap_err();
        assert!(matches!(err, RagError::Storage(_)));
    }
}
