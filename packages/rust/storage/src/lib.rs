//! libSQL-backed research history.
//!
//! [`LibsqlHistory`] stores every finished research result (question, answer,
//! cited sources) and implements the [`HistoryStore`] collaborator.
//!
//! **Access rules:**
//! - Server and `deepresearch ask`: read-write via [`LibsqlHistory::open`]
//! - `deepresearch history list/show`: read-only via [`LibsqlHistory::open_readonly`]

mod migrations;

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deepresearch_shared::{
    DeepResearchError, HistoryEntry, HistoryRecord, HistoryStore, ResearchId, Result, Source,
};
use libsql::{Connection, Database, params};
use tokio::sync::Mutex;
use tracing::debug;

/// Research history store wrapping a libSQL database.
pub struct LibsqlHistory {
    #[allow(dead_code)]
    db: Database,
    /// Serializes access from concurrent pipelines.
    conn: Mutex<Connection>,
    readonly: bool,
}

impl LibsqlHistory {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| DeepResearchError::io(parent, e))?;
        }

        let (db, conn) = connect(path).await?;
        let store = Self {
            db,
            conn: Mutex::new(conn),
            readonly: false,
        };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Open an existing database at `path` in read-only mode.
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(DeepResearchError::Storage(format!(
                "no history database at {}",
                path.display()
            )));
        }

        let (db, conn) = connect(path).await?;
        Ok(Self {
            db,
            conn: Mutex::new(conn),
            readonly: true,
        })
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.schema_version().await;
        let conn = self.conn.lock().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                conn.execute_batch(migration.sql).await.map_err(|e| {
                    DeepResearchError::Storage(format!(
                        "migration v{} failed: {e}",
                        migration.version
                    ))
                })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn schema_version(&self) -> u32 {
        let conn = self.conn.lock().await;
        let result = conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    /// Ensure we're in read-write mode before writing.
    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(DeepResearchError::Storage(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl HistoryStore for LibsqlHistory {
    async fn save(&self, question: &str, answer: &str, sources: &[Source]) -> Result<ResearchId> {
        self.check_writable()?;
        let id = ResearchId::new();
        let now = Utc::now().to_rfc3339();
        let sources_json = serde_json::to_string(sources)
            .map_err(|e| DeepResearchError::Storage(format!("encode sources: {e}")))?;

        self.conn
            .lock()
            .await
            .execute(
                "INSERT INTO research_history (id, created_at, question, answer, sources_json)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    id.to_string(),
                    now.as_str(),
                    question,
                    answer,
                    sources_json.as_str()
                ],
            )
            .await
            .map_err(storage_err)?;

        debug!(%id, "research saved to history");
        Ok(id)
    }

    async fn load(&self, id: &ResearchId) -> Result<Option<HistoryRecord>> {
        let conn = self.conn.lock().await;
        let mut rows = conn
            .query(
                "SELECT id, created_at, question, answer, sources_json
                 FROM research_history WHERE id = ?1",
                params![id.to_string()],
            )
            .await
            .map_err(storage_err)?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_record(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(storage_err(e)),
        }
    }

    async fn list(&self) -> Result<Vec<HistoryEntry>> {
        let conn = self.conn.lock().await;
        let rows = conn
            .query(
                "SELECT id, created_at, question FROM research_history
                 ORDER BY created_at DESC, id DESC",
                params![],
            )
            .await
            .map_err(storage_err)?;
        collect_entries(rows).await
    }

    async fn clear(&self) -> Result<()> {
        self.check_writable()?;
        self.conn
            .lock()
            .await
            .execute("DELETE FROM research_history", params![])
            .await
            .map_err(storage_err)?;
        Ok(())
    }
}

async fn connect(path: &Path) -> Result<(Database, Connection)> {
    let db = libsql::Builder::new_local(path)
        .build()
        .await
        .map_err(storage_err)?;
    let conn = db.connect().map_err(storage_err)?;
    Ok((db, conn))
}

/// Read `(id, created_at, question)` rows. A failing row fetch is an error,
/// never the end of the listing.
async fn collect_entries(mut rows: libsql::Rows) -> Result<Vec<HistoryEntry>> {
    let mut entries = Vec::new();
    while let Some(row) = rows.next().await.map_err(storage_err)? {
        entries.push(HistoryEntry {
            id: parse_id(&row.get::<String>(0).map_err(storage_err)?)?,
            timestamp: parse_timestamp(&row.get::<String>(1).map_err(storage_err)?)?,
            question: row.get::<String>(2).map_err(storage_err)?,
        });
    }
    Ok(entries)
}

fn storage_err(e: libsql::Error) -> DeepResearchError {
    DeepResearchError::Storage(e.to_string())
}

fn parse_id(raw: &str) -> Result<ResearchId> {
    raw.parse()
        .map_err(|e| DeepResearchError::Storage(format!("invalid research id {raw:?}: {e}")))
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DeepResearchError::Storage(format!("invalid date: {e}")))
}

/// Convert a database row to a [`HistoryRecord`].
fn row_to_record(row: &libsql::Row) -> Result<HistoryRecord> {
    let sources_json: String = row.get(4).map_err(storage_err)?;
    let sources: Vec<Source> = serde_json::from_str(&sources_json)
        .map_err(|e| DeepResearchError::Storage(format!("decode sources: {e}")))?;

    Ok(HistoryRecord {
        id: parse_id(&row.get::<String>(0).map_err(storage_err)?)?,
        timestamp: parse_timestamp(&row.get::<String>(1).map_err(storage_err)?)?,
        question: row.get::<String>(2).map_err(storage_err)?,
        answer: row.get::<String>(3).map_err(storage_err)?,
        sources,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    /// Create a temp file store for testing.
    async fn test_store() -> LibsqlHistory {
        let tmp = std::env::temp_dir().join(format!("dr_test_{}.db", Uuid::now_v7()));
        LibsqlHistory::open(&tmp).await.expect("open test db")
    }

    fn sources() -> Vec<Source> {
        vec![
            Source {
                url: "https://example.com/a".into(),
                title: "A".into(),
            },
            Source {
                url: "https://example.com/b".into(),
                title: "B".into(),
            },
        ]
    }

    #[tokio::test]
    async fn open_and_migrate() {
        let store = test_store().await;
        assert_eq!(store.schema_version().await, 1);
    }

    #[tokio::test]
    async fn idempotent_migration() {
        let tmp = std::env::temp_dir().join(format!("dr_test_{}.db", Uuid::now_v7()));
        let s1 = LibsqlHistory::open(&tmp).await.expect("first open");
        drop(s1);
        let s2 = LibsqlHistory::open(&tmp).await.expect("second open");
        assert_eq!(s2.schema_version().await, 1);
    }

    #[tokio::test]
    async fn load_returns_what_was_saved() {
        let store = test_store().await;
        let id = store
            .save("What is quantum computing?", "It uses qubits.", &sources())
            .await
            .expect("save");

        let record = store.load(&id).await.expect("load").expect("record exists");
        assert_eq!(record.id, id);
        assert_eq!(record.question, "What is quantum computing?");
        assert_eq!(record.answer, "It uses qubits.");
        assert_eq!(record.sources, sources());
    }

    #[tokio::test]
    async fn load_unknown_id_is_none() {
        let store = test_store().await;
        assert!(store.load(&ResearchId::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_is_newest_first_and_clear_empties() {
        let store = test_store().await;
        let first = store.save("first", "1", &[]).await.unwrap();
        let second = store.save("second", "2", &[]).await.unwrap();

        let entries = store.list().await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].id, second);
        assert_eq!(entries[1].id, first);

        store.clear().await.unwrap();
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn row_fetch_errors_are_not_swallowed() {
        let store = test_store().await;
        store.save("q", "a", &[]).await.unwrap();

        let conn = store.conn.lock().await;
        // abs() of the minimum integer overflows while stepping the second row.
        let listed = async {
            let rows = conn
                .query(
                    "SELECT id, created_at, question FROM research_history
                     UNION ALL
                     SELECT id, created_at, abs(-9223372036854775807 - 1) FROM research_history",
                    params![],
                )
                .await
                .map_err(storage_err)?;
            collect_entries(rows).await
        }
        .await;

        assert!(matches!(listed, Err(DeepResearchError::Storage(_))));
    }

    #[tokio::test]
    async fn readonly_rejects_writes() {
        let tmp = std::env::temp_dir().join(format!("dr_test_{}.db", Uuid::now_v7()));
        let rw = LibsqlHistory::open(&tmp).await.unwrap();
        let id = rw.save("q", "a", &[]).await.unwrap();
        drop(rw);

        let ro = LibsqlHistory::open_readonly(&tmp).await.unwrap();
        assert!(ro.load(&id).await.unwrap().is_some());
        assert!(ro.save("q", "a", &[]).await.is_err());
        assert!(ro.clear().await.is_err());
    }

    #[tokio::test]
    async fn readonly_requires_existing_file() {
        let tmp = std::env::temp_dir().join(format!("dr_missing_{}.db", Uuid::now_v7()));
        assert!(LibsqlHistory::open_readonly(&tmp).await.is_err());
    }
}
