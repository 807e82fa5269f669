//! SQLite persistence for per-source tables and the merged Total view
//!
//! One table per source plus `total`. Refreshes are full replacements: the
//! old rows are deleted and the new snapshot inserted inside one transaction,
//! so a reader never sees a half-deleted, half-populated table. The store is
//! the only component shared between pipelines.

use crate::error::{PipelineError, Result};
use crate::record::{ModTable, ModRecord, SourceKind, TotalRecord};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

const MAX_CONNECTIONS: u32 = 5;

/// Handle on the aggregation database. Cheap to clone; clones share the pool.
#[derive(Debug, Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Open (creating if necessary) the database at `path` and ensure the
    /// schema exists.
    pub async fn connect(path: impl AsRef<Path>) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_millis(1500));
        Self::with_options(options, MAX_CONNECTIONS).await
    }

    /// In-memory database, used by tests and throwaway runs.
    ///
    /// Limited to a single connection: parallel connections to `:memory:`
    /// would each see their own empty database.
    pub async fn connect_in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::new().filename(":memory:");
        Self::with_options(options, 1).await
    }

    async fn with_options(options: SqliteConnectOptions, max_connections: u32) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(store_error("connect"))?;
        let store = Self { pool };
        store.init().await?;
        Ok(store)
    }

    /// Create the per-source tables and the Total table if they don't exist.
    async fn init(&self) -> Result<()> {
        info!("initializing database schema");
        for kind in SourceKind::ALL {
            let statement = format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    name TEXT PRIMARY KEY,
                    compatibility TEXT NOT NULL,
                    source_url TEXT NOT NULL,
                    homepage_url TEXT NOT NULL,
                    extra_urls TEXT NOT NULL DEFAULT '{{}}'
                )",
                kind.table_name()
            );
            sqlx::query(&statement)
                .execute(&self.pool)
                .await
                .map_err(store_error("schema creation"))?;
        }
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS total (
                name TEXT PRIMARY KEY,
                spacedock TEXT,
                curse TEXT,
                ckan TEXT,
                source_url TEXT,
                homepage_url TEXT
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(store_error("schema creation"))?;
        Ok(())
    }

    /// Replace the whole snapshot for one source in a single transaction.
    pub async fn replace_table(&self, kind: SourceKind, records: &ModTable) -> Result<()> {
        debug!("replacing {} table with {} records", kind, records.len());
        let mut tx = self.pool.begin().await.map_err(store_error("transaction begin"))?;
        sqlx::query(&format!("DELETE FROM {}", kind.table_name()))
            .execute(&mut *tx)
            .await
            .map_err(store_error("table clear"))?;
        let insert = format!(
            "INSERT INTO {} (name, compatibility, source_url, homepage_url, extra_urls)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            kind.table_name()
        );
        for record in records.values() {
            let extra = serde_json::to_string(&record.extra_urls)
                .unwrap_or_else(|_| String::from("{}"));
            sqlx::query(&insert)
                .bind(&record.name)
                .bind(&record.compatibility_version)
                .bind(&record.source_url)
                .bind(&record.homepage_url)
                .bind(extra)
                .execute(&mut *tx)
                .await
                .map_err(store_error("record insert"))?;
        }
        tx.commit().await.map_err(store_error("transaction commit"))?;
        info!("{} table updated, {} records", kind, records.len());
        Ok(())
    }

    /// Read one source's snapshot back out.
    pub async fn read_table(&self, kind: SourceKind) -> Result<ModTable> {
        let statement = format!(
            "SELECT name, compatibility, source_url, homepage_url, extra_urls FROM {} ORDER BY name",
            kind.table_name()
        );
        let rows: Vec<(String, String, String, String, String)> = sqlx::query_as(&statement)
            .fetch_all(&self.pool)
            .await
            .map_err(store_error("table read"))?;
        Ok(rows
            .into_iter()
            .map(|(name, compatibility_version, source_url, homepage_url, extra)| {
                let record = ModRecord {
                    name: name.clone(),
                    compatibility_version,
                    source_url,
                    homepage_url,
                    extra_urls: serde_json::from_str(&extra).unwrap_or_default(),
                };
                (name, record)
            })
            .collect())
    }

    /// All per-source snapshots, for a merge pass.
    pub async fn read_all(&self) -> Result<BTreeMap<SourceKind, ModTable>> {
        let mut tables = BTreeMap::new();
        for kind in SourceKind::ALL {
            tables.insert(kind, self.read_table(kind).await?);
        }
        Ok(tables)
    }

    /// Number of records currently stored for one source.
    pub async fn count(&self, kind: SourceKind) -> Result<u64> {
        let statement = format!("SELECT COUNT(*) FROM {}", kind.table_name());
        let (count,): (i64,) = sqlx::query_as(&statement)
            .fetch_one(&self.pool)
            .await
            .map_err(store_error("count"))?;
        Ok(count as u64)
    }

    /// Number of rows in the merged Total view.
    pub async fn count_total(&self) -> Result<u64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM total")
            .fetch_one(&self.pool)
            .await
            .map_err(store_error("count"))?;
        Ok(count as u64)
    }

    /// Atomically replace the Total view: delete and repopulate inside one
    /// transaction so readers never observe a partial table.
    pub async fn rebuild_total(&self, records: &[TotalRecord]) -> Result<()> {
        debug!("rebuilding total table with {} rows", records.len());
        let mut tx = self.pool.begin().await.map_err(store_error("transaction begin"))?;
        sqlx::query("DELETE FROM total")
            .execute(&mut *tx)
            .await
            .map_err(store_error("table clear"))?;
        for record in records {
            sqlx::query(
                "INSERT INTO total (name, spacedock, curse, ckan, source_url, homepage_url)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )
            .bind(&record.name)
            .bind(record.compatibility.get(&SourceKind::SpaceDock).map(String::as_str))
            .bind(record.compatibility.get(&SourceKind::Curse).map(String::as_str))
            .bind(record.compatibility.get(&SourceKind::Ckan).map(String::as_str))
            .bind(record.source_url.as_deref())
            .bind(record.homepage_url.as_deref())
            .execute(&mut *tx)
            .await
            .map_err(store_error("record insert"))?;
        }
        tx.commit().await.map_err(store_error("transaction commit"))?;
        Ok(())
    }

    /// Query the Total view, optionally filtered by a case-insensitive
    /// substring of the mod name. Ordered like the merge output.
    pub async fn query_total(&self, filter: Option<&str>) -> Result<Vec<TotalRecord>> {
        let base = "SELECT name, spacedock, curse, ckan, source_url, homepage_url FROM total";
        let order = " ORDER BY name COLLATE NOCASE, name";
        let rows: Vec<TotalRow> = match filter {
            Some(needle) => {
                let statement = format!("{base} WHERE name LIKE ?1{order}");
                sqlx::query_as(&statement)
                    .bind(format!("%{needle}%"))
                    .fetch_all(&self.pool)
                    .await
            }
            None => {
                let statement = format!("{base}{order}");
                sqlx::query_as(&statement).fetch_all(&self.pool).await
            }
        }
        .map_err(store_error("total query"))?;
        Ok(rows.into_iter().map(total_from_row).collect())
    }
}

type TotalRow = (
    String,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
);

fn total_from_row(row: TotalRow) -> TotalRecord {
    let (name, spacedock, curse, ckan, source_url, homepage_url) = row;
    let mut record = TotalRecord::new(name);
    for (kind, compatibility) in [
        (SourceKind::SpaceDock, spacedock),
        (SourceKind::Curse, curse),
        (SourceKind::Ckan, ckan),
    ] {
        if let Some(version) = compatibility {
            record.presence.insert(kind, true);
            record.compatibility.insert(kind, version);
        }
    }
    record.source_url = source_url;
    record.homepage_url = homepage_url;
    record
}

fn store_error(operation: &'static str) -> impl FnOnce(sqlx::Error) -> PipelineError {
    move |source| PipelineError::Store { operation, source }
}
