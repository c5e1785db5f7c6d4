//! Persistent suspend history backed by SQLite.
//!
//! Five tables keyed by [`CycleKey`]: prerequisite findings, debug lines,
//! cycle summaries, cycle findings and battery samples. Writes go through
//! one connection inside an open transaction that [`Store::sync`] commits.
//! Schema upgrades are additive and tracked with `PRAGMA user_version`.

use std::path::{Path, PathBuf};

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode};
use sqlx::{ConnectOptions, Connection, SqliteConnection};
use tracing::{debug, info};

mod records;

pub use records::{
    BatteryRow, CycleKey, CycleRecord, CycleSummary, DebugRow, MessageRow,
};
use records::{
    battery_row_into_record, cycle_row_into_record, debug_row_into_record, join_list,
    message_row_into_record, BatteryRowTuple, CycleRowTuple, DebugRowTuple, MessageRowTuple,
};

/// Schema version written by this build.
pub const SCHEMA_VERSION: i64 = 1;

/// Default database location.
pub const DEFAULT_DB_PATH: &str = "/var/lib/amd-s2idle/data.db";

/// Directory used when the default location is not writable.
pub const FALLBACK_DB_DIR: &str = "/var/local/lib/amd-s2idle";

/// Errors produced by the store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The database directory could not be created.
    #[error("failed to create database directory {path}: {source}")]
    Io {
        /// Directory that was created.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// A SQL statement failed.
    #[error("database error while {action}: {source}")]
    Sql {
        /// What was being done.
        action: &'static str,
        /// Underlying sqlx error.
        #[source]
        source: sqlx::Error,
    },
    /// The database was written by a newer build.
    #[error("database schema version {found} is newer than supported version {supported}")]
    SchemaTooNew {
        /// Version found on disk.
        found: i64,
        /// Highest version this build understands.
        supported: i64,
    },
    /// A keyed write happened before [`Store::start_cycle`].
    #[error("no cycle started")]
    NoCycle,
}

fn sql(action: &'static str) -> impl FnOnce(sqlx::Error) -> StoreError {
    move |source| StoreError::Sql { action, source }
}

#[derive(Debug, Default, Clone, Copy)]
struct Sequence {
    prereq: i64,
    debug: i64,
    cycle_data: i64,
}

/// Handle to the suspend history database.
pub struct Store {
    conn: SqliteConnection,
    path: PathBuf,
    key: Option<CycleKey>,
    seq: Sequence,
    in_transaction: bool,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("path", &self.path)
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

impl Store {
    /// Open or create the database at `path` and bring its schema up to date.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::SchemaTooNew`] if the file was written by a
    /// newer schema, or an I/O or SQL error if it cannot be opened.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let mut conn = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .pragma("trusted_schema", "OFF")
            .connect()
            .await
            .map_err(sql("opening database"))?;

        migrate(&mut conn).await?;
        debug!(path = %path.display(), "store opened");

        Ok(Self {
            conn,
            path: path.to_path_buf(),
            key: None,
            seq: Sequence::default(),
            in_transaction: false,
        })
    }

    /// Open the database at `path`, or under `fallback_dir` if `path`
    /// cannot be created.
    ///
    /// # Errors
    ///
    /// Returns the error from the fallback location if both fail, or a
    /// schema error from whichever location opened.
    pub async fn open_with_fallback(path: &Path, fallback_dir: &Path) -> Result<Self, StoreError> {
        match Self::open(path).await {
            Ok(store) => Ok(store),
            Err(e @ StoreError::SchemaTooNew { .. }) => Err(e),
            Err(e) => {
                let name = path.file_name().unwrap_or(std::ffi::OsStr::new("data.db"));
                let fallback = fallback_dir.join(name);
                info!(error = %e, fallback = %fallback.display(), "using fallback database location");
                Self::open(&fallback).await
            }
        }
    }

    /// Path of the open database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current cycle key, if one was started.
    pub fn current_key(&self) -> Option<CycleKey> {
        self.key
    }

    /// Make `key` current and continue its sequence ids after the
    /// highest already stored.
    ///
    /// # Errors
    ///
    /// Returns an error if the current maxima cannot be read.
    pub async fn start_cycle(&mut self, key: CycleKey) -> Result<(), StoreError> {
        self.seq = Sequence {
            prereq: self.next_id("prereq_data", key).await?,
            debug: self.next_id("debug", key).await?,
            cycle_data: self.next_id("cycle_data", key).await?,
        };
        self.key = Some(key);
        Ok(())
    }

    async fn next_id(&mut self, table: &'static str, key: CycleKey) -> Result<i64, StoreError> {
        let query = format!("SELECT MAX(id) FROM {table} WHERE t0 = ?1");
        let (max,): (Option<i64>,) = sqlx::query_as(&query)
            .bind(key.0)
            .fetch_one(&mut self.conn)
            .await
            .map_err(sql("reading sequence ids"))?;
        Ok(max.map_or(0, |m| m.saturating_add(1)))
    }

    async fn begin(&mut self) -> Result<CycleKey, StoreError> {
        let key = self.key.ok_or(StoreError::NoCycle)?;
        if !self.in_transaction {
            sqlx::raw_sql("BEGIN")
                .execute(&mut self.conn)
                .await
                .map_err(sql("starting transaction"))?;
            self.in_transaction = true;
        }
        Ok(key)
    }

    /// Append a debug line to the current cycle.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NoCycle`] before [`Store::start_cycle`], or
    /// an SQL error.
    pub async fn record_debug(&mut self, message: &str, priority: Option<u8>) -> Result<(), StoreError> {
        let key = self.begin().await?;
        let id = self.seq.debug;
        sqlx::query("INSERT INTO debug (t0, id, message, priority) VALUES (?1, ?2, ?3, ?4)")
            .bind(key.0)
            .bind(id)
            .bind(message)
            .bind(priority.map(i64::from))
            .execute(&mut self.conn)
            .await
            .map_err(sql("recording debug line"))?;
        self.seq.debug = id.saturating_add(1);
        Ok(())
    }

    /// Append a prerequisite finding to the current snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NoCycle`] before [`Store::start_cycle`], or
    /// an SQL error.
    pub async fn record_prereq(&mut self, message: &str, symbol: &str) -> Result<(), StoreError> {
        let key = self.begin().await?;
        let id = self.seq.prereq;
        sqlx::query("INSERT INTO prereq_data (t0, id, message, symbol) VALUES (?1, ?2, ?3, ?4)")
            .bind(key.0)
            .bind(id)
            .bind(message)
            .bind(symbol)
            .execute(&mut self.conn)
            .await
            .map_err(sql("recording prerequisite"))?;
        self.seq.prereq = id.saturating_add(1);
        Ok(())
    }

    /// Append a report finding to the current cycle.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NoCycle`] before [`Store::start_cycle`], or
    /// an SQL error.
    pub async fn record_cycle_data(&mut self, message: &str, symbol: &str) -> Result<(), StoreError> {
        let key = self.begin().await?;
        let id = self.seq.cycle_data;
        sqlx::query("INSERT INTO cycle_data (t0, id, message, symbol) VALUES (?1, ?2, ?3, ?4)")
            .bind(key.0)
            .bind(id)
            .bind(message)
            .bind(symbol)
            .execute(&mut self.conn)
            .await
            .map_err(sql("recording cycle data"))?;
        self.seq.cycle_data = id.saturating_add(1);
        Ok(())
    }

    /// Write the summary of the current cycle, replacing an earlier one
    /// with the same key.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NoCycle`] before [`Store::start_cycle`], or
    /// an SQL error.
    pub async fn record_cycle(&mut self, cycle: &CycleRecord) -> Result<(), StoreError> {
        self.begin().await?;
        sqlx::query(
            "REPLACE INTO cycle (t0, t1, requested, gpio, wake_irq, kernel, hw)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )
        .bind(cycle.t0.0)
        .bind(cycle.t1.0)
        .bind(cycle.requested)
        .bind(join_list(&cycle.gpio))
        .bind(join_list(&cycle.wake_irq))
        .bind(cycle.kernel)
        .bind(cycle.hw)
        .execute(&mut self.conn)
        .await
        .map_err(sql("recording cycle"))?;
        Ok(())
    }

    /// Record a battery sample for the current cycle.
    ///
    /// The first sample for `name` is stored as the pre-suspend value,
    /// the next one as the post-resume value.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NoCycle`] before [`Store::start_cycle`], or
    /// an SQL error.
    pub async fn record_battery_energy(
        &mut self,
        name: &str,
        energy: i64,
        full: i64,
        unit: &str,
    ) -> Result<(), StoreError> {
        let key = self.begin().await?;
        let existing: Option<(i64,)> =
            sqlx::query_as("SELECT 1 FROM battery WHERE t0 = ?1 AND name = ?2")
                .bind(key.0)
                .bind(name)
                .fetch_optional(&mut self.conn)
                .await
                .map_err(sql("reading battery sample"))?;

        let statement = if existing.is_some() {
            "UPDATE battery SET b1 = ?3, full = ?4, unit = ?5 WHERE t0 = ?1 AND name = ?2"
        } else {
            "INSERT INTO battery (t0, name, b0, full, unit) VALUES (?1, ?2, ?3, ?4, ?5)"
        };
        sqlx::query(statement)
            .bind(key.0)
            .bind(name)
            .bind(energy)
            .bind(full)
            .bind(unit)
            .execute(&mut self.conn)
            .await
            .map_err(sql("recording battery sample"))?;
        Ok(())
    }

    /// Commit everything written since the last sync.
    ///
    /// # Errors
    ///
    /// Returns an SQL error if the commit fails.
    pub async fn sync(&mut self) -> Result<(), StoreError> {
        if self.in_transaction {
            sqlx::raw_sql("COMMIT")
                .execute(&mut self.conn)
                .await
                .map_err(sql("committing"))?;
            self.in_transaction = false;
        }
        Ok(())
    }

    /// Commit and close the connection.
    ///
    /// # Errors
    ///
    /// Returns an SQL error if the final commit or close fails.
    pub async fn close(mut self) -> Result<(), StoreError> {
        self.sync().await?;
        self.conn.close().await.map_err(sql("closing database"))
    }

    /// Prerequisite findings of one snapshot, in insertion order.
    ///
    /// # Errors
    ///
    /// Returns an SQL error if the query fails.
    pub async fn report_prereq(&mut self, key: CycleKey) -> Result<Vec<MessageRow>, StoreError> {
        let rows: Vec<MessageRowTuple> = sqlx::query_as(
            "SELECT t0, id, message, symbol FROM prereq_data WHERE t0 = ?1 ORDER BY id",
        )
        .bind(key.0)
        .fetch_all(&mut self.conn)
        .await
        .map_err(sql("reading prerequisites"))?;
        Ok(rows.into_iter().map(message_row_into_record).collect())
    }

    /// Debug lines of one cycle, in insertion order.
    ///
    /// # Errors
    ///
    /// Returns an SQL error if the query fails.
    pub async fn report_debug(&mut self, key: CycleKey) -> Result<Vec<DebugRow>, StoreError> {
        let rows: Vec<DebugRowTuple> = sqlx::query_as(
            "SELECT t0, id, message, priority FROM debug WHERE t0 = ?1 ORDER BY id",
        )
        .bind(key.0)
        .fetch_all(&mut self.conn)
        .await
        .map_err(sql("reading debug lines"))?;
        Ok(rows.into_iter().map(debug_row_into_record).collect())
    }

    /// Summary of one cycle.
    ///
    /// # Errors
    ///
    /// Returns an SQL error if the query fails.
    pub async fn report_cycle(&mut self, key: CycleKey) -> Result<Option<CycleRecord>, StoreError> {
        let row: Option<CycleRowTuple> = sqlx::query_as(
            "SELECT t0, t1, requested, gpio, wake_irq, kernel, hw FROM cycle WHERE t0 = ?1",
        )
        .bind(key.0)
        .fetch_optional(&mut self.conn)
        .await
        .map_err(sql("reading cycle"))?;
        Ok(row.map(cycle_row_into_record))
    }

    /// Report findings of one cycle, in insertion order.
    ///
    /// # Errors
    ///
    /// Returns an SQL error if the query fails.
    pub async fn report_cycle_data(&mut self, key: CycleKey) -> Result<Vec<MessageRow>, StoreError> {
        let rows: Vec<MessageRowTuple> = sqlx::query_as(
            "SELECT t0, id, message, symbol FROM cycle_data WHERE t0 = ?1 ORDER BY id",
        )
        .bind(key.0)
        .fetch_all(&mut self.conn)
        .await
        .map_err(sql("reading cycle data"))?;
        Ok(rows.into_iter().map(message_row_into_record).collect())
    }

    /// Battery samples of one cycle.
    ///
    /// # Errors
    ///
    /// Returns an SQL error if the query fails.
    pub async fn report_battery(&mut self, key: CycleKey) -> Result<Vec<BatteryRow>, StoreError> {
        let rows: Vec<BatteryRowTuple> = sqlx::query_as(
            "SELECT t0, name, b0, b1, full, unit FROM battery WHERE t0 = ?1 ORDER BY name",
        )
        .bind(key.0)
        .fetch_all(&mut self.conn)
        .await
        .map_err(sql("reading battery samples"))?;
        Ok(rows.into_iter().map(battery_row_into_record).collect())
    }

    /// Cycles with keys in `since..=until`, each with its battery samples.
    ///
    /// # Errors
    ///
    /// Returns an SQL error if the query fails.
    pub async fn report_summary(
        &mut self,
        since: CycleKey,
        until: CycleKey,
    ) -> Result<Vec<CycleSummary>, StoreError> {
        type JoinedRow = (
            i64,
            i64,
            i64,
            Option<String>,
            Option<String>,
            Option<f64>,
            Option<f64>,
            Option<String>,
            Option<i64>,
            Option<i64>,
            Option<i64>,
            Option<String>,
        );
        let rows: Vec<JoinedRow> = sqlx::query_as(
            "SELECT c.t0, c.t1, c.requested, c.gpio, c.wake_irq, c.kernel, c.hw,
                    b.name, b.b0, b.b1, b.full, b.unit
             FROM cycle c
             LEFT JOIN battery b ON b.t0 = c.t0
             WHERE c.t0 >= ?1 AND c.t0 <= ?2
             ORDER BY c.t0, b.name",
        )
        .bind(since.0)
        .bind(until.0)
        .fetch_all(&mut self.conn)
        .await
        .map_err(sql("reading cycle summary"))?;

        let mut out: Vec<CycleSummary> = Vec::new();
        for (t0, t1, requested, gpio, wake_irq, kernel, hw, name, b0, b1, full, unit) in rows {
            if out.last().map(|s| s.cycle.t0.0) != Some(t0) {
                out.push(CycleSummary {
                    cycle: cycle_row_into_record((t0, t1, requested, gpio, wake_irq, kernel, hw)),
                    batteries: Vec::new(),
                });
            }
            if let (Some(name), Some(summary)) = (name, out.last_mut()) {
                summary
                    .batteries
                    .push(battery_row_into_record((t0, name, b0, b1, full, unit)));
            }
        }
        Ok(out)
    }

    /// Most recent prerequisite snapshot key.
    ///
    /// # Errors
    ///
    /// Returns an SQL error if the query fails.
    pub async fn get_last_prereq_ts(&mut self) -> Result<Option<CycleKey>, StoreError> {
        let (max,): (Option<i64>,) = sqlx::query_as("SELECT MAX(t0) FROM prereq_data")
            .fetch_one(&mut self.conn)
            .await
            .map_err(sql("reading last prerequisite key"))?;
        Ok(max.map(CycleKey))
    }

    /// Most recent cycle key.
    ///
    /// # Errors
    ///
    /// Returns an SQL error if the query fails.
    pub async fn get_last_cycle(&mut self) -> Result<Option<CycleKey>, StoreError> {
        let (max,): (Option<i64>,) = sqlx::query_as("SELECT MAX(t0) FROM cycle")
            .fetch_one(&mut self.conn)
            .await
            .map_err(sql("reading last cycle key"))?;
        Ok(max.map(CycleKey))
    }

    /// Schema version stamped in the file.
    ///
    /// # Errors
    ///
    /// Returns an SQL error if the pragma cannot be read.
    pub async fn schema_version(&mut self) -> Result<i64, StoreError> {
        user_version(&mut self.conn).await
    }
}

async fn user_version(conn: &mut SqliteConnection) -> Result<i64, StoreError> {
    let (version,): (i64,) = sqlx::query_as("PRAGMA user_version")
        .fetch_one(conn)
        .await
        .map_err(sql("reading schema version"))?;
    Ok(version)
}

async fn migrate(conn: &mut SqliteConnection) -> Result<(), StoreError> {
    let version = user_version(conn).await?;
    if version > SCHEMA_VERSION {
        return Err(StoreError::SchemaTooNew {
            found: version,
            supported: SCHEMA_VERSION,
        });
    }
    if version == SCHEMA_VERSION {
        return Ok(());
    }

    let (tables,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM sqlite_master WHERE type = 'table'")
            .fetch_one(&mut *conn)
            .await
            .map_err(sql("inspecting schema"))?;

    sqlx::raw_sql(include_str!("../../migrations/001_s2idle_schema.sql"))
        .execute(&mut *conn)
        .await
        .map_err(sql("applying base schema"))?;

    if tables > 0 {
        let columns: Vec<(String,)> = sqlx::query_as("SELECT name FROM pragma_table_info('debug')")
            .fetch_all(&mut *conn)
            .await
            .map_err(sql("inspecting debug table"))?;
        if !columns.iter().any(|(name,)| name == "priority") {
            info!("adding priority column to debug table");
            sqlx::raw_sql(include_str!("../../migrations/002_debug_priority.sql"))
                .execute(&mut *conn)
                .await
                .map_err(sql("adding debug priority"))?;
        }
    }

    let stamp = format!("PRAGMA user_version = {SCHEMA_VERSION}");
    sqlx::raw_sql(&stamp)
        .execute(&mut *conn)
        .await
        .map_err(sql("stamping schema version"))?;
    debug!(from = version, to = SCHEMA_VERSION, "schema migrated");
    Ok(())
}
