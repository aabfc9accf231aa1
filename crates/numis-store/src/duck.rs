//! DuckDB storage for the coin collection.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use duckdb::{Connection, Row, params};
use numis_core::{CoinRecord, Condition, Material};
use tracing::info;

use crate::{CoinStore, StoreError};

const SCHEMA: &str = "
    CREATE SEQUENCE IF NOT EXISTS coins_id_seq START 1;
    CREATE TABLE IF NOT EXISTS coins (
        id                   BIGINT PRIMARY KEY DEFAULT nextval('coins_id_seq'),
        name                 VARCHAR NOT NULL,
        year                 VARCHAR NOT NULL,
        country              VARCHAR NOT NULL,
        material             VARCHAR NOT NULL,
        purity               DOUBLE  NOT NULL,
        mass_grams           DOUBLE  NOT NULL,
        diameter             VARCHAR NOT NULL,
        mintage              VARCHAR NOT NULL,
        \"condition\"        VARCHAR NOT NULL,
        collector_value      DOUBLE  NOT NULL,
        collector_value_max  DOUBLE  NOT NULL,
        collector_value_text VARCHAR,
        material_value       DOUBLE  NOT NULL,
        description          VARCHAR NOT NULL,
        plausibility         VARCHAR NOT NULL,
        confidence           DOUBLE  NOT NULL,
        verified             BOOLEAN NOT NULL,
        created_at           VARCHAR NOT NULL
    );";

const COLUMNS: &str = "id, name, year, country, material, purity, mass_grams, diameter, mintage, \
     \"condition\", collector_value, collector_value_max, collector_value_text, material_value, \
     description, plausibility, confidence, verified, created_at";

/// DuckDB-backed [`CoinStore`].
///
/// `created_at` is stored as fixed-width RFC 3339 text (UTC, microseconds) so
/// that text order equals time order.
///
/// Use [`open`](Self::open) for an in-memory database and
/// [`open_persistent`](Self::open_persistent) for a file that survives
/// restarts. Both create the `coins` table if it is missing.
pub struct DuckStore {
    conn: Mutex<Connection>,
}

impl DuckStore {
    /// Open an in-memory DuckDB database.
    pub fn open() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    /// Open or create a persistent DuckDB database at the given path.
    pub fn open_persistent(path: &Path) -> Result<Self, StoreError> {
        let store = Self::init(Connection::open(path)?)?;
        info!(path = %path.display(), count = store.count()?, "opened coin store");
        Ok(store)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Other("duckdb connection lock poisoned".into()))
    }

    /// Number of stored coins.
    pub fn count(&self) -> Result<usize, StoreError> {
        let conn = self.conn()?;
        let n: i64 = conn.query_row("SELECT count(*)::BIGINT FROM coins", [], |row| row.get(0))?;
        Ok(n as usize)
    }
}

#[async_trait]
impl CoinStore for DuckStore {
    async fn insert(&self, record: &CoinRecord) -> Result<i64, StoreError> {
        let conn = self.conn()?;
        let created_at = record
            .created_at
            .to_rfc3339_opts(SecondsFormat::Micros, true);
        let id: i64 = conn.query_row(
            "INSERT INTO coins (
                name, year, country, material, purity, mass_grams, diameter, mintage,
                \"condition\", collector_value, collector_value_max, collector_value_text,
                material_value, description, plausibility, confidence, verified, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING id",
            params![
                record.name,
                record.year,
                record.country,
                record.material.as_str(),
                record.purity,
                record.mass_grams,
                record.diameter,
                record.mintage,
                record.condition.as_str(),
                record.collector_value,
                record.collector_value_max,
                record.collector_value_text,
                record.material_value,
                record.description,
                record.plausibility,
                record.confidence,
                record.verified,
                created_at,
            ],
            |row| row.get(0),
        )?;
        info!(id, name = %record.name, "stored coin");
        Ok(id)
    }

    async fn list_recent(&self) -> Result<Vec<CoinRecord>, StoreError> {
        let conn = self.conn()?;
        let sql = format!("SELECT {COLUMNS} FROM coins ORDER BY created_at DESC, id DESC");
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([], read_row)?;

        let mut records = Vec::new();
        for row in rows {
            records.push(into_record(row?)?);
        }
        Ok(records)
    }

    async fn delete(&self, id: i64) -> Result<bool, StoreError> {
        let conn = self.conn()?;
        let n = conn.execute("DELETE FROM coins WHERE id = ?", [id])?;
        info!(id, deleted = n, "delete coin");
        Ok(n > 0)
    }
}

/// Column values as read; text columns are validated in [`into_record`].
struct RawRow {
    record: CoinRecord,
    condition: String,
    created_at: String,
}

fn read_row(row: &Row<'_>) -> duckdb::Result<RawRow> {
    let material: String = row.get(4)?;
    Ok(RawRow {
        record: CoinRecord {
            id: Some(row.get(0)?),
            name: row.get(1)?,
            year: row.get(2)?,
            country: row.get(3)?,
            material: Material::parse(&material),
            purity: row.get(5)?,
            mass_grams: row.get(6)?,
            diameter: row.get(7)?,
            mintage: row.get(8)?,
            condition: Condition::default(),
            collector_value: row.get(10)?,
            collector_value_max: row.get(11)?,
            collector_value_text: row.get(12)?,
            material_value: row.get(13)?,
            description: row.get(14)?,
            plausibility: row.get(15)?,
            confidence: row.get(16)?,
            verified: row.get(17)?,
            created_at: DateTime::<Utc>::MIN_UTC,
        },
        condition: row.get(9)?,
        created_at: row.get(18)?,
    })
}

fn into_record(raw: RawRow) -> Result<CoinRecord, StoreError> {
    let mut record = raw.record;
    record.condition = raw.condition.parse().map_err(StoreError::InvalidRow)?;
    record.created_at = DateTime::parse_from_rfc3339(&raw.created_at)
        .map_err(|e| StoreError::InvalidRow(format!("created_at {:?}: {e}", raw.created_at)))?
        .with_timezone(&Utc);
    Ok(record)
}
