//! Generation-numbered snapshot storage.
//!
//! Every `create` writes a new table `<City>_forecast_<generation>` and records
//! it in `snapshot_catalog`; catalog insertion order is the creation order used
//! by `latest`. Side tables hang off a snapshot as
//! `<City>_forecast_<generation>_<name>`.

use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, Transaction, params};
use serde::Serialize;
use std::path::Path;

use crate::{
    city::City,
    error::ForecastError,
    model::{CovariateSeries, Field, Observation, Snapshot, TIME_COLUMN, format_timestamp, parse_timestamp},
};

/// Identifies one stored snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SnapshotRef {
    pub city: City,
    pub generation: u32,
}

impl SnapshotRef {
    pub fn table_name(&self) -> String {
        snapshot_table(self.city, self.generation)
    }
}

pub fn snapshot_table(city: City, generation: u32) -> String {
    format!("{}_forecast_{}", city.as_str(), generation)
}

/// Durable per-city snapshot storage. One writer, many readers.
pub trait DatasetStore: Send + Sync {
    /// Persist `snapshot` under the next unused generation for its city.
    fn create(&self, snapshot: &Snapshot) -> Result<SnapshotRef, ForecastError>;

    /// The most recently created snapshot across all cities.
    fn latest(&self) -> Result<SnapshotRef, ForecastError>;

    /// The most recently created snapshot of one city, if any.
    fn latest_for(&self, city: City) -> Result<Option<SnapshotRef>, ForecastError>;

    /// Generations stored for `city`, ascending.
    fn generations(&self, city: City) -> Result<Vec<u32>, ForecastError>;

    fn read(&self, city: City, generation: u32) -> Result<Snapshot, ForecastError>;

    /// Atomically overwrite the contents of an existing snapshot.
    fn replace(&self, city: City, generation: u32, snapshot: &Snapshot)
    -> Result<(), ForecastError>;

    /// Create side table `name` for a snapshot unless it already exists.
    /// Returns whether the table was created.
    fn create_or_skip(
        &self,
        city: City,
        generation: u32,
        name: &str,
        rows: &CovariateSeries,
    ) -> Result<bool, ForecastError>;

    /// Drop and rewrite side table `name`.
    fn replace_side_table(
        &self,
        city: City,
        generation: u32,
        name: &str,
        rows: &CovariateSeries,
    ) -> Result<(), ForecastError>;

    fn read_side_table(
        &self,
        city: City,
        generation: u32,
        name: &str,
    ) -> Result<Option<CovariateSeries>, ForecastError>;
}

/// SQLite-backed `DatasetStore`.
pub struct SqliteDatasetStore {
    conn: Mutex<Connection>,
}

impl SqliteDatasetStore {
    /// Open (or create) the database at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, ForecastError> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        Self::with_connection(conn)
    }

    /// A throwaway store, used by tests and dry runs.
    pub fn in_memory() -> Result<Self, ForecastError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, ForecastError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS snapshot_catalog (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                city TEXT NOT NULL,
                generation INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                UNIQUE (city, generation)
            );
            "#,
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn table_exists(conn: &Connection, table: &str) -> Result<bool, ForecastError> {
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            params![table],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn is_cataloged(conn: &Connection, city: City, generation: u32) -> Result<bool, ForecastError> {
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM snapshot_catalog WHERE city = ?1 AND generation = ?2",
            params![city.as_str(), generation],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn ensure_cataloged(conn: &Connection, city: City, generation: u32) -> Result<(), ForecastError> {
        if Self::is_cataloged(conn, city, generation)? {
            Ok(())
        } else {
            Err(ForecastError::UnknownSnapshot {
                city: city.to_string(),
                generation,
            })
        }
    }

    fn columns_of(conn: &Connection, table: &str) -> Result<Vec<String>, ForecastError> {
        let mut stmt = conn.prepare(&format!("PRAGMA table_info(\"{table}\")"))?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(names)
    }

    fn check_schema(conn: &Connection, table: &str, expected: &[&str]) -> Result<(), ForecastError> {
        let found = Self::columns_of(conn, table)?;
        if found.iter().map(String::as_str).ne(expected.iter().copied()) {
            return Err(ForecastError::SchemaMismatch {
                table: table.to_string(),
                expected: expected.join(", "),
                found: found.join(", "),
            });
        }
        Ok(())
    }

    fn create_snapshot_table(tx: &Transaction<'_>, table: &str) -> Result<(), ForecastError> {
        let [t, h, p, w] = snapshot_value_columns();
        tx.execute_batch(&format!(
            "CREATE TABLE \"{table}\" (
                {TIME_COLUMN} TEXT PRIMARY KEY,
                {t} REAL,
                {h} REAL,
                {p} REAL,
                {w} REAL
            );"
        ))?;
        Ok(())
    }

    fn insert_observations(
        tx: &Transaction<'_>,
        table: &str,
        observations: &[Observation],
    ) -> Result<(), ForecastError> {
        let [t, h, p, w] = snapshot_value_columns();
        let mut stmt = tx.prepare(&format!(
            "INSERT INTO \"{table}\" ({TIME_COLUMN}, {t}, {h}, {p}, {w}) VALUES (?1, ?2, ?3, ?4, ?5)"
        ))?;
        for o in observations {
            stmt.execute(params![
                format_timestamp(&o.time),
                o.temperature,
                o.relative_humidity,
                o.precipitation_probability,
                o.wind_speed,
            ])?;
        }
        Ok(())
    }

    fn write_side_table(
        tx: &Transaction<'_>,
        table: &str,
        rows: &CovariateSeries,
    ) -> Result<(), ForecastError> {
        let column = validate_identifier(&rows.column)?;
        tx.execute_batch(&format!(
            "CREATE TABLE \"{table}\" ({TIME_COLUMN} TEXT PRIMARY KEY, {column} REAL);"
        ))?;
        let mut stmt = tx.prepare(&format!(
            "INSERT INTO \"{table}\" ({TIME_COLUMN}, {column}) VALUES (?1, ?2)"
        ))?;
        for (time, value) in &rows.points {
            stmt.execute(params![format_timestamp(time), value])?;
        }
        Ok(())
    }
}

fn snapshot_value_columns() -> [&'static str; 4] {
    [
        Field::Temperature.column(),
        Field::RelativeHumidity.column(),
        Field::PrecipitationProbability.column(),
        Field::WindSpeed.column(),
    ]
}

fn snapshot_schema() -> Vec<&'static str> {
    let mut columns = vec![TIME_COLUMN];
    columns.extend(snapshot_value_columns());
    columns
}

fn validate_identifier(name: &str) -> Result<&str, ForecastError> {
    let valid = !name.is_empty()
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !name.starts_with(|c: char| c.is_ascii_digit());
    if valid {
        Ok(name)
    } else {
        Err(ForecastError::InvalidTableName(name.to_string()))
    }
}

fn side_table(city: City, generation: u32, name: &str) -> Result<String, ForecastError> {
    Ok(format!(
        "{}_{}",
        snapshot_table(city, generation),
        validate_identifier(name)?
    ))
}

fn ensure_same_city(city: City, snapshot: &Snapshot) -> Result<(), ForecastError> {
    if snapshot.city() != city {
        return Err(ForecastError::CityMismatch {
            base: city.to_string(),
            incoming: snapshot.city().to_string(),
        });
    }
    Ok(())
}

fn parse_city(name: String) -> Result<City, ForecastError> {
    City::try_from(name.as_str())
}

impl DatasetStore for SqliteDatasetStore {
    fn create(&self, snapshot: &Snapshot) -> Result<SnapshotRef, ForecastError> {
        let city = snapshot.city();
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let max: Option<u32> = tx.query_row(
            "SELECT MAX(generation) FROM snapshot_catalog WHERE city = ?1",
            params![city.as_str()],
            |row| row.get(0),
        )?;
        let mut generation = max.unwrap_or(0) + 1;
        // never reuse a table left behind outside the catalog
        while Self::table_exists(&tx, &snapshot_table(city, generation))? {
            generation += 1;
        }

        let table = snapshot_table(city, generation);
        Self::create_snapshot_table(&tx, &table)?;
        Self::insert_observations(&tx, &table, snapshot.observations())?;
        tx.execute(
            "INSERT INTO snapshot_catalog (city, generation, created_at) VALUES (?1, ?2, ?3)",
            params![city.as_str(), generation, Utc::now().to_rfc3339()],
        )?;
        tx.commit()?;

        tracing::debug!(table = %table, rows = snapshot.len(), "created snapshot table");
        Ok(SnapshotRef { city, generation })
    }

    fn latest(&self) -> Result<SnapshotRef, ForecastError> {
        let conn = self.conn.lock();
        let row: Option<(String, u32)> = conn
            .query_row(
                "SELECT city, generation FROM snapshot_catalog ORDER BY seq DESC LIMIT 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let (city, generation) = row.ok_or(ForecastError::NoSnapshotAvailable)?;
        Ok(SnapshotRef {
            city: parse_city(city)?,
            generation,
        })
    }

    fn latest_for(&self, city: City) -> Result<Option<SnapshotRef>, ForecastError> {
        let conn = self.conn.lock();
        let generation: Option<u32> = conn
            .query_row(
                "SELECT generation FROM snapshot_catalog WHERE city = ?1 ORDER BY seq DESC LIMIT 1",
                params![city.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(generation.map(|generation| SnapshotRef { city, generation }))
    }

    fn generations(&self, city: City) -> Result<Vec<u32>, ForecastError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT generation FROM snapshot_catalog WHERE city = ?1 ORDER BY generation",
        )?;
        let generations = stmt
            .query_map(params![city.as_str()], |row| row.get(0))?
            .collect::<Result<Vec<u32>, _>>()?;
        Ok(generations)
    }

    fn read(&self, city: City, generation: u32) -> Result<Snapshot, ForecastError> {
        let conn = self.conn.lock();
        Self::ensure_cataloged(&conn, city, generation)?;

        let table = snapshot_table(city, generation);
        Self::check_schema(&conn, &table, &snapshot_schema())?;

        let [t, h, p, w] = snapshot_value_columns();
        let mut stmt = conn.prepare(&format!(
            "SELECT {TIME_COLUMN}, {t}, {h}, {p}, {w} FROM \"{table}\" ORDER BY {TIME_COLUMN}"
        ))?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<f64>>(1)?,
                    row.get::<_, Option<f64>>(2)?,
                    row.get::<_, Option<f64>>(3)?,
                    row.get::<_, Option<f64>>(4)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let observations = rows
            .into_iter()
            .map(|(time, temperature, relative_humidity, precipitation_probability, wind_speed)| {
                Ok(Observation {
                    time: parse_timestamp(&time)?,
                    temperature,
                    relative_humidity,
                    precipitation_probability,
                    wind_speed,
                })
            })
            .collect::<Result<Vec<_>, ForecastError>>()?;

        Snapshot::new(city, observations)
    }

    fn replace(
        &self,
        city: City,
        generation: u32,
        snapshot: &Snapshot,
    ) -> Result<(), ForecastError> {
        ensure_same_city(city, snapshot)?;

        let mut conn = self.conn.lock();
        Self::ensure_cataloged(&conn, city, generation)?;
        let table = snapshot_table(city, generation);
        Self::check_schema(&conn, &table, &snapshot_schema())?;

        let tx = conn.transaction()?;
        tx.execute(&format!("DELETE FROM \"{table}\""), [])?;
        Self::insert_observations(&tx, &table, snapshot.observations())?;
        tx.commit()?;

        tracing::debug!(table = %table, rows = snapshot.len(), "replaced snapshot contents");
        Ok(())
    }

    fn create_or_skip(
        &self,
        city: City,
        generation: u32,
        name: &str,
        rows: &CovariateSeries,
    ) -> Result<bool, ForecastError> {
        let mut conn = self.conn.lock();
        Self::ensure_cataloged(&conn, city, generation)?;
        let table = side_table(city, generation, name)?;

        let tx = conn.transaction()?;
        if Self::table_exists(&tx, &table)? {
            tracing::debug!(table = %table, "side table already exists");
            return Ok(false);
        }
        Self::write_side_table(&tx, &table, rows)?;
        tx.commit()?;

        tracing::info!(table = %table, rows = rows.len(), "created side table");
        Ok(true)
    }

    fn replace_side_table(
        &self,
        city: City,
        generation: u32,
        name: &str,
        rows: &CovariateSeries,
    ) -> Result<(), ForecastError> {
        let mut conn = self.conn.lock();
        Self::ensure_cataloged(&conn, city, generation)?;
        let table = side_table(city, generation, name)?;

        let tx = conn.transaction()?;
        tx.execute_batch(&format!("DROP TABLE IF EXISTS \"{table}\";"))?;
        Self::write_side_table(&tx, &table, rows)?;
        tx.commit()?;

        tracing::info!(table = %table, rows = rows.len(), "rewrote side table");
        Ok(())
    }

    fn read_side_table(
        &self,
        city: City,
        generation: u32,
        name: &str,
    ) -> Result<Option<CovariateSeries>, ForecastError> {
        let conn = self.conn.lock();
        let table = side_table(city, generation, name)?;
        if !Self::table_exists(&conn, &table)? {
            return Ok(None);
        }

        let columns = Self::columns_of(&conn, &table)?;
        let [time, column] = columns.as_slice() else {
            return Err(ForecastError::SchemaMismatch {
                table,
                expected: format!("{TIME_COLUMN}, <value>"),
                found: columns.join(", "),
            });
        };
        if time != TIME_COLUMN {
            return Err(ForecastError::SchemaMismatch {
                table,
                expected: format!("{TIME_COLUMN}, {column}"),
                found: columns.join(", "),
            });
        }

        let mut stmt = conn.prepare(&format!(
            "SELECT {TIME_COLUMN}, {column} FROM \"{table}\" ORDER BY {TIME_COLUMN}"
        ))?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, Option<f64>>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let points = rows
            .into_iter()
            .map(|(t, v)| Ok((parse_timestamp(&t)?, v)))
            .collect::<Result<Vec<_>, ForecastError>>()?;

        Ok(Some(CovariateSeries {
            city,
            column: column.clone(),
            points,
        }))
    }
}
