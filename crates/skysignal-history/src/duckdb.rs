//! `DuckDB` connection pool and table-backed history series.

use std::fs;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use ::duckdb::{params, Connection};
use time::OffsetDateTime;

use crate::{validate_series, Coordinates, HistoryBackend, HistoryError, HistoryPoint};

const CREATE_HISTORY_TABLE: &str = "
CREATE TABLE IF NOT EXISTS history_points (
    series VARCHAR NOT NULL,
    observed_at_ns BIGINT NOT NULL,
    value DOUBLE NOT NULL,
    lat DOUBLE,
    lon DOUBLE
);
CREATE INDEX IF NOT EXISTS idx_history_points_series ON history_points (series, observed_at_ns);
";

struct PoolInner {
    db_path: PathBuf,
    max_pool_size: usize,
    idle: Mutex<Vec<Connection>>,
}

/// Small pool of reusable `DuckDB` connections.
#[derive(Clone)]
pub(crate) struct DuckDbConnectionManager {
    inner: Arc<PoolInner>,
}

impl DuckDbConnectionManager {
    pub(crate) fn new(path: impl Into<PathBuf>, max_pool_size: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                db_path: path.into(),
                max_pool_size: max_pool_size.max(1),
                idle: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Take an idle connection or open a new one.
    pub(crate) fn acquire(&self) -> Result<PooledConnection, HistoryError> {
        let pooled = self
            .inner
            .idle
            .lock()
            .map_err(|_| HistoryError::Poisoned(String::from("duckdb pool")))?
            .pop();

        let connection = match pooled {
            Some(connection) => connection,
            None => open_connection(self.inner.db_path.as_path())?,
        };

        Ok(PooledConnection {
            pool: Arc::clone(&self.inner),
            connection: Some(connection),
        })
    }

    pub(crate) fn db_path(&self) -> &Path {
        self.inner.db_path.as_path()
    }
}

/// A pooled connection that returns to the pool when dropped.
pub(crate) struct PooledConnection {
    pool: Arc<PoolInner>,
    connection: Option<Connection>,
}

impl Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Self::Target {
        self.connection
            .as_ref()
            .expect("pooled connection is only taken on drop")
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let Some(connection) = self.connection.take() else {
            return;
        };

        // A poisoned pool just stops recycling connections.
        let Ok(mut idle) = self.pool.idle.lock() else {
            return;
        };
        if idle.len() < self.pool.max_pool_size {
            idle.push(connection);
        }
    }
}

fn open_connection(path: &Path) -> Result<Connection, HistoryError> {
    let connection = Connection::open(path)?;
    connection.execute_batch("PRAGMA disable_progress_bar;")?;
    Ok(connection)
}

/// History series stored in a single `DuckDB` table.
#[derive(Clone)]
pub struct DuckDbBackend {
    manager: DuckDbConnectionManager,
}

impl DuckDbBackend {
    /// Open (creating if needed) the database at `path` and apply the schema.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, HistoryError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let backend = Self {
            manager: DuckDbConnectionManager::new(path, 2),
        };
        let connection = backend.manager.acquire()?;
        connection.execute_batch(CREATE_HISTORY_TABLE)?;
        drop(connection);
        Ok(backend)
    }

    pub fn db_path(&self) -> &Path {
        self.manager.db_path()
    }
}

impl HistoryBackend for DuckDbBackend {
    fn load(&self, series: &str) -> Result<Vec<HistoryPoint>, HistoryError> {
        validate_series(series)?;
        let connection = self.manager.acquire()?;
        let mut statement = connection.prepare(
            "SELECT observed_at_ns, value, lat, lon FROM history_points \
             WHERE series = ? ORDER BY observed_at_ns",
        )?;
        let rows = statement.query_map(params![series], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, f64>(1)?,
                row.get::<_, Option<f64>>(2)?,
                row.get::<_, Option<f64>>(3)?,
            ))
        })?;

        let mut points = Vec::new();
        for row in rows {
            let (observed_at_ns, value, lat, lon) = row?;
            let observed_at = OffsetDateTime::from_unix_timestamp_nanos(i128::from(observed_at_ns))
                .map_err(|error| HistoryError::InvalidData(error.to_string()))?;
            let location = match (lat, lon) {
                (Some(lat), Some(lon)) => Some(Coordinates { lat, lon }),
                _ => None,
            };
            points.push(HistoryPoint::new(observed_at, value, location));
        }
        Ok(points)
    }

    fn replace(&self, series: &str, points: &[HistoryPoint]) -> Result<(), HistoryError> {
        validate_series(series)?;
        let connection = self.manager.acquire()?;
        connection.execute_batch("BEGIN TRANSACTION")?;
        let result = (|| -> Result<(), HistoryError> {
            connection.execute("DELETE FROM history_points WHERE series = ?", params![series])?;
            let mut insert = connection.prepare(
                "INSERT INTO history_points (series, observed_at_ns, value, lat, lon) \
                 VALUES (?, ?, ?, ?, ?)",
            )?;
            for point in points {
                let observed_at_ns = i64::try_from(point.observed_at.unix_timestamp_nanos())
                    .map_err(|_| {
                        HistoryError::InvalidData(format!(
                            "timestamp {} is outside the storable range",
                            point.observed_at
                        ))
                    })?;
                let lat = point.location.map(|location| location.lat);
                let lon = point.location.map(|location| location.lon);
                insert.execute(params![series, observed_at_ns, point.value, lat, lon])?;
            }
            Ok(())
        })();

        match result {
            Ok(()) => {
                connection.execute_batch("COMMIT")?;
                Ok(())
            }
            Err(error) => {
                let _ = connection.execute_batch("ROLLBACK");
                Err(error)
            }
        }
    }

    fn describe(&self) -> String {
        format!("duckdb:{}", self.manager.db_path().display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn replace_overwrites_only_the_target_series() {
        let dir = tempfile::tempdir().expect("tempdir");
        let backend = DuckDbBackend::open(dir.path().join("history.duckdb")).expect("open");

        let radiation = vec![HistoryPoint::new(
            datetime!(2024-05-01 10:00 UTC),
            0.11,
            Some(Coordinates {
                lat: 54.71,
                lon: 20.51,
            }),
        )];
        let schumann = vec![
            HistoryPoint::new(datetime!(2024-05-01 10:00 UTC), 7.83, None),
            HistoryPoint::new(datetime!(2024-05-01 11:00 UTC), 7.91, None),
        ];

        backend.replace("radiation", &radiation).expect("replace");
        backend.replace("schumann", &schumann).expect("replace");
        backend.replace("schumann", &schumann[1..]).expect("replace");

        assert_eq!(backend.load("radiation").expect("load"), radiation);
        assert_eq!(backend.load("schumann").expect("load"), schumann[1..].to_vec());
    }

    #[test]
    fn reopening_the_database_keeps_points() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("history.duckdb");
        let points = vec![HistoryPoint::new(
            datetime!(2024-05-01 10:00:00.5 UTC),
            3.33,
            None,
        )];

        {
            let backend = DuckDbBackend::open(&path).expect("open");
            backend.replace("k_index", &points).expect("replace");
        }

        let reopened = DuckDbBackend::open(&path).expect("reopen");
        assert_eq!(reopened.load("k_index").expect("load"), points);
    }
}
