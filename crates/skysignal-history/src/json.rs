//! One JSON document per series.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use fd_lock::RwLock;
use tempfile::NamedTempFile;

use crate::{validate_series, HistoryBackend, HistoryError, HistoryPoint};

/// Stores each series as `<dir>/<series>.json`, an array of points.
///
/// Writes go to a uniquely named sibling temporary file that is renamed
/// over the target, so a crash mid-write leaves the previous contents
/// intact. Read-modify-write sections hold an advisory lock on
/// `<dir>/.<series>.lock`, which serializes separate processes sharing the
/// directory.
#[derive(Debug, Clone)]
pub struct JsonFileBackend {
    dir: PathBuf,
}

impl JsonFileBackend {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        self.dir.as_path()
    }

    pub fn series_path(&self, series: &str) -> PathBuf {
        self.dir.join(format!("{series}.json"))
    }

    fn lock_path(&self, series: &str) -> PathBuf {
        self.dir.join(format!(".{series}.lock"))
    }
}

impl HistoryBackend for JsonFileBackend {
    fn load(&self, series: &str) -> Result<Vec<HistoryPoint>, HistoryError> {
        validate_series(series)?;
        let path = self.series_path(series);
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(error) => return Err(error.into()),
        };

        if text.trim().is_empty() {
            return Ok(Vec::new());
        }

        serde_json::from_str(&text).map_err(|error| HistoryError::Corrupt {
            series: series.to_owned(),
            reason: error.to_string(),
        })
    }

    fn replace(&self, series: &str, points: &[HistoryPoint]) -> Result<(), HistoryError> {
        validate_series(series)?;
        fs::create_dir_all(&self.dir)?;

        let body = serde_json::to_vec_pretty(points)
            .map_err(|error| HistoryError::InvalidData(error.to_string()))?;
        let mut staging = NamedTempFile::new_in(&self.dir)?;
        staging.write_all(&body)?;
        staging.as_file().sync_all()?;
        staging
            .persist(self.series_path(series))
            .map_err(|error| HistoryError::Io(error.error))?;
        Ok(())
    }

    fn exclusive(
        &self,
        series: &str,
        work: &mut dyn FnMut() -> Result<(), HistoryError>,
    ) -> Result<(), HistoryError> {
        validate_series(series)?;
        fs::create_dir_all(&self.dir)?;
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(self.lock_path(series))?;

        let mut lock = RwLock::new(file);
        let _guard = lock.write().map_err(|error| HistoryError::Lock {
            series: series.to_owned(),
            reason: error.to_string(),
        })?;
        work()
    }

    fn describe(&self) -> String {
        format!("json:{}", self.dir.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Coordinates;
    use time::macros::datetime;

    #[test]
    fn missing_file_loads_as_empty_series() {
        let dir = tempfile::tempdir().expect("tempdir");
        let backend = JsonFileBackend::new(dir.path());
        assert!(backend.load("radiation").expect("load").is_empty());
    }

    #[test]
    fn replace_then_load_keeps_points_and_locations() {
        let dir = tempfile::tempdir().expect("tempdir");
        let backend = JsonFileBackend::new(dir.path().join("nested"));
        let points = vec![
            HistoryPoint::new(
                datetime!(2024-05-01 10:00 UTC),
                0.112,
                Some(Coordinates {
                    lat: 34.707,
                    lon: 33.022,
                }),
            ),
            HistoryPoint::new(datetime!(2024-05-01 11:00 UTC), 0.118, None),
        ];

        backend.replace("radiation", &points).expect("replace");
        let loaded = backend.load("radiation").expect("load");

        assert_eq!(loaded, points);
        let leftovers: Vec<String> = fs::read_dir(dir.path().join("nested"))
            .expect("read dir")
            .map(|entry| entry.expect("entry").file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(leftovers, ["radiation.json"]);
    }

    #[test]
    fn exclusive_creates_lock_file_and_runs_work_once() {
        let dir = tempfile::tempdir().expect("tempdir");
        let backend = JsonFileBackend::new(dir.path().join("fresh"));
        let mut calls = 0;

        backend
            .exclusive("k_index", &mut || -> Result<(), HistoryError> {
                calls += 1;
                Ok(())
            })
            .expect("locked section");

        assert_eq!(calls, 1);
        assert!(dir.path().join("fresh/.k_index.lock").exists());
    }

    #[test]
    fn garbage_file_is_reported_as_corrupt() {
        let dir = tempfile::tempdir().expect("tempdir");
        let backend = JsonFileBackend::new(dir.path());
        fs::write(backend.series_path("schumann"), "{not json").expect("write");

        let err = backend.load("schumann").expect_err("must fail");
        assert!(matches!(err, HistoryError::Corrupt { .. }));
    }
}
