//! Append-only archive of published blocks.
//!
//! One text file per UTC hour, named `YYYYMMDDHH.txt` after the hour of the bucket
//! start. Each published block becomes one tab-separated line in wire order.
//!
//! ```text
//! archive/
//!   2024031508.txt
//!   2024031509.txt
//! ```

use crate::error::AppResult;
use crate::pipeline::acquisition::Timestamp;
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;

/// Hourly flat-file sink.
#[derive(Debug, Clone)]
pub struct HourlyArchive {
    dir: PathBuf,
}

impl HourlyArchive {
    /// Archive rooted at `dir`. The directory is created on first write.
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    /// Archive directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File name for the hour containing `time`.
    pub fn file_name(time: Timestamp) -> String {
        format!("{}.txt", time.to_utc().format("%Y%m%d%H"))
    }

    /// Full path of the file `time` is archived in.
    pub fn path_for(&self, time: Timestamp) -> PathBuf {
        self.dir.join(Self::file_name(time))
    }

    /// Append one line holding `values` to the file for `time`.
    pub async fn append(&self, time: Timestamp, values: &[f64]) -> AppResult<PathBuf> {
        fs::create_dir_all(&self.dir).await?;

        let path = self.path_for(time);
        let mut line = values
            .iter()
            .map(f64::to_string)
            .collect::<Vec<_>>()
            .join("\t");
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(path)
    }
}
