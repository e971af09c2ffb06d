//! The backup job description shared by the runners.

use chrono::NaiveDateTime;
use std::path::{Path, PathBuf};

/// An immutable description of one backup run: where to read, where to
/// write, and the block size forwarded to the imaging command.
#[derive(Clone, Debug)]
pub struct BackupJob {
    pub source_device: PathBuf,
    pub output_file: PathBuf,
    pub block_size: String,
}

impl BackupJob {
    pub fn new(
        source_device: impl Into<PathBuf>,
        output_file: impl Into<PathBuf>,
        block_size: impl Into<String>,
    ) -> Self {
        Self {
            source_device: source_device.into(),
            output_file: output_file.into(),
            block_size: block_size.into(),
        }
    }

    /// Where the shrunk image goes: a trailing `.img` becomes
    /// `_shrunk.img`, anything else gets `_shrunk` appended. Always a
    /// second file next to the original, never an in-place shrink.
    pub fn shrunk_file(&self) -> PathBuf {
        let name = self.output_file.to_string_lossy();
        match name.strip_suffix(".img") {
            Some(stem) => PathBuf::from(format!("{stem}_shrunk.img")),
            None => PathBuf::from(format!("{name}_shrunk")),
        }
    }
}

fn default_output_file_at(source_device: &Path, now: NaiveDateTime) -> PathBuf {
    let device_name = source_device
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "device".to_string());
    PathBuf::from(format!(
        "backup_{device_name}_{}.img",
        now.format("%Y%m%d_%H%M%S")
    ))
}

/// The default output filename for a device:
/// `backup_<device>_<YYYYMMDD_HHMMSS>.img`, timestamped with local time.
pub fn default_output_file(source_device: &Path) -> PathBuf {
    default_output_file_at(source_device, chrono::Local::now().naive_local())
}
