//! Temp-file-then-rename writes for reconstructed and pulled files.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;

/// Suffix of in-flight output files. The sync walk ignores them.
pub const TEMP_SUFFIX: &str = ".gitsync.tmp";

/// `.<name>.gitsync.tmp` next to `dest`.
pub fn temp_path_for(dest: &Path) -> PathBuf {
    let name = dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    dest.with_file_name(format!(".{name}{TEMP_SUFFIX}"))
}

pub fn is_temp_file(name: &OsStr) -> bool {
    let name = name.to_string_lossy();
    name.starts_with('.') && name.ends_with(TEMP_SUFFIX)
}

/// Write `data` to `dest` so readers see either the old file or the complete
/// new one. Parent directories are created as needed.
pub async fn write_atomic(dest: &Path, data: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).await?;
    }
    let temp = temp_path_for(dest);
    let result = write_then_rename(&temp, dest, data).await;
    if result.is_err() {
        let _ = fs::remove_file(&temp).await;
    }
    result
}

async fn write_then_rename(temp: &Path, dest: &Path, data: &[u8]) -> std::io::Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(temp)
        .await?;
    file.write_all(data).await?;
    file.flush().await?;
    file.sync_all().await?;
    drop(file);
    fs::rename(temp, dest).await
}
