//! Post-reconstruction removal of local part artifacts.
//!
//! Remote parts are never touched here: they remain the repository's copy of
//! the file. Nothing here fails the file either, since the output already
//! exists.

use std::path::Path;

use crate::parts::naming;

/// Remove `<dest>.parts/<name>.part<N>.txt` files left locally, then the
/// directory itself if nothing else is in it.
pub(crate) async fn remove_local_parts(dest: &Path) {
    let Some(name) = dest.file_name().map(|n| n.to_string_lossy().into_owned()) else {
        return;
    };
    let dir = dest.with_file_name(format!("{name}{}", naming::CONTAINER_SUFFIX));
    let mut entries = match tokio::fs::read_dir(&dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return,
        Err(e) => {
            tracing::warn!(
                path = %dir.display(),
                error = %e,
                "Could not read local part directory"
            );
            return;
        }
    };

    loop {
        let entry = match entries.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(
                    path = %dir.display(),
                    error = %e,
                    "Could not read local part directory"
                );
                break;
            }
        };
        let file_name = entry.file_name().to_string_lossy().into_owned();
        if naming::parse_part_index(&name, &file_name).is_none() {
            continue;
        }
        if let Err(e) = tokio::fs::remove_file(entry.path()).await {
            tracing::warn!(
                path = %entry.path().display(),
                error = %e,
                "Failed to remove local part"
            );
        }
    }

    // Fails while anything else remains, which is what we want.
    if tokio::fs::remove_dir(&dir).await.is_ok() {
        tracing::debug!(path = %dir.display(), "Removed local part directory");
    }
}
