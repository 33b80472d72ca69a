use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

/// Replace `path` with `content` all-or-nothing.
///
/// Writes a sibling `.tmp` file, syncs it, then renames it over the target, so
/// an interrupted invocation leaves either the old file or the new one.
pub async fn write_atomic(path: &Path, content: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).await?;
    }
    let tmp_path = tmp_path_for(path);

    fs::write(&tmp_path, content).await?;

    let sync_target = tmp_path.clone();
    match tokio::task::spawn_blocking(move || {
        std::fs::File::open(&sync_target).and_then(|file| file.sync_all())
    })
    .await
    {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, path = %tmp_path.display(), "Failed to sync temp file"),
        Err(e) => warn!(error = %e, path = %tmp_path.display(), "Failed to sync temp file"),
    }

    if let Err(e) = fs::rename(&tmp_path, path).await {
        let _ = fs::remove_file(&tmp_path).await;
        return Err(e);
    }

    debug!(path = %path.display(), "Atomic write completed");
    Ok(())
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(std::ffi::OsStr::to_os_string)
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
