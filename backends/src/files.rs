use packhaul_core::filter::glob_match_any;
use packhaul_core::pool::for_each_limited;
use packhaul_core::{CancelToken, PackageDescriptor, Result};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use walkdir::WalkDir;

const COPY_CONCURRENCY: usize = 8;

/// One file selected for backup, addressed relative to the package
/// root.
#[derive(Debug, Clone)]
pub struct MatchedFile {
    pub relative: PathBuf,
    pub size: u64,
}

/// Walks the package working path and applies its ordered
/// include/exclude rules. Includes default to everything; excludes win
/// over includes. Patterns match the slash-separated relative path.
pub fn matched_files(root: &Path, package: &PackageDescriptor) -> Result<Vec<MatchedFile>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry.map_err(|e| std::io::Error::other(e))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(root)
            .unwrap_or(entry.path())
            .to_path_buf();
        let rel_str = path_pattern_key(&relative);
        if !package.include.is_empty() && !glob_match_any(&package.include, &rel_str) {
            continue;
        }
        if glob_match_any(&package.exclude, &rel_str) {
            continue;
        }
        files.push(MatchedFile {
            size: entry.metadata().map(|m| m.len()).unwrap_or(0),
            relative,
        });
    }
    files.sort_by(|a, b| a.relative.cmp(&b.relative));
    Ok(files)
}

/// Normalized, slash-separated form used for glob matching.
pub fn path_pattern_key(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Copies a set of matched files from one root into another through
/// the bounded worker pool, creating parent directories as needed.
pub async fn copy_matched(
    src_root: &Path,
    dst_root: &Path,
    files: &[MatchedFile],
    token: &CancelToken,
) -> Result<u64> {
    let bytes = AtomicU64::new(0);
    let bytes_ref = &bytes;
    for_each_limited(
        files.to_vec(),
        COPY_CONCURRENCY,
        true,
        token,
        |file, item_token| {
            let src = src_root.join(&file.relative);
            let dst = dst_root.join(&file.relative);
            async move {
                item_token.check()?;
                if let Some(parent) = dst.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                bytes_ref.fetch_add(tokio::fs::copy(&src, &dst).await?, Ordering::Relaxed);
                Ok(())
            }
        },
    )
    .await?;
    Ok(bytes.load(Ordering::Relaxed))
}
