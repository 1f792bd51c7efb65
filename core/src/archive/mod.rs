use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::io::{Cursor, Read, Write};
use std::path::Path;
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;

/// Server-enforced package cap; checked client-side before upload.
pub const MAX_PACKAGE_SIZE: u64 = 4 * 1024 * 1024;

/// One regular file inside a package, path relative to the package root
/// using forward slashes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ManifestEntry {
    pub path: String,
    pub size: u64,
}

/// Walks `root` and lists every regular file. Directories are implicit,
/// symlinks are not followed and are skipped with a warning.
pub fn build_manifest(root: &Path) -> Result<Vec<ManifestEntry>> {
    let mut entries = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.with_context(|| format!("failed to walk {}", root.display()))?;
        if entry.depth() == 0 {
            continue;
        }
        let file_type = entry.file_type();
        if file_type.is_dir() {
            continue;
        }
        if !file_type.is_file() {
            tracing::warn!(path = %entry.path().display(), "skipping non-regular file");
            continue;
        }
        let rel = relative_slash_path(root, entry.path())?;
        let size = entry
            .metadata()
            .with_context(|| format!("failed to stat {}", entry.path().display()))?
            .len();
        entries.push(ManifestEntry { path: rel, size });
    }
    Ok(entries)
}

/// Zip-compresses every regular file under `root`. Entry paths are relative
/// to the root with no wrapping top-level component, in sorted order so the
/// same tree archives the same way every time.
pub fn archive_dir(root: &Path) -> Result<Vec<u8>> {
    let manifest = build_manifest(root)?;
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated)
        .compression_level(Some(9));

    for entry in &manifest {
        writer
            .start_file(entry.path.as_str(), options)
            .with_context(|| format!("failed to add {} to archive", entry.path))?;
        let full = root.join(&entry.path);
        let mut file = std::fs::File::open(&full)
            .with_context(|| format!("failed to open {}", full.display()))?;
        std::io::copy(&mut file, &mut writer)
            .with_context(|| format!("failed to compress {}", full.display()))?;
    }

    let cursor = writer.finish().context("failed to finalize archive")?;
    Ok(cursor.into_inner())
}

/// Inverse of [`archive_dir`]: unpacks `bytes` into `dest`, creating it if
/// absent. Any entry whose path would escape `dest` aborts the extraction
/// before a single file is written.
pub fn extract(bytes: &[u8], dest: &Path) -> Result<()> {
    let mut archive =
        zip::ZipArchive::new(Cursor::new(bytes)).context("downloaded package is not a valid archive")?;

    // Validate every entry up front so a hostile archive cannot place
    // anything before being rejected.
    for i in 0..archive.len() {
        let entry = archive.by_index(i)?;
        if entry.enclosed_name().is_none() {
            bail!(
                "archive entry \"{}\" escapes the destination directory",
                entry.name()
            );
        }
    }

    std::fs::create_dir_all(dest)
        .with_context(|| format!("failed to create {}", dest.display()))?;

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        let Some(rel) = entry.enclosed_name() else {
            bail!(
                "archive entry \"{}\" escapes the destination directory",
                entry.name()
            );
        };
        let out_path = dest.join(rel);
        if entry.is_dir() {
            std::fs::create_dir_all(&out_path)?;
            continue;
        }
        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut out = std::fs::File::create(&out_path)
            .with_context(|| format!("failed to create {}", out_path.display()))?;
        std::io::copy(&mut entry, &mut out)
            .with_context(|| format!("failed to extract {}", out_path.display()))?;
    }

    Ok(())
}

fn relative_slash_path(root: &Path, path: &Path) -> Result<String> {
    let rel = path
        .strip_prefix(root)
        .with_context(|| format!("{} is outside {}", path.display(), root.display()))?;
    let mut parts = Vec::new();
    for component in rel.components() {
        let part = component
            .as_os_str()
            .to_str()
            .with_context(|| format!("non-UTF-8 path component in {}", path.display()))?;
        parts.push(part);
    }
    Ok(parts.join("/"))
}
