//! Workspace filesystem operations: overrides, build scripts, archiving.

use std::fs::File;
use std::io;
use std::path::{Component, Path, PathBuf};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::PipelineError;

/// Validate an override name and return it as a relative path.
///
/// Rejects empty names, absolute paths and any `..` component.
pub fn safe_relative_path(name: &str) -> Option<PathBuf> {
    let path = Path::new(name);
    let mut clean = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    if clean.as_os_str().is_empty() {
        None
    } else {
        Some(clean)
    }
}

/// List every file below `root` as a `/`-separated path relative to `root`,
/// sorted. A missing root yields an empty list.
pub async fn list_files(root: &Path) -> io::Result<Vec<String>> {
    let mut files = Vec::new();
    match tokio::fs::metadata(root).await {
        Ok(meta) if meta.is_dir() => collect_files(root, root, &mut files).await?,
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    files.sort();
    Ok(files)
}

#[async_recursion::async_recursion]
async fn collect_files(base: &Path, current: &Path, files: &mut Vec<String>) -> io::Result<()> {
    let mut entries = tokio::fs::read_dir(current).await?;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let file_type = entry.file_type().await?;

        if file_type.is_dir() {
            collect_files(base, &path, files).await?;
        } else if file_type.is_file() {
            if let Ok(relative) = path.strip_prefix(base) {
                let parts: Vec<String> = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect();
                files.push(parts.join("/"));
            }
        }
    }
    Ok(())
}

/// Write an override file into the workspace, creating parent directories.
pub async fn write_override(workspace: &Path, name: &str, data: &[u8]) -> Result<(), PipelineError> {
    let relative =
        safe_relative_path(name).ok_or_else(|| PipelineError::UnsafeOverride(name.to_string()))?;
    let dest = workspace.join(relative);
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(&dest, data).await?;
    Ok(())
}

/// First candidate that exists as a regular file in the workspace root.
pub async fn find_build_script(workspace: &Path, candidates: &[String]) -> Option<PathBuf> {
    for candidate in candidates {
        let path = workspace.join(candidate);
        if let Ok(meta) = tokio::fs::metadata(&path).await {
            if meta.is_file() {
                return Some(path);
            }
        }
    }
    None
}

/// Add the owner execute bit.
#[cfg(unix)]
pub async fn make_executable(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let mut permissions = tokio::fs::metadata(path).await?.permissions();
    permissions.set_mode(permissions.mode() | 0o100);
    tokio::fs::set_permissions(path, permissions).await
}

#[cfg(not(unix))]
pub async fn make_executable(_path: &Path) -> io::Result<()> {
    Ok(())
}

/// Remove the `.git` directory. Returns whether there was one.
pub async fn remove_git_folder(workspace: &Path) -> io::Result<bool> {
    match tokio::fs::remove_dir_all(workspace.join(".git")).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// Remove a directory tree if it exists.
pub async fn remove_dir_if_exists(path: &Path) -> io::Result<()> {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Remove a file if it exists.
pub async fn remove_file_if_exists(path: &Path) -> io::Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Zip `workspace` into `artifact`, then delete the workspace.
pub async fn archive_workspace(workspace: &Path, artifact: &Path) -> Result<(), PipelineError> {
    let src = workspace.to_path_buf();
    let dest = artifact.to_path_buf();
    tokio::task::spawn_blocking(move || zip_directory(&src, &dest))
        .await
        .map_err(|e| PipelineError::Archive(e.to_string()))??;
    tokio::fs::remove_dir_all(workspace).await?;
    Ok(())
}

fn zip_directory(src: &Path, dest: &Path) -> Result<(), PipelineError> {
    let archive = |e: zip::result::ZipError| PipelineError::Archive(e.to_string());

    let mut zip = ZipWriter::new(File::create(dest)?);

    let mut pending = vec![src.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let mut entries = std::fs::read_dir(&dir)?.collect::<io::Result<Vec<_>>>()?;
        entries.sort_by_key(|e| e.file_name());

        for entry in entries {
            let path = entry.path();
            let Ok(relative) = path.strip_prefix(src) else {
                continue;
            };
            let name = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/");
            let meta = std::fs::symlink_metadata(&path)?;
            let options = SimpleFileOptions::default()
                .compression_method(CompressionMethod::Deflated)
                .unix_permissions(unix_mode(&meta));

            if meta.file_type().is_symlink() {
                let target = std::fs::read_link(&path)?;
                zip.add_symlink(name, target.to_string_lossy(), options)
                    .map_err(archive)?;
            } else if meta.is_dir() {
                zip.add_directory(name, options).map_err(archive)?;
                pending.push(path);
            } else if meta.is_file() {
                zip.start_file(name, options).map_err(archive)?;
                io::copy(&mut File::open(&path)?, &mut zip)?;
            }
        }
    }

    zip.finish().map_err(archive)?;
    Ok(())
}

#[cfg(unix)]
fn unix_mode(meta: &std::fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn unix_mode(meta: &std::fs::Metadata) -> u32 {
    if meta.is_dir() { 0o755 } else { 0o644 }
}
