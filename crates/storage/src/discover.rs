//! Source file discovery.
//!
//! Lists the eligible source images directly inside a directory. Discovery is
//! deliberately shallow: sub-directories are never descended into.

use crate::error::{ErrorKind, Result};
use async_stream::stream;
use futures::{Stream, TryStreamExt};
use std::path::{Path, PathBuf};
use tokio::fs::{self, DirEntry};

enum Entry {
    Eligible(PathBuf),
    Skip,
}

/// Whether the final component of `path` starts with a dot.
pub fn is_hidden(path: &Path) -> bool {
    path.file_name().is_some_and(|name| name.as_encoded_bytes().starts_with(b"."))
}

fn has_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| extensions.iter().any(|allowed| allowed.eq_ignore_ascii_case(ext)))
}

async fn process_entry(entry: DirEntry, extensions: &[String]) -> Result<Entry> {
    let path = entry.path();
    if is_hidden(&path) || !has_extension(&path, extensions) {
        return Ok(Entry::Skip);
    }
    // Follow symlinks: a link to a RAW file is still a RAW file.
    let metadata = match fs::metadata(&path).await {
        Ok(metadata) => metadata,
        // Note: silently drop what is most likely a broken symlink.
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Entry::Skip),
        Err(e) => exn::bail!(ErrorKind::from_io(e, &path)),
    };
    match metadata.is_file() {
        true => Ok(Entry::Eligible(path)),
        false => Ok(Entry::Skip),
    }
}

/// Streams every regular, non-hidden file directly inside `directory` whose
/// extension (case-insensitively) matches one of `extensions`.
///
/// A missing or unreadable directory yields a single error and ends the
/// stream; a failure on an individual entry is yielded without ending it.
pub fn discover_stream<'a>(
    directory: &'a Path,
    extensions: &[impl AsRef<str>],
) -> impl Stream<Item = Result<PathBuf>> + Send + 'a {
    let extensions: Vec<String> =
        extensions.iter().map(|ext| ext.as_ref().trim_start_matches('.').to_string()).collect();
    stream! {
        let mut entries = match fs::read_dir(directory).await {
            Ok(entries) => entries,
            Err(e) => {
                yield Err(exn::Exn::from(ErrorKind::from_io(e, directory)));
                return;
            },
        };
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => { yield Err(exn::Exn::from(ErrorKind::from_io(e, directory))); continue; },
            };
            match process_entry(entry, &extensions).await {
                Ok(Entry::Eligible(path)) => yield Ok(path),
                Ok(Entry::Skip) => {},
                Err(e) => yield Err(e),
            }
        }
    }
}

/// Collects [`discover_stream`] into a list sorted by path, so batch runs
/// process files in a predictable order.
pub async fn discover(directory: &Path, extensions: &[impl AsRef<str>]) -> Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = discover_stream(directory, extensions).try_collect().await?;
    files.sort();
    Ok(files)
}
