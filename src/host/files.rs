//! Local file helpers built on `cap-std` directory handles.

use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};

use super::HostError;

fn split(path: &Utf8Path) -> Result<(&Utf8Path, &str), HostError> {
    let parent = match path.parent() {
        Some(dir) if !dir.as_str().is_empty() => dir,
        _ => Utf8Path::new("."),
    };
    let file_name = path.file_name().ok_or_else(|| HostError::Io {
        context: format!("resolving {path}"),
        message: String::from("path is missing a file name"),
    })?;
    Ok((parent, file_name))
}

fn open_parent(path: &Utf8Path, create: bool) -> Result<(Dir, &str), HostError> {
    let (parent, file_name) = split(path)?;
    if create {
        Dir::create_ambient_dir_all(parent, ambient_authority())
            .map_err(|err| HostError::io(format!("creating {parent}"), &err))?;
    }
    let dir = Dir::open_ambient_dir(parent, ambient_authority())
        .map_err(|err| HostError::io(format!("opening {parent}"), &err))?;
    Ok((dir, file_name))
}

/// Copies one local file to another path, creating parent directories.
///
/// # Errors
///
/// Returns [`HostError::Io`] when either side cannot be accessed.
pub fn copy_file(from: &Utf8Path, to: &Utf8Path) -> Result<(), HostError> {
    let (source_dir, source_name) = open_parent(from, false)?;
    let (target_dir, target_name) = open_parent(to, true)?;
    source_dir
        .copy(source_name, &target_dir, target_name)
        .map(|_| ())
        .map_err(|err| HostError::io(format!("copying {from} to {to}"), &err))
}

/// Reads a local file into memory.
///
/// # Errors
///
/// Returns [`HostError::Io`] when the file cannot be read.
pub fn read(path: &Utf8Path) -> Result<Vec<u8>, HostError> {
    let (dir, name) = open_parent(path, false)?;
    dir.read(name)
        .map_err(|err| HostError::io(format!("reading {path}"), &err))
}

/// Writes bytes to a local file, creating parent directories.
///
/// # Errors
///
/// Returns [`HostError::Io`] when the file cannot be written.
pub fn write(path: &Utf8Path, contents: &[u8]) -> Result<(), HostError> {
    let (dir, name) = open_parent(path, true)?;
    dir.write(name, contents)
        .map_err(|err| HostError::io(format!("writing {path}"), &err))
}

/// Opens a local file for reading.
///
/// # Errors
///
/// Returns [`HostError::Io`] when the file cannot be opened.
pub fn open(path: &Utf8Path) -> Result<cap_std::fs_utf8::File, HostError> {
    let (dir, name) = open_parent(path, false)?;
    dir.open(name)
        .map_err(|err| HostError::io(format!("opening {path}"), &err))
}

/// Creates (or truncates) a local file for writing.
///
/// # Errors
///
/// Returns [`HostError::Io`] when the file cannot be created.
pub fn create(path: &Utf8Path) -> Result<cap_std::fs_utf8::File, HostError> {
    let (dir, name) = open_parent(path, true)?;
    dir.create(name)
        .map_err(|err| HostError::io(format!("creating {path}"), &err))
}

/// Removes a local file, treating a missing file as success.
///
/// # Errors
///
/// Returns [`HostError::Io`] for failures other than "not found".
pub fn remove(path: &Utf8Path) -> Result<(), HostError> {
    let (dir, name) = open_parent(path, false)?;
    match dir.remove_file(name) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(HostError::io(format!("removing {path}"), &err)),
    }
}

/// Creates a directory and its parents.
///
/// # Errors
///
/// Returns [`HostError::Io`] when the directory cannot be created.
pub fn create_dir_all(path: &Utf8Path) -> Result<(), HostError> {
    Dir::create_ambient_dir_all(path, ambient_authority())
        .map_err(|err| HostError::io(format!("creating {path}"), &err))
}

/// Builds a unique scratch path under `dir` ending in `suffix`.
#[must_use]
pub fn scratch_path(dir: &Utf8Path, suffix: &str) -> Utf8PathBuf {
    dir.join(format!("hostkit-{}{suffix}", uuid::Uuid::new_v4().simple()))
}
