//! TOML-backed persistence for instance records.
//!
//! Records live in `[instances.<name>]` tables. Every write re-reads the
//! file, replaces one table and renders the document again, so unrelated
//! records and keys are preserved.

use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use ortho_config::toml;
use thiserror::Error;

use super::Instance;

const INSTANCES_SECTION: &str = "instances";

/// Errors raised while reading or writing the instance file.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum StoreError {
    /// Raised when file system operations fail.
    #[error("failed to access {path}: {message}")]
    Io {
        /// Path that could not be accessed.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
    /// Raised when parsing or rendering TOML fails.
    #[error("failed to parse {path}: {message}")]
    Parse {
        /// Path that could not be parsed.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
    /// Raised when the document has an unexpected structure.
    #[error("invalid instance file {path}: {message}")]
    InvalidStructure {
        /// Path that had invalid content.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
    /// Raised when a named instance is absent.
    #[error("no instance named {name} in {path}")]
    NotFound {
        /// Requested name.
        name: String,
        /// File that was searched.
        path: Utf8PathBuf,
    },
}

/// Reads and writes instance records in one TOML file.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InstanceStore {
    path: Utf8PathBuf,
}

impl InstanceStore {
    /// Creates a store for `path`. The file is created on first save.
    #[must_use]
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// File backing this store.
    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// All instances, ordered by name.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the file cannot be read or parsed.
    pub fn list(&self) -> Result<Vec<Instance>, StoreError> {
        let document = self.load()?;
        let Some(section) = self.section(&document)? else {
            return Ok(Vec::new());
        };
        let mut instances = section
            .iter()
            .map(|(name, value)| self.decode(name, value))
            .collect::<Result<Vec<_>, _>>()?;
        instances.sort_by(|left, right| left.name.cmp(&right.name));
        Ok(instances)
    }

    /// The instance called `name`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when no such record exists.
    pub fn get(&self, name: &str) -> Result<Instance, StoreError> {
        let document = self.load()?;
        self.section(&document)?
            .and_then(|section| section.get(name))
            .map(|value| self.decode(name, value))
            .unwrap_or_else(|| {
                Err(StoreError::NotFound {
                    name: name.to_owned(),
                    path: self.path.clone(),
                })
            })
    }

    /// Creates or replaces the record for `instance.name`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the file cannot be updated.
    pub fn save(&self, instance: &Instance) -> Result<(), StoreError> {
        let mut document = self.load()?;
        let mut record = toml::Value::try_from(instance).map_err(|err| self.parse_error(&err))?;
        if let Some(table) = record.as_table_mut() {
            table.remove("name");
        }
        self.section_mut(&mut document)?
            .insert(instance.name.clone(), record);
        self.write(&document)
    }

    /// Deletes the record called `name`, returning whether it existed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the file cannot be updated.
    pub fn remove(&self, name: &str) -> Result<bool, StoreError> {
        let mut document = self.load()?;
        let removed = self.section_mut(&mut document)?.remove(name).is_some();
        if removed {
            self.write(&document)?;
        }
        Ok(removed)
    }

    fn decode(&self, name: &str, value: &toml::Value) -> Result<Instance, StoreError> {
        let mut instance: Instance = value.clone().try_into().map_err(|err| StoreError::InvalidStructure {
            path: self.path.clone(),
            message: format!("[{INSTANCES_SECTION}.{name}]: {err}"),
        })?;
        name.clone_into(&mut instance.name);
        Ok(instance)
    }

    fn section<'doc>(&self, document: &'doc toml::Value) -> Result<Option<&'doc toml::value::Table>, StoreError> {
        let root = document.as_table().ok_or_else(|| self.structure_error("document root is not a table"))?;
        root.get(INSTANCES_SECTION)
            .map(|section| {
                section
                    .as_table()
                    .ok_or_else(|| self.structure_error(&format!("[{INSTANCES_SECTION}] must be a table")))
            })
            .transpose()
    }

    fn section_mut<'doc>(&self, document: &'doc mut toml::Value) -> Result<&'doc mut toml::value::Table, StoreError> {
        let root = document
            .as_table_mut()
            .ok_or_else(|| self.structure_error("document root is not a table"))?;
        root.entry(String::from(INSTANCES_SECTION))
            .or_insert_with(|| toml::Value::Table(toml::value::Table::new()))
            .as_table_mut()
            .ok_or_else(|| self.structure_error(&format!("[{INSTANCES_SECTION}] must be a table")))
    }

    fn load(&self) -> Result<toml::Value, StoreError> {
        let parent = self.parent();
        let dir = match Dir::open_ambient_dir(parent, ambient_authority()) {
            Ok(dir) => dir,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(empty_document()),
            Err(err) => return Err(io_error(parent, &err)),
        };
        let contents = match dir.read_to_string(self.file_name()?) {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(empty_document()),
            Err(err) => return Err(io_error(&self.path, &err)),
        };
        if contents.trim().is_empty() {
            return Ok(empty_document());
        }
        toml::from_str(&contents).map_err(|err| self.parse_error(&err))
    }

    fn write(&self, document: &toml::Value) -> Result<(), StoreError> {
        let parent = self.parent();
        Dir::create_ambient_dir_all(parent, ambient_authority())
            .map_err(|err| io_error(parent, &err))?;
        let dir = Dir::open_ambient_dir(parent, ambient_authority())
            .map_err(|err| io_error(parent, &err))?;
        let rendered = toml::to_string_pretty(document).map_err(|err| self.parse_error(&err))?;
        dir.write(self.file_name()?, rendered)
            .map_err(|err| io_error(&self.path, &err))
    }

    fn parent(&self) -> &Utf8Path {
        match self.path.parent() {
            Some(dir) if !dir.as_str().is_empty() => dir,
            _ => Utf8Path::new("."),
        }
    }

    fn file_name(&self) -> Result<&str, StoreError> {
        self.path
            .file_name()
            .ok_or_else(|| self.structure_error("instance file path is missing a filename"))
    }

    fn parse_error(&self, err: &dyn std::fmt::Display) -> StoreError {
        StoreError::Parse {
            path: self.path.clone(),
            message: err.to_string(),
        }
    }

    fn structure_error(&self, message: &str) -> StoreError {
        StoreError::InvalidStructure {
            path: self.path.clone(),
            message: message.to_owned(),
        }
    }
}

fn io_error(path: &Utf8Path, err: &io::Error) -> StoreError {
    StoreError::Io {
        path: path.to_path_buf(),
        message: err.to_string(),
    }
}

fn empty_document() -> toml::Value {
    toml::Value::Table(toml::value::Table::new())
}

#[cfg(test)]
mod tests;
