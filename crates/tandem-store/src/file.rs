//! JSON document backing for [`LocalStore`](crate::LocalStore).
//!
//! The whole table set is written to a temp file next to the target and
//! renamed over it, so readers never see a half written document. Every
//! access holds an advisory lock on a `.lock` sibling, so separate
//! processes sharing one document serialize their read-check-write cycles.

use std::ffi::OsString;
use std::fs::{self, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use fd_lock::RwLock;
use serde::{Deserialize, Serialize};
use tandem_core::{
    DecisionRecord, InteractionRecord, ParameterUpdateRequest, ParticipantUnit, PolicyParameters,
};

use crate::tables::Tables;
use crate::StoreError;

const DOCUMENT_VERSION: u64 = 1;

#[derive(Serialize)]
struct DocumentRef<'a> {
    version: u64,
    units: Vec<&'a ParticipantUnit>,
    decisions: Vec<&'a DecisionRecord>,
    interactions: Vec<&'a InteractionRecord>,
    parameters: &'a [PolicyParameters],
    update_requests: &'a [ParameterUpdateRequest],
}

#[derive(Deserialize)]
struct Document {
    version: u64,
    #[serde(default)]
    units: Vec<ParticipantUnit>,
    #[serde(default)]
    decisions: Vec<DecisionRecord>,
    #[serde(default)]
    interactions: Vec<InteractionRecord>,
    #[serde(default)]
    parameters: Vec<PolicyParameters>,
    #[serde(default)]
    update_requests: Vec<ParameterUpdateRequest>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LockMode {
    Shared,
    Exclusive,
}

#[derive(Debug, Clone)]
pub(crate) struct StoreFile {
    path: PathBuf,
    lock_path: PathBuf,
}

impl StoreFile {
    pub(crate) fn new(path: PathBuf) -> Self {
        let lock_path = sibling(&path, ".lock");
        Self { path, lock_path }
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// Runs `f` while this process holds the document lock in `mode`.
    /// The lock is released when the lock file handle is dropped.
    pub(crate) fn with_lock<T>(
        &self,
        mode: LockMode,
        f: impl FnOnce() -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        if let Some(parent) = self.lock_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_error(parent))?;
        }
        let handle = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&self.lock_path)
            .map_err(io_error(&self.lock_path))?;
        let mut lock = RwLock::new(handle);
        match mode {
            LockMode::Shared => {
                let _guard = lock.read().map_err(io_error(&self.lock_path))?;
                f()
            }
            LockMode::Exclusive => {
                let _guard = lock.write().map_err(io_error(&self.lock_path))?;
                f()
            }
        }
    }

    /// Reads the document, or an empty table set when the file is missing.
    pub(crate) fn load(&self) -> Result<Tables, StoreError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Tables::default())
            }
            Err(source) => {
                return Err(StoreError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        let doc: Document = serde_json::from_str(&content).map_err(|err| StoreError::Corrupt {
            path: self.path.clone(),
            message: err.to_string(),
        })?;
        if doc.version != DOCUMENT_VERSION {
            return Err(StoreError::Corrupt {
                path: self.path.clone(),
                message: format!("unsupported document version {}", doc.version),
            });
        }
        self.rebuild(doc)
    }

    /// Replays the document through the regular inserts so a hand edited
    /// file cannot smuggle in duplicates or dangling references.
    fn rebuild(&self, doc: Document) -> Result<Tables, StoreError> {
        let corrupt = |err: StoreError| StoreError::Corrupt {
            path: self.path.clone(),
            message: err.to_string(),
        };
        let mut tables = Tables::default();
        for unit in doc.units {
            tables.insert_unit(unit).map_err(corrupt)?;
        }
        for record in doc.decisions {
            tables.insert_decision(record).map_err(corrupt)?;
        }
        for record in doc.interactions {
            tables.insert_interaction(record).map_err(corrupt)?;
        }
        for snapshot in doc.parameters {
            tables.insert_parameters(snapshot).map_err(corrupt)?;
        }
        for request in doc.update_requests {
            tables.append_update_request(request).map_err(corrupt)?;
        }
        Ok(tables)
    }

    pub(crate) fn save(&self, tables: &Tables) -> Result<(), StoreError> {
        write_document(&self.path, tables)
    }
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> StoreError + '_ {
    move |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

fn tmp_path(path: &Path) -> PathBuf {
    sibling(path, ".tmp")
}

pub(crate) fn write_document(path: &Path, tables: &Tables) -> Result<(), StoreError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(io_error(parent))?;
    }

    let doc = DocumentRef {
        version: DOCUMENT_VERSION,
        units: tables.units.values().collect(),
        decisions: tables.decisions.values().collect(),
        interactions: tables.interactions.values().collect(),
        parameters: &tables.parameters,
        update_requests: &tables.update_requests,
    };

    let tmp = tmp_path(path);
    let file = fs::File::create(&tmp).map_err(io_error(&tmp))?;
    {
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, &doc)?;
        writer.write_all(b"\n").map_err(io_error(&tmp))?;
        writer.flush().map_err(io_error(&tmp))?;
        writer
            .get_ref()
            .sync_all()
            .map_err(io_error(&tmp))?;
    }
    fs::rename(&tmp, path).map_err(io_error(path))?;
    Ok(())
}

/// Row counts per table.
#[cfg(test)]
pub(crate) fn summarize(tables: &Tables) -> std::collections::BTreeMap<&'static str, usize> {
    std::collections::BTreeMap::from([
        ("units", tables.units.len()),
        ("decisions", tables.decisions.len()),
        ("interactions", tables.interactions.len()),
        ("parameters", tables.parameters.len()),
        ("update_requests", tables.update_requests.len()),
    ])
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;
    use tandem_core::{Features, ParameterValues, UnitKind};
    use time::OffsetDateTime;

    fn temp_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("tandem_store_{name}_{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        dir.join("store.json")
    }

    #[test]
    fn missing_file_loads_empty() {
        let file = StoreFile::new(temp_path("missing"));
        let tables = file.load().expect("load");
        assert!(summarize(&tables).values().all(|n| *n == 0));
    }

    #[test]
    fn document_round_trips() {
        let path = temp_path("roundtrip");
        let file = StoreFile::new(path.clone());
        let mut tables = Tables::default();
        tables
            .insert_unit(ParticipantUnit {
                unit_id: "g1".into(),
                kind: UnitKind::Group,
                metadata: Features::new(),
                created_at: OffsetDateTime::now_utc(),
            })
            .expect("unit");
        tables
            .insert_parameters(PolicyParameters::new(ParameterValues::new()))
            .expect("params");
        file.save(&tables).expect("save");
        assert!(!tmp_path(&path).exists());

        let loaded = file.load().expect("load");
        assert_eq!(summarize(&loaded), summarize(&tables));
        assert_eq!(loaded.units["g1"].kind, UnitKind::Group);
    }

    #[test]
    fn unknown_version_is_rejected() {
        let path = temp_path("version");
        fs::create_dir_all(path.parent().expect("parent")).expect("dir");
        fs::write(&path, r#"{"version": 99}"#).expect("write");
        let err = StoreFile::new(path).load().err().expect("corrupt");
        assert!(err.to_string().contains("unsupported document version"));
    }
}
