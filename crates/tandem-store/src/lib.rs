#![warn(clippy::unwrap_used, clippy::expect_used)]

//! Entity store for participant units, decisions, interaction records and
//! policy parameter snapshots.
//!
//! Every insert is a single conditional write performed under one lock: the
//! uniqueness check and the insert cannot interleave with another request, so
//! two concurrent writers of the same key always end with exactly one
//! [`StoreError::Duplicate`]. With file backing the same holds across
//! processes: each write reloads the document under an exclusive file lock,
//! checks, inserts and rewrites it before the lock is released. If the
//! rewrite fails the insert is rolled back. Reads reload under a shared lock.

mod file;
mod tables;

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use tandem_core::{
    DecisionKey, DecisionRecord, InteractionRecord, ParameterUpdateRequest, ParticipantUnit,
    PolicyParameters,
};
use thiserror::Error;

use crate::file::{LockMode, StoreFile};
use crate::tables::{Tables, Undo};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("duplicate key in {table}: {key}")]
    Duplicate { table: &'static str, key: String },
    #[error("unknown participant unit referenced by {table}: {key}")]
    ForeignKey { table: &'static str, key: String },
    #[error("store lock poisoned")]
    Poisoned,
    #[error("store I/O failed for '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("store document '{}' is invalid: {message}", path.display())]
    Corrupt { path: PathBuf, message: String },
    #[error("failed to serialize store document: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Durable home of every record kind. Services mutate state only through it.
pub trait EntityStore: Send + Sync {
    fn insert_unit(&self, unit: ParticipantUnit) -> Result<(), StoreError>;
    fn unit(&self, unit_id: &str) -> Result<Option<ParticipantUnit>, StoreError>;

    fn insert_decision(&self, record: DecisionRecord) -> Result<(), StoreError>;
    fn decision(&self, key: &DecisionKey) -> Result<Option<DecisionRecord>, StoreError>;
    fn decisions_for_unit(&self, unit_id: &str) -> Result<Vec<DecisionRecord>, StoreError>;

    fn insert_interaction(&self, record: InteractionRecord) -> Result<(), StoreError>;
    fn interaction(&self, key: &DecisionKey) -> Result<Option<InteractionRecord>, StoreError>;
    fn interactions(&self) -> Result<Vec<InteractionRecord>, StoreError>;

    fn insert_parameters(&self, snapshot: PolicyParameters) -> Result<(), StoreError>;
    /// Snapshot with the newest `created_at`; later inserts win ties.
    fn latest_parameters(&self) -> Result<Option<PolicyParameters>, StoreError>;

    fn append_update_request(&self, request: ParameterUpdateRequest) -> Result<(), StoreError>;
    fn update_requests(&self) -> Result<Vec<ParameterUpdateRequest>, StoreError>;
}

/// Process-local store, optionally mirrored to a JSON document.
#[derive(Debug)]
pub struct LocalStore {
    tables: Mutex<Tables>,
    file: Option<StoreFile>,
}

impl LocalStore {
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            tables: Mutex::new(Tables::default()),
            file: None,
        }
    }

    /// Opens (or lazily creates) the JSON document at `path`.
    pub fn open_json(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let file = StoreFile::new(path.into());
        let tables = file.with_lock(LockMode::Shared, || file.load())?;
        Ok(Self {
            tables: Mutex::new(tables),
            file: Some(file),
        })
    }

    /// Backing document, if any.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.file.as_ref().map(StoreFile::path)
    }

    /// Writes a consistent copy of the current tables to `dest`.
    pub fn backup_to(&self, dest: &Path) -> Result<(), StoreError> {
        self.read(|tables| file::write_document(dest, tables))?
    }

    fn lock(&self) -> Result<MutexGuard<'_, Tables>, StoreError> {
        self.tables.lock().map_err(|_| StoreError::Poisoned)
    }

    fn read<T>(&self, f: impl FnOnce(&Tables) -> T) -> Result<T, StoreError> {
        let mut tables = self.lock()?;
        let Some(file) = &self.file else {
            return Ok(f(&tables));
        };
        file.with_lock(LockMode::Shared, || {
            *tables = file.load()?;
            Ok(f(&tables))
        })
    }

    fn write(&self, op: impl FnOnce(&mut Tables) -> Result<Undo, StoreError>) -> Result<(), StoreError> {
        let mut tables = self.lock()?;
        let Some(file) = &self.file else {
            op(&mut tables)?;
            return Ok(());
        };
        file.with_lock(LockMode::Exclusive, || {
            // Another process may have committed since our last look.
            *tables = file.load()?;
            let undo = op(&mut tables)?;
            if let Err(err) = file.save(&tables) {
                tables.rollback(undo);
                return Err(err);
            }
            Ok(())
        })
    }
}

impl EntityStore for LocalStore {
    fn insert_unit(&self, unit: ParticipantUnit) -> Result<(), StoreError> {
        self.write(|t| t.insert_unit(unit))
    }

    fn unit(&self, unit_id: &str) -> Result<Option<ParticipantUnit>, StoreError> {
        self.read(|t| t.units.get(unit_id).cloned())
    }

    fn insert_decision(&self, record: DecisionRecord) -> Result<(), StoreError> {
        self.write(|t| t.insert_decision(record))
    }

    fn decision(&self, key: &DecisionKey) -> Result<Option<DecisionRecord>, StoreError> {
        self.read(|t| t.decisions.get(key).cloned())
    }

    fn decisions_for_unit(&self, unit_id: &str) -> Result<Vec<DecisionRecord>, StoreError> {
        self.read(|t| {
            t.decisions
                .values()
                .filter(|d| d.unit_id == unit_id)
                .cloned()
                .collect()
        })
    }

    fn insert_interaction(&self, record: InteractionRecord) -> Result<(), StoreError> {
        self.write(|t| t.insert_interaction(record))
    }

    fn interaction(&self, key: &DecisionKey) -> Result<Option<InteractionRecord>, StoreError> {
        self.read(|t| t.interactions.get(key).cloned())
    }

    fn interactions(&self) -> Result<Vec<InteractionRecord>, StoreError> {
        self.read(|t| t.interactions.values().cloned().collect())
    }

    fn insert_parameters(&self, snapshot: PolicyParameters) -> Result<(), StoreError> {
        self.write(|t| t.insert_parameters(snapshot))
    }

    fn latest_parameters(&self) -> Result<Option<PolicyParameters>, StoreError> {
        self.read(|t| t.latest_parameters().cloned())
    }

    fn append_update_request(&self, request: ParameterUpdateRequest) -> Result<(), StoreError> {
        self.write(|t| t.append_update_request(request))
    }

    fn update_requests(&self) -> Result<Vec<ParameterUpdateRequest>, StoreError> {
        self.read(|t| t.update_requests.clone())
    }
}
