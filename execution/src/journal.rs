//! Durable record of settlements that have started but not finished.

use crate::{settlement::MatchResult, Error};
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fs, io,
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard},
};
use tracing::warn;

/// Settlement steps that are tracked individually.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Ledger,
    Referral,
    Points,
    History,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SettlementIntent {
    pub result: MatchResult,
    #[serde(default)]
    pub completed: Vec<Step>,
}

impl SettlementIntent {
    pub fn new(result: MatchResult) -> Self {
        Self {
            result,
            completed: Vec::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.result.match_id
    }

    pub fn is_done(&self, step: Step) -> bool {
        self.completed.contains(&step)
    }

    fn complete(&mut self, step: Step) {
        if !self.is_done(step) {
            self.completed.push(step);
        }
    }
}

pub trait IntentJournal: Send + Sync {
    /// Persist a new intent before any external effect happens.
    fn record(&self, intent: &SettlementIntent) -> Result<(), Error>;
    fn complete(&self, id: &str, step: Step) -> Result<(), Error>;
    /// Forget an intent that needs no further work.
    fn resolve(&self, id: &str) -> Result<(), Error>;
    /// Intents left unresolved, oldest first.
    fn pending(&self) -> Result<Vec<SettlementIntent>, Error>;
}

#[derive(Default)]
pub struct MemoryJournal {
    intents: Mutex<BTreeMap<String, SettlementIntent>>,
}

impl MemoryJournal {
    fn intents(&self) -> MutexGuard<'_, BTreeMap<String, SettlementIntent>> {
        match self.intents.lock() {
            Ok(intents) => intents,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl IntentJournal for MemoryJournal {
    fn record(&self, intent: &SettlementIntent) -> Result<(), Error> {
        self.intents()
            .insert(intent.id().to_string(), intent.clone());
        Ok(())
    }

    fn complete(&self, id: &str, step: Step) -> Result<(), Error> {
        let mut intents = self.intents();
        let intent = intents
            .get_mut(id)
            .ok_or_else(|| Error::Storage(format!("unknown settlement intent {id}")))?;
        intent.complete(step);
        Ok(())
    }

    fn resolve(&self, id: &str) -> Result<(), Error> {
        self.intents().remove(id);
        Ok(())
    }

    fn pending(&self) -> Result<Vec<SettlementIntent>, Error> {
        let mut pending: Vec<_> = self.intents().values().cloned().collect();
        pending.sort_by_key(|intent| intent.result.finished_at);
        Ok(pending)
    }
}

/// One JSON document per intent, replaced atomically through a temporary file.
pub struct FileJournal {
    directory: PathBuf,
}

fn storage(context: &str, err: impl std::fmt::Display) -> Error {
    Error::Storage(format!("{context}: {err}"))
}

impl FileJournal {
    pub fn open(directory: impl AsRef<Path>) -> Result<Self, Error> {
        let directory = directory.as_ref().to_path_buf();
        fs::create_dir_all(&directory).map_err(|e| storage("create journal directory", e))?;
        Ok(Self { directory })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn path(&self, id: &str) -> PathBuf {
        self.directory.join(format!("{id}.json"))
    }

    fn write(&self, intent: &SettlementIntent) -> Result<(), Error> {
        let bytes = serde_json::to_vec_pretty(intent).map_err(|e| storage("encode intent", e))?;
        let temporary = self.directory.join(format!("{}.json.tmp", intent.id()));
        fs::write(&temporary, bytes).map_err(|e| storage("write intent", e))?;
        fs::rename(&temporary, self.path(intent.id())).map_err(|e| storage("commit intent", e))
    }

    fn read(path: &Path) -> Result<SettlementIntent, Error> {
        let bytes = fs::read(path).map_err(|e| storage("read intent", e))?;
        serde_json::from_slice(&bytes).map_err(|e| storage("decode intent", e))
    }
}

impl IntentJournal for FileJournal {
    fn record(&self, intent: &SettlementIntent) -> Result<(), Error> {
        self.write(intent)
    }

    fn complete(&self, id: &str, step: Step) -> Result<(), Error> {
        let mut intent = Self::read(&self.path(id))?;
        intent.complete(step);
        self.write(&intent)
    }

    fn resolve(&self, id: &str) -> Result<(), Error> {
        match fs::remove_file(self.path(id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(storage("remove intent", e)),
        }
    }

    fn pending(&self) -> Result<Vec<SettlementIntent>, Error> {
        let entries = fs::read_dir(&self.directory).map_err(|e| storage("list journal", e))?;
        let mut pending = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| storage("list journal", e))?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            match Self::read(&path) {
                Ok(intent) => pending.push(intent),
                Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable intent"),
            }
        }
        pending.sort_by_key(|intent| intent.result.finished_at);
        Ok(pending)
    }
}
