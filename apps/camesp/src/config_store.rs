//! Persistent device configuration published as immutable snapshots.
//!
//! Readers hold an `Arc<Snapshot<T>>` for as long as they like; a reload
//! swaps in a new snapshot with the next generation number and never touches
//! the one a reader already has.

use std::fs;
use std::io;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config io error: {0}")]
    Io(#[from] io::Error),
    #[error("config is not valid json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("config {0} does not exist")]
    Missing(String),
}

/// Identifies one version of the stored bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceStamp {
    Modified { at: SystemTime, len: u64 },
    Revision(u64),
}

/// Where the serialized configuration lives.
pub trait ConfigSource: Send + Sync {
    fn name(&self) -> String;
    /// `None` when nothing is stored yet.
    fn stamp(&self) -> Result<Option<SourceStamp>, ConfigError>;
    fn read(&self) -> Result<Vec<u8>, ConfigError>;
    fn write(&self, data: &[u8]) -> Result<(), ConfigError>;
}

/// One JSON file.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<dir>/<name>.json`
    pub fn in_dir(dir: &Path, name: &str) -> Self {
        Self::new(dir.join(format!("{name}.json")))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ConfigSource for FileSource {
    fn name(&self) -> String {
        self.path.display().to_string()
    }

    fn stamp(&self) -> Result<Option<SourceStamp>, ConfigError> {
        match fs::metadata(&self.path) {
            Ok(meta) => Ok(Some(SourceStamp::Modified {
                at: meta.modified()?,
                len: meta.len(),
            })),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn read(&self) -> Result<Vec<u8>, ConfigError> {
        match fs::read(&self.path) {
            Ok(data) => Ok(data),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Err(ConfigError::Missing(self.name())),
            Err(err) => Err(err.into()),
        }
    }

    fn write(&self, data: &[u8]) -> Result<(), ConfigError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, data)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

/// In-memory source; every write bumps the revision.
#[derive(Debug, Default)]
pub struct MemorySource {
    state: Mutex<(u64, Option<Vec<u8>>)>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_json(json: &str) -> Self {
        let source = Self::new();
        source.set(json.as_bytes());
        source
    }

    /// Replaces the stored bytes as an outside editor would.
    pub fn set(&self, data: &[u8]) {
        let mut state = self.state.lock();
        state.0 += 1;
        state.1 = Some(data.to_vec());
    }

    pub fn contents(&self) -> Option<Vec<u8>> {
        self.state.lock().1.clone()
    }
}

impl ConfigSource for MemorySource {
    fn name(&self) -> String {
        "memory".to_string()
    }

    fn stamp(&self) -> Result<Option<SourceStamp>, ConfigError> {
        let state = self.state.lock();
        Ok(state.1.as_ref().map(|_| SourceStamp::Revision(state.0)))
    }

    fn read(&self) -> Result<Vec<u8>, ConfigError> {
        self.state
            .lock()
            .1
            .clone()
            .ok_or_else(|| ConfigError::Missing(self.name()))
    }

    fn write(&self, data: &[u8]) -> Result<(), ConfigError> {
        self.set(data);
        Ok(())
    }
}

#[derive(Debug)]
pub struct Snapshot<T> {
    pub generation: u64,
    pub value: T,
}

impl<T> Deref for Snapshot<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

pub struct ConfigStore<T> {
    source: Arc<dyn ConfigSource>,
    current: RwLock<Arc<Snapshot<T>>>,
    /// Stamp of the bytes the current snapshot came from.
    stamp: Mutex<Option<SourceStamp>>,
}

pub type SharedConfig<T> = Arc<ConfigStore<T>>;

impl<T> ConfigStore<T>
where
    T: Serialize + DeserializeOwned + Default + Clone + Send + Sync,
{
    /// Starts from `T::default()` at generation 0; nothing is read yet.
    pub fn new(source: Arc<dyn ConfigSource>) -> Self {
        Self {
            source,
            current: RwLock::new(Arc::new(Snapshot {
                generation: 0,
                value: T::default(),
            })),
            stamp: Mutex::new(None),
        }
    }

    pub fn snapshot(&self) -> Arc<Snapshot<T>> {
        self.current.read().clone()
    }

    pub fn generation(&self) -> u64 {
        self.current.read().generation
    }

    /// Reads and publishes the stored configuration.
    pub fn load(&self) -> Result<Arc<Snapshot<T>>, ConfigError> {
        let stamp = self.source.stamp()?;
        let data = self.source.read()?;
        let value: T = serde_json::from_slice(&data)?;
        *self.stamp.lock() = stamp;
        Ok(self.publish(value))
    }

    /// Loads, or stores the current value when nothing usable is stored.
    pub fn load_create(&self) -> Result<Arc<Snapshot<T>>, ConfigError> {
        match self.load() {
            Ok(snapshot) => Ok(snapshot),
            Err(ConfigError::Io(err)) => Err(ConfigError::Io(err)),
            Err(err) => {
                info!(source = %self.source.name(), reason = %err, "writing default config");
                let value = self.snapshot().value.clone();
                self.save(value)?;
                Ok(self.snapshot())
            }
        }
    }

    /// True when the stored bytes differ from the ones last loaded or saved.
    pub fn is_changed(&self) -> bool {
        match self.source.stamp() {
            Ok(stamp) => stamp != *self.stamp.lock(),
            Err(err) => {
                warn!(source = %self.source.name(), error = %err, "cannot stat config");
                false
            }
        }
    }

    /// Reloads when the stored bytes changed. Returns whether a new snapshot
    /// was published. A broken file leaves the previous snapshot in place.
    pub fn refresh(&self) -> Result<bool, ConfigError> {
        if !self.is_changed() {
            return Ok(false);
        }
        match self.load() {
            Ok(snapshot) => {
                debug!(source = %self.source.name(), generation = snapshot.generation, "config reloaded");
                Ok(true)
            }
            Err(err) => {
                // Remember the broken version so it is not re-read every tick.
                *self.stamp.lock() = self.source.stamp().ok().flatten();
                Err(err)
            }
        }
    }

    pub fn save(&self, value: T) -> Result<Arc<Snapshot<T>>, ConfigError> {
        let data = serde_json::to_vec_pretty(&value)?;
        self.source.write(&data)?;
        *self.stamp.lock() = self.source.stamp()?;
        Ok(self.publish(value))
    }

    fn publish(&self, value: T) -> Arc<Snapshot<T>> {
        let mut current = self.current.write();
        let snapshot = Arc::new(Snapshot {
            generation: current.generation + 1,
            value,
        });
        *current = snapshot.clone();
        snapshot
    }
}
