//! Key-value storage for fitted year-effect models.
//!
//! Fits are stored as JSON payloads. Whether an existing entry is reused or
//! overwritten is decided by an explicit [`CacheMode`] passed by the caller.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Cache key '{0}' is empty or contains characters outside [A-Za-z0-9._-].")]
    InvalidKey(String),

    #[error("Cache I/O failed for '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Cache entry '{key}' could not be (de)serialized: {source}")]
    Payload {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Reuse a stored entry when present, or always recompute and overwrite it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CacheMode {
    #[default]
    Reuse,
    Recompute,
}

/// Injected store for serialized model fits.
pub trait ModelCache {
    fn load(&self, key: &str) -> Result<Option<String>, CacheError>;
    fn store(&mut self, key: &str, payload: &str) -> Result<(), CacheError>;
}

pub fn validate_key(key: &str) -> Result<(), CacheError> {
    let ok = !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        && key != "."
        && key != "..";
    if ok {
        Ok(())
    } else {
        Err(CacheError::InvalidKey(key.to_string()))
    }
}

/// One `<key>.json` file per entry below a root directory.
#[derive(Debug, Clone)]
pub struct FileCache {
    root: PathBuf,
}

impl FileCache {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|source| CacheError::Io {
            path: root.clone(),
            source,
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, key: &str) -> Result<PathBuf, CacheError> {
        validate_key(key)?;
        Ok(self.root.join(format!("{key}.json")))
    }
}

impl ModelCache for FileCache {
    fn load(&self, key: &str) -> Result<Option<String>, CacheError> {
        let path = self.path_for(key)?;
        if !path.exists() {
            return Ok(None);
        }
        fs::read_to_string(&path)
            .map(Some)
            .map_err(|source| CacheError::Io { path, source })
    }

    fn store(&mut self, key: &str, payload: &str) -> Result<(), CacheError> {
        let path = self.path_for(key)?;
        fs::write(&path, payload).map_err(|source| CacheError::Io { path, source })
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryCache {
    entries: BTreeMap<String, String>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl ModelCache for MemoryCache {
    fn load(&self, key: &str) -> Result<Option<String>, CacheError> {
        validate_key(key)?;
        Ok(self.entries.get(key).cloned())
    }

    fn store(&mut self, key: &str, payload: &str) -> Result<(), CacheError> {
        validate_key(key)?;
        self.entries.insert(key.to_string(), payload.to_string());
        Ok(())
    }
}

/// Return the cached value for `key`, or run `compute` and store its result.
///
/// A payload that fails to deserialize is reported, not silently replaced.
pub fn load_or_compute<T, E, F>(
    cache: &mut dyn ModelCache,
    key: &str,
    mode: CacheMode,
    compute: F,
) -> Result<T, E>
where
    T: Serialize + DeserializeOwned,
    E: From<CacheError>,
    F: FnOnce() -> Result<T, E>,
{
    if mode == CacheMode::Reuse {
        if let Some(payload) = cache.load(key)? {
            let value = serde_json::from_str(&payload).map_err(|source| CacheError::Payload {
                key: key.to_string(),
                source,
            })?;
            log::info!("loaded cached fit '{key}'");
            return Ok(value);
        }
    }

    let value = compute()?;
    let payload = serde_json::to_string_pretty(&value).map_err(|source| CacheError::Payload {
        key: key.to_string(),
        source,
    })?;
    cache.store(key, &payload)?;
    log::info!("computed and cached fit '{key}'");
    Ok(value)
}
