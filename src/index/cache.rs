//! Index persistence and process-wide sharing.
//!
//! The on-disk cache is a JSON snapshot of the index keyed by the config
//! fingerprint. Corruption, absence, or a fingerprint mismatch all degrade
//! to a fresh build; a cache problem is never fatal.

use std::collections::HashMap as StdHashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use once_cell::sync::Lazy;

use crate::config::EngineConfig;
use crate::diagnostics::EngineError;
use crate::index::ResourceIndex;

// One shared index per fingerprint for the life of the process.
static SHARED: Lazy<Mutex<StdHashMap<String, Arc<ResourceIndex>>>> =
    Lazy::new(|| Mutex::new(StdHashMap::new()));

/// Returns the process-wide shared index for this config, building it (or
/// loading it from the on-disk cache) on first use.
pub fn shared(config: &EngineConfig) -> Result<Arc<ResourceIndex>, EngineError> {
    let fingerprint = config.fingerprint();
    let mut shared = SHARED
        .lock()
        .map_err(|_| EngineError::internal("shared index lock poisoned"))?;
    if let Some(index) = shared.get(&fingerprint) {
        return Ok(Arc::clone(index));
    }
    let index = Arc::new(load_or_build(config)?);
    shared.insert(fingerprint, Arc::clone(&index));
    Ok(index)
}

/// Loads the index from disk when a valid cache exists, otherwise builds
/// it and stores the result best-effort.
pub fn load_or_build(config: &EngineConfig) -> Result<ResourceIndex, EngineError> {
    let cache_file = config.cache_file("index");
    if let Some(path) = cache_file.as_deref() {
        if let Some(index) = load(path, &config.fingerprint()) {
            return Ok(index);
        }
    }
    let index = ResourceIndex::build(config)?;
    if let Some(path) = cache_file.as_deref() {
        store(path, &index);
    }
    Ok(index)
}

/// Reads a cached index; any failure (missing file, parse error, stale
/// fingerprint) yields None so the caller rebuilds.
pub fn load(path: &Path, expected_fingerprint: &str) -> Option<ResourceIndex> {
    let text = std::fs::read_to_string(path).ok()?;
    let index: ResourceIndex = serde_json::from_str(&text).ok()?;
    if index.fingerprint() != expected_fingerprint {
        return None;
    }
    Some(index)
}

/// Best-effort write; a full disk or unwritable cache dir only costs the
/// next run a rebuild.
pub fn store(path: &Path, index: &ResourceIndex) -> bool {
    if let Some(dir) = path.parent() {
        if std::fs::create_dir_all(dir).is_err() {
            return false;
        }
    }
    let Ok(text) = serde_json::to_string(index) else {
        return false;
    };
    std::fs::write(path, text).is_ok()
}
