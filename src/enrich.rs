//! Catalogue enrichment with cross-matched names.
//!
//! Lookups go through an on-disk JSON cache keyed `"HIP:<n>"` so reruns only
//! query identifiers that have never been answered. Negative answers are
//! cached too. The cache is read once before the lookup loop and written
//! once after it.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::catalogs::simbad::{hip_key, NameEntry, NameSource};
use crate::StarRecord;

/// On-disk map from `"HIP:<n>"` to a cached [`NameEntry`].
#[derive(Debug, Default)]
pub struct NameCache {
    entries: HashMap<String, NameEntry>,
}

impl NameCache {
    /// Load a cache file. A missing or unreadable file yields an empty
    /// cache; lookups then simply start over.
    pub fn load(path: &Path) -> Self {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(_) => return Self::default(),
        };
        match serde_json::from_str(&text) {
            Ok(entries) => Self { entries },
            Err(err) => {
                tracing::warn!("ignoring unreadable name cache {}: {err}", path.display());
                Self::default()
            }
        }
    }

    /// Persist the cache as pretty-printed JSON, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("creating directory {}", parent.display()))?;
            }
        }
        let text = serde_json::to_string_pretty(&self.entries).context("serializing name cache")?;
        fs::write(path, text).with_context(|| format!("writing name cache {}", path.display()))?;
        Ok(())
    }

    pub fn contains_hip(&self, hip: u32) -> bool {
        self.entries.contains_key(&hip_key(hip))
    }

    pub fn get_hip(&self, hip: u32) -> Option<&NameEntry> {
        self.entries.get(&hip_key(hip))
    }

    pub fn insert(&mut self, key: String, entry: NameEntry) {
        self.entries.insert(key, entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Batch sizing and pacing for the lookup loop.
#[derive(Debug, Clone)]
pub struct LookupConfig {
    /// Identifiers per remote query.
    pub batch_size: usize,
    /// Politeness delay between batches, in seconds.
    pub delay_s: f64,
}

impl Default for LookupConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            delay_s: 1.0,
        }
    }
}

/// Query the source for every identifier not yet in the cache.
///
/// Batches are issued sequentially with the configured delay between them.
/// A batch that comes back entirely empty caches a negative entry for each
/// of its identifiers so they are not asked for again. Returns the number of
/// identifiers that were looked up.
pub fn lookup_missing(
    cache: &mut NameCache,
    hips: &[u32],
    source: &NameSource,
    config: &LookupConfig,
) -> Result<usize> {
    let need: Vec<u32> = hips
        .iter()
        .copied()
        .filter(|&hip| !cache.contains_hip(hip))
        .collect();
    if need.is_empty() {
        return Ok(0);
    }

    let batch_size = config.batch_size.max(1);
    for batch in need.chunks(batch_size) {
        tracing::info!(
            "looking up names for HIP {}..{} ({} ids)",
            batch[0],
            batch[batch.len() - 1],
            batch.len()
        );
        let results = source.query_batch(batch)?;
        if results.is_empty() {
            // Nothing matched: cache negatives for the whole batch.
            for &hip in batch {
                cache.insert(hip_key(hip), NameEntry::default());
            }
        } else {
            for (key, entry) in results {
                cache.insert(key, entry);
            }
        }

        if config.delay_s > 0.0 {
            thread::sleep(Duration::from_secs_f64(config.delay_s));
        }
    }

    Ok(need.len())
}

/// Pick the display name for a cached entry: the canonical `main_id` when
/// present and non-empty, otherwise the first alias that is not itself a
/// HIP identifier.
pub fn display_name(entry: &NameEntry) -> Option<String> {
    if let Some(main_id) = &entry.main_id {
        if !main_id.is_empty() {
            return Some(main_id.clone());
        }
    }
    entry
        .ids
        .iter()
        .find(|id| crate::catalogs::simbad::hip_number(id).is_none())
        .cloned()
}

/// Fill in `name` on every record from the cache. Records whose identifier
/// has no cached entry, or only a negative one, get `None`.
pub fn apply_names(records: &mut [StarRecord], cache: &NameCache) {
    for record in records {
        record.name = cache.get_hip(record.hip).and_then(display_name);
    }
}
