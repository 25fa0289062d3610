use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

/// Durable set of layer diff_ids previously scanned with zero findings.
///
/// One JSON file per detection-engine version: what counts as "clean" depends
/// on the ruleset in effect, so versions never share entries. A missing or
/// corrupt file loads as empty — the cache is an optimization, losing it only
/// costs a re-scan.
pub struct LayerIdCache {
    path: PathBuf,
    ids: BTreeSet<String>,
}

impl LayerIdCache {
    pub fn load(path: PathBuf) -> Self {
        let ids = match fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice::<Vec<String>>(&bytes) {
                Ok(list) => list.into_iter().collect(),
                Err(err) => {
                    warn!(path = %path.display(), %err, "discarding unreadable layer cache");
                    BTreeSet::new()
                }
            },
            Err(err) if err.kind() == io::ErrorKind::NotFound => BTreeSet::new(),
            Err(err) => {
                warn!(path = %path.display(), %err, "could not read layer cache");
                BTreeSet::new()
            }
        };
        Self { path, ids }
    }

    /// Open the cache for a given engine version under the user cache dir
    /// (`<cache>/layersweep/docker/<version>.json`).
    pub fn for_engine_version(version: &str) -> Self {
        let root = dirs::cache_dir().unwrap_or_else(std::env::temp_dir);
        Self::load(Self::path_for(&root, version))
    }

    /// Same layout as `for_engine_version`, rooted explicitly. Used by tests
    /// and by callers that manage their own cache directory.
    pub fn for_engine_version_in(root: &Path, version: &str) -> Self {
        Self::load(Self::path_for(root, version))
    }

    fn path_for(root: &Path, version: &str) -> PathBuf {
        let safe: String = version
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
            .collect();
        root.join("layersweep").join("docker").join(format!("{safe}.json"))
    }

    pub fn contains(&self, diff_id: &str) -> bool {
        self.ids.contains(diff_id)
    }

    /// Record a layer as clean. Idempotent; the file is rewritten before
    /// returning so an interrupted run keeps every completed layer.
    pub fn add(&mut self, diff_id: &str) -> io::Result<()> {
        if !self.ids.insert(diff_id.to_string()) {
            return Ok(());
        }
        debug!(diff_id, "recording clean layer");
        self.save()
    }

    fn save(&self) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let list: Vec<&String> = self.ids.iter().collect();
        fs::write(&self.path, serde_json::to_vec(&list)?)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entries_survive_reload() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = LayerIdCache::for_engine_version_in(dir.path(), "2.106.0");
        cache.add("sha256:aaa").unwrap();
        cache.add("sha256:bbb").unwrap();

        let reloaded = LayerIdCache::for_engine_version_in(dir.path(), "2.106.0");
        assert!(reloaded.contains("sha256:aaa"));
        assert!(reloaded.contains("sha256:bbb"));
        assert_eq!(reloaded.len(), 2);
    }

    #[test]
    fn engine_versions_are_isolated() {
        let dir = tempfile::tempdir().unwrap();
        let mut v1 = LayerIdCache::for_engine_version_in(dir.path(), "v1");
        v1.add("sha256:aaa").unwrap();

        let v2 = LayerIdCache::for_engine_version_in(dir.path(), "v2");
        assert!(!v2.contains("sha256:aaa"));
    }

    #[test]
    fn add_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = LayerIdCache::for_engine_version_in(dir.path(), "v1");
        cache.add("sha256:aaa").unwrap();
        cache.add("sha256:aaa").unwrap();
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn corrupt_cache_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        fs::write(&path, b"{not json").unwrap();
        let cache = LayerIdCache::load(path);
        assert!(cache.is_empty());
    }

    #[test]
    fn version_string_is_sanitized_for_filenames() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = LayerIdCache::for_engine_version_in(dir.path(), "2.0/beta res");
        cache.add("sha256:aaa").unwrap();
        assert!(dir
            .path()
            .join("layersweep")
            .join("docker")
            .join("2.0_beta_res.json")
            .exists());
    }
}
