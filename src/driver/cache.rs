//! Compiled-artifact cache
//!
//! Artifacts are keyed by a content fingerprint of their source. An entry
//! is reused only when the fingerprint matches exactly; any mismatch forces
//! a full recompilation. The manifest is a small JSON file in the cache
//! directory.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::utils::{Error, Result};

/// Content fingerprint of a source buffer
pub fn fingerprint(source: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source);
    format!("{:x}", hasher.finalize())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub fingerprint: String,
    /// Artifact file name inside the cache directory
    pub artifact: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Manifest {
    entries: HashMap<String, CacheEntry>,
}

/// On-disk artifact cache
pub struct Cache {
    dir: PathBuf,
    manifest: Manifest,
}

impl Cache {
    /// Open (or initialize) a cache directory
    pub fn open(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)?;
        let manifest_path = dir.join("manifest.json");
        let manifest = match fs::read(&manifest_path) {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_default(),
            Err(_) => Manifest::default(),
        };
        Ok(Self {
            dir: dir.to_path_buf(),
            manifest,
        })
    }

    /// Path of a valid cached artifact for `unit`, or `None`.
    ///
    /// Valid means the stored fingerprint matches exactly and the artifact
    /// file still exists; anything else is a miss.
    pub fn lookup(&self, unit: &str, fp: &str) -> Option<PathBuf> {
        let entry = self.manifest.entries.get(unit)?;
        if entry.fingerprint != fp {
            return None;
        }
        let path = self.dir.join(&entry.artifact);
        if path.exists() {
            Some(path)
        } else {
            None
        }
    }

    /// Record a freshly built artifact for `unit`
    pub fn store(&mut self, unit: &str, fp: &str, artifact: &Path) -> Result<()> {
        let file_name = format!("{}-{}", &fp[..16], artifact_file_name(artifact));
        let dest = self.dir.join(&file_name);
        fs::copy(artifact, &dest)?;
        self.manifest.entries.insert(
            unit.to_string(),
            CacheEntry {
                fingerprint: fp.to_string(),
                artifact: file_name,
            },
        );
        self.save()
    }

    fn save(&self) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(&self.manifest)
            .map_err(|e| Error::Io(e.to_string()))?;
        fs::write(self.dir.join("manifest.json"), bytes)?;
        Ok(())
    }
}

fn artifact_file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "artifact".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "pyaot-cache-test-{tag}-{}",
            std::process::id()
        ));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_fingerprint_is_content_derived() {
        assert_eq!(fingerprint(b"x = 1\n"), fingerprint(b"x = 1\n"));
        assert_ne!(fingerprint(b"x = 1\n"), fingerprint(b"x = 2\n"));
    }

    #[test]
    fn test_lookup_requires_exact_fingerprint() {
        let dir = scratch_dir("exact");
        let artifact = dir.join("unit.c");
        fs::write(&artifact, b"/* artifact */").unwrap();

        let mut cache = Cache::open(&dir.join("cache")).unwrap();
        let fp = fingerprint(b"x = 1\n");
        cache.store("unit.py", &fp, &artifact).unwrap();

        assert!(cache.lookup("unit.py", &fp).is_some());
        let other = fingerprint(b"x = 2\n");
        assert!(cache.lookup("unit.py", &other).is_none());
        assert!(cache.lookup("elsewhere.py", &fp).is_none());
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_manifest_survives_reopen() {
        let dir = scratch_dir("reopen");
        let artifact = dir.join("unit.c");
        fs::write(&artifact, b"/* artifact */").unwrap();
        let cache_dir = dir.join("cache");

        let fp = fingerprint(b"y = 3\n");
        {
            let mut cache = Cache::open(&cache_dir).unwrap();
            cache.store("unit.py", &fp, &artifact).unwrap();
        }
        let cache = Cache::open(&cache_dir).unwrap();
        assert!(cache.lookup("unit.py", &fp).is_some());
        let _ = fs::remove_dir_all(&dir);
    }
}
