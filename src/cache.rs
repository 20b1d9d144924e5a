//! Result Cache Module
//!
//! Durable, content-addressed storage of finished analyses. Each entry is a
//! JSON file named after its cache key.

use crate::error::CacheError;
use crate::orchestrator::AnalysisResult;
use log::{debug, info, warn};
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs::{self, File};
use std::io::{self, BufReader, ErrorKind};
use std::path::{Path, PathBuf};

const ENTRY_EXTENSION: &str = "json";
const STAGING_PREFIX: &str = ".staging-";

/// Deterministic digest of one (video, style, instructions) request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Builds a key from an already computed video digest.
    ///
    /// The style id is length-prefixed so no (style, instructions) split of
    /// the same text can produce the same prompt digest.
    pub fn new(video_digest: &str, style_id: &str, custom_instructions: &str) -> Self {
        let prompt = format!("{}:{style_id}{custom_instructions}", style_id.len());
        CacheKey(format!("{video_digest}_{}", sha256_hex(prompt.as_bytes())))
    }

    /// Key for uploaded bytes.
    pub fn for_bytes(data: &[u8], style_id: &str, custom_instructions: &str) -> Self {
        Self::new(&sha256_hex(data), style_id, custom_instructions)
    }

    /// Key for a remote video, identified by its URL string.
    pub fn for_url(url: &str, style_id: &str, custom_instructions: &str) -> Self {
        Self::new(&sha256_hex(url.as_bytes()), style_id, custom_instructions)
    }

    /// Key for a file on disk, hashing its contents without loading it whole.
    pub fn for_file(path: &Path, style_id: &str, custom_instructions: &str) -> io::Result<Self> {
        let mut hasher = Sha256::new();
        let mut file = File::open(path)?;
        io::copy(&mut file, &mut hasher)?;
        let digest = format!("{:x}", hasher.finalize());
        Ok(Self::new(&digest, style_id, custom_instructions))
    }

    /// Accepts a key string supplied from outside, e.g. a download request.
    pub fn parse(raw: &str) -> Result<Self, CacheError> {
        let valid = !raw.is_empty()
            && raw.len() <= 160
            && raw.chars().all(|c| c.is_ascii_hexdigit() || c == '_');
        if valid {
            Ok(CacheKey(raw.to_ascii_lowercase()))
        } else {
            Err(CacheError::InvalidKey(raw.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lowercase hex SHA-256 digest.
pub fn sha256_hex(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

/// One JSON file per key under a directory. Safe to share between threads;
/// each write lands atomically via rename, so concurrent writers of the same
/// key resolve last-write-wins.
pub struct ResultCache {
    dir: PathBuf,
}

impl ResultCache {
    pub fn open(dir: &Path) -> Result<Self, CacheError> {
        fs::create_dir_all(dir)?;
        info!("Using result cache at {:?}", dir);
        Ok(ResultCache {
            dir: dir.to_path_buf(),
        })
    }

    fn entry_path(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(format!("{}.{ENTRY_EXTENSION}", key.as_str()))
    }

    /// Whether a file in the cache directory was written by this cache.
    fn owns(path: &Path) -> bool {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return false;
        };
        if name.starts_with(STAGING_PREFIX) {
            return true;
        }
        path.extension().is_some_and(|ext| ext == ENTRY_EXTENSION)
            && path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .is_some_and(|stem| CacheKey::parse(stem).is_ok())
    }

    /// Looks up a stored result. Missing and unreadable entries are both absent.
    pub fn get(&self, key: &CacheKey) -> Option<AnalysisResult> {
        let path = self.entry_path(key);
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return None,
            Err(e) => {
                warn!("Failed to open cache entry {:?}: {}", path, e);
                return None;
            }
        };
        match serde_json::from_reader(BufReader::new(file)) {
            Ok(result) => {
                debug!("Cache hit for {}", key);
                Some(result)
            }
            Err(e) => {
                warn!("Ignoring corrupt cache entry {:?}: {}", path, e);
                None
            }
        }
    }

    /// Stores a result, replacing any previous entry for the key.
    pub fn put(&self, key: &CacheKey, result: &AnalysisResult) -> Result<(), CacheError> {
        fs::create_dir_all(&self.dir)?;
        let json = serde_json::to_vec_pretty(result)?;
        let mut staged = tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .tempfile_in(&self.dir)?;
        io::Write::write_all(&mut staged, &json)?;
        staged
            .persist(self.entry_path(key))
            .map_err(|e| CacheError::Io(e.error))?;
        debug!("Cached result for {}", key);
        Ok(())
    }

    /// Removes every entry and leftover staging file. Other files in the
    /// directory are left alone. Succeeds on an empty or missing directory.
    pub fn clear(&self) -> Result<(), CacheError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        let mut removed = 0;
        for entry in entries {
            let path = entry?.path();
            if !path.is_file() || !Self::owns(&path) {
                continue;
            }
            match fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        info!("Cleared {} entries from result cache at {:?}", removed, self.dir);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sampler::SamplingStrategy;

    fn result(key: &CacheKey, analysis: &str) -> AnalysisResult {
        AnalysisResult {
            cache_key: key.to_string(),
            source: "clip.mp4".into(),
            style: "general".into(),
            custom_instructions: None,
            frames_extracted: 10,
            strategy: Some(SamplingStrategy::Dense { interval_secs: 1.0 }),
            analysis: Some(analysis.into()),
            error: None,
        }
    }

    #[test]
    fn test_key_is_deterministic() {
        let a = CacheKey::for_bytes(b"video", "general", "");
        let b = CacheKey::for_bytes(b"video", "general", "");
        assert_eq!(a, b);
        let (video, prompt) = a.as_str().split_once('_').unwrap();
        assert_eq!(video.len(), 64);
        assert_eq!(prompt.len(), 64);
    }

    #[test]
    fn test_key_changes_with_each_input() {
        let base = CacheKey::for_bytes(b"video", "general", "");
        let other_video = CacheKey::for_bytes(b"video2", "general", "");
        let other_style = CacheKey::for_bytes(b"video", "emotion", "");
        let other_text = CacheKey::for_bytes(b"video", "general", "focus on faces");
        let style_only = CacheKey::for_bytes(b"video", "ui_interaction", "");
        let split_style = CacheKey::for_bytes(b"video", "ui", "interaction_");
        let keys = [
            &base,
            &other_video,
            &other_style,
            &other_text,
            &style_only,
            &split_style,
        ];
        for (i, a) in keys.iter().enumerate() {
            for b in &keys[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn test_file_key_matches_bytes_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.mp4");
        fs::write(&path, b"not really a video").unwrap();
        assert_eq!(
            CacheKey::for_file(&path, "general", "").unwrap(),
            CacheKey::for_bytes(b"not really a video", "general", "")
        );
        assert!(CacheKey::for_file(&dir.path().join("missing"), "general", "").is_err());
    }

    #[test]
    fn test_parse_rejects_path_traversal() {
        let key = CacheKey::for_url("https://example.com/v.mp4", "general", "");
        assert_eq!(CacheKey::parse(key.as_str()).unwrap(), key);
        assert!(CacheKey::parse("../../etc/passwd").is_err());
        assert!(CacheKey::parse("").is_err());
    }

    #[test]
    fn test_round_trip_and_unknown_key() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ResultCache::open(dir.path()).unwrap();
        let key = CacheKey::for_bytes(b"video", "general", "");
        let stored = result(&key, "A cat plays piano.");

        cache.put(&key, &stored).unwrap();
        assert_eq!(cache.get(&key), Some(stored));

        let unknown = CacheKey::for_bytes(b"other", "general", "");
        assert_eq!(cache.get(&unknown), None);
    }

    #[test]
    fn test_put_overwrites_and_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ResultCache::open(dir.path()).unwrap();
        let key = CacheKey::for_bytes(b"video", "general", "");

        cache.put(&key, &result(&key, "first")).unwrap();
        cache.put(&key, &result(&key, "first")).unwrap();
        assert_eq!(cache.get(&key).unwrap().analysis.as_deref(), Some("first"));

        cache.put(&key, &result(&key, "second")).unwrap();
        assert_eq!(cache.get(&key).unwrap().analysis.as_deref(), Some("second"));
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_clear_removes_entries_and_allows_reuse() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ResultCache::open(&dir.path().join("cache")).unwrap();
        let key = CacheKey::for_bytes(b"video", "general", "");
        cache.put(&key, &result(&key, "text")).unwrap();

        cache.clear().unwrap();
        assert_eq!(cache.get(&key), None);
        cache.clear().unwrap();

        cache.put(&key, &result(&key, "again")).unwrap();
        assert!(cache.get(&key).is_some());
    }

    #[test]
    fn test_clear_leaves_foreign_files_alone() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ResultCache::open(dir.path()).unwrap();
        let key = CacheKey::for_bytes(b"video", "general", "");
        cache.put(&key, &result(&key, "text")).unwrap();
        fs::write(dir.path().join("notes.txt"), b"keep me").unwrap();
        fs::write(dir.path().join("package.json"), b"{}").unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();
        fs::write(dir.path().join(".staging-abc123"), b"partial").unwrap();

        cache.clear().unwrap();
        assert_eq!(cache.get(&key), None);
        assert!(dir.path().join("notes.txt").exists());
        assert!(dir.path().join("package.json").exists());
        assert!(dir.path().join("nested").is_dir());
        assert!(!dir.path().join(".staging-abc123").exists());
    }

    #[test]
    fn test_clear_on_missing_directory_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ResultCache::open(&dir.path().join("cache")).unwrap();
        fs::remove_dir(dir.path().join("cache")).unwrap();
        cache.clear().unwrap();
    }

    #[test]
    fn test_corrupt_entry_reads_as_absent() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ResultCache::open(dir.path()).unwrap();
        let key = CacheKey::for_bytes(b"video", "general", "");
        fs::write(dir.path().join(format!("{key}.json")), b"{not json").unwrap();
        assert_eq!(cache.get(&key), None);
    }
}
