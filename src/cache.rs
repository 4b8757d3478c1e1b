//! On-disk cache file format: checksum + version envelope, optional gzip,
//! atomic write-tmp-rename. Grounded on
//! `original_source/api/model/cache/model_manager.py`'s
//! `save_cache_metadata`/`load_cache_metadata` pair for the envelope shape
//! (checksum over the payload, version gate, corrupt-file-is-not-fatal
//! policy); generalized here to any serializable payload via generics.

use crate::error::CacheError;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::{Read, Write};
use std::path::Path;

const CACHE_VERSION: &str = "1.0";
const GZIP_THRESHOLD_BYTES: usize = 100 * 1024;

#[derive(Debug, Serialize, Deserialize)]
struct CacheEnvelope<T> {
    cache_type: String,
    version: String,
    timestamp: chrono::DateTime<chrono::Utc>,
    entries_count: usize,
    data: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    checksum: Option<String>,
}

fn checksum_of(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Write `data` as a cache file at `path`, atomically (write to a sibling
/// `.tmp` file, then rename). Gzips the payload if it exceeds 100 KiB,
/// appending `.gz` to the on-disk filename.
pub fn write_cache<T: Serialize>(
    path: &Path,
    cache_type: &str,
    entries_count: usize,
    data: &T,
) -> Result<(), CacheError> {
    let envelope = CacheEnvelope {
        cache_type: cache_type.to_string(),
        version: CACHE_VERSION.to_string(),
        timestamp: chrono::Utc::now(),
        entries_count,
        data,
        checksum: None,
    };

    // Checksum over a `serde_json::Value` rather than the typed envelope
    // directly: `serde_json::Map` is BTreeMap-backed (no `preserve_order`
    // feature), so its byte representation is stable regardless of the
    // iteration order of any `HashMap`-shaped payload. Hashing the typed
    // struct would re-serialize `data` in whatever order the caller's
    // HashMap happens to iterate in, which does not round-trip.
    let mut value = serde_json::to_value(&envelope)?;
    let unchecksummed = serde_json::to_vec(&value)?;
    let checksum = checksum_of(&unchecksummed);
    if let serde_json::Value::Object(map) = &mut value {
        map.insert("checksum".to_string(), serde_json::Value::String(checksum));
    }
    let final_bytes = serde_json::to_vec(&value)?;

    let (target_path, payload) = if final_bytes.len() > GZIP_THRESHOLD_BYTES {
        let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(&final_bytes)?;
        let compressed = encoder.finish()?;
        (with_gz_suffix(path), compressed)
    } else {
        (path.to_path_buf(), final_bytes)
    };

    let tmp_path = target_path.with_extension(
        target_path
            .extension()
            .map(|e| format!("{}.tmp", e.to_string_lossy()))
            .unwrap_or_else(|| "tmp".to_string()),
    );

    if let Some(parent) = target_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&tmp_path, payload)?;
    std::fs::rename(&tmp_path, &target_path)?;
    Ok(())
}

fn with_gz_suffix(path: &Path) -> std::path::PathBuf {
    let mut os_string = path.as_os_str().to_os_string();
    os_string.push(".gz");
    std::path::PathBuf::from(os_string)
}

/// Load a cache file written by [`write_cache`]. On checksum mismatch or
/// version mismatch, returns `Ok(None)` rather than an error (spec.md §6:
/// "ignore"; R1: checksum mismatch must yield null, not an exception).
pub fn read_cache<T: DeserializeOwned>(path: &Path, cache_type: &str) -> Result<Option<T>, CacheError> {
    let gz_path = with_gz_suffix(path);
    let bytes = if gz_path.exists() {
        let mut file = std::fs::File::open(&gz_path)?;
        let mut compressed = Vec::new();
        file.read_to_end(&mut compressed)?;
        let mut decoder = flate2::read::GzDecoder::new(&compressed[..]);
        let mut decompressed = Vec::new();
        decoder.read_to_end(&mut decompressed)?;
        decompressed
    } else if path.exists() {
        std::fs::read(path)?
    } else {
        return Ok(None);
    };

    let mut value: serde_json::Value = match serde_json::from_slice(&bytes) {
        Ok(v) => v,
        Err(_) => return Ok(None),
    };

    let Some(map) = value.as_object_mut() else {
        return Ok(None);
    };
    if map.get("version").and_then(|v| v.as_str()) != Some(CACHE_VERSION)
        || map.get("cache_type").and_then(|v| v.as_str()) != Some(cache_type)
    {
        return Ok(None);
    }
    let Some(claimed_checksum) = map.remove("checksum").and_then(|v| v.as_str().map(str::to_string)) else {
        return Ok(None);
    };

    // Recompute over the same `Value` form `write_cache` hashed (checksum
    // field stripped), so a `HashMap`-shaped `data` round-trips regardless of
    // its iteration order at write time vs read time.
    let unchecksummed = serde_json::to_vec(&value)?;
    if checksum_of(&unchecksummed) != claimed_checksum {
        return Ok(None);
    }

    let Some(data) = value.as_object_mut().and_then(|map| map.remove("data")) else {
        return Ok(None);
    };

    match serde_json::from_value(data) {
        Ok(data) => Ok(Some(data)),
        Err(_) => Ok(None),
    }
}

/// Cached provider-strategy record consulted by Supervisor FastInit to skip
/// benchmarking on a fresh cache (spec.md §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderStrategy {
    pub provider_id: crate::provider::ProviderId,
    pub measured_at: chrono::DateTime<chrono::Utc>,
    pub p95_ms: f64,
    pub rtf: f64,
}

impl ProviderStrategy {
    /// Freshness window: 24 hours (spec.md §6).
    pub fn is_fresh(&self) -> bool {
        chrono::Utc::now().signed_duration_since(self.measured_at) < chrono::Duration::hours(24)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{ProviderId, ProviderKind};
    use std::collections::HashMap;

    #[test]
    fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("phoneme_cache.json");
        let mut data = HashMap::new();
        data.insert("hello".to_string(), vec!["HH".to_string(), "AH0".to_string()]);

        write_cache(&path, "phoneme_cache", 1, &data).expect("write should succeed");
        let loaded: Option<HashMap<String, Vec<String>>> =
            read_cache(&path, "phoneme_cache").expect("read should succeed");
        assert_eq!(loaded, Some(data));
    }

    #[test]
    fn write_then_read_round_trips_multi_entry_map() {
        // A HashMap's iteration order is arbitrary and can differ between the
        // write and the read; the checksum must still verify.
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("phoneme_cache.json");
        let mut data = HashMap::new();
        for i in 0..50 {
            data.insert(format!("word{i}"), vec![format!("PH{i}")]);
        }

        write_cache(&path, "phoneme_cache", data.len(), &data).expect("write should succeed");
        let loaded: Option<HashMap<String, Vec<String>>> =
            read_cache(&path, "phoneme_cache").expect("read should succeed");
        assert_eq!(loaded, Some(data));
    }

    #[test]
    fn corrupted_file_yields_none_not_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("inference_cache.json");
        std::fs::write(&path, b"not json at all").unwrap();

        let loaded: Option<HashMap<String, String>> =
            read_cache(&path, "inference_cache").expect("corrupt read must not error");
        assert!(loaded.is_none());
    }

    #[test]
    fn missing_file_yields_none() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("does_not_exist.json");
        let loaded: Option<HashMap<String, String>> = read_cache(&path, "x").expect("missing file is not an error");
        assert!(loaded.is_none());
    }

    #[test]
    fn provider_strategy_freshness() {
        let strategy = ProviderStrategy {
            provider_id: ProviderId { kind: ProviderKind::Cpu, name: "Cpu".to_string() },
            measured_at: chrono::Utc::now(),
            p95_ms: 120.0,
            rtf: 0.3,
        };
        assert!(strategy.is_fresh());
    }
}
