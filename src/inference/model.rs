//! GGUF model files
//!
//! Header validation and selection of a quantization file matching the
//! requested precision.

use crate::types::config::Precision;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use thiserror::Error;

/// Magic bytes at the start of every GGUF file
pub const GGUF_MAGIC: &[u8; 4] = b"GGUF";

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("model file not found: {0}")]
    NotFound(String),

    #[error("not a GGUF file: {0}")]
    InvalidFormat(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Fixed-size header fields of a GGUF file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GgufMetadata {
    pub version: u32,
    pub tensor_count: u64,
    pub metadata_kv_count: u64,
}

/// Check that `path` is a readable GGUF file and return its header.
pub fn validate_gguf(path: &Path) -> Result<GgufMetadata, ModelError> {
    if !path.is_file() {
        return Err(ModelError::NotFound(path.display().to_string()));
    }

    let mut header = [0u8; 24];
    let mut file = File::open(path)?;
    file.read_exact(&mut header).map_err(|_| {
        ModelError::InvalidFormat(format!("{} is too small", path.display()))
    })?;

    if &header[0..4] != GGUF_MAGIC {
        return Err(ModelError::InvalidFormat(path.display().to_string()));
    }

    let mut u32_bytes = [0u8; 4];
    u32_bytes.copy_from_slice(&header[4..8]);
    let mut tensors = [0u8; 8];
    tensors.copy_from_slice(&header[8..16]);
    let mut kvs = [0u8; 8];
    kvs.copy_from_slice(&header[16..24]);

    Ok(GgufMetadata {
        version: u32::from_le_bytes(u32_bytes),
        tensor_count: u64::from_le_bytes(tensors),
        metadata_kv_count: u64::from_le_bytes(kvs),
    })
}

/// Quantization tags tried in order for each precision.
fn preferred_tags(precision: Precision) -> &'static [&'static str] {
    match precision {
        Precision::Int4 => &["Q4_K_M", "Q4_K_S", "Q4_0", "Q4_1", "IQ4_XS", "IQ4_NL"],
        Precision::Fp16 => &["F16", "FP16", "BF16"],
        Precision::Auto => &["Q4_K_M", "Q5_K_M", "Q8_0", "F16", "BF16"],
    }
}

/// `model-00002-of-00003.gguf` style shards
fn is_split_shard(file: &str) -> bool {
    let digits = |s: &str| !s.is_empty() && s.chars().all(|c| c.is_ascii_digit());
    let stem = file.trim_end_matches(".gguf");
    let tail: Vec<&str> = stem.rsplit('-').take(3).collect();
    matches!(tail.as_slice(), [total, "of", index] if digits(*total) && digits(*index))
}

/// Whether the file name carries `tag` as a whole token (`x.Q4_K_M.gguf`, `x-q4_k_m.gguf`).
fn has_tag(file: &str, tag: &str) -> bool {
    let name = file
        .rsplit('/')
        .next()
        .unwrap_or(file)
        .trim_end_matches(".gguf")
        .to_uppercase();
    name.split(['.', '-'])
        .any(|token| token == tag || token.replace('_', "") == tag.replace('_', ""))
}

/// Pick the GGUF file in `files` that best matches `precision`.
///
/// Split shards are skipped. `auto` falls back to the first remaining file;
/// an explicit precision without a matching file is an error.
pub fn select_gguf_file(files: &[String], precision: Precision) -> Result<String, String> {
    let candidates: Vec<&String> = files
        .iter()
        .filter(|f| f.to_lowercase().ends_with(".gguf"))
        .filter(|f| {
            let split = is_split_shard(f);
            if split {
                tracing::debug!("Skipping split GGUF shard {}", f);
            }
            !split
        })
        .collect();

    if candidates.is_empty() {
        return Err("No single-file GGUF models found in this repository".to_string());
    }

    for tag in preferred_tags(precision) {
        if let Some(found) = candidates.iter().find(|f| has_tag(f, tag)) {
            return Ok((*found).clone());
        }
    }

    match precision {
        Precision::Auto => Ok(candidates[0].clone()),
        other => Err(format!(
            "No {} GGUF file found. Available: {}",
            other,
            candidates
                .iter()
                .map(|s| s.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn files(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_select_int4() {
        let repo = files(&[
            "qwen2.5-3b-instruct-fp16.gguf",
            "qwen2.5-3b-instruct-q8_0.gguf",
            "qwen2.5-3b-instruct-q4_k_m.gguf",
        ]);
        assert_eq!(
            select_gguf_file(&repo, Precision::Int4).unwrap(),
            "qwen2.5-3b-instruct-q4_k_m.gguf"
        );
        assert_eq!(
            select_gguf_file(&repo, Precision::Fp16).unwrap(),
            "qwen2.5-3b-instruct-fp16.gguf"
        );
    }

    #[test]
    fn test_select_dotted_names() {
        let repo = files(&["Phi-3.5-mini-instruct.Q8_0.gguf", "Phi-3.5-mini-instruct.F16.gguf"]);
        assert_eq!(
            select_gguf_file(&repo, Precision::Auto).unwrap(),
            "Phi-3.5-mini-instruct.Q8_0.gguf"
        );
        assert!(select_gguf_file(&repo, Precision::Int4)
            .unwrap_err()
            .contains("Phi-3.5-mini-instruct.F16.gguf"));
    }

    #[test]
    fn test_auto_falls_back_to_first_file() {
        let repo = files(&["README.md", "model-custom.gguf", "other-custom.gguf"]);
        assert_eq!(
            select_gguf_file(&repo, Precision::Auto).unwrap(),
            "model-custom.gguf"
        );
    }

    #[test]
    fn test_split_shards_are_skipped() {
        let repo = files(&[
            "model-fp16-00001-of-00002.gguf",
            "model-fp16-00002-of-00002.gguf",
            "model-q4_k_m.gguf",
        ]);
        assert!(select_gguf_file(&repo, Precision::Fp16).is_err());
        assert_eq!(
            select_gguf_file(&repo, Precision::Auto).unwrap(),
            "model-q4_k_m.gguf"
        );
    }

    #[test]
    fn test_no_gguf_files() {
        assert!(select_gguf_file(&files(&["model.safetensors"]), Precision::Auto).is_err());
    }

    #[test]
    fn test_validate_gguf_header() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(GGUF_MAGIC).unwrap();
        file.write_all(&3u32.to_le_bytes()).unwrap();
        file.write_all(&291u64.to_le_bytes()).unwrap();
        file.write_all(&24u64.to_le_bytes()).unwrap();
        file.flush().unwrap();

        let meta = validate_gguf(file.path()).unwrap();
        assert_eq!(meta.version, 3);
        assert_eq!(meta.tensor_count, 291);
        assert_eq!(meta.metadata_kv_count, 24);
    }

    #[test]
    fn test_validate_gguf_rejects_other_files() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"PK\x03\x04 definitely not a model file").unwrap();
        file.flush().unwrap();
        assert!(matches!(
            validate_gguf(file.path()),
            Err(ModelError::InvalidFormat(_))
        ));

        assert!(matches!(
            validate_gguf(Path::new("/nonexistent/model.gguf")),
            Err(ModelError::NotFound(_))
        ));
    }
}
