//! `.env` persistence for the model selection made in the settings dialog.

use crate::storage::StorageError;
use crate::types::config::{keys, Precision};
use std::fs;
use std::path::{Path, PathBuf};

/// `.env` in the current working directory
pub fn default_env_path() -> PathBuf {
    std::env::current_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join(".env")
}

/// Replace the first `KEY=` line, or append one when the key is absent.
fn upsert(lines: &mut Vec<String>, key: &str, value: &str) {
    let prefix = format!("{key}=");
    let entry = format!("{key}={value}");
    match lines.iter_mut().find(|line| line.starts_with(&prefix)) {
        Some(line) => *line = entry,
        None => lines.push(entry),
    }
}

/// Write `MODEL_ID` and `PRECISION` into the `.env` file at `path`.
///
/// Other lines are kept in order. The file is written with LF line endings.
pub fn save_env(path: &Path, model_id: &str, precision: Precision) -> Result<(), StorageError> {
    let mut lines: Vec<String> = if path.exists() {
        fs::read_to_string(path)?
            .lines()
            .map(str::to_string)
            .collect()
    } else {
        Vec::new()
    };

    upsert(&mut lines, keys::MODEL_ID, model_id);
    upsert(&mut lines, keys::PRECISION, precision.as_str());

    let mut contents = lines.join("\n");
    contents.push('\n');
    fs::write(path, contents)?;

    tracing::debug!("Saved model selection to {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_creates_missing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(".env");

        save_env(&path, "Qwen/Qwen2.5-3B-Instruct-GGUF", Precision::Auto).unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(
            contents,
            "MODEL_ID=Qwen/Qwen2.5-3B-Instruct-GGUF\nPRECISION=auto\n"
        );
    }

    #[test]
    fn test_replaces_in_place_and_keeps_other_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(".env");
        fs::write(
            &path,
            "# local overrides\r\nPRECISION=auto\r\nTEMPERATURE=0.3\r\nMODEL_ID=old/model\r\n",
        )
        .unwrap();

        save_env(&path, "new/model-GGUF", Precision::Fp16).unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(
            contents,
            "# local overrides\nPRECISION=fp16\nTEMPERATURE=0.3\nMODEL_ID=new/model-GGUF\n"
        );
    }

    #[test]
    fn test_appends_absent_key() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(".env");
        fs::write(&path, "MODEL_ID_BACKUP=x\nMODEL_ID=a/b\n").unwrap();

        save_env(&path, "c/d", Precision::Int4).unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "MODEL_ID_BACKUP=x\nMODEL_ID=c/d\nPRECISION=int4\n");
    }
}
