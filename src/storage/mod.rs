//! Persistent storage
//!
//! This module handles the `.env` file written by the settings dialog and the
//! GGUF files downloaded from the Hugging Face Hub.

pub mod env_file;
pub mod huggingface;

use directories::ProjectDirs;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("could not determine a data directory for this platform")]
    NoDataDir,

    #[error("invalid model reference: {0}")]
    InvalidReference(String),

    #[error("download failed: {0}")]
    Download(String),

    #[error("{0}")]
    NoMatchingFile(String),
}

/// Application data directory (`~/.local/share/localchat` on Linux)
pub fn get_data_dir() -> Result<PathBuf, StorageError> {
    ProjectDirs::from("", "", "localchat")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .ok_or(StorageError::NoDataDir)
}
