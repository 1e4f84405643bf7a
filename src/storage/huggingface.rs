//! HuggingFace model downloader
//!
//! Resolves a configured model reference to a GGUF file on disk, downloading
//! it from the HuggingFace Hub when needed.

use crate::inference::model::select_gguf_file;
use crate::storage::StorageError;
use crate::types::config::ChatConfig;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

const HUB_URL: &str = "https://huggingface.co";
const USER_AGENT: &str = concat!("localchat/", env!("CARGO_PKG_VERSION"));
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
/// Longest silence tolerated between two reads of a response body
const READ_TIMEOUT: Duration = Duration::from_secs(120);

/// Parsed HuggingFace model reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HuggingFaceUrl {
    pub repo_id: String,
    /// Empty when the reference names only a repository
    pub filename: String,
    pub revision: String,
}

fn sanitize_local_filename(filename: &str) -> Result<String, StorageError> {
    let invalid = || StorageError::InvalidReference(format!("invalid model filename {filename:?}"));

    let trimmed = filename.trim();
    if trimmed.is_empty() {
        return Err(invalid());
    }

    let no_query = trimmed.split('?').next().unwrap_or(trimmed);
    let no_fragment = no_query.split('#').next().unwrap_or(no_query);
    let no_leading = no_fragment.trim_start_matches('/');

    let flattened = no_leading.replace('\\', "/").replace('/', "__");

    let mut sanitized: String = flattened
        .chars()
        .map(|ch| {
            let reserved = matches!(ch, '<' | '>' | ':' | '"' | '|' | '?' | '*');
            if reserved || ch.is_control() {
                '_'
            } else {
                ch
            }
        })
        .collect();

    while sanitized.ends_with('.') || sanitized.ends_with(' ') {
        sanitized.pop();
    }

    if sanitized.is_empty() {
        return Err(invalid());
    }
    Ok(sanitized)
}

impl HuggingFaceUrl {
    /// Parse a Hub reference.
    ///
    /// Accepted forms:
    /// - `https://huggingface.co/user/repo/blob/<rev>/file.gguf`
    /// - `https://huggingface.co/user/repo/resolve/<rev>/file.gguf`
    /// - `https://huggingface.co/user/repo`
    /// - `user/repo/file.gguf`
    /// - `user/repo`
    pub fn parse(reference: &str) -> Result<Self, StorageError> {
        let reference = reference.trim();
        let reference = reference.split('?').next().unwrap_or(reference);
        let reference = reference.split('#').next().unwrap_or(reference);

        let path = reference
            .strip_prefix("https://huggingface.co/")
            .or_else(|| reference.strip_prefix("http://huggingface.co/"))
            .unwrap_or(reference)
            .trim_end_matches('/');

        let parts: Vec<&str> = path.split('/').collect();
        if parts.len() < 2 || parts[0].is_empty() || parts[1].is_empty() {
            return Err(StorageError::InvalidReference(reference.to_string()));
        }
        let repo_id = format!("{}/{}", parts[0], parts[1]);
        let rest = &parts[2..];

        // blob/<rev>/file or resolve/<rev>/file
        if let [kind, revision, file @ ..] = rest {
            if (*kind == "blob" || *kind == "resolve") && !file.is_empty() {
                return Ok(Self {
                    repo_id,
                    filename: file.join("/"),
                    revision: revision.to_string(),
                });
            }
        }

        Ok(Self {
            repo_id,
            filename: rest.join("/"),
            revision: "main".to_string(),
        })
    }

    /// Download URL of `filename` in this repository
    pub fn download_url(&self, filename: &str) -> String {
        format!(
            "{}/{}/resolve/{}/{}",
            HUB_URL, self.repo_id, self.revision, filename
        )
    }

    /// Name of the local copy of `filename` inside the models directory
    pub fn local_name(&self, filename: &str) -> Result<String, StorageError> {
        sanitize_local_filename(&format!("{}/{}", self.repo_id, filename))
    }
}

fn client() -> Result<reqwest::Client, StorageError> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        // Stall limits only; a multi-GB body has no overall deadline
        .connect_timeout(CONNECT_TIMEOUT)
        .read_timeout(READ_TIMEOUT)
        .build()
        .map_err(|e| StorageError::Download(format!("failed to create HTTP client: {e}")))
}

fn authorized(request: reqwest::RequestBuilder, token: Option<&str>) -> reqwest::RequestBuilder {
    match token {
        Some(token) => request.bearer_auth(token),
        None => request,
    }
}

#[derive(Debug, serde::Deserialize)]
struct FileInfo {
    path: String,
}

/// List the GGUF files of a Hub repository.
pub async fn list_gguf_files(
    repo_id: &str,
    revision: &str,
    token: Option<&str>,
) -> Result<Vec<String>, StorageError> {
    let api_url = format!("{HUB_URL}/api/models/{repo_id}/tree/{revision}");

    let response = authorized(client()?.get(&api_url), token)
        .send()
        .await
        .map_err(|e| StorageError::Download(format!("failed to fetch repo info: {e}")))?;

    if !response.status().is_success() {
        return Err(StorageError::Download(format!(
            "listing {} failed with status {}",
            repo_id,
            response.status()
        )));
    }

    let files: Vec<FileInfo> = response
        .json()
        .await
        .map_err(|e| StorageError::Download(format!("failed to parse repo listing: {e}")))?;

    Ok(files
        .into_iter()
        .filter(|f| f.path.to_lowercase().ends_with(".gguf"))
        .map(|f| f.path)
        .collect())
}

/// Download `url` to `output_path` through a temporary file.
///
/// An existing non-empty file at `output_path` is reused.
pub async fn download_file(
    url: &str,
    output_path: &Path,
    token: Option<&str>,
    progress: impl Fn(u64, u64) + Send,
) -> Result<PathBuf, StorageError> {
    if is_nonempty_file(output_path) {
        tracing::info!("Model already downloaded: {}", output_path.display());
        return Ok(output_path.to_path_buf());
    }

    if let Some(parent) = output_path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut temp_name = output_path.as_os_str().to_owned();
    temp_name.push(".tmp");
    let temp_path = PathBuf::from(temp_name);

    tracing::info!("Downloading from: {}", url);
    let mut response = authorized(client()?.get(url), token)
        .send()
        .await
        .map_err(|e| StorageError::Download(e.to_string()))?;

    if !response.status().is_success() {
        return Err(StorageError::Download(format!(
            "{} returned status {}",
            url,
            response.status()
        )));
    }

    let total_size = response.content_length().unwrap_or(0);
    tracing::info!("File size: {}", format_size(total_size));

    let written = write_body(&mut response, &temp_path, total_size, progress).await;
    let finished = written.and_then(|downloaded| {
        if total_size > 0 && downloaded != total_size {
            return Err(StorageError::Download(format!(
                "incomplete download: got {downloaded} bytes, expected {total_size}"
            )));
        }
        fs::rename(&temp_path, output_path)?;
        Ok(())
    });

    if let Err(e) = finished {
        if let Err(cleanup) = fs::remove_file(&temp_path) {
            if cleanup.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!("Could not remove {}: {}", temp_path.display(), cleanup);
            }
        }
        return Err(e);
    }

    tracing::info!("Download complete: {}", output_path.display());
    Ok(output_path.to_path_buf())
}

/// Stream the response body into `path`, returning the number of bytes written.
async fn write_body(
    response: &mut reqwest::Response,
    path: &Path,
    total_size: u64,
    progress: impl Fn(u64, u64) + Send,
) -> Result<u64, StorageError> {
    let mut file = File::create(path).await?;
    let mut downloaded: u64 = 0;
    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|e| StorageError::Download(e.to_string()))?
    {
        file.write_all(&chunk).await?;
        downloaded += chunk.len() as u64;
        progress(downloaded, total_size);
    }
    file.flush().await?;
    Ok(downloaded)
}

fn is_nonempty_file(path: &Path) -> bool {
    fs::metadata(path)
        .map(|m| m.is_file() && m.len() > 0)
        .unwrap_or(false)
}

/// Replace a leading `~/` with the home directory.
fn expand_home(model_id: &str) -> PathBuf {
    if let Some(rest) = model_id.strip_prefix("~/") {
        if let Some(dirs) = directories::BaseDirs::new() {
            return dirs.home_dir().join(rest);
        }
    }
    PathBuf::from(model_id)
}

/// A reference that names a file on this machine rather than a Hub repository.
fn local_model_path(model_id: &str) -> Option<PathBuf> {
    let model_id = model_id.trim();
    let path = expand_home(model_id);
    let explicit = path.is_absolute()
        || model_id.starts_with("./")
        || model_id.starts_with("../")
        || model_id.starts_with("~/");
    let is_gguf = model_id.to_lowercase().ends_with(".gguf");

    if explicit || (is_gguf && path.is_file()) {
        Some(path)
    } else {
        None
    }
}

/// GGUF files of `repo` already present in `models_dir`, as repository paths.
fn cached_files(models_dir: &Path, repo: &HuggingFaceUrl) -> Vec<String> {
    let prefix = match sanitize_local_filename(&format!("{}/", repo.repo_id)) {
        Ok(prefix) => prefix,
        Err(_) => return Vec::new(),
    };
    let Ok(entries) = fs::read_dir(models_dir) else {
        return Vec::new();
    };

    let mut files: Vec<String> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| is_nonempty_file(&entry.path()))
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter_map(|name| name.strip_prefix(&prefix).map(|f| f.replace("__", "/")))
        .filter(|f| f.to_lowercase().ends_with(".gguf"))
        .collect();
    files.sort();
    files
}

/// Resolve the configured model to a GGUF file on disk.
///
/// Local paths are returned unchanged. Hub references download the named
/// file, or the file matching `config.precision` when only a repository is
/// given. When the Hub cannot be reached a previously downloaded match is used.
#[tracing::instrument(skip_all, fields(model = %config.model_id, precision = %config.precision))]
pub async fn resolve_model(config: &ChatConfig) -> Result<PathBuf, StorageError> {
    if let Some(path) = local_model_path(&config.model_id) {
        tracing::debug!("Using local model file {}", path.display());
        return Ok(path);
    }

    let repo = HuggingFaceUrl::parse(&config.model_id)?;
    let token = config.hf_token.as_deref();

    let filename = if repo.filename.is_empty() {
        match list_gguf_files(&repo.repo_id, &repo.revision, token).await {
            Ok(files) => select_gguf_file(&files, config.precision)
                .map_err(StorageError::NoMatchingFile)?,
            Err(e) => {
                let cached = cached_files(&config.models_dir, &repo);
                if cached.is_empty() {
                    return Err(e);
                }
                tracing::warn!("{}; falling back to downloaded files", e);
                select_gguf_file(&cached, config.precision).map_err(StorageError::NoMatchingFile)?
            }
        }
    } else {
        repo.filename.clone()
    };

    tracing::info!("Selected {} from {}", filename, repo.repo_id);
    let output_path = config.models_dir.join(repo.local_name(&filename)?);

    let last_logged = std::sync::atomic::AtomicU64::new(0);
    let report = move |done: u64, total: u64| {
        if total == 0 {
            return;
        }
        let percent = done * 100 / total;
        if percent >= last_logged.load(std::sync::atomic::Ordering::Relaxed) + 10 {
            last_logged.store(percent, std::sync::atomic::Ordering::Relaxed);
            tracing::info!(
                "Downloaded {} / {} ({}%)",
                format_size(done),
                format_size(total),
                percent
            );
        }
    };

    download_file(&repo.download_url(&filename), &output_path, token, report).await
}

/// Get a human-readable size string
pub fn format_size(bytes: u64) -> String {
    let bytes = bytes as f64;
    if bytes < 1024.0 {
        format!("{} B", bytes as u64)
    } else if bytes < 1024.0 * 1024.0 {
        format!("{:.2} KB", bytes / 1024.0)
    } else if bytes < 1024.0 * 1024.0 * 1024.0 {
        format!("{:.2} MB", bytes / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes / (1024.0 * 1024.0 * 1024.0))
    }
}
