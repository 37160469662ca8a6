use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use reqwest::StatusCode;
use tokio::sync::Mutex;

use crate::integrity::{sha256_bytes, Checksums, CHECKSUMS_FILE};

/// Encoder fine-tuned by default.
pub const DEFAULT_PRETRAINED_MODEL: &str = "microsoft/BiomedNLP-PubMedBERT-base-uncased-abstract";

const HF_BASE_URL: &str = "https://huggingface.co";
const CACHE_ENV_VAR: &str = "SYMPTOM_CLASSIFIER_CACHE";

/// Files fetched for a pretrained encoder. The first entry of each group that
/// the hub actually serves is kept.
const FILE_GROUPS: [(&str, &[&str]); 3] = [
    ("config", &["config.json"]),
    ("tokenizer", &["tokenizer.json", "vocab.txt"]),
    ("weights", &["model.safetensors", "pytorch_model.bin"]),
];

#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("Model not downloaded: {0}")]
    NotDownloaded(String),
    #[error("Download error: {0}")]
    DownloadError(#[from] reqwest::Error),
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
    #[error("Model verification failed")]
    VerificationFailed,
    #[error("Hash mismatch: expected {expected}, got {actual} for {file_type} file")]
    HashMismatch {
        file_type: String,
        expected: String,
        actual: String,
    },
    #[error("None of {candidates:?} is available for {repo}")]
    MissingFile { repo: String, candidates: Vec<String> },
}

/// Downloads pretrained encoders from the Hugging Face hub into a local
/// cache, one directory per repository, each with a `checksums.json`.
#[derive(Clone)]
pub struct ModelManager {
    models_dir: PathBuf,
    base_url: String,
    download_lock: Arc<Mutex<()>>,
}

impl ModelManager {
    /// Creates a new ModelManager with the default models directory
    pub fn new_default() -> io::Result<Self> {
        Self::new(Self::get_default_models_dir())
    }

    /// Returns the default models directory path
    pub fn get_default_models_dir() -> PathBuf {
        // 1. Check environment variable
        if let Ok(path) = env::var(CACHE_ENV_VAR) {
            return PathBuf::from(path).join("models");
        }

        // 2. Use platform-specific cache directory
        if let Some(cache_dir) = dirs::cache_dir() {
            return cache_dir.join("symptom-classifier").join("models");
        }

        // 3. Fallback to user's home directory
        if let Some(home_dir) = dirs::home_dir() {
            return home_dir.join(".cache").join("symptom-classifier").join("models");
        }

        // 4. If all else fails, use system temp directory (platform agnostic)
        env::temp_dir().join("symptom-classifier").join("models")
    }

    pub fn new<P: AsRef<Path>>(models_dir: P) -> io::Result<Self> {
        let models_dir = models_dir.as_ref().to_path_buf();
        fs::create_dir_all(&models_dir)?;
        Ok(Self {
            models_dir,
            base_url: HF_BASE_URL.to_string(),
            download_lock: Arc::new(Mutex::new(())),
        })
    }

    /// Points downloads at a hub mirror.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    /// Local directory for `repo` (`org/name` becomes `org--name`).
    pub fn get_model_dir(&self, repo: &str) -> PathBuf {
        self.models_dir.join(repo.replace('/', "--"))
    }

    fn file_url(&self, repo: &str, file: &str) -> String {
        format!("{}/{}/resolve/main/{}", self.base_url, repo, file)
    }

    /// True when the checksum manifest exists and every file it lists is
    /// present. Content is not re-hashed; see [`verify_model`](Self::verify_model).
    pub fn is_model_downloaded(&self, repo: &str) -> bool {
        let dir = self.get_model_dir(repo);
        log::info!("Checking if model {} is downloaded in {:?}", repo, dir);
        match Checksums::load(&dir) {
            Ok(checksums) => {
                !checksums.files.is_empty() && checksums.files.keys().all(|name| dir.join(name).exists())
            }
            Err(_) => false,
        }
    }

    /// Re-hashes every cached file against `checksums.json`.
    pub fn verify_model(&self, repo: &str) -> Result<bool, ModelError> {
        let dir = self.get_model_dir(repo);
        if !dir.join(CHECKSUMS_FILE).exists() {
            log::info!("No checksum manifest for {}", repo);
            return Ok(false);
        }
        let mismatches = Checksums::load(&dir)?.verify(&dir)?;
        for mismatch in &mismatches {
            log::warn!("Verification failed: {}", mismatch);
        }
        Ok(mismatches.is_empty())
    }

    pub async fn download_model(&self, repo: &str) -> Result<PathBuf, ModelError> {
        let _lock = self.download_lock.lock().await;

        let model_dir = self.get_model_dir(repo);
        log::info!("Creating model directory at {:?}", model_dir);
        fs::create_dir_all(&model_dir)?;

        match self.fetch_all(repo, &model_dir).await {
            Ok(checksums) => {
                checksums.save(&model_dir)?;
                log::info!("Model {} ready at {:?}", repo, model_dir);
                Ok(model_dir)
            }
            Err(e) => {
                log::error!("Failed to download {}: {}", repo, e);
                // Cleanup on failure
                let _ = self.remove_download(repo);
                Err(e)
            }
        }
    }

    async fn fetch_all(&self, repo: &str, model_dir: &Path) -> Result<Checksums, ModelError> {
        let mut checksums = Checksums::default();
        for (file_type, candidates) in FILE_GROUPS {
            let mut fetched = false;
            for &name in candidates {
                let url = self.file_url(repo, name);
                if let Some(hash) = self.download_file(&url, &model_dir.join(name), file_type).await? {
                    checksums.insert(name, hash);
                    fetched = true;
                    break;
                }
                log::info!("{} not served for {}, trying next candidate", name, repo);
            }
            if !fetched {
                return Err(ModelError::MissingFile {
                    repo: repo.to_string(),
                    candidates: candidates.iter().map(|c| c.to_string()).collect(),
                });
            }
        }
        Ok(checksums)
    }

    /// Downloads one file and returns its SHA-256, or `None` on 404.
    async fn download_file(&self, url: &str, path: &Path, file_type: &str) -> Result<Option<String>, ModelError> {
        log::info!("Downloading {} file from {} to {:?}", file_type, url, path);
        let response = reqwest::get(url).await?;
        log::info!("Download response status: {}", response.status());
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let bytes = response.error_for_status()?.bytes().await?;
        log::info!("Downloaded {} bytes", bytes.len());
        let hash = sha256_bytes(&bytes);

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, &bytes)?;

        // Verify after writing
        let written = crate::integrity::sha256_file(path)?;
        if written != hash {
            log::error!("{} hash mismatch: expected {}, got {}", file_type, hash, written);
            return Err(ModelError::HashMismatch {
                file_type: file_type.to_string(),
                expected: hash,
                actual: written,
            });
        }
        Ok(Some(hash))
    }

    pub fn remove_download(&self, repo: &str) -> Result<(), ModelError> {
        let dir = self.get_model_dir(repo);
        if dir.exists() {
            fs::remove_dir_all(&dir)?;
        }
        Ok(())
    }

    /// Ensures that a model is downloaded and verified.
    /// If the model doesn't exist, it will be downloaded.
    /// If verification fails, it will be re-downloaded.
    pub async fn ensure_model_downloaded(&self, repo: &str) -> Result<PathBuf, ModelError> {
        log::info!("Checking if model {} is downloaded...", repo);
        if !self.is_model_downloaded(repo) {
            log::info!("Model not found, downloading...");
            return self.download_model(repo).await;
        }
        log::info!("Model exists, verifying...");
        if !self.verify_model(repo)? {
            log::info!("Model verification failed, re-downloading...");
            self.remove_download(repo)?;
            return self.download_model(repo).await;
        }
        log::info!("Model verification successful");
        Ok(self.get_model_dir(repo))
    }

    /// Resolves `model` to a local encoder directory: an existing directory is
    /// used as-is, anything else is treated as a hub repository id.
    pub async fn resolve(&self, model: &str) -> Result<PathBuf, ModelError> {
        let local = Path::new(model);
        if local.is_dir() {
            log::info!("Using local encoder directory {:?}", local);
            return Ok(local.to_path_buf());
        }
        self.ensure_model_downloaded(model).await
    }

    /// Returns the cached directory for `repo` without downloading.
    pub fn cached_model_dir(&self, repo: &str) -> Result<PathBuf, ModelError> {
        if self.is_model_downloaded(repo) {
            Ok(self.get_model_dir(repo))
        } else {
            Err(ModelError::NotDownloaded(repo.to_string()))
        }
    }
}
