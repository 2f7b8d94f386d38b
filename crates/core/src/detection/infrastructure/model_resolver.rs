use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::detection::domain::detection_session_config::ModelVariant;

#[derive(Error, Debug)]
pub enum ModelResolveError {
    #[error("failed to create cache directory: {0}")]
    CacheDir(#[source] io::Error),
    #[error("download failed for {url}: {source}")]
    Download {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("failed to write model to {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("could not determine cache directory")]
    NoCacheDir,
    #[error("model {0} not found locally and no download URL configured")]
    NotFound(String),
}

/// File name a BlazeFace variant is stored under.
pub fn model_file_name(variant: ModelVariant) -> &'static str {
    match variant {
        ModelVariant::ShortRange => "blazeface_short_range.onnx",
        ModelVariant::FullRange => "blazeface_full_range.onnx",
    }
}

/// Locate a model file, downloading it into the cache as a last resort.
///
/// Looks in the user cache, then `model_dir`, then fetches
/// `{base_url}/{name}` when a base URL is configured.
pub fn resolve(
    name: &str,
    model_dir: Option<&Path>,
    base_url: Option<&str>,
) -> Result<PathBuf, ModelResolveError> {
    let cache_dir = model_cache_dir()?;
    let cached_path = cache_dir.join(name);
    if cached_path.exists() {
        return Ok(cached_path);
    }

    if let Some(path) = model_dir.map(|d| d.join(name)).filter(|p| p.exists()) {
        return Ok(path);
    }

    let base_url = base_url.ok_or_else(|| ModelResolveError::NotFound(name.to_string()))?;
    fs::create_dir_all(&cache_dir).map_err(ModelResolveError::CacheDir)?;
    let url = format!("{}/{name}", base_url.trim_end_matches('/'));
    download(&url, &cached_path)?;
    Ok(cached_path)
}

/// Platform-specific model cache directory, e.g. `~/.cache/StereoCam/models`.
pub fn model_cache_dir() -> Result<PathBuf, ModelResolveError> {
    dirs::cache_dir()
        .map(|d| d.join("StereoCam").join("models"))
        .ok_or(ModelResolveError::NoCacheDir)
}

/// Streams `url` into `dest` through a `.part` file so an interrupted
/// download never leaves a truncated model behind.
fn download(url: &str, dest: &Path) -> Result<(), ModelResolveError> {
    let temp_path = dest.with_extension("part");
    let result = fetch_into(url, &temp_path).and_then(|bytes| {
        fs::rename(&temp_path, dest).map_err(|e| ModelResolveError::Write {
            path: dest.to_path_buf(),
            source: e,
        })?;
        Ok(bytes)
    });

    match result {
        Ok(bytes) => {
            log::info!("Downloaded {url} ({bytes} bytes)");
            Ok(())
        }
        Err(e) => {
            let _ = fs::remove_file(&temp_path);
            Err(e)
        }
    }
}

fn fetch_into(url: &str, path: &Path) -> Result<u64, ModelResolveError> {
    let mut response = reqwest::blocking::get(url)
        .and_then(|r| r.error_for_status())
        .map_err(|e| ModelResolveError::Download {
            url: url.to_string(),
            source: e,
        })?;

    let write_err = |e| ModelResolveError::Write {
        path: path.to_path_buf(),
        source: e,
    };
    let mut file = fs::File::create(path).map_err(write_err)?;
    let bytes = io::copy(&mut response, &mut file).map_err(write_err)?;
    file.sync_all().map_err(write_err)?;
    Ok(bytes)
}
