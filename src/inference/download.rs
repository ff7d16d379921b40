use std::fs;
use std::io::copy;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::InferenceError;

/// Turn a model id into a file on disk.
///
/// Ids starting with `http://` or `https://` are downloaded once into
/// `cache_dir` and reused afterwards; anything else is taken as a local
/// path that must already exist.
pub fn resolve_model(id: &str, cache_dir: &Path) -> Result<PathBuf, InferenceError> {
    if !is_url(id) {
        let path = PathBuf::from(id);
        if !path.is_file() {
            return Err(InferenceError::Unavailable(format!(
                "model file {} not found",
                path.display()
            )));
        }
        return Ok(path);
    }

    let path = cache_dir.join(cache_file_name(id));
    if path.is_file() {
        info!(path = %path.display(), "found cached model");
        return Ok(path);
    }

    fs::create_dir_all(cache_dir)?;
    info!(url = id, path = %path.display(), "downloading model");
    download(id, &path)?;
    info!(path = %path.display(), "download complete");
    Ok(path)
}

fn is_url(id: &str) -> bool {
    id.starts_with("http://") || id.starts_with("https://")
}

/// Last path segment of the URL, without query or fragment.
fn cache_file_name(url: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    match path.rsplit('/').next() {
        Some(name) if !name.is_empty() && !name.contains(':') => name.to_string(),
        _ => "model.onnx".to_string(),
    }
}

/// Stream `url` into `path` through a temporary sibling so an interrupted
/// download never looks like a cached model.
fn download(url: &str, path: &Path) -> Result<(), InferenceError> {
    let mut response = reqwest::blocking::get(url)?;

    if !response.status().is_success() {
        return Err(InferenceError::Unavailable(format!(
            "failed to download {url}: {}",
            response.status()
        )));
    }

    let partial = path.with_extension("part");
    let mut dest = fs::File::create(&partial)?;
    copy(&mut response, &mut dest)?;
    drop(dest);
    fs::rename(&partial, path)?;
    Ok(())
}
