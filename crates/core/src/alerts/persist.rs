//! JSON document persistence for rules and events

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use tracing::{debug, info};

/// Load a JSON document, or the default value when the file does not exist yet
pub(crate) async fn load_json<T>(path: &Path) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    let data = match tokio::fs::read(path).await {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!(path = %path.display(), "No persisted state, starting empty");
            return Ok(T::default());
        }
        Err(e) => return Err(e).with_context(|| format!("Failed to read {:?}", path)),
    };

    if data.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(&data).with_context(|| format!("Failed to parse {:?}", path))
}

/// Write a JSON document atomically (temp file, then rename)
pub(crate) async fn save_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create directory {:?}", parent))?;
    }

    let json = serde_json::to_vec_pretty(value).context("Failed to serialize document")?;
    let temp_path = path.with_extension("json.tmp");

    tokio::fs::write(&temp_path, &json)
        .await
        .with_context(|| format!("Failed to write {:?}", temp_path))?;
    tokio::fs::rename(&temp_path, path)
        .await
        .with_context(|| format!("Failed to rename {:?} to {:?}", temp_path, path))?;

    debug!(path = %path.display(), bytes = json.len(), "Persisted document");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_missing_file_loads_default() {
        let dir = TempDir::new().unwrap();
        let loaded: Vec<String> = load_json(&dir.path().join("absent.json")).await.unwrap();
        assert!(loaded.is_empty());
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("doc.json");

        save_json(&path, &vec!["a".to_string(), "b".to_string()])
            .await
            .unwrap();
        let loaded: Vec<String> = load_json(&path).await.unwrap();
        assert_eq!(loaded, vec!["a", "b"]);
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("doc.json");
        tokio::fs::write(&path, b"{not json").await.unwrap();

        let result: Result<Vec<String>> = load_json(&path).await;
        assert!(result.is_err());
    }
}
