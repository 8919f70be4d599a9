use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;

use super::{KvStore, StoreError};

/// One JSON file per entry, laid out as `{base}/{collection}/{id}.json`.
pub struct FileKv {
    base_dir: PathBuf,
}

impl FileKv {
    pub async fn new(base_dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let base_dir = base_dir.into();
        fs::create_dir_all(&base_dir).await?;
        Ok(Self { base_dir })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn entry_path(&self, collection: &str, id: &str) -> Result<PathBuf, StoreError> {
        check_key(collection)?;
        check_key(id)?;
        Ok(self.base_dir.join(collection).join(format!("{}.json", id)))
    }
}

// Keys become path segments
fn check_key(key: &str) -> Result<(), StoreError> {
    if key.is_empty() || key == "." || key == ".." || key.contains(['/', '\\']) {
        return Err(StoreError::InvalidKey(key.to_string()));
    }
    Ok(())
}

#[async_trait]
impl KvStore for FileKv {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<String>, StoreError> {
        let path = self.entry_path(collection, id)?;
        match fs::read_to_string(&path).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn put(&self, collection: &str, id: &str, value: String) -> Result<(), StoreError> {
        let path = self.entry_path(collection, id)?;
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).await?;
        }
        // Write then rename so readers never see a half-written entry
        let tmp_path = path.with_extension("json.tmp");
        fs::write(&tmp_path, value).await?;
        fs::rename(&tmp_path, &path).await?;
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<bool, StoreError> {
        let path = self.entry_path(collection, id)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn values(&self, collection: &str) -> Result<Vec<String>, StoreError> {
        check_key(collection)?;
        let dir = self.base_dir.join(collection);
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut values = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|e| e == "json") {
                values.push(fs::read_to_string(&path).await?);
            }
        }
        Ok(values)
    }
}
