//! Blob storage for book covers and profile pictures.
//!
//! Objects are plain files under a root directory; keys are relative paths
//! such as `covers/<book id>.jpg`. URLs are `<public base>/<key>`.

use std::path::{Component, Path, PathBuf};

use log::info;

use crate::app_response::AppResponse;

#[derive(Debug, Clone)]
pub struct ObjectStore {
    root: PathBuf,
    public_base: String,
}

impl ObjectStore {
    /// Creates `root` if needed. Without `public_base`, URLs are `file://` URLs.
    pub fn open(root: &Path, public_base: Option<&str>) -> Result<Self, AppResponse> {
        std::fs::create_dir_all(root)?;
        let public_base = match public_base {
            Some(base) => base.trim_end_matches('/').to_string(),
            None => {
                let absolute = std::fs::canonicalize(root)?;
                format!("file://{}", absolute.display())
            }
        };
        Ok(Self {
            root: root.to_path_buf(),
            public_base,
        })
    }

    pub fn upload(&self, key: &str, bytes: &[u8]) -> Result<(), AppResponse> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, bytes)?;
        info!("Stored object {key} ({} bytes)", bytes.len());
        Ok(())
    }

    pub fn get_url(&self, key: &str) -> Result<String, AppResponse> {
        let path = self.path_for(key)?;
        if !path.is_file() {
            return Err(AppResponse::NotFound(format!("No object stored under {key}")));
        }
        Ok(format!("{}/{}", self.public_base, key))
    }

    pub fn read(&self, key: &str) -> Result<Vec<u8>, AppResponse> {
        let path = self.path_for(key)?;
        if !path.is_file() {
            return Err(AppResponse::NotFound(format!("No object stored under {key}")));
        }
        Ok(std::fs::read(path)?)
    }

    /// Removes an object. A missing object is not an error.
    pub fn delete(&self, key: &str) -> Result<(), AppResponse> {
        let path = self.path_for(key)?;
        match std::fs::remove_file(&path) {
            Ok(()) => {
                info!("Removed object {key}");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, AppResponse> {
        let relative = Path::new(key);
        let is_plain = !key.is_empty()
            && relative
                .components()
                .all(|component| matches!(component, Component::Normal(_)));
        if !is_plain {
            return Err(AppResponse::BadRequest(format!("Invalid object key: {key}")));
        }
        Ok(self.root.join(relative))
    }
}

/// Builds `<prefix>/<id>.<ext>`, keeping only alphanumeric extension characters.
pub fn object_key(prefix: &str, id: &str, extension: &str) -> String {
    let extension: String = extension
        .trim_start_matches('.')
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .collect::<String>()
        .to_ascii_lowercase();
    if extension.is_empty() {
        format!("{prefix}/{id}")
    } else {
        format!("{prefix}/{id}.{extension}")
    }
}
