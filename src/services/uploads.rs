use crate::{config::AppConfig, errors::ServiceError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, instrument, warn};
use uuid::Uuid;

pub const MAX_FILES_PER_REQUEST: usize = 5;

const ALLOWED_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp", "avif", "svg"];

/// An image read from a request but not yet written to disk.
#[derive(Debug, Clone)]
pub struct PendingImage {
    pub original_name: Option<String>,
    pub content_type: Option<String>,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadedFile {
    pub url: String,
    pub filename: String,
}

/// Stores shopper-visible images on local disk under `upload_dir`; they are
/// served back from `/uploads`.
#[derive(Clone)]
pub struct UploadService {
    upload_dir: PathBuf,
    max_bytes: usize,
    config: AppConfig,
}

impl UploadService {
    pub fn new(config: AppConfig) -> Self {
        Self {
            upload_dir: PathBuf::from(&config.upload_dir),
            max_bytes: config.max_upload_bytes,
            config,
        }
    }

    pub fn upload_dir(&self) -> &Path {
        &self.upload_dir
    }

    /// Rejects anything that is not a non-empty image within the size limit.
    pub fn check_image(&self, content_type: Option<&str>, len: usize) -> Result<(), ServiceError> {
        if !content_type.is_some_and(|ct| ct.starts_with("image/")) {
            warn!(?content_type, "Rejected non-image upload");
            return Err(ServiceError::InvalidArgument(
                "Only image files are allowed".to_string(),
            ));
        }
        if len == 0 {
            return Err(ServiceError::InvalidArgument("File is empty".to_string()));
        }
        if len > self.max_bytes {
            return Err(ServiceError::InvalidArgument(format!(
                "File exceeds the {} byte limit",
                self.max_bytes
            )));
        }
        Ok(())
    }

    #[instrument(skip(self, data), fields(size = data.len()))]
    pub async fn store_image(
        &self,
        original_name: Option<&str>,
        content_type: Option<&str>,
        data: &[u8],
    ) -> Result<UploadedFile, ServiceError> {
        self.check_image(content_type, data.len())?;

        let filename = match extension_of(original_name) {
            Some(ext) => format!("{}.{}", Uuid::new_v4(), ext),
            None => Uuid::new_v4().to_string(),
        };

        tokio::fs::create_dir_all(&self.upload_dir)
            .await
            .map_err(|e| ServiceError::StorageError(e.to_string()))?;
        tokio::fs::write(self.upload_dir.join(&filename), data)
            .await
            .map_err(|e| ServiceError::StorageError(e.to_string()))?;

        info!(filename = %filename, "Image stored");
        Ok(UploadedFile {
            url: self.config.upload_url(&filename),
            filename,
        })
    }

    /// Stores a batch all-or-nothing: every file is checked before the first
    /// write, and files already written are removed if a later write fails.
    #[instrument(skip(self, images), fields(count = images.len()))]
    pub async fn store_images(
        &self,
        images: &[PendingImage],
    ) -> Result<Vec<UploadedFile>, ServiceError> {
        if images.len() > MAX_FILES_PER_REQUEST {
            return Err(ServiceError::InvalidArgument(format!(
                "At most {} images per request",
                MAX_FILES_PER_REQUEST
            )));
        }
        for image in images {
            self.check_image(image.content_type.as_deref(), image.data.len())?;
        }

        let mut stored = Vec::with_capacity(images.len());
        for image in images {
            match self.store_pending(image).await {
                Ok(file) => stored.push(file),
                Err(err) => {
                    for file in &stored {
                        self.remove(&file.filename).await;
                    }
                    return Err(err);
                }
            }
        }
        Ok(stored)
    }

    pub async fn store_pending(&self, image: &PendingImage) -> Result<UploadedFile, ServiceError> {
        self.store_image(
            image.original_name.as_deref(),
            image.content_type.as_deref(),
            &image.data,
        )
        .await
    }

    /// Deletes a stored file; a file that is already gone is not an error.
    pub async fn remove(&self, filename: &str) {
        let path = self.upload_dir.join(filename);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => info!(filename, "Image removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(filename, error = %e, "Failed to remove image"),
        }
    }
}

/// Lowercased extension of `name` if it is a known image type.
fn extension_of(name: Option<&str>) -> Option<String> {
    let ext = Path::new(name?).extension()?.to_str()?.to_ascii_lowercase();
    ALLOWED_EXTENSIONS.contains(&ext.as_str()).then_some(ext)
}
