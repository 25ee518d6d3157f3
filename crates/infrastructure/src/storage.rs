use std::path::PathBuf;

use application::{ImageStore, ImageUpload, UploadError};
use async_trait::async_trait;
use uuid::Uuid;

/// 把上传的图片写入本地目录，文件名为 `<uuid>.<ext>`
#[derive(Debug, Clone)]
pub struct LocalImageStore {
    dir: PathBuf,
    public_base_url: String,
    max_bytes: usize,
}

impl LocalImageStore {
    pub fn new(dir: impl Into<PathBuf>, public_base_url: impl Into<String>, max_bytes: usize) -> Self {
        Self {
            dir: dir.into(),
            public_base_url: public_base_url.into().trim_end_matches('/').to_owned(),
            max_bytes,
        }
    }
}

#[async_trait]
impl ImageStore for LocalImageStore {
    async fn store(&self, upload: ImageUpload) -> Result<String, UploadError> {
        if upload.bytes.is_empty() {
            return Err(UploadError::Empty);
        }
        if upload.bytes.len() > self.max_bytes {
            return Err(UploadError::TooLarge {
                limit: self.max_bytes,
            });
        }
        let extension = upload.extension()?;

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|err| UploadError::Storage(err.to_string()))?;

        let file_name = format!("{}.{extension}", Uuid::new_v4());
        let path = self.dir.join(&file_name);
        tokio::fs::write(&path, &upload.bytes)
            .await
            .map_err(|err| UploadError::Storage(err.to_string()))?;

        tracing::debug!(path = %path.display(), bytes = upload.bytes.len(), "图片已保存");
        Ok(format!("{}/{file_name}", self.public_base_url))
    }
}
