use async_trait::async_trait;
use thiserror::Error;

/// 客户端上传的原始图片
#[derive(Debug, Clone)]
pub struct ImageUpload {
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

impl ImageUpload {
    /// 根据 content-type（其次是文件名后缀）推断扩展名，只接受常见图片格式
    pub fn extension(&self) -> Result<&'static str, UploadError> {
        let from_mime = self.content_type.as_deref().and_then(|mime| {
            match mime.to_ascii_lowercase().as_str() {
                "image/png" => Some("png"),
                "image/jpeg" | "image/jpg" => Some("jpg"),
                "image/gif" => Some("gif"),
                "image/webp" => Some("webp"),
                _ => None,
            }
        });
        if let Some(ext) = from_mime {
            return Ok(ext);
        }

        let suffix = self
            .file_name
            .as_deref()
            .and_then(|name| name.rsplit_once('.'))
            .map(|(_, ext)| ext.to_ascii_lowercase());
        match suffix.as_deref() {
            Some("png") => Ok("png"),
            Some("jpg") | Some("jpeg") => Ok("jpg"),
            Some("gif") => Ok("gif"),
            Some("webp") => Ok("webp"),
            _ => Err(UploadError::UnsupportedType(
                self.content_type
                    .clone()
                    .unwrap_or_else(|| "unknown".to_owned()),
            )),
        }
    }
}

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("image is empty")]
    Empty,
    #[error("unsupported image type: {0}")]
    UnsupportedType(String),
    #[error("image exceeds {limit} bytes")]
    TooLarge { limit: usize },
    #[error("image storage failed: {0}")]
    Storage(String),
}

/// 图片托管服务：接收二进制内容，返回稳定的访问 URL
#[async_trait]
pub trait ImageStore: Send + Sync {
    async fn store(&self, upload: ImageUpload) -> Result<String, UploadError>;
}
