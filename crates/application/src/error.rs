use domain::{DomainError, RepositoryError};
use thiserror::Error;

use crate::password::PasswordHasherError;
use crate::upload::UploadError;

#[derive(Debug, Error)]
pub enum ApplicationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),
    #[error("password error: {0}")]
    Password(#[from] PasswordHasherError),
    #[error("upload error: {0}")]
    Upload(#[from] UploadError),
    #[error("infrastructure error: {0}")]
    Infrastructure(String),
    #[error("authentication failed")]
    Authentication,
}

impl ApplicationError {
    /// 创建基础设施错误
    pub fn infrastructure(message: impl Into<String>) -> Self {
        ApplicationError::Infrastructure(message.into())
    }

    /// 面向客户端的错误描述，存储细节不外泄
    pub fn client_message(&self) -> String {
        match self {
            ApplicationError::Domain(err) => err.to_string(),
            ApplicationError::Repository(RepositoryError::NotFound) => "not found".to_owned(),
            ApplicationError::Repository(RepositoryError::Conflict) => {
                "resource already exists".to_owned()
            }
            ApplicationError::Upload(UploadError::Storage(_)) => "internal server error".to_owned(),
            ApplicationError::Upload(err) => err.to_string(),
            ApplicationError::Authentication => "authentication failed".to_owned(),
            ApplicationError::Repository(RepositoryError::Storage { .. })
            | ApplicationError::Password(_)
            | ApplicationError::Infrastructure(_) => "internal server error".to_owned(),
        }
    }
}
