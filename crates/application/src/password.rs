//! 密码哈希抽象，具体算法由基础设施层提供

use async_trait::async_trait;
use domain::PasswordHash;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PasswordHasherError {
    #[error("failed to hash password: {0}")]
    Hash(String),
    #[error("failed to verify password: {0}")]
    Verify(String),
    #[error("work factor {cost} outside {min}..={max}")]
    InvalidCost { cost: u32, min: u32, max: u32 },
}

impl PasswordHasherError {
    pub fn hash_error(message: impl Into<String>) -> Self {
        Self::Hash(message.into())
    }
}

#[async_trait]
pub trait PasswordHasher: Send + Sync {
    /// 每次调用生成新的盐，同一明文两次结果不同
    async fn hash(&self, plaintext: &str) -> Result<PasswordHash, PasswordHasherError>;

    /// 不匹配返回 `Ok(false)`；只有哈希本身损坏时才返回错误
    async fn verify(
        &self,
        plaintext: &str,
        stored: &PasswordHash,
    ) -> Result<bool, PasswordHasherError>;
}
