use application::{password::PasswordHasherError, PasswordHasher};
use async_trait::async_trait;
use domain::PasswordHash;

const MIN_COST: u32 = 4;
const MAX_COST: u32 = 31;

/// bcrypt 密码哈希器，计算放在阻塞线程池里执行
#[derive(Debug, Clone, Copy)]
pub struct BcryptPasswordHasher {
    cost: u32,
}

impl BcryptPasswordHasher {
    /// `cost` 超出 bcrypt 支持的 4..=31 时返回错误
    pub fn with_cost(cost: u32) -> Result<Self, PasswordHasherError> {
        if !(MIN_COST..=MAX_COST).contains(&cost) {
            return Err(PasswordHasherError::InvalidCost {
                cost,
                min: MIN_COST,
                max: MAX_COST,
            });
        }
        Ok(Self { cost })
    }

    pub fn cost(&self) -> u32 {
        self.cost
    }
}

impl Default for BcryptPasswordHasher {
    fn default() -> Self {
        Self {
            cost: bcrypt::DEFAULT_COST,
        }
    }
}

async fn run_blocking<T, F>(
    job: F,
    wrap: fn(String) -> PasswordHasherError,
) -> Result<T, PasswordHasherError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, bcrypt::BcryptError> + Send + 'static,
{
    tokio::task::spawn_blocking(job)
        .await
        .map_err(|err| wrap(err.to_string()))?
        .map_err(|err| wrap(err.to_string()))
}

#[async_trait]
impl PasswordHasher for BcryptPasswordHasher {
    async fn hash(&self, plaintext: &str) -> Result<PasswordHash, PasswordHasherError> {
        let cost = self.cost;
        let plaintext = plaintext.to_owned();
        let hashed = run_blocking(
            move || bcrypt::hash(plaintext, cost),
            PasswordHasherError::Hash,
        )
        .await?;
        PasswordHash::new(hashed).map_err(|err| PasswordHasherError::hash_error(err.to_string()))
    }

    async fn verify(
        &self,
        plaintext: &str,
        hashed: &PasswordHash,
    ) -> Result<bool, PasswordHasherError> {
        let plaintext = plaintext.to_owned();
        let hashed = hashed.as_str().to_owned();
        run_blocking(
            move || bcrypt::verify(plaintext, &hashed),
            PasswordHasherError::Verify,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hash_and_verify() {
        let hasher = BcryptPasswordHasher::with_cost(4).unwrap();
        let hashed = hasher.hash("correct horse").await.unwrap();
        assert!(hashed.as_str().starts_with("$2"));
        assert!(hasher.verify("correct horse", &hashed).await.unwrap());
        assert!(!hasher.verify("battery staple", &hashed).await.unwrap());
    }

    #[tokio::test]
    async fn malformed_hash_is_an_error() {
        let hasher = BcryptPasswordHasher::with_cost(4).unwrap();
        let bogus = PasswordHash::new("not-a-bcrypt-hash").unwrap();
        assert!(hasher.verify("anything", &bogus).await.is_err());
    }

    #[test]
    fn cost_is_range_checked() {
        assert!(BcryptPasswordHasher::with_cost(3).is_err());
        assert!(BcryptPasswordHasher::with_cost(32).is_err());
        assert_eq!(BcryptPasswordHasher::with_cost(12).unwrap().cost(), 12);
    }
}
