//! 基础设施层实现。
//!
//! 提供 Postgres 存储、bcrypt 密码哈希和本地磁盘图片存储，
//! 实现应用层定义的接口。

pub mod migrations;
pub mod password;
pub mod repository;
pub mod storage;

pub use migrations::MIGRATOR;
pub use password::BcryptPasswordHasher;
pub use repository::{create_pg_pool, PgChatStore};
pub use storage::LocalImageStore;
