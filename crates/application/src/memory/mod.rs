//! 内存实现（用于测试和 `database.url = "memory"` 的本地开发模式）
//!
//! 每个实现只用一把 `tokio::sync::RwLock`，每个 trait 方法都是一次完整的临界区，
//! 所以 id 分配、唯一键检查、踢掉旧连接这类读改写天然是原子的。

mod presence;
mod rooms;
mod store;

pub use presence::InMemoryPresenceTracker;
pub use rooms::InMemoryRoomRegistry;
pub use store::InMemoryChatStore;
