//! Sentinel 存储后端与周期服务。
//!
//! 任务存储有内存与 Redis 两个实现，语义一致：claim 原子、
//! 结果只写一次、终态记录按保留期过期。检出项归档有内存与 SQLite 两个实现。

pub mod memory_finding_repository;
pub mod memory_store;
pub mod redis_store;
pub mod retention;
pub mod sqlite_finding_repository;

pub use memory_finding_repository::MemoryFindingRepository;
pub use memory_store::MemoryJobStore;
pub use redis_store::RedisJobStore;
pub use retention::RetentionService;
pub use sqlite_finding_repository::SqliteFindingRepository;
