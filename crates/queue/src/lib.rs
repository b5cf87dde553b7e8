//! Sentinel 队列管理：入队、状态查询、取消、统计，以及超时看门狗。

pub mod manager;
pub mod watchdog;

pub use manager::QueueManager;
pub use watchdog::TimeoutWatchdog;
