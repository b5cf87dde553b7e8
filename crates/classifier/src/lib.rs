//! Sentinel 异常分类：分析结果摄入、检出项处置流程、自动分诊。

pub mod classifier;
pub mod triage;
pub mod workflow;

pub use classifier::AnomalyClassifier;
pub use triage::TriageSweeper;
pub use workflow::FindingWorkflow;
