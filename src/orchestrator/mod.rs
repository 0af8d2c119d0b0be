//! 编排层（Orchestration Layer）
//!
//! ## 职责
//!
//! 把流程层和缓存层连接起来：登记准备进程、控制并发、回报进度、交付结果。
//!
//! ## 层次关系
//!
//! ```text
//! orchestrator::AssemblyPipeline (处理 PreparationRequest / 批量请求)
//!     ↓                         ↘
//! workflow::AssemblyFlow          cache::RotatingCache (store / 准备标记)
//!     ↓
//! services (能力层：facts / mastery / distractors)
//! ```
//!
//! ## 设计原则
//!
//! 1. **唯一入口**：只有编排层会写入缓存槽位
//! 2. **同槽互斥**：同一 (学习者, 槽位) 最多一个进行中的准备
//! 3. **无业务逻辑**：只做调度和登记，不做具体组装判断

pub mod pipeline;

pub use pipeline::{AssemblyPipeline, BatchProgress, PreparationRequest};
