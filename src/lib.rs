//! # Rotating Question Cache
//!
//! 为每个学习者预先组装练习题的三槽位轮转缓存
//!
//! ## 架构设计
//!
//! 本系统采用分层架构：
//!
//! ### ① 数据模型（Models）
//! - `models/` - 槽位、内容单元、准备进程等纯数据类型
//! - `loaders/` - 从 TOML 加载事实目录
//!
//! ### ② 业务能力层（Services）
//! - `services/` - 描述"我能做什么"，不关心学习者状态
//! - `FactCatalog` - 按概念查询事实
//! - `MasteryService` - 查询学习者的掌握边界
//! - `DistractorGenerator` - 生成干扰项
//!
//! ### ③ 流程层（Workflow）
//! - `workflow/` - 定义"一个内容单元"的七阶段组装流程
//! - `AssemblyCtx` - 上下文封装（学习者 + 槽位 + 概念）
//! - `AssemblyFlow` - 流程编排（选取 → 边界 → 格式化 → 干扰项 → 组装 → 洗牌 → 打包）
//!
//! ### ④ 缓存层（Cache）
//! - `cache/` - 三槽位轮转缓存、失效判定和运行计数
//!
//! ### ⑤ 编排层（Orchestration）
//! - `orchestrator/pipeline` - 后台准备、并发控制、进度登记和限时准备
//!
//! ## 模块结构

pub mod cache;
pub mod config;
pub mod error;

pub mod models;
pub mod orchestrator;
pub mod services;
pub mod utils;
pub mod workflow;

// 重新导出常用类型
pub use cache::{InvalidationCriteria, InvalidationReason, RotatingCache};
pub use config::Config;
pub use error::{AppError, AppResult};
pub use models::{ConceptDescriptor, ContentUnit, Fact, PreparationProcess, Priority, ProcessId, SlotId};
pub use orchestrator::{AssemblyPipeline, PreparationRequest};
pub use workflow::{AssemblyCtx, AssemblyFlow};
