//! Gleaner - 信息流增量采集
//!
//! 模块划分：
//! - **agent**: 嵌入目标页面的提取 Agent（滚动 - 提取 - 等待循环）
//! - **channel**: 编排器与 Agent 之间带超时的请求 / 应答通道
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 来源、状态、同步编排器、组装与优雅关闭
//! - **storage**: 记录与同步状态的持久化（SQLite / 内存）
//! - **surface**: 目标页面宿主（浏览器标签页）

pub mod agent;
pub mod channel;
pub mod config;
pub mod core;
pub mod observability;
pub mod storage;
pub mod surface;

pub use crate::core::{SyncBuilder, SyncOrchestrator, SyncSource, SyncStatus};
