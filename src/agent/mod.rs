//! 提取 Agent：嵌入目标页面，独立驱动「提取 - 滚动 - 等待」循环
//!
//! 与编排器之间没有共享内存，只通过命令通道收发消息。

pub mod extractor;
pub mod feed;
pub mod settle;

pub use extractor::{ExtractionAgent, ExtractionSettings, RunOutcome};
pub use feed::{ExtractError, FeedSurface};
pub use settle::{wait_for_settle, SettleTimings, Settlement};
