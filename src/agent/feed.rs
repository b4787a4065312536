//! 信息流页面抽象
//!
//! Agent 只通过这个接口接触页面：提取当前已渲染的记录、向下滚动一屏、观察容器结构变化。
//! 字段级解析属于实现方（见 `surface::chrome`），这里不关心。

use async_trait::async_trait;
use thiserror::Error;

use crate::core::{Record, SyncSource};

/// 提取循环中的运行时错误（会被转换为 error 上报，不会让宿主崩溃）
#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("Extraction failed: {0}")]
    Extract(String),

    #[error("Scroll failed: {0}")]
    Scroll(String),

    #[error("Surface unavailable: {0}")]
    Surface(String),
}

#[async_trait]
pub trait FeedSurface: Send + Sync {
    /// 页面当前地址（用于按前缀查找已打开的页面）
    fn address(&self) -> String;

    /// 等待页面加载完成
    async fn wait_ready(&self) -> Result<(), ExtractError> {
        Ok(())
    }

    /// 把页面切到前台
    async fn activate(&self) -> Result<(), ExtractError> {
        Ok(())
    }

    /// 提取当前已渲染的记录
    async fn extract(&self, source: SyncSource) -> Result<Vec<Record>, ExtractError>;

    /// 向下滚动一个视口高度
    async fn scroll_viewport(&self) -> Result<(), ExtractError>;

    /// 信息流容器是否存在；不存在时无法观察结构变化
    async fn has_container(&self) -> bool {
        true
    }

    /// 在本次调用之后发生下一次结构变化时返回；可能永远不返回
    async fn changed(&self);
}
