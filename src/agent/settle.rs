//! 内容稳定等待
//!
//! 每次滚动后等待新内容渲染：结构变化 future 与兜底计时器竞速，先完成者放行。
//! 观察到变化后再等一个固定的稳定延迟；容器不存在时退化为固定等待。
//! 无论页面是否变化，等待都会在有限时间内结束。

use std::time::Duration;

use super::FeedSurface;

/// 稳定等待参数
#[derive(Debug, Clone)]
pub struct SettleTimings {
    /// 观察到变化后的额外等待
    pub settle_delay: Duration,
    /// 始终无变化时的兜底超时
    pub hard_timeout: Duration,
    /// 没有容器时的固定等待
    pub fallback_wait: Duration,
}

impl Default for SettleTimings {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_millis(500),
            hard_timeout: Duration::from_millis(3000),
            fallback_wait: Duration::from_millis(2000),
        }
    }
}

/// 等待结束的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    Changed,
    TimedOut,
    NoContainer,
}

pub async fn wait_for_settle(feed: &dyn FeedSurface, timings: &SettleTimings) -> Settlement {
    if !feed.has_container().await {
        tokio::time::sleep(timings.fallback_wait).await;
        return Settlement::NoContainer;
    }

    let outcome = tokio::select! {
        _ = feed.changed() => Settlement::Changed,
        _ = tokio::time::sleep(timings.hard_timeout) => Settlement::TimedOut,
    };

    if outcome == Settlement::Changed {
        tokio::time::sleep(timings.settle_delay).await;
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::ExtractError;
    use crate::core::{Record, SyncSource};
    use async_trait::async_trait;
    use std::time::Instant;
    use tokio::sync::Notify;

    struct StubFeed {
        container: bool,
        notify: Notify,
    }

    #[async_trait]
    impl FeedSurface for StubFeed {
        fn address(&self) -> String {
            "stub://feed".to_string()
        }

        async fn extract(&self, _source: SyncSource) -> Result<Vec<Record>, ExtractError> {
            Ok(Vec::new())
        }

        async fn scroll_viewport(&self) -> Result<(), ExtractError> {
            Ok(())
        }

        async fn has_container(&self) -> bool {
            self.container
        }

        async fn changed(&self) {
            self.notify.notified().await;
        }
    }

    fn timings() -> SettleTimings {
        SettleTimings {
            settle_delay: Duration::from_millis(20),
            hard_timeout: Duration::from_millis(150),
            fallback_wait: Duration::from_millis(40),
        }
    }

    #[tokio::test]
    async fn test_change_releases_before_timeout() {
        let feed = std::sync::Arc::new(StubFeed {
            container: true,
            notify: Notify::new(),
        });
        let trigger = feed.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.notify.notify_waiters();
        });

        let started = Instant::now();
        let outcome = wait_for_settle(feed.as_ref(), &timings()).await;
        assert_eq!(outcome, Settlement::Changed);
        assert!(started.elapsed() < Duration::from_millis(150));
        // 变化之后仍有稳定延迟
        assert!(started.elapsed() >= Duration::from_millis(20));
    }

    #[tokio::test]
    async fn test_no_change_falls_back_to_timeout() {
        let feed = StubFeed {
            container: true,
            notify: Notify::new(),
        };
        let started = Instant::now();
        assert_eq!(wait_for_settle(&feed, &timings()).await, Settlement::TimedOut);
        assert!(started.elapsed() >= Duration::from_millis(150));
    }

    #[tokio::test]
    async fn test_missing_container_uses_fixed_wait() {
        let feed = StubFeed {
            container: false,
            notify: Notify::new(),
        };
        let started = Instant::now();
        assert_eq!(wait_for_settle(&feed, &timings()).await, Settlement::NoContainer);
        assert!(started.elapsed() >= Duration::from_millis(40));
    }
}
