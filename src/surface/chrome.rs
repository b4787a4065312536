//! Headless Chrome 页面：标签页即页面
//!
//! 需启用 feature "browser" 且系统已安装 Chrome/Chromium。
//! headless_chrome 是同步 API，所有调用都放进 spawn_blocking。
//! 结构变化通过页内 MutationObserver 计数器轮询得到。

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use headless_chrome::{Browser, LaunchOptions, Tab};
use serde_json::Value;

use super::FeedFactory;
use crate::agent::{ExtractError, FeedSurface};
use crate::config::BrowserSection;
use crate::core::{Record, SyncSource};

/// 内置提取脚本：返回已渲染记录的 JSON 字符串，每项至少带 id
const DEFAULT_EXTRACTION_SCRIPT: &str = r#"
(function() {
    const out = [];
    for (const article of document.querySelectorAll('article[data-testid="tweet"]')) {
        const quoted = article.querySelector('[data-testid="quoteTweet"]');
        let id = '', url = '';
        for (const link of article.querySelectorAll('a[href*="/status/"]')) {
            if (quoted && quoted.contains(link)) continue;
            if (!link.querySelector('time')) continue;
            const href = link.getAttribute('href') || '';
            const m = href.match(/\/status\/(\d+)/);
            if (m) { id = m[1]; url = href.startsWith('/') ? 'https://x.com' + href : href; }
            break;
        }
        if (!id) continue;
        const text = article.querySelector('[data-testid="tweetText"]');
        const time = article.querySelector('time');
        out.push({
            id,
            url,
            text: text ? text.innerText : '',
            createdAt: time ? time.getAttribute('datetime') : null,
        });
    }
    return JSON.stringify(out);
})()
"#;

const CONTAINER_PROBE: &str = "document.querySelector('[aria-label]') !== null";

const SCROLL_SCRIPT: &str = "window.scrollBy(0, window.innerHeight); true";

/// 安装（一次）观察器并返回当前变化计数
const MUTATION_COUNTER: &str = r#"
(function() {
    if (!window.__gleanerObserver) {
        const el = document.querySelector('[aria-label]');
        if (!el) return -1;
        window.__gleanerMutations = 0;
        window.__gleanerObserver = new MutationObserver(() => { window.__gleanerMutations++; });
        window.__gleanerObserver.observe(el, { childList: true, subtree: true });
    }
    return window.__gleanerMutations;
})()
"#;

const MUTATION_POLL: Duration = Duration::from_millis(100);

/// 按需启动浏览器，并把标签页包装成 `ChromeFeed`
pub struct ChromeFeedFactory {
    headless: bool,
    script: Arc<str>,
    browser: Arc<Mutex<Option<Browser>>>,
}

impl ChromeFeedFactory {
    pub fn new(section: &BrowserSection) -> Self {
        let script = section
            .extraction_script
            .clone()
            .unwrap_or_else(|| DEFAULT_EXTRACTION_SCRIPT.to_string());
        Self {
            headless: section.headless,
            script: Arc::from(script),
            browser: Arc::new(Mutex::new(None)),
        }
    }

    fn launch(
        slot: &Mutex<Option<Browser>>,
        headless: bool,
    ) -> Result<Browser, ExtractError> {
        let mut guard = slot
            .lock()
            .map_err(|e| ExtractError::Surface(e.to_string()))?;
        if let Some(browser) = guard.as_ref() {
            return Ok(browser.clone());
        }
        let options = LaunchOptions::default_builder()
            .headless(headless)
            .build()
            .map_err(|e| ExtractError::Surface(format!("Invalid launch options: {}", e)))?;
        let browser = Browser::new(options)
            .map_err(|e| ExtractError::Surface(format!("Chrome launch failed: {}", e)))?;
        tracing::info!(headless, "chrome launched");
        *guard = Some(browser.clone());
        Ok(browser)
    }

    fn wrap(&self, tab: Arc<Tab>) -> Arc<dyn FeedSurface> {
        Arc::new(ChromeFeed {
            tab,
            script: Arc::clone(&self.script),
        })
    }
}

#[async_trait]
impl FeedFactory for ChromeFeedFactory {
    async fn find(&self, locator: &str) -> Option<Arc<dyn FeedSurface>> {
        let slot = Arc::clone(&self.browser);
        let headless = self.headless;
        let locator = locator.to_string();

        let found = tokio::task::spawn_blocking(move || {
            let browser = Self::launch(&slot, headless).ok()?;
            let tabs = browser.get_tabs().lock().ok()?.clone();
            tabs.into_iter().find(|tab| tab.get_url().starts_with(&locator))
        })
        .await
        .ok()
        .flatten()?;

        Some(self.wrap(found))
    }

    async fn open(&self, locator: &str) -> Result<Arc<dyn FeedSurface>, ExtractError> {
        let slot = Arc::clone(&self.browser);
        let headless = self.headless;
        let url = locator.to_string();

        let tab = tokio::task::spawn_blocking(move || {
            let browser = Self::launch(&slot, headless)?;
            let tab = browser
                .new_tab()
                .map_err(|e| ExtractError::Surface(format!("Browser tab failed: {}", e)))?;
            tab.navigate_to(&url)
                .map_err(|e| ExtractError::Surface(format!("Navigate failed: {}", e)))?;
            Ok::<_, ExtractError>(tab)
        })
        .await
        .map_err(|e| ExtractError::Surface(format!("Task join: {}", e)))??;

        Ok(self.wrap(tab))
    }
}

/// 一个浏览器标签页
pub struct ChromeFeed {
    tab: Arc<Tab>,
    script: Arc<str>,
}

impl ChromeFeed {
    async fn evaluate(&self, js: &str) -> Result<Option<Value>, String> {
        let tab = Arc::clone(&self.tab);
        let js = js.to_string();
        tokio::task::spawn_blocking(move || {
            tab.evaluate(&js, false)
                .map(|object| object.value)
                .map_err(|e| e.to_string())
        })
        .await
        .map_err(|e| format!("Task join: {}", e))?
    }

    async fn mutation_count(&self) -> Option<i64> {
        match self.evaluate(MUTATION_COUNTER).await {
            Ok(value) => value.and_then(|v| v.as_i64()).filter(|n| *n >= 0),
            Err(e) => {
                tracing::debug!(error = %e, "mutation counter unavailable");
                None
            }
        }
    }
}

/// 把提取脚本的输出解析为记录；没有 id 的条目丢弃
fn parse_records(raw: Option<Value>, source: SyncSource) -> Result<Vec<Record>, ExtractError> {
    let entries = match raw {
        Some(Value::String(json)) => serde_json::from_str::<Vec<Value>>(&json)
            .map_err(|e| ExtractError::Extract(format!("Malformed extraction output: {}", e)))?,
        Some(Value::Array(entries)) => entries,
        Some(Value::Null) | None => Vec::new(),
        Some(other) => {
            return Err(ExtractError::Extract(format!(
                "Unexpected extraction output: {}",
                other
            )))
        }
    };

    Ok(entries
        .into_iter()
        .filter_map(|entry| {
            let id = match entry.get("id")? {
                Value::String(s) if !s.is_empty() => s.clone(),
                Value::Number(n) => n.to_string(),
                _ => return None,
            };
            Some(Record::new(id, source, entry))
        })
        .collect())
}

#[async_trait]
impl FeedSurface for ChromeFeed {
    fn address(&self) -> String {
        self.tab.get_url()
    }

    async fn wait_ready(&self) -> Result<(), ExtractError> {
        let tab = Arc::clone(&self.tab);
        tokio::task::spawn_blocking(move || {
            tab.wait_until_navigated()
                .map(|_| ())
                .map_err(|e| ExtractError::Surface(format!("Page load failed: {}", e)))
        })
        .await
        .map_err(|e| ExtractError::Surface(format!("Task join: {}", e)))?
    }

    async fn activate(&self) -> Result<(), ExtractError> {
        let tab = Arc::clone(&self.tab);
        tokio::task::spawn_blocking(move || {
            tab.activate()
                .map(|_| ())
                .map_err(|e| ExtractError::Surface(format!("Activate failed: {}", e)))
        })
        .await
        .map_err(|e| ExtractError::Surface(format!("Task join: {}", e)))?
    }

    async fn extract(&self, source: SyncSource) -> Result<Vec<Record>, ExtractError> {
        let raw = self
            .evaluate(&self.script)
            .await
            .map_err(ExtractError::Extract)?;
        parse_records(raw, source)
    }

    async fn scroll_viewport(&self) -> Result<(), ExtractError> {
        self.evaluate(SCROLL_SCRIPT)
            .await
            .map(|_| ())
            .map_err(ExtractError::Scroll)
    }

    async fn has_container(&self) -> bool {
        matches!(
            self.evaluate(CONTAINER_PROBE).await,
            Ok(Some(Value::Bool(true)))
        )
    }

    async fn changed(&self) {
        // 取不到基线时永不返回，由调用方的硬超时兜底
        let Some(baseline) = self.mutation_count().await else {
            std::future::pending::<()>().await;
            return;
        };
        loop {
            tokio::time::sleep(MUTATION_POLL).await;
            if let Some(count) = self.mutation_count().await {
                if count > baseline {
                    return;
                }
            }
        }
    }
}
