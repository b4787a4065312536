//! 滚动提取循环
//!
//! 每轮：提取 → 本轮去重 → 累积批次（满批即上报）→ 连续空轮计数 → 滚动一屏 → 稳定等待。
//! 停止是协作式的：只在循环顶部检查取消令牌，正在进行的稳定等待总会先跑完，
//! 因此停止延迟最多为一次稳定等待。循环结束后统一负责剩余批次与终态上报。
//! 已被取消、仍在收尾的循环不占用运行槽，新的 begin 可以立即接管。

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::settle::{wait_for_settle, SettleTimings};
use super::{ExtractError, FeedSurface};
use crate::channel::{AgentCommand, AgentReport, Inbox, MessageResponse, Requester};
use crate::config::SyncSection;
use crate::core::{Record, SyncSource};

/// 提取循环参数
#[derive(Debug, Clone)]
pub struct ExtractionSettings {
    /// 满多少条新记录上报一次
    pub batch_size: usize,
    /// 连续无新记录的轮数阈值
    pub max_empty_scrolls: u32,
    pub settle: SettleTimings,
}

impl Default for ExtractionSettings {
    fn default() -> Self {
        Self {
            batch_size: 20,
            max_empty_scrolls: 3,
            settle: SettleTimings::default(),
        }
    }
}

impl From<&SyncSection> for ExtractionSettings {
    fn from(section: &SyncSection) -> Self {
        Self {
            batch_size: section.batch_size.max(1),
            max_empty_scrolls: section.max_empty_scrolls.max(1),
            settle: SettleTimings {
                settle_delay: std::time::Duration::from_millis(section.settle_delay_ms),
                hard_timeout: std::time::Duration::from_millis(section.mutation_timeout_ms),
                fallback_wait: std::time::Duration::from_millis(section.scroll_wait_ms),
            },
        }
    }
}

/// 一次运行的结局
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// 连续空轮达到阈值，已上报 complete
    Exhausted { extracted: usize },
    /// 被 stop 打断，未上报 complete
    Stopped { extracted: usize },
    /// 循环体出错，已上报 error
    Failed { extracted: usize, error: String },
    /// 已有未取消的循环，本次 begin 被拒绝
    AlreadyRunning,
}

/// 占用运行槽的循环
#[derive(Debug)]
struct ActiveRun {
    run_id: Uuid,
    token: CancellationToken,
}

/// 单次运行的会话内状态，运行结束即丢弃
#[derive(Debug, Default)]
struct RunState {
    seen_ids: HashSet<String>,
    batch: Vec<Record>,
    empty_streak: u32,
}

/// 嵌入页面的提取 Agent：同一时刻最多一个提取循环
pub struct ExtractionAgent {
    feed: Arc<dyn FeedSurface>,
    reports: Requester<AgentReport>,
    settings: ExtractionSettings,
    /// None 表示空闲
    active: Mutex<Option<ActiveRun>>,
}

impl ExtractionAgent {
    pub fn new(
        feed: Arc<dyn FeedSurface>,
        reports: Requester<AgentReport>,
        settings: ExtractionSettings,
    ) -> Self {
        Self {
            feed,
            reports,
            settings,
            active: Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.active.lock().map(|slot| slot.is_some()).unwrap_or(false)
    }

    /// 请求停止；只翻转令牌，不发送任何上报
    pub fn stop(&self) {
        if let Ok(slot) = self.active.lock() {
            if let Some(run) = slot.as_ref() {
                run.token.cancel();
            }
        }
    }

    /// 在当前任务中运行一次完整的提取循环
    pub async fn begin(&self, source: SyncSource, run_id: Uuid) -> RunOutcome {
        match self.claim(run_id) {
            Some(token) => self.run(source, run_id, token).await,
            None => RunOutcome::AlreadyRunning,
        }
    }

    /// 处理编排器命令直到通道关闭；begin 在后台任务中运行，立即应答
    pub async fn serve(self: Arc<Self>, mut inbox: Inbox<AgentCommand>) {
        while let Some(envelope) = inbox.recv().await {
            let (command, responder) = envelope.into_parts();
            let response = match command {
                AgentCommand::Begin { source, run_id } => match self.claim(run_id) {
                    Some(token) => {
                        let agent = Arc::clone(&self);
                        tokio::spawn(async move {
                            let outcome = agent.run(source, run_id, token).await;
                            tracing::debug!(%run_id, ?outcome, "extraction run ended");
                        });
                        MessageResponse::ok()
                    }
                    None => {
                        tracing::debug!(%source, %run_id, "begin rejected, extraction already running");
                        MessageResponse::failure("extraction already running")
                    }
                },
                AgentCommand::Stop => {
                    self.stop();
                    MessageResponse::ok()
                }
            };
            responder.respond(response);
        }
        // 宿主关闭：让仍在跑的循环在下一轮顶部退出
        self.stop();
    }

    /// 同步占用运行槽：空闲或占用者已被取消时成功
    fn claim(&self, run_id: Uuid) -> Option<CancellationToken> {
        let mut slot = self.active.lock().ok()?;
        if let Some(current) = slot.as_ref() {
            if !current.token.is_cancelled() {
                return None;
            }
            tracing::debug!(previous = %current.run_id, %run_id, "taking over from stopping run");
        }
        let token = CancellationToken::new();
        *slot = Some(ActiveRun {
            run_id,
            token: token.clone(),
        });
        Some(token)
    }

    /// 只释放自己占用的槽；被接管后什么也不做
    fn release(&self, run_id: Uuid) {
        if let Ok(mut slot) = self.active.lock() {
            if slot.as_ref().map(|run| run.run_id) == Some(run_id) {
                *slot = None;
            }
        }
    }

    async fn run(&self, source: SyncSource, run_id: Uuid, token: CancellationToken) -> RunOutcome {
        tracing::info!(%source, %run_id, feed = %self.feed.address(), "extraction started");

        let mut state = RunState::default();
        let result = self.drive(source, run_id, &token, &mut state).await;

        // 无论如何结束，剩余批次都要上报
        self.flush(run_id, &mut state.batch).await;
        let extracted = state.seen_ids.len();

        let outcome = match result {
            Ok(()) if token.is_cancelled() => {
                tracing::info!(%source, extracted, "extraction stopped");
                RunOutcome::Stopped { extracted }
            }
            Ok(()) => {
                tracing::info!(%source, extracted, "feed exhausted, extraction complete");
                self.report(AgentReport::Complete { run_id }).await;
                RunOutcome::Exhausted { extracted }
            }
            Err(e) => {
                let error = e.to_string();
                tracing::warn!(%source, extracted, error = %error, "extraction failed");
                self.report(AgentReport::Error {
                    run_id,
                    error: error.clone(),
                })
                .await;
                RunOutcome::Failed { extracted, error }
            }
        };

        self.release(run_id);
        outcome
    }

    async fn drive(
        &self,
        source: SyncSource,
        run_id: Uuid,
        token: &CancellationToken,
        state: &mut RunState,
    ) -> Result<(), ExtractError> {
        loop {
            if token.is_cancelled() {
                return Ok(());
            }

            let records = self.feed.extract(source).await?;
            let mut found_new = false;
            for record in records {
                if !state.seen_ids.insert(record.id.clone()) {
                    continue;
                }
                state.batch.push(record);
                found_new = true;
                if state.batch.len() >= self.settings.batch_size {
                    self.flush(run_id, &mut state.batch).await;
                }
            }

            if found_new {
                state.empty_streak = 0;
            } else {
                state.empty_streak += 1;
                tracing::debug!(empty_streak = state.empty_streak, "no new records this pass");
                if state.empty_streak >= self.settings.max_empty_scrolls {
                    return Ok(());
                }
            }

            self.feed.scroll_viewport().await?;
            let settlement = wait_for_settle(self.feed.as_ref(), &self.settings.settle).await;
            tracing::trace!(?settlement, "feed settled");
        }
    }

    async fn flush(&self, run_id: Uuid, batch: &mut Vec<Record>) {
        if batch.is_empty() {
            return;
        }
        let records = std::mem::take(batch);
        tracing::debug!(count = records.len(), "sending progress batch");
        self.report(AgentReport::Progress { run_id, records }).await;
    }

    async fn report(&self, report: AgentReport) {
        let kind = report.kind();
        let response = self.reports.request(report).await;
        if let Some(error) = response.error_message() {
            tracing::warn!(kind, error, "report not acknowledged");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::channel;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// 按页返回预设记录的信息流；页码随滚动前进，超出后重复最后一页
    struct PagedFeed {
        pages: Vec<Vec<String>>,
        position: AtomicUsize,
        fail_at: Option<usize>,
        /// 从不报告结构变化，每次稳定等待都跑满兜底超时
        silent: bool,
    }

    impl PagedFeed {
        fn new(pages: Vec<Vec<String>>) -> Self {
            Self {
                pages,
                position: AtomicUsize::new(0),
                fail_at: None,
                silent: false,
            }
        }
    }

    #[async_trait]
    impl FeedSurface for PagedFeed {
        fn address(&self) -> String {
            "test://feed".to_string()
        }

        async fn extract(&self, source: SyncSource) -> Result<Vec<Record>, ExtractError> {
            let pos = self.position.load(Ordering::SeqCst);
            if Some(pos) == self.fail_at {
                return Err(ExtractError::Extract("timeline vanished".to_string()));
            }
            let page = self.pages.get(pos).or(self.pages.last()).cloned().unwrap_or_default();
            Ok(page
                .into_iter()
                .map(|id| Record::new(id, source, serde_json::Value::Null))
                .collect())
        }

        async fn scroll_viewport(&self) -> Result<(), ExtractError> {
            self.position.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn changed(&self) {
            if self.silent {
                std::future::pending::<()>().await;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    fn page(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|id| id.to_string()).collect()
    }

    fn numbered(prefix: &str, n: usize) -> Vec<String> {
        (0..n).map(|i| format!("{prefix}{i}")).collect()
    }

    /// 每页一条新记录，足够多页，短时间内不会自然到底
    fn endless() -> Vec<Vec<String>> {
        (0..500).map(|i| vec![format!("e{i}")]).collect()
    }

    fn fast_settings(batch_size: usize) -> ExtractionSettings {
        ExtractionSettings {
            batch_size,
            max_empty_scrolls: 3,
            settle: SettleTimings {
                settle_delay: Duration::from_millis(1),
                hard_timeout: Duration::from_millis(20),
                fallback_wait: Duration::from_millis(1),
            },
        }
    }

    /// 收集所有上报并一律应答成功；所有请求端释放后返回
    fn collect_reports(mut inbox: Inbox<AgentReport>) -> tokio::task::JoinHandle<Vec<AgentReport>> {
        tokio::spawn(async move {
            let mut seen = Vec::new();
            while let Some(envelope) = inbox.recv().await {
                seen.push(envelope.message.clone());
                envelope.respond(MessageResponse::ok());
            }
            seen
        })
    }

    #[tokio::test]
    async fn test_exhaustion_emits_single_complete_after_flush() {
        let (reports, inbox) = channel(64, Duration::from_secs(1));
        let collector = collect_reports(inbox);
        let feed = Arc::new(PagedFeed::new(vec![
            page(&["a", "b"]),
            page(&["b", "c"]),
            page(&["c"]),
        ]));
        let agent = ExtractionAgent::new(feed, reports, fast_settings(20));

        let run_id = Uuid::new_v4();
        let outcome = agent.begin(SyncSource::Bookmarks, run_id).await;
        assert_eq!(outcome, RunOutcome::Exhausted { extracted: 3 });
        drop(agent);

        let seen = collector.await.unwrap();
        assert_eq!(seen.len(), 2);
        match &seen[0] {
            AgentReport::Progress { run_id: id, records } => {
                assert_eq!(*id, run_id);
                let got: Vec<&str> = records.iter().map(|r| r.id.as_str()).collect();
                assert_eq!(got, vec!["a", "b", "c"]);
            }
            other => panic!("expected progress, got {:?}", other),
        }
        assert_eq!(seen[1], AgentReport::Complete { run_id });
    }

    #[tokio::test]
    async fn test_progress_only_at_batch_boundary() {
        let (reports, inbox) = channel(64, Duration::from_secs(1));
        let collector = collect_reports(inbox);
        let feed = Arc::new(PagedFeed::new(vec![numbered("p", 15), numbered("q", 12)]));
        let agent = ExtractionAgent::new(feed, reports, fast_settings(20));

        agent.begin(SyncSource::Likes, Uuid::new_v4()).await;
        drop(agent);

        let sizes: Vec<usize> = collector
            .await
            .unwrap()
            .into_iter()
            .filter_map(|r| match r {
                AgentReport::Progress { records, .. } => Some(records.len()),
                _ => None,
            })
            .collect();
        // 15 + 12 = 27：满 20 上报一次，剩余 7 条在退出时上报
        assert_eq!(sizes, vec![20, 7]);
    }

    #[tokio::test]
    async fn test_failure_reports_error_without_complete() {
        let (reports, inbox) = channel(64, Duration::from_secs(1));
        let collector = collect_reports(inbox);
        let mut feed = PagedFeed::new(vec![page(&["a"]), page(&["b"])]);
        feed.fail_at = Some(1);
        let agent = ExtractionAgent::new(Arc::new(feed), reports, fast_settings(20));

        let outcome = agent.begin(SyncSource::Bookmarks, Uuid::new_v4()).await;
        assert!(matches!(outcome, RunOutcome::Failed { extracted: 1, .. }));
        assert!(!agent.is_running());
        drop(agent);

        let seen = collector.await.unwrap();
        assert_eq!(seen.len(), 2);
        assert!(matches!(&seen[0], AgentReport::Progress { records, .. } if records.len() == 1));
        assert!(
            matches!(&seen[1], AgentReport::Error { error, .. } if error.contains("timeline vanished"))
        );
    }

    #[tokio::test]
    async fn test_stop_flushes_partial_batch_and_skips_complete() {
        let (reports, inbox) = channel(64, Duration::from_secs(1));
        let collector = collect_reports(inbox);
        let feed = Arc::new(PagedFeed::new(endless()));
        let agent = Arc::new(ExtractionAgent::new(feed, reports, fast_settings(1000)));

        let runner = {
            let agent = Arc::clone(&agent);
            tokio::spawn(async move { agent.begin(SyncSource::OwnTweets, Uuid::new_v4()).await })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(agent.is_running());
        agent.stop();

        let outcome = runner.await.unwrap();
        assert!(matches!(outcome, RunOutcome::Stopped { extracted } if extracted > 0));
        assert!(!agent.is_running());
        drop(agent);

        let seen = collector.await.unwrap();
        assert_eq!(seen.len(), 1);
        assert!(matches!(&seen[0], AgentReport::Progress { .. }));
    }

    #[tokio::test]
    async fn test_reentrant_begin_is_rejected() {
        let (reports, inbox) = channel(64, Duration::from_secs(1));
        let _collector = collect_reports(inbox);
        let agent = Arc::new(ExtractionAgent::new(
            Arc::new(PagedFeed::new(endless())),
            reports,
            fast_settings(1000),
        ));

        let first = {
            let agent = Arc::clone(&agent);
            tokio::spawn(async move { agent.begin(SyncSource::Bookmarks, Uuid::new_v4()).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(
            agent.begin(SyncSource::Bookmarks, Uuid::new_v4()).await,
            RunOutcome::AlreadyRunning
        );

        agent.stop();
        assert!(matches!(first.await.unwrap(), RunOutcome::Stopped { .. }));
    }

    #[tokio::test]
    async fn test_begin_takes_over_from_draining_run() {
        let (reports, inbox) = channel(64, Duration::from_secs(1));
        let collector = collect_reports(inbox);
        let mut feed = PagedFeed::new(endless());
        feed.silent = true;
        let mut settings = fast_settings(2);
        settings.settle.hard_timeout = Duration::from_millis(150);
        let agent = Arc::new(ExtractionAgent::new(Arc::new(feed), reports, settings));

        let old_id = Uuid::new_v4();
        let old = {
            let agent = Arc::clone(&agent);
            tokio::spawn(async move { agent.begin(SyncSource::Bookmarks, old_id).await })
        };
        // 旧循环此时停在第一次稳定等待里
        tokio::time::sleep(Duration::from_millis(30)).await;
        agent.stop();

        let new_id = Uuid::new_v4();
        let new = {
            let agent = Arc::clone(&agent);
            tokio::spawn(async move { agent.begin(SyncSource::Bookmarks, new_id).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(agent.is_running());
        assert!(!old.is_finished());

        assert!(matches!(old.await.unwrap(), RunOutcome::Stopped { .. }));
        // 旧循环收尾不会释放新循环的槽
        assert!(agent.is_running());
        assert_eq!(
            agent.begin(SyncSource::Bookmarks, Uuid::new_v4()).await,
            RunOutcome::AlreadyRunning
        );

        agent.stop();
        assert!(matches!(new.await.unwrap(), RunOutcome::Stopped { .. }));
        assert!(!agent.is_running());
        drop(agent);

        let seen = collector.await.unwrap();
        assert!(seen.iter().any(|r| r.run_id() == new_id));
        for report in &seen {
            assert!(matches!(report, AgentReport::Progress { .. }));
            assert!(report.run_id() == old_id || report.run_id() == new_id);
        }
    }

    #[tokio::test]
    async fn test_serve_handles_begin_and_stop_commands() {
        let (reports, report_inbox) = channel(64, Duration::from_secs(1));
        let collector = collect_reports(report_inbox);
        let agent = Arc::new(ExtractionAgent::new(
            Arc::new(PagedFeed::new(endless())),
            reports,
            fast_settings(1000),
        ));
        let (commands, command_inbox) = channel(8, Duration::from_secs(1));
        let server = tokio::spawn(Arc::clone(&agent).serve(command_inbox));

        let begin = commands
            .request(AgentCommand::Begin {
                source: SyncSource::Bookmarks,
                run_id: Uuid::new_v4(),
            })
            .await;
        assert!(begin.success);
        // 循环未取消时重复 begin 应答失败，不会开启第二个循环
        let duplicate = commands
            .request(AgentCommand::Begin {
                source: SyncSource::Bookmarks,
                run_id: Uuid::new_v4(),
            })
            .await;
        assert_eq!(duplicate.error_message(), Some("extraction already running"));

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(agent.is_running());
        assert!(commands.request(AgentCommand::Stop).await.success);

        for _ in 0..100 {
            if !agent.is_running() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(!agent.is_running());

        drop(commands);
        server.await.unwrap();
        drop(agent);
        let seen = collector.await.unwrap();
        assert!(!seen.iter().any(|r| matches!(r, AgentReport::Complete { .. })));
    }
}
