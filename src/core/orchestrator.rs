//! 同步编排器：长期存活的控制端
//!
//! 负责：单会话约束（syncing 时 start 为空操作）、目标页面的查找 / 创建与就绪等待、
//! 把 Agent 上报折叠进持久化的同步状态，以及 stop 的强制收尾。
//! 状态机：idle --start--> syncing --complete/error--> completed/error；任意状态 --stop--> idle。
//! 上报按 run_id 归属会话，不属于当前会话的上报只合并记录、不改动状态。

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{watch, Mutex};
use uuid::Uuid;

use crate::channel::{AgentCommand, AgentReport, ControlRequest, Inbox, MessageResponse};
use crate::core::state::now_millis;
use crate::core::{Record, Session, SessionSupervisor, SyncError, SyncSource, SyncStatus};
use crate::storage::Repository;
use crate::surface::{SurfaceHost, SurfaceId};

/// start 的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    /// 已开启新会话
    Started(Session),
    /// 已有同步在进行，本次调用未做任何事
    AlreadySyncing,
}

/// 上报处理结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportDisposition {
    Applied,
    /// 状态已不是 syncing，或上报来自已结束的会话，被忽略
    Stale,
}

pub struct SyncOrchestrator {
    repo: Arc<dyn Repository>,
    host: Arc<dyn SurfaceHost>,
    /// 配置中保存的用户名；start 的 handle 参数优先
    stored_handle: Option<String>,
    supervisor: SessionSupervisor,
    /// 串行化状态的读改写，避免上报与 stop / start 交错时互相覆盖
    status_lock: Mutex<()>,
    status_tx: watch::Sender<SyncStatus>,
}

impl SyncOrchestrator {
    pub fn new(repo: Arc<dyn Repository>, host: Arc<dyn SurfaceHost>) -> Self {
        let (status_tx, _) = watch::channel(SyncStatus::default());
        Self {
            repo,
            host,
            stored_handle: None,
            supervisor: SessionSupervisor::new(),
            status_lock: Mutex::new(()),
            status_tx,
        }
    }

    pub fn with_stored_handle(mut self, handle: Option<String>) -> Self {
        self.stored_handle = handle.filter(|h| !h.trim().is_empty());
        self
    }

    /// 订阅状态变化（不等待订阅方）
    pub fn subscribe(&self) -> watch::Receiver<SyncStatus> {
        self.status_tx.subscribe()
    }

    pub async fn status(&self) -> Result<SyncStatus, SyncError> {
        Ok(self.repo.get_status().await?)
    }

    pub async fn records(&self) -> Result<Vec<Record>, SyncError> {
        Ok(self.repo.get().await?)
    }

    /// 当前会话句柄
    pub async fn session(&self) -> Option<Session> {
        self.supervisor.current().await
    }

    /// 开始同步
    ///
    /// 已在 syncing 时直接返回；缺少用户名时返回配置错误且不改动状态；
    /// 写入 syncing 之后的失败会把状态回滚为 error 并清空会话句柄。
    pub async fn start(
        &self,
        source: SyncSource,
        handle_hint: Option<&str>,
    ) -> Result<StartOutcome, SyncError> {
        let locator = {
            let _guard = self.status_lock.lock().await;
            let current = self.repo.get_status().await?;
            if current.is_syncing() {
                tracing::info!(%source, running = %current.source, "sync already in progress, start ignored");
                return Ok(StartOutcome::AlreadySyncing);
            }

            let handle = handle_hint
                .filter(|h| !h.trim().is_empty())
                .or(self.stored_handle.as_deref())
                .unwrap_or("");
            let locator = source.locator(handle)?;

            self.write_status(SyncStatus::started(source, now_millis()))
                .await?;
            locator
        };

        match self.open_session(source, &locator).await {
            Ok(session) => {
                tracing::info!(
                    %source,
                    surface = %session.surface,
                    run_id = %session.run_id,
                    "sync started"
                );
                Ok(StartOutcome::Started(session))
            }
            Err(e) => {
                tracing::warn!(%source, locator = %locator, error = %e, "sync start failed");
                self.supervisor.release().await;
                let _guard = self.status_lock.lock().await;
                let mut status = self.repo.get_status().await?;
                // stop 可能已经抢先收尾
                if status.is_syncing() {
                    status.fail(e.to_string(), now_millis());
                    self.write_status(status).await?;
                }
                Err(e)
            }
        }
    }

    async fn open_session(&self, source: SyncSource, locator: &str) -> Result<Session, SyncError> {
        let surface = match self.host.locate(locator).await {
            Some(id) => id,
            None => self.host.create(locator).await?,
        };
        let session = Session::new(surface, source);
        self.supervisor.track(session.clone()).await;

        self.host.wait_ready(surface).await?;
        let command = AgentCommand::Begin {
            source,
            run_id: session.run_id,
        };
        let response = self.host.send(surface, command).await;
        if let Some(error) = response.error_message() {
            return Err(SyncError::Transport(error.to_string()));
        }
        Ok(session)
    }

    /// 上报是否属于仍在 syncing 的当前会话
    async fn is_live_run(&self, status: &SyncStatus, run_id: Uuid) -> bool {
        status.is_syncing()
            && self
                .supervisor
                .current()
                .await
                .is_some_and(|session| session.run_id == run_id)
    }

    /// 合并一批记录并累加计数；不属于当前会话时只合并不计数
    pub async fn on_progress(
        &self,
        run_id: Uuid,
        records: Vec<Record>,
    ) -> Result<ReportDisposition, SyncError> {
        let extracted = records.len();
        let merged = self.repo.merge(records).await?;

        let _guard = self.status_lock.lock().await;
        let mut status = self.repo.get_status().await?;
        if !self.is_live_run(&status, run_id).await {
            tracing::debug!(%run_id, extracted, merged, state = ?status.state, "stale progress report ignored");
            return Ok(ReportDisposition::Stale);
        }
        status.record_progress(extracted, merged);
        tracing::info!(
            extracted,
            merged,
            total = status.total_extracted,
            new = status.new_count,
            "sync progress"
        );
        self.write_status(status).await?;
        Ok(ReportDisposition::Applied)
    }

    pub async fn on_complete(&self, run_id: Uuid) -> Result<ReportDisposition, SyncError> {
        let _guard = self.status_lock.lock().await;
        let mut status = self.repo.get_status().await?;
        if !self.is_live_run(&status, run_id).await {
            tracing::debug!(%run_id, state = ?status.state, "stale complete report ignored");
            return Ok(ReportDisposition::Stale);
        }
        status.complete(now_millis());
        tracing::info!(
            total = status.total_extracted,
            new = status.new_count,
            "sync completed"
        );
        self.supervisor.release().await;
        self.write_status(status).await?;
        Ok(ReportDisposition::Applied)
    }

    pub async fn on_error(
        &self,
        run_id: Uuid,
        message: &str,
    ) -> Result<ReportDisposition, SyncError> {
        let _guard = self.status_lock.lock().await;
        let mut status = self.repo.get_status().await?;
        if !self.is_live_run(&status, run_id).await {
            tracing::debug!(%run_id, state = ?status.state, error = message, "stale error report ignored");
            return Ok(ReportDisposition::Stale);
        }
        status.fail(message, now_millis());
        tracing::warn!(error = message, "sync failed");
        self.supervisor.release().await;
        self.write_status(status).await?;
        Ok(ReportDisposition::Applied)
    }

    /// 停止同步：尽力通知页内 Agent，然后无条件把状态置为 idle
    pub async fn stop(&self) -> Result<(), SyncError> {
        if let Some(session) = self.supervisor.release().await {
            let response = self.host.send(session.surface, AgentCommand::Stop).await;
            match response.error_message() {
                Some(error) => tracing::warn!(
                    surface = %session.surface,
                    error,
                    "stop command not delivered"
                ),
                None => tracing::info!(surface = %session.surface, run_id = %session.run_id, "stop command sent"),
            }
        }

        let _guard = self.status_lock.lock().await;
        let mut status = self.repo.get_status().await?;
        status.halt(now_millis());
        self.write_status(status).await?;
        Ok(())
    }

    /// 清空已采集记录并重置状态
    pub async fn clear_data(&self) -> Result<(), SyncError> {
        let _guard = self.status_lock.lock().await;
        self.repo.clear().await?;
        self.write_status(SyncStatus::default()).await?;
        tracing::info!("synced data cleared");
        Ok(())
    }

    /// 处理一条 Agent 上报
    pub async fn handle_report(&self, report: AgentReport) -> Result<ReportDisposition, SyncError> {
        match report {
            AgentReport::Progress { run_id, records } => self.on_progress(run_id, records).await,
            AgentReport::Complete { run_id } => self.on_complete(run_id).await,
            AgentReport::Error { run_id, error } => self.on_error(run_id, &error).await,
        }
    }

    /// 处理一条控制请求，错误折叠为失败应答
    pub async fn handle_control(&self, request: ControlRequest) -> MessageResponse {
        let result = match request {
            ControlRequest::StartSync { source, handle } => self
                .start(source, handle.as_deref())
                .await
                .map(|outcome| match outcome {
                    StartOutcome::Started(session) => serde_json::json!({
                        "started": true,
                        "surface": session.surface.to_string(),
                        "runId": session.run_id.to_string(),
                    }),
                    StartOutcome::AlreadySyncing => serde_json::json!({ "started": false }),
                }),
            ControlRequest::StopSync => self.stop().await.map(|_| serde_json::Value::Null),
            ControlRequest::GetSyncStatus => self.status().await.and_then(to_json),
            ControlRequest::GetSyncedRecords => self.records().await.and_then(to_json),
            ControlRequest::ClearSyncedData => {
                self.clear_data().await.map(|_| serde_json::Value::Null)
            }
        };
        match result {
            Ok(serde_json::Value::Null) => MessageResponse::ok(),
            Ok(data) => MessageResponse::with_data(data),
            Err(e) => MessageResponse::failure(e.to_string()),
        }
    }

    /// 逐条处理 Agent 上报直到所有上报端关闭；每条都会得到应答
    pub async fn serve_reports(self: Arc<Self>, mut inbox: Inbox<AgentReport>) {
        while let Some(envelope) = inbox.recv().await {
            let (report, responder) = envelope.into_parts();
            let kind = report.kind();
            let response = match self.handle_report(report).await {
                Ok(_) => MessageResponse::ok(),
                Err(e) => {
                    tracing::error!(kind, error = %e, "failed to apply report");
                    MessageResponse::failure(e.to_string())
                }
            };
            responder.respond(response);
        }
        tracing::debug!("report channel closed");
    }

    /// 逐条处理控制请求直到控制端关闭
    pub async fn serve_control(self: Arc<Self>, mut inbox: Inbox<ControlRequest>) {
        while let Some(envelope) = inbox.recv().await {
            let (request, responder) = envelope.into_parts();
            responder.respond(self.handle_control(request).await);
        }
    }

    /// 会话对应的页面（测试与诊断用）
    pub async fn active_surface(&self) -> Option<SurfaceId> {
        self.supervisor.current().await.map(|s| s.surface)
    }

    async fn write_status(&self, status: SyncStatus) -> Result<(), SyncError> {
        self.repo.set_status(status.clone()).await?;
        self.status_tx.send_replace(status);
        Ok(())
    }
}

fn to_json<T: Serialize>(value: T) -> Result<serde_json::Value, SyncError> {
    serde_json::to_value(value)
        .map_err(|e| SyncError::Storage(crate::storage::StorageError::Json(e)))
}
