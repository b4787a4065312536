//! 命令通道：两个执行上下文之间的异步请求 / 应答
//!
//! 每个请求都会得到一个 `MessageResponse`：对端正常应答、对端已关闭、丢弃请求未应答或超时，
//! 后三种都被归一化为 `success = false`，调用方只需一条错误处理路径。

pub mod message;

pub use message::{AgentCommand, AgentReport, ControlRequest, MessageResponse};

use std::time::Duration;

use tokio::sync::{mpsc, oneshot};

/// 一条待应答的消息
#[derive(Debug)]
pub struct Envelope<M> {
    pub message: M,
    reply: oneshot::Sender<MessageResponse>,
}

impl<M> Envelope<M> {
    /// 应答；请求方已放弃等待时静默丢弃
    pub fn respond(self, response: MessageResponse) {
        let _ = self.reply.send(response);
    }

    pub fn into_parts(self) -> (M, Responder) {
        (self.message, Responder { reply: self.reply })
    }
}

/// 与消息分离后的应答端
#[derive(Debug)]
pub struct Responder {
    reply: oneshot::Sender<MessageResponse>,
}

impl Responder {
    pub fn respond(self, response: MessageResponse) {
        let _ = self.reply.send(response);
    }
}

/// 请求端（可克隆）
#[derive(Debug)]
pub struct Requester<M> {
    tx: mpsc::Sender<Envelope<M>>,
    timeout: Duration,
}

impl<M> Clone for Requester<M> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            timeout: self.timeout,
        }
    }
}

impl<M: Send> Requester<M> {
    /// 发送并等待应答；任何传输失败都转换为失败应答，不会返回 Err
    pub async fn request(&self, message: M) -> MessageResponse {
        let (reply, rx) = oneshot::channel();
        let envelope = Envelope { message, reply };

        let round_trip = async {
            if self.tx.send(envelope).await.is_err() {
                return MessageResponse::failure(
                    "Could not establish connection. Receiving end does not exist.",
                );
            }
            match rx.await {
                Ok(response) => response,
                Err(_) => MessageResponse::failure(
                    "The message port closed before a response was received.",
                ),
            }
        };

        match tokio::time::timeout(self.timeout, round_trip).await {
            Ok(response) => response,
            Err(_) => MessageResponse::failure(format!(
                "No response within {}ms",
                self.timeout.as_millis()
            )),
        }
    }
}

/// 接收端
#[derive(Debug)]
pub struct Inbox<M> {
    rx: mpsc::Receiver<Envelope<M>>,
}

impl<M> Inbox<M> {
    pub async fn recv(&mut self) -> Option<Envelope<M>> {
        self.rx.recv().await
    }
}

/// 创建一条通道；`timeout` 约束每次请求的完整往返
pub fn channel<M>(capacity: usize, timeout: Duration) -> (Requester<M>, Inbox<M>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (Requester { tx, timeout }, Inbox { rx })
}
