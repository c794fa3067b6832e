//! 实时日志桥接
//!
//! 每个进程 id 最多一个 `pm2 logs <id> --raw --lines 0` 子进程。stdout/stderr 各有一个读任务，
//! 把读到的块放进有界队列；会话任务是该频道 `log-output` 的唯一发布者，并且在发布
//! `log-stopped` 之后退出，所以结束通知之后不会再有输出事件。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Child;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::error::{BridgeError, Result};
use crate::metrics::METRICS;
use crate::models::{LogEvent, LogStream, ProcessId, SessionState};
use crate::services::broker::{ChannelMessage, Publisher};
use crate::services::command_runner::CommandRunner;
use crate::services::session_registry::{Claim, SessionRegistry, SessionTicket};

const CHUNK_SIZE: usize = 8 * 1024;

#[derive(Clone)]
pub struct LogBridge {
    inner: Arc<BridgeInner>,
}

struct BridgeInner {
    supervisor: CommandRunner,
    publisher: Arc<dyn Publisher>,
    registry: SessionRegistry,
    buffer: usize,
    spawns: AtomicU64,
}

enum Outcome {
    StopRequested,
    OutputClosed,
}

impl LogBridge {
    pub fn new(supervisor: CommandRunner, publisher: Arc<dyn Publisher>, buffer: usize) -> Self {
        Self {
            inner: Arc::new(BridgeInner {
                supervisor,
                publisher,
                registry: SessionRegistry::new(),
                buffer: buffer.max(1),
                spawns: AtomicU64::new(0),
            }),
        }
    }

    /// 打开（或加入）某个进程的日志会话，返回频道名
    pub async fn open_session(&self, id: &ProcessId) -> Result<String> {
        let id_text = id.to_arg()?;

        loop {
            match self.inner.registry.claim(id) {
                Claim::Joined {
                    generation,
                    channel,
                    mut state,
                } => {
                    // 还在 starting 时等 spawn 有结果，失败的会话不能算加入成功
                    match state.wait_for(|s| *s != SessionState::Starting).await {
                        Ok(s) if *s == SessionState::Active => {
                            log::debug!(
                                "Joining live log session for process {} on {}",
                                id,
                                channel
                            );
                            return Ok(channel);
                        }
                        Ok(_) => {}
                        Err(_) => {
                            self.inner.registry.release(id, generation);
                        }
                    }
                }
                Claim::Busy {
                    generation,
                    mut state,
                } => {
                    log::debug!("Waiting for previous log session of process {} to stop", id);
                    if state
                        .wait_for(|s| *s == SessionState::Terminated)
                        .await
                        .is_err()
                    {
                        // 会话任务已经不在了，清掉残留记录
                        self.inner.registry.release(id, generation);
                    }
                }
                Claim::Created(ticket) => return self.start(id.clone(), &id_text, ticket),
            }
        }
    }

    /// 关闭会话并等待其结束；返回是否存在过该会话
    pub async fn close_session(&self, id: &ProcessId) -> bool {
        let Some((generation, mut state)) = self.inner.registry.request_stop(id) else {
            return false;
        };

        if state
            .wait_for(|s| *s == SessionState::Terminated)
            .await
            .is_err()
        {
            self.inner.registry.release(id, generation);
        }
        true
    }

    pub async fn shutdown(&self) {
        for id in self.inner.registry.ids() {
            self.close_session(&id).await;
        }
    }

    pub fn is_streaming(&self, id: &ProcessId) -> bool {
        self.inner
            .registry
            .state(id)
            .map(|state| state.is_live())
            .unwrap_or(false)
    }

    pub fn session_state(&self, id: &ProcessId) -> Option<SessionState> {
        self.inner.registry.state(id)
    }

    pub fn active_sessions(&self) -> usize {
        self.inner.registry.len()
    }

    /// 本实例启动过的 tail 子进程数
    pub fn spawn_count(&self) -> u64 {
        self.inner.spawns.load(Ordering::SeqCst)
    }

    fn start(&self, id: ProcessId, id_text: &str, ticket: SessionTicket) -> Result<String> {
        let args = vec![
            "logs".to_string(),
            id_text.to_string(),
            "--raw".to_string(),
            "--lines".to_string(),
            "0".to_string(),
        ];

        self.inner.spawns.fetch_add(1, Ordering::SeqCst);
        METRICS.log_tail_spawns.inc();

        match self.inner.supervisor.follow(&args) {
            Ok(child) => {
                let channel = ticket.channel.clone();
                log::info!("📡 Log tail for process {} started on {}", id, channel);
                tokio::spawn(run_session(self.inner.clone(), id, ticket, child));
                Ok(channel)
            }
            Err(e) => {
                log::error!("Failed to spawn log tail for process {}: {}", id, e);
                self.inner
                    .publish(&ticket.channel, ChannelMessage::log_error(e.to_string()));
                finish(&self.inner, &id, ticket, false);
                Err(BridgeError::StreamSpawnFailed {
                    process_id: id_text.to_string(),
                    reason: e.to_string(),
                })
            }
        }
    }
}

impl BridgeInner {
    // 尽力投递：失败只记录日志，不影响会话
    fn publish(&self, channel: &str, message: ChannelMessage) -> bool {
        match self.publisher.publish(channel, message) {
            Ok(_) => true,
            Err(e) => {
                log::warn!("Failed to publish on {}: {}", channel, e);
                false
            }
        }
    }

    fn publish_output(&self, channel: &str, event: LogEvent) {
        let stream = event.stream;
        if self.publish(channel, ChannelMessage::log_output(&event)) {
            METRICS
                .log_events_published
                .with_label_values(&[stream.as_str()])
                .inc();
        }
    }
}

async fn run_session(
    inner: Arc<BridgeInner>,
    id: ProcessId,
    mut ticket: SessionTicket,
    mut child: Child,
) {
    // spawn 期间可能已经收到 close
    if *ticket.stop.borrow() {
        log::info!("Log session for process {} closed before it became active", id);
        terminate(&mut child).await;
        finish(&inner, &id, ticket, false);
        return;
    }

    let (tx, mut rx) = mpsc::channel::<LogEvent>(inner.buffer);
    let mut readers: Vec<JoinHandle<()>> = Vec::new();
    if let Some(stdout) = child.stdout.take() {
        readers.push(tokio::spawn(read_chunks(stdout, LogStream::Stdout, tx.clone())));
    }
    if let Some(stderr) = child.stderr.take() {
        readers.push(tokio::spawn(read_chunks(stderr, LogStream::Stderr, tx.clone())));
    }
    drop(tx);

    ticket.state.send_replace(SessionState::Active);
    METRICS.log_sessions_active.inc();

    let outcome = loop {
        tokio::select! {
            biased;
            _ = stop_requested(&mut ticket.stop) => break Outcome::StopRequested,
            event = rx.recv() => match event {
                Some(event) => inner.publish_output(&ticket.channel, event),
                None => break Outcome::OutputClosed,
            },
        }
    };

    ticket.state.send_replace(SessionState::Stopping);
    for reader in &readers {
        reader.abort();
    }
    drop(rx);

    let exit = match outcome {
        Outcome::StopRequested => {
            terminate(&mut child).await;
            None
        }
        Outcome::OutputClosed => {
            tokio::select! {
                biased;
                _ = stop_requested(&mut ticket.stop) => {
                    terminate(&mut child).await;
                    None
                }
                status = child.wait() => Some(status),
            }
        }
    };

    match exit {
        Some(Ok(status)) if !status.success() => {
            let error = match status.code() {
                Some(code) => format!("Process exited with code {}", code),
                None => format!("Process exited with {}", status),
            };
            log::warn!("Log tail for process {} ended: {}", id, error);
            inner.publish(&ticket.channel, ChannelMessage::log_error(error));
        }
        Some(Ok(_)) => log::info!("Log tail for process {} exited", id),
        Some(Err(e)) => {
            log::error!("Failed to wait for log tail of process {}: {}", id, e);
            inner.publish(&ticket.channel, ChannelMessage::log_error(e.to_string()));
        }
        None => log::info!("Log tail for process {} closed", id),
    }

    finish(&inner, &id, ticket, true);
}

// 发布 log-stopped，移除注册表记录，最后标记 terminated
fn finish(inner: &BridgeInner, id: &ProcessId, ticket: SessionTicket, was_active: bool) {
    inner.publish(&ticket.channel, ChannelMessage::log_stopped());
    inner.registry.release(id, ticket.generation);
    if was_active {
        METRICS.log_sessions_active.dec();
    }
    ticket.state.send_replace(SessionState::Terminated);
}

async fn stop_requested(stop: &mut watch::Receiver<bool>) {
    while !*stop.borrow_and_update() {
        if stop.changed().await.is_err() {
            return;
        }
    }
}

async fn terminate(child: &mut Child) {
    if let Err(e) = child.start_kill() {
        log::debug!("Log tail already gone: {}", e);
    }
    if let Err(e) = child.wait().await {
        log::warn!("Failed to reap log tail: {}", e);
    }
}

async fn read_chunks<R>(mut reader: R, stream: LogStream, tx: mpsc::Sender<LogEvent>)
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut pending: Vec<u8> = Vec::new();

    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                log::warn!("Failed to read log tail {}: {}", stream.as_str(), e);
                break;
            }
        };

        pending.extend_from_slice(&buf[..n]);
        let payload = take_utf8(&mut pending);
        if payload.is_empty() {
            continue;
        }
        if !forward(&tx, LogEvent::now(stream, payload)) {
            return;
        }
    }

    if !pending.is_empty() {
        let payload = String::from_utf8_lossy(&pending).into_owned();
        forward(&tx, LogEvent::now(stream, payload));
    }
}

// 队列满时丢弃并计数，采集不等待发布；返回 false 表示接收端已关闭
fn forward(tx: &mpsc::Sender<LogEvent>, event: LogEvent) -> bool {
    match tx.try_send(event) {
        Ok(()) => true,
        Err(mpsc::error::TrySendError::Full(event)) => {
            METRICS.log_events_dropped.inc();
            log::debug!("Log stream buffer full, dropped {} bytes", event.payload.len());
            true
        }
        Err(mpsc::error::TrySendError::Closed(_)) => false,
    }
}

/// 取出 `pending` 中可以完整解码的前缀；末尾被截断的多字节字符留到下一块
fn take_utf8(pending: &mut Vec<u8>) -> String {
    let valid = match std::str::from_utf8(pending) {
        Ok(_) => pending.len(),
        Err(e) if e.error_len().is_none() => e.valid_up_to(),
        // 真正的非法字节：整块有损解码
        Err(_) => pending.len(),
    };
    let rest = pending.split_off(valid);
    let chunk = std::mem::replace(pending, rest);
    String::from_utf8_lossy(&chunk).into_owned()
}
