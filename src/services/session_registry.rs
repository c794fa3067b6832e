use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::watch;

use crate::models::{ProcessId, SessionState};

pub const CHANNEL_PREFIX: &str = "pm2-logs-";

/// 订阅方可以自行推导出频道名，不需要额外查询
pub fn channel_name(id: &ProcessId) -> String {
    format!("{}{}", CHANNEL_PREFIX, id)
}

struct SessionEntry {
    generation: u64,
    channel: String,
    state: watch::Receiver<SessionState>,
    stop: watch::Sender<bool>,
}

/// 新建会话的所有权凭证，交给负责该会话的任务
#[derive(Debug)]
pub struct SessionTicket {
    pub generation: u64,
    pub channel: String,
    pub state: watch::Sender<SessionState>,
    pub stop: watch::Receiver<bool>,
}

#[derive(Debug)]
pub enum Claim {
    /// 已有 starting/active 会话，共用它的频道
    Joined {
        generation: u64,
        channel: String,
        state: watch::Receiver<SessionState>,
    },
    /// 上一个会话还在 stopping，等它结束后重试
    Busy {
        generation: u64,
        state: watch::Receiver<SessionState>,
    },
    Created(SessionTicket),
}

#[derive(Default)]
struct Inner {
    sessions: HashMap<ProcessId, SessionEntry>,
    next_generation: u64,
}

/// 按进程 id 记录正在运行的 tail 会话
///
/// 同一个 id 任意时刻最多一个 starting/active 会话；检查和插入在同一把锁内完成。
#[derive(Default)]
pub struct SessionRegistry {
    inner: Mutex<Inner>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn claim(&self, id: &ProcessId) -> Claim {
        let mut inner = self.lock();

        if let Some(entry) = inner.sessions.get(id) {
            if entry.state.borrow().is_live() {
                return Claim::Joined {
                    generation: entry.generation,
                    channel: entry.channel.clone(),
                    state: entry.state.clone(),
                };
            }
            return Claim::Busy {
                generation: entry.generation,
                state: entry.state.clone(),
            };
        }

        inner.next_generation += 1;
        let generation = inner.next_generation;
        let channel = channel_name(id);
        let (state_tx, state_rx) = watch::channel(SessionState::Starting);
        let (stop_tx, stop_rx) = watch::channel(false);

        inner.sessions.insert(
            id.clone(),
            SessionEntry {
                generation,
                channel: channel.clone(),
                state: state_rx,
                stop: stop_tx,
            },
        );

        Claim::Created(SessionTicket {
            generation,
            channel,
            state: state_tx,
            stop: stop_rx,
        })
    }

    /// 置位停止标志，返回 (generation, 状态订阅) 供调用方等待结束
    pub fn request_stop(&self, id: &ProcessId) -> Option<(u64, watch::Receiver<SessionState>)> {
        let inner = self.lock();
        let entry = inner.sessions.get(id)?;
        entry.stop.send_replace(true);
        Some((entry.generation, entry.state.clone()))
    }

    /// 只有 generation 匹配时才移除，避免误删后来的新会话
    pub fn release(&self, id: &ProcessId, generation: u64) -> bool {
        let mut inner = self.lock();
        match inner.sessions.get(id) {
            Some(entry) if entry.generation == generation => {
                inner.sessions.remove(id);
                true
            }
            _ => false,
        }
    }

    pub fn state(&self, id: &ProcessId) -> Option<SessionState> {
        self.lock().sessions.get(id).map(|entry| *entry.state.borrow())
    }

    pub fn ids(&self) -> Vec<ProcessId> {
        self.lock().sessions.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ticket(claim: Claim) -> SessionTicket {
        match claim {
            Claim::Created(ticket) => ticket,
            other => panic!("expected a new session, got {:?}", other),
        }
    }

    #[test]
    fn test_channel_name_is_deterministic() {
        assert_eq!(channel_name(&ProcessId::Index(8)), "pm2-logs-8");
        assert_eq!(channel_name(&ProcessId::Name("api".into())), "pm2-logs-api");
    }

    #[test]
    fn test_second_claim_joins_live_session() {
        let registry = SessionRegistry::new();
        let id = ProcessId::Index(1);

        let first = ticket(registry.claim(&id));
        assert_eq!(registry.state(&id), Some(SessionState::Starting));
        match registry.claim(&id) {
            Claim::Joined {
                generation,
                channel,
                ..
            } => {
                assert_eq!(generation, first.generation);
                assert_eq!(channel, first.channel);
            }
            other => panic!("unexpected claim: {:?}", other),
        }

        first.state.send_replace(SessionState::Active);
        assert!(matches!(registry.claim(&id), Claim::Joined { .. }));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_stopping_session_reports_busy() {
        let registry = SessionRegistry::new();
        let id = ProcessId::Index(1);
        let first = ticket(registry.claim(&id));
        first.state.send_replace(SessionState::Stopping);

        match registry.claim(&id) {
            Claim::Busy { generation, .. } => assert_eq!(generation, first.generation),
            other => panic!("unexpected claim: {:?}", other),
        }
    }

    #[test]
    fn test_request_stop_sets_flag() {
        let registry = SessionRegistry::new();
        let id = ProcessId::Index(1);
        let first = ticket(registry.claim(&id));

        assert!(!*first.stop.borrow());
        let (generation, _) = registry.request_stop(&id).unwrap();
        assert_eq!(generation, first.generation);
        assert!(*first.stop.borrow());
        assert!(registry.request_stop(&ProcessId::Index(2)).is_none());
    }

    #[test]
    fn test_release_checks_generation() {
        let registry = SessionRegistry::new();
        let id = ProcessId::Index(1);
        let first = ticket(registry.claim(&id));
        assert!(registry.release(&id, first.generation));
        assert!(registry.is_empty());

        let second = ticket(registry.claim(&id));
        assert_ne!(first.generation, second.generation);
        // 旧会话迟到的清理不能删掉新会话
        assert!(!registry.release(&id, first.generation));
        assert_eq!(registry.ids(), vec![id.clone()]);
        assert!(registry.release(&id, second.generation));
    }

    #[test]
    fn test_ids_are_independent() {
        let registry = SessionRegistry::new();
        let _a = ticket(registry.claim(&ProcessId::Index(1)));
        let _b = ticket(registry.claim(&ProcessId::Name("1-api".into())));
        assert_eq!(registry.len(), 2);
    }
}
