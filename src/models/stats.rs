use serde::Serialize;

use crate::models::{ProcessRecord, ProcessStatus};

/// 单次轮询的汇总指标
///
/// `unknown` 状态的进程计入 `total_processes`，但不计入任何状态桶。
#[derive(Debug, Clone, PartialEq, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub total_processes: usize,
    pub running: usize,
    pub errored: usize,
    pub stopped: usize,
    pub total_memory_bytes: u64,
    pub total_cpu_percent: f64,
}

impl MetricsSnapshot {
    pub fn from_records(records: &[ProcessRecord]) -> Self {
        let mut snapshot = Self {
            total_processes: records.len(),
            ..Self::default()
        };

        for record in records {
            match record.status {
                ProcessStatus::Online => snapshot.running += 1,
                ProcessStatus::Errored => snapshot.errored += 1,
                ProcessStatus::Stopped => snapshot.stopped += 1,
                ProcessStatus::Unknown => {}
            }
            snapshot.total_memory_bytes += record.memory_bytes;
            snapshot.total_cpu_percent += record.cpu_percent;
        }

        snapshot
    }

    /// 未归入任何状态桶的进程数
    pub fn unclassified(&self) -> usize {
        self.total_processes - self.running - self.errored - self.stopped
    }
}
