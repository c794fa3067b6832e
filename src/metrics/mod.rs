use prometheus::{
    Encoder, Gauge, GaugeVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
    register_gauge_vec_with_registry, register_gauge_with_registry,
    register_int_counter_vec_with_registry, register_int_counter_with_registry,
    register_int_gauge_with_registry,
};
use lazy_static::lazy_static;
use std::sync::Arc;

use crate::models::{MetricsSnapshot, ProcessRecord, ProcessStatus};

pub struct MetricsRegistry {
    registry: Registry,

    // inventory gauges
    pub processes_total: Gauge,
    pub processes_by_status: GaugeVec,
    pub process_cpu_percent: GaugeVec,
    pub process_memory_bytes: GaugeVec,
    pub process_uptime_timestamp: GaugeVec,

    // 日志桥接
    pub log_sessions_active: IntGauge,
    pub log_tail_spawns: IntCounter,
    pub log_events_published: IntCounterVec,
    pub log_events_dropped: IntCounter,

    // 控制命令
    pub control_commands: IntCounterVec,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        let registry = Registry::new();

        let process_labels = &["name", "id"];

        let processes_total = register_gauge_with_registry!(
            Opts::new("pm2_processes_total", "Number of processes reported by the last listing"),
            registry
        ).unwrap();

        let processes_by_status = register_gauge_vec_with_registry!(
            Opts::new("pm2_processes", "Number of processes per status"),
            &["status"],
            registry
        ).unwrap();

        let process_cpu_percent = register_gauge_vec_with_registry!(
            Opts::new("pm2_process_cpu_percent", "Process CPU usage percentage"),
            process_labels,
            registry
        ).unwrap();

        let process_memory_bytes = register_gauge_vec_with_registry!(
            Opts::new("pm2_process_memory_bytes", "Process memory usage in bytes"),
            process_labels,
            registry
        ).unwrap();

        let process_uptime_timestamp = register_gauge_vec_with_registry!(
            Opts::new(
                "pm2_process_uptime_timestamp_ms",
                "Epoch millis of the last process (re)start"
            ),
            process_labels,
            registry
        ).unwrap();

        let log_sessions_active = register_int_gauge_with_registry!(
            Opts::new("pm2_log_sessions_active", "Live log tailing sessions"),
            registry
        ).unwrap();

        let log_tail_spawns = register_int_counter_with_registry!(
            Opts::new("pm2_log_tail_spawns_total", "Log tailing subprocesses spawned"),
            registry
        ).unwrap();

        let log_events_published = register_int_counter_vec_with_registry!(
            Opts::new("pm2_log_events_published_total", "Log events handed to the broker"),
            &["stream"],
            registry
        ).unwrap();

        let log_events_dropped = register_int_counter_with_registry!(
            Opts::new(
                "pm2_log_events_dropped_total",
                "Log chunks dropped because the stream buffer was full"
            ),
            registry
        ).unwrap();

        let control_commands = register_int_counter_vec_with_registry!(
            Opts::new("pm2_control_commands_total", "Control commands executed"),
            &["action", "result"],
            registry
        ).unwrap();

        Self {
            registry,
            processes_total,
            processes_by_status,
            process_cpu_percent,
            process_memory_bytes,
            process_uptime_timestamp,
            log_sessions_active,
            log_tail_spawns,
            log_events_published,
            log_events_dropped,
            control_commands,
        }
    }

    pub fn render(&self) -> Result<String, Box<dyn std::error::Error>> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }

    /// 用一次新的 listing 覆盖 inventory gauges
    ///
    /// 先 reset，已经消失的进程不会残留旧值。
    pub fn observe_inventory(&self, records: &[ProcessRecord]) {
        self.process_cpu_percent.reset();
        self.process_memory_bytes.reset();
        self.process_uptime_timestamp.reset();

        for record in records {
            let id = record.id.to_string();
            let labels = &[record.name.as_str(), id.as_str()];

            self.process_cpu_percent
                .with_label_values(labels)
                .set(record.cpu_percent);
            self.process_memory_bytes
                .with_label_values(labels)
                .set(record.memory_bytes as f64);
            self.process_uptime_timestamp
                .with_label_values(labels)
                .set(record.uptime_millis as f64);
        }

        let snapshot = MetricsSnapshot::from_records(records);
        self.processes_total.set(snapshot.total_processes as f64);
        for (status, count) in [
            (ProcessStatus::Online, snapshot.running),
            (ProcessStatus::Errored, snapshot.errored),
            (ProcessStatus::Stopped, snapshot.stopped),
            (ProcessStatus::Unknown, snapshot.unclassified()),
        ] {
            self.processes_by_status
                .with_label_values(&[status.as_str()])
                .set(count as f64);
        }
    }
}

lazy_static! {
    pub static ref METRICS: Arc<MetricsRegistry> = Arc::new(MetricsRegistry::new());
}
