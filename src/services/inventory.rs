use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};

use crate::error::{BridgeError, Result};
use crate::models::{MetricsSnapshot, ProcessId, ProcessRecord, ProcessStatus};
use crate::services::command_runner::CommandRunner;
use crate::services::output_parser::extract_json_array;

// `pm2 jlist` 单个元素的中间结构，每个字段各自退化为默认值
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawProcess {
    #[serde(deserialize_with = "lenient")]
    name: Option<String>,
    #[serde(deserialize_with = "lenient")]
    pm_id: Option<ProcessId>,
    #[serde(deserialize_with = "lenient")]
    pm2_env: Option<RawEnv>,
    #[serde(deserialize_with = "lenient")]
    monit: Option<RawMonit>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawEnv {
    #[serde(deserialize_with = "lenient")]
    status: Option<String>,
    #[serde(deserialize_with = "lenient")]
    pm_uptime: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawMonit {
    #[serde(deserialize_with = "lenient")]
    cpu: Option<f64>,
    #[serde(deserialize_with = "lenient")]
    memory: Option<f64>,
}

// 类型不符的字段当作缺失，不影响同一元素的其它字段
fn lenient<'de, D, T>(deserializer: D) -> std::result::Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).ok())
}

impl RawProcess {
    fn into_record(self) -> ProcessRecord {
        let env = self.pm2_env.unwrap_or_default();
        let monit = self.monit.unwrap_or_default();

        ProcessRecord {
            name: self.name.unwrap_or_default(),
            id: self.pm_id.unwrap_or_default(),
            status: env
                .status
                .as_deref()
                .map(ProcessStatus::from_supervisor)
                .unwrap_or(ProcessStatus::Unknown),
            cpu_percent: monit.cpu.unwrap_or(0.0).max(0.0),
            memory_bytes: non_negative(monit.memory),
            uptime_millis: non_negative(env.pm_uptime),
        }
    }
}

fn non_negative(value: Option<f64>) -> u64 {
    match value {
        Some(v) if v.is_finite() && v > 0.0 => v as u64,
        _ => 0,
    }
}

/// 把 `pm2 jlist` 的原始输出投影成进程列表
///
/// 字段类型不符时只有该字段取默认值；元素本身不是对象时退化为全默认值记录，
/// 列表长度始终等于数组长度。
pub fn parse_inventory(raw: &str) -> Result<Vec<ProcessRecord>> {
    let values = extract_json_array(raw)?;

    let records = values
        .into_iter()
        .enumerate()
        .map(|(index, value)| match serde_json::from_value::<RawProcess>(value) {
            Ok(raw) => raw.into_record(),
            Err(e) => {
                log::warn!(
                    "Inventory entry #{} does not match the expected schema: {}",
                    index,
                    e
                );
                RawProcess::default().into_record()
            }
        })
        .collect();

    Ok(records)
}

/// 通过 `pm2 jlist` 获取进程清单和汇总指标
#[derive(Debug, Clone)]
pub struct InventoryCollector {
    supervisor: CommandRunner,
}

impl InventoryCollector {
    pub fn new(supervisor: CommandRunner) -> Self {
        Self { supervisor }
    }

    pub async fn list_processes(&self) -> Result<Vec<ProcessRecord>> {
        let output = self
            .supervisor
            .run(&["jlist".to_string()])
            .await
            .map_err(|e| {
                log::error!("pm2 jlist failed: {}", e);
                BridgeError::SupervisorUnavailable(e.to_string())
            })?;

        if !output.success() {
            log::error!("pm2 jlist exited with {}", output.exit_info());
            log::debug!("pm2 jlist stderr: {}", output.stderr);
            return Err(BridgeError::SupervisorUnavailable(format!(
                "pm2 jlist exited with {}",
                output.status
            )));
        }

        parse_inventory(&output.stdout).map_err(|e| match e {
            BridgeError::MalformedOutput(detail) => {
                BridgeError::MalformedOutput(format!("pm2 jlist: {}", detail))
            }
            other => other,
        })
    }

    /// 每次都重新执行一次 jlist，不复用上一次的列表
    pub async fn get_metrics(&self) -> Result<MetricsSnapshot> {
        let records = self.list_processes().await?;
        Ok(MetricsSnapshot::from_records(&records))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const SAMPLE: &str = r#">>>> In-memory PM2 is serving
[
  {"pid": 101, "name": "api", "pm_id": 0,
   "monit": {"memory": 52428800, "cpu": 3},
   "pm2_env": {"status": "online", "pm_uptime": 1700000000000, "restart_time": 2}},
  {"pid": 0, "name": "worker", "pm_id": 1,
   "monit": {"memory": 0, "cpu": 0},
   "pm2_env": {"status": "errored", "pm_uptime": 1700000001000}},
  {"pid": 0, "name": "cron", "pm_id": 2,
   "monit": {"memory": 1024, "cpu": 0.5},
   "pm2_env": {"status": "stopped"}}
]"#;

    fn fake_pm2(script: &str) -> CommandRunner {
        CommandRunner::new("sh", Duration::from_secs(5)).with_base_args(["-c", script, "pm2"])
    }

    #[test]
    fn test_parse_sample() {
        let records = parse_inventory(SAMPLE).unwrap();
        assert_eq!(records.len(), 3);

        assert_eq!(records[0].name, "api");
        assert_eq!(records[0].id, ProcessId::Index(0));
        assert_eq!(records[0].status, ProcessStatus::Online);
        assert_eq!(records[0].memory_bytes, 52_428_800);
        assert_eq!(records[0].uptime_millis, 1_700_000_000_000);
        assert_eq!(records[2].status, ProcessStatus::Stopped);
        assert_eq!(records[2].uptime_millis, 0);
    }

    #[test]
    fn test_missing_fields_degrade_to_defaults() {
        let records =
            parse_inventory(r#"[{}, {"name": "x", "pm2_env": null, "monit": {"cpu": -4}}]"#)
                .unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].name, "");
        assert_eq!(records[0].id, ProcessId::Index(0));
        assert_eq!(records[0].status, ProcessStatus::Unknown);
        assert_eq!(records[1].cpu_percent, 0.0);
    }

    #[test]
    fn test_mistyped_field_keeps_rest_of_record() {
        let records = parse_inventory(
            r#"[
  {"name": "api", "pm_id": 0, "pm2_env": {"status": "online"}, "monit": {"cpu": 1.5, "memory": "1024"}},
  {"name": "neg", "pm_id": -1, "pm2_env": {"status": "errored", "pm_uptime": "soon"}, "monit": {"cpu": 0, "memory": 64}},
  {"name": 42, "pm_id": 2, "pm2_env": {"status": "stopped"}, "monit": "n/a"}
]"#,
        )
        .unwrap();

        assert_eq!(records[0].name, "api");
        assert_eq!(records[0].status, ProcessStatus::Online);
        assert_eq!(records[0].cpu_percent, 1.5);
        assert_eq!(records[0].memory_bytes, 0);

        assert_eq!(records[1].name, "neg");
        assert_eq!(records[1].id, ProcessId::Index(0));
        assert_eq!(records[1].status, ProcessStatus::Errored);
        assert_eq!(records[1].memory_bytes, 64);
        assert_eq!(records[1].uptime_millis, 0);

        assert_eq!(records[2].name, "");
        assert_eq!(records[2].id, ProcessId::Index(2));
        assert_eq!(records[2].status, ProcessStatus::Stopped);

        let snapshot = MetricsSnapshot::from_records(&records);
        assert_eq!((snapshot.running, snapshot.errored, snapshot.stopped), (1, 1, 1));
    }

    #[test]
    fn test_wrong_element_shape_keeps_count() {
        let records = parse_inventory(r#"[42, {"name": "ok", "pm2_env": {"status": "online"}}]"#)
            .unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].status, ProcessStatus::Unknown);
        assert_eq!(records[1].status, ProcessStatus::Online);
    }

    #[test]
    fn test_named_pm_id() {
        let records = parse_inventory(r#"[{"pm_id": "web"}]"#).unwrap();
        assert_eq!(records[0].id, ProcessId::Name("web".to_string()));
    }

    #[tokio::test]
    async fn test_metrics_from_sample_listing() {
        let script = format!("[ \"$1\" = jlist ] && cat <<'JSON'\n{}\nJSON", SAMPLE);
        let collector = InventoryCollector::new(fake_pm2(&script));

        let metrics = collector.get_metrics().await.unwrap();
        assert_eq!(metrics.total_processes, 3);
        assert_eq!(metrics.running, 1);
        assert_eq!(metrics.errored, 1);
        assert_eq!(metrics.stopped, 1);
        assert_eq!(metrics.total_memory_bytes, 52_428_800 + 1024);

        let records = collector.list_processes().await.unwrap();
        assert_eq!(metrics.total_processes, records.len());
    }

    #[tokio::test]
    async fn test_unknown_status_counts_in_total_only() {
        let script = r#"echo '[{"pm2_env":{"status":"launching"}},{"pm2_env":{"status":"online"}}]'"#;
        let collector = InventoryCollector::new(fake_pm2(script));
        let metrics = collector.get_metrics().await.unwrap();
        assert_eq!(metrics.total_processes, 2);
        assert_eq!(metrics.running, 1);
        assert_eq!(metrics.running + metrics.errored + metrics.stopped, 1);
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_unavailable() {
        let collector = InventoryCollector::new(fake_pm2("echo 'daemon not running' >&2; exit 1"));
        let err = collector.list_processes().await.unwrap_err();
        assert!(matches!(err, BridgeError::SupervisorUnavailable(_)));
    }

    #[tokio::test]
    async fn test_missing_binary_is_unavailable() {
        let collector =
            InventoryCollector::new(CommandRunner::new("/nonexistent/pm2", Duration::from_secs(1)));
        let err = collector.get_metrics().await.unwrap_err();
        assert!(matches!(err, BridgeError::SupervisorUnavailable(_)));
    }

    #[tokio::test]
    async fn test_garbage_output_is_malformed() {
        let collector = InventoryCollector::new(fake_pm2("echo 'PM2 error: connect ENOENT'"));
        let err = collector.list_processes().await.unwrap_err();
        match err {
            BridgeError::MalformedOutput(detail) => assert!(detail.starts_with("pm2 jlist")),
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
