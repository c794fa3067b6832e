use crate::error::{BridgeError, Result};
use crate::models::{LogSnapshot, ProcessId};
use crate::services::command_runner::CommandRunner;
use crate::services::output_parser::strip_ansi;

pub const MAX_LOG_LINES: usize = 10_000;

/// 一次性读取最近 N 行日志（`pm2 logs --nostream`），不跟随
#[derive(Debug, Clone)]
pub struct LogTailFetcher {
    supervisor: CommandRunner,
}

impl LogTailFetcher {
    pub fn new(supervisor: CommandRunner) -> Self {
        Self { supervisor }
    }

    pub async fn get_logs(&self, id: &ProcessId, lines: usize) -> Result<LogSnapshot> {
        let id_text = id.to_arg()?;
        let lines = lines.min(MAX_LOG_LINES);

        let args = vec![
            "logs".to_string(),
            id_text.clone(),
            "--lines".to_string(),
            lines.to_string(),
            "--nostream".to_string(),
            "--raw".to_string(),
        ];

        let output = self.supervisor.run(&args).await.map_err(|e| {
            log::error!("pm2 logs {} failed: {}", id_text, e);
            BridgeError::ControlCommandFailed {
                process_id: id_text.clone(),
                exit_info: e.to_string(),
            }
        })?;

        if !output.success() {
            log::error!("pm2 logs {} exited with {}", id_text, output.exit_info());
            return Err(BridgeError::ControlCommandFailed {
                process_id: id_text,
                exit_info: output.status.to_string(),
            });
        }

        Ok(LogSnapshot {
            stdout: split_lines(&output.stdout),
            stderr: split_lines(&output.stderr),
        })
    }
}

fn split_lines(text: &str) -> Vec<String> {
    strip_ansi(text).lines().map(str::to_string).collect()
}
