use lazy_static::lazy_static;
use regex::Regex;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use crate::error::{BridgeError, Result};
use crate::metrics::METRICS;
use crate::models::{ControlResult, ProcessId};
use crate::services::command_runner::{CommandOutput, CommandRunner, RunError};

lazy_static! {
    // [user@]host，首字符不能是 '-'，避免被 ssh 当成选项
    static ref REMOTE_HOST: Regex =
        Regex::new(r"^(?:[A-Za-z0-9_][A-Za-z0-9._-]*@)?[A-Za-z0-9][A-Za-z0-9.-]*$").unwrap();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlAction {
    Start,
    Stop,
    Restart,
}

impl ControlAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ControlAction::Start => "start",
            ControlAction::Stop => "stop",
            ControlAction::Restart => "restart",
        }
    }

    fn past_tense(&self) -> &'static str {
        match self {
            ControlAction::Start => "started",
            ControlAction::Stop => "stopped",
            ControlAction::Restart => "restarted",
        }
    }
}

impl FromStr for ControlAction {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "start" => Ok(ControlAction::Start),
            "stop" => Ok(ControlAction::Stop),
            "restart" => Ok(ControlAction::Restart),
            other => Err(format!("unsupported action '{}'", other)),
        }
    }
}

impl fmt::Display for ControlAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 控制命令成功后通知缓存/UI 层刷新指定路径
pub trait Revalidate: Send + Sync {
    fn revalidate(&self, path: &str);
}

/// 执行 pm2 start/stop/restart，本地或经 ssh 远程
pub struct ControlExecutor {
    supervisor: CommandRunner,
    ssh: CommandRunner,
    remote_pm2: String,
    revalidator: Arc<dyn Revalidate>,
}

impl ControlExecutor {
    pub fn new(
        supervisor: CommandRunner,
        ssh: CommandRunner,
        remote_pm2: impl Into<String>,
        revalidator: Arc<dyn Revalidate>,
    ) -> Self {
        Self {
            supervisor,
            ssh,
            remote_pm2: remote_pm2.into(),
            revalidator,
        }
    }

    pub async fn restart(&self, id: &ProcessId) -> Result<ControlResult> {
        self.execute(ControlAction::Restart, id).await
    }

    pub async fn start(&self, id: &ProcessId) -> Result<ControlResult> {
        self.execute(ControlAction::Start, id).await
    }

    pub async fn stop(&self, id: &ProcessId) -> Result<ControlResult> {
        self.execute(ControlAction::Stop, id).await
    }

    /// 成功只看退出码，stdout 仅作参考
    pub async fn execute(&self, action: ControlAction, id: &ProcessId) -> Result<ControlResult> {
        let id_text = id.to_arg()?;
        let args = vec![action.as_str().to_string(), id_text.clone()];

        let result = self.supervisor.run(&args).await;
        let output = self.check(action, &id_text, result)?;

        log::info!("✓ pm2 {} {} succeeded", action, id_text);
        log::debug!("pm2 {} {} stdout: {}", action, id_text, output.stdout.trim_end());
        self.revalidator.revalidate("/");

        Ok(ControlResult::success(format!(
            "Process {} {} successfully",
            id_text,
            action.past_tense()
        )))
    }

    /// 经 ssh 在远程主机上重启进程
    ///
    /// 远端会把命令再交给 shell 解析，所以远程命令的每个词都单独加单引号。
    pub async fn restart_remote(
        &self,
        host: &str,
        id: &ProcessId,
        key_path: Option<&Path>,
    ) -> Result<ControlResult> {
        let id_text = id.to_arg()?;
        let host = host.trim();
        if !REMOTE_HOST.is_match(host) {
            return Err(BridgeError::InvalidHost(host.to_string()));
        }

        let remote_command = [self.remote_pm2.as_str(), "restart", id_text.as_str()]
            .iter()
            .map(|word| shell_quote(word))
            .collect::<Vec<_>>()
            .join(" ");

        let mut args = vec!["-o".to_string(), "BatchMode=yes".to_string()];
        if let Some(key) = key_path.filter(|k| !k.as_os_str().is_empty()) {
            args.push("-i".to_string());
            args.push(key.to_string_lossy().into_owned());
        }
        args.push("--".to_string());
        args.push(host.to_string());
        args.push(remote_command);

        let result = self.ssh.run(&args).await;
        let output = self.check(ControlAction::Restart, &id_text, result)?;

        log::info!("✓ pm2 restart {} succeeded on {}", id_text, host);
        self.revalidator.revalidate("/");

        Ok(ControlResult {
            ok: true,
            message: format!("Process {} restarted on {}", id_text, host),
            output: Some(output.stdout),
        })
    }

    fn check(
        &self,
        action: ControlAction,
        id_text: &str,
        result: std::result::Result<CommandOutput, RunError>,
    ) -> Result<CommandOutput> {
        let failure = match result {
            Ok(output) if output.success() => {
                METRICS
                    .control_commands
                    .with_label_values(&[action.as_str(), "success"])
                    .inc();
                return Ok(output);
            }
            Ok(output) => {
                log::error!(
                    "pm2 {} {} failed: {}\nstdout: {}\nstderr: {}",
                    action,
                    id_text,
                    output.exit_info(),
                    output.stdout.trim_end(),
                    output.stderr.trim_end()
                );
                output.status.to_string()
            }
            Err(e) => {
                log::error!("pm2 {} {} failed: {}", action, id_text, e);
                e.to_string()
            }
        };

        METRICS
            .control_commands
            .with_label_values(&[action.as_str(), "failure"])
            .inc();
        Err(BridgeError::ControlCommandFailed {
            process_id: id_text.to_string(),
            exit_info: failure,
        })
    }
}

fn shell_quote(word: &str) -> String {
    format!("'{}'", word.replace('\'', r"'\''"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingRevalidator {
        paths: Mutex<Vec<String>>,
    }

    impl Revalidate for RecordingRevalidator {
        fn revalidate(&self, path: &str) {
            self.paths.lock().unwrap().push(path.to_string());
        }
    }

    fn sh(script: &str) -> CommandRunner {
        CommandRunner::new("sh", Duration::from_secs(5)).with_base_args(["-c", script, "cmd"])
    }

    fn executor(pm2: &str, ssh: &str) -> (ControlExecutor, Arc<RecordingRevalidator>) {
        let revalidator = Arc::new(RecordingRevalidator::default());
        let executor = ControlExecutor::new(sh(pm2), sh(ssh), "pm2", revalidator.clone());
        (executor, revalidator)
    }

    #[tokio::test]
    async fn test_restart_success_triggers_revalidate() {
        let (executor, revalidator) =
            executor(r#"[ "$1" = restart ] && [ "$2" = 8 ] && echo "[PM2] Applying action""#, "");
        let result = executor.restart(&ProcessId::parse("8").unwrap()).await.unwrap();
        assert!(result.ok);
        assert!(result.message.contains("restarted"));
        assert_eq!(*revalidator.paths.lock().unwrap(), vec!["/".to_string()]);
    }

    #[tokio::test]
    async fn test_start_and_stop_use_matching_subcommands() {
        let (executor, _) = executor(r#"[ "$1" = start ] || [ "$1" = stop ]"#, "");
        let id = ProcessId::Name("api".into());
        assert!(executor.start(&id).await.unwrap().message.contains("started"));
        assert!(executor.stop(&id).await.unwrap().message.contains("stopped"));
        assert!(executor.restart(&id).await.is_err());
    }

    #[tokio::test]
    async fn test_nonzero_exit_fails_regardless_of_stdout() {
        let (executor, revalidator) = executor("echo 'success'; exit 1", "");
        let err = executor.restart(&ProcessId::Index(8)).await.unwrap_err();
        match err {
            BridgeError::ControlCommandFailed { process_id, .. } => assert_eq!(process_id, "8"),
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(revalidator.paths.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_id_never_invokes_command() {
        // 脚本一旦被执行会以 99 退出，校验失败时不应走到这一步
        let (executor, _) = executor("exit 99", "exit 99");
        let err = executor
            .restart(&ProcessId::Name("   ".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::InvalidProcessId(_)));

        let err = executor
            .restart_remote("host", &ProcessId::Name("--force".into()), None)
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::InvalidProcessId(_)));
    }

    #[tokio::test]
    async fn test_remote_argv_is_quoted() {
        // 把 ssh 收到的参数逐个打印出来
        let (executor, _) = executor("", r#"for a in "$@"; do printf '<%s>' "$a"; done"#);
        let result = executor
            .restart_remote(
                "deploy@web-1.example.com",
                &ProcessId::Name("it's".into()),
                Some(Path::new("/keys/id_ed25519")),
            )
            .await
            .unwrap();

        assert_eq!(result.message, "Process it's restarted on deploy@web-1.example.com");
        assert_eq!(
            result.output.unwrap(),
            "<-o><BatchMode=yes><-i></keys/id_ed25519><--><deploy@web-1.example.com>\
             <'pm2' 'restart' 'it'\\''s'>"
        );
    }

    #[tokio::test]
    async fn test_remote_without_key_omits_flag() {
        let (executor, _) = executor("", r#"for a in "$@"; do printf '<%s>' "$a"; done"#);
        let result = executor
            .restart_remote("web-1", &ProcessId::Index(3), None)
            .await
            .unwrap();
        assert_eq!(
            result.output.unwrap(),
            "<-o><BatchMode=yes><--><web-1><'pm2' 'restart' '3'>"
        );
    }

    #[tokio::test]
    async fn test_remote_rejects_hostile_hosts() {
        let (executor, _) = executor("", "exit 0");
        for host in ["-oProxyCommand=touch /tmp/x", "web;reboot", "a b", "", "$(id)"] {
            let err = executor
                .restart_remote(host, &ProcessId::Index(1), None)
                .await
                .unwrap_err();
            assert!(matches!(err, BridgeError::InvalidHost(_)), "accepted {:?}", host);
        }
    }

    #[tokio::test]
    async fn test_remote_failure() {
        let (executor, _) = executor("", "echo 'Permission denied' >&2; exit 255");
        let err = executor
            .restart_remote("web-1", &ProcessId::Index(3), None)
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::ControlCommandFailed { .. }));
    }

    #[test]
    fn test_action_parsing() {
        assert_eq!("restart".parse::<ControlAction>(), Ok(ControlAction::Restart));
        assert!("delete".parse::<ControlAction>().is_err());
    }
}
