use std::ffi::OsString;
use std::io;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::process::{Child, Command};

/// 外部命令的调用方式：可执行文件 + 固定前置参数 + 超时
///
/// 参数总是以参数向量传递，从不拼接成 shell 字符串。
#[derive(Debug, Clone)]
pub struct CommandRunner {
    program: OsString,
    base_args: Vec<OsString>,
    timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status.success()
    }

    /// 退出状态 + stderr 第一行非空内容，用于日志和错误详情
    pub fn exit_info(&self) -> String {
        match self.stderr.lines().map(str::trim).find(|l| !l.is_empty()) {
            Some(line) => format!("{} ({})", self.status, line),
            None => self.status.to_string(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("'{program}' timed out after {}s", timeout.as_secs())]
    Timeout { program: String, timeout: Duration },
}

impl CommandRunner {
    pub fn new(program: impl Into<OsString>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            base_args: Vec::new(),
            timeout,
        }
    }

    /// 追加固定前置参数，例如 `npx pm2` 或测试里的 `sh -c <script> pm2`
    pub fn with_base_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.base_args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn program(&self) -> String {
        self.program.to_string_lossy().into_owned()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn command(&self, args: &[String]) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.base_args)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    /// 运行短命令并收集输出；超时后子进程随 future 一起被 kill
    pub async fn run(&self, args: &[String]) -> Result<CommandOutput, RunError> {
        let mut cmd = self.command(args);
        log::debug!("Running {} {:?}", self.program(), args);

        let output = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(source)) => {
                return Err(RunError::Spawn {
                    program: self.program(),
                    source,
                })
            }
            Err(_) => {
                return Err(RunError::Timeout {
                    program: self.program(),
                    timeout: self.timeout,
                })
            }
        };

        Ok(CommandOutput {
            status: output.status,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    /// 启动长驻子进程（stdout/stderr 管道），调用方负责回收
    pub fn follow(&self, args: &[String]) -> io::Result<Child> {
        log::debug!("Following {} {:?}", self.program(), args);
        self.command(args).spawn()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> CommandRunner {
        CommandRunner::new("sh", Duration::from_secs(5)).with_base_args(["-c", script, "pm2"])
    }

    #[tokio::test]
    async fn test_run_captures_both_streams() {
        let runner = sh("echo \"out $1\"; echo \"err $2\" >&2");
        let output = runner
            .run(&["first".to_string(), "second".to_string()])
            .await
            .unwrap();
        assert!(output.success());
        assert_eq!(output.stdout, "out first\n");
        assert_eq!(output.stderr, "err second\n");
    }

    #[tokio::test]
    async fn test_arguments_are_not_shell_interpreted() {
        let runner = sh("printf '%s' \"$1\"");
        let output = runner.run(&["8; rm -rf /".to_string()]).await.unwrap();
        assert_eq!(output.stdout, "8; rm -rf /");
    }

    #[tokio::test]
    async fn test_exit_info_includes_stderr() {
        let runner = sh("echo 'process not found' >&2; exit 1");
        let output = runner.run(&[]).await.unwrap();
        assert!(!output.success());
        assert!(output.exit_info().contains("process not found"));
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_error() {
        let runner = CommandRunner::new("/nonexistent/pm2", Duration::from_secs(1));
        let err = runner.run(&["jlist".to_string()]).await.unwrap_err();
        assert!(matches!(err, RunError::Spawn { .. }));
    }

    #[tokio::test]
    async fn test_timeout() {
        let runner =
            CommandRunner::new("sh", Duration::from_millis(200)).with_base_args(["-c", "sleep 5"]);
        let err = runner.run(&[]).await.unwrap_err();
        assert!(matches!(err, RunError::Timeout { .. }));
    }
}
