use clap::Parser;

/// pm2 bridge - pm2 进程清单、控制与实时日志桥接服务
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct CommandArgs {
    /// 监听端口
    #[arg(short, long, env = "PORT", default_value_t = 9999)]
    pub port: u16,

    /// 监听地址
    #[arg(short = 'a', long, env = "ADDRESS", default_value = "0.0.0.0")]
    pub address: String,

    /// pm2 可执行文件
    #[arg(long, env = "PM2_BIN", default_value = "pm2")]
    pub pm2_bin: String,

    /// 传给 pm2 可执行文件的前置参数（例如 --pm2-bin npx --pm2-arg pm2）
    #[arg(long = "pm2-arg", env = "PM2_ARGS", value_delimiter = ' ', allow_hyphen_values = true)]
    pub pm2_args: Vec<String>,

    /// ssh 可执行文件，用于远程重启
    #[arg(long, env = "SSH_BIN", default_value = "ssh")]
    pub ssh_bin: String,

    /// 远程主机上的 pm2 可执行文件
    #[arg(long, env = "REMOTE_PM2_BIN", default_value = "pm2")]
    pub remote_pm2_bin: String,

    /// 短命令（jlist/控制/日志快照）超时，单位秒
    #[arg(long = "command-timeout", env = "COMMAND_TIMEOUT_SECS", default_value_t = 30)]
    pub command_timeout: u64,

    /// tail 子进程输出到发布之间的队列容量
    #[arg(long, env = "STREAM_BUFFER", default_value_t = 256)]
    pub stream_buffer: usize,

    /// 进程内 broker 每个频道的缓冲条数
    #[arg(long, env = "CHANNEL_CAPACITY", default_value_t = 1024)]
    pub channel_capacity: usize,

    /// 日志快照默认行数
    #[arg(long, env = "DEFAULT_LOG_LINES", default_value_t = 100)]
    pub default_log_lines: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = CommandArgs::parse_from(["pm2-bridge"]);
        assert_eq!(args.port, 9999);
        assert_eq!(args.pm2_bin, "pm2");
        assert!(args.pm2_args.is_empty());
        assert_eq!(args.command_timeout, 30);
        assert_eq!(args.default_log_lines, 100);
    }

    #[test]
    fn test_pm2_wrapper_args() {
        let args = CommandArgs::parse_from([
            "pm2-bridge",
            "--pm2-bin",
            "npx",
            "--pm2-arg",
            "pm2",
            "--pm2-arg",
            "--silent",
        ]);
        assert_eq!(args.pm2_bin, "npx");
        assert_eq!(args.pm2_args, vec!["pm2", "--silent"]);
    }
}
