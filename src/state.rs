use crate::cli::CommandArgs;
use crate::services::{
    BrokerRevalidator, CommandRunner, ControlExecutor, InventoryCollector, LocalBroker,
    LogBridge, LogTailFetcher,
};
use std::sync::Arc;
use std::time::Duration;

pub struct AppStateInner {
    pub inventory: InventoryCollector,
    pub control: ControlExecutor,
    pub log_tail: LogTailFetcher,
    pub bridge: LogBridge,
    pub broker: Arc<LocalBroker>,
    pub default_log_lines: usize,
}

pub type AppState = Arc<AppStateInner>;

pub fn new_state(args: &CommandArgs) -> AppState {
    let timeout = Duration::from_secs(args.command_timeout.max(1));
    let supervisor = CommandRunner::new(&args.pm2_bin, timeout).with_base_args(&args.pm2_args);
    let ssh = CommandRunner::new(&args.ssh_bin, timeout);

    state_with_runners(args, supervisor, ssh)
}

/// 用给定的 pm2/ssh 调用方式组装状态（测试里替换成脚本）
pub fn state_with_runners(
    args: &CommandArgs,
    supervisor: CommandRunner,
    ssh: CommandRunner,
) -> AppState {
    let broker = Arc::new(LocalBroker::new(args.channel_capacity));
    let revalidator = Arc::new(BrokerRevalidator::new(broker.clone()));

    Arc::new(AppStateInner {
        inventory: InventoryCollector::new(supervisor.clone()),
        control: ControlExecutor::new(supervisor.clone(), ssh, &args.remote_pm2_bin, revalidator),
        log_tail: LogTailFetcher::new(supervisor.clone()),
        bridge: LogBridge::new(supervisor, broker.clone(), args.stream_buffer),
        broker,
        default_log_lines: args.default_log_lines,
    })
}
