pub mod broker;
pub mod command_runner;
pub mod control;
pub mod inventory;
pub mod log_bridge;
pub mod log_tail;
pub mod output_parser;
pub mod session_registry;

pub use broker::{BrokerRevalidator, LocalBroker, Publisher};
pub use command_runner::CommandRunner;
pub use control::{ControlAction, ControlExecutor};
pub use inventory::InventoryCollector;
pub use log_bridge::LogBridge;
pub use log_tail::LogTailFetcher;
