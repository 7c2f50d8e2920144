// driftsync Infrastructure - System Adapters
// Implements: ProcessRunner, ReachabilityProbe

pub mod process_runner;
pub mod ssh_probe;
pub mod tcp_probe;
pub mod tool_locator;

pub use process_runner::TokioProcessRunner;
pub use ssh_probe::SshReachabilityProbe;
pub use tcp_probe::TcpReachabilityProbe;
pub use tool_locator::{find_program, missing_tools, MissingTool};
