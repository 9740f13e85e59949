/// Config file read when no path is given on the command line
pub const DEFAULT_CONFIG_PATH: &str = "config/node.toml";

/// Directory for rolling log files
pub const LOG_DIR: &str = "./logs";

/// Prefix of environment overrides, e.g. `MM_IPC__SOCKET_PATH`
pub const ENV_PREFIX: &str = "MM_IPC";

/// Separator between prefix and key in environment overrides
pub const ENV_SEPARATOR: &str = "__";

/// Operation name of the liveness message spokes send to the hub
pub const HEARTBEAT_OP: &str = "heartbeat";

/// Default heartbeat interval in milliseconds
pub const HEARTBEAT_INTERVAL_MS: u64 = 1_000;

/// How often the main loop checks the shutdown flag
pub const SHUTDOWN_POLL_INTERVAL_MS: u64 = 100;
