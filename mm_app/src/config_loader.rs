use std::path::Path;

use config::Config;
use config::ConfigError;
use config::Environment;
use config::File;
use mm_ipc::HubConfig;
use mm_ipc::RoleConfig;

use crate::ipc_config;

/// Loads the node's role config from a file, with `MM_IPC__*` environment overrides
pub fn load_role_config<P: AsRef<Path>>(path: P) -> Result<RoleConfig, ConfigError> {
    let config = Config::builder()
        .add_source(File::from(path.as_ref()))
        .add_source(
            Environment::with_prefix(ipc_config::ENV_PREFIX)
                .prefix_separator(ipc_config::ENV_SEPARATOR)
                .separator(ipc_config::ENV_SEPARATOR)
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("markets")
                .with_list_parse_key("indexes"),
        )
        .build()?;

    config.try_deserialize()
}

/// Load role config with fallback to a hub on the default socket
pub fn load_role_config_or_default(path: &str) -> RoleConfig {
    match load_role_config(path) {
        Ok(config) => {
            tracing::info!("Loaded node config from {path}");
            config
        }
        Err(err) => {
            tracing::warn!("Failed to load node config from {}: {}. Using defaults.", path, err);
            RoleConfig::Hub(HubConfig::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use mm_ipc::DEFAULT_SOCKET_PATH;

    use super::*;

    fn write_config(contents: &str) -> tempfile::TempDir {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("node.toml"), contents).unwrap();
        dir
    }

    #[test]
    fn test_load_spoke_config() {
        let dir = write_config(
            r#"
            role = "spoke"
            socket_path = "/tmp/test_hub.sock"
            markets = ["BTC-USD", "ETH-USD"]
            indexes = ["BTCIDX"]
            reconnect_delay_ms = 2500
            "#,
        );

        match load_role_config(dir.path().join("node.toml")).unwrap() {
            RoleConfig::Spoke(spoke) => {
                assert_eq!(spoke.socket_path, PathBuf::from("/tmp/test_hub.sock"));
                assert_eq!(spoke.markets, vec!["BTC-USD".to_string(), "ETH-USD".to_string()]);
                assert_eq!(spoke.indexes, vec!["BTCIDX".to_string()]);
                assert_eq!(spoke.reconnect_delay_ms, 2500);
            }
            other => panic!("Expected spoke config, got {other:?}"),
        }
    }

    #[test]
    fn test_load_hub_config_with_defaults() {
        let dir = write_config("role = \"hub\"\n");

        match load_role_config(dir.path().join("node.toml")).unwrap() {
            RoleConfig::Hub(hub) => assert_eq!(hub.socket_path, PathBuf::from(DEFAULT_SOCKET_PATH)),
            other => panic!("Expected hub config, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_file_falls_back_to_hub() {
        let config = load_role_config_or_default("/nonexistent/node.toml");
        assert_eq!(config, RoleConfig::Hub(HubConfig::default()));
    }
}
