/// Parses the config file path from command-line arguments
pub fn get_config_path(default: &str) -> String {
    config_path_from(std::env::args(), default)
}

fn config_path_from<I: IntoIterator<Item = String>>(args: I, default: &str) -> String {
    args.into_iter().nth(1).filter(|arg| !arg.is_empty()).unwrap_or_else(|| default.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_path_argument() {
        let args = vec!["mm_node".to_string(), "spoke.toml".to_string()];
        assert_eq!(config_path_from(args, "node.toml"), "spoke.toml");
    }

    #[test]
    fn test_config_path_default() {
        assert_eq!(config_path_from(vec!["mm_node".to_string()], "node.toml"), "node.toml");
    }
}
