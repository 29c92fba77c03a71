pub(crate) const DATA_DIR_ENV: &str = "CPROXY_DATA_DIR";

/// CLI value, then `CPROXY_DATA_DIR`. `None` leaves the choice to the config file.
pub(crate) fn resolve_data_dir(cli_value: &str) -> Option<String> {
    pick_data_dir(cli_value, std::env::var(DATA_DIR_ENV).ok())
}

fn pick_data_dir(cli_value: &str, env_value: Option<String>) -> Option<String> {
    if !cli_value.trim().is_empty() {
        return Some(cli_value.to_string());
    }
    env_value.filter(|value| !value.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_beats_env() {
        assert_eq!(
            pick_data_dir("/cli", Some("/env".to_string())).as_deref(),
            Some("/cli")
        );
    }

    #[test]
    fn blank_values_are_ignored() {
        assert_eq!(
            pick_data_dir(" ", Some("/env".to_string())).as_deref(),
            Some("/env")
        );
        assert_eq!(pick_data_dir("", Some("  ".to_string())), None);
        assert_eq!(pick_data_dir("", None), None);
    }
}
