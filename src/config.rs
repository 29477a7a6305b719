use std::env;
use std::path::PathBuf;

const DATA_DIR_VAR: &str = "BITPERFECT_DATA_DIR";
const DOWNLOAD_DIR_VAR: &str = "BITPERFECT_DOWNLOAD_DIR";
const API_INSTANCES_VAR: &str = "BITPERFECT_API_INSTANCES";
const USER_AGENT_VAR: &str = "BITPERFECT_USER_AGENT";

const APP_DIR_NAME: &str = "bitperfect";
const DEFAULT_USER_AGENT: &str = concat!("BitPerfect/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    /// Directory holding `library.sqlite3`.
    pub data_dir: Option<PathBuf>,
    /// Where finished downloads are written. `None` disables downloads.
    pub download_dir: Option<PathBuf>,
    pub api_instances: Vec<String>,
    pub user_agent: String,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let value = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        let data_dir = value(DATA_DIR_VAR)
            .map(PathBuf::from)
            .or_else(|| dirs::data_dir().map(|dir| dir.join(APP_DIR_NAME)));
        let download_dir = value(DOWNLOAD_DIR_VAR)
            .map(PathBuf::from)
            .or_else(dirs::download_dir);
        let api_instances = value(API_INSTANCES_VAR)
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|instance| !instance.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        let user_agent = value(USER_AGENT_VAR).unwrap_or_else(|| DEFAULT_USER_AGENT.to_string());

        Self {
            data_dir,
            download_dir,
            api_instances,
            user_agent,
        }
    }

    pub fn database_path(&self) -> Option<PathBuf> {
        self.data_dir
            .as_ref()
            .map(|dir| dir.join("library.sqlite3"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> AppConfig {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        AppConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn explicit_values_win() {
        let config = config_from(&[
            (DATA_DIR_VAR, "/tmp/bp-data"),
            (DOWNLOAD_DIR_VAR, "/tmp/bp-downloads"),
            (API_INSTANCES_VAR, " https://a.example , ,https://b.example"),
            (USER_AGENT_VAR, "Tester/1.0"),
        ]);

        assert_eq!(config.data_dir, Some(PathBuf::from("/tmp/bp-data")));
        assert_eq!(
            config.database_path(),
            Some(PathBuf::from("/tmp/bp-data/library.sqlite3"))
        );
        assert_eq!(config.download_dir, Some(PathBuf::from("/tmp/bp-downloads")));
        assert_eq!(config.api_instances, ["https://a.example", "https://b.example"]);
        assert_eq!(config.user_agent, "Tester/1.0");
    }

    #[test]
    fn blank_values_fall_back_to_defaults() {
        let config = config_from(&[(API_INSTANCES_VAR, "  "), (USER_AGENT_VAR, "")]);

        assert!(config.api_instances.is_empty());
        assert!(config.user_agent.starts_with("BitPerfect/"));
    }
}
