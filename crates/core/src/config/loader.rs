use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use std::path::Path;

use super::{types::Config, ConfigError};

/// Environment prefix; sections are separated by a double underscore,
/// e.g. `CERTDESK_ACME__TOOL_PATH`.
const ENV_PREFIX: &str = "CERTDESK_";

fn base() -> Figment {
    Figment::from(Serialized::defaults(Config::default()))
}

/// Load configuration from file with environment variable overrides
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::FileNotFound(path.display().to_string()));
    }

    base()
        .merge(Toml::file(path))
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
        .extract()
        .map_err(|e| ConfigError::ParseError(e.to_string()))
}

/// Load configuration from defaults and environment variables only
pub fn load_config_from_env() -> Result<Config, ConfigError> {
    base()
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
        .extract()
        .map_err(|e| ConfigError::ParseError(e.to_string()))
}

/// Load configuration from TOML string (useful for testing)
pub fn load_config_from_str(toml_str: &str) -> Result<Config, ConfigError> {
    toml::from_str(toml_str).map_err(|e| ConfigError::ParseError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_config_from_str_valid() {
        let toml = r#"
[acme]
tool_path = "/opt/acme/acme.sh"
server = "zerossl"

[export]
root = "/var/www/ssl"
"#;
        let config = load_config_from_str(toml).unwrap();
        assert_eq!(config.acme.server, "zerossl");
        assert_eq!(config.export.root.to_str(), Some("/var/www/ssl"));
    }

    #[test]
    fn test_load_config_from_str_bad_type() {
        let toml = r#"
[lifecycle]
retry_limit = "many"
"#;
        let result = load_config_from_str(toml);
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_load_config_file_not_found() {
        let result = load_config(Path::new("/nonexistent/certdesk.toml"));
        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }

    #[test]
    fn test_load_config_from_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(
            temp_file,
            r#"
[database]
path = "/tmp/orders.db"

[sweep]
max_concurrency = 4
"#
        )
        .unwrap();

        let config = load_config(temp_file.path()).unwrap();
        assert_eq!(config.sweep.max_concurrency, 4);
        assert_eq!(config.database.path.to_str(), Some("/tmp/orders.db"));
        // untouched sections keep their defaults
        assert_eq!(config.acme.timeout_secs, 180);
    }

    #[test]
    fn test_env_overrides_file() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "certdesk.toml",
                r#"
[acme]
server = "letsencrypt"
"#,
            )?;
            jail.set_env("CERTDESK_ACME__SERVER", "buypass");
            jail.set_env("CERTDESK_LIFECYCLE__RETRY_LIMIT", "7");

            let config = load_config(Path::new("certdesk.toml")).expect("config loads");
            assert_eq!(config.acme.server, "buypass");
            assert_eq!(config.lifecycle.retry_limit, 7);
            Ok(())
        });
    }
}
