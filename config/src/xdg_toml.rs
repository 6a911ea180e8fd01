//! Load the `[runtime]` table from `$XDG_CONFIG_HOME/<app>/config.toml`.

use std::path::PathBuf;

use crate::{LoadError, RuntimeConfigFile};

fn xdg_config_path(app_name: &str) -> Result<Option<PathBuf>, LoadError> {
    let config_dir = dirs::config_dir().ok_or_else(|| {
        LoadError::XdgPath("could not determine XDG config directory".to_string())
    })?;
    let path = config_dir.join(app_name).join("config.toml");
    if path.exists() {
        Ok(Some(path))
    } else {
        Ok(None)
    }
}

/// Returns the `[runtime]` table, or defaults if the file or table is absent.
pub fn load_runtime_file(app_name: &str) -> Result<RuntimeConfigFile, LoadError> {
    let path = match xdg_config_path(app_name)? {
        Some(p) => p,
        None => return Ok(RuntimeConfigFile::default()),
    };
    let content = std::fs::read_to_string(&path).map_err(LoadError::XdgRead)?;
    let file: TopLevel = toml::from_str(&content)?;
    Ok(file.runtime)
}

#[derive(serde::Deserialize, Default)]
struct TopLevel {
    #[serde(default)]
    runtime: RuntimeConfigFile,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    #[test]
    fn missing_config_returns_defaults() {
        let file = load_runtime_file("config-crate-test-nonexistent-12345").unwrap();
        assert_eq!(file, RuntimeConfigFile::default());
    }

    #[test]
    fn load_runtime_file_reads_toml() {
        let dir = tempfile::tempdir().unwrap();
        let app_dir = dir.path().join("testapp");
        std::fs::create_dir_all(&app_dir).unwrap();
        std::fs::write(
            app_dir.join("config.toml"),
            r#"
[runtime]
store_backend = "sqlite"
store_path = "/tmp/shuttle.db"
event_queue_capacity = 128
retry_max_attempts = 3
"#,
        )
        .unwrap();

        let prev = env::var("XDG_CONFIG_HOME").ok();
        env::set_var("XDG_CONFIG_HOME", dir.path());
        let result = load_runtime_file("testapp");
        match prev {
            Some(p) => env::set_var("XDG_CONFIG_HOME", p),
            None => env::remove_var("XDG_CONFIG_HOME"),
        }

        let file = result.unwrap();
        assert_eq!(file.store_backend.as_deref(), Some("sqlite"));
        assert_eq!(file.event_queue_capacity, Some(128));
        assert_eq!(file.retry_max_attempts, Some(3));
    }

    #[test]
    fn invalid_toml_returns_xdg_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let app_dir = dir.path().join("badapp");
        std::fs::create_dir_all(&app_dir).unwrap();
        std::fs::write(app_dir.join("config.toml"), "not valid toml [[[\n").unwrap();

        let prev = env::var("XDG_CONFIG_HOME").ok();
        env::set_var("XDG_CONFIG_HOME", dir.path());
        let result = load_runtime_file("badapp");
        match prev {
            Some(p) => env::set_var("XDG_CONFIG_HOME", p),
            None => env::remove_var("XDG_CONFIG_HOME"),
        }

        assert!(matches!(result, Err(LoadError::XdgParse(_))));
    }
}
