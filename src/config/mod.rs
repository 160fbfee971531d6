use std::{
    collections::HashMap,
    env,
    fs,
    io::{BufRead, BufReader},
    path::PathBuf,
    time::Duration,
};

use directories::BaseDirs;

#[derive(Debug, Clone)]
pub struct Config {
    inner: HashMap<String, String>,
    pub config_path: PathBuf,
}

impl Config {
    pub fn load() -> Self {
        let config_path = default_config_path();
        let mut config = Self { inner: default_map(), config_path };

        // Read .palrc if exists
        if let Ok(file) = fs::File::open(&config.config_path) {
            let reader = BufReader::new(file);
            config.merge_lines(reader.lines().map_while(Result::ok));
        }

        // Overlay environment variables (take precedence)
        for (k, v) in env::vars() {
            if is_config_key(&k) {
                config.inner.insert(k, v);
            }
        }

        config
    }

    /// Defaults only; no file or environment.
    pub fn defaults() -> Self {
        Self { inner: default_map(), config_path: default_config_path() }
    }

    /// Apply `KEY=VALUE` lines; blank lines and `#` comments are skipped.
    pub fn merge_lines<I, S>(&mut self, lines: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for line in lines {
            let line = line.as_ref().trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some((k, v)) = line.split_once('=') {
                self.inner.insert(k.trim().to_string(), v.trim().to_string());
            }
        }
    }

    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        self.inner.insert(key.to_string(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.inner.get(key).cloned()
    }

    pub fn get_bool(&self, key: &str) -> bool {
        self.get(key)
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false)
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.get(key).and_then(|v| v.trim().parse::<u64>().ok())
    }

    pub fn get_path(&self, key: &str) -> Option<PathBuf> {
        self.get(key).map(PathBuf::from)
    }

    pub fn default_model(&self) -> String {
        self.get("DEFAULT_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.get_u64("REQUEST_TIMEOUT").unwrap_or(60))
    }

    pub fn execution_timeout(&self) -> Duration {
        Duration::from_secs(self.get_u64("EXECUTION_TIMEOUT").unwrap_or(10))
    }

    pub fn dataset_path(&self) -> PathBuf {
        self.get_path("DATASET_PATH").unwrap_or_else(|| PathBuf::from("datasets"))
    }

    pub fn results_path(&self) -> PathBuf {
        self.get_path("RESULTS_PATH").unwrap_or_else(|| PathBuf::from("results"))
    }

    pub fn log_level(&self) -> String {
        self.get("LOG_LEVEL").unwrap_or_else(|| "info".to_string())
    }
}

const DEFAULT_MODEL: &str = "llama-3.1-70b-versatile";

fn is_config_key(k: &str) -> bool {
    // Accept known keys or PAL_*/OPENAI_* for forward-compat
    const KEYS: &[&str] = &[
        "OPENAI_API_KEY",
        "API_BASE_URL",
        "REQUEST_TIMEOUT",
        "DEFAULT_MODEL",
        "EXECUTION_TIMEOUT",
        "DATASET_PATH",
        "RESULTS_PATH",
        "PRETTIFY_MARKDOWN",
        "LOG_LEVEL",
    ];

    KEYS.contains(&k) || k.starts_with("PAL_") || k.starts_with("OPENAI_")
}

fn default_config_path() -> PathBuf {
    let base = BaseDirs::new()
        .map(|b| b.config_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("~/.config"));
    base.join("pal").join(".palrc")
}

fn default_map() -> HashMap<String, String> {
    let mut m = HashMap::new();

    // Paths
    m.insert("DATASET_PATH".into(), "datasets".into());
    m.insert("RESULTS_PATH".into(), "results".into());

    // Numbers
    m.insert("REQUEST_TIMEOUT".into(), "60".into());
    m.insert("EXECUTION_TIMEOUT".into(), "10".into());

    // Strings
    m.insert("DEFAULT_MODEL".into(), DEFAULT_MODEL.into());
    m.insert("API_BASE_URL".into(), "default".into());
    m.insert("LOG_LEVEL".into(), "info".into());

    // Bools as strings
    m.insert("PRETTIFY_MARKDOWN".into(), "false".into());

    m
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_every_key() {
        let cfg = Config::defaults();
        assert_eq!(cfg.default_model(), "llama-3.1-70b-versatile");
        assert_eq!(cfg.execution_timeout(), Duration::from_secs(10));
        assert_eq!(cfg.request_timeout(), Duration::from_secs(60));
        assert_eq!(cfg.dataset_path(), PathBuf::from("datasets"));
        assert!(!cfg.get_bool("PRETTIFY_MARKDOWN"));
    }

    #[test]
    fn rc_lines_override_defaults() {
        let mut cfg = Config::defaults();
        cfg.merge_lines(["# comment", "", "EXECUTION_TIMEOUT = 3", "DEFAULT_MODEL=gpt-4o-mini"]);
        assert_eq!(cfg.execution_timeout(), Duration::from_secs(3));
        assert_eq!(cfg.default_model(), "gpt-4o-mini");
    }

    #[test]
    fn recognised_environment_keys() {
        assert!(is_config_key("OPENAI_ORG"));
        assert!(is_config_key("PAL_ANYTHING"));
        assert!(is_config_key("LOG_LEVEL"));
        assert!(!is_config_key("HOME"));
    }
}
