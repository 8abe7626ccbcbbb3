use dashmap::DashMap;
use std::env;
use std::str::FromStr;
use std::sync::Arc;

/// Key read by [`ApplicationBuilder`](crate::lifecycle::ApplicationBuilder)
/// for the per-hook timeout, in milliseconds.
pub const HOOK_TIMEOUT_KEY: &str = "MODLOOM_HOOK_TIMEOUT_MS";

/// Key/value configuration shared through the root scope.
#[derive(Clone, Default, Debug)]
pub struct ConfigService {
    config: Arc<DashMap<String, String>>,
}

impl ConfigService {
    /// An empty configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// A configuration seeded with the process environment.
    pub fn from_env() -> Self {
        let service = Self::default();
        for (key, value) in env::vars() {
            service.set(&key, &value);
        }
        service
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.config.get(key).map(|v| v.clone())
    }

    /// Parse the value under `key`. Unparsable values are logged and ignored.
    pub fn get_parsed<T: FromStr>(&self, key: &str) -> Option<T>
    where
        T::Err: std::fmt::Display,
    {
        let raw = self.get(key)?;
        match raw.parse() {
            Ok(value) => Some(value),
            Err(err) => {
                tracing::warn!(key, value = %raw, error = %err, "Ignoring unparsable config value");
                None
            }
        }
    }

    pub fn set(&self, key: &str, value: &str) {
        self.config.insert(key.to_string(), value.to_string());
    }

    pub fn with(self, key: &str, value: &str) -> Self {
        self.set(key, value);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parsed_values() {
        let config = ConfigService::new()
            .with(HOOK_TIMEOUT_KEY, "250")
            .with("PORT", "not-a-port");
        assert_eq!(config.get_parsed::<u64>(HOOK_TIMEOUT_KEY), Some(250));
        assert_eq!(config.get_parsed::<u16>("PORT"), None);
        assert_eq!(config.get_parsed::<u16>("MISSING"), None);
    }

    #[test]
    fn clones_share_state() {
        let config = ConfigService::new();
        let other = config.clone();
        other.set("region", "eu");
        assert_eq!(config.get("region").as_deref(), Some("eu"));
    }
}
