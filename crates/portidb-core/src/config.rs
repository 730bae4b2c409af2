use serde::Deserialize;

/// Largest integer representable without loss in a double.
pub const MAX_SAFE_INTEGER: i64 = 9_007_199_254_740_991;

///
/// Config
///
/// Engine tunables. Every field has a default, so an empty document (or
/// `Config::default()`) is a valid configuration.
///

#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Largest version `open` accepts.
    pub max_version: u64,

    /// First correlation id handed out by the RPC client.
    pub first_request_id: i64,

    /// Ask the remote for the largest numeric key before the first key is
    /// generated for an auto-increment store.
    pub prime_key_generators: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_version: MAX_SAFE_INTEGER.unsigned_abs(),
            first_request_id: -MAX_SAFE_INTEGER,
            prime_key_generators: true,
        }
    }
}

///
/// TESTS
///

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config: Config = serde_json::from_str("{}").unwrap();

        assert_eq!(config, Config::default());
        assert_eq!(config.max_version, 9_007_199_254_740_991);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let err = serde_json::from_str::<Config>(r#"{"max_versions": 3}"#).unwrap_err();

        assert!(err.to_string().contains("unknown field"));
    }
}
