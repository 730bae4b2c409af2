use serde::Deserialize;

///
/// HostConfig
///
/// Tunables for the in-memory host. Every field has a default.
///

#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct HostConfig {
    /// Prefix every database name with `"{namespace}:"` (one namespace per
    /// hosted document). Names reported back to the engine are unprefixed.
    pub namespace: Option<String>,
}

impl HostConfig {
    #[must_use]
    pub fn namespaced(namespace: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
        }
    }

    /// The name a database is stored under.
    pub(crate) fn qualify(&self, name: &str) -> String {
        match &self.namespace {
            Some(ns) => format!("{ns}:{name}"),
            None => name.to_string(),
        }
    }

    /// The name reported for a stored database, or `None` when it belongs to
    /// another namespace.
    pub(crate) fn unqualify<'a>(&self, stored: &'a str) -> Option<&'a str> {
        match &self.namespace {
            Some(ns) => stored.strip_prefix(ns.as_str())?.strip_prefix(':'),
            None => Some(stored),
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
    fn namespace_is_added_and_stripped() {
        let config = HostConfig::namespaced("docA");

        assert_eq!(config.qualify("notes"), "docA:notes");
        assert_eq!(config.unqualify("docA:notes"), Some("notes"));
        assert_eq!(config.unqualify("docB:notes"), None);
        assert_eq!(config.unqualify("docAB:notes"), None);
    }

    #[test]
    fn no_namespace_passes_names_through() {
        let config: HostConfig = serde_json::from_str("{}").unwrap();

        assert_eq!(config.qualify("docA:notes"), "docA:notes");
        assert_eq!(config.unqualify("docA:notes"), Some("docA:notes"));
    }
}
