//! Capability interfaces implemented by matchers and mailets, and the
//! configuration handed to their factories.

use std::{fmt::Debug, str::FromStr, sync::Arc};

use ahash::AHashMap;
use async_trait::async_trait;
use postern_common::{AddressList, Mail, State};
use postern_spool::{MailQueue, MailRepositoryStore};

use crate::error::{ConfigurationError, MailetError, MatcherError};

/// Selects the recipients of a mail a mailet should act on.
#[async_trait]
pub trait Matcher: Send + Sync + Debug {
    fn name(&self) -> &str;

    /// Returns the matched recipients. An empty list means no match.
    ///
    /// Addresses that are not recipients of `mail` are discarded by the caller.
    async fn matched(&self, mail: &Mail) -> Result<AddressList, MatcherError>;
}

/// Performs an action on a mail.
///
/// A mailet may change any part of the mail, including its state. Setting the
/// state to [`State::GHOST`] ends processing for that mail.
#[async_trait]
pub trait Mailet: Send + Sync + Debug {
    fn name(&self) -> &str;

    async fn service(&self, mail: &mut Mail) -> Result<(), MailetError>;

    /// States this mailet may send mail to, checked against the configured
    /// processors at startup.
    fn next_states(&self) -> Vec<State> {
        Vec::new()
    }
}

/// Parsed `Name[@version][=condition]` reference to a plugin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginRef {
    pub name: String,
    pub version: Option<u32>,
    pub condition: Option<String>,
}

impl FromStr for PluginRef {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (head, condition) = match s.split_once('=') {
            Some((head, condition)) => (head, Some(condition.trim().to_owned())),
            None => (s, None),
        };

        let (name, version) = match head.split_once('@') {
            Some((name, version)) => {
                let version = version.trim().parse::<u32>().map_err(|e| {
                    ConfigurationError::InvalidParameter {
                        plugin: name.trim().to_owned(),
                        parameter: String::from("version"),
                        reason: e.to_string(),
                    }
                })?;
                (name, Some(version))
            }
            None => (head, None),
        };

        let name = name.trim();
        if name.is_empty() {
            return Err(ConfigurationError::InvalidParameter {
                plugin: s.to_owned(),
                parameter: String::from("name"),
                reason: String::from("plugin name is empty"),
            });
        }

        Ok(Self {
            name: name.to_owned(),
            version,
            condition,
        })
    }
}

/// Everything a factory needs to build one plugin instance.
#[derive(Debug, Clone, Default)]
pub struct PluginConfig {
    name: String,
    condition: Option<String>,
    params: AHashMap<String, String>,
}

impl PluginConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_condition(mut self, condition: Option<String>) -> Self {
        self.condition = condition;
        self
    }

    #[must_use]
    pub fn with_params(mut self, params: AHashMap<String, String>) -> Self {
        self.params = params;
        self
    }

    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn condition(&self) -> Option<&str> {
        self.condition.as_deref()
    }

    /// The condition, for matchers that cannot work without one.
    ///
    /// # Errors
    /// If no condition was given
    pub fn require_condition(&self) -> Result<&str, ConfigurationError> {
        self.condition()
            .filter(|condition| !condition.is_empty())
            .ok_or_else(|| ConfigurationError::MissingParameter {
                plugin: self.name.clone(),
                parameter: "condition",
            })
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    /// # Errors
    /// If the parameter is absent
    pub fn require(&self, key: &'static str) -> Result<&str, ConfigurationError> {
        self.param(key)
            .ok_or_else(|| ConfigurationError::MissingParameter {
                plugin: self.name.clone(),
                parameter: key,
            })
    }

    /// Parses an optional parameter.
    ///
    /// # Errors
    /// If the parameter is present but cannot be parsed as `T`
    pub fn parse<T>(&self, key: &str) -> Result<Option<T>, ConfigurationError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        self.param(key)
            .map(|raw| {
                raw.trim()
                    .parse::<T>()
                    .map_err(|e| ConfigurationError::InvalidParameter {
                        plugin: self.name.clone(),
                        parameter: key.to_owned(),
                        reason: e.to_string(),
                    })
            })
            .transpose()
    }
}

/// Container services available to mailets.
#[derive(Debug, Clone)]
pub struct MailetContext {
    pub repositories: Arc<MailRepositoryStore>,
    pub queue: Option<Arc<dyn MailQueue>>,
}

impl MailetContext {
    pub const fn new(repositories: Arc<MailRepositoryStore>) -> Self {
        Self {
            repositories,
            queue: None,
        }
    }

    #[must_use]
    pub fn with_queue(mut self, queue: Arc<dyn MailQueue>) -> Self {
        self.queue = Some(queue);
        self
    }
}

impl Default for MailetContext {
    fn default() -> Self {
        Self::new(Arc::new(MailRepositoryStore::default()))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn parses_plugin_references() {
        let plain: PluginRef = "All".parse().unwrap();
        assert_eq!(plain.name, "All");
        assert_eq!(plain.version, None);
        assert_eq!(plain.condition, None);

        let full: PluginRef = "RecipientIs@2=a@x.org, b@x.org".parse().unwrap();
        assert_eq!(full.name, "RecipientIs");
        assert_eq!(full.version, Some(2));
        assert_eq!(full.condition.as_deref(), Some("a@x.org, b@x.org"));

        // Only the first `=` separates the condition.
        let nested: PluginRef = "HasAttribute=a=b".parse().unwrap();
        assert_eq!(nested.condition.as_deref(), Some("a=b"));
    }

    #[test]
    fn rejects_bad_references() {
        assert!("".parse::<PluginRef>().is_err());
        assert!("All@latest".parse::<PluginRef>().is_err());
    }

    #[test]
    fn typed_parameters() {
        let config = PluginConfig::new("Requeue")
            .with_param("delay_secs", "30")
            .with_param("consume", "maybe");

        assert_eq!(config.parse::<u64>("delay_secs").unwrap(), Some(30));
        assert_eq!(config.parse::<u64>("missing").unwrap(), None);
        assert!(matches!(
            config.parse::<bool>("consume"),
            Err(ConfigurationError::InvalidParameter { .. })
        ));
        assert!(matches!(
            config.require("processor"),
            Err(ConfigurationError::MissingParameter {
                parameter: "processor",
                ..
            })
        ));
    }
}
