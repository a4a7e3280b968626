//! Lookup of matcher and mailet factories by name and version.

use std::{collections::BTreeMap, fmt, sync::Arc};

use ahash::AHashMap;

use crate::{
    error::ConfigurationError,
    plugin::{Mailet, MailetContext, Matcher, PluginConfig},
};

pub type MatcherFactory =
    Arc<dyn Fn(&PluginConfig) -> Result<Arc<dyn Matcher>, ConfigurationError> + Send + Sync>;

/// Builds a matcher out of already built child matchers.
pub type CompositeFactory = Arc<
    dyn Fn(&PluginConfig, Vec<Arc<dyn Matcher>>) -> Result<Arc<dyn Matcher>, ConfigurationError>
        + Send
        + Sync,
>;

pub type MailetFactory = Arc<
    dyn Fn(&PluginConfig, &MailetContext) -> Result<Arc<dyn Mailet>, ConfigurationError>
        + Send
        + Sync,
>;

type Versions<F> = BTreeMap<u32, F>;

/// Factories keyed by `(name, version)`.
///
/// A lookup without a version resolves to the highest registered version.
#[derive(Clone, Default)]
pub struct Registry {
    matchers: AHashMap<String, Versions<MatcherFactory>>,
    composites: AHashMap<String, Versions<CompositeFactory>>,
    mailets: AHashMap<String, Versions<MailetFactory>>,
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("matchers", &self.matchers.keys().collect::<Vec<_>>())
            .field("composites", &self.composites.keys().collect::<Vec<_>>())
            .field("mailets", &self.mailets.keys().collect::<Vec<_>>())
            .finish()
    }
}

fn resolve<'a, F>(
    table: &'a AHashMap<String, Versions<F>>,
    name: &str,
    version: Option<u32>,
) -> Option<&'a F> {
    let versions = table.get(name)?;
    match version {
        Some(version) => versions.get(&version),
        None => versions.values().next_back(),
    }
}

fn describe(name: &str, version: Option<u32>) -> String {
    version.map_or_else(|| name.to_owned(), |version| format!("{name}@{version}"))
}

impl Registry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the builtin matchers and mailets.
    #[must_use]
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        crate::builtin::register(&mut registry);
        registry
    }

    pub fn register_matcher<F>(&mut self, name: impl Into<String>, version: u32, factory: F)
    where
        F: Fn(&PluginConfig) -> Result<Arc<dyn Matcher>, ConfigurationError> + Send + Sync + 'static,
    {
        self.matchers
            .entry(name.into())
            .or_default()
            .insert(version, Arc::new(factory));
    }

    pub fn register_composite<F>(&mut self, name: impl Into<String>, version: u32, factory: F)
    where
        F: Fn(&PluginConfig, Vec<Arc<dyn Matcher>>) -> Result<Arc<dyn Matcher>, ConfigurationError>
            + Send
            + Sync
            + 'static,
    {
        self.composites
            .entry(name.into())
            .or_default()
            .insert(version, Arc::new(factory));
    }

    pub fn register_mailet<F>(&mut self, name: impl Into<String>, version: u32, factory: F)
    where
        F: Fn(&PluginConfig, &MailetContext) -> Result<Arc<dyn Mailet>, ConfigurationError>
            + Send
            + Sync
            + 'static,
    {
        self.mailets
            .entry(name.into())
            .or_default()
            .insert(version, Arc::new(factory));
    }

    pub fn is_composite(&self, name: &str) -> bool {
        self.composites.contains_key(name)
    }

    /// # Errors
    /// If no matcher is registered under that name and version, or the
    /// factory rejects the configuration
    pub fn matcher(
        &self,
        config: &PluginConfig,
        version: Option<u32>,
    ) -> Result<Arc<dyn Matcher>, ConfigurationError> {
        let factory = resolve(&self.matchers, config.name(), version)
            .ok_or_else(|| ConfigurationError::UnknownMatcher(describe(config.name(), version)))?;

        factory(config)
    }

    /// # Errors
    /// If no composite matcher is registered under that name and version, or
    /// the factory rejects the configuration
    pub fn composite(
        &self,
        config: &PluginConfig,
        version: Option<u32>,
        children: Vec<Arc<dyn Matcher>>,
    ) -> Result<Arc<dyn Matcher>, ConfigurationError> {
        let factory = resolve(&self.composites, config.name(), version)
            .ok_or_else(|| ConfigurationError::UnknownMatcher(describe(config.name(), version)))?;

        factory(config, children)
    }

    /// # Errors
    /// If no mailet is registered under that name and version, or the factory
    /// rejects the configuration
    pub fn mailet(
        &self,
        config: &PluginConfig,
        version: Option<u32>,
        context: &MailetContext,
    ) -> Result<Arc<dyn Mailet>, ConfigurationError> {
        let factory = resolve(&self.mailets, config.name(), version)
            .ok_or_else(|| ConfigurationError::UnknownMailet(describe(config.name(), version)))?;

        factory(config, context)
    }
}
