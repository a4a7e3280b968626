//! Serde model of the processor pipeline, and its assembly into a
//! [`DispatchTableBuilder`].
//!
//! ```ron
//! [
//!     (
//!         state: "root",
//!         matchers: [
//!             (
//!                 name: "local-bounce",
//!                 matcher: Some("And"),
//!                 children: [
//!                     (matcher: Some("SenderIsNull")),
//!                     (matcher: Some("HostIs=example.com")),
//!                 ],
//!             ),
//!         ],
//!         mailets: [
//!             (matcher: Some("local-bounce"), class: "Null"),
//!             (class: "ToProcessor", params: {"processor": "transport"}),
//!         ],
//!     ),
//! ]
//! ```

use std::sync::Arc;

use ahash::AHashMap;
use postern_common::State;
use serde::{Deserialize, Serialize};

use crate::{
    builtin::{All, Inverted},
    dispatch::{DispatchTable, DispatchTableBuilder},
    error::ConfigurationError,
    listener::MetricsListener,
    plugin::{MailetContext, Matcher, PluginConfig, PluginRef},
    processor::StateProcessor,
    registry::Registry,
    step::{OnMailetError, OnMatchError, PipelineStep},
};

const fn default_enable_metrics() -> bool {
    true
}

/// A matcher defined once per processor and referenced by name from its mailets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompositeMatcherConfig {
    /// Required for top-level definitions, ignored for children.
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, alias = "match")]
    pub matcher: Option<String>,
    #[serde(default, alias = "notmatch")]
    pub not_matcher: Option<String>,
    #[serde(default)]
    pub children: Vec<CompositeMatcherConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailetConfig {
    /// Selects the recipients to act on. Omitted means every recipient.
    #[serde(default, alias = "match")]
    pub matcher: Option<String>,
    /// Selects the recipients not to act on.
    #[serde(default, alias = "notmatch")]
    pub not_matcher: Option<String>,
    /// `Name[@version]` of the mailet.
    pub class: String,
    #[serde(default)]
    pub on_match_error: Option<OnMatchError>,
    #[serde(default)]
    pub on_mailet_error: Option<OnMailetError>,
    #[serde(default)]
    pub params: AHashMap<String, String>,
}

impl MailetConfig {
    fn new(class: &str) -> Self {
        Self {
            matcher: None,
            not_matcher: None,
            class: class.to_owned(),
            on_match_error: None,
            on_mailet_error: None,
            params: AHashMap::new(),
        }
    }

    fn with_param(mut self, key: &str, value: &str) -> Self {
        self.params.insert(key.to_owned(), value.to_owned());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessorConfig {
    pub state: State,
    #[serde(default = "default_enable_metrics")]
    pub enable_metrics: bool,
    #[serde(default)]
    pub matchers: Vec<CompositeMatcherConfig>,
    #[serde(default)]
    pub mailets: Vec<MailetConfig>,
}

/// Every processor of the container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProcessorsConfig(pub Vec<ProcessorConfig>);

impl Default for ProcessorsConfig {
    /// Sends everything to `transport`, which stores it under
    /// `var/mail/outgoing/`. Failures end up under `var/mail/error/`.
    fn default() -> Self {
        let processor = |state: State, mailets: Vec<MailetConfig>| ProcessorConfig {
            state,
            enable_metrics: true,
            matchers: Vec::new(),
            mailets,
        };

        Self(vec![
            processor(
                State::ROOT,
                vec![MailetConfig::new("ToProcessor").with_param("processor", "transport")],
            ),
            processor(
                State::TRANSPORT,
                vec![
                    MailetConfig::new("ToRepository")
                        .with_param("repository", "var/mail/outgoing/"),
                ],
            ),
            processor(
                State::ERROR,
                vec![MailetConfig::new("ToRepository").with_param("repository", "var/mail/error/")],
            ),
        ])
    }
}

impl ProcessorsConfig {
    /// Instantiates every matcher and mailet through `registry`.
    ///
    /// The returned builder still has to be built, which validates the
    /// pipeline as a whole.
    ///
    /// # Errors
    /// If a processor, matcher or mailet definition is invalid
    pub fn load(
        &self,
        registry: &Registry,
        context: &MailetContext,
    ) -> Result<DispatchTableBuilder, ConfigurationError> {
        self.0
            .iter()
            .try_fold(DispatchTable::builder(), |builder, config| {
                Ok(builder.processor(build_processor(config, registry, context)?))
            })
    }
}

fn build_processor(
    config: &ProcessorConfig,
    registry: &Registry,
    context: &MailetContext,
) -> Result<StateProcessor, ConfigurationError> {
    let state = &config.state;
    if state.is_ghost() {
        return Err(ConfigurationError::ReservedState(state.clone()));
    }

    let mut named: AHashMap<String, Arc<dyn Matcher>> = AHashMap::new();
    for composite in &config.matchers {
        let name = composite
            .name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .ok_or_else(|| ConfigurationError::MissingParameter {
                plugin: format!("composite matcher of processor {state}"),
                parameter: "name",
            })?;

        if named.contains_key(name) {
            return Err(ConfigurationError::DuplicateCompositeMatcher {
                processor: state.clone(),
                name: name.to_owned(),
            });
        }

        let matcher = build_composite(composite, state, registry, &named)?;
        named.insert(name.to_owned(), matcher);
    }

    let mut steps = Vec::with_capacity(config.mailets.len());
    for mailet in &config.mailets {
        let matcher: Arc<dyn Matcher> = match (&mailet.matcher, &mailet.not_matcher) {
            (Some(_), Some(_)) => {
                return Err(ConfigurationError::MatchAndNotMatch {
                    processor: state.clone(),
                    mailet: mailet.class.clone(),
                });
            }
            (Some(reference), None) => resolve_matcher(reference, registry, &named)?,
            (None, Some(reference)) => {
                Arc::new(Inverted::new(resolve_matcher(reference, registry, &named)?))
            }
            (None, None) => Arc::new(All),
        };

        let reference: PluginRef = mailet.class.parse()?;
        let plugin = PluginConfig::new(reference.name)
            .with_condition(reference.condition)
            .with_params(mailet.params.clone());
        let instance = registry.mailet(&plugin, reference.version, context)?;

        steps.push(
            PipelineStep::new(matcher, instance)
                .on_match_error(mailet.on_match_error.clone().unwrap_or_default())
                .on_mailet_error(mailet.on_mailet_error.clone().unwrap_or_default()),
        );
    }

    let mut processor = StateProcessor::new(state.clone(), steps)?;
    if config.enable_metrics {
        processor = processor.with_listener(Arc::new(MetricsListener));
    }

    Ok(processor)
}

/// Resolves a mailet's matcher reference, preferring the processor's named
/// matchers over registered ones.
fn resolve_matcher(
    reference: &str,
    registry: &Registry,
    named: &AHashMap<String, Arc<dyn Matcher>>,
) -> Result<Arc<dyn Matcher>, ConfigurationError> {
    if let Some(matcher) = named.get(reference.trim()) {
        return Ok(Arc::clone(matcher));
    }

    let reference: PluginRef = reference.parse()?;
    registry.matcher(
        &PluginConfig::new(reference.name).with_condition(reference.condition),
        reference.version,
    )
}

fn build_composite(
    config: &CompositeMatcherConfig,
    state: &State,
    registry: &Registry,
    named: &AHashMap<String, Arc<dyn Matcher>>,
) -> Result<Arc<dyn Matcher>, ConfigurationError> {
    let (reference, invert) = match (&config.matcher, &config.not_matcher) {
        (Some(_), Some(_)) => {
            return Err(ConfigurationError::MatchAndNotMatch {
                processor: state.clone(),
                mailet: config.name.clone().unwrap_or_default(),
            });
        }
        (Some(reference), None) => (reference, false),
        (None, Some(reference)) => (reference, true),
        (None, None) => return Err(ConfigurationError::EmptyCompositeMatcher(state.clone())),
    };

    let parsed: PluginRef = reference.parse()?;
    let matcher = if registry.is_composite(&parsed.name) {
        let children = config
            .children
            .iter()
            .map(|child| build_composite(child, state, registry, named))
            .collect::<Result<Vec<_>, _>>()?;

        registry.composite(
            &PluginConfig::new(parsed.name).with_condition(parsed.condition),
            parsed.version,
            children,
        )?
    } else {
        resolve_matcher(reference, registry, named)?
    };

    Ok(if invert {
        Arc::new(Inverted::new(matcher))
    } else {
        matcher
    })
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use postern_common::Mail;
    use postern_spool::{MailRepositoryStore, Protocol};
    use pretty_assertions::assert_eq;

    use super::*;

    fn context() -> MailetContext {
        MailetContext::new(Arc::new(MailRepositoryStore::new(Protocol::Memory)))
    }

    fn load(ron: &str) -> Result<DispatchTable, ConfigurationError> {
        let config: ProcessorsConfig = ron::from_str(ron).unwrap();
        config.load(&Registry::builtin(), &context())?.build()
    }

    #[test]
    fn default_pipeline_builds() {
        let table = ProcessorsConfig::default()
            .load(&Registry::builtin(), &context())
            .unwrap()
            .build()
            .unwrap();

        let mut states = table.states().cloned().collect::<Vec<_>>();
        states.sort();
        assert_eq!(states, vec![State::ERROR, State::ROOT, State::TRANSPORT]);
    }

    #[test]
    fn parses_policies_and_params() {
        let config: ProcessorsConfig = ron::from_str(
            r#"[
                (
                    state: "root",
                    enable_metrics: false,
                    mailets: [
                        (
                            matcher: Some("HostIs=example.com"),
                            class: "ToProcessor@1",
                            on_match_error: Some("nomatch"),
                            on_mailet_error: Some("ignore"),
                            params: {"processor": "transport"},
                        ),
                    ],
                ),
            ]"#,
        )
        .unwrap();

        let root = &config.0[0];
        assert_eq!(root.state, State::ROOT);
        assert!(!root.enable_metrics);
        assert_eq!(root.mailets[0].on_match_error, Some(OnMatchError::NoMatch));
        assert_eq!(root.mailets[0].on_mailet_error, Some(OnMailetError::Ignore));
        assert_eq!(
            root.mailets[0].params.get("processor").map(String::as_str),
            Some("transport")
        );
    }

    #[tokio::test]
    async fn named_composites_and_notmatch() {
        let table = load(
            r#"[
                (
                    state: "root",
                    matchers: [
                        (
                            name: "local-bounce",
                            matcher: Some("And"),
                            children: [
                                (matcher: Some("SenderIsNull")),
                                (matcher: Some("HostIs=local.test")),
                            ],
                        ),
                    ],
                    mailets: [
                        (matcher: Some("local-bounce"), class: "Null"),
                        (not_matcher: Some("HostIs=local.test"), class: "ToProcessor", params: {"processor": "transport"}),
                        (class: "Null"),
                    ],
                ),
                (state: "transport", mailets: [(class: "Null")]),
                (state: "error", mailets: [(class: "Null")]),
            ]"#,
        )
        .unwrap();

        let bounce = Mail::builder()
            .recipients("a@local.test, b@remote.test".parse().unwrap())
            .build();
        let summary = table.route(bounce).await.unwrap();

        // The local recipient is ghosted by the composite, the remote one goes
        // through transport.
        assert_eq!(summary.traversals, 2);
        assert_eq!(summary.disposed, 2);
    }

    #[test]
    fn rejects_invalid_definitions() {
        assert!(matches!(
            load(
                r#"[
                    (state: "root", mailets: [(matcher: Some("All"), not_matcher: Some("All"), class: "Null")]),
                    (state: "error"),
                ]"#
            ),
            Err(ConfigurationError::MatchAndNotMatch { .. })
        ));

        assert!(matches!(
            load(r#"[(state: "ghost"), (state: "root"), (state: "error")]"#),
            Err(ConfigurationError::ReservedState(_))
        ));

        assert!(matches!(
            load(r#"[(state: "root", mailets: [(class: "Teleport")]), (state: "error")]"#),
            Err(ConfigurationError::UnknownMailet(_))
        ));

        assert!(matches!(
            load(
                r#"[
                    (state: "root", matchers: [(name: "x", matcher: Some("All")), (name: "x", matcher: Some("All"))]),
                    (state: "error"),
                ]"#
            ),
            Err(ConfigurationError::DuplicateCompositeMatcher { .. })
        ));

        assert!(matches!(
            load(
                r#"[
                    (state: "root", mailets: [(class: "ToProcessor", params: {"processor": "spam"})]),
                    (state: "error"),
                ]"#
            ),
            Err(ConfigurationError::UnknownState { .. })
        ));
    }
}
