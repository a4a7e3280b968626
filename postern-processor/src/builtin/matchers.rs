use std::sync::Arc;

use async_trait::async_trait;
use postern_common::{AddressList, AttributeName, Mail};

use crate::{
    error::{ConfigurationError, MatcherError},
    plugin::{Matcher, PluginConfig},
};

/// Matches every recipient.
#[derive(Debug, Default, Clone, Copy)]
pub struct All;

#[async_trait]
impl Matcher for All {
    fn name(&self) -> &str {
        "All"
    }

    async fn matched(&self, mail: &Mail) -> Result<AddressList, MatcherError> {
        Ok(mail.recipients().clone())
    }
}

/// Matches recipients listed in the condition.
#[derive(Debug, Clone)]
pub struct RecipientIs {
    recipients: AddressList,
}

impl RecipientIs {
    /// # Errors
    /// If the condition is missing or is not a list of addresses
    pub fn from_config(config: &PluginConfig) -> Result<Self, ConfigurationError> {
        let recipients = config
            .require_condition()?
            .parse::<AddressList>()
            .map_err(|e| ConfigurationError::InvalidParameter {
                plugin: config.name().to_owned(),
                parameter: String::from("condition"),
                reason: e.to_string(),
            })?;

        Ok(Self { recipients })
    }
}

#[async_trait]
impl Matcher for RecipientIs {
    fn name(&self) -> &str {
        "RecipientIs"
    }

    async fn matched(&self, mail: &Mail) -> Result<AddressList, MatcherError> {
        Ok(mail
            .recipients()
            .iter()
            .filter(|recipient| self.recipients.contains(recipient))
            .cloned()
            .collect())
    }
}

/// Matches recipients whose domain is one of the condition's domains.
#[derive(Debug, Clone)]
pub struct HostIs {
    domains: Vec<String>,
}

impl HostIs {
    /// # Errors
    /// If the condition is missing
    pub fn from_config(config: &PluginConfig) -> Result<Self, ConfigurationError> {
        let domains = config
            .require_condition()?
            .split(',')
            .map(|domain| domain.trim().trim_end_matches('.').to_ascii_lowercase())
            .filter(|domain| !domain.is_empty())
            .collect();

        Ok(Self { domains })
    }
}

#[async_trait]
impl Matcher for HostIs {
    fn name(&self) -> &str {
        "HostIs"
    }

    async fn matched(&self, mail: &Mail) -> Result<AddressList, MatcherError> {
        Ok(mail
            .recipients()
            .iter()
            .filter(|recipient| self.domains.iter().any(|d| d == recipient.domain()))
            .cloned()
            .collect())
    }
}

/// Matches every recipient of bounces, i.e. mails with a null reverse path.
#[derive(Debug, Default, Clone, Copy)]
pub struct SenderIsNull;

#[async_trait]
impl Matcher for SenderIsNull {
    fn name(&self) -> &str {
        "SenderIsNull"
    }

    async fn matched(&self, mail: &Mail) -> Result<AddressList, MatcherError> {
        Ok(if mail.sender().is_none() {
            mail.recipients().clone()
        } else {
            AddressList::new()
        })
    }
}

/// Matches every recipient when the mail carries the named attribute.
#[derive(Debug, Clone)]
pub struct HasAttribute {
    attribute: AttributeName,
}

impl HasAttribute {
    /// # Errors
    /// If the condition is missing
    pub fn from_config(config: &PluginConfig) -> Result<Self, ConfigurationError> {
        Ok(Self {
            attribute: AttributeName::from(config.require_condition()?.to_owned()),
        })
    }
}

#[async_trait]
impl Matcher for HasAttribute {
    fn name(&self) -> &str {
        "HasAttribute"
    }

    async fn matched(&self, mail: &Mail) -> Result<AddressList, MatcherError> {
        Ok(if mail.attribute(&self.attribute).is_some() {
            mail.recipients().clone()
        } else {
            AddressList::new()
        })
    }
}

/// Matches the recipients the wrapped matcher does not. Built for `notmatch`.
#[derive(Debug, Clone)]
pub struct Inverted {
    name: String,
    inner: Arc<dyn Matcher>,
}

impl Inverted {
    pub fn new(inner: Arc<dyn Matcher>) -> Self {
        Self {
            name: format!("not({})", inner.name()),
            inner,
        }
    }
}

#[async_trait]
impl Matcher for Inverted {
    fn name(&self) -> &str {
        &self.name
    }

    async fn matched(&self, mail: &Mail) -> Result<AddressList, MatcherError> {
        let excluded = self.inner.matched(mail).await?;
        let mut remaining = mail.recipients().clone();
        remaining.remove_all(&excluded);
        Ok(remaining)
    }
}

fn composite_children(
    config: &PluginConfig,
    children: Vec<Arc<dyn Matcher>>,
) -> Result<Vec<Arc<dyn Matcher>>, ConfigurationError> {
    if children.is_empty() {
        return Err(ConfigurationError::InvalidParameter {
            plugin: config.name().to_owned(),
            parameter: String::from("children"),
            reason: String::from("a composite matcher needs at least one child"),
        });
    }

    Ok(children)
}

/// Matches the recipients every child matches.
#[derive(Debug, Clone)]
pub struct And {
    children: Vec<Arc<dyn Matcher>>,
}

impl And {
    /// # Errors
    /// If there are no children
    pub fn new(
        config: &PluginConfig,
        children: Vec<Arc<dyn Matcher>>,
    ) -> Result<Self, ConfigurationError> {
        Ok(Self {
            children: composite_children(config, children)?,
        })
    }
}

#[async_trait]
impl Matcher for And {
    fn name(&self) -> &str {
        "And"
    }

    async fn matched(&self, mail: &Mail) -> Result<AddressList, MatcherError> {
        let mut matched = mail.recipients().clone();
        for child in &self.children {
            if matched.is_empty() {
                break;
            }

            let child_matched = child.matched(mail).await?;
            matched.retain(|recipient| child_matched.contains(recipient));
        }

        Ok(matched)
    }
}

/// Matches the recipients at least one child matches.
#[derive(Debug, Clone)]
pub struct Or {
    children: Vec<Arc<dyn Matcher>>,
}

impl Or {
    /// # Errors
    /// If there are no children
    pub fn new(
        config: &PluginConfig,
        children: Vec<Arc<dyn Matcher>>,
    ) -> Result<Self, ConfigurationError> {
        Ok(Self {
            children: composite_children(config, children)?,
        })
    }
}

async fn union(children: &[Arc<dyn Matcher>], mail: &Mail) -> Result<AddressList, MatcherError> {
    let mut matched = AddressList::new();
    for child in children {
        matched.extend(
            child
                .matched(mail)
                .await?
                .into_iter()
                .filter(|recipient| mail.recipients().contains(recipient)),
        );
    }

    // Keep the mail's recipient order and drop repeats.
    Ok(mail
        .recipients()
        .iter()
        .filter(|recipient| matched.contains(recipient))
        .cloned()
        .collect())
}

#[async_trait]
impl Matcher for Or {
    fn name(&self) -> &str {
        "Or"
    }

    async fn matched(&self, mail: &Mail) -> Result<AddressList, MatcherError> {
        union(&self.children, mail).await
    }
}

/// Matches the recipients no child matches.
#[derive(Debug, Clone)]
pub struct Not {
    children: Vec<Arc<dyn Matcher>>,
}

impl Not {
    /// # Errors
    /// If there are no children
    pub fn new(
        config: &PluginConfig,
        children: Vec<Arc<dyn Matcher>>,
    ) -> Result<Self, ConfigurationError> {
        Ok(Self {
            children: composite_children(config, children)?,
        })
    }
}

#[async_trait]
impl Matcher for Not {
    fn name(&self) -> &str {
        "Not"
    }

    async fn matched(&self, mail: &Mail) -> Result<AddressList, MatcherError> {
        let excluded = union(&self.children, mail).await?;
        let mut remaining = mail.recipients().clone();
        remaining.remove_all(&excluded);
        Ok(remaining)
    }
}
