use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use postern_common::{AttributeName, Mail, State, processing};
use postern_spool::{MailQueue, MailRepositoryStore, RepositoryUrl};

use crate::{
    error::{ConfigurationError, MailetError},
    plugin::{Mailet, MailetContext, PluginConfig},
};

/// Ends processing of the mail.
#[derive(Debug, Default, Clone, Copy)]
pub struct Null;

#[async_trait]
impl Mailet for Null {
    fn name(&self) -> &str {
        "Null"
    }

    async fn service(&self, mail: &mut Mail) -> Result<(), MailetError> {
        mail.set_state(State::GHOST);
        Ok(())
    }
}

/// Sends the mail to another processor, optionally recording a notice as its
/// error message.
#[derive(Debug, Clone)]
pub struct ToProcessor {
    processor: State,
    notice: Option<String>,
}

impl ToProcessor {
    pub const fn new(processor: State) -> Self {
        Self {
            processor,
            notice: None,
        }
    }

    /// # Errors
    /// If the `processor` parameter is missing
    pub fn from_config(config: &PluginConfig) -> Result<Self, ConfigurationError> {
        Ok(Self {
            processor: State::from(config.require("processor")?.trim()),
            notice: config.param("notice").map(ToOwned::to_owned),
        })
    }
}

#[async_trait]
impl Mailet for ToProcessor {
    fn name(&self) -> &str {
        "ToProcessor"
    }

    async fn service(&self, mail: &mut Mail) -> Result<(), MailetError> {
        if let Some(notice) = &self.notice {
            mail.set_error_message(notice.clone());
        }
        mail.set_state(self.processor.clone());
        Ok(())
    }

    fn next_states(&self) -> Vec<State> {
        vec![self.processor.clone()]
    }
}

/// Stores the mail in a repository and, unless `passThrough` is set, ends its
/// processing.
#[derive(Debug, Clone)]
pub struct ToRepository {
    url: RepositoryUrl,
    repositories: Arc<MailRepositoryStore>,
    pass_through: bool,
}

impl ToRepository {
    const DEFAULT_PATH: &'static str = "var/mail/error/";

    /// A `repository` given as a bare path uses the store's default protocol.
    ///
    /// # Errors
    /// If `repository` is not a valid URL or `passThrough` is not a boolean
    pub fn from_config(
        config: &PluginConfig,
        context: &MailetContext,
    ) -> Result<Self, ConfigurationError> {
        let url = match config.param("repository").map(str::trim) {
            Some(url) if url.contains("://") => url.parse::<RepositoryUrl>()?,
            Some(path) => context.repositories.default_url(path),
            None => context.repositories.default_url(Self::DEFAULT_PATH),
        };

        Ok(Self {
            url,
            repositories: Arc::clone(&context.repositories),
            pass_through: config.parse("passThrough")?.unwrap_or(false),
        })
    }
}

#[async_trait]
impl Mailet for ToRepository {
    fn name(&self) -> &str {
        "ToRepository"
    }

    async fn service(&self, mail: &mut Mail) -> Result<(), MailetError> {
        let repository = self.repositories.select(&self.url.to_string()).await?;
        let key = repository.store(mail).await?;

        processing!(
            level = DEBUG,
            mail = %mail.name(),
            %key,
            "Stored mail in {}",
            self.url
        );

        if !self.pass_through {
            mail.set_state(State::GHOST);
        }
        Ok(())
    }
}

/// Prepends a header to the message.
#[derive(Debug, Clone)]
pub struct AddHeader {
    header: String,
    value: String,
}

impl AddHeader {
    /// # Errors
    /// If `name` or `value` is missing, or the header name is not valid
    pub fn from_config(config: &PluginConfig) -> Result<Self, ConfigurationError> {
        let header = config.require("name")?.trim();
        if header.is_empty() || !header.bytes().all(|b| b.is_ascii_graphic() && b != b':') {
            return Err(ConfigurationError::InvalidParameter {
                plugin: config.name().to_owned(),
                parameter: String::from("name"),
                reason: format!("{header:?} is not a valid header name"),
            });
        }

        Ok(Self {
            header: header.to_owned(),
            value: config.require("value")?.to_owned(),
        })
    }
}

#[async_trait]
impl Mailet for AddHeader {
    fn name(&self) -> &str {
        "AddHeader"
    }

    async fn service(&self, mail: &mut Mail) -> Result<(), MailetError> {
        mail.prepend_header(&self.header, &self.value);
        Ok(())
    }
}

/// Sets a string attribute on the mail.
#[derive(Debug, Clone)]
pub struct SetAttribute {
    attribute: AttributeName,
    value: String,
}

impl SetAttribute {
    /// # Errors
    /// If `name` or `value` is missing
    pub fn from_config(config: &PluginConfig) -> Result<Self, ConfigurationError> {
        Ok(Self {
            attribute: AttributeName::from(config.require("name")?.to_owned()),
            value: config.require("value")?.to_owned(),
        })
    }
}

#[async_trait]
impl Mailet for SetAttribute {
    fn name(&self) -> &str {
        "SetAttribute"
    }

    async fn service(&self, mail: &mut Mail) -> Result<(), MailetError> {
        mail.set_attribute(self.attribute.clone(), self.value.clone());
        Ok(())
    }
}

/// Puts a copy of the mail back on the spool, to be processed again from
/// `processor` after `delay_secs`.
///
/// With `consume` (the default) the current copy is ghosted.
#[derive(Debug, Clone)]
pub struct Requeue {
    queue: Arc<dyn MailQueue>,
    delay: Option<Duration>,
    processor: State,
    consume: bool,
}

impl Requeue {
    /// # Errors
    /// If no queue is available, or a parameter cannot be parsed
    pub fn from_config(
        config: &PluginConfig,
        context: &MailetContext,
    ) -> Result<Self, ConfigurationError> {
        let queue = context
            .queue
            .clone()
            .ok_or_else(|| ConfigurationError::Unavailable {
                plugin: config.name().to_owned(),
                resource: "mail queue",
            })?;

        Ok(Self {
            queue,
            delay: config.parse::<u64>("delay_secs")?.map(Duration::from_secs),
            processor: config
                .param("processor")
                .map_or(State::ROOT, |processor| State::from(processor.trim())),
            consume: config.parse("consume")?.unwrap_or(true),
        })
    }
}

#[async_trait]
impl Mailet for Requeue {
    fn name(&self) -> &str {
        "Requeue"
    }

    async fn service(&self, mail: &mut Mail) -> Result<(), MailetError> {
        let mut copy = mail.clone();
        copy.set_state(self.processor.clone());
        self.queue.enqueue(copy, self.delay).await?;

        if self.consume {
            mail.set_state(State::GHOST);
        }
        Ok(())
    }

    fn next_states(&self) -> Vec<State> {
        vec![self.processor.clone()]
    }
}
