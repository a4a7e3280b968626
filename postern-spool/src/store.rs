use std::{fmt, str::FromStr, sync::Arc};

use dashmap::DashMap;
use postern_common::internal;
use serde::{Deserialize, Serialize};

use crate::{FileMailRepository, MailRepository, MemoryMailRepository, RepositoryError, Result};

/// Storage schemes a repository URL may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Protocol {
    #[default]
    File,
    Memory,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File => f.write_str("file"),
            Self::Memory => f.write_str("memory"),
        }
    }
}

impl FromStr for Protocol {
    type Err = RepositoryError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "file" => Ok(Self::File),
            "memory" => Ok(Self::Memory),
            other => Err(RepositoryError::UnsupportedProtocol(other.to_owned())),
        }
    }
}

/// `<protocol>://<path>` locator of a mail repository, e.g. `file://var/mail/error/`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RepositoryUrl {
    pub protocol: Protocol,
    pub path: String,
}

impl FromStr for RepositoryUrl {
    type Err = RepositoryError;

    fn from_str(s: &str) -> Result<Self> {
        let (protocol, path) = s
            .split_once("://")
            .ok_or_else(|| RepositoryError::InvalidUrl(s.to_owned()))?;

        if path.is_empty() {
            return Err(RepositoryError::InvalidUrl(s.to_owned()));
        }

        Ok(Self {
            protocol: protocol.parse()?,
            path: path.to_owned(),
        })
    }
}

impl fmt::Display for RepositoryUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.protocol, self.path)
    }
}

/// Resolves repository URLs to repositories. Each URL maps to a single
/// repository instance for the lifetime of the store.
#[derive(Debug, Default)]
pub struct MailRepositoryStore {
    default_protocol: Protocol,
    repositories: DashMap<RepositoryUrl, Arc<dyn MailRepository>>,
}

impl MailRepositoryStore {
    #[must_use]
    pub fn new(default_protocol: Protocol) -> Self {
        Self {
            default_protocol,
            repositories: DashMap::new(),
        }
    }

    #[must_use]
    pub const fn default_protocol(&self) -> Protocol {
        self.default_protocol
    }

    /// URL of `path` under the default protocol.
    #[must_use]
    pub fn default_url(&self, path: &str) -> RepositoryUrl {
        RepositoryUrl {
            protocol: self.default_protocol,
            path: path.to_owned(),
        }
    }

    /// Installs `repository` for `url`, replacing whatever was resolved before.
    pub fn register(&self, url: RepositoryUrl, repository: Arc<dyn MailRepository>) {
        self.repositories.insert(url, repository);
    }

    /// Returns the repository for `url`, opening it on first use.
    ///
    /// # Errors
    /// If the URL is malformed or the repository cannot be opened.
    pub async fn select(&self, url: &str) -> Result<Arc<dyn MailRepository>> {
        let url: RepositoryUrl = url.parse()?;

        if let Some(repository) = self.repositories.get(&url) {
            return Ok(Arc::clone(repository.value()));
        }

        let repository: Arc<dyn MailRepository> = match url.protocol {
            Protocol::Memory => Arc::new(MemoryMailRepository::new()),
            Protocol::File => Arc::new(FileMailRepository::open(&url.path).await?),
        };

        internal!(level = DEBUG, "Opened mail repository {url}");

        Ok(Arc::clone(
            self.repositories.entry(url).or_insert(repository).value(),
        ))
    }
}
