//! Mail processing engine.
//!
//! Mails are routed by state to a [`StateProcessor`], an ordered list of
//! [`PipelineStep`]s. Each step pairs a [`Matcher`], which selects recipients,
//! with a [`Mailet`], which acts on the mail holding them. When only some
//! recipients match, the mail is split in two and both halves continue
//! independently. The [`DispatchTable`] keeps handing mails to processors
//! until they are ghosted, and the [`MailSpooler`] feeds it from the spool
//! queue, retrying failed mails up to [`MAX_FAILURE_COUNT`] times.

pub mod builtin;
pub mod config;
pub mod dispatch;
pub mod error;
mod executor;
pub mod interrupt;
pub mod listener;
pub mod plugin;
pub mod processor;
pub mod registry;
pub mod spooler;
pub mod step;
pub mod testing;

pub use config::{CompositeMatcherConfig, MailetConfig, ProcessorConfig, ProcessorsConfig};
pub use dispatch::{DEFAULT_MAX_HOPS, DispatchTable, DispatchTableBuilder, RouteSummary};
pub use error::{ConfigurationError, MailetError, MatcherError, ProcessingError, SpoolerError};
pub use interrupt::{Interrupt, InterruptHandle};
pub use listener::{MailetEvent, MatcherEvent, MetricsListener, ProcessorListener};
pub use plugin::{Mailet, MailetContext, Matcher, PluginConfig, PluginRef};
pub use processor::{StateProcessor, Traversal};
pub use registry::Registry;
pub use spooler::{MAX_FAILURE_COUNT, MailSpooler, SpoolerConfig};
pub use step::{OnMailetError, OnMatchError, PipelineStep};
