use std::{borrow::Cow, fmt};

use serde::{Deserialize, Serialize};

/// Name of the processor a mail should be routed through next.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct State(Cow<'static, str>);

impl State {
    /// Every new mail starts here.
    pub const ROOT: Self = Self::from_static("root");
    /// Mail whose processing failed and was rerouted for handling.
    pub const ERROR: Self = Self::from_static("error");
    /// Fully handled; never routed again.
    pub const GHOST: Self = Self::from_static("ghost");
    pub const TRANSPORT: Self = Self::from_static("transport");

    pub const fn from_static(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_ghost(&self) -> bool {
        *self == Self::GHOST
    }

    pub fn is_error(&self) -> bool {
        *self == Self::ERROR
    }
}

impl Default for State {
    fn default() -> Self {
        Self::ROOT
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for State {
    fn from(value: &str) -> Self {
        if value.is_empty() {
            Self::ROOT
        } else {
            Self(Cow::Owned(value.to_owned()))
        }
    }
}

impl From<String> for State {
    fn from(value: String) -> Self {
        if value.is_empty() {
            Self::ROOT
        } else {
            Self(Cow::Owned(value))
        }
    }
}

impl From<State> for String {
    fn from(value: State) -> Self {
        value.0.into_owned()
    }
}
