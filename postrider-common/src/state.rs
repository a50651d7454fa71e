use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};

/// The name of the processor a mail item is currently assigned to.
///
/// Two values are reserved: [`State::root`] is assigned to freshly accepted
/// mail, and [`State::discard`] means "stop processing and drop the item,
/// regardless of remaining recipients". Every other value must name a
/// processor known to the registry; an unknown name is a configuration
/// error, not a recoverable condition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct State(String);

/// Reserved name for the initial state.
pub const ROOT: &str = "root";

/// Reserved name for the terminal discard state.
pub const DISCARD: &str = "discard";

impl State {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The initial state assigned to freshly accepted mail.
    #[must_use]
    pub fn root() -> Self {
        Self(ROOT.to_string())
    }

    /// The terminal discard state.
    #[must_use]
    pub fn discard() -> Self {
        Self(DISCARD.to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn is_root(&self) -> bool {
        self.0 == ROOT
    }

    #[must_use]
    pub fn is_discard(&self) -> bool {
        self.0 == DISCARD
    }
}

impl Default for State {
    fn default() -> Self {
        Self::root()
    }
}

impl Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for State {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}
