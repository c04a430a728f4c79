//! Device-state categories.
//!
//! Reading a category sends `get_config` and picks one section out of the
//! response. Each category maps to one [`CategorySpec`] through an
//! exhaustive match.

use std::fmt;
use std::str::FromStr;

/// Command that returns the full device configuration.
pub const GET_CONFIG: &str = "get_config";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateCategory {
    Network,
    Listen,
    Think,
    Speak,
    Personalization,
}

/// Where a category lives in the `get_config` response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CategorySpec {
    /// Name used on the command line and in logs.
    pub key: &'static str,
    /// Field of the `get_config` response holding this category.
    pub section: &'static str,
    pub description: &'static str,
}

const ALL: [StateCategory; 5] = [
    StateCategory::Network,
    StateCategory::Listen,
    StateCategory::Think,
    StateCategory::Speak,
    StateCategory::Personalization,
];

const NETWORK: CategorySpec = CategorySpec {
    key: "network",
    section: "wifi",
    description: "wireless network settings",
};

const LISTEN: CategorySpec = CategorySpec {
    key: "listen",
    section: "asr",
    description: "speech recognition settings",
};

const THINK: CategorySpec = CategorySpec {
    key: "think",
    section: "llm",
    description: "language model settings",
};

const SPEAK: CategorySpec = CategorySpec {
    key: "speak",
    section: "tts",
    description: "speech synthesis settings",
};

const PERSONALIZATION: CategorySpec = CategorySpec {
    key: "personalization",
    section: "persona",
    description: "persona and voice preferences",
};

impl StateCategory {
    pub fn all() -> impl Iterator<Item = StateCategory> {
        ALL.into_iter()
    }

    pub fn spec(self) -> &'static CategorySpec {
        match self {
            StateCategory::Network => &NETWORK,
            StateCategory::Listen => &LISTEN,
            StateCategory::Think => &THINK,
            StateCategory::Speak => &SPEAK,
            StateCategory::Personalization => &PERSONALIZATION,
        }
    }

    pub fn key(self) -> &'static str {
        self.spec().key
    }

    pub fn section(self) -> &'static str {
        self.spec().section
    }
}

impl fmt::Display for StateCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for StateCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Self::all()
            .find(|category| category.key() == wanted)
            .ok_or_else(|| {
                let known: Vec<&str> = Self::all().map(StateCategory::key).collect();
                format!("unknown state category '{s}' (expected one of: {})", known.join(", "))
            })
    }
}
