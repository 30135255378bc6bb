//! Simulation categories and how they are named on the command line and in output.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

/// Kinds of simulation the runner knows how to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimulationCategory {
    Races,
    Trinkets,
    SoulBinds,
    Conduits,
    Legendaries,
    SecondaryDistributions,
    Talents,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown simulation type '{0}'")]
pub struct UnknownCategory(pub String);

impl SimulationCategory {
    /// Launch order used by the dispatcher.
    pub const ALL: [Self; 7] = [
        Self::Races,
        Self::Trinkets,
        Self::SoulBinds,
        Self::Conduits,
        Self::Legendaries,
        Self::SecondaryDistributions,
        Self::Talents,
    ];

    /// Name accepted on the command line and used for output directories.
    #[must_use]
    pub const fn selector_name(self) -> &'static str {
        match self {
            Self::Races => "races",
            Self::Trinkets => "trinkets",
            Self::SoulBinds => "soul_binds",
            Self::Conduits => "conduits",
            Self::Legendaries => "legendaries",
            Self::SecondaryDistributions => "secondary_distributions",
            Self::Talents => "talents",
        }
    }

    /// Human label, also the source of an envelope's `data_type`.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Races => "Races",
            Self::Trinkets => "Trinkets",
            Self::SoulBinds => "Soul Binds",
            Self::Conduits => "Conduits",
            Self::Legendaries => "Legendaries",
            Self::SecondaryDistributions => "Secondary Distributions",
            Self::Talents => "Talents",
        }
    }

    /// Name given to the thread running this category.
    #[must_use]
    pub const fn thread_name(self) -> &'static str {
        match self {
            Self::Races => "Race Thread",
            Self::Trinkets => "Trinket Thread",
            Self::SoulBinds => "Soul Bind Thread",
            Self::Conduits => "Conduit Thread",
            Self::Legendaries => "Legendary Thread",
            Self::SecondaryDistributions => "Secondary Distribution Thread",
            Self::Talents => "Talent Thread",
        }
    }
}

impl FromStr for SimulationCategory {
    type Err = UnknownCategory;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|category| category.selector_name() == s.trim())
            .ok_or_else(|| UnknownCategory(s.to_string()))
    }
}

impl std::fmt::Display for SimulationCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}
