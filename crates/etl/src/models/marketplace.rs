use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Marketplaces the engine can pull data from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Marketplace {
    Wildberries,
    Ozon,
}

impl Marketplace {
    pub const ALL: [Marketplace; 2] = [Marketplace::Wildberries, Marketplace::Ozon];

    pub fn as_str(&self) -> &'static str {
        match self {
            Marketplace::Wildberries => "WILDBERRIES",
            Marketplace::Ozon => "OZON",
        }
    }

    /// Lowercase tag used in file names and log context.
    pub fn tag(&self) -> &'static str {
        match self {
            Marketplace::Wildberries => "wildberries",
            Marketplace::Ozon => "ozon",
        }
    }
}

impl fmt::Display for Marketplace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Marketplace {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Marketplace::ALL
            .into_iter()
            .find(|m| m.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("Unknown marketplace: {}", s))
    }
}
