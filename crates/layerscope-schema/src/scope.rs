use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Which view of an image a resolver answers from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Scope {
    /// The merged view: one visible version per path.
    #[default]
    Squashed,
    /// Every layer's version of a path that no higher layer deletes.
    AllLayers,
}

impl Scope {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Squashed => "squashed",
            Self::AllLayers => "all-layers",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "squashed" => Ok(Self::Squashed),
            "all-layers" | "alllayers" | "all" => Ok(Self::AllLayers),
            other => Err(format!("unknown scope '{other}' (expected squashed or all-layers)")),
        }
    }
}
