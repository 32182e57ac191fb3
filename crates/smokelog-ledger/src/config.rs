use serde::{Deserialize, Serialize};

/// Which entries the running counter is recomputed over after a deletion.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CounterScope {
    /// Only the entries currently loaded in memory.
    #[default]
    Loaded,
    /// Every entry in the store.
    History,
}

impl std::fmt::Display for CounterScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Loaded => write!(f, "loaded"),
            Self::History => write!(f, "history"),
        }
    }
}

impl std::str::FromStr for CounterScope {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "loaded" => Ok(Self::Loaded),
            "history" => Ok(Self::History),
            other => Err(format!("unknown counter scope: {other}")),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct LedgerConfig {
    pub counter_scope: CounterScope,
}
