use std::fmt;
use std::str::FromStr;

use catalog_core::ScanPhase;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    Full,
    Delta,
    DetailRefresh,
}

impl SyncMode {
    pub const ALL: [SyncMode; 3] = [Self::Full, Self::Delta, Self::DetailRefresh];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Delta => "delta",
            Self::DetailRefresh => "details",
        }
    }

    /// Suffix of the unique chain name.
    pub fn chain_suffix(self) -> &'static str {
        match self {
            Self::Full => "sync",
            Self::Delta => "delta",
            Self::DetailRefresh => "details",
        }
    }

    pub fn steps(self) -> &'static [ChainStep] {
        match self {
            Self::Full => &[ChainStep::Seed, ChainStep::DetailRefresh],
            Self::Delta => &[ChainStep::DeltaImport],
            Self::DetailRefresh => &[ChainStep::DetailRefresh],
        }
    }
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncMode {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "full" | "sync" => Ok(Self::Full),
            "delta" => Ok(Self::Delta),
            "details" | "detail_refresh" => Ok(Self::DetailRefresh),
            other => Err(format!("unknown sync mode `{other}`")),
        }
    }
}

/// One heavy unit of work inside a chain. Playback throttling applies before each step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChainStep {
    Seed,
    DeltaImport,
    DetailRefresh,
}

impl ChainStep {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Seed => "seed",
            Self::DeltaImport => "delta_import",
            Self::DetailRefresh => "detail_refresh",
        }
    }

    pub fn phases(self) -> &'static [ScanPhase] {
        match self {
            Self::Seed | Self::DeltaImport => {
                &[ScanPhase::Live, ScanPhase::Movies, ScanPhase::Series]
            }
            Self::DetailRefresh => &[ScanPhase::Episodes],
        }
    }

    /// Whether the step scans only records changed since the last successful run.
    pub fn uses_floor(self) -> bool {
        matches!(self, Self::DeltaImport)
    }
}

impl fmt::Display for ChainStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A source plus a mode; its name is the uniqueness key in the scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SyncChain {
    pub source_key: String,
    pub mode: SyncMode,
}

impl SyncChain {
    pub fn new(source_key: impl Into<String>, mode: SyncMode) -> Self {
        Self {
            source_key: source_key.into(),
            mode,
        }
    }

    pub fn name(&self) -> String {
        chain_name(&self.source_key, self.mode)
    }

    pub fn steps(&self) -> &'static [ChainStep] {
        self.mode.steps()
    }
}

pub fn chain_name(source_key: &str, mode: SyncMode) -> String {
    format!("{source_key}_{}", mode.chain_suffix())
}
