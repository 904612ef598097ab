// Hops
// Directed edges between steps

use crate::row::same_name;

use serde::{Deserialize, Serialize};
use std::fmt;

/// What a hop carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HopKind {
    /// The primary row stream
    #[default]
    Main,
    /// Lookup rows the target reads on demand
    Info,
    /// Rows rejected by the source step
    Error,
}

impl fmt::Display for HopKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HopKind::Main => write!(f, "main"),
            HopKind::Info => write!(f, "info"),
            HopKind::Error => write!(f, "error"),
        }
    }
}

/// A directed edge between two steps
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hop {
    pub from: String,
    pub to: String,
    #[serde(default)]
    pub kind: HopKind,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl Hop {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            kind: HopKind::Main,
            enabled: true,
        }
    }

    pub fn info(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            kind: HopKind::Info,
            ..Self::new(from, to)
        }
    }

    pub fn error(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            kind: HopKind::Error,
            ..Self::new(from, to)
        }
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Whether the hop connects `from` to `to`, ignoring case
    pub fn connects(&self, from: &str, to: &str) -> bool {
        same_name(&self.from, from) && same_name(&self.to, to)
    }

    pub fn touches(&self, step: &str) -> bool {
        same_name(&self.from, step) || same_name(&self.to, step)
    }
}

impl fmt::Display for Hop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {} ({})", self.from, self.to, self.kind)?;
        if !self.enabled {
            write!(f, " [disabled]")?;
        }
        Ok(())
    }
}
