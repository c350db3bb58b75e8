//! Principals and plan-derived scheduling classes.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Subscription plan of a principal, as asserted by upstream middleware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PlanTier {
    #[default]
    Free,
    Pro,
}

impl PlanTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanTier::Free => "free",
            PlanTier::Pro => "pro",
        }
    }

    /// Queue class jobs from this plan are admitted into.
    pub fn queue_class(&self) -> QueueClass {
        match self {
            PlanTier::Free => QueueClass::Batch,
            PlanTier::Pro => QueueClass::Interactive,
        }
    }
}

impl fmt::Display for PlanTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PlanTier {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "free" => Ok(PlanTier::Free),
            "pro" => Ok(PlanTier::Pro),
            _ => Err(()),
        }
    }
}

/// Scheduler priority class. Interactive drains before batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueClass {
    Interactive,
    Batch,
}

impl QueueClass {
    /// Classes in dispatch-priority order.
    pub const ORDERED: &'static [QueueClass] = &[QueueClass::Interactive, QueueClass::Batch];

    pub fn as_str(&self) -> &'static str {
        match self {
            QueueClass::Interactive => "interactive",
            QueueClass::Batch => "batch",
        }
    }
}

impl fmt::Display for QueueClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An authenticated identity attached by upstream middleware.
///
/// The core never validates tokens; it trusts the verified principal id
/// handed to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    /// Verified principal id
    pub id: String,
    /// Subscription plan, used only to derive the queue class
    #[serde(default)]
    pub plan: PlanTier,
}

impl Principal {
    pub fn new(id: impl Into<String>, plan: PlanTier) -> Self {
        Self {
            id: id.into(),
            plan,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_to_queue_class() {
        assert_eq!(PlanTier::Free.queue_class(), QueueClass::Batch);
        assert_eq!(PlanTier::Pro.queue_class(), QueueClass::Interactive);
    }

    #[test]
    fn plan_parse_is_case_insensitive() {
        assert_eq!("PRO".parse::<PlanTier>().unwrap(), PlanTier::Pro);
        assert_eq!("free".parse::<PlanTier>().unwrap(), PlanTier::Free);
        assert!("enterprise".parse::<PlanTier>().is_err());
    }

    #[test]
    fn interactive_drains_first() {
        assert_eq!(QueueClass::ORDERED[0], QueueClass::Interactive);
    }
}
