/// Orchestrator phase definitions
///
/// The orchestrator only ever moves forward through these phases.
use std::fmt;

/// Represents the current phase of a crawl run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CrawlPhase {
    /// Seed cells are being parsed and written to the frontier
    Seeding,

    /// Results are persisted and new work is pulled from the frontier
    Running,

    /// The frontier has run dry; in-flight results are still persisted
    Draining,

    /// The admission controller reported idle; the run is over
    Terminated,
}

impl CrawlPhase {
    /// Returns true if the orchestrator may still pull work in this phase
    pub fn pulls_work(&self) -> bool {
        matches!(self, Self::Running)
    }

    /// Returns true if this is the final phase
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Terminated)
    }

    /// Returns true if moving from `self` to `next` is allowed
    ///
    /// Transitions are linear: each phase may only advance to the one
    /// directly after it.
    pub fn can_transition_to(&self, next: CrawlPhase) -> bool {
        matches!(
            (self, next),
            (Self::Seeding, Self::Running)
                | (Self::Running, Self::Draining)
                | (Self::Draining, Self::Terminated)
        )
    }
}

impl fmt::Display for CrawlPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Seeding => "seeding",
            Self::Running => "running",
            Self::Draining => "draining",
            Self::Terminated => "terminated",
        };
        write!(f, "{}", name)
    }
}
