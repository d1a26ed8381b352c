use thiserror::Error;

/// Rejected before any simulation starts: the scenario or sweep request is
/// malformed and no draw would be meaningful.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InputError {
    #[error("normal distribution std dev must be >= 0, got {0}")]
    NegativeStdDev(f64),
    #[error("uniform distribution min {min} exceeds max {max}")]
    InvertedUniform { min: f64, max: f64 },
    #[error("event {event} references unknown event {reference}")]
    UnknownEventReference { event: String, reference: String },
    #[error("cycle in event start references involving {0}")]
    StartReferenceCycle(String),
    #[error("duplicate event id {0}")]
    DuplicateEventId(String),
    #[error("duplicate investment id {0}")]
    DuplicateInvestmentId(String),
    #[error("investment {investment} references unknown investment type {kind}")]
    UnknownInvestmentType { investment: String, kind: String },
    #[error("strategy list references unknown investment {0}")]
    UnknownStrategyInvestment(String),
    #[error("event {event} allocates to unknown investment {investment}")]
    UnknownAllocationInvestment { event: String, investment: String },
    #[error("spending strategy entry {0} is not a discretionary expense event")]
    NonDiscretionarySpending(String),
    #[error("event {event} allocation percentages sum to {sum}, expected 100")]
    AllocationSum { event: String, sum: f64 },
    #[error("birth year {birth} is not before start year {start}")]
    BirthAfterStart { birth: u32, start: u32 },
    #[error("sweep axis has no values")]
    EmptyAxis,
    #[error("sweep axis references unknown event {0}")]
    UnknownAxisEvent(String),
    #[error("allocation split axis requires a fixed two-asset allocation on event {0}")]
    AxisNotTwoAsset(String),
    #[error("simulation count must be > 0")]
    ZeroSimulations,
}

/// Per-draw precondition failure. Fatal for that draw only and never
/// retried; sibling draws in a batch are unaffected.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RunError {
    #[error("scenario has no cash investment to receive income")]
    MissingCashInvestment,
    #[error("event {0} lists no investments")]
    EmptyAllocation(String),
    #[error("could not resolve start year for event {0}")]
    UnresolvedEventStart(String),
}
