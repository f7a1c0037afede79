// Append Invariants
//
// Invariants are pure rules evaluated against a proposed append
// before any state changes. A violation rejects the call outright.

use crate::feed::{Identity, Timestamp};
use crate::oracle::FeedError;

/// Everything a rule may look at when judging an append.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppendContext {
    pub writer: Option<Identity>,
    pub caller: Identity,
    pub date: Timestamp,
    pub now: Timestamp,
    pub last_date: Option<Timestamp>,
}

/// Result of invariant evaluation.
#[derive(Debug)]
pub enum InvariantResult {
    Pass,
    Fail(FeedError),
}

/// Trait implemented by all invariants.
///
/// Invariants must be:
/// - Pure
/// - Deterministic
/// - Side-effect free
pub trait Invariant: Send + Sync {
    fn name(&self) -> &'static str;

    fn validate(&self, ctx: &AppendContext) -> InvariantResult;
}

/// Appends require a configured writer.
pub struct WriterInitialized;

impl Invariant for WriterInitialized {
    fn name(&self) -> &'static str {
        "writer-initialized"
    }

    fn validate(&self, ctx: &AppendContext) -> InvariantResult {
        match ctx.writer {
            Some(_) => InvariantResult::Pass,
            None => InvariantResult::Fail(FeedError::NotInitialized),
        }
    }
}

/// Only the writer may append.
pub struct AuthorizedWriter;

impl Invariant for AuthorizedWriter {
    fn name(&self) -> &'static str {
        "authorized-writer"
    }

    fn validate(&self, ctx: &AppendContext) -> InvariantResult {
        match ctx.writer {
            Some(writer) if writer != ctx.caller => {
                InvariantResult::Fail(FeedError::Unauthorized { caller: ctx.caller })
            }
            _ => InvariantResult::Pass,
        }
    }
}

/// No record may be dated after the time it is appended.
pub struct NotFutureDated;

impl Invariant for NotFutureDated {
    fn name(&self) -> &'static str {
        "not-future-dated"
    }

    fn validate(&self, ctx: &AppendContext) -> InvariantResult {
        if ctx.date > ctx.now {
            InvariantResult::Fail(FeedError::FutureDate {
                date: ctx.date,
                now: ctx.now,
            })
        } else {
            InvariantResult::Pass
        }
    }
}

/// Dates strictly increase in append order.
pub struct StrictlyIncreasingDate;

impl Invariant for StrictlyIncreasingDate {
    fn name(&self) -> &'static str {
        "strictly-increasing-date"
    }

    fn validate(&self, ctx: &AppendContext) -> InvariantResult {
        match ctx.last_date {
            Some(last) if ctx.date <= last => InvariantResult::Fail(FeedError::NonMonotonicDate {
                date: ctx.date,
                last,
            }),
            _ => InvariantResult::Pass,
        }
    }
}

/// Invariant engine that evaluates a set of invariants.
#[derive(Default)]
pub struct InvariantEngine {
    invariants: Vec<Box<dyn Invariant>>,
}

impl InvariantEngine {
    /// Create an engine with no rules.
    pub fn new() -> Self {
        Self {
            invariants: Vec::new(),
        }
    }

    /// The rules every feed store enforces, in precedence order.
    pub fn standard() -> Self {
        let mut engine = Self::new();
        engine.register(WriterInitialized);
        engine.register(AuthorizedWriter);
        engine.register(NotFutureDated);
        engine.register(StrictlyIncreasingDate);
        engine
    }

    /// Register an invariant.
    pub fn register<I: Invariant + 'static>(&mut self, invariant: I) {
        self.invariants.push(Box::new(invariant));
    }

    /// Evaluate all invariants.
    ///
    /// Stops at the first failure.
    pub fn evaluate(&self, ctx: &AppendContext) -> Result<(), FeedError> {
        for invariant in &self.invariants {
            match invariant.validate(ctx) {
                InvariantResult::Pass => continue,
                InvariantResult::Fail(err) => {
                    tracing::debug!(invariant = invariant.name(), error = %err, "append rejected");
                    return Err(err);
                }
            }
        }
        Ok(())
    }
}
