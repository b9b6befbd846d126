//! Mastership resolution.
//!
//! Decides, for one attribute of one identity, which source's value is
//! authoritative. Resolution is a pure function of the configured sources and
//! the values each source currently reports; conflicts are returned as records
//! and never abort resolution.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use jml_core::{Correlated, CorrelationId, IdentityId, ResolutionId, SourceId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::conflict::{ConflictDetection, ConflictKind};
use super::source::{
    AttributeMastershipDeclaration, AttributeSource, MastershipKind, NullPolicy, PrecedenceKind,
    PrecedenceStrategy, TieBreakPolicy,
};
use crate::error::{EngineError, Result};
use crate::identity::{IdentitySnapshot, SourceValue};
use crate::values::values_equal;

// ============================================================================
// Domain Types
// ============================================================================

/// One source competing for an attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MastershipCandidate {
    pub source_id: SourceId,
    pub declaration: AttributeMastershipDeclaration,
    pub strategy: PrecedenceStrategy,
    /// Null when the source has not reported a value.
    pub value: Value,
    pub written_at: Option<DateTime<Utc>>,
}

/// Pluggable ordering for the CUSTOM_RULE strategy and CUSTOM tie-break.
///
/// `Ordering::Less` means `a` ranks ahead of `b`.
pub trait MastershipComparator: Send + Sync {
    fn compare(&self, a: &MastershipCandidate, b: &MastershipCandidate) -> Ordering;
}

/// What separated the winner from the other candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecidedBy {
    ExclusiveMaster,
    Strategy,
    TieBreak,
    SourceOrder,
}

impl fmt::Display for DecidedBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecidedBy::ExclusiveMaster => write!(f, "EXCLUSIVE_MASTER"),
            DecidedBy::Strategy => write!(f, "STRATEGY"),
            DecidedBy::TieBreak => write!(f, "TIE_BREAK"),
            DecidedBy::SourceOrder => write!(f, "SOURCE_ORDER"),
        }
    }
}

/// Immutable outcome of resolving one attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MastershipResolution {
    pub id: ResolutionId,
    pub identity_id: IdentityId,
    pub attribute: String,
    pub winning_source: SourceId,
    pub declaration: AttributeMastershipDeclaration,
    /// Winner's value after the null policy was applied.
    pub resolved_value: Value,
    pub strategy_applied: PrecedenceKind,
    pub decided_by: DecidedBy,
    pub candidates: Vec<MastershipCandidate>,
    pub conflicts: Vec<ConflictDetection>,
    pub correlation_id: CorrelationId,
    pub resolved_at: DateTime<Utc>,
}

impl MastershipResolution {
    #[must_use]
    pub fn is_winner(&self, source_id: &SourceId) -> bool {
        &self.winning_source == source_id
    }
}

impl Correlated for MastershipResolution {
    fn correlation_id(&self) -> &CorrelationId {
        &self.correlation_id
    }
}

/// Everything one resolution reads.
#[derive(Debug, Clone, Copy)]
pub struct ResolutionInput<'a> {
    pub identity_id: &'a IdentityId,
    pub attribute: &'a str,
    pub identity: Option<&'a IdentitySnapshot>,
    pub sources: &'a [AttributeSource],
    pub values: &'a [SourceValue],
    pub correlation_id: &'a CorrelationId,
    pub now: DateTime<Utc>,
}

// ============================================================================
// Resolver
// ============================================================================

/// Mastership resolver.
#[derive(Clone, Default)]
pub struct MastershipResolver {
    comparator: Option<Arc<dyn MastershipComparator>>,
}

impl MastershipResolver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_comparator(comparator: Arc<dyn MastershipComparator>) -> Self {
        Self {
            comparator: Some(comparator),
        }
    }

    /// Active, in-scope sources declaring the attribute, in source id order.
    #[must_use]
    pub fn candidates(&self, input: &ResolutionInput<'_>) -> Vec<MastershipCandidate> {
        let mut candidates: Vec<_> = input
            .sources
            .iter()
            .filter(|s| s.active && s.scope.covers(input.attribute, input.identity))
            .filter_map(|s| {
                let declaration = s.declaration_for(input.attribute)?;
                let reported = input.values.iter().find(|v| v.source_id == s.id);
                Some(MastershipCandidate {
                    source_id: s.id.clone(),
                    declaration: declaration.clone(),
                    strategy: s.strategy,
                    value: reported.map(|v| v.value.clone()).unwrap_or(Value::Null),
                    written_at: reported.map(|v| v.written_at),
                })
            })
            .collect();
        candidates.sort_by(|a, b| a.source_id.cmp(&b.source_id));
        candidates
    }

    /// Resolve the authoritative value of one attribute.
    ///
    /// # Errors
    ///
    /// - `NoMasteringSource` when no active source declares the attribute.
    /// - `NullRejected` when the winner reports null under a REJECT policy.
    pub fn resolve(&self, input: &ResolutionInput<'_>) -> Result<MastershipResolution> {
        let candidates = self.candidates(input);
        if candidates.is_empty() {
            return Err(EngineError::NoMasteringSource {
                attribute: input.attribute.to_string(),
            });
        }

        let mut conflicts = Vec::new();
        let exclusive: Vec<&MastershipCandidate> = candidates
            .iter()
            .filter(|c| c.declaration.kind == MastershipKind::ExclusiveMaster)
            .collect();

        let (winner, strategy_applied, decided_by) = match exclusive.as_slice() {
            [only] => (*only, only.strategy.kind, DecidedBy::ExclusiveMaster),
            [_, _, ..] => {
                conflicts.push(self.conflict(
                    input,
                    ConflictKind::DuplicateExclusiveMaster,
                    &exclusive,
                ));
                let governing = strongest(&exclusive);
                let tie_break = self.tie_break(
                    governing.strategy.conflict_resolution,
                    input,
                    &exclusive,
                    &mut conflicts,
                );
                let (winner, decided_by) = pick(&exclusive, |_, _| Ordering::Equal, &tie_break);
                (winner, governing.strategy.kind, decided_by)
            }
            [] => {
                let preferred: Vec<&MastershipCandidate> = candidates
                    .iter()
                    .filter(|c| c.declaration.kind == MastershipKind::PreferredMaster)
                    .collect();
                let pool = if preferred.is_empty() {
                    candidates.iter().collect()
                } else {
                    preferred
                };
                self.rank(input, &pool, &mut conflicts)
            }
        };

        let resolved_value = match (&winner.value, &winner.declaration.null_policy) {
            (Value::Null, NullPolicy::Reject) => {
                return Err(EngineError::NullRejected {
                    attribute: input.attribute.to_string(),
                    source_id: winner.source_id.clone(),
                })
            }
            (Value::Null, NullPolicy::Default(default)) => default.clone(),
            (value, _) => value.clone(),
        };

        tracing::debug!(
            identity_id = %input.identity_id,
            attribute = input.attribute,
            winning_source = %winner.source_id,
            decided_by = %decided_by,
            conflicts = conflicts.len(),
            "Mastership resolved"
        );

        Ok(MastershipResolution {
            id: ResolutionId::new(),
            identity_id: input.identity_id.clone(),
            attribute: input.attribute.to_string(),
            winning_source: winner.source_id.clone(),
            declaration: winner.declaration.clone(),
            resolved_value,
            strategy_applied,
            decided_by,
            candidates: candidates.clone(),
            conflicts,
            correlation_id: input.correlation_id.clone(),
            resolved_at: input.now,
        })
    }

    /// Rank non-exclusive candidates by the governing strategy.
    fn rank<'c>(
        &self,
        input: &ResolutionInput<'_>,
        pool: &[&'c MastershipCandidate],
        conflicts: &mut Vec<ConflictDetection>,
    ) -> (&'c MastershipCandidate, PrecedenceKind, DecidedBy) {
        let governing = strongest(pool);

        let mismatched: Vec<&MastershipCandidate> = pool
            .iter()
            .copied()
            .filter(|c| c.strategy.kind != governing.strategy.kind)
            .collect();
        if !mismatched.is_empty() {
            let mut involved = mismatched;
            involved.push(governing);
            conflicts.push(self.conflict(input, ConflictKind::StrategyMismatch, &involved));
        }

        let mut kind = governing.strategy.kind;
        if kind == PrecedenceKind::CustomRule && self.comparator.is_none() {
            conflicts.push(self.conflict(input, ConflictKind::MissingComparator, pool));
            kind = PrecedenceKind::PriorityNumber;
        }

        let primary = |a: &MastershipCandidate, b: &MastershipCandidate| match kind {
            PrecedenceKind::PriorityNumber => by_precedence(a, b),
            PrecedenceKind::TimestampFreshness => by_freshness(a, b),
            PrecedenceKind::TrustScore => by_trust(a, b),
            PrecedenceKind::CustomRule => self
                .comparator
                .as_ref()
                .map_or(Ordering::Equal, |c| c.compare(a, b)),
        };

        let best = pool
            .iter()
            .copied()
            .min_by(|a, b| primary(*a, *b))
            .unwrap_or(governing);
        let tied: Vec<&MastershipCandidate> = pool
            .iter()
            .copied()
            .filter(|c| primary(*c, best) == Ordering::Equal)
            .collect();
        if tied.len() > 1 && tied.iter().any(|c| !values_equal(&c.value, &best.value)) {
            conflicts.push(self.conflict(input, ConflictKind::PrecedenceTie, &tied));
        }

        let tie_break =
            self.tie_break(governing.strategy.conflict_resolution, input, pool, conflicts);
        let (winner, decided_by) = pick(pool, primary, &tie_break);
        (winner, kind, decided_by)
    }

    /// Ordering for the configured tie-break policy.
    fn tie_break(
        &self,
        policy: TieBreakPolicy,
        input: &ResolutionInput<'_>,
        involved: &[&MastershipCandidate],
        conflicts: &mut Vec<ConflictDetection>,
    ) -> impl Fn(&MastershipCandidate, &MastershipCandidate) -> Ordering {
        let comparator = match policy {
            TieBreakPolicy::Custom if self.comparator.is_none() => {
                if !conflicts
                    .iter()
                    .any(|c| c.kind == ConflictKind::MissingComparator)
                {
                    conflicts.push(self.conflict(
                        input,
                        ConflictKind::MissingComparator,
                        involved,
                    ));
                }
                None
            }
            TieBreakPolicy::Custom => self.comparator.clone(),
            _ => None,
        };
        move |a: &MastershipCandidate, b: &MastershipCandidate| match (policy, &comparator) {
            (TieBreakPolicy::MostRecent, _) => by_freshness(a, b),
            (TieBreakPolicy::HighestTrust, _) => by_trust(a, b),
            (TieBreakPolicy::Custom, Some(c)) => c.compare(a, b),
            _ => by_precedence(a, b),
        }
    }

    fn conflict(
        &self,
        input: &ResolutionInput<'_>,
        kind: ConflictKind,
        involved: &[&MastershipCandidate],
    ) -> ConflictDetection {
        tracing::warn!(
            identity_id = %input.identity_id,
            attribute = input.attribute,
            kind = %kind,
            sources = involved.len(),
            "Mastership conflict detected"
        );
        ConflictDetection::open(
            input.identity_id.clone(),
            input.attribute,
            kind,
            involved.iter().map(|c| c.source_id.clone()).collect(),
            input.correlation_id.clone(),
            input.now,
        )
    }
}

/// Candidate with the strongest (lowest) precedence, source id breaking ties.
fn strongest<'c>(pool: &[&'c MastershipCandidate]) -> &'c MastershipCandidate {
    let mut best = pool[0];
    for candidate in &pool[1..] {
        if by_precedence(candidate, best).then_with(|| candidate.source_id.cmp(&best.source_id))
            == Ordering::Less
        {
            best = *candidate;
        }
    }
    best
}

/// Pick the winner by primary key, then tie-break, then source id.
fn pick<'c, P, T>(
    pool: &[&'c MastershipCandidate],
    primary: P,
    tie_break: &T,
) -> (&'c MastershipCandidate, DecidedBy)
where
    P: Fn(&MastershipCandidate, &MastershipCandidate) -> Ordering,
    T: Fn(&MastershipCandidate, &MastershipCandidate) -> Ordering,
{
    let mut ranked: Vec<&MastershipCandidate> = pool.to_vec();
    ranked.sort_by(|a, b| {
        primary(*a, *b)
            .then_with(|| tie_break(*a, *b))
            .then_with(|| a.source_id.cmp(&b.source_id))
    });
    let winner = ranked[0];
    let decided_by = match ranked.get(1).copied() {
        None => DecidedBy::Strategy,
        Some(runner_up) if primary(winner, runner_up) != Ordering::Equal => DecidedBy::Strategy,
        Some(runner_up) if tie_break(winner, runner_up) != Ordering::Equal => DecidedBy::TieBreak,
        Some(_) => DecidedBy::SourceOrder,
    };
    (winner, decided_by)
}

fn by_precedence(a: &MastershipCandidate, b: &MastershipCandidate) -> Ordering {
    a.declaration.precedence.cmp(&b.declaration.precedence)
}

/// Newer first; unreported values last.
fn by_freshness(a: &MastershipCandidate, b: &MastershipCandidate) -> Ordering {
    b.written_at.cmp(&a.written_at)
}

fn by_trust(a: &MastershipCandidate, b: &MastershipCandidate) -> Ordering {
    b.declaration.trust_level.cmp(&a.declaration.trust_level)
}

// ============================================================================
// Tests
// ============================================================================
