//! Group-wide abort decision.
//!
//! A sibling that crosses the danger level does not abort on the spot. It
//! records the crossing cycle as `unstable_since` and every sibling, every
//! cycle, reduces the group's marks:
//!
//! ```text
//! abort  iff  current == min(unstable_since over marked siblings) + 1
//! ```
//!
//! Marks published in cycles before `current` are settled by the host
//! barrier and identical for every reader. A mark written concurrently
//! during `current` carries the value `current` itself, which can neither
//! lower a settled minimum nor equal `current - 1`, so it cannot change the
//! decision. Every sibling therefore aborts on the same cycle, one cycle
//! after the earliest crossing.
//!
//! Acting on an instantaneous "unstable" flag instead lets a flag raised
//! mid-cycle be seen by some siblings and not others, and the run
//! deadlocks on the siblings that did not abort.

use serde::Serialize;
use spikefuse_error::{FuseError, Result};
use spikefuse_types::Cycle;

use crate::group::SiblingGroup;

/// Outcome of one reduction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AbortDecision {
    Continue,
    Abort {
        /// Earliest crossing in the group.
        trigger_cycle: Cycle,
    },
}

impl AbortDecision {
    #[must_use]
    pub const fn is_abort(self) -> bool {
        matches!(self, Self::Abort { .. })
    }

    /// `Err(UnstableSpiking)` for an abort decided at `current`.
    pub fn into_result(self, current: Cycle) -> Result<()> {
        match self {
            Self::Continue => Ok(()),
            Self::Abort { trigger_cycle } => Err(FuseError::UnstableSpiking {
                cycle: current.get(),
                trigger_cycle: trigger_cycle.get(),
            }),
        }
    }
}

/// Reduce per-sibling instability marks into one decision for `current`.
pub fn reduce_marks<I>(marks: I, current: Cycle) -> AbortDecision
where
    I: IntoIterator<Item = Option<Cycle>>,
{
    match marks.into_iter().flatten().min() {
        Some(earliest) if earliest.next() == current => AbortDecision::Abort {
            trigger_cycle: earliest,
        },
        _ => AbortDecision::Continue,
    }
}

/// Stateless reducer over a [`SiblingGroup`].
#[derive(Debug, Clone, Copy, Default)]
pub struct AbortCoordinator;

impl AbortCoordinator {
    /// Decide for `current` from the group's published marks.
    pub fn reduce(self, group: &SiblingGroup, current: Cycle) -> Result<AbortDecision> {
        let decision = reduce_marks([group.min_unstable_since()?], current);
        if let AbortDecision::Abort { trigger_cycle } = decision {
            tracing::info!(
                target: "spikefuse.abort",
                cycle = current.get(),
                trigger_cycle = trigger_cycle.get(),
                siblings = group.len(),
                "group abort decided"
            );
        }
        Ok(decision)
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::danger::DangerState;
    use spikefuse_types::SiblingIndex;

    fn c(raw: u64) -> Cycle {
        Cycle::new(raw)
    }

    #[test]
    fn no_marks_continue() {
        assert_eq!(reduce_marks([None, None], c(10)), AbortDecision::Continue);
        assert_eq!(
            reduce_marks(std::iter::empty(), c(10)),
            AbortDecision::Continue
        );
    }

    #[test]
    fn aborts_exactly_one_cycle_after_earliest_mark() {
        let marks = [None, Some(c(50)), Some(c(53))];
        assert_eq!(reduce_marks(marks, c(50)), AbortDecision::Continue);
        assert_eq!(
            reduce_marks(marks, c(51)),
            AbortDecision::Abort {
                trigger_cycle: c(50)
            }
        );
        assert_eq!(reduce_marks(marks, c(52)), AbortDecision::Continue);
    }

    #[test]
    fn abort_converts_to_fault() {
        let fault = AbortDecision::Abort {
            trigger_cycle: c(50),
        }
        .into_result(c(51))
        .unwrap_err();
        assert_eq!(
            fault,
            FuseError::UnstableSpiking {
                cycle: 51,
                trigger_cycle: 50
            }
        );
        assert!(AbortDecision::Continue.into_result(c(51)).is_ok());
    }

    #[test]
    fn group_reduction_matches_mark_reduction() {
        let group = SiblingGroup::new(2);
        let marked = DangerState {
            risk: 1.3,
            unstable_since: Some(c(50)),
        };
        group
            .publish(SiblingIndex::new(0), c(50), &marked, 0)
            .unwrap();
        group
            .publish(SiblingIndex::new(1), c(50), &DangerState::default(), 0)
            .unwrap();

        let coordinator = AbortCoordinator;
        assert_eq!(
            coordinator.reduce(&group, c(50)).unwrap(),
            AbortDecision::Continue
        );
        assert!(coordinator.reduce(&group, c(51)).unwrap().is_abort());
    }

    proptest! {
        /// Every sibling reaches the same decision on every cycle, however
        /// much of the current cycle's concurrent marking it happens to see,
        /// and the first abort lands at `1 + min(unstable_since)`.
        #[test]
        fn every_view_agrees(
            crossings in prop::collection::vec(prop::option::of(0_u64..40), 1..6),
            visibility in prop::collection::vec(any::<bool>(), 6),
        ) {
            let earliest = crossings.iter().flatten().min().copied();
            let mut first_abort = None;

            for now in 0..45_u64 {
                let mut decisions = Vec::new();
                for (reader, _) in crossings.iter().enumerate() {
                    // Marks from earlier cycles are settled; marks made this
                    // cycle may or may not be visible to this reader.
                    let view = crossings.iter().enumerate().map(|(writer, mark)| match mark {
                        Some(m) if *m < now => Some(c(*m)),
                        Some(m) if *m == now && visibility[(reader + writer) % 6] => Some(c(*m)),
                        _ => None,
                    });
                    decisions.push(reduce_marks(view, c(now)));
                }
                prop_assert!(decisions.windows(2).all(|w| w[0] == w[1]));
                if first_abort.is_none() && decisions[0].is_abort() {
                    first_abort = Some(now);
                }
            }

            prop_assert_eq!(first_abort, earliest.map(|e| e + 1));
        }
    }
}
