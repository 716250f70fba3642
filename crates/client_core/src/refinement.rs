//! Refine-use-case state machine.
//!
//! One refinement may be in flight at a time across the whole engine:
//! `Idle → Requesting → Settling → Reloading → Idle`. The slot is taken by
//! [`RefinementCoordinator::begin`] and released when the returned
//! [`RefinementTicket`] is dropped, whichever way the flow ends.

use std::sync::Arc;

use serde_json::Value;
use shared::{
    domain::{Message, UseCaseId},
    protocol::RefinementRequest,
};
use tokio::sync::watch;
use tracing::debug;

use crate::{error::RefinementError, normalizer::apply_refinement};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RefinementPhase {
    #[default]
    Idle,
    Requesting,
    Settling,
    Reloading,
}

impl RefinementPhase {
    fn next(self) -> Self {
        match self {
            RefinementPhase::Idle => RefinementPhase::Idle,
            RefinementPhase::Requesting => RefinementPhase::Settling,
            RefinementPhase::Settling | RefinementPhase::Reloading => RefinementPhase::Reloading,
        }
    }

    pub fn is_busy(self) -> bool {
        self != RefinementPhase::Idle
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveRefinement {
    pub request: RefinementRequest,
    pub phase: RefinementPhase,
}

#[derive(Debug, Clone)]
pub struct RefinementCoordinator {
    slot: Arc<watch::Sender<Option<ActiveRefinement>>>,
}

impl Default for RefinementCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl RefinementCoordinator {
    pub fn new() -> Self {
        let (slot, _) = watch::channel(None);
        Self {
            slot: Arc::new(slot),
        }
    }

    /// Claims the single refinement slot. Fails without side effects while
    /// another refinement (for this or any other use case) is in flight.
    pub fn begin(&self, request: RefinementRequest) -> Result<RefinementTicket, RefinementError> {
        let mut in_flight = None;
        self.slot.send_if_modified(|slot| {
            if let Some(active) = slot {
                in_flight = Some(active.request.use_case_id.clone());
                return false;
            }
            *slot = Some(ActiveRefinement {
                request: request.clone(),
                phase: RefinementPhase::Requesting,
            });
            true
        });

        if let Some(in_flight) = in_flight {
            return Err(RefinementError::InFlight {
                requested: request.use_case_id,
                in_flight,
            });
        }

        debug!(use_case_id = %request.use_case_id, kind = %request.kind, "refinement: slot claimed");
        Ok(RefinementTicket {
            slot: Arc::clone(&self.slot),
        })
    }

    pub fn current(&self) -> Option<ActiveRefinement> {
        self.slot.borrow().clone()
    }

    pub fn phase(&self, use_case_id: &UseCaseId) -> RefinementPhase {
        match self.slot.borrow().as_ref() {
            Some(active) if &active.request.use_case_id == use_case_id => active.phase,
            _ => RefinementPhase::Idle,
        }
    }

    pub fn is_busy(&self) -> bool {
        self.slot.borrow().is_some()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<ActiveRefinement>> {
        self.slot.subscribe()
    }
}

#[derive(Debug)]
pub struct RefinementTicket {
    slot: Arc<watch::Sender<Option<ActiveRefinement>>>,
}

impl RefinementTicket {
    pub fn phase(&self) -> RefinementPhase {
        self.slot
            .borrow()
            .as_ref()
            .map(|active| active.phase)
            .unwrap_or_default()
    }

    /// Moves to the following phase and returns it.
    pub fn advance(&self) -> RefinementPhase {
        let mut phase = RefinementPhase::Idle;
        self.slot.send_if_modified(|slot| {
            let Some(active) = slot.as_mut() else {
                return false;
            };
            let next = active.phase.next();
            phase = next;
            if next == active.phase {
                return false;
            }
            active.phase = next;
            true
        });
        phase
    }
}

impl Drop for RefinementTicket {
    fn drop(&mut self) {
        self.slot.send_if_modified(|slot| slot.take().is_some());
    }
}

/// Applies a refinement payload to every copy of `use_case_id` in the
/// transcript. Used when no session is active and nothing can be re-fetched.
pub fn patch_transcript(
    messages: &[Message],
    use_case_id: &UseCaseId,
    refined: &Value,
) -> Vec<Message> {
    messages
        .iter()
        .map(|message| {
            let Some(refs) = message.use_case_refs.as_ref() else {
                return message.clone();
            };
            let mut patched = message.clone();
            patched.use_case_refs = Some(
                refs.iter()
                    .map(|use_case| {
                        if use_case.id.as_ref() == Some(use_case_id) {
                            apply_refinement(use_case, refined)
                        } else {
                            use_case.clone()
                        }
                    })
                    .collect(),
            );
            patched
        })
        .collect()
}

#[cfg(test)]
#[path = "tests/refinement_tests.rs"]
mod tests;
