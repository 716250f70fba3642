//! Reactive holder for the active session and its transcript.
//!
//! State lives inside a `watch` channel: every operation is applied in one
//! `send_modify`/`send_if_modified` call, so subscribers only ever observe
//! whole snapshots.

use std::sync::Arc;

use shared::domain::{Message, SessionId};
use tokio::sync::watch;
use tracing::debug;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionSnapshot {
    pub current_session_id: Option<SessionId>,
    pub messages: Vec<Message>,
    pub project_context: Option<String>,
    pub domain: Option<String>,
    /// Bumped whenever the active session changes or is cleared.
    pub epoch: u64,
}

/// Identity of the session a request was issued for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionTicket {
    pub session_id: Option<SessionId>,
    pub epoch: u64,
}

impl SessionSnapshot {
    fn matches(&self, ticket: &SessionTicket) -> bool {
        self.epoch == ticket.epoch && self.current_session_id == ticket.session_id
    }
}

#[derive(Debug, Clone)]
pub struct SessionStore {
    state: Arc<watch::Sender<SessionSnapshot>>,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore {
    pub fn new() -> Self {
        let (state, _) = watch::channel(SessionSnapshot::default());
        Self {
            state: Arc::new(state),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.state.subscribe()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.state.borrow().clone()
    }

    pub fn current_session_id(&self) -> Option<SessionId> {
        self.state.borrow().current_session_id.clone()
    }

    pub fn ticket(&self) -> SessionTicket {
        let state = self.state.borrow();
        SessionTicket {
            session_id: state.current_session_id.clone(),
            epoch: state.epoch,
        }
    }

    pub fn is_current(&self, ticket: &SessionTicket) -> bool {
        self.state.borrow().matches(ticket)
    }

    /// Switching to a different session (or to none) drops the transcript and
    /// the project context. Adopting an id while no session is active keeps it: those messages are
    /// the exchange that created the session.
    pub fn set_current_session(&self, session_id: Option<SessionId>) {
        self.state
            .send_if_modified(|state| switch_session(state, session_id));
    }

    /// Like [`set_current_session`](Self::set_current_session), but only if
    /// `ticket` still names the active session. Returns the ticket for the
    /// session that is active afterwards, or `None` when the ticket was stale.
    pub fn set_current_session_for(
        &self,
        ticket: &SessionTicket,
        session_id: Option<SessionId>,
    ) -> Option<SessionTicket> {
        let mut next = None;
        self.state.send_if_modified(|state| {
            if !state.matches(ticket) {
                return false;
            }
            let changed = switch_session(state, session_id);
            next = Some(SessionTicket {
                session_id: state.current_session_id.clone(),
                epoch: state.epoch,
            });
            changed
        });
        next
    }

    pub fn clear_session(&self) {
        self.state.send_modify(|state| {
            state.current_session_id = None;
            state.messages.clear();
            state.project_context = None;
            state.domain = None;
            state.epoch += 1;
        });
    }

    /// Records the context fields that are `Some`; `None` leaves a field as is.
    pub fn set_session_context(&self, project_context: Option<String>, domain: Option<String>) {
        self.state.send_if_modified(|state| {
            let mut changed = false;
            if let Some(project_context) = project_context {
                changed |= state.project_context.as_ref() != Some(&project_context);
                state.project_context = Some(project_context);
            }
            if let Some(domain) = domain {
                changed |= state.domain.as_ref() != Some(&domain);
                state.domain = Some(domain);
            }
            changed
        });
    }

    pub fn append_message(&self, message: Message) {
        self.state.send_modify(|state| state.messages.push(message));
    }

    pub fn replace_messages(&self, messages: Vec<Message>) {
        self.state.send_modify(|state| state.messages = messages);
    }

    /// Appends only if `ticket` still names the active session.
    pub fn append_message_for(&self, ticket: &SessionTicket, message: Message) -> bool {
        self.state.send_if_modified(|state| {
            if !state.matches(ticket) {
                return false;
            }
            state.messages.push(message);
            true
        })
    }

    /// Replaces the transcript with `f(current)` only if `ticket` still names
    /// the active session; the check and the write happen under one lock.
    pub fn replace_messages_with<F>(&self, ticket: &SessionTicket, f: F) -> bool
    where
        F: FnOnce(&[Message]) -> Vec<Message>,
    {
        self.state.send_if_modified(|state| {
            if !state.matches(ticket) {
                return false;
            }
            state.messages = f(&state.messages);
            true
        })
    }

    pub fn replace_messages_for(&self, ticket: &SessionTicket, messages: Vec<Message>) -> bool {
        self.replace_messages_with(ticket, |_| messages)
    }
}

fn switch_session(state: &mut SessionSnapshot, session_id: Option<SessionId>) -> bool {
    if state.current_session_id == session_id {
        return false;
    }
    let adopting = state.current_session_id.is_none() && session_id.is_some();
    if !adopting {
        state.messages.clear();
        state.project_context = None;
        state.domain = None;
    }
    debug!(
        from = ?state.current_session_id,
        to = ?session_id,
        adopting,
        "session store: switching session"
    );
    state.current_session_id = session_id;
    state.epoch += 1;
    true
}

#[cfg(test)]
#[path = "tests/store_tests.rs"]
mod tests;
