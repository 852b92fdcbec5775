//! Table-driven finite state machine.
//!
//! A machine is described by a constant table of `(from, to, handler)` triples.
//! [`lookup`] finds the handler registered for a pair of states and [`run`]
//! drives a [`Machine`] from its start state until a handler returns the end
//! state.
//!
//! The engine holds no state of its own. The table must not contain two
//! entries for the same pair: the first match wins and later ones are dead.

use std::fmt::Debug;
use std::future::Future;

/// One row of a transition table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition<S, H> {
    pub from: S,
    pub to: S,
    pub perform: H,
}

impl<S, H> Transition<S, H> {
    pub const fn new(from: S, to: S, perform: H) -> Self {
        Self { from, to, perform }
    }
}

/// Returned by [`run`] when a handler asks for a pair the table does not know.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("illegal state transition {from:?} -> {to:?}")]
pub struct IllegalTransition<S: Debug> {
    pub from: S,
    pub to: S,
}

/// A state machine whose behaviour is a transition table plus one operation
/// per handler.
pub trait Machine {
    type State: Copy + Eq + Debug + 'static;
    type Handler: Copy + Debug + 'static;

    /// Initial state. No handler runs "in" it.
    const START: Self::State;
    /// Terminal state. Reaching it stops [`run`].
    const END: Self::State;

    fn transitions(&self) -> &'static [Transition<Self::State, Self::Handler>];

    /// Performs `handler` and returns the state to move to next.
    fn perform(&mut self, handler: Self::Handler) -> impl Future<Output = Self::State>;
}

/// Finds the handler for `from -> to`, scanning `table` in order.
pub fn lookup<S, H>(from: S, to: S, table: &[Transition<S, H>]) -> Option<H>
where
    S: PartialEq + Copy,
    H: Copy,
{
    table
        .iter()
        .find(|t| t.from == from && t.to == to)
        .map(|t| t.perform)
}

/// Drives `machine` from `START -> first` until a handler returns `END`.
///
/// An unknown pair aborts the run. The caller decides what an illegal
/// transition means for the surrounding process.
pub async fn run<M: Machine>(
    machine: &mut M,
    first: M::State,
) -> Result<(), IllegalTransition<M::State>> {
    let table = machine.transitions();
    let mut from = M::START;
    let mut to = first;

    while to != M::END {
        let handler = lookup(from, to, table).ok_or(IllegalTransition { from, to })?;
        tracing::trace!(?from, ?to, ?handler, "fsm transition");

        from = to;
        to = machine.perform(handler).await;
    }

    Ok(())
}
