//! Fetch tickets track one outstanding asynchronous operation.

use crate::{Epoch, RequestKey};

/// Where a [FetchTicket] is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TicketState {
    /// The operation has been issued and has not reported back.
    InFlight,

    /// The operation reported back and its result was accepted.
    Completed,

    /// The operation was abandoned, any result it produces is ignored.
    Cancelled,
}

/// One outstanding asynchronous operation.
///
/// Tickets are owned by the module that issued the operation and are
/// dropped once they leave the [TicketState::InFlight] state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTicket {
    /// The resource being fetched. `None` for parent level fetches.
    pub key: Option<RequestKey>,

    /// The generation the operation was issued under, if it belongs
    /// to a fan-out batch.
    pub epoch: Option<Epoch>,

    /// Current state of the operation.
    pub state: TicketState,
}

impl FetchTicket {
    /// A new in-flight ticket.
    pub fn new(key: Option<RequestKey>) -> Self {
        Self {
            key,
            epoch: None,
            state: TicketState::InFlight,
        }
    }

    /// A new in-flight ticket belonging to a fan-out batch.
    pub fn tagged(key: RequestKey, epoch: Epoch) -> Self {
        Self {
            key: Some(key),
            epoch: Some(epoch),
            state: TicketState::InFlight,
        }
    }

    /// Is the operation still outstanding?
    pub fn is_in_flight(&self) -> bool {
        self.state == TicketState::InFlight
    }

    /// Mark the operation completed.
    /// Returns false if the ticket had already left the in-flight state.
    pub fn complete(&mut self) -> bool {
        self.transition(TicketState::Completed)
    }

    /// Mark the operation cancelled.
    /// Returns false if the ticket had already left the in-flight state.
    pub fn cancel(&mut self) -> bool {
        self.transition(TicketState::Cancelled)
    }

    fn transition(&mut self, to: TicketState) -> bool {
        if !self.is_in_flight() {
            return false;
        }
        self.state = to;
        true
    }
}
