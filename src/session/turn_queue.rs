//! Per-call turn scheduling: at most one pipeline invocation in flight, later
//! utterances wait in arrival order.

use std::collections::VecDeque;
use tokio::task::AbortHandle;

struct InFlight {
    turn: u64,
    abort: AbortHandle,
}

pub struct TurnQueue {
    pending: VecDeque<String>,
    in_flight: Option<InFlight>,
    next_turn: u64,
}

impl TurnQueue {
    pub fn new() -> Self {
        Self {
            pending: VecDeque::new(),
            in_flight: None,
            next_turn: 1,
        }
    }

    pub fn push(&mut self, transcript: String) {
        self.pending.push_back(transcript);
    }

    #[cfg(test)]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn in_flight_turn(&self) -> Option<u64> {
        self.in_flight.as_ref().map(|in_flight| in_flight.turn)
    }

    /// Start the oldest pending utterance if nothing is running.
    ///
    /// `start` receives the new turn number and the transcript and returns the
    /// handle used to abandon the invocation later.
    pub fn start_next<F>(&mut self, start: F) -> Option<u64>
    where
        F: FnOnce(u64, String) -> AbortHandle,
    {
        if self.in_flight.is_some() {
            return None;
        }
        let transcript = self.pending.pop_front()?;

        let turn = self.next_turn;
        self.next_turn += 1;
        let abort = start(turn, transcript);
        self.in_flight = Some(InFlight { turn, abort });
        Some(turn)
    }

    /// Mark `turn` finished. Returns false for a turn that is not the one in flight.
    pub fn complete(&mut self, turn: u64) -> bool {
        if self.in_flight_turn() != Some(turn) {
            return false;
        }
        self.in_flight = None;
        true
    }

    /// Abort the running invocation and forget queued utterances.
    ///
    /// Returns how many turns were dropped, including the aborted one.
    pub fn abandon(&mut self) -> usize {
        let mut dropped = self.pending.len();
        self.pending.clear();
        if let Some(in_flight) = self.in_flight.take() {
            in_flight.abort.abort();
            dropped += 1;
        }
        dropped
    }
}

impl Default for TurnQueue {
    fn default() -> Self {
        Self::new()
    }
}
