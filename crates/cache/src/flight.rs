//! Single-flight rendering
//!
//! When several threads miss on the same signature at once, only the first
//! (the leader) renders. The others (followers) block until the leader
//! finishes and then share its artifact. If the leader fails, followers are
//! woken empty-handed and retry on their own.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};

use crate::artifact::CachedArtifact;
use crate::key::SignatureKey;

#[derive(Debug)]
enum Outcome {
    Running,
    Done(Arc<CachedArtifact>),
    Failed,
}

/// One in-progress render
#[derive(Debug)]
pub(crate) struct Flight {
    outcome: Mutex<Outcome>,
    finished: Condvar,
}

impl Flight {
    fn new() -> Self {
        Self {
            outcome: Mutex::new(Outcome::Running),
            finished: Condvar::new(),
        }
    }

    /// Block until the leader finishes; `None` if it failed
    pub(crate) fn wait(&self) -> Option<Arc<CachedArtifact>> {
        let mut outcome = self.outcome.lock();
        while matches!(*outcome, Outcome::Running) {
            self.finished.wait(&mut outcome);
        }
        match &*outcome {
            Outcome::Done(artifact) => Some(Arc::clone(artifact)),
            _ => None,
        }
    }

    fn finish(&self, result: Outcome) {
        *self.outcome.lock() = result;
        self.finished.notify_all();
    }
}

pub(crate) enum Role<'a> {
    Leader(FlightGuard<'a>),
    Follower(Arc<Flight>),
}

/// Table of renders currently in progress, one per signature
#[derive(Debug, Default)]
pub(crate) struct InFlight {
    flights: DashMap<Arc<SignatureKey>, Arc<Flight>>,
}

impl InFlight {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Become the leader for `key`, or follow the flight already running
    pub(crate) fn join(&self, key: &Arc<SignatureKey>) -> Role<'_> {
        match self.flights.entry(Arc::clone(key)) {
            Entry::Occupied(entry) => Role::Follower(Arc::clone(entry.get())),
            Entry::Vacant(entry) => {
                let flight = Arc::new(Flight::new());
                entry.insert(Arc::clone(&flight));
                Role::Leader(FlightGuard {
                    table: self,
                    key: Arc::clone(key),
                    flight,
                    finished: false,
                })
            }
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.flights.len()
    }
}

/// Leader's side of a flight
///
/// Dropping the guard without completing it (renderer error or panic)
/// fails the flight so followers never wait forever.
pub(crate) struct FlightGuard<'a> {
    table: &'a InFlight,
    key: Arc<SignatureKey>,
    flight: Arc<Flight>,
    finished: bool,
}

impl FlightGuard<'_> {
    pub(crate) fn complete(mut self, artifact: Arc<CachedArtifact>) {
        self.finish(Outcome::Done(artifact));
    }

    pub(crate) fn fail(mut self) {
        self.finish(Outcome::Failed);
    }

    fn finish(&mut self, outcome: Outcome) {
        if self.finished {
            return;
        }
        self.finished = true;
        // Unlist first so late arrivals start a fresh flight
        self.table
            .flights
            .remove_if(self.key.as_ref(), |_, flight| Arc::ptr_eq(flight, &self.flight));
        self.flight.finish(outcome);
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.finish(Outcome::Failed);
    }
}
