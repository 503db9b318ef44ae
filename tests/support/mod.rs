//! Shared helpers for integration tests.

#![allow(dead_code)]

pub mod scripted;
pub mod socket_guard;

use std::sync::{Arc, Mutex};

use transfer_core::{ProgressEvent, RequestState};

/// Collects every progress event delivered to an observer.
#[derive(Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<ProgressEvent>>>,
}

impl EventLog {
    /// Observer closure that appends to this log.
    pub fn observer(&self) -> impl Fn(&ProgressEvent) + Send + Sync + 'static {
        let events = Arc::clone(&self.events);
        move |event| events.lock().unwrap().push(*event)
    }

    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn states(&self) -> Vec<RequestState> {
        self.events().iter().map(|e| e.state).collect()
    }
}
