//! Registry of the calls a message pump still owns.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::call::{lock, CallId, CallObject};

/// Owns every call object from creation until the pump releases it.
///
/// The map lock is never held while a call runs: lookups hand out clones of
/// the `Arc` and bulk operations collect before acting.
#[derive(Default)]
pub struct OutstandingCallTracker {
    calls: Mutex<HashMap<CallId, Arc<dyn CallObject>>>,
}

impl OutstandingCallTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_call(&self, call: Arc<dyn CallObject>) {
        let id = call.id();
        if lock(&self.calls).insert(id, call).is_some() {
            debug!(call_id = %id, "Replaced a tracked call with the same id");
        }
    }

    /// Release one call. Returns false if it was not tracked.
    pub fn remove_call(&self, id: CallId) -> bool {
        let removed = lock(&self.calls).remove(&id);
        removed.is_some()
    }

    pub fn get(&self, id: CallId) -> Option<Arc<dyn CallObject>> {
        lock(&self.calls).get(&id).cloned()
    }

    /// Cancel every tracked call. Calls stay tracked.
    pub fn cancel_all(&self) {
        let calls: Vec<Arc<dyn CallObject>> = lock(&self.calls).values().cloned().collect();
        debug!(calls = calls.len(), "Cancelling outstanding calls");
        for call in calls {
            call.cancel();
        }
    }

    /// Release every tracked call. Returns how many were released.
    pub fn remove_all_calls(&self) -> usize {
        let calls: Vec<Arc<dyn CallObject>> =
            lock(&self.calls).drain().map(|(_, call)| call).collect();
        let released = calls.len();
        drop(calls);
        released
    }

    pub fn len(&self) -> usize {
        lock(&self.calls).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
