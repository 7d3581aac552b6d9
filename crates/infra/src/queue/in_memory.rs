//! In-process list store for tests/dev.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use super::{ListStore, QueueError};

/// Named lists behind one mutex, with a condvar for blocking pops.
///
/// Entries are pushed at the front and popped from the back, like
/// `LPUSH`/`BRPOP`. Each popped entry goes to exactly one caller.
#[derive(Debug, Default)]
pub struct InMemoryListStore {
    lists: Mutex<HashMap<String, VecDeque<String>>>,
    available: Condvar,
    unavailable: AtomicBool,
}

impl InMemoryListStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate the store going away (every call errors) or coming back.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Snapshot of `list`, oldest entry first.
    pub fn contents(&self, list: &str) -> Vec<String> {
        self.lock()
            .get(list)
            .map(|l| l.iter().rev().cloned().collect())
            .unwrap_or_default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, VecDeque<String>>> {
        self.lists.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check_available(&self) -> Result<(), QueueError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(QueueError::Store("in-memory store offline".to_string()));
        }
        Ok(())
    }
}

impl ListStore for InMemoryListStore {
    fn push(&self, list: &str, payload: String) -> Result<(), QueueError> {
        self.check_available()?;
        self.lock().entry(list.to_string()).or_default().push_front(payload);
        self.available.notify_all();
        Ok(())
    }

    fn blocking_pop(&self, list: &str, timeout: Duration) -> Result<Option<String>, QueueError> {
        self.check_available()?;
        let deadline = Instant::now() + timeout;
        let mut lists = self.lock();

        loop {
            if let Some(entry) = lists.get_mut(list).and_then(VecDeque::pop_back) {
                return Ok(Some(entry));
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }

            lists = self
                .available
                .wait_timeout(lists, remaining)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|e| e.into_inner().0);
        }
    }

    fn len(&self, list: &str) -> Result<u64, QueueError> {
        self.check_available()?;
        Ok(self.lock().get(list).map_or(0, |l| l.len() as u64))
    }
}
