use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub(crate) type SessionTrackerWrapper = Arc<Mutex<SessionTracker>>;

/// Counts the active client sessions and refuses new ones beyond a maximum
#[derive(Debug)]
pub(crate) struct SessionTracker {
    max: usize,
    id: u64,
    sessions: BTreeMap<u64, SocketAddr>,
}

/// Registration of an accepted session, released when dropped
#[derive(Debug)]
pub(crate) struct Session {
    id: u64,
    tracker: SessionTrackerWrapper,
}

fn lock(tracker: &SessionTrackerWrapper) -> MutexGuard<'_, SessionTracker> {
    tracker.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SessionTracker {
    fn new(max: usize) -> SessionTracker {
        Self {
            max,
            id: 0,
            sessions: BTreeMap::new(),
        }
    }

    pub(crate) fn wrapped(max: usize) -> SessionTrackerWrapper {
        Arc::new(Mutex::new(Self::new(max)))
    }

    fn get_next_id(&mut self) -> u64 {
        let ret = self.id;
        self.id += 1;
        ret
    }

    pub(crate) fn add(tracker: &SessionTrackerWrapper, addr: SocketAddr) -> Option<Session> {
        let mut guard = lock(tracker);
        if guard.sessions.len() >= guard.max {
            tracing::warn!(
                "exceeded max connections ({}), refusing connection from: {}",
                guard.max,
                addr
            );
            return None;
        }

        let id = guard.get_next_id();
        guard.sessions.insert(id, addr);
        tracing::info!("accepted connection {} from: {}", id, addr);
        Some(Session {
            id,
            tracker: tracker.clone(),
        })
    }

    fn remove(&mut self, id: u64) {
        if let Some(addr) = self.sessions.remove(&id) {
            tracing::info!("shutdown session {} from: {}", id, addr);
        }
    }

    #[cfg(test)]
    pub(crate) fn active(&self) -> usize {
        self.sessions.len()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        lock(&self.tracker).remove(self.id);
    }
}
