use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use uuid::Uuid;

struct Entry<S> {
    session: Arc<Mutex<S>>,
    last_used: Instant,
}

/// Live dashboard sessions keyed by id. An entry untouched for longer than
/// `idle` is dropped on the next lookup or sweep.
pub struct SessionRegistry<S> {
    idle: Duration,
    entries: HashMap<Uuid, Entry<S>>,
}

impl<S> SessionRegistry<S> {
    pub fn new(idle: Duration) -> Self {
        Self {
            idle,
            entries: HashMap::new(),
        }
    }

    pub fn insert(&mut self, session: S, now: Instant) -> Uuid {
        let id = Uuid::new_v4();
        self.entries.insert(
            id,
            Entry {
                session: Arc::new(Mutex::new(session)),
                last_used: now,
            },
        );
        id
    }

    /// Returns the session and refreshes its idle clock.
    pub fn get(&mut self, id: &Uuid, now: Instant) -> Option<Arc<Mutex<S>>> {
        let last_used = self.entries.get(id)?.last_used;
        if now.saturating_duration_since(last_used) > self.idle {
            self.entries.remove(id);
            tracing::info!(session_id = %id, "session expired");
            return None;
        }
        let entry = self.entries.get_mut(id)?;
        entry.last_used = now;
        Some(entry.session.clone())
    }

    pub fn remove(&mut self, id: &Uuid) -> bool {
        self.entries.remove(id).is_some()
    }

    /// Drops every idle entry; returns how many went.
    pub fn evict_idle(&mut self, now: Instant) -> usize {
        let before = self.entries.len();
        let idle = self.idle;
        self.entries
            .retain(|_, e| now.saturating_duration_since(e.last_used) <= idle);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const IDLE: Duration = Duration::from_secs(60);

    #[test]
    fn lookup_refreshes_idle_clock() {
        let start = Instant::now();
        let mut registry = SessionRegistry::new(IDLE);
        let id = registry.insert("s", start);

        assert!(registry.get(&id, start + Duration::from_secs(50)).is_some());
        assert!(registry.get(&id, start + Duration::from_secs(100)).is_some());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn idle_session_is_gone_on_lookup() {
        let start = Instant::now();
        let mut registry = SessionRegistry::new(IDLE);
        let id = registry.insert("s", start);

        assert!(registry.get(&id, start + Duration::from_secs(61)).is_none());
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn sweep_evicts_only_idle_sessions() {
        let start = Instant::now();
        let mut registry = SessionRegistry::new(IDLE);
        let stale = registry.insert("stale", start);
        let fresh = registry.insert("fresh", start + Duration::from_secs(30));

        assert_eq!(registry.evict_idle(start + Duration::from_secs(75)), 1);
        assert!(registry.get(&stale, start + Duration::from_secs(75)).is_none());
        assert!(registry.get(&fresh, start + Duration::from_secs(75)).is_some());
    }

    #[test]
    fn remove_reports_whether_it_existed() {
        let mut registry = SessionRegistry::new(IDLE);
        let id = registry.insert("s", Instant::now());
        assert!(registry.remove(&id));
        assert!(!registry.remove(&id));
    }
}
