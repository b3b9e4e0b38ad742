//! Per-owner session registry with idle eviction.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

use crate::types::{ServiceError, ServiceResult};

/// A session plus its bookkeeping.
#[derive(Debug)]
pub struct SessionEntry<S> {
    session: S,
    created_at: Instant,
    last_access: Mutex<Instant>,
}

impl<S> SessionEntry<S> {
    fn new(session: S) -> Self {
        let now = Instant::now();
        Self {
            session,
            created_at: now,
            last_access: Mutex::new(now),
        }
    }

    pub fn session(&self) -> &S {
        &self.session
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn last_access(&self) -> Instant {
        *self.last_access.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn idle_for(&self) -> Duration {
        self.last_access().elapsed()
    }

    fn touch(&self) {
        *self.last_access.lock().unwrap_or_else(|p| p.into_inner()) = Instant::now();
    }
}

impl<S> std::ops::Deref for SessionEntry<S> {
    type Target = S;

    fn deref(&self) -> &S {
        &self.session
    }
}

/// Sessions keyed by owner URI.
pub struct SessionManager<S> {
    sessions: DashMap<String, Arc<SessionEntry<S>>>,
}

impl<S> Default for SessionManager<S> {
    fn default() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }
}

impl<S: Send + Sync + 'static> SessionManager<S> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a session. Fails if `key` already has one.
    pub fn create(&self, key: &str, session: S) -> ServiceResult<Arc<SessionEntry<S>>> {
        match self.sessions.entry(key.to_string()) {
            Entry::Occupied(_) => Err(ServiceError::SessionAlreadyExists(key.to_string())),
            Entry::Vacant(slot) => {
                let entry = Arc::new(SessionEntry::new(session));
                slot.insert(entry.clone());
                tracing::debug!("Created session {key}");
                Ok(entry)
            }
        }
    }

    /// Add or replace the session for `key`, returning the previous one.
    pub fn insert_or_replace(&self, key: &str, session: S) -> Option<Arc<SessionEntry<S>>> {
        self.sessions
            .insert(key.to_string(), Arc::new(SessionEntry::new(session)))
    }

    /// Return the session for `key`, creating it with `init` on first access.
    pub fn get_or_create<F>(&self, key: &str, init: F) -> ServiceResult<Arc<SessionEntry<S>>>
    where
        F: FnOnce() -> ServiceResult<S>,
    {
        let entry = match self.sessions.entry(key.to_string()) {
            Entry::Occupied(existing) => existing.get().clone(),
            Entry::Vacant(slot) => {
                tracing::debug!("Created session {key}");
                slot.insert(Arc::new(SessionEntry::new(init()?))).clone()
            }
        };
        entry.touch();
        Ok(entry)
    }

    /// Look up a session and refresh its last-access time.
    pub fn get(&self, key: &str) -> Option<Arc<SessionEntry<S>>> {
        let entry = self.sessions.get(key)?.clone();
        entry.touch();
        Some(entry)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.sessions.contains_key(key)
    }

    pub fn remove(&self, key: &str) -> ServiceResult<Arc<SessionEntry<S>>> {
        self.sessions
            .remove(key)
            .map(|(_, entry)| entry)
            .ok_or_else(|| ServiceError::SessionNotFound(key.to_string()))
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn keys(&self) -> Vec<String> {
        self.sessions.iter().map(|e| e.key().clone()).collect()
    }

    /// Remove sessions idle for longer than `max_idle`. Returns their keys.
    pub fn evict_idle(&self, max_idle: Duration) -> Vec<String> {
        self.evict_idle_if(max_idle, |_| true)
    }

    /// Like [`evict_idle`](Self::evict_idle), but only sessions for which
    /// `evictable` returns true are removed.
    pub fn evict_idle_if<F>(&self, max_idle: Duration, evictable: F) -> Vec<String>
    where
        F: Fn(&S) -> bool,
    {
        let mut evicted = Vec::new();
        self.sessions.retain(|key, entry| {
            let keep = entry.idle_for() <= max_idle || !evictable(&entry.session);
            if !keep {
                evicted.push(key.clone());
            }
            keep
        });
        if !evicted.is_empty() {
            tracing::info!("Evicted {} idle session(s)", evicted.len());
        }
        evicted
    }

    /// Run [`evict_idle`](Self::evict_idle) every `interval` until `shutdown` trips.
    pub fn spawn_eviction(
        self: &Arc<Self>,
        interval: Duration,
        max_idle: Duration,
        shutdown: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        self.spawn_eviction_if(interval, max_idle, shutdown, |_| true)
    }

    /// Run [`evict_idle_if`](Self::evict_idle_if) every `interval` until
    /// `shutdown` trips.
    pub fn spawn_eviction_if<F>(
        self: &Arc<Self>,
        interval: Duration,
        max_idle: Duration,
        shutdown: CancellationToken,
        evictable: F,
    ) -> tokio::task::JoinHandle<()>
    where
        F: Fn(&S) -> bool + Send + Sync + 'static,
    {
        let sessions = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        sessions.evict_idle_if(max_idle, &evictable);
                    }
                }
            }
        })
    }
}
