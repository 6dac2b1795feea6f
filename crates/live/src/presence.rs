//! Presence tracking.
//!
//! Maintains the set of participants currently believed online, rebuilt
//! from the bulk snapshot delivered after (re)connect and incremental
//! online/offline events thereafter. Best-effort by design: UI that
//! depends on presence awaits [`PresenceTracker::wait_ready`], which
//! resolves on the first snapshot or after a bounded timeout, whichever
//! comes first, and never blocks indefinitely.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tokio::sync::watch;

use stallside_core::UserId;

use crate::transport::{EventBus, EventKind, LiveEvent, Subscription};

/// Default wait for the initial presence snapshot.
pub const DEFAULT_SNAPSHOT_TIMEOUT: Duration = Duration::from_secs(10);

type Watcher = Arc<dyn Fn(bool) + Send + Sync>;

#[derive(Default)]
struct WatcherRegistry {
    next_token: u64,
    by_user: HashMap<UserId, Vec<(u64, Watcher)>>,
}

struct PresenceInner {
    online: Mutex<HashSet<UserId>>,
    watchers: Mutex<WatcherRegistry>,
    ready: watch::Sender<bool>,
    timeout: Duration,
}

/// Tracks which participants are online for the whole session.
pub struct PresenceTracker {
    inner: Arc<PresenceInner>,
    // Held for the tracker's lifetime; dropping the tracker unsubscribes.
    _subs: Vec<Subscription>,
}

impl PresenceTracker {
    /// Create a tracker fed by the given bus.
    #[must_use]
    pub fn new(bus: &EventBus, timeout: Duration) -> Self {
        let (ready, _) = watch::channel(false);
        let inner = Arc::new(PresenceInner {
            online: Mutex::new(HashSet::new()),
            watchers: Mutex::new(WatcherRegistry::default()),
            ready,
            timeout,
        });

        let weak = Arc::downgrade(&inner);
        let snapshot_sub = bus.subscribe(EventKind::InitialOnlineUsers, move |event| {
            let LiveEvent::InitialOnlineUsers(snapshot) = event else {
                return;
            };
            if let Some(inner) = weak.upgrade() {
                inner.apply_snapshot(&snapshot.user_ids);
            }
        });

        let weak = Arc::downgrade(&inner);
        let online_sub = bus.subscribe(EventKind::UserOnline, move |event| {
            let LiveEvent::UserOnline(presence) = event else {
                return;
            };
            if let Some(inner) = weak.upgrade() {
                inner.set_online(presence.user_id, true);
            }
        });

        let weak = Arc::downgrade(&inner);
        let offline_sub = bus.subscribe(EventKind::UserOffline, move |event| {
            let LiveEvent::UserOffline(presence) = event else {
                return;
            };
            if let Some(inner) = weak.upgrade() {
                inner.set_online(presence.user_id, false);
            }
        });

        Self {
            inner,
            _subs: vec![snapshot_sub, online_sub, offline_sub],
        }
    }

    /// Wait until the first snapshot has arrived, or the configured
    /// timeout elapses. Presence-dependent UI awaits this before its first
    /// frame, to avoid a flash of "offline" for actually-online users.
    pub async fn wait_ready(&self) {
        let mut rx = self.inner.ready.subscribe();
        if *rx.borrow() {
            return;
        }
        let _ = tokio::time::timeout(self.inner.timeout, async {
            while rx.changed().await.is_ok() {
                if *rx.borrow() {
                    break;
                }
            }
        })
        .await;
    }

    /// Whether a participant is currently believed online.
    #[must_use]
    pub fn is_online(&self, user_id: UserId) -> bool {
        self.inner
            .online
            .lock()
            .map(|online| online.contains(&user_id))
            .unwrap_or(false)
    }

    /// All participants currently believed online.
    #[must_use]
    pub fn online_users(&self) -> Vec<UserId> {
        let mut users: Vec<UserId> = self
            .inner
            .online
            .lock()
            .map(|online| online.iter().copied().collect())
            .unwrap_or_default();
        users.sort_unstable();
        users
    }

    /// Subscribe to online/offline changes for one participant.
    ///
    /// The callback receives the new online state. Dropping the returned
    /// guard unsubscribes.
    pub fn watch(
        &self,
        user_id: UserId,
        callback: impl Fn(bool) + Send + Sync + 'static,
    ) -> PresenceWatch {
        let token = {
            let Ok(mut registry) = self.inner.watchers.lock() else {
                return PresenceWatch {
                    inner: Weak::new(),
                    user_id,
                    token: 0,
                };
            };
            let token = registry.next_token;
            registry.next_token += 1;
            registry
                .by_user
                .entry(user_id)
                .or_default()
                .push((token, Arc::new(callback)));
            token
        };

        PresenceWatch {
            inner: Arc::downgrade(&self.inner),
            user_id,
            token,
        }
    }
}

impl PresenceInner {
    /// Replace the whole set from a snapshot and notify changed ids.
    fn apply_snapshot(&self, user_ids: &[UserId]) {
        let next: HashSet<UserId> = user_ids.iter().copied().collect();
        let changed: Vec<(UserId, bool)> = {
            let Ok(mut online) = self.online.lock() else {
                return;
            };
            let mut changed: Vec<(UserId, bool)> = online
                .difference(&next)
                .map(|user| (*user, false))
                .collect();
            changed.extend(next.difference(&online).map(|user| (*user, true)));
            *online = next;
            changed
        };

        self.ready.send_replace(true);
        for (user_id, now_online) in changed {
            self.notify(user_id, now_online);
        }
    }

    fn set_online(&self, user_id: UserId, now_online: bool) {
        let changed = {
            let Ok(mut online) = self.online.lock() else {
                return;
            };
            if now_online {
                online.insert(user_id)
            } else {
                online.remove(&user_id)
            }
        };
        if changed {
            self.notify(user_id, now_online);
        }
    }

    /// Invoke watchers outside the presence lock so they may query state.
    fn notify(&self, user_id: UserId, now_online: bool) {
        let watchers: Vec<Watcher> = {
            let Ok(registry) = self.watchers.lock() else {
                return;
            };
            registry
                .by_user
                .get(&user_id)
                .map(|entries| entries.iter().map(|(_, w)| w.clone()).collect())
                .unwrap_or_default()
        };
        for watcher in watchers {
            watcher(now_online);
        }
    }
}

/// Guard for a per-id presence subscription; dropping it unsubscribes.
pub struct PresenceWatch {
    inner: Weak<PresenceInner>,
    user_id: UserId,
    token: u64,
}

impl Drop for PresenceWatch {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.upgrade()
            && let Ok(mut registry) = inner.watchers.lock()
            && let Some(entries) = registry.by_user.get_mut(&self.user_id)
        {
            entries.retain(|(token, _)| *token != self.token);
        }
    }
}
