use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::errors::StoreError;
use crate::scan_types::{AvailableCampsite, Discovery, MatchKey};
use crate::seen_store::{EntryState, SeenEntry, SeenStore};

/// Result of one admission pass
#[derive(Debug)]
pub struct Admission {
    /// Matches to notify: undelivered matches restored from the store first,
    /// then candidates never seen before, in input order
    pub fresh: Vec<Discovery>,
    /// Set when the fresh keys could not be persisted
    pub store_error: Option<StoreError>,
}

#[derive(Default)]
struct SeenState {
    seen: HashSet<MatchKey>,
    // persisted by an earlier session that never confirmed delivery
    undelivered: Vec<Discovery>,
}

/// Tracks which matches a session has already reported
///
/// The seen-set sits behind a single mutex that is held across the
/// persistence step, so admissions are serialized and a key can be admitted
/// at most once for the lifetime of the session.
///
/// With a store attached, a fresh key is written as admitted before it is
/// returned, and [`Deduplicator::confirm_delivered`] records it as notified
/// afterwards. Keys that were admitted but never confirmed are handed out
/// again by the first admission after a restart.
pub struct Deduplicator {
    state: Mutex<SeenState>,
    store: Option<Arc<dyn SeenStore>>,
}

impl Deduplicator {
    /// In-memory deduplicator
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SeenState::default()),
            store: None,
        }
    }

    /// Deduplicator seeded from, and appending to, a durable store
    pub async fn with_store(store: Arc<dyn SeenStore>) -> Result<Self, StoreError> {
        let entries = store.load().await?;

        let mut order: Vec<MatchKey> = Vec::new();
        let mut latest: HashMap<MatchKey, (EntryState, Option<AvailableCampsite>)> =
            HashMap::new();

        for entry in entries {
            match latest.get_mut(&entry.key) {
                Some((state, snapshot)) => {
                    if *state != EntryState::Notified {
                        *state = entry.state;
                    }
                    if snapshot.is_none() {
                        *snapshot = entry.campsite;
                    }
                }
                None => {
                    order.push(entry.key.clone());
                    latest.insert(entry.key, (entry.state, entry.campsite));
                }
            }
        }

        let mut state = SeenState::default();
        for key in order {
            let Some((entry_state, snapshot)) = latest.remove(&key) else {
                continue;
            };
            if let (EntryState::Admitted, Some(campsite)) = (entry_state, snapshot) {
                state.undelivered.push(Discovery {
                    provider_id: key.provider_id.clone(),
                    campsite,
                });
            }
            state.seen.insert(key);
        }

        info!(
            "Loaded {} previously seen matches ({} awaiting notification)",
            state.seen.len(),
            state.undelivered.len()
        );

        Ok(Self {
            state: Mutex::new(state),
            store: Some(store),
        })
    }

    /// Number of keys seen so far
    pub async fn seen_count(&self) -> usize {
        self.state.lock().await.seen.len()
    }

    /// Whether a key has been seen
    pub async fn contains(&self, key: &MatchKey) -> bool {
        self.state.lock().await.seen.contains(key)
    }

    /// Admit the candidates not seen before and remember them
    ///
    /// Fresh keys are appended to the store before this returns, so callers
    /// notify only after persistence. Duplicates within `candidates` are
    /// admitted once.
    pub async fn admit(&self, candidates: Vec<Discovery>) -> Admission {
        let mut state = self.state.lock().await;
        let SeenState { seen, undelivered } = &mut *state;

        let new: Vec<Discovery> = candidates
            .into_iter()
            .filter(|candidate| seen.insert(candidate.key()))
            .collect();

        debug!("Admitted {} new matches", new.len());

        let store_error = match &self.store {
            Some(store) if !new.is_empty() => {
                let entries: Vec<SeenEntry> = new
                    .iter()
                    .map(|d| SeenEntry::admitted(d.key(), d.campsite.clone()))
                    .collect();
                store.append(&entries).await.err()
            }
            _ => None,
        };

        let mut fresh = std::mem::take(undelivered);
        fresh.extend(new);

        Admission { fresh, store_error }
    }

    /// Record that the given matches reached at least one channel
    pub async fn confirm_delivered(&self, delivered: &[Discovery]) -> Result<(), StoreError> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        if delivered.is_empty() {
            return Ok(());
        }

        let entries: Vec<SeenEntry> = delivered
            .iter()
            .map(|d| SeenEntry::notified(d.key()))
            .collect();
        store.append(&entries).await
    }
}
