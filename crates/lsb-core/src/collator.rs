//! Album debounce.
//!
//! Telegram delivers every part of an album as its own update. Each part goes
//! through [`MessageCollator::collate`]; the invocation carrying the last part
//! of a burst gets the whole album back, every other one gets `Absorbed`.
//! Pending albums are never evicted to make room: when the table is full of
//! live albums, a part of a new album passes through as `Single`.

use std::{fmt::Debug, hash::Hash, time::Duration};

use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};

use crate::cache::TtlCache;

const MAX_PENDING_GROUPS: usize = 256;

/// An event that may belong to a group of related events.
pub trait Collatable {
    type Key: Eq + Hash + Clone + Debug + Send;

    fn group_key(&self) -> Option<Self::Key>;
    /// Arrival order inside the group (message id for Telegram).
    fn sequence(&self) -> i64;
}

#[derive(Debug, PartialEq, Eq)]
pub enum Collated<E> {
    /// Ungrouped event, passed through untouched.
    Single(E),
    /// Complete group sorted by sequence. Produced once per group.
    Batch(Vec<E>),
    /// Event was added to a group that another invocation will finalize.
    Absorbed,
}

pub struct MessageCollator<E: Collatable> {
    latency: Duration,
    max_groups: usize,
    groups: Mutex<TtlCache<E::Key, Vec<E>>>,
}

impl<E: Collatable> MessageCollator<E> {
    pub fn new(latency: Duration) -> Self {
        Self::with_capacity(latency, MAX_PENDING_GROUPS)
    }

    pub fn with_capacity(latency: Duration, max_groups: usize) -> Self {
        // Appends refresh the expiry, so a live group never ages out before its
        // last arrival wakes up. Expiry only reclaims groups orphaned by a
        // cancelled handler.
        let ttl = (latency * 40).max(Duration::from_secs(5));
        let max_groups = max_groups.max(1);
        Self {
            latency,
            max_groups,
            groups: Mutex::new(TtlCache::new(max_groups, ttl)),
        }
    }

    pub async fn collate(&self, event: E) -> Collated<E> {
        let Some(key) = event.group_key() else {
            return Collated::Single(event);
        };

        let size_before = {
            let mut groups = self.groups.lock().await;
            if !groups.contains(&key) && groups.len() >= self.max_groups {
                groups.purge_expired(Instant::now());
                if groups.len() >= self.max_groups {
                    tracing::warn!(
                        ?key,
                        pending = groups.len(),
                        "too many pending albums, part delivered on its own"
                    );
                    return Collated::Single(event);
                }
            }
            let items = groups.upsert_with(key.clone(), Vec::new);
            items.push(event);
            items.len()
        };

        sleep(self.latency).await;

        // Other invocations ran while we slept: re-read everything.
        let mut groups = self.groups.lock().await;
        let size_after = groups.get(&key).map(Vec::len);

        match size_after {
            None => {
                tracing::debug!(?key, "album already finalized");
                Collated::Absorbed
            }
            Some(n) if n != size_before => Collated::Absorbed,
            Some(_) => {
                let Some(mut batch) = groups.remove(&key) else {
                    return Collated::Absorbed;
                };
                batch.sort_by_key(|e| e.sequence());
                tracing::debug!(?key, parts = batch.len(), "album collated");
                Collated::Batch(batch)
            }
        }
    }

    pub async fn pending_groups(&self) -> usize {
        self.groups.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[derive(Clone, Debug, PartialEq, Eq)]
    struct Ev {
        key: Option<&'static str>,
        seq: i64,
    }

    impl Collatable for Ev {
        type Key = &'static str;

        fn group_key(&self) -> Option<&'static str> {
            self.key
        }

        fn sequence(&self) -> i64 {
            self.seq
        }
    }

    fn ev(key: Option<&'static str>, seq: i64) -> Ev {
        Ev { key, seq }
    }

    #[tokio::test(start_paused = true)]
    async fn ungrouped_event_passes_through_immediately() {
        let c = MessageCollator::new(Duration::from_millis(150));
        let started = tokio::time::Instant::now();

        let out = c.collate(ev(None, 1)).await;

        assert_eq!(out, Collated::Single(ev(None, 1)));
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn burst_finalizes_once_sorted_and_evicted() {
        let c = Arc::new(MessageCollator::new(Duration::from_millis(150)));

        let mut handles = Vec::new();
        for seq in [3, 1, 2] {
            let c = c.clone();
            handles.push(tokio::spawn(async move { c.collate(ev(Some("G"), seq)).await }));
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        let mut batches = Vec::new();
        let mut absorbed = 0;
        for h in handles {
            match h.await.unwrap() {
                Collated::Batch(b) => batches.push(b),
                Collated::Absorbed => absorbed += 1,
                Collated::Single(e) => panic!("grouped event passed through: {e:?}"),
            }
        }

        assert_eq!(absorbed, 2);
        assert_eq!(batches.len(), 1);
        let seqs: Vec<i64> = batches[0].iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
        assert_eq!(c.pending_groups().await, 0);

        // a straggler after the window closed starts a new group
        let late = c.collate(ev(Some("G"), 4)).await;
        assert_eq!(late, Collated::Batch(vec![ev(Some("G"), 4)]));
        assert_eq!(c.pending_groups().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn separate_groups_do_not_interfere() {
        let c = Arc::new(MessageCollator::new(Duration::from_millis(150)));

        let a = {
            let c = c.clone();
            tokio::spawn(async move { c.collate(ev(Some("A"), 1)).await })
        };
        let b = {
            let c = c.clone();
            tokio::spawn(async move { c.collate(ev(Some("B"), 2)).await })
        };

        assert_eq!(a.await.unwrap(), Collated::Batch(vec![ev(Some("A"), 1)]));
        assert_eq!(b.await.unwrap(), Collated::Batch(vec![ev(Some("B"), 2)]));
    }

    #[tokio::test(start_paused = true)]
    async fn full_table_never_drops_a_pending_album() {
        let c = Arc::new(MessageCollator::with_capacity(Duration::from_millis(150), 1));

        let first = {
            let c = c.clone();
            tokio::spawn(async move { c.collate(ev(Some("A"), 1)).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        let second = {
            let c = c.clone();
            tokio::spawn(async move { c.collate(ev(Some("A"), 2)).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        let overflow = c.collate(ev(Some("B"), 3)).await;
        assert_eq!(overflow, Collated::Single(ev(Some("B"), 3)));
        assert_eq!(c.pending_groups().await, 1);

        assert_eq!(first.await.unwrap(), Collated::Absorbed);
        assert_eq!(
            second.await.unwrap(),
            Collated::Batch(vec![ev(Some("A"), 1), ev(Some("A"), 2)])
        );

        // room again once the album is finalized
        let next = c.collate(ev(Some("B"), 4)).await;
        assert_eq!(next, Collated::Batch(vec![ev(Some("B"), 4)]));
    }
}
