use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

use crate::error::{EngineError, EngineResult};
use crate::model::form::FormDescriptor;

pub const DEFAULT_FRESHNESS: Duration = Duration::from_secs(600);

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DescriptorKey {
    pub table: String,
    pub form_id: String,
    pub lang_id: i64,
}

impl DescriptorKey {
    pub fn new(table: &str, form_id: &str, lang_id: i64) -> Self {
        Self {
            table: table.to_string(),
            form_id: form_id.to_string(),
            lang_id,
        }
    }
}

impl std::fmt::Display for DescriptorKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}@{}", self.table, self.form_id, self.lang_id)
    }
}

#[derive(Default)]
struct SlotState {
    entry: Option<(Instant, Arc<FormDescriptor>)>,
    /// Outcome of the last resolution when it failed.
    failure: Option<EngineError>,
}

#[derive(Default)]
struct Slot {
    /// Bumped each time a resolution finishes.
    generation: AtomicU64,
    state: tokio::sync::Mutex<SlotState>,
}

impl Slot {
    fn fresh(state: &SlotState, freshness: Duration) -> Option<Arc<FormDescriptor>> {
        match &state.entry {
            Some((at, descriptor)) if at.elapsed() < freshness => Some(descriptor.clone()),
            _ => None,
        }
    }
}

/// Read-through descriptor cache.
///
/// Each key owns a slot whose async lock is held while resolving. Callers that queue behind an
/// in-flight resolution take its outcome, success or failure, instead of issuing their own.
/// Failures are not cached for later callers.
pub struct DescriptorCache {
    freshness: Duration,
    slots: Mutex<HashMap<DescriptorKey, Arc<Slot>>>,
}

impl DescriptorCache {
    pub fn new(freshness: Duration) -> Self {
        Self {
            freshness,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Slot of `key`; drops idle slots that hold nothing fresh.
    fn slot(&self, key: &DescriptorKey) -> Arc<Slot> {
        let mut slots = self.slots.lock().unwrap();
        slots.retain(|_, slot| {
            Arc::strong_count(slot) > 1
                || match slot.state.try_lock() {
                    Ok(state) => Slot::fresh(&state, self.freshness).is_some(),
                    Err(_) => true,
                }
        });
        slots.entry(key.clone()).or_default().clone()
    }

    pub async fn get_or_resolve<F, Fut>(
        &self,
        key: &DescriptorKey,
        resolve: F,
    ) -> EngineResult<Arc<FormDescriptor>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = EngineResult<FormDescriptor>>,
    {
        let slot = self.slot(key);
        let seen = slot.generation.load(Ordering::SeqCst);
        let mut state = slot.state.lock().await;
        if let Some(descriptor) = Slot::fresh(&state, self.freshness) {
            log::debug!("descriptor {} served from cache", key);
            return Ok(descriptor);
        }
        if slot.generation.load(Ordering::SeqCst) != seen {
            if let Some(err) = &state.failure {
                log::debug!("descriptor {} failed while waiting: {}", key, err.message());
                return Err(err.clone());
            }
        }

        log::debug!("resolving descriptor {}", key);
        let result = resolve().await;
        slot.generation.fetch_add(1, Ordering::SeqCst);
        match result {
            Ok(descriptor) => {
                let descriptor = Arc::new(descriptor);
                state.entry = Some((Instant::now(), descriptor.clone()));
                state.failure = None;
                Ok(descriptor)
            }
            Err(err) => {
                state.failure = Some(err.clone());
                Err(err)
            }
        }
    }

    /// Fresh cached descriptor, without waiting on an in-flight resolution.
    pub fn peek(&self, key: &DescriptorKey) -> Option<Arc<FormDescriptor>> {
        let slot = self.slots.lock().unwrap().get(key)?.clone();
        let state = slot.state.try_lock().ok()?;
        Slot::fresh(&state, self.freshness)
    }

    pub fn invalidate(&self, key: &DescriptorKey) -> bool {
        self.slots.lock().unwrap().remove(key).is_some()
    }

    #[cfg(test)]
    fn slot_count(&self) -> usize {
        self.slots.lock().unwrap().len()
    }
}

impl Default for DescriptorCache {
    fn default() -> Self {
        Self::new(DEFAULT_FRESHNESS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn key() -> DescriptorKey {
        DescriptorKey::new("metabase", "5", 1)
    }

    async fn resolve_counted(counter: &AtomicUsize) -> EngineResult<FormDescriptor> {
        counter.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        Ok(FormDescriptor {
            keylabel: "id".to_string(),
            ..Default::default()
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_flight_per_key() {
        let cache = DescriptorCache::default();
        let counter = AtomicUsize::new(0);
        let k = key();
        let (a, b) = tokio::join!(
            cache.get_or_resolve(&k, || resolve_counted(&counter)),
            cache.get_or_resolve(&k, || resolve_counted(&counter)),
        );
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(Arc::ptr_eq(&a.unwrap(), &b.unwrap()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_distinct_keys_resolve_independently() {
        let cache = DescriptorCache::default();
        let counter = AtomicUsize::new(0);
        let k1 = key();
        let k2 = DescriptorKey::new("metabase", "5", 2);
        let (a, b) = tokio::join!(
            cache.get_or_resolve(&k1, || resolve_counted(&counter)),
            cache.get_or_resolve(&k2, || resolve_counted(&counter)),
        );
        assert!(a.is_ok() && b.is_ok());
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_freshness_window() {
        let cache = DescriptorCache::default();
        let counter = AtomicUsize::new(0);
        let k = key();
        cache.get_or_resolve(&k, || resolve_counted(&counter)).await.unwrap();
        tokio::time::advance(Duration::from_secs(599)).await;
        cache.get_or_resolve(&k, || resolve_counted(&counter)).await.unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(cache.peek(&k).is_some());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(cache.peek(&k).is_none());
        cache.get_or_resolve(&k, || resolve_counted(&counter)).await.unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failure_not_cached() {
        let cache = DescriptorCache::default();
        let k = key();
        let err = cache
            .get_or_resolve(&k, || async { Err(EngineError::NotFound("5".to_string())) })
            .await;
        assert!(err.is_err());
        assert!(cache.peek(&k).is_none());
        let ok = cache
            .get_or_resolve(&k, || async { Ok(FormDescriptor::default()) })
            .await;
        assert!(ok.is_ok());
        assert!(cache.peek(&k).is_some());
    }

    async fn fail_counted(counter: &AtomicUsize) -> EngineResult<FormDescriptor> {
        counter.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        Err(EngineError::Backend {
            message: "gone away".to_string(),
            sql: "select v.pole".to_string(),
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiters_share_failure() {
        let cache = DescriptorCache::default();
        let counter = AtomicUsize::new(0);
        let k = key();
        let (a, b, c) = tokio::join!(
            cache.get_or_resolve(&k, || fail_counted(&counter)),
            cache.get_or_resolve(&k, || fail_counted(&counter)),
            cache.get_or_resolve(&k, || fail_counted(&counter)),
        );
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        for result in [a, b, c] {
            let err = result.unwrap_err();
            assert_eq!(err.message(), "gone away");
            assert_eq!(err.sql(), Some("select v.pole"));
        }

        // a new request resolves again
        assert!(cache
            .get_or_resolve(&k, || fail_counted(&counter))
            .await
            .is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_slots_are_dropped() {
        let cache = DescriptorCache::default();
        let counter = AtomicUsize::new(0);
        let failed = DescriptorKey::new("metabase", "404", 1);
        let kept = key();
        let _ = cache.get_or_resolve(&failed, || fail_counted(&counter)).await;
        cache
            .get_or_resolve(&kept, || resolve_counted(&counter))
            .await
            .unwrap();
        assert_eq!(cache.slot_count(), 1);
        assert!(cache.peek(&kept).is_some());

        tokio::time::advance(Duration::from_secs(601)).await;
        let other = DescriptorKey::new("metaadm", "1", 1);
        cache
            .get_or_resolve(&other, || resolve_counted(&counter))
            .await
            .unwrap();
        assert_eq!(cache.slot_count(), 1);
        assert!(cache.peek(&other).is_some());
    }

    #[tokio::test]
    async fn test_invalidate() {
        let cache = DescriptorCache::default();
        let k = key();
        cache
            .get_or_resolve(&k, || async { Ok(FormDescriptor::default()) })
            .await
            .unwrap();
        assert!(cache.invalidate(&k));
        assert!(cache.peek(&k).is_none());
        assert!(!cache.invalidate(&k));
    }
}
