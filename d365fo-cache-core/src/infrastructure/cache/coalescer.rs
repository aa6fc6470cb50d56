// d365fo-cache-core/src/infrastructure/cache/coalescer.rs
//
// Two coalescing mechanisms:
//  - `SingleFlight`: concurrent misses on the same cache key share one
//    in-flight fetch instead of stampeding the remote environment.
//  - `LabelBatchCoalescer`: individual `ResolveLabel` calls arriving within
//    a short window are merged into one batched remote lookup.

use dashmap::DashMap;
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};

/// Keyed async mutex: the first caller for a given key does the work, every
/// concurrent caller for the same key awaits its result instead of
/// duplicating it.
#[derive(Clone)]
pub struct SingleFlight<K, V> {
    inflight: Arc<DashMap<K, Arc<Mutex<()>>>>,
    results: Arc<DashMap<K, V>>,
}

impl<K, V> SingleFlight<K, V>
where
    K: std::hash::Hash + Eq + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        SingleFlight {
            inflight: Arc::new(DashMap::new()),
            results: Arc::new(DashMap::new()),
        }
    }

    /// Runs `fetch` at most once per outstanding key. Callers that arrive
    /// while a fetch is already running block on the same lock and then
    /// read the cached result the leader produced.
    pub async fn run<F, Fut, E>(&self, key: K, fetch: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        let lock = self.inflight.entry(key.clone()).or_insert_with(|| Arc::new(Mutex::new(()))).clone();
        let _guard = lock.lock().await;

        if let Some(v) = self.results.get(&key) {
            return Ok(v.clone());
        }

        let value = fetch().await?;
        self.results.insert(key.clone(), value.clone());
        self.inflight.remove(&key);
        Ok(value)
    }
}

impl<K, V> Default for SingleFlight<K, V>
where
    K: std::hash::Hash + Eq + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

const LABEL_BATCH_WINDOW: Duration = Duration::from_millis(50);

struct PendingBatch {
    ids: HashSet<String>,
    waiters: Vec<oneshot::Sender<()>>,
}

/// Collects individual label ids requested within a 50ms window into one
/// batch, then fires a single callback with the union of ids. Every waiter
/// is released once the shared fetch completes; callers read their own id
/// back out of whatever store the fetch populated.
#[derive(Clone)]
pub struct LabelBatchCoalescer {
    pending: Arc<Mutex<Option<PendingBatch>>>,
}

impl LabelBatchCoalescer {
    pub fn new() -> Self {
        LabelBatchCoalescer {
            pending: Arc::new(Mutex::new(None)),
        }
    }

    /// Registers `label_id` for the current (or a freshly opened) batch
    /// window and awaits that window's flush. `on_flush` receives the full
    /// set of ids collected in the window exactly once per window.
    pub async fn request<F, Fut>(&self, label_id: String, on_flush: F)
    where
        F: FnOnce(Vec<String>) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let is_leader = {
            let mut guard = self.pending.lock().await;
            match guard.as_mut() {
                Some(batch) => {
                    batch.ids.insert(label_id);
                    batch.waiters.push(tx);
                    false
                }
                None => {
                    let mut ids = HashSet::new();
                    ids.insert(label_id);
                    *guard = Some(PendingBatch {
                        ids,
                        waiters: vec![tx],
                    });
                    true
                }
            }
        };

        if is_leader {
            let pending = self.pending.clone();
            tokio::spawn(async move {
                tokio::time::sleep(LABEL_BATCH_WINDOW).await;
                let batch = pending.lock().await.take();
                if let Some(batch) = batch {
                    let ids: Vec<String> = batch.ids.into_iter().collect();
                    on_flush(ids).await;
                    for waiter in batch.waiters {
                        let _ = waiter.send(());
                    }
                }
            });
        }

        let _ = rx.await;
    }
}

impl Default for LabelBatchCoalescer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn single_flight_runs_fetch_once_for_concurrent_callers() {
        let flight: SingleFlight<String, i32> = SingleFlight::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..5 {
            let flight = flight.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                flight.run("k".to_string(), || {
                        let calls = calls.clone();
                        async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(10)).await;
                            Ok::<i32, ()>(42)
                        }
                    }).await
            }));
        }

        for h in handles {
            assert_eq!(h.await.unwrap(), Ok(42));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn label_batch_coalesces_concurrent_requests_into_one_flush() {
        let coalescer = LabelBatchCoalescer::new();
        let flush_count = Arc::new(AtomicUsize::new(0));
        let collected_total = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for id in ["@A1", "@A2", "@A3"] {
            let coalescer = coalescer.clone();
            let flush_count = flush_count.clone();
            let collected_total = collected_total.clone();
            handles.push(tokio::spawn(async move {
                coalescer.request(id.to_string(), move |ids| {
                        let flush_count = flush_count.clone();
                        let collected_total = collected_total.clone();
                        async move {
                            flush_count.fetch_add(1, Ordering::SeqCst);
                            collected_total.fetch_add(ids.len(), Ordering::SeqCst);
                        }
                    }).await;
            }));
        }

        for h in handles {
            h.await.unwrap();
        }

        assert_eq!(flush_count.load(Ordering::SeqCst), 1);
        assert_eq!(collected_total.load(Ordering::SeqCst), 3);
    }
}
