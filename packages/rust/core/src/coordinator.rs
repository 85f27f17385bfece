//! Enrichment coordinator: concurrent, at-most-once context fetching.
//!
//! For a list of candidate matches the coordinator fetches context for every
//! match that has a source URL and no cache entry, merges the settled
//! contexts into the [`EnrichmentCache`] once the batch is over, and persists
//! the cache. Fetch failures are recorded as error contexts, never returned.
//!
//! Overlapping invocations share fetches through an in-flight registry, so an
//! id is fetched at most once even when two batches race on it.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};

use futures::future::{BoxFuture, FutureExt, Shared};
use futures::stream::{self, StreamExt};
use specter_scrape::{ContextFetcher, map_payload};
use specter_shared::{CandidateMatch, EnrichmentContext};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::cache::{CacheSnapshot, EnrichmentCache};

type SharedFetch = Shared<BoxFuture<'static, EnrichmentContext>>;

// ---------------------------------------------------------------------------
// Progress trait
// ---------------------------------------------------------------------------

/// Progress callback for enrichment batches.
pub trait EnrichmentProgress: Send + Sync {
    /// A non-empty batch started with `pending` fetches.
    fn started(&self, pending: usize);
    /// One fetch settled (successfully or not).
    fn settled(&self, match_id: &str, context: &EnrichmentContext, remaining: usize);
    /// The batch is over. Fires exactly once per invocation.
    fn done(&self, snapshot: &CacheSnapshot);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentEnrichmentProgress;

impl EnrichmentProgress for SilentEnrichmentProgress {
    fn started(&self, _pending: usize) {}
    fn settled(&self, _match_id: &str, _context: &EnrichmentContext, _remaining: usize) {}
    fn done(&self, _snapshot: &CacheSnapshot) {}
}

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// Summary of one `enrich` invocation.
#[derive(Debug, Clone)]
pub struct EnrichOutcome {
    /// The cache after merging this batch.
    pub snapshot: CacheSnapshot,
    /// Contexts fetched successfully.
    pub fetched: usize,
    /// Matches already present in the cache.
    pub cache_hits: usize,
    /// Matches without a usable source URL.
    pub skipped_no_url: usize,
    /// Fetches that settled as error contexts.
    pub failures: usize,
    /// Work items served by another invocation's in-flight fetch.
    pub joined_in_flight: usize,
    /// Whether the batch was cut short by cancellation.
    pub cancelled: bool,
}

impl EnrichOutcome {
    fn new(snapshot: CacheSnapshot) -> Self {
        Self {
            snapshot,
            fetched: 0,
            cache_hits: 0,
            skipped_no_url: 0,
            failures: 0,
            joined_in_flight: 0,
            cancelled: false,
        }
    }

    /// Whether this invocation dispatched or joined any fetch.
    pub fn did_work(&self) -> bool {
        self.fetched + self.failures > 0 || self.cancelled
    }
}

// ---------------------------------------------------------------------------
// Coordinator
// ---------------------------------------------------------------------------

/// Drives context fetches for candidate matches.
pub struct Coordinator {
    fetcher: Arc<dyn ContextFetcher>,
    max_concurrency: Option<usize>,
    in_flight: Mutex<HashMap<String, SharedFetch>>,
}

struct WorkItem {
    match_id: String,
    fetch: SharedFetch,
    owned: bool,
}

impl Coordinator {
    /// A coordinator with unbounded dispatch.
    pub fn new(fetcher: Arc<dyn ContextFetcher>) -> Self {
        Self {
            fetcher,
            max_concurrency: None,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Cap the number of fetches awaited at once. `None` or `0` means unbounded.
    pub fn with_max_concurrency(mut self, max: Option<usize>) -> Self {
        self.max_concurrency = max.filter(|n| *n > 0);
        self
    }

    /// Number of fetches currently registered as in flight.
    pub fn in_flight(&self) -> usize {
        self.registry().len()
    }

    /// Enrich `matches`, merging new contexts into `cache`.
    ///
    /// The work set is every distinct match id that has a non-blank source URL
    /// and no cache entry. An empty work set returns immediately with the
    /// cache unchanged.
    #[instrument(skip_all, fields(matches = matches.len()))]
    pub async fn enrich(
        &self,
        matches: &[CandidateMatch],
        cache: &EnrichmentCache,
        progress: &dyn EnrichmentProgress,
        cancel: &CancellationToken,
    ) -> EnrichOutcome {
        let mut outcome = EnrichOutcome::new(cache.snapshot());
        let mut seen: HashSet<&str> = HashSet::new();
        let mut pending: Vec<(String, String)> = Vec::new();

        for candidate in matches {
            if !seen.insert(candidate.id.as_str()) {
                continue;
            }
            if cache.contains(&candidate.id) {
                outcome.cache_hits += 1;
                continue;
            }
            match candidate.fetchable_url() {
                Some(url) => pending.push((candidate.id.clone(), url.to_string())),
                None => {
                    debug!(match_id = %candidate.id, "no source url, skipping");
                    outcome.skipped_no_url += 1;
                }
            }
        }

        let work = self.claim(pending, cache, &mut outcome);
        if work.is_empty() {
            debug!(cache_hits = outcome.cache_hits, "nothing to enrich");
            outcome.snapshot = cache.snapshot();
            progress.done(&outcome.snapshot);
            return outcome;
        }

        let total = work.len();
        let owned = work.iter().filter(|item| item.owned).count();
        let handles: HashMap<String, SharedFetch> = work
            .iter()
            .map(|item| (item.match_id.clone(), item.fetch.clone()))
            .collect();
        let limit = self.max_concurrency.unwrap_or(total).min(total);

        info!(
            pending = total,
            owned,
            joined = outcome.joined_in_flight,
            concurrency = limit,
            "enrichment batch started"
        );
        progress.started(total);

        let mut settlements = stream::iter(work)
            .map(|item| async move {
                let context = item.fetch.await;
                (item.match_id, context)
            })
            .buffer_unordered(limit);

        let mut settled: Vec<(String, EnrichmentContext)> = Vec::with_capacity(total);
        let mut remaining = total;

        while remaining > 0 {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    warn!(settled = settled.len(), remaining, "enrichment cancelled");
                    outcome.cancelled = true;
                    break;
                }
                next = settlements.next() => {
                    let Some((match_id, context)) = next else { break };
                    remaining -= 1;
                    if context.is_error() {
                        outcome.failures += 1;
                    } else {
                        outcome.fetched += 1;
                    }
                    progress.settled(&match_id, &context, remaining);
                    settled.push((match_id, context));
                }
            }
        }
        // Drops unsettled fetches; nothing half-written reaches the cache.
        drop(settlements);

        let settled_ids: HashSet<String> = settled.iter().map(|(id, _)| id.clone()).collect();
        let inserted = cache.merge(settled);
        self.release(handles, &settled_ids);
        if inserted > 0 {
            if let Err(e) = cache.persist().await {
                warn!(error = %e, "failed to persist enrichment cache");
            }
        }

        outcome.snapshot = cache.snapshot();
        info!(
            fetched = outcome.fetched,
            failures = outcome.failures,
            inserted,
            cancelled = outcome.cancelled,
            "enrichment batch settled"
        );
        progress.done(&outcome.snapshot);
        outcome
    }

    /// Register or join a fetch for every pending id.
    ///
    /// The cache is re-checked under the registry lock: an invocation merges
    /// into the cache before releasing registry entries, so every id is either
    /// cached or registered from the point of view of a later invocation.
    fn claim(
        &self,
        pending: Vec<(String, String)>,
        cache: &EnrichmentCache,
        outcome: &mut EnrichOutcome,
    ) -> Vec<WorkItem> {
        let mut registry = self.registry();
        let mut work = Vec::with_capacity(pending.len());

        for (match_id, url) in pending {
            if cache.contains(&match_id) {
                outcome.cache_hits += 1;
                continue;
            }
            if let Some(existing) = registry.get(&match_id) {
                debug!(%match_id, "joining in-flight fetch");
                outcome.joined_in_flight += 1;
                work.push(WorkItem {
                    match_id,
                    fetch: existing.clone(),
                    owned: false,
                });
                continue;
            }

            let fetch = fetch_context(self.fetcher.clone(), match_id.clone(), url)
                .boxed()
                .shared();
            registry.insert(match_id.clone(), fetch.clone());
            work.push(WorkItem {
                match_id,
                fetch,
                owned: true,
            });
        }
        work
    }

    /// Drop registry entries this invocation is finished with.
    ///
    /// A settled fetch is removed by whichever invocation saw it settle. An
    /// unsettled one (after cancellation) is removed only once no other
    /// invocation still awaits it, so a joiner keeps the id registered.
    fn release(&self, handles: HashMap<String, SharedFetch>, settled: &HashSet<String>) {
        let mut registry = self.registry();
        for (match_id, handle) in handles {
            let Some(entry) = registry.get(&match_id) else {
                continue;
            };
            if !entry.ptr_eq(&handle) {
                continue;
            }
            drop(handle);
            let abandoned = entry.strong_count().is_none_or(|n| n <= 1);
            if settled.contains(&match_id) || abandoned {
                registry.remove(&match_id);
            }
        }
    }

    fn registry(&self) -> std::sync::MutexGuard<'_, HashMap<String, SharedFetch>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Fetch and map one context. Failures become the error form.
async fn fetch_context(
    fetcher: Arc<dyn ContextFetcher>,
    match_id: String,
    url: String,
) -> EnrichmentContext {
    match fetcher.fetch(&url).await {
        Ok(payload) => {
            let context = map_payload(&payload);
            debug!(%match_id, %url, error = context.is_error(), "context fetched");
            context
        }
        Err(e) => {
            warn!(%match_id, %url, error = %e, "context fetch failed");
            EnrichmentContext::failed(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::tests::MemoryStore;
    use async_trait::async_trait;
    use serde_json::{Value, json};
    use specter_shared::{Result, SpecterError};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Fetcher that counts calls, fails for URLs containing "fail", and can
    /// be held open until released.
    #[derive(Default)]
    struct FakeFetcher {
        calls: Mutex<Vec<String>>,
        active: AtomicUsize,
        peak: AtomicUsize,
        delay: Option<Duration>,
        gate: Option<Arc<tokio::sync::Notify>>,
    }

    impl FakeFetcher {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ContextFetcher for FakeFetcher {
        async fn fetch(&self, url: &str) -> Result<Value> {
            self.calls.lock().unwrap().push(url.to_string());
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);

            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.active.fetch_sub(1, Ordering::SeqCst);

            if url.contains("fail") {
                return Err(SpecterError::Fetch {
                    url: url.to_string(),
                    status: Some(500),
                    message: "boom".into(),
                });
            }
            Ok(json!({"success": true, "data": {"markdown": format!("body of {url}")}}))
        }
    }

    /// Records every progress callback.
    #[derive(Default)]
    struct RecordingProgress {
        started: Mutex<Vec<usize>>,
        settled: Mutex<Vec<(String, usize)>>,
        done: AtomicUsize,
    }

    impl EnrichmentProgress for RecordingProgress {
        fn started(&self, pending: usize) {
            self.started.lock().unwrap().push(pending);
        }
        fn settled(&self, match_id: &str, _context: &EnrichmentContext, remaining: usize) {
            self.settled.lock().unwrap().push((match_id.to_string(), remaining));
        }
        fn done(&self, _snapshot: &CacheSnapshot) {
            self.done.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn candidate(id: &str, url: Option<&str>) -> CandidateMatch {
        CandidateMatch {
            id: id.into(),
            name: format!("Case {id}"),
            description: String::new(),
            confidence_score: 0.5,
            source_url: url.map(str::to_string),
            source: None,
            date_posted: None,
            member_count: None,
        }
    }

    fn five_matches() -> Vec<CandidateMatch> {
        (1..=5)
            .map(|i| {
                let url = if i == 3 {
                    "https://fail.example/3".to_string()
                } else {
                    format!("https://ok.example/{i}")
                };
                candidate(&i.to_string(), Some(&url))
            })
            .collect()
    }

    #[tokio::test]
    async fn second_call_issues_no_fetches() {
        let fetcher = Arc::new(FakeFetcher::default());
        let coordinator = Coordinator::new(fetcher.clone());
        let cache = EnrichmentCache::in_memory();
        let matches = five_matches();
        let cancel = CancellationToken::new();

        let first = coordinator
            .enrich(&matches, &cache, &SilentEnrichmentProgress, &cancel)
            .await;
        assert_eq!(first.fetched + first.failures, 5);
        assert_eq!(fetcher.calls().len(), 5);

        let second = coordinator
            .enrich(&matches, &cache, &SilentEnrichmentProgress, &cancel)
            .await;
        assert_eq!(fetcher.calls().len(), 5);
        assert_eq!(second.cache_hits, 5);
        assert!(!second.did_work());
    }

    #[tokio::test]
    async fn one_failure_does_not_block_the_rest() {
        let fetcher = Arc::new(FakeFetcher::default());
        let coordinator = Coordinator::new(fetcher);
        let cache = EnrichmentCache::in_memory();

        let outcome = coordinator
            .enrich(&five_matches(), &cache, &SilentEnrichmentProgress, &CancellationToken::new())
            .await;

        assert_eq!(outcome.fetched, 4);
        assert_eq!(outcome.failures, 1);
        assert_eq!(cache.len(), 5);
        let failed = cache.get("3").unwrap();
        assert!(failed.is_error());
        assert!(failed.error.unwrap().contains("boom"));
        assert_eq!(
            cache.get("1").unwrap().body_text.as_deref(),
            Some("body of https://ok.example/1")
        );
    }

    #[tokio::test]
    async fn counter_reaches_zero_and_done_fires_once() {
        let coordinator = Coordinator::new(Arc::new(FakeFetcher::default()));
        let cache = EnrichmentCache::in_memory();
        let progress = RecordingProgress::default();

        coordinator
            .enrich(&five_matches(), &cache, &progress, &CancellationToken::new())
            .await;

        assert_eq!(*progress.started.lock().unwrap(), vec![5]);
        let settled = progress.settled.lock().unwrap();
        assert_eq!(settled.len(), 5);
        let mut remaining: Vec<usize> = settled.iter().map(|(_, r)| *r).collect();
        remaining.sort_unstable();
        assert_eq!(remaining, vec![0, 1, 2, 3, 4]);
        assert_eq!(progress.done.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn empty_work_set_reports_done_without_start() {
        let fetcher = Arc::new(FakeFetcher::default());
        let coordinator = Coordinator::new(fetcher.clone());
        let cache = EnrichmentCache::in_memory();
        let progress = RecordingProgress::default();

        let outcome = coordinator
            .enrich(
                &[candidate("a", None), candidate("b", Some("   "))],
                &cache,
                &progress,
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(outcome.skipped_no_url, 2);
        assert!(fetcher.calls().is_empty());
        assert!(cache.is_empty());
        assert!(progress.started.lock().unwrap().is_empty());
        assert_eq!(progress.done.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn duplicate_ids_are_fetched_once() {
        let fetcher = Arc::new(FakeFetcher::default());
        let coordinator = Coordinator::new(fetcher.clone());
        let cache = EnrichmentCache::in_memory();
        let matches = vec![
            candidate("same", Some("https://ok.example/a")),
            candidate("same", Some("https://ok.example/a")),
        ];

        coordinator
            .enrich(&matches, &cache, &SilentEnrichmentProgress, &CancellationToken::new())
            .await;
        assert_eq!(fetcher.calls().len(), 1);
    }

    #[tokio::test]
    async fn overlapping_invocations_share_in_flight_fetches() {
        let gate = Arc::new(tokio::sync::Notify::new());
        let fetcher = Arc::new(FakeFetcher {
            gate: Some(gate.clone()),
            ..Default::default()
        });
        let coordinator = Coordinator::new(fetcher.clone());
        let cache = EnrichmentCache::in_memory();
        let matches = vec![candidate("x", Some("https://ok.example/x"))];
        let cancel = CancellationToken::new();

        let first = coordinator.enrich(&matches, &cache, &SilentEnrichmentProgress, &cancel);
        let second = async {
            // Let the first invocation register and start its fetch.
            while fetcher.calls().is_empty() {
                tokio::task::yield_now().await;
            }
            let outcome = coordinator
                .enrich(&matches, &cache, &SilentEnrichmentProgress, &cancel)
                .await;
            outcome
        };
        let release = async {
            while coordinator.in_flight() == 0 || fetcher.calls().is_empty() {
                tokio::task::yield_now().await;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
            gate.notify_waiters();
        };

        let (a, b, ()) = tokio::join!(first, second, release);

        assert_eq!(fetcher.calls().len(), 1);
        assert_eq!(a.fetched, 1);
        assert_eq!(b.fetched + b.cache_hits, 1);
        assert_eq!(cache.len(), 1);
        assert_eq!(coordinator.in_flight(), 0);
    }

    #[tokio::test]
    async fn cancelled_owner_leaves_joined_fetch_registered() {
        let gate = Arc::new(tokio::sync::Notify::new());
        let fetcher = Arc::new(FakeFetcher {
            gate: Some(gate.clone()),
            ..Default::default()
        });
        let coordinator = Coordinator::new(fetcher.clone());
        let cache = EnrichmentCache::in_memory();
        let matches = vec![candidate("x", Some("https://ok.example/x"))];
        let (owner_progress, joiner_progress, late_progress) = (
            RecordingProgress::default(),
            RecordingProgress::default(),
            RecordingProgress::default(),
        );
        let owner_cancel = CancellationToken::new();
        let never = CancellationToken::new();

        let owner = coordinator.enrich(&matches, &cache, &owner_progress, &owner_cancel);
        let joiner = async {
            while fetcher.calls().is_empty() {
                tokio::task::yield_now().await;
            }
            coordinator
                .enrich(&matches, &cache, &joiner_progress, &never)
                .await
        };
        let late = async {
            while joiner_progress.started.lock().unwrap().is_empty() {
                tokio::task::yield_now().await;
            }
            owner_cancel.cancel();
            while owner_progress.done.load(Ordering::SeqCst) == 0 {
                tokio::task::yield_now().await;
            }
            assert_eq!(coordinator.in_flight(), 1);
            coordinator
                .enrich(&matches, &cache, &late_progress, &never)
                .await
        };
        let release = async {
            while late_progress.started.lock().unwrap().is_empty() {
                tokio::task::yield_now().await;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
            gate.notify_waiters();
        };

        let (a, b, c, ()) = tokio::join!(owner, joiner, late, release);

        assert!(a.cancelled);
        assert_eq!(b.joined_in_flight, 1);
        assert_eq!(c.joined_in_flight, 1);
        assert_eq!(b.fetched, 1);
        assert_eq!(c.fetched, 1);
        assert_eq!(fetcher.calls().len(), 1);
        assert_eq!(cache.len(), 1);
        assert_eq!(coordinator.in_flight(), 0);
    }

    #[tokio::test]
    async fn concurrency_cap_is_honoured() {
        let fetcher = Arc::new(FakeFetcher {
            delay: Some(Duration::from_millis(10)),
            ..Default::default()
        });
        let coordinator = Coordinator::new(fetcher.clone()).with_max_concurrency(Some(2));
        let cache = EnrichmentCache::in_memory();

        coordinator
            .enrich(&five_matches(), &cache, &SilentEnrichmentProgress, &CancellationToken::new())
            .await;

        assert_eq!(fetcher.calls().len(), 5);
        assert!(fetcher.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn unbounded_dispatch_issues_all_fetches_together() {
        let fetcher = Arc::new(FakeFetcher {
            delay: Some(Duration::from_millis(20)),
            ..Default::default()
        });
        let coordinator = Coordinator::new(fetcher.clone());
        let cache = EnrichmentCache::in_memory();

        coordinator
            .enrich(&five_matches(), &cache, &SilentEnrichmentProgress, &CancellationToken::new())
            .await;

        assert_eq!(fetcher.peak.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn cancellation_keeps_settled_and_drops_the_rest() {
        let gate = Arc::new(tokio::sync::Notify::new());
        let fetcher = Arc::new(FakeFetcher {
            gate: Some(gate),
            ..Default::default()
        });
        let coordinator = Coordinator::new(fetcher.clone());
        let store = Arc::new(MemoryStore::default());
        let cache = EnrichmentCache::load(store.clone()).await;
        let progress = RecordingProgress::default();
        let cancel = CancellationToken::new();

        let matches = five_matches();
        let run = coordinator.enrich(&matches, &cache, &progress, &cancel);
        let trigger = async {
            while fetcher.calls().len() < 5 {
                tokio::task::yield_now().await;
            }
            cancel.cancel();
        };
        let (outcome, ()) = tokio::join!(run, trigger);

        assert!(outcome.cancelled);
        assert_eq!(outcome.fetched + outcome.failures, 0);
        assert!(cache.is_empty());
        assert_eq!(*store.saves.lock().unwrap(), 0);
        assert_eq!(progress.done.load(Ordering::SeqCst), 1);
        assert_eq!(coordinator.in_flight(), 0);
    }

    #[tokio::test]
    async fn persistence_failure_is_not_fatal() {
        let store = Arc::new(MemoryStore {
            fail_saves: true,
            ..Default::default()
        });
        let cache = EnrichmentCache::load(store.clone()).await;
        let coordinator = Coordinator::new(Arc::new(FakeFetcher::default()));

        let outcome = coordinator
            .enrich(&five_matches(), &cache, &SilentEnrichmentProgress, &CancellationToken::new())
            .await;

        assert_eq!(outcome.snapshot.len(), 5);
        assert_eq!(*store.saves.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn batch_is_persisted_once() {
        let store = Arc::new(MemoryStore::default());
        let cache = EnrichmentCache::load(store.clone()).await;
        let coordinator = Coordinator::new(Arc::new(FakeFetcher::default()));

        coordinator
            .enrich(&five_matches(), &cache, &SilentEnrichmentProgress, &CancellationToken::new())
            .await;

        assert_eq!(*store.saves.lock().unwrap(), 1);
        let stored = store.value.lock().unwrap().clone().unwrap();
        assert!(stored.contains("https://ok.example/1"));
    }
}
