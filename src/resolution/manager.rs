//! Resolution Manager - load orchestration for the viewport
//!
//! The manager owns every mutable cache for one viewport:
//!
//! ```text
//! viewport domain ─► state machine ─► tier
//!                                      │
//!        Coarse ──── coarse cache (resident, always a hit)
//!        Medium ──── warmed/preloaded bins, else provider query (cancellable)
//!        Fine   ──── chunk index → eviction cache / loading set → provider
//!                                      │
//!                     prefetch queue ──┘ (adjacent chunks, next tier)
//! ```
//!
//! All shared state sits behind one `std::sync::Mutex` that is never held
//! across an `.await`. Suspension happens only inside provider calls and
//! the prefetch loop's yield.
//!
//! Every domain-level request bumps the render generation and replaces the
//! active cancellation token. Results carry the generation they were issued
//! under; callers discard any result for which [`ResolutionManager::is_current`]
//! is false. Chunk fetches are never cancelled, only de-duplicated.

use crate::cache::{ChunkId, ChunkIndex, EvictionCache};
use crate::data::{bins_in_domain, Bin, DataProvider, Record, Resolution, TierData, TimeDomain};
use crate::resolution::error::{ResolutionError, ResolutionResult};
use crate::resolution::events::{EventBus, ManagerEvent};
use crate::resolution::prefetch::PrefetchQueue;
use crate::resolution::state::{ResolutionStateMachine, StateMachineConfig, TransitionInfo};
use futures_util::future::join_all;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::{broadcast, oneshot, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

type ChunkPayload = Arc<Vec<Record>>;

/// Runtime configuration for a manager instance
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Tier thresholds and hysteresis
    pub state_machine: StateMachineConfig,
    /// Fine-tier chunk width in microseconds
    pub chunk_size: i64,
    /// Maximum number of cached fine chunks
    pub cache_capacity: usize,
    /// Maximum number of warmed (domain, tier) entries
    pub warm_capacity: usize,
    /// Record cap per chunk fetch
    pub detail_limit: usize,
    /// Load whole-dataset medium bins at init
    pub preload_medium: bool,
    /// Neighbour chunks queued on each side by automatic prefetch
    pub adjacent_count: usize,
    /// Queue adjacent chunks after every fine-tier non-blocking request
    pub auto_prefetch_adjacent: bool,
    /// Extra idle delay between prefetch items
    pub prefetch_idle: Duration,
    /// Capacity of the event broadcast channel
    pub event_capacity: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            state_machine: StateMachineConfig::default(),
            chunk_size: crate::data::MICROS_PER_MINUTE,
            cache_capacity: 50,
            warm_capacity: 8,
            detail_limit: 100_000,
            preload_medium: false,
            adjacent_count: 2,
            auto_prefetch_adjacent: true,
            prefetch_idle: Duration::ZERO,
            event_capacity: 256,
        }
    }
}

/// Result of a blocking request
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DomainData {
    pub data: TierData,
    pub resolution: Resolution,
    /// Everything needed was already cached before the call
    pub from_cache: bool,
    /// Render generation the request was issued under
    pub generation: u64,
}

/// Resolves once a background refinement settles
///
/// Yields `None` when the load failed or was superseded.
pub struct LoadingFuture {
    rx: oneshot::Receiver<Option<DomainData>>,
}

impl Future for LoadingFuture {
    type Output = Option<DomainData>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|result| result.ok().flatten())
    }
}

impl std::fmt::Debug for LoadingFuture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadingFuture").finish_non_exhaustive()
    }
}

/// Result of a non-blocking request
#[derive(Debug)]
pub struct NonBlockingData {
    /// Best data available right now (may be a coarse stand-in)
    pub data: TierData,
    /// Tier of `data`
    pub data_resolution: Resolution,
    /// Target tier chosen by the state machine
    pub resolution: Resolution,
    pub is_loading: bool,
    pub loading_future: Option<LoadingFuture>,
    pub transition_info: TransitionInfo,
    pub generation: u64,
}

/// Diagnostics snapshot
#[derive(Debug, Clone, Serialize)]
pub struct MemoryStats {
    pub resolution: Resolution,
    pub generation: u64,
    pub chunk_index_len: usize,
    pub cached_chunks: usize,
    pub cache_capacity: usize,
    pub cached_records: usize,
    pub coarse_bins: usize,
    pub medium_bins: usize,
    pub warmed_entries: usize,
    pub approx_bytes: usize,
    pub loading_chunks: usize,
    pub queued_chunks: usize,
    pub evictions: u64,
    pub tier_switches: u64,
    pub chunk_fetches: u64,
    pub chunk_failures: u64,
    pub medium_queries: u64,
    pub background_loads: u64,
}

impl std::fmt::Display for MemoryStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "tier={} gen={} chunks={}/{} records={} coarse={} medium={} warmed={} ~{}KB loading={} queued={}",
            self.resolution,
            self.generation,
            self.cached_chunks,
            self.cache_capacity,
            self.cached_records,
            self.coarse_bins,
            self.medium_bins,
            self.warmed_entries,
            self.approx_bytes / 1024,
            self.loading_chunks,
            self.queued_chunks,
        )
    }
}

#[derive(Debug, Default)]
struct FetchCounters {
    chunk_fetches: AtomicU64,
    chunk_failures: AtomicU64,
    medium_queries: AtomicU64,
    background_loads: AtomicU64,
}

/// Mutable manager state, guarded by a single mutex
struct ManagerState {
    index: ChunkIndex,
    machine: ResolutionStateMachine,
    chunks: EvictionCache<ChunkId, ChunkPayload>,
    /// Loading set: id → completion signal carrying the payload
    ///
    /// Joiners read the payload from the channel, never from the cache,
    /// so an eviction between completion and wake-up loses nothing. The
    /// value stays `None` when the fetch fails.
    loading: HashMap<ChunkId, watch::Receiver<Option<ChunkPayload>>>,
    queue: PrefetchQueue,
    coarse: Arc<Vec<Bin>>,
    medium: Option<Arc<Vec<Bin>>>,
    warmed: EvictionCache<(TimeDomain, Resolution), TierData>,
    /// Medium warm-ups currently in flight
    warming: HashSet<TimeDomain>,
    active_token: Option<CancellationToken>,
    /// Bumped by `clear()`; late chunk results from an older epoch are dropped
    epoch: u64,
}

struct Inner {
    provider: Arc<dyn DataProvider>,
    config: ManagerConfig,
    state: Mutex<ManagerState>,
    generation: AtomicU64,
    events: EventBus,
    counters: FetchCounters,
}

/// Chunks gathered for one fine-tier request
struct ChunkSet {
    payloads: Vec<ChunkPayload>,
    all_cached: bool,
}

/// Multi-resolution data manager for one viewport
///
/// Cheap to clone; clones share the same caches.
#[derive(Clone)]
pub struct ResolutionManager {
    inner: Arc<Inner>,
}

impl ResolutionManager {
    /// Initialise against a provider
    ///
    /// Reads the time extent, builds the chunk index, clamps the thresholds
    /// to the dataset and loads the coarse cache (plus the medium cache if
    /// `preload_medium` is set).
    pub async fn init(
        provider: Arc<dyn DataProvider>,
        config: ManagerConfig,
    ) -> ResolutionResult<Self> {
        let (min_time, max_time) = provider.time_extent().await?;
        let index = ChunkIndex::build(min_time, max_time, config.chunk_size)?;

        let sm_config = config
            .state_machine
            .clone()
            .clamp_to_extent(max_time - min_time);
        let machine = ResolutionStateMachine::new(sm_config)?;

        let coarse = provider.coarse_aggregates().await?;
        let medium = if config.preload_medium {
            let whole = TimeDomain::new(min_time, max_time.max(min_time + 1));
            Some(Arc::new(provider.medium_aggregates(whole).await?))
        } else {
            None
        };

        tracing::info!(
            provider = provider.name(),
            min_time,
            max_time,
            chunks = index.len(),
            coarse_bins = coarse.len(),
            medium_bins = medium.as_ref().map(|m| m.len()).unwrap_or(0),
            coarse_threshold = machine.config().coarse_threshold,
            medium_threshold = machine.config().medium_threshold,
            "Resolution manager initialised"
        );

        let state = ManagerState {
            index,
            machine,
            chunks: EvictionCache::new(config.cache_capacity),
            loading: HashMap::new(),
            queue: PrefetchQueue::new(),
            coarse: Arc::new(coarse),
            medium,
            warmed: EvictionCache::new(config.warm_capacity),
            warming: HashSet::new(),
            active_token: None,
            epoch: 0,
        };

        Ok(Self {
            inner: Arc::new(Inner {
                provider,
                events: EventBus::new(config.event_capacity),
                config,
                state: Mutex::new(state),
                generation: AtomicU64::new(0),
                counters: FetchCounters::default(),
            }),
        })
    }

    fn state(&self) -> MutexGuard<'_, ManagerState> {
        // State stays consistent across panics: every critical section is
        // a handful of map operations with no partial updates.
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.inner.config
    }

    /// Subscribe to lifecycle events
    pub fn subscribe(&self) -> broadcast::Receiver<ManagerEvent> {
        self.inner.events.subscribe()
    }

    /// Whole-dataset coarse bins
    pub fn coarse_bins(&self) -> Arc<Vec<Bin>> {
        Arc::clone(&self.state().coarse)
    }

    /// Currently displayed tier
    pub fn current_resolution(&self) -> Resolution {
        self.state().machine.current()
    }

    /// Latest render generation
    pub fn generation(&self) -> u64 {
        self.inner.generation.load(Ordering::SeqCst)
    }

    /// Whether a result issued under `generation` is still authoritative
    pub fn is_current(&self, generation: u64) -> bool {
        self.generation() == generation
    }

    /// Whether a chunk is resident in the eviction cache
    pub fn is_chunk_cached(&self, id: ChunkId) -> bool {
        self.state().chunks.has(&id)
    }

    /// Chunk ids the fine tier would use for `domain`
    pub fn chunks_for_domain(&self, domain: &TimeDomain) -> Vec<ChunkId> {
        self.state().index.chunks_for_domain(domain)
    }

    /// Start a domain-level request: new generation, new token
    fn begin_request(&self) -> (u64, CancellationToken) {
        let token = CancellationToken::new();
        let mut state = self.state();
        if let Some(previous) = state.active_token.replace(token.clone()) {
            previous.cancel();
        }
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        (generation, token)
    }

    fn decide(&self, span: i64) -> TransitionInfo {
        let (info, from) = {
            let mut state = self.state();
            let from = state.machine.current();
            (state.machine.decide(span, Instant::now()), from)
        };

        if info.changed {
            tracing::info!(from = %from, to = %info.resolution, span, "Resolution changed");
            self.inner.events.emit(ManagerEvent::ResolutionChange {
                from,
                to: info.resolution,
            });
        }
        info
    }

    // ==================== Blocking path ====================

    /// Resolve data for `domain`, waiting for anything not cached
    ///
    /// A medium query still running when a newer request arrives is
    /// abandoned and this returns `Err(CancelledFetch)`. That error only
    /// means a newer view exists: check [`ResolutionError::is_cancelled`]
    /// and drop it without reporting. Fine results are returned even if
    /// superseded and must be checked with [`Self::is_current`].
    pub async fn get_data_for_domain(&self, domain: TimeDomain) -> ResolutionResult<DomainData> {
        let (generation, token) = self.begin_request();
        let info = self.decide(domain.span());

        self.inner.events.emit(ManagerEvent::LoadingStart {
            resolution: info.resolution,
            generation,
        });
        let result = self
            .load_tier(domain, info.resolution, generation, &token)
            .await;
        self.inner.events.emit(ManagerEvent::LoadingEnd {
            resolution: info.resolution,
            generation,
        });

        result
    }

    async fn load_tier(
        &self,
        domain: TimeDomain,
        resolution: Resolution,
        generation: u64,
        token: &CancellationToken,
    ) -> ResolutionResult<DomainData> {
        match resolution {
            Resolution::Coarse => Ok(DomainData {
                data: TierData::Bins(bins_in_domain(&self.coarse_bins(), &domain)),
                resolution,
                from_cache: true,
                generation,
            }),
            Resolution::Medium => {
                if let Some(data) = self.cached_medium(&domain) {
                    return Ok(DomainData {
                        data,
                        resolution,
                        from_cache: true,
                        generation,
                    });
                }

                self.inner
                    .counters
                    .medium_queries
                    .fetch_add(1, Ordering::Relaxed);
                let bins = tokio::select! {
                    _ = token.cancelled() => {
                        tracing::debug!(generation, %domain, "Medium query cancelled");
                        return Err(ResolutionError::CancelledFetch { generation });
                    }
                    result = self.inner.provider.medium_aggregates(domain) => result?,
                };

                if self.is_current(generation) {
                    self.state()
                        .warmed
                        .set((domain, Resolution::Medium), TierData::Bins(bins.clone()));
                }

                Ok(DomainData {
                    data: TierData::Bins(bins),
                    resolution,
                    from_cache: false,
                    generation,
                })
            }
            Resolution::Fine => {
                let ids = self.chunks_for_domain(&domain);
                let set = self.ensure_chunks(&ids).await;
                Ok(DomainData {
                    data: TierData::Records(assemble(&set.payloads, &domain)),
                    resolution,
                    from_cache: set.all_cached,
                    generation,
                })
            }
        }
    }

    /// Medium data that needs no provider round trip
    fn cached_medium(&self, domain: &TimeDomain) -> Option<TierData> {
        let mut state = self.state();
        if let Some(data) = state.warmed.get(&(*domain, Resolution::Medium)) {
            return Some(data.clone());
        }
        state
            .medium
            .as_ref()
            .map(|bins| TierData::Bins(bins_in_domain(bins, domain)))
    }

    // ==================== Chunk loading ====================

    /// Make sure every chunk in `ids` is loaded (or has failed)
    ///
    /// Missing chunks are fetched concurrently; chunks already in the
    /// loading set are joined rather than fetched again.
    async fn ensure_chunks(&self, ids: &[ChunkId]) -> ChunkSet {
        let mut payloads: HashMap<ChunkId, ChunkPayload> = HashMap::new();
        let mut to_fetch = Vec::new();
        let mut to_wait = Vec::new();
        let epoch;

        {
            let mut state = self.state();
            epoch = state.epoch;
            for &id in ids {
                if let Some(payload) = state.chunks.get(&id) {
                    payloads.insert(id, Arc::clone(payload));
                } else if let Some(rx) = state.loading.get(&id) {
                    to_wait.push((id, rx.clone()));
                } else {
                    let (tx, rx) = watch::channel(None);
                    state.loading.insert(id, rx);
                    to_fetch.push((id, tx));
                }
            }
        }

        let all_cached = to_fetch.is_empty() && to_wait.is_empty();
        if all_cached {
            tracing::trace!(chunks = ids.len(), "All chunks cached");
        } else {
            tracing::debug!(
                cached = payloads.len(),
                fetching = to_fetch.len(),
                joining = to_wait.len(),
                "Loading chunks"
            );
        }

        let fetches = join_all(
            to_fetch
                .into_iter()
                .map(|(id, tx)| self.load_chunk(id, tx, epoch)),
        );
        let waits = join_all(to_wait.into_iter().map(|(id, mut rx)| async move {
            // Wakes on publish, or with an error once the fetcher gives up
            let _ = rx.changed().await;
            let payload = rx.borrow().clone();
            (id, payload)
        }));
        let (fetched, joined) = futures_util::future::join(fetches, waits).await;

        for (id, payload) in fetched.into_iter().chain(joined) {
            if let Some(payload) = payload {
                payloads.insert(id, payload);
            }
        }

        let mut ordered: Vec<(ChunkId, ChunkPayload)> = payloads.into_iter().collect();
        ordered.sort_by_key(|(id, _)| *id);

        ChunkSet {
            payloads: ordered.into_iter().map(|(_, payload)| payload).collect(),
            all_cached,
        }
    }

    /// Fetch one chunk and publish it to the cache and to joined callers
    ///
    /// `done` is dropped on return, so joiners wake even when nothing was
    /// published.
    async fn load_chunk(
        &self,
        id: ChunkId,
        done: watch::Sender<Option<ChunkPayload>>,
        epoch: u64,
    ) -> (ChunkId, Option<ChunkPayload>) {
        self.inner
            .counters
            .chunk_fetches
            .fetch_add(1, Ordering::Relaxed);

        let bounds = self.state().index.require(id);
        let result = match bounds {
            Ok(bounds) => self
                .inner
                .provider
                .detail_data(bounds.as_domain(), self.inner.config.detail_limit)
                .await
                .map_err(ResolutionError::from),
            Err(e) => Err(e),
        };

        let mut state = self.state();
        if state.epoch != epoch {
            tracing::debug!(%id, "Discarding chunk loaded before clear");
            return (id, None);
        }
        state.loading.remove(&id);

        match result {
            Ok(records) => {
                if records.len() >= self.inner.config.detail_limit {
                    tracing::debug!(%id, limit = self.inner.config.detail_limit, "Chunk truncated at detail limit");
                }
                let payload = Arc::new(records);
                if let Some(evicted) = state.chunks.set(id, Arc::clone(&payload)) {
                    tracing::debug!(%evicted, "Evicted chunk");
                }
                tracing::trace!(%id, records = payload.len(), "Cached chunk");
                // No receivers left is fine
                let _ = done.send(Some(Arc::clone(&payload)));
                (id, Some(payload))
            }
            Err(e) => {
                self.inner
                    .counters
                    .chunk_failures
                    .fetch_add(1, Ordering::Relaxed);
                tracing::warn!(%id, error = %e, "Chunk fetch failed");
                (id, None)
            }
        }
    }

    // ==================== Non-blocking path ====================

    /// Return the best data available now and refine in the background
    ///
    /// Never suspends. Must be called from within a Tokio runtime, since
    /// background loads and prefetches are spawned onto it.
    pub fn get_data_for_domain_non_blocking(&self, domain: TimeDomain) -> NonBlockingData {
        let (generation, token) = self.begin_request();
        let info = self.decide(domain.span());
        let resolution = info.resolution;

        let exact = self.available_now(&domain, resolution);
        let needs_load = resolution != Resolution::Coarse && (exact.is_none() || info.changed);

        let (data, data_resolution) = match exact {
            Some(data) => (data, resolution),
            None => (
                TierData::Bins(bins_in_domain(&self.coarse_bins(), &domain)),
                Resolution::Coarse,
            ),
        };

        let loading_future = if needs_load {
            Some(self.spawn_background_load(domain, resolution, generation, token))
        } else {
            None
        };

        if let Some(next) = info.prefetch_resolution {
            self.prefetch_resolution(domain, next);
        }
        if resolution == Resolution::Fine && self.inner.config.auto_prefetch_adjacent {
            self.prefetch_adjacent(domain, self.inner.config.adjacent_count);
        }

        NonBlockingData {
            data,
            data_resolution,
            resolution,
            is_loading: loading_future.is_some(),
            loading_future,
            transition_info: info,
            generation,
        }
    }

    /// Target-tier data that can be produced without any fetch
    fn available_now(&self, domain: &TimeDomain, resolution: Resolution) -> Option<TierData> {
        match resolution {
            Resolution::Coarse => Some(TierData::Bins(bins_in_domain(&self.coarse_bins(), domain))),
            Resolution::Medium => self.cached_medium(domain),
            Resolution::Fine => {
                let mut state = self.state();
                let ids = state.index.chunks_for_domain(domain);
                let mut payloads = Vec::with_capacity(ids.len());
                for id in ids {
                    payloads.push(Arc::clone(state.chunks.get(&id)?));
                }
                drop(state);
                Some(TierData::Records(assemble(&payloads, domain)))
            }
        }
    }

    fn spawn_background_load(
        &self,
        domain: TimeDomain,
        resolution: Resolution,
        generation: u64,
        token: CancellationToken,
    ) -> LoadingFuture {
        let (tx, rx) = oneshot::channel();
        let manager = self.clone();

        self.inner
            .counters
            .background_loads
            .fetch_add(1, Ordering::Relaxed);
        self.inner.events.emit(ManagerEvent::BackgroundLoadStart {
            resolution,
            generation,
        });

        tokio::spawn(async move {
            let result = manager
                .load_tier(domain, resolution, generation, &token)
                .await;

            let outcome = match result {
                Ok(_) if token.is_cancelled() || !manager.is_current(generation) => {
                    tracing::debug!(generation, "Discarding superseded background load");
                    None
                }
                Ok(data) => {
                    manager.inner.events.emit(ManagerEvent::BackgroundLoadComplete {
                        resolution,
                        generation,
                        success: true,
                    });
                    Some(data)
                }
                Err(e) if e.is_cancelled() => None,
                Err(e) => {
                    tracing::warn!(generation, error = %e, %resolution, "Background load failed");
                    if manager.is_current(generation) {
                        manager.inner.events.emit(ManagerEvent::BackgroundLoadComplete {
                            resolution,
                            generation,
                            success: false,
                        });
                    }
                    None
                }
            };

            // Receiver may have been dropped; nothing to do then
            let _ = tx.send(outcome);
        });

        LoadingFuture { rx }
    }

    // ==================== Prefetch ====================

    /// Queue chunks around `domain` and start draining in the background
    ///
    /// Returns the number of chunk ids newly queued.
    pub fn prefetch_adjacent(&self, domain: TimeDomain, count: usize) -> usize {
        let added = {
            let mut guard = self.state();
            let state = &mut *guard;
            let (chunks, loading) = (&state.chunks, &state.loading);
            state.queue.enqueue_adjacent(&state.index, &domain, count, |id| {
                chunks.has(&id) || loading.contains_key(&id)
            })
        };

        if added > 0 {
            tracing::debug!(added, %domain, "Queued adjacent chunks");
            let manager = self.clone();
            tokio::spawn(async move { manager.process_prefetch_queue().await });
        }
        added
    }

    /// Drain the prefetch queue one chunk at a time
    ///
    /// A no-op when another drain loop is already running.
    pub async fn process_prefetch_queue(&self) {
        if !self.state().queue.try_begin_drain() {
            return;
        }

        loop {
            let next = {
                let mut guard = self.state();
                let state = &mut *guard;
                let (chunks, loading) = (&state.chunks, &state.loading);
                state
                    .queue
                    .pop_next(|id| chunks.has(&id) || loading.contains_key(&id))
            };
            let Some(id) = next else {
                break;
            };

            self.ensure_chunks(&[id]).await;

            tokio::task::yield_now().await;
            if !self.inner.config.prefetch_idle.is_zero() {
                tokio::time::sleep(self.inner.config.prefetch_idle).await;
            }
        }
    }

    /// Warm `resolution` data for `domain` in the background
    ///
    /// Medium bins are stored keyed by `(domain, Medium)` so an identical
    /// request later is served without a provider call. A medium warm-up
    /// runs under the active request's token and is abandoned when a newer
    /// request arrives. Fine warming loads the chunks into the eviction
    /// cache. Coarse is always resident.
    pub fn prefetch_resolution(&self, domain: TimeDomain, resolution: Resolution) {
        let token = match resolution {
            Resolution::Coarse => return,
            Resolution::Medium => {
                let state = self.state();
                if state.medium.is_some()
                    || state.warmed.has(&(domain, resolution))
                    || state.warming.contains(&domain)
                {
                    return;
                }
                state.active_token.clone().unwrap_or_else(CancellationToken::new)
            }
            Resolution::Fine => CancellationToken::new(),
        };

        let manager = self.clone();
        tokio::spawn(async move { manager.warm_until(domain, resolution, token).await });
    }

    /// Warm a tier for `domain`, waiting for completion
    pub async fn warm(&self, domain: TimeDomain, resolution: Resolution) {
        self.warm_until(domain, resolution, CancellationToken::new())
            .await
    }

    async fn warm_until(&self, domain: TimeDomain, resolution: Resolution, token: CancellationToken) {
        match resolution {
            Resolution::Coarse => {}
            Resolution::Medium => {
                let epoch = {
                    let mut state = self.state();
                    if state.warmed.has(&(domain, resolution)) || !state.warming.insert(domain) {
                        return;
                    }
                    state.epoch
                };
                self.inner
                    .counters
                    .medium_queries
                    .fetch_add(1, Ordering::Relaxed);

                let result = tokio::select! {
                    _ = token.cancelled() => None,
                    result = self.inner.provider.medium_aggregates(domain) => Some(result),
                };

                let mut state = self.state();
                if state.epoch != epoch {
                    return;
                }
                state.warming.remove(&domain);
                match result {
                    Some(Ok(bins)) => {
                        state.warmed.set((domain, resolution), TierData::Bins(bins));
                        tracing::debug!(%domain, "Warmed medium tier");
                    }
                    Some(Err(e)) => tracing::debug!(%domain, error = %e, "Medium warm-up failed"),
                    None => tracing::trace!(%domain, "Medium warm-up superseded"),
                }
            }
            Resolution::Fine => {
                let ids = self.chunks_for_domain(&domain);
                self.ensure_chunks(&ids).await;
            }
        }
    }

    // ==================== Maintenance ====================

    /// Reload coarse (and preloaded medium) aggregates wholesale
    ///
    /// Use when the provider's supporting query changes. Bumps the
    /// generation so in-flight results computed under the old query are
    /// discarded, and drops warmed medium data. Returns the new coarse bin
    /// count.
    pub async fn refresh_aggregates(&self) -> ResolutionResult<usize> {
        let coarse = self.inner.provider.coarse_aggregates().await?;
        let medium = if self.inner.config.preload_medium {
            let (min_time, max_time) = self.inner.provider.time_extent().await?;
            let whole = TimeDomain::new(min_time, max_time.max(min_time + 1));
            Some(Arc::new(self.inner.provider.medium_aggregates(whole).await?))
        } else {
            None
        };

        let count = coarse.len();
        {
            let mut state = self.state();
            state.coarse = Arc::new(coarse);
            state.medium = medium;
            state.warmed.clear();
            if let Some(token) = state.active_token.take() {
                token.cancel();
            }
        }
        self.inner.generation.fetch_add(1, Ordering::SeqCst);

        tracing::info!(coarse_bins = count, "Refreshed aggregates");
        Ok(count)
    }

    /// Reset all session state
    ///
    /// Empties the chunk cache, loading set, prefetch queue and warmed
    /// entries, cancels the active request and returns to the coarse tier.
    /// The chunk index and coarse cache belong to the dataset and are kept.
    pub fn clear(&self) {
        {
            let mut state = self.state();
            state.chunks.clear();
            state.loading.clear();
            state.queue.clear();
            state.warmed.clear();
            state.warming.clear();
            state.machine.reset();
            state.epoch += 1;
            if let Some(token) = state.active_token.take() {
                token.cancel();
            }
        }
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        tracing::info!("Resolution manager cleared");
    }

    /// Counts and approximate sizes for diagnostics
    pub fn memory_stats(&self) -> MemoryStats {
        let state = self.state();
        let cached_records: usize = state.chunks.values().map(|c| c.len()).sum();
        let medium_bins = state.medium.as_ref().map(|m| m.len()).unwrap_or(0);
        let warmed_bytes: usize = state.warmed.values().map(|d| d.estimated_size()).sum();
        let bin_size = std::mem::size_of::<Bin>();

        let counters = &self.inner.counters;
        MemoryStats {
            resolution: state.machine.current(),
            generation: self.generation(),
            chunk_index_len: state.index.len(),
            cached_chunks: state.chunks.len(),
            cache_capacity: state.chunks.capacity(),
            cached_records,
            coarse_bins: state.coarse.len(),
            medium_bins,
            warmed_entries: state.warmed.len(),
            approx_bytes: cached_records * Record::ESTIMATED_SIZE
                + (state.coarse.len() + medium_bins) * bin_size
                + warmed_bytes,
            loading_chunks: state.loading.len(),
            queued_chunks: state.queue.len(),
            evictions: state.chunks.evictions(),
            tier_switches: state.machine.switches(),
            chunk_fetches: counters.chunk_fetches.load(Ordering::Relaxed),
            chunk_failures: counters.chunk_failures.load(Ordering::Relaxed),
            medium_queries: counters.medium_queries.load(Ordering::Relaxed),
            background_loads: counters.background_loads.load(Ordering::Relaxed),
        }
    }

    /// Verify cache invariants
    pub fn check_invariants(&self) -> ResolutionResult<()> {
        let state = self.state();
        state.chunks.check_invariants()?;
        state.warmed.check_invariants()
    }
}

/// Concatenate chunk payloads, keep records inside `[start, end]`, sort by time
fn assemble(payloads: &[ChunkPayload], domain: &TimeDomain) -> Vec<Record> {
    let mut records: Vec<Record> = payloads
        .iter()
        .flat_map(|chunk| chunk.iter())
        .filter(|r| domain.contains_inclusive(r.timestamp))
        .cloned()
        .collect();
    records.sort_by_key(|r| r.timestamp);
    records
}
