use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures_util::future::{BoxFuture, FutureExt, Shared, join_all};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, warn};

use crate::error::ApiError;
use crate::transport::{ApiRequest, Transport};

/// Request signature: an endpoint name followed by its parameters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryKey(Vec<String>);

impl QueryKey {
    pub fn new<I, S>(parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        QueryKey(parts.into_iter().map(Into::into).collect())
    }

    pub fn parts(&self) -> &[String] {
        &self.0
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("/"))
    }
}

/// What to fetch for a key, and when the cached value may be reused.
#[derive(Debug, Clone, PartialEq)]
pub struct QuerySpec {
    pub key: QueryKey,
    pub request: ApiRequest,
    /// Disabled queries never fire and report an idle state.
    pub enabled: bool,
    /// Cached data younger than this is served without a refetch.
    pub stale_after: Duration,
}

impl QuerySpec {
    pub fn new(key: QueryKey, request: ApiRequest) -> Self {
        QuerySpec {
            key,
            request,
            enabled: true,
            stale_after: Duration::ZERO,
        }
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }
}

/// Point-in-time view of one query, as seen by a consumer.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryState<T> {
    pub data: Option<T>,
    /// No data yet and a request is running.
    pub is_loading: bool,
    /// A request is running, with or without previous data.
    pub is_fetching: bool,
    pub is_error: bool,
    pub error: Option<ApiError>,
    pub updated_at: Option<Instant>,
}

impl<T> QueryState<T> {
    /// State of a query that is disabled or has never been touched.
    pub fn idle() -> Self {
        QueryState {
            data: None,
            is_loading: false,
            is_fetching: false,
            is_error: false,
            error: None,
            updated_at: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.data.is_some() && !self.is_error
    }

    pub fn error_message(&self) -> Option<String> {
        self.error.as_ref().map(ToString::to_string)
    }

    /// Last good data, else the error, else a not-yet-resolved error.
    pub fn into_result(self) -> Result<T, ApiError> {
        match (self.data, self.error) {
            (Some(data), _) => Ok(data),
            (None, Some(err)) => Err(err),
            (None, None) => Err(ApiError::Invalid("query has not resolved".to_string())),
        }
    }
}

type SharedFetch = Shared<BoxFuture<'static, Result<Arc<Value>, ApiError>>>;

#[derive(Default)]
struct CacheEntry {
    data: Option<Arc<Value>>,
    error: Option<ApiError>,
    updated_at: Option<Instant>,
    invalidated: bool,
    in_flight: Option<SharedFetch>,
}

impl CacheEntry {
    fn is_fresh(&self, stale_after: Duration) -> bool {
        if self.invalidated || self.data.is_none() {
            return false;
        }
        self.updated_at
            .is_some_and(|at| at.elapsed() < stale_after)
    }

    fn state<T: DeserializeOwned>(&self) -> QueryState<T> {
        let fetching = self.in_flight.is_some();
        let mut error = self.error.clone();
        let data = match &self.data {
            Some(value) => match serde_json::from_value::<T>(value.as_ref().clone()) {
                Ok(parsed) => Some(parsed),
                Err(err) => {
                    error = Some(err.into());
                    None
                }
            },
            None => None,
        };
        QueryState {
            is_loading: fetching && data.is_none(),
            is_fetching: fetching,
            is_error: error.is_some(),
            data,
            error,
            updated_at: self.updated_at,
        }
    }
}

/// Polling task for one query. The loop stops when the handle is dropped.
pub struct PollHandle {
    key: QueryKey,
    task: JoinHandle<()>,
}

impl PollHandle {
    pub fn key(&self) -> &QueryKey {
        &self.key
    }

    pub fn stop(self) {}
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[derive(Clone)]
pub struct QueryClient {
    transport: Arc<dyn Transport>,
    cache: Arc<Mutex<HashMap<QueryKey, CacheEntry>>>,
}

fn lock(cache: &Mutex<HashMap<QueryKey, CacheEntry>>) -> MutexGuard<'_, HashMap<QueryKey, CacheEntry>> {
    cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl QueryClient {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        QueryClient {
            transport,
            cache: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Current state without waiting. Starts a background fetch when the
    /// slot is empty or stale and nothing is in flight. Outside a tokio
    /// runtime no fetch is started.
    pub fn observe<T: DeserializeOwned>(&self, spec: &QuerySpec) -> QueryState<T> {
        if !spec.enabled {
            return QueryState::idle();
        }
        let needs_fetch = {
            let cache = lock(&self.cache);
            cache
                .get(&spec.key)
                .is_none_or(|e| e.in_flight.is_none() && !e.is_fresh(spec.stale_after))
        };
        if needs_fetch {
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    let fetch = self.start_fetch(&spec.key, &spec.request);
                    handle.spawn(fetch.map(|_| ()));
                }
                Err(_) => warn!(key = %spec.key, "observe called outside a runtime; fetch skipped"),
            }
        }
        self.peek(&spec.key)
    }

    /// Cached state for a key, never triggering a request.
    pub fn peek<T: DeserializeOwned>(&self, key: &QueryKey) -> QueryState<T> {
        let cache = lock(&self.cache);
        match cache.get(key) {
            Some(entry) => entry.state(),
            None => QueryState::idle(),
        }
    }

    /// Resolve the query: fresh cache is returned as-is, a running request is
    /// joined, otherwise one request is issued.
    pub async fn fetch<T: DeserializeOwned>(&self, spec: &QuerySpec) -> QueryState<T> {
        if !spec.enabled {
            return QueryState::idle();
        }
        let fresh = {
            let cache = lock(&self.cache);
            cache
                .get(&spec.key)
                .is_some_and(|e| e.in_flight.is_none() && e.is_fresh(spec.stale_after))
        };
        if fresh {
            debug!(key = %spec.key, "cache hit");
            return self.peek(&spec.key);
        }
        self.refetch(spec).await
    }

    /// Resolve the query ignoring freshness. A running request is still joined.
    pub async fn refetch<T: DeserializeOwned>(&self, spec: &QuerySpec) -> QueryState<T> {
        if !spec.enabled {
            return QueryState::idle();
        }
        let fetch = self.start_fetch(&spec.key, &spec.request);
        let _ = fetch.await;
        self.peek(&spec.key)
    }

    /// Resolve many independent queries concurrently. Each slot resolves or
    /// fails on its own; one failure does not affect the others.
    pub async fn fetch_all<T: DeserializeOwned>(&self, specs: &[QuerySpec]) -> Vec<QueryState<T>> {
        join_all(specs.iter().map(|spec| self.fetch::<T>(spec))).await
    }

    /// Non-blocking view over many queries, starting any that are due.
    pub fn observe_all<T: DeserializeOwned>(&self, specs: &[QuerySpec]) -> Vec<QueryState<T>> {
        specs.iter().map(|spec| self.observe(spec)).collect()
    }

    /// Mark a slot stale so the next `fetch`/`observe` goes to the network.
    pub fn invalidate(&self, key: &QueryKey) {
        if let Some(entry) = lock(&self.cache).get_mut(key) {
            entry.invalidated = true;
        }
    }

    /// Store data for a key as if a request had just resolved with it.
    pub fn set_data(&self, key: &QueryKey, value: Value) {
        let mut cache = lock(&self.cache);
        let entry = cache.entry(key.clone()).or_default();
        entry.data = Some(Arc::new(value));
        entry.error = None;
        entry.invalidated = false;
        entry.updated_at = Some(Instant::now());
    }

    /// Refetch `spec` immediately and then every `interval`, regardless of
    /// whether earlier attempts failed.
    pub fn poll(&self, spec: QuerySpec, interval: Duration) -> PollHandle {
        let client = self.clone();
        let key = spec.key.clone();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let state: QueryState<Value> = client.refetch(&spec).await;
                if let Some(err) = state.error {
                    debug!(key = %spec.key, error = %err, "poll attempt failed");
                }
            }
        });
        PollHandle { key, task }
    }

    fn start_fetch(&self, key: &QueryKey, request: &ApiRequest) -> SharedFetch {
        let mut cache = lock(&self.cache);
        let entry = cache.entry(key.clone()).or_default();
        if let Some(in_flight) = &entry.in_flight {
            debug!(%key, "joining in-flight request");
            return in_flight.clone();
        }

        let transport = Arc::clone(&self.transport);
        let slots = Arc::clone(&self.cache);
        let request = request.clone();
        let slot_key = key.clone();
        let fetch = async move {
            let result = transport.request(request).await.map(Arc::new);
            let mut cache = lock(&slots);
            let entry = cache.entry(slot_key.clone()).or_default();
            entry.in_flight = None;
            match &result {
                Ok(value) => {
                    entry.data = Some(Arc::clone(value));
                    entry.error = None;
                    entry.invalidated = false;
                    entry.updated_at = Some(Instant::now());
                }
                Err(err) => {
                    debug!(key = %slot_key, error = %err, "query failed");
                    entry.error = Some(err.clone());
                }
            }
            result
        }
        .boxed()
        .shared();

        entry.in_flight = Some(fetch.clone());
        fetch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio_util::sync::CancellationToken;

    use crate::transport::{MultipartBody, ProgressFn};

    /// Answers after `delay`; paths listed in `failing` answer with a 500.
    struct FakeTransport {
        delay: Duration,
        failing: Vec<String>,
        calls: AtomicUsize,
    }

    impl FakeTransport {
        fn new(delay: Duration) -> Self {
            FakeTransport {
                delay,
                failing: Vec::new(),
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Transport for FakeTransport {
        async fn request(&self, request: ApiRequest) -> Result<Value, ApiError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            tokio::time::sleep(self.delay).await;
            if self.failing.contains(&request.path) {
                return Err(ApiError::Http {
                    status: 500,
                    message: "boom".to_string(),
                });
            }
            Ok(json!({"path": request.path, "call": n}))
        }

        async fn upload(
            &self,
            _path: &str,
            _body: MultipartBody,
            _progress: ProgressFn,
            _cancel: CancellationToken,
        ) -> Result<Value, ApiError> {
            Err(ApiError::Invalid("not used".to_string()))
        }
    }

    fn spec(path: &str) -> QuerySpec {
        QuerySpec::new(QueryKey::new(["test", path]), ApiRequest::get(path))
    }

    #[tokio::test(start_paused = true)]
    async fn identical_keys_share_one_request() {
        let fake = Arc::new(FakeTransport::new(Duration::from_secs(1)));
        let client = QueryClient::new(fake.clone());
        let s = spec("/a");

        let (a, b) = tokio::join!(client.fetch::<Value>(&s), client.fetch::<Value>(&s));
        assert_eq!(fake.calls(), 1);
        assert_eq!(a.data, b.data);
        assert_eq!(a.data.unwrap()["call"], 1);
    }

    #[tokio::test(start_paused = true)]
    async fn observe_never_blocks_and_reports_loading() {
        let fake = Arc::new(FakeTransport::new(Duration::from_secs(5)));
        let client = QueryClient::new(fake.clone());
        let s = spec("/slow").stale_after(Duration::from_secs(60));

        let first: QueryState<Value> = client.observe(&s);
        assert!(first.is_loading);
        assert!(first.data.is_none());

        tokio::time::sleep(Duration::from_secs(6)).await;
        let later: QueryState<Value> = client.observe(&s);
        assert!(later.is_success());
        assert_eq!(fake.calls(), 1);
    }

    #[test]
    fn observe_outside_a_runtime_leaves_the_slot_untouched() {
        let fake = Arc::new(FakeTransport::new(Duration::ZERO));
        let client = QueryClient::new(fake.clone());
        let s = spec("/models");

        let state: QueryState<Value> = client.observe(&s);
        assert!(!state.is_loading);
        assert!(!state.is_fetching);
        assert_eq!(state, QueryState::idle());
        assert_eq!(fake.calls(), 0);

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();
        let fetched: QueryState<Value> = runtime.block_on(client.fetch(&s));
        assert!(fetched.is_success());
        assert_eq!(fake.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn disabled_query_never_fires() {
        let fake = Arc::new(FakeTransport::new(Duration::ZERO));
        let client = QueryClient::new(fake.clone());
        let s = spec("/metrics").enabled(false);

        let state: QueryState<Value> = client.fetch(&s).await;
        assert_eq!(state, QueryState::idle());
        let _: QueryState<Value> = client.observe(&s);
        assert_eq!(fake.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn fresh_data_is_served_from_cache_until_stale() {
        let fake = Arc::new(FakeTransport::new(Duration::ZERO));
        let client = QueryClient::new(fake.clone());
        let s = spec("/models").stale_after(Duration::from_secs(60));

        client.fetch::<Value>(&s).await;
        client.fetch::<Value>(&s).await;
        assert_eq!(fake.calls(), 1);

        tokio::time::advance(Duration::from_secs(61)).await;
        let state: QueryState<Value> = client.fetch(&s).await;
        assert_eq!(fake.calls(), 2);
        assert_eq!(state.data.unwrap()["call"], 2);
    }

    #[tokio::test(start_paused = true)]
    async fn invalidate_forces_a_new_request() {
        let fake = Arc::new(FakeTransport::new(Duration::ZERO));
        let client = QueryClient::new(fake.clone());
        let s = spec("/eda").stale_after(Duration::from_secs(3600));

        client.fetch::<Value>(&s).await;
        client.invalidate(&s.key);
        client.fetch::<Value>(&s).await;
        assert_eq!(fake.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failures_are_captured_per_slot() {
        let mut fake = FakeTransport::new(Duration::ZERO);
        fake.failing.push("/bad".to_string());
        let client = QueryClient::new(Arc::new(fake));

        let states: Vec<QueryState<Value>> =
            client.fetch_all(&[spec("/good"), spec("/bad")]).await;
        assert!(states[0].is_success());
        assert!(states[1].is_error);
        assert_eq!(states[1].error_message().as_deref(), Some("boom"));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_refetch_keeps_previous_data() {
        let client = QueryClient::new(Arc::new(FakeTransport::new(Duration::ZERO)));
        let key = QueryKey::new(["health"]);
        client.set_data(&key, json!({"status": "ok"}));

        let mut failing = FakeTransport::new(Duration::ZERO);
        failing.failing.push("/api/v1/health".to_string());
        let client = QueryClient {
            transport: Arc::new(failing),
            cache: client.cache.clone(),
        };
        let s = QuerySpec::new(key, ApiRequest::get("/api/v1/health"));
        let state: QueryState<Value> = client.refetch(&s).await;
        assert!(state.is_error);
        assert_eq!(state.data.unwrap()["status"], "ok");
    }

    #[tokio::test(start_paused = true)]
    async fn poll_refetches_on_a_fixed_interval() {
        let fake = Arc::new(FakeTransport::new(Duration::ZERO));
        let client = QueryClient::new(fake.clone());
        let s = spec("/api/v1/health");

        let handle = client.poll(s.clone(), Duration::from_secs(15));
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(fake.calls(), 3);
        let state: QueryState<Value> = client.peek(&s.key);
        assert_eq!(state.data.unwrap()["call"], 3);

        drop(handle);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(fake.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn poll_continues_after_failures() {
        let mut fake = FakeTransport::new(Duration::ZERO);
        fake.failing.push("/api/v1/health".to_string());
        let fake = Arc::new(fake);
        let client = QueryClient::new(fake.clone());

        let _handle = client.poll(spec("/api/v1/health"), Duration::from_secs(15));
        tokio::time::sleep(Duration::from_secs(46)).await;
        assert_eq!(fake.calls(), 4);
    }

    #[test]
    fn query_key_display_joins_parts() {
        assert_eq!(QueryKey::new(["metrics", "xgb"]).to_string(), "metrics/xgb");
    }
}
