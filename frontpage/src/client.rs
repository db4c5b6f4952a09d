// Copyright (C) 2025 The frontpage developers <frontpage-devs@example.com>
//
// This file is part of frontpage.
//
// frontpage is free software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, either version 3 of the
// License, or (at your option) any later version.
//
// frontpage is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without
// even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU
// General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with frontpage.  If not,
// see <http://www.gnu.org/licenses/>.

//! # the resilient upstream client
//!
//! The Hacker News Firebase endpoints are slow & rate-sensitive, and frontpage's warmup hits them
//! up to two hundred times per refresh, so every outbound request goes through a [tower] stack
//! composing three policies, applied outer-to-inner: retry, circuit-break, time-out. Each retry
//! attempt passes through the breaker, and each breaker-admitted attempt is bounded by the
//! per-attempt timeout, so the breaker sees every attempt's outcome independently & the retry
//! accounting works even when the upstream is hung.
//!
//! [tower]: https://docs.rs/tower/latest/tower/index.html
//!
//! The retry/breaker split guards two different failure modes: transient noise (retry it) and
//! upstream collapse (stop calling). Which mode a given failure belongs to is decided once, in
//! [UpstreamService], and carried on the [Error] value; because there's no `Buffer` in this stack,
//! the typed error survives all the way up to the retry policy & nothing has to guess at
//! classification from a boxed `dyn Error`.

use std::{
    future::Future,
    pin::Pin,
    sync::{Arc, Mutex},
    task::{Context, Poll},
    time::Duration,
};

use bytes::Bytes;
use http::StatusCode;
use pin_project::{pin_project, pinned_drop};
use serde::Deserialize;
use snafu::{Backtrace, ResultExt, Snafu};
use tap::Pipe;
use tokio::time::Instant;
use tower::{
    retry::{Retry, RetryLayer},
    Layer, Service, ServiceBuilder, ServiceExt,
};
use tracing::debug;
use url::Url;

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                       module Error type                                        //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// The upstream failure taxonomy
///
/// "Item missing" (a per-item fetch failing) and "upstream down" (the breaker refusing calls) are
/// different situations demanding different handling; keeping them as distinct variants is what
/// lets the fan-out swallow the former while the reader stale-falls-back on the latter.
#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("The circuit breaker is open; refusing to contact the upstream"))]
    CircuitOpen { backtrace: Backtrace },
    #[snafu(display("The upstream returned {status}; not retrying"))]
    Permanent {
        status: StatusCode,
        backtrace: Backtrace,
    },
    #[snafu(display("Failed to create an HTTP client: {source}"))]
    ReqwestClient {
        source: reqwest::Error,
        backtrace: Backtrace,
    },
    #[snafu(display("The attempt timed-out after {limit:?}"))]
    Timeout {
        limit: Duration,
        backtrace: Backtrace,
    },
    #[snafu(display("The upstream returned {status}"))]
    Transient {
        status: StatusCode,
        backtrace: Backtrace,
    },
    #[snafu(display("Transport error: {source}"))]
    Transport {
        source: reqwest::Error,
        backtrace: Backtrace,
    },
}

impl Error {
    /// Transient failures are retry-eligible & count against the breaker; everything else is
    /// neither.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Timeout { .. } | Error::Transient { .. } | Error::Transport { .. }
        )
    }
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Error::CircuitOpen { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                           parameters                                           //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Tunables for the retry & timeout layers
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ClientParameters {
    /// Per-attempt deadline; on expiry the attempt fails with [Error::Timeout] & the underlying
    /// request is cancelled
    #[serde(rename = "per-attempt-timeout")]
    pub per_attempt_timeout: Duration,
    /// Maximum number of *re*-tries; the attempt budget is one greater
    pub retries: usize,
    /// The backoff before retry k is `2^k` of these; one second yields the production schedule of
    /// 2s/4s/8s, tests shrink it
    #[serde(rename = "retry-unit")]
    pub retry_unit: Duration,
}

impl Default for ClientParameters {
    fn default() -> Self {
        ClientParameters {
            per_attempt_timeout: Duration::from_secs(8),
            retries: 3,
            retry_unit: Duration::from_secs(1),
        }
    }
}

/// Tunables for the circuit breaker
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct BreakerParameters {
    /// Consecutive transient failures at which the breaker opens
    pub threshold: u32,
    /// How long an opened breaker refuses calls before admitting a probe
    #[serde(rename = "open-for")]
    pub open_for: Duration,
}

impl Default for BreakerParameters {
    fn default() -> Self {
        BreakerParameters {
            threshold: 5,
            open_for: Duration::from_secs(30),
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                        the circuit breaker                                     //
////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Debug)]
enum State {
    /// Admitting everything; counting consecutive transient failures
    Closed { failures: u32 },
    /// Refusing everything until `until`
    Open { until: Instant },
    /// One probe is in flight; its outcome decides what happens next
    HalfOpen,
}

/// The circuit breaker state machine
///
/// Clones share state, so one `Breaker` handed to [make_client] is shared by every clone of the
/// resulting client-- the "consecutive" in "consecutive transient failures" is counted across all
/// callers. Not a global singleton: construct a fresh one per test & inject it.
#[derive(Clone, Debug)]
pub struct Breaker {
    state: Arc<Mutex<State>>,
    threshold: u32,
    open_for: Duration,
}

/// Proof of admission through the breaker; handed back with the attempt's outcome
#[derive(Debug)]
pub struct Ticket {
    probe: bool,
}

impl Breaker {
    pub fn new(params: &BreakerParameters) -> Breaker {
        Breaker {
            state: Arc::new(Mutex::new(State::Closed { failures: 0 })),
            threshold: params.threshold,
            open_for: params.open_for,
        }
    }
    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        // A panic while holding this lock can't leave the state torn (every mutation is a single
        // assignment), so just take the guard back from a poisoned mutex.
        self.state.lock().unwrap_or_else(|err| err.into_inner())
    }
    /// Request admission for one attempt. `None` means the breaker is open.
    fn admit(&self) -> Option<Ticket> {
        let mut state = self.lock();
        match *state {
            State::Closed { .. } => Some(Ticket { probe: false }),
            State::Open { until } => {
                if Instant::now() < until {
                    None
                } else {
                    *state = State::HalfOpen;
                    Some(Ticket { probe: true })
                }
            }
            State::HalfOpen => None,
        }
    }
    /// The attempt reached a live upstream (success, or a permanent failure-- the upstream
    /// answered, so it doesn't indict it).
    fn on_contact(&self, ticket: &Ticket) {
        let mut state = self.lock();
        match (&*state, ticket.probe) {
            // A success from a call admitted before the breaker opened doesn't close it early.
            (State::Open { .. }, false) => (),
            _ => *state = State::Closed { failures: 0 },
        }
    }
    /// The attempt failed transiently.
    fn on_transient(&self, ticket: &Ticket) {
        let mut state = self.lock();
        *state = match (&*state, ticket.probe) {
            (_, true) => State::Open {
                until: Instant::now() + self.open_for,
            },
            (State::Closed { failures }, false) => {
                let failures = failures + 1;
                if failures >= self.threshold {
                    debug!("Circuit breaker opening after {failures} consecutive failures");
                    State::Open {
                        until: Instant::now() + self.open_for,
                    }
                } else {
                    State::Closed { failures }
                }
            }
            (State::Open { until }, false) => State::Open { until: *until },
            // Some other call is probing; its outcome decides.
            (State::HalfOpen, false) => State::HalfOpen,
        };
    }
    /// The attempt was cancelled before completing. A dropped probe must not wedge the breaker in
    /// half-open; re-open with an already-lapsed deadline so the next call becomes the new probe.
    fn abandon(&self, ticket: &Ticket) {
        if ticket.probe {
            let mut state = self.lock();
            if matches!(*state, State::HalfOpen) {
                *state = State::Open {
                    until: Instant::now(),
                };
            }
        }
    }
}

#[derive(Clone, Debug)]
pub struct CircuitBreakerLayer {
    breaker: Breaker,
}

impl CircuitBreakerLayer {
    pub fn new(breaker: Breaker) -> CircuitBreakerLayer {
        CircuitBreakerLayer { breaker }
    }
}

impl<S> Layer<S> for CircuitBreakerLayer {
    type Service = CircuitBreakerService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        CircuitBreakerService {
            inner,
            breaker: self.breaker.clone(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct CircuitBreakerService<S> {
    inner: S,
    breaker: Breaker,
}

impl<S> Service<Url> for CircuitBreakerService<S>
where
    S: Service<Url, Response = Bytes, Error = Error>,
{
    type Response = Bytes;
    type Error = Error;
    type Future = CircuitBreakerFuture<S::Future>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<()>> {
        self.inner.poll_ready(cx)
    }

    // Admission happens here, *before* the inner service is invoked: while the breaker is open,
    // zero transport attempts are made.
    fn call(&mut self, request: Url) -> Self::Future {
        match self.breaker.admit() {
            Some(ticket) => CircuitBreakerFuture {
                breaker: self.breaker.clone(),
                ticket: Some(ticket),
                inner: Some(self.inner.call(request)),
            },
            None => CircuitBreakerFuture {
                breaker: self.breaker.clone(),
                ticket: None,
                inner: None,
            },
        }
    }
}

/// A [Future] that reports its outcome back to the [Breaker] on completion
#[pin_project(PinnedDrop)]
pub struct CircuitBreakerFuture<F> {
    breaker: Breaker,
    ticket: Option<Ticket>,
    #[pin]
    inner: Option<F>,
}

impl<F> Future for CircuitBreakerFuture<F>
where
    F: Future<Output = Result<Bytes>>,
{
    type Output = Result<Bytes>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        match this.inner.as_pin_mut() {
            None => Poll::Ready(CircuitOpenSnafu.fail()),
            Some(inner) => match inner.poll(cx) {
                Poll::Ready(result) => {
                    if let Some(ticket) = this.ticket.take() {
                        match &result {
                            Err(err) if err.is_transient() => this.breaker.on_transient(&ticket),
                            _ => this.breaker.on_contact(&ticket),
                        }
                    }
                    Poll::Ready(result)
                }
                Poll::Pending => Poll::Pending,
            },
        }
    }
}

#[pinned_drop]
impl<F> PinnedDrop for CircuitBreakerFuture<F> {
    fn drop(self: Pin<&mut Self>) {
        let this = self.project();
        if let Some(ticket) = this.ticket.take() {
            this.breaker.abandon(&ticket);
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                      the per-attempt timeout                                   //
////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Clone, Debug)]
pub struct DeadlineLayer {
    limit: Duration,
}

impl DeadlineLayer {
    pub fn new(limit: Duration) -> DeadlineLayer {
        DeadlineLayer { limit }
    }
}

impl<S> Layer<S> for DeadlineLayer {
    type Service = Deadline<S>;

    fn layer(&self, inner: S) -> Self::Service {
        Deadline {
            inner,
            limit: self.limit,
        }
    }
}

/// Bound each attempt by a wall-clock limit
///
/// tower ships a `Timeout` of its own, but it erases the error type to `Box<dyn Error>`; this one
/// keeps [Error] intact so the layers above can classify. On expiry the inner future is dropped,
/// which cancels the underlying request.
#[derive(Clone, Debug)]
pub struct Deadline<S> {
    inner: S,
    limit: Duration,
}

impl<S> Service<Url> for Deadline<S>
where
    S: Service<Url, Response = Bytes, Error = Error>,
{
    type Response = Bytes;
    type Error = Error;
    type Future = DeadlineFuture<S::Future>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<()>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Url) -> Self::Future {
        DeadlineFuture {
            limit: self.limit,
            inner: tokio::time::timeout(self.limit, self.inner.call(request)),
        }
    }
}

#[pin_project]
pub struct DeadlineFuture<F> {
    limit: Duration,
    #[pin]
    inner: tokio::time::Timeout<F>,
}

impl<F> Future for DeadlineFuture<F>
where
    F: Future<Output = Result<Bytes>>,
{
    type Output = Result<Bytes>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        match this.inner.poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_elapsed)) => Poll::Ready(TimeoutSnafu { limit: *this.limit }.fail()),
            Poll::Pending => Poll::Pending,
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                        the reqwest adapter                                     //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// The innermost [Service]: issue the GET via [reqwest] & classify the outcome
///
/// 2xx yields the body; 5xx, 408 & 429 are [Error::Transient]; transport failures are
/// [Error::Transport] (also transient); every other status is [Error::Permanent]. The User-Agent
/// header identifying this service is configured once, on the wrapped [reqwest::Client], so it
/// rides on every outbound request.
#[derive(Clone, Debug)]
pub struct UpstreamService {
    client: reqwest::Client,
}

impl UpstreamService {
    pub fn new(client: reqwest::Client) -> UpstreamService {
        UpstreamService { client }
    }
}

impl Service<Url> for UpstreamService {
    type Response = Bytes;
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<Bytes>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, url: Url) -> Self::Future {
        let client = self.client.clone();
        Box::pin(async move {
            debug!("GET {url}");
            let response = client.get(url).send().await.context(TransportSnafu)?;
            let status = response.status();
            if status.is_success() {
                response.bytes().await.context(TransportSnafu)
            } else if status.is_server_error()
                || status == StatusCode::REQUEST_TIMEOUT
                || status == StatusCode::TOO_MANY_REQUESTS
            {
                TransientSnafu { status }.fail()
            } else {
                PermanentSnafu { status }.fail()
            }
        })
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                         the retry policy                                       //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Retry transient failures with exponential backoff
///
/// [Retry] clones the policy into each request's future, so the `attempted` count here is
/// per-logical-call. The schedule is fixed-- 2^k units, no jitter-- so this carries its own
/// arithmetic rather than tower's jittered `ExponentialBackoff`.
#[derive(Clone, Debug)]
pub struct TransientRetryPolicy {
    attempted: usize,
    retries: usize,
    unit: Duration,
}

impl TransientRetryPolicy {
    pub fn new(params: &ClientParameters) -> TransientRetryPolicy {
        TransientRetryPolicy {
            attempted: 0,
            retries: params.retries,
            unit: params.retry_unit,
        }
    }
}

impl tower::retry::Policy<Url, Bytes, Error> for TransientRetryPolicy {
    type Future = tokio::time::Sleep;

    fn retry(&mut self, _request: &mut Url, result: &mut Result<Bytes>) -> Option<Self::Future> {
        match result {
            Err(err) if err.is_transient() && self.attempted < self.retries => {
                self.attempted += 1;
                let backoff = self.unit * (1u32 << self.attempted);
                debug!(
                    "Retry {} of {} after {backoff:?}: {err}",
                    self.attempted, self.retries
                );
                Some(tokio::time::sleep(backoff))
            }
            _ => None,
        }
    }

    fn clone_request(&mut self, request: &Url) -> Option<Url> {
        Some(request.clone())
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                           Public API                                           //
////////////////////////////////////////////////////////////////////////////////////////////////////

// If you need to update this, say due to adding or removing a layer in `make_client()`, just do a
// `cargo build`; the `make_client()` return type won't type-check & the compiler will tell you the
// type it found.
pub type ClientType = Retry<TransientRetryPolicy, CircuitBreakerService<Deadline<UpstreamService>>>;

/// Build the resilient upstream client
///
/// ```text
///                    requests
///                        |
///                        v
/// +-----------    retry on failure    -----------+
/// | +---------    circuit breaker    ---------+  |
/// | | +-------   per-attempt timeout  ------+ |  |
/// | | | +-----  reqwest (+ User-Agent) ---+ | |  |
/// | | | |                                 | | |  |
/// | | | |             remote              | | |  |
/// | | | |                                 | | |  |
/// | | | +-----  reqwest (+ User-Agent) <--+ | |  |
/// | | +-------   per-attempt timeout  <-----+ |  |
/// | +---------    circuit breaker    <--------+  |
/// +-----------    retry on failure    <----------+
///                        |
///                        v
///                    responses
/// ```
///
/// The breaker state is shared by every clone of the returned client; hand the same [Breaker] in
/// wherever the count should be shared, a fresh one in tests.
pub fn make_client(
    user_agent: &str,
    params: &ClientParameters,
    breaker: Breaker,
) -> Result<ClientType> {
    let client = reqwest::Client::builder()
        .user_agent(user_agent)
        .build()
        .context(ReqwestClientSnafu)?;
    ServiceBuilder::new()
        .layer(RetryLayer::new(TransientRetryPolicy::new(params)))
        .layer(CircuitBreakerLayer::new(breaker))
        .layer(DeadlineLayer::new(params.per_attempt_timeout))
        .service(UpstreamService::new(client))
        .pipe(Ok)
}

/// Issue one logical GET through the full policy stack
pub async fn fetch(client: &ClientType, url: Url) -> Result<Bytes> {
    client.clone().oneshot(url).await
}

#[cfg(test)]
mod test {

    use super::*;

    use wiremock::{
        matchers::{method, path},
        Mock, MockServer, ResponseTemplate,
    };

    fn fast_params(retries: usize) -> ClientParameters {
        ClientParameters {
            per_attempt_timeout: Duration::from_millis(50),
            retries,
            retry_unit: Duration::from_millis(2),
        }
    }

    fn breaker(threshold: u32, open_for: Duration) -> Breaker {
        Breaker::new(&BreakerParameters { threshold, open_for })
    }

    async fn get(client: &ClientType, server: &MockServer) -> Result<Bytes> {
        let url = format!("{}/beststories.json", server.uri()).parse().unwrap();
        fetch(client, url).await
    }

    #[tokio::test]
    async fn four_attempts_then_give_up() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/beststories.json"))
            .respond_with(ResponseTemplate::new(500))
            .expect(4)
            .mount(&mock_server)
            .await;

        let client = make_client(
            "frontpage unit tests/0.0.1",
            &fast_params(3),
            breaker(100, Duration::from_secs(30)),
        )
        .unwrap();

        assert!(matches!(
            get(&client, &mock_server).await,
            Err(Error::Transient { .. })
        ));
    }

    #[tokio::test]
    async fn permanent_failures_are_not_retried() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = make_client(
            "frontpage unit tests/0.0.1",
            &fast_params(3),
            breaker(100, Duration::from_secs(30)),
        )
        .unwrap();

        assert!(matches!(
            get(&client, &mock_server).await,
            Err(Error::Permanent { .. })
        ));
    }

    #[tokio::test]
    async fn timeouts_are_classified() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200).set_delay(Duration::from_millis(250)),
            )
            .mount(&mock_server)
            .await;

        let client = make_client(
            "frontpage unit tests/0.0.1",
            &fast_params(0),
            breaker(100, Duration::from_secs(30)),
        )
        .unwrap();

        assert!(matches!(
            get(&client, &mock_server).await,
            Err(Error::Timeout { .. })
        ));
    }

    #[tokio::test]
    async fn breaker_opens_after_consecutive_failures() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&mock_server)
            .await;

        let client = make_client(
            "frontpage unit tests/0.0.1",
            &fast_params(0),
            breaker(5, Duration::from_secs(30)),
        )
        .unwrap();

        for _ in 0..5 {
            assert!(matches!(
                get(&client, &mock_server).await,
                Err(Error::Transient { .. })
            ));
        }
        // The sixth call must be refused without touching the wire.
        assert!(matches!(
            get(&client, &mock_server).await,
            Err(Error::CircuitOpen { .. })
        ));
        assert_eq!(mock_server.received_requests().await.unwrap().len(), 5);
    }

    #[tokio::test]
    async fn half_open_probe_success_closes() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(1)
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("[]"))
            .mount(&mock_server)
            .await;

        let client = make_client(
            "frontpage unit tests/0.0.1",
            &fast_params(0),
            breaker(1, Duration::from_millis(50)),
        )
        .unwrap();

        assert!(get(&client, &mock_server).await.is_err()); // opens
        assert!(matches!(
            get(&client, &mock_server).await,
            Err(Error::CircuitOpen { .. })
        ));
        tokio::time::sleep(Duration::from_millis(75)).await;
        assert!(get(&client, &mock_server).await.is_ok()); // the probe
        assert!(get(&client, &mock_server).await.is_ok()); // closed again
    }

    #[tokio::test]
    async fn half_open_probe_failure_reopens() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&mock_server)
            .await;

        let client = make_client(
            "frontpage unit tests/0.0.1",
            &fast_params(0),
            breaker(1, Duration::from_millis(50)),
        )
        .unwrap();

        assert!(get(&client, &mock_server).await.is_err()); // opens
        tokio::time::sleep(Duration::from_millis(75)).await;
        assert!(matches!(
            get(&client, &mock_server).await,
            Err(Error::Transient { .. })
        )); // the probe; fails, re-opens
        assert!(matches!(
            get(&client, &mock_server).await,
            Err(Error::CircuitOpen { .. })
        ));
        assert_eq!(mock_server.received_requests().await.unwrap().len(), 2);
    }

    // The FSM on its own, under a paused clock.
    #[tokio::test(start_paused = true)]
    async fn breaker_state_machine() {
        let breaker = breaker(3, Duration::from_secs(30));

        // Interleaved contact resets the count.
        for _ in 0..2 {
            let ticket = breaker.admit().unwrap();
            breaker.on_transient(&ticket);
        }
        let ticket = breaker.admit().unwrap();
        breaker.on_contact(&ticket);
        for _ in 0..2 {
            let ticket = breaker.admit().unwrap();
            breaker.on_transient(&ticket);
        }
        assert!(breaker.admit().is_some());

        // Third consecutive failure opens it.
        let ticket = breaker.admit().unwrap();
        breaker.on_transient(&ticket);
        assert!(breaker.admit().is_none());

        // After the open interval, exactly one probe is admitted.
        tokio::time::advance(Duration::from_secs(31)).await;
        let probe = breaker.admit().unwrap();
        assert!(breaker.admit().is_none());

        // An abandoned probe re-arms the breaker rather than wedging it.
        breaker.abandon(&probe);
        let probe = breaker.admit().unwrap();
        breaker.on_contact(&probe);
        assert!(breaker.admit().is_some());
    }
}
