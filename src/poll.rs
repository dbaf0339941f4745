//! Background feed polling.
//!
//! [`start`] spawns one ticker task per [`Source`].  The first attempt is
//! issued immediately and then once per interval.  Every attempt runs as its
//! own task, so a slow response never holds up the ticker or any other
//! source.  Attempts for the same source may overlap, but at most
//! [`MAX_IN_FLIGHT`] at a time: a tick that finds every slot taken is
//! skipped, so an upstream that never answers costs a bounded number of
//! pending requests.
//!
//! Results reach the consumer through a per-source gate:
//!
//! * every attempt is tagged with a sequence number when it is issued, and a
//!   completion is only delivered if its number is higher than the last one
//!   delivered.  The newest attempt to *resolve* wins and an older attempt
//!   that finishes late is dropped;
//! * the consumer callback runs while the gate is locked, and stopping the
//!   source closes the gate under the same lock.  Once [`PollHandle::stop`]
//!   returns, the callback is never invoked again, even for attempts that
//!   were in flight.
//!
//! ## For contributors
//!
//! The callback is invoked from runtime worker threads.  Keep it short (the
//! dashboard only pushes into a channel) and never call `stop` from inside
//! it: the gate lock is not re-entrant.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::FetchError;
use crate::fetch::Fetch;
use crate::source::{self, Record, Source, Target};

/// Shortest interval a ticker will run at.
const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Unresolved attempts allowed per source.
const MAX_IN_FLIGHT: usize = 2;

/// The state of a source as of its most recently resolved attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum PollResult {
    /// No attempt has resolved yet.
    Loading,
    /// The latest resolved attempt succeeded.
    Ready {
        records: Vec<Record>,
        fetched_at: DateTime<Utc>,
        /// Sample index the attempt was issued with, for sampled endpoints.
        sample_index: Option<u32>,
    },
    /// The latest resolved attempt failed.  Any earlier data is gone.
    Failed(FetchError),
}

impl PollResult {
    /// First record of a `Ready` result.
    pub fn latest(&self) -> Option<&Record> {
        match self {
            PollResult::Ready { records, .. } => source::latest(records),
            _ => None,
        }
    }
}

type UpdateFn = Box<dyn Fn(PollResult) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Delivery {
    Applied,
    Stale { applied: u64 },
    Closed,
}

struct GateState {
    /// Highest sequence number delivered so far.
    applied: u64,
    closed: bool,
}

struct Gate {
    state: Mutex<GateState>,
    on_update: UpdateFn,
}

impl Gate {
    fn new(on_update: UpdateFn) -> Self {
        Self {
            state: Mutex::new(GateState {
                applied: 0,
                closed: false,
            }),
            on_update,
        }
    }

    fn deliver(&self, seq: u64, result: PollResult) -> Delivery {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.closed {
            return Delivery::Closed;
        }
        if seq <= state.applied {
            return Delivery::Stale {
                applied: state.applied,
            };
        }
        state.applied = seq;
        (self.on_update)(result);
        Delivery::Applied
    }

    /// Publish the initial `Loading` state without consuming a sequence number.
    fn announce_loading(&self) {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if !state.closed {
            (self.on_update)(PollResult::Loading);
        }
    }

    fn close(&self) {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .closed = true;
    }
}

/// Owns a running source.  Dropping the handle stops it.
pub struct PollHandle {
    id: String,
    cancel: CancellationToken,
    gate: Arc<Gate>,
    ticker: Option<JoinHandle<()>>,
}

impl PollHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Stop polling.  No update is delivered after this returns.
    pub fn stop(self) {
        // `Drop` does the teardown.
    }

    fn shutdown(&mut self) {
        self.cancel.cancel();
        self.gate.close();
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
            debug!(source = %self.id, "polling stopped");
        }
    }
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Start polling `source`, reporting every applied state to `on_update`.
///
/// `on_update` receives `Loading` before this returns.  Must be called from
/// within a Tokio runtime.
pub fn start<F>(source: Source, fetcher: Arc<dyn Fetch>, on_update: F) -> PollHandle
where
    F: Fn(PollResult) + Send + Sync + 'static,
{
    let gate = Arc::new(Gate::new(Box::new(on_update)));
    gate.announce_loading();

    let cancel = CancellationToken::new();
    let id = source.id.clone();
    let ticker = tokio::spawn(run(
        Arc::new(source),
        fetcher,
        Arc::clone(&gate),
        cancel.clone(),
    ));

    PollHandle {
        id,
        cancel,
        gate,
        ticker: Some(ticker),
    }
}

async fn run(
    source: Arc<Source>,
    fetcher: Arc<dyn Fetch>,
    gate: Arc<Gate>,
    cancel: CancellationToken,
) {
    let period = source.interval.max(MIN_INTERVAL);
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(
        source = %source.id,
        url = %source.endpoint.base_url(),
        interval_ms = period.as_millis() as u64,
        "polling started"
    );

    let slots = Arc::new(Semaphore::new(MAX_IN_FLIGHT));
    let mut seq: u64 = 0;
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let Ok(slot) = Arc::clone(&slots).try_acquire_owned() else {
                    debug!(source = %source.id, in_flight = MAX_IN_FLIGHT, "skipping tick, attempts unresolved");
                    continue;
                };
                seq += 1;
                let target = source.endpoint.target();
                tokio::spawn(attempt(
                    Arc::clone(&source),
                    Arc::clone(&fetcher),
                    Arc::clone(&gate),
                    cancel.clone(),
                    seq,
                    target,
                    slot,
                ));
            }
        }
    }
}

/// Runs one attempt.  `_slot` is released when the attempt resolves or is
/// abandoned.

async fn attempt(
    source: Arc<Source>,
    fetcher: Arc<dyn Fetch>,
    gate: Arc<Gate>,
    cancel: CancellationToken,
    seq: u64,
    target: Target,
    _slot: OwnedSemaphorePermit,
) {
    let outcome = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            debug!(source = %source.id, seq, "attempt abandoned in flight");
            return;
        }
        outcome = fetcher.get_json(&target.url) => outcome,
    };

    let result = match outcome {
        Ok(body) => {
            let records = (source.normalize)(body);
            info!(
                source = %source.id,
                seq,
                records = records.len(),
                sample_index = ?target.sample_index,
                "received"
            );
            PollResult::Ready {
                records,
                fetched_at: Utc::now(),
                sample_index: target.sample_index,
            }
        }
        Err(error) => {
            warn!(source = %source.id, seq, url = %target.url, %error, "fetch failed");
            PollResult::Failed(error)
        }
    };

    match gate.deliver(seq, result) {
        Delivery::Applied => {}
        Delivery::Stale { applied } => {
            debug!(source = %source.id, seq, applied, "discarding out-of-order completion");
        }
        Delivery::Closed => {
            debug!(source = %source.id, seq, "discarding completion after stop");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    use async_trait::async_trait;
    use serde_json::{json, Value};
    use tokio::sync::{mpsc, oneshot};
    use tokio::time::{sleep, Instant};
    use url::Url;

    use crate::source::Endpoint;

    type Reply = Result<Value, FetchError>;

    /// A [`Fetch`] whose calls complete only when the test says so.
    ///
    /// Each call takes the next reply channel in order; calls beyond the
    /// script never complete.
    struct Scripted {
        replies: Mutex<VecDeque<oneshot::Receiver<Reply>>>,
        issued: mpsc::UnboundedSender<(Url, Instant)>,
    }

    #[async_trait]
    impl Fetch for Scripted {
        async fn get_json(&self, url: &Url) -> Result<Value, FetchError> {
            let _ = self.issued.send((url.clone(), Instant::now()));
            let reply = self.replies.lock().unwrap().pop_front();
            match reply {
                Some(rx) => rx
                    .await
                    .unwrap_or_else(|_| Err(FetchError::Transport("reply dropped".into()))),
                None => std::future::pending().await,
            }
        }
    }

    fn script(
        n: usize,
    ) -> (
        Arc<dyn Fetch>,
        VecDeque<oneshot::Sender<Reply>>,
        mpsc::UnboundedReceiver<(Url, Instant)>,
    ) {
        let (issued_tx, issued_rx) = mpsc::unbounded_channel();
        let mut senders = VecDeque::new();
        let mut receivers = VecDeque::new();
        for _ in 0..n {
            let (tx, rx) = oneshot::channel();
            senders.push_back(tx);
            receivers.push_back(rx);
        }
        let fetcher = Scripted {
            replies: Mutex::new(receivers),
            issued: issued_tx,
        };
        (Arc::new(fetcher), senders, issued_rx)
    }

    fn collector() -> (
        impl Fn(PollResult) + Send + Sync + 'static,
        mpsc::UnboundedReceiver<PollResult>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            move |result| {
                let _ = tx.send(result);
            },
            rx,
        )
    }

    fn fixed_source(interval_ms: u64) -> Source {
        let url = Url::parse("http://feed.test/anomalies?anomaly_type=TooHigh").unwrap();
        Source::new("test", Endpoint::fixed(url)).with_interval(Duration::from_millis(interval_ms))
    }

    fn latest_id(result: &PollResult) -> Option<String> {
        result.latest()?.text("event_id")
    }

    #[tokio::test(start_paused = true)]
    async fn loading_is_published_then_first_attempt_is_immediate() {
        let (fetcher, _replies, mut issued) = script(1);
        let (on_update, mut updates) = collector();
        let started = Instant::now();

        let _handle = start(fixed_source(5000), fetcher, on_update);

        assert_eq!(updates.recv().await, Some(PollResult::Loading));
        let (_, at) = issued.recv().await.unwrap();
        assert!(at.duration_since(started) < Duration::from_millis(1));
    }

    #[tokio::test(start_paused = true)]
    async fn attempts_repeat_every_interval() {
        let (fetcher, mut replies, mut issued) = script(3);
        let (on_update, _updates) = collector();
        let started = Instant::now();

        let _handle = start(fixed_source(5000), fetcher, on_update);

        let mut at = Vec::new();
        for _ in 0..3 {
            let (_, when) = issued.recv().await.unwrap();
            at.push(when.duration_since(started));
            replies.pop_front().unwrap().send(Ok(json!([]))).unwrap();
        }
        assert_eq!(
            at,
            vec![
                Duration::ZERO,
                Duration::from_millis(5000),
                Duration::from_millis(10000)
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn hung_upstream_holds_a_bounded_number_of_attempts() {
        let (fetcher, _replies, mut issued) = script(0);
        let (on_update, mut updates) = collector();
        let _handle = start(fixed_source(5000), fetcher, on_update);

        sleep(Duration::from_secs(600)).await;

        let mut pending = 0;
        while issued.try_recv().is_ok() {
            pending += 1;
        }
        assert_eq!(pending, MAX_IN_FLIGHT);
        assert_eq!(updates.try_recv().ok(), Some(PollResult::Loading));
        assert!(updates.try_recv().is_err(), "Loading stays until an attempt resolves");
    }

    #[tokio::test(start_paused = true)]
    async fn resolved_attempt_frees_a_slot_for_the_next_tick() {
        // First call hangs for good, second is answered, later calls hang.
        let (fetcher, mut replies, mut issued) = script(2);
        let (on_update, mut updates) = collector();
        let started = Instant::now();
        let _handle = start(fixed_source(1000), fetcher, on_update);

        assert_eq!(updates.recv().await, Some(PollResult::Loading));
        issued.recv().await.unwrap();
        issued.recv().await.unwrap();

        let _hung = replies.pop_front().unwrap();
        sleep(Duration::from_millis(2500)).await;
        assert!(issued.try_recv().is_err(), "ticks skipped while both slots are taken");

        replies
            .pop_front()
            .unwrap()
            .send(Ok(json!({"event_id": "b"})))
            .unwrap();
        assert_eq!(latest_id(&updates.recv().await.unwrap()).as_deref(), Some("b"));

        let (_, third) = issued.recv().await.unwrap();
        assert_eq!(third.duration_since(started), Duration::from_millis(3000));
    }

    #[tokio::test(start_paused = true)]
    async fn older_attempt_resolving_last_is_discarded() {
        let (fetcher, mut replies, mut issued) = script(2);
        let (on_update, mut updates) = collector();
        let _handle = start(fixed_source(1000), fetcher, on_update);

        assert_eq!(updates.recv().await, Some(PollResult::Loading));
        issued.recv().await.unwrap();
        issued.recv().await.unwrap();

        let first = replies.pop_front().unwrap();
        let second = replies.pop_front().unwrap();

        second.send(Ok(json!([{"event_id": "b"}]))).unwrap();
        let shown = updates.recv().await.unwrap();
        assert_eq!(latest_id(&shown).as_deref(), Some("b"));

        first.send(Ok(json!([{"event_id": "a"}]))).unwrap();
        sleep(Duration::from_millis(10)).await;
        assert!(updates.try_recv().is_err(), "stale completion must not be delivered");
    }

    #[tokio::test(start_paused = true)]
    async fn in_order_completions_are_all_applied() {
        let (fetcher, mut replies, mut issued) = script(2);
        let (on_update, mut updates) = collector();
        let _handle = start(fixed_source(1000), fetcher, on_update);

        assert_eq!(updates.recv().await, Some(PollResult::Loading));
        issued.recv().await.unwrap();
        replies.pop_front().unwrap().send(Ok(json!({"event_id": "a"}))).unwrap();
        assert_eq!(latest_id(&updates.recv().await.unwrap()).as_deref(), Some("a"));

        issued.recv().await.unwrap();
        replies.pop_front().unwrap().send(Ok(json!({"event_id": "b"}))).unwrap();
        assert_eq!(latest_id(&updates.recv().await.unwrap()).as_deref(), Some("b"));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_discards_in_flight_attempt() {
        let (fetcher, mut replies, mut issued) = script(1);
        let (on_update, mut updates) = collector();
        let handle = start(fixed_source(1000), fetcher, on_update);

        assert_eq!(updates.recv().await, Some(PollResult::Loading));
        issued.recv().await.unwrap();

        handle.stop();
        let _ = replies
            .pop_front()
            .unwrap()
            .send(Ok(json!({"event_id": "late"})));

        sleep(Duration::from_secs(10)).await;
        assert!(updates.try_recv().is_err(), "no update after stop");
        assert!(issued.try_recv().is_err(), "no attempt after stop");
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_handle_stops_polling() {
        let (fetcher, _replies, mut issued) = script(0);
        let (on_update, mut updates) = collector();
        let handle = start(fixed_source(1000), fetcher, on_update);

        issued.recv().await.unwrap();
        drop(handle);

        sleep(Duration::from_secs(5)).await;
        assert!(issued.try_recv().is_err());
        assert_eq!(updates.try_recv().ok(), Some(PollResult::Loading));
        assert!(updates.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn failure_then_success_has_no_stale_flash() {
        let (fetcher, mut replies, mut issued) = script(2);
        let (on_update, mut updates) = collector();
        let _handle = start(fixed_source(1000), fetcher, on_update);

        issued.recv().await.unwrap();
        replies
            .pop_front()
            .unwrap()
            .send(Err(FetchError::Transport("connection refused".into())))
            .unwrap();

        assert_eq!(updates.recv().await, Some(PollResult::Loading));
        assert_eq!(
            updates.recv().await,
            Some(PollResult::Failed(FetchError::Transport(
                "connection refused".into()
            )))
        );

        // Failed stays put while the next attempt is pending.
        issued.recv().await.unwrap();
        sleep(Duration::from_millis(10)).await;
        assert!(updates.try_recv().is_err());

        replies
            .pop_front()
            .unwrap()
            .send(Ok(json!([{"event_id": "fresh"}])))
            .unwrap();
        let next = updates.recv().await.unwrap();
        assert_eq!(latest_id(&next).as_deref(), Some("fresh"));
    }

    #[tokio::test(start_paused = true)]
    async fn sampled_index_travels_with_its_response() {
        let (fetcher, mut replies, mut issued) = script(1);
        let (on_update, mut updates) = collector();
        let url = Url::parse("http://feed.test/analyzer/refills").unwrap();
        let source = Source::new("refills", Endpoint::sampled(url, "index", 100));
        let _handle = start(source, fetcher, on_update);

        let (issued_url, _) = issued.recv().await.unwrap();
        let index: u32 = issued_url
            .query_pairs()
            .find(|(k, _)| k == "index")
            .map(|(_, v)| v.parse().unwrap())
            .unwrap();

        replies
            .pop_front()
            .unwrap()
            .send(Ok(json!({"trace_id": "t-1"})))
            .unwrap();

        assert_eq!(updates.recv().await, Some(PollResult::Loading));
        match updates.recv().await.unwrap() {
            PollResult::Ready { sample_index, .. } => assert_eq!(sample_index, Some(index)),
            other => panic!("expected Ready, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn empty_array_is_ready_without_latest() {
        let (fetcher, mut replies, _issued) = script(1);
        let (on_update, mut updates) = collector();
        let _handle = start(fixed_source(5000), fetcher, on_update);

        replies.pop_front().unwrap().send(Ok(json!([]))).unwrap();

        assert_eq!(updates.recv().await, Some(PollResult::Loading));
        let ready = updates.recv().await.unwrap();
        assert!(matches!(ready, PollResult::Ready { .. }));
        assert!(ready.latest().is_none());
    }

    #[test]
    fn gate_rejects_lower_and_equal_sequence_numbers() {
        let gate = Gate::new(Box::new(|_| {}));
        assert_eq!(gate.deliver(2, PollResult::Loading), Delivery::Applied);
        assert_eq!(
            gate.deliver(1, PollResult::Loading),
            Delivery::Stale { applied: 2 }
        );
        assert_eq!(
            gate.deliver(2, PollResult::Loading),
            Delivery::Stale { applied: 2 }
        );
        gate.close();
        assert_eq!(gate.deliver(3, PollResult::Loading), Delivery::Closed);
    }
}
