// crates/core/src/stream.rs
//! Status change streaming: turns store polling into a push-style feed.
//!
//! A subscription samples the job once up front, then on every poll tick.
//! Unchanged `(status, progress)` samples are dropped. Keep-alive frames run
//! on their own timer and never count toward the poll budget.

use std::sync::Arc;
use std::time::Duration;

use async_stream::stream;
use metrics::counter;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_stream::Stream;
use tracing::{debug, warn};

use crate::error::JobError;
use crate::job::{EventKind, JobRecord, StatusEvent};
use crate::store::{JobStore, StoreError};

/// Tuning for status subscriptions.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub poll_interval: Duration,
    pub keep_alive_interval: Duration,
    /// Poll cycles allowed before the subscription times out.
    pub max_polls: u32,
    /// Upper bound on each store read.
    pub read_timeout: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            keep_alive_interval: Duration::from_secs(15),
            max_polls: 300,
            read_timeout: Duration::from_secs(5),
        }
    }
}

/// One item of a subscription.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamFrame {
    Event(StatusEvent),
    /// Carries no job state; only keeps intermediaries from closing an idle
    /// connection.
    KeepAlive,
}

impl StreamFrame {
    pub fn event(&self) -> Option<&StatusEvent> {
        match self {
            StreamFrame::Event(event) => Some(event),
            StreamFrame::KeepAlive => None,
        }
    }
}

enum Tick {
    Poll,
    KeepAlive,
}

/// Hands out independent status subscriptions over a shared store.
#[derive(Clone)]
pub struct StatusStream {
    store: Arc<dyn JobStore>,
    config: StreamConfig,
}

impl StatusStream {
    pub fn new(store: Arc<dyn JobStore>, config: StreamConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// Start a fresh subscription for `job_id`.
    ///
    /// The stream is finite: it always ends right after its single
    /// `complete`, `error` or `timeout` event.
    pub fn subscribe(&self, job_id: impl Into<String>) -> impl Stream<Item = StreamFrame> + Send + 'static {
        let store = Arc::clone(&self.store);
        let config = self.config.clone();
        let job_id: String = job_id.into();

        stream! {
            counter!("jobwatch_stream_subscriptions_total").increment(1);
            debug!(job_id = %job_id, "Status subscription opened");

            let mut last = match sample(store.as_ref(), &job_id, config.read_timeout).await {
                Ok(record) if record.status.is_terminal() => {
                    yield finish(StatusEvent::snapshot(EventKind::Complete, &record));
                    return;
                }
                Ok(record) => record,
                Err(e) => {
                    debug!(job_id = %job_id, error = %e, "Initial status read failed");
                    yield finish(StatusEvent::error(job_id.as_str(), client_message(&e)));
                    return;
                }
            };
            yield StreamFrame::Event(StatusEvent::snapshot(EventKind::Update, &last));

            let start = Instant::now();
            let mut poll = time::interval_at(start + config.poll_interval, config.poll_interval);
            poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut keep_alive = time::interval_at(
                start + config.keep_alive_interval,
                config.keep_alive_interval,
            );
            keep_alive.set_missed_tick_behavior(MissedTickBehavior::Delay);

            let mut polls: u32 = 0;
            loop {
                if polls >= config.max_polls {
                    let message = format!("no terminal state after {} polls", polls);
                    yield finish(StatusEvent::timeout(&last, message));
                    return;
                }

                let tick = tokio::select! {
                    _ = poll.tick() => Tick::Poll,
                    _ = keep_alive.tick() => Tick::KeepAlive,
                };
                if let Tick::KeepAlive = tick {
                    yield StreamFrame::KeepAlive;
                    continue;
                }

                polls += 1;
                match sample(store.as_ref(), &job_id, config.read_timeout).await {
                    Ok(record) if record.status.is_terminal() => {
                        yield finish(StatusEvent::snapshot(EventKind::Complete, &record));
                        return;
                    }
                    Ok(record) => {
                        if record.key() != last.key() {
                            yield StreamFrame::Event(StatusEvent::snapshot(EventKind::Update, &record));
                        }
                        last = record;
                    }
                    Err(e) => {
                        warn!(job_id = %job_id, error = %e, "Status read failed, closing subscription");
                        yield finish(StatusEvent::error(job_id.as_str(), client_message(&e)));
                        return;
                    }
                }
            }
        }
    }
}

async fn sample(store: &dyn JobStore, id: &str, timeout: Duration) -> Result<JobRecord, JobError> {
    match time::timeout(timeout, store.get(id)).await {
        Ok(Ok(Some(stored))) => Ok(stored.record),
        Ok(Ok(None)) => Err(JobError::NotFound(id.to_string())),
        Ok(Err(e)) => Err(e.into()),
        Err(_) => Err(StoreError::Timeout(timeout).into()),
    }
}

/// Message sent to subscribers. Store failures are reduced to a fixed string;
/// the detail only goes to the log.
fn client_message(err: &JobError) -> String {
    match err {
        JobError::StoreUnavailable(_) => "job store unavailable".to_string(),
        other => other.to_string(),
    }
}

fn finish(event: StatusEvent) -> StreamFrame {
    counter!("jobwatch_stream_endings_total", "kind" => event.kind.as_str()).increment(1);
    debug!(job_id = %event.job_id, kind = event.kind.as_str(), "Status subscription closed");
    StreamFrame::Event(event)
}
