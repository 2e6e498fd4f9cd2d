//! Assignment watcher
//!
//! Turns the `WatchAssignments` server stream for one ticket into a lazy
//! sequence of [`WatchEvent`]s. A worker task owns the stream and feeds an
//! mpsc channel; the caller consumes it as a [`Stream`]. The sequence ends
//! after the first assignment, after a terminal error, or on cancellation.

use crate::backoff::{Backoff, BackoffPolicy};
use crate::connection::ConnectionManager;
use crate::error::TransportError;
use crate::metrics::MetricsCollector;
use crate::transport::AssignmentStream;
use crate::types::{Assignment, TicketId};
use crate::utils::duration_millis;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep, Instant};
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Events produced for one ticket
#[derive(Debug, Clone, PartialEq)]
pub enum WatchEvent {
    Assignment(Assignment),
    /// Terminal: a non-retryable status, or retries ran out on a retryable one
    StreamError(TransportError),
    /// Terminal: the stream kept closing without an assignment until retries ran out
    StreamClosed,
}

/// Reconnect limits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WatchOptions {
    /// Reconnects allowed before giving up (0 = unlimited)
    pub max_reconnects: u32,
    /// Stop reconnecting once this much time has passed since the first open
    pub max_elapsed: Option<Duration>,
}

/// Consumer side of a running watcher
pub type WatchEvents = ReceiverStream<WatchEvent>;

enum StreamOutcome {
    Assigned,
    Closed,
    Failed(TransportError),
    Cancelled,
}

/// Watches one ticket's assignment stream with reconnects
pub struct AssignmentWatcher {
    ticket_id: TicketId,
    connection: Arc<ConnectionManager>,
    backoff: Backoff,
    options: WatchOptions,
    cancel: CancellationToken,
    metrics: Option<Arc<MetricsCollector>>,
}

impl AssignmentWatcher {
    pub fn new(
        ticket_id: impl Into<TicketId>,
        connection: Arc<ConnectionManager>,
        policy: BackoffPolicy,
        options: WatchOptions,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            ticket_id: ticket_id.into(),
            connection,
            backoff: Backoff::new(policy),
            options,
            cancel,
            metrics: None,
        }
    }

    /// Replace the backoff state, e.g. with a seeded one
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn ticket_id(&self) -> &str {
        &self.ticket_id
    }

    /// Start the worker task. Nothing is opened until the task first runs.
    pub fn spawn(self) -> WatchEvents {
        let (tx, rx) = mpsc::channel(4);
        tokio::spawn(self.run(tx));
        ReceiverStream::new(rx)
    }

    async fn run(mut self, tx: mpsc::Sender<WatchEvent>) {
        let started = Instant::now();
        let mut reconnects: u32 = 0;

        loop {
            let opened = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return,
                _ = tx.closed() => return,
                opened = self.connection.open_stream(&self.ticket_id) => opened,
            };

            let outcome = match opened {
                Ok(stream) => {
                    debug!(ticket_id = %self.ticket_id, "Assignment stream opened");
                    self.backoff.reset();
                    self.drain(stream, &tx).await
                }
                Err(e) => StreamOutcome::Failed(e),
            };

            let retry_cause = match outcome {
                StreamOutcome::Assigned | StreamOutcome::Cancelled => return,
                StreamOutcome::Closed => None,
                StreamOutcome::Failed(e) if e.is_retryable() => Some(e),
                StreamOutcome::Failed(e) => {
                    warn!(ticket_id = %self.ticket_id, "Assignment stream failed: {}", e);
                    self.emit(&tx, WatchEvent::StreamError(e)).await;
                    return;
                }
            };

            reconnects = reconnects.saturating_add(1);
            if self.exhausted(reconnects, started) {
                warn!(
                    ticket_id = %self.ticket_id,
                    reconnects,
                    "Giving up on assignment stream"
                );
                let event = match retry_cause {
                    Some(e) => WatchEvent::StreamError(e),
                    None => WatchEvent::StreamClosed,
                };
                self.emit(&tx, event).await;
                return;
            }

            let delay = self.backoff.next_delay();
            match &retry_cause {
                Some(e) => warn!(
                    ticket_id = %self.ticket_id,
                    attempt = reconnects,
                    delay_ms = duration_millis(delay),
                    "Assignment stream error: {}. Reconnecting",
                    e
                ),
                None => info!(
                    ticket_id = %self.ticket_id,
                    attempt = reconnects,
                    delay_ms = duration_millis(delay),
                    "Assignment stream closed without assignment. Reconnecting"
                ),
            }
            if let Some(metrics) = &self.metrics {
                metrics.record_watch_reconnect();
            }

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return,
                _ = tx.closed() => return,
                _ = sleep(delay) => {}
            }
        }
    }

    /// Read one stream until it yields an assignment, ends or fails.
    /// The stream is dropped (and the call closed) on return.
    async fn drain(
        &self,
        mut stream: AssignmentStream,
        tx: &mpsc::Sender<WatchEvent>,
    ) -> StreamOutcome {
        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return StreamOutcome::Cancelled,
                _ = tx.closed() => return StreamOutcome::Cancelled,
                next = stream.next() => next,
            };

            match next {
                Some(Ok(Some(assignment))) => {
                    info!(
                        ticket_id = %self.ticket_id,
                        connection = %assignment.connection,
                        "Assignment received"
                    );
                    self.emit(tx, WatchEvent::Assignment(assignment)).await;
                    return StreamOutcome::Assigned;
                }
                Some(Ok(None)) => {
                    debug!(ticket_id = %self.ticket_id, "Empty assignment update");
                }
                Some(Err(e)) => return StreamOutcome::Failed(e),
                None => return StreamOutcome::Closed,
            }
        }
    }

    fn exhausted(&self, reconnects: u32, started: Instant) -> bool {
        let over_count =
            self.options.max_reconnects != 0 && reconnects > self.options.max_reconnects;
        let over_time = self
            .options
            .max_elapsed
            .is_some_and(|limit| started.elapsed() >= limit);
        over_count || over_time
    }

    async fn emit(&self, tx: &mpsc::Sender<WatchEvent>, event: WatchEvent) {
        if self.cancel.is_cancelled() {
            return;
        }
        // A dropped receiver means nobody is listening any more.
        let _ = tx.send(event).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{TransportKind, TransportResult};
    use crate::transport::MockFrontendTransport;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy() -> BackoffPolicy {
        BackoffPolicy::new(Duration::from_millis(10), Duration::from_millis(100))
    }

    fn stream_of(items: Vec<TransportResult<Option<Assignment>>>) -> AssignmentStream {
        Box::pin(tokio_stream::iter(items))
    }

    fn watcher(mock: MockFrontendTransport, options: WatchOptions) -> AssignmentWatcher {
        let connection = Arc::new(ConnectionManager::new(
            Arc::new(mock),
            "frontend:50504",
            Duration::from_secs(1),
        ));
        AssignmentWatcher::new("t-1", connection, policy(), options, CancellationToken::new())
            .with_backoff(Backoff::seeded(policy(), 1))
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_assignment_then_end() {
        let mut mock = MockFrontendTransport::new();
        mock.expect_watch_assignments().times(1).returning(|_| {
            Ok(stream_of(vec![
                Ok(None),
                Ok(Some(Assignment::new("10.0.0.5:7777"))),
                Ok(Some(Assignment::new("10.0.0.9:7777"))),
            ]))
        });

        let events: Vec<_> = watcher(mock, WatchOptions::default())
            .spawn()
            .collect()
            .await;
        assert_eq!(
            events,
            vec![WatchEvent::Assignment(Assignment::new("10.0.0.5:7777"))]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnects_after_close_with_same_ticket() {
        let opens = Arc::new(AtomicU32::new(0));
        let counter = opens.clone();

        let mut mock = MockFrontendTransport::new();
        mock.expect_watch_assignments()
            .withf(|ticket_id| ticket_id.to_string() == "t-1")
            .times(3)
            .returning(move |_| {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Ok(stream_of(vec![Ok(None)]))
                } else {
                    Ok(stream_of(vec![Ok(Some(Assignment::new("10.0.0.5:7777")))]))
                }
            });

        let events: Vec<_> = watcher(mock, WatchOptions::default())
            .spawn()
            .collect()
            .await;
        assert_eq!(events.len(), 1);
        assert_eq!(opens.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_status_is_terminal() {
        let mut mock = MockFrontendTransport::new();
        mock.expect_watch_assignments().times(1).returning(|_| {
            Ok(stream_of(vec![Err(TransportError::new(
                TransportKind::PermissionDenied,
                "denied",
            ))]))
        });

        let events: Vec<_> = watcher(mock, WatchOptions::default())
            .spawn()
            .collect()
            .await;
        assert!(matches!(
            events.as_slice(),
            [WatchEvent::StreamError(e)] if e.kind == TransportKind::PermissionDenied
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_cap_bounds_unavailable_loop() {
        let mut mock = MockFrontendTransport::new();
        mock.expect_watch_assignments()
            .times(3)
            .returning(|_| Err(TransportError::unavailable("backend down")));

        let options = WatchOptions {
            max_reconnects: 2,
            max_elapsed: None,
        };
        let events: Vec<_> = watcher(mock, options).spawn().collect().await;
        assert!(matches!(
            events.as_slice(),
            [WatchEvent::StreamError(e)] if e.kind == TransportKind::Unavailable
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_streams_exhaust_to_stream_closed() {
        let mut mock = MockFrontendTransport::new();
        mock.expect_watch_assignments()
            .times(2)
            .returning(|_| Ok(stream_of(vec![])));

        let options = WatchOptions {
            max_reconnects: 1,
            max_elapsed: None,
        };
        let events: Vec<_> = watcher(mock, options).spawn().collect().await;
        assert_eq!(events, vec![WatchEvent::StreamClosed]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_elapsed_cap_when_unlimited_count() {
        let mut mock = MockFrontendTransport::new();
        mock.expect_watch_assignments()
            .returning(|_| Err(TransportError::unavailable("backend down")));

        let options = WatchOptions {
            max_reconnects: 0,
            max_elapsed: Some(Duration::from_secs(1)),
        };
        let events: Vec<_> = watcher(mock, options).spawn().collect().await;
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], WatchEvent::StreamError(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_ends_sequence_without_events() {
        let mut mock = MockFrontendTransport::new();
        mock.expect_watch_assignments()
            .returning(|_| Ok(Box::pin(tokio_stream::pending::<
                TransportResult<Option<Assignment>>,
            >())));

        let cancel = CancellationToken::new();
        let connection = Arc::new(ConnectionManager::new(
            Arc::new(mock),
            "frontend:50504",
            Duration::from_secs(1),
        ));
        let mut events = AssignmentWatcher::new(
            "t-1",
            connection,
            policy(),
            WatchOptions::default(),
            cancel.clone(),
        )
        .spawn();

        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
        assert_eq!(events.next().await, None);
    }
}
