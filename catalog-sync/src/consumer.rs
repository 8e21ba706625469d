//! Sequential consume-reconcile-commit loop, one per topic.
//!
//! The loop owns a `MessageSource` and a `Reconciler`. Messages are handled
//! strictly one at a time: an offset is only committed after the reconciler
//! returned an outcome the `CommitPolicy` accepts, and never once shutdown
//! has been requested. Shutdown only interrupts the poll; a reconcile that
//! already started always runs to completion.

use std::str::FromStr;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::codec::ValueDecoder;
use crate::events::ChangeEvent;
use crate::health::HealthHandle;
use crate::metrics_consts::{
    COMMITS_WITHHELD, COMMIT_FAILED, EVENTS_RECEIVED, EVENTS_RECONCILED, EVENT_DECODE_FAILED,
    OFFSETS_COMMITTED, RECONCILE_TIME, RECV_ERRORS,
};
use crate::reconciler::{Outcome, Reconciler};

const RECV_ERROR_BACKOFF: Duration = Duration::from_millis(100);

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("failed to receive message: {0}")]
    Recv(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("failed to commit offset: {0}")]
    Commit(#[source] Box<dyn std::error::Error + Send + Sync>),
}

pub struct RawMessage<A> {
    pub partition: i32,
    pub offset: i64,
    pub payload: Option<Vec<u8>>,
    /// Token handed back to the source to commit this message.
    pub ack: A,
}

/// The subscription runtime as seen by the loop: a stream of raw messages
/// and a way to commit each one.
#[async_trait]
pub trait MessageSource: Send {
    type Ack: Send;

    fn topic(&self) -> &str;

    /// Must be cancel-safe, the loop drops it on poll timeout and shutdown.
    async fn recv(&mut self) -> Result<RawMessage<Self::Ack>, SourceError>;

    fn commit(&mut self, ack: Self::Ack) -> Result<(), SourceError>;
}

/// Decides which reconcile outcomes advance the committed offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitPolicy {
    /// Commit only applied updates. Skipped events stay uncommitted and are
    /// seen again after a restart.
    AppliedOnly,
    /// Also commit deliberate skips; withhold only failures.
    AcknowledgeSkips,
}

impl CommitPolicy {
    pub fn should_commit(&self, outcome: &Outcome) -> bool {
        match self {
            CommitPolicy::AppliedOnly => outcome.handled(),
            CommitPolicy::AcknowledgeSkips => outcome.handled() || outcome.is_skip(),
        }
    }
}

impl FromStr for CommitPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_ref() {
            "applied_only" => Ok(CommitPolicy::AppliedOnly),
            "acknowledge_skips" => Ok(CommitPolicy::AcknowledgeSkips),
            _ => Err(format!(
                "Unknown commit policy: {s}, must be APPLIED_ONLY or ACKNOWLEDGE_SKIPS"
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Polling,
    Processing,
    Committing,
    Draining,
}

/// Per-loop counters, returned when the loop drains.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LoopStats {
    /// Polls that ended with the poll timeout and no message.
    pub idle_polls: u64,
    pub received: u64,
    pub decode_failures: u64,
    pub applied: u64,
    pub skipped: u64,
    pub failed: u64,
    pub committed: u64,
}

impl LoopStats {
    fn record(&mut self, outcome: &Outcome) {
        if outcome.handled() {
            self.applied += 1;
        } else if outcome.is_skip() {
            self.skipped += 1;
        } else {
            self.failed += 1;
        }
    }
}

struct Position {
    partition: i32,
    offset: i64,
}

enum Step<A, P> {
    Poll,
    Process {
        event: ChangeEvent<P>,
        ack: A,
        position: Position,
    },
    Commit {
        ack: A,
        position: Position,
    },
    Drain,
}

impl<A, P> Step<A, P> {
    fn state(&self) -> LoopState {
        match self {
            Step::Poll => LoopState::Polling,
            Step::Process { .. } => LoopState::Processing,
            Step::Commit { .. } => LoopState::Committing,
            Step::Drain => LoopState::Draining,
        }
    }
}

pub struct ConsumerLoop<S, R> {
    topic: String,
    source: S,
    reconciler: R,
    policy: CommitPolicy,
    poll_timeout: Duration,
    decoder: ValueDecoder,
    shutdown: CancellationToken,
    liveness: Option<HealthHandle>,
    stats: LoopStats,
}

impl<S, R> ConsumerLoop<S, R>
where
    S: MessageSource,
    R: Reconciler,
{
    pub fn new(source: S, reconciler: R, shutdown: CancellationToken) -> Self {
        Self {
            topic: source.topic().to_string(),
            source,
            reconciler,
            policy: CommitPolicy::AppliedOnly,
            poll_timeout: Duration::from_millis(100),
            decoder: ValueDecoder::Json,
            shutdown,
            liveness: None,
            stats: LoopStats::default(),
        }
    }

    pub fn with_commit_policy(mut self, policy: CommitPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_poll_timeout(mut self, poll_timeout: Duration) -> Self {
        self.poll_timeout = poll_timeout;
        self
    }

    pub fn with_decoder(mut self, decoder: ValueDecoder) -> Self {
        self.decoder = decoder;
        self
    }

    pub fn with_liveness(mut self, liveness: HealthHandle) -> Self {
        self.liveness = Some(liveness);
        self
    }

    /// Runs until the shutdown token is cancelled. Individual message
    /// failures never end the loop.
    pub async fn run(mut self) -> LoopStats {
        info!(topic = %self.topic, policy = ?self.policy, "starting consumer loop");

        let mut step: Step<S::Ack, R::Payload> = Step::Poll;
        loop {
            let from = step.state();
            step = match step {
                Step::Poll => self.poll().await,
                Step::Process {
                    event,
                    ack,
                    position,
                } => self.process(event, ack, position).await,
                Step::Commit { ack, position } => self.commit(ack, position),
                Step::Drain => break,
            };
            trace!(topic = %self.topic, ?from, to = ?step.state(), "consumer loop transition");
        }

        info!(topic = %self.topic, stats = ?self.stats, "consumer loop drained");
        self.stats
    }

    async fn poll(&mut self) -> Step<S::Ack, R::Payload> {
        if let Some(liveness) = &self.liveness {
            liveness.report_healthy();
        }

        let polled = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => None,
            polled = tokio::time::timeout(self.poll_timeout, self.source.recv()) => Some(polled),
        };

        let message = match polled {
            None => {
                info!(topic = %self.topic, "caught shutdown signal, draining");
                return Step::Drain;
            }
            // Nothing arrived within the poll window
            Some(Err(_)) => {
                self.stats.idle_polls += 1;
                return Step::Poll;
            }
            Some(Ok(Err(e))) => {
                metrics::counter!(RECV_ERRORS, "topic" => self.topic.clone()).increment(1);
                error!(topic = %self.topic, "{}", e);
                tokio::select! {
                    _ = self.shutdown.cancelled() => {}
                    _ = tokio::time::sleep(RECV_ERROR_BACKOFF) => {}
                }
                return Step::Poll;
            }
            Some(Ok(Ok(message))) => message,
        };

        self.stats.received += 1;
        metrics::counter!(EVENTS_RECEIVED, "topic" => self.topic.clone()).increment(1);

        let position = Position {
            partition: message.partition,
            offset: message.offset,
        };
        match self.decoder.decode(message.payload.as_deref()).await {
            Ok(event) => Step::Process {
                event,
                ack: message.ack,
                position,
            },
            Err(e) => {
                // Left uncommitted, a restart from the last committed offset will see it again
                self.stats.decode_failures += 1;
                metrics::counter!(EVENT_DECODE_FAILED, "topic" => self.topic.clone()).increment(1);
                error!(
                    topic = %self.topic,
                    partition = position.partition,
                    offset = position.offset,
                    "failed to deserialize payload: {}",
                    e
                );
                Step::Poll
            }
        }
    }

    async fn process(
        &mut self,
        event: ChangeEvent<R::Payload>,
        ack: S::Ack,
        position: Position,
    ) -> Step<S::Ack, R::Payload> {
        let start = Instant::now();
        let outcome = self.reconciler.reconcile(event).await;

        metrics::histogram!(RECONCILE_TIME, "entity" => self.reconciler.entity())
            .record(start.elapsed().as_millis() as f64);
        metrics::counter!(
            EVENTS_RECONCILED,
            "topic" => self.topic.clone(),
            "entity" => self.reconciler.entity(),
            "outcome" => outcome.label()
        )
        .increment(1);
        self.stats.record(&outcome);

        if !self.policy.should_commit(&outcome) {
            metrics::counter!(
                COMMITS_WITHHELD,
                "topic" => self.topic.clone(),
                "reason" => outcome.label()
            )
            .increment(1);
            warn!(
                topic = %self.topic,
                partition = position.partition,
                offset = position.offset,
                outcome = outcome.label(),
                "commit cancelled"
            );
            return Step::Poll;
        }

        Step::Commit { ack, position }
    }

    fn commit(&mut self, ack: S::Ack, position: Position) -> Step<S::Ack, R::Payload> {
        if self.shutdown.is_cancelled() {
            metrics::counter!(
                COMMITS_WITHHELD,
                "topic" => self.topic.clone(),
                "reason" => "shutdown"
            )
            .increment(1);
            warn!(
                topic = %self.topic,
                partition = position.partition,
                offset = position.offset,
                "shutdown requested, leaving offset uncommitted"
            );
            return Step::Poll;
        }

        match self.source.commit(ack) {
            Ok(()) => {
                self.stats.committed += 1;
                metrics::counter!(OFFSETS_COMMITTED, "topic" => self.topic.clone()).increment(1);
                debug!(
                    topic = %self.topic,
                    partition = position.partition,
                    offset = position.offset,
                    "committed"
                );
            }
            Err(e) => {
                metrics::counter!(COMMIT_FAILED, "topic" => self.topic.clone()).increment(1);
                error!(
                    topic = %self.topic,
                    partition = position.partition,
                    offset = position.offset,
                    "{}",
                    e
                );
            }
        }
        Step::Poll
    }
}
