use futures::{Stream, StreamExt, stream::BoxStream};
use lapin::{
    Channel, Consumer,
    options::{BasicCancelOptions, BasicConsumeOptions, BasicQosOptions},
    types::FieldTable,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, warn};

use crate::config::{AckMode, consumer::ConsumerSettings};
use crate::error::{Error, Result};
use crate::handler::{HandlerError, MessageHandler};
use crate::rabbitmq::Message;
use crate::rabbitmq::connection::{CLOSE_TIMEOUT, bounded};
use crate::shutdown::ShutdownSignal;

/// Pause after a receive error so a broken channel does not spin the loop.
const RECEIVE_ERROR_PAUSE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpState {
    Idle,
    Subscribed,
    Receiving,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// Shutdown was requested.
    Cancelled,
    /// The delivery stream ended, the broker closed the channel or consumer.
    ChannelClosed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PumpExit {
    pub reason: ExitReason,
    pub received: u64,
    pub failed: u64,
    /// Handlers still running when the grace period ran out.
    pub aborted: usize,
}

/// What happened to a message once its handler returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Auto-ack: settled on receipt, `ok` is the handler outcome.
    AutoAcked { ok: bool },
    Acked,
    Nacked { requeued: bool },
    /// Ack or reject failed, the broker will redeliver once the channel closes.
    Unsettled,
}

#[derive(Default)]
struct Tally {
    failed: u64,
}

impl Tally {
    fn record(&mut self, joined: std::result::Result<Disposition, JoinError>) {
        match joined {
            Ok(Disposition::AutoAcked { ok: true }) | Ok(Disposition::Acked) => {}
            Ok(_) => self.failed += 1,
            Err(e) if e.is_panic() => {
                error!("❌ Message handler panicked: {}", e);
                self.failed += 1;
            }
            // aborted after the grace period, counted separately
            Err(_) => {}
        }
    }
}

/// Pulls messages off a subscription and hands each one to a handler,
/// at most `concurrency` at a time.
pub struct MessagePump<H> {
    handler: Arc<H>,
    settings: ConsumerSettings,
    state: PumpState,
}

impl<H: MessageHandler> MessagePump<H> {
    pub fn new(handler: Arc<H>, settings: ConsumerSettings) -> Self {
        Self {
            handler,
            settings,
            state: PumpState::Idle,
        }
    }

    pub fn state(&self) -> PumpState {
        self.state
    }

    fn manual_ack(&self) -> bool {
        self.settings.ack_mode == AckMode::Manual
    }

    /// Register a consumer on `queue`. In auto-ack mode the broker settles
    /// every message on delivery and `basic.qos` has no effect, so it pushes
    /// as fast as it can regardless of `prefetch`.
    pub async fn subscribe(&mut self, channel: &Channel, queue: &str) -> Result<Consumer> {
        if self.settings.prefetch > 0 && !self.manual_ack() {
            warn!(
                "CONSUMER_PREFETCH={} is ignored by the broker in auto-ack mode",
                self.settings.prefetch
            );
        }

        if self.settings.prefetch > 0 {
            channel
                .basic_qos(self.settings.prefetch, BasicQosOptions::default())
                .await
                .map_err(|source| Error::Consume {
                    queue: queue.to_string(),
                    source,
                })?;
        }

        let consumer = channel
            .basic_consume(
                queue,
                &self.settings.consumer_tag,
                BasicConsumeOptions {
                    no_ack: !self.manual_ack(),
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|source| Error::Consume {
                queue: queue.to_string(),
                source,
            })?;

        self.state = PumpState::Subscribed;
        info!(
            "🔍 Started consuming from queue: {} (tag {}, {:?} ack, concurrency {})",
            queue, self.settings.consumer_tag, self.settings.ack_mode, self.settings.concurrency
        );

        Ok(consumer)
    }

    /// Adapt a lapin consumer into the message stream [`run`](Self::run) expects.
    pub fn deliveries(&self, consumer: Consumer) -> BoxStream<'static, Result<Message>> {
        let manual_ack = self.manual_ack();
        consumer
            .map(move |delivery| {
                delivery
                    .map(|delivery| Message::from_delivery(delivery, manual_ack))
                    .map_err(|e| Error::Delivery(e.to_string()))
            })
            .boxed()
    }

    pub fn consumer_tag(&self) -> &str {
        &self.settings.consumer_tag
    }

    /// Consume messages loop.
    ///
    /// Returns when shutdown is requested or the stream ends. Either way no
    /// further message is pulled, handlers already running get
    /// `shutdown_grace` to finish and are aborted after that.
    pub async fn run<S>(&mut self, stream: S, shutdown: ShutdownSignal) -> PumpExit
    where
        S: Stream<Item = Result<Message>> + Unpin,
    {
        self.run_with_cancel(stream, shutdown, || async {}).await
    }

    /// [`run`](Self::run), calling `on_cancel` as soon as shutdown is
    /// observed and before in-flight handlers are drained. The worker passes
    /// [`cancel_consumer`] here so the broker stops pushing while handlers
    /// finish. `on_cancel` is bounded by [`CLOSE_TIMEOUT`].
    pub async fn run_with_cancel<S, C, Fut>(
        &mut self,
        mut stream: S,
        mut shutdown: ShutdownSignal,
        on_cancel: C,
    ) -> PumpExit
    where
        S: Stream<Item = Result<Message>> + Unpin,
        C: FnOnce() -> Fut,
        Fut: Future<Output = ()>,
    {
        info!("📥 Starting message consumption loop...");
        self.state = PumpState::Receiving;

        let semaphore = Arc::new(Semaphore::new(self.settings.concurrency));
        let mut in_flight: JoinSet<Disposition> = JoinSet::new();
        let mut tally = Tally::default();
        let mut received = 0u64;

        let reason = loop {
            while let Some(joined) = in_flight.try_join_next() {
                tally.record(joined);
            }

            // Permit before pull: a full pump stops taking messages off the
            // stream. In auto-ack mode the broker may still push into the
            // client buffer, and those messages are already settled.
            let permit = tokio::select! {
                biased;
                _ = shutdown.wait() => break ExitReason::Cancelled,
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break ExitReason::Cancelled,
                },
            };

            let next = tokio::select! {
                biased;
                _ = shutdown.wait() => break ExitReason::Cancelled,
                next = stream.next() => next,
            };

            match next {
                Some(Ok(message)) => {
                    received += 1;
                    debug!(
                        "📨 Received message {} ({} bytes)",
                        message.delivery_tag,
                        message.body.len()
                    );

                    let handler = self.handler.clone();
                    let requeue = self.settings.requeue_on_failure;
                    in_flight.spawn(async move {
                        let disposition = dispatch(handler.as_ref(), message, requeue).await;
                        drop(permit);
                        disposition
                    });
                }
                Some(Err(e)) => {
                    drop(permit);
                    error!("❌ Error receiving message: {}", e);
                    tokio::select! {
                        biased;
                        _ = shutdown.wait() => break ExitReason::Cancelled,
                        _ = tokio::time::sleep(RECEIVE_ERROR_PAUSE) => {}
                    }
                }
                None => break ExitReason::ChannelClosed,
            }
        };

        match reason {
            ExitReason::Cancelled => {
                info!("🛑 Shutdown observed, no longer pulling messages");
                bounded("Consumer cancel", CLOSE_TIMEOUT, on_cancel()).await;
            }
            ExitReason::ChannelClosed => warn!("📥 Message stream ended"),
        }

        let aborted = drain(&mut in_flight, &mut tally, self.settings.shutdown_grace).await;
        self.state = PumpState::Closed;

        let exit = PumpExit {
            reason,
            received,
            failed: tally.failed,
            aborted,
        };
        info!("📥 Message consumption loop ended: {:?}", exit);
        exit
    }
}

/// Stop the broker from pushing more deliveries to consumer `tag`.
pub async fn cancel_consumer(channel: Channel, tag: String) {
    match channel
        .basic_cancel(&tag, BasicCancelOptions::default())
        .await
    {
        Ok(()) => info!("🔕 Cancelled consumer {}", tag),
        Err(e) => warn!("Failed to cancel consumer {}: {}", tag, e),
    }
}

/// Wait up to `grace` for running handlers, abort whatever is left.
async fn drain(in_flight: &mut JoinSet<Disposition>, tally: &mut Tally, grace: Duration) -> usize {
    if in_flight.is_empty() {
        return 0;
    }

    info!(
        "⏳ Waiting up to {:?} for {} in-flight handler(s)",
        grace,
        in_flight.len()
    );

    let finished = tokio::time::timeout(grace, async {
        while let Some(joined) = in_flight.join_next().await {
            tally.record(joined);
        }
    })
    .await;

    if finished.is_ok() {
        return 0;
    }

    let aborted = in_flight.len();
    warn!("⌛ Grace period elapsed, aborting {} handler(s)", aborted);
    in_flight.abort_all();
    while in_flight.join_next().await.is_some() {}
    aborted
}

/// Run the handler for one message and settle it according to the ack mode.
async fn dispatch<H: MessageHandler + ?Sized>(
    handler: &H,
    message: Message,
    requeue_on_failure: bool,
) -> Disposition {
    let tag = message.delivery_tag;
    let result = handler.handle(&message).await;

    let Some(acker) = message.acker() else {
        if let Err(e) = &result {
            // Already acknowledged on receipt, the message is gone.
            error!("❌ Dropping message {}: {}", tag, e);
        }
        return Disposition::AutoAcked { ok: result.is_ok() };
    };

    match result {
        Ok(()) => match acker.ack().await {
            Ok(()) => {
                debug!("✅ Acked message {}", tag);
                Disposition::Acked
            }
            Err(e) => {
                error!("❌ Failed to acknowledge message {}: {}", tag, e);
                Disposition::Unsettled
            }
        },
        Err(e) => {
            let requeue = requeue_on_failure && !matches!(e, HandlerError::Malformed(_));
            warn!(
                "Rejecting message {} (requeue: {}): {}",
                tag, requeue, e
            );
            match acker.reject(requeue).await {
                Ok(()) => Disposition::Nacked { requeued: requeue },
                Err(e) => {
                    error!("❌ Failed to reject message {}: {}", tag, e);
                    Disposition::Unsettled
                }
            }
        }
    }
}
