use lapin::Channel;
use std::future::Future;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::config::{consumer::ConsumerSettings, rabbit::RabbitMQConfig};
use crate::error::{Error, Result};
use crate::handler::MessageHandler;
use crate::rabbitmq::backoff::Backoff;
use crate::rabbitmq::consumer::cancel_consumer;
use crate::rabbitmq::{ConnectionManager, ExitReason, MessagePump, PumpExit, queue};
use crate::shutdown::{ShutdownCoordinator, ShutdownSignal};

/// Connect, declare, consume until shutdown. Reconnects with backoff when the
/// broker drops the channel and retries are configured.
///
/// Always marks `coordinator` complete before returning, so a caller parked
/// on [`ShutdownCoordinator::wait`] is released on fatal errors too.
pub async fn run<H: MessageHandler>(
    config: RabbitMQConfig,
    settings: ConsumerSettings,
    handler: Arc<H>,
    coordinator: ShutdownCoordinator,
) -> Result<()> {
    let queue_name = config.queue_name.clone();
    let manager = ConnectionManager::new(config);
    let url = manager.config().redacted_url();

    let manager = &manager;
    let handler = &handler;
    let settings_ref = &settings;
    let queue_name = queue_name.as_str();

    let result = supervise(&settings.reconnect, &url, coordinator.signal(), move |signal| async move {
        let mut connect_signal = signal.clone();
        manager
            .scoped(&settings_ref.reconnect, &mut connect_signal, |channel| {
                consume(channel, handler.clone(), settings_ref.clone(), queue_name, signal)
            })
            .await
    })
    .await;

    match &result {
        Ok(()) => info!("Worker stopped"),
        Err(e) => error!("❌ Worker failed: {}", e),
    }
    coordinator.complete();
    result
}

/// Reconnect policy around `session`, which runs one connect-and-consume
/// cycle. A cancelled session ends the worker; a broker-closed one is
/// retried under `backoff` until the budget runs out.
async fn supervise<F, Fut>(
    backoff: &Backoff,
    url: &str,
    mut shutdown: ShutdownSignal,
    mut session: F,
) -> Result<()>
where
    F: FnMut(ShutdownSignal) -> Fut,
    Fut: Future<Output = Result<PumpExit>>,
{
    let mut reconnects = 0u32;

    loop {
        let exit = match session(shutdown.clone()).await {
            Ok(exit) => exit,
            // Gave up reconnecting because we were asked to stop.
            Err(e) if e.is_retryable() && shutdown.is_triggered() => {
                info!("Shutdown during connect: {}", e);
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        if exit.reason == ExitReason::Cancelled {
            return Ok(());
        }

        let err = Error::ChannelClosed {
            url: url.to_string(),
        };

        // A session that delivered something starts the retry budget over.
        if exit.received > 0 {
            reconnects = 0;
        }
        reconnects += 1;
        if !backoff.allows(reconnects) {
            return Err(err);
        }

        let delay = backoff.delay(reconnects);
        warn!(
            "🔄 {} (reconnect {}/{} in {:?})",
            err, reconnects, backoff.max_retries, delay
        );
        tokio::select! {
            biased;
            _ = shutdown.wait() => return Ok(()),
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

/// One session worth of work: declare, subscribe, pump until it stops.
async fn consume<H: MessageHandler>(
    channel: Channel,
    handler: Arc<H>,
    settings: ConsumerSettings,
    queue_name: &str,
    shutdown: ShutdownSignal,
) -> Result<PumpExit> {
    let info = queue::declare(&channel, queue_name).await?;
    info!(
        "✅ Queue {} ready ({} message(s) waiting, {} consumer(s))",
        info.name, info.message_count, info.consumer_count
    );

    let mut pump = MessagePump::new(handler, settings);
    let consumer = pump.subscribe(&channel, &info.name).await?;
    let deliveries = pump.deliveries(consumer);

    let tag = pump.consumer_tag().to_string();
    let exit = pump
        .run_with_cancel(deliveries, shutdown, || cancel_consumer(channel, tag))
        .await;

    Ok(exit)
}
