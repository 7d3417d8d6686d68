//! clusterbus - cluster-controller message layer
//!
//! Entry point for the standalone messaging-plane process: loads
//! configuration, wires the directory/scheduler/URL-selector/driver/router
//! stack, and runs until a shutdown signal arrives.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clusterbus::config::PlaneConfig;
use clusterbus::drivers::http::{BounceProxyUrl, HttpDriver, LongPollReader, LongPollSink};
use clusterbus::drivers::mqtt::MqttDriver;
use clusterbus::observability::{init_logging, LogFormat};
use clusterbus::router::{MessageRouter, UnknownDestinationPolicy};
use clusterbus::scheduler::SingleThreadedDelayedScheduler;
use clusterbus::url_selector::{EmptyChannelUrlDirectory, UrlSelector};
use rumqttc::{AsyncClient, MqttOptions};
use tokio_util::sync::CancellationToken;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    init_logging(LogFormat::Pretty);

    info!("starting clusterbus");

    let config_path = std::env::var("CLUSTERBUS_CONFIG").ok();
    let config = match config_path {
        Some(path) => PlaneConfig::load_from_file(&path)?,
        None => PlaneConfig::development(),
    };
    config.validate()?;
    info!(
        bounce_proxy_base_url = %config.bounce_proxy_base_url,
        broker_url = %config.broker_url,
        worker_pool_size = config.worker_pool_size,
        "configuration loaded"
    );

    let scheduler = Arc::new(SingleThreadedDelayedScheduler::new());

    let url_selector = Arc::new(UrlSelector::new(
        Arc::new(EmptyChannelUrlDirectory),
        config.bounce_proxy_base_url.clone(),
        config.punishment_factor(),
        config.recovery_period(),
    ));

    let http_driver = Arc::new(HttpDriver::new(
        url_selector,
        Arc::clone(&scheduler),
        config.send_retry_interval(),
        config.max_attempt_ttl(),
    ));

    let bounce_proxy_url = BounceProxyUrl::new(config.bounce_proxy_base_url.clone());
    let own_channel_url = bounce_proxy_url.send_url(&config.own_channel_id);

    let mut mqtt_options = MqttOptions::new("clusterbus", config.broker_url.clone(), 1883);
    mqtt_options.set_keep_alive(Duration::from_secs(config.mqtt.keep_alive_seconds));
    let (client, event_loop) = AsyncClient::new(mqtt_options, 64);
    let mqtt_driver = Arc::new(MqttDriver::new(
        client,
        clusterbus::domain_types::MqttQos::AtLeastOnce,
        config.mqtt.retain,
        Duration::from_millis(config.mqtt.reconnect_sleep_ms),
    ));

    let router = Arc::new(MessageRouter::new(
        Some(http_driver),
        Some(Arc::clone(&mqtt_driver)),
        scheduler,
        UnknownDestinationPolicy::Enqueue,
    ));

    let shutdown = CancellationToken::new();

    let event_loop_sink = Arc::clone(&mqtt_driver);
    let event_loop_router = Arc::clone(&router);
    let event_loop_shutdown = shutdown.clone();
    tokio::spawn(async move {
        let sink: Arc<dyn clusterbus::drivers::mqtt::MqttInboundSink> =
            Arc::new(RouterMqttSink(event_loop_router));
        tokio::select! {
            () = event_loop_shutdown.cancelled() => {}
            () = event_loop_sink.run_event_loop(event_loop, sink) => {}
        }
    });

    let long_poll_router = Arc::clone(&router);
    let long_poll_shutdown = shutdown.clone();
    let own_channel_id = config.own_channel_id.clone();
    tokio::spawn(async move {
        let sink = Arc::new(RouterLongPollSink(long_poll_router));
        let reader = LongPollReader::new(own_channel_url, sink);
        let never_notified = Arc::new(tokio::sync::Notify::new());
        tokio::select! {
            () = long_poll_shutdown.cancelled() => {}
            () = reader.run(&own_channel_id, never_notified) => {}
        }
    });

    info!("clusterbus is ready");

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    shutdown.cancel();
    router.shutdown().await;

    info!("clusterbus shut down gracefully");
    Ok(())
}

struct RouterMqttSink(Arc<MessageRouter>);

#[async_trait::async_trait]
impl clusterbus::drivers::mqtt::MqttInboundSink for RouterMqttSink {
    async fn on_inbound_publish(&self, topic: &str, payload: Vec<u8>) {
        let deserialize = |bytes: &[u8]| {
            serde_json::from_slice(bytes).map_err(|error: serde_json::Error| error.to_string())
        };
        if let Err(error) = self.0.on_message_bytes(topic, &payload, deserialize).await {
            tracing::warn!(topic, %error, "failed to dispatch inbound mqtt message");
        }
    }
}

struct RouterLongPollSink(Arc<MessageRouter>);

#[async_trait::async_trait]
impl LongPollSink for RouterLongPollSink {
    async fn on_message(&self, channel_id: &str, bytes: Vec<u8>) {
        let deserialize = |bytes: &[u8]| {
            serde_json::from_slice(bytes).map_err(|error: serde_json::Error| error.to_string())
        };
        if let Err(error) = self.0.on_message_bytes(channel_id, &bytes, deserialize).await {
            tracing::warn!(channel_id, %error, "failed to dispatch inbound http message");
        }
    }
}
