// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! MQTT connection manager.
//!
//! One `rumqttc` connection to one broker. The last will publishes a
//! retained `offline` to the availability topic on ungraceful disconnect;
//! every successful connect re-subscribes all `/set` topics and notifies the
//! publisher so retained state and discovery documents are republished.
//!
//! Reconnect policy: after a connection failure the event loop sleeps
//! `reconnect_interval` and tries again, up to `retry_limit` consecutive
//! failures; then the error is fatal (exit code 3). The failure is logged
//! once per outage, not per retry.

use std::sync::Arc;
use std::time::Duration;

use rumqttc::{AsyncClient, Event, LastWill, MqttOptions, Packet, QoS};
use tokio::sync::{broadcast, mpsc};

use unipi_core::error::MqttError;

use crate::router::TopicRouter;

// =============================================================================
// MqttSettings
// =============================================================================

/// Broker connection settings.
#[derive(Debug, Clone)]
pub struct MqttSettings {
    /// Client id; the device name.
    pub client_id: String,
    /// Broker host.
    pub host: String,
    /// Broker port.
    pub port: u16,
    /// Keep-alive interval.
    pub keepalive: Duration,
    /// Optional credentials.
    pub credentials: Option<(String, String)>,
    /// Availability topic for the last will.
    pub availability_topic: String,
    /// Delay between reconnect attempts.
    pub reconnect_interval: Duration,
    /// Consecutive failures before giving up.
    pub retry_limit: u32,
}

impl MqttSettings {
    fn broker(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

// =============================================================================
// MqttHandle
// =============================================================================

/// Cloneable publishing handle.
#[derive(Clone)]
pub struct MqttHandle {
    client: AsyncClient,
}

impl MqttHandle {
    /// Publishes a retained QoS 1 message.
    pub async fn publish_retained(
        &self,
        topic: impl Into<String>,
        payload: impl Into<Vec<u8>>,
    ) -> Result<(), MqttError> {
        self.client
            .publish(topic.into(), QoS::AtLeastOnce, true, payload.into())
            .await
            .map_err(|e| MqttError::request(e.to_string()))
    }

    /// Gracefully disconnects (the last will is not sent).
    pub async fn disconnect(&self) -> Result<(), MqttError> {
        self.client
            .disconnect()
            .await
            .map_err(|e| MqttError::request(e.to_string()))
    }
}

// =============================================================================
// MqttConnection
// =============================================================================

/// The connection manager: owns the event loop.
pub struct MqttConnection {
    settings: MqttSettings,
    client: AsyncClient,
    eventloop: rumqttc::EventLoop,
    router: Arc<TopicRouter>,
    connected_tx: mpsc::UnboundedSender<()>,
}

impl MqttConnection {
    /// Creates the connection. `connected_tx` fires on every ConnAck, after
    /// the subscriptions have been re-established.
    pub fn new(
        settings: MqttSettings,
        router: Arc<TopicRouter>,
        connected_tx: mpsc::UnboundedSender<()>,
    ) -> (Self, MqttHandle) {
        let mut options = MqttOptions::new(&settings.client_id, &settings.host, settings.port);
        options.set_keep_alive(settings.keepalive);
        options.set_last_will(LastWill::new(
            &settings.availability_topic,
            "offline",
            QoS::AtLeastOnce,
            true,
        ));
        if let Some((username, password)) = &settings.credentials {
            options.set_credentials(username, password);
        }

        let (client, eventloop) = AsyncClient::new(options, 64);
        let handle = MqttHandle {
            client: client.clone(),
        };

        (
            Self {
                settings,
                client,
                eventloop,
                router,
                connected_tx,
            },
            handle,
        )
    }

    /// Drives the event loop until shutdown or retry exhaustion.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) -> Result<(), MqttError> {
        let mut failures: u32 = 0;

        loop {
            tokio::select! {
                _ = shutdown.recv() => return Ok(()),
                event = self.eventloop.poll() => match event {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        if failures > 0 {
                            tracing::info!(broker = %self.settings.broker(), "Broker connection restored");
                        } else {
                            tracing::info!(broker = %self.settings.broker(), "Connected to broker");
                        }
                        failures = 0;
                        self.subscribe_all().await;
                        let _ = self.connected_tx.send(());
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        self.router.dispatch(&publish.topic, &publish.payload).await;
                    }
                    Ok(_) => {}
                    Err(error) => {
                        failures += 1;
                        if failures == 1 {
                            tracing::warn!(
                                broker = %self.settings.broker(),
                                %error,
                                "Broker connection lost, reconnecting"
                            );
                        } else {
                            tracing::debug!(attempt = failures, %error, "Reconnect failed");
                        }
                        if failures >= self.settings.retry_limit {
                            return Err(MqttError::RetryExhausted {
                                broker: self.settings.broker(),
                                attempts: failures,
                            });
                        }
                        tokio::select! {
                            _ = shutdown.recv() => return Ok(()),
                            _ = tokio::time::sleep(self.settings.reconnect_interval) => {}
                        }
                    }
                }
            }
        }
    }

    async fn subscribe_all(&mut self) {
        for topic in self.router.subscriptions() {
            if let Err(error) = self.client.subscribe(&topic, QoS::AtLeastOnce).await {
                tracing::warn!(topic, %error, "Subscribe failed");
            } else {
                tracing::debug!(topic, "Subscribed");
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broker_string() {
        let settings = MqttSettings {
            client_id: "unipi".to_string(),
            host: "broker.local".to_string(),
            port: 1883,
            keepalive: Duration::from_secs(15),
            credentials: None,
            availability_topic: "unipi/availability".to_string(),
            reconnect_interval: Duration::from_secs(10),
            retry_limit: 30,
        };
        assert_eq!(settings.broker(), "broker.local:1883");
    }
}
