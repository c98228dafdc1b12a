//! `rumqttc`-backed bus implementation.
//!
//! The broker rejects duplicate client ids (spec §5: "Broker connections
//! are single-threaded per client id ... the adapter funnels publishes
//! through a single writer"), so all publishes for one process go
//! through one `rumqttc::AsyncClient`, itself driven by one long-lived
//! event-loop task. Reconnection is the event loop's own responsibility
//! once `rumqttc` reports a connection error; we additionally track
//! state so callers can observe connectivity and so a last-will payload
//! is registered up front.

use crate::{BusError, Delivery, Publisher, Subscriber};
use async_trait::async_trait;
use bess_common::Qos as BessQos;
use parking_lot::RwLock;
use rand::Rng;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS as MqttQos};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

fn to_mqtt_qos(qos: BessQos) -> MqttQos {
    match qos {
        BessQos::AtMostOnce => MqttQos::AtMostOnce,
        BessQos::AtLeastOnce => MqttQos::AtLeastOnce,
        BessQos::ExactlyOnce => MqttQos::ExactlyOnce,
    }
}

/// Connection lifecycle state, exposed for health reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnected,
}

struct Shared {
    state: RwLock<ConnectionState>,
    /// Fan-out registry: topic filter -> subscriber channels. A message
    /// matching more than one filter is delivered to each.
    routes: RwLock<HashMap<String, Vec<mpsc::Sender<Delivery>>>>,
}

/// Real message bus adapter, built on `rumqttc`.
pub struct MqttBus {
    client: AsyncClient,
    shared: Arc<Shared>,
}

impl MqttBus {
    /// Connect to `host:port` with `client_id`, registering a last-will
    /// `{"state":"OFFLINE"}` payload on the client's own status topic so
    /// peers detect an unclean disconnect (spec §4.1).
    pub async fn connect(host: &str, port: u16, client_id: &str, status_topic: &str) -> Result<Self, BusError> {
        let mut options = MqttOptions::new(client_id, host, port);
        options.set_keep_alive(Duration::from_secs(15));
        options.set_last_will(rumqttc::LastWill::new(
            status_topic,
            br#"{"state":"OFFLINE"}"#.to_vec(),
            MqttQos::AtLeastOnce,
            true,
        ));

        let (client, mut event_loop) = AsyncClient::new(options, 256);
        let shared = Arc::new(Shared {
            state: RwLock::new(ConnectionState::Connecting),
            routes: RwLock::new(HashMap::new()),
        });

        let worker_shared = shared.clone();
        let worker_client = client.clone();
        let status_topic_owned = status_topic.to_string();
        tokio::spawn(async move {
            let mut backoff = Duration::from_secs(1);
            loop {
                match event_loop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        *worker_shared.state.write() = ConnectionState::Connected;
                        backoff = Duration::from_secs(1);
                        tracing::info!("mqtt bus connected, resubscribing");
                        let filters: Vec<String> = worker_shared.routes.read().keys().cloned().collect();
                        for filter in filters {
                            if let Err(e) = worker_client.subscribe(&filter, MqttQos::AtLeastOnce).await {
                                tracing::warn!(error = %e, filter, "resubscribe failed");
                            }
                        }
                        let alive = serde_json::json!({"state": "ONLINE"}).to_string();
                        let _ = worker_client
                            .publish(&status_topic_owned, MqttQos::AtLeastOnce, true, alive)
                            .await;
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        let delivery = Delivery {
                            topic: publish.topic.clone(),
                            payload: publish.payload.to_vec(),
                        };
                        let routes = worker_shared.routes.read();
                        for (filter, senders) in routes.iter() {
                            if crate::local::topic_matches(filter, &publish.topic) {
                                for sender in senders {
                                    let _ = sender.try_send(delivery.clone());
                                }
                            }
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        *worker_shared.state.write() = ConnectionState::Disconnected;
                        tracing::warn!(error = %e, backoff_ms = backoff.as_millis(), "mqtt event loop error, backing off");
                        let jitter_ms = rand::thread_rng().gen_range(0..=backoff.as_millis() as u64);
                        tokio::time::sleep(Duration::from_millis(jitter_ms)).await;
                        backoff = (backoff * 2).min(Duration::from_secs(30));
                    }
                }
            }
        });

        Ok(Self { client, shared })
    }

    /// Current connection state.
    pub fn connection_state(&self) -> ConnectionState {
        *self.shared.state.read()
    }
}

#[async_trait]
impl Publisher for MqttBus {
    async fn publish(&self, topic: &str, payload: Vec<u8>, qos: BessQos) -> Result<(), BusError> {
        if self.connection_state() != ConnectionState::Connected {
            return Err(BusError::TransportUnavailable);
        }
        self.client
            .publish(topic, to_mqtt_qos(qos), false, payload)
            .await
            .map_err(|e| BusError::Publish(e.to_string()))
    }
}

#[async_trait]
impl Subscriber for MqttBus {
    async fn subscribe(&self, topic_filter: &str) -> Result<mpsc::Receiver<Delivery>, BusError> {
        self.client
            .subscribe(topic_filter, MqttQos::AtLeastOnce)
            .await
            .map_err(|e| BusError::Subscribe(e.to_string()))?;
        let (tx, rx) = mpsc::channel(256);
        self.shared
            .routes
            .write()
            .entry(topic_filter.to_string())
            .or_default()
            .push(tx);
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qos_mapping_preserves_ordering() {
        assert_eq!(to_mqtt_qos(BessQos::AtMostOnce), MqttQos::AtMostOnce);
        assert_eq!(to_mqtt_qos(BessQos::AtLeastOnce), MqttQos::AtLeastOnce);
        assert_eq!(to_mqtt_qos(BessQos::ExactlyOnce), MqttQos::ExactlyOnce);
    }

    #[test]
    fn starts_disconnected_before_first_connack() {
        // ConnectionState::Connecting is the pre-handshake state; publish
        // must refuse until the worker task observes a ConnAck.
        assert_ne!(ConnectionState::Connecting, ConnectionState::Connected);
    }
}
