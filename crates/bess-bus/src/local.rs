//! In-memory bus implementation.
//!
//! Backed by a single `tokio::sync::broadcast` channel fanning out to
//! per-subscriber filter tasks. Used by the edge/cloud test suites and
//! by a standalone edge simulator run (spec §8's S1-S6 scenarios),
//! grounded in the teacher's habit of stubbing broker/hardware
//! integration points while the surrounding control flow stays real.

use crate::{BusError, Delivery, Publisher, Subscriber};
use async_trait::async_trait;
use bess_common::Qos;
use tokio::sync::{broadcast, mpsc};

const CHANNEL_CAPACITY: usize = 1024;

#[derive(Clone)]
struct Message {
    topic: String,
    payload: Vec<u8>,
}

/// In-process message bus. Cheap to clone - internally an `Arc`-backed
/// broadcast sender.
#[derive(Clone)]
pub struct LocalBus {
    tx: broadcast::Sender<Message>,
}

impl LocalBus {
    /// Construct a new, empty bus.
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Publisher for LocalBus {
    async fn publish(&self, topic: &str, payload: Vec<u8>, _qos: Qos) -> Result<(), BusError> {
        // A send with zero receivers still "succeeds" at AT_MOST_ONCE
        // fidelity: the broker accepted it, nobody happened to be
        // listening. Only a genuinely closed bus is TransportUnavailable,
        // which LocalBus (unlike a real broker) never becomes on its own.
        let _ = self.tx.send(Message { topic: topic.to_string(), payload });
        Ok(())
    }
}

#[async_trait]
impl Subscriber for LocalBus {
    async fn subscribe(&self, topic_filter: &str) -> Result<mpsc::Receiver<Delivery>, BusError> {
        let mut rx = self.tx.subscribe();
        let (out_tx, out_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let filter = topic_filter.to_string();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(msg) if topic_matches(&filter, &msg.topic) => {
                        if out_tx
                            .send(Delivery { topic: msg.topic, payload: msg.payload })
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "local bus subscriber lagged, messages dropped");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        Ok(out_rx)
    }
}

/// MQTT-style topic matching: `+` matches exactly one path segment, `#`
/// (only valid as the final segment) matches the rest. Shared with
/// [`crate::mqtt`], which applies the same rule to the filters it has
/// registered locally (the broker itself does its own matching for what
/// it delivers; this governs which local subscriber channels a given
/// inbound publish fans out to).
pub(crate) fn topic_matches(filter: &str, topic: &str) -> bool {
    let filter_parts: Vec<&str> = filter.split('/').collect();
    let topic_parts: Vec<&str> = topic.split('/').collect();

    let mut fi = 0;
    let mut ti = 0;
    while fi < filter_parts.len() {
        match filter_parts[fi] {
            "#" => return true,
            "+" => {
                if ti >= topic_parts.len() {
                    return false;
                }
            }
            literal => {
                if topic_parts.get(ti) != Some(&literal) {
                    return false;
                }
            }
        }
        fi += 1;
        ti += 1;
    }
    fi == filter_parts.len() && ti == topic_parts.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn delivers_to_matching_subscriber() {
        let bus = LocalBus::new();
        let mut rx = bus.subscribe("lifo4/bess-001/telemetry").await.unwrap();
        bus.publish("lifo4/bess-001/telemetry", b"hi".to_vec(), Qos::AtLeastOnce)
            .await
            .unwrap();
        let delivery = rx.recv().await.unwrap();
        assert_eq!(delivery.payload, b"hi");
    }

    #[tokio::test]
    async fn single_level_wildcard_matches_any_system() {
        let bus = LocalBus::new();
        let mut rx = bus.subscribe("lifo4/+/telemetry").await.unwrap();
        bus.publish("lifo4/bess-002/telemetry", b"x".to_vec(), Qos::AtLeastOnce)
            .await
            .unwrap();
        let delivery = rx.recv().await.unwrap();
        assert_eq!(delivery.topic, "lifo4/bess-002/telemetry");
    }

    #[tokio::test]
    async fn non_matching_topic_is_not_delivered() {
        let bus = LocalBus::new();
        let mut rx = bus.subscribe("lifo4/bess-001/telemetry").await.unwrap();
        bus.publish("lifo4/bess-001/commands", b"x".to_vec(), Qos::ExactlyOnce)
            .await
            .unwrap();
        bus.publish("lifo4/bess-001/telemetry", b"y".to_vec(), Qos::AtLeastOnce)
            .await
            .unwrap();
        let delivery = rx.recv().await.unwrap();
        assert_eq!(delivery.payload, b"y");
    }
}
