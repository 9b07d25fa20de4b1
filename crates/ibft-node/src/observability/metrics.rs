//! Prometheus metrics for the in-process transport.

use parking_lot::RwLock;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{exponential_buckets, Histogram};
use prometheus_client::registry::Registry;
use std::sync::Arc;

/// Message delivery labels.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct DeliveryLabels {
    /// What happened to the message (delivered, dropped, partitioned).
    pub outcome: String,
}

/// Transport metrics container.
#[derive(Clone)]
pub struct NetworkMetrics {
    /// Prometheus registry.
    pub registry: Arc<RwLock<Registry>>,
    /// Messages handed to the transport, by outcome.
    pub messages_total: Family<DeliveryLabels, Counter>,
    /// Encoded size of sent messages.
    pub message_size_bytes: Histogram,
    /// Registered peers.
    pub peers_connected: Gauge,
}

impl Default for NetworkMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl NetworkMetrics {
    /// Create a new metrics container with all metrics registered.
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let messages_total = Family::<DeliveryLabels, Counter>::default();
        registry.register(
            "ibft_network_messages",
            "Messages handed to the transport",
            messages_total.clone(),
        );

        let message_size_bytes = Histogram::new(exponential_buckets(64.0, 2.0, 14));
        registry.register(
            "ibft_network_message_size_bytes",
            "Encoded size of sent messages",
            message_size_bytes.clone(),
        );

        let peers_connected = Gauge::default();
        registry.register(
            "ibft_network_peers_connected",
            "Number of registered peers",
            peers_connected.clone(),
        );

        Self {
            registry: Arc::new(RwLock::new(registry)),
            messages_total,
            message_size_bytes,
            peers_connected,
        }
    }

    /// Record one message to one recipient.
    pub fn record_delivery(&self, outcome: &str) {
        self.messages_total
            .get_or_create(&DeliveryLabels {
                outcome: outcome.to_string(),
            })
            .inc();
    }

    /// Number of messages recorded with `outcome`.
    pub fn delivery_count(&self, outcome: &str) -> u64 {
        self.messages_total
            .get_or_create(&DeliveryLabels {
                outcome: outcome.to_string(),
            })
            .get()
    }

    /// Encode metrics for Prometheus scraping.
    pub fn encode(&self) -> String {
        let mut buffer = String::new();
        let registry = self.registry.read();
        prometheus_client::encoding::text::encode(&mut buffer, &registry)
            .expect("Failed to encode metrics");
        buffer
    }
}
