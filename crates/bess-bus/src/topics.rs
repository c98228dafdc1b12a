//! Topic naming (spec §6): `lifo4/{system_id}/{channel}` plus the shared
//! provisioning topics.

use std::fmt;

/// A well-formed bus topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Topic {
    ProvisioningRegister,
    ProvisioningConfig { edge_id: String },
    Telemetry { system_id: String },
    Commands { system_id: String },
    GridEvent { system_id: String },
    Demand { system_id: String },
    OtaUpdate { system_id: String },
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topic::ProvisioningRegister => write!(f, "lifo4/provisioning/register"),
            Topic::ProvisioningConfig { edge_id } => write!(f, "lifo4/provisioning/{edge_id}/config"),
            Topic::Telemetry { system_id } => write!(f, "lifo4/{system_id}/telemetry"),
            Topic::Commands { system_id } => write!(f, "lifo4/{system_id}/commands"),
            Topic::GridEvent { system_id } => write!(f, "lifo4/{system_id}/grid/event"),
            Topic::Demand { system_id } => write!(f, "lifo4/{system_id}/demand"),
            Topic::OtaUpdate { system_id } => write!(f, "lifo4/{system_id}/ota/update"),
        }
    }
}

/// Subscription filter for every telemetry topic, used by the cloud's
/// telemetry ingester (spec §4.6: "consume every message on
/// `lifo4/+/telemetry`").
pub const TELEMETRY_WILDCARD: &str = "lifo4/+/telemetry";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn telemetry_topic_matches_spec_pattern() {
        let topic = Topic::Telemetry { system_id: "bess-001".into() };
        assert_eq!(topic.to_string(), "lifo4/bess-001/telemetry");
    }

    #[test]
    fn provisioning_config_topic_is_per_edge() {
        let topic = Topic::ProvisioningConfig { edge_id: "edge-42".into() };
        assert_eq!(topic.to_string(), "lifo4/provisioning/edge-42/config");
    }
}
