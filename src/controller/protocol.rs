//! Build coordination messages exchanged between controllers.
//!
//! Messages travel as JSON over broker channels. The `type` tag makes every
//! message self-describing, so a consumer can drop anything it does not
//! recognize without breaking the sender.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A coordination message between controllers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ProtocolMessage {
    /// Realnet asks a sibling to build its topology.
    #[serde(rename = "topology build request")]
    BuildRequest {
        /// Channel of the requesting controller, where the response goes.
        source: String,
        /// Sibling the request is addressed to.
        sibling: String,
    },

    /// A sibling reports the outcome of building its topology.
    #[serde(rename = "topology build response")]
    BuildResponse {
        /// Channel of the responding controller.
        source: String,
        /// Sibling that built the topology.
        sibling: String,
        /// The sibling's topology definition.
        topology: Value,
        /// Nodes of the sibling topology, in whatever shape the sibling
        /// reports them. The requester copies this through uninterpreted.
        nodes: Value,
        /// Interfaces of the sibling topology, carried like `nodes`.
        interfaces: Value,
        /// Whether the sibling topology is deployed and running.
        running: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_build_request_wire_format() {
        let request = ProtocolMessage::BuildRequest {
            source: "realnet".to_string(),
            sibling: "security".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&request).expect("serialize"),
            json!({
                "type": "topology build request",
                "source": "realnet",
                "sibling": "security",
            })
        );
    }

    #[test]
    fn test_build_response_wire_format() {
        let response = ProtocolMessage::BuildResponse {
            source: "security".to_string(),
            sibling: "security".to_string(),
            topology: json!({"name": "real_security"}),
            nodes: json!(["srl1"]),
            interfaces: json!(["srl1:e1-1"]),
            running: true,
        };
        let wire = serde_json::to_value(&response).expect("serialize");
        assert_eq!(wire["type"], "topology build response");
        assert_eq!(
            serde_json::from_value::<ProtocolMessage>(wire).expect("deserialize"),
            response
        );
    }

    #[test]
    fn test_build_response_nodes_shape_is_not_interpreted() {
        // Siblings describe nodes and interfaces however suits them; maps
        // decode as readily as name lists.
        let wire = json!({
            "type": "topology build response",
            "source": "security",
            "sibling": "security",
            "topology": {"name": "real_security"},
            "nodes": {"srl1": {"kind": "nokia_srlinux"}},
            "interfaces": {"srl1": ["e1-1"]},
            "running": true,
        });
        let message: ProtocolMessage = serde_json::from_value(wire).expect("deserialize");
        match message {
            ProtocolMessage::BuildResponse {
                nodes, interfaces, ..
            } => {
                assert_eq!(nodes["srl1"]["kind"], "nokia_srlinux");
                assert_eq!(interfaces["srl1"][0], "e1-1");
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_message_type_is_rejected() {
        let wire = json!({"type": "topology teardown request", "source": "realnet"});
        assert!(serde_json::from_value::<ProtocolMessage>(wire).is_err());
    }

    #[test]
    fn test_request_and_response_are_distinguished_by_tag() {
        let wire = json!({
            "type": "topology build request",
            "source": "realnet",
            "sibling": "security",
        });
        let message: ProtocolMessage = serde_json::from_value(wire).expect("deserialize");
        assert!(matches!(message, ProtocolMessage::BuildRequest { .. }));
    }
}
