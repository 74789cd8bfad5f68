//! Platform detection from node metadata
//!
//! The cluster flavor decides which node addresses are reachable from outside:
//! kind nodes only carry container-network InternalIPs, k3s reports real
//! ExternalIPs, and anything else prefers ExternalIPs when it has them.

use k8s_openapi::api::core::v1::Node;

/// Detected cluster flavor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    /// kind (Kubernetes in Docker)
    Kind,
    /// k3s / k3d
    K3s,
    /// Any other conformant cluster
    Generic,
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Platform::Kind => write!(f, "kind"),
            Platform::K3s => write!(f, "k3s"),
            Platform::Generic => write!(f, "generic"),
        }
    }
}

const INTERNAL_IP: &str = "InternalIP";
const EXTERNAL_IP: &str = "ExternalIP";

impl Platform {
    /// Classify the cluster from its nodes' provider IDs
    pub fn detect(nodes: &[Node]) -> Self {
        let provider_ids = || {
            nodes
                .iter()
                .filter_map(|n| n.spec.as_ref().and_then(|s| s.provider_id.as_deref()))
        };

        if provider_ids().any(|id| id.contains("kind://")) {
            Platform::Kind
        } else if provider_ids().any(|id| id.contains("k3s://")) {
            Platform::K3s
        } else {
            Platform::Generic
        }
    }

    /// Externally reachable addresses for this platform, in node order
    pub fn external_addresses(&self, nodes: &[Node]) -> Vec<String> {
        match self {
            Platform::Kind => addresses_of_type(nodes, INTERNAL_IP),
            Platform::K3s => addresses_of_type(nodes, EXTERNAL_IP),
            Platform::Generic => {
                let external = addresses_of_type(nodes, EXTERNAL_IP);
                if external.is_empty() {
                    addresses_of_type(nodes, INTERNAL_IP)
                } else {
                    external
                }
            }
        }
    }
}

fn addresses_of_type(nodes: &[Node], address_type: &str) -> Vec<String> {
    nodes
        .iter()
        .filter_map(|n| n.status.as_ref().and_then(|s| s.addresses.as_ref()))
        .flatten()
        .filter(|a| a.type_ == address_type)
        .map(|a| a.address.clone())
        .collect()
}
