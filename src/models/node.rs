use serde::Deserialize;

use super::InstancePool;

/// Node row as returned by the node list endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeSummary {
    pub node_id: String,
    pub hostname: String,
    pub status: String,
    #[serde(default)]
    pub last_seen: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
}

impl NodeSummary {
    pub fn is_active(&self) -> bool {
        self.status.eq_ignore_ascii_case("active")
    }
}

/// Full node detail, including the instance pools it manages.
#[derive(Debug, Clone, Deserialize)]
pub struct Node {
    pub node_id: String,
    pub hostname: String,
    pub status: String,
    #[serde(default)]
    pub instance_pools: Vec<InstancePool>,
    /// Raw configuration blob as stored on the node, shown verbatim
    #[serde(default)]
    pub config: Option<String>,
    #[serde(default)]
    pub last_seen: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_summary_parses_backend_row() {
        let json = r#"{
            "id": 1,
            "node_id": "node-us-east-1",
            "hostname": "autoscaler-01.internal",
            "status": "active",
            "last_seen": "2026-08-29T10:15:00Z",
            "created_at": "2026-01-10T08:00:00Z"
        }"#;
        let node: NodeSummary = serde_json::from_str(json).expect("summary parses");
        assert_eq!(node.node_id, "node-us-east-1");
        assert_eq!(node.created_at.as_deref(), Some("2026-01-10T08:00:00Z"));
        assert!(node.is_active());
    }

    #[test]
    fn test_node_detail_parses_config_blob() {
        let json = r#"{
            "node_id": "node-us-east-1",
            "hostname": "autoscaler-01.internal",
            "status": "active",
            "config": "{\"poll_interval\": 60}",
            "created_at": "2026-01-10T08:00:00Z"
        }"#;
        let node: Node = serde_json::from_str(json).expect("detail parses");
        assert_eq!(node.config.as_deref(), Some("{\"poll_interval\": 60}"));
        assert_eq!(node.created_at.as_deref(), Some("2026-01-10T08:00:00Z"));
    }

    #[test]
    fn test_node_detail_defaults_missing_pools() {
        let json = r#"{
            "node_id": "node-eu-1",
            "hostname": "autoscaler-eu.internal",
            "status": "offline"
        }"#;
        let node: Node = serde_json::from_str(json).expect("detail parses");
        assert!(node.instance_pools.is_empty());
        assert_eq!(node.config, None);
        assert_eq!(node.last_seen, None);
        assert_eq!(node.created_at, None);
    }
}
