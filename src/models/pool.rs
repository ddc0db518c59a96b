use serde::Deserialize;

/// Instance pool as returned by the management API. Most fields are
/// optional; pools can be registered before their node reports capacity.
#[derive(Debug, Clone, Deserialize)]
pub struct InstancePool {
    pub pool_id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub node_hostname: Option<String>,
    #[serde(default)]
    pub current_instances: Option<i64>,
    #[serde(default)]
    pub min_instances: Option<i64>,
    #[serde(default)]
    pub max_instances: Option<i64>,
    #[serde(default)]
    pub last_scaled_at: Option<String>,
}

impl InstancePool {
    /// Human-facing name, falling back to the pool identifier
    pub fn name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.pool_id)
    }

    /// Scaling bounds as "min-max", with "?" for unreported values
    pub fn bounds(&self) -> String {
        let fmt = |v: Option<i64>| v.map_or_else(|| "?".to_string(), |n| n.to_string());
        format!("{}-{}", fmt(self.min_instances), fmt(self.max_instances))
    }
}
