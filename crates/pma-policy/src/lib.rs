use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::fs;

/// Agent name → allowed resource patterns. A `*` entry grants every resource.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GateConfig {
    #[serde(default)]
    pub grants: BTreeMap<String, Vec<String>>,
}

impl Default for GateConfig {
    fn default() -> Self {
        let mut grants = BTreeMap::new();
        let entry = |names: &[&str]| names.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        grants.insert("master".to_string(), entry(&["*"]));
        grants.insert(
            "data_analysis".to_string(),
            entry(&["read_telemetry", "read_vehicle", "write_cleaned_data"]),
        );
        grants.insert(
            "diagnosis".to_string(),
            entry(&["read_cleaned_data", "read_history", "write_predicted_issues"]),
        );
        grants.insert(
            "scheduling".to_string(),
            entry(&["read_predicted_issues", "read_schedule", "write_appointment"]),
        );
        grants.insert(
            "customer_engagement".to_string(),
            entry(&["read_vehicle_health", "read_appointments"]),
        );
        grants.insert(
            "feedback".to_string(),
            entry(&["read_service_record", "write_rca_capa"]),
        );
        grants.insert(
            "manufacturing_insight".to_string(),
            entry(&["read_rca_capa", "read_defects"]),
        );
        Self { grants }
    }
}

/// Outcome of one gate consultation, shaped for the audit ledger.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Decision {
    pub allow: bool,
    pub result: String,
    pub risk_level: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Static permission table consulted before each handler dispatch.
///
/// The gate decides; it does not write the audit row itself. Callers log the
/// decision and choose whether to enforce it.
#[derive(Clone, Debug)]
pub struct Gate {
    cfg: GateConfig,
}

impl Gate {
    pub fn load_from_env() -> Self {
        // Highest precedence: explicit JSON file
        if let Ok(path) = std::env::var("PMA_POLICY_FILE") {
            if let Ok(bytes) = fs::read(path) {
                if let Ok(cfg) = serde_json::from_slice::<GateConfig>(&bytes) {
                    return Self::with_config(cfg);
                }
            }
        }
        // Next: inline JSON
        if let Ok(raw) = std::env::var("PMA_POLICY") {
            if let Ok(cfg) = serde_json::from_str::<GateConfig>(&raw) {
                return Self::with_config(cfg);
            }
        }
        Self::with_config(GateConfig::default())
    }

    pub fn with_config(cfg: GateConfig) -> Self {
        Self { cfg }
    }

    /// Bidirectional substring match against the agent's grant list. Unknown
    /// agents hold no grants and are denied.
    pub fn check(&self, agent: &str, resource: &str) -> bool {
        let Some(allowed) = self.cfg.grants.get(agent) else {
            return false;
        };
        if allowed.iter().any(|a| a == "*") {
            return true;
        }
        allowed
            .iter()
            .any(|a| resource.contains(a.as_str()) || a.contains(resource))
    }

    /// Full consultation: the verdict plus the fields the audit ledger records.
    /// The action does not influence the verdict; it only names the attempt in
    /// the denial reason.
    pub fn evaluate(&self, agent: &str, action: &str, resource: &str) -> Decision {
        let allow = self.check(agent, resource);
        Decision {
            allow,
            result: if allow { "ALLOWED" } else { "BLOCKED" }.to_string(),
            risk_level: if allow { "LOW" } else { "HIGH" }.to_string(),
            reason: (!allow)
                .then(|| format!("No grant covering '{resource}' for action '{action}'")),
        }
    }

    pub fn snapshot(&self) -> serde_json::Value {
        serde_json::to_value(&self.cfg).unwrap_or(json!({}))
    }
}
