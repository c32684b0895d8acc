use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use utoipa::ToSchema;

/// RFC7807-style error payload used at service edges.
#[derive(Debug, Serialize, Deserialize, Clone, JsonSchema, ToSchema)]
pub struct ProblemDetails {
    pub r#type: String,
    pub title: String,
    pub status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ProblemDetails {
    pub fn new(title: &str, status: u16, detail: Option<String>) -> Self {
        Self {
            r#type: "about:blank".into(),
            title: title.to_string(),
            status,
            detail,
        }
    }
}

/// One telemetry reading as submitted by a vehicle or gateway.
///
/// Timestamps are optional on the wire; ingestion stamps the server clock when
/// absent. Channel units arrive as produced by the vehicle and are stored
/// unconverted.
#[derive(Debug, Serialize, Deserialize, Clone, JsonSchema, ToSchema)]
pub struct TelemetryIngest {
    pub vehicle_id: String,
    #[serde(default)]
    #[schema(value_type = Option<String>)]
    pub timestamp: Option<DateTime<Utc>>,
    pub speed: f64,
    pub rpm: f64,
    pub engine_temp: f64,
    pub battery_level: f64,
    pub brake_wear: f64,
    pub tire_pressure_fl: f64,
    pub tire_pressure_fr: f64,
    pub tire_pressure_rl: f64,
    pub tire_pressure_rr: f64,
    pub latitude: f64,
    pub longitude: f64,
}

/// Classification output of the master router.
///
/// Parsed from completion text, so every field except the target tolerates
/// absence.
#[derive(Debug, Serialize, Deserialize, Clone, JsonSchema)]
pub struct RoutingDecision {
    pub target_agent: String,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    #[schemars(with = "Value")]
    pub parameters: Map<String, Value>,
}

/// Diagnosis handler payload (one completion call).
#[derive(Debug, Serialize, Deserialize, Clone, JsonSchema)]
pub struct DiagnosisReport {
    #[serde(default)]
    pub root_cause: String,
    #[serde(default)]
    pub fault_code: String,
    #[serde(default)]
    pub severity: String,
    #[serde(default)]
    pub action_for_driver: String,
    #[serde(default)]
    pub recommended_parts: Vec<String>,
}

impl DiagnosisReport {
    /// Fixed payload returned when the completion service cannot be used.
    pub fn fallback() -> Self {
        Self {
            root_cause: "AI Diagnosis Unavailable".into(),
            fault_code: "ERR-001".into(),
            severity: "Unknown".into(),
            action_for_driver: "Contact service center immediately.".into(),
            recommended_parts: Vec::new(),
        }
    }
}

/// Date/service-type extraction expected from the scheduling completion.
#[derive(Debug, Serialize, Deserialize, Clone, JsonSchema)]
pub struct ScheduleExtraction {
    #[serde(default)]
    pub target_date: Option<String>,
    #[serde(default)]
    pub service_type: Option<String>,
}

/// Customer engagement handler payload.
#[derive(Debug, Serialize, Deserialize, Clone, JsonSchema)]
pub struct CustomerReply {
    #[serde(default)]
    pub response: String,
    #[serde(default)]
    pub suggested_actions: Vec<String>,
}

impl CustomerReply {
    pub fn fallback() -> Self {
        Self {
            response: "I'm sorry, I'm having trouble processing your request right now. \
                       Please try again later."
                .into(),
            suggested_actions: Vec::new(),
        }
    }
}

/// Feedback handler payload.
#[derive(Debug, Serialize, Deserialize, Clone, JsonSchema)]
pub struct FeedbackAnalysis {
    #[serde(default)]
    pub sentiment: String,
    #[serde(default)]
    pub key_points: Vec<String>,
    #[serde(default)]
    pub follow_up_action: String,
}

impl FeedbackAnalysis {
    pub fn fallback() -> Self {
        Self {
            sentiment: "Unknown".into(),
            key_points: Vec::new(),
            follow_up_action: "Manual review required.".into(),
        }
    }
}

/// Manufacturing insight handler payload.
#[derive(Debug, Serialize, Deserialize, Clone, JsonSchema)]
pub struct InsightReport {
    #[serde(default)]
    pub top_defects: Vec<String>,
    #[serde(default)]
    pub root_cause_hypothesis: String,
    #[serde(default)]
    pub recommendations: Vec<String>,
}

impl InsightReport {
    pub fn fallback() -> Self {
        Self {
            top_defects: Vec::new(),
            root_cause_hypothesis: "Analysis failed.".into(),
            recommendations: Vec::new(),
        }
    }
}

/// Severity/assessment pair expected from the health-analysis completion.
#[derive(Debug, Serialize, Deserialize, Clone, JsonSchema)]
pub struct HealthAssessment {
    #[serde(default = "HealthAssessment::default_severity")]
    pub severity: String,
    #[serde(default = "HealthAssessment::default_assessment")]
    pub assessment: String,
}

impl HealthAssessment {
    fn default_severity() -> String {
        "medium".into()
    }

    fn default_assessment() -> String {
        "Analysis failed".into()
    }
}

impl Default for HealthAssessment {
    fn default() -> Self {
        Self {
            severity: Self::default_severity(),
            assessment: Self::default_assessment(),
        }
    }
}
