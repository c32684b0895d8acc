use serde_json::{json, Map, Value};

use crate::AppState;

pub(crate) mod customer;
pub(crate) mod data_analysis;
pub(crate) mod diagnosis;
pub(crate) mod feedback;
pub(crate) mod manufacturing;
pub(crate) mod master;
pub(crate) mod scheduling;

/// Closed set of routable handlers. Unrecognized names fail at the
/// string-to-enum boundary; there is no default route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AgentKind {
    DataAnalysis,
    Diagnosis,
    Scheduling,
    CustomerEngagement,
    Feedback,
    ManufacturingInsight,
}

impl AgentKind {
    pub const ALL: [AgentKind; 6] = [
        AgentKind::DataAnalysis,
        AgentKind::Diagnosis,
        AgentKind::Scheduling,
        AgentKind::CustomerEngagement,
        AgentKind::Feedback,
        AgentKind::ManufacturingInsight,
    ];

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "data_analysis" => Some(AgentKind::DataAnalysis),
            "diagnosis" => Some(AgentKind::Diagnosis),
            "scheduling" => Some(AgentKind::Scheduling),
            "customer_engagement" => Some(AgentKind::CustomerEngagement),
            "feedback" => Some(AgentKind::Feedback),
            "manufacturing_insight" => Some(AgentKind::ManufacturingInsight),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AgentKind::DataAnalysis => "data_analysis",
            AgentKind::Diagnosis => "diagnosis",
            AgentKind::Scheduling => "scheduling",
            AgentKind::CustomerEngagement => "customer_engagement",
            AgentKind::Feedback => "feedback",
            AgentKind::ManufacturingInsight => "manufacturing_insight",
        }
    }

    /// One-line capability shown to the router model.
    pub fn capability(self) -> &'static str {
        match self {
            AgentKind::DataAnalysis => {
                "Analyzes telemetry data, detects anomalies, and assesses component health."
            }
            AgentKind::Diagnosis => {
                "Identifies fault codes, determines severity, and recommends technical actions."
            }
            AgentKind::Scheduling => {
                "Checks workshop availability, books appointments, and manages service schedules."
            }
            AgentKind::CustomerEngagement => {
                "Interacts with customers, explains issues, and handles bookings via chat."
            }
            AgentKind::Feedback => "Collects and analyzes post-service feedback.",
            AgentKind::ManufacturingInsight => {
                "Aggregates defect patterns for OEM/Manufacturing teams."
            }
        }
    }

    /// Resource the permission gate is consulted with when this handler is
    /// dispatched.
    pub fn primary_resource(self) -> &'static str {
        match self {
            AgentKind::DataAnalysis => "read_telemetry",
            AgentKind::Diagnosis => "read_cleaned_data",
            AgentKind::Scheduling => "write_appointment",
            AgentKind::CustomerEngagement => "read_vehicle_health",
            AgentKind::Feedback => "read_service_record",
            AgentKind::ManufacturingInsight => "read_defects",
        }
    }
}

/// Handler-name to capability map, interpolated into the router prompt.
pub(crate) fn directory() -> Value {
    let mut map = Map::new();
    for kind in AgentKind::ALL {
        map.insert(
            kind.as_str().to_string(),
            Value::String(kind.capability().to_string()),
        );
    }
    Value::Object(map)
}

/// Terminal structured error in the handlers' common shape.
pub(crate) fn error_result(message: impl Into<String>) -> Value {
    json!({"status": "error", "message": message.into()})
}

/// Merged view over the routing decision's parameters and the request context.
/// Decision parameters win per key; explicit JSON null counts as absent.
pub(crate) struct Params<'a> {
    parameters: &'a Map<String, Value>,
    context: &'a Map<String, Value>,
}

impl<'a> Params<'a> {
    pub fn new(parameters: &'a Map<String, Value>, context: &'a Map<String, Value>) -> Self {
        Self {
            parameters,
            context,
        }
    }

    pub fn value(&self, key: &str) -> Option<&'a Value> {
        self.parameters
            .get(key)
            .filter(|v| !v.is_null())
            .or_else(|| self.context.get(key).filter(|v| !v.is_null()))
    }

    /// Context-only lookup, for keys the decision never carries.
    pub fn context_value(&self, key: &str) -> Option<&'a Value> {
        self.context.get(key).filter(|v| !v.is_null())
    }

    pub fn str_value(&self, key: &str) -> Option<String> {
        self.value(key)
            .and_then(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }

    /// Integer that tolerates numeric strings; identifiers arrive both ways
    /// from the extraction model.
    pub fn i64_value(&self, key: &str) -> Option<i64> {
        self.value(key).and_then(|v| match v {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        })
    }
}

/// Run one handler with the merged parameter view. Missing required fields
/// short-circuit into the structured error shape; storage faults propagate.
pub(crate) async fn dispatch(
    state: &AppState,
    kind: AgentKind,
    parameters: &Map<String, Value>,
    context: &Map<String, Value>,
) -> anyhow::Result<Value> {
    let params = Params::new(parameters, context);
    let result = match kind {
        AgentKind::DataAnalysis => match data_analysis::extract(&params) {
            Ok(p) => data_analysis::analyze_vehicle_health(state, &p).await?,
            Err(msg) => error_result(msg),
        },
        AgentKind::Diagnosis => {
            let p = diagnosis::extract(&params);
            diagnosis::diagnose_issue(state, &p).await
        }
        AgentKind::Scheduling => match scheduling::extract(&params) {
            Ok(p) => scheduling::schedule_service(state, &p).await?,
            Err(msg) => error_result(msg),
        },
        AgentKind::CustomerEngagement => match customer::extract(&params) {
            Ok(p) => customer::handle_query(state, &p, context).await?,
            Err(msg) => error_result(msg),
        },
        AgentKind::Feedback => match feedback::extract(&params) {
            Ok(p) => feedback::analyze_feedback(state, &p).await,
            Err(msg) => error_result(msg),
        },
        AgentKind::ManufacturingInsight => {
            let p = manufacturing::extract(&params);
            manufacturing::generate_insight(state, &p).await?
        }
    };
    Ok(result)
}
