use serde_json::{json, Value};
use tracing::warn;

use pma_protocol::DiagnosisReport;

use super::Params;
use crate::AppState;

pub(crate) struct DiagnosisParams {
    pub anomalies: Vec<String>,
    pub vehicle_model: String,
}

/// Anomalies default to the previous analysis carried in the context
/// (`last_analysis.anomalies`); the model name defaults to `"Unknown"`.
pub(crate) fn extract(params: &Params<'_>) -> DiagnosisParams {
    let mut anomalies = params
        .value("anomalies")
        .map(collect_strings)
        .unwrap_or_default();
    if anomalies.is_empty() {
        if let Some(previous) = params
            .context_value("last_analysis")
            .and_then(|v| v.get("anomalies"))
        {
            anomalies = collect_strings(previous);
        }
    }
    let vehicle_model = params
        .str_value("vehicle_model")
        .unwrap_or_else(|| "Unknown".to_string());
    DiagnosisParams {
        anomalies,
        vehicle_model,
    }
}

fn collect_strings(value: &Value) -> Vec<String> {
    value
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str())
                .map(|s| s.to_string())
                .collect()
        })
        .unwrap_or_default()
}

/// One completion mapping anomalies to a root cause, fault code, severity and
/// driver guidance. Any completion failure degrades to the fixed report.
pub(crate) async fn diagnose_issue(state: &AppState, params: &DiagnosisParams) -> Value {
    let anomalies_json =
        serde_json::to_string(&params.anomalies).unwrap_or_else(|_| "[]".to_string());
    let prompt = format!(
        "You are a Diagnosis Agent for a vehicle maintenance system.\n\n\
         Vehicle Model: {}\n\
         Reported Anomalies: {}\n\n\
         Task:\n\
         1. Identify the most likely root cause.\n\
         2. Assign a standard OBD-II fault code (or a plausible custom code).\n\
         3. Estimate the severity (Low, Medium, High, Critical).\n\
         4. Recommend immediate actions for the driver.\n\
         5. Recommend parts that might need replacement.\n\n\
         Output a JSON object with keys:\n\
         - \"root_cause\": string\n\
         - \"fault_code\": string\n\
         - \"severity\": string\n\
         - \"action_for_driver\": string\n\
         - \"recommended_parts\": list of strings",
        crate::llm::quote(&params.vehicle_model),
        anomalies_json
    );
    let report = match state.llm().complete_json::<DiagnosisReport>(&prompt).await {
        Ok(report) => report,
        Err(err) => {
            warn!(model = %params.vehicle_model, error = %err, "diagnosis completion failed");
            DiagnosisReport::fallback()
        }
    };
    serde_json::to_value(report).unwrap_or_else(|_| json!({}))
}
