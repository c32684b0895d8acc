use serde_json::{json, Value};
use tracing::warn;

use pma_heuristics::Snapshot;
use pma_protocol::HealthAssessment;

use super::Params;
use crate::AppState;

#[derive(Debug)]
pub(crate) struct AnalysisParams {
    pub vehicle_id: String,
}

pub(crate) fn extract(params: &Params<'_>) -> Result<AnalysisParams, String> {
    params
        .str_value("vehicle_id")
        .map(|vehicle_id| AnalysisParams { vehicle_id })
        .ok_or_else(|| "Vehicle ID required for analysis.".to_string())
}

/// Latest-snapshot health check: threshold rules first, then one completion
/// for a severity assessment only when something fired.
pub(crate) async fn analyze_vehicle_health(
    state: &AppState,
    params: &AnalysisParams,
) -> anyhow::Result<Value> {
    let row = match state
        .kernel()
        .latest_telemetry_for_async(&params.vehicle_id)
        .await?
    {
        Some(row) => row,
        None => return Ok(json!({"status": "unknown", "message": "No telemetry data found."})),
    };

    let snapshot = Snapshot {
        engine_temp: row.engine_temp,
        battery_level: row.battery_level,
        brake_wear: row.brake_wear,
        tire_pressure_fl: row.tire_pressure_fl,
        tire_pressure_fr: row.tire_pressure_fr,
    };
    let anomalies = pma_heuristics::evaluate(&snapshot);

    let (severity, insight) = if anomalies.is_empty() {
        ("low".to_string(), "No complex analysis required.".to_string())
    } else {
        let anomalies_json =
            serde_json::to_string(&anomalies).unwrap_or_else(|_| "[]".to_string());
        let prompt = format!(
            "You are a Data Analysis Agent for a vehicle maintenance system.\n\
             Analyze the following telemetry snapshot and the detected anomalies.\n\
             Provide a brief technical assessment of the vehicle's condition.\n\n\
             Telemetry:\n\
             - Speed: {} km/h\n\
             - RPM: {}\n\
             - Engine Temp: {} C\n\
             - Battery: {} %\n\
             - Brake Wear: {} %\n\n\
             Detected Anomalies: {}\n\n\
             Output a JSON object with:\n\
             - \"severity\": \"low\", \"medium\", or \"high\"\n\
             - \"assessment\": A one-sentence technical summary.",
            row.speed, row.rpm, row.engine_temp, row.battery_level, row.brake_wear, anomalies_json
        );
        match state.llm().complete_json::<HealthAssessment>(&prompt).await {
            Ok(assessment) => (assessment.severity, assessment.assessment),
            Err(err) => {
                warn!(vehicle = %params.vehicle_id, error = %err, "health assessment completion failed");
                ("medium".to_string(), "LLM analysis unavailable.".to_string())
            }
        }
    };

    let status = match severity.as_str() {
        "high" => "critical",
        "medium" => "warning",
        _ => "healthy",
    };
    Ok(json!({
        "vehicle_id": params.vehicle_id,
        "timestamp": row.timestamp,
        "status": status,
        "anomalies": anomalies,
        "ai_assessment": insight,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{self, completion_reply, sample_telemetry};
    use serde_json::Map;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn extraction_requires_a_vehicle() {
        let empty = Map::new();
        let params = Params::new(&empty, &empty);
        let err = extract(&params).unwrap_err();
        assert_eq!(err, "Vehicle ID required for analysis.");
    }

    #[tokio::test]
    async fn unknown_vehicle_reports_no_data() {
        let ctx = test_support::test_state().await;
        let p = AnalysisParams {
            vehicle_id: "VH-MISSING".into(),
        };
        let out = analyze_vehicle_health(&ctx.state, &p).await.unwrap();
        assert_eq!(out["status"], "unknown");
        assert_eq!(out["message"], "No telemetry data found.");
    }

    #[tokio::test]
    async fn healthy_snapshot_skips_the_model() {
        let ctx = test_support::test_state().await;
        ctx.state
            .kernel()
            .insert_telemetry(&sample_telemetry("VH-1001"))
            .unwrap();
        let p = AnalysisParams {
            vehicle_id: "VH-1001".into(),
        };
        let out = analyze_vehicle_health(&ctx.state, &p).await.unwrap();
        assert_eq!(out["status"], "healthy");
        assert_eq!(out["ai_assessment"], "No complex analysis required.");
        assert_eq!(out["anomalies"].as_array().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn anomalies_with_unavailable_model_degrade_to_warning() {
        let ctx = test_support::test_state().await;
        let mut t = sample_telemetry("VH-1002");
        t.engine_temp = 110.0;
        t.battery_level = 15.0;
        ctx.state.kernel().insert_telemetry(&t).unwrap();
        let p = AnalysisParams {
            vehicle_id: "VH-1002".into(),
        };
        let out = analyze_vehicle_health(&ctx.state, &p).await.unwrap();
        assert_eq!(out["status"], "warning");
        assert_eq!(out["ai_assessment"], "LLM analysis unavailable.");
        let anomalies = out["anomalies"].as_array().unwrap();
        assert_eq!(anomalies.len(), 2);
        assert_eq!(anomalies[0], "High Engine Temperature: 110°C");
        assert_eq!(anomalies[1], "Low Battery Level: 15%");
    }

    #[tokio::test]
    async fn high_severity_assessment_is_critical() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion_reply(
                "{\"severity\":\"high\",\"assessment\":\"Cooling system is failing.\"}",
            )))
            .mount(&server)
            .await;
        let ctx = test_support::test_state_with_llm(&server.uri()).await;
        let mut t = sample_telemetry("VH-1003");
        t.engine_temp = 120.0;
        ctx.state.kernel().insert_telemetry(&t).unwrap();
        let p = AnalysisParams {
            vehicle_id: "VH-1003".into(),
        };
        let out = analyze_vehicle_health(&ctx.state, &p).await.unwrap();
        assert_eq!(out["status"], "critical");
        assert_eq!(out["ai_assessment"], "Cooling system is failing.");
    }
}
