use serde_json::{json, Map, Value};
use tracing::warn;

use pma_protocol::InsightReport;

use super::Params;
use crate::AppState;

pub(crate) struct InsightParams {
    pub model_name: Option<String>,
}

pub(crate) fn extract(params: &Params<'_>) -> InsightParams {
    InsightParams {
        model_name: params.str_value("model_name"),
    }
}

/// Defect-count aggregation for the OEM side. An empty aggregate short-circuits
/// before any completion is issued.
pub(crate) async fn generate_insight(
    state: &AppState,
    params: &InsightParams,
) -> anyhow::Result<Value> {
    let counts = state
        .kernel()
        .defect_counts_by_component_async(params.model_name.as_deref())
        .await?;
    if counts.is_empty() {
        return Ok(json!({"status": "no_data", "message": "No defect data available for analysis."}));
    }

    let mut stats = Map::new();
    for (component, n) in &counts {
        stats.insert(component.clone(), json!(n));
    }
    let stats_json = Value::Object(stats).to_string();
    let scope = params
        .model_name
        .as_deref()
        .map(|m| crate::llm::quote(m))
        .unwrap_or_else(|| "All Models".to_string());
    let prompt = format!(
        "You are a Manufacturing Insight Agent.\n\
         Analyze the following defect statistics for vehicle model: {}.\n\n\
         Defect Stats: {}\n\n\
         Task:\n\
         1. Identify the most problematic components.\n\
         2. Hypothesize potential manufacturing or design flaws.\n\
         3. Recommend quality control improvements.\n\n\
         Output a JSON object with:\n\
         - \"top_defects\": list of strings\n\
         - \"root_cause_hypothesis\": string\n\
         - \"recommendations\": list of strings",
        scope, stats_json
    );
    let insight = match state.llm().complete_json::<InsightReport>(&prompt).await {
        Ok(insight) => insight,
        Err(err) => {
            warn!(model = ?params.model_name, error = %err, "manufacturing insight completion failed");
            InsightReport::fallback()
        }
    };
    Ok(serde_json::to_value(insight).unwrap_or_else(|_| json!({})))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{self, completion_reply};
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn seed_defect(kernel: &pma_kernel::Kernel, model: &str, component: &str) {
        kernel
            .insert_defect(model, component, Some("wear"), None, "high", "open")
            .unwrap();
    }

    #[tokio::test]
    async fn empty_aggregate_issues_no_completion() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion_reply("{}")))
            .expect(0)
            .mount(&server)
            .await;
        let ctx = test_support::test_state_with_llm(&server.uri()).await;
        let out = generate_insight(&ctx.state, &InsightParams { model_name: None })
            .await
            .unwrap();
        assert_eq!(out["status"], "no_data");
        assert_eq!(out["message"], "No defect data available for analysis.");
    }

    #[tokio::test]
    async fn aggregate_binds_counts_and_passes_insight_through() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(body_string_contains("Brake Disc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion_reply(
                "{\"top_defects\":[\"Brake Disc\"],\"root_cause_hypothesis\":\"Supplier batch variance\",\
                 \"recommendations\":[\"Audit supplier QC\"]}",
            )))
            .mount(&server)
            .await;
        let ctx = test_support::test_state_with_llm(&server.uri()).await;
        let kernel = ctx.state.kernel();
        seed_defect(kernel, "Nexon", "Brake Disc");
        seed_defect(kernel, "Nexon", "Brake Disc");
        seed_defect(kernel, "Nexon", "Battery");
        let out = generate_insight(
            &ctx.state,
            &InsightParams {
                model_name: Some("Nexon".into()),
            },
        )
        .await
        .unwrap();
        assert_eq!(out["top_defects"][0], "Brake Disc");
        assert_eq!(out["root_cause_hypothesis"], "Supplier batch variance");
    }

    #[tokio::test]
    async fn filtered_model_with_no_defects_reports_no_data() {
        let ctx = test_support::test_state().await;
        seed_defect(ctx.state.kernel(), "Nexon", "Brake Disc");
        let out = generate_insight(
            &ctx.state,
            &InsightParams {
                model_name: Some("Harrier".into()),
            },
        )
        .await
        .unwrap();
        assert_eq!(out["status"], "no_data");
    }
}
