use serde_json::{json, Value};
use tracing::warn;

use crate::AppState;

/// Consult the permission gate and append one audit row for the attempt.
/// Returns the gate verdict. A storage failure is logged and swallowed so the
/// handler's main response is never blocked on the audit trail; the bus event
/// still fires either way.
pub(crate) async fn monitor_and_log(
    state: &AppState,
    agent: &str,
    action: &str,
    resource: &str,
    parameters: &Value,
) -> bool {
    let decision = state.gate().evaluate(agent, action, resource);
    if let Err(err) = state
        .kernel()
        .append_audit_async(
            agent,
            action,
            resource,
            parameters,
            &decision.result,
            &decision.risk_level,
            decision.reason.as_deref(),
        )
        .await
    {
        warn!(agent, resource, error = %err, "audit append failed");
    }
    state.bus().publish(
        pma_topics::TOPIC_AUDIT_LOGGED,
        &json!({
            "agent": agent,
            "action": action,
            "resource": resource,
            "result": decision.result,
            "risk_level": decision.risk_level,
        }),
    );
    if !decision.allow {
        warn!(agent, resource, "permission gate denied access");
        state.bus().publish(
            pma_topics::TOPIC_POLICY_BLOCKED,
            &json!({
                "agent": agent,
                "action": action,
                "resource": resource,
            }),
        );
    }
    decision.allow
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;

    #[tokio::test]
    async fn every_consultation_appends_one_row() {
        let ctx = test_support::test_state().await;
        assert!(monitor_and_log(&ctx.state, "diagnosis", "dispatch", "read_cleaned_data", &json!({})).await);
        assert!(!monitor_and_log(&ctx.state, "diagnosis", "dispatch", "write_appointment", &json!({})).await);
        let rows = ctx.state.kernel().list_audit(10).unwrap();
        assert_eq!(rows.len(), 2);
        // newest first
        assert_eq!(rows[0]["result"], "BLOCKED");
        assert_eq!(rows[0]["risk_level"], "HIGH");
        assert_eq!(
            rows[0]["reason"],
            "No grant covering 'write_appointment' for action 'dispatch'"
        );
        assert_eq!(rows[1]["result"], "ALLOWED");
        assert_eq!(rows[1]["risk_level"], "LOW");
        assert!(rows[1]["reason"].is_null());
    }

    #[tokio::test]
    async fn denial_publishes_policy_event() {
        let ctx = test_support::test_state().await;
        let mut rx = ctx.state.bus().subscribe();
        let allowed =
            monitor_and_log(&ctx.state, "feedback", "dispatch", "read_telemetry", &json!({})).await;
        assert!(!allowed);
        let mut kinds = Vec::new();
        while let Ok(env) = rx.try_recv() {
            kinds.push(env.kind);
        }
        assert!(kinds.contains(&pma_topics::TOPIC_AUDIT_LOGGED.to_string()));
        assert!(kinds.contains(&pma_topics::TOPIC_POLICY_BLOCKED.to_string()));
    }
}
