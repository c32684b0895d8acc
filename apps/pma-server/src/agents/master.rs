use serde_json::{json, Map, Value};
use tracing::{info, warn};

use pma_kernel::ChatTurn;
use pma_protocol::RoutingDecision;

use super::{directory, dispatch, error_result, AgentKind};
use crate::{audit, AppState};

const HISTORY_LIMIT: i64 = 10;

/// Single-shot routing state machine: classify the request, resolve the
/// handler through the closed enumeration, consult the gate, dispatch, wrap.
/// Classification failure returns `{error}` without dispatching; an
/// unrecognized handler name is terminal with no side effects.
pub(crate) async fn process_request(
    state: &AppState,
    query: &str,
    context: &Map<String, Value>,
    session_id: Option<&str>,
) -> anyhow::Result<Value> {
    let history = match session_id {
        Some(sid) => {
            state
                .kernel()
                .recent_chat_messages_async(sid, HISTORY_LIMIT)
                .await?
        }
        None => Vec::new(),
    };

    let decision = match classify(state, query, context, &history).await {
        Ok(decision) => decision,
        Err(err) => {
            warn!(error = %err, "routing classification failed");
            return Ok(json!({"error": err.to_string()}));
        }
    };
    info!(target = %decision.target_agent, reasoning = %decision.reasoning, "routing request");
    state.bus().publish(
        pma_topics::TOPIC_ROUTING_DECIDED,
        &json!({
            "target_agent": decision.target_agent,
            "reasoning": decision.reasoning,
        }),
    );

    let agent_result = match AgentKind::from_name(&decision.target_agent) {
        Some(kind) => {
            let allowed = audit::monitor_and_log(
                state,
                kind.as_str(),
                "dispatch",
                kind.primary_resource(),
                &Value::Object(decision.parameters.clone()),
            )
            .await;
            if !allowed && crate::util::env_truthy("PMA_POLICY_ENFORCE") {
                error_result(format!(
                    "Access denied by policy for agent: {}",
                    kind.as_str()
                ))
            } else {
                dispatch(state, kind, &decision.parameters, context).await?
            }
        }
        None => error_result(format!("Unknown agent: {}", decision.target_agent)),
    };

    if let Some(kind) = AgentKind::from_name(&decision.target_agent) {
        let topic = if agent_result.get("status").and_then(|s| s.as_str()) == Some("error") {
            pma_topics::TOPIC_AGENT_FAILED
        } else {
            pma_topics::TOPIC_AGENT_COMPLETED
        };
        state
            .bus()
            .publish(topic, &json!({"agent": kind.as_str()}));
    }

    if let Some(sid) = session_id {
        record_turns(state, sid, query, &agent_result).await;
    }

    Ok(json!({
        "master_decision": decision,
        "agent_result": agent_result,
    }))
}

async fn classify(
    state: &AppState,
    query: &str,
    context: &Map<String, Value>,
    history: &[ChatTurn],
) -> Result<RoutingDecision, crate::llm::LlmError> {
    let directory_json =
        serde_json::to_string_pretty(&directory()).unwrap_or_else(|_| "{}".to_string());
    let context_json = serde_json::to_string(context).unwrap_or_else(|_| "{}".to_string());
    let mut history_block = String::new();
    if !history.is_empty() {
        history_block.push_str("\nRecent Conversation:\n");
        for turn in history {
            history_block.push_str(&format!(
                "{}: {}\n",
                turn.role,
                crate::llm::quote(&turn.content)
            ));
        }
    }
    let prompt = format!(
        "You are the Master Agent of a predictive maintenance platform.\n\
         Your goal is to route the following user request to the most appropriate specialized agent.\n\n\
         User Request: {}\n\
         Context: {}\n\
         {}\n\
         Available Agents:\n\
         {}\n\n\
         Return a JSON object with:\n\
         - \"target_agent\": The key of the agent to handle this request.\n\
         - \"reasoning\": Why you chose this agent.\n\
         - \"parameters\": Any relevant parameters extracted from the request to pass to the agent.\n\n\
         If the request is general or unclear, default to \"customer_engagement\".",
        crate::llm::quote(query),
        context_json,
        history_block,
        directory_json
    );
    state.llm().complete_json::<RoutingDecision>(&prompt).await
}

/// Best-effort history append; a storage failure here never fails the reply.
async fn record_turns(state: &AppState, session_id: &str, query: &str, result: &Value) {
    if let Err(err) = state
        .kernel()
        .append_chat_message_async(session_id, "user", query)
        .await
    {
        warn!(session = session_id, error = %err, "chat history append failed");
    }
    if let Err(err) = state
        .kernel()
        .append_chat_message_async(session_id, "assistant", &result.to_string())
        .await
    {
        warn!(session = session_id, error = %err, "chat history append failed");
    }
}
