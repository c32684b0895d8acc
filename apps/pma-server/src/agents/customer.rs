use serde_json::{json, Map, Value};
use tracing::warn;

use pma_protocol::CustomerReply;

use super::Params;
use crate::AppState;

#[derive(Debug)]
pub(crate) struct CustomerParams {
    pub query: String,
    pub user_id: i64,
}

pub(crate) fn extract(params: &Params<'_>) -> Result<CustomerParams, String> {
    let query = params
        .str_value("query")
        .ok_or_else(|| "Query required.".to_string())?;
    let user_id = params
        .i64_value("user_id")
        .ok_or_else(|| "User ID required.".to_string())?;
    Ok(CustomerParams { query, user_id })
}

/// General customer conversation: resolve a display name, one completion,
/// apologetic canned reply when the model is unavailable.
pub(crate) async fn handle_query(
    state: &AppState,
    params: &CustomerParams,
    context: &Map<String, Value>,
) -> anyhow::Result<Value> {
    let user_name = state
        .kernel()
        .get_user_async(params.user_id)
        .await?
        .map(|u| u.full_name)
        .unwrap_or_else(|| "Customer".to_string());
    let context_json = serde_json::to_string(context).unwrap_or_else(|_| "{}".to_string());
    let prompt = format!(
        "You are a helpful Customer Service Agent for a vehicle maintenance platform.\n\
         User Name: {}\n\
         User Query: {}\n\
         Context: {}\n\n\
         Task:\n\
         Provide a friendly, helpful, and concise response to the user.\n\
         If the user asks about their vehicle status, use the context provided.\n\
         If the user asks for a booking, guide them to use the booking feature (or say you can help schedule it).\n\n\
         Output a JSON object with:\n\
         - \"response\": The text response to show to the user.\n\
         - \"suggested_actions\": List of buttons/actions (e.g., [\"Book Service\", \"View Vehicle Health\"]).",
        user_name,
        crate::llm::quote(&params.query),
        context_json
    );
    let reply = match state.llm().complete_json::<CustomerReply>(&prompt).await {
        Ok(reply) => reply,
        Err(err) => {
            warn!(user = params.user_id, error = %err, "customer reply completion failed");
            CustomerReply::fallback()
        }
    };
    Ok(serde_json::to_value(reply).unwrap_or_else(|_| json!({})))
}
