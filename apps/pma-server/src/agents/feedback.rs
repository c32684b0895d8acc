use serde_json::{json, Value};
use tracing::{debug, warn};

use pma_protocol::FeedbackAnalysis;

use super::Params;
use crate::AppState;

#[derive(Debug)]
pub(crate) struct FeedbackParams {
    pub feedback_text: String,
    pub booking_id: Option<i64>,
}

pub(crate) fn extract(params: &Params<'_>) -> Result<FeedbackParams, String> {
    let feedback_text = params
        .str_value("feedback_text")
        .ok_or_else(|| "Feedback text required.".to_string())?;
    Ok(FeedbackParams {
        feedback_text,
        booking_id: params.i64_value("booking_id"),
    })
}

/// Sentiment and key-point extraction from post-service feedback. Writing the
/// analysis back onto the booking is a documented extension point, not built.
pub(crate) async fn analyze_feedback(state: &AppState, params: &FeedbackParams) -> Value {
    let prompt = format!(
        "Analyze the following customer feedback for a vehicle service.\n\
         Feedback: {}\n\n\
         Task:\n\
         1. Determine the sentiment (Positive, Neutral, Negative).\n\
         2. Extract key issues or praise points.\n\
         3. Suggest follow-up actions.\n\n\
         Output a JSON object with:\n\
         - \"sentiment\": string\n\
         - \"key_points\": list of strings\n\
         - \"follow_up_action\": string",
        crate::llm::quote(&params.feedback_text)
    );
    let analysis = match state.llm().complete_json::<FeedbackAnalysis>(&prompt).await {
        Ok(analysis) => analysis,
        Err(err) => {
            warn!(error = %err, "feedback analysis completion failed");
            FeedbackAnalysis::fallback()
        }
    };
    debug!(booking = ?params.booking_id, sentiment = %analysis.sentiment, "feedback analyzed");
    serde_json::to_value(analysis).unwrap_or_else(|_| json!({}))
}
