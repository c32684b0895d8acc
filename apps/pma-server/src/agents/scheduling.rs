use chrono::{DateTime, Local, NaiveDate, NaiveDateTime};
use chrono_english::{parse_date_string, Dialect};
use serde_json::{json, Value};
use tracing::{info, warn};

use pma_protocol::ScheduleExtraction;

use super::Params;
use crate::AppState;

#[derive(Debug)]
pub(crate) struct SchedulingParams {
    pub query: String,
    pub vehicle_id: String,
    pub user_id: i64,
}

pub(crate) fn extract(params: &Params<'_>) -> Result<SchedulingParams, String> {
    let query = params
        .str_value("query")
        .ok_or_else(|| "Query required for scheduling.".to_string())?;
    match (params.str_value("vehicle_id"), params.i64_value("user_id")) {
        (Some(vehicle_id), Some(user_id)) => Ok(SchedulingParams {
            query,
            vehicle_id,
            user_id,
        }),
        _ => Err("Vehicle ID and User ID required.".to_string()),
    }
}

/// Book a service slot from a free-text request. Date resolution runs in two
/// stages: completion-based extraction, then a natural-language parse of the
/// query itself. No availability check; any resolved date is accepted.
pub(crate) async fn schedule_service(
    state: &AppState,
    params: &SchedulingParams,
) -> anyhow::Result<Value> {
    let now = Local::now();
    let resolved = match llm_extraction(state, &params.query, now).await {
        Some(pair) => Some(pair),
        None => fallback_extraction(&params.query, now),
    };
    let (target, service_type) = match resolved {
        Some(pair) => pair,
        None => {
            return Ok(json!({
                "status": "error",
                "message": "Could not understand the date. Please specify a date and time."
            }))
        }
    };

    let stored_date = target.format("%Y-%m-%dT%H:%M:%S").to_string();
    let booking_id = state
        .kernel()
        .insert_booking_async(
            &params.vehicle_id,
            &stored_date,
            &service_type,
            "confirmed",
            &format!("Booked via AI Agent. Query: {}", params.query),
        )
        .await?;
    info!(
        booking_id,
        vehicle = %params.vehicle_id,
        user = params.user_id,
        %service_type,
        "service booking confirmed"
    );
    state.bus().publish(
        pma_topics::TOPIC_BOOKING_CREATED,
        &json!({
            "booking_id": booking_id,
            "vehicle_id": params.vehicle_id,
            "date": stored_date,
            "service_type": service_type,
        }),
    );
    Ok(json!({
        "status": "confirmed",
        "booking_id": booking_id,
        "date": target.format("%Y-%m-%d %H:%M").to_string(),
        "service_type": service_type,
        "message": format!(
            "Appointment confirmed for {}.",
            target.format("%A, %B %d at %I:%M %p")
        ),
    }))
}

/// Stage one: ask the model for `{target_date, service_type}`. A failure or an
/// unparseable date both count as stage failure so the caller can fall back.
async fn llm_extraction(
    state: &AppState,
    query: &str,
    now: DateTime<Local>,
) -> Option<(NaiveDateTime, String)> {
    let prompt = format!(
        "Extract the desired date and time for a service appointment from the following query.\n\
         Query: {}\n\
         Current Time: {}\n\n\
         Output a JSON object with:\n\
         - \"target_date\": ISO 8601 string (YYYY-MM-DDTHH:MM:SS)\n\
         - \"service_type\": \"maintenance\", \"repair\", or \"inspection\"",
        crate::llm::quote(query),
        now.format("%Y-%m-%dT%H:%M:%S"),
    );
    match state
        .llm()
        .complete_json::<ScheduleExtraction>(&prompt)
        .await
    {
        Ok(extraction) => {
            let target = extraction.target_date.as_deref().and_then(parse_iso)?;
            let service_type = extraction
                .service_type
                .unwrap_or_else(|| "maintenance".to_string());
            Some((target, service_type))
        }
        Err(err) => {
            warn!(error = %err, "schedule extraction completion failed");
            None
        }
    }
}

/// Stage two: direct ISO token, then a natural-language parse of the query.
/// The service type falls back to an explicit keyword, else `maintenance`.
fn fallback_extraction(query: &str, now: DateTime<Local>) -> Option<(NaiveDateTime, String)> {
    let target = query
        .split_whitespace()
        .find_map(parse_iso)
        .or_else(|| parse_natural(query, now))?;
    let service_type = service_type_keyword(query).unwrap_or("maintenance");
    Some((target, service_type.to_string()))
}

fn parse_iso(text: &str) -> Option<NaiveDateTime> {
    let t = text.trim();
    if let Ok(dt) = NaiveDateTime::parse_from_str(t, "%Y-%m-%dT%H:%M:%S") {
        return Some(dt);
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(t, "%Y-%m-%dT%H:%M") {
        return Some(dt);
    }
    if let Ok(d) = NaiveDate::parse_from_str(t, "%Y-%m-%d") {
        return d.and_hms_opt(0, 0, 0);
    }
    None
}

/// Date expressions rarely open the sentence, so retry the parse on each
/// word-suffix of the query and keep the first hit.
fn parse_natural(query: &str, now: DateTime<Local>) -> Option<NaiveDateTime> {
    let words: Vec<&str> = query.split_whitespace().collect();
    for start in 0..words.len() {
        let candidate = words[start..].join(" ");
        if let Ok(dt) = parse_date_string(&candidate, now, Dialect::Us) {
            return Some(dt.naive_local());
        }
    }
    None
}

fn service_type_keyword(query: &str) -> Option<&'static str> {
    let lower = query.to_ascii_lowercase();
    ["maintenance", "repair", "inspection"]
        .into_iter()
        .find(|t| lower.contains(t))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{self, completion_reply};
    use chrono::Duration;
    use serde_json::Map;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn maps(parameters: Value, context: Value) -> (Map<String, Value>, Map<String, Value>) {
        (
            serde_json::from_value(parameters).unwrap(),
            serde_json::from_value(context).unwrap(),
        )
    }

    #[test]
    fn extraction_checks_query_before_ids() {
        let (p, c) = maps(json!({}), json!({"vehicle_id": "VH-1", "user_id": 3}));
        let err = extract(&Params::new(&p, &c)).unwrap_err();
        assert_eq!(err, "Query required for scheduling.");

        let (p, c) = maps(json!({"query": "book tomorrow"}), json!({}));
        let err = extract(&Params::new(&p, &c)).unwrap_err();
        assert_eq!(err, "Vehicle ID and User ID required.");
    }

    #[test]
    fn iso_tokens_parse_at_several_precisions() {
        assert!(parse_iso("2026-03-05T14:30:00").is_some());
        assert!(parse_iso("2026-03-05T14:30").is_some());
        assert_eq!(
            parse_iso("2026-03-05").unwrap().format("%H:%M").to_string(),
            "00:00"
        );
        assert!(parse_iso("next week").is_none());
    }

    #[tokio::test]
    async fn iso_query_round_trips_through_the_fallback_parser() {
        let ctx = test_support::test_state().await;
        let p = SchedulingParams {
            query: "Inspection 2026-03-05T14:30:00".into(),
            vehicle_id: "VH-2001".into(),
            user_id: 11,
        };
        let out = schedule_service(&ctx.state, &p).await.unwrap();
        assert_eq!(out["status"], "confirmed");
        assert_eq!(out["date"], "2026-03-05 14:30");
        assert_eq!(out["service_type"], "inspection");
        assert_eq!(
            out["message"],
            "Appointment confirmed for Thursday, March 05 at 02:30 PM."
        );
        let bookings = ctx.state.kernel().list_bookings(5).unwrap();
        assert_eq!(bookings.len(), 1);
        assert_eq!(bookings[0]["booking_date"], "2026-03-05T14:30:00");
        assert_eq!(bookings[0]["service_type"], "inspection");
        assert_eq!(bookings[0]["status"], "confirmed");
        assert_eq!(
            bookings[0]["notes"],
            "Booked via AI Agent. Query: Inspection 2026-03-05T14:30:00"
        );
    }

    #[tokio::test]
    async fn undated_query_asks_for_clarification() {
        let ctx = test_support::test_state().await;
        let p = SchedulingParams {
            query: "please help".into(),
            vehicle_id: "VH-2002".into(),
            user_id: 11,
        };
        let out = schedule_service(&ctx.state, &p).await.unwrap();
        assert_eq!(out["status"], "error");
        assert_eq!(
            out["message"],
            "Could not understand the date. Please specify a date and time."
        );
        assert!(ctx.state.kernel().list_bookings(5).unwrap().is_empty());
    }

    #[tokio::test]
    async fn malformed_model_date_falls_back_to_the_query() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion_reply(
                "{\"target_date\":\"soon\",\"service_type\":\"repair\"}",
            )))
            .mount(&server)
            .await;
        let ctx = test_support::test_state_with_llm(&server.uri()).await;
        let p = SchedulingParams {
            query: "tomorrow".into(),
            vehicle_id: "VH-2003".into(),
            user_id: 11,
        };
        let out = schedule_service(&ctx.state, &p).await.unwrap();
        assert_eq!(out["status"], "confirmed");
        // keyword fallback, not the discarded extraction
        assert_eq!(out["service_type"], "maintenance");
        let expected = (Local::now().date_naive() + Duration::days(1))
            .format("%Y-%m-%d")
            .to_string();
        assert!(out["date"].as_str().unwrap().starts_with(&expected));
    }

    #[tokio::test]
    async fn extracted_date_books_and_announces() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion_reply(
                "{\"target_date\":\"2026-04-10T09:00:00\",\"service_type\":\"repair\"}",
            )))
            .mount(&server)
            .await;
        let ctx = test_support::test_state_with_llm(&server.uri()).await;
        let mut rx = ctx.state.bus().subscribe();
        let p = SchedulingParams {
            query: "fix the brakes next month".into(),
            vehicle_id: "VH-2004".into(),
            user_id: 11,
        };
        let out = schedule_service(&ctx.state, &p).await.unwrap();
        assert_eq!(out["status"], "confirmed");
        assert_eq!(out["service_type"], "repair");
        assert_eq!(out["date"], "2026-04-10 09:00");
        let env = rx.try_recv().unwrap();
        assert_eq!(env.kind, pma_topics::TOPIC_BOOKING_CREATED);
        assert_eq!(env.payload["vehicle_id"], "VH-2004");
    }
}
