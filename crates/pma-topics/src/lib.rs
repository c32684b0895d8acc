//! Canonical event topic constants shared across the service.
//!
//! Centralizing the strings keeps publishers and any future subscribers in
//! sync. Keep this list alphabetized within sections and favor dot.case names.

// Service lifecycle
pub const TOPIC_SERVICE_HEALTH: &str = "service.health";
pub const TOPIC_SERVICE_START: &str = "service.start";
pub const TOPIC_SERVICE_STOP: &str = "service.stop";

// Telemetry
pub const TOPIC_TELEMETRY_ANOMALY: &str = "telemetry.anomaly";
pub const TOPIC_TELEMETRY_INGESTED: &str = "telemetry.ingested";

// Routing / handlers
pub const TOPIC_AGENT_COMPLETED: &str = "agent.completed";
pub const TOPIC_AGENT_FAILED: &str = "agent.failed";
pub const TOPIC_ROUTING_DECIDED: &str = "routing.decided";

// Permission gate & audit trail
pub const TOPIC_AUDIT_LOGGED: &str = "audit.logged";
pub const TOPIC_POLICY_BLOCKED: &str = "policy.blocked";

// Scheduling
pub const TOPIC_BOOKING_CREATED: &str = "booking.created";
