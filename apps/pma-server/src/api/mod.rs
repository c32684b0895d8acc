pub mod chat;
pub mod meta;
pub mod state;
pub mod telemetry;
