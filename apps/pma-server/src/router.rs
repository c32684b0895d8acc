use std::mem;

use axum::{
    handler::Handler,
    routing::{get, post},
    Router,
};

use crate::{api, AppState};

pub(crate) struct RouterBuilder {
    router: Router<AppState>,
    endpoints: Vec<String>,
}

impl RouterBuilder {
    pub fn new() -> Self {
        Self {
            router: Router::new(),
            endpoints: Vec::new(),
        }
    }

    fn record(&mut self, method: &str, path: &'static str) {
        self.endpoints.push(format!("{} {}", method, path));
    }

    pub fn route_get<H, T>(&mut self, path: &'static str, handler: H) -> &mut Self
    where
        H: Handler<T, AppState> + Clone + 'static,
        T: Send + 'static,
    {
        self.record("GET", path);
        let router = mem::take(&mut self.router);
        self.router = router.route(path, get(handler));
        self
    }

    pub fn route_post<H, T>(&mut self, path: &'static str, handler: H) -> &mut Self
    where
        H: Handler<T, AppState> + Clone + 'static,
        T: Send + 'static,
    {
        self.record("POST", path);
        let router = mem::take(&mut self.router);
        self.router = router.route(path, post(handler));
        self
    }

    pub fn build(self) -> (Router<AppState>, Vec<String>) {
        (self.router, self.endpoints)
    }
}

pub(crate) mod paths {
    pub const ROOT: &str = "/";
    pub const HEALTH: &str = "/health";
    pub const ABOUT: &str = "/about";
    pub const TELEMETRY: &str = "/telemetry";
    pub const AGENT_CHAT: &str = "/agent/chat";
    pub const STATE_AUDIT: &str = "/state/audit";
    pub const STATE_BOOKINGS: &str = "/state/bookings";
    pub const STATE_TELEMETRY: &str = "/state/telemetry/{vehicle}";
}

pub(crate) fn build_router() -> (Router<AppState>, Vec<String>) {
    let mut builder = RouterBuilder::new();
    builder.route_get(paths::ROOT, api::meta::root);
    builder.route_get(paths::HEALTH, api::meta::health);
    builder.route_get(paths::ABOUT, api::meta::about);
    builder.route_post(paths::TELEMETRY, api::telemetry::ingest_telemetry);
    builder.route_post(paths::AGENT_CHAT, api::chat::chat);
    builder.route_get(paths::STATE_AUDIT, api::state::state_audit);
    builder.route_get(paths::STATE_BOOKINGS, api::state::state_bookings);
    builder.route_get(paths::STATE_TELEMETRY, api::state::state_telemetry);
    builder.build()
}
