use once_cell::sync::Lazy;
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};

use pma_events::Bus;
use pma_kernel::Kernel;
use pma_policy::{Gate, GateConfig};
use pma_protocol::TelemetryIngest;

use crate::{app_state::AppState, llm::CompletionClient};

static ENV_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

pub(crate) mod env {
    use super::*;

    pub(crate) struct EnvGuard {
        _lock: MutexGuard<'static, ()>,
        saved: HashMap<String, Option<String>>,
    }

    pub(crate) fn guard() -> EnvGuard {
        EnvGuard {
            _lock: ENV_LOCK.lock().expect("env lock poisoned"),
            saved: HashMap::new(),
        }
    }

    impl EnvGuard {
        fn remember(&mut self, key: &str) {
            self.saved
                .entry(key.to_string())
                .or_insert_with(|| std::env::var(key).ok());
        }

        pub(crate) fn set(&mut self, key: &str, value: impl AsRef<str>) {
            self.remember(key);
            std::env::set_var(key, value.as_ref());
        }

        pub(crate) fn remove(&mut self, key: &str) {
            self.remember(key);
            std::env::remove_var(key);
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (key, value) in self.saved.drain() {
                match value {
                    Some(val) => std::env::set_var(&key, val),
                    None => std::env::remove_var(&key),
                }
            }
        }
    }
}

pub(crate) struct TestContext {
    pub state: AppState,
    _tmp: tempfile::TempDir,
}

/// State over a throwaway kernel, default gate, unconfigured completion client.
pub(crate) async fn test_state() -> TestContext {
    test_state_with(
        Gate::with_config(GateConfig::default()),
        CompletionClient::unconfigured(),
    )
    .await
}

/// Same, but with the completion client pointed at a stub server.
pub(crate) async fn test_state_with_llm(base_url: &str) -> TestContext {
    test_state_with(
        Gate::with_config(GateConfig::default()),
        CompletionClient::with_base_url(base_url),
    )
    .await
}

pub(crate) async fn test_state_with(gate: Gate, llm: CompletionClient) -> TestContext {
    let tmp = tempfile::tempdir().expect("tempdir");
    let kernel = Kernel::open(tmp.path()).expect("open kernel");
    let state = AppState::new(Bus::new(64), kernel, Arc::new(gate), llm, Arc::new(Vec::new()));
    TestContext { state, _tmp: tmp }
}

/// Chat-completions body a stub server answers with.
pub(crate) fn completion_reply(content: &str) -> serde_json::Value {
    serde_json::json!({"choices": [{"message": {"role": "assistant", "content": content}}]})
}

/// In-range telemetry payload; tests push individual channels over threshold.
pub(crate) fn sample_telemetry(vehicle_id: &str) -> TelemetryIngest {
    TelemetryIngest {
        vehicle_id: vehicle_id.to_string(),
        timestamp: None,
        speed: 52.0,
        rpm: 2100.0,
        engine_temp: 90.0,
        battery_level: 76.0,
        brake_wear: 22.0,
        tire_pressure_fl: 33.0,
        tire_pressure_fr: 33.5,
        tire_pressure_rl: 34.0,
        tire_pressure_rr: 33.8,
        latitude: 18.5204,
        longitude: 73.8567,
    }
}
