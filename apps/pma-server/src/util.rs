use once_cell::sync::{Lazy, OnceCell};
use std::path::PathBuf;
use std::sync::Mutex;

static STATE_DIR: Lazy<Mutex<OnceCell<PathBuf>>> = Lazy::new(|| Mutex::new(OnceCell::new()));

/// Resolve the state directory (SQLite database and friends). Cached after the
/// first call; `PMA_STATE_DIR` wins, else `./state` relative to the cwd.
pub fn state_dir() -> PathBuf {
    let cell = STATE_DIR.lock().expect("state dir cache lock");
    if let Some(existing) = cell.get() {
        return existing.clone();
    }
    let resolved = env_nonempty("PMA_STATE_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("state"));
    // Value cannot be set by another thread while we hold the lock, but ignore the
    // Result to avoid double-panicking should it ever happen.
    let _ = cell.set(resolved.clone());
    resolved
}

#[cfg(test)]
pub(crate) fn reset_state_dir_for_tests() {
    let mut cell = STATE_DIR.lock().expect("state dir cache lock");
    cell.take();
}

pub fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub fn env_truthy(key: &str) -> bool {
    std::env::var(key)
        .map(|v| {
            let t = v.trim().to_ascii_lowercase();
            matches!(t.as_str(), "1" | "true" | "yes" | "on")
        })
        .unwrap_or(false)
}

pub fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}
