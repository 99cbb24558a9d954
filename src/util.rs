use std::net::SocketAddr;

const SQLITE_PATH: &str = "MONITOR_SQLITE_PATH";

const BIND_ADDR: &str = "MONITOR_BIND_ADDR";

const API_KEY_PREFIX: &str = "MONITOR";

const API_KEY_SUFFIX: &str = "API_KEY";

/// Read an environment variable, treating blank values as unset.
pub fn env_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

pub fn sqlite_path_var() -> &'static str {
    SQLITE_PATH
}

/// API bind address override, ignored when it does not parse.
pub fn get_bind_addr() -> Option<SocketAddr> {
    env_var(BIND_ADDR).and_then(|res| res.parse().ok())
}

/// Name of the variable overriding the API key of one monitor,
/// e.g. `MONITOR_ACME_CHAT_API_KEY` for provider "acme" and service "chat".
pub fn api_key_var(provider: &str, service: &str) -> String {
    format!(
        "{API_KEY_PREFIX}_{}_{}_{API_KEY_SUFFIX}",
        env_segment(provider),
        env_segment(service)
    )
}

fn env_segment(raw: &str) -> String {
    raw.trim()
        .chars()
        .map(|c| match c {
            '-' | ' ' | '.' => '_',
            c => c.to_ascii_uppercase(),
        })
        .collect()
}
