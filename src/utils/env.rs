//! Environment variable lookups used by configuration overrides

/// Value of `key` if set and valid unicode
pub fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

/// True for "true", "1", "yes" or "on" in any case
pub fn env_bool(key: &str) -> bool {
    env_opt(key)
        .map(|v| matches!(v.to_ascii_lowercase().as_str(), "true" | "1" | "yes" | "on"))
        .unwrap_or(false)
}

/// Value of `key` parsed as `T`; `None` when unset or unparseable
pub fn env_int<T>(key: &str) -> Option<T>
where
    T: std::str::FromStr,
{
    env_opt(key)?.trim().parse().ok()
}
