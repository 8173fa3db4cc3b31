//! Environment variable utilities
//!
//! Every `STICKYD_*` override is read through these helpers, and only from
//! the `from_env()` constructors of the config types. Nothing below the
//! config layer consults the environment.
//!
//! # Usage
//!
//! ```ignore
//! use stickyd_core::env::{env_get, env_get_bool};
//!
//! let port: u16 = env_get("STICKYD_PORT", 8080);
//! let pooled = env_get_bool("STICKYD_POOLED_BUFFERS", true);
//! ```

use std::str::FromStr;
use std::time::Duration;

/// Get environment variable parsed as type T, or return default
///
/// Unset variables and values that fail to parse both yield the default.
#[inline]
pub fn env_get<T>(key: &str, default: T) -> T
where
    T: FromStr,
{
    env_get_opt(key).unwrap_or(default)
}

/// Get environment variable as boolean
///
/// Accepts "1", "true", "yes", "on" as true and "0", "false", "no", "off"
/// as false (case-insensitive). Anything else returns the default.
#[inline]
pub fn env_get_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(val) => match val.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            _ => default,
        },
        Err(_) => default,
    }
}

/// Get environment variable as optional value
#[inline]
pub fn env_get_opt<T>(key: &str) -> Option<T>
where
    T: FromStr,
{
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

/// Get a millisecond count as a `Duration`
///
/// `0` maps to `None`, which callers use for "disabled".
pub fn env_get_millis(key: &str, default: Option<Duration>) -> Option<Duration> {
    match env_get_opt::<u64>(key) {
        Some(0) => None,
        Some(ms) => Some(Duration::from_millis(ms)),
        None => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_get_default() {
        let val: usize = env_get("__STICKYD_TEST_UNSET_1__", 42);
        assert_eq!(val, 42);
    }

    #[test]
    fn test_env_get_parses() {
        std::env::set_var("__STICKYD_TEST_PORT__", " 9090 ");
        let val: u16 = env_get("__STICKYD_TEST_PORT__", 8080);
        assert_eq!(val, 9090);

        std::env::set_var("__STICKYD_TEST_PORT__", "not-a-port");
        let val: u16 = env_get("__STICKYD_TEST_PORT__", 8080);
        assert_eq!(val, 8080);
        std::env::remove_var("__STICKYD_TEST_PORT__");
    }

    #[test]
    fn test_env_get_bool() {
        assert!(env_get_bool("__STICKYD_TEST_UNSET_2__", true));

        std::env::set_var("__STICKYD_TEST_BOOL__", "off");
        assert!(!env_get_bool("__STICKYD_TEST_BOOL__", true));
        std::env::set_var("__STICKYD_TEST_BOOL__", "YES");
        assert!(env_get_bool("__STICKYD_TEST_BOOL__", false));
        std::env::set_var("__STICKYD_TEST_BOOL__", "maybe");
        assert!(env_get_bool("__STICKYD_TEST_BOOL__", true));
        std::env::remove_var("__STICKYD_TEST_BOOL__");
    }

    #[test]
    fn test_env_get_millis() {
        let d = Some(Duration::from_millis(5));
        assert_eq!(env_get_millis("__STICKYD_TEST_UNSET_3__", d), d);

        std::env::set_var("__STICKYD_TEST_MS__", "0");
        assert_eq!(env_get_millis("__STICKYD_TEST_MS__", d), None);
        std::env::set_var("__STICKYD_TEST_MS__", "250");
        assert_eq!(
            env_get_millis("__STICKYD_TEST_MS__", None),
            Some(Duration::from_millis(250))
        );
        std::env::remove_var("__STICKYD_TEST_MS__");
    }
}
