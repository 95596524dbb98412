//! Utility functions for cloud-maker

pub mod shell;

use std::env;

pub use shell::quote;

/// Check if an environment variable is set to a truthy value
/// Accepts: "1", "true", "on", "yes", "t" (case insensitive)
pub fn is_env_true(key: &str) -> bool {
    match env::var(key) {
        Ok(val) => {
            let val_lower = val.to_lowercase();
            matches!(val_lower.as_str(), "1" | "true" | "on" | "yes" | "t")
        }
        Err(_) => false,
    }
}

/// Value of the first set environment variable among `keys`
pub fn first_env_var(keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| env::var(key).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_env_var_skips_unset() {
        assert_eq!(first_env_var(&["CLOUD_MAKER_TEST_SURELY_UNSET"]), None);
        assert_eq!(first_env_var(&[]), None);
    }

    #[test]
    fn test_unset_var_is_not_true() {
        assert!(!is_env_true("CLOUD_MAKER_TEST_SURELY_UNSET"));
    }
}
