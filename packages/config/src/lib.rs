// ABOUTME: Configuration and environment variable management for Sandstack
// ABOUTME: Centralizes env var names and typed, range-checked overrides for tuning knobs

pub mod constants;

use std::str::FromStr;

use tracing::warn;

/// Read a tuning value from the environment with a range check and a default.
///
/// Values that fail to parse or fall outside `min..=max` are rejected with a
/// warning so a typo in deployment config cannot silently disable a deadline.
pub fn env_override<T>(name: &str, min: T, max: T, default: T) -> T
where
    T: FromStr + PartialOrd + Copy + std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => match raw.parse::<T>() {
            Ok(value) if value >= min && value <= max => value,
            Ok(value) => {
                warn!(
                    "{} = {} is outside the accepted range {}..={}, using default {}",
                    name, value, min, max, default
                );
                default
            }
            Err(_) => {
                warn!("{} = {:?} is not a valid value, using default {}", name, raw, default);
                default
            }
        },
        Err(_) => default,
    }
}
