// ABOUTME: Environment variable name constants
// ABOUTME: Centralized definitions of all environment variable names used across Sandstack

// Provisioning poll schedule
pub const SANDSTACK_POLL_INITIAL_SECS: &str = "SANDSTACK_POLL_INITIAL_SECS";
pub const SANDSTACK_POLL_CAP_SECS: &str = "SANDSTACK_POLL_CAP_SECS";
pub const SANDSTACK_PROVISION_TIMEOUT_SECS: &str = "SANDSTACK_PROVISION_TIMEOUT_SECS";

// Termination & sweep
pub const SANDSTACK_TERMINATING_RETRY_SECS: &str = "SANDSTACK_TERMINATING_RETRY_SECS";

// Stack lifetime
pub const SANDSTACK_DEFAULT_TTL_SECS: &str = "SANDSTACK_DEFAULT_TTL_SECS";

// Provider gateway retry budget
pub const SANDSTACK_RETRY_INITIAL_MS: &str = "SANDSTACK_RETRY_INITIAL_MS";
pub const SANDSTACK_RETRY_CAP_SECS: &str = "SANDSTACK_RETRY_CAP_SECS";
pub const SANDSTACK_RETRY_BUDGET_SECS: &str = "SANDSTACK_RETRY_BUDGET_SECS";

// Notifications
pub const SANDSTACK_NOTIFY_RETRY_DELAY_MS: &str = "SANDSTACK_NOTIFY_RETRY_DELAY_MS";
