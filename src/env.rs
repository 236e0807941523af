//! Runtime environment detection.
//!
//! Single source of truth for whether the router runs in a test setting,
//! based on the `PUSH_ROUTER_ENV` environment variable.
//!
//! Set `PUSH_ROUTER_ENV` to one of:
//! - `test` - Test mode (file storage instead of the OS keyring, repo `tmp/` config dir)
//! - `development` or `dev` - Development mode
//! - (anything else or unset) - Production mode

/// Environment variable consulted by [`Environment::current`].
pub const ENV_VAR: &str = "PUSH_ROUTER_ENV";

/// Runtime environment for the router.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    /// Production environment (default).
    Production,
    /// Development environment.
    Development,
    /// Test environment - skips keyring, uses file storage.
    Test,
}

impl Environment {
    /// Detect current environment from `PUSH_ROUTER_ENV`.
    #[must_use]
    pub fn current() -> Self {
        Self::parse(std::env::var(ENV_VAR).ok().as_deref())
    }

    fn parse(value: Option<&str>) -> Self {
        match value {
            Some("test") => Self::Test,
            Some("development" | "dev") => Self::Development,
            _ => Self::Production,
        }
    }

    /// Returns `true` if this is the test environment.
    #[must_use]
    pub fn is_test(self) -> bool {
        self == Self::Test
    }

    /// Returns `true` if this is the production environment.
    #[must_use]
    pub fn is_production(self) -> bool {
        self == Self::Production
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Production => write!(f, "production"),
            Self::Development => write!(f, "development"),
            Self::Test => write!(f, "test"),
        }
    }
}

/// Returns `true` if the OS keyring should be bypassed in favour of files.
#[must_use]
pub fn should_skip_keyring() -> bool {
    Environment::current().is_test()
}
