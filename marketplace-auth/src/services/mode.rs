use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Which authentication path serves a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    Legacy,
    Secure,
}

impl AuthMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthMode::Legacy => "legacy",
            AuthMode::Secure => "secure",
        }
    }
}

impl fmt::Display for AuthMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Process-wide secure-mode switch.
///
/// One writer (startup config or the operator reload path), many readers.
/// Clones share the same flag.
#[derive(Debug, Clone, Default)]
pub struct ModeFlag {
    secure: Arc<AtomicBool>,
}

impl ModeFlag {
    pub fn new(secure: bool) -> Self {
        Self {
            secure: Arc::new(AtomicBool::new(secure)),
        }
    }

    pub fn current(&self) -> AuthMode {
        if self.secure.load(Ordering::Acquire) {
            AuthMode::Secure
        } else {
            AuthMode::Legacy
        }
    }

    pub fn is_secure(&self) -> bool {
        self.current() == AuthMode::Secure
    }

    /// Flip the flag. Returns the previous mode.
    pub fn set(&self, mode: AuthMode) -> AuthMode {
        let previous = self.secure.swap(mode == AuthMode::Secure, Ordering::AcqRel);
        let previous = if previous {
            AuthMode::Secure
        } else {
            AuthMode::Legacy
        };

        if previous != mode {
            tracing::warn!(from = %previous, to = %mode, "Authentication mode switched");
        }
        previous
    }
}
