use crate::{config::AuthConfig, session::SessionOrchestrator};

/// Shared handler state, attached to the router as an `Extension`.
#[derive(Clone)]
pub struct AppState {
    sessions: SessionOrchestrator,
    cookie_secure: bool,
    refresh_cookie_max_age: i64,
}

impl AppState {
    #[must_use]
    pub fn new(sessions: SessionOrchestrator, config: &AuthConfig) -> Self {
        Self {
            sessions,
            cookie_secure: config.cookie_secure(),
            refresh_cookie_max_age: config.refresh_token_ttl().num_seconds(),
        }
    }

    #[must_use]
    pub fn sessions(&self) -> &SessionOrchestrator {
        &self.sessions
    }

    #[must_use]
    pub fn cookie_secure(&self) -> bool {
        self.cookie_secure
    }

    #[must_use]
    pub fn refresh_cookie_max_age(&self) -> i64 {
        self.refresh_cookie_max_age
    }
}
