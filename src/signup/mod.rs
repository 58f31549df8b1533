//! Resumable signup attempts.
//!
//! ```text
//! (none) --create--> in_progress --advance--> in_progress
//! in_progress --resume (unexpired)--> in_progress   attempt_count += 1
//! in_progress --complete--> completed
//! in_progress --sweep (expires_at < now)--> expired
//! ```

pub mod manager;
pub mod steps;

pub use manager::SignupManager;

/// Emails are stored and compared in lowercase with surrounding whitespace removed.
#[must_use]
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::normalize_email;

    #[test]
    fn normalize_email_lowercases_and_trims() {
        assert_eq!(normalize_email("  Alice@Example.COM "), "alice@example.com");
    }
}
