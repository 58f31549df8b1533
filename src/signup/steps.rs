//! Step tags recorded on a signup attempt.

use crate::store::VerificationFlag;

pub const VERIFY_EMAIL: &str = "verify_email";
pub const VERIFY_PHONE: &str = "verify_phone";
pub const SETUP_MFA: &str = "setup_mfa";
pub const REVIEW: &str = "review";

/// Step every new attempt starts on.
pub const FIRST_STEP: &str = VERIFY_EMAIL;

const MAX_STEP_LEN: usize = 64;

/// Verification flag raised when `step` is recorded as completed.
#[must_use]
pub fn flag_for(step: &str) -> Option<VerificationFlag> {
    match step {
        VERIFY_EMAIL => Some(VerificationFlag::Email),
        VERIFY_PHONE => Some(VerificationFlag::Phone),
        SETUP_MFA => Some(VerificationFlag::Mfa),
        _ => None,
    }
}

/// Step tags are short `snake_case` identifiers.
#[must_use]
pub fn is_valid_tag(step: &str) -> bool {
    !step.is_empty()
        && step.len() <= MAX_STEP_LEN
        && step
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_')
}
