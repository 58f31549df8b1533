//! Application-facing session and signup entry points.

pub mod orchestrator;
pub mod outcome;

pub use orchestrator::{SessionOrchestrator, SignupRequest, SignupStepped};
pub use outcome::{
    LoginFailure, RefreshFailure, SessionGrant, SignupFailure, SignupStarted, UserSummary,
};
