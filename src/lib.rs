//! # Gatehouse (Access-Control Decision Core)
//!
//! `gatehouse` is the security core that sits in front of a portal's API. It
//! answers four questions for every inbound request and returns a structured
//! [`Decision`](decision::Decision) for each one:
//!
//! - **Is the bearer token valid?** ([`token`]) HS256 tokens are quick-checked,
//!   verified, cached and checked against the revocation list. Refresh tokens
//!   rotate inside a family; replaying a superseded member is rejected.
//! - **Is the client within its rate limit?** ([`rate_limit`]) Fixed windows
//!   enforced by the key-value store, progressive windows for repeat
//!   offenders, and automatic IP bans.
//! - **Is the account locked?** ([`lockout`]) Failed logins lock the account
//!   for a duration that grows with every lockout.
//! - **Is the action permitted?** ([`permissions`]) Role permissions, per-user
//!   overrides and conditional scopes.
//!
//! Password rules ([`password`]) cover strength, history, minimum age and
//! expiration with grace logins.
//!
//! ## Failure policy
//!
//! Rate limiting and revocation checks fail **open** when the key-value store
//! is unavailable (logged as degraded). Password and permission decisions are
//! computed from the user store and fail **closed** when it is unreachable.
//!
//! ## Collaborators
//!
//! Storage is abstracted behind [`store::KeyValueStore`],
//! [`users::UserStore`], [`permissions::PermissionStore`] and
//! [`audit::AuditLog`]. In-memory implementations ship with the crate.

pub mod api;
pub mod audit;
pub mod cli;
pub mod clock;
pub mod decision;
pub mod error;
pub mod gatehouse;
pub mod lockout;
pub mod password;
pub mod permissions;
pub mod rate_limit;
pub mod store;
pub mod token;
pub mod users;

pub use decision::{Decision, Denial, DenyKind, DenyReason};
pub use error::{Error, Result};
pub use gatehouse::Gatehouse;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);
