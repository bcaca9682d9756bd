use thiserror::Error;
use uuid::Uuid;

pub use crate::audit::AuditError;
pub use crate::password::HashError;
pub use crate::store::StoreError;
pub use crate::token::TokenError;
pub use crate::users::UserStoreError;

/// Errors that escape a decision.
///
/// Policy outcomes are never errors; they come back as
/// [`Decision::Deny`](crate::Decision::Deny). An `Error` means a collaborator
/// the decision depends on failed, and the boundary maps it to a generic 500.
#[derive(Debug, Error)]
pub enum Error {
    #[error("user store error: {0}")]
    UserStore(#[from] UserStoreError),
    #[error("key-value store error: {0}")]
    Store(#[from] StoreError),
    #[error("audit log error: {0}")]
    Audit(#[from] AuditError),
    #[error("token error: {0}")]
    Token(#[from] TokenError),
    #[error("password hash error: {0}")]
    Hash(#[from] HashError),
    #[error("unknown user: {0}")]
    UnknownUser(Uuid),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
