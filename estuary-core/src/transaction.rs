//! Transaction seam.

use crate::error::BoxError;
use std::fmt;

/// The narrow view of a transaction the runtime needs: marking it for
/// rollback after a failure.
pub trait Transaction: Send + Sync + fmt::Debug {
    /// Identifier used in logs.
    fn id(&self) -> &str;

    /// Mark the transaction so that it can only roll back.
    fn set_rollback_only(&self) -> Result<(), BoxError>;

    /// Whether the transaction was marked for rollback.
    fn is_rollback_only(&self) -> bool;
}
