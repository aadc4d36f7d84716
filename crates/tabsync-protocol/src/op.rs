//! The operation-apply surface.
//!
//! The core never re-specifies the operation-transform algebra used to
//! mutate document data — it only needs a seam at
//! which an external algebra can be plugged in. `OpAlgebra` is that
//! seam: the Facade Document applies ops through it optimistically, and
//! a hosted session applies them authoritatively through the same
//! interface, so both sides of a reconciliation agree on what "apply"
//! means without the core knowing the algebra's shape.

use thiserror::Error;

use crate::snapshot::Op;

/// Failure to apply an operation to document data.
///
/// Delivered to the submitting caller's handler unchanged; never causes a panic or leaves partially
/// mutated data — implementors of [`OpAlgebra`] must apply atomically.
#[derive(Debug, Clone, Error)]
#[error("operation apply failed: {0}")]
pub struct OpApplyError(pub String);

impl OpApplyError {
    /// Construct an apply error carrying a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// The operation-transform algebra's apply primitive, rendered as a
/// trait so the core stays generic over whatever algebra an embedding
/// application uses (json0, rich text, CRDT, ...).
///
/// Implementations must be atomic: on `Err`, `data` is left exactly as
/// it was before the call.
pub trait OpAlgebra: Send + Sync {
    /// Apply `op` to `data` in place.
    ///
    /// # Errors
    ///
    /// Returns [`OpApplyError`] if `op` cannot be applied to `data` in
    /// its current shape.
    fn apply(&self, data: &mut serde_json::Value, op: &Op) -> Result<(), OpApplyError>;
}
