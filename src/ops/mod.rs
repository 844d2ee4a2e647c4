//! Differentiable primitive operations.
//!
//! Each submodule holds one operation family: the forward dispatcher that
//! validates eagerly, computes output data, and wires the result into the
//! graph, plus the family's `GradFn` carrying whatever forward-time snapshots
//! its backward step needs.

pub mod binary;
pub mod matmul;
pub mod movement;
pub mod reduce;
pub mod select;
pub mod unary;

use crate::error::{FaradError, Result};

/// Resolve a possibly negative axis index against a shape.
///
/// # Errors
/// `DimensionOutOfBounds` when the normalized index falls outside the rank.
pub(crate) fn normalize_dim(dim: isize, shape: &[usize]) -> Result<usize> {
    let rank = shape.len() as isize;
    let adjusted = if dim < 0 { dim + rank } else { dim };
    if adjusted < 0 || adjusted >= rank {
        return Err(FaradError::DimensionOutOfBounds {
            dim,
            shape: shape.to_vec(),
        });
    }
    Ok(adjusted as usize)
}
