use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum FaradError {
    #[error("Inhomogeneous shape: sibling at depth {depth} has length {found}, expected {expected}")]
    InhomogeneousShape {
        depth: usize,
        expected: usize,
        found: usize,
    },

    #[error("Type mismatch at depth {depth}: siblings mix numbers and nested arrays")]
    TypeMismatch { depth: usize },

    #[error("Dimension {dim} out of bounds for shape {shape:?}")]
    DimensionOutOfBounds { dim: isize, shape: Vec<usize> },

    #[error("Cannot reshape {elements} elements into shape {shape:?}")]
    ReshapeMismatch { elements: usize, shape: Vec<usize> },

    #[error("Cannot broadcast shape {from:?} to shape {to:?}")]
    NotBroadcastable { from: Vec<usize>, to: Vec<usize> },

    #[error("Incompatible shapes: {left:?} vs {right:?}")]
    ShapeMismatch { left: Vec<usize>, right: Vec<usize> },

    #[error("Index {index} out of bounds for axis of length {len}")]
    IndexOutOfBounds { index: usize, len: usize },

    #[error("Backward called on a tensor that does not require grad")]
    RequiresGrad,

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

pub type Result<T> = std::result::Result<T, FaradError>;
