use crate::autograd::GradFn;
use crate::error::{FaradError, Result};
use crate::ndarray::{NdArray, swap_adjacent};
use crate::ops::normalize_dim;
use crate::tensor::{RawTensor, Tensor};

/// Structural operations: data moves, values never change.
#[derive(Clone)]
enum MovementOp {
    /// Swap of axes `lo` and `lo + 1`. Self-inverse, so backward reapplies it.
    Transpose { lo: usize },
    /// Row-major reshape; backward reshapes the gradient to the input shape.
    Reshape,
}

/// Gradient function for structural operations.
pub struct MovementGradFn {
    op: MovementOp,
    input: Tensor,
    input_shape: Vec<usize>,
}

impl GradFn for MovementGradFn {
    fn backward(&self, out_grad: &NdArray, output: &Tensor) -> Result<()> {
        if !self.input.borrow().requires_grad {
            return Ok(());
        }
        let g = match &self.op {
            MovementOp::Transpose { lo } => swap_adjacent(out_grad, *lo),
            MovementOp::Reshape => out_grad.reshape(&self.input_shape)?,
        };
        RawTensor::backward_from(&self.input, &g, Some(output))
    }

    fn clone_box(&self) -> Box<dyn GradFn> {
        Box::new(MovementGradFn {
            op: self.op.clone(),
            input: self.input.clone(),
            input_shape: self.input_shape.clone(),
        })
    }
}

/// Swap two axes of a tensor.
///
/// Only adjacent axes can be swapped directly; distant swaps are composed
/// stepwise by the caller. Negative indices are normalized first, so
/// `transpose(-2, -1)` always swaps the trailing matrix axes.
///
/// # Errors
/// `DimensionOutOfBounds` for axes outside the rank, `InvalidParameter` when
/// the normalized axes are not adjacent.
pub fn transpose(input: &Tensor, dim1: isize, dim2: isize) -> Result<Tensor> {
    let (input_data, input_shape, requires_grad) = {
        let t = input.borrow();
        (t.data.clone(), t.shape.clone(), t.requires_grad)
    };
    let a = normalize_dim(dim1, &input_shape)?;
    let b = normalize_dim(dim2, &input_shape)?;
    let (lo, hi) = (a.min(b), a.max(b));
    if hi - lo != 1 {
        return Err(FaradError::InvalidParameter(format!(
            "Transpose requires adjacent axes, got {dim1} and {dim2} for shape {input_shape:?}"
        )));
    }

    let data = swap_adjacent(&input_data, lo);
    let out = RawTensor::from_op(data, requires_grad);

    if requires_grad {
        RawTensor::attach(
            &out,
            &[input],
            Box::new(MovementGradFn {
                op: MovementOp::Transpose { lo },
                input: input.clone(),
                input_shape,
            }),
        );
    }
    Ok(out)
}

/// Reshape a tensor, keeping row-major element order.
///
/// # Errors
/// `ReshapeMismatch` when the element counts disagree.
pub fn reshape(input: &Tensor, shape: &[usize]) -> Result<Tensor> {
    let (input_data, input_shape, requires_grad) = {
        let t = input.borrow();
        (t.data.clone(), t.shape.clone(), t.requires_grad)
    };

    let data = input_data.reshape(shape)?;
    let out = RawTensor::from_op(data, requires_grad);

    if requires_grad {
        RawTensor::attach(
            &out,
            &[input],
            Box::new(MovementGradFn {
                op: MovementOp::Reshape,
                input: input.clone(),
                input_shape,
            }),
        );
    }
    Ok(out)
}
