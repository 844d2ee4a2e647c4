use crate::autograd::GradFn;
use crate::broadcast::broadcast;
use crate::error::Result;
use crate::ndarray::{
    NdArray, reduce_mean, reduce_sum, reduce_variance, unsqueeze, zip_congruent, zip_map,
};
use crate::ops::normalize_dim;
use crate::tensor::{RawTensor, Tensor};

/// Reductions collapse one axis:
/// - Sum: total along the axis
/// - Mean: sum divided by the axis length
/// - Variance: biased (population) spread around the axis mean
#[derive(Clone, Copy)]
pub enum ReduceOp {
    Sum,
    Mean,
    Variance,
}

/// Gradient function for reductions.
///
/// Keeps the normalized axis, the keepdims flag, and a snapshot of the input
/// so the upstream gradient can be re-expanded onto the input's shape.
pub struct ReduceGradFn {
    op: ReduceOp,
    input: Tensor,
    input_data: NdArray,
    axis: usize,
    keepdims: bool,
}

impl GradFn for ReduceGradFn {
    fn backward(&self, out_grad: &NdArray, output: &Tensor) -> Result<()> {
        if !self.input.borrow().requires_grad {
            return Ok(());
        }
        // Restore the reduced axis as length 1 so the expansion below is a
        // plain broadcast.
        let up = if self.keepdims {
            out_grad.clone()
        } else {
            unsqueeze(out_grad, self.axis)
        };
        let n = self.input_data.shape()[self.axis] as f64;

        let g = match self.op {
            // Every input element contributed with weight 1.
            ReduceOp::Sum => broadcast(&up, &self.input_data)?,
            // Weight 1/N per element; divide before expanding.
            ReduceOp::Mean => broadcast(&up.map(|v| v / n), &self.input_data)?,
            // ∂var/∂xᵢ = 2(xᵢ - mean)/N; the mean's own dependence on xᵢ
            // cancels because the centered values sum to zero.
            ReduceOp::Variance => {
                let mean = reduce_mean(&self.input_data, self.axis, true);
                let centered = zip_map(&self.input_data, &mean, |x, m| 2.0 * (x - m) / n)?;
                let expanded = broadcast(&up, &self.input_data)?;
                zip_congruent(&centered, &expanded, |c, g| c * g)
            }
        };
        RawTensor::backward_from(&self.input, &g, Some(output))
    }

    fn clone_box(&self) -> Box<dyn GradFn> {
        Box::new(ReduceGradFn {
            op: self.op,
            input: self.input.clone(),
            input_data: self.input_data.clone(),
            axis: self.axis,
            keepdims: self.keepdims,
        })
    }
}

/// Reduce one axis of a tensor.
///
/// Negative `dim` counts from the end. With `keepdims` the reduced axis stays
/// in the output with length 1, otherwise it is dropped (a rank-1 input then
/// reduces to a scalar).
///
/// # Errors
/// `DimensionOutOfBounds` when `dim` does not resolve against the rank.
pub fn reduce_op(input: &Tensor, op: ReduceOp, dim: isize, keepdims: bool) -> Result<Tensor> {
    let (input_data, input_shape, requires_grad) = {
        let t = input.borrow();
        (t.data.clone(), t.shape.clone(), t.requires_grad)
    };
    let axis = normalize_dim(dim, &input_shape)?;

    let data = match op {
        ReduceOp::Sum => reduce_sum(&input_data, axis, keepdims),
        ReduceOp::Mean => reduce_mean(&input_data, axis, keepdims),
        ReduceOp::Variance => reduce_variance(&input_data, axis, keepdims),
    };
    let out = RawTensor::from_op(data, requires_grad);

    if requires_grad {
        RawTensor::attach(
            &out,
            &[input],
            Box::new(ReduceGradFn {
                op,
                input: input.clone(),
                input_data,
                axis,
                keepdims,
            }),
        );
    }
    Ok(out)
}
