use std::rc::Rc;

use crate::autograd::GradFn;
use crate::broadcast::{broadcast, broadcast_up};
use crate::error::{FaradError, Result};
use crate::ndarray::{NdArray, swap_adjacent};
use crate::tensor::{RawTensor, Tensor};

// ===== CONTRACTION KERNEL =====

/// Pluggable matrix-contraction kernel.
///
/// The core hands every trailing 2-D contraction to one of these and depends
/// on nothing beyond the signature, so a vectorized or accelerator-backed
/// kernel drops in without touching graph or gradient logic. `left` is
/// `rows × inner_dim`, `right` is `inner_dim × cols`, both rank 2 and already
/// validated; the result is `rows × cols`.
pub trait MatmulKernel {
    fn matmul(&self, left: &NdArray, right: &NdArray, inner_dim: usize) -> NdArray;
}

/// Reference CPU kernel: the naive O(rows·cols·inner) triple loop over
/// row-major buffers. For throughput, swap in a BLAS-backed implementation.
pub struct NaiveKernel;

impl MatmulKernel for NaiveKernel {
    fn matmul(&self, left: &NdArray, right: &NdArray, inner_dim: usize) -> NdArray {
        let rows = left.as_slice().len();
        let cols = right.shape().get(1).copied().unwrap_or(0);
        let (a, b) = (left.flatten(), right.flatten());
        let mut out = vec![0.0; rows * cols];
        for i in 0..rows {
            for j in 0..cols {
                let mut sum = 0.0;
                for p in 0..inner_dim {
                    sum += a[i * inner_dim + p] * b[p * cols + j];
                }
                out[i * cols + j] = sum;
            }
        }
        NdArray::from_flat(&[rows, cols], &out)
    }
}

// ===== BATCHED CONTRACTION =====

/// Recursive batched contraction. A lower-rank operand is first lifted into
/// the other's leading batch axes, then matching batch axes are zipped until
/// the trailing 2-D matrices reach the kernel.
fn matmul_data(a: &NdArray, b: &NdArray, kernel: &dyn MatmulKernel) -> Result<NdArray> {
    let (sa, sb) = (a.shape(), b.shape());
    if sa.len() < 2 || sb.len() < 2 {
        return Err(FaradError::ShapeMismatch {
            left: sa,
            right: sb,
        });
    }
    if sa.len() < sb.len() {
        return matmul_data(&broadcast_up(a, b), b, kernel);
    }
    if sb.len() < sa.len() {
        return matmul_data(a, &broadcast_up(b, a), kernel);
    }
    if sa.len() == 2 {
        let inner = sa[1];
        if inner != sb[0] {
            return Err(FaradError::ShapeMismatch {
                left: sa,
                right: sb,
            });
        }
        return Ok(kernel.matmul(a, b, inner));
    }
    if sa[0] != sb[0] {
        return Err(FaradError::ShapeMismatch {
            left: sa,
            right: sb,
        });
    }
    let batches: Result<Vec<NdArray>> = a
        .as_slice()
        .iter()
        .zip(b.as_slice())
        .map(|(x, y)| matmul_data(x, y, kernel))
        .collect();
    Ok(NdArray::Array(batches?))
}

/// Swap the trailing two axes, the matrix transpose inside any batch nesting.
fn swap_trailing(value: &NdArray) -> NdArray {
    swap_adjacent(value, value.rank().saturating_sub(2))
}

/// Gradient function for matrix contraction.
///
/// For z = x @ y:
/// - ∂L/∂x = ∂L/∂z @ yᵗ
/// - ∂L/∂y = xᵗ @ ∂L/∂z
///
/// Each operand is lifted to the upstream gradient's batch rank before the
/// contraction, then the result is broadcast back down onto the operand's own
/// shape, which sums away any batch axes the forward pass replicated over.
pub struct MatMulGradFn {
    lhs: Tensor,
    rhs: Tensor,
    lhs_data: NdArray,
    rhs_data: NdArray,
    kernel: Rc<dyn MatmulKernel>,
}

impl GradFn for MatMulGradFn {
    fn backward(&self, out_grad: &NdArray, output: &Tensor) -> Result<()> {
        if self.lhs.borrow().requires_grad {
            let rhs_t = swap_trailing(&broadcast_up(&self.rhs_data, out_grad));
            let raw = matmul_data(out_grad, &rhs_t, self.kernel.as_ref())?;
            let g = broadcast(&raw, &self.lhs_data)?;
            RawTensor::backward_from(&self.lhs, &g, Some(output))?;
        }
        if self.rhs.borrow().requires_grad {
            let lhs_t = swap_trailing(&broadcast_up(&self.lhs_data, out_grad));
            let raw = matmul_data(&lhs_t, out_grad, self.kernel.as_ref())?;
            let g = broadcast(&raw, &self.rhs_data)?;
            RawTensor::backward_from(&self.rhs, &g, Some(output))?;
        }
        Ok(())
    }

    fn clone_box(&self) -> Box<dyn GradFn> {
        Box::new(MatMulGradFn {
            lhs: self.lhs.clone(),
            rhs: self.rhs.clone(),
            lhs_data: self.lhs_data.clone(),
            rhs_data: self.rhs_data.clone(),
            kernel: Rc::clone(&self.kernel),
        })
    }
}

/// Batched matrix contraction with the reference kernel.
///
/// # Errors
/// `ShapeMismatch` for operands below rank 2, disagreeing inner dimensions,
/// or batch axes that cannot be aligned.
pub fn matmul(lhs: &Tensor, rhs: &Tensor) -> Result<Tensor> {
    matmul_with(lhs, rhs, Rc::new(NaiveKernel))
}

/// Batched matrix contraction through a caller-supplied kernel. The kernel
/// rides along in the gradient function, so backward contracts through the
/// same implementation as forward.
pub fn matmul_with(lhs: &Tensor, rhs: &Tensor, kernel: Rc<dyn MatmulKernel>) -> Result<Tensor> {
    let (lhs_data, req_a) = {
        let t = lhs.borrow();
        (t.data.clone(), t.requires_grad)
    };
    let (rhs_data, req_b) = {
        let t = rhs.borrow();
        (t.data.clone(), t.requires_grad)
    };

    let data = matmul_data(&lhs_data, &rhs_data, kernel.as_ref())?;
    let requires_grad = req_a || req_b;
    let out = RawTensor::from_op(data, requires_grad);

    if requires_grad {
        RawTensor::attach(
            &out,
            &[lhs, rhs],
            Box::new(MatMulGradFn {
                lhs: lhs.clone(),
                rhs: rhs.clone(),
                lhs_data,
                rhs_data,
                kernel,
            }),
        );
    }
    Ok(out)
}
