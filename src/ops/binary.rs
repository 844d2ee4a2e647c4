use crate::autograd::GradFn;
use crate::broadcast::broadcast;
use crate::error::Result;
use crate::ndarray::{NdArray, zip_map};
use crate::tensor::{RawTensor, Tensor};

/// Binary operations: two inputs, one output.
///
/// Broadcasting is handled structurally in both directions: forward through
/// the elementwise recursion, backward by reshaping each gradient onto its
/// input's shape (which sums away whatever the forward pass replicated).
#[derive(Clone, Copy)]
pub enum BinaryOp {
    Add, // x + y
    Mul, // x * y (element-wise)
    Div, // x / y (element-wise)
}

impl BinaryOp {
    fn apply(self, x: f64, y: f64) -> f64 {
        match self {
            BinaryOp::Add => x + y,
            BinaryOp::Mul => x * y,
            BinaryOp::Div => x / y,
        }
    }
}

/// Gradient function for binary operations.
///
/// Caches both input handles plus data snapshots taken at forward time, so
/// later in-place mutation of an input cannot skew the backward pass.
pub struct BinaryGradFn {
    op: BinaryOp,
    lhs: Tensor,
    rhs: Tensor,
    lhs_data: NdArray,
    rhs_data: NdArray,
}

impl GradFn for BinaryGradFn {
    fn backward(&self, out_grad: &NdArray, output: &Tensor) -> Result<()> {
        if self.lhs.borrow().requires_grad {
            let raw = match self.op {
                // ∂(x+y)/∂x = 1
                BinaryOp::Add => out_grad.clone(),
                // ∂(x*y)/∂x = y
                BinaryOp::Mul => zip_map(out_grad, &self.rhs_data, |g, y| g * y)?,
                // ∂(x/y)/∂x = 1/y
                BinaryOp::Div => zip_map(out_grad, &self.rhs_data, |g, y| g / y)?,
            };
            let g = broadcast(&raw, &self.lhs_data)?;
            RawTensor::backward_from(&self.lhs, &g, Some(output))?;
        }
        if self.rhs.borrow().requires_grad {
            let raw = match self.op {
                // ∂(x+y)/∂y = 1
                BinaryOp::Add => out_grad.clone(),
                // ∂(x*y)/∂y = x
                BinaryOp::Mul => zip_map(out_grad, &self.lhs_data, |g, x| g * x)?,
                // ∂(x/y)/∂y = -x/y²
                BinaryOp::Div => {
                    let coeff = zip_map(&self.lhs_data, &self.rhs_data, |x, y| -x / (y * y))?;
                    zip_map(out_grad, &coeff, |g, c| g * c)?
                }
            };
            let g = broadcast(&raw, &self.rhs_data)?;
            RawTensor::backward_from(&self.rhs, &g, Some(output))?;
        }
        Ok(())
    }

    fn clone_box(&self) -> Box<dyn GradFn> {
        Box::new(BinaryGradFn {
            op: self.op,
            lhs: self.lhs.clone(),
            rhs: self.rhs.clone(),
            lhs_data: self.lhs_data.clone(),
            rhs_data: self.rhs_data.clone(),
        })
    }
}

/// Apply a binary operation with structural broadcasting.
///
/// Shape compatibility is validated here at forward time: incompatible
/// operands surface as `NotBroadcastable` before any graph edge exists.
///
/// # Errors
/// `NotBroadcastable` when the operand shapes cannot be aligned.
pub fn binary_op(lhs: &Tensor, rhs: &Tensor, op: BinaryOp) -> Result<Tensor> {
    let (lhs_data, req_a) = {
        let t = lhs.borrow();
        (t.data.clone(), t.requires_grad)
    };
    let (rhs_data, req_b) = {
        let t = rhs.borrow();
        (t.data.clone(), t.requires_grad)
    };

    let data = zip_map(&lhs_data, &rhs_data, |x, y| op.apply(x, y))?;
    let requires_grad = req_a || req_b;
    let out = RawTensor::from_op(data, requires_grad);

    if requires_grad {
        RawTensor::attach(
            &out,
            &[lhs, rhs],
            Box::new(BinaryGradFn {
                op,
                lhs: lhs.clone(),
                rhs: rhs.clone(),
                lhs_data,
                rhs_data,
            }),
        );
    }
    Ok(out)
}
