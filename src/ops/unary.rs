use crate::autograd::GradFn;
use crate::error::Result;
use crate::ndarray::{NdArray, zip_congruent};
use crate::tensor::{RawTensor, Tensor};

/// Unary operations: single input, single output.
///
/// Each operation has a corresponding derivative:
/// - Neg: d(-x)/dx = -1
/// - Sqrt: d(√x)/dx = 1/(2√x)
/// - Exp: d(eˣ)/dx = eˣ
/// - Log: d(ln(x))/dx = 1/x
/// - Pow(n): d(xⁿ)/dx = n·xⁿ⁻¹, valid for every integer exponent, not a
///   hardcoded coefficient for the square case; x⁰ is the constant 1, so
///   Pow(0) sends back a zero gradient
#[derive(Clone, Copy)]
pub enum UnaryOp {
    Neg,
    Sqrt,
    Exp,
    Log,
    Pow(u32),
}

impl UnaryOp {
    fn apply(self, x: f64) -> f64 {
        match self {
            UnaryOp::Neg => -x,
            UnaryOp::Sqrt => x.sqrt(),
            UnaryOp::Exp => x.exp(),
            UnaryOp::Log => x.ln(),
            UnaryOp::Pow(n) => x.powi(n as i32),
        }
    }
}

/// Gradient function for unary operations.
///
/// Stores which operation was performed plus a snapshot of the input data so
/// backward can apply the correct derivative.
pub struct UnaryGradFn {
    op: UnaryOp,
    input: Tensor,
    input_data: NdArray,
}

impl GradFn for UnaryGradFn {
    fn backward(&self, out_grad: &NdArray, output: &Tensor) -> Result<()> {
        if !self.input.borrow().requires_grad {
            return Ok(());
        }
        // Chain rule: ∂L/∂x = ∂L/∂y · ∂y/∂x, elementwise over same shapes.
        let g = match self.op {
            UnaryOp::Neg => out_grad.map(|g| -g),
            UnaryOp::Sqrt => {
                zip_congruent(out_grad, &self.input_data, |g, x| g / (2.0 * x.sqrt()))
            }
            UnaryOp::Exp => zip_congruent(out_grad, &self.input_data, |g, x| g * x.exp()),
            UnaryOp::Log => zip_congruent(out_grad, &self.input_data, |g, x| g / x),
            // n·x⁻¹ would be NaN at x = 0 even though the derivative of the
            // constant x⁰ is plainly zero.
            UnaryOp::Pow(0) => out_grad.map(|_| 0.0),
            UnaryOp::Pow(n) => {
                let coeff = f64::from(n);
                let exponent = n as i32 - 1;
                zip_congruent(out_grad, &self.input_data, |g, x| {
                    g * coeff * x.powi(exponent)
                })
            }
        };
        RawTensor::backward_from(&self.input, &g, Some(output))
    }

    fn clone_box(&self) -> Box<dyn GradFn> {
        Box::new(UnaryGradFn {
            op: self.op,
            input: self.input.clone(),
            input_data: self.input_data.clone(),
        })
    }
}

/// Apply a unary operation elementwise. Cannot fail: the output shape is the
/// input shape and no axis or index is involved.
pub fn unary_op(input: &Tensor, op: UnaryOp) -> Tensor {
    let (input_data, requires_grad) = {
        let t = input.borrow();
        (t.data.clone(), t.requires_grad)
    };

    let data = input_data.map(|x| op.apply(x));
    let out = RawTensor::from_op(data, requires_grad);

    if requires_grad {
        RawTensor::attach(
            &out,
            &[input],
            Box::new(UnaryGradFn {
                op,
                input: input.clone(),
                input_data,
            }),
        );
    }
    out
}
