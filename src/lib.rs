//! Reverse-mode automatic differentiation over nested numeric arrays.
//!
//! Tensors hold recursively nested data ([`NdArray`]) and build a dynamic
//! computation graph as operations execute. Calling [`TensorOps::backward`]
//! on a result walks that graph in reverse, firing each node's recorded
//! operation only once every downstream consumer has delivered its gradient,
//! so fan-out always accumulates the full sum before propagating further.
//!
//! Shapes are compared structurally at runtime: broadcasting replicates or
//! sum-reduces along the mismatched axes in both the forward and backward
//! directions. Matrix contraction takes its trailing 2-D kernel as an
//! injected capability ([`MatmulKernel`]), so accelerated implementations
//! drop in without touching graph logic.
//!
//! ```
//! use farad::{TensorOps, tensor};
//!
//! let w = tensor(vec![vec![1.0, 2.0], vec![3.0, 4.0]], true)?;
//! let x = tensor(vec![vec![1.0], vec![1.0]], false)?;
//! let loss = w.matmul(&x)?.sum(0, false)?;
//! loss.backward()?;
//! assert_eq!(w.grad().unwrap().flatten(), vec![1.0, 1.0, 1.0, 1.0]);
//! # Ok::<(), farad::FaradError>(())
//! ```

pub mod autograd;
pub mod broadcast;
pub mod error;
pub mod io;
pub mod ndarray;
pub mod ops;
pub mod tensor;

pub use autograd::GradFn;
pub use broadcast::{broadcast, broadcast_up};
pub use error::{FaradError, Result};
pub use io::TensorSnapshot;
pub use ndarray::NdArray;
pub use ops::matmul::{MatmulKernel, NaiveKernel};
pub use tensor::{
    RawTensor, Tensor, TensorOps, check_gradients, check_gradients_simple, full, ones, rand,
    randint, randn, tensor, tril, zeros,
};
