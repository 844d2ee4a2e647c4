use std::rc::Rc;

use crate::error::{FaradError, Result};
use crate::ndarray::{NdArray, zip_congruent};
use crate::tensor::{RawTensor, Tensor};

// ===== GRADIENT FUNCTION TRAIT =====

/// Trait for gradient computation functions.
///
/// Each operation family implements this to define how gradients flow
/// backward. Implementations cache at forward time everything they need
/// (input tensor handles plus data snapshots), so `backward` receives only:
/// - `out_grad`: gradient of the loss w.r.t. this operation's output
/// - `output`: the output tensor itself, passed through so each input can
///   strike this consumer off its outstanding-children list
///
/// An implementation computes each differentiable input's local gradient,
/// broadcasts it onto that input's shape, and feeds it to
/// `RawTensor::backward_from`.
pub trait GradFn {
    fn backward(&self, out_grad: &NdArray, output: &Tensor) -> Result<()>;
    /// Clone this gradient function (needed to fire it without holding the
    /// output's `RefCell` borrow).
    fn clone_box(&self) -> Box<dyn GradFn>;
}

// ===== GRAPH LINKING =====

impl RawTensor {
    /// Wire a freshly computed output into the graph: every `requires_grad`
    /// input becomes a parent of `out`, gains `out` as an outstanding child
    /// (once per occurrence, so an input used twice is counted twice), and
    /// `grad_fn` is installed as the output's producing operation.
    pub(crate) fn attach(out: &Tensor, inputs: &[&Tensor], grad_fn: Box<dyn GradFn>) {
        let tracked: Vec<Tensor> = inputs
            .iter()
            .filter(|t| t.borrow().requires_grad)
            .map(|t| (*t).clone())
            .collect();
        if tracked.is_empty() {
            return;
        }
        for parent in &tracked {
            parent.borrow_mut().children.push(Rc::downgrade(out));
        }
        let mut o = out.borrow_mut();
        o.parents = tracked;
        o.grad_fn = Some(grad_fn);
    }
}

// ===== BACKPROPAGATION =====

impl RawTensor {
    /// Run backpropagation starting from this tensor.
    ///
    /// Seeds the root's incoming gradient with ones of its own shape and
    /// clears its outstanding-children list (a root is treated as having no
    /// consumers left to wait for), then lets `backward_from` drive the
    /// recursion.
    ///
    /// # Errors
    /// `RequiresGrad` when called on a tensor that does not require grad.
    pub fn backward(tensor_ref: &Tensor) -> Result<()> {
        let seed = {
            let mut t = tensor_ref.borrow_mut();
            if !t.requires_grad {
                return Err(FaradError::RequiresGrad);
            }
            t.children.clear();
            NdArray::ones(&t.shape)
        };
        Self::backward_from(tensor_ref, &seed, None)
    }

    /// Accumulate one consumer's gradient contribution and fire this node's
    /// own operation once every consumer has contributed.
    ///
    /// A node with fan-out receives one call per downstream use; each call
    /// removes one occurrence of `from_child` from `children`. Only when that
    /// multiset empties does the producing operation run, so the node always
    /// propagates the full sum of its downstream gradients.
    pub(crate) fn backward_from(
        tensor_ref: &Tensor,
        incoming: &NdArray,
        from_child: Option<&Tensor>,
    ) -> Result<()> {
        let fire = {
            let mut t = tensor_ref.borrow_mut();
            // Accumulating into a zeros base also canonicalizes the
            // representation when a scalar gradient meets shape [1].
            let base = match t.grad.take() {
                Some(existing) => existing,
                None => NdArray::zeros(&t.shape),
            };
            let accumulated = zip_congruent(&base, incoming, |a, b| a + b);
            t.grad = Some(accumulated.clone());

            if let Some(child) = from_child {
                let child_ptr = Rc::as_ptr(child);
                if let Some(pos) = t.children.iter().position(|w| w.as_ptr() == child_ptr) {
                    t.children.remove(pos);
                }
            }

            if t.children.is_empty() {
                t.grad_fn.as_ref().map(|op| (op.clone_box(), accumulated))
            } else {
                None
            }
        };

        if let Some((grad_fn, grad)) = fire {
            grad_fn.backward(&grad, tensor_ref)?;
        }
        Ok(())
    }
}

// ===== GRAPH RESET =====

impl RawTensor {
    /// Reset this tensor's gradient to zeros and sever its graph edges.
    /// Leaves a `requires_grad = false` tensor's gradient unallocated.
    pub fn zero_grad(tensor_ref: &Tensor) {
        let mut t = tensor_ref.borrow_mut();
        t.grad = t.requires_grad.then(|| NdArray::zeros(&t.shape));
        t.children.clear();
        t.parents.clear();
        t.grad_fn = None;
    }

    /// Reset this tensor and its whole upstream subgraph, so the same leaf
    /// tensors can participate in a fresh graph next iteration. Revisiting a
    /// node already reset is a no-op because its parent list is gone, which
    /// keeps the walk linear on shared subgraphs.
    pub fn zero_grad_graph(tensor_ref: &Tensor) {
        let parents = std::mem::take(&mut tensor_ref.borrow_mut().parents);
        Self::zero_grad(tensor_ref);
        for parent in &parents {
            Self::zero_grad_graph(parent);
        }
    }
}
