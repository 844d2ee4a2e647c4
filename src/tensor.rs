use std::cell::RefCell;
use std::rc::{Rc, Weak};

use rand::Rng;
use rand_distr::{Distribution, Normal};

use crate::autograd::GradFn;
use crate::broadcast;
use crate::error::{FaradError, Result};
use crate::ndarray::NdArray;
use crate::ops;
use crate::ops::matmul::MatmulKernel;

/// Type alias for a reference-counted, interior-mutable tensor.
///
/// We use `Rc<RefCell<RawTensor>>` to allow multiple references to the same
/// tensor (needed for computation graphs) while still allowing mutation (for
/// gradient accumulation).
///
/// **Note for production**: This is single-threaded only. For multi-threading,
/// replace with `Arc<Mutex<RawTensor>>`.
pub type Tensor = Rc<RefCell<RawTensor>>;

// ===== RAW TENSOR STRUCTURE =====

/// The core tensor structure containing data and gradient tracking.
///
/// This is wrapped in `Rc<RefCell<>>` to create the public `Tensor` type.
/// Fields:
/// - `data`: nested numeric value, rectangular at every level
/// - `shape`: dimensions derived from `data`, cached at construction
/// - `grad`: accumulated gradient, same shape as `data`
/// - `requires_grad`: whether to track gradients for this tensor
/// - `grad_fn`: producing operation's backward routine, None for leaves
/// - `parents`: input tensors this tensor's value was computed from
/// - `children`: consumers that have not yet delivered gradient in the
///   current backward pass; weak because children are topology back-refs,
///   never owners
/// - `m`, `v`: moment accumulators owned by an external optimizer, carried
///   here only so snapshots can round-trip them
pub struct RawTensor {
    pub data: NdArray,
    pub shape: Vec<usize>,
    pub grad: Option<NdArray>,
    pub requires_grad: bool,
    pub grad_fn: Option<Box<dyn GradFn>>,
    pub parents: Vec<Tensor>,
    pub children: Vec<Weak<RefCell<RawTensor>>>,
    pub m: Option<NdArray>,
    pub v: Option<NdArray>,
}

impl Clone for RawTensor {
    fn clone(&self) -> Self {
        RawTensor {
            data: self.data.clone(),
            shape: self.shape.clone(),
            grad: self.grad.clone(),
            requires_grad: self.requires_grad,
            grad_fn: self.grad_fn.as_ref().map(|gf| gf.clone_box()),
            parents: self.parents.clone(),
            children: self.children.clone(),
            m: self.m.clone(),
            v: self.v.clone(),
        }
    }
}

impl std::fmt::Debug for RawTensor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tensor")
            .field("shape", &self.shape)
            .field("requires_grad", &self.requires_grad)
            .field("has_grad", &self.grad.is_some())
            .field("outstanding_children", &self.children.len())
            .finish()
    }
}

// ===== TENSOR CONSTRUCTORS =====

impl RawTensor {
    /// Create a new leaf tensor from caller-supplied data.
    ///
    /// # Errors
    /// `InhomogeneousShape` or `TypeMismatch` when the nesting is not
    /// rectangular.
    pub fn new(data: NdArray, requires_grad: bool) -> Result<Tensor> {
        let shape = data.validated_shape()?;
        Ok(Rc::new(RefCell::new(RawTensor {
            data,
            shape,
            grad: None,
            requires_grad,
            grad_fn: None,
            parents: vec![],
            children: vec![],
            m: None,
            v: None,
        })))
    }

    /// Construct an operation output. The data was built by this crate and
    /// is rectangular by construction, so the shape is derived without
    /// sibling validation.
    pub(crate) fn from_op(data: NdArray, requires_grad: bool) -> Tensor {
        let shape = data.shape();
        Rc::new(RefCell::new(RawTensor {
            data,
            shape,
            grad: None,
            requires_grad,
            grad_fn: None,
            parents: vec![],
            children: vec![],
            m: None,
            v: None,
        }))
    }
}

// ===== INITIALIZERS =====

/// Create a leaf tensor from anything convertible to nested numeric data.
///
/// # Examples
/// ```
/// use farad::{TensorOps, tensor};
///
/// let x = tensor(vec![1.0, 2.0, 3.0], true).unwrap();
/// let y = x.mul(&x).unwrap();
/// y.backward().unwrap();
/// assert_eq!(x.grad().unwrap().flatten(), vec![2.0, 4.0, 6.0]);
/// ```
///
/// # Errors
/// Rejects ragged or mixed nesting.
pub fn tensor(data: impl Into<NdArray>, requires_grad: bool) -> Result<Tensor> {
    RawTensor::new(data.into(), requires_grad)
}

/// Tensor filled with zeros.
pub fn zeros(shape: &[usize]) -> Tensor {
    RawTensor::from_op(NdArray::zeros(shape), false)
}

/// Tensor filled with ones.
pub fn ones(shape: &[usize]) -> Tensor {
    RawTensor::from_op(NdArray::ones(shape), false)
}

/// Tensor filled with `value`.
pub fn full(shape: &[usize], value: f64) -> Tensor {
    RawTensor::from_op(NdArray::full(shape, value), false)
}

/// Tensor with values uniformly distributed in [0, 1).
pub fn rand(shape: &[usize]) -> Tensor {
    let size: usize = shape.iter().product();
    let mut rng = rand::rng();
    let data: Vec<f64> = (0..size).map(|_| rng.random::<f64>()).collect();
    RawTensor::from_op(NdArray::from_flat(shape, &data), false)
}

/// Tensor with values from the standard normal distribution N(0, 1).
///
/// With `xavier` set, every sample is divided by `sqrt(shape[0])`, the usual
/// fan-in scaling for weight matrices.
pub fn randn(shape: &[usize], xavier: bool) -> Tensor {
    let size: usize = shape.iter().product();
    let normal = Normal::new(0.0, 1.0).unwrap();
    let scale = if xavier {
        (shape.first().copied().unwrap_or(1) as f64).sqrt()
    } else {
        1.0
    };
    let mut rng = rand::rng();
    let data: Vec<f64> = (0..size).map(|_| normal.sample(&mut rng) / scale).collect();
    RawTensor::from_op(NdArray::from_flat(shape, &data), false)
}

/// Tensor of uniformly drawn integers in `[low, high)`, stored as floats.
///
/// # Errors
/// `InvalidParameter` when `low >= high`.
pub fn randint(low: i64, high: i64, shape: &[usize]) -> Result<Tensor> {
    if low >= high {
        return Err(FaradError::InvalidParameter(format!(
            "Randint requires low < high, got [{low}, {high})"
        )));
    }
    let size: usize = shape.iter().product();
    let mut rng = rand::rng();
    let data: Vec<f64> = (0..size)
        .map(|_| rng.random_range(low..high) as f64)
        .collect();
    Ok(RawTensor::from_op(NdArray::from_flat(shape, &data), false))
}

/// Lower-triangular mask of ones (ones on and below the diagonal), used for
/// causal attention masking.
///
/// # Errors
/// `InvalidParameter` when `shape` is not rank 2.
pub fn tril(shape: &[usize]) -> Result<Tensor> {
    let [rows, cols] = shape else {
        return Err(FaradError::InvalidParameter(format!(
            "Tril expects a rank-2 shape, got {shape:?}"
        )));
    };
    let data: Vec<f64> = (0..*rows)
        .flat_map(|i| (0..*cols).map(move |j| if j <= i { 1.0 } else { 0.0 }))
        .collect();
    Ok(RawTensor::from_op(NdArray::from_flat(shape, &data), false))
}

// ===== TENSOR OPS TRAIT =====

/// The differentiable operation surface of a tensor, implemented on the
/// shared `Tensor` handle so call sites read as method chains.
///
/// Every operation returns a fresh tensor wired into the graph when any
/// differentiable input requires grad. Operations that can reject their
/// arguments (shape, axis, or index validation) return `Result`; the pure
/// elementwise ones cannot fail.
pub trait TensorOps {
    fn add(&self, other: &Tensor) -> Result<Tensor>;
    fn sub(&self, other: &Tensor) -> Result<Tensor>;
    fn mul(&self, other: &Tensor) -> Result<Tensor>;
    fn div(&self, other: &Tensor) -> Result<Tensor>;
    fn neg(&self) -> Tensor;
    /// Integer power `self^n`, computed by repeated multiplication. The
    /// backward pass applies `n * a^(n-1)` for any `n`, not just `n = 2`;
    /// `n = 0` yields the constant 1 with a zero gradient.
    fn pow(&self, n: u32) -> Tensor;
    fn sqrt(&self) -> Tensor;
    fn exp(&self) -> Tensor;
    fn log(&self) -> Tensor;
    /// Sum one axis away. Negative `dim` counts from the end; `keepdims`
    /// retains the reduced axis with length 1.
    ///
    /// # Examples
    /// ```
    /// use farad::{TensorOps, tensor};
    ///
    /// let x = tensor(vec![vec![1.0, 2.0], vec![3.0, 4.0]], false).unwrap();
    /// assert_eq!(x.sum(0, false).unwrap().data().flatten(), vec![4.0, 6.0]);
    /// assert_eq!(x.sum(1, true).unwrap().shape(), vec![2, 1]);
    /// ```
    fn sum(&self, dim: isize, keepdims: bool) -> Result<Tensor>;
    fn mean(&self, dim: isize, keepdims: bool) -> Result<Tensor>;
    /// Biased (population) variance along one axis, no Bessel correction.
    fn variance(&self, dim: isize, keepdims: bool) -> Result<Tensor>;
    /// Swap two axes. The axes must be adjacent after negative-index
    /// normalization; swap distant axes stepwise.
    fn transpose(&self, dim1: isize, dim2: isize) -> Result<Tensor>;
    /// Row-major reshape to a new shape with the same element count.
    fn reshape(&self, shape: &[usize]) -> Result<Tensor>;
    /// Gather rows by index, or single elements when `idx2` is given:
    /// `out[i] = data[idx1[i]][idx2[i]]`. Repeated indices accumulate their
    /// gradients rather than overwriting.
    fn at(&self, idx1: &[usize], idx2: Option<&[usize]>) -> Result<Tensor>;
    /// Replace every element whose mask counterpart satisfies `predicate`
    /// with `value`. Gradient is blocked at exactly those positions.
    fn masked_fill<P: Fn(f64) -> bool>(
        &self,
        mask: &Tensor,
        predicate: P,
        value: f64,
    ) -> Result<Tensor>;
    /// Batched matrix contraction with the built-in naive kernel.
    fn matmul(&self, other: &Tensor) -> Result<Tensor>;
    /// Batched matrix contraction through a caller-supplied kernel.
    fn matmul_with(&self, other: &Tensor, kernel: Rc<dyn MatmulKernel>) -> Result<Tensor>;
    /// Forward-only reshape of this tensor's data to another tensor's shape,
    /// replicating or sum-reducing as needed. The result is a fresh leaf.
    fn broadcast(&self, target: &Tensor) -> Result<Tensor>;
    /// Backpropagate from this tensor, seeding with ones.
    fn backward(&self) -> Result<()>;
    fn zero_grad(&self);
    fn zero_grad_graph(&self);
    fn grad(&self) -> Option<NdArray>;
    fn data(&self) -> NdArray;
    fn shape(&self) -> Vec<usize>;
    fn rank(&self) -> usize;
    fn requires_grad(&self) -> bool;
}

impl TensorOps for Tensor {
    fn add(&self, other: &Tensor) -> Result<Tensor> {
        ops::binary::binary_op(self, other, ops::binary::BinaryOp::Add)
    }

    fn sub(&self, other: &Tensor) -> Result<Tensor> {
        // a - b as a + (-b); Neg carries the sign through the graph.
        self.add(&other.neg())
    }

    fn mul(&self, other: &Tensor) -> Result<Tensor> {
        ops::binary::binary_op(self, other, ops::binary::BinaryOp::Mul)
    }

    fn div(&self, other: &Tensor) -> Result<Tensor> {
        ops::binary::binary_op(self, other, ops::binary::BinaryOp::Div)
    }

    fn neg(&self) -> Tensor {
        ops::unary::unary_op(self, ops::unary::UnaryOp::Neg)
    }

    fn pow(&self, n: u32) -> Tensor {
        ops::unary::unary_op(self, ops::unary::UnaryOp::Pow(n))
    }

    fn sqrt(&self) -> Tensor {
        ops::unary::unary_op(self, ops::unary::UnaryOp::Sqrt)
    }

    fn exp(&self) -> Tensor {
        ops::unary::unary_op(self, ops::unary::UnaryOp::Exp)
    }

    fn log(&self) -> Tensor {
        ops::unary::unary_op(self, ops::unary::UnaryOp::Log)
    }

    fn sum(&self, dim: isize, keepdims: bool) -> Result<Tensor> {
        ops::reduce::reduce_op(self, ops::reduce::ReduceOp::Sum, dim, keepdims)
    }

    fn mean(&self, dim: isize, keepdims: bool) -> Result<Tensor> {
        ops::reduce::reduce_op(self, ops::reduce::ReduceOp::Mean, dim, keepdims)
    }

    fn variance(&self, dim: isize, keepdims: bool) -> Result<Tensor> {
        ops::reduce::reduce_op(self, ops::reduce::ReduceOp::Variance, dim, keepdims)
    }

    fn transpose(&self, dim1: isize, dim2: isize) -> Result<Tensor> {
        ops::movement::transpose(self, dim1, dim2)
    }

    fn reshape(&self, shape: &[usize]) -> Result<Tensor> {
        ops::movement::reshape(self, shape)
    }

    fn at(&self, idx1: &[usize], idx2: Option<&[usize]>) -> Result<Tensor> {
        ops::select::at(self, idx1, idx2)
    }

    fn masked_fill<P: Fn(f64) -> bool>(
        &self,
        mask: &Tensor,
        predicate: P,
        value: f64,
    ) -> Result<Tensor> {
        ops::select::masked_fill(self, mask, predicate, value)
    }

    fn matmul(&self, other: &Tensor) -> Result<Tensor> {
        ops::matmul::matmul(self, other)
    }

    fn matmul_with(&self, other: &Tensor, kernel: Rc<dyn MatmulKernel>) -> Result<Tensor> {
        ops::matmul::matmul_with(self, other, kernel)
    }

    fn broadcast(&self, target: &Tensor) -> Result<Tensor> {
        let out = broadcast::broadcast(&self.borrow().data, &target.borrow().data)?;
        Ok(RawTensor::from_op(out, false))
    }

    fn backward(&self) -> Result<()> {
        RawTensor::backward(self)
    }

    fn zero_grad(&self) {
        RawTensor::zero_grad(self);
    }

    fn zero_grad_graph(&self) {
        RawTensor::zero_grad_graph(self);
    }

    fn grad(&self) -> Option<NdArray> {
        self.borrow().grad.clone()
    }

    fn data(&self) -> NdArray {
        self.borrow().data.clone()
    }

    fn shape(&self) -> Vec<usize> {
        self.borrow().shape.clone()
    }

    fn rank(&self) -> usize {
        self.borrow().shape.len()
    }

    fn requires_grad(&self) -> bool {
        self.borrow().requires_grad
    }
}

// ===== GRADIENT CHECKING =====

impl RawTensor {
    /// Compare analytic gradients against central finite differences.
    ///
    /// Runs `loss_fn` once on `input` (which must require grad),
    /// backpropagates, then re-evaluates the loss on perturbed copies of the
    /// data, one element at a time. Each perturbed copy is a fresh
    /// non-differentiable tensor so the subject graph is never polluted;
    /// treat any other tensors captured by `loss_fn` as constants for the
    /// same reason. A non-scalar loss is summed before comparison.
    ///
    /// Returns `(max_abs_diff, max_rel_diff, passed)`, where the relative
    /// difference uses an absolute floor of 1 and `passed` means every
    /// element stayed within `tolerance`. Mismatches are reported on stderr.
    ///
    /// # Errors
    /// Propagates failures from `loss_fn` and from `backward`.
    pub fn check_gradients<F>(
        input: &Tensor,
        loss_fn: F,
        epsilon: f64,
        tolerance: f64,
    ) -> Result<(f64, f64, bool)>
    where
        F: Fn(&Tensor) -> Result<Tensor>,
    {
        let shape = input.shape();
        let flat = input.data().flatten();

        let loss = loss_fn(input)?;
        RawTensor::backward(&loss)?;
        let analytic = match input.borrow().grad.as_ref() {
            Some(g) => g.flatten(),
            None => return Err(FaradError::RequiresGrad),
        };
        RawTensor::zero_grad_graph(&loss);

        let mut max_abs: f64 = 0.0;
        let mut max_rel: f64 = 0.0;
        let mut passed = true;
        for i in 0..flat.len() {
            let mut plus = flat.clone();
            plus[i] += epsilon;
            let mut minus = flat.clone();
            minus[i] -= epsilon;
            let up = loss_at(&NdArray::from_flat(&shape, &plus), &loss_fn)?;
            let down = loss_at(&NdArray::from_flat(&shape, &minus), &loss_fn)?;
            let numeric = (up - down) / (2.0 * epsilon);
            let a = analytic[i];
            let abs_diff = (a - numeric).abs();
            let rel_diff = abs_diff / a.abs().max(numeric.abs()).max(1.0);
            max_abs = max_abs.max(abs_diff);
            max_rel = max_rel.max(rel_diff);
            if rel_diff > tolerance {
                eprintln!("Gradient mismatch at flat index {i}: analytic {a}, numeric {numeric}");
                passed = false;
            }
        }
        Ok((max_abs, max_rel, passed))
    }

    /// [`check_gradients`](RawTensor::check_gradients) with a step of `1e-5`
    /// and a tolerance of `1e-4`, which suit `f64` well away from domain
    /// edges.
    pub fn check_gradients_simple<F>(input: &Tensor, loss_fn: F) -> Result<bool>
    where
        F: Fn(&Tensor) -> Result<Tensor>,
    {
        let (max_abs, max_rel, passed) = Self::check_gradients(input, loss_fn, 1e-5, 1e-4)?;
        if !passed {
            eprintln!("Gradient check failed: max_abs={max_abs:.6e}, max_rel={max_rel:.6e}");
        }
        Ok(passed)
    }
}

fn loss_at<F>(data: &NdArray, loss_fn: &F) -> Result<f64>
where
    F: Fn(&Tensor) -> Result<Tensor>,
{
    let point = RawTensor::new(data.clone(), false)?;
    let out = loss_fn(&point)?;
    Ok(out.data().flatten().iter().sum())
}

/// Free-function form of [`RawTensor::check_gradients`].
pub fn check_gradients<F>(
    input: &Tensor,
    loss_fn: F,
    epsilon: f64,
    tolerance: f64,
) -> Result<(f64, f64, bool)>
where
    F: Fn(&Tensor) -> Result<Tensor>,
{
    RawTensor::check_gradients(input, loss_fn, epsilon, tolerance)
}

/// Free-function form of [`RawTensor::check_gradients_simple`].
pub fn check_gradients_simple<F>(input: &Tensor, loss_fn: F) -> Result<bool>
where
    F: Fn(&Tensor) -> Result<Tensor>,
{
    RawTensor::check_gradients_simple(input, loss_fn)
}
