use bincode::{Decode, Encode};

use crate::error::{FaradError, Result};

/// Recursively nested numeric value: a single number or an ordered sequence
/// of sub-arrays. All siblings at a given nesting level must share the same
/// sub-shape (rectangular invariant); `validated_shape` enforces this at the
/// construction boundary.
///
/// A bare `Scalar` has shape `[1]`; an empty `Array` has shape `[0]`.
#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub enum NdArray {
    Scalar(f64),
    Array(Vec<NdArray>),
}

impl NdArray {
    /// Shape by descending into index 0, without sibling validation.
    ///
    /// Safe on values produced by this crate's own operations, which only
    /// ever build rectangular results. Caller-supplied data goes through
    /// `validated_shape` instead.
    pub fn shape(&self) -> Vec<usize> {
        let mut dims = Vec::new();
        let mut cursor = self;
        loop {
            match cursor {
                NdArray::Scalar(_) => {
                    if dims.is_empty() {
                        dims.push(1);
                    }
                    return dims;
                }
                NdArray::Array(items) => {
                    dims.push(items.len());
                    match items.first() {
                        Some(first) => cursor = first,
                        None => return dims,
                    }
                }
            }
        }
    }

    /// Fully validated shape inference.
    ///
    /// # Errors
    /// `InhomogeneousShape` when siblings at some level disagree in length,
    /// `TypeMismatch` when numbers and nested arrays are mixed at one level.
    pub fn validated_shape(&self) -> Result<Vec<usize>> {
        match self {
            NdArray::Scalar(_) => Ok(vec![1]),
            NdArray::Array(_) => subshape(self, 0),
        }
    }

    pub fn rank(&self) -> usize {
        self.shape().len()
    }

    /// Total number of scalar elements.
    pub fn size(&self) -> usize {
        self.shape().iter().product()
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            NdArray::Scalar(v) => Some(*v),
            NdArray::Array(_) => None,
        }
    }

    /// Elements of the outermost axis; empty for a scalar.
    pub fn as_slice(&self) -> &[NdArray] {
        match self {
            NdArray::Scalar(_) => &[],
            NdArray::Array(items) => items,
        }
    }

    pub(crate) fn as_slice_mut(&mut self) -> &mut [NdArray] {
        match self {
            NdArray::Scalar(_) => &mut [],
            NdArray::Array(items) => items,
        }
    }

    pub fn full(shape: &[usize], value: f64) -> NdArray {
        match shape.split_first() {
            None => NdArray::Scalar(value),
            Some((&n, rest)) => NdArray::Array((0..n).map(|_| NdArray::full(rest, value)).collect()),
        }
    }

    pub fn zeros(shape: &[usize]) -> NdArray {
        NdArray::full(shape, 0.0)
    }

    pub fn ones(shape: &[usize]) -> NdArray {
        NdArray::full(shape, 1.0)
    }

    /// Apply `f` to every scalar element.
    pub fn map(&self, f: impl Fn(f64) -> f64 + Copy) -> NdArray {
        match self {
            NdArray::Scalar(v) => NdArray::Scalar(f(*v)),
            NdArray::Array(items) => NdArray::Array(items.iter().map(|el| el.map(f)).collect()),
        }
    }

    /// Row-major flattening into a plain vector.
    pub fn flatten(&self) -> Vec<f64> {
        fn walk(value: &NdArray, out: &mut Vec<f64>) {
            match value {
                NdArray::Scalar(v) => out.push(*v),
                NdArray::Array(items) => {
                    for el in items {
                        walk(el, out);
                    }
                }
            }
        }
        let mut out = Vec::with_capacity(self.size());
        walk(self, &mut out);
        out
    }

    /// Rebuild a nested value from a row-major buffer. The buffer length must
    /// equal the shape product; internal callers validate before slicing.
    pub fn from_flat(shape: &[usize], values: &[f64]) -> NdArray {
        match shape.split_first() {
            None => NdArray::Scalar(values.first().copied().unwrap_or(0.0)),
            Some((&n, rest)) => {
                let stride: usize = rest.iter().product();
                NdArray::Array(
                    (0..n)
                        .map(|i| NdArray::from_flat(rest, &values[i * stride..(i + 1) * stride]))
                        .collect(),
                )
            }
        }
    }

    /// Row-major reshape.
    ///
    /// # Errors
    /// `ReshapeMismatch` when the element counts disagree.
    pub fn reshape(&self, shape: &[usize]) -> Result<NdArray> {
        let values = self.flatten();
        let wanted: usize = shape.iter().product();
        if wanted != values.len() {
            return Err(FaradError::ReshapeMismatch {
                elements: values.len(),
                shape: shape.to_vec(),
            });
        }
        Ok(NdArray::from_flat(shape, &values))
    }
}

fn subshape(value: &NdArray, depth: usize) -> Result<Vec<usize>> {
    match value {
        NdArray::Scalar(_) => Ok(Vec::new()),
        NdArray::Array(items) => {
            let Some((first, rest)) = items.split_first() else {
                return Ok(vec![0]);
            };
            let inner = subshape(first, depth + 1)?;
            for sibling in rest {
                let got = subshape(sibling, depth + 1)?;
                if got != inner {
                    return Err(sibling_mismatch(first, sibling, &inner, &got, depth + 1));
                }
            }
            let mut dims = Vec::with_capacity(inner.len() + 1);
            dims.push(items.len());
            dims.extend_from_slice(&inner);
            Ok(dims)
        }
    }
}

fn sibling_mismatch(
    first: &NdArray,
    sibling: &NdArray,
    expected: &[usize],
    found: &[usize],
    depth: usize,
) -> FaradError {
    match (first, sibling) {
        (NdArray::Array(_), NdArray::Scalar(_)) | (NdArray::Scalar(_), NdArray::Array(_)) => {
            FaradError::TypeMismatch { depth }
        }
        _ => {
            let pos = expected
                .iter()
                .zip(found)
                .position(|(a, b)| a != b)
                .unwrap_or_else(|| expected.len().min(found.len()));
            FaradError::InhomogeneousShape {
                depth: depth + pos,
                expected: expected.get(pos).copied().unwrap_or(0),
                found: found.get(pos).copied().unwrap_or(0),
            }
        }
    }
}

// ===== ELEMENTWISE RECURSION =====

/// Combine two values elementwise with structural broadcasting: scalars
/// distribute over arrays at any depth, a lower-rank operand is reused across
/// the higher-rank operand's leading axes, and an equal-rank length-1 axis
/// replicates. Any other disagreement is `NotBroadcastable`.
pub fn zip_map(a: &NdArray, b: &NdArray, f: impl Fn(f64, f64) -> f64 + Copy) -> Result<NdArray> {
    match (a, b) {
        (NdArray::Scalar(x), NdArray::Scalar(y)) => Ok(NdArray::Scalar(f(*x, *y))),
        (NdArray::Scalar(_), NdArray::Array(items)) => {
            let out: Result<Vec<NdArray>> = items.iter().map(|el| zip_map(a, el, f)).collect();
            Ok(NdArray::Array(out?))
        }
        (NdArray::Array(items), NdArray::Scalar(_)) => {
            let out: Result<Vec<NdArray>> = items.iter().map(|el| zip_map(el, b, f)).collect();
            Ok(NdArray::Array(out?))
        }
        (NdArray::Array(av), NdArray::Array(bv)) => {
            let (ra, rb) = (a.rank(), b.rank());
            let out: Result<Vec<NdArray>> = if ra > rb {
                av.iter().map(|el| zip_map(el, b, f)).collect()
            } else if rb > ra {
                bv.iter().map(|el| zip_map(a, el, f)).collect()
            } else if av.len() == bv.len() {
                av.iter().zip(bv).map(|(x, y)| zip_map(x, y, f)).collect()
            } else if av.len() == 1 {
                bv.iter().map(|el| zip_map(&av[0], el, f)).collect()
            } else if bv.len() == 1 {
                av.iter().map(|el| zip_map(el, &bv[0], f)).collect()
            } else {
                return Err(FaradError::NotBroadcastable {
                    from: a.shape(),
                    to: b.shape(),
                });
            };
            Ok(NdArray::Array(out?))
        }
    }
}

/// Elementwise combine for values already known to share a shape (gradient
/// accumulation, scatter updates). Tolerates the `Scalar` vs `[Scalar]`
/// representation drift at shape `[1]` by distributing the scalar side.
pub(crate) fn zip_congruent(
    a: &NdArray,
    b: &NdArray,
    f: impl Fn(f64, f64) -> f64 + Copy,
) -> NdArray {
    match (a, b) {
        (NdArray::Scalar(x), NdArray::Scalar(y)) => NdArray::Scalar(f(*x, *y)),
        (NdArray::Array(av), NdArray::Array(bv)) => NdArray::Array(
            av.iter()
                .zip(bv)
                .map(|(x, y)| zip_congruent(x, y, f))
                .collect(),
        ),
        (NdArray::Scalar(_), NdArray::Array(items)) => {
            NdArray::Array(items.iter().map(|el| zip_congruent(a, el, f)).collect())
        }
        (NdArray::Array(av), NdArray::Scalar(_)) => {
            NdArray::Array(av.iter().map(|el| zip_congruent(el, b, f)).collect())
        }
    }
}

/// Sum the outermost axis, reducing rank by one. Scalars pass through; an
/// empty axis folds to scalar zero.
pub(crate) fn sum_axis0(value: &NdArray) -> NdArray {
    match value {
        NdArray::Scalar(_) => value.clone(),
        NdArray::Array(items) => {
            let mut iter = items.iter();
            match iter.next() {
                None => NdArray::Scalar(0.0),
                Some(first) => iter.fold(first.clone(), |acc, el| {
                    zip_congruent(&acc, el, |x, y| x + y)
                }),
            }
        }
    }
}

// ===== AXIS REDUCTIONS =====

pub(crate) fn reduce_sum(value: &NdArray, dim: usize, keepdims: bool) -> NdArray {
    if dim > 0 {
        return match value {
            NdArray::Array(items) => NdArray::Array(
                items
                    .iter()
                    .map(|el| reduce_sum(el, dim - 1, keepdims))
                    .collect(),
            ),
            NdArray::Scalar(_) => value.clone(),
        };
    }
    let folded = sum_axis0(value);
    if keepdims {
        NdArray::Array(vec![folded])
    } else {
        folded
    }
}

pub(crate) fn reduce_mean(value: &NdArray, dim: usize, keepdims: bool) -> NdArray {
    if dim > 0 {
        return match value {
            NdArray::Array(items) => NdArray::Array(
                items
                    .iter()
                    .map(|el| reduce_mean(el, dim - 1, keepdims))
                    .collect(),
            ),
            NdArray::Scalar(_) => value.clone(),
        };
    }
    let n = match value {
        NdArray::Array(items) => items.len(),
        NdArray::Scalar(_) => 1,
    } as f64;
    let folded = sum_axis0(value).map(|v| v / n);
    if keepdims {
        NdArray::Array(vec![folded])
    } else {
        folded
    }
}

/// Biased (population) variance along one axis.
pub(crate) fn reduce_variance(value: &NdArray, dim: usize, keepdims: bool) -> NdArray {
    if dim > 0 {
        return match value {
            NdArray::Array(items) => NdArray::Array(
                items
                    .iter()
                    .map(|el| reduce_variance(el, dim - 1, keepdims))
                    .collect(),
            ),
            NdArray::Scalar(_) => value.clone(),
        };
    }
    let folded = match value {
        NdArray::Scalar(_) => NdArray::Scalar(0.0),
        NdArray::Array(items) => {
            let n = items.len() as f64;
            let mean = sum_axis0(value).map(|v| v / n);
            let mut acc: Option<NdArray> = None;
            for el in items {
                let sq = zip_congruent(el, &mean, |x, m| (x - m) * (x - m));
                acc = Some(match acc {
                    None => sq,
                    Some(prev) => zip_congruent(&prev, &sq, |x, y| x + y),
                });
            }
            match acc {
                Some(total) => total.map(|v| v / n),
                None => NdArray::Scalar(0.0),
            }
        }
    };
    if keepdims {
        NdArray::Array(vec![folded])
    } else {
        folded
    }
}

// ===== STRUCTURAL HELPERS =====

/// Insert a length-1 axis at `dim`, the inverse of a squeezed reduction.
pub(crate) fn unsqueeze(value: &NdArray, dim: usize) -> NdArray {
    if dim == 0 {
        return NdArray::Array(vec![value.clone()]);
    }
    match value {
        NdArray::Array(items) => NdArray::Array(
            items
                .iter()
                .map(|el| unsqueeze(el, dim - 1))
                .collect(),
        ),
        NdArray::Scalar(_) => NdArray::Array(vec![value.clone()]),
    }
}

/// Swap axes `dim` and `dim + 1`. Callers guarantee `dim + 1 < rank`.
pub(crate) fn swap_adjacent(value: &NdArray, dim: usize) -> NdArray {
    match value {
        NdArray::Array(items) if dim > 0 => NdArray::Array(
            items
                .iter()
                .map(|el| swap_adjacent(el, dim - 1))
                .collect(),
        ),
        NdArray::Array(items) => {
            let Some(first) = items.first() else {
                return value.clone();
            };
            if first.as_number().is_some() {
                return value.clone();
            }
            let cols = first.as_slice().len();
            NdArray::Array(
                (0..cols)
                    .map(|j| {
                        NdArray::Array(items.iter().map(|row| row.as_slice()[j].clone()).collect())
                    })
                    .collect(),
            )
        }
        NdArray::Scalar(_) => value.clone(),
    }
}

// ===== CONVERSIONS =====

impl From<f64> for NdArray {
    fn from(value: f64) -> Self {
        NdArray::Scalar(value)
    }
}

impl<T: Into<NdArray>> From<Vec<T>> for NdArray {
    fn from(values: Vec<T>) -> Self {
        NdArray::Array(values.into_iter().map(Into::into).collect())
    }
}
