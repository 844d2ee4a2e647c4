//! Shape-directed broadcasting.
//!
//! Two directions live here. `broadcast` moves a value to another value's
//! exact shape, replicating where the target is wider and sum-reducing where
//! it is narrower; backward passes use it to redistribute an output-shaped
//! gradient onto each input's shape. `broadcast_up` only ever adds leading
//! batch axes and never sums, which is what matrix contraction needs to align
//! a shared low-rank operand with a batched one.

use crate::error::{FaradError, Result};
use crate::ndarray::{NdArray, sum_axis0};

/// Reshape `value` to match `target`'s shape exactly.
///
/// The case analysis is structural and recursive. Scalars replicate into any
/// array shape; an array collapsing onto a scalar sums its outermost axis and
/// tries again. When ranks differ, the lower rank is aligned to the trailing
/// axes of the higher one: extra leading axes are replicated (target wider)
/// or summed away (value wider). At equal rank a length mismatch is only
/// legal across a length-1 axis, which sums to or replicates from length 1.
///
/// Each step removes one axis of disagreement, so the recursion terminates.
///
/// # Errors
/// `NotBroadcastable` when no alignment exists.
pub fn broadcast(value: &NdArray, target: &NdArray) -> Result<NdArray> {
    let vs = value.shape();
    let ts = target.shape();
    if vs == ts {
        return Ok(value.clone());
    }
    match (value, target) {
        (NdArray::Scalar(_), NdArray::Array(items)) => {
            let out: Result<Vec<NdArray>> = items.iter().map(|t| broadcast(value, t)).collect();
            Ok(NdArray::Array(out?))
        }
        (NdArray::Array(_), NdArray::Scalar(_)) => broadcast(&sum_axis0(value), target),
        (NdArray::Array(av), NdArray::Array(bv)) => {
            let (rv, rt) = (vs.len(), ts.len());
            if rv > rt {
                // Align target to the last matching window of value's shape.
                // A match at the top zips one level down on both sides. A
                // deeper match, or no match at all (unit axes left by a
                // scalar-shaped gradient), collapses the outermost axis and
                // retries; shapes that truly disagree still fail once the
                // ranks meet.
                let along = (0..=rv - rt).rev().find(|&i| vs[i..i + rt] == ts[..]);
                match along {
                    Some(0) => {
                        let out: Result<Vec<NdArray>> = av
                            .iter()
                            .zip(bv)
                            .map(|(v, t)| broadcast(v, t))
                            .collect();
                        Ok(NdArray::Array(out?))
                    }
                    _ => broadcast(&sum_axis0(value), target),
                }
            } else if rv < rt {
                // Target is wider: replicate value under each element of the
                // new leading axis and let the recursion align the rest.
                let out: Result<Vec<NdArray>> = bv.iter().map(|t| broadcast(value, t)).collect();
                Ok(NdArray::Array(out?))
            } else if av.len() == bv.len() {
                let out: Result<Vec<NdArray>> =
                    av.iter().zip(bv).map(|(v, t)| broadcast(v, t)).collect();
                Ok(NdArray::Array(out?))
            } else if bv.len() == 1 {
                broadcast(&NdArray::Array(vec![sum_axis0(value)]), target)
            } else if av.len() == 1 {
                let out: Result<Vec<NdArray>> = bv.iter().map(|t| broadcast(&av[0], t)).collect();
                Ok(NdArray::Array(out?))
            } else {
                Err(FaradError::NotBroadcastable { from: vs, to: ts })
            }
        }
        // Scalar onto scalar with unequal shapes cannot occur; both are [1].
        (NdArray::Scalar(_), NdArray::Scalar(_)) => Ok(value.clone()),
    }
}

/// Add leading axes to `value` until its rank matches `target`'s, replicating
/// once per index of each new axis. Never sums. Trailing axes are left for
/// the consumer to validate.
pub fn broadcast_up(value: &NdArray, target: &NdArray) -> NdArray {
    if value.rank() >= target.rank() {
        return value.clone();
    }
    match target {
        NdArray::Array(items) => {
            NdArray::Array(items.iter().map(|t| broadcast_up(value, t)).collect())
        }
        NdArray::Scalar(_) => value.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vector_replicates_into_matrix_rows() {
        let v: NdArray = vec![10.0, 20.0].into();
        let m: NdArray = vec![vec![1.0, 2.0], vec![3.0, 4.0]].into();
        let out = broadcast(&v, &m).unwrap();
        assert_eq!(out.shape(), vec![2, 2]);
        assert_eq!(out.flatten(), vec![10.0, 20.0, 10.0, 20.0]);
    }

    #[test]
    fn matrix_contracts_onto_vector_by_column_sums() {
        let m: NdArray = vec![vec![1.0, 2.0], vec![3.0, 4.0]].into();
        let v: NdArray = vec![0.0, 0.0].into();
        let out = broadcast(&m, &v).unwrap();
        assert_eq!(out.flatten(), vec![4.0, 6.0]);
    }

    #[test]
    fn matrix_contracts_onto_scalar_by_total_sum() {
        let m: NdArray = vec![vec![1.0, 2.0], vec![3.0, 4.0]].into();
        let out = broadcast(&m, &NdArray::Scalar(0.0)).unwrap();
        assert_eq!(out, NdArray::Scalar(10.0));
    }

    #[test]
    fn scalar_replicates_everywhere() {
        let m: NdArray = vec![vec![0.0, 0.0, 0.0], vec![0.0, 0.0, 0.0]].into();
        let out = broadcast(&NdArray::Scalar(7.0), &m).unwrap();
        assert_eq!(out.shape(), vec![2, 3]);
        assert!(out.flatten().iter().all(|&v| v == 7.0));
    }

    #[test]
    fn leading_batch_axis_is_summed_away() {
        // [2, 2, 3] onto [2, 3]: the batch axis collapses.
        let batched: NdArray = vec![
            vec![vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]],
            vec![vec![10.0, 20.0, 30.0], vec![40.0, 50.0, 60.0]],
        ]
        .into();
        let target = NdArray::zeros(&[2, 3]);
        let out = broadcast(&batched, &target).unwrap();
        assert_eq!(out.shape(), vec![2, 3]);
        assert_eq!(out.flatten(), vec![11.0, 22.0, 33.0, 44.0, 55.0, 66.0]);
    }

    #[test]
    fn unit_unit_gradient_expands_onto_a_vector() {
        // The shape a scalar loss hands back through an unsqueezed reduce
        // axis: no window of [3] exists in [1, 1], so the outer unit axis
        // collapses first and the length-1 rule finishes the job.
        let seed = NdArray::ones(&[1, 1]);
        let target = NdArray::zeros(&[3]);
        let out = broadcast(&seed, &target).unwrap();
        assert_eq!(out.shape(), vec![3]);
        assert_eq!(out.flatten(), vec![1.0, 1.0, 1.0]);
    }

    #[test]
    fn sideways_unit_axis_contracts_and_expands() {
        let wide: NdArray = vec![vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]].into();
        let narrow = NdArray::zeros(&[1, 3]);
        let contracted = broadcast(&wide, &narrow).unwrap();
        assert_eq!(contracted.shape(), vec![1, 3]);
        assert_eq!(contracted.flatten(), vec![5.0, 7.0, 9.0]);

        let unit: NdArray = vec![vec![1.0, 2.0, 3.0]].into();
        let expanded = broadcast(&unit, &wide).unwrap();
        assert_eq!(expanded.shape(), vec![2, 3]);
        assert_eq!(expanded.flatten(), vec![1.0, 2.0, 3.0, 1.0, 2.0, 3.0]);
    }

    #[test]
    fn misaligned_shapes_are_rejected() {
        let a: NdArray = vec![vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]].into();
        let b: NdArray = vec![1.0, 2.0, 3.0, 4.0].into();
        assert!(matches!(
            broadcast(&a, &b),
            Err(FaradError::NotBroadcastable { .. })
        ));
    }

    #[test]
    fn broadcast_up_adds_leading_axes_only() {
        let w: NdArray = vec![vec![1.0, 2.0], vec![3.0, 4.0]].into();
        let batch = NdArray::zeros(&[3, 2, 2]);
        let lifted = broadcast_up(&w, &batch);
        assert_eq!(lifted.shape(), vec![3, 2, 2]);
        for chunk in lifted.as_slice() {
            assert_eq!(chunk, &w);
        }
        // Equal rank passes through untouched, even when shapes differ.
        assert_eq!(broadcast_up(&w, &NdArray::zeros(&[5, 5])), w);
    }
}
