use crate::autograd::GradFn;
use crate::error::{FaradError, Result};
use crate::ndarray::{NdArray, zip_congruent, zip_map};
use crate::tensor::{RawTensor, Tensor};

/// Gradient function for index gathers.
///
/// Backward scatters the upstream gradient into a zero tensor at the gathered
/// positions, accumulating rather than overwriting so repeated indices sum
/// their contributions (a row gathered twice must receive both gradients).
pub struct AtGradFn {
    input: Tensor,
    input_shape: Vec<usize>,
    idx1: Vec<usize>,
    idx2: Option<Vec<usize>>,
}

impl GradFn for AtGradFn {
    fn backward(&self, out_grad: &NdArray, output: &Tensor) -> Result<()> {
        if !self.input.borrow().requires_grad {
            return Ok(());
        }
        let mut g = NdArray::zeros(&self.input_shape);
        for (i, picked_grad) in out_grad.as_slice().iter().enumerate() {
            match &self.idx2 {
                None => {
                    let slot = &mut g.as_slice_mut()[self.idx1[i]];
                    *slot = zip_congruent(slot, picked_grad, |a, b| a + b);
                }
                Some(idx2) => {
                    let row = &mut g.as_slice_mut()[self.idx1[i]];
                    let slot = &mut row.as_slice_mut()[idx2[i]];
                    *slot = zip_congruent(slot, picked_grad, |a, b| a + b);
                }
            }
        }
        RawTensor::backward_from(&self.input, &g, Some(output))
    }

    fn clone_box(&self) -> Box<dyn GradFn> {
        Box::new(AtGradFn {
            input: self.input.clone(),
            input_shape: self.input_shape.clone(),
            idx1: self.idx1.clone(),
            idx2: self.idx2.clone(),
        })
    }
}

/// Gather by flat index lists.
///
/// With one list, `out[i] = data[idx1[i]]`, one row per index. With two,
/// `out[i] = data[idx1[i]][idx2[i]]`. Indices may repeat; the output always
/// has the index list's length as its leading axis.
///
/// # Errors
/// `IndexOutOfBounds` for indices past the gathered axis, `InvalidParameter`
/// when the two index lists differ in length.
pub fn at(input: &Tensor, idx1: &[usize], idx2: Option<&[usize]>) -> Result<Tensor> {
    let (input_data, input_shape, requires_grad) = {
        let t = input.borrow();
        (t.data.clone(), t.shape.clone(), t.requires_grad)
    };
    let rows = input_data.as_slice();

    let picked: Vec<NdArray> = match idx2 {
        None => idx1
            .iter()
            .map(|&i| {
                rows.get(i).cloned().ok_or(FaradError::IndexOutOfBounds {
                    index: i,
                    len: rows.len(),
                })
            })
            .collect::<Result<_>>()?,
        Some(idx2) => {
            if idx2.len() != idx1.len() {
                return Err(FaradError::InvalidParameter(format!(
                    "Index lists must have equal lengths, got {} and {}",
                    idx1.len(),
                    idx2.len()
                )));
            }
            idx1.iter()
                .zip(idx2)
                .map(|(&i, &j)| {
                    let row = rows.get(i).ok_or(FaradError::IndexOutOfBounds {
                        index: i,
                        len: rows.len(),
                    })?;
                    let cols = row.as_slice();
                    cols.get(j).cloned().ok_or(FaradError::IndexOutOfBounds {
                        index: j,
                        len: cols.len(),
                    })
                })
                .collect::<Result<_>>()?
        }
    };

    let out = RawTensor::from_op(NdArray::Array(picked), requires_grad);
    if requires_grad {
        RawTensor::attach(
            &out,
            &[input],
            Box::new(AtGradFn {
                input: input.clone(),
                input_shape,
                idx1: idx1.to_vec(),
                idx2: idx2.map(<[usize]>::to_vec),
            }),
        );
    }
    Ok(out)
}

/// Gradient function for masked fill. Keeps the 0/1 pass-through mask
/// computed at forward time; filled positions block the gradient.
pub struct MaskedFillGradFn {
    input: Tensor,
    keep: NdArray,
}

impl GradFn for MaskedFillGradFn {
    fn backward(&self, out_grad: &NdArray, output: &Tensor) -> Result<()> {
        if !self.input.borrow().requires_grad {
            return Ok(());
        }
        let g = zip_congruent(out_grad, &self.keep, |g, k| g * k);
        RawTensor::backward_from(&self.input, &g, Some(output))
    }

    fn clone_box(&self) -> Box<dyn GradFn> {
        Box::new(MaskedFillGradFn {
            input: self.input.clone(),
            keep: self.keep.clone(),
        })
    }
}

/// Replace every element whose mask counterpart satisfies `predicate` with
/// `value`. The mask aligns to the input by the same structural broadcast as
/// other elementwise ops, so one lower-rank mask (a causal triangle, say)
/// covers every leading batch axis of the input. The predicate runs once per
/// aligned element at forward time; the mask is a constant boundary and
/// never becomes a graph parent.
///
/// # Errors
/// `NotBroadcastable` when no alignment exists, `ShapeMismatch` when the
/// mask is wider than the input (the output never outgrows the input).
pub fn masked_fill<P: Fn(f64) -> bool>(
    input: &Tensor,
    mask: &Tensor,
    predicate: P,
    value: f64,
) -> Result<Tensor> {
    let (input_data, input_shape, requires_grad) = {
        let t = input.borrow();
        (t.data.clone(), t.shape.clone(), t.requires_grad)
    };
    let (mask_data, mask_shape) = {
        let m = mask.borrow();
        (m.data.clone(), m.shape.clone())
    };

    // 1 where gradient may flow, 0 where the fill value wins. The zip
    // carries the mask across the input's extra axes and replicates its
    // length-1 axes, landing keep on the input's own shape.
    let keep = zip_map(&input_data, &mask_data, |_, m| {
        if predicate(m) { 0.0 } else { 1.0 }
    })?;
    if keep.shape() != input_shape {
        return Err(FaradError::ShapeMismatch {
            left: input_shape,
            right: mask_shape,
        });
    }
    let data = zip_congruent(&input_data, &keep, |x, k| if k == 0.0 { value } else { x });
    let out = RawTensor::from_op(data, requires_grad);

    if requires_grad {
        RawTensor::attach(
            &out,
            &[input],
            Box::new(MaskedFillGradFn {
                input: input.clone(),
                keep,
            }),
        );
    }
    Ok(out)
}
