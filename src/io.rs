//! Snapshot boundary for persistence.
//!
//! The core owns no file format. It exchanges plain snapshots (nested data
//! plus scalar flags and optimizer moments) with an external persistence
//! layer; graph edges, gradients, and producing operations deliberately do
//! not survive the round trip, so a restored tensor is always a clean leaf.

use bincode::{Decode, Encode};

use crate::error::{FaradError, Result};
use crate::ndarray::NdArray;
use crate::tensor::{RawTensor, Tensor};

/// Plain data snapshot of one tensor.
#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub struct TensorSnapshot {
    pub data: NdArray,
    pub requires_grad: bool,
    pub m: Option<NdArray>,
    pub v: Option<NdArray>,
}

impl TensorSnapshot {
    pub fn from_tensor(tensor: &Tensor) -> Self {
        let t = tensor.borrow();
        TensorSnapshot {
            data: t.data.clone(),
            requires_grad: t.requires_grad,
            m: t.m.clone(),
            v: t.v.clone(),
        }
    }

    /// Rebuild a leaf tensor, validating the nested data like any other
    /// caller-supplied construction.
    ///
    /// # Errors
    /// Rejects ragged or mixed nesting.
    pub fn to_tensor(&self) -> Result<Tensor> {
        let tensor = RawTensor::new(self.data.clone(), self.requires_grad)?;
        {
            let mut t = tensor.borrow_mut();
            t.m = self.m.clone();
            t.v = self.v.clone();
        }
        Ok(tensor)
    }

    /// Encode with bincode's standard configuration.
    ///
    /// # Errors
    /// `Serialization` on encoder failure.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        bincode::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| FaradError::Serialization(e.to_string()))
    }

    /// # Errors
    /// `Serialization` when the buffer does not decode to a snapshot.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let (snapshot, _) = bincode::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| FaradError::Serialization(e.to_string()))?;
        Ok(snapshot)
    }
}
