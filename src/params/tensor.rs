//! Tensor and parameter set data model
//!
//! A parameter set is the flattened list of a model's trainable weights as
//! workers serialize it: each tensor is a (possibly nested) JSON array of
//! numbers. The coordinator never interprets the weights beyond averaging them.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Working numeric type of parameters on the wire and in memory
pub type Scalar = f32;

/// One tensor: a number or a nested sequence of tensors
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Tensor {
    Scalar(Scalar),
    Array(Vec<Tensor>),
}

impl Tensor {
    /// Whether two tensors have the same nesting and lengths at every level
    pub fn same_shape(&self, other: &Tensor) -> bool {
        match (self, other) {
            (Tensor::Scalar(_), Tensor::Scalar(_)) => true,
            (Tensor::Array(a), Tensor::Array(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.same_shape(y))
            }
            _ => false,
        }
    }

    /// Number of scalar values in the tensor
    pub fn element_count(&self) -> usize {
        match self {
            Tensor::Scalar(_) => 1,
            Tensor::Array(items) => items.iter().map(Tensor::element_count).sum(),
        }
    }

    fn feed_bytes(&self, hasher: &mut Sha256) {
        match self {
            Tensor::Scalar(v) => hasher.update(v.to_le_bytes()),
            Tensor::Array(items) => {
                hasher.update((items.len() as u64).to_le_bytes());
                for item in items {
                    item.feed_bytes(hasher);
                }
            }
        }
    }
}

impl From<Scalar> for Tensor {
    fn from(value: Scalar) -> Self {
        Tensor::Scalar(value)
    }
}

impl<T: Into<Tensor>> From<Vec<T>> for Tensor {
    fn from(items: Vec<T>) -> Self {
        Tensor::Array(items.into_iter().map(Into::into).collect())
    }
}

/// Ordered sequence of tensors making up one model's weights
///
/// The empty set is the "no prior parameters" sentinel sent in the first round
/// of a session; workers answer it with their locally initialized model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParameterSet(pub Vec<Tensor>);

impl ParameterSet {
    /// The "no prior parameters" sentinel
    pub fn empty() -> Self {
        Self(Vec::new())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of tensors
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn tensors(&self) -> &[Tensor] {
        &self.0
    }

    /// Total number of scalar weights across all tensors
    pub fn element_count(&self) -> usize {
        self.0.iter().map(Tensor::element_count).sum()
    }

    /// Same tensor count and per-tensor shape
    pub fn same_shape(&self, other: &ParameterSet) -> bool {
        self.0.len() == other.0.len() && self.0.iter().zip(&other.0).all(|(a, b)| a.same_shape(b))
    }

    /// Short SHA-256 digest of the exact weights, for correlating rounds in logs
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update((self.0.len() as u64).to_le_bytes());
        for tensor in &self.0 {
            tensor.feed_bytes(&mut hasher);
        }
        hex::encode(&hasher.finalize()[..8])
    }
}

impl From<Vec<Tensor>> for ParameterSet {
    fn from(tensors: Vec<Tensor>) -> Self {
        Self(tensors)
    }
}

impl fmt::Display for ParameterSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            write!(f, "<empty>")
        } else {
            write!(
                f,
                "{} tensors / {} weights ({})",
                self.len(),
                self.element_count(),
                self.fingerprint()
            )
        }
    }
}
