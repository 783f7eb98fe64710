//! Federated averaging
//!
//! Unweighted FedAvg: every responding worker gets one vote regardless of how
//! much data it trained on. Sums are accumulated in `f64` and the mean is cast
//! back to the working [`Scalar`] type.

use crate::error::{Error, Result};

use super::{ParameterSet, Scalar, Tensor};

/// f64 mirror of a tensor used while summing
enum Accumulator {
    Scalar(f64),
    Array(Vec<Accumulator>),
}

impl Accumulator {
    fn from_tensor(tensor: &Tensor) -> Self {
        match tensor {
            Tensor::Scalar(v) => Accumulator::Scalar(f64::from(*v)),
            Tensor::Array(items) => {
                Accumulator::Array(items.iter().map(Accumulator::from_tensor).collect())
            }
        }
    }

    /// Add `tensor` elementwise; `false` if the shapes disagree
    fn add(&mut self, tensor: &Tensor) -> bool {
        match (self, tensor) {
            (Accumulator::Scalar(sum), Tensor::Scalar(v)) => {
                *sum += f64::from(*v);
                true
            }
            (Accumulator::Array(sums), Tensor::Array(items)) => {
                sums.len() == items.len()
                    && sums.iter_mut().zip(items).all(|(sum, item)| sum.add(item))
            }
            _ => false,
        }
    }

    fn into_mean(self, count: f64) -> Tensor {
        match self {
            Accumulator::Scalar(sum) => Tensor::Scalar((sum / count) as Scalar),
            Accumulator::Array(sums) => {
                Tensor::Array(sums.into_iter().map(|s| s.into_mean(count)).collect())
            }
        }
    }
}

/// Elementwise arithmetic mean of `sets`, tensor by tensor
///
/// Fails with [`Error::EmptyAggregation`] for an empty input and with
/// [`Error::ShapeMismatch`] when a set does not match the first one.
pub fn average(sets: &[ParameterSet]) -> Result<ParameterSet> {
    let (first, rest) = sets.split_first().ok_or(Error::EmptyAggregation)?;

    if rest.is_empty() {
        return Ok(first.clone());
    }

    let mut sums: Vec<Accumulator> = first.tensors().iter().map(Accumulator::from_tensor).collect();

    for (offset, set) in rest.iter().enumerate() {
        let matches = set.len() == sums.len()
            && sums.iter_mut().zip(set.tensors()).all(|(sum, tensor)| sum.add(tensor));
        if !matches {
            return Err(Error::ShapeMismatch { index: offset + 1 });
        }
    }

    let count = sets.len() as f64;
    Ok(ParameterSet(
        sums.into_iter().map(|sum| sum.into_mean(count)).collect(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scalar_at(set: &ParameterSet, tensor: usize, path: &[usize]) -> Scalar {
        let mut current = &set.tensors()[tensor];
        for &i in path {
            current = match current {
                Tensor::Array(items) => &items[i],
                Tensor::Scalar(_) => panic!("path descends into a scalar"),
            };
        }
        match current {
            Tensor::Scalar(v) => *v,
            Tensor::Array(_) => panic!("path ends at an array"),
        }
    }

    #[test]
    fn test_average_two_sets() {
        let a = ParameterSet(vec![vec![2.0f32].into()]);
        let b = ParameterSet(vec![vec![4.0f32].into()]);

        let avg = average(&[a, b]).unwrap();
        assert_eq!(avg, ParameterSet(vec![vec![3.0f32].into()]));
    }

    #[test]
    fn test_average_is_elementwise_per_tensor() {
        let a = ParameterSet(vec![
            vec![vec![1.0f32, 2.0], vec![3.0, 4.0]].into(),
            vec![10.0f32].into(),
        ]);
        let b = ParameterSet(vec![
            vec![vec![3.0f32, 4.0], vec![5.0, 6.0]].into(),
            vec![20.0f32].into(),
        ]);
        let c = ParameterSet(vec![
            vec![vec![5.0f32, 0.0], vec![1.0, 2.0]].into(),
            vec![60.0f32].into(),
        ]);

        let avg = average(&[a, b, c]).unwrap();

        assert!((scalar_at(&avg, 0, &[0, 0]) - 3.0).abs() < 1e-6);
        assert!((scalar_at(&avg, 0, &[0, 1]) - 2.0).abs() < 1e-6);
        assert!((scalar_at(&avg, 0, &[1, 0]) - 3.0).abs() < 1e-6);
        assert!((scalar_at(&avg, 0, &[1, 1]) - 4.0).abs() < 1e-6);
        assert!((scalar_at(&avg, 1, &[0]) - 30.0).abs() < 1e-6);
    }

    #[test]
    fn test_average_single_set_is_identity() {
        let only = ParameterSet(vec![
            vec![0.1f32, 0.2, 0.3].into(),
            vec![vec![1e-7f32], vec![-3.5]].into(),
        ]);

        let avg = average(std::slice::from_ref(&only)).unwrap();
        assert_eq!(avg, only);
        assert_eq!(avg.fingerprint(), only.fingerprint());
    }

    #[test]
    fn test_average_accumulates_in_double_precision() {
        // 1e8 + 1 is not representable in f32; an f32 running sum would drift
        let sets: Vec<ParameterSet> = [1.0e8f32, 1.0, -1.0e8, 1.0]
            .iter()
            .map(|v| ParameterSet(vec![vec![*v].into()]))
            .collect();

        let avg = average(&sets).unwrap();
        assert_eq!(scalar_at(&avg, 0, &[0]), 0.5);
    }

    #[test]
    fn test_average_empty_input() {
        assert!(matches!(average(&[]), Err(Error::EmptyAggregation)));
    }

    #[test]
    fn test_average_shape_mismatch() {
        let a = ParameterSet(vec![vec![1.0f32, 2.0].into()]);
        let b = ParameterSet(vec![vec![1.0f32, 2.0].into()]);
        let c = ParameterSet(vec![vec![1.0f32].into()]);

        match average(&[a, b, c]) {
            Err(Error::ShapeMismatch { index }) => assert_eq!(index, 2),
            other => panic!("expected shape mismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_average_of_empty_sets() {
        let avg = average(&[ParameterSet::empty(), ParameterSet::empty()]).unwrap();
        assert!(avg.is_empty());
    }
}
