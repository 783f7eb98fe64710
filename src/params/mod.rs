//! Model parameters and their aggregation
//!
//! Defines the tensor/parameter-set data model exchanged with workers and the
//! federated averaging step that reduces a round's responses to new global
//! parameters.

mod aggregate;
mod tensor;

pub use aggregate::*;
pub use tensor::*;
