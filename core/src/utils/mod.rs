//! Small collection types shared across the range algebra and the solver.

pub mod indexing;

pub use indexing::{Idx, IndexVec, IndexedVecError};
