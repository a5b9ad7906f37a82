pub(crate) mod data_structures;
pub mod error;

pub use data_structures::{Map, Set};
