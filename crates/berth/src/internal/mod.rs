pub mod common;
pub mod range;
pub mod resources;
pub mod selector;
