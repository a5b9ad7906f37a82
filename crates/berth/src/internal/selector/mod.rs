pub mod manager;
pub mod node;
pub mod policy;
