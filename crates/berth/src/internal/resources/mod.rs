pub mod descriptor;
pub mod gpu;
pub mod ports;
