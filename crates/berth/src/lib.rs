pub mod internal;

pub use crate::internal::common::{Map, Set};

pub type Error = internal::common::error::SelectionError;
pub type Result<T> = std::result::Result<T, Error>;

pub mod range {
    pub use crate::internal::range::{
        ValueRange, coalesce, count, fits_in, intersect, sub_range_randomly,
        sub_range_sequentially, subtract, union, value_at,
    };
}

pub mod resources {
    pub use crate::internal::resources::descriptor::{
        DiskType, PortDefinition, ResourceDescriptor,
    };
    pub use crate::internal::resources::gpu::{
        GpuPicker, MAX_GPUS_PER_NODE, pick_lowest_bits,
    };
    pub use crate::internal::resources::ports::{decode_port_string, encode_port_assignment};
}

pub mod selector {
    pub use crate::internal::selector::manager::{
        CandidateHosts, SelectionManager, SelectionRequest, SelectionResult,
        SharedSelectionManager,
    };
    pub use crate::internal::selector::node::{Node, NodeInventory};
    pub use crate::internal::selector::policy::SelectionPolicy;
}
