/// Hard ceiling of addressable GPU device slots per node, given by the
/// width of the `gpu_attribute` bitmask.
pub const MAX_GPUS_PER_NODE: u32 = 64;

/// Strategy picking `count` concrete GPU devices out of an availability
/// bitmask. Returns the chosen bits, always a subset of `available`.
///
/// Kept as a plain function pointer so a topology-aware implementation
/// can be plugged into the selection pipeline without touching it.
pub type GpuPicker = fn(available: u64, count: u32) -> u64;

/// Default picker: greedily takes the lowest set bit `count` times.
/// Not topology-aware; returns fewer bits than requested when the mask
/// runs out (callers check `count_ones`).
pub fn pick_lowest_bits(available: u64, count: u32) -> u64 {
    let mut remaining = available;
    let mut picked = 0u64;
    for _ in 0..count {
        if remaining == 0 {
            break;
        }
        let without_lowest = remaining & (remaining - 1);
        picked |= remaining ^ without_lowest;
        remaining = without_lowest;
    }
    picked
}
