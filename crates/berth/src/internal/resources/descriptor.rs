use crate::internal::common::Map;
use crate::internal::range::{self, ValueRange};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum DiskType {
    #[default]
    Hdd,
    Ssd,
}

/// Declared port need of one labelled port group.
/// `start == 0` means "any/dynamic"; a nonzero `start` pins a fixed
/// static range `[start, start + count - 1]`.
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq, Eq)]
pub struct PortDefinition {
    pub start: i32,
    pub count: i32,
}

impl PortDefinition {
    #[inline]
    pub fn is_dynamic(&self) -> bool {
        self.start == 0
    }

    pub fn static_range(&self) -> Option<ValueRange> {
        (!self.is_dynamic() && self.count > 0)
            .then(|| ValueRange::new(self.start, self.start + self.count - 1))
    }
}

/// Composite resource vector used both as a demand (task request) and
/// as an availability (node capacity).
///
/// GPU semantics: each set bit in `gpu_attribute` is one reserved
/// physical device slot. A zero mask with nonzero `gpu_number` means
/// "GPUs requested but not yet pinned to specific devices"; a nonzero
/// mask always satisfies `gpu_attribute.count_ones() == gpu_number`.
///
/// Port semantics: `port_ranges` holds concrete ports already fixed,
/// `port_number` the dynamic port count still to be resolved. The two
/// are resolved together; a descriptor never carries both a positive
/// `port_number` and freshly resolved ranges pending application.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct ResourceDescriptor {
    pub cpu_number: i32,
    pub memory_mb: i32,
    pub disk_mb: i32,
    pub disk_type: DiskType,
    pub gpu_number: u32,
    pub gpu_attribute: u64,
    pub port_definitions: Map<String, PortDefinition>,
    pub port_ranges: Vec<ValueRange>,
    pub port_number: i32,
}

impl ResourceDescriptor {
    /// Builds a descriptor, deriving `port_ranges` / `port_number` from
    /// the declared port definitions.
    pub fn new(
        cpu_number: i32,
        memory_mb: i32,
        disk_mb: i32,
        disk_type: DiskType,
        gpu_number: u32,
        gpu_attribute: u64,
        port_definitions: Map<String, PortDefinition>,
    ) -> Self {
        debug_assert!(gpu_attribute == 0 || gpu_attribute.count_ones() == gpu_number);
        let mut static_ranges = Vec::new();
        let mut dynamic = 0;
        for def in port_definitions.values() {
            match def.static_range() {
                Some(range) => static_ranges.push(range),
                None => dynamic += def.count,
            }
        }
        ResourceDescriptor {
            cpu_number,
            memory_mb,
            disk_mb,
            disk_type,
            gpu_number,
            gpu_attribute,
            port_definitions,
            port_ranges: range::coalesce(&static_ranges),
            port_number: dynamic,
        }
    }

    #[inline]
    pub fn has_unresolved_ports(&self) -> bool {
        self.port_number > 0
    }

    #[inline]
    pub fn has_unpinned_gpus(&self) -> bool {
        self.gpu_number > 0 && self.gpu_attribute == 0
    }

    /// Component-wise sum. GPU count is exact (popcount of the merged
    /// mask) only when both sides carry a nonzero mask; with an
    /// unpinned side it falls back to the plain sum, which may
    /// overestimate when the unpinned devices overlap.
    pub fn add(&self, rhs: &ResourceDescriptor) -> ResourceDescriptor {
        let gpu_attribute = self.gpu_attribute | rhs.gpu_attribute;
        let gpu_number = if self.gpu_attribute != 0 && rhs.gpu_attribute != 0 {
            gpu_attribute.count_ones()
        } else {
            self.gpu_number + rhs.gpu_number
        };
        let port_ranges = range::union(&self.port_ranges, &rhs.port_ranges);
        let port_number = range::count(&port_ranges) as i32;
        ResourceDescriptor {
            cpu_number: self.cpu_number + rhs.cpu_number,
            memory_mb: self.memory_mb + rhs.memory_mb,
            disk_mb: self.disk_mb + rhs.disk_mb,
            disk_type: self.disk_type,
            gpu_number,
            gpu_attribute,
            port_definitions: self.port_definitions.clone(),
            port_ranges,
            port_number,
        }
    }

    /// Component-wise difference; the mirror image of [`Self::add`],
    /// including the may-underestimate fallback for unpinned GPUs.
    pub fn subtract(&self, rhs: &ResourceDescriptor) -> ResourceDescriptor {
        let gpu_attribute = self.gpu_attribute & !rhs.gpu_attribute;
        let gpu_number = if self.gpu_attribute != 0 && rhs.gpu_attribute != 0 {
            gpu_attribute.count_ones()
        } else {
            self.gpu_number.saturating_sub(rhs.gpu_number)
        };
        let port_ranges = range::subtract(&self.port_ranges, &rhs.port_ranges);
        let port_number = range::count(&port_ranges) as i32;
        ResourceDescriptor {
            cpu_number: self.cpu_number - rhs.cpu_number,
            memory_mb: self.memory_mb - rhs.memory_mb,
            disk_mb: self.disk_mb - rhs.disk_mb,
            disk_type: self.disk_type,
            gpu_number,
            gpu_attribute,
            port_definitions: self.port_definitions.clone(),
            port_ranges,
            port_number,
        }
    }

    /// Ascending sort key ordering availabilities least-first, the
    /// "job packing" preference of the selection pipeline.
    pub fn packing_key(&self) -> (u32, i32, i32) {
        (self.gpu_number, self.cpu_number, self.memory_mb)
    }

    /// True iff this demand can be satisfied from `bigger`. Pinned GPU
    /// devices must all be present in the bigger mask; port ranges must
    /// be fully covered. Disk is deliberately not part of the check, it
    /// is relaxable at the resource manager.
    pub fn fits_in(&self, bigger: &ResourceDescriptor) -> bool {
        self.memory_mb <= bigger.memory_mb
            && self.cpu_number <= bigger.cpu_number
            && self.gpu_number <= bigger.gpu_number
            && (self.gpu_attribute & bigger.gpu_attribute) == self.gpu_attribute
            && range::fits_in(&self.port_ranges, &bigger.port_ranges)
    }
}

impl std::fmt::Display for ResourceDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[cpu: {}, mem: {}MB, disk: {}MB, gpu: {} (0x{:x}), ports: {:?}+{}]",
            self.cpu_number,
            self.memory_mb,
            self.disk_mb,
            self.gpu_number,
            self.gpu_attribute,
            self.port_ranges,
            self.port_number
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    impl ResourceDescriptor {
        pub fn simple(cpu_number: i32, memory_mb: i32) -> Self {
            ResourceDescriptor {
                cpu_number,
                memory_mb,
                ..Default::default()
            }
        }

        pub fn with_gpus(mut self, gpu_number: u32, gpu_attribute: u64) -> Self {
            self.gpu_number = gpu_number;
            self.gpu_attribute = gpu_attribute;
            self
        }

        pub fn with_ports(mut self, ranges: &[(i32, i32)]) -> Self {
            self.port_ranges = ranges
                .iter()
                .map(|&(b, e)| ValueRange::new(b, e))
                .collect();
            self
        }

        pub fn with_dynamic_ports(mut self, count: i32) -> Self {
            self.port_number = count;
            self
        }
    }

    fn defs(entries: &[(&str, i32, i32)]) -> Map<String, PortDefinition> {
        entries
            .iter()
            .map(|&(label, start, count)| (label.to_string(), PortDefinition { start, count }))
            .collect()
    }

    #[test]
    fn test_new_derives_ports() {
        let rd = ResourceDescriptor::new(
            1,
            1024,
            0,
            DiskType::Hdd,
            0,
            0,
            defs(&[("web", 8080, 2), ("worker", 0, 3), ("debug", 0, 1)]),
        );
        assert_eq!(rd.port_ranges, vec![ValueRange::new(8080, 8081)]);
        assert_eq!(rd.port_number, 4);
    }

    #[test]
    fn test_add_pinned_gpus() {
        let a = ResourceDescriptor::simple(2, 1024).with_gpus(2, 0b0011);
        let b = ResourceDescriptor::simple(1, 512).with_gpus(1, 0b0100);
        let sum = a.add(&b);
        assert_eq!(sum.cpu_number, 3);
        assert_eq!(sum.memory_mb, 1536);
        assert_eq!(sum.gpu_attribute, 0b0111);
        assert_eq!(sum.gpu_number, 3);
    }

    #[test]
    fn test_add_unpinned_gpus_falls_back_to_sum() {
        let a = ResourceDescriptor::simple(1, 0).with_gpus(2, 0);
        let b = ResourceDescriptor::simple(1, 0).with_gpus(1, 0b0100);
        let sum = a.add(&b);
        assert_eq!(sum.gpu_number, 3);
        assert_eq!(sum.gpu_attribute, 0b0100);
    }

    #[test]
    fn test_subtract() {
        let a = ResourceDescriptor::simple(4, 4096)
            .with_gpus(3, 0b0111)
            .with_ports(&[(5000, 5005)]);
        let b = ResourceDescriptor::simple(1, 1024)
            .with_gpus(1, 0b0001)
            .with_ports(&[(5002, 5003)]);
        let diff = a.subtract(&b);
        assert_eq!(diff.cpu_number, 3);
        assert_eq!(diff.memory_mb, 3072);
        assert_eq!(diff.gpu_attribute, 0b0110);
        assert_eq!(diff.gpu_number, 2);
        assert_eq!(
            diff.port_ranges,
            vec![ValueRange::new(5000, 5001), ValueRange::new(5004, 5005)]
        );
    }

    #[test]
    fn test_subtract_unpinned_saturates() {
        let a = ResourceDescriptor::simple(1, 0).with_gpus(1, 0);
        let b = ResourceDescriptor::simple(1, 0).with_gpus(2, 0);
        assert_eq!(a.subtract(&b).gpu_number, 0);
    }

    #[test]
    fn test_packing_key_orders_busier_first() {
        let busy = ResourceDescriptor::simple(2, 1024);
        let idle = ResourceDescriptor::simple(8, 8192);
        assert!(busy.packing_key() < idle.packing_key());

        let no_gpu = ResourceDescriptor::simple(2, 1024);
        let gpu = ResourceDescriptor::simple(2, 1024).with_gpus(1, 0b1);
        assert!(no_gpu.packing_key() < gpu.packing_key());
    }

    #[test]
    fn test_fits_in() {
        let node = ResourceDescriptor::simple(8, 16384)
            .with_gpus(4, 0b1111)
            .with_ports(&[(5000, 5100)]);

        let small = ResourceDescriptor::simple(2, 1024).with_gpus(2, 0b0011);
        assert!(small.fits_in(&node));

        let too_much_mem = ResourceDescriptor::simple(1, 32768);
        assert!(!too_much_mem.fits_in(&node));

        let wrong_devices = ResourceDescriptor::simple(1, 1024).with_gpus(2, 0b11000);
        assert!(!wrong_devices.fits_in(&node));

        let bad_ports = ResourceDescriptor::simple(1, 1024).with_ports(&[(4999, 5000)]);
        assert!(!bad_ports.fits_in(&node));

        let good_ports = ResourceDescriptor::simple(1, 1024).with_ports(&[(5050, 5060)]);
        assert!(good_ports.fits_in(&node));
    }
}
