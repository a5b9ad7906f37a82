use crate::internal::common::error::SelectionError;
use crate::internal::common::{Map, Set};
use crate::internal::range::{self, ValueRange};
use crate::internal::resources::descriptor::ResourceDescriptor;
use crate::internal::resources::gpu::{GpuPicker, MAX_GPUS_PER_NODE, pick_lowest_bits};
use crate::internal::selector::node::{Node, NodeInventory};
use crate::internal::selector::policy::SelectionPolicy;
use rand::SeedableRng;
use rand::rngs::SmallRng;
use rand::seq::{IndexedRandom, SliceRandom};
use serde::{Deserialize, Serialize};
use smallvec::{SmallVec, smallvec};
use std::sync::{Mutex, MutexGuard, PoisonError};

pub type CandidateHosts = SmallVec<[String; 8]>;

/// One placement query for a task role.
#[derive(Debug, Clone)]
pub struct SelectionRequest {
    pub role: String,
    pub resource: ResourceDescriptor,
    /// Required node-label partition; `None` targets the reserved
    /// "no label" partition.
    pub node_label: Option<String>,
    /// Comma-separated GPU-type allow-list. Non-relaxable: when set and
    /// no node matches, the selection fails instead of falling through.
    pub gpu_type: Option<String>,
    /// Tasks of this role currently in "start" state; sizes both the
    /// candidate pool and the same-port-allocation cohort countdown.
    pub start_state_task_count: u32,
    /// GPUs the whole job requests cluster-wide, consumed by the
    /// non-GPU-job anti-affinity filter.
    pub job_total_gpu_count: u32,
    /// Previously associated ports for a same-port-allocation role.
    pub ports_to_reuse: Vec<ValueRange>,
}

impl SelectionRequest {
    pub fn new(role: &str, resource: ResourceDescriptor) -> Self {
        SelectionRequest {
            role: role.to_string(),
            resource,
            node_label: None,
            gpu_type: None,
            start_state_task_count: 1,
            job_total_gpu_count: 0,
            ports_to_reuse: Vec::new(),
        }
    }
}

/// Outcome of one pipeline run. All descriptors are owned copies; the
/// manager's internal state is never aliased out.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SelectionResult {
    pub candidates: CandidateHosts,
    /// Concrete GPU devices per surviving host, filled only when the
    /// request came in with an unpinned GPU demand.
    pub gpu_assignments: Map<String, u64>,
    /// Port-range intersection common to all surviving hosts.
    pub overlap_ports: Vec<ValueRange>,
    /// The request resource with ports and (for single-node selection)
    /// GPUs concretely filled in; `port_number` reduced to 0.
    pub optimized_resource: ResourceDescriptor,
}

/// Orchestrates the multi-stage filter/rank/allocate pipeline over the
/// node inventory. Owns all mutable scheduling state: the inventory
/// with its ledgers, the same-port-allocation caches and the RNG.
/// Every entry point is pure in-memory computation; wrap the manager in
/// [`SharedSelectionManager`] to drive it from concurrent schedulers.
pub struct SelectionManager {
    inventory: NodeInventory,
    policy: SelectionPolicy,
    cluster_gpu_types: Map<String, String>,
    gpu_picker: GpuPicker,
    reused_ports: Map<String, Vec<ValueRange>>,
    reused_ports_times: Map<String, u32>,
    rng: SmallRng,
}

impl SelectionManager {
    pub fn new(policy: SelectionPolicy) -> Self {
        Self::with_rng(policy, SmallRng::from_os_rng())
    }

    pub fn with_rng(policy: SelectionPolicy, rng: SmallRng) -> Self {
        SelectionManager {
            inventory: NodeInventory::default(),
            policy,
            cluster_gpu_types: Map::default(),
            gpu_picker: pick_lowest_bits,
            reused_ports: Map::default(),
            reused_ports_times: Map::default(),
            rng,
        }
    }

    /// Replaces the GPU device picker strategy.
    pub fn set_gpu_picker(&mut self, picker: GpuPicker) {
        self.gpu_picker = picker;
    }

    /// Installs the cluster-configuration map of per-host GPU types.
    pub fn set_cluster_gpu_types(&mut self, types: Map<String, String>) {
        self.cluster_gpu_types = types;
    }

    pub fn inventory(&self) -> &NodeInventory {
        &self.inventory
    }

    pub fn update_node(&mut self, node: Node) {
        self.inventory.update_node(node);
    }

    pub fn remove_node(&mut self, host: &str) {
        self.inventory.remove_node(host);
    }

    pub fn add_container_request(&mut self, resource: &ResourceDescriptor, hosts: &[String]) {
        self.inventory.add_container_request(resource, hosts);
    }

    pub fn remove_container_request(&mut self, resource: &ResourceDescriptor, hosts: &[String]) {
        self.inventory.remove_container_request(resource, hosts);
    }

    /// Runs the full placement pipeline and returns every surviving
    /// candidate host.
    ///
    /// Fails with [`SelectionError::ResourcesNotAvailable`] only when a
    /// non-relaxable constraint (explicit GPU type or an unmet dynamic
    /// port count) rules out every node; a plain CPU/memory shortfall
    /// returns an empty candidate list instead, leaving the resource
    /// manager room to relax locality.
    pub fn select(&mut self, request: &SelectionRequest) -> crate::Result<SelectionResult> {
        if request.resource.gpu_number > MAX_GPUS_PER_NODE {
            return Err(SelectionError::InvalidConfiguration(format!(
                "role {} requests {} GPUs, nodes address at most {}",
                request.role, request.resource.gpu_number, MAX_GPUS_PER_NODE
            )));
        }

        let mut resource = request.resource.clone();
        // Shuffled starting pool avoids systematic bias toward any one
        // host across repeated calls
        let mut candidates = self.inventory.hosts();
        candidates.shuffle(&mut self.rng);
        log::debug!(
            "Selecting placement for role {} among {} host(s)",
            request.role,
            candidates.len()
        );

        self.filter_by_label(&mut candidates, request.node_label.as_deref());
        self.filter_by_gpu_type(&mut candidates, request.gpu_type.as_deref());
        self.filter_non_gpu_job(&mut candidates, request.job_total_gpu_count);

        let reused_ports = self.peek_ports_to_reuse(request);
        if let Some(ports) = &reused_ports {
            log::debug!("Role {} reuses ports {:?}", request.role, ports);
            resource.port_ranges = range::union(&resource.port_ranges, ports);
            resource.port_number = 0;
        } else if resource.has_unresolved_ports() && !candidates.is_empty() {
            // Early pre-allocation from the intersection of all
            // remaining candidates, so the fit filter can treat ports
            // as already resolved
            let overlap = self.overlap_ports(&candidates);
            if !self.try_resolve_ports(&mut resource, &overlap) {
                log::debug!(
                    "Early port pre-allocation failed for role {}, deferring",
                    request.role
                );
            }
        }

        self.filter_by_resource_fit(&mut candidates, &resource);
        self.filter_by_rack(&mut candidates);

        if candidates.is_empty() {
            if request.gpu_type.is_some() || resource.has_unresolved_ports() {
                return Err(SelectionError::ResourcesNotAvailable(format!(
                    "no node satisfies role {} (gpu type: {:?}, unresolved ports: {})",
                    request.role, request.gpu_type, resource.port_number
                )));
            }
            log::debug!(
                "Role {} has no local candidate; leaving relaxation to the resource manager",
                request.role
            );
        }

        // Busiest-first packing order, then the oversubscribed cut
        let skip = self.policy.skip_local_tried_resource;
        candidates.sort_by_cached_key(|host| {
            self.inventory
                .effective_available(host, skip)
                .map(|a| a.packing_key())
                .unwrap_or_default()
        });
        let pool_size =
            request.start_state_task_count.max(1) as usize * self.policy.candidate_factor as usize;
        candidates.truncate(pool_size);

        let mut gpu_assignments = Map::default();
        if resource.has_unpinned_gpus() {
            for host in &candidates {
                let Some(available) = self.inventory.effective_available(host, skip) else {
                    continue;
                };
                let picked = (self.gpu_picker)(available.gpu_attribute, resource.gpu_number);
                if picked.count_ones() == resource.gpu_number {
                    gpu_assignments.insert(host.clone(), picked);
                }
            }
        }

        // Final port resolution against the selected candidates only;
        // ports cannot be relaxed by the resource manager
        let overlap = self.overlap_ports(&candidates);
        if resource.has_unresolved_ports() {
            if !self.try_resolve_ports(&mut resource, &overlap) {
                return Err(SelectionError::ResourcesNotAvailable(format!(
                    "cannot allocate {} dynamic port(s) for role {} on {} candidate(s)",
                    resource.port_number,
                    request.role,
                    candidates.len()
                )));
            }
        }

        // Cohort bookkeeping moves only when something was actually
        // placed; a failed or no-placement pass leaves the task in
        // start state and must not burn a countdown tick
        if !candidates.is_empty() {
            match reused_ports {
                Some(ports) => self.commit_reused_ports(request, ports),
                None => self.cache_ports_for_role(request, &resource),
            }
        }

        log::debug!(
            "Role {} placed on {} candidate(s) with resource {}",
            request.role,
            candidates.len(),
            resource
        );
        Ok(SelectionResult {
            candidates: candidates.into_iter().collect(),
            gpu_assignments,
            overlap_ports: overlap,
            optimized_resource: resource,
        })
    }

    /// Runs the pipeline and picks one host at random from the result,
    /// pinning that host's GPU assignment into the returned resource.
    /// The random pick keeps concurrent placements from piling onto the
    /// same first-ranked host.
    pub fn select_single_node(
        &mut self,
        request: &SelectionRequest,
    ) -> crate::Result<SelectionResult> {
        let mut result = self.select(request)?;
        let Some(host) = result.candidates.choose(&mut self.rng).cloned() else {
            return Ok(result);
        };
        if let Some(bits) = result.gpu_assignments.get(&host).copied() {
            result.optimized_resource.gpu_attribute = bits;
        }
        result.gpu_assignments.retain(|h, _| *h == host);
        result.candidates = smallvec![host];
        Ok(result)
    }

    fn filter_by_label(&self, candidates: &mut Vec<String>, label: Option<&str>) {
        // Single-partition semantics: an absent or empty requested
        // label targets the reserved "no label" partition
        let label = label.filter(|l| !l.is_empty());
        let before = candidates.len();
        candidates.retain(|host| {
            self.inventory.get(host).is_some_and(|node| match label {
                Some(l) => node.labels.contains(l),
                None => node.labels.is_empty(),
            })
        });
        if candidates.len() < before {
            log::debug!(
                "Label filter ({label:?}) kept {}/{before} host(s)",
                candidates.len()
            );
        }
    }

    fn filter_by_gpu_type(&self, candidates: &mut Vec<String>, gpu_type: Option<&str>) {
        let Some(allow_list) = gpu_type else {
            return;
        };
        let allowed: Set<&str> = allow_list
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .collect();
        let before = candidates.len();
        candidates.retain(|host| {
            let configured = self
                .cluster_gpu_types
                .get(host)
                .or_else(|| self.inventory.get(host).and_then(|n| n.gpu_type.as_ref()));
            configured.is_some_and(|t| allowed.contains(t.as_str()))
        });
        if candidates.len() < before {
            log::debug!(
                "GPU type filter ({allow_list}) kept {}/{before} host(s)",
                candidates.len()
            );
        }
    }

    fn filter_non_gpu_job(&self, candidates: &mut Vec<String>, job_total_gpu_count: u32) {
        if job_total_gpu_count > 0 || self.policy.allow_non_gpu_job_on_gpu_node {
            return;
        }
        let before = candidates.len();
        candidates
            .retain(|host| self.inventory.get(host).is_some_and(|n| n.total.gpu_number == 0));
        if candidates.len() < before {
            log::debug!(
                "Non-GPU job kept off {} GPU-capable host(s)",
                before - candidates.len()
            );
        }
    }

    fn filter_by_resource_fit(&self, candidates: &mut Vec<String>, resource: &ResourceDescriptor) {
        let skip = self.policy.skip_local_tried_resource;
        let before = candidates.len();
        candidates.retain(|host| {
            self.inventory
                .effective_available(host, skip)
                .is_some_and(|available| resource.fits_in(&available))
        });
        if candidates.len() < before {
            log::debug!("Resource fit kept {}/{before} host(s)", candidates.len());
        }
    }

    fn filter_by_rack(&self, _candidates: &mut Vec<String>) {
        // Rack/topology extension point; no constraint implemented yet
    }

    /// Port-range intersection of the effective availability of every
    /// listed host.
    fn overlap_ports(&self, hosts: &[String]) -> Vec<ValueRange> {
        let skip = self.policy.skip_local_tried_resource;
        let mut iter = hosts.iter();
        let Some(first) = iter.next() else {
            return Vec::new();
        };
        let mut overlap = self
            .inventory
            .effective_available(first, skip)
            .map(|a| a.port_ranges)
            .unwrap_or_default();
        for host in iter {
            if overlap.is_empty() {
                break;
            }
            let ports = self
                .inventory
                .effective_available(host, skip)
                .map(|a| a.port_ranges)
                .unwrap_or_default();
            overlap = range::intersect(&overlap, &ports);
        }
        overlap
    }

    /// Draws the outstanding dynamic ports from `pool` (minus the ports
    /// already fixed). On success the resource carries them as concrete
    /// ranges and needs zero further dynamic ports.
    fn try_resolve_ports(&mut self, resource: &mut ResourceDescriptor, pool: &[ValueRange]) -> bool {
        let usable = range::subtract(pool, &resource.port_ranges);
        let picked =
            range::sub_range_randomly(&usable, resource.port_number, 0, &mut self.rng);
        if range::count(&picked) != i64::from(resource.port_number) {
            return false;
        }
        resource.port_ranges = range::union(&resource.port_ranges, &picked);
        resource.port_number = 0;
        true
    }

    /// Same-port-allocation lookup: hands back the cached (or
    /// caller-supplied) ports of a gang-style role without touching the
    /// cohort bookkeeping, so a pipeline run that later fails or places
    /// nothing leaves the cache exactly as it found it.
    fn peek_ports_to_reuse(&self, request: &SelectionRequest) -> Option<Vec<ValueRange>> {
        if !self.policy.same_port_allocation {
            return None;
        }
        let ports = if !request.ports_to_reuse.is_empty() {
            request.ports_to_reuse.clone()
        } else {
            self.reused_ports.get(&request.role).cloned()?
        };
        if ports.is_empty() {
            return None;
        }
        Some(range::coalesce(&ports))
    }

    /// Commits one cohort tick after a successful reused-ports
    /// placement. The per-role countdown ensures only the last task of
    /// a start-state cohort consumes and clears the cache; earlier
    /// tasks decrement it and leave the ports in place.
    fn commit_reused_ports(&mut self, request: &SelectionRequest, ports: Vec<ValueRange>) {
        let times = self
            .reused_ports_times
            .entry(request.role.clone())
            .or_insert_with(|| request.start_state_task_count.max(1));
        if *times > 1 {
            *times -= 1;
            self.reused_ports.insert(request.role.clone(), ports);
        } else {
            self.reused_ports.remove(&request.role);
            self.reused_ports_times.remove(&request.role);
        }
    }

    /// After a fresh resolution for a same-port role with cohort tasks
    /// still to come, caches the resolved ports so the rest of the
    /// cohort binds the same numbers.
    fn cache_ports_for_role(&mut self, request: &SelectionRequest, resource: &ResourceDescriptor) {
        if !self.policy.same_port_allocation
            || resource.port_ranges.is_empty()
            || request.start_state_task_count <= 1
            || self.reused_ports.contains_key(&request.role)
            || self.reused_ports_times.contains_key(&request.role)
        {
            return;
        }
        self.reused_ports
            .insert(request.role.clone(), resource.port_ranges.clone());
        self.reused_ports_times
            .insert(request.role.clone(), request.start_state_task_count - 1);
    }
}

/// The single-mutex wrapper promised by the concurrency model: every
/// entry point serializes against every other, and nothing under the
/// lock performs I/O or blocks. A poisoned lock is recovered rather
/// than propagated, since the guarded state holds no invariant that a
/// panicking reader could have broken mid-write.
pub struct SharedSelectionManager {
    inner: Mutex<SelectionManager>,
}

impl SharedSelectionManager {
    pub fn new(policy: SelectionPolicy) -> Self {
        SharedSelectionManager {
            inner: Mutex::new(SelectionManager::new(policy)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SelectionManager> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn select(&self, request: &SelectionRequest) -> crate::Result<SelectionResult> {
        self.lock().select(request)
    }

    pub fn select_single_node(&self, request: &SelectionRequest) -> crate::Result<SelectionResult> {
        self.lock().select_single_node(request)
    }

    pub fn update_node(&self, node: Node) {
        self.lock().update_node(node);
    }

    pub fn remove_node(&self, host: &str) {
        self.lock().remove_node(host);
    }

    pub fn set_cluster_gpu_types(&self, types: Map<String, String>) {
        self.lock().set_cluster_gpu_types(types);
    }

    pub fn add_container_request(&self, resource: &ResourceDescriptor, hosts: &[String]) {
        self.lock().add_container_request(resource, hosts);
    }

    pub fn remove_container_request(&self, resource: &ResourceDescriptor, hosts: &[String]) {
        self.lock().remove_container_request(resource, hosts);
    }
}
