use serde::{Deserialize, Serialize};

/// Policy knobs gating the selection pipeline. Deserializes from a
/// partial JSON document; omitted fields take the defaults below.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SelectionPolicy {
    /// Subtract the locally-tried ledger from node availability during
    /// the resource-fit filter.
    #[serde(default)]
    pub skip_local_tried_resource: bool,

    /// When false, jobs requesting zero GPUs are kept off GPU-capable
    /// nodes entirely.
    #[serde(default = "default_true")]
    pub allow_non_gpu_job_on_gpu_node: bool,

    /// Candidate pool oversubscription: the pipeline keeps
    /// `task_count * candidate_factor` hosts after the packing sort.
    #[serde(default = "default_candidate_factor")]
    pub candidate_factor: u32,

    /// All task instances of a role must bind identical port numbers.
    #[serde(default)]
    pub same_port_allocation: bool,
}

fn default_true() -> bool {
    true
}

fn default_candidate_factor() -> u32 {
    1
}

impl Default for SelectionPolicy {
    fn default() -> Self {
        SelectionPolicy {
            skip_local_tried_resource: false,
            allow_non_gpu_job_on_gpu_node: true,
            candidate_factor: default_candidate_factor(),
            same_port_allocation: false,
        }
    }
}

impl SelectionPolicy {
    pub fn from_json(json: &str) -> crate::Result<Self> {
        let policy: SelectionPolicy = serde_json::from_str(json)?;
        policy.validate()?;
        Ok(policy)
    }

    pub fn validate(&self) -> crate::Result<()> {
        if self.candidate_factor == 0 {
            return Err("candidate_factor must be at least 1".into());
        }
        Ok(())
    }
}
