//! Resource plan computation.

use std::sync::Arc;

use buildadmin_id::{BuildId, PlanId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::job::{JobHandle, RoleDemand};

/// One role entry of the plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RolePlan {
    pub build_id: BuildId,
    #[serde(flatten)]
    pub demand: RoleDemand,
}

/// The complete set of worker roles needed by all active generations.
///
/// Derived, never stored: recomputed from scratch every tick and handed off
/// as a whole.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourcePlan {
    pub plan_id: PlanId,
    pub generated_at: DateTime<Utc>,
    /// Sorted by build id, then role name.
    pub roles: Vec<RolePlan>,
    /// Hosts the scheduler must not place workers on.
    pub prohibited_hosts: Vec<String>,
}

impl ResourcePlan {
    pub fn build(
        jobs: &[(BuildId, Arc<dyn JobHandle>)],
        prohibited_hosts: Vec<String>,
        now: DateTime<Utc>,
    ) -> Self {
        let mut roles: Vec<RolePlan> = jobs
            .iter()
            .filter(|(_, job)| !job.is_stopped())
            .flat_map(|(build_id, job)| {
                job.role_demands()
                    .into_iter()
                    .filter(|demand| demand.count > 0)
                    .map(|demand| RolePlan {
                        build_id: build_id.clone(),
                        demand,
                    })
            })
            .collect();
        roles.sort_by(|a, b| {
            a.build_id
                .cmp(&b.build_id)
                .then_with(|| a.demand.role_name.cmp(&b.demand.role_name))
        });

        Self {
            plan_id: PlanId::new(),
            generated_at: now,
            roles,
            prohibited_hosts,
        }
    }

    pub fn total_workers(&self) -> u32 {
        self.roles.iter().map(|role| role.demand.count).sum()
    }

    pub fn is_prohibited(&self, host: &str) -> bool {
        self.prohibited_hosts.iter().any(|h| h == host)
    }
}
