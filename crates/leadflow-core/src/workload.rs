//! Salesman workload, always derived from the conversation store
//!
//! There is no counter to increment or decrement: the workload of a salesman
//! is the number of open conversations currently assigned to them.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use tracing::debug;

use crate::store::ConversationStore;
use crate::types::Salesman;

#[derive(Clone)]
pub struct WorkloadTracker {
    conversations: Arc<dyn ConversationStore>,
}

impl WorkloadTracker {
    pub fn new(conversations: Arc<dyn ConversationStore>) -> Self {
        Self { conversations }
    }

    /// Open conversations assigned to `salesman_id` within `tenant_id`
    pub async fn workload_of(&self, tenant_id: &str, salesman_id: &str) -> Result<usize> {
        let open = self.conversations.list_open(tenant_id, salesman_id).await?;
        Ok(open.len())
    }

    /// Snapshot for a single selection pass. Not to be reused across decisions.
    pub async fn snapshot(
        &self,
        tenant_id: &str,
        roster: &[Salesman],
    ) -> Result<HashMap<String, usize>> {
        let mut workloads = HashMap::with_capacity(roster.len());
        for salesman in roster {
            let load = self.workload_of(tenant_id, &salesman.id).await?;
            workloads.insert(salesman.id.clone(), load);
        }
        debug!("Workload snapshot for tenant {}: {:?}", tenant_id, workloads);
        Ok(workloads)
    }
}
