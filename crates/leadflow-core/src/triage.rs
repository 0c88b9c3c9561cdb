//! High-value lead escalation into the triage queue

use std::sync::Arc;

use tracing::{debug, info};

use crate::error::{RoutingResult, require_id};
use crate::store::TriageQueueStore;
use crate::types::{HeatLevel, TRIAGE_TYPE_HIGH_VALUE, TriageEntry};

#[derive(Clone)]
pub struct TriageEscalator {
    queue: Arc<dyn TriageQueueStore>,
}

impl TriageEscalator {
    pub fn new(queue: Arc<dyn TriageQueueStore>) -> Self {
        Self { queue }
    }

    /// Ensure a VERY_HOT or ON_FIRE conversation has one open triage entry.
    ///
    /// Returns the entry created by this call, if any. Cooler heat never
    /// closes an existing entry.
    pub async fn on_heat_changed(
        &self,
        tenant_id: &str,
        conversation_id: &str,
        new_heat: HeatLevel,
    ) -> RoutingResult<Option<TriageEntry>> {
        require_id("tenant_id", tenant_id)?;
        require_id("conversation_id", conversation_id)?;

        if !new_heat.is_high() {
            return Ok(None);
        }

        if self.queue.find_open(tenant_id, conversation_id).await?.is_some() {
            debug!(
                "Conversation {} already escalated, heat {}",
                conversation_id, new_heat
            );
            return Ok(None);
        }

        let entry = TriageEntry::open(tenant_id, conversation_id, TRIAGE_TYPE_HIGH_VALUE);
        // insert is conditional, a concurrent escalation may have won
        if !self.queue.insert(entry.clone()).await? {
            debug!("Concurrent escalation for conversation {}", conversation_id);
            return Ok(None);
        }

        info!(
            "Escalated conversation {} (tenant {}) to triage at heat {}",
            conversation_id, tenant_id, new_heat
        );
        Ok(Some(entry))
    }

    pub async fn open_entries(&self, tenant_id: &str) -> RoutingResult<Vec<TriageEntry>> {
        Ok(self.queue.list_open_entries(tenant_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use crate::types::TriageStatus;

    fn escalator() -> (Arc<MemoryStore>, TriageEscalator) {
        let store = Arc::new(MemoryStore::new());
        (store.clone(), TriageEscalator::new(store))
    }

    #[tokio::test]
    async fn test_on_fire_twice_creates_one_entry() {
        let (store, escalator) = escalator();
        let first = escalator
            .on_heat_changed("t1", "c1", HeatLevel::OnFire)
            .await
            .unwrap();
        let second = escalator
            .on_heat_changed("t1", "c1", HeatLevel::OnFire)
            .await
            .unwrap();

        let entry = first.unwrap();
        assert_eq!(entry.entry_type, TRIAGE_TYPE_HIGH_VALUE);
        assert_eq!(entry.status, TriageStatus::Open);
        assert!(second.is_none());
        assert_eq!(store.list_open_entries("t1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_only_top_two_levels_escalate() {
        let (_, escalator) = escalator();
        for heat in [HeatLevel::Cold, HeatLevel::Warm, HeatLevel::Hot] {
            assert!(escalator.on_heat_changed("t1", "c1", heat).await.unwrap().is_none());
        }
        assert!(escalator.open_entries("t1").await.unwrap().is_empty());

        assert!(
            escalator
                .on_heat_changed("t1", "c1", HeatLevel::VeryHot)
                .await
                .unwrap()
                .is_some()
        );
    }

    #[tokio::test]
    async fn test_cooling_keeps_entry_open() {
        let (_, escalator) = escalator();
        escalator
            .on_heat_changed("t1", "c1", HeatLevel::VeryHot)
            .await
            .unwrap();
        escalator
            .on_heat_changed("t1", "c1", HeatLevel::Cold)
            .await
            .unwrap();
        escalator
            .on_heat_changed("t1", "c1", HeatLevel::OnFire)
            .await
            .unwrap();
        assert_eq!(escalator.open_entries("t1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_entries_scoped_per_conversation() {
        let (_, escalator) = escalator();
        escalator.on_heat_changed("t1", "c1", HeatLevel::OnFire).await.unwrap();
        escalator.on_heat_changed("t1", "c2", HeatLevel::OnFire).await.unwrap();
        escalator.on_heat_changed("t2", "c1", HeatLevel::OnFire).await.unwrap();
        assert_eq!(escalator.open_entries("t1").await.unwrap().len(), 2);
        assert_eq!(escalator.open_entries("t2").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_escalation_single_entry() {
        let (store, escalator) = escalator();
        let mut handles = Vec::new();
        for _ in 0..8 {
            let escalator = escalator.clone();
            handles.push(tokio::spawn(async move {
                escalator
                    .on_heat_changed("t1", "c1", HeatLevel::OnFire)
                    .await
                    .unwrap()
            }));
        }
        let mut created = 0;
        for handle in handles {
            if handle.await.unwrap().is_some() {
                created += 1;
            }
        }
        assert_eq!(created, 1);
        assert_eq!(store.list_open_entries("t1").await.unwrap().len(), 1);
    }
}
