//! SQLite persistence for every leadflow store trait

use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};
use tracing::{debug, info, warn};

use leadflow_core::config::RoutingDefaults;
use leadflow_core::store::{
    AssignmentGuard, ConfigStore, ConversationPatch, ConversationStore, EventLedgerStore,
    SalesmanDirectory, TriageQueueStore,
};
use leadflow_core::types::{
    AssignmentConfig, Conversation, ConversationStatus, HeatLevel, LeadEvent, LeadEventType,
    Salesman, Strategy, TriageEntry, TriageStatus,
};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS assignment_configs (
        tenant_id TEXT PRIMARY KEY,
        strategy TEXT NOT NULL,
        auto_assign_enabled INTEGER NOT NULL,
        consider_capacity INTEGER NOT NULL,
        consider_score INTEGER NOT NULL,
        active INTEGER NOT NULL DEFAULT 1,
        updated_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS salesmen (
        id TEXT PRIMARY KEY,
        tenant_id TEXT NOT NULL,
        name TEXT NOT NULL,
        active INTEGER NOT NULL DEFAULT 1,
        max_leads_per_month INTEGER NOT NULL,
        capacity_override_for_high_heat INTEGER NOT NULL DEFAULT 0,
        product_skills TEXT NOT NULL DEFAULT '[]',
        language_skills TEXT NOT NULL DEFAULT '[]',
        geographic_zone TEXT,
        performance_score REAL NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_salesmen_tenant ON salesmen(tenant_id, active);

    CREATE TABLE IF NOT EXISTS conversations (
        id TEXT PRIMARY KEY,
        tenant_id TEXT NOT NULL,
        assigned_to TEXT,
        heat TEXT NOT NULL DEFAULT 'COLD',
        heat_confidence REAL NOT NULL DEFAULT 0,
        status TEXT NOT NULL DEFAULT 'OPEN',
        end_user_context TEXT NOT NULL DEFAULT '{}',
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_conversations_owner
        ON conversations(tenant_id, assigned_to, status);

    CREATE TABLE IF NOT EXISTS lead_events (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        id TEXT NOT NULL UNIQUE,
        tenant_id TEXT NOT NULL,
        event_type TEXT NOT NULL,
        conversation_id TEXT NOT NULL,
        triggered_by TEXT NOT NULL,
        payload TEXT NOT NULL,
        created_at TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_lead_events_conversation
        ON lead_events(tenant_id, conversation_id);

    CREATE TABLE IF NOT EXISTS ledger_cursors (
        tenant_id TEXT NOT NULL,
        event_type TEXT NOT NULL,
        event_seq INTEGER NOT NULL,
        PRIMARY KEY (tenant_id, event_type)
    );

    CREATE TABLE IF NOT EXISTS triage_entries (
        id TEXT PRIMARY KEY,
        tenant_id TEXT NOT NULL,
        conversation_id TEXT NOT NULL,
        entry_type TEXT NOT NULL,
        status TEXT NOT NULL,
        created_at TEXT NOT NULL
    );
    CREATE UNIQUE INDEX IF NOT EXISTS idx_triage_one_open
        ON triage_entries(tenant_id, conversation_id) WHERE status = 'open';
";

const CONVERSATION_COLUMNS: &str = "id, tenant_id, assigned_to, heat, heat_confidence, status, \
     end_user_context, created_at, updated_at";
const SALESMAN_COLUMNS: &str = "id, tenant_id, name, active, max_leads_per_month, \
     capacity_override_for_high_heat, product_skills, language_skills, geographic_zone, \
     performance_score";
const EVENT_COLUMNS: &str =
    "e.id, e.tenant_id, e.event_type, e.conversation_id, e.triggered_by, e.payload, e.created_at";
const TRIAGE_COLUMNS: &str = "id, tenant_id, conversation_id, entry_type, status, created_at";

/// SQLite database wrapper (thread-safe via Arc<Mutex>)
#[derive(Clone)]
pub struct LeadDb {
    conn: Arc<Mutex<Connection>>,
}

impl LeadDb {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create database directory {:?}", parent))?;
        }
        let conn = Connection::open(path).context("Failed to open SQLite database")?;
        info!("Initializing lead database at {:?}", path);
        Self::init(conn)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)
            .context("Failed to create lead database schema")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `op` on the connection from the blocking pool
    async fn blocking<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock().unwrap_or_else(|poisoned| {
                warn!("Database mutex was poisoned, recovering");
                poisoned.into_inner()
            });
            op(&mut conn)
        })
        .await
        .context("spawn_blocking task panicked")?
    }

    /// Recompute every rotation cursor from the event table.
    ///
    /// Returns the number of cursors written.
    pub async fn rebuild_cursors(&self) -> Result<usize> {
        self.blocking(|conn| {
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM ledger_cursors", [])?;
            let rebuilt = tx.execute(
                "INSERT INTO ledger_cursors (tenant_id, event_type, event_seq)
                 SELECT tenant_id, event_type, MAX(seq) FROM lead_events
                 GROUP BY tenant_id, event_type",
                [],
            )?;
            tx.commit()?;
            info!("Rebuilt {} ledger cursors from the event table", rebuilt);
            Ok(rebuilt)
        })
        .await
    }

    fn row_to_conversation(row: &rusqlite::Row) -> rusqlite::Result<Conversation> {
        let heat: String = row.get(3)?;
        let status: String = row.get(5)?;
        let context: String = row.get(6)?;
        Ok(Conversation {
            id: row.get(0)?,
            tenant_id: row.get(1)?,
            assigned_to: row.get(2)?,
            heat: HeatLevel::parse(&heat)
                .ok_or_else(|| conversion_error(3, format!("unknown heat '{}'", heat)))?,
            heat_confidence: row.get(4)?,
            status: ConversationStatus::parse(&status)
                .ok_or_else(|| conversion_error(5, format!("unknown status '{}'", status)))?,
            end_user_context: serde_json::from_str(&context).map_err(|e| conversion_error(6, e))?,
            created_at: row.get::<_, String>(7)?.parse().unwrap_or_else(|_| Utc::now()),
            updated_at: row.get::<_, String>(8)?.parse().unwrap_or_else(|_| Utc::now()),
        })
    }

    fn row_to_salesman(row: &rusqlite::Row) -> rusqlite::Result<Salesman> {
        let products: String = row.get(6)?;
        let languages: String = row.get(7)?;
        Ok(Salesman {
            id: row.get(0)?,
            tenant_id: row.get(1)?,
            name: row.get(2)?,
            active: row.get(3)?,
            max_leads_per_month: row.get(4)?,
            capacity_override_for_high_heat: row.get(5)?,
            product_skills: serde_json::from_str(&products).map_err(|e| conversion_error(6, e))?,
            language_skills: serde_json::from_str(&languages).map_err(|e| conversion_error(7, e))?,
            geographic_zone: row.get(8)?,
            performance_score: row.get(9)?,
        })
    }

    fn row_to_event(row: &rusqlite::Row) -> rusqlite::Result<LeadEvent> {
        let event_type: String = row.get(2)?;
        let payload: String = row.get(5)?;
        Ok(LeadEvent {
            id: row.get(0)?,
            tenant_id: row.get(1)?,
            event_type: LeadEventType::parse(&event_type)
                .ok_or_else(|| conversion_error(2, format!("unknown event type '{}'", event_type)))?,
            conversation_id: row.get(3)?,
            triggered_by: row.get(4)?,
            payload: serde_json::from_str(&payload).map_err(|e| conversion_error(5, e))?,
            created_at: row.get::<_, String>(6)?.parse().unwrap_or_else(|_| Utc::now()),
        })
    }

    fn row_to_triage(row: &rusqlite::Row) -> rusqlite::Result<TriageEntry> {
        let status: String = row.get(4)?;
        Ok(TriageEntry {
            id: row.get(0)?,
            tenant_id: row.get(1)?,
            conversation_id: row.get(2)?,
            entry_type: row.get(3)?,
            status: TriageStatus::parse(&status)
                .ok_or_else(|| conversion_error(4, format!("unknown triage status '{}'", status)))?,
            created_at: row.get::<_, String>(5)?.parse().unwrap_or_else(|_| Utc::now()),
        })
    }

    fn row_to_config(row: &rusqlite::Row) -> rusqlite::Result<AssignmentConfig> {
        let strategy: String = row.get(1)?;
        Ok(AssignmentConfig {
            tenant_id: row.get(0)?,
            strategy: strategy
                .parse::<Strategy>()
                .map_err(|e| conversion_error(1, e.to_string()))?,
            auto_assign_enabled: row.get(2)?,
            consider_capacity: row.get(3)?,
            consider_score: row.get(4)?,
            active: row.get(5)?,
        })
    }
}

fn conversion_error(
    column: usize,
    err: impl Into<Box<dyn std::error::Error + Send + Sync>>,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, err.into())
}

fn optional_text(value: Option<String>) -> SqlValue {
    value.map(SqlValue::Text).unwrap_or(SqlValue::Null)
}

#[async_trait]
impl ConversationStore for LeadDb {
    async fn get_conversation(&self, id: &str) -> Result<Option<Conversation>> {
        let id = id.to_owned();
        self.blocking(move |conn| {
            let conversation = conn
                .query_row(
                    &format!("SELECT {} FROM conversations WHERE id = ?1", CONVERSATION_COLUMNS),
                    params![id],
                    Self::row_to_conversation,
                )
                .optional()?;
            Ok(conversation)
        })
        .await
    }

    async fn update_conversation(
        &self,
        id: &str,
        patch: ConversationPatch,
        guard: AssignmentGuard,
    ) -> Result<bool> {
        let id = id.to_owned();
        self.blocking(move |conn| {
            let mut sql = String::from(
                "UPDATE conversations SET
                    assigned_to = CASE WHEN ?7 THEN NULL ELSE COALESCE(?1, assigned_to) END,
                    heat = COALESCE(?2, heat),
                    heat_confidence = COALESCE(?3, heat_confidence),
                    status = COALESCE(?4, status),
                    updated_at = ?5
                 WHERE id = ?6",
            );
            let mut values = vec![
                optional_text(patch.assigned_to),
                optional_text(patch.heat.map(|h| h.as_str().to_string())),
                patch.heat_confidence.map(SqlValue::Real).unwrap_or(SqlValue::Null),
                optional_text(patch.status.map(|s| s.as_str().to_string())),
                SqlValue::Text(Utc::now().to_rfc3339()),
                SqlValue::Text(id.clone()),
                SqlValue::Integer(i64::from(patch.release_owner)),
            ];
            match &guard {
                AssignmentGuard::Any => {}
                AssignmentGuard::Unassigned => sql.push_str(" AND assigned_to IS NULL"),
                AssignmentGuard::AssignedTo(owner) => {
                    values.push(SqlValue::Text(owner.clone()));
                    sql.push_str(&format!(" AND assigned_to = ?{}", values.len()));
                }
            }
            if let Some(expected) = patch.expected_heat {
                values.push(SqlValue::Text(expected.as_str().to_string()));
                sql.push_str(&format!(" AND heat = ?{}", values.len()));
            }

            let updated = conn.execute(&sql, params_from_iter(values))? == 1;
            if !updated {
                debug!("Conditional update rejected for conversation {} ({:?})", id, guard);
            }
            Ok(updated)
        })
        .await
    }

    async fn list_open(&self, tenant_id: &str, assigned_to: &str) -> Result<Vec<Conversation>> {
        let tenant_id = tenant_id.to_owned();
        let assigned_to = assigned_to.to_owned();
        self.blocking(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM conversations
                 WHERE tenant_id = ?1 AND assigned_to = ?2 AND status = 'OPEN'
                 ORDER BY created_at, id",
                CONVERSATION_COLUMNS
            ))?;
            let rows = stmt
                .query_map(params![tenant_id, assigned_to], Self::row_to_conversation)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await
    }

    async fn insert_conversation(&self, conversation: Conversation) -> Result<()> {
        self.blocking(move |conn| {
            let context = serde_json::to_string(&conversation.end_user_context)?;
            conn.execute(
                &format!(
                    "INSERT OR REPLACE INTO conversations ({})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                    CONVERSATION_COLUMNS
                ),
                params![
                    conversation.id,
                    conversation.tenant_id,
                    conversation.assigned_to,
                    conversation.heat.as_str(),
                    conversation.heat_confidence,
                    conversation.status.as_str(),
                    context,
                    conversation.created_at.to_rfc3339(),
                    conversation.updated_at.to_rfc3339(),
                ],
            )?;
            debug!("Stored conversation {}", conversation.id);
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl SalesmanDirectory for LeadDb {
    async fn list_active(&self, tenant_id: &str) -> Result<Vec<Salesman>> {
        let tenant_id = tenant_id.to_owned();
        self.blocking(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM salesmen WHERE tenant_id = ?1 AND active = 1 ORDER BY id",
                SALESMAN_COLUMNS
            ))?;
            let rows = stmt
                .query_map(params![tenant_id], Self::row_to_salesman)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await
    }

    async fn get_salesman(&self, id: &str) -> Result<Option<Salesman>> {
        let id = id.to_owned();
        self.blocking(move |conn| {
            let salesman = conn
                .query_row(
                    &format!("SELECT {} FROM salesmen WHERE id = ?1", SALESMAN_COLUMNS),
                    params![id],
                    Self::row_to_salesman,
                )
                .optional()?;
            Ok(salesman)
        })
        .await
    }

    async fn upsert_salesman(&self, salesman: Salesman) -> Result<()> {
        self.blocking(move |conn| {
            let now = Utc::now().to_rfc3339();
            conn.execute(
                "INSERT INTO salesmen (id, tenant_id, name, active, max_leads_per_month,
                    capacity_override_for_high_heat, product_skills, language_skills,
                    geographic_zone, performance_score, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)
                 ON CONFLICT(id) DO UPDATE SET
                    tenant_id = excluded.tenant_id,
                    name = excluded.name,
                    active = excluded.active,
                    max_leads_per_month = excluded.max_leads_per_month,
                    capacity_override_for_high_heat = excluded.capacity_override_for_high_heat,
                    product_skills = excluded.product_skills,
                    language_skills = excluded.language_skills,
                    geographic_zone = excluded.geographic_zone,
                    performance_score = excluded.performance_score,
                    updated_at = excluded.updated_at",
                params![
                    salesman.id,
                    salesman.tenant_id,
                    salesman.name,
                    salesman.active,
                    salesman.max_leads_per_month,
                    salesman.capacity_override_for_high_heat,
                    serde_json::to_string(&salesman.product_skills)?,
                    serde_json::to_string(&salesman.language_skills)?,
                    salesman.geographic_zone,
                    salesman.performance_score,
                    now,
                ],
            )?;
            debug!("Upserted salesman {} ({})", salesman.name, salesman.id);
            Ok(())
        })
        .await
    }

    async fn set_active(&self, id: &str, active: bool) -> Result<bool> {
        let id = id.to_owned();
        self.blocking(move |conn| {
            let changed = conn.execute(
                "UPDATE salesmen SET active = ?2, updated_at = ?3 WHERE id = ?1",
                params![id, active, Utc::now().to_rfc3339()],
            )?;
            Ok(changed == 1)
        })
        .await
    }
}

#[async_trait]
impl EventLedgerStore for LeadDb {
    async fn append(&self, event: LeadEvent) -> Result<()> {
        self.blocking(move |conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO lead_events
                    (id, tenant_id, event_type, conversation_id, triggered_by, payload, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    event.id,
                    event.tenant_id,
                    event.event_type.as_str(),
                    event.conversation_id,
                    event.triggered_by,
                    serde_json::to_string(&event.payload)?,
                    event.created_at.to_rfc3339(),
                ],
            )?;
            let seq = tx.last_insert_rowid();
            tx.execute(
                "INSERT INTO ledger_cursors (tenant_id, event_type, event_seq)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(tenant_id, event_type) DO UPDATE SET event_seq = excluded.event_seq",
                params![event.tenant_id, event.event_type.as_str(), seq],
            )?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn find_last(
        &self,
        tenant_id: &str,
        event_type: LeadEventType,
    ) -> Result<Option<LeadEvent>> {
        let tenant_id = tenant_id.to_owned();
        self.blocking(move |conn| {
            let event = conn
                .query_row(
                    &format!(
                        "SELECT {} FROM ledger_cursors c
                         JOIN lead_events e ON e.seq = c.event_seq
                         WHERE c.tenant_id = ?1 AND c.event_type = ?2",
                        EVENT_COLUMNS
                    ),
                    params![tenant_id, event_type.as_str()],
                    Self::row_to_event,
                )
                .optional()?;
            Ok(event)
        })
        .await
    }

    async fn list_events(
        &self,
        tenant_id: &str,
        conversation_id: Option<&str>,
    ) -> Result<Vec<LeadEvent>> {
        let tenant_id = tenant_id.to_owned();
        let conversation_id = conversation_id.map(str::to_owned);
        self.blocking(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM lead_events e
                 WHERE e.tenant_id = ?1 AND (?2 IS NULL OR e.conversation_id = ?2)
                 ORDER BY e.seq",
                EVENT_COLUMNS
            ))?;
            let rows = stmt
                .query_map(params![tenant_id, conversation_id], Self::row_to_event)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await
    }
}

#[async_trait]
impl TriageQueueStore for LeadDb {
    async fn find_open(
        &self,
        tenant_id: &str,
        conversation_id: &str,
    ) -> Result<Option<TriageEntry>> {
        let tenant_id = tenant_id.to_owned();
        let conversation_id = conversation_id.to_owned();
        self.blocking(move |conn| {
            let entry = conn
                .query_row(
                    &format!(
                        "SELECT {} FROM triage_entries
                         WHERE tenant_id = ?1 AND conversation_id = ?2 AND status = 'open'",
                        TRIAGE_COLUMNS
                    ),
                    params![tenant_id, conversation_id],
                    Self::row_to_triage,
                )
                .optional()?;
            Ok(entry)
        })
        .await
    }

    async fn insert(&self, entry: TriageEntry) -> Result<bool> {
        self.blocking(move |conn| {
            // the partial unique index turns a second open entry into a no-op
            let inserted = conn.execute(
                &format!(
                    "INSERT OR IGNORE INTO triage_entries ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    TRIAGE_COLUMNS
                ),
                params![
                    entry.id,
                    entry.tenant_id,
                    entry.conversation_id,
                    entry.entry_type,
                    entry.status.as_str(),
                    entry.created_at.to_rfc3339(),
                ],
            )?;
            Ok(inserted == 1)
        })
        .await
    }

    async fn list_open_entries(&self, tenant_id: &str) -> Result<Vec<TriageEntry>> {
        let tenant_id = tenant_id.to_owned();
        self.blocking(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM triage_entries
                 WHERE tenant_id = ?1 AND status = 'open'
                 ORDER BY created_at, id",
                TRIAGE_COLUMNS
            ))?;
            let rows = stmt
                .query_map(params![tenant_id], Self::row_to_triage)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await
    }
}

#[async_trait]
impl ConfigStore for LeadDb {
    async fn get_or_create(
        &self,
        tenant_id: &str,
        defaults: &RoutingDefaults,
    ) -> Result<AssignmentConfig> {
        let fresh = AssignmentConfig::with_defaults(tenant_id, defaults);
        self.blocking(move |conn| {
            let created = conn.execute(
                "INSERT OR IGNORE INTO assignment_configs
                    (tenant_id, strategy, auto_assign_enabled, consider_capacity,
                     consider_score, active, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    fresh.tenant_id,
                    fresh.strategy.as_str(),
                    fresh.auto_assign_enabled,
                    fresh.consider_capacity,
                    fresh.consider_score,
                    fresh.active,
                    Utc::now().to_rfc3339(),
                ],
            )?;
            if created == 1 {
                debug!("Creating default assignment config for tenant {}", fresh.tenant_id);
            }
            let config = conn.query_row(
                "SELECT tenant_id, strategy, auto_assign_enabled, consider_capacity,
                        consider_score, active
                 FROM assignment_configs WHERE tenant_id = ?1",
                params![fresh.tenant_id],
                Self::row_to_config,
            )?;
            Ok(config)
        })
        .await
    }

    async fn save_config(&self, config: AssignmentConfig) -> Result<()> {
        self.blocking(move |conn| {
            conn.execute(
                "INSERT INTO assignment_configs
                    (tenant_id, strategy, auto_assign_enabled, consider_capacity,
                     consider_score, active, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(tenant_id) DO UPDATE SET
                    strategy = excluded.strategy,
                    auto_assign_enabled = excluded.auto_assign_enabled,
                    consider_capacity = excluded.consider_capacity,
                    consider_score = excluded.consider_score,
                    active = excluded.active,
                    updated_at = excluded.updated_at",
                params![
                    config.tenant_id,
                    config.strategy.as_str(),
                    config.auto_assign_enabled,
                    config.consider_capacity,
                    config.consider_score,
                    config.active,
                    Utc::now().to_rfc3339(),
                ],
            )?;
            debug!("Saved assignment config for tenant {}", config.tenant_id);
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use leadflow_core::types::{EndUserContext, LanguageCode};
    use leadflow_core::{AssignmentEngine, AssignmentResult, StoreHandles};
    use tempfile::TempDir;

    fn temp_db() -> Result<(TempDir, LeadDb)> {
        let dir = TempDir::new()?;
        let db = LeadDb::new(dir.path().join("leadflow.db"))?;
        Ok((dir, db))
    }

    fn event(tenant: &str, event_type: LeadEventType, salesman: &str) -> LeadEvent {
        LeadEvent::new(
            tenant,
            event_type,
            "c1",
            "test",
            serde_json::json!({"salesmanId": salesman, "strategy": "ROUND_ROBIN"}),
        )
    }

    #[tokio::test]
    async fn test_conversation_round_trip_with_context() -> Result<()> {
        let (_dir, db) = temp_db()?;
        let conversation = Conversation::new("c1", "t1")
            .with_heat(HeatLevel::Hot)
            .with_context(EndUserContext {
                product_mentions: vec!["solar panels".to_string()],
                language: Some(LanguageCode::new("pt-BR")),
                address: Some("Rua Augusta, Lisboa".to_string()),
            });
        db.insert_conversation(conversation.clone()).await?;

        let loaded = db.get_conversation("c1").await?.unwrap();
        assert_eq!(loaded.heat, HeatLevel::Hot);
        assert_eq!(loaded.end_user_context, conversation.end_user_context);
        assert!(db.get_conversation("missing").await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_conditional_update_is_compare_and_swap() -> Result<()> {
        let (_dir, db) = temp_db()?;
        db.insert_conversation(Conversation::new("c1", "t1")).await?;

        assert!(
            db.update_conversation("c1", ConversationPatch::assign("a"), AssignmentGuard::Unassigned)
                .await?
        );
        assert!(
            !db.update_conversation("c1", ConversationPatch::assign("b"), AssignmentGuard::Unassigned)
                .await?
        );
        assert!(
            !db.update_conversation(
                "c1",
                ConversationPatch::assign("b"),
                AssignmentGuard::AssignedTo("x".to_string())
            )
            .await?
        );
        assert!(
            db.update_conversation(
                "c1",
                ConversationPatch::assign("b"),
                AssignmentGuard::AssignedTo("a".to_string())
            )
            .await?
        );
        assert_eq!(
            db.get_conversation("c1").await?.unwrap().assigned_to.as_deref(),
            Some("b")
        );
        assert!(
            !db.update_conversation("nope", ConversationPatch::close(), AssignmentGuard::Any)
                .await?
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_heat_patch_keeps_owner() -> Result<()> {
        let (_dir, db) = temp_db()?;
        let mut conversation = Conversation::new("c1", "t1");
        conversation.assigned_to = Some("a".to_string());
        db.insert_conversation(conversation).await?;

        db.update_conversation(
            "c1",
            ConversationPatch::heat(HeatLevel::OnFire, 0.9),
            AssignmentGuard::Any,
        )
        .await?;
        let loaded = db.get_conversation("c1").await?.unwrap();
        assert_eq!(loaded.heat, HeatLevel::OnFire);
        assert_eq!(loaded.heat_confidence, 0.9);
        assert_eq!(loaded.assigned_to.as_deref(), Some("a"));
        Ok(())
    }

    #[tokio::test]
    async fn test_heat_change_requires_expected_heat() -> Result<()> {
        let (_dir, db) = temp_db()?;
        db.insert_conversation(Conversation::new("c1", "t1")).await?;

        let cold_to_hot = ConversationPatch::heat_change(HeatLevel::Cold, HeatLevel::Hot, 0.6);
        assert!(db.update_conversation("c1", cold_to_hot.clone(), AssignmentGuard::Any).await?);
        assert!(!db.update_conversation("c1", cold_to_hot, AssignmentGuard::Any).await?);

        let loaded = db.get_conversation("c1").await?.unwrap();
        assert_eq!(loaded.heat, HeatLevel::Hot);
        assert_eq!(loaded.heat_confidence, 0.6);
        Ok(())
    }

    #[tokio::test]
    async fn test_release_owner_guarded_by_current_owner() -> Result<()> {
        let (_dir, db) = temp_db()?;
        let mut conversation = Conversation::new("c1", "t1");
        conversation.assigned_to = Some("a".to_string());
        db.insert_conversation(conversation).await?;

        let wrong_owner = AssignmentGuard::AssignedTo("b".to_string());
        assert!(!db.update_conversation("c1", ConversationPatch::release(), wrong_owner).await?);
        let owner = AssignmentGuard::AssignedTo("a".to_string());
        assert!(db.update_conversation("c1", ConversationPatch::release(), owner).await?);

        assert!(db.get_conversation("c1").await?.unwrap().assigned_to.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_list_open_counts_only_open_owned() -> Result<()> {
        let (_dir, db) = temp_db()?;
        for (id, owner) in [("c1", "a"), ("c2", "a"), ("c3", "b")] {
            let mut c = Conversation::new(id, "t1");
            c.assigned_to = Some(owner.to_string());
            db.insert_conversation(c).await?;
        }
        db.update_conversation("c2", ConversationPatch::close(), AssignmentGuard::Any)
            .await?;

        let open = db.list_open("t1", "a").await?;
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].id, "c1");
        assert!(db.list_open("t2", "a").await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_roster_sorted_active_only() -> Result<()> {
        let (_dir, db) = temp_db()?;
        db.upsert_salesman(
            Salesman::new("c", "t1", "Cleo")
                .with_products(["Solar"])
                .with_languages(["en-GB"]),
        )
        .await?;
        db.upsert_salesman(Salesman::new("a", "t1", "Ana")).await?;
        db.upsert_salesman(Salesman::new("b", "t1", "Bo")).await?;
        db.upsert_salesman(Salesman::new("z", "t2", "Zed")).await?;
        assert!(db.set_active("b", false).await?);
        assert!(!db.set_active("ghost", false).await?);

        let roster = db.list_active("t1").await?;
        let ids: Vec<&str> = roster.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
        let cleo = &roster[1];
        assert_eq!(cleo.product_skills.iter().next().unwrap().as_str(), "solar");
        assert_eq!(cleo.language_skills.iter().next().unwrap().as_str(), "en");

        let bo = db.get_salesman("b").await?.unwrap();
        assert!(!bo.active);
        Ok(())
    }

    #[tokio::test]
    async fn test_ledger_cursor_and_rebuild() -> Result<()> {
        let (_dir, db) = temp_db()?;
        db.append(event("t1", LeadEventType::Assigned, "a")).await?;
        db.append(event("t1", LeadEventType::Assigned, "b")).await?;
        db.append(event("t1", LeadEventType::HeatChanged, "-")).await?;
        db.append(event("t2", LeadEventType::Assigned, "z")).await?;

        let last = db.find_last("t1", LeadEventType::Assigned).await?.unwrap();
        assert_eq!(last.payload["salesmanId"], "b");
        assert!(db.find_last("t1", LeadEventType::Reassigned).await?.is_none());

        assert_eq!(db.rebuild_cursors().await?, 3);
        let last = db.find_last("t1", LeadEventType::Assigned).await?.unwrap();
        assert_eq!(last.payload["salesmanId"], "b");

        assert_eq!(db.list_events("t1", None).await?.len(), 3);
        assert_eq!(db.list_events("t1", Some("c1")).await?.len(), 3);
        assert!(db.list_events("t1", Some("c9")).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_triage_single_open_entry() -> Result<()> {
        let (_dir, db) = temp_db()?;
        assert!(db.insert(TriageEntry::open("t1", "c1", "high_value")).await?);
        assert!(!db.insert(TriageEntry::open("t1", "c1", "high_value")).await?);
        assert!(db.insert(TriageEntry::open("t1", "c2", "high_value")).await?);

        assert!(db.find_open("t1", "c1").await?.is_some());
        assert!(db.find_open("t2", "c1").await?.is_none());
        assert_eq!(db.list_open_entries("t1").await?.len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_config_lazy_create_and_save() -> Result<()> {
        let (_dir, db) = temp_db()?;
        let defaults = RoutingDefaults::default();
        let mut config = db.get_or_create("t1", &defaults).await?;
        assert_eq!(config.strategy, Strategy::RoundRobin);
        assert!(config.active);

        config.strategy = Strategy::SkillsBased;
        config.consider_score = true;
        db.save_config(config.clone()).await?;
        assert_eq!(db.get_or_create("t1", &defaults).await?, config);
        Ok(())
    }

    #[tokio::test]
    async fn test_state_survives_reopen() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("nested").join("leadflow.db");
        {
            let db = LeadDb::new(&path)?;
            db.insert_conversation(Conversation::new("c1", "t1")).await?;
            db.append(event("t1", LeadEventType::Assigned, "a")).await?;
        }
        let db = LeadDb::new(&path)?;
        assert!(db.get_conversation("c1").await?.is_some());
        assert!(db.find_last("t1", LeadEventType::Assigned).await?.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn test_engine_on_sqlite_single_winner() -> Result<()> {
        let (_dir, db) = temp_db()?;
        let db = Arc::new(db);
        for id in ["A", "B", "C"] {
            db.upsert_salesman(Salesman::new(id, "t1", id)).await?;
        }
        db.insert_conversation(Conversation::new("c1", "t1")).await?;
        let engine = AssignmentEngine::new(
            &StoreHandles::from_shared(db.clone()),
            RoutingDefaults::default(),
        );

        let mut handles = Vec::new();
        for _ in 0..8 {
            let engine = engine.clone();
            handles.push(tokio::spawn(async move {
                engine.assign("t1", "c1", None).await
            }));
        }
        let mut winners = 0;
        for handle in handles {
            if let AssignmentResult::Assigned(_) = handle.await?? {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
        let assigned = db
            .list_events("t1", Some("c1"))
            .await?
            .into_iter()
            .filter(|e| e.event_type == LeadEventType::Assigned)
            .count();
        assert_eq!(assigned, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_rotation_continues_across_reopen() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("leadflow.db");
        let assign_next = |db: LeadDb, conversation: &'static str| async move {
            let db = Arc::new(db);
            db.insert_conversation(Conversation::new(conversation, "t1")).await?;
            let engine = AssignmentEngine::new(
                &StoreHandles::from_shared(db),
                RoutingDefaults::default(),
            );
            let result = engine.assign("t1", conversation, None).await?;
            anyhow::Ok(result.salesman().map(|s| s.id.clone()))
        };

        let db = LeadDb::new(&path)?;
        for id in ["A", "B"] {
            db.upsert_salesman(Salesman::new(id, "t1", id)).await?;
        }
        assert_eq!(assign_next(db, "c1").await?.as_deref(), Some("A"));
        assert_eq!(assign_next(LeadDb::new(&path)?, "c2").await?.as_deref(), Some("B"));
        assert_eq!(assign_next(LeadDb::new(&path)?, "c3").await?.as_deref(), Some("A"));
        Ok(())
    }
}
