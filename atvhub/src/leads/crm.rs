use anyhow::Result;
use chrono::Utc;
use futures::future::try_join_all;
use serde::{Deserialize, Deserializer};
use thiserror::Error;
use tracing::info;

use super::{
    company_key, lead_key, notes_key, state_key, status_index_key, Lead, LeadCore, LeadNote, LeadState, LeadStatus,
    BLOCKED_COMPANIES_KEY, IDX_ALL_KEY,
};
use crate::storage::{KvBatch, KvStore};

pub const MAX_LIST_LIMIT: i64 = 200;
pub const DEFAULT_LIST_LIMIT: i64 = 50;
pub const MAX_NOTES: i64 = 200;
pub const BLOCK_DURATION_MS: i64 = 7 * 24 * 60 * 60 * 1000;

#[derive(Debug, Error)]
pub enum CrmError {
    #[error("Lead not found")]
    NotFound,
    #[error("Invalid status")]
    InvalidStatus,
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// Distinguishes an absent key from an explicit `null`.
fn present<'de, D, T>(d: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    T::deserialize(d).map(Some)
}

/// Partial update of a lead's CRM state. Absent keys keep the current value.
#[derive(Debug, Default, Deserialize)]
pub struct StatePatch {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default, deserialize_with = "present")]
    pub next_action: Option<Option<String>>,
    #[serde(default, deserialize_with = "present")]
    pub assigned_to: Option<Option<String>>,
    #[serde(default, deserialize_with = "present")]
    pub last_contacted_at: Option<Option<i64>>,
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Lead pipeline storage on top of the KV store.
#[derive(Clone)]
pub struct LeadRepo {
    kv: KvStore,
}

impl LeadRepo {
    pub fn new(kv: KvStore) -> Self {
        Self { kv }
    }

    pub async fn core(&self, id: &str) -> Result<Option<LeadCore>> {
        self.kv.get_json(&lead_key(id)).await
    }

    pub async fn state(&self, id: &str) -> Result<Option<LeadState>> {
        self.kv.get_json(&state_key(id)).await
    }

    pub async fn state_of_link(&self, link: &str) -> Result<Option<LeadState>> {
        self.state(&super::lead_id(link)).await
    }

    /// Newest-first leads from the global or a status index. Entries missing
    /// either core or state are skipped.
    pub async fn list(&self, status: Option<LeadStatus>, limit: i64) -> Result<Vec<Lead>> {
        let limit = limit.clamp(1, MAX_LIST_LIMIT);
        let index = status.map(status_index_key).unwrap_or_else(|| IDX_ALL_KEY.to_string());
        let ids = self.kv.zrange_rev(&index, 0, limit - 1).await?;

        let loaded = try_join_all(ids.iter().map(|id| async move {
            let notes = notes_key(id);
            let (core, state, notes_count) =
                tokio::try_join!(self.core(id), self.state(id), self.kv.llen(&notes))?;
            Ok::<_, anyhow::Error>(core.zip(state).map(|(core, state)| Lead { core, state, notes_count }))
        }))
        .await?;

        Ok(loaded.into_iter().flatten().collect())
    }

    fn delete_ops(batch: KvBatch, id: &str, state: Option<&LeadState>) -> KvBatch {
        let mut batch = batch
            .del(lead_key(id))
            .del(state_key(id))
            .del(notes_key(id))
            .zrem(IDX_ALL_KEY, id);
        if let Some(state) = state {
            batch = batch.zrem(status_index_key(state.status), id);
        }
        batch
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        let state = self.state(id).await?;
        self.kv.exec(Self::delete_ops(KvBatch::new(), id, state.as_ref())).await?;
        info!(lead_id = %id, "crm: lead deleted");
        Ok(())
    }

    /// Delete every given lead in one batch. Returns how many ids were processed.
    pub async fn bulk_delete(&self, ids: &[String]) -> Result<usize> {
        let states = try_join_all(ids.iter().map(|id| self.state(id))).await?;
        let batch = ids
            .iter()
            .zip(states.iter())
            .fold(KvBatch::new(), |b, (id, st)| Self::delete_ops(b, id, st.as_ref()));
        self.kv.exec(batch).await?;
        info!(count = ids.len(), "crm: leads bulk deleted");
        Ok(ids.len())
    }

    /// Notes, newest first.
    pub async fn notes(&self, id: &str) -> Result<Vec<LeadNote>> {
        let raw = self.kv.lrange(&notes_key(id), 0, -1).await?;
        Ok(raw
            .iter()
            .filter_map(|s| match serde_json::from_str(s) {
                Ok(note) => Some(note),
                Err(e) => {
                    tracing::warn!(lead_id = %id, "crm: skipping malformed note: {}", e);
                    None
                }
            })
            .collect())
    }

    /// Prepend a note and move the lead to the top of its indices.
    pub async fn add_note(&self, id: &str, content: &str, author: Option<String>) -> Result<LeadNote> {
        let now = now_ms();
        let note = LeadNote {
            id: uuid::Uuid::new_v4().to_string(),
            lead_id: id.to_string(),
            content: content.trim().to_string(),
            author: author.filter(|a| !a.trim().is_empty()),
            created_at: now,
        };
        let state = self.state(id).await?;

        let mut batch = KvBatch::new()
            .lpush(notes_key(id), serde_json::to_string(&note)?)
            .ltrim(notes_key(id), 0, MAX_NOTES - 1)
            .zadd(IDX_ALL_KEY, id, now as f64);
        if let Some(state) = state {
            batch = batch.zadd(status_index_key(state.status), id, now as f64);
        }
        self.kv.exec(batch).await?;
        Ok(note)
    }

    /// Record a company as excluded from scans for seven days.
    pub async fn block_company(&self, name: &str, now: i64) -> Result<()> {
        let name = name.trim();
        if name.is_empty() {
            return Ok(());
        }
        self.kv.zadd(BLOCKED_COMPANIES_KEY, name, (now + BLOCK_DURATION_MS) as f64).await?;
        info!(company = %name, "crm: company blocked for 7 days");
        Ok(())
    }

    /// Lower-cased names of companies whose block has not expired.
    pub async fn blocked_company_keys(&self, now: i64) -> Result<Vec<String>> {
        let names = self.kv.zrange_by_score(BLOCKED_COMPANIES_KEY, now as f64 + 1.0, f64::MAX).await?;
        Ok(names.iter().map(|n| company_key(n)).collect())
    }

    async fn block_company_of(&self, id: &str, now: i64) -> Result<()> {
        if let Some(core) = self.core(id).await? {
            self.block_company(&core.ai_analysis.company_name, now).await?;
        }
        Ok(())
    }

    fn state_ops(batch: KvBatch, old: LeadStatus, updated: &LeadState, now: i64) -> Result<KvBatch> {
        let id = updated.lead_id.as_str();
        let mut batch = batch
            .set_json(state_key(id), updated)?
            .zadd(IDX_ALL_KEY, id, now as f64);
        if updated.status != old {
            batch = batch.zrem(status_index_key(old), id);
        }
        Ok(batch.zadd(status_index_key(updated.status), id, now as f64))
    }

    pub async fn patch_state(&self, id: &str, patch: StatePatch) -> Result<LeadState, CrmError> {
        let existing = self.state(id).await?.ok_or(CrmError::NotFound)?;
        let new_status = match patch.status.as_deref() {
            Some(s) => s.parse::<LeadStatus>().map_err(|_| CrmError::InvalidStatus)?,
            None => existing.status,
        };
        let now = now_ms();
        let old_status = existing.status;

        let mut updated = existing;
        if new_status != old_status {
            updated.status = new_status;
            updated.status_changed_at = now;
        }
        if let Some(tags) = patch.tags {
            updated.tags = tags;
        }
        if let Some(v) = patch.next_action {
            updated.next_action = v;
        }
        if let Some(v) = patch.assigned_to {
            updated.assigned_to = v;
        }
        if let Some(v) = patch.last_contacted_at {
            updated.last_contacted_at = v;
        }

        self.kv.exec(Self::state_ops(KvBatch::new(), old_status, &updated, now)?).await?;
        if new_status != old_status && new_status == LeadStatus::Excluded {
            self.block_company_of(id, now).await?;
        }
        Ok(updated)
    }

    /// Set one status on many leads; unknown ids are skipped. Returns how many changed.
    pub async fn bulk_state(&self, ids: &[String], status: LeadStatus) -> Result<usize> {
        let states = try_join_all(ids.iter().map(|id| self.state(id))).await?;
        let now = now_ms();
        let mut batch = KvBatch::new();
        let mut newly_excluded = Vec::new();
        let mut updated_count = 0;

        for existing in states.into_iter().flatten() {
            let old_status = existing.status;
            let mut updated = existing;
            if status != old_status {
                updated.status = status;
                updated.status_changed_at = now;
                if status == LeadStatus::Excluded {
                    newly_excluded.push(updated.lead_id.clone());
                }
            }
            batch = Self::state_ops(batch, old_status, &updated, now)?;
            updated_count += 1;
        }

        self.kv.exec(batch).await?;
        for id in &newly_excluded {
            self.block_company_of(id, now).await?;
        }
        Ok(updated_count)
    }

    /// Store scanned leads. New leads get a NEW state; existing ones keep their
    /// state and are bumped in their indices. Returns the ids that were new.
    pub async fn upsert_leads(&self, leads: &[LeadCore]) -> Result<Vec<String>> {
        let now = now_ms();
        let states = try_join_all(leads.iter().map(|l| self.state(&l.lead_id))).await?;
        let mut batch = KvBatch::new();
        let mut new_ids = Vec::new();

        for (lead, state) in leads.iter().zip(states) {
            let id = lead.lead_id.as_str();
            batch = batch.set_json(lead_key(id), lead)?.zadd(IDX_ALL_KEY, id, now as f64);
            match state {
                Some(state) => {
                    batch = batch.zadd(status_index_key(state.status), id, now as f64);
                }
                None => {
                    batch = batch
                        .set_json(state_key(id), &LeadState::initial(id, now))?
                        .zadd(status_index_key(LeadStatus::New), id, now as f64);
                    new_ids.push(id.to_string());
                }
            }
        }

        self.kv.exec(batch).await?;
        info!(upserted = leads.len(), new = new_ids.len(), "crm: leads upserted");
        Ok(new_ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::leads::{lead_id, Contact};
    use crate::llm::analyzer::AiAnalysis;

    fn sample_core(link: &str, company: &str, score: i64) -> LeadCore {
        let mut analysis = AiAnalysis::failed("t", "");
        analysis.company_name = company.to_string();
        analysis.ai_score = 80.0;
        LeadCore {
            lead_id: lead_id(link),
            title: format!("{} 신제품 출시", company),
            link: link.to_string(),
            content_snippet: "snippet".into(),
            pub_date: "Mon, 15 Jan 2024 09:00:00 +0900".into(),
            source: "RSS".into(),
            keyword: None,
            ai_analysis: analysis,
            contact: Contact::default(),
            final_score: score,
            created_at: 1,
            updated_at: 1,
        }
    }

    async fn repo() -> LeadRepo {
        LeadRepo::new(KvStore::in_memory().await.unwrap())
    }

    #[tokio::test]
    async fn upsert_reports_only_new_leads() {
        let repo = repo().await;
        let a = sample_core("https://a.example/1", "A사", 70);
        let b = sample_core("https://b.example/1", "B사", 60);

        let first = repo.upsert_leads(&[a.clone()]).await.unwrap();
        assert_eq!(first, vec![a.lead_id.clone()]);
        let second = repo.upsert_leads(&[a.clone(), b.clone()]).await.unwrap();
        assert_eq!(second, vec![b.lead_id.clone()]);

        let all = repo.list(None, 50).await.unwrap();
        assert_eq!(all.len(), 2);
        assert!(all.iter().all(|l| l.state.status == LeadStatus::New));
        let new = repo.list(Some(LeadStatus::New), 50).await.unwrap();
        assert_eq!(new.len(), 2);
    }

    #[tokio::test]
    async fn state_patch_moves_indices_and_blocks_company() {
        let repo = repo().await;
        let lead = sample_core("https://a.example/1", "Acme", 70);
        repo.upsert_leads(&[lead.clone()]).await.unwrap();

        let patch: StatePatch =
            serde_json::from_str(r#"{"status":"EXCLUDED","tags":["x"],"next_action":"call"}"#).unwrap();
        let st = repo.patch_state(&lead.lead_id, patch).await.unwrap();
        assert_eq!(st.status, LeadStatus::Excluded);
        assert_eq!(st.tags, vec!["x"]);
        assert_eq!(st.next_action.as_deref(), Some("call"));

        assert!(repo.list(Some(LeadStatus::New), 50).await.unwrap().is_empty());
        assert_eq!(repo.list(Some(LeadStatus::Excluded), 50).await.unwrap().len(), 1);
        assert_eq!(repo.blocked_company_keys(now_ms()).await.unwrap(), vec!["acme"]);
        assert!(repo.blocked_company_keys(now_ms() + BLOCK_DURATION_MS + 1000).await.unwrap().is_empty());

        let clear: StatePatch = serde_json::from_str(r#"{"next_action":null}"#).unwrap();
        let st = repo.patch_state(&lead.lead_id, clear).await.unwrap();
        assert!(st.next_action.is_none());
        assert_eq!(st.tags, vec!["x"]);
    }

    #[tokio::test]
    async fn patch_errors() {
        let repo = repo().await;
        assert!(matches!(repo.patch_state("nope", StatePatch::default()).await, Err(CrmError::NotFound)));
        let lead = sample_core("https://a.example/1", "Acme", 70);
        repo.upsert_leads(&[lead.clone()]).await.unwrap();
        let bad = StatePatch { status: Some("DONE".into()), ..Default::default() };
        assert!(matches!(repo.patch_state(&lead.lead_id, bad).await, Err(CrmError::InvalidStatus)));
    }

    #[tokio::test]
    async fn notes_are_newest_first_and_deleted_with_lead() {
        let repo = repo().await;
        let lead = sample_core("https://a.example/1", "Acme", 70);
        repo.upsert_leads(&[lead.clone()]).await.unwrap();
        repo.add_note(&lead.lead_id, " first ", None).await.unwrap();
        repo.add_note(&lead.lead_id, "second", Some("kim".into())).await.unwrap();

        let notes = repo.notes(&lead.lead_id).await.unwrap();
        assert_eq!(notes.len(), 2);
        assert_eq!(notes[0].content, "second");
        assert_eq!(notes[1].content, "first");
        assert_eq!(repo.list(None, 10).await.unwrap()[0].notes_count, 2);

        repo.delete(&lead.lead_id).await.unwrap();
        assert!(repo.list(None, 10).await.unwrap().is_empty());
        assert!(repo.notes(&lead.lead_id).await.unwrap().is_empty());
        assert!(repo.list(Some(LeadStatus::New), 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn bulk_operations_skip_unknown_ids() {
        let repo = repo().await;
        let a = sample_core("https://a.example/1", "A", 70);
        let b = sample_core("https://b.example/1", "B", 70);
        repo.upsert_leads(&[a.clone(), b.clone()]).await.unwrap();

        let ids = vec![a.lead_id.clone(), "missing".to_string()];
        assert_eq!(repo.bulk_state(&ids, LeadStatus::Won).await.unwrap(), 1);
        assert_eq!(repo.list(Some(LeadStatus::Won), 10).await.unwrap().len(), 1);
        assert_eq!(repo.list(Some(LeadStatus::New), 10).await.unwrap().len(), 1);

        assert_eq!(repo.bulk_delete(&[a.lead_id.clone(), b.lead_id.clone()]).await.unwrap(), 2);
        assert!(repo.list(None, 10).await.unwrap().is_empty());
    }
}
