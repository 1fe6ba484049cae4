//! In-memory store

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tracing::{debug, info};

use crate::{Hook, HookColumn, HookDetail, HookFilter, HookStore, MuteKey, MuteRule, MuteRuleStore, StorageError};

/// Store keeping hooks and mute rules in process memory
pub struct MemoryStore {
    /// Hook rows by fingerprint
    hooks: Mutex<HashMap<String, Hook>>,
    /// Detail rows in insertion order
    details: Mutex<Vec<HookDetail>>,
    /// Mute rules by normalized key
    rules: Mutex<HashMap<MuteKey, MuteRule>>,
    /// Next detail ID
    next_detail_id: Mutex<i64>,
    /// When set every call fails with `Unavailable`
    unavailable: AtomicBool,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        info!("Creating in-memory store");
        Self {
            hooks: Mutex::new(HashMap::new()),
            details: Mutex::new(Vec::new()),
            rules: Mutex::new(HashMap::new()),
            next_detail_id: Mutex::new(1),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Simulate an unreachable backend
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of hook rows
    pub fn hook_count(&self) -> usize {
        self.hooks.lock().map(|h| h.len()).unwrap_or(0)
    }

    /// Number of detail rows
    pub fn detail_count(&self) -> usize {
        self.details.lock().map(|d| d.len()).unwrap_or(0)
    }

    /// Hook row by fingerprint, with details
    pub fn hook(&self, hook_id: &str) -> Option<Hook> {
        let mut hook = self.hooks.lock().ok()?.get(hook_id).cloned()?;
        hook.hook_details = self.details_for(hook_id).unwrap_or_default();
        Some(hook)
    }

    /// Clear all data
    pub fn clear(&self) {
        if let Ok(mut hooks) = self.hooks.lock() {
            hooks.clear();
        }
        if let Ok(mut details) = self.details.lock() {
            details.clear();
        }
        if let Ok(mut rules) = self.rules.lock() {
            rules.clear();
        }
    }

    fn check_available(&self) -> Result<(), StorageError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable);
        }
        Ok(())
    }

    fn details_for(&self, hook_id: &str) -> Result<Vec<HookDetail>, StorageError> {
        let details = self.details.lock().map_err(|e| {
            StorageError::DatabaseError(format!("Lock error: {}", e))
        })?;

        Ok(details.iter().filter(|d| d.hook_id == hook_id).cloned().collect())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HookStore for MemoryStore {
    async fn upsert_hook(&self, hook: &Hook, columns: &[HookColumn]) -> Result<(), StorageError> {
        self.check_available()?;

        {
            let mut hooks = self.hooks.lock().map_err(|e| {
                StorageError::DatabaseError(format!("Lock error: {}", e))
            })?;

            let mut row = hook.clone();
            row.hook_details.clear();
            match hooks.get_mut(&hook.hook_id) {
                Some(existing) => existing.apply_columns(&row, columns),
                None => {
                    hooks.insert(hook.hook_id.clone(), row);
                }
            }
        }

        let mut details = self.details.lock().map_err(|e| {
            StorageError::DatabaseError(format!("Lock error: {}", e))
        })?;
        let mut id = self.next_detail_id.lock().map_err(|e| {
            StorageError::DatabaseError(format!("Lock error: {}", e))
        })?;

        for detail in &hook.hook_details {
            let mut detail = detail.clone();
            detail.id = *id;
            *id += 1;
            details.push(detail);
        }
        debug!("Upserted hook {} ({} details total)", hook.hook_id, details.len());

        Ok(())
    }

    async fn list_hooks(&self, filter: &HookFilter) -> Result<Vec<Hook>, StorageError> {
        self.check_available()?;

        let mut matched: Vec<Hook> = {
            let hooks = self.hooks.lock().map_err(|e| {
                StorageError::DatabaseError(format!("Lock error: {}", e))
            })?;
            hooks.values().filter(|h| filter.matches(h)).cloned().collect()
        };

        matched.sort_by(|a, b| b.starts_at.cmp(&a.starts_at));
        if filter.limit > 0 {
            matched.truncate(filter.limit);
        }
        for hook in &mut matched {
            hook.hook_details = self.details_for(&hook.hook_id)?;
        }

        Ok(matched)
    }
}

#[async_trait]
impl MuteRuleStore for MemoryStore {
    async fn load_all(&self) -> Result<Vec<MuteRule>, StorageError> {
        self.check_available()?;

        let rules = self.rules.lock().map_err(|e| {
            StorageError::DatabaseError(format!("Lock error: {}", e))
        })?;
        Ok(rules.values().cloned().collect())
    }

    async fn upsert_rule(&self, rule: &MuteRule) -> Result<(), StorageError> {
        self.check_available()?;

        let mut rules = self.rules.lock().map_err(|e| {
            StorageError::DatabaseError(format!("Lock error: {}", e))
        })?;

        let mut rule = rule.clone();
        if let Some(existing) = rules.get(&rule.key()) {
            rule.created_at = existing.created_at;
        }
        rules.insert(rule.key(), rule);
        Ok(())
    }

    async fn delete_rule(&self, key: &MuteKey) -> Result<u64, StorageError> {
        self.check_available()?;

        let mut rules = self.rules.lock().map_err(|e| {
            StorageError::DatabaseError(format!("Lock error: {}", e))
        })?;
        Ok(rules.remove(key).map_or(0, |_| 1))
    }
}
