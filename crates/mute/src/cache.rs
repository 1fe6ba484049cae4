//! Mute cache and tiered lookup

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use storage::{MuteKey, MuteRule, MuteRuleSpec, MuteRuleStore};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::MuteError;

/// Identity of the event being checked
#[derive(Debug, Clone, Copy)]
pub struct MuteQuery<'a> {
    pub instance: &'a str,
    pub alert_name: &'a str,
    pub job: &'a str,
    pub status: &'a str,
}

/// Specificity tier that matched, least specific first
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MuteTier {
    Global,
    Instance,
    AlertName,
    Job,
    Status,
}

impl MuteTier {
    /// Probe order
    pub const ORDER: [MuteTier; 5] = [
        MuteTier::Global,
        MuteTier::Instance,
        MuteTier::AlertName,
        MuteTier::Job,
        MuteTier::Status,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MuteTier::Global => "global",
            MuteTier::Instance => "instance",
            MuteTier::AlertName => "alertname",
            MuteTier::Job => "job",
            MuteTier::Status => "status",
        }
    }

    /// Cache key probed at this tier
    fn key(&self, query: &MuteQuery<'_>) -> MuteKey {
        match self {
            MuteTier::Global => MuteKey::global(),
            MuteTier::Instance => MuteKey::new(query.instance, "", "", ""),
            MuteTier::AlertName => MuteKey::new(query.instance, query.alert_name, "", ""),
            MuteTier::Job => MuteKey::new(query.instance, query.alert_name, query.job, ""),
            MuteTier::Status => MuteKey::new(query.instance, query.alert_name, query.job, query.status),
        }
    }
}

/// In-memory index over the mute rule table.
///
/// Readers take the map lock only for the duration of a lookup. Refresh and
/// mutations are serialized by `writer` so a full reload can never overwrite a
/// newer single-entry change with a stale snapshot.
pub struct MuteCache {
    store: Arc<dyn MuteRuleStore>,
    rules: RwLock<HashMap<MuteKey, MuteRule>>,
    writer: tokio::sync::Mutex<()>,
}

impl MuteCache {
    /// Create an empty cache over the given store
    pub fn new(store: Arc<dyn MuteRuleStore>) -> Self {
        Self {
            store,
            rules: RwLock::new(HashMap::new()),
            writer: tokio::sync::Mutex::new(()),
        }
    }

    /// Reload every rule from the store and swap the map in.
    ///
    /// On failure the previous contents stay active.
    pub async fn refresh(&self) -> Result<usize, MuteError> {
        let _writer = self.writer.lock().await;

        let loaded = match self.store.load_all().await {
            Ok(loaded) => loaded,
            Err(e) => {
                metrics::counter!("hook_relay_mute_refresh_total", "result" => "error").increment(1);
                return Err(e.into());
            }
        };

        let rules: HashMap<MuteKey, MuteRule> =
            loaded.into_iter().map(|rule| (rule.key(), rule)).collect();
        let count = rules.len();
        *self.rules.write().unwrap_or_else(PoisonError::into_inner) = rules;

        metrics::counter!("hook_relay_mute_refresh_total", "result" => "ok").increment(1);
        metrics::gauge!("hook_relay_mute_rules").set(count as f64);
        debug!("Mute cache refreshed with {} rules", count);
        Ok(count)
    }

    /// Refresh on a fixed period for the life of the process
    pub fn spawn_refresh_loop(self: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        info!("Starting mute cache refresh every {:?}", period);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // First tick completes immediately; callers refresh once at startup.
            ticker.tick().await;

            loop {
                ticker.tick().await;
                if let Err(e) = cache.refresh().await {
                    warn!("Mute cache refresh failed, keeping {} cached rules: {}", cache.len(), e);
                }
            }
        })
    }

    /// Default, persist, then apply the rule to the cache.
    ///
    /// Replacing a rule keeps its original `created_at`, as the store does.
    pub async fn upsert(&self, spec: MuteRuleSpec) -> Result<MuteRule, MuteError> {
        let mut rule = spec.resolve(Utc::now());
        let _writer = self.writer.lock().await;

        let existing = self
            .rules
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&rule.key())
            .map(|existing| existing.created_at);
        if let Some(created_at) = existing {
            rule.created_at = created_at;
        }

        self.store.upsert_rule(&rule).await?;

        let count = {
            let mut rules = self.rules.write().unwrap_or_else(PoisonError::into_inner);
            rules.insert(rule.key(), rule.clone());
            rules.len()
        };
        metrics::gauge!("hook_relay_mute_rules").set(count as f64);
        info!(
            "Mute rule set: [{}][{}][{}][{}] forever={}",
            rule.instance, rule.alert_name, rule.job, rule.status, rule.forever
        );
        Ok(rule)
    }

    /// Delete the rule with the same key from store and cache.
    ///
    /// Returns the number of rows the store removed.
    pub async fn delete(&self, spec: MuteRuleSpec) -> Result<u64, MuteError> {
        let key = spec.key();
        let _writer = self.writer.lock().await;

        let removed = self.store.delete_rule(&key).await?;

        let count = {
            let mut rules = self.rules.write().unwrap_or_else(PoisonError::into_inner);
            rules.remove(&key);
            rules.len()
        };
        metrics::gauge!("hook_relay_mute_rules").set(count as f64);
        info!(
            "Mute rule deleted: [{}][{}][{}][{}] ({} rows)",
            key.instance, key.alert_name, key.job, key.status, removed
        );
        Ok(removed)
    }

    pub fn is_muted(&self, query: &MuteQuery<'_>) -> bool {
        self.is_muted_at(query, Utc::now()).is_some()
    }

    /// First tier, from global to fully specified, holding a rule valid at `now`
    pub fn is_muted_at(&self, query: &MuteQuery<'_>, now: DateTime<Utc>) -> Option<MuteTier> {
        let rules = self.rules.read().unwrap_or_else(PoisonError::into_inner);

        MuteTier::ORDER.into_iter().find(|tier| {
            let key = tier.key(query);
            let hit = rules.get(&key).map_or(false, |rule| rule.is_valid_at(now));
            debug!(
                "Mute probe {} [{}][{}][{}][{}] => {}",
                tier.as_str(),
                key.instance,
                key.alert_name,
                key.job,
                key.status,
                hit
            );
            hit
        })
    }

    pub fn len(&self) -> usize {
        self.rules.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
