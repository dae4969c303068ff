//! In-memory token usage accounting
//!
//! Thread-safe append-only log of usage records plus three running
//! totals kept in atomics so hot-path recording never takes the log
//! lock for reads. Reports project the log by optional source/session
//! filters into per-source, per-model, and per-session breakdowns.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

/// One recorded LLM call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageRecord {
    pub source: String,
    pub model: Option<String>,
    pub session_id: Option<String>,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub timestamp: DateTime<Utc>,
}

/// Aggregated totals for one projection bucket.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct UsageTotals {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub call_count: u64,
}

impl UsageTotals {
    pub fn total_tokens(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }

    fn add(&mut self, record: &UsageRecord) {
        self.prompt_tokens += record.prompt_tokens;
        self.completion_tokens += record.completion_tokens;
        self.call_count += 1;
    }
}

/// Filter for usage reports; `None` matches everything.
#[derive(Debug, Clone, Default)]
pub struct UsageFilter {
    pub source: Option<String>,
    pub session_id: Option<String>,
}

impl UsageFilter {
    fn matches(&self, record: &UsageRecord) -> bool {
        if let Some(source) = &self.source {
            if record.source != *source {
                return false;
            }
        }
        if let Some(session) = &self.session_id {
            if record.session_id.as_deref() != Some(session.as_str()) {
                return false;
            }
        }
        true
    }
}

/// Scope for [`TokenUsageTracker::reset`].
#[derive(Debug, Clone)]
pub enum UsageScope {
    All,
    Source(String),
    Session(String),
}

/// Usage report: overall totals plus projections.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageReport {
    pub totals: UsageTotals,
    pub by_source: HashMap<String, UsageTotals>,
    pub by_model: HashMap<String, UsageTotals>,
    pub by_session: HashMap<String, UsageTotals>,
}

/// Thread-safe usage tracker.
#[derive(Debug, Default)]
pub struct TokenUsageTracker {
    records: RwLock<Vec<UsageRecord>>,
    prompt_tokens: AtomicU64,
    completion_tokens: AtomicU64,
    call_count: AtomicU64,
}

impl TokenUsageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one record and bump the running totals.
    pub fn record(
        &self,
        source: &str,
        model: Option<&str>,
        session_id: Option<&str>,
        prompt_tokens: u64,
        completion_tokens: u64,
    ) {
        let record = UsageRecord {
            source: source.to_string(),
            model: model.map(str::to_string),
            session_id: session_id.map(str::to_string),
            prompt_tokens,
            completion_tokens,
            timestamp: Utc::now(),
        };
        self.records.write().unwrap().push(record);
        self.prompt_tokens.fetch_add(prompt_tokens, Ordering::Relaxed);
        self.completion_tokens
            .fetch_add(completion_tokens, Ordering::Relaxed);
        self.call_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Running totals across all records, read without locking.
    pub fn totals(&self) -> UsageTotals {
        UsageTotals {
            prompt_tokens: self.prompt_tokens.load(Ordering::Relaxed),
            completion_tokens: self.completion_tokens.load(Ordering::Relaxed),
            call_count: self.call_count.load(Ordering::Relaxed),
        }
    }

    /// Project the log through `filter` into grouped totals.
    pub fn report(&self, filter: &UsageFilter) -> UsageReport {
        let records = self.records.read().unwrap();
        let mut report = UsageReport::default();
        for record in records.iter().filter(|r| filter.matches(r)) {
            report.totals.add(record);
            report
                .by_source
                .entry(record.source.clone())
                .or_default()
                .add(record);
            if let Some(model) = &record.model {
                report.by_model.entry(model.clone()).or_default().add(record);
            }
            if let Some(session) = &record.session_id {
                report
                    .by_session
                    .entry(session.clone())
                    .or_default()
                    .add(record);
            }
        }
        report
    }

    /// Drop records in `scope` and rebuild the running totals so they
    /// stay consistent with the retained log.
    pub fn reset(&self, scope: UsageScope) {
        let mut records = self.records.write().unwrap();
        match scope {
            UsageScope::All => records.clear(),
            UsageScope::Source(source) => records.retain(|r| r.source != source),
            UsageScope::Session(session) => {
                records.retain(|r| r.session_id.as_deref() != Some(session.as_str()))
            }
        }
        let mut prompt = 0u64;
        let mut completion = 0u64;
        for record in records.iter() {
            prompt += record.prompt_tokens;
            completion += record.completion_tokens;
        }
        self.prompt_tokens.store(prompt, Ordering::Relaxed);
        self.completion_tokens.store(completion, Ordering::Relaxed);
        self.call_count.store(records.len() as u64, Ordering::Relaxed);
    }
}
