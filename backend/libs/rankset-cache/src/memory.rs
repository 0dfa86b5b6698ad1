//! In-process sorted-set store
//!
//! Mirrors the Redis semantics the feed relies on (ordering, inclusive rank
//! ranges, TTLs, NX leases) behind a single mutex. Expiry is measured with
//! `tokio::time::Instant`, so tests can drive it with `tokio::time::pause()`.
//! `set_available(false)` makes every command fail with a transient error.

use crate::{CacheError, CacheResult, Retire, ScoredMember, SortedSetStore};
use parking_lot::Mutex;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
enum Value {
    Sorted(Vec<ScoredMember>),
    Text(String),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

#[derive(Default)]
pub struct InMemorySortedSetStore {
    entries: Mutex<HashMap<String, Entry>>,
    unavailable: AtomicBool,
}

fn redis_order(a: &ScoredMember, b: &ScoredMember) -> Ordering {
    a.score
        .partial_cmp(&b.score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.member.as_bytes().cmp(b.member.as_bytes()))
}

fn slice_range(members: &[ScoredMember], start: usize, stop: usize) -> Vec<ScoredMember> {
    if start >= members.len() || stop < start {
        return Vec::new();
    }
    let end = stop.min(members.len() - 1);
    members[start..=end].to_vec()
}

impl InMemorySortedSetStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an outage (`false`) or recovery (`true`)
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, AtomicOrdering::SeqCst);
    }

    /// Number of live keys, for assertions in tests
    pub fn live_keys(&self) -> Vec<String> {
        let now = Instant::now();
        let mut keys: Vec<String> = self
            .entries
            .lock()
            .iter()
            .filter(|(_, e)| e.is_live(now))
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        keys
    }

    fn check_available(&self) -> CacheResult<()> {
        if self.unavailable.load(AtomicOrdering::SeqCst) {
            Err(CacheError::Unavailable("in-memory store offline".to_string()))
        } else {
            Ok(())
        }
    }

    fn with_live<T>(&self, key: &str, f: impl FnOnce(Option<&Entry>) -> T) -> T {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        if entries.get(key).map_or(false, |e| !e.is_live(now)) {
            entries.remove(key);
        }
        f(entries.get(key))
    }

    fn sorted(&self, key: &str) -> CacheResult<Vec<ScoredMember>> {
        self.with_live(key, |entry| match entry {
            None => Ok(Vec::new()),
            Some(Entry {
                value: Value::Sorted(members),
                ..
            }) => Ok(members.clone()),
            Some(_) => Err(CacheError::InvalidData(format!(
                "{} does not hold a sorted set",
                key
            ))),
        })
    }
}

#[async_trait::async_trait]
impl SortedSetStore for InMemorySortedSetStore {
    async fn replace_sorted_set(
        &self,
        key: &str,
        members: &[ScoredMember],
        ttl_secs: u64,
    ) -> CacheResult<()> {
        self.check_available()?;
        let mut entries = self.entries.lock();
        entries.remove(key);

        if !members.is_empty() {
            // ZADD semantics: a repeated member keeps its last score
            let mut by_member: HashMap<&str, f64> = HashMap::new();
            for m in members {
                by_member.insert(m.member.as_str(), m.score);
            }
            let mut sorted: Vec<ScoredMember> = by_member
                .into_iter()
                .map(|(member, score)| ScoredMember::new(member, score))
                .collect();
            sorted.sort_by(redis_order);

            entries.insert(
                key.to_string(),
                Entry {
                    value: Value::Sorted(sorted),
                    expires_at: Some(Instant::now() + Duration::from_secs(ttl_secs)),
                },
            );
        }
        Ok(())
    }

    async fn range_by_rank_desc(
        &self,
        key: &str,
        start: usize,
        stop: usize,
    ) -> CacheResult<Vec<ScoredMember>> {
        self.check_available()?;
        let mut members = self.sorted(key)?;
        members.reverse();
        Ok(slice_range(&members, start, stop))
    }

    async fn range_by_rank(
        &self,
        key: &str,
        start: usize,
        stop: usize,
    ) -> CacheResult<Vec<ScoredMember>> {
        self.check_available()?;
        let members = self.sorted(key)?;
        Ok(slice_range(&members, start, stop))
    }

    async fn exists(&self, key: &str) -> CacheResult<bool> {
        self.check_available()?;
        Ok(self.with_live(key, |entry| entry.is_some()))
    }

    async fn cardinality(&self, key: &str) -> CacheResult<u64> {
        self.check_available()?;
        Ok(self.sorted(key)?.len() as u64)
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        self.check_available()?;
        self.entries.lock().remove(key);
        Ok(())
    }

    async fn get_string(&self, key: &str) -> CacheResult<Option<String>> {
        self.check_available()?;
        self.with_live(key, |entry| match entry {
            None => Ok(None),
            Some(Entry {
                value: Value::Text(text),
                ..
            }) => Ok(Some(text.clone())),
            Some(_) => Err(CacheError::InvalidData(format!(
                "{} does not hold a string",
                key
            ))),
        })
    }

    async fn set_string(&self, key: &str, value: &str, ttl_secs: Option<u64>) -> CacheResult<()> {
        self.check_available()?;
        self.entries.lock().insert(
            key.to_string(),
            Entry {
                value: Value::Text(value.to_string()),
                expires_at: ttl_secs.map(|s| Instant::now() + Duration::from_secs(s)),
            },
        );
        Ok(())
    }

    async fn ttl(&self, key: &str) -> CacheResult<Option<Duration>> {
        self.check_available()?;
        let now = Instant::now();
        Ok(self.with_live(key, |entry| {
            entry
                .and_then(|e| e.expires_at)
                .map(|at| at.saturating_duration_since(now))
        }))
    }

    async fn incr(&self, key: &str) -> CacheResult<u64> {
        self.check_available()?;
        let now = Instant::now();
        let mut entries = self.entries.lock();

        let current = match entries.get(key) {
            Some(e) if e.is_live(now) => match &e.value {
                Value::Text(text) => text.parse::<u64>().map_err(|_| {
                    CacheError::InvalidData(format!("{} is not an integer", key))
                })?,
                Value::Sorted(_) => {
                    return Err(CacheError::InvalidData(format!(
                        "{} does not hold an integer",
                        key
                    )))
                }
            },
            _ => 0,
        };

        let next = current + 1;
        let expires_at = entries
            .get(key)
            .filter(|e| e.is_live(now))
            .and_then(|e| e.expires_at);
        entries.insert(
            key.to_string(),
            Entry {
                value: Value::Text(next.to_string()),
                expires_at,
            },
        );
        Ok(next)
    }

    async fn swap_pointer(
        &self,
        pointer_key: &str,
        value: &str,
        ttl_secs: u64,
        retire: Option<Retire<'_>>,
    ) -> CacheResult<()> {
        self.check_available()?;
        let now = Instant::now();
        let mut entries = self.entries.lock();

        entries.insert(
            pointer_key.to_string(),
            Entry {
                value: Value::Text(value.to_string()),
                expires_at: Some(now + Duration::from_secs(ttl_secs)),
            },
        );

        if let Some(old) = retire {
            if let Some(entry) = entries.get_mut(old.key) {
                entry.expires_at = Some(now + Duration::from_secs(old.grace_secs.max(1)));
            }
        }
        Ok(())
    }

    async fn try_acquire_lease(&self, key: &str, token: &str, ttl: Duration) -> CacheResult<bool> {
        self.check_available()?;
        let now = Instant::now();
        let mut entries = self.entries.lock();

        if entries.get(key).map_or(false, |e| e.is_live(now)) {
            return Ok(false);
        }

        entries.insert(
            key.to_string(),
            Entry {
                value: Value::Text(token.to_string()),
                expires_at: Some(now + ttl),
            },
        );
        Ok(true)
    }

    async fn release_lease(&self, key: &str, token: &str) -> CacheResult<bool> {
        self.check_available()?;
        let now = Instant::now();
        let mut entries = self.entries.lock();

        let held = matches!(
            entries.get(key),
            Some(Entry { value: Value::Text(t), expires_at }) if t == token
                && expires_at.map_or(true, |at| at > now)
        );
        if held {
            entries.remove(key);
        }
        Ok(held)
    }
}
