//! In-process cache backend.
//!
//! Mirrors the Redis command semantics the layer depends on, including
//! key-level TTLs, so that the whole stack can run in tests or in a
//! single-node deployment without a network cache.

use super::backend::{ttl_secs, CacheBackend};
use async_trait::async_trait;
use dashmap::DashMap;
use overlay_core::{CacheError, CacheResult, Clock, SystemClock, Timestamp};
use regex::Regex;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

const WRONG_TYPE: &str = "WRONGTYPE Operation against a key holding the wrong kind of value";

#[derive(Debug, Clone)]
enum MemValue {
    Text(String),
    Hash(HashMap<String, String>),
    Set(BTreeSet<String>),
    SortedSet(HashMap<String, f64>),
}

impl MemValue {
    fn is_empty_collection(&self) -> bool {
        match self {
            MemValue::Text(_) => false,
            MemValue::Hash(h) => h.is_empty(),
            MemValue::Set(s) => s.is_empty(),
            MemValue::SortedSet(z) => z.is_empty(),
        }
    }
}

#[derive(Debug, Clone)]
struct MemEntry {
    value: MemValue,
    expires_at: Option<Timestamp>,
}

impl MemEntry {
    fn is_expired(&self, now: Timestamp) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// Cache backend held in a concurrent map.
#[derive(Debug)]
pub struct InMemoryCacheBackend {
    entries: DashMap<String, MemEntry>,
    clock: Arc<dyn Clock>,
    closed: AtomicBool,
}

impl Default for InMemoryCacheBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryCacheBackend {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Backend whose TTLs are measured against `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
            closed: AtomicBool::new(false),
        }
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        let now = self.clock.now();
        self.entries.iter().filter(|e| !e.is_expired(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every key.
    pub fn flush(&self) {
        self.entries.clear();
    }

    fn ensure_open(&self, op: &'static str) -> CacheResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(CacheError::backend(op, "connection closed"));
        }
        Ok(())
    }

    fn expiry(&self, ttl: Duration) -> Option<Timestamp> {
        let ttl = chrono::Duration::seconds(i64::try_from(ttl_secs(ttl)).unwrap_or(i64::MAX));
        self.clock.now().checked_add_signed(ttl)
    }

    /// Run `f` on the live value at `key`, evicting it if it has expired.
    fn read<R>(&self, key: &str, f: impl FnOnce(&MemValue) -> R) -> Option<R> {
        let now = self.clock.now();
        if let Some(entry) = self.entries.get(key) {
            if !entry.is_expired(now) {
                return Some(f(&entry.value));
            }
        } else {
            return None;
        }
        self.entries.remove_if(key, |_, e| e.is_expired(now));
        None
    }

    /// Run `f` on the value at `key`, creating it with `create` if absent.
    /// Collections left empty by `f` are removed.
    fn write<R>(
        &self,
        key: &str,
        create: impl FnOnce() -> MemValue,
        f: impl FnOnce(&mut MemValue) -> CacheResult<R>,
    ) -> CacheResult<R> {
        let now = self.clock.now();
        self.entries.remove_if(key, |_, e| e.is_expired(now));
        let result = {
            let mut slot = self
                .entries
                .entry(key.to_string())
                .or_insert_with(|| MemEntry {
                    value: create(),
                    expires_at: None,
                });
            f(&mut slot.value)
        };
        self.entries
            .remove_if(key, |_, e| e.value.is_empty_collection());
        result
    }

    fn sorted(&self, key: &str, op: &'static str) -> CacheResult<Vec<String>> {
        let members = self.read(key, |value| match value {
            MemValue::SortedSet(z) => {
                let mut members: Vec<(&String, f64)> = z.iter().map(|(m, s)| (m, *s)).collect();
                members.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(b.0)));
                Ok(members.into_iter().map(|(m, _)| m.clone()).collect())
            }
            _ => Err(CacheError::backend(op, WRONG_TYPE)),
        });
        members.unwrap_or_else(|| Ok(Vec::new()))
    }
}

/// Resolve Redis-style inclusive rank bounds against a list of `len` items.
fn rank_window(len: usize, start: isize, stop: isize) -> Option<(usize, usize)> {
    let len = len as isize;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
    if len == 0 || start > stop || start >= len {
        return None;
    }
    Some((start as usize, stop as usize))
}

fn slice_ranks(items: Vec<String>, start: isize, stop: isize) -> Vec<String> {
    match rank_window(items.len(), start, stop) {
        Some((from, to)) => items[from..=to].to_vec(),
        None => Vec::new(),
    }
}

/// Compile a Redis glob pattern into an anchored regex.
pub(crate) fn glob_to_regex(pattern: &str) -> CacheResult<Regex> {
    let mut out = String::with_capacity(pattern.len() + 8);
    out.push('^');
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            '\\' => {
                if let Some(next) = chars.next() {
                    out.push_str(&regex::escape(&next.to_string()));
                }
            }
            '[' => {
                out.push('[');
                if chars.peek() == Some(&'^') {
                    chars.next();
                    out.push('^');
                }
                for class_char in chars.by_ref() {
                    if class_char == ']' {
                        break;
                    }
                    if matches!(class_char, '\\' | '[' | '&' | '~') {
                        out.push('\\');
                    }
                    out.push(class_char);
                }
                out.push(']');
            }
            other => out.push_str(&regex::escape(&other.to_string())),
        }
    }
    out.push('$');
    Regex::new(&out).map_err(|e| CacheError::backend("scan", e))
}

#[async_trait]
impl CacheBackend for InMemoryCacheBackend {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        self.ensure_open("get")?;
        self.read(key, |value| match value {
            MemValue::Text(text) => Ok(text.clone()),
            _ => Err(CacheError::backend("get", WRONG_TYPE)),
        })
        .transpose()
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> CacheResult<()> {
        self.ensure_open("set")?;
        let expires_at = ttl.and_then(|ttl| self.expiry(ttl));
        self.entries.insert(
            key.to_string(),
            MemEntry {
                value: MemValue::Text(value.to_string()),
                expires_at,
            },
        );
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> CacheResult<u64> {
        self.ensure_open("del")?;
        let now = self.clock.now();
        let mut removed = 0;
        for key in keys {
            if let Some((_, entry)) = self.entries.remove(key) {
                if !entry.is_expired(now) {
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }

    async fn scan_keys(&self, pattern: &str) -> CacheResult<Vec<String>> {
        self.ensure_open("scan")?;
        let matcher = glob_to_regex(pattern)?;
        let now = self.clock.now();
        Ok(self
            .entries
            .iter()
            .filter(|e| !e.is_expired(now) && matcher.is_match(e.key()))
            .map(|e| e.key().clone())
            .collect())
    }

    async fn exists(&self, key: &str) -> CacheResult<bool> {
        self.ensure_open("exists")?;
        Ok(self.read(key, |_| ()).is_some())
    }

    async fn hset_many(&self, key: &str, fields: &[(String, String)]) -> CacheResult<()> {
        self.ensure_open("hset")?;
        if fields.is_empty() {
            return Ok(());
        }
        self.write(
            key,
            || MemValue::Hash(HashMap::new()),
            |value| match value {
                MemValue::Hash(hash) => {
                    for (field, v) in fields {
                        hash.insert(field.clone(), v.clone());
                    }
                    Ok(())
                }
                _ => Err(CacheError::backend("hset", WRONG_TYPE)),
            },
        )
    }

    async fn hget(&self, key: &str, field: &str) -> CacheResult<Option<String>> {
        self.ensure_open("hget")?;
        self.read(key, |value| match value {
            MemValue::Hash(hash) => Ok(hash.get(field).cloned()),
            _ => Err(CacheError::backend("hget", WRONG_TYPE)),
        })
        .unwrap_or(Ok(None))
    }

    async fn hgetall(&self, key: &str) -> CacheResult<HashMap<String, String>> {
        self.ensure_open("hgetall")?;
        self.read(key, |value| match value {
            MemValue::Hash(hash) => Ok(hash.clone()),
            _ => Err(CacheError::backend("hgetall", WRONG_TYPE)),
        })
        .unwrap_or_else(|| Ok(HashMap::new()))
    }

    async fn hdel(&self, key: &str, fields: &[String]) -> CacheResult<u64> {
        self.ensure_open("hdel")?;
        if self.read(key, |_| ()).is_none() {
            return Ok(0);
        }
        self.write(
            key,
            || MemValue::Hash(HashMap::new()),
            |value| match value {
                MemValue::Hash(hash) => Ok(fields
                    .iter()
                    .filter(|f| hash.remove(f.as_str()).is_some())
                    .count() as u64),
                _ => Err(CacheError::backend("hdel", WRONG_TYPE)),
            },
        )
    }

    async fn sadd(&self, key: &str, members: &[String]) -> CacheResult<u64> {
        self.ensure_open("sadd")?;
        if members.is_empty() {
            return Ok(0);
        }
        self.write(
            key,
            || MemValue::Set(BTreeSet::new()),
            |value| match value {
                MemValue::Set(set) => Ok(members
                    .iter()
                    .filter(|m| set.insert((*m).clone()))
                    .count() as u64),
                _ => Err(CacheError::backend("sadd", WRONG_TYPE)),
            },
        )
    }

    async fn smembers(&self, key: &str) -> CacheResult<Vec<String>> {
        self.ensure_open("smembers")?;
        self.read(key, |value| match value {
            MemValue::Set(set) => Ok(set.iter().cloned().collect()),
            _ => Err(CacheError::backend("smembers", WRONG_TYPE)),
        })
        .unwrap_or_else(|| Ok(Vec::new()))
    }

    async fn srem(&self, key: &str, members: &[String]) -> CacheResult<u64> {
        self.ensure_open("srem")?;
        if self.read(key, |_| ()).is_none() {
            return Ok(0);
        }
        self.write(
            key,
            || MemValue::Set(BTreeSet::new()),
            |value| match value {
                MemValue::Set(set) => Ok(members
                    .iter()
                    .filter(|m| set.remove(m.as_str()))
                    .count() as u64),
                _ => Err(CacheError::backend("srem", WRONG_TYPE)),
            },
        )
    }

    async fn scard(&self, key: &str) -> CacheResult<u64> {
        self.ensure_open("scard")?;
        self.read(key, |value| match value {
            MemValue::Set(set) => Ok(set.len() as u64),
            _ => Err(CacheError::backend("scard", WRONG_TYPE)),
        })
        .unwrap_or(Ok(0))
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> CacheResult<()> {
        self.ensure_open("zadd")?;
        self.write(
            key,
            || MemValue::SortedSet(HashMap::new()),
            |value| match value {
                MemValue::SortedSet(z) => {
                    z.insert(member.to_string(), score);
                    Ok(())
                }
                _ => Err(CacheError::backend("zadd", WRONG_TYPE)),
            },
        )
    }

    async fn zrange(&self, key: &str, start: isize, stop: isize) -> CacheResult<Vec<String>> {
        self.ensure_open("zrange")?;
        let members = self.sorted(key, "zrange")?;
        Ok(slice_ranks(members, start, stop))
    }

    async fn zrevrange(&self, key: &str, start: isize, stop: isize) -> CacheResult<Vec<String>> {
        self.ensure_open("zrevrange")?;
        let mut members = self.sorted(key, "zrevrange")?;
        members.reverse();
        Ok(slice_ranks(members, start, stop))
    }

    async fn zrange_by_score(&self, key: &str, min: f64, max: f64) -> CacheResult<Vec<String>> {
        self.ensure_open("zrangebyscore")?;
        let members = self.read(key, |value| match value {
            MemValue::SortedSet(z) => {
                let mut members: Vec<(&String, f64)> = z
                    .iter()
                    .filter(|(_, s)| **s >= min && **s <= max)
                    .map(|(m, s)| (m, *s))
                    .collect();
                members.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(b.0)));
                Ok(members.into_iter().map(|(m, _)| m.clone()).collect())
            }
            _ => Err(CacheError::backend("zrangebyscore", WRONG_TYPE)),
        });
        members.unwrap_or_else(|| Ok(Vec::new()))
    }

    async fn zrem(&self, key: &str, members: &[String]) -> CacheResult<u64> {
        self.ensure_open("zrem")?;
        if self.read(key, |_| ()).is_none() {
            return Ok(0);
        }
        self.write(
            key,
            || MemValue::SortedSet(HashMap::new()),
            |value| match value {
                MemValue::SortedSet(z) => Ok(members
                    .iter()
                    .filter(|m| z.remove(m.as_str()).is_some())
                    .count() as u64),
                _ => Err(CacheError::backend("zrem", WRONG_TYPE)),
            },
        )
    }

    async fn expire(&self, key: &str, ttl: Duration) -> CacheResult<bool> {
        self.ensure_open("expire")?;
        let now = self.clock.now();
        let expires_at = self.expiry(ttl);
        match self.entries.get_mut(key) {
            Some(mut entry) if !entry.is_expired(now) => {
                entry.expires_at = expires_at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn ping(&self) -> CacheResult<()> {
        self.ensure_open("ping")
    }

    async fn close(&self) -> CacheResult<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use overlay_core::ManualClock;

    fn backend() -> (InMemoryCacheBackend, ManualClock) {
        let clock = ManualClock::default();
        (InMemoryCacheBackend::with_clock(Arc::new(clock.clone())), clock)
    }

    #[tokio::test]
    async fn test_set_get_with_ttl() {
        let (cache, clock) = backend();
        cache
            .set("k", "v", Some(Duration::from_secs(10)))
            .await
            .unwrap();
        assert_eq!(cache.get("k").await.unwrap().as_deref(), Some("v"));

        clock.advance(Duration::from_secs(10));
        assert_eq!(cache.get("k").await.unwrap(), None);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_wrong_type_is_an_error() {
        let (cache, _) = backend();
        cache.set("k", "v", None).await.unwrap();
        assert!(cache.sadd("k", &["m".to_string()]).await.is_err());
        assert!(cache.hgetall("k").await.is_err());
    }

    #[tokio::test]
    async fn test_sets_report_new_members_and_drop_when_empty() {
        let (cache, _) = backend();
        let members = vec!["a".to_string(), "b".to_string()];
        assert_eq!(cache.sadd("s", &members).await.unwrap(), 2);
        assert_eq!(cache.sadd("s", &members).await.unwrap(), 0);
        assert_eq!(cache.scard("s").await.unwrap(), 2);
        assert_eq!(cache.srem("s", &members).await.unwrap(), 2);
        assert!(!cache.exists("s").await.unwrap());
    }

    #[tokio::test]
    async fn test_sorted_set_ranges() {
        let (cache, _) = backend();
        cache.zadd("z", "b", 2.0).await.unwrap();
        cache.zadd("z", "a", 1.0).await.unwrap();
        cache.zadd("z", "c", 3.0).await.unwrap();
        cache.zadd("z", "a", 1.0).await.unwrap();

        assert_eq!(cache.zrange("z", 0, -1).await.unwrap(), vec!["a", "b", "c"]);
        assert_eq!(cache.zrevrange("z", 0, 1).await.unwrap(), vec!["c", "b"]);
        assert_eq!(cache.zrange("z", 5, 10).await.unwrap(), Vec::<String>::new());
        assert_eq!(cache.zrange("missing", 0, -1).await.unwrap(), Vec::<String>::new());
    }

    #[tokio::test]
    async fn test_sorted_set_score_window_and_removal() {
        let (cache, _) = backend();
        for (member, score) in [("a", 1.0), ("b", 2.0), ("c", 3.0)] {
            cache.zadd("z", member, score).await.unwrap();
        }

        assert_eq!(
            cache.zrange_by_score("z", f64::NEG_INFINITY, 2.0).await.unwrap(),
            vec!["a", "b"]
        );
        assert_eq!(
            cache.zrem("z", &["a".to_string(), "x".to_string()]).await.unwrap(),
            1
        );
        assert_eq!(cache.zrange("z", 0, -1).await.unwrap(), vec!["b", "c"]);
        assert_eq!(
            cache.zrem("z", &["b".to_string(), "c".to_string()]).await.unwrap(),
            2
        );
        assert!(!cache.exists("z").await.unwrap());
        assert_eq!(cache.zrem("z", &["a".to_string()]).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_expire_refreshes_ttl() {
        let (cache, clock) = backend();
        cache.hset("h", "f", "v").await.unwrap();
        assert!(cache.expire("h", Duration::from_secs(5)).await.unwrap());
        clock.advance(Duration::from_secs(4));
        assert!(cache.expire("h", Duration::from_secs(5)).await.unwrap());
        clock.advance(Duration::from_secs(4));
        assert_eq!(cache.hget("h", "f").await.unwrap().as_deref(), Some("v"));
        clock.advance(Duration::from_secs(2));
        assert!(cache.hgetall("h").await.unwrap().is_empty());
        assert!(!cache.expire("h", Duration::from_secs(5)).await.unwrap());
    }

    #[tokio::test]
    async fn test_scan_matches_globs() {
        let (cache, _) = backend();
        for key in ["cache:listings|page:1", "cache:listings|page:2", "cache:asset:a"] {
            cache.set(key, "x", None).await.unwrap();
        }
        let mut keys = cache.scan_keys("cache:listings*").await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["cache:listings|page:1", "cache:listings|page:2"]);
        assert_eq!(cache.scan_keys("cache:asset:?").await.unwrap().len(), 1);
    }

    #[test]
    fn test_glob_to_regex_escapes() {
        let re = glob_to_regex("ol:cache:lineage:*v\\*1*").unwrap();
        assert!(re.is_match("ol:cache:lineage:dataset:ns:v*1|3|up|simple"));
        assert!(!re.is_match("ol:cache:lineage:dataset:ns:vx1|3|up|simple"));

        let re = glob_to_regex("k[ab].d").unwrap();
        assert!(re.is_match("ka.d"));
        assert!(!re.is_match("kc.d"));
        assert!(!re.is_match("kaxd"));
    }

    #[tokio::test]
    async fn test_closed_backend_fails() {
        let (cache, _) = backend();
        cache.close().await.unwrap();
        assert!(cache.ping().await.is_err());
        assert!(cache.get("k").await.is_err());
    }
}
