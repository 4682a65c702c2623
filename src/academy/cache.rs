//! Tag-keyed read cache.
//!
//! Read paths memoize derived values under a key and a set of tags. Every
//! write revalidates the tags of what it touched: the entity's global tag,
//! the item's id tag, and the parent-scope tag. Any entry carrying one of
//! those tags is dropped, so the next read reloads from the store.
//!
//! A global epoch is bumped on every revalidation. A value loaded while the
//! epoch moved is never stored, which keeps read-after-write consistent when
//! a write races a slow read.
//!
//! Keys include the caller (lesson pages are per user), so the map is bounded
//! two ways: entries expire after a TTL, and past `max_entries` the oldest
//! entry is evicted on insert.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use anyhow::Result;
use dashmap::DashMap;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    Products,
    Courses,
    CourseSections,
    Lessons,
    Purchases,
    Users,
    UserCourseAccess,
    UserLessonComplete,
}

impl Entity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Products => "products",
            Self::Courses => "courses",
            Self::CourseSections => "course_sections",
            Self::Lessons => "lessons",
            Self::Purchases => "purchases",
            Self::Users => "users",
            Self::UserCourseAccess => "user_course_access",
            Self::UserLessonComplete => "user_lesson_complete",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheTag(String);

impl CacheTag {
    pub fn global(entity: Entity) -> Self {
        Self(format!("global:{}", entity.as_str()))
    }

    pub fn id(entity: Entity, id: impl fmt::Display) -> Self {
        Self(format!("id:{}-{}", id, entity.as_str()))
    }

    pub fn course(entity: Entity, course_id: i64) -> Self {
        Self(format!("course:{}-{}", course_id, entity.as_str()))
    }

    pub fn section(entity: Entity, section_id: i64) -> Self {
        Self(format!("section:{}-{}", section_id, entity.as_str()))
    }

    pub fn user(entity: Entity, user_id: &str) -> Self {
        Self(format!("user:{}-{}", user_id, entity.as_str()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub const DEFAULT_MAX_ENTRIES: usize = 10_000;
pub const DEFAULT_TTL: Duration = Duration::from_secs(3600);

struct CacheEntry {
    value: serde_json::Value,
    tags: Vec<CacheTag>,
    stored_at: Instant,
}

pub struct DataCache {
    enabled: bool,
    max_entries: usize,
    ttl: Duration,
    entries: DashMap<String, CacheEntry>,
    epoch: AtomicU64,
}

impl Default for DataCache {
    fn default() -> Self {
        Self::new(true)
    }
}

impl DataCache {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            max_entries: DEFAULT_MAX_ENTRIES,
            ttl: DEFAULT_TTL,
            entries: DashMap::new(),
            epoch: AtomicU64::new(0),
        }
    }

    pub fn with_limits(mut self, max_entries: usize, ttl: Duration) -> Self {
        self.max_entries = max_entries.max(1);
        self.ttl = ttl;
        self
    }

    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        if !self.enabled {
            return None;
        }
        let value = {
            let entry = self.entries.get(key)?;
            (entry.stored_at.elapsed() < self.ttl).then(|| entry.value.clone())
        };
        match value {
            Some(value) => serde_json::from_value(value).ok(),
            None => {
                self.entries.remove(key);
                None
            }
        }
    }

    /// Store `value` if no revalidation happened since `loaded_at`.
    /// Returns whether the value was kept.
    pub fn insert<T: Serialize>(
        &self,
        key: &str,
        tags: Vec<CacheTag>,
        value: &T,
        loaded_at: u64,
    ) -> bool {
        if !self.enabled || self.epoch() != loaded_at {
            return false;
        }
        let Ok(value) = serde_json::to_value(value) else {
            return false;
        };
        if !self.entries.contains_key(key) && self.entries.len() >= self.max_entries {
            self.make_room();
        }
        self.entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                tags,
                stored_at: Instant::now(),
            },
        );
        // A revalidation may have slipped in between the check and the insert.
        if self.epoch() != loaded_at {
            self.entries.remove(key);
            return false;
        }
        true
    }

    /// Drop expired entries, then the oldest one if still at capacity.
    fn make_room(&self) {
        let ttl = self.ttl;
        self.entries.retain(|_, entry| entry.stored_at.elapsed() < ttl);
        if self.entries.len() < self.max_entries {
            return;
        }
        let oldest = self
            .entries
            .iter()
            .min_by_key(|entry| entry.stored_at)
            .map(|entry| entry.key().clone());
        if let Some(key) = oldest {
            self.entries.remove(&key);
            debug!(key = %key, "cache full, evicted oldest entry");
        }
    }

    /// Drop every entry carrying any of `tags`. Returns the number removed.
    pub fn revalidate(&self, tags: &[CacheTag]) -> usize {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| !entry.tags.iter().any(|t| tags.contains(t)));
        let removed = before.saturating_sub(self.entries.len());
        debug!(
            tags = ?tags.iter().map(CacheTag::as_str).collect::<Vec<_>>(),
            removed,
            "cache revalidated"
        );
        removed
    }

    /// Return the cached value for `key`, or run `load` and cache its result.
    pub async fn get_or_load<T, F, Fut>(&self, key: &str, tags: Vec<CacheTag>, load: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if let Some(hit) = self.get::<T>(key) {
            debug!(key, "cache hit");
            return Ok(hit);
        }
        debug!(key, "cache miss");
        let loaded_at = self.epoch();
        let value = load().await?;
        self.insert(key, tags, &value, loaded_at);
        Ok(value)
    }
}

// ── Revalidation helpers ──────────────────────────────────────────────

pub fn revalidate_course(cache: &DataCache, id: i64) {
    cache.revalidate(&[
        CacheTag::global(Entity::Courses),
        CacheTag::id(Entity::Courses, id),
    ]);
}

pub fn revalidate_section(cache: &DataCache, id: i64, course_id: i64) {
    cache.revalidate(&[
        CacheTag::global(Entity::CourseSections),
        CacheTag::id(Entity::CourseSections, id),
        CacheTag::course(Entity::CourseSections, course_id),
    ]);
}

pub fn revalidate_lesson(cache: &DataCache, id: i64, section_id: i64) {
    cache.revalidate(&[
        CacheTag::global(Entity::Lessons),
        CacheTag::id(Entity::Lessons, id),
        CacheTag::section(Entity::Lessons, section_id),
    ]);
}

pub fn revalidate_product(cache: &DataCache, id: i64) {
    cache.revalidate(&[
        CacheTag::global(Entity::Products),
        CacheTag::id(Entity::Products, id),
    ]);
}

pub fn revalidate_purchase(cache: &DataCache, id: i64, user_id: &str) {
    cache.revalidate(&[
        CacheTag::global(Entity::Purchases),
        CacheTag::id(Entity::Purchases, id),
        CacheTag::user(Entity::Purchases, user_id),
    ]);
}

pub fn revalidate_user(cache: &DataCache, user_id: &str) {
    cache.revalidate(&[
        CacheTag::global(Entity::Users),
        CacheTag::id(Entity::Users, user_id),
    ]);
}

pub fn revalidate_user_course_access(cache: &DataCache, user_id: &str) {
    cache.revalidate(&[
        CacheTag::global(Entity::UserCourseAccess),
        CacheTag::user(Entity::UserCourseAccess, user_id),
    ]);
}

pub fn revalidate_lesson_complete(cache: &DataCache, user_id: &str, lesson_id: i64) {
    cache.revalidate(&[
        CacheTag::global(Entity::UserLessonComplete),
        CacheTag::user(Entity::UserLessonComplete, user_id),
        CacheTag::id(
            Entity::UserLessonComplete,
            format!("{}:{}", user_id, lesson_id),
        ),
    ]);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_formats() {
        assert_eq!(CacheTag::global(Entity::Lessons).as_str(), "global:lessons");
        assert_eq!(CacheTag::id(Entity::Courses, 7).as_str(), "id:7-courses");
        assert_eq!(
            CacheTag::course(Entity::CourseSections, 3).as_str(),
            "course:3-course_sections"
        );
        assert_eq!(
            CacheTag::user(Entity::Purchases, "user_1").as_str(),
            "user:user_1-purchases"
        );
    }

    #[test]
    fn test_insert_and_get() {
        let cache = DataCache::new(true);
        let epoch = cache.epoch();
        assert!(cache.insert("k", vec![CacheTag::global(Entity::Courses)], &42i64, epoch));
        assert_eq!(cache.get::<i64>("k"), Some(42));
    }

    #[test]
    fn test_revalidate_drops_only_matching_entries() {
        let cache = DataCache::new(true);
        let epoch = cache.epoch();
        cache.insert("a", vec![CacheTag::id(Entity::Lessons, 1)], &1i64, epoch);
        cache.insert("b", vec![CacheTag::id(Entity::Lessons, 2)], &2i64, epoch);

        let removed = cache.revalidate(&[CacheTag::id(Entity::Lessons, 1)]);
        assert_eq!(removed, 1);
        assert!(cache.get::<i64>("a").is_none());
        assert_eq!(cache.get::<i64>("b"), Some(2));
    }

    #[test]
    fn test_stale_load_is_not_stored() {
        let cache = DataCache::new(true);
        let loaded_at = cache.epoch();
        revalidate_section(&cache, 1, 1);
        assert!(!cache.insert("k", vec![], &"stale", loaded_at));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_insert_past_capacity_evicts_oldest() {
        let cache = DataCache::new(true).with_limits(2, DEFAULT_TTL);
        let epoch = cache.epoch();
        cache.insert("lesson_page:1:1:u1:user", vec![], &1i64, epoch);
        std::thread::sleep(Duration::from_millis(2));
        cache.insert("lesson_page:1:1:u2:user", vec![], &2i64, epoch);
        std::thread::sleep(Duration::from_millis(2));
        cache.insert("lesson_page:1:1:u3:user", vec![], &3i64, epoch);

        assert_eq!(cache.len(), 2);
        assert!(cache.get::<i64>("lesson_page:1:1:u1:user").is_none());
        assert_eq!(cache.get::<i64>("lesson_page:1:1:u3:user"), Some(3));
    }

    #[test]
    fn test_overwriting_a_key_at_capacity_keeps_others() {
        let cache = DataCache::new(true).with_limits(2, DEFAULT_TTL);
        let epoch = cache.epoch();
        cache.insert("a", vec![], &1i64, epoch);
        cache.insert("b", vec![], &2i64, epoch);
        cache.insert("b", vec![], &3i64, epoch);
        assert_eq!(cache.get::<i64>("a"), Some(1));
        assert_eq!(cache.get::<i64>("b"), Some(3));
    }

    #[test]
    fn test_expired_entry_is_dropped_on_read() {
        let cache = DataCache::new(true).with_limits(10, Duration::ZERO);
        let epoch = cache.epoch();
        assert!(cache.insert("k", vec![], &1i64, epoch));
        assert!(cache.get::<i64>("k").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_disabled_cache_never_stores() {
        let cache = DataCache::new(false);
        let epoch = cache.epoch();
        assert!(!cache.insert("k", vec![], &1i64, epoch));
        assert!(cache.get::<i64>("k").is_none());
    }

    #[tokio::test]
    async fn test_get_or_load_reloads_after_revalidation() {
        let cache = DataCache::new(true);
        let tags = || vec![CacheTag::section(Entity::Lessons, 5)];

        let first: i64 = cache.get_or_load("k", tags(), || async { Ok(1) }).await.unwrap();
        let cached: i64 = cache.get_or_load("k", tags(), || async { Ok(2) }).await.unwrap();
        assert_eq!((first, cached), (1, 1));

        revalidate_lesson(&cache, 9, 5);
        let reloaded: i64 = cache.get_or_load("k", tags(), || async { Ok(3) }).await.unwrap();
        assert_eq!(reloaded, 3);
    }

    #[tokio::test]
    async fn test_get_or_load_propagates_errors_without_caching() {
        let cache = DataCache::new(true);
        let result: Result<i64> = cache
            .get_or_load("k", vec![], || async { Err(anyhow::anyhow!("store down")) })
            .await;
        assert!(result.is_err());
        assert!(cache.is_empty());
    }
}
