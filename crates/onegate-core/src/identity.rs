//! Bidirectional mapping between raw platform identifiers and numeric aliases.
//!
//! Protocols that require numeric ids (OneBot v11) translate every raw
//! identifier through an [`IdentityMap`]. Aliases are namespaced by field
//! (`user_id`, `group_id`, `message_id`, ...), start at `1` within each
//! namespace and are never reused. The map lives for the whole process so
//! that aliases stay stable across reconnects.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;
use tracing::trace;

/// Namespace for user identifiers.
pub const USER_NS: &str = "user_id";
/// Namespace for group identifiers.
pub const GROUP_NS: &str = "group_id";
/// Namespace for message identifiers.
pub const MESSAGE_NS: &str = "message_id";

#[derive(Debug, Default)]
struct Namespace {
    by_raw: HashMap<String, i64>,
    by_alias: HashMap<i64, String>,
    last: i64,
}

/// Thread-safe registry of identifier aliases.
///
/// Each namespace carries its own lock so that allocation in one namespace
/// never contends with lookups in another.
#[derive(Debug, Default)]
pub struct IdentityMap {
    namespaces: RwLock<HashMap<String, Arc<RwLock<Namespace>>>>,
}

impl IdentityMap {
    /// Creates an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    fn namespace(&self, ns: &str) -> Arc<RwLock<Namespace>> {
        if let Some(space) = self.namespaces.read().get(ns) {
            return space.clone();
        }
        self.namespaces
            .write()
            .entry(ns.to_string())
            .or_default()
            .clone()
    }

    /// Returns the alias for `raw` in `ns`, allocating the next one if unseen.
    ///
    /// Repeated calls with the same input return the same alias.
    pub fn to_alias(&self, ns: &str, raw: &str) -> i64 {
        let space = self.namespace(ns);
        if let Some(alias) = space.read().by_raw.get(raw) {
            return *alias;
        }

        let mut space = space.write();
        // Another writer may have allocated while we waited for the lock.
        if let Some(alias) = space.by_raw.get(raw) {
            return *alias;
        }
        space.last += 1;
        let alias = space.last;
        space.by_raw.insert(raw.to_string(), alias);
        space.by_alias.insert(alias, raw.to_string());
        trace!(namespace = ns, raw = raw, alias = alias, "Allocated identifier alias");
        alias
    }

    /// Looks up the raw identifier behind `alias`.
    pub fn from_alias(&self, ns: &str, alias: i64) -> Option<String> {
        let space = self.namespaces.read().get(ns).cloned()?;
        space.read().by_alias.get(&alias).cloned()
    }

    /// Resolves an alias, falling back to its decimal form when it was never
    /// allocated here (ids learned out-of-band by the consumer).
    pub fn resolve(&self, ns: &str, alias: i64) -> String {
        self.from_alias(ns, alias)
            .unwrap_or_else(|| alias.to_string())
    }

    /// Number of aliases allocated in `ns`.
    pub fn len(&self, ns: &str) -> usize {
        self.namespaces
            .read()
            .get(ns)
            .map(|space| space.read().by_raw.len())
            .unwrap_or(0)
    }

    /// Returns `true` if no namespace holds any alias.
    pub fn is_empty(&self) -> bool {
        self.namespaces
            .read()
            .values()
            .all(|space| space.read().by_raw.is_empty())
    }

    /// Replaces every string-valued field named in `fields` with its alias,
    /// recursing into nested objects and arrays. Numeric values are left
    /// untouched.
    pub fn rewrite_fields(&self, value: &mut Value, fields: &[&str], ns: &str) {
        match value {
            Value::Object(map) => {
                for (key, child) in map.iter_mut() {
                    if fields.contains(&key.as_str())
                        && let Value::String(raw) = child
                    {
                        *child = Value::from(self.to_alias(ns, raw));
                    } else {
                        self.rewrite_fields(child, fields, ns);
                    }
                }
            }
            Value::Array(items) => {
                for item in items {
                    self.rewrite_fields(item, fields, ns);
                }
            }
            _ => {}
        }
    }

    /// Inverse of [`rewrite_fields`](Self::rewrite_fields): replaces numeric
    /// (or numeric-string) aliases with raw identifiers.
    pub fn restore_fields(&self, value: &mut Value, fields: &[&str], ns: &str) {
        match value {
            Value::Object(map) => {
                for (key, child) in map.iter_mut() {
                    if fields.contains(&key.as_str())
                        && let Some(alias) = alias_of(child)
                    {
                        *child = Value::String(self.resolve(ns, alias));
                    } else {
                        self.restore_fields(child, fields, ns);
                    }
                }
            }
            Value::Array(items) => {
                for item in items {
                    self.restore_fields(item, fields, ns);
                }
            }
            _ => {}
        }
    }
}

fn alias_of(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_alias_round_trip() {
        let map = IdentityMap::new();
        let alias = map.to_alias(USER_NS, "u_abc");
        assert_eq!(map.from_alias(USER_NS, alias).as_deref(), Some("u_abc"));
    }

    #[test]
    fn test_alias_is_stable() {
        let map = IdentityMap::new();
        let first = map.to_alias(USER_NS, "u_abc");
        let second = map.to_alias(USER_NS, "u_abc");
        assert_eq!(first, second);
        assert_eq!(map.len(USER_NS), 1);
    }

    #[test]
    fn test_aliases_start_at_one_per_namespace() {
        let map = IdentityMap::new();
        assert_eq!(map.to_alias(USER_NS, "a"), 1);
        assert_eq!(map.to_alias(USER_NS, "b"), 2);
        assert_eq!(map.to_alias(GROUP_NS, "a"), 1);
        assert_eq!(map.from_alias(GROUP_NS, 2), None);
    }

    #[test]
    fn test_unknown_alias_resolves_to_decimal() {
        let map = IdentityMap::new();
        assert_eq!(map.resolve(USER_NS, 42), "42");
        assert!(map.is_empty());
    }

    #[test]
    fn test_rewrite_nested_fields() {
        let map = IdentityMap::new();
        let mut payload = json!({
            "user_id": "alice",
            "sender": { "user_id": "alice", "nickname": "Alice" },
            "members": [{ "user_id": "bob" }],
            "group_id": 77,
        });
        map.rewrite_fields(&mut payload, &["user_id"], USER_NS);
        map.rewrite_fields(&mut payload, &["group_id"], GROUP_NS);

        assert_eq!(payload["user_id"], 1);
        assert_eq!(payload["sender"]["user_id"], 1);
        assert_eq!(payload["members"][0]["user_id"], 2);
        // Already numeric: untouched and nothing allocated.
        assert_eq!(payload["group_id"], 77);
        assert_eq!(map.len(GROUP_NS), 0);

        map.restore_fields(&mut payload, &["user_id"], USER_NS);
        assert_eq!(payload["sender"]["user_id"], "alice");
        assert_eq!(payload["members"][0]["user_id"], "bob");
    }

    #[test]
    fn test_concurrent_allocation_stays_bijective() {
        let map = Arc::new(IdentityMap::new());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let map = map.clone();
                std::thread::spawn(move || {
                    (0..200)
                        .map(|i| map.to_alias(USER_NS, &format!("user-{}", (i + t) % 100)))
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(map.len(USER_NS), 100);
        for i in 0..100 {
            let raw = format!("user-{i}");
            let alias = map.to_alias(USER_NS, &raw);
            assert!((1..=100).contains(&alias));
            assert_eq!(map.from_alias(USER_NS, alias), Some(raw));
        }
    }
}
