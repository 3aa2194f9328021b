//! Path-indexed item registry
//!
//! Items are registered once at startup, in config pre-order, and never
//! removed. Lookups by path go through a [`DashMap`]; ordered listings
//! and pattern queries walk the registration order.

use dashmap::DashMap;
use regex::Regex;
use sh_core::Value;
use std::sync::{Arc, RwLock};
use tracing::warn;

use crate::error::{ItemError, ItemResult};
use crate::expression::ItemScope;
use crate::item::Item;

#[derive(Default)]
pub struct ItemRegistry {
    /// Lookup by path
    by_path: DashMap<String, Arc<Item>>,

    /// Registration order
    order: RwLock<Vec<Arc<Item>>>,
}

/// Compile an item pattern: `*` matches any run of characters
fn path_regex(pattern: &str) -> Option<Regex> {
    let escaped: Vec<String> = pattern.split('*').map(regex::escape).collect();
    let source = format!("^{}$", escaped.join(".*"));
    match Regex::new(&source) {
        Ok(re) => Some(re),
        Err(e) => {
            warn!(pattern = %pattern, error = %e, "Invalid item pattern");
            None
        }
    }
}

impl ItemRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an item under its path
    pub fn insert(&self, item: Arc<Item>) -> ItemResult<()> {
        let path = item.path().to_string();
        if self.by_path.contains_key(&path) {
            return Err(ItemError::DuplicatePath { path });
        }
        self.by_path.insert(path, item.clone());
        self.order
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(item);
        Ok(())
    }

    pub fn get(&self, path: &str) -> Option<Arc<Item>> {
        self.by_path.get(path).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, path: &str) -> bool {
        self.by_path.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.by_path.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_path.is_empty()
    }

    /// All items in registration order
    pub fn all(&self) -> Vec<Arc<Item>> {
        self.order.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Items whose path matches `pattern`
    ///
    /// `*` is a wildcard. An optional `:attr` suffix additionally requires
    /// the attribute in the item's `conf`.
    pub fn match_items(&self, pattern: &str) -> Vec<Arc<Item>> {
        let (path, attr) = match pattern.split_once(':') {
            Some((path, attr)) => (path, Some(attr)),
            None => (pattern, None),
        };
        let Some(regex) = path_regex(path) else {
            return Vec::new();
        };
        self.all()
            .into_iter()
            .filter(|item| regex.is_match(item.path()))
            .filter(|item| attr.map_or(true, |a| item.conf().contains_key(a)))
            .collect()
    }

    /// Items carrying `attr` in their `conf`
    pub fn find_items(&self, attr: &str) -> Vec<Arc<Item>> {
        self.all()
            .into_iter()
            .filter(|item| item.conf().contains_key(attr))
            .collect()
    }

    /// Descendants of `parent` carrying `attr`, in tree order
    pub fn find_children(&self, parent: &Item, attr: &str) -> Vec<Arc<Item>> {
        let mut found = Vec::new();
        for child in parent {
            child.walk(&mut |item| {
                if item.conf().contains_key(attr) {
                    found.push(item.clone());
                }
            });
        }
        found
    }
}

impl ItemScope for ItemRegistry {
    fn value(&self, path: &str) -> Option<Value> {
        self.get(path).map(|item| item.get())
    }

    fn prev_value(&self, path: &str) -> Option<Value> {
        self.get(path).map(|item| item.prev_value())
    }

    fn age(&self, path: &str) -> Option<f64> {
        self.get(path).map(|item| item.age())
    }

    fn prev_age(&self, path: &str) -> Option<f64> {
        self.get(path).map(|item| item.prev_age())
    }
}

impl std::fmt::Debug for ItemRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ItemRegistry")
            .field("items", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_regex() {
        let re = path_regex("house.*.temp").unwrap();
        assert!(re.is_match("house.living.temp"));
        assert!(re.is_match("house.upstairs.bath.temp"));
        assert!(!re.is_match("house.living.temperature"));
        assert!(!re.is_match("garden.temp"));

        let exact = path_regex("a.b").unwrap();
        assert!(exact.is_match("a.b"));
        assert!(!exact.is_match("aXb"));
    }
}
