#![forbid(unsafe_code)]

//! Last-resort tree search over untyped payloads.
//!
//! Only used once the declarative path tables come up empty, or to locate
//! renderers whose position in the payload changes between upstream
//! revisions. The walk is depth bounded and keeps a visited set keyed by node
//! address, so shared or self-referencing inputs cannot loop forever.

use std::collections::HashSet;

use serde_json::{Map, Value};

pub const DEFAULT_MAX_DEPTH: usize = 64;

/// What the walker should do after looking at an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Descend,
    Skip,
    Stop,
}

pub struct TreeVisitor {
    max_depth: usize,
    visited: HashSet<*const Value>,
}

impl TreeVisitor {
    pub fn new(max_depth: usize) -> Self {
        Self {
            max_depth,
            visited: HashSet::new(),
        }
    }

    /// Walks objects in document order. Returns `false` when the callback
    /// asked to stop.
    pub fn walk<'a>(
        &mut self,
        root: &'a Value,
        visit: &mut dyn FnMut(&'a Map<String, Value>) -> Step,
    ) -> bool {
        self.walk_at(root, 0, visit)
    }

    fn walk_at<'a>(
        &mut self,
        value: &'a Value,
        depth: usize,
        visit: &mut dyn FnMut(&'a Map<String, Value>) -> Step,
    ) -> bool {
        if depth > self.max_depth {
            return true;
        }
        if !self.visited.insert(value as *const Value) {
            return true;
        }
        match value {
            Value::Object(map) => match visit(map) {
                Step::Stop => false,
                Step::Skip => true,
                Step::Descend => map
                    .values()
                    .all(|child| self.walk_at(child, depth + 1, visit)),
            },
            Value::Array(items) => items
                .iter()
                .all(|child| self.walk_at(child, depth + 1, visit)),
            _ => true,
        }
    }
}

/// Finds the first object for which `f` returns a value.
pub fn find_map<'a, T>(
    root: &'a Value,
    max_depth: usize,
    mut f: impl FnMut(&'a Map<String, Value>) -> Option<T>,
) -> Option<T> {
    let mut found = None;
    TreeVisitor::new(max_depth).walk(root, &mut |map| match f(map) {
        Some(value) => {
            found = Some(value);
            Step::Stop
        }
        None => Step::Descend,
    });
    found
}

/// Returns the value stored under the first occurrence of `key`.
pub fn find_key<'a>(root: &'a Value, key: &str, max_depth: usize) -> Option<&'a Value> {
    find_map(root, max_depth, |map| map.get(key))
}

/// Collects every `{key: value}` pair whose key is in `keys`, in document
/// order, without descending into a matched node. Each hit is returned as a
/// single-key object so the renderer name travels with its payload.
pub fn collect_keyed(root: &Value, keys: &[&str], max_depth: usize) -> Vec<Value> {
    let mut hits = Vec::new();
    TreeVisitor::new(max_depth).walk(root, &mut |map| {
        let mut matched = false;
        for (key, value) in map {
            if keys.contains(&key.as_str()) {
                let mut single = Map::new();
                single.insert(key.clone(), value.clone());
                hits.push(Value::Object(single));
                matched = true;
            }
        }
        if matched { Step::Skip } else { Step::Descend }
    });
    hits
}
