//! The flat name → value map expressions are evaluated against.

use std::collections::BTreeMap;

use ac_core::Value;

/// Prefix under which the rolling actor's projection is stored; `@path`
/// roll-data references resolve against it first.
pub const ROLLING_ACTOR: &str = "rollingActor";

/// Read-only bindings for expression evaluation.
///
/// Keys are full dotted paths (`rollingActor.hp.pct`, `isSpell`). An
/// identifier that is not bound evaluates to `null`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Bindings {
    values: BTreeMap<String, Value>,
}

impl Bindings {
    /// Empty bindings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `key` to `value`, replacing any previous binding.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(key.into(), value.into());
    }

    /// Bind every entry of `values` under `prefix.`.
    pub fn extend_prefixed(&mut self, prefix: &str, values: BTreeMap<String, Value>) {
        for (key, value) in values {
            self.values.insert(format!("{prefix}.{key}"), value);
        }
    }

    /// Look up a path. Missing paths are `null`.
    pub fn get(&self, path: &str) -> Value {
        self.values.get(path).cloned().unwrap_or_default()
    }

    /// Returns true if the path is bound.
    pub fn contains(&self, path: &str) -> bool {
        self.values.contains_key(path)
    }

    /// Resolve an `@path` reference: the rolling actor's data first, then
    /// the top level. A trailing `.mod` is accepted for ability paths.
    pub fn roll_data(&self, path: &str) -> Value {
        let candidates = [Some(path), path.strip_suffix(".mod")];
        for candidate in candidates.into_iter().flatten() {
            let scoped = format!("{ROLLING_ACTOR}.{candidate}");
            if let Some(value) = self.values.get(&scoped) {
                return value.clone();
            }
            if let Some(value) = self.values.get(candidate) {
                return value.clone();
            }
        }
        Value::Null
    }

    /// Iterate over all bindings in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of bound paths.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true if nothing is bound.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl FromIterator<(String, Value)> for Bindings {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}
