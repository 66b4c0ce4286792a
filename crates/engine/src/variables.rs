//! Global and local variable scopes.
//!
//! A scope is a JSON object mapping variable names to JSON values. The rules
//! are deliberately small:
//! - reading an absent key yields `None` (a stored JSON `null` is `Some(Null)`);
//! - merging a patch is a shallow, top-level key overwrite: every key of the
//!   patch replaces the key of the same name, nested objects are *not*
//!   merged, keys absent from the patch are kept.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::EngineError;

/// Which of the two scopes an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeKind {
    Global,
    Local,
}

/// One variable scope document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Scope(Map<String, Value>);

impl Scope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept a JSON object; `null` is treated as the empty scope.
    pub fn from_value(value: Value) -> Result<Self, EngineError> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            Value::Null => Ok(Self::new()),
            other => Err(EngineError::InvalidVariables(format!(
                "expected a JSON object, got {other}"
            ))),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.0.insert(key.into(), value);
    }

    /// Shallow top-level merge of `patch` into this scope.
    pub fn merge(&mut self, patch: &Map<String, Value>) {
        for (key, value) in patch {
            self.0.insert(key.clone(), value.clone());
        }
    }

    /// Like [`Scope::merge`], returning the merged document and leaving
    /// `self` untouched.
    pub fn merged(&self, patch: &Map<String, Value>) -> Scope {
        let mut next = self.clone();
        next.merge(patch);
        next
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone())
    }
}

impl From<Map<String, Value>> for Scope {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// The pair of scopes an execution carries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Variables {
    pub global: Scope,
    pub local: Scope,
}

impl Variables {
    pub fn new(global: Scope, local: Scope) -> Self {
        Self { global, local }
    }

    pub fn scope(&self, kind: ScopeKind) -> &Scope {
        match kind {
            ScopeKind::Global => &self.global,
            ScopeKind::Local => &self.local,
        }
    }

    pub fn scope_mut(&mut self, kind: ScopeKind) -> &mut Scope {
        match kind {
            ScopeKind::Global => &mut self.global,
            ScopeKind::Local => &mut self.local,
        }
    }

    pub fn read(&self, kind: ScopeKind, key: &str) -> Option<&Value> {
        self.scope(kind).get(key)
    }

    pub fn write(&mut self, kind: ScopeKind, key: impl Into<String>, value: Value) {
        self.scope_mut(kind).set(key, value);
    }

    /// Merge `patch` into one scope and return the resulting document.
    pub fn merge(&mut self, kind: ScopeKind, patch: &Map<String, Value>) -> &Scope {
        let scope = self.scope_mut(kind);
        scope.merge(patch);
        scope
    }

    /// Look a name up the way expressions see it: local shadows global.
    pub fn resolve(&self, key: &str) -> Option<&Value> {
        self.local.get(key).or_else(|| self.global.get(key))
    }

    /// The request document sent to services: `{"global": …, "local": …}`.
    pub fn to_request(&self) -> Value {
        serde_json::json!({
            "global": self.global.to_value(),
            "local": self.local.to_value(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn scope(value: Value) -> Scope {
        Scope::from_value(value).unwrap()
    }

    fn patch(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn absent_keys_are_distinct_from_null() {
        let s = scope(json!({ "present": null }));
        assert_eq!(s.get("present"), Some(&Value::Null));
        assert_eq!(s.get("missing"), None);
    }

    #[test]
    fn merge_overwrites_top_level_keys_only() {
        let mut s = scope(json!({ "a": 1, "nested": { "x": 1, "y": 2 }, "kept": true }));
        s.merge(&patch(json!({ "a": 2, "nested": { "x": 10 }, "new": "v" })));

        assert_eq!(
            s.to_value(),
            json!({ "a": 2, "nested": { "x": 10 }, "kept": true, "new": "v" })
        );
    }

    #[test]
    fn merged_leaves_original_untouched() {
        let s = scope(json!({ "a": 1 }));
        let next = s.merged(&patch(json!({ "b": 2 })));
        assert_eq!(s.to_value(), json!({ "a": 1 }));
        assert_eq!(next.to_value(), json!({ "a": 1, "b": 2 }));
    }

    #[test]
    fn non_object_scopes_are_rejected() {
        assert!(Scope::from_value(json!([1, 2])).is_err());
        assert!(Scope::from_value(json!("x")).is_err());
        assert!(Scope::from_value(Value::Null).unwrap().is_empty());
    }

    #[test]
    fn local_shadows_global_on_resolve() {
        let mut vars = Variables::new(scope(json!({ "x": 1, "g": true })), Scope::new());
        vars.write(ScopeKind::Local, "x", json!(2));

        assert_eq!(vars.resolve("x"), Some(&json!(2)));
        assert_eq!(vars.resolve("g"), Some(&json!(true)));
        assert_eq!(vars.read(ScopeKind::Global, "x"), Some(&json!(1)));
        assert_eq!(vars.resolve("nope"), None);
    }

    #[test]
    fn merge_targets_one_scope() {
        let mut vars = Variables::default();
        vars.merge(ScopeKind::Global, &patch(json!({ "k": "v" })));
        assert_eq!(vars.read(ScopeKind::Global, "k"), Some(&json!("v")));
        assert!(vars.local.is_empty());
        assert_eq!(
            vars.to_request(),
            json!({ "global": { "k": "v" }, "local": {} })
        );
    }
}
