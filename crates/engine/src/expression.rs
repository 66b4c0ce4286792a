//! Boolean expressions of `if` and `loop` controls, evaluated with Rhai.
//!
//! Every variable is visible by name (a local shadows a global of the same
//! name); the full scopes are also available as the maps `globals` and
//! `locals`, which is the only way to reach names that are not valid
//! identifiers or collide with Rhai keywords (`locals["order-id"]`).
//! Absent variables, syntax errors, an exhausted operation budget and
//! non-boolean results are all evaluation errors; the engine never guesses
//! a branch.

use rhai::{Dynamic, Engine, Map, Scope as RhaiScope};
use serde_json::Value;

use crate::variables::Variables;

pub struct ExpressionEvaluator {
    engine: Engine,
}

impl ExpressionEvaluator {
    /// `max_operations` bounds the work a single evaluation may do.
    pub fn new(max_operations: u64) -> Self {
        let mut engine = Engine::new();
        engine.set_max_operations(max_operations);
        engine.set_max_expr_depths(64, 32);
        Self { engine }
    }

    /// Evaluate `expression` against `variables`.
    ///
    /// Returns the failure message on error.
    pub fn evaluate(&self, expression: &str, variables: &Variables) -> Result<bool, String> {
        let mut scope = RhaiScope::new();
        scope.push_constant("globals", scope_map(variables.global.iter()));
        scope.push_constant("locals", scope_map(variables.local.iter()));
        for (name, value) in variables.global.iter().chain(variables.local.iter()) {
            if is_identifier(name) {
                scope.push_constant_dynamic(name.clone(), json_to_dynamic(value));
            }
        }

        let result = self
            .engine
            .eval_expression_with_scope::<Dynamic>(&mut scope, expression)
            .map_err(|e| e.to_string())?;

        result
            .as_bool()
            .map_err(|type_name| format!("expression evaluated to {type_name}, expected a boolean"))
    }
}

fn scope_map<'a>(entries: impl Iterator<Item = (&'a String, &'a Value)>) -> Map {
    entries
        .map(|(k, v)| (k.as_str().into(), json_to_dynamic(v)))
        .collect()
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn json_to_dynamic(value: &Value) -> Dynamic {
    match value {
        Value::Null => Dynamic::UNIT,
        Value::Bool(b) => Dynamic::from(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Dynamic::from(i)
            } else if let Some(f) = n.as_f64() {
                Dynamic::from(f)
            } else {
                Dynamic::UNIT
            }
        }
        Value::String(s) => Dynamic::from(s.clone()),
        Value::Array(arr) => {
            let items: rhai::Array = arr.iter().map(json_to_dynamic).collect();
            Dynamic::from(items)
        }
        Value::Object(obj) => {
            let mut map = Map::new();
            for (k, v) in obj {
                map.insert(k.as_str().into(), json_to_dynamic(v));
            }
            Dynamic::from(map)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::variables::Scope;
    use serde_json::json;

    fn vars(global: Value, local: Value) -> Variables {
        Variables::new(Scope::from_value(global).unwrap(), Scope::from_value(local).unwrap())
    }

    fn eval(expression: &str, variables: &Variables) -> Result<bool, String> {
        ExpressionEvaluator::new(10_000).evaluate(expression, variables)
    }

    #[test]
    fn compares_numbers() {
        assert_eq!(eval("x > 0", &vars(json!({}), json!({ "x": 1 }))), Ok(true));
        assert_eq!(eval("x > 0", &vars(json!({}), json!({ "x": -1 }))), Ok(false));
        assert_eq!(eval("ratio >= 0.5", &vars(json!({ "ratio": 0.75 }), json!({}))), Ok(true));
    }

    #[test]
    fn locals_shadow_globals() {
        let v = vars(json!({ "x": 5 }), json!({ "x": -5 }));
        assert_eq!(eval("x < 0", &v), Ok(true));
        assert_eq!(eval("globals.x > 0", &v), Ok(true));
    }

    #[test]
    fn nested_values_and_odd_names_are_reachable() {
        let v = vars(
            json!({ "order": { "items": [1, 2, 3], "status": "open" } }),
            json!({ "retry-count": 2 }),
        );
        assert_eq!(eval(r#"order.status == "open" && order.items.len() == 3"#, &v), Ok(true));
        assert_eq!(eval(r#"locals["retry-count"] == 2"#, &v), Ok(true));
    }

    #[test]
    fn absent_variables_are_errors() {
        assert!(eval("missing > 0", &vars(json!({}), json!({}))).is_err());
    }

    #[test]
    fn malformed_and_non_boolean_expressions_are_errors() {
        let v = vars(json!({ "x": 1 }), json!({}));
        assert!(eval("x >", &v).is_err());
        assert!(eval("x + 1", &v).unwrap_err().contains("expected a boolean"));
    }
}
