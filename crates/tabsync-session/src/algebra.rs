//! A concrete [`OpAlgebra`] for tests and examples only.
//!
//! The operation-transform algebra itself is out of scope for the core,
//! but a test double needs something to apply. `JsonPatchAlgebra`
//! implements the narrow slice of ShareDB's json0 operation shape this
//! repo's tests exercise: numeric-add (`na`) and value-replace
//! (`oi`/`od`) at a JSON-pointer-like path (`p`), e.g.
//! `[{"p": ["n"], "na": 1}]`.

use tabsync_protocol::{Op, OpAlgebra, OpApplyError};

/// A minimal json0-style operation applier.
///
/// Only implements what the bundled scenarios need; anything else is a
/// clean [`OpApplyError`] rather than a partial mutation.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonPatchAlgebra;

impl OpAlgebra for JsonPatchAlgebra {
    fn apply(&self, data: &mut serde_json::Value, op: &Op) -> Result<(), OpApplyError> {
        let components = op
            .as_array()
            .ok_or_else(|| OpApplyError::new("operation must be a json0 component array"))?;

        // Validate every component before mutating anything, so a
        // mid-batch failure never leaves `data` partially applied.
        let mut planned = Vec::with_capacity(components.len());
        for component in components {
            planned.push(plan_component(data, component)?);
        }
        for step in planned {
            step.execute(data);
        }
        Ok(())
    }
}

enum Step<'a> {
    NumericAdd { path: Vec<&'a str>, delta: f64 },
    Replace { path: Vec<&'a str>, value: serde_json::Value },
}

impl Step<'_> {
    fn execute(self, data: &mut serde_json::Value) {
        match self {
            Step::NumericAdd { path, delta } => {
                let slot = navigate_mut(data, &path);
                let current = slot.as_f64().unwrap_or(0.0);
                *slot = serde_json::json!(current + delta);
            }
            Step::Replace { path, value } => {
                *navigate_mut(data, &path) = value;
            }
        }
    }
}

fn plan_component<'a>(
    data: &serde_json::Value,
    component: &'a serde_json::Value,
) -> Result<Step<'a>, OpApplyError> {
    let path = component
        .get("p")
        .and_then(|p| p.as_array())
        .ok_or_else(|| OpApplyError::new("operation component missing path `p`"))?
        .iter()
        .map(|segment| {
            segment
                .as_str()
                .ok_or_else(|| OpApplyError::new("path segments must be strings"))
        })
        .collect::<Result<Vec<_>, _>>()?;

    if let Some(delta) = component.get("na") {
        let delta = delta
            .as_f64()
            .ok_or_else(|| OpApplyError::new("`na` must be numeric"))?;
        // A missing path segment is the same as a `null` target here:
        // `navigate_mut` creates it and `execute` treats it as zero.
        // Only an existing-but-non-numeric target is rejected.
        if let Ok(current) = navigate(data, &path) {
            if !current.is_number() && !current.is_null() {
                return Err(OpApplyError::new("`na` target is not numeric"));
            }
        }
        return Ok(Step::NumericAdd { path, delta });
    }
    if let Some(value) = component.get("oi") {
        navigate(data, &path)?;
        return Ok(Step::Replace { path, value: value.clone() });
    }
    Err(OpApplyError::new("unsupported operation component"))
}

fn navigate<'a>(
    data: &'a serde_json::Value,
    path: &[&str],
) -> Result<&'a serde_json::Value, OpApplyError> {
    let mut cursor = data;
    for segment in path {
        cursor = cursor
            .get(segment)
            .ok_or_else(|| OpApplyError::new(format!("no such path segment `{segment}`")))?;
    }
    Ok(cursor)
}

fn navigate_mut<'a>(data: &'a mut serde_json::Value, path: &[&str]) -> &'a mut serde_json::Value {
    let mut cursor = data;
    for segment in path {
        if !cursor.is_object() {
            *cursor = serde_json::json!({});
        }
        cursor = cursor
            .as_object_mut()
            .expect("just coerced to object")
            .entry(*segment)
            .or_insert(serde_json::Value::Null);
    }
    cursor
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_add_increments_existing_field() {
        let mut data = serde_json::json!({"n": 1});
        let op = serde_json::json!([{"p": ["n"], "na": 1}]);
        JsonPatchAlgebra.apply(&mut data, &op).unwrap();
        assert_eq!(data, serde_json::json!({"n": 2}));
    }

    #[test]
    fn numeric_add_on_missing_field_treats_as_zero() {
        let mut data = serde_json::json!({});
        let op = serde_json::json!([{"p": ["count"], "na": 5}]);
        JsonPatchAlgebra.apply(&mut data, &op).unwrap();
        assert_eq!(data, serde_json::json!({"count": 5.0}));
    }

    #[test]
    fn replace_sets_nested_value() {
        let mut data = serde_json::json!({"title": "old"});
        let op = serde_json::json!([{"p": ["title"], "oi": "new"}]);
        JsonPatchAlgebra.apply(&mut data, &op).unwrap();
        assert_eq!(data["title"], "new");
    }

    #[test]
    fn invalid_component_leaves_data_untouched() {
        let mut data = serde_json::json!({"n": 1});
        let original = data.clone();
        let op = serde_json::json!([{"p": ["n"], "na": 1}, {"p": ["missing"], "unsupported": true}]);
        let result = JsonPatchAlgebra.apply(&mut data, &op);
        assert!(result.is_err());
        assert_eq!(data, original);
    }

    #[test]
    fn na_on_non_numeric_target_is_rejected() {
        let mut data = serde_json::json!({"n": "not a number"});
        let op = serde_json::json!([{"p": ["n"], "na": 1}]);
        assert!(JsonPatchAlgebra.apply(&mut data, &op).is_err());
    }
}
