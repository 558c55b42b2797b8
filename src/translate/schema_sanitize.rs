//! JSON Schema sanitizer for Gemini/Antigravity tool parameter schemas
//! (spec §4.2). Gemini accepts a narrow JSON Schema subset; this rewrites
//! an arbitrary schema into that subset.
//!
//! Traversal is depth-first and bottom-up — children are sanitized before
//! their parent's own rewrite rules run, per spec §4.2 ("deepest paths are
//! rewritten first so parent rewrites do not invalidate child references").
//! The result is idempotent: `sanitize(sanitize(s)) == sanitize(s)`.

use serde_json::{Map, Value, json};

const UNSUPPORTED_KEYWORDS: &[&str] = &[
    "minLength",
    "maxLength",
    "exclusiveMinimum",
    "exclusiveMaximum",
    "pattern",
    "minItems",
    "maxItems",
    "format",
    "default",
    "examples",
    "$schema",
    "$defs",
    "definitions",
    "const",
    "$ref",
    "additionalProperties",
    "propertyNames",
    "patternProperties",
    "anyOf",
    "oneOf",
    "allOf",
    "not",
    "dependencies",
    "dependentSchemas",
    "dependentRequired",
    "title",
    "if",
    "then",
    "else",
    "contentMediaType",
    "contentEncoding",
];

pub fn sanitize(schema: &Value) -> Value {
    match schema.as_object() {
        Some(obj) => Value::Object(sanitize_map(obj)),
        None => schema.clone(),
    }
}

fn sanitize_map(obj: &Map<String, Value>) -> Map<String, Value> {
    let mut working = obj.clone();

    sanitize_children_first(&mut working);

    if let Some(const_val) = working.remove("const") {
        working.insert("enum".to_string(), Value::Array(vec![const_val]));
    }

    merge_all_of(&mut working);
    flatten_any_of_one_of(&mut working);
    flatten_type_array(&mut working);

    for key in UNSUPPORTED_KEYWORDS {
        working.remove(*key);
    }

    prune_required(&mut working);
    stringify_enum(&mut working);
    inject_reason_if_empty_object(&mut working);

    working
}

fn sanitize_children_first(working: &mut Map<String, Value>) {
    if let Some(Value::Object(props)) = working.get("properties").cloned() {
        let mut new_props = Map::new();
        for (k, v) in props {
            new_props.insert(k, sanitize(&v));
        }
        working.insert("properties".to_string(), Value::Object(new_props));
    }

    if let Some(items) = working.get("items").cloned() {
        let new_items = match items {
            Value::Array(arr) => Value::Array(arr.iter().map(sanitize).collect()),
            other => sanitize(&other),
        };
        working.insert("items".to_string(), new_items);
    }

    for key in ["allOf", "anyOf", "oneOf"] {
        if let Some(Value::Array(arr)) = working.get(key).cloned() {
            working.insert(key.to_string(), Value::Array(arr.iter().map(sanitize).collect()));
        }
    }
}

fn merge_all_of(working: &mut Map<String, Value>) {
    let Some(Value::Array(members)) = working.remove("allOf") else {
        return;
    };

    let mut merged_props = working.get("properties").and_then(Value::as_object).cloned().unwrap_or_default();
    let mut merged_required: Vec<String> = working
        .get("required")
        .and_then(Value::as_array)
        .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
        .unwrap_or_default();

    for member in &members {
        let Some(member_obj) = member.as_object() else { continue };
        if let Some(props) = member_obj.get("properties").and_then(Value::as_object) {
            for (k, v) in props {
                merged_props.insert(k.clone(), v.clone());
            }
        }
        if let Some(required) = member_obj.get("required").and_then(Value::as_array) {
            for name in required.iter().filter_map(Value::as_str) {
                if !merged_required.iter().any(|r| r == name) {
                    merged_required.push(name.to_string());
                }
            }
        }
        for (k, v) in member_obj {
            if k != "properties" && k != "required" && !working.contains_key(k) {
                working.insert(k.clone(), v.clone());
            }
        }
    }

    if !merged_props.is_empty() {
        working.insert("properties".to_string(), Value::Object(merged_props));
    }
    if !merged_required.is_empty() {
        working.insert(
            "required".to_string(),
            Value::Array(merged_required.into_iter().map(Value::String).collect()),
        );
    }
}

fn flatten_any_of_one_of(working: &mut Map<String, Value>) {
    for key in ["anyOf", "oneOf"] {
        let Some(Value::Array(branches)) = working.remove(key) else {
            continue;
        };
        if let Some(best) = pick_richest_branch(&branches) {
            if let Some(best_obj) = best.as_object() {
                for (k, v) in best_obj {
                    working.entry(k.clone()).or_insert_with(|| v.clone());
                }
            }
        }
    }
}

fn pick_richest_branch(branches: &[Value]) -> Option<Value> {
    let non_null: Vec<&Value> = branches.iter().filter(|b| branch_rank(b) != BranchRank::Null).collect();
    let pool: Vec<&Value> = if non_null.is_empty() { branches.iter().collect() } else { non_null };
    pool.into_iter().max_by_key(|b| branch_rank(b)).cloned()
}

#[derive(PartialEq, Eq, PartialOrd, Ord)]
enum BranchRank {
    Null,
    Scalar,
    Array,
    Object,
}

fn branch_rank(branch: &Value) -> BranchRank {
    match branch.get("type").and_then(Value::as_str) {
        Some("null") => BranchRank::Null,
        Some("object") => BranchRank::Object,
        Some("array") => BranchRank::Array,
        _ => BranchRank::Scalar,
    }
}

fn flatten_type_array(working: &mut Map<String, Value>) {
    let Some(Value::Array(types)) = working.get("type").cloned() else {
        return;
    };
    let chosen = types
        .iter()
        .find(|t| t.as_str() != Some("null"))
        .or_else(|| types.first())
        .cloned();
    if let Some(t) = chosen {
        working.insert("type".to_string(), t);
    }
}

fn prune_required(working: &mut Map<String, Value>) {
    let Some(required) = working.get("required").and_then(Value::as_array).cloned() else {
        return;
    };
    let props = working.get("properties").and_then(Value::as_object).cloned().unwrap_or_default();
    let pruned: Vec<Value> = required.into_iter().filter(|r| r.as_str().is_some_and(|n| props.contains_key(n))).collect();
    if pruned.is_empty() {
        working.remove("required");
    } else {
        working.insert("required".to_string(), Value::Array(pruned));
    }
}

fn stringify_enum(working: &mut Map<String, Value>) {
    let Some(Value::Array(values)) = working.get("enum").cloned() else {
        return;
    };
    let stringified: Vec<Value> = values
        .into_iter()
        .map(|v| match v {
            Value::String(_) => v,
            other => Value::String(scalar_to_string(&other)),
        })
        .collect();
    working.insert("enum".to_string(), Value::Array(stringified));
}

fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

fn inject_reason_if_empty_object(working: &mut Map<String, Value>) {
    let is_object_type = working.get("type").and_then(Value::as_str) == Some("object");
    let has_props = working.get("properties").and_then(Value::as_object).is_some_and(|p| !p.is_empty());
    let truly_empty = working.is_empty();

    if truly_empty || (is_object_type && !has_props) {
        let mut props = Map::new();
        props.insert("reason".to_string(), json!({"type": "string"}));
        working.insert("type".to_string(), json!("object"));
        working.insert("properties".to_string(), Value::Object(props));
        working.insert("required".to_string(), json!(["reason"]));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn const_becomes_singleton_enum() {
        let schema = json!({"type": "string", "const": "fixed"});
        let out = sanitize(&schema);
        assert_eq!(out["enum"], json!(["fixed"]));
        assert!(out.get("const").is_none());
    }

    #[test]
    fn any_of_picks_string_branch_over_null() {
        let schema = json!({"anyOf": [{"type": "string"}, {"type": "null"}]});
        let out = sanitize(&schema);
        assert_eq!(out["type"], "string");
        assert!(out.get("anyOf").is_none());
    }

    #[test]
    fn any_of_prefers_object_over_scalar() {
        let schema = json!({"anyOf": [{"type": "string"}, {"type": "object", "properties": {"a": {"type": "string"}}}]});
        let out = sanitize(&schema);
        assert_eq!(out["type"], "object");
    }

    #[test]
    fn all_of_merges_properties_and_required() {
        let schema = json!({
            "allOf": [
                {"properties": {"a": {"type": "string"}}, "required": ["a"]},
                {"properties": {"b": {"type": "number"}}, "required": ["b"]}
            ]
        });
        let out = sanitize(&schema);
        assert!(out["properties"]["a"].is_object());
        assert!(out["properties"]["b"].is_object());
        let required: Vec<&str> = out["required"].as_array().unwrap().iter().map(|v| v.as_str().unwrap()).collect();
        assert!(required.contains(&"a") && required.contains(&"b"));
    }

    #[test]
    fn drops_unsupported_keywords() {
        let schema = json!({"type": "string", "minLength": 3, "pattern": "^a", "format": "email", "$schema": "x"});
        let out = sanitize(&schema);
        assert_eq!(out.as_object().unwrap().len(), 1);
        assert_eq!(out["type"], "string");
    }

    #[test]
    fn prunes_required_not_in_properties() {
        let schema = json!({"type": "object", "properties": {"a": {"type": "string"}}, "required": ["a", "ghost"]});
        let out = sanitize(&schema);
        assert_eq!(out["required"], json!(["a"]));
    }

    #[test]
    fn type_array_flattens_to_first_non_null() {
        let schema = json!({"type": ["null", "string"]});
        let out = sanitize(&schema);
        assert_eq!(out["type"], "string");
    }

    #[test]
    fn empty_object_schema_gets_reason_property() {
        let schema = json!({"type": "object", "properties": {}});
        let out = sanitize(&schema);
        assert_eq!(out["properties"]["reason"]["type"], "string");
        assert_eq!(out["required"], json!(["reason"]));
    }

    #[test]
    fn truly_empty_schema_gets_reason_property() {
        let schema = json!({});
        let out = sanitize(&schema);
        assert_eq!(out["type"], "object");
        assert_eq!(out["required"], json!(["reason"]));
    }

    #[test]
    fn sanitizer_is_idempotent() {
        let schemas = vec![
            json!({"const": 5}),
            json!({"anyOf": [{"type": "string"}, {"type": "null"}]}),
            json!({"allOf": [{"properties": {"a": {"type": "string"}}}]}),
            json!({"type": ["null", "number"], "minimum": 1}),
            json!({}),
            json!({"type": "object", "properties": {"nested": {"const": "x"}}}),
        ];
        for schema in schemas {
            let once = sanitize(&schema);
            let twice = sanitize(&once);
            assert_eq!(once, twice, "sanitize should be idempotent for {schema}");
        }
    }

    #[test]
    fn deep_nesting_sanitized_bottom_up() {
        let schema = json!({
            "type": "object",
            "properties": {
                "inner": {"type": "object", "properties": {"leaf": {"const": "v"}}}
            }
        });
        let out = sanitize(&schema);
        assert_eq!(out["properties"]["inner"]["properties"]["leaf"]["enum"], json!(["v"]));
    }
}
