//! Input schemas synthesized from declared field lists, and argument
//! checking against them.

use crate::config::{FieldDef, FieldType, ToolInputSpec};
use serde_json::{json, Map, Value};

/// Overlay declared fields on a kind's built-in fields. Declared entries win.
pub fn overlay_input_spec(builtin: ToolInputSpec, declared: &ToolInputSpec) -> ToolInputSpec {
    let mut spec = builtin;
    for (name, def) in &declared.param {
        spec.body.remove(name);
        spec.param.insert(name.clone(), def.clone());
    }
    for (name, def) in &declared.body {
        spec.param.remove(name);
        spec.body.insert(name.clone(), def.clone());
    }
    spec
}

/// JSON schema (object type) for a field list.
pub fn synthesize_input_schema(spec: &ToolInputSpec) -> Value {
    let mut properties = Map::new();
    let mut required = Vec::new();

    for (name, def) in spec.param.iter().chain(spec.body.iter()) {
        properties.insert(name.clone(), field_schema(def));
        if def.required {
            required.push(Value::String(name.clone()));
        }
    }

    json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

fn field_schema(def: &FieldDef) -> Value {
    let mut schema = Map::new();
    schema.insert("type".into(), json!(def.field_type.as_str()));
    if def.field_type == FieldType::Array {
        schema.insert("items".into(), json!({}));
    }
    if !def.description.is_empty() {
        schema.insert("description".into(), json!(def.description));
    }
    if let Some(default) = &def.default {
        schema.insert("default".into(), default.clone());
    }
    Value::Object(schema)
}

/// Arguments after defaults and coercion, split by destination.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedArgs {
    pub param: Map<String, Value>,
    pub body: Map<String, Value>,
}

impl ResolvedArgs {
    /// Params and body merged into one object.
    pub fn merged(&self) -> Value {
        let mut all = self.param.clone();
        all.extend(self.body.clone());
        Value::Object(all)
    }
}

/// Check named arguments against a field list.
///
/// Missing optional fields take their default, missing required fields are an
/// error, and values are coerced to the declared primitive type where the
/// conversion is unambiguous. Undeclared arguments are dropped.
pub fn resolve_arguments(spec: &ToolInputSpec, args: &Value) -> Result<ResolvedArgs, String> {
    let empty = Map::new();
    let given = match args {
        Value::Object(map) => map,
        Value::Null => &empty,
        _ => return Err("Arguments must be a JSON object".to_string()),
    };

    Ok(ResolvedArgs {
        param: resolve_section(&spec.param, given)?,
        body: resolve_section(&spec.body, given)?,
    })
}

fn resolve_section(
    fields: &std::collections::BTreeMap<String, FieldDef>,
    given: &Map<String, Value>,
) -> Result<Map<String, Value>, String> {
    let mut out = Map::new();
    for (name, def) in fields {
        let value = match given.get(name).filter(|v| !v.is_null()) {
            Some(v) => coerce(def.field_type, v)
                .ok_or_else(|| format!("Parameter '{name}' must be of type {}", def.field_type.as_str()))?,
            None => match &def.default {
                Some(default) => default.clone(),
                None if def.required => {
                    return Err(format!("Missing required parameter: {name}"));
                }
                None => continue,
            },
        };
        out.insert(name.clone(), value);
    }
    Ok(out)
}

fn coerce(field_type: FieldType, value: &Value) -> Option<Value> {
    if field_type.matches(value) {
        return Some(value.clone());
    }
    match (field_type, value) {
        (FieldType::String, Value::Number(n)) => Some(Value::String(n.to_string())),
        (FieldType::String, Value::Bool(b)) => Some(Value::String(b.to_string())),
        (FieldType::Integer, Value::String(s)) => s.trim().parse::<i64>().ok().map(Value::from),
        (FieldType::Integer, Value::Number(n)) => n
            .as_f64()
            .filter(|f| f.fract() == 0.0 && *f >= i64::MIN as f64 && *f < i64::MAX as f64)
            .map(|f| Value::from(f as i64)),
        (FieldType::Number, Value::String(s)) => s.trim().parse::<f64>().ok().map(Value::from),
        (FieldType::Boolean, Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" => Some(Value::Bool(true)),
            "false" => Some(Value::Bool(false)),
            _ => None,
        },
        (FieldType::Array, Value::String(_)) => Some(Value::Array(vec![value.clone()])),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn spec() -> ToolInputSpec {
        serde_json::from_value(json!({
            "param": {
                "q": {"type": "string", "required": true, "description": "Search text"},
                "limit": {"type": "integer", "default": 5}
            },
            "body": {
                "strict": {"type": "boolean"}
            }
        }))
        .unwrap()
    }

    #[test]
    fn schema_lists_all_fields() {
        let schema = synthesize_input_schema(&spec());
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["properties"]["q"]["type"], "string");
        assert_eq!(schema["properties"]["q"]["description"], "Search text");
        assert_eq!(schema["properties"]["limit"]["default"], 5);
        assert_eq!(schema["properties"]["strict"]["type"], "boolean");
        assert_eq!(schema["required"], json!(["q"]));
    }

    #[test]
    fn defaults_applied_and_sections_split() {
        let args = resolve_arguments(&spec(), &json!({"q": "pho", "strict": "true"})).unwrap();
        assert_eq!(Value::Object(args.param.clone()), json!({"q": "pho", "limit": 5}));
        assert_eq!(Value::Object(args.body.clone()), json!({"strict": true}));
        assert_eq!(args.merged(), json!({"q": "pho", "limit": 5, "strict": true}));
    }

    #[test]
    fn missing_required_is_rejected() {
        let err = resolve_arguments(&spec(), &json!({"limit": 2})).unwrap_err();
        assert_eq!(err, "Missing required parameter: q");
    }

    #[test]
    fn numeric_strings_are_coerced() {
        let args = resolve_arguments(&spec(), &json!({"q": 42, "limit": "7"})).unwrap();
        assert_eq!(args.param["q"], json!("42"));
        assert_eq!(args.param["limit"], json!(7));
    }

    #[test]
    fn uncoercible_value_is_rejected() {
        let err = resolve_arguments(&spec(), &json!({"q": "x", "limit": "many"})).unwrap_err();
        assert!(err.contains("limit"));
    }

    #[test]
    fn whole_floats_coerce_only_within_range() {
        let args = resolve_arguments(&spec(), &json!({"q": "x", "limit": 3.0})).unwrap();
        assert_eq!(args.param["limit"], json!(3));

        assert!(resolve_arguments(&spec(), &json!({"q": "x", "limit": 1e30})).is_err());
        assert!(resolve_arguments(&spec(), &json!({"q": "x", "limit": -1e19})).is_err());
        assert!(resolve_arguments(&spec(), &json!({"q": "x", "limit": 2.5})).is_err());
    }

    #[test]
    fn non_object_arguments_rejected() {
        assert!(resolve_arguments(&spec(), &json!("q")).is_err());
    }

    #[test]
    fn overlay_moves_fields_between_sections() {
        let builtin: ToolInputSpec =
            serde_json::from_value(json!({"param": {"lang": {"type": "string", "default": "vi"}}}))
                .unwrap();
        let declared: ToolInputSpec =
            serde_json::from_value(json!({"body": {"lang": {"type": "string", "default": "en"}}}))
                .unwrap();
        let spec = overlay_input_spec(builtin, &declared);
        assert!(spec.param.is_empty());
        assert_eq!(spec.body["lang"].default, Some(json!("en")));
    }
}
