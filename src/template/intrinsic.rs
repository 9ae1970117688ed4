//! CloudFormation intrinsic functions.
//!
//! Declarations are plain [`serde_json::Value`]s. A value that is a single-key
//! object keyed by `Ref` or `Fn::*` is a *token*: it is resolved by the
//! provisioning tool at convergence time, not by this crate.

use std::collections::BTreeSet;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Map, Value};

/// Pseudo parameter for the deploying account.
pub const ACCOUNT_ID: &str = "AWS::AccountId";
/// Pseudo parameter for the deploying region.
pub const REGION: &str = "AWS::Region";
/// Pseudo parameter for the partition (`aws`, `aws-cn`, ...).
pub const PARTITION: &str = "AWS::Partition";
/// Pseudo parameter for the partition's domain suffix.
pub const URL_SUFFIX: &str = "AWS::URLSuffix";

/// `${Name}` and `${Name.Attr}` variables in a `Fn::Sub` template. `${!Literal}` is an escape.
static SUB_VARIABLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{([^!}][^}]*)\}").expect("Invalid Fn::Sub variable regex"));

/// Stand-in for a token while a document is encoded. Lengthened until it
/// occurs nowhere in the document, so literals can never be mistaken for it.
const TOKEN_MARKER: &str = "@@PITS_TOKEN_";

/// `{"Ref": logical_id}`
pub fn reference(logical_id: impl Into<String>) -> Value {
    json!({ "Ref": logical_id.into() })
}

/// `{"Fn::GetAtt": [logical_id, attribute]}`
pub fn get_att(logical_id: impl Into<String>, attribute: impl Into<String>) -> Value {
    json!({ "Fn::GetAtt": [logical_id.into(), attribute.into()] })
}

/// `{"Fn::Sub": template}`
pub fn sub(template: impl Into<String>) -> Value {
    json!({ "Fn::Sub": template.into() })
}

/// `{"Fn::ImportValue": export_name}`
pub fn import_value(export_name: impl Into<Value>) -> Value {
    json!({ "Fn::ImportValue": export_name.into() })
}

pub fn account_id() -> Value {
    reference(ACCOUNT_ID)
}

pub fn region() -> Value {
    reference(REGION)
}

pub fn partition() -> Value {
    reference(PARTITION)
}

pub fn url_suffix() -> Value {
    reference(URL_SUFFIX)
}

/// Returns true when the value is resolved by the provisioning tool.
pub fn is_token(value: &Value) -> bool {
    match value.as_object() {
        Some(map) if map.len() == 1 => map
            .keys()
            .next()
            .is_some_and(|key| key == "Ref" || key.starts_with("Fn::")),
        _ => false,
    }
}

/// Joins parts with a delimiter. Literal-only input folds to a plain string.
pub fn join(delimiter: &str, parts: impl IntoIterator<Item = Value>) -> Value {
    let parts: Vec<Value> = parts.into_iter().collect();
    if delimiter.is_empty() {
        return concat(parts);
    }
    if parts.iter().all(Value::is_string) {
        let literals: Vec<&str> = parts.iter().filter_map(Value::as_str).collect();
        return Value::String(literals.join(delimiter));
    }
    json!({ "Fn::Join": [delimiter, parts] })
}

/// Concatenates parts. Adjacent literals merge and nested concatenations are
/// flattened, so the output of equal inputs is always the same shape.
pub fn concat(parts: impl IntoIterator<Item = Value>) -> Value {
    let mut flattened: Vec<Value> = Vec::new();
    for part in parts {
        match concat_parts(&part) {
            Some(inner) => {
                for nested in inner {
                    push_part(&mut flattened, nested.clone());
                }
            }
            None => push_part(&mut flattened, part),
        }
    }

    match flattened.len() {
        0 => Value::String(String::new()),
        1 if flattened[0].is_string() => flattened.remove(0),
        _ => json!({ "Fn::Join": ["", flattened] }),
    }
}

fn push_part(parts: &mut Vec<Value>, part: Value) {
    let part = match part {
        Value::Number(n) => Value::String(n.to_string()),
        Value::Bool(b) => Value::String(b.to_string()),
        other => other,
    };
    if let Value::String(literal) = &part {
        if literal.is_empty() {
            return;
        }
        if let Some(Value::String(last)) = parts.last_mut() {
            last.push_str(literal);
            return;
        }
    }
    parts.push(part);
}

/// Returns the parts of a `Fn::Join` with an empty delimiter.
fn concat_parts(value: &Value) -> Option<&Vec<Value>> {
    let map = value.as_object().filter(|map| map.len() == 1)?;
    let args = map.get("Fn::Join")?.as_array()?;
    match args.as_slice() {
        [Value::String(delimiter), Value::Array(parts)] if delimiter.is_empty() => Some(parts),
        _ => None,
    }
}

/// Encodes a document that embeds tokens as a single JSON string expression.
///
/// Provider APIs that take JSON-encoded documents (IoT policies, custom
/// resource payloads) need the document as a string, but the document refers
/// to values only known at convergence time. Each token is spliced into a
/// `Fn::Join`; literal text inside nested encodings is escaped so the result
/// stays valid JSON at any nesting depth.
pub fn stringify(value: &Value) -> Value {
    let marker = unused_marker(&value.to_string());
    let mut tokens = Vec::new();
    let masked = mask_tokens(value, &marker, &mut tokens);
    let encoded = masked.to_string();
    if tokens.is_empty() {
        return Value::String(encoded);
    }

    let mut parts = Vec::new();
    let mut rest = encoded.as_str();
    while let Some(start) = rest.find(&marker) {
        let after = &rest[start + marker.len()..];
        let digits = after.find(|c: char| !c.is_ascii_digit()).unwrap_or(after.len());
        let Some(token) = after[..digits].parse::<usize>().ok().and_then(|index| tokens.get(index)) else {
            break;
        };
        parts.push(Value::String(rest[..start].to_string()));
        parts.push(token.clone());
        rest = after[digits..].strip_prefix("@@").unwrap_or(&after[digits..]);
    }
    parts.push(Value::String(rest.to_string()));
    concat(parts)
}

fn unused_marker(encoded: &str) -> String {
    let mut marker = TOKEN_MARKER.to_string();
    while encoded.contains(&marker) {
        marker.push('_');
    }
    marker
}

fn mask_tokens(value: &Value, marker: &str, tokens: &mut Vec<Value>) -> Value {
    if is_token(value) {
        let masked = format!("{}{}@@", marker, tokens.len());
        tokens.push(escape_token(value));
        return Value::String(masked);
    }
    match value {
        Value::Array(items) => Value::Array(items.iter().map(|v| mask_tokens(v, marker, tokens)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), mask_tokens(v, marker, tokens)))
                .collect::<Map<String, Value>>(),
        ),
        other => other.clone(),
    }
}

fn escape_token(token: &Value) -> Value {
    match concat_parts(token) {
        Some(parts) => {
            let escaped: Vec<Value> = parts
                .iter()
                .map(|part| match part {
                    Value::String(literal) => Value::String(escape_fragment(literal)),
                    other => escape_token(other),
                })
                .collect();
            json!({ "Fn::Join": ["", escaped] })
        }
        None => token.clone(),
    }
}

/// JSON string escaping without the surrounding quotes.
fn escape_fragment(literal: &str) -> String {
    let quoted = Value::String(literal.to_string()).to_string();
    quoted[1..quoted.len() - 1].to_string()
}

/// Collects the logical ids a value refers to through `Ref`, `Fn::GetAtt`
/// and `Fn::Sub`. Pseudo parameters are not resources and are skipped.
pub fn references(value: &Value) -> BTreeSet<String> {
    let mut found = BTreeSet::new();
    collect_references(value, &mut found);
    found
}

fn collect_references(value: &Value, found: &mut BTreeSet<String>) {
    match value {
        Value::Object(map) => {
            if map.len() == 1 {
                if let Some(target) = map.get("Ref") {
                    if let Some(target) = target.as_str().filter(|t| !t.starts_with("AWS::")) {
                        found.insert(target.to_string());
                    }
                    return;
                }
                if let Some(attribute) = map.get("Fn::GetAtt") {
                    let target = match attribute {
                        Value::Array(args) => args.first().and_then(Value::as_str),
                        Value::String(dotted) => dotted.split_once('.').map(|(target, _)| target),
                        _ => None,
                    };
                    if let Some(target) = target {
                        found.insert(target.to_string());
                    }
                    return;
                }
                if let Some(substitution) = map.get("Fn::Sub") {
                    collect_sub_references(substitution, found);
                    return;
                }
            }
            for nested in map.values() {
                collect_references(nested, found);
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_references(item, found);
            }
        }
        _ => {}
    }
}

fn collect_sub_references(substitution: &Value, found: &mut BTreeSet<String>) {
    let (template, variables) = match substitution {
        Value::String(template) => (template.as_str(), None),
        Value::Array(args) => (
            args.first().and_then(Value::as_str).unwrap_or_default(),
            args.get(1).and_then(Value::as_object),
        ),
        _ => return,
    };

    for captures in SUB_VARIABLE.captures_iter(template) {
        let name = captures[1].split('.').next().unwrap_or_default().trim();
        let local = variables.is_some_and(|vars| vars.contains_key(name));
        if !name.is_empty() && !name.starts_with("AWS::") && !local {
            found.insert(name.to_string());
        }
    }
    if let Some(variables) = variables {
        for value in variables.values() {
            collect_references(value, found);
        }
    }
}
