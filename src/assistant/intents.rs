use crate::models::{parse_amount, OrderStatus};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

static FENCED_BLOCK: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)```[A-Za-z]*[ \t]*\n?(.*?)```").expect("valid regex"));

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionDeclaration {
    pub name: &'static str,
    pub description: &'static str,
    pub parameters: Value,
}

pub static DECLARATIONS: Lazy<Vec<FunctionDeclaration>> = Lazy::new(|| {
    vec![
        FunctionDeclaration {
            name: "create_order",
            description: "Cria uma nova ordem de serviço.",
            parameters: json!({
                "type": "object",
                "properties": {
                    "client": { "type": "string", "minLength": 1 },
                    "description": { "type": "string" },
                    "value": { "type": ["number", "string"] },
                    "responsible": { "type": "string" },
                    "expectedDeliveryDate": { "type": "string" },
                    "status": { "type": "string" }
                },
                "required": ["client"]
            }),
        },
        FunctionDeclaration {
            name: "update_status",
            description: "Move uma ordem para outra etapa do pipeline.",
            parameters: json!({
                "type": "object",
                "properties": {
                    "orderNumber": { "type": "string", "minLength": 1 },
                    "status": { "type": "string", "minLength": 1 }
                },
                "required": ["orderNumber", "status"]
            }),
        },
        FunctionDeclaration {
            name: "add_comment",
            description: "Adiciona um comentário a uma ordem.",
            parameters: json!({
                "type": "object",
                "properties": {
                    "orderNumber": { "type": "string", "minLength": 1 },
                    "text": { "type": "string", "minLength": 1 },
                    "author": { "type": "string" }
                },
                "required": ["orderNumber", "text"]
            }),
        },
        FunctionDeclaration {
            name: "add_task",
            description: "Adiciona uma tarefa ao checklist de uma ordem.",
            parameters: json!({
                "type": "object",
                "properties": {
                    "orderNumber": { "type": "string", "minLength": 1 },
                    "text": { "type": "string", "minLength": 1 }
                },
                "required": ["orderNumber", "text"]
            }),
        },
    ]
});

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum AssistantIntent {
    #[serde(rename_all = "camelCase")]
    CreateOrder {
        client: String,
        description: String,
        value: Option<f64>,
        responsible: String,
        expected_delivery_date: Option<String>,
        status: Option<OrderStatus>,
    },
    #[serde(rename_all = "camelCase")]
    UpdateStatus { order_number: String, status: OrderStatus },
    #[serde(rename_all = "camelCase")]
    AddComment {
        order_number: String,
        text: String,
        author: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    AddTask { order_number: String, text: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntentIssue {
    pub name: String,
    pub message: String,
    pub arguments: Value,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedReply {
    pub text: String,
    pub intents: Vec<AssistantIntent>,
    pub issues: Vec<IntentIssue>,
}

#[derive(Debug, Clone, PartialEq)]
struct FunctionCall {
    name: String,
    arguments: Value,
}

/// Splits a model reply into prose and function calls. JSON that carries no
/// call stays in the text.
pub fn parse_reply(raw: &str) -> ParsedReply {
    let mut calls = Vec::new();
    let mut consumed: Vec<(usize, usize)> = Vec::new();

    for captures in FENCED_BLOCK.captures_iter(raw) {
        let (Some(whole), Some(body)) = (captures.get(0), captures.get(1)) else {
            continue;
        };
        let Ok(value) = serde_json::from_str::<Value>(body.as_str().trim()) else {
            continue;
        };
        let found = collect_calls(&value);
        if !found.is_empty() {
            calls.extend(found);
            consumed.push((whole.start(), whole.end()));
        }
    }

    if calls.is_empty() {
        for (start, end) in json_spans(raw) {
            let Ok(value) = serde_json::from_str::<Value>(&raw[start..end]) else {
                continue;
            };
            let found = collect_calls(&value);
            if !found.is_empty() {
                calls.extend(found);
                consumed.push((start, end));
            }
        }
    }

    let mut parsed = ParsedReply {
        text: strip_spans(raw, &consumed),
        ..ParsedReply::default()
    };
    for call in calls {
        match to_intent(&call) {
            Ok(intent) => parsed.intents.push(intent),
            Err(message) => parsed.issues.push(IntentIssue {
                name: call.name,
                message,
                arguments: call.arguments,
            }),
        }
    }
    parsed
}

fn collect_calls(value: &Value) -> Vec<FunctionCall> {
    match value {
        Value::Array(items) => items.iter().flat_map(collect_calls).collect(),
        Value::Object(map) => {
            if let Some(inner) = map.get("functionCall") {
                return collect_calls(inner);
            }
            if let Some(Value::Array(items)) = map.get("functionCalls") {
                return items.iter().flat_map(collect_calls).collect();
            }
            let Some(Value::String(name)) = map.get("name") else {
                return Vec::new();
            };
            let arguments = match map.get("args").or_else(|| map.get("arguments")) {
                Some(Value::String(encoded)) => serde_json::from_str(encoded).unwrap_or(Value::String(encoded.clone())),
                Some(other) => other.clone(),
                None => return Vec::new(),
            };
            vec![FunctionCall {
                name: name.clone(),
                arguments,
            }]
        }
        _ => Vec::new(),
    }
}

fn to_intent(call: &FunctionCall) -> Result<AssistantIntent, String> {
    let Some(declaration) = DECLARATIONS.iter().find(|declaration| declaration.name == call.name) else {
        return Err(format!("Unknown function {}", call.name));
    };
    validate_arguments(&declaration.parameters, &call.arguments)?;

    let args = &call.arguments;
    let text = |key: &str| args.get(key).and_then(Value::as_str).map(|value| value.trim().to_string());
    let status = |key: &str| -> Result<Option<OrderStatus>, String> {
        match text(key) {
            None => Ok(None),
            Some(raw) => OrderStatus::parse(&raw)
                .map(Some)
                .ok_or_else(|| format!("Unknown status {}", raw)),
        }
    };

    let intent = match declaration.name {
        "create_order" => AssistantIntent::CreateOrder {
            client: text("client").unwrap_or_default(),
            description: text("description").unwrap_or_default(),
            value: args.get("value").and_then(parse_amount),
            responsible: text("responsible").unwrap_or_default(),
            expected_delivery_date: text("expectedDeliveryDate").filter(|value| !value.is_empty()),
            status: status("status")?,
        },
        "update_status" => AssistantIntent::UpdateStatus {
            order_number: text("orderNumber").unwrap_or_default(),
            status: status("status")?.ok_or_else(|| "status is required".to_string())?,
        },
        "add_comment" => AssistantIntent::AddComment {
            order_number: text("orderNumber").unwrap_or_default(),
            text: text("text").unwrap_or_default(),
            author: text("author").filter(|value| !value.is_empty()),
        },
        "add_task" => AssistantIntent::AddTask {
            order_number: text("orderNumber").unwrap_or_default(),
            text: text("text").unwrap_or_default(),
        },
        other => return Err(format!("Unknown function {}", other)),
    };
    Ok(intent)
}

fn validate_arguments(schema: &Value, arguments: &Value) -> Result<(), String> {
    let compiled = jsonschema::JSONSchema::compile(schema)
        .map_err(|error| format!("Invalid function schema: {}", error))?;
    let errors: Vec<String> = compiled
        .validate(arguments)
        .err()
        .map(|errors| {
            errors
                .map(|error| {
                    let path = error.instance_path.to_string();
                    if path.is_empty() {
                        error.to_string()
                    } else {
                        format!("{}: {}", path, error)
                    }
                })
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors.join("; "))
    }
}

/// Byte ranges of top-level balanced `{...}` / `[...]` regions, string aware.
fn json_spans(text: &str) -> Vec<(usize, usize)> {
    let bytes = text.as_bytes();
    let mut spans = Vec::new();
    let mut index = 0;
    while index < bytes.len() {
        if matches!(bytes[index], b'{' | b'[') {
            if let Some(end) = balanced_end(bytes, index) {
                if serde_json::from_str::<Value>(&text[index..end]).is_ok() {
                    spans.push((index, end));
                    index = end;
                    continue;
                }
            }
        }
        index += 1;
    }
    spans
}

fn balanced_end(bytes: &[u8], start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, byte) in bytes[start..].iter().enumerate() {
        if in_string {
            match byte {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match byte {
            b'"' => in_string = true,
            b'{' | b'[' => depth += 1,
            b'}' | b']' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(start + offset + 1);
                }
            }
            _ => {}
        }
    }
    None
}

fn strip_spans(raw: &str, spans: &[(usize, usize)]) -> String {
    let mut ordered = spans.to_vec();
    ordered.sort_unstable();
    let mut out = String::with_capacity(raw.len());
    let mut cursor = 0;
    for (start, end) in ordered {
        if start < cursor {
            continue;
        }
        out.push_str(&raw[cursor..start]);
        cursor = end;
    }
    out.push_str(&raw[cursor..]);
    out.lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}
