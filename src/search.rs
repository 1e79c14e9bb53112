//! Global search over the record store.
//!
//! Matching is a case-insensitive substring test with no tokenization and no
//! ranking beyond category grouping. Hits keep the snapshot's iteration order
//! and carry the byte span of the match so callers can highlight it.

use crate::models::{
    CommandAction, CustomFieldDefinition, CustomFieldType, OrderComment, OrderRef, OrderTask, ServiceOrder,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchSpan {
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OrderField {
    OrderNumber,
    Client,
    Description,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderHit {
    pub order: ServiceOrder,
    pub field: OrderField,
    pub span: MatchSpan,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskHit {
    pub task: OrderTask,
    pub order: OrderRef,
    pub span: MatchSpan,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentHit {
    pub comment: OrderComment,
    pub order: OrderRef,
    pub span: MatchSpan,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomFieldHit {
    pub field: CustomFieldDefinition,
    pub value: String,
    pub order: OrderRef,
    pub span: MatchSpan,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandHit {
    pub command: CommandAction,
    pub span: MatchSpan,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResults {
    pub orders: Vec<OrderHit>,
    pub tasks: Vec<TaskHit>,
    pub comments: Vec<CommentHit>,
    pub custom_fields: Vec<CustomFieldHit>,
    pub commands: Vec<CommandHit>,
    pub total: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchRequest {
    pub query: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HighlightSegment {
    pub text: String,
    pub matched: bool,
}

pub fn default_commands() -> Vec<CommandAction> {
    [
        ("new-order", "Criar nova ordem de serviço", Some("N")),
        ("open-kanban", "Abrir quadro kanban", Some("K")),
        ("open-dashboard", "Ver dashboard", Some("D")),
        ("open-assistant", "Perguntar ao assistente", None),
        ("manage-fields", "Gerenciar campos personalizados", None),
        ("manage-users", "Gerenciar usuários", None),
    ]
    .into_iter()
    .map(|(id, label, hint)| CommandAction {
        id: id.to_string(),
        label: label.to_string(),
        hint: hint.map(ToString::to_string),
    })
    .collect()
}

pub fn search(
    query: &str,
    orders: &[ServiceOrder],
    field_definitions: &[CustomFieldDefinition],
    commands: &[CommandAction],
) -> SearchResults {
    if query.trim().is_empty() {
        return SearchResults::default();
    }

    let definitions: HashMap<&str, &CustomFieldDefinition> = field_definitions
        .iter()
        .map(|definition| (definition.id.as_str(), definition))
        .collect();
    let mut results = SearchResults::default();

    for order in orders {
        let order_match = [
            (OrderField::OrderNumber, order.order_number.as_str()),
            (OrderField::Client, order.client.as_str()),
            (OrderField::Description, order.description.as_str()),
        ]
        .into_iter()
        .find_map(|(field, text)| find_match(text, query).map(|span| (field, span)));
        if let Some((field, span)) = order_match {
            results.orders.push(OrderHit {
                order: order.clone(),
                field,
                span,
            });
        }

        for task in &order.tasks {
            if let Some(span) = find_match(&task.text, query) {
                results.tasks.push(TaskHit {
                    task: task.clone(),
                    order: order.summary(),
                    span,
                });
            }
        }

        for comment in &order.comments {
            if let Some(span) = find_match(&comment.text, query) {
                results.comments.push(CommentHit {
                    comment: comment.clone(),
                    order: order.summary(),
                    span,
                });
            }
        }

        for (field_id, raw_value) in &order.custom_fields {
            let Some(definition) = definitions.get(field_id.as_str()) else {
                continue;
            };
            if definition.field_type != CustomFieldType::Text {
                continue;
            }
            let Some(value) = custom_value_text(raw_value) else {
                continue;
            };
            if let Some(span) = find_match(&value, query) {
                results.custom_fields.push(CustomFieldHit {
                    field: (*definition).clone(),
                    value,
                    order: order.summary(),
                    span,
                });
            }
        }
    }

    for command in commands {
        if let Some(span) = find_match(&command.label, query) {
            results.commands.push(CommandHit {
                command: command.clone(),
                span,
            });
        }
    }

    results.total = results.orders.len()
        + results.tasks.len()
        + results.comments.len()
        + results.custom_fields.len()
        + results.commands.len();
    results
}

/// Byte span of the first case-insensitive occurrence of `needle`.
pub fn find_match(haystack: &str, needle: &str) -> Option<MatchSpan> {
    let folded_needle: Vec<char> = needle.chars().flat_map(char::to_lowercase).collect();
    if folded_needle.is_empty() {
        return None;
    }
    haystack.char_indices().find_map(|(start, _)| {
        match_at(haystack, start, &folded_needle).map(|end| MatchSpan { start, end })
    })
}

/// Splits `text` into alternating plain and matched segments.
pub fn highlight(text: &str, query: &str) -> Vec<HighlightSegment> {
    let mut segments = Vec::new();
    let mut cursor = 0usize;
    while cursor < text.len() {
        let Some(span) = find_match(&text[cursor..], query) else {
            break;
        };
        let (start, end) = (cursor + span.start, cursor + span.end);
        if start > cursor {
            segments.push(HighlightSegment {
                text: text[cursor..start].to_string(),
                matched: false,
            });
        }
        segments.push(HighlightSegment {
            text: text[start..end].to_string(),
            matched: true,
        });
        cursor = end;
    }
    if cursor < text.len() || segments.is_empty() {
        segments.push(HighlightSegment {
            text: text[cursor..].to_string(),
            matched: false,
        });
    }
    segments
}

fn match_at(haystack: &str, start: usize, needle: &[char]) -> Option<usize> {
    let mut remaining = needle;
    for (offset, ch) in haystack[start..].char_indices() {
        for folded in ch.to_lowercase() {
            let Some((expected, rest)) = remaining.split_first() else {
                break;
            };
            if *expected != folded {
                return None;
            }
            remaining = rest;
        }
        if remaining.is_empty() {
            return Some(start + offset + ch.len_utf8());
        }
    }
    None
}

fn custom_value_text(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(text) => Some(text.clone()),
        serde_json::Value::Number(number) => Some(number.to_string()),
        serde_json::Value::Bool(flag) => Some(flag.to_string()),
        _ => None,
    }
}
