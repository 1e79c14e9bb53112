use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

static DOT_GROUPED_THOUSANDS: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{1,3}(\.\d{3})+$").expect("valid regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum OrderStatus {
    #[serde(rename = "Aguardando produto")]
    AwaitingProduct,
    #[serde(rename = "Produção")]
    Production,
    #[serde(rename = "Edição")]
    Editing,
    #[serde(rename = "Aprovação")]
    Approval,
    #[serde(rename = "Entregue")]
    Delivered,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 5] = [
        Self::AwaitingProduct,
        Self::Production,
        Self::Editing,
        Self::Approval,
        Self::Delivered,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::AwaitingProduct => "Aguardando produto",
            Self::Production => "Produção",
            Self::Editing => "Edição",
            Self::Approval => "Aprovação",
            Self::Delivered => "Entregue",
        }
    }

    /// Case-insensitive match against the display string.
    pub fn parse(raw: &str) -> Option<Self> {
        let needle = raw.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|status| status.as_str().to_lowercase() == needle)
    }
}

/// Date cell kept as written and resolved on read. Unparsable text resolves
/// to `None` so the record drops out of date comparisons instead of failing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordDate(String);

impl RecordDate {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn resolve(&self) -> Option<DateTime<Utc>> {
        let raw = self.0.trim();
        if raw.is_empty() {
            return None;
        }
        if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
            return Some(parsed.with_timezone(&Utc));
        }
        for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
            if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
                return Some(naive.and_utc());
            }
        }
        for format in ["%Y-%m-%d", "%d/%m/%Y"] {
            if let Ok(date) = NaiveDate::parse_from_str(raw, format) {
                return date.and_hms_opt(0, 0, 0).map(|naive| naive.and_utc());
            }
        }
        None
    }
}

impl From<DateTime<Utc>> for RecordDate {
    fn from(value: DateTime<Utc>) -> Self {
        Self(value.to_rfc3339())
    }
}

impl From<&str> for RecordDate {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderTask {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub completed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderComment {
    pub id: String,
    pub author: String,
    pub text: String,
    pub timestamp: RecordDate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceOrder {
    pub id: String,
    pub order_number: String,
    pub client: String,
    #[serde(default)]
    pub description: String,
    pub status: OrderStatus,
    #[serde(default, deserialize_with = "deserialize_progress")]
    pub progress: u8,
    #[serde(default, deserialize_with = "deserialize_amount")]
    pub value: Option<f64>,
    pub creation_date: RecordDate,
    #[serde(default)]
    pub expected_delivery_date: Option<RecordDate>,
    #[serde(default)]
    pub delivery_date: Option<RecordDate>,
    #[serde(default)]
    pub responsible: String,
    pub last_status_update: RecordDate,
    #[serde(default)]
    pub tasks: Vec<OrderTask>,
    #[serde(default)]
    pub comments: Vec<OrderComment>,
    #[serde(default)]
    pub custom_fields: BTreeMap<String, serde_json::Value>,
}

impl ServiceOrder {
    pub fn summary(&self) -> OrderRef {
        OrderRef {
            id: self.id.clone(),
            order_number: self.order_number.clone(),
            client: self.client.clone(),
        }
    }
}

/// Lightweight pointer to the order that owns a nested hit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderRef {
    pub id: String,
    pub order_number: String,
    pub client: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CustomFieldType {
    Text,
    Number,
    Date,
    Boolean,
    Select,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomFieldDefinition {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: CustomFieldType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KanbanColumn {
    pub status: OrderStatus,
    pub title: String,
    pub color: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KanbanLane {
    pub column: KanbanColumn,
    pub orders: Vec<ServiceOrder>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandAction {
    pub id: String,
    pub label: String,
    pub hint: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderPayload {
    pub order_number: Option<String>,
    pub client: String,
    #[serde(default)]
    pub description: String,
    pub status: Option<OrderStatus>,
    #[serde(default, deserialize_with = "deserialize_amount")]
    pub value: Option<f64>,
    pub expected_delivery_date: Option<RecordDate>,
    #[serde(default)]
    pub responsible: String,
    #[serde(default)]
    pub custom_fields: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct UpdateOrderPayload {
    pub order_id: String,
    pub client: Option<String>,
    pub description: Option<String>,
    pub status: Option<OrderStatus>,
    pub progress: Option<f64>,
    #[serde(default, deserialize_with = "deserialize_amount")]
    pub value: Option<f64>,
    pub expected_delivery_date: Option<RecordDate>,
    pub responsible: Option<String>,
    pub custom_fields: Option<BTreeMap<String, serde_json::Value>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddTaskPayload {
    pub order_id: String,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRefPayload {
    pub order_id: String,
    pub task_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddCommentPayload {
    pub order_id: String,
    pub author: String,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetStatusPayload {
    pub order_id: String,
    pub status: OrderStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetCustomFieldPayload {
    pub order_id: String,
    pub field_id: String,
    pub value: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadAssetPayload {
    pub order_id: String,
    pub name: String,
    #[serde(default)]
    pub mime_type: String,
    pub data_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetRefPayload {
    pub order_id: String,
    pub asset_id: String,
}

/// Creates a definition when `id` is absent, otherwise replaces it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveFieldDefinitionPayload {
    pub id: Option<String>,
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: CustomFieldType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessagePayload {
    pub session_id: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredAsset {
    pub id: String,
    pub order_id: String,
    pub name: String,
    pub mime_type: String,
    pub size: u64,
    pub path: String,
    pub uploaded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppSettings {
    pub studio_name: String,
    pub default_period: String,
    pub assistant_model: Option<String>,
    pub assistant_timeout_seconds: u64,
    pub max_upload_mb: u32,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            studio_name: "Estúdio".to_string(),
            default_period: "all".to_string(),
            assistant_model: None,
            assistant_timeout_seconds: 60,
            max_upload_mb: 25,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BooleanResponse {
    pub success: bool,
}

/// Accepts numbers and numeric strings, including `R$ 1.500,50`. Anything
/// else, or a non-finite result, becomes `None`.
pub fn parse_amount(value: &serde_json::Value) -> Option<f64> {
    let parsed = match value {
        serde_json::Value::Number(number) => number.as_f64(),
        serde_json::Value::String(raw) => parse_amount_text(raw),
        _ => None,
    }?;
    parsed.is_finite().then_some(parsed)
}

pub fn parse_amount_text(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .trim()
        .trim_start_matches("R$")
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    // A dot is a thousands separator when a comma follows or when every
    // group after it has exactly three digits (`1.500`, `12.345.678`).
    let normalized = if cleaned.contains(',') || DOT_GROUPED_THOUSANDS.is_match(&cleaned) {
        cleaned.replace('.', "").replace(',', ".")
    } else {
        cleaned
    };
    normalized.parse::<f64>().ok().filter(|value| value.is_finite())
}

pub fn clamp_progress(raw: f64) -> u8 {
    if raw.is_nan() {
        return 0;
    }
    raw.round().clamp(0.0, 100.0) as u8
}

fn deserialize_amount<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = serde_json::Value::deserialize(deserializer)?;
    Ok(parse_amount(&raw))
}

fn deserialize_progress<'de, D>(deserializer: D) -> Result<u8, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = serde_json::Value::deserialize(deserializer)?;
    Ok(parse_amount(&raw).map(clamp_progress).unwrap_or(0))
}
