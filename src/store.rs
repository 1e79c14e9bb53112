use crate::errors::{AppError, AppResult};
use crate::models::{
    clamp_progress, CreateOrderPayload, CustomFieldDefinition, OrderComment, OrderStatus, OrderTask, RecordDate,
    ServiceOrder, UpdateOrderPayload,
};
use crate::pipeline::PipelineConfig;
use chrono::{DateTime, Utc};
use std::sync::{Arc, RwLock};
use uuid::Uuid;

/// Immutable view of the working set. Mutations produce a new snapshot and
/// leave earlier ones untouched for any reader still holding them.
#[derive(Debug, Clone)]
pub struct Snapshot {
    orders: Arc<[ServiceOrder]>,
    field_definitions: Arc<[CustomFieldDefinition]>,
    version: u64,
}

impl Default for Snapshot {
    fn default() -> Self {
        Self::new(Vec::new(), Vec::new())
    }
}

impl Snapshot {
    pub fn new(orders: Vec<ServiceOrder>, field_definitions: Vec<CustomFieldDefinition>) -> Self {
        Self {
            orders: orders.into(),
            field_definitions: field_definitions.into(),
            version: 0,
        }
    }

    pub fn orders(&self) -> &[ServiceOrder] {
        &self.orders
    }

    pub fn field_definitions(&self) -> &[CustomFieldDefinition] {
        &self.field_definitions
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn order(&self, order_id: &str) -> Option<&ServiceOrder> {
        self.orders.iter().find(|order| order.id == order_id)
    }

    pub fn order_by_number(&self, order_number: &str) -> Option<&ServiceOrder> {
        let needle = order_number.trim();
        self.orders
            .iter()
            .find(|order| order.order_number.eq_ignore_ascii_case(needle))
    }

    pub fn with_order_added(&self, order: ServiceOrder) -> AppResult<Self> {
        if self.order(&order.id).is_some() {
            return Err(AppError::Validation(format!("Order '{}' already exists", order.id)));
        }
        let mut orders = self.orders.to_vec();
        orders.push(order);
        Ok(self.next(orders.into(), self.field_definitions.clone()))
    }

    /// Applies `edit` to a copy of the order and returns the new snapshot along
    /// with the edited order.
    pub fn with_order_updated<F>(&self, order_id: &str, edit: F) -> AppResult<(Self, ServiceOrder)>
    where
        F: FnOnce(&mut ServiceOrder) -> AppResult<()>,
    {
        let Some(index) = self.orders.iter().position(|order| order.id == order_id) else {
            return Err(AppError::NotFound(format!("Order '{}' not found", order_id)));
        };
        let mut orders = self.orders.to_vec();
        edit(&mut orders[index])?;
        let updated = orders[index].clone();
        Ok((self.next(orders.into(), self.field_definitions.clone()), updated))
    }

    pub fn without_order(&self, order_id: &str) -> AppResult<Self> {
        if self.order(order_id).is_none() {
            return Err(AppError::NotFound(format!("Order '{}' not found", order_id)));
        }
        let orders: Vec<ServiceOrder> = self
            .orders
            .iter()
            .filter(|order| order.id != order_id)
            .cloned()
            .collect();
        Ok(self.next(orders.into(), self.field_definitions.clone()))
    }

    pub fn with_field_definition_saved(&self, definition: CustomFieldDefinition) -> Self {
        let mut definitions = self.field_definitions.to_vec();
        match definitions.iter_mut().find(|current| current.id == definition.id) {
            Some(current) => *current = definition,
            None => definitions.push(definition),
        }
        self.next(self.orders.clone(), definitions.into())
    }

    pub fn without_field_definition(&self, field_id: &str) -> AppResult<Self> {
        if !self.field_definitions.iter().any(|definition| definition.id == field_id) {
            return Err(AppError::NotFound(format!("Custom field '{}' not found", field_id)));
        }
        let definitions: Vec<CustomFieldDefinition> = self
            .field_definitions
            .iter()
            .filter(|definition| definition.id != field_id)
            .cloned()
            .collect();
        Ok(self.next(self.orders.clone(), definitions.into()))
    }

    fn next(&self, orders: Arc<[ServiceOrder]>, field_definitions: Arc<[CustomFieldDefinition]>) -> Self {
        Self {
            orders,
            field_definitions,
            version: self.version + 1,
        }
    }
}

/// Single owner of the canonical snapshot.
#[derive(Debug, Default)]
pub struct RecordStore {
    current: RwLock<Arc<Snapshot>>,
}

impl RecordStore {
    pub fn new(snapshot: Snapshot) -> Self {
        Self {
            current: RwLock::new(Arc::new(snapshot)),
        }
    }

    pub fn snapshot(&self) -> AppResult<Arc<Snapshot>> {
        let reader = self
            .current
            .read()
            .map_err(|_| AppError::Internal("record store lock poisoned".to_string()))?;
        Ok(Arc::clone(&reader))
    }

    /// Replaces the canonical snapshot. Stale writes (built from an older
    /// version than the one currently held) are rejected.
    pub fn replace(&self, base_version: u64, next: Snapshot) -> AppResult<Arc<Snapshot>> {
        let mut writer = self
            .current
            .write()
            .map_err(|_| AppError::Internal("record store lock poisoned".to_string()))?;
        if writer.version != base_version {
            return Err(AppError::Validation(format!(
                "Record store changed concurrently (expected version {}, found {})",
                base_version, writer.version
            )));
        }
        let next = Arc::new(next);
        *writer = Arc::clone(&next);
        Ok(next)
    }
}

pub fn new_order(
    payload: CreateOrderPayload,
    existing: &[ServiceOrder],
    pipeline: &PipelineConfig,
    now: DateTime<Utc>,
) -> AppResult<ServiceOrder> {
    let client = payload.client.trim();
    if client.is_empty() {
        return Err(AppError::Validation("Client name cannot be empty".to_string()));
    }
    let order_number = match payload.order_number.map(|raw| raw.trim().to_string()) {
        Some(number) if !number.is_empty() => {
            if existing
                .iter()
                .any(|order| order.order_number.eq_ignore_ascii_case(&number))
            {
                return Err(AppError::Validation(format!("Order number '{}' already in use", number)));
            }
            number
        }
        _ => next_order_number(existing),
    };

    let mut order = ServiceOrder {
        id: Uuid::new_v4().to_string(),
        order_number,
        client: client.to_string(),
        description: payload.description.trim().to_string(),
        status: pipeline.first_stage(),
        progress: 0,
        value: payload.value,
        creation_date: RecordDate::from(now),
        expected_delivery_date: payload.expected_delivery_date,
        delivery_date: None,
        responsible: payload.responsible.trim().to_string(),
        last_status_update: RecordDate::from(now),
        tasks: Vec::new(),
        comments: Vec::new(),
        custom_fields: payload.custom_fields,
    };
    if let Some(status) = payload.status {
        set_status(&mut order, status, pipeline, now);
    }
    Ok(order)
}

/// `OS-NNN`, one past the largest numeric suffix currently in use.
pub fn next_order_number(orders: &[ServiceOrder]) -> String {
    let highest = orders
        .iter()
        .filter_map(|order| {
            order
                .order_number
                .trim()
                .to_ascii_uppercase()
                .strip_prefix("OS-")
                .and_then(|digits| digits.parse::<u32>().ok())
        })
        .max()
        .unwrap_or(0);
    format!("OS-{:03}", highest + 1)
}

pub fn apply_update(
    order: &mut ServiceOrder,
    payload: UpdateOrderPayload,
    pipeline: &PipelineConfig,
    now: DateTime<Utc>,
) -> AppResult<()> {
    if let Some(client) = payload.client {
        let client = client.trim();
        if client.is_empty() {
            return Err(AppError::Validation("Client name cannot be empty".to_string()));
        }
        order.client = client.to_string();
    }
    if let Some(description) = payload.description {
        order.description = description.trim().to_string();
    }
    if let Some(progress) = payload.progress {
        order.progress = clamp_progress(progress);
    }
    if payload.value.is_some() {
        order.value = payload.value;
    }
    if let Some(expected) = payload.expected_delivery_date {
        order.expected_delivery_date = Some(expected).filter(|date| !date.as_str().trim().is_empty());
    }
    if let Some(responsible) = payload.responsible {
        order.responsible = responsible.trim().to_string();
    }
    if let Some(custom_fields) = payload.custom_fields {
        order.custom_fields = custom_fields;
    }
    if let Some(status) = payload.status {
        set_status(order, status, pipeline, now);
    }
    order.last_status_update = RecordDate::from(now);
    Ok(())
}

/// Entering the terminal stage stamps the delivery date and completes the
/// progress bar; leaving it clears the delivery date.
pub fn set_status(order: &mut ServiceOrder, status: OrderStatus, pipeline: &PipelineConfig, now: DateTime<Utc>) {
    if pipeline.is_terminal(status) {
        if order.delivery_date.is_none() {
            order.delivery_date = Some(RecordDate::from(now));
        }
        order.progress = 100;
    } else {
        order.delivery_date = None;
    }
    order.status = status;
    order.last_status_update = RecordDate::from(now);
}

pub fn advance(order: &mut ServiceOrder, pipeline: &PipelineConfig, now: DateTime<Utc>) -> AppResult<()> {
    let Some(next) = pipeline.next_stage(order.status) else {
        return Err(AppError::Validation(format!(
            "Order {} is already at its final stage ({})",
            order.order_number,
            order.status.as_str()
        )));
    };
    set_status(order, next, pipeline, now);
    Ok(())
}

pub fn add_task(order: &mut ServiceOrder, text: &str, now: DateTime<Utc>) -> AppResult<OrderTask> {
    let text = text.trim();
    if text.is_empty() {
        return Err(AppError::Validation("Task text cannot be empty".to_string()));
    }
    let task = OrderTask {
        id: Uuid::new_v4().to_string(),
        text: text.to_string(),
        completed: false,
    };
    order.tasks.push(task.clone());
    order.last_status_update = RecordDate::from(now);
    Ok(task)
}

pub fn toggle_task(order: &mut ServiceOrder, task_id: &str, now: DateTime<Utc>) -> AppResult<()> {
    let Some(task) = order.tasks.iter_mut().find(|task| task.id == task_id) else {
        return Err(AppError::NotFound(format!("Task '{}' not found", task_id)));
    };
    task.completed = !task.completed;
    order.last_status_update = RecordDate::from(now);
    Ok(())
}

pub fn remove_task(order: &mut ServiceOrder, task_id: &str, now: DateTime<Utc>) -> AppResult<()> {
    let before = order.tasks.len();
    order.tasks.retain(|task| task.id != task_id);
    if order.tasks.len() == before {
        return Err(AppError::NotFound(format!("Task '{}' not found", task_id)));
    }
    order.last_status_update = RecordDate::from(now);
    Ok(())
}

pub fn add_comment(order: &mut ServiceOrder, author: &str, text: &str, now: DateTime<Utc>) -> AppResult<OrderComment> {
    let text = text.trim();
    if text.is_empty() {
        return Err(AppError::Validation("Comment text cannot be empty".to_string()));
    }
    let author = match author.trim() {
        "" => "Equipe",
        name => name,
    };
    let comment = OrderComment {
        id: Uuid::new_v4().to_string(),
        author: author.to_string(),
        text: text.to_string(),
        timestamp: RecordDate::from(now),
    };
    order.comments.push(comment.clone());
    order.last_status_update = RecordDate::from(now);
    Ok(comment)
}

pub fn set_custom_field(
    order: &mut ServiceOrder,
    definitions: &[CustomFieldDefinition],
    field_id: &str,
    value: serde_json::Value,
    now: DateTime<Utc>,
) -> AppResult<()> {
    if !definitions.iter().any(|definition| definition.id == field_id) {
        return Err(AppError::NotFound(format!("Custom field '{}' not found", field_id)));
    }
    if value.is_null() {
        order.custom_fields.remove(field_id);
    } else {
        order.custom_fields.insert(field_id.to_string(), value);
    }
    order.last_status_update = RecordDate::from(now);
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::TimeZone;

    pub(crate) fn sample_order(id: &str, number: &str, status: OrderStatus) -> ServiceOrder {
        ServiceOrder {
            id: id.to_string(),
            order_number: number.to_string(),
            client: "Cliente".to_string(),
            description: String::new(),
            status,
            progress: 0,
            value: Some(100.0),
            creation_date: RecordDate::from("2024-01-15"),
            expected_delivery_date: None,
            delivery_date: None,
            responsible: "Ana".to_string(),
            last_status_update: RecordDate::from("2024-01-15"),
            tasks: Vec::new(),
            comments: Vec::new(),
            custom_fields: Default::default(),
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 2, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn earlier_snapshots_survive_mutation() {
        let store = RecordStore::new(Snapshot::new(
            vec![sample_order("a", "OS-001", OrderStatus::Production)],
            Vec::new(),
        ));
        let before = store.snapshot().expect("snapshot");
        let (next, _) = before
            .with_order_updated("a", |order| {
                order.client = "Outro".to_string();
                Ok(())
            })
            .expect("update");
        store.replace(before.version(), next).expect("replace");

        assert_eq!(before.orders()[0].client, "Cliente");
        let after = store.snapshot().expect("snapshot");
        assert_eq!(after.orders()[0].client, "Outro");
        assert_eq!(after.version(), before.version() + 1);
    }

    #[test]
    fn stale_replace_is_rejected() {
        let store = RecordStore::new(Snapshot::default());
        let base = store.snapshot().expect("snapshot");
        let first = base
            .with_order_added(sample_order("a", "OS-001", OrderStatus::Production))
            .expect("add");
        let second = base
            .with_order_added(sample_order("b", "OS-002", OrderStatus::Production))
            .expect("add");
        store.replace(base.version(), first).expect("first write");
        assert!(store.replace(base.version(), second).is_err());
    }

    #[test]
    fn delivering_stamps_and_reopening_clears_delivery_date() {
        let pipeline = PipelineConfig::default();
        let mut order = sample_order("a", "OS-001", OrderStatus::Approval);
        advance(&mut order, &pipeline, now()).expect("advance");
        assert_eq!(order.status, OrderStatus::Delivered);
        assert_eq!(order.progress, 100);
        assert_eq!(order.delivery_date.as_ref().and_then(RecordDate::resolve), Some(now()));

        assert!(advance(&mut order, &pipeline, now()).is_err());

        set_status(&mut order, OrderStatus::Editing, &pipeline, now());
        assert!(order.delivery_date.is_none());
    }

    #[test]
    fn order_numbers_continue_from_highest_suffix() {
        let orders = vec![
            sample_order("a", "OS-007", OrderStatus::Production),
            sample_order("b", "os-012", OrderStatus::Production),
            sample_order("c", "avulso", OrderStatus::Production),
        ];
        assert_eq!(next_order_number(&orders), "OS-013");
        assert_eq!(next_order_number(&[]), "OS-001");
    }

    #[test]
    fn new_order_rejects_duplicate_number_and_starts_at_intake() {
        let pipeline = PipelineConfig::default();
        let existing = vec![sample_order("a", "OS-001", OrderStatus::Production)];
        let duplicate = new_order(
            CreateOrderPayload {
                order_number: Some("os-001".to_string()),
                client: "Nike".to_string(),
                ..Default::default()
            },
            &existing,
            &pipeline,
            now(),
        );
        assert!(duplicate.is_err());

        let created = new_order(
            CreateOrderPayload {
                client: " Nike Brasil ".to_string(),
                ..Default::default()
            },
            &existing,
            &pipeline,
            now(),
        )
        .expect("create");
        assert_eq!(created.order_number, "OS-002");
        assert_eq!(created.client, "Nike Brasil");
        assert_eq!(created.status, OrderStatus::AwaitingProduct);
    }

    #[test]
    fn tasks_and_comments_are_owned_by_their_order() {
        let mut order = sample_order("a", "OS-001", OrderStatus::Production);
        let task = add_task(&mut order, "Tratar fotos", now()).expect("task");
        toggle_task(&mut order, &task.id, now()).expect("toggle");
        assert!(order.tasks[0].completed);
        assert!(add_task(&mut order, "   ", now()).is_err());

        let comment = add_comment(&mut order, "", "Cliente aprovou", now()).expect("comment");
        assert_eq!(comment.author, "Equipe");

        remove_task(&mut order, &task.id, now()).expect("remove");
        assert!(order.tasks.is_empty());
        assert!(remove_task(&mut order, &task.id, now()).is_err());
    }

    #[test]
    fn custom_field_values_require_a_definition() {
        let definitions = vec![CustomFieldDefinition {
            id: "f1".to_string(),
            name: "Referência".to_string(),
            field_type: crate::models::CustomFieldType::Text,
        }];
        let mut order = sample_order("a", "OS-001", OrderStatus::Production);
        set_custom_field(&mut order, &definitions, "f1", serde_json::json!("REF-9"), now()).expect("set");
        assert_eq!(order.custom_fields.get("f1"), Some(&serde_json::json!("REF-9")));
        assert!(set_custom_field(&mut order, &definitions, "nope", serde_json::json!(1), now()).is_err());
        set_custom_field(&mut order, &definitions, "f1", serde_json::Value::Null, now()).expect("clear");
        assert!(order.custom_fields.is_empty());
    }
}
