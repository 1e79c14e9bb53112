use crate::errors::{AppError, AppResult};
use crate::models::{
    clamp_progress, parse_amount_text, CustomFieldDefinition, CustomFieldType, OrderStatus, RecordDate, ServiceOrder,
};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::Arc;

pub const ORDERS_SHEET: &str = "Orders";
pub const CUSTOM_FIELDS_SHEET: &str = "CustomFields";

pub const ORDER_HEADER: [&str; 15] = [
    "id",
    "orderNumber",
    "client",
    "description",
    "status",
    "progress",
    "value",
    "creationDate",
    "expectedDeliveryDate",
    "deliveryDate",
    "responsible",
    "lastStatusUpdate",
    "tasks",
    "comments",
    "customFields",
];

pub const CUSTOM_FIELD_HEADER: [&str; 3] = ["id", "name", "type"];

/// Row-oriented access to a spreadsheet. Row 0 of every sheet is its header.
pub trait SheetBackend: Send + Sync {
    fn read_rows(&self, sheet: &str) -> AppResult<Vec<Vec<String>>>;
    fn append_row(&self, sheet: &str, cells: &[String]) -> AppResult<()>;
    fn update_row(&self, sheet: &str, index: usize, cells: &[String]) -> AppResult<()>;
    fn delete_row(&self, sheet: &str, index: usize) -> AppResult<()>;
}

/// Header-name lookup so reordered columns still decode.
struct HeaderIndex(HashMap<String, usize>);

impl HeaderIndex {
    fn new(header: &[String]) -> Self {
        Self(
            header
                .iter()
                .enumerate()
                .map(|(index, name)| (name.trim().to_string(), index))
                .collect(),
        )
    }

    fn cell<'a>(&self, row: &'a [String], name: &str) -> &'a str {
        self.0
            .get(name)
            .and_then(|index| row.get(*index))
            .map(String::as_str)
            .unwrap_or("")
    }
}

pub fn order_to_row(order: &ServiceOrder) -> AppResult<Vec<String>> {
    Ok(vec![
        order.id.clone(),
        order.order_number.clone(),
        order.client.clone(),
        order.description.clone(),
        order.status.as_str().to_string(),
        order.progress.to_string(),
        // Decimal comma, so "1.234" is never read back as a thousands group.
        order.value.map(|value| value.to_string().replace('.', ",")).unwrap_or_default(),
        order.creation_date.as_str().to_string(),
        optional_date_cell(order.expected_delivery_date.as_ref()),
        optional_date_cell(order.delivery_date.as_ref()),
        order.responsible.clone(),
        order.last_status_update.as_str().to_string(),
        serde_json::to_string(&order.tasks)?,
        serde_json::to_string(&order.comments)?,
        serde_json::to_string(&order.custom_fields)?,
    ])
}

fn optional_date_cell(date: Option<&RecordDate>) -> String {
    date.map(|date| date.as_str().to_string()).unwrap_or_default()
}

fn optional_date(raw: &str) -> Option<RecordDate> {
    let trimmed = raw.trim();
    (!trimmed.is_empty()).then(|| RecordDate::new(trimmed))
}

fn json_cell<T: DeserializeOwned + Default>(raw: &str, column: &str, order_id: &str) -> T {
    if raw.trim().is_empty() {
        return T::default();
    }
    serde_json::from_str(raw).unwrap_or_else(|error| {
        tracing::warn!(order_id = %order_id, column = %column, error = %error, "malformed json cell; using empty value");
        T::default()
    })
}

fn decode_order(header: &HeaderIndex, row: &[String]) -> Option<ServiceOrder> {
    let id = header.cell(row, "id").trim();
    if id.is_empty() {
        return None;
    }
    let raw_status = header.cell(row, "status");
    let Some(status) = OrderStatus::parse(raw_status) else {
        tracing::warn!(order_id = %id, status = %raw_status, "skipping order row with unknown status");
        return None;
    };
    let progress = parse_amount_text(header.cell(row, "progress"))
        .map(clamp_progress)
        .unwrap_or(0);

    Some(ServiceOrder {
        id: id.to_string(),
        order_number: header.cell(row, "orderNumber").trim().to_string(),
        client: header.cell(row, "client").to_string(),
        description: header.cell(row, "description").to_string(),
        status,
        progress,
        value: parse_amount_text(header.cell(row, "value")),
        creation_date: RecordDate::new(header.cell(row, "creationDate").trim()),
        expected_delivery_date: optional_date(header.cell(row, "expectedDeliveryDate")),
        delivery_date: optional_date(header.cell(row, "deliveryDate")),
        responsible: header.cell(row, "responsible").trim().to_string(),
        last_status_update: RecordDate::new(header.cell(row, "lastStatusUpdate").trim()),
        tasks: json_cell(header.cell(row, "tasks"), "tasks", id),
        comments: json_cell(header.cell(row, "comments"), "comments", id),
        custom_fields: json_cell(header.cell(row, "customFields"), "customFields", id),
    })
}

pub fn orders_from_rows(rows: &[Vec<String>]) -> Vec<ServiceOrder> {
    let Some((header, body)) = rows.split_first() else {
        return Vec::new();
    };
    let header = HeaderIndex::new(header);
    body.iter().filter_map(|row| decode_order(&header, row)).collect()
}

pub fn field_definition_to_row(definition: &CustomFieldDefinition) -> AppResult<Vec<String>> {
    let field_type = serde_json::to_value(definition.field_type)?
        .as_str()
        .unwrap_or("text")
        .to_string();
    Ok(vec![definition.id.clone(), definition.name.clone(), field_type])
}

pub fn field_definitions_from_rows(rows: &[Vec<String>]) -> Vec<CustomFieldDefinition> {
    let Some((header, body)) = rows.split_first() else {
        return Vec::new();
    };
    let header = HeaderIndex::new(header);
    body.iter()
        .filter_map(|row| {
            let id = header.cell(row, "id").trim();
            if id.is_empty() {
                return None;
            }
            let raw_type = header.cell(row, "type").trim().to_lowercase();
            let field_type = match serde_json::from_value::<CustomFieldType>(serde_json::Value::String(raw_type)) {
                Ok(field_type) => field_type,
                Err(error) => {
                    tracing::warn!(field_id = %id, error = %error, "skipping custom field row with unknown type");
                    return None;
                }
            };
            Some(CustomFieldDefinition {
                id: id.to_string(),
                name: header.cell(row, "name").trim().to_string(),
                field_type,
            })
        })
        .collect()
}

/// Orders and custom field definitions stored as spreadsheet rows.
pub struct OrderRepository<B: SheetBackend> {
    backend: Arc<B>,
}

impl<B: SheetBackend> Clone for OrderRepository<B> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
        }
    }
}

impl<B: SheetBackend> OrderRepository<B> {
    pub fn new(backend: Arc<B>) -> Self {
        Self { backend }
    }

    pub fn load(&self) -> AppResult<(Vec<ServiceOrder>, Vec<CustomFieldDefinition>)> {
        let order_rows = self.backend.read_rows(ORDERS_SHEET)?;
        let field_rows = self.backend.read_rows(CUSTOM_FIELDS_SHEET)?;
        let orders = orders_from_rows(&order_rows);
        let definitions = field_definitions_from_rows(&field_rows);
        let skipped = order_rows.len().saturating_sub(1).saturating_sub(orders.len());
        tracing::info!(
            orders = orders.len(),
            skipped,
            custom_fields = definitions.len(),
            "loaded records from sheets"
        );
        Ok((orders, definitions))
    }

    pub fn insert_order(&self, order: &ServiceOrder) -> AppResult<()> {
        self.ensure_header(ORDERS_SHEET, &ORDER_HEADER)?;
        self.backend.append_row(ORDERS_SHEET, &order_to_row(order)?)
    }

    pub fn update_order(&self, order: &ServiceOrder) -> AppResult<()> {
        let index = self.find_row(ORDERS_SHEET, &order.id)?;
        self.backend.update_row(ORDERS_SHEET, index, &order_to_row(order)?)
    }

    pub fn delete_order(&self, order_id: &str) -> AppResult<()> {
        let index = self.find_row(ORDERS_SHEET, order_id)?;
        self.backend.delete_row(ORDERS_SHEET, index)
    }

    pub fn save_field_definition(&self, definition: &CustomFieldDefinition) -> AppResult<()> {
        self.ensure_header(CUSTOM_FIELDS_SHEET, &CUSTOM_FIELD_HEADER)?;
        let row = field_definition_to_row(definition)?;
        match self.find_row(CUSTOM_FIELDS_SHEET, &definition.id) {
            Ok(index) => self.backend.update_row(CUSTOM_FIELDS_SHEET, index, &row),
            Err(AppError::NotFound(_)) => self.backend.append_row(CUSTOM_FIELDS_SHEET, &row),
            Err(error) => Err(error),
        }
    }

    pub fn delete_field_definition(&self, field_id: &str) -> AppResult<()> {
        let index = self.find_row(CUSTOM_FIELDS_SHEET, field_id)?;
        self.backend.delete_row(CUSTOM_FIELDS_SHEET, index)
    }

    fn ensure_header(&self, sheet: &str, header: &[&str]) -> AppResult<()> {
        if self.backend.read_rows(sheet)?.is_empty() {
            let cells: Vec<String> = header.iter().map(ToString::to_string).collect();
            self.backend.append_row(sheet, &cells)?;
        }
        Ok(())
    }

    /// Absolute row index (header included) of the row whose `id` cell matches.
    fn find_row(&self, sheet: &str, id: &str) -> AppResult<usize> {
        let rows = self.backend.read_rows(sheet)?;
        let Some((header, body)) = rows.split_first() else {
            return Err(AppError::NotFound(format!("Row '{}' not found in sheet {}", id, sheet)));
        };
        let header = HeaderIndex::new(header);
        body.iter()
            .position(|row| header.cell(row, "id").trim() == id)
            .map(|position| position + 1)
            .ok_or_else(|| AppError::NotFound(format!("Row '{}' not found in sheet {}", id, sheet)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::OrderTask;
    use crate::store::tests::sample_order;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MemorySheets {
        sheets: Mutex<HashMap<String, Vec<Vec<String>>>>,
    }

    impl SheetBackend for MemorySheets {
        fn read_rows(&self, sheet: &str) -> AppResult<Vec<Vec<String>>> {
            Ok(self.sheets.lock().unwrap().get(sheet).cloned().unwrap_or_default())
        }

        fn append_row(&self, sheet: &str, cells: &[String]) -> AppResult<()> {
            self.sheets
                .lock()
                .unwrap()
                .entry(sheet.to_string())
                .or_default()
                .push(cells.to_vec());
            Ok(())
        }

        fn update_row(&self, sheet: &str, index: usize, cells: &[String]) -> AppResult<()> {
            let mut sheets = self.sheets.lock().unwrap();
            let rows = sheets.get_mut(sheet).expect("sheet");
            rows[index] = cells.to_vec();
            Ok(())
        }

        fn delete_row(&self, sheet: &str, index: usize) -> AppResult<()> {
            let mut sheets = self.sheets.lock().unwrap();
            sheets.get_mut(sheet).expect("sheet").remove(index);
            Ok(())
        }
    }

    fn strings(cells: &[&str]) -> Vec<String> {
        cells.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn order_survives_the_row_codec() {
        let mut order = sample_order("o1", "OS-001", OrderStatus::Editing);
        order.value = Some(1234.5);
        order.expected_delivery_date = Some(RecordDate::from("2024-02-01"));
        order.tasks.push(OrderTask {
            id: "t1".to_string(),
            text: "Revisar cor".to_string(),
            completed: true,
        });
        order.custom_fields.insert("ref".to_string(), serde_json::json!("A-1"));

        let rows = vec![strings(&ORDER_HEADER), order_to_row(&order).expect("row")];
        let decoded = orders_from_rows(&rows);
        assert_eq!(decoded, vec![order]);
    }

    #[test]
    fn fractional_and_grouped_values_keep_their_magnitude() {
        let mut fractional = sample_order("o1", "OS-001", OrderStatus::Editing);
        fractional.value = Some(1.234);
        let mut whole = sample_order("o2", "OS-002", OrderStatus::Editing);
        whole.value = Some(1500.0);

        let rows = vec![
            strings(&ORDER_HEADER),
            order_to_row(&fractional).expect("row"),
            order_to_row(&whole).expect("row"),
        ];
        let decoded = orders_from_rows(&rows);
        assert_eq!(decoded[0].value, Some(1.234));
        assert_eq!(decoded[1].value, Some(1500.0));
    }

    #[test]
    fn reordered_columns_and_sheet_formats_decode() {
        let rows = vec![
            strings(&["status", "client", "id", "orderNumber", "value", "creationDate", "lastStatusUpdate"]),
            strings(&["entregue", "Nike Brasil", "o9", "OS-009", "R$ 2.000,00", "15/01/2024", "15/01/2024"]),
        ];
        let decoded = orders_from_rows(&rows);
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].status, OrderStatus::Delivered);
        assert_eq!(decoded[0].value, Some(2000.0));
        assert!(decoded[0].tasks.is_empty());
        assert!(decoded[0].creation_date.resolve().is_some());
    }

    #[test]
    fn rows_with_unknown_status_or_missing_id_are_skipped() {
        let rows = vec![
            strings(&["id", "status", "client"]),
            strings(&["o1", "Cancelado", "A"]),
            strings(&["", "Produção", "B"]),
            strings(&["o3", "Produção", "C"]),
        ];
        let decoded = orders_from_rows(&rows);
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].id, "o3");
    }

    #[test]
    fn repository_writes_header_then_updates_and_deletes_by_id() {
        let backend = Arc::new(MemorySheets::default());
        let repository = OrderRepository::new(Arc::clone(&backend));
        let mut first = sample_order("o1", "OS-001", OrderStatus::Production);
        let second = sample_order("o2", "OS-002", OrderStatus::Production);
        repository.insert_order(&first).expect("insert");
        repository.insert_order(&second).expect("insert");

        first.client = "Atualizado".to_string();
        repository.update_order(&first).expect("update");
        repository.delete_order("o2").expect("delete");

        let rows = backend.read_rows(ORDERS_SHEET).expect("rows");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0], strings(&ORDER_HEADER));
        let (orders, _) = repository.load().expect("load");
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].client, "Atualizado");
        assert!(matches!(repository.delete_order("o2"), Err(AppError::NotFound(_))));
    }

    #[test]
    fn field_definitions_upsert_by_id() {
        let backend = Arc::new(MemorySheets::default());
        let repository = OrderRepository::new(backend);
        let mut definition = CustomFieldDefinition {
            id: "f1".to_string(),
            name: "Referência".to_string(),
            field_type: CustomFieldType::Text,
        };
        repository.save_field_definition(&definition).expect("save");
        definition.name = "Código".to_string();
        repository.save_field_definition(&definition).expect("save again");

        let (_, definitions) = repository.load().expect("load");
        assert_eq!(definitions, vec![definition]);
    }
}
