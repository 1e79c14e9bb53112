use crate::errors::{AppError, AppResult};
use crate::models::{KanbanColumn, KanbanLane, OrderStatus, ServiceOrder};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

/// Ordered stage table. Column order defines pipeline progression: the first
/// column is intake and the last one is the terminal (delivered) stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineConfig {
    columns: Vec<KanbanColumn>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PipelineFile {
    pipeline: Vec<KanbanColumn>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let columns = [
            (OrderStatus::AwaitingProduct, "Aguardando Produto", "#f59e0b"),
            (OrderStatus::Production, "Em Produção", "#3b82f6"),
            (OrderStatus::Editing, "Edição", "#8b5cf6"),
            (OrderStatus::Approval, "Aprovação do Cliente", "#ec4899"),
            (OrderStatus::Delivered, "Entregue", "#10b981"),
        ]
        .into_iter()
        .map(|(status, title, color)| KanbanColumn {
            status,
            title: title.to_string(),
            color: color.to_string(),
        })
        .collect();
        Self { columns }
    }
}

impl PipelineConfig {
    pub fn new(columns: Vec<KanbanColumn>) -> AppResult<Self> {
        if columns.is_empty() {
            return Err(AppError::Config("pipeline must define at least one column".to_string()));
        }
        let mut seen = HashSet::new();
        for column in &columns {
            if !seen.insert(column.status) {
                return Err(AppError::Config(format!(
                    "pipeline defines status '{}' more than once",
                    column.status.as_str()
                )));
            }
        }
        Ok(Self { columns })
    }

    pub fn from_yaml(raw: &str) -> AppResult<Self> {
        let file: PipelineFile = serde_yaml::from_str(raw)?;
        Self::new(file.pipeline)
    }

    /// Reads `path` when it exists, otherwise falls back to the built-in table.
    pub fn load(path: &Path) -> AppResult<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.to_string_lossy(), "no pipeline file; using default columns");
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path)?;
        let config = Self::from_yaml(&raw)?;
        tracing::info!(
            path = %path.to_string_lossy(),
            columns = config.columns.len(),
            "loaded pipeline configuration"
        );
        Ok(config)
    }

    pub fn columns(&self) -> &[KanbanColumn] {
        &self.columns
    }

    pub fn first_stage(&self) -> OrderStatus {
        self.columns[0].status
    }

    pub fn terminal_stage(&self) -> OrderStatus {
        self.columns[self.columns.len() - 1].status
    }

    pub fn is_terminal(&self, status: OrderStatus) -> bool {
        status == self.terminal_stage()
    }

    pub fn position(&self, status: OrderStatus) -> Option<usize> {
        self.columns.iter().position(|column| column.status == status)
    }

    pub fn column(&self, status: OrderStatus) -> Option<&KanbanColumn> {
        self.columns.iter().find(|column| column.status == status)
    }

    pub fn color(&self, status: OrderStatus) -> Option<&str> {
        self.column(status).map(|column| column.color.as_str())
    }

    pub fn next_stage(&self, status: OrderStatus) -> Option<OrderStatus> {
        let position = self.position(status)?;
        self.columns.get(position + 1).map(|column| column.status)
    }

    pub fn kanban_board(&self, orders: &[ServiceOrder]) -> Vec<KanbanLane> {
        self.columns
            .iter()
            .map(|column| KanbanLane {
                column: column.clone(),
                orders: orders
                    .iter()
                    .filter(|order| order.status == column.status)
                    .cloned()
                    .collect(),
            })
            .collect()
    }
}
