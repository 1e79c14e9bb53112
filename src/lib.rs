pub mod assets;
pub mod assistant;
pub mod config;
pub mod dashboard;
pub mod db;
pub mod errors;
pub mod models;
pub mod pipeline;
pub mod redaction;
pub mod search;
pub mod session;
pub mod sheets;
pub mod store;
pub mod studio;

use crate::assistant::intents::AssistantIntent;
use crate::config::AppConfig;
use crate::dashboard::DashboardQuery;
use crate::errors::AppError;
use crate::models::{
    AddCommentPayload, AddTaskPayload, AssetRefPayload, ChatMessagePayload, CreateOrderPayload,
    SaveFieldDefinitionPayload, SetCustomFieldPayload, SetStatusPayload, TaskRefPayload, UpdateOrderPayload,
    UploadAssetPayload,
};
use crate::studio::StudioCore;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing_appender::non_blocking::WorkerGuard;

static LOG_GUARD: std::sync::OnceLock<WorkerGuard> = std::sync::OnceLock::new();

/// One request line on stdin.
#[derive(Debug, Clone, Deserialize)]
pub struct CommandEnvelope {
    #[serde(default)]
    pub id: Value,
    pub command: String,
    #[serde(default)]
    pub args: Value,
}

/// One response line on stdout.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandResponse {
    pub id: Value,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CommandResponse {
    fn from_result(id: Value, result: Result<Value, String>) -> Self {
        match result {
            Ok(data) => Self {
                id,
                ok: true,
                data: Some(data),
                error: None,
            },
            Err(error) => Self {
                id,
                ok: false,
                data: None,
                error: Some(error),
            },
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderIdArgs {
    order_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FieldIdArgs {
    field_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionArgs {
    session_id: String,
}

#[derive(Deserialize)]
struct SearchArgs {
    #[serde(default)]
    query: String,
}

#[derive(Deserialize)]
struct TokenArgs {
    token: String,
}

#[derive(Deserialize)]
struct IntentArgs {
    intent: AssistantIntent,
}

/// Reads commands from stdin until EOF, answering each on stdout.
pub async fn run() -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;
    if let Err(error) = init_tracing(&config.log_dir()) {
        eprintln!("failed to initialize tracing: {}", error);
    }
    let core = StudioCore::new(config)?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let response = handle_line(&core, &line).await;
        let mut encoded = serde_json::to_string(&response)?;
        encoded.push('\n');
        stdout.write_all(encoded.as_bytes()).await?;
        stdout.flush().await?;
    }

    tracing::info!("stdin closed; shutting down");
    Ok(())
}

pub async fn handle_line(core: &StudioCore, line: &str) -> CommandResponse {
    match serde_json::from_str::<CommandEnvelope>(line) {
        Ok(envelope) => {
            let result = dispatch(core, &envelope.command, envelope.args).await;
            if let Err(error) = &result {
                tracing::warn!(command = %envelope.command, error = %error, "command failed");
            }
            CommandResponse::from_result(envelope.id, result)
        }
        Err(error) => CommandResponse::from_result(
            Value::Null,
            Err(to_client_error(AppError::Validation(format!("Malformed command: {}", error)))),
        ),
    }
}

pub async fn dispatch(core: &StudioCore, command: &str, args: Value) -> Result<Value, String> {
    tracing::debug!(command = %command, "dispatching command");
    match command {
        "list_orders" => respond(core.list_orders()),
        "get_order" => {
            let OrderIdArgs { order_id } = parse_args(args)?;
            respond(core.get_order(&order_id))
        }
        "create_order" => respond(core.create_order(parse_args::<CreateOrderPayload>(args)?)),
        "update_order" => respond(core.update_order(parse_args::<UpdateOrderPayload>(args)?)),
        "delete_order" => {
            let OrderIdArgs { order_id } = parse_args(args)?;
            respond(core.delete_order(&order_id))
        }
        "set_order_status" => respond(core.set_status(parse_args::<SetStatusPayload>(args)?)),
        "advance_order" => {
            let OrderIdArgs { order_id } = parse_args(args)?;
            respond(core.advance_order(&order_id))
        }
        "add_task" => respond(core.add_task(parse_args::<AddTaskPayload>(args)?)),
        "toggle_task" => respond(core.toggle_task(parse_args::<TaskRefPayload>(args)?)),
        "remove_task" => respond(core.remove_task(parse_args::<TaskRefPayload>(args)?)),
        "add_comment" => respond(core.add_comment(parse_args::<AddCommentPayload>(args)?)),
        "set_custom_field" => respond(core.set_custom_field(parse_args::<SetCustomFieldPayload>(args)?)),
        "list_custom_fields" => respond(core.list_field_definitions()),
        "save_custom_field" => respond(core.save_field_definition(parse_args::<SaveFieldDefinitionPayload>(args)?)),
        "delete_custom_field" => {
            let FieldIdArgs { field_id } = parse_args(args)?;
            respond(core.delete_field_definition(&field_id))
        }
        "pipeline" => respond(Ok::<_, AppError>(core.pipeline().clone())),
        "kanban_board" => respond(core.kanban_board()),
        "search" => {
            let SearchArgs { query } = parse_args(args)?;
            respond(core.search(&query))
        }
        "dashboard" => respond(core.dashboard(&parse_args::<DashboardQuery>(args)?)),
        "responsible_options" => respond(core.responsible_options()),
        "upload_asset" => respond(core.upload_asset(parse_args::<UploadAssetPayload>(args)?)),
        "list_assets" => {
            let OrderIdArgs { order_id } = parse_args(args)?;
            respond(core.list_assets(&order_id))
        }
        "delete_asset" => respond(core.delete_asset(parse_args::<AssetRefPayload>(args)?)),
        "summarize_order" => {
            let OrderIdArgs { order_id } = parse_args(args)?;
            respond(core.summarize_order(&order_id).await)
        }
        "financial_insight" => respond(core.financial_insight(parse_args::<DashboardQuery>(args)?).await),
        "open_chat" => respond(Ok::<_, AppError>(serde_json::json!({ "sessionId": core.open_chat().await }))),
        "chat_history" => {
            let SessionArgs { session_id } = parse_args(args)?;
            respond(core.chat_history(&session_id).await)
        }
        "close_chat" => {
            let SessionArgs { session_id } = parse_args(args)?;
            respond(Ok::<_, AppError>(core.close_chat(&session_id).await))
        }
        "send_chat_message" => respond(core.chat(parse_args::<ChatMessagePayload>(args)?).await),
        "apply_intent" => {
            let IntentArgs { intent } = parse_args(args)?;
            respond(core.apply_intent(intent))
        }
        "get_settings" => respond(core.get_settings()),
        "update_settings" => respond(core.update_settings(args)),
        "save_assistant_token" => {
            let TokenArgs { token } = parse_args(args)?;
            respond(core.save_assistant_token(token).await)
        }
        "clear_assistant_token" => respond(core.clear_assistant_token().await),
        "has_assistant_token" => respond(core.has_assistant_token().await),
        other => Err(to_client_error(AppError::NotFound(format!("Unknown command {}", other)))),
    }
}

fn parse_args<T: DeserializeOwned>(args: Value) -> Result<T, String> {
    let args = if args.is_null() {
        Value::Object(serde_json::Map::new())
    } else {
        args
    };
    serde_json::from_value(args).map_err(|error| to_client_error(AppError::Validation(format!("Invalid arguments: {}", error))))
}

fn respond<T: Serialize, E: std::fmt::Display>(result: Result<T, E>) -> Result<Value, String> {
    let value = result.map_err(to_client_error)?;
    serde_json::to_value(value).map_err(to_client_error)
}

fn init_tracing(log_dir: &Path) -> Result<(), String> {
    std::fs::create_dir_all(log_dir).map_err(|error| error.to_string())?;
    let file_appender = tracing_appender::rolling::daily(log_dir, "studio-ops.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let _ = LOG_GUARD.set(guard);

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .json()
        .with_writer(non_blocking)
        .try_init()
        .map_err(|error| error.to_string())
}

fn to_client_error(error: impl std::fmt::Display) -> String {
    error.to_string()
}
