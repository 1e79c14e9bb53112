use crate::assets::AssetDrive;
use crate::assistant::cli::CliCompletionProvider;
use crate::assistant::intents::AssistantIntent;
use crate::assistant::{Assistant, AssistantReply, CallOptions, CompletionProvider};
use crate::config::AppConfig;
use crate::dashboard::{self, DashboardQuery, DashboardView};
use crate::db::Database;
use crate::errors::{AppError, AppResult};
use crate::models::{
    AddCommentPayload, AddTaskPayload, AppSettings, AssetRefPayload, BooleanResponse, ChatMessagePayload,
    CreateOrderPayload, CustomFieldDefinition, KanbanLane, RecordDate, SaveFieldDefinitionPayload, ServiceOrder,
    SetCustomFieldPayload, SetStatusPayload, StoredAsset, TaskRefPayload, UpdateOrderPayload, UploadAssetPayload,
};
use crate::pipeline::PipelineConfig;
use crate::search::{self, SearchResults};
use crate::session::{ChatMessage, ChatRole, ChatSessions};
use crate::sheets::OrderRepository;
use crate::store::{self, RecordStore, Snapshot};
use chrono::Utc;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

const KEYRING_SERVICE: &str = "studio-ops-dashboard";
const KEYRING_TOKEN_ENTRY: &str = "assistant-token";
const BYTES_PER_MB: u64 = 1024 * 1024;

/// Owns every long-lived piece of the application. Writes go to the sheets
/// first and only then become the canonical snapshot.
pub struct StudioCore {
    config: AppConfig,
    db: Arc<Database>,
    repository: OrderRepository<Database>,
    store: RecordStore,
    pipeline: PipelineConfig,
    assets: AssetDrive,
    assistant: Assistant,
    sessions: ChatSessions,
    write_lock: StdMutex<()>,
    keyring_lock: Arc<Mutex<()>>,
}

impl StudioCore {
    pub fn new(config: AppConfig) -> AppResult<Arc<Self>> {
        let provider = match &config.assistant_command {
            Some(parts) => {
                let provider: Arc<dyn CompletionProvider> = Arc::new(CliCompletionProvider::from_command_line(parts)?);
                Some(provider)
            }
            None => None,
        };
        Self::with_provider(config, provider)
    }

    pub fn with_provider(config: AppConfig, provider: Option<Arc<dyn CompletionProvider>>) -> AppResult<Arc<Self>> {
        let db = Arc::new(Database::new(&config.database_path())?);
        let repository = OrderRepository::new(Arc::clone(&db));
        let (orders, definitions) = repository.load()?;
        let pipeline = PipelineConfig::load(&config.pipeline_path)?;
        let assets = AssetDrive::new(config.drive_dir())?;

        tracing::info!(
            data_dir = %config.data_dir.to_string_lossy(),
            orders = orders.len(),
            assistant = provider.is_some(),
            "studio core ready"
        );

        Ok(Arc::new(Self {
            config,
            db,
            repository,
            store: RecordStore::new(Snapshot::new(orders, definitions)),
            pipeline,
            assets,
            assistant: Assistant::new(provider),
            sessions: ChatSessions::new(),
            write_lock: StdMutex::new(()),
            keyring_lock: Arc::new(Mutex::new(())),
        }))
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn pipeline(&self) -> &PipelineConfig {
        &self.pipeline
    }

    pub fn snapshot(&self) -> AppResult<Arc<Snapshot>> {
        self.store.snapshot()
    }

    // ─── Orders ──────────────────────────────────────────────────────────

    pub fn list_orders(&self) -> AppResult<Vec<ServiceOrder>> {
        Ok(self.store.snapshot()?.orders().to_vec())
    }

    pub fn get_order(&self, order_id: &str) -> AppResult<ServiceOrder> {
        self.store
            .snapshot()?
            .order(order_id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("Order '{}' not found", order_id)))
    }

    pub fn create_order(&self, payload: CreateOrderPayload) -> AppResult<ServiceOrder> {
        let _guard = self.lock_writes()?;
        let base = self.store.snapshot()?;
        let order = store::new_order(payload, base.orders(), &self.pipeline, Utc::now())?;
        let next = base.with_order_added(order.clone())?;
        self.repository.insert_order(&order)?;
        self.store.replace(base.version(), next)?;
        tracing::info!(order_id = %order.id, order_number = %order.order_number, "order created");
        Ok(order)
    }

    pub fn update_order(&self, payload: UpdateOrderPayload) -> AppResult<ServiceOrder> {
        let order_id = payload.order_id.clone();
        let pipeline = &self.pipeline;
        self.mutate_order(&order_id, |_, order| store::apply_update(order, payload, pipeline, Utc::now()))
    }

    pub fn delete_order(&self, order_id: &str) -> AppResult<BooleanResponse> {
        let _guard = self.lock_writes()?;
        let base = self.store.snapshot()?;
        let next = base.without_order(order_id)?;
        self.repository.delete_order(order_id)?;
        self.store.replace(base.version(), next)?;
        tracing::info!(order_id = %order_id, "order deleted");
        Ok(BooleanResponse { success: true })
    }

    pub fn set_status(&self, payload: SetStatusPayload) -> AppResult<ServiceOrder> {
        let pipeline = &self.pipeline;
        self.mutate_order(&payload.order_id, |_, order| {
            store::set_status(order, payload.status, pipeline, Utc::now());
            Ok(())
        })
    }

    pub fn advance_order(&self, order_id: &str) -> AppResult<ServiceOrder> {
        let pipeline = &self.pipeline;
        self.mutate_order(order_id, |_, order| store::advance(order, pipeline, Utc::now()))
    }

    pub fn add_task(&self, payload: AddTaskPayload) -> AppResult<ServiceOrder> {
        self.mutate_order(&payload.order_id, |_, order| {
            store::add_task(order, &payload.text, Utc::now()).map(|_| ())
        })
    }

    pub fn toggle_task(&self, payload: TaskRefPayload) -> AppResult<ServiceOrder> {
        self.mutate_order(&payload.order_id, |_, order| store::toggle_task(order, &payload.task_id, Utc::now()))
    }

    pub fn remove_task(&self, payload: TaskRefPayload) -> AppResult<ServiceOrder> {
        self.mutate_order(&payload.order_id, |_, order| store::remove_task(order, &payload.task_id, Utc::now()))
    }

    pub fn add_comment(&self, payload: AddCommentPayload) -> AppResult<ServiceOrder> {
        self.mutate_order(&payload.order_id, |_, order| {
            store::add_comment(order, &payload.author, &payload.text, Utc::now()).map(|_| ())
        })
    }

    pub fn set_custom_field(&self, payload: SetCustomFieldPayload) -> AppResult<ServiceOrder> {
        let SetCustomFieldPayload {
            order_id,
            field_id,
            value,
        } = payload;
        self.mutate_order(&order_id, |snapshot, order| {
            store::set_custom_field(order, snapshot.field_definitions(), &field_id, value, Utc::now())
        })
    }

    // ─── Custom field definitions ────────────────────────────────────────

    pub fn list_field_definitions(&self) -> AppResult<Vec<CustomFieldDefinition>> {
        Ok(self.store.snapshot()?.field_definitions().to_vec())
    }

    pub fn save_field_definition(&self, payload: SaveFieldDefinitionPayload) -> AppResult<CustomFieldDefinition> {
        let name = payload.name.trim();
        if name.is_empty() {
            return Err(AppError::Validation("Field name cannot be empty".to_string()));
        }
        let definition = CustomFieldDefinition {
            id: payload
                .id
                .map(|id| id.trim().to_string())
                .filter(|id| !id.is_empty())
                .unwrap_or_else(|| format!("field_{}", &Uuid::new_v4().simple().to_string()[..12])),
            name: name.to_string(),
            field_type: payload.field_type,
        };

        let _guard = self.lock_writes()?;
        let base = self.store.snapshot()?;
        let next = base.with_field_definition_saved(definition.clone());
        self.repository.save_field_definition(&definition)?;
        self.store.replace(base.version(), next)?;
        Ok(definition)
    }

    pub fn delete_field_definition(&self, field_id: &str) -> AppResult<BooleanResponse> {
        let _guard = self.lock_writes()?;
        let base = self.store.snapshot()?;
        let next = base.without_field_definition(field_id)?;
        self.repository.delete_field_definition(field_id)?;
        self.store.replace(base.version(), next)?;
        Ok(BooleanResponse { success: true })
    }

    // ─── Views ───────────────────────────────────────────────────────────

    pub fn kanban_board(&self) -> AppResult<Vec<KanbanLane>> {
        Ok(self.pipeline.kanban_board(self.store.snapshot()?.orders()))
    }

    pub fn search(&self, query: &str) -> AppResult<SearchResults> {
        let snapshot = self.store.snapshot()?;
        Ok(search::search(
            query,
            snapshot.orders(),
            snapshot.field_definitions(),
            &search::default_commands(),
        ))
    }

    pub fn dashboard(&self, query: &DashboardQuery) -> AppResult<DashboardView> {
        let snapshot = self.store.snapshot()?;
        Ok(dashboard::build_dashboard(snapshot.orders(), query, &self.pipeline, Utc::now()))
    }

    pub fn responsible_options(&self) -> AppResult<Vec<String>> {
        Ok(dashboard::responsible_options(self.store.snapshot()?.orders()))
    }

    // ─── Assets ──────────────────────────────────────────────────────────

    pub fn upload_asset(&self, payload: UploadAssetPayload) -> AppResult<StoredAsset> {
        self.get_order(&payload.order_id)?;
        let settings = self.db.get_settings()?;
        let max_bytes = u64::from(settings.max_upload_mb) * BYTES_PER_MB;
        self.assets.upload(&payload, max_bytes, Utc::now())
    }

    pub fn list_assets(&self, order_id: &str) -> AppResult<Vec<StoredAsset>> {
        self.assets.list(order_id)
    }

    pub fn delete_asset(&self, payload: AssetRefPayload) -> AppResult<BooleanResponse> {
        self.assets.delete(&payload.order_id, &payload.asset_id)?;
        Ok(BooleanResponse { success: true })
    }

    // ─── Assistant ───────────────────────────────────────────────────────

    pub async fn summarize_order(&self, order_id: &str) -> AppResult<String> {
        let order = self.get_order(order_id)?;
        let options = self.call_options().await?;
        let assistant = self.assistant.clone();
        tokio::task::spawn_blocking(move || assistant.summarize_order(&order, &options))
            .await
            .map_err(anyhow::Error::from)?
    }

    pub async fn financial_insight(&self, query: DashboardQuery) -> AppResult<String> {
        let view = self.dashboard(&query)?;
        let studio_name = self.db.get_settings()?.studio_name;
        let options = self.call_options().await?;
        let assistant = self.assistant.clone();
        tokio::task::spawn_blocking(move || assistant.financial_insight(&studio_name, &view, &options))
            .await
            .map_err(anyhow::Error::from)?
    }

    pub async fn open_chat(&self) -> String {
        self.sessions.open_session().await
    }

    pub async fn chat_history(&self, session_id: &str) -> AppResult<Vec<ChatMessage>> {
        self.sessions.history(session_id).await
    }

    pub async fn close_chat(&self, session_id: &str) -> BooleanResponse {
        BooleanResponse {
            success: self.sessions.close_session(session_id).await,
        }
    }

    /// One chat turn. Intents are returned for confirmation, not applied.
    pub async fn chat(&self, payload: ChatMessagePayload) -> AppResult<AssistantReply> {
        let history = self.sessions.history(&payload.session_id).await?;
        let orders = self.store.snapshot()?.orders().to_vec();
        let options = self.call_options().await?;
        let assistant = self.assistant.clone();
        let message = payload.message.clone();
        let reply = tokio::task::spawn_blocking(move || assistant.interpret(&message, &history, &orders, &options))
            .await
            .map_err(anyhow::Error::from)??;

        self.sessions
            .append(&payload.session_id, ChatMessage::new(ChatRole::User, payload.message))
            .await?;
        self.sessions
            .append(&payload.session_id, ChatMessage::new(ChatRole::Assistant, reply.text.clone()))
            .await?;
        Ok(reply)
    }

    pub fn apply_intent(&self, intent: AssistantIntent) -> AppResult<ServiceOrder> {
        tracing::info!(intent = ?intent, "applying assistant intent");
        match intent {
            AssistantIntent::CreateOrder {
                client,
                description,
                value,
                responsible,
                expected_delivery_date,
                status,
            } => self.create_order(CreateOrderPayload {
                client,
                description,
                value,
                responsible,
                expected_delivery_date: expected_delivery_date.map(RecordDate::new),
                status,
                ..CreateOrderPayload::default()
            }),
            AssistantIntent::UpdateStatus { order_number, status } => {
                let order_id = self.resolve_order_number(&order_number)?;
                self.set_status(SetStatusPayload { order_id, status })
            }
            AssistantIntent::AddComment {
                order_number,
                text,
                author,
            } => {
                let order_id = self.resolve_order_number(&order_number)?;
                self.add_comment(AddCommentPayload {
                    order_id,
                    author: author.unwrap_or_default(),
                    text,
                })
            }
            AssistantIntent::AddTask { order_number, text } => {
                let order_id = self.resolve_order_number(&order_number)?;
                self.add_task(AddTaskPayload { order_id, text })
            }
        }
    }

    // ─── Settings and token ──────────────────────────────────────────────

    pub fn get_settings(&self) -> AppResult<AppSettings> {
        self.db.get_settings()
    }

    pub fn update_settings(&self, update: serde_json::Value) -> AppResult<AppSettings> {
        self.db.update_settings(update)
    }

    pub async fn save_assistant_token(&self, token: String) -> AppResult<BooleanResponse> {
        if token.trim().is_empty() {
            return Err(AppError::Validation("Token cannot be empty".to_string()));
        }
        let _guard = self.keyring_lock.lock().await;
        let entry = keyring::Entry::new(KEYRING_SERVICE, KEYRING_TOKEN_ENTRY)
            .map_err(|error| AppError::Io(error.to_string()))?;
        entry
            .set_password(token.trim())
            .map_err(|error| AppError::Io(error.to_string()))?;
        Ok(BooleanResponse { success: true })
    }

    pub async fn clear_assistant_token(&self) -> AppResult<BooleanResponse> {
        let _guard = self.keyring_lock.lock().await;
        let entry = keyring::Entry::new(KEYRING_SERVICE, KEYRING_TOKEN_ENTRY)
            .map_err(|error| AppError::Io(error.to_string()))?;
        match entry.delete_credential() {
            Ok(_) => Ok(BooleanResponse { success: true }),
            Err(keyring::Error::NoEntry) => Ok(BooleanResponse { success: true }),
            Err(error) => Err(AppError::Io(error.to_string())),
        }
    }

    pub async fn has_assistant_token(&self) -> AppResult<BooleanResponse> {
        Ok(BooleanResponse {
            success: self.read_assistant_token().await?.is_some(),
        })
    }

    async fn read_assistant_token(&self) -> AppResult<Option<String>> {
        let _guard = self.keyring_lock.lock().await;
        let entry = keyring::Entry::new(KEYRING_SERVICE, KEYRING_TOKEN_ENTRY)
            .map_err(|error| AppError::Io(error.to_string()))?;
        match entry.get_password() {
            Ok(value) => Ok(Some(value).filter(|value| !value.is_empty())),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(error) => Err(AppError::Io(error.to_string())),
        }
    }

    async fn call_options(&self) -> AppResult<CallOptions> {
        let settings = self.db.get_settings()?;
        let api_token = match self.read_assistant_token().await {
            Ok(token) => token,
            Err(error) => {
                tracing::warn!(error = %error, "assistant token unavailable; calling without it");
                None
            }
        };
        Ok(CallOptions {
            model: settings.assistant_model.filter(|model| !model.trim().is_empty()),
            timeout: Duration::from_secs(settings.assistant_timeout_seconds.max(1)),
            api_token,
        })
    }

    // ─── Internals ───────────────────────────────────────────────────────

    fn resolve_order_number(&self, order_number: &str) -> AppResult<String> {
        self.store
            .snapshot()?
            .order_by_number(order_number)
            .map(|order| order.id.clone())
            .ok_or_else(|| AppError::NotFound(format!("Order number '{}' not found", order_number)))
    }

    fn lock_writes(&self) -> AppResult<MutexGuard<'_, ()>> {
        self.write_lock
            .lock()
            .map_err(|_| AppError::Internal("write lock poisoned".to_string()))
    }

    fn mutate_order<F>(&self, order_id: &str, edit: F) -> AppResult<ServiceOrder>
    where
        F: FnOnce(&Snapshot, &mut ServiceOrder) -> AppResult<()>,
    {
        let _guard = self.lock_writes()?;
        let base = self.store.snapshot()?;
        let (next, updated) = base.with_order_updated(order_id, |order| edit(&*base, order))?;
        self.repository.update_order(&updated)?;
        self.store.replace(base.version(), next)?;
        tracing::debug!(order_id = %order_id, status = updated.status.as_str(), "order updated");
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assistant::tests::ScriptedProvider;
    use crate::models::OrderStatus;

    fn core_with(dir: &std::path::Path, replies: &[&str]) -> Arc<StudioCore> {
        let provider: Arc<dyn CompletionProvider> = ScriptedProvider::new(replies);
        StudioCore::with_provider(AppConfig::for_data_dir(dir), Some(provider)).expect("core")
    }

    fn create(core: &StudioCore, client: &str) -> ServiceOrder {
        core.create_order(CreateOrderPayload {
            client: client.to_string(),
            responsible: "Ana".to_string(),
            value: Some(250.0),
            ..CreateOrderPayload::default()
        })
        .expect("create")
    }

    #[test]
    fn writes_survive_a_reload() {
        let dir = tempfile::tempdir().expect("tempdir");
        {
            let core = core_with(dir.path(), &[]);
            let first = create(&core, "Loja Sol");
            let second = create(&core, "Café Lua");
            assert_eq!(first.order_number, "OS-001");
            assert_eq!(second.order_number, "OS-002");

            core.set_status(SetStatusPayload {
                order_id: first.id.clone(),
                status: OrderStatus::Delivered,
            })
            .expect("status");
            core.add_task(AddTaskPayload {
                order_id: second.id.clone(),
                text: "Enviar prova".to_string(),
            })
            .expect("task");
            core.delete_order(&second.id).expect("delete");
        }

        let core = core_with(dir.path(), &[]);
        let orders = core.list_orders().expect("orders");
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].client, "Loja Sol");
        assert_eq!(orders[0].status, OrderStatus::Delivered);
        assert!(orders[0].delivery_date.is_some());
    }

    #[test]
    fn snapshots_taken_before_a_write_do_not_change() {
        let dir = tempfile::tempdir().expect("tempdir");
        let core = core_with(dir.path(), &[]);
        let order = create(&core, "Loja Sol");
        let before = core.snapshot().expect("snapshot");

        core.advance_order(&order.id).expect("advance");

        assert_eq!(before.order(&order.id).map(|o| o.status), Some(OrderStatus::AwaitingProduct));
        assert_eq!(core.get_order(&order.id).expect("order").status, OrderStatus::Production);
        assert!(core.snapshot().expect("snapshot").version() > before.version());
    }

    #[test]
    fn custom_fields_flow_into_search() {
        let dir = tempfile::tempdir().expect("tempdir");
        let core = core_with(dir.path(), &[]);
        let order = create(&core, "Loja Sol");
        let field = core
            .save_field_definition(SaveFieldDefinitionPayload {
                id: None,
                name: "Locação".to_string(),
                field_type: crate::models::CustomFieldType::Text,
            })
            .expect("field");
        core.set_custom_field(SetCustomFieldPayload {
            order_id: order.id.clone(),
            field_id: field.id.clone(),
            value: serde_json::json!("Praia do Forte"),
        })
        .expect("set field");

        let results = core.search("forte").expect("search");
        assert_eq!(results.custom_fields.len(), 1);
        assert_eq!(results.custom_fields[0].order.order_number, "OS-001");

        assert!(matches!(
            core.set_custom_field(SetCustomFieldPayload {
                order_id: order.id,
                field_id: "missing".to_string(),
                value: serde_json::json!(1),
            }),
            Err(AppError::NotFound(_))
        ));
    }

    #[test]
    fn intents_resolve_orders_by_number() {
        let dir = tempfile::tempdir().expect("tempdir");
        let core = core_with(dir.path(), &[]);
        let order = create(&core, "Loja Sol");

        let updated = core
            .apply_intent(AssistantIntent::UpdateStatus {
                order_number: "os-001".to_string(),
                status: OrderStatus::Editing,
            })
            .expect("status intent");
        assert_eq!(updated.id, order.id);
        assert_eq!(updated.status, OrderStatus::Editing);

        let commented = core
            .apply_intent(AssistantIntent::AddComment {
                order_number: "OS-001".to_string(),
                text: "Cliente pediu ajuste".to_string(),
                author: None,
            })
            .expect("comment intent");
        assert_eq!(commented.comments[0].author, "Equipe");

        assert!(matches!(
            core.apply_intent(AssistantIntent::AddTask {
                order_number: "OS-999".to_string(),
                text: "x".to_string(),
            }),
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn chat_records_both_sides_of_the_turn() {
        let dir = tempfile::tempdir().expect("tempdir");
        let core = core_with(
            dir.path(),
            &[r#"Claro. {"name":"add_task","args":{"orderNumber":"OS-001","text":"Ligar para cliente"}}"#],
        );
        create(&core, "Loja Sol");

        let session_id = core.open_chat().await;
        let reply = core
            .chat(ChatMessagePayload {
                session_id: session_id.clone(),
                message: "lembrar de ligar".to_string(),
            })
            .await
            .expect("chat");

        assert_eq!(reply.text, "Claro.");
        assert_eq!(reply.intents.len(), 1);
        let history = core.chat_history(&session_id).await.expect("history");
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, ChatRole::User);
        assert_eq!(history[1].text, "Claro.");
        assert!(core.list_orders().expect("orders")[0].tasks.is_empty());
    }
}
