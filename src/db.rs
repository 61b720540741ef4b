//! Database connection management
//!
//! Owns the single lazily-established TypeDB connection for the process
//! and turns the engine's heterogeneous answers into uniform rows.

pub mod answer;
mod http;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{error, info, warn};
use url::Url;

use crate::config::Settings;
use crate::error::AppError;
use self::answer::{normalize, QueryAnswer, QueryRow};
use self::http::{HttpApiError, TypeDbHttp};

/// The only transaction kind this service opens.
const READ_TRANSACTION: &str = "read";

/// Connection status
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
    Error(String),
}

/// Connection lifecycle. `Errored` keeps the failure message for
/// diagnostics but counts as absent when the next caller wants a session.
enum ConnectionState {
    NotConnected,
    Connected(TypeDbHttp),
    Errored(String),
}

/// Client owning the process-wide TypeDB connection.
///
/// Nothing connects at construction time; the first query (or an explicit
/// [`connect`](TypeDbClient::connect)) establishes the session.
pub struct TypeDbClient {
    settings: Arc<Settings>,
    client: reqwest::Client,
    state: RwLock<ConnectionState>,
}

impl TypeDbClient {
    /// Create an unconnected client for the configured server.
    pub fn new(settings: Arc<Settings>) -> Self {
        Self {
            settings,
            client: reqwest::Client::new(),
            state: RwLock::new(ConnectionState::NotConnected),
        }
    }

    /// Establish the connection if absent.
    ///
    /// Idempotent: an established connection is left untouched. Concurrent
    /// first callers serialize on the write lock, so exactly one sign-in
    /// happens no matter how many queries race. On first establishment the
    /// configured database is created if the server does not have it yet.
    #[allow(dead_code)]
    pub async fn connect(&self) -> Result<(), AppError> {
        self.ensure_session().await.map(|_| ())
    }

    async fn ensure_session(&self) -> Result<TypeDbHttp, AppError> {
        {
            let state = self.state.read().await;
            if let ConnectionState::Connected(session) = &*state {
                return Ok(session.clone());
            }
        }

        let mut state = self.state.write().await;
        // Another caller may have connected while we waited on the lock.
        if let ConnectionState::Connected(session) = &*state {
            return Ok(session.clone());
        }

        match self.establish().await {
            Ok(session) => {
                *state = ConnectionState::Connected(session.clone());
                Ok(session)
            }
            Err(establish_error) => {
                let message = establish_error.to_string();
                error!("Failed to connect to TypeDB: {}", message);
                *state = ConnectionState::Errored(message.clone());
                Err(AppError::Connection(message))
            }
        }
    }

    /// Sign in and make sure the configured database exists.
    async fn establish(&self) -> Result<TypeDbHttp, HttpApiError> {
        let settings = &self.settings;
        let scheme = if settings.typedb_tls_enabled {
            "https"
        } else {
            "http"
        };
        let address = settings.typedb_address();
        let base = Url::parse(&format!("{}://{}", scheme, address))?;

        let session = TypeDbHttp::sign_in(
            self.client.clone(),
            base,
            &settings.typedb_user_name,
            &settings.typedb_admin_password,
        )
        .await?;
        info!("Connected to TypeDB at {}", address);

        let database = &settings.typedb_database_name;
        let existing = session.database_names().await?;
        if !existing.iter().any(|name| name == database) {
            session.create_database(database).await?;
            info!("Created database '{}'", database);
        }

        Ok(session)
    }

    /// Drop the connection. Safe to call repeatedly or when never
    /// connected; a later query reconnects from scratch.
    pub async fn close(&self) {
        let mut state = self.state.write().await;
        if matches!(&*state, ConnectionState::Connected(_)) {
            info!("TypeDB connection closed");
        }
        *state = ConnectionState::NotConnected;
    }

    /// Current connection status for health reporting.
    pub async fn status(&self) -> ConnectionStatus {
        match &*self.state.read().await {
            ConnectionState::NotConnected => ConnectionStatus::Disconnected,
            ConnectionState::Connected(_) => ConnectionStatus::Connected,
            ConnectionState::Errored(message) => ConnectionStatus::Error(message.clone()),
        }
    }

    /// Run a read query and return normalized rows.
    ///
    /// Connects first if no connection is held. Each call runs in its own
    /// read transaction, which is released on success and failure alike.
    /// Failures are logged and propagated unchanged; there is no retry.
    pub async fn execute_read_query(&self, query: &str) -> Result<Vec<QueryRow>, AppError> {
        let session = self.ensure_session().await?;

        match self.run_read(&session, query).await {
            Ok(rows) => Ok(rows),
            Err(query_error) => {
                error!("Query execution failed: {} (query: {})", query_error, query);
                Err(query_error)
            }
        }
    }

    /// Open a read transaction, run the query, and always close the
    /// transaction before returning.
    async fn run_read(&self, session: &TypeDbHttp, query: &str) -> Result<Vec<QueryRow>, AppError> {
        let database = &self.settings.typedb_database_name;
        let transaction_id = session
            .open_transaction(database, READ_TRANSACTION)
            .await
            .map_err(|open_error| AppError::Query(open_error.to_string()))?;

        let outcome = session.transaction_query(&transaction_id, query).await;

        // Release the transaction on every path. A failed close does not
        // invalidate an answer we already hold.
        if let Err(close_error) = session.close_transaction(&transaction_id).await {
            warn!(
                "Failed to close transaction {}: {}",
                transaction_id, close_error
            );
        }

        let response = outcome.map_err(|query_error| AppError::Query(query_error.to_string()))?;
        let parsed =
            QueryAnswer::try_from(response).map_err(|bad| AppError::Query(bad.to_string()))?;
        Ok(normalize(parsed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::{Path, State};
    use axum::http::StatusCode;
    use axum::response::IntoResponse;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// In-process stand-in for the TypeDB HTTP endpoint.
    struct FakeEngine {
        signins: AtomicUsize,
        creates: AtomicUsize,
        opens: AtomicUsize,
        closes: AtomicUsize,
        reject_auth: AtomicBool,
        databases: Mutex<HashSet<String>>,
        reply: Mutex<Value>,
        query_failure: Mutex<Option<String>>,
    }

    impl FakeEngine {
        fn with_reply(reply: Value) -> Arc<Self> {
            Arc::new(Self {
                signins: AtomicUsize::new(0),
                creates: AtomicUsize::new(0),
                opens: AtomicUsize::new(0),
                closes: AtomicUsize::new(0),
                reject_auth: AtomicBool::new(false),
                databases: Mutex::new(HashSet::new()),
                reply: Mutex::new(reply),
                query_failure: Mutex::new(None),
            })
        }
    }

    async fn fake_signin(
        State(engine): State<Arc<FakeEngine>>,
        Json(_credentials): Json<Value>,
    ) -> axum::response::Response {
        engine.signins.fetch_add(1, Ordering::SeqCst);
        if engine.reject_auth.load(Ordering::SeqCst) {
            return (StatusCode::UNAUTHORIZED, "invalid credentials").into_response();
        }
        Json(json!({ "token": "fake-token" })).into_response()
    }

    async fn fake_databases(State(engine): State<Arc<FakeEngine>>) -> Json<Value> {
        let names: Vec<Value> = engine
            .databases
            .lock()
            .unwrap()
            .iter()
            .map(|name| json!({ "name": name }))
            .collect();
        Json(json!({ "databases": names }))
    }

    async fn fake_create_database(
        State(engine): State<Arc<FakeEngine>>,
        Path(name): Path<String>,
    ) -> StatusCode {
        engine.creates.fetch_add(1, Ordering::SeqCst);
        engine.databases.lock().unwrap().insert(name);
        StatusCode::OK
    }

    async fn fake_open(
        State(engine): State<Arc<FakeEngine>>,
        Json(_body): Json<Value>,
    ) -> Json<Value> {
        engine.opens.fetch_add(1, Ordering::SeqCst);
        Json(json!({ "transactionId": "tx-1" }))
    }

    async fn fake_query(State(engine): State<Arc<FakeEngine>>) -> axum::response::Response {
        if let Some(message) = engine.query_failure.lock().unwrap().clone() {
            return (StatusCode::BAD_REQUEST, message).into_response();
        }
        Json(engine.reply.lock().unwrap().clone()).into_response()
    }

    async fn fake_close(State(engine): State<Arc<FakeEngine>>) -> StatusCode {
        engine.closes.fetch_add(1, Ordering::SeqCst);
        StatusCode::OK
    }

    async fn spawn_engine(engine: Arc<FakeEngine>) -> u16 {
        let app = Router::new()
            .route("/v1/signin", post(fake_signin))
            .route("/v1/databases", get(fake_databases))
            .route("/v1/databases/{name}", post(fake_create_database))
            .route("/v1/transactions/open", post(fake_open))
            .route("/v1/transactions/{id}/query", post(fake_query))
            .route("/v1/transactions/{id}/close", post(fake_close))
            .with_state(engine);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        port
    }

    fn client_for(port: u16) -> TypeDbClient {
        let settings = Settings {
            typedb_host: "127.0.0.1".to_string(),
            typedb_port: port,
            typedb_database_name: "graphwiki-test".to_string(),
            ..Settings::default()
        };
        TypeDbClient::new(Arc::new(settings))
    }

    fn rows_reply() -> Value {
        json!({
            "queryType": "read",
            "answerType": "conceptRows",
            "answers": [
                { "data": { "x": { "kind": "attribute", "label": "name", "value": "1" } } },
                { "data": { "x": { "kind": "attribute", "label": "name", "value": "2" } } },
            ],
        })
    }

    #[tokio::test]
    async fn first_query_connects_then_reuses_the_session() {
        let engine = FakeEngine::with_reply(rows_reply());
        let port = spawn_engine(engine.clone()).await;
        let client = client_for(port);

        assert_eq!(client.status().await, ConnectionStatus::Disconnected);

        let rows = client.execute_read_query("match $x isa thing;").await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["x"], "1");
        assert_eq!(client.status().await, ConnectionStatus::Connected);
        assert_eq!(engine.signins.load(Ordering::SeqCst), 1);

        client.execute_read_query("match $x isa thing;").await.unwrap();
        assert_eq!(engine.signins.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn missing_database_is_created_exactly_once() {
        let engine = FakeEngine::with_reply(rows_reply());
        let port = spawn_engine(engine.clone()).await;
        let client = client_for(port);

        client.execute_read_query("match $x isa thing;").await.unwrap();
        client.execute_read_query("match $x isa thing;").await.unwrap();
        client.connect().await.unwrap();

        assert_eq!(engine.creates.load(Ordering::SeqCst), 1);
        assert!(engine
            .databases
            .lock()
            .unwrap()
            .contains("graphwiki-test"));
    }

    #[tokio::test]
    async fn existing_database_is_not_recreated() {
        let engine = FakeEngine::with_reply(rows_reply());
        engine
            .databases
            .lock()
            .unwrap()
            .insert("graphwiki-test".to_string());
        let port = spawn_engine(engine.clone()).await;
        let client = client_for(port);

        client.connect().await.unwrap();
        assert_eq!(engine.creates.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn connect_is_idempotent() {
        let engine = FakeEngine::with_reply(rows_reply());
        let port = spawn_engine(engine.clone()).await;
        let client = client_for(port);

        client.connect().await.unwrap();
        client.connect().await.unwrap();
        client.connect().await.unwrap();

        assert_eq!(engine.signins.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn concurrent_first_queries_sign_in_once() {
        let engine = FakeEngine::with_reply(rows_reply());
        let port = spawn_engine(engine.clone()).await;
        let client = Arc::new(client_for(port));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let client = Arc::clone(&client);
            handles.push(tokio::spawn(async move {
                client.execute_read_query("match $x isa thing;").await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(engine.signins.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn close_is_idempotent_and_reconnection_works() {
        let engine = FakeEngine::with_reply(rows_reply());
        let port = spawn_engine(engine.clone()).await;
        let client = client_for(port);

        // Closing before any connection is a no-op.
        client.close().await;
        assert_eq!(client.status().await, ConnectionStatus::Disconnected);

        client.execute_read_query("match $x isa thing;").await.unwrap();
        client.close().await;
        client.close().await;
        assert_eq!(client.status().await, ConnectionStatus::Disconnected);

        // The next query establishes a fresh session.
        client.execute_read_query("match $x isa thing;").await.unwrap();
        assert_eq!(engine.signins.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn unreachable_server_surfaces_a_connection_error() {
        // Bind then drop to grab a port with nothing listening on it.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let client = client_for(port);
        let error = client.execute_read_query("match $x isa thing;").await.unwrap_err();
        assert!(matches!(error, AppError::Connection(_)));
        assert!(matches!(client.status().await, ConnectionStatus::Error(_)));
    }

    #[tokio::test]
    async fn rejected_credentials_surface_a_connection_error() {
        let engine = FakeEngine::with_reply(rows_reply());
        engine.reject_auth.store(true, Ordering::SeqCst);
        let port = spawn_engine(engine.clone()).await;
        let client = client_for(port);

        let error = client.connect().await.unwrap_err();
        let message = error.to_string();
        assert!(message.contains("401"));
        assert!(matches!(client.status().await, ConnectionStatus::Error(_)));
    }

    #[tokio::test]
    async fn failed_connection_is_retried_on_the_next_call() {
        let engine = FakeEngine::with_reply(rows_reply());
        engine.reject_auth.store(true, Ordering::SeqCst);
        let port = spawn_engine(engine.clone()).await;
        let client = client_for(port);

        assert!(client.connect().await.is_err());

        engine.reject_auth.store(false, Ordering::SeqCst);
        client.connect().await.unwrap();
        assert_eq!(client.status().await, ConnectionStatus::Connected);
        assert_eq!(engine.signins.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn query_errors_propagate_and_still_close_the_transaction() {
        let engine = FakeEngine::with_reply(rows_reply());
        *engine.query_failure.lock().unwrap() = Some("syntax error near 'match'".to_string());
        let port = spawn_engine(engine.clone()).await;
        let client = client_for(port);

        let error = client.execute_read_query("this is not typeql").await.unwrap_err();
        assert!(matches!(error, AppError::Query(_)));
        assert!(error.to_string().contains("syntax error"));

        assert_eq!(engine.opens.load(Ordering::SeqCst), 1);
        assert_eq!(engine.closes.load(Ordering::SeqCst), 1);

        // The connection itself survives a failed query.
        assert_eq!(client.status().await, ConnectionStatus::Connected);
    }

    #[tokio::test]
    async fn every_query_runs_in_its_own_transaction() {
        let engine = FakeEngine::with_reply(rows_reply());
        let port = spawn_engine(engine.clone()).await;
        let client = client_for(port);

        for _ in 0..3 {
            client.execute_read_query("match $x isa thing;").await.unwrap();
        }

        assert_eq!(engine.opens.load(Ordering::SeqCst), 3);
        assert_eq!(engine.closes.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn acknowledgement_answers_normalize_to_a_status_row() {
        let engine = FakeEngine::with_reply(json!({ "queryType": "schema", "answerType": "ok" }));
        let port = spawn_engine(engine).await;
        let client = client_for(port);

        let rows = client.execute_read_query("define entity page;").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["status"], "OK");
    }

    #[tokio::test]
    async fn document_answers_normalize_to_document_rows() {
        let engine = FakeEngine::with_reply(json!({
            "queryType": "read",
            "answerType": "conceptDocuments",
            "answers": [ { "page": { "title": "Home" } } ],
        }));
        let port = spawn_engine(engine).await;
        let client = client_for(port);

        let rows = client.execute_read_query("match ... fetch ...;").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["document"], json!({ "page": { "title": "Home" } }).to_string());
    }

    #[tokio::test]
    async fn unknown_answer_types_surface_a_query_error() {
        let engine = FakeEngine::with_reply(json!({
            "queryType": "read",
            "answerType": "conceptTrees",
            "answers": [],
        }));
        let port = spawn_engine(engine).await;
        let client = client_for(port);

        let error = client.execute_read_query("match $x isa thing;").await.unwrap_err();
        assert!(matches!(error, AppError::Query(_)));
        assert!(error.to_string().contains("conceptTrees"));
    }
}
