use std::sync::Arc;

use anyhow::Context;
use rmcp::{
    ErrorData as McpError, ServerHandler, ServiceExt,
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::{CallToolResult, Content, ServerCapabilities, ServerInfo},
    tool, tool_handler, tool_router,
    transport::{
        stdio,
        streamable_http_server::{StreamableHttpService, session::local::LocalSessionManager},
    },
};
use serde::Serialize;
use serde_json::{Map, Value, json};
use tokio_util::sync::CancellationToken;

use crate::admin;
use crate::config::{Config, Transport};
use crate::error::PgMcpError;
use crate::executor;
use crate::params;
use crate::pool::PoolManager;
use crate::tools::debug::ConnectionStatus;
use crate::tools::query::{ExecuteResult, SqlExecuteRequest, SqlQueryRequest};
use crate::tools::schema::{CreateDatabaseRequest, CreateOrUpdateTableRequest, StatusMessage};

#[derive(Clone)]
pub struct PostgresHandler {
    // Shared by every clone, so all sessions use one pool.
    pool: Arc<PoolManager>,
    tool_router: ToolRouter<Self>,
}

impl PostgresHandler {
    pub fn new(pool: Arc<PoolManager>) -> Self {
        Self {
            pool,
            tool_router: Self::tool_router(),
        }
    }

    pub async fn sql_query_tool(
        &self,
        req: SqlQueryRequest,
    ) -> Result<Vec<Map<String, Value>>, PgMcpError> {
        let args = params::decode(req.params.as_ref())?;
        executor::run_query(&self.pool, &req.query, &args).await
    }

    pub async fn sql_execute_tool(
        &self,
        req: SqlExecuteRequest,
    ) -> Result<ExecuteResult, PgMcpError> {
        let args = params::decode(req.params.as_ref())?;
        let result = executor::run_statement(&self.pool, &req.query, &args).await?;
        Ok(ExecuteResult { result })
    }

    pub async fn debug_connection_tool(&self) -> Result<ConnectionStatus, PgMcpError> {
        let postgres_version = executor::fetch_text(&self.pool, "SELECT version()").await?;
        Ok(ConnectionStatus {
            status: "ok",
            postgres_version,
        })
    }

    pub async fn create_database_tool(
        &self,
        req: CreateDatabaseRequest,
    ) -> Result<StatusMessage, PgMcpError> {
        let message = admin::create_database(self.pool.settings(), &req.database_name).await?;
        Ok(StatusMessage::ok(message))
    }

    pub async fn create_or_update_table_tool(
        &self,
        req: CreateOrUpdateTableRequest,
    ) -> Result<StatusMessage, PgMcpError> {
        admin::create_or_update_table(&self.pool, &req.sql).await?;
        Ok(StatusMessage::ok("Table created or updated."))
    }
}

/// Serialize a tool outcome into the response body: the payload on success,
/// `{"error": message}` on failure.
pub fn envelope<T: Serialize>(tool: &str, result: Result<T, PgMcpError>, pretty: bool) -> String {
    let body = result.and_then(|payload| {
        let encoded = if pretty {
            serde_json::to_string_pretty(&payload)
        } else {
            serde_json::to_string(&payload)
        };
        encoded.map_err(PgMcpError::from)
    });

    match body {
        Ok(body) => body,
        Err(e) => {
            tracing::warn!("{} failed: {}", tool, e);
            json!({ "error": e.to_string() }).to_string()
        }
    }
}

fn respond(body: String) -> Result<CallToolResult, McpError> {
    Ok(CallToolResult::success(vec![Content::text(body)]))
}

#[tool_router]
impl PostgresHandler {
    #[tool(
        description = "Run an arbitrary SQL query and return the result rows as a JSON array of objects"
    )]
    async fn sql_query(
        &self,
        Parameters(req): Parameters<SqlQueryRequest>,
    ) -> Result<CallToolResult, McpError> {
        tracing::debug!("sql_query: {}", req.query);
        respond(envelope("sql_query", self.sql_query_tool(req).await, true))
    }

    #[tool(
        description = "Execute an INSERT/UPDATE/DELETE SQL statement and return its command status (e.g. \"UPDATE 3\")"
    )]
    async fn sql_execute(
        &self,
        Parameters(req): Parameters<SqlExecuteRequest>,
    ) -> Result<CallToolResult, McpError> {
        tracing::debug!("sql_execute: {}", req.query);
        respond(envelope("sql_execute", self.sql_execute_tool(req).await, false))
    }

    #[tool(description = "Debug the Postgres connection to help diagnose issues")]
    async fn debug_postgres_connection(&self) -> Result<CallToolResult, McpError> {
        tracing::debug!("debug_postgres_connection");
        respond(envelope(
            "debug_postgres_connection",
            self.debug_connection_tool().await,
            false,
        ))
    }

    #[tool(description = "Create a new PostgreSQL database")]
    async fn create_database(
        &self,
        Parameters(req): Parameters<CreateDatabaseRequest>,
    ) -> Result<CallToolResult, McpError> {
        tracing::debug!("create_database: {}", req.database_name);
        respond(envelope(
            "create_database",
            self.create_database_tool(req).await,
            false,
        ))
    }

    #[tool(description = "Create or update a table in the connected database")]
    async fn create_or_update_table(
        &self,
        Parameters(req): Parameters<CreateOrUpdateTableRequest>,
    ) -> Result<CallToolResult, McpError> {
        tracing::debug!("create_or_update_table: {}", req.sql);
        respond(envelope(
            "create_or_update_table",
            self.create_or_update_table_tool(req).await,
            false,
        ))
    }
}

#[tool_handler]
impl ServerHandler for PostgresHandler {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                "PostgreSQL MCP server. Use sql_query for reads, sql_execute for writes, \
                create_or_update_table for DDL, create_database to add a database, and \
                debug_postgres_connection to check connectivity. Parameters are passed as a \
                JSON array bound to $1, $2, ... Every tool answers with JSON; failures come \
                back as {\"error\": message}."
                    .into(),
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}

pub async fn run(config: Config) -> anyhow::Result<()> {
    let pool = Arc::new(PoolManager::new(config.pg.clone()));
    let handler = PostgresHandler::new(pool);

    match config.transport {
        Transport::Stdio => {
            tracing::info!("Serving over stdio");
            let server = handler.serve(stdio()).await?;
            server.waiting().await?;
        }
        Transport::Http => serve_http(handler, &config.listen_host, config.listen_port).await?,
    }

    Ok(())
}

async fn serve_http(handler: PostgresHandler, host: &str, port: u16) -> anyhow::Result<()> {
    let addr = tokio::net::lookup_host((host, port))
        .await
        .with_context(|| format!("Cannot resolve listen address {host}:{port}"))?
        .next()
        .with_context(|| format!("No address found for {host}:{port}"))?;

    let service = StreamableHttpService::new(
        move || Ok(handler.clone()),
        LocalSessionManager::default().into(),
        Default::default(),
    );
    let router = axum::Router::new().nest_service("/mcp", service);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Cannot bind {addr}"))?;
    tracing::info!("Serving MCP over HTTP on http://{}/mcp", addr);

    let shutdown = CancellationToken::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutting down");
        }
        trigger.cancel();
    });

    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    Ok(())
}
