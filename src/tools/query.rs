use serde_json::Value;

#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
pub struct SqlQueryRequest {
    #[schemars(description = "The SQL query string (SELECT, etc.)")]
    pub query: String,

    #[schemars(
        description = "Optional query parameters as a JSON array (or JSON text of one); element N binds to $N+1"
    )]
    #[serde(default)]
    pub params: Option<Value>,
}

#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
pub struct SqlExecuteRequest {
    #[schemars(description = "The INSERT/UPDATE/DELETE (or other) SQL statement")]
    pub query: String,

    #[schemars(
        description = "Optional statement parameters as a JSON array (or JSON text of one); element N binds to $N+1"
    )]
    #[serde(default)]
    pub params: Option<Value>,
}

#[derive(Debug, serde::Serialize)]
pub struct ExecuteResult {
    /// Command status, e.g. `UPDATE 3`.
    pub result: String,
}
