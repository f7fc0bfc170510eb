#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
pub struct CreateDatabaseRequest {
    #[schemars(
        description = "Name of the database to create (letters, digits, '_', '$', '-'; at most 63 bytes)"
    )]
    pub database_name: String,
}

#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
pub struct CreateOrUpdateTableRequest {
    #[schemars(description = "The CREATE TABLE or ALTER TABLE SQL statement")]
    pub sql: String,
}

#[derive(Debug, serde::Serialize)]
pub struct StatusMessage {
    pub status: &'static str,
    pub message: String,
}

impl StatusMessage {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            status: "ok",
            message: message.into(),
        }
    }
}
