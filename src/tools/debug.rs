#[derive(Debug, serde::Serialize)]
pub struct ConnectionStatus {
    pub status: &'static str,
    pub postgres_version: String,
}
