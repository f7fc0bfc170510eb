//! Operations that cannot go through the shared pool.

use tokio_postgres::NoTls;

use crate::config::PgSettings;
use crate::error::PgMcpError;
use crate::pool::PoolManager;

/// Longest identifier the server keeps without truncation.
const MAX_IDENTIFIER_LEN: usize = 63;

/// Check a database name before it is spliced into statement text.
///
/// Names are limited to ASCII letters, digits, `_`, `$` and `-`, must start
/// with a letter or `_`, and must fit in 63 bytes.
pub fn validate_identifier(name: &str) -> Result<(), PgMcpError> {
    if name.is_empty() {
        return Err(PgMcpError::InvalidIdentifier("name must not be empty".into()));
    }
    if name.len() > MAX_IDENTIFIER_LEN {
        return Err(PgMcpError::InvalidIdentifier(format!(
            "'{name}' is longer than {MAX_IDENTIFIER_LEN} bytes"
        )));
    }
    let mut chars = name.chars();
    if !chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
    {
        return Err(PgMcpError::InvalidIdentifier(format!(
            "'{name}' must start with a letter or underscore"
        )));
    }
    if let Some(bad) = chars.find(|c| !(c.is_ascii_alphanumeric() || matches!(*c, '_' | '$' | '-'))) {
        return Err(PgMcpError::InvalidIdentifier(format!(
            "'{name}' contains the character {bad:?}; only letters, digits, '_', '$' and '-' are allowed"
        )));
    }
    Ok(())
}

/// Quote an identifier, doubling any embedded quote.
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Create a database through a one-off connection to the bootstrap database.
///
/// The connection is closed before returning, whether or not the statement
/// succeeded.
pub async fn create_database(settings: &PgSettings, name: &str) -> Result<String, PgMcpError> {
    validate_identifier(name)?;
    let statement = format!("CREATE DATABASE {}", quote_identifier(name));

    let mut config = tokio_postgres::Config::new();
    config
        .host(&settings.host)
        .port(settings.port)
        .user(&settings.user)
        .password(&settings.password)
        .dbname(&settings.bootstrap_database);

    let (client, connection) = config.connect(NoTls).await?;
    let driver = tokio::spawn(async move {
        if let Err(e) = connection.await {
            tracing::warn!("Bootstrap connection error: {}", e);
        }
    });

    let result = client.batch_execute(&statement).await;

    // Dropping the client ends the session; wait for the driver to finish.
    drop(client);
    if let Err(e) = driver.await {
        tracing::warn!("Bootstrap connection task failed: {}", e);
    }

    result?;
    tracing::info!("Created database {}", name);
    Ok(format!("Database '{name}' created."))
}

/// Run caller-supplied DDL on a pooled connection.
pub async fn create_or_update_table(pool: &PoolManager, sql: &str) -> Result<(), PgMcpError> {
    let client = pool.connection().await?;
    client.batch_execute(sql).await?;
    Ok(())
}
