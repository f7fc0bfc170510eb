//! Statement execution against the shared pool.
//!
//! Each call checks one connection out of the pool and holds it only for the
//! duration of the call; the connection goes back when the guard drops, on
//! success and on every error path alike.

use serde_json::{Map, Value};
use tokio_postgres::SimpleQueryMessage;
use tokio_postgres::types::ToSql;

use crate::error::PgMcpError;
use crate::params::SqlArg;
use crate::pool::PoolManager;
use crate::rows::row_to_json;

/// Run a statement that returns rows and materialize all of them.
pub async fn run_query(
    pool: &PoolManager,
    sql: &str,
    args: &[SqlArg],
) -> Result<Vec<Map<String, Value>>, PgMcpError> {
    let client = pool.connection().await?;
    let params: Vec<&(dyn ToSql + Sync)> = args.iter().map(SqlArg::as_param).collect();

    let rows = client.query(sql, &params).await?;
    tracing::debug!("Query returned {} rows", rows.len());

    rows.iter().map(row_to_json).collect()
}

/// Run a statement for its effect and return its command status, e.g.
/// `DELETE 3` or `CREATE TABLE`.
///
/// Without arguments the simple-query protocol is used, so a script of
/// several `;`-separated statements is accepted and the status describes the
/// last one.
pub async fn run_statement(
    pool: &PoolManager,
    sql: &str,
    args: &[SqlArg],
) -> Result<String, PgMcpError> {
    let client = pool.connection().await?;

    let affected = if args.is_empty() {
        client
            .simple_query(sql)
            .await?
            .iter()
            .filter_map(|msg| match msg {
                SimpleQueryMessage::CommandComplete(n) => Some(*n),
                _ => None,
            })
            .last()
            .unwrap_or(0)
    } else {
        let params: Vec<&(dyn ToSql + Sync)> = args.iter().map(SqlArg::as_param).collect();
        client.execute(sql, &params).await?
    };

    Ok(command_tag(sql, affected))
}

/// Run a statement and return the first column of its first row as text.
pub async fn fetch_text(pool: &PoolManager, sql: &str) -> Result<String, PgMcpError> {
    let client = pool.connection().await?;
    let row = client.query_one(sql, &[]).await?;
    Ok(row.try_get::<_, String>(0)?)
}

const SKIPPED_MODIFIERS: [&str; 14] = [
    "OR",
    "REPLACE",
    "UNIQUE",
    "TEMP",
    "TEMPORARY",
    "UNLOGGED",
    "GLOBAL",
    "LOCAL",
    "TRUSTED",
    "PROCEDURAL",
    "RECURSIVE",
    "CONSTRAINT",
    "DEFAULT",
    "CONCURRENTLY",
];

/// Object names the server reports with more than one word.
const MULTI_WORD_OBJECTS: [&str; 14] = [
    "MATERIALIZED VIEW",
    "FOREIGN DATA WRAPPER",
    "FOREIGN TABLE",
    "EVENT TRIGGER",
    "TEXT SEARCH CONFIGURATION",
    "TEXT SEARCH DICTIONARY",
    "TEXT SEARCH PARSER",
    "TEXT SEARCH TEMPLATE",
    "ACCESS METHOD",
    "USER MAPPING",
    "OPERATOR CLASS",
    "OPERATOR FAMILY",
    "DEFAULT PRIVILEGES",
    "LARGE OBJECT",
];

/// Build the command status the server reports for `sql`, given the number
/// of rows it touched.
pub fn command_tag(sql: &str, rows: u64) -> String {
    let statements = top_level_words(sql);
    let Some(words) = statements.iter().rev().find(|w| !w.is_empty()) else {
        return String::new();
    };

    let verb = match words[0].as_str() {
        "WITH" => words[1..]
            .iter()
            .find(|w| matches!(w.as_str(), "SELECT" | "INSERT" | "UPDATE" | "DELETE" | "MERGE"))
            .map(String::as_str)
            .unwrap_or("SELECT"),
        first => first,
    };
    let next = words.get(1).map(String::as_str);

    match verb {
        "INSERT" => format!("INSERT 0 {rows}"),
        "SELECT" | "UPDATE" | "DELETE" | "MERGE" | "MOVE" | "FETCH" | "COPY" => {
            format!("{verb} {rows}")
        }
        "VALUES" | "TABLE" => format!("SELECT {rows}"),
        "TRUNCATE" => "TRUNCATE TABLE".to_string(),
        "START" => "START TRANSACTION".to_string(),
        "ABORT" => "ROLLBACK".to_string(),
        "END" => "COMMIT".to_string(),
        "COMMIT" | "ROLLBACK" if next == Some("PREPARED") => format!("{verb} PREPARED"),
        "PREPARE" if next == Some("TRANSACTION") => "PREPARE TRANSACTION".to_string(),
        "LOCK" => "LOCK TABLE".to_string(),
        "DECLARE" => "DECLARE CURSOR".to_string(),
        "CLOSE" if next == Some("ALL") => "CLOSE CURSOR ALL".to_string(),
        "CLOSE" => "CLOSE CURSOR".to_string(),
        "DEALLOCATE" if words.last().map(String::as_str) == Some("ALL") => {
            "DEALLOCATE ALL".to_string()
        }
        "DISCARD" => match next {
            Some("TEMPORARY") => "DISCARD TEMP".to_string(),
            Some(what) => format!("DISCARD {what}"),
            None => verb.to_string(),
        },
        "REFRESH" => "REFRESH MATERIALIZED VIEW".to_string(),
        "REASSIGN" => "REASSIGN OWNED".to_string(),
        "SECURITY" => "SECURITY LABEL".to_string(),
        "IMPORT" => "IMPORT FOREIGN SCHEMA".to_string(),
        "ANALYSE" => "ANALYZE".to_string(),
        "CREATE" | "ALTER" | "DROP" => {
            let Some(object) = object_kind(&words[1..]) else {
                return verb.to_string();
            };
            // CREATE TABLE ... AS and CREATE MATERIALIZED VIEW report the rows
            // they loaded unless created WITH NO DATA.
            let loads_rows = verb == "CREATE"
                && matches!(object.as_str(), "TABLE" | "MATERIALIZED VIEW")
                && words.iter().any(|w| w == "AS");
            let no_data = words.windows(2).any(|w| w[0] == "NO" && w[1] == "DATA");
            match (loads_rows, no_data, object.as_str()) {
                (true, false, _) => format!("SELECT {rows}"),
                (true, true, "TABLE") => "CREATE TABLE AS".to_string(),
                _ => format!("{verb} {object}"),
            }
        }
        other => other.to_string(),
    }
}

/// Name of the object a CREATE/ALTER/DROP acts on, as the server spells it.
fn object_kind(words: &[String]) -> Option<String> {
    let mut rest = words;
    loop {
        let first = rest.first()?;
        if let Some(phrase) = MULTI_WORD_OBJECTS
            .iter()
            .find(|phrase| starts_with_phrase(rest, phrase))
        {
            return Some((*phrase).to_string());
        }
        if SKIPPED_MODIFIERS.contains(&first.as_str()) {
            rest = &rest[1..];
            continue;
        }
        return Some(match first.as_str() {
            "USER" | "GROUP" => "ROLE".to_string(),
            other => other.to_string(),
        });
    }
}

fn starts_with_phrase(words: &[String], phrase: &str) -> bool {
    let parts: Vec<&str> = phrase.split(' ').collect();
    words.len() >= parts.len() && words.iter().zip(&parts).all(|(w, p)| w == p)
}

/// Split `sql` into statements and return, for each, the upper-cased words
/// that sit outside parentheses, literals, quoted identifiers and comments.
fn top_level_words(sql: &str) -> Vec<Vec<String>> {
    let bytes = sql.as_bytes();
    let mut statements = vec![Vec::new()];
    let mut depth = 0usize;
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        match b {
            b'-' if bytes.get(i + 1) == Some(&b'-') => {
                i = sql[i..].find('\n').map_or(bytes.len(), |p| i + p + 1);
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i = sql[i + 2..].find("*/").map_or(bytes.len(), |p| i + 2 + p + 2);
            }
            b'\'' | b'"' => {
                i = skip_quoted(bytes, i, b);
            }
            b'$' => {
                i = skip_dollar_quoted(sql, i);
            }
            b'(' => {
                depth += 1;
                i += 1;
            }
            b')' => {
                depth = depth.saturating_sub(1);
                i += 1;
            }
            b';' if depth == 0 => {
                statements.push(Vec::new());
                i += 1;
            }
            _ if b.is_ascii_alphabetic() || b == b'_' => {
                let start = i;
                while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
                    i += 1;
                }
                if depth == 0 {
                    if let Some(current) = statements.last_mut() {
                        current.push(sql[start..i].to_ascii_uppercase());
                    }
                }
            }
            _ => i += 1,
        }
    }

    statements
}

/// Skip a `'...'` literal or `"..."` identifier; a doubled quote is an escape.
fn skip_quoted(bytes: &[u8], start: usize, quote: u8) -> usize {
    let mut i = start + 1;
    while i < bytes.len() {
        if bytes[i] == quote {
            if bytes.get(i + 1) == Some(&quote) {
                i += 2;
                continue;
            }
            return i + 1;
        }
        i += 1;
    }
    bytes.len()
}

/// Skip a `$tag$ ... $tag$` body. A `$` that does not open one (a positional
/// placeholder such as `$1`) is stepped over.
fn skip_dollar_quoted(sql: &str, start: usize) -> usize {
    let bytes = sql.as_bytes();
    let mut end = start + 1;
    while end < bytes.len() && (bytes[end].is_ascii_alphanumeric() || bytes[end] == b'_') {
        end += 1;
    }
    let tag_starts_with_digit = bytes.get(start + 1).is_some_and(u8::is_ascii_digit);
    if bytes.get(end) != Some(&b'$') || tag_starts_with_digit {
        return end.max(start + 1);
    }

    let delimiter = &sql[start..=end];
    let body = end + 1;
    sql[body..]
        .find(delimiter)
        .map_or(bytes.len(), |p| body + p + delimiter.len())
}
