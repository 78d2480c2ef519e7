//! Helper utilities shared by the engine adapters.
//!
//! Provides bounded result streaming, identifier quoting and the mapping of
//! driver errors onto transport or statement failures.

use futures::{Stream, TryStreamExt, pin_mut};

/// Drains at most `max_rows` items from a result stream.
///
/// Returns the collected items and whether the stream had more. The
/// remaining items are never fetched; dropping the stream cancels them.
pub(crate) async fn take_bounded<S, T, E>(
    stream: S,
    max_rows: u32,
) -> std::result::Result<(Vec<T>, bool), E>
where
    S: Stream<Item = std::result::Result<T, E>>,
{
    pin_mut!(stream);
    let limit = usize::try_from(max_rows).unwrap_or(usize::MAX);
    let mut items = Vec::new();

    while let Some(item) = stream.try_next().await? {
        if items.len() >= limit {
            return Ok((items, true));
        }
        items.push(item);
    }

    Ok((items, false))
}

/// Quotes an identifier for SQL engines using the given quote character.
pub(crate) fn quote_identifier(name: &str, quote: char) -> String {
    let escaped = name.replace(quote, &format!("{quote}{quote}"));
    format!("{quote}{escaped}{quote}")
}

/// Renders binary values the way result rows expose them.
#[cfg(any(feature = "sqlite", feature = "mysql", feature = "mongodb"))]
pub(crate) fn encode_binary(bytes: &[u8]) -> serde_json::Value {
    use base64::Engine;
    let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
    serde_json::Value::String(format!("base64:{}", encoded))
}

/// Maps a sqlx error onto the session error taxonomy.
///
/// Errors the server raised about the statement itself (syntax, missing
/// table, decode problems) leave the link usable. Everything else (I/O,
/// TLS, protocol, pool) means the session is gone.
#[cfg(any(feature = "sqlite", feature = "mysql"))]
pub(crate) fn classify_sqlx_error(
    context: impl Into<String>,
    error: sqlx::Error,
) -> crate::error::TinyDbError {
    let context = context.into();
    let statement_level = matches!(
        error,
        sqlx::Error::Database(_)
            | sqlx::Error::RowNotFound
            | sqlx::Error::TypeNotFound { .. }
            | sqlx::Error::ColumnIndexOutOfBounds { .. }
            | sqlx::Error::ColumnNotFound(_)
            | sqlx::Error::ColumnDecode { .. }
            | sqlx::Error::Decode(_)
            | sqlx::Error::Encode(_)
    );

    if statement_level {
        crate::error::TinyDbError::query_failed(format!("{}: {}", context, error))
    } else {
        crate::error::TinyDbError::transport_failed(context, error)
    }
}
