//! The "to" side of session establishment.
//!
//! The destination drives the session: it negotiates a protocol version,
//! pulls the source's schema, normalizes it to what its own engine can
//! represent, and refuses to continue on any structural disagreement. Only
//! after that does the row synchronization engine take over.

use std::collections::BTreeSet;

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info};

use crate::adapter::DatabaseAdapter;
use crate::codec::PackedValue;
use crate::error::{Result, SyncError};
use crate::protocol::{
    commands, FramedStream, EARLIEST_PROTOCOL_VERSION, LATEST_PROTOCOL_VERSION,
};
use crate::schema::wire::database_from_packed;
use crate::schema::{check_schema_match, Database};

/// Table selection applied to both schemas before comparison.
#[derive(Debug, Clone, Default)]
pub struct HandshakeOptions {
    pub ignore_tables: BTreeSet<String>,
    pub only_tables: BTreeSet<String>,
}

/// Agree on a protocol version with the peer.
pub async fn negotiate_protocol<R, W>(stream: &mut FramedStream<R, W>) -> Result<u32>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    stream
        .write_command(
            commands::PROTOCOL,
            &[PackedValue::Uint(LATEST_PROTOCOL_VERSION as u64)],
        )
        .await?;
    let reply = stream.read_response().await?;
    let version = reply
        .first()
        .and_then(|v| v.as_u64())
        .ok_or_else(|| SyncError::wire("protocol response is not a version number"))?
        as u32;
    if !(EARLIEST_PROTOCOL_VERSION..=LATEST_PROTOCOL_VERSION).contains(&version) {
        return Err(SyncError::protocol_version(version));
    }
    debug!(version, "negotiated protocol version");
    Ok(version)
}

/// Fetch and decode the peer's schema at the negotiated version.
pub async fn fetch_peer_schema<R, W>(
    stream: &mut FramedStream<R, W>,
    version: u32,
) -> Result<Database>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    stream.write_command(commands::SCHEMA, &[]).await?;
    let reply = stream.read_response().await?;
    let payload = reply
        .first()
        .ok_or_else(|| SyncError::wire("schema response is empty"))?;
    database_from_packed(payload, version)
}

/// Establish the session up to the point where data may flow: version
/// handshake, schema exchange, normalization, and the schema match.
///
/// Returns the negotiated version and the source's (normalized) schema.
pub async fn prepare_replication<A, R, W>(
    adapter: &mut A,
    stream: &mut FramedStream<R, W>,
    options: &HandshakeOptions,
) -> Result<(u32, Database)>
where
    A: DatabaseAdapter,
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let version = negotiate_protocol(stream).await?;

    let mut from_database = fetch_peer_schema(stream, version).await?;
    adapter.convert_unsupported_schema(&mut from_database);

    let to_database = adapter.database_schema().await?;
    check_schema_match(
        &from_database,
        &to_database,
        &options.ignore_tables,
        &options.only_tables,
    )?;
    info!(
        tables = from_database.tables.len(),
        "schemas match, ready to synchronize"
    );
    Ok((version, from_database))
}

/// Tell the peer we are done.
pub async fn send_quit<R, W>(stream: &mut FramedStream<R, W>) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    stream.write_command(commands::QUIT, &[]).await
}
