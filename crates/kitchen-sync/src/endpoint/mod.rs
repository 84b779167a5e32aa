//! Endpoint drivers.
//!
//! The "from" side runs [`serve`]: read one command, dispatch, write one
//! reply, repeat until `quit` or EOF. The "to" side drives the session
//! through the [`handshake`] helpers and then hands over to the row
//! synchronization engine, whose command handlers plug in through
//! [`SyncDelegate`].

pub mod handshake;
mod hasher;
mod row_server;

pub use hasher::{HashAlgorithm, RowHasher};
pub use row_server::RowServer;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

use crate::adapter::DatabaseAdapter;
use crate::codec::PackedValue;
use crate::error::{Result, SyncError};
use crate::protocol::{
    commands, Command, FramedStream, EARLIEST_PROTOCOL_VERSION, FIRST_IDLE_COMMAND_VERSION,
    LAST_FILTERS_AFTER_SNAPSHOT_VERSION, LATEST_PROTOCOL_VERSION,
};
use crate::schema::wire::database_to_packed;
use crate::schema::Database;

/// Handlers for the range-synchronization commands.
///
/// The subdivision algorithm lives on the "to" side and is a client of this
/// crate; the "from" side only needs something that can serve key ranges,
/// block hashes, and rows. [`RowServer`] is the stock implementation.
#[async_trait]
pub trait SyncDelegate<A: DatabaseAdapter>: Send {
    /// Record the negotiated target block size.
    fn set_target_block_size(&mut self, size: u64);

    /// Record the negotiated minimum block size.
    fn set_target_minimum_block_size(&mut self, size: u64);

    /// Accept table filters (sent by peers at protocol version 7 and below).
    fn apply_filters(&mut self, _filters: &[PackedValue]) {}

    /// Handle a `range` command; returns the response values.
    async fn range(
        &mut self,
        adapter: &mut A,
        schema: &Database,
        command: &Command,
        version: u32,
    ) -> Result<Vec<PackedValue>>;

    /// Handle a `hash` command; returns the response values.
    async fn hash(
        &mut self,
        adapter: &mut A,
        schema: &Database,
        command: &Command,
        version: u32,
    ) -> Result<Vec<PackedValue>>;

    /// Handle a `rows` command; returns the response values (one per row).
    async fn rows(
        &mut self,
        adapter: &mut A,
        schema: &Database,
        command: &Command,
        version: u32,
    ) -> Result<Vec<PackedValue>>;
}

/// Run the "from" endpoint loop until the peer quits or disconnects.
///
/// The negotiated protocol version is recorded on the first `protocol`
/// command and passed to every version-conditional encoder afterwards. A
/// read transaction opened by a snapshot command is rolled back if the loop
/// exits without an explicit commit (there is none in this direction).
pub async fn serve<A, D, R, W>(
    adapter: &mut A,
    delegate: &mut D,
    stream: &mut FramedStream<R, W>,
) -> Result<()>
where
    A: DatabaseAdapter,
    D: SyncDelegate<A>,
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut transaction_open = false;
    let result = serve_commands(adapter, delegate, stream, &mut transaction_open).await;
    if transaction_open {
        // best effort; the session is over either way
        let _ = adapter.rollback_transaction().await;
    }
    result
}

async fn serve_commands<A, D, R, W>(
    adapter: &mut A,
    delegate: &mut D,
    stream: &mut FramedStream<R, W>,
    transaction_open: &mut bool,
) -> Result<()>
where
    A: DatabaseAdapter,
    D: SyncDelegate<A>,
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut version = LATEST_PROTOCOL_VERSION;
    let mut schema_cache: Option<Database> = None;

    loop {
        let Some(command) = stream.read_command().await? else {
            return Ok(()); // peer closed the pipe cleanly
        };

        match command.name.as_str() {
            commands::PROTOCOL => {
                let peer = command.uint_arg(0)? as u32;
                version = version.min(peer);
                if version < EARLIEST_PROTOCOL_VERSION {
                    return Err(SyncError::protocol_version(peer));
                }
                debug!(version, "negotiated protocol version");
                stream
                    .write_response(&[PackedValue::Uint(version as u64)])
                    .await?;
            }

            commands::SCHEMA => {
                if schema_cache.is_none() {
                    schema_cache = Some(adapter.database_schema().await?);
                }
                if let Some(database) = schema_cache.as_ref() {
                    stream
                        .write_response(&[database_to_packed(database, version)])
                        .await?;
                }
            }

            commands::EXPORT_SNAPSHOT => {
                let token = adapter.export_snapshot().await?;
                *transaction_open = true;
                stream
                    .write_response(&[PackedValue::from_str(&token)])
                    .await?;
            }

            commands::IMPORT_SNAPSHOT => {
                let token = command.str_arg(0)?.to_string();
                adapter.import_snapshot(&token).await?;
                *transaction_open = true;
                stream.write_response(&[]).await?;
            }

            commands::UNHOLD_SNAPSHOT => {
                adapter.unhold_snapshot().await?;
                stream.write_response(&[]).await?;
            }

            commands::WITHOUT_SNAPSHOT => {
                adapter.start_read_transaction().await?;
                *transaction_open = true;
                stream.write_response(&[]).await?;
            }

            commands::FILTERS => {
                if version > LAST_FILTERS_AFTER_SNAPSHOT_VERSION {
                    return Err(SyncError::Unsupported(command.name.clone()));
                }
                delegate.apply_filters(&command.args);
                stream.write_response(&[]).await?;
            }

            commands::TARGET_BLOCK_SIZE => {
                delegate.set_target_block_size(command.uint_arg(0)?);
                stream.write_response(&[]).await?;
            }

            commands::TARGET_MINIMUM_BLOCK_SIZE => {
                delegate.set_target_minimum_block_size(command.uint_arg(0)?);
                stream.write_response(&[]).await?;
            }

            commands::RANGE | commands::HASH | commands::ROWS => {
                if schema_cache.is_none() {
                    schema_cache = Some(adapter.database_schema().await?);
                }
                if let Some(database) = schema_cache.as_ref() {
                    let reply = match command.name.as_str() {
                        commands::RANGE => {
                            delegate.range(adapter, database, &command, version).await?
                        }
                        commands::HASH => {
                            delegate.hash(adapter, database, &command, version).await?
                        }
                        _ => delegate.rows(adapter, database, &command, version).await?,
                    };
                    stream.write_response(&reply).await?;
                }
            }

            commands::IDLE => {
                if version < FIRST_IDLE_COMMAND_VERSION {
                    return Err(SyncError::Unsupported(command.name.clone()));
                }
                stream.write_response(&[]).await?;
            }

            commands::QUIT => return Ok(()),

            other => return Err(SyncError::Unsupported(other.to_string())),
        }
    }
}
