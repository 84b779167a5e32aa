//! # kitchen-sync
//!
//! Point-to-point database replication core. Two peer processes connect over
//! a bidirectional byte stream (typically the stdio of a child spawned over
//! a remote shell); the *source* ("from") endpoint serves schema and row
//! data, and the *destination* ("to") endpoint drives the session until its
//! tables are bit-identical to the source's.
//!
//! The crate provides:
//!
//! - a self-describing binary value codec and the framed command stream
//!   built on it ([`codec`], [`protocol`])
//! - the engine-agnostic schema model and the schema-match engine
//!   ([`schema`])
//! - the backend adapter contract with PostgreSQL and MySQL implementations
//!   ([`adapter`])
//! - the endpoint drivers: the "from" command loop and the "to" handshake
//!   ([`endpoint`])
//!
//! The range-hashing synchronization algorithm itself is a client of this
//! crate; it plugs into the serve loop through [`endpoint::SyncDelegate`].
//!
//! ## Example
//!
//! ```rust,no_run
//! use kitchen_sync::adapter::{ConnectParams, PostgresAdapter};
//! use kitchen_sync::endpoint::{serve, RowServer};
//! use kitchen_sync::protocol::FramedStream;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> kitchen_sync::Result<()> {
//!     let params = ConnectParams {
//!         host: "localhost".into(),
//!         port: 5432,
//!         database: "app".into(),
//!         username: "postgres".into(),
//!         ..Default::default()
//!     };
//!     let mut adapter = PostgresAdapter::connect(&params).await?;
//!     let mut stream = FramedStream::new(tokio::io::stdin(), tokio::io::stdout());
//!     serve(&mut adapter, &mut RowServer::new(), &mut stream).await
//! }
//! ```

pub mod adapter;
pub mod codec;
pub mod endpoint;
pub mod error;
pub mod protocol;
pub mod schema;

// Re-exports for convenient access
pub use adapter::{ConnectParams, DatabaseAdapter, MysqlAdapter, PostgresAdapter, SslMode};
pub use codec::{CodecError, PackedValue};
pub use endpoint::handshake::{prepare_replication, send_quit, HandshakeOptions};
pub use endpoint::{serve, RowServer, SyncDelegate};
pub use error::{Result, SyncError};
pub use protocol::{Command, FramedStream};
pub use schema::{check_schema_match, Database, Table};
