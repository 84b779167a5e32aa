//! Wire protocol: version constants, command names, and the framed stream.
//!
//! Each message is a single packed array whose first element is the command
//! name and whose remaining elements are that command's arguments. Responses
//! are packed arrays of result values; an acknowledgement with no result is
//! the empty array. Commands are strictly request/response with no
//! pipelining: the peer fully consumes one response before issuing the next
//! request.

mod stream;

pub use stream::{Command, FramedStream};

/// Oldest protocol version this endpoint can speak.
pub const EARLIEST_PROTOCOL_VERSION: u32 = 7;

/// Newest protocol version this endpoint can speak.
pub const LATEST_PROTOCOL_VERSION: u32 = 9;

/// Last version in which table filters were sent after snapshot export.
pub const LAST_FILTERS_AFTER_SNAPSHOT_VERSION: u32 = 7;

/// Last version using the legacy positional schema serialization.
pub const LAST_LEGACY_SCHEMA_FORMAT_VERSION: u32 = 7;

/// First version in which the `idle` keepalive command exists.
pub const FIRST_IDLE_COMMAND_VERSION: u32 = 8;

/// First version in which row hashing uses BLAKE3 instead of xxHash64.
pub const FIRST_BLAKE3_VERSION: u32 = 9;

/// Stable command names.
pub mod commands {
    pub const PROTOCOL: &str = "protocol";
    pub const SCHEMA: &str = "schema";
    pub const QUIT: &str = "quit";

    pub const EXPORT_SNAPSHOT: &str = "export_snapshot";
    pub const IMPORT_SNAPSHOT: &str = "import_snapshot";
    pub const UNHOLD_SNAPSHOT: &str = "unhold_snapshot";
    pub const WITHOUT_SNAPSHOT: &str = "without_snapshot";
    pub const FILTERS: &str = "filters";

    pub const RANGE: &str = "range";
    pub const HASH: &str = "hash";
    pub const ROWS: &str = "rows";
    pub const IDLE: &str = "idle";

    pub const TARGET_BLOCK_SIZE: &str = "target_block_size";
    pub const TARGET_MINIMUM_BLOCK_SIZE: &str = "target_minimum_block_size";
}
