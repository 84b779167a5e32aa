//! Shared plumbing for the endpoint binaries.
//!
//! Each engine gets its own binary (`ks_postgresql`, `ks_mysql`); both parse
//! the same connection arguments and run either side of the protocol over
//! stdio. Logging goes to stderr: stdout carries the wire protocol.

use std::collections::BTreeSet;

use clap::{Parser, ValueEnum};
use kitchen_sync::adapter::{ConnectParams, SslMode};
use kitchen_sync::endpoint::handshake::{self, HandshakeOptions};
use kitchen_sync::endpoint::{serve, RowServer};
use kitchen_sync::protocol::FramedStream;
use kitchen_sync::{DatabaseAdapter, Result};
use tracing::debug;

/// Which side of the replication pair this process plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Role {
    /// Serve schema and rows to the peer.
    From,
    /// Drive the session: handshake, schema match, then quit.
    To,
}

/// Connection and session arguments shared by the endpoint binaries.
#[derive(Debug, Parser)]
pub struct EndpointArgs {
    /// Which end of the replication pair to run
    #[arg(value_enum)]
    pub role: Role,

    /// Database server hostname
    #[arg(long, default_value = "localhost")]
    pub host: String,

    /// Database server port
    #[arg(long)]
    pub port: Option<u16>,

    /// Database name
    #[arg(long)]
    pub database: String,

    /// Username to connect as
    #[arg(long)]
    pub username: String,

    /// Password (empty means none)
    #[arg(long, default_value = "")]
    pub password: String,

    /// Session variables to SET after connecting, e.g. "statement_timeout = 0"
    #[arg(long)]
    pub set_variables: Option<String>,

    /// Transport security: disable, require, verify-ca, verify-full
    #[arg(long, default_value = "require")]
    pub ssl_mode: String,

    /// Tables to skip entirely (repeatable)
    #[arg(long = "ignore-table")]
    pub ignore_tables: Vec<String>,

    /// Restrict the session to these tables (repeatable)
    #[arg(long = "only-table")]
    pub only_tables: Vec<String>,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    pub verbosity: String,
}

impl EndpointArgs {
    /// Connection parameters with the engine's default port filled in.
    pub fn connect_params(&self, default_port: u16) -> Result<ConnectParams> {
        Ok(ConnectParams {
            host: self.host.clone(),
            port: self.port.unwrap_or(default_port),
            database: self.database.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
            set_variables: self.set_variables.clone(),
            ssl_mode: SslMode::from_str(&self.ssl_mode)?,
        })
    }

    pub fn handshake_options(&self) -> HandshakeOptions {
        HandshakeOptions {
            ignore_tables: self.ignore_tables.iter().cloned().collect::<BTreeSet<_>>(),
            only_tables: self.only_tables.iter().cloned().collect::<BTreeSet<_>>(),
        }
    }
}

/// Initialize stderr logging at the requested verbosity.
pub fn init_logging(verbosity: &str) {
    let filter = tracing_subscriber::EnvFilter::try_new(verbosity)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Run the requested endpoint role over stdio with the given adapter.
pub async fn run_endpoint<A: DatabaseAdapter>(adapter: &mut A, args: &EndpointArgs) -> Result<()> {
    let mut stream = FramedStream::new(tokio::io::stdin(), tokio::io::stdout());
    match args.role {
        Role::From => {
            debug!("serving as the source endpoint");
            serve(adapter, &mut RowServer::new(), &mut stream).await
        }
        Role::To => {
            debug!("driving as the destination endpoint");
            let options = args.handshake_options();
            let (version, _from_database) =
                handshake::prepare_replication(adapter, &mut stream, &options).await?;
            debug!(version, "handshake complete");
            handshake::send_quit(&mut stream).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_parse() {
        let args = EndpointArgs::parse_from([
            "ks_postgresql",
            "from",
            "--host",
            "db.example.com",
            "--database",
            "app",
            "--username",
            "sync",
            "--ignore-table",
            "audit_log",
            "--ignore-table",
            "sessions",
        ]);
        assert_eq!(args.role, Role::From);
        assert_eq!(args.host, "db.example.com");
        assert_eq!(args.port, None);
        assert_eq!(args.ignore_tables, vec!["audit_log", "sessions"]);

        let params = args.connect_params(5432).unwrap();
        assert_eq!(params.port, 5432);
        assert_eq!(params.database, "app");
        assert_eq!(params.ssl_mode, SslMode::Require);
    }

    #[test]
    fn test_ssl_mode_argument() {
        let args = EndpointArgs::parse_from([
            "ks_postgresql",
            "from",
            "--database",
            "app",
            "--username",
            "sync",
            "--ssl-mode",
            "disable",
        ]);
        let params = args.connect_params(5432).unwrap();
        assert_eq!(params.ssl_mode, SslMode::Disable);

        let args = EndpointArgs::parse_from([
            "ks_postgresql",
            "from",
            "--database",
            "app",
            "--username",
            "sync",
            "--ssl-mode",
            "sideways",
        ]);
        assert!(args.connect_params(5432).is_err());
    }

    #[test]
    fn test_handshake_options() {
        let args = EndpointArgs::parse_from([
            "ks_mysql",
            "to",
            "--database",
            "app",
            "--username",
            "sync",
            "--only-table",
            "widgets",
        ]);
        let options = args.handshake_options();
        assert!(options.only_tables.contains("widgets"));
        assert!(options.ignore_tables.is_empty());
    }
}
