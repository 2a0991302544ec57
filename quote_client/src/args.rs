//! Command-line arguments for the quote client.
//!
//! This module defines the CLI interface using `clap`. See `main` for end-to-end usage.
use clap::{Parser, Subcommand};
use quote_common::net::{COMMAND_PORT, DATA_PORT};

/// Parsed command-line arguments.
#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Server IP address (IPv4 or IPv6) where the quote service is running.
    #[clap(long, default_value = "127.0.0.1")]
    pub server_ip: String,

    /// TCP port of the server's control API.
    #[clap(long, default_value_t = COMMAND_PORT)]
    pub command_port: u16,

    /// UDP port the server streams from and receives pings on.
    #[clap(long, default_value_t = DATA_PORT)]
    pub data_port: u16,

    /// Operation to perform.
    #[command(subcommand)]
    pub command: ClientCommand,
}

/// Operations understood by the server.
#[derive(Debug, Subcommand)]
pub enum ClientCommand {
    /// Add instruments to the subscription set.
    Subscribe(Instruments),
    /// Remove instruments from the subscription set.
    Unsubscribe(Instruments),
    /// Print the subscribed instruments.
    List,
    /// Print the server's source mode and readiness.
    Health,
    /// Print cached last quotes.
    Quotes {
        /// Restrict the output to these instruments.
        instruments: Vec<String>,
    },
    /// Open a push session and print every event until Ctrl+C.
    Stream {
        /// Local UDP port to bind for receiving events and sending pings.
        #[clap(long)]
        listen_port: String,

        /// Instruments to subscribe before streaming.
        #[clap(flatten)]
        instruments: Instruments,
    },
}

/// Instrument ids given inline or through a file.
#[derive(Debug, clap::Args)]
pub struct Instruments {
    /// Instrument ids, e.g. `rb2501 cu2501`.
    pub ids: Vec<String>,

    /// Path to a text file with instrument ids.
    /// Ids may be separated by commas, spaces, or new lines.
    #[clap(long)]
    pub path: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_accepts_inline_ids() {
        let args = Args::try_parse_from([
            "quote_client",
            "stream",
            "--listen-port",
            "55555",
            "rb2501",
            "cu2501",
        ])
        .unwrap();
        assert_eq!(args.server_ip, "127.0.0.1");
        match args.command {
            ClientCommand::Stream {
                listen_port,
                instruments,
            } => {
                assert_eq!(listen_port, "55555");
                assert_eq!(instruments.ids, vec!["rb2501", "cu2501"]);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn quotes_filter_is_optional() {
        let args = Args::try_parse_from(["quote_client", "quotes"]).unwrap();
        assert!(matches!(args.command, ClientCommand::Quotes { instruments } if instruments.is_empty()));
    }
}
