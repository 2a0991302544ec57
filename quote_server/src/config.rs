//! Command-line and environment configuration for the server.
//!
//! Every option can be given as a flag or through the environment variable named
//! next to it, so a deployment can be driven entirely from a `.env`-style file.

use std::net::SocketAddr;
use std::time::Duration;

use clap::{ArgAction, Parser};
use log::{error, info};
use quote_common::net::{COMMAND_PORT, DATA_PORT};
use quote_common::{QuoteError, Result, SourceMode};

use crate::engine::EngineConfig;
use crate::sessions::SessionConfig;
use crate::source::gateway::Credentials;
use crate::source::synthetic::{Perturbation, PerturbationKind, PriceSeed};
use crate::source::{LiveConfig, SyntheticConfig};

/// Simulation (test) front of the gateway.
pub const SIM_FRONT: &str = "tcp://180.168.146.187:10131";
/// Production front of the gateway.
pub const PROD_FRONT: &str = "tcp://180.168.146.187:10110";
/// Broker code used when none is configured.
pub const DEFAULT_BROKER_ID: &str = "9999";

/// Server options.
#[derive(Parser, Debug, Clone)]
#[command(name = "quote_server", version, about = "Subscription-driven quote distribution server")]
pub struct ServerArgs {
    /// Address to bind both listeners to.
    #[arg(long, env = "QUOTE_BIND_IP", default_value = "0.0.0.0")]
    pub bind_ip: String,

    /// TCP port of the control API.
    #[arg(long, env = "QUOTE_COMMAND_PORT", default_value_t = COMMAND_PORT)]
    pub command_port: u16,

    /// UDP port for push streams and keep-alive pings.
    #[arg(long, env = "QUOTE_DATA_PORT", default_value_t = DATA_PORT)]
    pub data_port: u16,

    /// Preferred quote source.
    #[arg(long, env = "QUOTE_SOURCE", value_enum, default_value_t = SourceMode::Live)]
    pub source: SourceMode,

    /// Use the simulated gateway front without credentials.
    #[arg(long, env = "CTP_USE_MOCK", action = ArgAction::Set, default_value_t = false)]
    pub ctp_use_mock: bool,

    /// Gateway account id.
    #[arg(long, env = "CTP_USER_ID", default_value = "")]
    pub ctp_user_id: String,

    /// Gateway account password.
    #[arg(long, env = "CTP_PASSWORD", default_value = "", hide_env_values = true)]
    pub ctp_password: String,

    /// Gateway broker code.
    #[arg(long, env = "CTP_BROKER_ID", default_value = DEFAULT_BROKER_ID)]
    pub ctp_broker_id: String,

    /// Use the simulation front rather than production.
    #[arg(long, env = "CTP_IS_SIM", action = ArgAction::Set, default_value_t = true)]
    pub ctp_is_sim: bool,

    /// Explicit gateway front; overrides `--ctp-is-sim`.
    #[arg(long, env = "CTP_FRONT_ADDRESS")]
    pub ctp_front_address: Option<String>,

    /// Seconds to wait for the gateway to become ready at startup.
    #[arg(long, env = "CTP_READY_TIMEOUT_SECS", default_value_t = 10)]
    pub ctp_ready_timeout_secs: u64,

    /// Synthetic tick period while something is subscribed, in milliseconds.
    #[arg(long, env = "QUOTE_TICK_MS", default_value_t = 400)]
    pub tick_ms: u64,

    /// Synthetic tick period while nothing is subscribed, in milliseconds.
    #[arg(long, env = "QUOTE_IDLE_TICK_MS", default_value_t = 900)]
    pub idle_tick_ms: u64,

    /// Synthetic per-tick move policy.
    #[arg(long, env = "QUOTE_PERTURBATION", value_enum, default_value_t = PerturbationKind::Absolute)]
    pub perturbation: PerturbationKind,

    /// Size of the move: price units for `absolute`, percent for `relative`.
    #[arg(long, env = "QUOTE_PERTURBATION_SIZE")]
    pub perturbation_size: Option<f64>,

    /// Seed first prices from the well-known contract table instead of a uniform draw.
    #[arg(long, env = "QUOTE_SEED_TABLE", action = ArgAction::Set, default_value_t = false)]
    pub seed_table: bool,

    /// Events a push session may have queued before it is dropped.
    #[arg(long, env = "QUOTE_SESSION_QUEUE", default_value_t = 256)]
    pub session_queue: usize,

    /// Seconds without a ping after which a push session is closed.
    #[arg(long, env = "QUOTE_KEEPALIVE_SECS", default_value_t = 5)]
    pub keepalive_secs: u64,

    /// Seconds a control connection may take to send its request.
    #[arg(long, env = "QUOTE_READ_TIMEOUT_SECS", default_value_t = 5)]
    pub read_timeout_secs: u64,
}

impl ServerArgs {
    /// Control API bind address.
    pub fn command_addr(&self) -> Result<SocketAddr> {
        parse_addr(&self.bind_ip, self.command_port)
    }

    /// Push stream bind address.
    pub fn data_addr(&self) -> Result<SocketAddr> {
        parse_addr(&self.bind_ip, self.data_port)
    }

    /// Ping silence after which a stream is closed.
    pub fn keepalive(&self) -> Duration {
        Duration::from_secs(self.keepalive_secs)
    }

    /// Control connection read timeout.
    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    /// Gateway front to connect to.
    pub fn front_address(&self) -> String {
        match &self.ctp_front_address {
            Some(front) if !front.trim().is_empty() => front.trim().to_string(),
            _ if self.ctp_is_sim => SIM_FRONT.to_string(),
            _ => PROD_FRONT.to_string(),
        }
    }

    /// Validate and build the live source settings.
    ///
    /// Mock mode needs no credentials; otherwise both user id and password are
    /// required.
    pub fn live_config(&self) -> Result<LiveConfig> {
        let credentials = if self.ctp_use_mock {
            info!("Using mock gateway mode");
            Credentials {
                broker_id: self.ctp_broker_id.clone(),
                user_id: non_blank(&self.ctp_user_id).unwrap_or("mock").to_string(),
                password: non_blank(&self.ctp_password).unwrap_or("mock").to_string(),
            }
        } else {
            let user_id = non_blank(&self.ctp_user_id)
                .ok_or_else(|| QuoteError::Config("CTP_USER_ID is required".to_string()))?;
            let password = non_blank(&self.ctp_password)
                .ok_or_else(|| QuoteError::Config("CTP_PASSWORD is required".to_string()))?;
            Credentials {
                broker_id: self.ctp_broker_id.clone(),
                user_id: user_id.to_string(),
                password: password.to_string(),
            }
        };

        Ok(LiveConfig {
            front_address: self.front_address(),
            credentials,
            ready_timeout: Duration::from_secs(self.ctp_ready_timeout_secs),
            stop_grace: Duration::from_secs(1),
        })
    }

    /// Synthetic generator settings.
    pub fn synthetic_config(&self) -> Result<SyntheticConfig> {
        if self.tick_ms == 0 || self.idle_tick_ms == 0 {
            return Err(QuoteError::Config(
                "tick periods must be positive".to_string(),
            ));
        }
        if let Some(size) = self.perturbation_size {
            if !size.is_finite() {
                return Err(QuoteError::Config(format!(
                    "invalid perturbation size {}",
                    size
                )));
            }
        }

        let seed = if self.seed_table {
            PriceSeed::Table
        } else {
            SyntheticConfig::default().seed
        };
        Ok(SyntheticConfig {
            seed,
            perturbation: Perturbation::new(self.perturbation, self.perturbation_size),
            active_interval: Duration::from_millis(self.tick_ms),
            idle_interval: Duration::from_millis(self.idle_tick_ms),
            ..SyntheticConfig::default()
        })
    }

    /// Session manager settings.
    pub fn session_config(&self) -> Result<SessionConfig> {
        if self.session_queue == 0 {
            return Err(QuoteError::Config(
                "session queue capacity must be positive".to_string(),
            ));
        }
        Ok(SessionConfig {
            queue_capacity: self.session_queue,
        })
    }

    /// Full engine settings.
    ///
    /// An invalid live configuration is not fatal: it is logged and the live source is
    /// left unconfigured, so the engine starts on the synthetic source.
    pub fn engine_config(&self) -> Result<EngineConfig> {
        let live = match self.source {
            SourceMode::Synthetic => None,
            SourceMode::Live => match self.live_config() {
                Ok(live) => Some(live),
                Err(e) => {
                    error!("Live source configuration rejected: {}", e);
                    None
                }
            },
        };
        Ok(EngineConfig {
            preferred: self.source,
            live,
            synthetic: self.synthetic_config()?,
            sessions: self.session_config()?,
        })
    }
}

fn non_blank(value: &str) -> Option<&str> {
    let value = value.trim();
    (!value.is_empty()).then_some(value)
}

fn parse_addr(ip: &str, port: u16) -> Result<SocketAddr> {
    quote_common::net::addr(ip.trim(), port)
        .parse()
        .map_err(|e| QuoteError::Config(format!("invalid bind address {}: {}", ip, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    use clap::{CommandFactory, FromArgMatches};

    /// Parse `extra` with every environment fallback switched off.
    fn args(extra: &[&str]) -> ServerArgs {
        let mut argv = vec!["quote_server"];
        argv.extend_from_slice(extra);
        let matches = ServerArgs::command()
            .mut_args(|arg| arg.env(None::<&'static str>))
            .try_get_matches_from(argv)
            .unwrap();
        ServerArgs::from_arg_matches(&matches).unwrap()
    }

    #[test]
    fn live_requires_credentials_unless_mock() {
        let missing = args(&["--ctp-user-id", "u1"]);
        assert!(matches!(missing.live_config(), Err(QuoteError::Config(_))));

        let mock = args(&["--ctp-use-mock", "true"]);
        assert_eq!(mock.live_config().unwrap().credentials.user_id, "mock");

        let full = args(&["--ctp-user-id", "u1", "--ctp-password", "p1"]);
        let live = full.live_config().unwrap();
        assert_eq!(live.front_address, SIM_FRONT);
        assert_eq!(live.credentials.broker_id, DEFAULT_BROKER_ID);
    }

    #[test]
    fn rejected_live_config_leaves_live_unset() {
        let config = args(&["--source", "live"]).engine_config().unwrap();
        assert_eq!(config.preferred, SourceMode::Live);
        assert!(config.live.is_none());
    }

    #[test]
    fn environment_is_ignored_by_test_parser() {
        let cmd = ServerArgs::command().mut_args(|arg| arg.env(None::<&'static str>));
        assert!(cmd.get_arguments().all(|arg| arg.get_env().is_none()));
        assert!(
            ServerArgs::command()
                .get_arguments()
                .any(|arg| arg.get_env().is_some_and(|name| name == "CTP_PASSWORD"))
        );
    }

    #[test]
    fn front_selection() {
        assert_eq!(args(&["--ctp-is-sim", "false"]).front_address(), PROD_FRONT);
        assert_eq!(
            args(&["--ctp-front-address", " tcp://127.0.0.1:1 "]).front_address(),
            "tcp://127.0.0.1:1"
        );
    }

    #[test]
    fn synthetic_switches() {
        let config = args(&[
            "--perturbation",
            "relative",
            "--seed-table",
            "true",
            "--tick-ms",
            "100",
        ])
        .synthetic_config()
        .unwrap();
        assert_eq!(config.perturbation, Perturbation::Relative(2.0));
        assert_eq!(config.seed, PriceSeed::Table);
        assert_eq!(config.active_interval, Duration::from_millis(100));

        assert!(args(&["--tick-ms", "0"]).synthetic_config().is_err());
        assert!(args(&["--session-queue", "0"]).session_config().is_err());
    }

    #[test]
    fn bind_addresses() {
        let parsed = args(&["--bind-ip", "127.0.0.1", "--command-port", "9000"]);
        assert_eq!(parsed.command_addr().unwrap().port(), 9000);
        assert!(args(&["--bind-ip", "nowhere"]).data_addr().is_err());
    }
}
