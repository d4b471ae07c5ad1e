//! Command-Line Interface (CLI) argument parsing.
//!
//! This module defines the command-line arguments for the application using the
//! `clap` crate. These arguments are parsed at startup and then merged with
//! the configuration from the `ips-relay.toml` file and environment variables.

use clap::{Parser, Subcommand};
use figment::{
    value::{Dict, Map, Value},
    Error, Metadata, Profile, Provider,
};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Enriches intrusion-detection alerts with ownership and geolocation data
/// and relays them to a JSON log file and syslog collectors.
#[derive(Parser, Debug, Clone, Default)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    /// Logging level (overridden by RUST_LOG).
    #[arg(long, value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Address the webhook listener binds to.
    #[arg(long, value_name = "ADDR")]
    pub listen: Option<SocketAddr>,

    /// File that receives the enriched alerts.
    #[arg(long, value_name = "FILE")]
    pub store_path: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Run the alert relay (the default).
    Serve,
    /// Run the fallback IP lookup server.
    LookupServer {
        /// CSV file with `start_ip,end_ip,asn,as_name,as_domain` rows.
        #[arg(long, value_name = "FILE")]
        data: Option<PathBuf>,

        /// Address the lookup server binds to.
        #[arg(long, value_name = "ADDR")]
        listen: Option<SocketAddr>,
    },
    /// Resolve the lookup server's missing IPs through whois and add the
    /// results to the registry.
    Backfill {
        /// JSON list of unresolved addresses.
        #[arg(long, value_name = "FILE")]
        missing: Option<PathBuf>,

        /// Ledger of addresses already handled.
        #[arg(long, value_name = "FILE")]
        ledger: Option<PathBuf>,
    },
}

impl Provider for Cli {
    fn metadata(&self) -> Metadata {
        Metadata::named("Command-Line Arguments")
    }

    fn data(&self) -> Result<Map<Profile, Dict>, Error> {
        let mut dict = Dict::new();

        if let Some(level) = &self.log_level {
            dict.insert("log_level".into(), Value::from(level.clone()));
        }

        let mut server = Dict::new();
        if let Some(listen) = self.listen {
            server.insert("listen_address".into(), Value::from(listen.to_string()));
        }
        if !server.is_empty() {
            dict.insert("server".into(), Value::from(server));
        }

        if let Some(path) = &self.store_path {
            let mut store = Dict::new();
            store.insert(
                "path".into(),
                Value::from(path.to_string_lossy().into_owned()),
            );
            dict.insert("store".into(), Value::from(store));
        }

        let mut lookup = Dict::new();
        let mut backfill = Dict::new();
        match &self.command {
            Some(Command::LookupServer { data, listen }) => {
                if let Some(data) = data {
                    lookup.insert(
                        "data_path".into(),
                        Value::from(data.to_string_lossy().into_owned()),
                    );
                }
                if let Some(listen) = listen {
                    lookup.insert("listen_address".into(), Value::from(listen.to_string()));
                }
            }
            Some(Command::Backfill { missing, ledger }) => {
                if let Some(missing) = missing {
                    lookup.insert(
                        "missing_ips_path".into(),
                        Value::from(missing.to_string_lossy().into_owned()),
                    );
                }
                if let Some(ledger) = ledger {
                    backfill.insert(
                        "processed_ips_path".into(),
                        Value::from(ledger.to_string_lossy().into_owned()),
                    );
                }
            }
            Some(Command::Serve) | None => {}
        }
        if !lookup.is_empty() {
            dict.insert("lookup_server".into(), Value::from(lookup));
        }
        if !backfill.is_empty() {
            dict.insert("backfill".into(), Value::from(backfill));
        }

        let mut map = Map::new();
        map.insert(Profile::Default, dict);
        Ok(map)
    }
}
