// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Layered configuration of the `sim-fabric` application.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use clap::Parser;
use fabric_engine::sim_error;
use fabric_engine::types::SimError;
use fabric_models::mesh::MeshConfig;
use fabric_models::router_node::RouterNodeConfig;
use fabric_router::channel::ChannelConfig;
use fabric_router::types::HEADER_WORDS;
use fabric_track::TraceState;
use fabric_track::tracker::EntityManager;
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};

/// Configuration file read from the working directory when present.
pub const CONF_FILE: &str = "sim-fabric.toml";

/// Prefix of the environment variables that set configuration values.
pub const ENV_PREFIX: &str = "FABRIC_";

/// Bytes of memory in every node.
const NODE_BYTES: u32 = 0x40_0000;

/// Take a required value, failing if no source set it.
macro_rules! required {
    ($config:ident . $field:ident) => {
        match $config.$field.clone() {
            Some(value) => value,
            None => return sim_error!(format!("{} is not set", stringify!($field))),
        }
    };
}

/// Settings of a simulation run.
///
/// Every field is optional so that sources which leave a value unset do not
/// override the ones below them.
#[derive(Clone, Debug, PartialEq, Eq, Parser, Serialize, Deserialize)]
#[command(about = "Fabric router mesh simulation")]
pub struct SimConfig {
    /// Level of log message to display.
    #[arg(long)]
    pub log_level: Option<String>,

    /// Entities matching this regular expression log at `--log-level`. Others
    /// only log errors.
    #[arg(long)]
    pub log_filter_regex: Option<String>,

    /// Entities matching this regular expression emit trace events as
    /// packets enter and leave them.
    #[arg(long)]
    pub trace_filter_regex: Option<String>,

    /// File to write log messages to. Use '-' for stdout.
    #[arg(short = 'l', long)]
    pub log_file: Option<String>,

    /// Number of columns of nodes in the mesh.
    #[arg(long)]
    pub columns: Option<u16>,

    /// Number of rows of nodes in the mesh.
    #[arg(long)]
    pub rows: Option<u16>,

    /// Words in each data channel buffer.
    #[arg(long)]
    pub buffer_words: Option<u32>,

    /// Most words a channel forwards over a link at once.
    #[arg(long)]
    pub max_burst_words: Option<u32>,

    /// Words pulled before the write pointer is synchronised.
    #[arg(long)]
    pub sync_threshold_words: Option<u32>,

    /// Write pointer snapshots held by each consumer.
    #[arg(long)]
    pub sync_buffer_entries: Option<u32>,

    /// Slots in each pull request queue. Must be a power of two.
    #[arg(long)]
    pub queue_slots: Option<u32>,

    /// Slots in each control channel.
    #[arg(long)]
    pub control_slots: Option<u32>,

    /// Cycles to wait for a neighbour to answer the link handshake. Use 0 to
    /// wait forever.
    #[arg(long)]
    pub handshake_timeout_cycles: Option<u64>,

    /// Words in the buffer of each client.
    #[arg(long)]
    pub client_buffer_words: Option<u32>,

    /// Payload bytes of every packet sent.
    #[arg(long)]
    pub packet_bytes: Option<u32>,

    /// KiB each client sends.
    #[arg(long)]
    pub kib_to_send: Option<u32>,

    /// Seed for the random destinations and payloads.
    #[arg(long)]
    pub seed: Option<u64>,

    /// Path to additional configuration file
    ///
    /// This additional configuration file must contain TOML, and set values
    /// for fields of this struct.
    #[arg(long)]
    pub conf_file: Option<PathBuf>,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            log_level: Some("info".to_string()),
            log_filter_regex: Some(String::new()),
            trace_filter_regex: Some(String::new()),
            log_file: Some("-".to_string()),
            columns: Some(3),
            rows: Some(2),
            buffer_words: Some(1024),
            max_burst_words: Some(256),
            sync_threshold_words: Some(64),
            sync_buffer_entries: Some(4),
            queue_slots: Some(16),
            control_slots: Some(8),
            handshake_timeout_cycles: Some(1000),
            client_buffer_words: Some(256),
            packet_bytes: Some(1024),
            kib_to_send: Some(16),
            seed: Some(1),
            conf_file: Some(PathBuf::new()),
        }
    }
}

impl SimConfig {
    /// Merge every configuration source, taking the command line from the
    /// process arguments.
    pub fn parse_all_sources() -> Result<Self, SimError> {
        Self::with_command_line(Self::parse())
    }

    /// Merge every configuration source below the command line `cli`.
    pub fn with_command_line(cli: Self) -> Result<Self, SimError> {
        let mut config = Self::extract(Self::figment())?;

        let mut conf_file = config.conf_file.clone();
        if cli.conf_file.is_some() {
            conf_file = cli.conf_file.clone();
        }
        if let Some(conf_file) = conf_file {
            if !conf_file.as_os_str().is_empty() {
                check_conf_file(&conf_file)?;
                let figment = Self::figment_files().merge(Toml::file(&conf_file));
                config = Self::extract(figment.merge(Env::prefixed(ENV_PREFIX)))?;
            }
        }

        config.merge(cli);
        Ok(config)
    }

    fn figment_files() -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(CONF_FILE))
    }

    fn figment() -> Figment {
        Self::figment_files().merge(Env::prefixed(ENV_PREFIX))
    }

    fn extract(figment: Figment) -> Result<Self, SimError> {
        figment.extract().map_err(|e| SimError(e.to_string()))
    }

    /// Overwrite every value that `other` sets.
    pub fn merge(&mut self, other: Self) {
        macro_rules! merge_fields {
            ($($field:ident),* $(,)?) => {
                $(
                    if other.$field.is_some() {
                        self.$field = other.$field;
                    }
                )*
            };
        }
        merge_fields!(
            log_level,
            log_filter_regex,
            trace_filter_regex,
            log_file,
            columns,
            rows,
            buffer_words,
            max_burst_words,
            sync_threshold_words,
            sync_buffer_entries,
            queue_slots,
            control_slots,
            handshake_timeout_cycles,
            client_buffer_words,
            packet_bytes,
            kib_to_send,
            seed,
            conf_file,
        );
    }

    pub fn log_level(&self) -> Result<log::Level, SimError> {
        let level = required!(self.log_level);
        log::Level::from_str(&level).map_err(|_| SimError(format!("invalid log level '{level}'")))
    }

    pub fn log_filter_regex(&self) -> String {
        self.log_filter_regex.clone().unwrap_or_default()
    }

    pub fn trace_filter_regex(&self) -> String {
        self.trace_filter_regex.clone().unwrap_or_default()
    }

    pub fn log_file(&self) -> String {
        self.log_file.clone().unwrap_or_else(|| "-".to_string())
    }

    /// Decide which entities log and trace.
    ///
    /// With a log filter only matching entities log at the configured level
    /// and all others only log errors. Trace is off except for entities
    /// matching the trace filter.
    pub fn entity_manager(&self) -> Result<EntityManager, SimError> {
        let level = self.log_level()?;
        let log_filter = self.log_filter_regex();
        let trace_filter = self.trace_filter_regex();

        let default_level = if log_filter.is_empty() {
            level
        } else {
            log::Level::Error
        };
        let mut entity_manager = EntityManager::new(TraceState::Disabled, default_level);
        if !log_filter.is_empty() {
            entity_manager.add_log_filter(&log_filter, level);
        }
        if !trace_filter.is_empty() {
            entity_manager.add_trace_filter(&trace_filter, TraceState::Enabled);
        }
        Ok(entity_manager)
    }

    /// Build the mesh configuration, rejecting values the channels cannot
    /// work with.
    pub fn mesh_config(&self) -> Result<MeshConfig, SimError> {
        let columns = required!(self.columns);
        let rows = required!(self.rows);
        let buffer_words = required!(self.buffer_words);
        let max_burst_words = required!(self.max_burst_words);
        let sync_threshold_words = required!(self.sync_threshold_words);
        let sync_buffer_entries = required!(self.sync_buffer_entries);
        let queue_slots = required!(self.queue_slots);
        let control_slots = required!(self.control_slots);
        let handshake_timeout_cycles = required!(self.handshake_timeout_cycles);

        if columns == 0 || rows == 0 {
            return sim_error!(format!("mesh of {columns}x{rows} has no nodes"));
        }
        if !queue_slots.is_power_of_two() {
            return sim_error!(format!("queue_slots must be a power of two, not {queue_slots}"));
        }
        for (name, value) in [
            ("buffer_words", buffer_words),
            ("max_burst_words", max_burst_words),
            ("sync_threshold_words", sync_threshold_words),
            ("sync_buffer_entries", sync_buffer_entries),
            ("control_slots", control_slots),
        ] {
            if value == 0 {
                return sim_error!(format!("{name} must not be zero"));
            }
        }

        let channel = ChannelConfig::new(
            buffer_words,
            max_burst_words,
            sync_threshold_words,
            sync_buffer_entries,
            queue_slots,
        );
        let timeout = (handshake_timeout_cycles != 0).then_some(handshake_timeout_cycles);
        let router = RouterNodeConfig::new(channel, control_slots, timeout, true);
        Ok(MeshConfig::new(columns, rows, 0, router, NODE_BYTES))
    }

    /// The traffic each client sends.
    pub fn traffic_config(&self) -> Result<TrafficConfig, SimError> {
        let packet_bytes = required!(self.packet_bytes);
        let client_buffer_words = required!(self.client_buffer_words);
        if packet_bytes == 0 {
            return sim_error!("packet_bytes must not be zero");
        }
        if client_buffer_words <= HEADER_WORDS {
            return sim_error!(format!(
                "client_buffer_words of {client_buffer_words} cannot hold a header"
            ));
        }
        let kib_to_send = required!(self.kib_to_send);
        let num_packets = (u64::from(kib_to_send) * 1024).div_ceil(u64::from(packet_bytes));
        Ok(TrafficConfig {
            packet_bytes,
            packets_per_client: num_packets.max(1),
            client_buffer_words,
            seed: required!(self.seed),
        })
    }
}

/// What every client of a run sends.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrafficConfig {
    pub packet_bytes: u32,
    pub packets_per_client: u64,
    pub client_buffer_words: u32,
    pub seed: u64,
}

fn check_conf_file(conf_file: &Path) -> Result<(), SimError> {
    if conf_file.is_dir() {
        return sim_error!(format!("{} is not a file path", conf_file.display()));
    }
    if !conf_file.exists() {
        return sim_error!(format!("{} not found", conf_file.display()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_keeps_unset_values() {
        let mut config = SimConfig::default();
        let other = SimConfig::parse_from(["sim-fabric", "--rows", "7"]);
        config.merge(other);
        assert_eq!(config.rows, Some(7));
        assert_eq!(config.columns, SimConfig::default().columns);
    }

    #[test]
    fn default_configs_are_valid() {
        let config = SimConfig::default();
        let mesh = config.mesh_config().unwrap();
        assert_eq!(mesh.num_devices(), 6);

        let traffic = config.traffic_config().unwrap();
        assert_eq!(traffic.packets_per_client, 16);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let mut config = SimConfig::default();
        config.queue_slots = Some(12);
        assert!(config.mesh_config().is_err());

        let mut config = SimConfig::default();
        config.columns = None;
        assert_eq!(
            config.mesh_config().err(),
            Some(SimError("columns is not set".to_string()))
        );

        let mut config = SimConfig::default();
        config.log_level = Some("loud".to_string());
        assert!(config.log_level().is_err());
    }
}
