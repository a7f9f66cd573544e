use std::collections::HashMap;
use std::net::IpAddr;

use clap::Parser;

/// Seaway bridge server configuration
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// HTTP/WebSocket listen address
    #[arg(long, default_value = "0.0.0.0:8080", value_name = "ADDR")]
    pub listen: String,

    /// IANA timezone used for all schedules and timestamps
    #[arg(long, default_value = "America/Toronto", value_name = "ZONE")]
    pub timezone: String,

    /// Path of the snapshot file
    #[arg(long, default_value = "data/bridges.json", value_name = "FILE")]
    pub snapshot_path: String,

    /// Directory holding per-bridge history files
    #[arg(long, default_value = "data/history", value_name = "DIR")]
    pub history_dir: String,

    /// UDP port for inbound AIS NMEA sentences
    #[arg(long, default_value_t = 10110, value_name = "PORT")]
    pub ais_udp_port: u16,

    /// Enable the AIS UDP listener
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub ais_udp_enabled: bool,

    /// Map dispatcher IPs to station ids, e.g. "10.0.0.5=sct,10.0.0.9=mtl".
    /// Unmapped senders get synthetic udpN ids.
    #[arg(long, default_value = "", value_name = "IP=ID,...")]
    pub ais_udp_station_map: String,

    /// AISHub API key; the HTTP poller is disabled when unset
    #[arg(long, env = "AISHUB_API_KEY")]
    pub aishub_api_key: Option<String>,

    /// AISHub endpoint URL
    #[arg(long, env = "AISHUB_URL", default_value = "https://data.aishub.net/ws.php")]
    pub aishub_url: String,

    /// Base URL of the old-shape bridge status endpoint (region key is appended)
    #[arg(
        long,
        default_value = "https://seaway-greatlakes.com/bridgestatus/detailsnai?key=",
        value_name = "URL"
    )]
    pub old_endpoint: String,

    /// Base URL of the new-shape bridge status endpoint (region key is appended)
    #[arg(
        long,
        default_value = "https://seaway-greatlakes.com/bridgestatus/detailsmai2?key=",
        value_name = "URL"
    )]
    pub new_endpoint: String,

    /// Host for which TLS certificate verification is disabled.
    /// Workaround for one upstream's broken certificate chain; never a default.
    #[arg(long, value_name = "HOST")]
    pub insecure_host: Option<String>,

    /// Per-IP request budget per minute for data endpoints
    #[arg(long, default_value_t = 60)]
    pub rate_limit_data: u32,

    /// Per-IP request budget per minute for the static status page
    #[arg(long, default_value_t = 30)]
    pub rate_limit_static: u32,

    /// Cache-Control max-age for data responses, seconds
    #[arg(long, default_value_t = 10)]
    pub cache_max_age: u32,

    /// Verbose logging (DEBUG level)
    #[arg(long, short, default_value_t = false)]
    pub verbose: bool,
}

impl Config {
    /// Parse the `ip=station` pairs of `--ais-udp-station-map`.
    /// Malformed pairs are skipped; the listener assigns synthetic ids instead.
    pub fn station_map(&self) -> HashMap<IpAddr, String> {
        let mut map = HashMap::new();
        for pair in self.ais_udp_station_map.split(',') {
            let pair = pair.trim();
            if pair.is_empty() {
                continue;
            }
            if let Some((ip, station)) = pair.split_once('=') {
                if let Ok(addr) = ip.trim().parse::<IpAddr>() {
                    map.insert(addr, station.trim().to_string());
                }
            }
        }
        map
    }
}
