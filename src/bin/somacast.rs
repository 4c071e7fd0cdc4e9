use clap::Parser;
use somacast::{
    development_config, init_logging, production_config, stdio, GossipConfig, LogConfig,
    NodeConfig, TopologyMode,
};
use std::error::Error;
use tracing::info;

#[derive(Debug, Parser)]
#[clap(
    name = "somacast",
    version,
    about = "Broadcast node speaking line-delimited JSON over stdin and stdout."
)]
struct Opts {
    /// Log level for somacast and the base filter; ignored when RUST_LOG is set.
    #[clap(long, env = "SOMACAST_LOG_LEVEL")]
    log_level: Option<String>,

    /// Emit structured JSON logs on stderr (`--log-json=false` for plain text).
    #[clap(
        long,
        env = "SOMACAST_LOG_JSON",
        num_args = 0..=1,
        default_missing_value = "true"
    )]
    log_json: Option<bool>,

    /// Human-readable logs with file, line and thread details.
    #[clap(long)]
    dev_logs: bool,

    /// Upper bound on concurrently running neighbor sends.
    #[clap(long, env = "SOMACAST_MAX_IN_FLIGHT_SENDS", default_value_t = 256)]
    max_in_flight_sends: usize,

    /// How `topology` requests are applied: "provided" or "full-mesh".
    #[clap(long, env = "SOMACAST_TOPOLOGY_MODE", default_value = "provided")]
    topology_mode: TopologyMode,
}

impl Opts {
    /// Preset selected by `--dev-logs`, adjusted by the explicit options only
    fn log_config(&self) -> LogConfig {
        let mut config = if self.dev_logs {
            development_config()
        } else {
            production_config()
        };
        if let Some(level) = &self.log_level {
            config = config.with_level(level.clone());
        }
        if let Some(json) = self.log_json {
            config.json = json;
        }
        config
    }

    fn node_config(&self) -> NodeConfig {
        NodeConfig {
            gossip: GossipConfig {
                max_in_flight_sends: self.max_in_flight_sends,
            },
            topology_mode: self.topology_mode,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let opts = Opts::parse();

    init_logging(&opts.log_config())?;

    let config = opts.node_config();
    config.gossip.validate()?;

    if let Some(stats) = stdio::run(config).await? {
        info!(
            node_id = %stats.node_id,
            known_values = stats.known_values,
            "Node stopped"
        );
    }

    Ok(())
}
