use log::info;
use structopt::StructOpt;

use std::{net, path, sync::mpsc};

use crate::{Opt, Result, SubCommand};
use postbus::{Broker, Config};

#[derive(Clone, StructOpt)]
pub struct Start {
    #[structopt(long = "name")]
    name: Option<String>,

    #[structopt(long = "bind-ip")]
    bind_ip: Option<net::IpAddr>,

    #[structopt(long = "host")]
    host: Option<net::IpAddr>,

    #[structopt(long = "client-port")]
    client_port: Option<u16>,

    #[structopt(long = "broker-port")]
    broker_port: Option<u16>,

    /// Broker-facing address of the leader, to join an existing network.
    #[structopt(long = "leader")]
    leader: Option<net::SocketAddr>,

    #[structopt(long = "topics-dir")]
    topics_dir: Option<path::PathBuf>,
}

pub fn run(opts: Opt) -> Result<()> {
    let (tx, rx) = mpsc::sync_channel(2);
    let ctrlc_tx = tx.clone();
    ctrlc::set_handler(move || {
        ctrlc_tx.send("ctrlc".to_string()).ok();
    })
    .map_err(|e| e.to_string())?;

    let config = parse_config(&opts)?;
    let broker = {
        let broker = Broker::from_config(config).map_err(|e| e.to_string())?;
        broker.spawn().map_err(|e| e.to_string())?
    };
    if let Some(addr) = broker.client_address() {
        println!("{} listening for clients on {}", broker.name, addr);
    }

    let reason = rx.recv().map_err(|e| e.to_string())?;
    info!("{} shutting down on {}", broker.name, reason);

    broker.close_wait().map_err(|e| e.to_string())?;

    Ok(())
}

fn parse_config(opts: &Opt) -> Result<Config> {
    // Configuration parameters take preference in the following order of
    // decreasing preference:
    // a. Command line options.
    // b. Toml configuration file.
    // c. System defaults.
    let config = match &opts.config_loc {
        Some(path) => {
            info!("config_location {:?}", path.to_str());
            Config::from_file(path).map_err(|e| e.to_string())?
        }
        None => {
            info!("Using default configuration for postbus broker");
            Config::default()
        }
    };

    parse_cmd_opts(opts, config)
}

fn parse_cmd_opts(opts: &Opt, mut config: Config) -> Result<Config> {
    let start = match &opts.subcmd {
        SubCommand::Start(start) => start.clone(),
        _ => unreachable!(),
    };

    if let Some(name) = start.name {
        config.name = name;
    }
    if let Some(bind_ip) = start.bind_ip {
        config.bind_ip = bind_ip;
    }
    if let Some(host) = start.host {
        config.host = host;
    }
    if let Some(port) = start.client_port {
        config.client_port = port;
    }
    if let Some(port) = start.broker_port {
        config.broker_port = port;
    }
    if start.leader.is_some() {
        config.leader = start.leader;
    }
    if start.topics_dir.is_some() {
        config.topics_dir = start.topics_dir;
    }

    config.validate().map_err(|e| e.to_string())?;
    Ok(config)
}
