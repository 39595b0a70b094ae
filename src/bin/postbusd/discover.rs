use structopt::StructOpt;

use std::net;

use crate::{Opt, Result, SubCommand};
use postbus::{Client, TopicName};

#[derive(Clone, StructOpt)]
pub struct Discover {
    /// Client-facing address of any broker in the network.
    #[structopt(long = "broker")]
    broker: net::SocketAddr,

    topic: String,
}

pub fn run(opts: Opt) -> Result<()> {
    let discover = match &opts.subcmd {
        SubCommand::Discover(discover) => discover.clone(),
        _ => unreachable!(),
    };

    let name = TopicName::try_from(discover.topic.as_str()).map_err(|e| e.to_string())?;
    let owner = Client::new(discover.broker).discover(&name).map_err(|e| e.to_string())?;
    println!("{} owned by {}", name, owner);

    Ok(())
}
