use std::{fs, net, path, time};

use crate::{Error, ErrorKind, Result, MAX_FRAME_SIZE};

macro_rules! config_field {
    ($table:ident, $field:ident, $config:ident, $($args:tt)+) => {{
        let field = stringify!($field);
        if let Some(val) = $table.get(field) {
            $config.$field = match val.$($args)+ {
                Some(val) => val.parse()?,
                None => err!(
                    InvalidInput,
                    desc: "invalid config field {}, {}", field, val.to_string()
                )?,
            }
        }
    }};
    (opt: $table:ident, $field:ident, $config:ident, $($args:tt)+) => {{
        let field = stringify!($field);
        if let Some(val) = $table.get(field) {
            $config.$field = match val.$($args)+ {
                Some(val) => Some(val.parse()?),
                None => err!(
                    InvalidInput,
                    desc: "invalid config field {}, {}", field, val.to_string()
                )?,
            }
        }
    }};
}

/// Broker node configuration.
#[derive(Clone, Debug)]
pub struct Config {
    /// Human readable name of the broker node, used in log prefix.
    /// * **Default**: [Config::DEF_NAME]
    /// * **Mutable**: No
    pub name: String,

    /// Interface address to bind both the client-facing and broker-facing
    /// endpoints.
    /// * **Default**: [Config::DEF_BIND_IP]
    /// * **Mutable**: No
    pub bind_ip: net::IpAddr,

    /// Address advertised to clients and peer brokers for this node's client-facing
    /// endpoint. Discovery replies carry this address.
    /// * **Default**: [Config::DEF_HOST]
    /// * **Mutable**: No
    pub host: net::IpAddr,

    /// Port for client-facing endpoint, 0 shall pick an ephemeral port.
    /// * **Default**: 0
    /// * **Mutable**: No
    pub client_port: u16,

    /// Port for broker-facing endpoint, 0 shall pick an ephemeral port.
    /// * **Default**: 0
    /// * **Mutable**: No
    pub broker_port: u16,

    /// Broker-facing address of the leader node. When supplied this node registers
    /// itself with the leader, otherwise this node is the leader.
    /// * **Default**: None
    /// * **Mutable**: No
    pub leader: Option<net::SocketAddr>,

    /// Root directory for topics. If not supplied topics are kept only in memory.
    /// * **Default**: None
    /// * **Mutable**: No
    pub topics_dir: Option<path::PathBuf>,

    /// Maximum size of a single frame on the wire, in bytes.
    /// * **Default**: [MAX_FRAME_SIZE]
    /// * **Mutable**: No
    pub max_frame_size: u32,

    /// Idle timeout, in milliseconds, for fan-out workers. When there is nothing to
    /// send for this long, the worker checks whether the subscriber is still
    /// connected.
    /// * **Default**: [Config::DEF_FANOUT_IDLE_TIMEOUT]
    /// * **Mutable**: No
    pub fanout_idle_timeout: u32,

    /// Timeout, in milliseconds, for reading the request on a newly accepted
    /// connection. Connections that don't send their request in time are closed.
    /// * **Default**: [Config::DEF_REQUEST_TIMEOUT]
    /// * **Mutable**: No
    pub request_timeout: u32,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            name: Config::DEF_NAME.to_string(),
            bind_ip: Config::DEF_BIND_IP,
            host: Config::DEF_HOST,
            client_port: 0,
            broker_port: 0,
            leader: None,
            topics_dir: None,
            max_frame_size: MAX_FRAME_SIZE,
            fanout_idle_timeout: Config::DEF_FANOUT_IDLE_TIMEOUT,
            request_timeout: Config::DEF_REQUEST_TIMEOUT,
        }
    }
}

impl TryFrom<toml::Value> for Config {
    type Error = Error;

    fn try_from(val: toml::Value) -> Result<Config> {
        let mut def = Config::default();
        match val.as_table() {
            Some(t) => {
                config_field!(t, name, def, as_str());
                config_field!(t, bind_ip, def, as_str());
                config_field!(t, host, def, as_str());
                config_field!(t, client_port, def, as_integer().map(|n| n.to_string()));
                config_field!(t, broker_port, def, as_integer().map(|n| n.to_string()));
                config_field!(opt: t, leader, def, as_str());
                config_field!(opt: t, topics_dir, def, as_str());
                config_field!(
                    t,
                    max_frame_size,
                    def,
                    as_integer().map(|n| n.to_string())
                );
                config_field!(
                    t,
                    fanout_idle_timeout,
                    def,
                    as_integer().map(|n| n.to_string())
                );
                config_field!(t, request_timeout, def, as_integer().map(|n| n.to_string()));
            }
            None => (),
        }

        def.validate()?;
        Ok(def)
    }
}

impl Config {
    /// Refer to [Config::name]
    pub const DEF_NAME: &'static str = "postbus";
    /// Refer to [Config::bind_ip]
    pub const DEF_BIND_IP: net::IpAddr = net::IpAddr::V4(net::Ipv4Addr::UNSPECIFIED);
    /// Refer to [Config::host]
    pub const DEF_HOST: net::IpAddr = net::IpAddr::V4(net::Ipv4Addr::LOCALHOST);
    /// Refer to [Config::fanout_idle_timeout]
    pub const DEF_FANOUT_IDLE_TIMEOUT: u32 = 1000;
    /// Refer to [Config::request_timeout]
    pub const DEF_REQUEST_TIMEOUT: u32 = 5000;
    /// Frames cannot be smaller than this, refer to [Config::max_frame_size]
    pub const MIN_FRAME_SIZE: u32 = 1024;

    pub fn from_file<P>(loc: P) -> Result<Config>
    where
        P: AsRef<path::Path>,
    {
        use std::str::from_utf8;

        let ploc: &path::Path = loc.as_ref();

        let data = err!(IOError, try: fs::read(ploc), "reading config from {:?}", ploc)?;
        let s = err!(InvalidInput, try: from_utf8(&data), "config not utf8 {:?}", ploc)?;

        let val: toml::Value =
            err!(InvalidInput, try: toml::from_str(s), "config not toml {:?}", ploc)?;

        Config::try_from(val)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_frame_size < Self::MIN_FRAME_SIZE {
            err!(InvalidInput, desc: "max_frame_size is {}", self.max_frame_size)
        } else if self.fanout_idle_timeout == 0 {
            err!(InvalidInput, desc: "fanout_idle_timeout cannot be zero")
        } else if self.request_timeout == 0 {
            err!(InvalidInput, desc: "request_timeout cannot be zero")
        } else {
            Ok(())
        }
    }

    pub fn client_address(&self) -> net::SocketAddr {
        net::SocketAddr::new(self.bind_ip, self.client_port)
    }

    pub fn broker_address(&self) -> net::SocketAddr {
        net::SocketAddr::new(self.bind_ip, self.broker_port)
    }

    pub fn fanout_idle_timeout(&self) -> time::Duration {
        time::Duration::from_millis(u64::from(self.fanout_idle_timeout))
    }

    pub fn request_timeout(&self) -> time::Duration {
        time::Duration::from_millis(u64::from(self.request_timeout))
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod config_test;
