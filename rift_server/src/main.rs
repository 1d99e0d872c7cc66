#[macro_use]
extern crate log;

use clap::Parser;
use rift_server::{config::Config, engine::Engine};
use std::sync::Arc;

#[derive(Parser, Debug)]
#[clap(about, version, author)]
struct Args {
  /// Path to the server config. Missing file means all defaults.
  #[clap(long, default_value = "server.toml")]
  config: String,

  /// Overrides the log level from the config (trace, debug, info, warn,
  /// error).
  #[clap(long)]
  log_level: Option<String>,

  /// If set, the engine runs without a bound transport. Useful for smoke
  /// testing a config: worlds tick, nobody can connect.
  #[clap(long)]
  no_listen: bool,
}

fn main() {
  let args = Args::parse();
  let config: Config = rift_common::config::load(&args.config);

  let level = args.log_level.as_deref().unwrap_or(&config.log_level);
  let level = level.parse().unwrap_or(log::LevelFilter::Info);
  rift_common::init_with_level("server", level);

  if args.no_listen {
    info!("transport disabled, running engine only");
  } else {
    // The datagram socket is an external collaborator. It decodes envelopes
    // with a Codec and feeds them to `net::packet::handle`; nothing in this
    // binary binds a port.
    info!("expecting transport on udp port {}", config.udp_port);
  }

  let engine = Arc::new(Engine::new(config));
  engine.clone().spawn_background();

  info!("starting engine at {} hz", engine.config().target_fps);
  engine.run();
}
