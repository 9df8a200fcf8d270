//! Plays Battleships against a `batsrv`, at the terminal or as a bot.

use std::sync::Arc;
use std::time::Duration;

use battleships::GAME_TYPE;
use battleships::player::Strategy;
use clap::Parser;
use remoter::ClientConfig;
use remoter::HttpTransport;
use remoter::InstanceId;
use remoter::PeerId;
use remoter::config::DEFAULT_PORT;

#[derive(Parser, Debug)]
#[command(name = "batcli", about = "Join a Battleships game")]
struct Arguments {
    #[arg(long, default_value = "localhost")]
    host: String,

    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Join this game instead of starting a new one.
    #[arg(long)]
    game: Option<u64>,

    /// Resume as this player; needs --game.
    #[arg(long = "as", requires = "game")]
    peer: Option<u64>,

    /// Let a bot play.
    #[arg(long, conflicts_with = "smart_bot")]
    bot: bool,

    /// Let the smarter bot play.
    #[arg(long)]
    smart_bot: bool,

    #[arg(long, default_value_t = 1000)]
    poll_interval_ms: u64,
}

impl Arguments {
    fn strategy(&self) -> Strategy {
        match (self.bot, self.smart_bot) {
            (_, true) => Strategy::SmarterBot,
            (true, _) => Strategy::Bot,
            _ => Strategy::Human,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Arguments::parse();
    let config = ClientConfig::default()
        .host(args.host.clone())
        .port(args.port)
        .instance(args.game.map(InstanceId))
        .peer(args.peer.map(PeerId))
        .poll_interval(Duration::from_millis(args.poll_interval_ms));

    let transport = Arc::new(HttpTransport::new(&config.base_url(), GAME_TYPE));
    let dispatcher = battleships::join(transport, &config, args.strategy()).await?;

    // enough to pick this run up again
    println!("--game {}", dispatcher.instance_id());
    println!("--as {}", dispatcher.peer_id());

    let code = dispatcher.run().await;
    std::process::exit(code);
}
