//! # battleships
//!
//! Two-player Battleships on top of `remoter`. The server hosts [`game::Game`]
//! sessions; each player process runs a [`player::Captain`] behind a poll loop.

pub mod board;
pub mod bot;
pub mod game;
pub mod player;

use std::sync::Arc;

use remoter::ClientConfig;
use remoter::Dispatcher;
use remoter::DispatcherBuilder;
use remoter::InstanceRegistry;
use remoter::Transport;
use remoter::dispatcher;

use crate::player::Captain;
use crate::player::Strategy;

/// Session type name the game is served under.
pub const GAME_TYPE: &str = "battleships";

/// A registry serving Battleships games.
pub fn registry() -> InstanceRegistry {
    InstanceRegistry::new().with(game::session_type())
}

/// Joins (or creates) the game named in `config` as a captain playing `strategy`.
pub async fn join(
    transport: Arc<dyn Transport>,
    config: &ClientConfig,
    strategy: Strategy,
) -> dispatcher::Result<Dispatcher<Captain>> {
    DispatcherBuilder::new(transport)
        .config(config)
        .session_conventions(game::methods().conventions())
        .connect(player::methods(), |game| Captain::new(game, strategy))
        .await
}
