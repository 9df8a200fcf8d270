//! # Game Session
//!
//! Hosts one two-player game. Each connecting peer is welcomed, asked to place
//! its fleet, and marked ready; once both seats are ready the game loop runs on
//! its own task, asking the players to `guess` in turn until one fleet is sunk.
//!
//! Seats live behind a mutex that is never held across a call to a peer.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;

use remoter::Args;
use remoter::CallError;
use remoter::CallResult;
use remoter::MethodTable;
use remoter::PeerHandle;
use remoter::Session;
use remoter::SessionType;
use remoter::session;
use serde_json::Value;
use serde_json::json;
use tracing::info;
use tracing::warn;

use crate::GAME_TYPE;
use crate::board::Board;

/// Players per game.
pub const SEATS: usize = 2;

struct Seat {
    board: Board,
    peer: PeerHandle,
    ready: bool,
}

#[derive(Default)]
pub struct Game {
    seats: Mutex<Vec<Seat>>,
}

#[async_trait::async_trait]
impl Session for Game {
    async fn peer_connected(self: Arc<Self>, peer: PeerHandle) {
        let pid = peer.id();
        if let Err(e) = self.seat(peer).await {
            warn!(peer = %pid, error = %e, "player dropped out during setup");
        }
    }
}

impl Game {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Seat>> {
        self.seats.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn seat(self: Arc<Self>, peer: PeerHandle) -> session::Result<()> {
        let pn = {
            let mut seats = self.lock();
            if seats.len() >= SEATS {
                info!(peer = %peer.id(), "game full, ignoring player");
                return Ok(());
            }
            seats.push(Seat {
                board: Board::new(),
                peer: peer.clone(),
                ready: false,
            });
            seats.len() - 1
        };
        info!(peer = %peer.id(), pn, "player seated");

        peer.call("welcome", Args::new().arg("welcome!").arg(pn)).await?;
        peer.call("get_ships", Args::new()).await?;

        let everyone_ready = {
            let mut seats = self.lock();
            seats[pn].ready = true;
            seats.len() == SEATS && seats.iter().all(|seat| seat.ready)
        };
        info!(pn, everyone_ready, "player ready");

        if everyone_ready {
            tokio::spawn(self.clone().play());
        }
        Ok(())
    }

    /// Places a ship on `pn`'s board; false if it does not fit.
    pub fn add_ship(&self, pn: usize, x: i64, y: i64, dx: i64, dy: i64, size: i64) -> Result<bool, CallError> {
        let mut seats = self.lock();
        let seat = seats.get_mut(pn).ok_or_else(|| no_player(pn))?;
        Ok(seat.board.add_ship(x, y, dx, dy, size).is_ok())
    }

    /// `pn`'s own board.
    pub fn display(&self, pn: usize) -> Result<Vec<String>, CallError> {
        let seats = self.lock();
        Ok(seats.get(pn).ok_or_else(|| no_player(pn))?.board.lines())
    }

    /// The opponent's board as `pn` is allowed to see it.
    pub fn other(&self, pn: usize) -> Result<Vec<String>, CallError> {
        let seats = self.lock();
        let seat = seats.get(opponent(pn)).ok_or_else(|| no_player(opponent(pn)))?;
        Ok(seat.board.other_lines())
    }

    async fn play(self: Arc<Self>) {
        if let Err(e) = self.run_game().await {
            warn!(error = %e, "game abandoned");
        }
    }

    async fn run_game(&self) -> session::Result<()> {
        let peers: Vec<PeerHandle> = self.lock().iter().map(|seat| seat.peer.clone()).collect();
        info!("game starting");

        let mut turn = 0;
        loop {
            let peer = &peers[turn];
            let target = opponent(turn);
            say(peer, format!("{}. your turn", turn)).await?;

            let shot = loop {
                let (mine, theirs) = {
                    let seats = self.lock();
                    (seats[turn].board.lines(), seats[target].board.other_lines())
                };
                for line in board_report(&mine, &theirs) {
                    say(peer, line).await?;
                }

                let reply = peer.call("guess", Args::new().arg(mine).arg(theirs)).await?;
                let Some((x, y)) = parse_guess(&reply) else {
                    say(peer, format!("Cannot aim at {}, try again.", reply)).await?;
                    continue;
                };

                let outcome = self.lock()[target].board.potshot(x, y);
                match outcome {
                    Ok(shot) => break shot,
                    Err(e) => say(peer, format!("{}, try again.", e)).await?,
                }
            };
            say(peer, shot.announcement()).await?;

            if self.lock()[target].board.defeated() {
                break;
            }
            turn = target;
        }

        info!(winner = turn, "game over");
        let verdict = format!("The winner is player {}", turn);
        for peer in &peers {
            say(peer, verdict.clone()).await?;
        }
        for peer in &peers {
            peer.call("exit", Args::new().arg(0)).await?;
        }
        Ok(())
    }
}

fn opponent(pn: usize) -> usize {
    (pn + 1) % SEATS
}

fn no_player(pn: usize) -> CallError {
    CallError::Application(format!("no player {}", pn))
}

async fn say(peer: &PeerHandle, line: impl Into<String>) -> session::Result<()> {
    peer.call("print", Args::new().arg(line.into())).await?;
    Ok(())
}

/// The prints that show a player both boards before a guess.
fn board_report(mine: &[String], theirs: &[String]) -> Vec<String> {
    vec![
        String::new(),
        "Your board:".to_string(),
        mine.join("\n"),
        String::new(),
        "Their board:".to_string(),
        theirs.join("\n"),
    ]
}

/// Reads an `[x, y]` reply.
fn parse_guess(reply: &Value) -> Option<(i64, i64)> {
    match reply.as_array()?.as_slice() {
        [x, y] => Some((x.as_i64()?, y.as_i64()?)),
        _ => None,
    }
}

struct ShipArgs {
    pn: usize,
    x: i64,
    y: i64,
    dx: i64,
    dy: i64,
    size: i64,
}

impl ShipArgs {
    fn bind(args: &Args) -> Result<Self, CallError> {
        Ok(Self {
            pn: args.get(0, "pn")?,
            x: args.get(1, "x")?,
            y: args.get(2, "y")?,
            dx: args.get(3, "dx")?,
            dy: args.get(4, "dy")?,
            size: args.get(5, "size")?,
        })
    }
}

async fn add_ship(game: Arc<Game>, args: Args) -> CallResult {
    let s = ShipArgs::bind(&args)?;
    Ok(json!(game.add_ship(s.pn, s.x, s.y, s.dx, s.dy, s.size)?))
}

async fn display(game: Arc<Game>, args: Args) -> CallResult {
    Ok(json!(game.display(args.get(0, "pn")?)?))
}

async fn other(game: Arc<Game>, args: Args) -> CallResult {
    Ok(json!(game.other(args.get(0, "pn")?)?))
}

/// Session methods players may invoke.
pub fn methods() -> MethodTable<Game> {
    MethodTable::new()
        .sync("add_ship", |game, args| add_ship(game, args))
        .sync("display", |game, args| display(game, args))
        .sync("other", |game, args| other(game, args))
}

pub fn session_type() -> SessionType<Game> {
    SessionType::new(GAME_TYPE, Game::new, methods())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::Cell;

    #[test]
    fn test_parse_guess() {
        assert_eq!(parse_guess(&json!([3, 4])), Some((3, 4)));
        assert_eq!(parse_guess(&json!([3])), None);
        assert_eq!(parse_guess(&json!(["a", 4])), None);
        assert_eq!(parse_guess(&json!("0")), None);
    }

    #[test]
    fn test_board_report_shows_both_boards() {
        let mut mine = Board::with_size(2, 1).unwrap();
        mine.add_counter(0, 0);
        let mut theirs = Board::with_size(2, 1).unwrap();
        theirs.add_counter(1, 0);
        theirs.potshot(1, 0).unwrap();

        let report = board_report(&mine.lines(), &theirs.other_lines());
        assert_eq!(report.len(), 6);
        assert_eq!(report[1], "Your board:");
        assert_eq!(report[2], mine.lines().join("\n"));
        assert_eq!(report[4], "Their board:");
        assert_eq!(report[5], theirs.other_lines().join("\n"));
        // the opponent's ships stay hidden
        assert!(!report[5].contains(Cell::Ship.symbol()));
    }

    #[tokio::test]
    async fn test_session_methods_need_a_seated_player() {
        let game = Arc::new(Game::new());
        let result = methods()
            .invoke(game, "display", Args::new().arg(0))
            .await;
        assert_eq!(result, Err(CallError::Application("no player 0".to_string())));
    }
}
