//! The peer side of a game: one captain, driven by a human at the terminal or by
//! one of the bots.

use std::io::Write;
use std::sync::Arc;
use std::sync::OnceLock;

use remoter::Args;
use remoter::CallError;
use remoter::CallResult;
use remoter::MethodTable;
use remoter::SessionProxy;
use serde_json::json;
use tracing::debug;

use crate::board::Board;
use crate::board::FLEET;
use crate::board::parse_bomb_location;
use crate::board::parse_ship_location;
use crate::bot;

const SHIP_USAGE: &str = "Use: R C D for input (R: row; C: column; D = A for across, D for down)";

/// Who makes the decisions for a captain.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum Strategy {
    /// Reads placements and guesses from stdin.
    #[default]
    Human,
    /// Random legal placements and random untried guesses.
    Bot,
    /// Like `Bot`, but never wastes a shot on water that cannot hold a ship.
    SmarterBot,
}

pub struct Captain {
    game: SessionProxy,
    strategy: Strategy,
    seat: OnceLock<u64>,
}

impl Captain {
    pub fn new(game: SessionProxy, strategy: Strategy) -> Self {
        Self {
            game,
            strategy,
            seat: OnceLock::new(),
        }
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    /// The player number the game assigned, once welcomed.
    pub fn seat(&self) -> Option<u64> {
        self.seat.get().copied()
    }

    fn require_seat(&self) -> Result<u64, CallError> {
        self.seat()
            .ok_or_else(|| CallError::Application("not welcomed to a game yet".to_string()))
    }

    async fn board_lines(&self, pn: u64) -> Result<Vec<String>, CallError> {
        Ok(self.game.call_as("display", Args::new().arg(pn)).await?)
    }

    async fn show_board(&self, pn: u64) -> Result<(), CallError> {
        println!("{}", self.board_lines(pn).await?.join("\n"));
        Ok(())
    }

    async fn add_ship(&self, pn: u64, x: i64, y: i64, dx: i64, dy: i64, size: i64) -> Result<bool, CallError> {
        let args = Args::new().arg(pn).arg(x).arg(y).arg(dx).arg(dy).arg(size);
        Ok(self.game.call_as("add_ship", args).await?)
    }
}

/// Peer methods the game session calls, plus the built-ins.
pub fn methods() -> MethodTable<Captain> {
    MethodTable::new()
        .with_builtins()
        .sync("welcome", |captain, args| welcome(captain, args))
        .sync("get_ships", |captain, _| get_ships(captain))
        .sync("guess", |captain, args| guess(captain, args))
}

async fn welcome(captain: Arc<Captain>, args: Args) -> CallResult {
    let msg: String = args.get(0, "msg")?;
    let pn: u64 = args.get(1, "pn")?;

    println!("{}", msg);
    println!("You are player {}", pn);
    if captain.seat.set(pn).is_err() {
        debug!(pn, "already seated");
    }
    Ok(json!(null))
}

async fn get_ships(captain: Arc<Captain>) -> CallResult {
    let pn = captain.require_seat()?;
    println!("Player {} pick your ships!", pn);

    match captain.strategy {
        Strategy::Human => place_by_hand(&captain, pn).await?,
        Strategy::Bot | Strategy::SmarterBot => place_at_random(&captain, pn).await?,
    }

    println!();
    println!("Your final board:");
    captain.show_board(pn).await?;
    Ok(json!(null))
}

async fn place_by_hand(captain: &Captain, pn: u64) -> Result<(), CallError> {
    println!("{}", SHIP_USAGE);

    for (ship, size) in FLEET {
        loop {
            println!();
            captain.show_board(pn).await?;

            let location = read_line(format!("enter position of {}: ", ship)).await?;
            let Ok((x, y, dx, dy)) = parse_ship_location(&location) else {
                println!("{}", SHIP_USAGE);
                continue;
            };

            if captain.add_ship(pn, x, y, dx, dy, size).await? {
                break;
            }
            println!("That ship can't go there!");
        }
    }
    Ok(())
}

async fn place_at_random(captain: &Captain, pn: u64) -> Result<(), CallError> {
    let mut mirror = Board::new();

    for (ship, size) in FLEET {
        let place = pick_placement(&mirror, size)
            .ok_or_else(|| CallError::Application(format!("no room left for the {}", ship)))?;
        mirror
            .add_ship(place.x, place.y, place.dx, place.dy, place.size)
            .map_err(CallError::application)?;

        println!(
            "Adding {} at ({}, {}) - ({}, {})",
            ship,
            place.x,
            place.y,
            place.x + place.dx * (place.size - 1),
            place.y + place.dy * (place.size - 1)
        );
        if !captain.add_ship(pn, place.x, place.y, place.dx, place.dy, place.size).await? {
            return Err(CallError::Application(format!("the game refused the {}", ship)));
        }
    }
    Ok(())
}

async fn guess(captain: Arc<Captain>, args: Args) -> CallResult {
    let mine: Vec<String> = args.get(0, "my_lines")?;
    let theirs: Vec<String> = args.get(1, "other_lines")?;

    // the game prints both boards for humans; bots show them side by side
    if captain.strategy != Strategy::Human {
        println!();
        match captain.seat() {
            Some(pn) => println!("Player {}, it's your go!", pn),
            None => println!("It's your go!"),
        }
        println!();
        println!("Your board\tTheir board");
        for (me, them) in mine.iter().zip(&theirs) {
            println!("{}\t{}", me, them);
        }
    }

    let target = match captain.strategy {
        Strategy::Human => loop {
            let answer = read_line("your guess? ".to_string()).await?;
            match parse_bomb_location(&answer) {
                Ok(target) => break target,
                Err(e) => println!("{}", e),
            }
        },
        strategy => pick_target(strategy, &theirs)
            .ok_or_else(|| CallError::Application("nowhere left to shoot".to_string()))?,
    };

    Ok(json!([target.0, target.1]))
}

// The thread-local rng is not `Send`, so it never lives inside a method's future.
fn pick_placement(board: &Board, size: i64) -> Option<bot::Placement> {
    bot::random_placement(&mut rand::thread_rng(), board, size)
}

fn pick_target(strategy: Strategy, other_lines: &[String]) -> Option<(i64, i64)> {
    let mut rng = rand::thread_rng();
    match strategy {
        Strategy::SmarterBot => bot::smarter_guess(&mut rng, other_lines),
        _ => bot::random_guess(&mut rng, other_lines),
    }
}

/// Prompts on stdout and reads one line from stdin. End of input asks the
/// process to exit.
async fn read_line(prompt: String) -> Result<String, CallError> {
    let line = tokio::task::spawn_blocking(move || {
        print!("{}", prompt);
        std::io::stdout().flush()?;
        let mut line = String::new();
        let read = std::io::stdin().read_line(&mut line)?;
        Ok::<_, std::io::Error>((read > 0).then_some(line))
    })
    .await
    .map_err(CallError::application)?
    .map_err(CallError::application)?;

    match line {
        Some(line) => Ok(line.trim_end_matches(['\r', '\n']).to_string()),
        None => Err(CallError::Exit(0)),
    }
}
