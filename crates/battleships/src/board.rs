//! # Battleships Board
//!
//! A sparse sea of at most 10x10 cells. Unset cells are open water; the rest
//! hold a ship, a sunk ship, or the mark of an earlier shot.
//!
//! Rendered boards look like this, rows lettered and columns numbered:
//!
//! ```text
//!   0123456789
//! a SS~~~~~~~~
//! b ~~~.~~!~~X
//! ```

use std::collections::HashMap;

/// Largest supported width or height; rows are lettered `a` through `j`.
pub const MAX_SIZE: i64 = 10;

/// Ships every player places, in placement order.
pub const FLEET: [(&str, i64); 5] = [
    ("Carrier", 5),
    ("Battleship", 4),
    ("Cruiser", 3),
    ("Submarine", 2),
    ("Destroyer", 2),
];

/// Rendering of open water.
pub const WATER: char = '~';

const ROWS: &str = "abcdefghijklmnopqrstuvwxyz";
const COLUMNS: &str = "0123456789";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Width or height outside `1..=10`.
    BadDimensions(i64, i64),
    /// Part of the ship would lie off the board.
    OffBoard,
    /// The ship would touch another one, diagonals included.
    Abuts,
    OffGrid(i64, i64),
    /// A location could not be read.
    Parse(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BadDimensions(w, h) => write!(f, "A {}x{} board is not supported", w, h),
            Self::OffBoard => write!(f, "That ship does not lie on the board"),
            Self::Abuts => write!(f, "That ship abuts another"),
            Self::OffGrid(x, y) => write!(f, "Off-grid shot at ({}, {})", x, y),
            Self::Parse(loc) => write!(f, "Cannot read location '{}'", loc),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Cell {
    Ship,
    /// A shot with nothing nearby.
    Miss,
    /// A shot next to a ship.
    Near,
    Sunk,
}

impl Cell {
    pub const fn symbol(self) -> char {
        match self {
            Self::Ship => 'S',
            Self::Miss => '.',
            Self::Near => '!',
            Self::Sunk => 'X',
        }
    }

    pub const fn from_symbol(c: char) -> Option<Self> {
        match c {
            'S' => Some(Self::Ship),
            '.' => Some(Self::Miss),
            '!' => Some(Self::Near),
            'X' => Some(Self::Sunk),
            _ => None,
        }
    }
}

/// Outcome of a [`Board::potshot`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Shot {
    Miss,
    Near,
    Hit,
}

impl Shot {
    /// What the shooter is told.
    pub const fn announcement(self) -> &'static str {
        match self {
            Self::Miss => "Splash!",
            Self::Near => "KERSPLOOSH!!",
            Self::Hit => "BOOM!!!",
        }
    }
}

/// The 3x3 block around (and including) a cell.
fn neighbourhood(x: i64, y: i64) -> impl Iterator<Item = (i64, i64)> {
    (-1..=1).flat_map(move |dx| (-1..=1).map(move |dy| (x + dx, y + dy)))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Board {
    width: i64,
    height: i64,
    sea: HashMap<(i64, i64), Cell>,
}

impl Default for Board {
    fn default() -> Self {
        Self {
            width: MAX_SIZE,
            height: MAX_SIZE,
            sea: HashMap::new(),
        }
    }
}

impl Board {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_size(width: i64, height: i64) -> Result<Self> {
        if !(1..=MAX_SIZE).contains(&width) || !(1..=MAX_SIZE).contains(&height) {
            return Err(Error::BadDimensions(width, height));
        }
        Ok(Self { width, height, sea: HashMap::new() })
    }

    pub fn width(&self) -> i64 {
        self.width
    }

    pub fn height(&self) -> i64 {
        self.height
    }

    pub fn contains(&self, x: i64, y: i64) -> bool {
        (0..self.width).contains(&x) && (0..self.height).contains(&y)
    }

    pub fn cell(&self, x: i64, y: i64) -> Option<Cell> {
        self.sea.get(&(x, y)).copied()
    }

    /// Checks that a ship of `size` starting at `(x, y)` and extending by
    /// `(dx, dy)` fits without touching anything already on the board.
    pub fn check_ship(&self, x: i64, y: i64, dx: i64, dy: i64, size: i64) -> Result<Vec<(i64, i64)>> {
        if size > MAX_SIZE {
            return Err(Error::OffBoard);
        }
        let cells = (0..size)
            .map(|i| Some((x.checked_add(i.checked_mul(dx)?)?, y.checked_add(i.checked_mul(dy)?)?)))
            .collect::<Option<Vec<(i64, i64)>>>()
            .ok_or(Error::OffBoard)?;

        if cells.iter().any(|&(cx, cy)| !self.contains(cx, cy)) {
            return Err(Error::OffBoard);
        }

        let crowded = cells
            .iter()
            .flat_map(|&(cx, cy)| neighbourhood(cx, cy))
            .any(|cell| self.sea.contains_key(&cell));
        if crowded {
            return Err(Error::Abuts);
        }

        Ok(cells)
    }

    pub fn add_ship(&mut self, x: i64, y: i64, dx: i64, dy: i64, size: i64) -> Result<()> {
        for (cx, cy) in self.check_ship(x, y, dx, dy, size)? {
            self.add_counter(cx, cy);
        }
        Ok(())
    }

    /// Puts a single ship cell down without any placement checks.
    pub fn add_counter(&mut self, x: i64, y: i64) {
        self.sea.insert((x, y), Cell::Ship);
    }

    pub fn potshot(&mut self, x: i64, y: i64) -> Result<Shot> {
        if !self.contains(x, y) {
            return Err(Error::OffGrid(x, y));
        }

        if self.cell(x, y) == Some(Cell::Ship) {
            self.sea.insert((x, y), Cell::Sunk);
            return Ok(Shot::Hit);
        }

        let near = neighbourhood(x, y).any(|(nx, ny)| self.cell(nx, ny) == Some(Cell::Ship));
        if near {
            self.sea.insert((x, y), Cell::Near);
            Ok(Shot::Near)
        } else {
            self.sea.insert((x, y), Cell::Miss);
            Ok(Shot::Miss)
        }
    }

    /// True once no ship cell is left afloat.
    pub fn defeated(&self) -> bool {
        !self.sea.values().any(|&cell| cell == Cell::Ship)
    }

    /// The board as its owner sees it.
    pub fn lines(&self) -> Vec<String> {
        self.render(|cell| cell.symbol())
    }

    /// The board as the opponent sees it: ships still afloat look like water.
    pub fn other_lines(&self) -> Vec<String> {
        self.render(|cell| match cell {
            Cell::Ship => WATER,
            other => other.symbol(),
        })
    }

    fn render(&self, show: impl Fn(Cell) -> char) -> Vec<String> {
        let mut lines = Vec::with_capacity(self.height as usize + 1);
        lines.push(format!("  {}", &COLUMNS[..self.width as usize]));

        for (y, row) in ROWS.chars().take(self.height as usize).enumerate() {
            let sea: String = (0..self.width)
                .map(|x| self.cell(x, y as i64).map_or(WATER, &show))
                .collect();
            lines.push(format!("{} {}", row, sea));
        }
        lines
    }
}

fn squash(loc: &str) -> String {
    loc.to_lowercase().chars().filter(|c| !c.is_whitespace()).collect()
}

/// Reads the row letter and column digit at the start of a squashed location.
fn row_col(loc: &str, original: &str) -> Result<(i64, i64)> {
    let mut chars = loc.chars();
    let parse = || Error::Parse(original.to_string());

    let row = chars.next().and_then(|c| ROWS.find(c)).ok_or_else(parse)?;
    let col = chars.next().and_then(|c| c.to_digit(10)).ok_or_else(parse)?;
    Ok((col as i64, row as i64))
}

/// Parses `R C D` (for example `b 3 a`) into `(x, y, dx, dy)`, where `D` is `a`
/// for across or `d` for down.
pub fn parse_ship_location(loc: &str) -> Result<(i64, i64, i64, i64)> {
    let squashed = squash(loc);
    if squashed.chars().count() != 3 {
        return Err(Error::Parse(loc.to_string()));
    }

    let (x, y) = row_col(&squashed, loc)?;
    let (dx, dy) = match squashed.chars().last() {
        Some('a') => (1, 0),
        Some('d') => (0, 1),
        _ => return Err(Error::Parse(loc.to_string())),
    };
    Ok((x, y, dx, dy))
}

/// Parses `R C` (for example `e 7`) into `(x, y)`.
pub fn parse_bomb_location(loc: &str) -> Result<(i64, i64)> {
    let squashed = squash(loc);
    if squashed.chars().count() != 2 {
        return Err(Error::Parse(loc.to_string()));
    }
    row_col(&squashed, loc)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_board() {
        let mut b = Board::new();
        b.add_counter(0, 0);
        b.add_counter(9, 9);
        assert!(!b.defeated());
        assert_eq!(b.lines().len(), 11);
    }

    #[test]
    fn test_ship_far_off_board() {
        let mut b = Board::new();
        assert_eq!(b.add_ship(0, i64::MAX, 0, 1, 2), Err(Error::OffBoard));
        assert_eq!(b.add_ship(i64::MIN, 0, -1, 0, 2), Err(Error::OffBoard));
        assert_eq!(b.add_ship(0, 0, i64::MAX, 0, 3), Err(Error::OffBoard));
        assert_eq!(b.add_ship(0, 0, 1, 0, i64::MAX), Err(Error::OffBoard));
        assert_eq!(b.add_ship(0, 0, 1, 0, MAX_SIZE + 1), Err(Error::OffBoard));
        assert_eq!(b.lines(), Board::new().lines());

        // the longest ship that fits still goes down
        assert_eq!(b.add_ship(0, 0, 1, 0, MAX_SIZE), Ok(()));
    }

    #[test]
    fn test_hit() {
        let mut b = Board::new();
        b.add_counter(5, 5);
        assert_eq!(b.potshot(5, 5), Ok(Shot::Hit));
        assert!(b.defeated());
        assert_eq!(b.cell(5, 5), Some(Cell::Sunk));
    }

    #[test]
    fn test_miss() {
        let mut b = Board::new();
        b.add_counter(3, 3);
        assert_eq!(b.potshot(1, 2), Ok(Shot::Miss));
        assert_eq!(b.cell(1, 2), Some(Cell::Miss));
        assert!(!b.defeated());
    }

    #[test]
    fn test_near_miss() {
        let mut b = Board::new();
        b.add_counter(3, 3);
        assert_eq!(b.potshot(2, 2), Ok(Shot::Near));
        assert_eq!(b.cell(2, 2), Some(Cell::Near));
        assert!(!b.defeated());
    }

    #[test]
    fn test_off_grid_shot() {
        let mut b = Board::new();
        assert_eq!(b.potshot(10, 0), Err(Error::OffGrid(10, 0)));
        assert_eq!(b.potshot(0, -1), Err(Error::OffGrid(0, -1)));
    }

    #[test]
    fn test_ship_must_lie_on_board() {
        let mut b = Board::new();
        assert_eq!(b.add_ship(0, 0, -1, 0, 2), Err(Error::OffBoard));
        assert_eq!(b.add_ship(1, 1, 0, -1, 3), Err(Error::OffBoard));
        assert_eq!(b.add_ship(9, 9, 1, 0, 2), Err(Error::OffBoard));
        assert_eq!(b.add_ship(0, 0, 0, 1, 11), Err(Error::OffBoard));
        assert!(b.defeated());
    }

    #[test]
    fn test_ship_must_not_be_adjacent_to_another() {
        let mut b = Board::new();
        b.add_ship(5, 5, 0, 0, 1).unwrap();

        for (x, y) in neighbourhood(5, 5) {
            assert_eq!(b.add_ship(x, y, 0, 0, 1), Err(Error::Abuts));
        }
        b.add_ship(7, 5, 0, 1, 3).unwrap();
    }

    #[test]
    fn test_rendering_hides_ships_from_opponent() {
        let mut b = Board::with_size(4, 2).unwrap();
        b.add_ship(0, 0, 1, 0, 2).unwrap();
        b.potshot(0, 0).unwrap();
        b.potshot(2, 1).unwrap();
        b.potshot(3, 1).unwrap();

        assert_eq!(b.lines(), vec!["  0123", "a XS~~", "b ~~!."]);
        assert_eq!(b.other_lines(), vec!["  0123", "a X~~~", "b ~~!."]);
    }

    #[test]
    fn test_bad_dimensions() {
        assert_eq!(Board::with_size(0, 5), Err(Error::BadDimensions(0, 5)));
        assert_eq!(Board::with_size(5, 11), Err(Error::BadDimensions(5, 11)));
    }

    #[test]
    fn test_parse_locations() {
        assert_eq!(parse_ship_location("b 3 a"), Ok((3, 1, 1, 0)));
        assert_eq!(parse_ship_location(" J0D "), Ok((0, 9, 0, 1)));
        assert!(parse_ship_location("b 3 x").is_err());
        assert!(parse_ship_location("3 b a").is_err());
        assert!(parse_ship_location("b 3").is_err());

        assert_eq!(parse_bomb_location("e 7"), Ok((7, 4)));
        assert!(parse_bomb_location("e").is_err());
        assert!(parse_bomb_location("e 7 a").is_err());
    }
}
