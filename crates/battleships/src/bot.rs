//! Automatic fleet placement and targeting for computer players.

use std::collections::HashMap;

use rand::Rng;
use rand::seq::SliceRandom;

use crate::board::Board;
use crate::board::Cell;

/// A ship position, as passed to the session's `add_ship`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Placement {
    pub x: i64,
    pub y: i64,
    pub dx: i64,
    pub dy: i64,
    pub size: i64,
}

/// Every legal placement of a ship of `size` on `board`, across and down.
pub fn possible_placements(board: &Board, size: i64) -> Vec<Placement> {
    let mut found = Vec::new();
    for (dx, dy) in [(1, 0), (0, 1)] {
        for y in 0..board.height() {
            for x in 0..board.width() {
                if board.check_ship(x, y, dx, dy, size).is_ok() {
                    found.push(Placement { x, y, dx, dy, size });
                }
            }
        }
    }
    found
}

/// Picks a random legal placement, or `None` if the ship cannot fit.
pub fn random_placement(rng: &mut impl Rng, board: &Board, size: i64) -> Option<Placement> {
    possible_placements(board, size).choose(rng).copied()
}

/// Reads the opponent's rendered board back into shot marks.
///
/// Returns the marks by `(x, y)` together with the grid's width and height.
pub fn parse_other(lines: &[String]) -> (HashMap<(i64, i64), Cell>, i64, i64) {
    let width = lines
        .first()
        .map_or(0, |header| header.chars().count().saturating_sub(2)) as i64;
    let height = lines.len().saturating_sub(1) as i64;

    let mut marks = HashMap::new();
    for (y, line) in lines.iter().skip(1).enumerate() {
        for (x, c) in line.chars().skip(2).enumerate() {
            if let Some(cell @ (Cell::Miss | Cell::Near | Cell::Sunk)) = Cell::from_symbol(c) {
                marks.insert((x as i64, y as i64), cell);
            }
        }
    }
    (marks, width, height)
}

fn untried(
    rng: &mut impl Rng,
    ruled_out: impl Fn(i64, i64) -> bool,
    width: i64,
    height: i64,
) -> Option<(i64, i64)> {
    let open: Vec<(i64, i64)> = (0..height)
        .flat_map(|y| (0..width).map(move |x| (x, y)))
        .filter(|&(x, y)| !ruled_out(x, y))
        .collect();
    open.choose(rng).copied()
}

/// Any cell that has not been shot at yet.
pub fn random_guess(rng: &mut impl Rng, other_lines: &[String]) -> Option<(i64, i64)> {
    let (marks, width, height) = parse_other(other_lines);
    untried(rng, |x, y| marks.contains_key(&(x, y)), width, height)
}

/// Like [`random_guess`], but also skips cells that cannot hold a ship: the
/// diagonals of a sunk cell and everything around a plain miss.
pub fn smarter_guess(rng: &mut impl Rng, other_lines: &[String]) -> Option<(i64, i64)> {
    let (marks, width, height) = parse_other(other_lines);

    let mut excluded: Vec<(i64, i64)> = marks.keys().copied().collect();
    for (&(x, y), cell) in &marks {
        match cell {
            Cell::Sunk => {
                excluded.extend([(x - 1, y - 1), (x + 1, y - 1), (x - 1, y + 1), (x + 1, y + 1)]);
            }
            Cell::Miss => {
                excluded.extend((-1..=1).flat_map(|dx| (-1..=1).map(move |dy| (x + dx, y + dy))));
            }
            _ => {}
        }
    }

    untried(rng, |x, y| excluded.contains(&(x, y)), width, height)
        .or_else(|| random_guess(rng, other_lines))
}
