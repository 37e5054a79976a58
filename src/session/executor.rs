use anyhow::{Context, anyhow};
use tracing::info;

use crate::models::{Square, SquarePoints};

/// Downstream consumer that physically plays a move, e.g. by tapping the
/// from/to points on a screen
pub trait MoveExecutor: Send + Sync {
    fn execute(&self, uci: &str, points: &SquarePoints) -> anyhow::Result<()>;
}

/// Validate a 4-character UCI move against the cached point map, then hand it
/// to `executor`
pub fn dispatch_move(
    executor: &dyn MoveExecutor,
    uci: &str,
    points: &SquarePoints,
) -> anyhow::Result<()> {
    if uci.len() != 4 || !uci.is_ascii() {
        return Err(anyhow!("move {:?} is not a 4-character UCI string", uci));
    }
    let (from, to) = uci.split_at(2);
    let from: Square = from.parse().with_context(|| format!("bad source in {}", uci))?;
    let to: Square = to.parse().with_context(|| format!("bad target in {}", uci))?;
    for square in [from, to] {
        if !points.contains_key(&square) {
            return Err(anyhow!("no screen point cached for {}", square));
        }
    }

    info!(uci, "dispatching move");
    executor.execute(uci, points)
}
