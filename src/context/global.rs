//! Per-thread "current grid".
//!
//! A convenience layer for callers that do not want to thread a grid through
//! every call. Each rank of the thread backend runs on its own thread, so the
//! current grid is thread local.

use std::cell::RefCell;

use super::grid::ProcessGrid;
use crate::error::SpError;
use crate::parallel::UniverseComm;

thread_local! {
    static CURRENT: RefCell<Option<ProcessGrid>> = const { RefCell::new(None) };
}

/// Build a grid and make it current, replacing any previous one.
pub fn construct_global_process_grid(
    world: UniverseComm,
    rows: usize,
    columns: usize,
    slices: usize,
) -> Result<(), SpError> {
    let grid = ProcessGrid::new(world, rows, columns, slices)?;
    set_global_grid(grid);
    Ok(())
}

pub fn set_global_grid(grid: ProcessGrid) {
    CURRENT.with(|c| *c.borrow_mut() = Some(grid));
}

/// Release the current grid. Matrices built on it keep their own handle.
pub fn destruct_global_process_grid() {
    CURRENT.with(|c| c.borrow_mut().take());
}

pub fn global_grid() -> Result<ProcessGrid, SpError> {
    CURRENT.with(|c| c.borrow().clone()).ok_or(SpError::NoActiveGrid)
}

/// Whether this process is the root of the current grid; `false` without one.
pub fn global_is_root() -> bool {
    CURRENT.with(|c| c.borrow().as_ref().is_some_and(ProcessGrid::is_root))
}
