//! Process-grid context.
//!
//! - [`grid`]: the explicit `ProcessGrid` handed to every distributed object.
//! - [`global`]: an optional per-thread current grid for callers that prefer
//!   not to pass one around.

pub mod global;
pub mod grid;

pub use global::{
    construct_global_process_grid, destruct_global_process_grid, global_grid, global_is_root,
    set_global_grid,
};
pub use grid::ProcessGrid;
