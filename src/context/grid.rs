//! Three-dimensional process grid.
//!
//! World rank `r` sits at slice `r / (R·C)`, row `(r % (R·C)) / C` and column
//! `r % C`. The grid owns one communicator per collective scope:
//!
//! - row: same slice and row, ordered by column (size C)
//! - column: same slice and column, ordered by row (size R)
//! - slice: same row and column across all slices (size S)
//! - within slice: every process of one slice (size R·C)
//!
//! `ProcessGrid` is a cheap handle; clones share the communicators.

use std::rc::Rc;

use crate::config::GridOptions;
use crate::error::SpError;
use crate::parallel::{Comm, UniverseComm};

struct GridInner {
    world: UniverseComm,
    row_comm: UniverseComm,
    column_comm: UniverseComm,
    slice_comm: UniverseComm,
    within_slice_comm: UniverseComm,
    rows: usize,
    columns: usize,
    slices: usize,
    my_row: usize,
    my_column: usize,
    my_slice: usize,
}

#[derive(Clone)]
pub struct ProcessGrid {
    inner: Rc<GridInner>,
}

impl std::fmt::Debug for ProcessGrid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessGrid")
            .field("shape", &(self.inner.rows, self.inner.columns, self.inner.slices))
            .field("coords", &(self.inner.my_row, self.inner.my_column, self.inner.my_slice))
            .finish()
    }
}

impl ProcessGrid {
    /// Arrange the members of `world` as `rows × columns × slices`.
    pub fn new(
        world: UniverseComm,
        rows: usize,
        columns: usize,
        slices: usize,
    ) -> Result<Self, SpError> {
        let processes = world.size();
        if rows == 0 || columns == 0 || slices == 0 || rows * columns * slices != processes {
            return Err(SpError::InvalidTopology { rows, columns, slices, processes });
        }
        let rank = world.rank();
        let per_slice = rows * columns;
        let my_slice = rank / per_slice;
        let within = rank % per_slice;
        let my_row = within / columns;
        let my_column = within % columns;

        let row_comm = world.split(my_slice * rows + my_row, my_column);
        let column_comm = world.split(my_slice * columns + my_column, my_row);
        let slice_comm = world.split(within, my_slice);
        let within_slice_comm = world.split(my_slice, within);

        Ok(Self {
            inner: Rc::new(GridInner {
                world,
                row_comm,
                column_comm,
                slice_comm,
                within_slice_comm,
                rows,
                columns,
                slices,
                my_row,
                my_column,
                my_slice,
            }),
        })
    }

    /// Use `slices` slices and the most square `rows × columns` split of the
    /// remaining processes.
    pub fn with_slices(world: UniverseComm, slices: usize) -> Result<Self, SpError> {
        let processes = world.size();
        if slices == 0 || processes % slices != 0 {
            return Err(SpError::InvalidTopology { rows: 0, columns: 0, slices, processes });
        }
        let per_slice = processes / slices;
        let rows = (1..=per_slice)
            .take_while(|r| r * r <= per_slice)
            .filter(|r| per_slice % r == 0)
            .last()
            .unwrap_or(1);
        Self::new(world, rows, per_slice / rows, slices)
    }

    pub fn from_options(world: UniverseComm, options: &GridOptions) -> Result<Self, SpError> {
        Self::new(world, options.rows, options.columns, options.slices)
    }

    /// One-process grid.
    pub fn serial() -> Self {
        let inner = GridInner {
            world: UniverseComm::Serial,
            row_comm: UniverseComm::Serial,
            column_comm: UniverseComm::Serial,
            slice_comm: UniverseComm::Serial,
            within_slice_comm: UniverseComm::Serial,
            rows: 1,
            columns: 1,
            slices: 1,
            my_row: 0,
            my_column: 0,
            my_slice: 0,
        };
        Self { inner: Rc::new(inner) }
    }

    pub fn my_row(&self) -> usize {
        self.inner.my_row
    }
    pub fn my_column(&self) -> usize {
        self.inner.my_column
    }
    pub fn my_slice(&self) -> usize {
        self.inner.my_slice
    }
    pub fn num_rows(&self) -> usize {
        self.inner.rows
    }
    pub fn num_columns(&self) -> usize {
        self.inner.columns
    }
    pub fn num_slices(&self) -> usize {
        self.inner.slices
    }
    pub fn num_processes(&self) -> usize {
        self.inner.rows * self.inner.columns * self.inner.slices
    }
    pub fn is_root(&self) -> bool {
        self.inner.world.rank() == 0
    }
    pub fn world(&self) -> &UniverseComm {
        &self.inner.world
    }
    pub fn row_comm(&self) -> &UniverseComm {
        &self.inner.row_comm
    }
    pub fn column_comm(&self) -> &UniverseComm {
        &self.inner.column_comm
    }
    pub fn slice_comm(&self) -> &UniverseComm {
        &self.inner.slice_comm
    }
    pub fn within_slice_comm(&self) -> &UniverseComm {
        &self.inner.within_slice_comm
    }

    /// Whether two handles refer to the same grid.
    pub fn same_as(&self, other: &ProcessGrid) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Smallest dimension every block split of this grid divides.
    pub fn block_multiple(&self) -> usize {
        lcm(self.inner.rows, self.inner.columns)
    }

    /// Round `actual` up to a multiple of [`block_multiple`](Self::block_multiple).
    pub fn logical_dimension(&self, actual: usize) -> usize {
        let m = self.block_multiple();
        actual.max(1).div_ceil(m) * m
    }

    /// Owner of global entry `(row, column)` within a slice, as a
    /// within-slice rank.
    pub fn owner_of(&self, row: usize, column: usize, logical: usize) -> usize {
        let block_row = row / (logical / self.inner.rows);
        let block_column = column / (logical / self.inner.columns);
        block_row * self.inner.columns + block_column
    }

    /// Log the layout from the root process.
    pub fn write_info(&self) {
        if self.is_root() {
            tracing::info!(
                rows = self.inner.rows,
                columns = self.inner.columns,
                slices = self.inner.slices,
                backend = self.inner.world.backend(),
                "process grid"
            );
        }
    }
}

fn gcd(a: usize, b: usize) -> usize {
    if b == 0 { a } else { gcd(b, a % b) }
}

fn lcm(a: usize, b: usize) -> usize {
    a / gcd(a, b) * b
}
