//! Uniform bucket grid for neighbor search.
//!
//! The grid covers the bounding volume with cubic cells of side `h` (the
//! kernel radius), so every neighbor within `h` of a particle lies in the
//! 3x3x3 block of cells around it. Each cell stores up to `capacity`
//! particle indices in a flat slot array; the grid is rebuilt from scratch
//! for every predicted-position snapshot.
//!
//! A cell that is already full drops further particles for that build. This
//! bounds memory and is what makes the parallel build lock-free: an insert
//! is one atomic increment plus one store, with no growth and no retry. The
//! number of dropped insertions is kept so callers can report it.

use bevy::log::debug;
use bevy::prelude::*;
use rayon::prelude::*;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use super::boundary::BoundingVolume;
use super::error::{FluidError, FluidResult};

/// Upper limit on `cells * capacity` slots (256 MiB of indices).
const MAX_GRID_SLOTS: usize = 1 << 26;

/// Neighboring cell offsets for the 3x3x3 neighborhood, self included.
static NEIGHBOR_OFFSETS: [IVec3; 27] = [
    IVec3::new(-1, -1, -1),
    IVec3::new(0, -1, -1),
    IVec3::new(1, -1, -1),
    IVec3::new(-1, 0, -1),
    IVec3::new(0, 0, -1),
    IVec3::new(1, 0, -1),
    IVec3::new(-1, 1, -1),
    IVec3::new(0, 1, -1),
    IVec3::new(1, 1, -1),
    IVec3::new(-1, -1, 0),
    IVec3::new(0, -1, 0),
    IVec3::new(1, -1, 0),
    IVec3::new(-1, 0, 0),
    IVec3::new(0, 0, 0),
    IVec3::new(1, 0, 0),
    IVec3::new(-1, 1, 0),
    IVec3::new(0, 1, 0),
    IVec3::new(1, 1, 0),
    IVec3::new(-1, -1, 1),
    IVec3::new(0, -1, 1),
    IVec3::new(1, -1, 1),
    IVec3::new(-1, 0, 1),
    IVec3::new(0, 0, 1),
    IVec3::new(1, 0, 1),
    IVec3::new(-1, 1, 1),
    IVec3::new(0, 1, 1),
    IVec3::new(1, 1, 1),
];

/// Bounded-capacity uniform grid over particle positions.
#[derive(Debug, Default)]
pub struct SpatialGrid {
    /// Minimum corner of the grid.
    origin: Vec3,
    /// Side of each cubic cell.
    cell_size: f32,
    /// Number of cells along each axis.
    dims: UVec3,
    /// Slots per cell.
    capacity: usize,
    /// Insertions per cell since the last clear. May exceed `capacity`
    /// after a parallel build; readers clamp.
    counts: Vec<AtomicU32>,
    /// `cells * capacity` particle indices, cell-major.
    slots: Vec<AtomicU32>,
    /// Cell of each particle in the last build.
    particle_cells: Vec<UVec3>,
    /// Insertions dropped by full cells in the last build.
    dropped: usize,
}

impl SpatialGrid {
    /// Create a grid covering `bounds` with cells of side `cell_size`.
    pub fn new(bounds: &BoundingVolume, cell_size: f32, capacity: u32) -> FluidResult<Self> {
        let mut grid = Self::default();
        grid.configure(bounds, cell_size, capacity)?;
        Ok(grid)
    }

    /// Number of cells per axis for a domain: `ceil(extent / h)`, at least one.
    pub fn dims_for(bounds: &BoundingVolume, cell_size: f32) -> UVec3 {
        (bounds.extent() / cell_size)
            .ceil()
            .max(Vec3::ONE)
            .as_uvec3()
    }

    /// Fit the grid to a domain. Storage is reallocated only when the cell
    /// count or capacity changes; contents are invalid until the next build.
    pub fn configure(
        &mut self,
        bounds: &BoundingVolume,
        cell_size: f32,
        capacity: u32,
    ) -> FluidResult<()> {
        let dims = Self::dims_for(bounds, cell_size);
        let capacity = capacity as usize;
        let cells = (dims.x as usize)
            .checked_mul(dims.y as usize)
            .and_then(|c| c.checked_mul(dims.z as usize))
            .unwrap_or(usize::MAX);
        match cells.checked_mul(capacity) {
            Some(slots) if slots <= MAX_GRID_SLOTS => {}
            _ => return Err(FluidError::GridTooLarge { cells, capacity }),
        }

        self.origin = bounds.min;
        self.cell_size = cell_size;
        if dims != self.dims || capacity != self.capacity {
            debug!(
                "Resizing spatial grid to {}x{}x{} cells, {} slots each",
                dims.x, dims.y, dims.z, capacity
            );
            self.dims = dims;
            self.capacity = capacity;
            self.counts = (0..cells).map(|_| AtomicU32::new(0)).collect();
            self.slots = (0..cells * capacity).map(|_| AtomicU32::new(0)).collect();
        }
        self.particle_cells.clear();
        self.dropped = 0;
        Ok(())
    }

    pub fn dims(&self) -> UVec3 {
        self.dims
    }

    pub fn cell_count(&self) -> usize {
        self.counts.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn cell_size(&self) -> f32 {
        self.cell_size
    }

    /// Insertions dropped by full cells during the last build.
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    /// Row-major cell index: `i + j*gridX + k*gridX*gridY`.
    #[inline]
    pub fn linear_index(&self, i: u32, j: u32, k: u32) -> usize {
        let (gx, gy) = (self.dims.x as usize, self.dims.y as usize);
        i as usize + j as usize * gx + k as usize * gx * gy
    }

    /// Cell containing a position, clamped into the grid.
    #[inline]
    pub fn cell_coords(&self, position: Vec3) -> UVec3 {
        let cell = ((position - self.origin) / self.cell_size).floor().as_ivec3();
        let max = self.dims.as_ivec3() - IVec3::ONE;
        cell.clamp(IVec3::ZERO, max).as_uvec3()
    }

    /// Cell a particle was binned into by the last build.
    pub fn cell_of(&self, particle: usize) -> UVec3 {
        self.particle_cells[particle]
    }

    /// Reset every cell to empty.
    pub fn clear(&mut self) {
        for count in &mut self.counts {
            *count.get_mut() = 0;
        }
        self.dropped = 0;
    }

    /// Bin particle positions, one after another.
    pub fn build(&mut self, positions: &[Vec3]) {
        self.clear();
        let mut cells = std::mem::take(&mut self.particle_cells);
        cells.clear();
        cells.extend(positions.iter().map(|&p| self.cell_coords(p)));
        self.particle_cells = cells;

        let capacity = self.capacity;
        for i in 0..self.particle_cells.len() {
            let cell = self.particle_cells[i];
            let idx = self.linear_index(cell.x, cell.y, cell.z);
            let count = self.counts[idx].get_mut();
            let slot = *count as usize;
            if slot < capacity {
                *self.slots[idx * capacity + slot].get_mut() = i as u32;
                *count += 1;
            } else {
                self.dropped += 1;
            }
        }

        self.report_overflow(positions.len());
    }

    /// Bin particle positions on the rayon pool. Each insertion claims a
    /// slot with one atomic increment; order within a cell is unspecified.
    pub fn par_build(&mut self, positions: &[Vec3]) {
        self.clear();
        let mut cells = std::mem::take(&mut self.particle_cells);
        cells.resize(positions.len(), UVec3::ZERO);
        {
            let grid = &*self;
            cells
                .par_iter_mut()
                .zip(positions.par_iter())
                .for_each(|(cell, &p)| *cell = grid.cell_coords(p));
        }
        self.particle_cells = cells;

        let dropped = AtomicUsize::new(0);
        let grid = &*self;
        grid.particle_cells
            .par_iter()
            .enumerate()
            .for_each(|(i, cell)| {
                let idx = grid.linear_index(cell.x, cell.y, cell.z);
                let slot = grid.counts[idx].fetch_add(1, Ordering::Relaxed) as usize;
                if slot < grid.capacity {
                    grid.slots[idx * grid.capacity + slot].store(i as u32, Ordering::Relaxed);
                } else {
                    dropped.fetch_add(1, Ordering::Relaxed);
                }
            });
        self.dropped = dropped.into_inner();

        self.report_overflow(positions.len());
    }

    fn report_overflow(&self, particle_count: usize) {
        if self.dropped > 0 {
            debug!(
                "Spatial grid dropped {} of {} particles from full cells (capacity {})",
                self.dropped, particle_count, self.capacity
            );
        }
    }

    /// Particle indices stored in one cell.
    pub fn cell_members(&self, idx: usize) -> impl Iterator<Item = usize> + '_ {
        let len = (self.counts[idx].load(Ordering::Relaxed) as usize).min(self.capacity);
        let start = idx * self.capacity;
        self.slots[start..start + len]
            .iter()
            .map(|slot| slot.load(Ordering::Relaxed) as usize)
    }

    /// Candidate neighbors of a particle: every index stored in the 27 cells
    /// around its own, itself included. Candidates are not filtered by
    /// distance.
    pub fn neighbors_of(&self, particle: usize) -> impl Iterator<Item = usize> + '_ {
        let cell = self.particle_cells[particle].as_ivec3();
        let dims = self.dims.as_ivec3();
        NEIGHBOR_OFFSETS
            .iter()
            .filter_map(move |offset| {
                let c = cell + *offset;
                if c.cmpge(IVec3::ZERO).all() && c.cmplt(dims).all() {
                    Some(self.linear_index(c.x as u32, c.y as u32, c.z as u32))
                } else {
                    None
                }
            })
            .flat_map(move |idx| self.cell_members(idx))
    }
}
