//! Enumerate the block windows that tile a raster.

use super::PixelWindow;

/// Block layout over a raster.
///
/// Blocks are laid out top-down, left-to-right. Edge blocks are truncated to
/// the raster so windows never overlap and never extend past it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockGrid {
    /// Raster width in pixels
    pub width: usize,

    /// Raster height in pixels
    pub height: usize,

    /// Block width in pixels
    pub block_width: usize,

    /// Block height in pixels
    pub block_height: usize,
}

impl BlockGrid {
    pub fn new(width: usize, height: usize, block_width: usize, block_height: usize) -> Self {
        Self {
            width,
            height,
            block_width: block_width.max(1),
            block_height: block_height.max(1),
        }
    }

    /// Number of block columns.
    pub fn blocks_x(&self) -> usize {
        self.width.div_ceil(self.block_width)
    }

    /// Number of block rows.
    pub fn blocks_y(&self) -> usize {
        self.height.div_ceil(self.block_height)
    }

    /// Total number of blocks.
    pub fn num_blocks(&self) -> usize {
        self.blocks_x() * self.blocks_y()
    }

    /// Window of the block at (row_idx, col_idx).
    pub fn window(&self, row_idx: usize, col_idx: usize) -> PixelWindow {
        let x = col_idx * self.block_width;
        let y = row_idx * self.block_height;
        let width = self.block_width.min(self.width - x);
        let height = self.block_height.min(self.height - y);
        PixelWindow::new(x, y, width, height)
    }

    /// Lazily enumerate all block windows.
    pub fn windows(&self) -> impl Iterator<Item = PixelWindow> + '_ {
        (0..self.blocks_y()).flat_map(move |row_idx| {
            (0..self.blocks_x()).map(move |col_idx| self.window(row_idx, col_idx))
        })
    }
}
