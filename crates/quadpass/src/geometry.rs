//! The shared index vertex array.
//!
//! Every pass draws the same kind of geometry: a triangle strip over a
//! `Mesh.x` by `Mesh.y` grid, instanced `Grid.x * Grid.y * Grid.z` times.
//! The vertex shader derives positions from two integer attributes (vertex
//! index and instance index), so one buffer of consecutive integers serves
//! both and only ever grows.

use quadpass_test_utils::{GlBuffer, GlContext, GlVertexArray};

use crate::error::{DrawError, DrawResult};

/// Largest vertex or instance count a single draw can issue.
pub const MAX_COUNT: u32 = i32::MAX as u32;

/// Vertices in the strip covering `mesh`, including the degenerate
/// triangles joining rows. `None` when the count exceeds [`MAX_COUNT`].
pub fn vertex_count(mesh: [u32; 2]) -> Option<u32> {
    let row = mesh[0].checked_mul(2)?.checked_add(3)?;
    let count = row.checked_mul(mesh[1])?.saturating_sub(1);
    (count <= MAX_COUNT).then_some(count)
}

/// `None` when the product exceeds [`MAX_COUNT`].
pub fn instance_count(grid: [u32; 3]) -> Option<u32> {
    let count = grid[0].checked_mul(grid[1])?.checked_mul(grid[2])?;
    (count <= MAX_COUNT).then_some(count)
}

/// Vertex array with attribute 0 (per vertex) and attribute 1 (per
/// instance) both reading `0, 1, 2, ...` from one buffer.
#[derive(Debug)]
pub struct IndexArray {
    vertex_array: GlVertexArray,
    buffer: GlBuffer,
    capacity: u32,
}

impl IndexArray {
    pub fn new(gl: &dyn GlContext, capacity: u32) -> DrawResult<Self> {
        let vertex_array = gl.create_vertex_array().map_err(DrawError::Gl)?;
        let buffer = gl.create_buffer().map_err(DrawError::Gl)?;
        let mut array = Self {
            vertex_array,
            buffer,
            capacity: 0,
        };
        array.ensure(gl, capacity.max(1));
        Ok(array)
    }

    /// Grow the buffer to hold at least `needed` indices. Grows to twice
    /// the request so a slowly increasing mesh does not reallocate every
    /// frame.
    pub fn ensure(&mut self, gl: &dyn GlContext, needed: u32) {
        if needed <= self.capacity {
            return;
        }
        let capacity = needed.saturating_mul(2).min(MAX_COUNT);
        let indices: Vec<i32> = (0..capacity as i32).collect();
        gl.buffer_data(
            glow::ARRAY_BUFFER,
            self.buffer,
            bytemuck::cast_slice(&indices),
            glow::STATIC_DRAW,
        );
        gl.int_attribute(self.vertex_array, self.buffer, 0, 0);
        gl.int_attribute(self.vertex_array, self.buffer, 1, 1);
        tracing::debug!(from = self.capacity, to = capacity, "grew index array");
        self.capacity = capacity;
    }

    pub fn bind(&self, gl: &dyn GlContext) {
        gl.bind_vertex_array(Some(self.vertex_array));
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn delete(&self, gl: &dyn GlContext) {
        gl.delete_vertex_array(self.vertex_array);
        gl.delete_buffer(self.buffer);
    }
}
