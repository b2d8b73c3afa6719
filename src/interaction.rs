//! Pointer and window input mapping.
//!
//! These functions are pure: the same input always gives the same output,
//! which is what keeps box placement stateless.

use winit::event::{MouseButton, MouseScrollDelta};

use crate::camera::DragMode;

/// Pixels of a high-resolution wheel that count as one line.
const PIXELS_PER_LINE: f32 = 100.0;

/// Map a pointer position in pixels to `[-1, 1]` on both axes, Y pointing up.
pub fn normalize_pointer(x: f64, y: f64, width: u32, height: u32) -> (f32, f32) {
    let width = width.max(1) as f64;
    let height = height.max(1) as f64;
    let nx = x / width * 2.0 - 1.0;
    let ny = -(y / height * 2.0 - 1.0);
    (nx as f32, ny as f32)
}

/// Scale normalized coordinates into a world-space offset of `±range`.
pub fn pointer_to_world((nx, ny): (f32, f32), range: f32) -> (f32, f32) {
    (nx * range, ny * range)
}

/// Which orbit gesture a mouse button starts, if any.
pub fn drag_mode(button: MouseButton) -> Option<DragMode> {
    match button {
        MouseButton::Left => Some(DragMode::Rotate),
        MouseButton::Right | MouseButton::Middle => Some(DragMode::Pan),
        _ => None,
    }
}

/// Wheel movement in lines, positive away from the user.
pub fn wheel_steps(delta: MouseScrollDelta) -> f32 {
    match delta {
        MouseScrollDelta::LineDelta(_, y) => y,
        MouseScrollDelta::PixelDelta(pos) => pos.y as f32 / PIXELS_PER_LINE,
    }
}
