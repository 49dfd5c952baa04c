//! Surface layout
//!
//! The video keeps the device aspect ratio and is fitted into the container
//! along whichever axis is tighter, minus a border. Odd rotations exchange
//! the rendered width and height; the surface is anchored at the container
//! center and rotated clockwise about it.

use crate::geometry::{Rect, Size};
use crate::session::rotation::Rotation;

/// Border in pixels kept free around the surface
pub const DEFAULT_BORDER_INSET: f64 = 6.0;

/// Where and how the video surface is drawn
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurfaceLayout {
    /// Rendered width before the rotation transform is applied
    pub width: f64,
    /// Rendered height before the rotation transform is applied
    pub height: f64,
    /// Clockwise rotation about the surface center
    pub rotation: Rotation,
}

impl SurfaceLayout {
    /// Rotation of the transform in degrees
    pub fn rotation_degrees(&self) -> u32 {
        self.rotation.degrees()
    }

    /// Unrotated surface rectangle centered in the container
    pub fn centered_in(&self, container: Size) -> Rect {
        Rect::new(
            (container.width - self.width) / 2.0,
            (container.height - self.height) / 2.0,
            self.width,
            self.height,
        )
    }
}

/// Fits the device frame into the container
///
/// Returns `None` when either size has a zero side, in which case the
/// previous layout should be kept.
pub fn compute_layout(
    container: Size,
    device: Size,
    rotation: Rotation,
    border: f64,
) -> Option<SurfaceLayout> {
    if container.is_empty() || device.is_empty() {
        return None;
    }

    // Both sides must stay inside the border, so compare against the inset
    let available_width = (container.width - border).max(0.0);
    let available_height = (container.height - border).max(0.0);
    let scale = (available_width / device.width).min(available_height / device.height);
    let (width, height) = (device.width * scale, device.height * scale);

    let (width, height) = if rotation.swaps_axes() {
        (height, width)
    } else {
        (width, height)
    };

    Some(SurfaceLayout {
        width,
        height,
        rotation,
    })
}
