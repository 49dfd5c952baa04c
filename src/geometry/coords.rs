//! Viewport to device coordinate mapping

use crate::geometry::{Rect, Size};
use crate::session::rotation::Rotation;

/// A position in device pixels, before rotation
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DevicePoint {
    /// Horizontal device pixel
    pub x: f64,
    /// Vertical device pixel
    pub y: f64,
}

/// Maps a viewport position over the rendered surface to device pixels
///
/// The position is normalized against `surface` and clamped to its edges,
/// so points outside land on the nearest border. A surface with no area
/// maps everything to the origin.
pub fn map_to_device(x: f64, y: f64, surface: Rect, rotation: Rotation, device: Size) -> DevicePoint {
    if surface.width <= 0.0 || surface.height <= 0.0 {
        return DevicePoint::default();
    }

    let mut nx = ((x - surface.x) / surface.width).clamp(0.0, 1.0);
    let mut ny = ((y - surface.y) / surface.height).clamp(0.0, 1.0);

    if rotation.swaps_axes() {
        std::mem::swap(&mut nx, &mut ny);
    }

    match rotation.quarter_turns() {
        1 => ny = 1.0 - ny,
        2 => {
            nx = 1.0 - nx;
            ny = 1.0 - ny;
        }
        3 => nx = 1.0 - nx,
        _ => {}
    }

    DevicePoint {
        x: nx * device.width,
        y: ny * device.height,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rotation(turns: u8) -> Rotation {
        Rotation::try_from(turns).unwrap()
    }

    #[test]
    fn test_identity_rotation() {
        let surface = Rect::new(10.0, 20.0, 100.0, 200.0);
        let device = Size::new(1000.0, 2000.0);

        let point = map_to_device(60.0, 120.0, surface, rotation(0), device);
        assert_eq!(point, DevicePoint { x: 500.0, y: 1000.0 });

        let point = map_to_device(10.0, 20.0, surface, rotation(0), device);
        assert_eq!(point, DevicePoint { x: 0.0, y: 0.0 });
    }

    #[test]
    fn test_upright_corners() {
        let surface = Rect::new(10.0, 20.0, 100.0, 200.0);
        let device = Size::new(1080.0, 2400.0);
        let corners = [
            ((10.0, 20.0), (0.0, 0.0)),
            ((110.0, 20.0), (1080.0, 0.0)),
            ((10.0, 220.0), (0.0, 2400.0)),
            ((110.0, 220.0), (1080.0, 2400.0)),
        ];

        for ((x, y), (dx, dy)) in corners {
            let point = map_to_device(x, y, surface, rotation(0), device);
            assert_eq!(point, DevicePoint { x: dx, y: dy });
        }
    }

    #[test]
    fn test_half_turn_maps_origin_to_far_corner() {
        let surface = Rect::new(0.0, 0.0, 100.0, 200.0);
        let device = Size::new(50.0, 100.0);

        let point = map_to_device(0.0, 0.0, surface, rotation(2), device);
        assert_eq!(point, DevicePoint { x: 50.0, y: 100.0 });
    }

    #[test]
    fn test_quarter_turns() {
        let surface = Rect::new(0.0, 0.0, 200.0, 100.0);
        let device = Size::new(1000.0, 2000.0);

        // Top-left of a clockwise-rotated surface is the device's bottom-left
        let point = map_to_device(0.0, 0.0, surface, rotation(1), device);
        assert_eq!(point, DevicePoint { x: 0.0, y: 2000.0 });

        let point = map_to_device(0.0, 0.0, surface, rotation(3), device);
        assert_eq!(point, DevicePoint { x: 1000.0, y: 0.0 });

        // Right edge midpoint under one turn
        let point = map_to_device(200.0, 50.0, surface, rotation(1), device);
        assert_eq!(point, DevicePoint { x: 500.0, y: 0.0 });
    }

    #[test]
    fn test_points_outside_are_clamped() {
        let surface = Rect::new(0.0, 0.0, 100.0, 100.0);
        let device = Size::new(720.0, 1280.0);

        let point = map_to_device(-50.0, 500.0, surface, rotation(0), device);
        assert_eq!(point, DevicePoint { x: 0.0, y: 1280.0 });
    }

    #[test]
    fn test_results_stay_inside_device() {
        let surface = Rect::new(5.0, 5.0, 90.0, 160.0);
        let device = Size::new(1080.0, 2400.0);

        for turns in 0..4 {
            for step in 0..=20 {
                let x = -10.0 + f64::from(step) * 6.0;
                let y = -10.0 + f64::from(step) * 10.0;
                let point = map_to_device(x, y, surface, rotation(turns), device);
                assert!((0.0..=device.width).contains(&point.x));
                assert!((0.0..=device.height).contains(&point.y));
            }
        }
    }

    #[test]
    fn test_empty_surface_maps_to_origin() {
        let point = map_to_device(
            40.0,
            40.0,
            Rect::new(0.0, 0.0, 0.0, 100.0),
            rotation(1),
            Size::new(1080.0, 2400.0),
        );
        assert_eq!(point, DevicePoint::default());
    }
}
