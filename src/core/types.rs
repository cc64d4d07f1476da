//! Shared types used across Sightline modules
//!
//! Contains oracle message structures and the geometry types shared by the
//! annotator, the executor and the drivers.

use serde::{Deserialize, Serialize};

/// A message sent to the oracle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Role of the message sender (user, assistant, system)
    pub role: String,
    /// Content of the message
    pub content: String,
    /// Base64-encoded PNG images attached to the message
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,
}

impl Message {
    /// Create a new user message
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
            images: Vec::new(),
        }
    }

    /// Create a new system message
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
            images: Vec::new(),
        }
    }

    /// Attach a base64 PNG image
    pub fn with_image(mut self, image_base64: impl Into<String>) -> Self {
        self.images.push(image_base64.into());
        self
    }
}

/// Viewport-relative rectangle in CSS pixels
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl BoundingBox {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Center point of the box
    pub fn center(&self) -> Point {
        Point {
            x: self.x + self.width / 2.0,
            y: self.y + self.height / 2.0,
        }
    }

    /// Whether the box has a usable area
    pub fn has_area(&self) -> bool {
        self.width > 0.0 && self.height > 0.0
    }
}

/// A pixel position
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Size of the current layout viewport
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: f64,
    pub height: f64,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1280.0,
            height: 720.0,
        }
    }
}

impl Viewport {
    /// Convert a percentage-of-viewport position into pixels
    pub fn percent_to_pixels(&self, x_percent: f64, y_percent: f64) -> Point {
        Point {
            x: (x_percent.clamp(0.0, 100.0) / 100.0 * self.width).round(),
            y: (y_percent.clamp(0.0, 100.0) / 100.0 * self.height).round(),
        }
    }

    /// Convert a pixel position back into percentages of the viewport
    pub fn pixels_to_percent(&self, point: Point) -> (f64, f64) {
        if self.width <= 0.0 || self.height <= 0.0 {
            return (0.0, 0.0);
        }
        (
            point.x / self.width * 100.0,
            point.y / self.height * 100.0,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent_round_trip_within_a_pixel() {
        let viewports = [
            Viewport::default(),
            Viewport {
                width: 375.0,
                height: 812.0,
            },
            Viewport {
                width: 1917.0,
                height: 1033.0,
            },
        ];
        for vp in viewports {
            for (x, y) in [(0.0, 0.0), (12.5, 87.3), (50.0, 50.0), (99.9, 0.1), (100.0, 100.0)] {
                let px = vp.percent_to_pixels(x, y);
                let (bx, by) = vp.pixels_to_percent(px);
                let again = vp.percent_to_pixels(bx, by);
                assert!((px.x - again.x).abs() <= 1.0);
                assert!((px.y - again.y).abs() <= 1.0);
                assert!((bx / 100.0 * vp.width - x / 100.0 * vp.width).abs() <= 1.0);
            }
        }
    }

    #[test]
    fn test_bounding_box_center() {
        let bbox = BoundingBox::new(10.0, 20.0, 100.0, 40.0);
        assert_eq!(bbox.center(), Point::new(60.0, 40.0));
        assert!(bbox.has_area());
        assert!(!BoundingBox::default().has_area());
    }

    #[test]
    fn test_message_with_image() {
        let msg = Message::user("look").with_image("aGVsbG8=");
        assert_eq!(msg.role, "user");
        assert_eq!(msg.images.len(), 1);
    }
}
