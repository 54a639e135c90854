use std::fmt;
use std::str::FromStr;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

/// Object classes the summary can be configured to care about.
///
/// Classifiers report free-form labels; only these parse into an `ObjectLabel`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectLabel {
    Person,
    Bicycle,
    Car,
    Motorcycle,
    Bus,
    Truck,
}

impl ObjectLabel {
    pub const ALL: [ObjectLabel; 6] = [
        ObjectLabel::Person,
        ObjectLabel::Bicycle,
        ObjectLabel::Car,
        ObjectLabel::Motorcycle,
        ObjectLabel::Bus,
        ObjectLabel::Truck,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectLabel::Person => "person",
            ObjectLabel::Bicycle => "bicycle",
            ObjectLabel::Car => "car",
            ObjectLabel::Motorcycle => "motorcycle",
            ObjectLabel::Bus => "bus",
            ObjectLabel::Truck => "truck",
        }
    }
}

impl fmt::Display for ObjectLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ObjectLabel {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim();
        ObjectLabel::ALL
            .into_iter()
            .find(|label| label.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| anyhow!("unknown object label '{}'", wanted))
    }
}

/// Axis-aligned box in pixel coordinates, `(x1, y1)` top-left, `(x2, y2)` bottom-right.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl BoundingBox {
    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn area(&self) -> i64 {
        let w = (self.x2 - self.x1).max(0) as i64;
        let h = (self.y2 - self.y1).max(0) as i64;
        w * h
    }

    /// Intersection over union; 0.0 for disjoint or empty boxes.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let inter = BoundingBox {
            x1: self.x1.max(other.x1),
            y1: self.y1.max(other.y1),
            x2: self.x2.min(other.x2),
            y2: self.y2.min(other.y2),
        }
        .area();
        let union = self.area() + other.area() - inter;
        if union <= 0 {
            0.0
        } else {
            inter as f32 / union as f32
        }
    }
}

/// Unfiltered classifier output.
#[derive(Clone, Debug, PartialEq)]
pub struct RawDetection {
    pub label: String,
    pub confidence: f32,
    pub bbox: BoundingBox,
}

impl RawDetection {
    pub fn new(label: impl Into<String>, confidence: f32, bbox: BoundingBox) -> Self {
        Self {
            label: label.into(),
            confidence,
            bbox,
        }
    }
}

/// Detection that passed the object gate.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub label: ObjectLabel,
    pub confidence: f32,
    pub bbox: BoundingBox,
}
