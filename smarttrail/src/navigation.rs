use crate::config::NavigationConfig;
use crate::detection::{Detection, DetectionCategory};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Steering {
    Left,
    Forward,
    Right,
}

impl Steering {
    pub fn as_str(&self) -> &'static str {
        match self {
            Steering::Left => "LEFT",
            Steering::Forward => "FORWARD",
            Steering::Right => "RIGHT",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Avoidance {
    GoLeft,
    GoRight,
    Stop,
    KeepLeft,
    KeepRight,
}

impl Avoidance {
    pub fn message(&self) -> &'static str {
        match self {
            Avoidance::GoLeft => "OBSTACLE AHEAD - GO LEFT",
            Avoidance::GoRight => "OBSTACLE AHEAD - GO RIGHT",
            Avoidance::Stop => "OBSTACLE AHEAD - STOP",
            Avoidance::KeepLeft => "KEEP LEFT",
            Avoidance::KeepRight => "KEEP RIGHT",
        }
    }
}

/// Pixel-space box, truncated the same way the overlay draws it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelBox {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl PixelBox {
    pub fn from_detection(detection: &Detection) -> Self {
        Self {
            x1: detection.x1 as i32,
            y1: detection.y1 as i32,
            x2: detection.x2 as i32,
            y2: detection.y2 as i32,
        }
    }

    pub fn area(&self) -> i64 {
        (self.x2 - self.x1) as i64 * (self.y2 - self.y1) as i64
    }

    pub fn center_x(&self) -> i32 {
        (self.x1 + self.x2).div_euclid(2)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Target {
    pub bbox: PixelBox,
    pub steering: Steering,
    /// Steering arrow, from the robot's position to the target's feet.
    pub arrow_from: (i32, i32),
    pub arrow_to: (i32, i32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Guidance {
    pub target: Option<Target>,
    pub avoidance: Option<Avoidance>,
}

pub fn plan(
    detections: &[Detection],
    width: i32,
    height: i32,
    config: &NavigationConfig,
) -> Guidance {
    Guidance {
        target: pick_target(detections, width, height, config.dead_zone),
        avoidance: avoid_obstacles(detections, width, height, config.danger_zone_ratio),
    }
}

/// Follows the largest person in view.
fn pick_target(detections: &[Detection], width: i32, height: i32, dead_zone: i32) -> Option<Target> {
    let mut best: Option<PixelBox> = None;
    let mut max_area = 0;

    for detection in detections
        .iter()
        .filter(|d| d.category == DetectionCategory::Person)
    {
        let bbox = PixelBox::from_detection(detection);
        if bbox.area() > max_area {
            max_area = bbox.area();
            best = Some(bbox);
        }
    }

    let bbox = best?;
    let center_x = width.div_euclid(2);
    let target_cx = bbox.center_x();
    let deviation = target_cx - center_x;

    let steering = if deviation < -dead_zone {
        Steering::Left
    } else if deviation > dead_zone {
        Steering::Right
    } else {
        Steering::Forward
    };

    Some(Target {
        bbox,
        steering,
        arrow_from: (center_x, height - 50),
        arrow_to: (target_cx, bbox.y2),
    })
}

fn avoid_obstacles(
    detections: &[Detection],
    width: i32,
    height: i32,
    danger_zone_ratio: f32,
) -> Option<Avoidance> {
    let danger_zone_y = (height as f32 * danger_zone_ratio) as i32;
    let mid_left = width.div_euclid(3);
    let mid_right = (2 * width).div_euclid(3);

    let (mut left, mut center, mut right) = (false, false, false);

    for bbox in detections
        .iter()
        .filter(|d| d.category == DetectionCategory::Obstacle)
        .map(PixelBox::from_detection)
        .filter(|bbox| bbox.y2 >= danger_zone_y)
    {
        let ocx = bbox.center_x();
        if ocx < mid_left {
            left = true;
        } else if ocx > mid_right {
            right = true;
        } else {
            center = true;
        }
    }

    match (left, center, right) {
        (false, true, _) => Some(Avoidance::GoLeft),
        (true, true, false) => Some(Avoidance::GoRight),
        (true, true, true) => Some(Avoidance::Stop),
        (true, false, false) => Some(Avoidance::KeepRight),
        (false, false, true) => Some(Avoidance::KeepLeft),
        _ => None,
    }
}
