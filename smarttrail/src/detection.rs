use std::collections::HashSet;

/// BGR colour, the channel order OpenCV draws with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Color {
    pub blue: u8,
    pub green: u8,
    pub red: u8,
}

impl Color {
    pub const fn bgr(blue: u8, green: u8, red: u8) -> Self {
        Self { blue, green, red }
    }
}

pub const PERSON_COLOR: Color = Color::bgr(0, 255, 0);
pub const OBSTACLE_COLOR: Color = Color::bgr(0, 0, 255);
pub const DEFAULT_COLOR: Color = Color::bgr(255, 255, 0);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionCategory {
    Person,
    Obstacle,
    Other,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub class_label: String,
    pub confidence: f32,
    pub category: DetectionCategory,
    pub color: Color,
}

impl Detection {
    pub fn caption(&self) -> String {
        format!("{} {:.2}", self.class_label, self.confidence)
    }
}

/// Splits labels into the person to follow, obstacles, and everything else.
#[derive(Debug, Clone)]
pub struct Categorizer {
    obstacle_labels: HashSet<String>,
}

impl Categorizer {
    pub fn new<I, S>(obstacle_labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            obstacle_labels: obstacle_labels
                .into_iter()
                .map(|label| label.as_ref().to_lowercase())
                .collect(),
        }
    }

    pub fn categorize(&self, label: &str) -> DetectionCategory {
        let label = label.to_lowercase();
        if label == "person" {
            DetectionCategory::Person
        } else if self.obstacle_labels.contains(&label) {
            DetectionCategory::Obstacle
        } else {
            DetectionCategory::Other
        }
    }

    /// Person and obstacle colours are fixed so the renter can read the
    /// overlay at a glance; other classes keep their label colour.
    pub fn color_for(&self, category: DetectionCategory, label_color: Option<Color>) -> Color {
        match category {
            DetectionCategory::Person => PERSON_COLOR,
            DetectionCategory::Obstacle => OBSTACLE_COLOR,
            DetectionCategory::Other => label_color.unwrap_or(DEFAULT_COLOR),
        }
    }
}

/// What the detection side currently knows about the scene.
#[derive(Debug, Clone, PartialEq)]
pub enum DetectorState {
    Unavailable,
    Ready(Vec<Detection>),
    Failed(String),
}

impl DetectorState {
    pub fn is_available(&self) -> bool {
        !matches!(self, DetectorState::Unavailable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categorize_is_case_insensitive() {
        let categorizer = Categorizer::new(["Chair", "traffic light"]);

        assert_eq!(categorizer.categorize("Person"), DetectionCategory::Person);
        assert_eq!(categorizer.categorize("chair"), DetectionCategory::Obstacle);
        assert_eq!(
            categorizer.categorize("Traffic Light"),
            DetectionCategory::Obstacle
        );
        assert_eq!(categorizer.categorize("kite"), DetectionCategory::Other);
    }

    #[test]
    fn test_color_for_category() {
        let categorizer = Categorizer::new(["chair"]);
        let label_color = Some(Color::bgr(1, 2, 3));

        assert_eq!(
            categorizer.color_for(DetectionCategory::Person, label_color),
            PERSON_COLOR
        );
        assert_eq!(
            categorizer.color_for(DetectionCategory::Obstacle, label_color),
            OBSTACLE_COLOR
        );
        assert_eq!(
            categorizer.color_for(DetectionCategory::Other, label_color),
            Color::bgr(1, 2, 3)
        );
        assert_eq!(
            categorizer.color_for(DetectionCategory::Other, None),
            DEFAULT_COLOR
        );
    }
}
