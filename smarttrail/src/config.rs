use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(deserialize_with = "deserialize_log_level")]
    pub log_level: LogLevel,
    pub prediction_service: PredictionServiceConfig,
    pub prediction_polling: PredictionPollingConfig,
    pub camera: CameraConfig,
    #[serde(default)]
    pub navigation: NavigationConfig,
    #[serde(default)]
    pub robot: RobotConfig,
}

fn deserialize_log_level<'de, D>(deserializer: D) -> Result<LogLevel, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    s.try_into().map_err(serde::de::Error::custom)
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn get_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct PredictionServiceConfig {
    pub host: String,
    pub port: u16,
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f32,
}

fn default_min_confidence() -> f32 {
    0.4
}

impl PredictionServiceConfig {
    pub fn get_address(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct PredictionPollingConfig {
    #[serde(default = "default_prediction_fps")]
    pub prediction_fps: u64,
    pub max_retries: u64,
    /// Delay before the first retry, in milliseconds.
    pub initial_delay: u64,
    pub backoff_factor: u32,
    pub max_consecutive_failures: u64,
    /// Deadline for a single prediction round trip, in milliseconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,
}

fn default_prediction_fps() -> u64 {
    10
}

fn default_request_timeout() -> u64 {
    1000
}

impl PredictionPollingConfig {
    pub fn get_prediction_delay_ms(&self) -> u64 {
        fps_to_delay_ms(self.prediction_fps)
    }
}

#[derive(Clone, Deserialize, Debug)]
pub struct CameraConfig {
    #[serde(default)]
    pub device_index: i32,
    #[serde(default = "default_frame_width")]
    pub frame_width: i32,
    #[serde(default = "default_frame_height")]
    pub frame_height: i32,
    #[serde(default = "default_stream_fps")]
    pub stream_fps: u64,
}

fn default_frame_width() -> i32 {
    640
}

fn default_frame_height() -> i32 {
    480
}

fn default_stream_fps() -> u64 {
    30
}

fn fps_to_delay_ms(fps: u64) -> u64 {
    (1000.0 / fps.max(1) as f64).round() as u64
}

impl CameraConfig {
    pub fn get_stream_delay_ms(&self) -> u64 {
        fps_to_delay_ms(self.stream_fps)
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device_index: 0,
            frame_width: default_frame_width(),
            frame_height: default_frame_height(),
            stream_fps: default_stream_fps(),
        }
    }
}

#[derive(Clone, Deserialize, Debug)]
#[serde(default)]
pub struct NavigationConfig {
    /// Horizontal distance in pixels from the frame centre within which the
    /// target counts as straight ahead.
    pub dead_zone: i32,
    /// Obstacles whose bottom edge is below this fraction of the frame height
    /// are close enough to steer around.
    pub danger_zone_ratio: f32,
    pub obstacle_labels: Vec<String>,
}

const DEFAULT_OBSTACLE_LABELS: [&str; 15] = [
    "obstacle",
    "chair",
    "bench",
    "table",
    "backpack",
    "handbag",
    "suitcase",
    "bicycle",
    "motorbike",
    "car",
    "truck",
    "dog",
    "cat",
    "traffic light",
    "stop sign",
];

impl Default for NavigationConfig {
    fn default() -> Self {
        Self {
            dead_zone: 50,
            danger_zone_ratio: 0.6,
            obstacle_labels: DEFAULT_OBSTACLE_LABELS
                .iter()
                .map(|label| label.to_string())
                .collect(),
        }
    }
}

#[derive(Clone, Deserialize, Debug)]
#[serde(default)]
pub struct RobotConfig {
    pub initial_battery: f64,
    /// Battery percentage drained per status poll while following.
    pub drain_per_poll: f64,
}

impl Default for RobotConfig {
    fn default() -> Self {
        Self {
            initial_battery: 98.0,
            drain_per_poll: 0.01,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub enum Environment {
    Local,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Local => "local",
            Environment::Production => "production",
        }
    }
}

impl TryFrom<String> for Environment {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "production" => Ok(Self::Production),
            other => Err(format!(
                "{} is not a supported environment. Use either `local` or `production`.",
                other
            )),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub enum LogLevel {
    Debug,
    Info,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
        }
    }
}

impl TryFrom<String> for LogLevel {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            other => Err(format!(
                "{} is not a supported minimum log level. Use either `debug` or `info`.",
                other
            )),
        }
    }
}

pub fn get_configuration() -> Result<Config, config::ConfigError> {
    let base_path = std::env::current_dir()
        .map_err(|e| config::ConfigError::Message(format!("no current directory: {}", e)))?;
    let configuration_directory = base_path.join("configuration");

    let environment: Environment = std::env::var("APP_ENVIRONMENT")
        .unwrap_or_else(|_| "local".into())
        .try_into()
        .map_err(config::ConfigError::Message)?;

    let config = config::Config::builder()
        .add_source(config::File::from(
            configuration_directory.join("base.yaml"),
        ))
        .add_source(config::File::from(
            configuration_directory.join(format!("{}.yaml", environment.as_str())),
        ))
        .add_source(
            config::Environment::with_prefix("ST")
                .prefix_separator("_")
                .separator("__"),
        )
        .build()?;

    config.try_deserialize::<Config>()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fps_to_delay_ms() {
        assert_eq!(fps_to_delay_ms(30), 33);
        assert_eq!(fps_to_delay_ms(10), 100);
        assert_eq!(fps_to_delay_ms(0), 1000);
    }

    #[test]
    fn test_environment_parsing() {
        assert!(matches!(
            Environment::try_from("Production".to_string()),
            Ok(Environment::Production)
        ));
        assert!(Environment::try_from("staging".to_string()).is_err());
    }

    #[test]
    fn test_bundled_configuration_deserializes() {
        let directory = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("configuration");
        let config = config::Config::builder()
            .add_source(config::File::from(directory.join("base.yaml")))
            .add_source(config::File::from(directory.join("local.yaml")))
            .build()
            .unwrap()
            .try_deserialize::<Config>()
            .unwrap();

        assert_eq!(config.server.port, 5000);
        assert_eq!(config.camera.frame_width, 640);
        assert!(config
            .navigation
            .obstacle_labels
            .iter()
            .any(|label| label == "motorcycle"));
    }
}
