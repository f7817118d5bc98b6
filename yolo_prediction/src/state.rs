use crate::config::{LabelsConfig, Validatable};
use std::{
    fs::File,
    io::{self, BufRead},
    path::Path,
};
use yolo_proto::ColorLabel;

pub trait State: Send + Sync + 'static {
    fn new(labels_cfg: &LabelsConfig) -> Result<Self, String>
    where
        Self: Sized;
    fn get_labels(&self) -> &Vec<ColorLabel>;
}

#[derive(Debug)]
pub struct ServiceState {
    class_labels: Vec<ColorLabel>,
}

impl State for ServiceState {
    fn new(labels_cfg: &LabelsConfig) -> Result<ServiceState, String> {
        let labels = load_class_labels(&labels_cfg.get_path())
            .map_err(|e| format!("Failed to load labels: {}", e))?;
        tracing::info!("Loaded {} class labels", labels.len());
        Ok(ServiceState {
            class_labels: labels,
        })
    }

    fn get_labels(&self) -> &Vec<ColorLabel> {
        &self.class_labels
    }
}

pub fn load_class_labels(filepath: &Path) -> io::Result<Vec<ColorLabel>> {
    let file = File::open(filepath)?;
    parse_class_labels(io::BufReader::new(file))
}

/// One `label,red,green,blue` entry per line, in class id order.
fn parse_class_labels(reader: impl BufRead) -> io::Result<Vec<ColorLabel>> {
    let mut color_labels = Vec::new();

    for line_result in reader.lines() {
        let line = line_result?;
        if line.trim().is_empty() {
            continue;
        }

        let parts: Vec<&str> = line.split(',').map(str::trim).collect();
        let [label, red, green, blue] = parts.as_slice() else {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Invalid line format: {}", line),
            ));
        };

        color_labels.push(ColorLabel {
            label: label.to_string(),
            red: parse_channel(red, "red")?,
            green: parse_channel(green, "green")?,
            blue: parse_channel(blue, "blue")?,
        });
    }

    Ok(color_labels)
}

fn parse_channel(value: &str, channel: &str) -> io::Result<u32> {
    value
        .parse::<u8>()
        .map(u32::from)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, format!("Invalid {} value", channel)))
}
