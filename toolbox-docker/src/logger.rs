//! Per-service log output.

use std::collections::HashMap;

use colored::{Color, Colorize};
use tracing::{debug, error, info, warn};

const PALETTE: [Color; 6] = [
    Color::Cyan,
    Color::Yellow,
    Color::Green,
    Color::Magenta,
    Color::Blue,
    Color::BrightRed,
];

/// Assigns each service a stable prefix color
#[derive(Debug, Clone, Default)]
pub struct ColorRegistry {
    colors: HashMap<String, Color>,
}

impl ColorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the color of a service, assigning the next palette entry on
    /// first use.
    pub fn color_for(&mut self, service: &str) -> Color {
        let next = PALETTE[self.colors.len() % PALETTE.len()];
        *self.colors.entry(service.to_owned()).or_insert(next)
    }

    /// Returns a logger for the service
    pub fn logger(&mut self, service: &str) -> ServiceLogger {
        ServiceLogger::new(service, self.color_for(service))
    }
}

/// Log sink tagged with a service name
#[derive(Debug, Clone)]
pub struct ServiceLogger {
    service: String,
    prefix: String,
}

impl ServiceLogger {
    pub fn new(service: &str, color: Color) -> Self {
        Self {
            service: service.to_owned(),
            prefix: service.color(color).bold().to_string(),
        }
    }

    /// Logger without a color, used where no registry is available
    pub fn plain(service: &str) -> Self {
        Self {
            service: service.to_owned(),
            prefix: service.to_owned(),
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    /// The colored service name
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn debug(&self, msg: &str) {
        debug!(service = %self.service, "{}: {msg}", self.prefix);
    }

    pub fn info(&self, msg: &str) {
        info!(service = %self.service, "{}: {msg}", self.prefix);
    }

    pub fn warn(&self, msg: &str) {
        warn!(service = %self.service, "{}: {msg}", self.prefix);
    }

    pub fn error(&self, msg: &str) {
        error!(service = %self.service, "{}: {msg}", self.prefix);
    }

    pub fn success(&self, msg: &str) {
        info!(service = %self.service, "{} {}: {msg}", "✓".green(), self.prefix);
    }

    pub fn start(&self, msg: &str) {
        info!(service = %self.service, "{} {}: {msg}", "▶".blue(), self.prefix);
    }

    /// Emit one line of container output
    pub fn output(&self, line: &str) {
        println!("{} {} {line}", self.prefix, "|".dimmed());
    }
}
