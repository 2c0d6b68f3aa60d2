//! Console log format for the mesh node.
//!
//! Lines look like `[timestamp] [component] [level] message`. Events may
//! carry a `component` field, set through the `component_*!` macros, which
//! replaces the service name in the second column.

use std::fmt;
use std::io::IsTerminal;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::fmt::{format::Writer, FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::EnvFilter;

const COLOR_RESET: &str = "\x1b[0m";
const COLOR_CYAN: &str = "\x1b[36m";
const COLOR_GREEN: &str = "\x1b[32m";
const COLOR_YELLOW: &str = "\x1b[93m";
const COLOR_RED: &str = "\x1b[91m";
const COLOR_GRAY: &str = "\x1b[90m";

const COMPONENT_WIDTH: usize = 18;
const LEVEL_WIDTH: usize = 5;

/// Crates whose events pass the `--log-level` filter
const MESH_TARGETS: [&str; 4] = ["pico_mesh", "mesh_session", "mesh_storage", "mesh_wire"];

/// Log an event tagged with a component name
#[macro_export]
macro_rules! component_info {
    ($component:expr, $($arg:tt)*) => {
        tracing::info!(component = $component, $($arg)*)
    };
}

/// Log a warning tagged with a component name
#[macro_export]
macro_rules! component_warn {
    ($component:expr, $($arg:tt)*) => {
        tracing::warn!(component = $component, $($arg)*)
    };
}

/// Log a debug event tagged with a component name
#[macro_export]
macro_rules! component_debug {
    ($component:expr, $($arg:tt)*) => {
        tracing::debug!(component = $component, $($arg)*)
    };
}

/// Log an error tagged with a component name
#[macro_export]
macro_rules! component_error {
    ($component:expr, $($arg:tt)*) => {
        tracing::error!(component = $component, $($arg)*)
    };
}

/// Install the global subscriber
pub fn init(service_name: &str, level: &str) -> anyhow::Result<()> {
    let mut filter = EnvFilter::new("warn");
    for target in MESH_TARGETS {
        filter = filter.add_directive(format!("{}={}", target, level).parse()?);
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .event_format(MeshLogFormatter::new(service_name))
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to install log subscriber: {}", e))
}

/// Formatter for `[timestamp] [component] [level] message` lines
pub struct MeshLogFormatter {
    service_name: String,
    color_enabled: bool,
}

impl MeshLogFormatter {
    /// Formatter for the given service, colored when stdout is a terminal
    pub fn new(service_name: &str) -> Self {
        Self {
            service_name: service_name.to_string(),
            color_enabled: std::io::stdout().is_terminal(),
        }
    }

    fn component_column(&self, component: Option<&str>) -> String {
        let name = match component {
            Some(comp) => format!("{}-{}", self.service_name, comp),
            None => self.service_name.clone(),
        };
        fit(&name, COMPONENT_WIDTH)
    }

    fn color(&self, level: &Level) -> &'static str {
        if !self.color_enabled {
            return "";
        }
        match *level {
            Level::ERROR => COLOR_RED,
            Level::WARN => COLOR_YELLOW,
            Level::INFO => COLOR_GREEN,
            Level::DEBUG | Level::TRACE => COLOR_GRAY,
        }
    }

    fn paint(&self, code: &'static str) -> &'static str {
        if self.color_enabled {
            code
        } else {
            ""
        }
    }
}

/// Pad or truncate to exactly `width` characters
fn fit(text: &str, width: usize) -> String {
    if text.chars().count() > width {
        let cut: String = text.chars().take(width - 1).collect();
        format!("{}…", cut)
    } else {
        format!("{:<width$}", text, width = width)
    }
}

impl<S, N> FormatEvent<S, N> for MeshLogFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
        let level = event.metadata().level();

        let mut fields = FieldVisitor::default();
        event.record(&mut fields);

        write!(
            writer,
            "{}[{}]{} [{}] [{}{:<width$}{}] ",
            self.paint(COLOR_CYAN),
            timestamp,
            self.paint(COLOR_RESET),
            self.component_column(fields.component.as_deref()),
            self.color(level),
            level.as_str(),
            self.paint(COLOR_RESET),
            width = LEVEL_WIDTH
        )?;
        writeln!(writer, "{}", fields.message)
    }
}

/// Pulls `message` and `component` out of an event
#[derive(Default)]
struct FieldVisitor {
    message: String,
    component: Option<String>,
}

impl tracing::field::Visit for FieldVisitor {
    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        match field.name() {
            "message" => self.message = value.to_string(),
            "component" => self.component = Some(value.to_string()),
            _ => {}
        }
    }

    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn fmt::Debug) {
        match field.name() {
            // Format arguments arrive as `fmt::Arguments`, whose Debug is unquoted
            "message" => self.message = format!("{:?}", value),
            "component" => {
                let text = format!("{:?}", value);
                self.component = Some(text.trim_matches('"').to_string());
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fit_pads_and_truncates() {
        assert_eq!(fit("mesh", 6), "mesh  ");
        assert_eq!(fit("pico-mesh-session", 8), "pico-me…");
        assert_eq!(fit("exactly8", 8), "exactly8");
    }

    #[test]
    fn test_component_column() {
        let formatter = MeshLogFormatter {
            service_name: "pico-mesh".to_string(),
            color_enabled: false,
        };
        assert_eq!(
            formatter.component_column(Some("node")).trim_end(),
            "pico-mesh-node"
        );
        assert_eq!(formatter.component_column(None).len(), COMPONENT_WIDTH);
        assert_eq!(formatter.color(&Level::ERROR), "");
    }
}
