use super::API_LOG_TARGET;
use tracing::{Level, debug, error, info, trace, warn};

/// Which verbosity a logger reports under
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogChannel {
    /// Connector events, filtered by `log_level`
    Connector,
    /// API request/response metadata, filtered by `api_log_level`
    Api,
}

/// Context information for log messages
#[derive(Debug, Clone)]
pub struct LogContext {
    /// Component name (e.g., "auth", "http", "poller")
    pub component: String,
    /// Connector instance the message belongs to
    pub connector_id: Option<String>,
    /// Vehicle the message is about
    pub vin: Option<String>,
    /// Additional context fields
    pub extra_fields: std::collections::BTreeMap<String, String>,
}

impl LogContext {
    /// Create a new log context
    pub fn new(component: &str) -> Self {
        Self {
            component: component.to_string(),
            connector_id: None,
            vin: None,
            extra_fields: std::collections::BTreeMap::new(),
        }
    }

    /// Set connector id
    pub fn with_connector_id(mut self, connector_id: &str) -> Self {
        self.connector_id = Some(connector_id.to_string());
        self
    }

    /// Set vehicle identifier
    pub fn with_vin(mut self, vin: &str) -> Self {
        self.vin = Some(vin.to_string());
        self
    }

    /// Add extra field
    pub fn with_field(mut self, key: &str, value: String) -> Self {
        self.extra_fields.insert(key.to_string(), value);
        self
    }
}

/// Structured logger with context
#[derive(Debug, Clone)]
pub struct StructuredLogger {
    pub(crate) context: LogContext,
    channel: LogChannel,
}

macro_rules! emit {
    ($self:ident, $mac:ident, $message:expr) => {{
        let fields = $self.format_fields();
        match $self.channel {
            LogChannel::Connector => $mac!(%fields, "{}", $message),
            LogChannel::Api => $mac!(target: API_LOG_TARGET, %fields, "{}", $message),
        }
    }};
}

impl StructuredLogger {
    /// Create a new structured logger with context
    pub fn new(context: LogContext) -> Self {
        Self {
            context,
            channel: LogChannel::Connector,
        }
    }

    /// Same context, reporting on the API channel
    pub fn api(&self) -> Self {
        Self {
            context: self.context.clone(),
            channel: LogChannel::Api,
        }
    }

    /// Derive a logger with an extra vehicle field
    pub fn for_vin(&self, vin: &str) -> Self {
        Self {
            context: self.context.clone().with_vin(vin),
            channel: self.channel,
        }
    }

    pub fn channel(&self) -> LogChannel {
        self.channel
    }

    pub fn component(&self) -> &str {
        &self.context.component
    }

    /// Log an info message with context
    pub fn info(&self, message: &str) {
        emit!(self, info, message);
    }
    /// Log a warning message with context
    pub fn warn(&self, message: &str) {
        emit!(self, warn, message);
    }
    /// Log an error message with context
    pub fn error(&self, message: &str) {
        emit!(self, error, message);
    }
    /// Log a debug message with context
    pub fn debug(&self, message: &str) {
        emit!(self, debug, message);
    }
    /// Log a trace message with context
    pub fn trace(&self, message: &str) {
        emit!(self, trace, message);
    }

    /// Log at a level chosen at runtime
    pub fn log(&self, level: Level, message: &str) {
        match level {
            Level::ERROR => self.error(message),
            Level::WARN => self.warn(message),
            Level::INFO => self.info(message),
            Level::DEBUG => self.debug(message),
            Level::TRACE => self.trace(message),
        }
    }

    /// Format context fields for logging
    fn format_fields(&self) -> String {
        let mut fields = vec![format!("component={}", self.context.component)];
        if let Some(ref connector_id) = self.context.connector_id {
            fields.push(format!("connector_id={}", connector_id));
        }
        if let Some(ref vin) = self.context.vin {
            fields.push(format!("vin={}", vin));
        }
        for (key, value) in &self.context.extra_fields {
            fields.push(format!("{}={}", key, value));
        }
        fields.join(",")
    }
}

/// Create a logger for a specific component
pub fn get_logger(component: &str) -> StructuredLogger {
    StructuredLogger::new(LogContext::new(component))
}

/// Create a logger for API request/response metadata
pub fn get_api_logger(component: &str) -> StructuredLogger {
    get_logger(component).api()
}

/// Create a logger with full context
pub fn get_logger_with_context(context: LogContext) -> StructuredLogger {
    StructuredLogger::new(context)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_context() {
        let context = LogContext::new("test")
            .with_connector_id("c1")
            .with_vin("YV1DEMO")
            .with_field("key", "value".to_string());

        assert_eq!(context.component, "test");
        assert_eq!(context.connector_id.as_deref(), Some("c1"));
        assert_eq!(context.vin.as_deref(), Some("YV1DEMO"));
        assert_eq!(context.extra_fields.get("key"), Some(&"value".to_string()));
    }

    #[test]
    fn test_format_fields_and_channels() {
        let logger = get_logger_with_context(LogContext::new("http").with_connector_id("c1"));
        assert_eq!(logger.format_fields(), "component=http,connector_id=c1");
        assert_eq!(logger.channel(), LogChannel::Connector);

        let api = logger.for_vin("VIN1").api();
        assert_eq!(api.channel(), LogChannel::Api);
        assert_eq!(api.format_fields(), "component=http,connector_id=c1,vin=VIN1");
    }
}
