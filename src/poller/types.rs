use serde::Serialize;

/// Where the poll loop currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PollState {
    Idle,
    Authorizing,
    Fetching,
    Publishing,
    /// Terminal
    Stopped,
}

/// Connection health as the host sees it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

/// Counters from one completed tick
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    pub vehicles: usize,
    pub added: usize,
    pub removed: usize,
    pub fields_published: usize,
    pub publish_failures: usize,
    /// Endpoints answered with a permanent error and left out this tick
    pub skipped_sections: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    Completed(TickReport),
    /// Shutdown was requested at a safe point
    Stopped,
}
