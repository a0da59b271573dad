use std::fmt;

/// Persisted status of a logical crawl
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// In progress, or the process died before finishing
    Running,
    /// Every partition done, or the target count was reached
    Completed,
    /// Ended with failed partitions or by a stop request; resumable
    Interrupted,
    /// Ended by a crawl-wide fatal error; resumable once the cause is fixed
    Aborted,
}

impl RunStatus {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Interrupted => "interrupted",
            Self::Aborted => "aborted",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "interrupted" => Some(Self::Interrupted),
            "aborted" => Some(Self::Aborted),
            _ => None,
        }
    }

    /// Returns true if a new invocation should continue this run
    pub fn is_resumable(&self) -> bool {
        !matches!(self, Self::Completed)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}

/// In-process lifecycle of the crawl orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrawlPhase {
    Initializing,
    Running,
    Completed,
    Aborted,
}
