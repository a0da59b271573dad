/// Partition state definitions for tracking crawl progress
///
/// A partition is one disjoint slice of the discovery space, crawled as an
/// independent cursor-paginated query stream.
use std::fmt;

/// Represents where a partition stands in the current logical crawl
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PartitionStatus {
    /// Not finished yet; may already hold a cursor from an earlier run
    Pending,

    /// The API reported no further pages (or the page cap was reached)
    Done,

    /// Abandoned after a partition-fatal error; retried on resume
    Failed,
}

impl PartitionStatus {
    /// Converts the status to a database string representation
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }

    /// Parses a status from its database string representation
    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "done" => Some(Self::Done),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for PartitionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}

/// One slice of the discovery space and its resumable position
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    /// Stable identifier, unique within a crawl plan
    pub key: String,

    /// Search qualifiers selecting exactly this slice
    pub predicate: String,

    /// Continuation cursor; `None` means the first page has not been committed
    pub cursor: Option<String>,

    pub status: PartitionStatus,

    /// Records committed to the store from this partition
    pub records_discovered: u64,

    /// Pages committed from this partition
    pub pages_fetched: u32,

    /// Error text recorded when the partition failed
    pub last_error: Option<String>,
}

impl Partition {
    /// Creates a not-yet-started partition
    pub fn new(key: impl Into<String>, predicate: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            predicate: predicate.into(),
            cursor: None,
            status: PartitionStatus::Pending,
            records_discovered: 0,
            pages_fetched: 0,
            last_error: None,
        }
    }

    /// Returns true once the partition must not be queried again
    pub fn is_done(&self) -> bool {
        self.status == PartitionStatus::Done
    }

    /// Returns true if a previous run already advanced this partition
    pub fn is_started(&self) -> bool {
        self.cursor.is_some() || self.pages_fetched > 0
    }

    /// Records that the page at the current cursor was consumed
    ///
    /// A page without a continuation cursor cannot be followed, so it ends the
    /// partition even if the API claims there is more.
    pub fn advance(&mut self, end_cursor: Option<String>, has_next_page: bool) {
        self.pages_fetched += 1;
        match end_cursor {
            Some(cursor) if has_next_page => {
                self.cursor = Some(cursor);
            }
            Some(cursor) => {
                self.cursor = Some(cursor);
                self.status = PartitionStatus::Done;
            }
            None => {
                self.status = PartitionStatus::Done;
            }
        }
        self.last_error = None;
    }

    /// Ends the partition without consuming a page
    pub fn mark_done(&mut self) {
        self.status = PartitionStatus::Done;
    }

    /// Marks the partition as abandoned, keeping its last good cursor
    pub fn mark_failed(&mut self, error: impl Into<String>) {
        self.status = PartitionStatus::Failed;
        self.last_error = Some(error.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_partition_not_started() {
        let partition = Partition::new("stars:0-10", "stars:0..9");
        assert_eq!(partition.status, PartitionStatus::Pending);
        assert!(!partition.is_started());
        assert!(!partition.is_done());
    }

    #[test]
    fn test_advance_keeps_pending_while_more_pages() {
        let mut partition = Partition::new("p", "stars:0..9");
        partition.advance(Some("c1".to_string()), true);

        assert_eq!(partition.cursor.as_deref(), Some("c1"));
        assert_eq!(partition.status, PartitionStatus::Pending);
        assert_eq!(partition.pages_fetched, 1);
        assert!(partition.is_started());
    }

    #[test]
    fn test_advance_last_page_marks_done() {
        let mut partition = Partition::new("p", "stars:0..9");
        partition.advance(Some("c1".to_string()), true);
        partition.advance(Some("c2".to_string()), false);

        assert!(partition.is_done());
        assert_eq!(partition.cursor.as_deref(), Some("c2"));
    }

    #[test]
    fn test_advance_without_cursor_marks_done() {
        let mut partition = Partition::new("p", "stars:0..9");
        partition.advance(None, true);
        assert!(partition.is_done());
        assert_eq!(partition.cursor, None);
    }

    #[test]
    fn test_mark_failed_keeps_cursor() {
        let mut partition = Partition::new("p", "stars:0..9");
        partition.advance(Some("c1".to_string()), true);
        partition.mark_failed("HTTP 422");

        assert_eq!(partition.status, PartitionStatus::Failed);
        assert_eq!(partition.cursor.as_deref(), Some("c1"));
        assert_eq!(partition.last_error.as_deref(), Some("HTTP 422"));
    }

    #[test]
    fn test_status_roundtrip() {
        for status in [
            PartitionStatus::Pending,
            PartitionStatus::Done,
            PartitionStatus::Failed,
        ] {
            assert_eq!(
                PartitionStatus::from_db_string(status.to_db_string()),
                Some(status)
            );
        }
        assert_eq!(PartitionStatus::from_db_string("bogus"), None);
    }
}
