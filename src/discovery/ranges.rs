//! Disjoint intervals along the star-count and creation-date axes

use chrono::{Duration, NaiveDate};

/// Half-open star-count interval `[lo, hi)`; `hi == None` is open-ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StarRange {
    pub lo: u64,
    pub hi: Option<u64>,
}

impl StarRange {
    /// Builds consecutive intervals from ascending lower bounds
    ///
    /// `[0, 1, 11]` becomes `[0,1) [1,11) [11,∞)`.
    pub fn from_bounds(bounds: &[u64]) -> Vec<StarRange> {
        bounds
            .iter()
            .enumerate()
            .map(|(i, &lo)| StarRange {
                lo,
                hi: bounds.get(i + 1).copied(),
            })
            .collect()
    }

    /// Search qualifier selecting exactly this interval
    pub fn qualifier(&self) -> String {
        match self.hi {
            Some(hi) if hi == self.lo + 1 => format!("stars:{}", self.lo),
            Some(hi) => format!("stars:{}..{}", self.lo, hi - 1),
            None => format!("stars:>={}", self.lo),
        }
    }

    pub fn key(&self) -> String {
        match self.hi {
            Some(hi) => format!("stars:{}-{}", self.lo, hi),
            None => format!("stars:{}+", self.lo),
        }
    }

    pub fn contains(&self, stars: u64) -> bool {
        stars >= self.lo && self.hi.map_or(true, |hi| stars < hi)
    }
}

/// Half-open creation-date window `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateWindow {
    /// Splits `[from, to)` into windows of `days` days; the last one may be shorter
    pub fn split(from: NaiveDate, to: NaiveDate, days: u32) -> Vec<DateWindow> {
        let step = Duration::days(i64::from(days.max(1)));
        let mut windows = Vec::new();
        let mut start = from;

        while start < to {
            let end = std::cmp::min(start + step, to);
            windows.push(DateWindow { start, end });
            start = end;
        }

        windows
    }

    /// Search qualifier; the API's date ranges are inclusive on both ends
    pub fn qualifier(&self) -> String {
        let last = self.end - Duration::days(1);
        if last == self.start {
            format!("created:{}", self.start.format("%Y-%m-%d"))
        } else {
            format!(
                "created:{}..{}",
                self.start.format("%Y-%m-%d"),
                last.format("%Y-%m-%d")
            )
        }
    }

    pub fn key(&self) -> String {
        format!(
            "created:{}-{}",
            self.start.format("%Y-%m-%d"),
            self.end.format("%Y-%m-%d")
        )
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date < self.end
    }
}
