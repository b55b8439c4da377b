use std::time::Duration;

/// Number of distinct raw values the generator draws from (`1..=DATA_RANGE`),
/// also the size of the processing lookup table
pub const DATA_RANGE: i64 = 10_000;

/// One unit of work flowing through the pipeline
#[derive(Debug, Clone, PartialEq)]
pub struct DataItem {
    /// Monotonic per run; the generating tick
    pub id: u64,
    pub raw_value: i64,
    /// Written once by the processing stage
    pub processed_value: f64,
    /// Written once by the filter stage
    pub is_valid: bool,
    /// Clock reading at generation
    pub created_at: Duration,
}

impl DataItem {
    pub fn new(id: u64, raw_value: i64, created_at: Duration) -> Self {
        Self {
            id,
            raw_value,
            processed_value: 0.0,
            is_valid: false,
            created_at,
        }
    }

    /// Time spent in the pipeline as of `now`, in milliseconds
    pub fn latency_ms(&self, now: Duration) -> f64 {
        now.saturating_sub(self.created_at).as_nanos() as f64 / 1_000_000.0
    }
}

/// Accept rule of the filter/reduce stage.
///
/// An item passes iff `0.1 < processed_value < 100.0`, its id is not a
/// multiple of 13, and its raw value is a multiple of 3 or 7.
pub fn passes_filter(item: &DataItem) -> bool {
    item.processed_value > 0.1
        && item.processed_value < 100.0
        && item.id % 13 != 0
        && (item.raw_value % 3 == 0 || item.raw_value % 7 == 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: u64, raw_value: i64, processed_value: f64) -> DataItem {
        DataItem {
            processed_value,
            ..DataItem::new(id, raw_value, Duration::ZERO)
        }
    }

    #[test]
    fn test_filter_accepts() {
        assert!(passes_filter(&item(1, 9, 5.0)));
        assert!(passes_filter(&item(2, 14, 0.11)));
        assert!(passes_filter(&item(14, 21, 99.9)));
    }

    #[test]
    fn test_filter_rejects() {
        // value bounds are exclusive
        assert!(!passes_filter(&item(1, 9, 0.1)));
        assert!(!passes_filter(&item(1, 9, 100.0)));
        // id multiple of 13, including 0
        assert!(!passes_filter(&item(0, 9, 5.0)));
        assert!(!passes_filter(&item(26, 9, 5.0)));
        // raw not a multiple of 3 or 7
        assert!(!passes_filter(&item(1, 10, 5.0)));
    }

    #[test]
    fn test_latency() {
        let item = DataItem::new(1, 1, Duration::from_millis(10));
        assert_eq!(item.latency_ms(Duration::from_millis(35)), 25.0);
        assert_eq!(item.latency_ms(Duration::from_millis(5)), 0.0);
    }
}
