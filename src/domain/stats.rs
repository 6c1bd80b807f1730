use serde::{Deserialize, Serialize};

/// Summary of one incremental update run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateStats {
    pub total: usize,
    pub updated: usize,
    pub skipped: usize,
    pub added: usize,
    pub removed: usize,
    /// Wall time of the whole run in milliseconds.
    pub processing_time: u64,
}

impl UpdateStats {
    /// Every source entry is classified exactly once.
    pub fn is_balanced(&self) -> bool {
        self.added + self.updated + self.skipped == self.total
    }

    /// Number of entries handed to the processor.
    pub fn processed(&self) -> usize {
        self.added + self.updated
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_processing_time_in_camel_case() {
        let stats = UpdateStats {
            total: 3,
            added: 1,
            updated: 1,
            skipped: 1,
            removed: 0,
            processing_time: 12,
        };
        let json = serde_json::to_value(stats).unwrap();
        assert_eq!(json["processingTime"], 12);
        assert!(stats.is_balanced());
        assert_eq!(stats.processed(), 2);
    }
}
