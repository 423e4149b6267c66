use parking_lot::Mutex;
use uuid::Uuid;

/// K-sortable unique id generator. UUIDv7 embeds a millisecond timestamp in
/// its high bits, so lexicographic order of the simple hex form tracks
/// creation order; the last-issued guard makes ids monotonically
/// non-decreasing within a process even across clock steps.
pub struct IdGenerator {
    last: Mutex<String>,
}

impl IdGenerator {
    pub fn new() -> Self {
        IdGenerator {
            last: Mutex::new(String::new()),
        }
    }

    pub fn next_id(&self) -> String {
        let mut last = self.last.lock();
        loop {
            let candidate = Uuid::now_v7().simple().to_string();
            if candidate > *last {
                *last = candidate.clone();
                return candidate;
            }
            // Clock went backwards or same-tick collision; draw again.
        }
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        IdGenerator::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_unique() {
        let generator = IdGenerator::new();
        let mut seen = std::collections::HashSet::new();
        for _ in 0..1000 {
            assert!(seen.insert(generator.next_id()));
        }
    }

    #[test]
    fn test_ids_monotonic() {
        let generator = IdGenerator::new();
        let mut previous = generator.next_id();
        for _ in 0..1000 {
            let next = generator.next_id();
            assert!(next > previous, "{next} should sort after {previous}");
            previous = next;
        }
    }

    #[test]
    fn test_id_format() {
        let id = IdGenerator::new().next_id();
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
