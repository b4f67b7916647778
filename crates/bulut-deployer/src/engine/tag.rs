// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Image tag generation.

use std::sync::Mutex;

use chrono::{DateTime, TimeDelta, Utc};

/// Tag format: UTC timestamp with millisecond resolution.
pub const TAG_FORMAT: &str = "%Y%m%d%H%M%S%3f";

/// Issues timestamp image tags that strictly increase within the process.
///
/// Tags are fixed-width, so string order matches time order. When two tags
/// are requested within the same millisecond (or the wall clock steps
/// backwards) the clock advances one millisecond past the previous tag.
#[derive(Debug, Default)]
pub struct TagClock {
    last: Mutex<Option<DateTime<Utc>>>,
}

impl TagClock {
    /// Create a clock.
    pub fn new() -> Self {
        Self::default()
    }

    /// Next tag.
    pub fn next_tag(&self) -> String {
        self.next_at(Utc::now())
    }

    fn next_at(&self, now: DateTime<Utc>) -> String {
        let mut last = self
            .last
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let now = truncate_millis(now);
        let next = match *last {
            Some(prev) if now <= prev => prev + TimeDelta::milliseconds(1),
            _ => now,
        };
        *last = Some(next);

        next.format(TAG_FORMAT).to_string()
    }
}

fn truncate_millis(t: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(t.timestamp_millis()).unwrap_or(t)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_tag_format() {
        let clock = TagClock::new();
        let at = Utc.with_ymd_and_hms(2025, 3, 1, 12, 30, 45).unwrap();
        assert_eq!(clock.next_at(at), "20250301123045000");
    }

    #[test]
    fn test_same_instant_still_increases() {
        let clock = TagClock::new();
        let at = Utc.with_ymd_and_hms(2025, 3, 1, 12, 30, 45).unwrap();

        let a = clock.next_at(at);
        let b = clock.next_at(at);
        assert_eq!(a, "20250301123045000");
        assert_eq!(b, "20250301123045001");
    }

    #[test]
    fn test_clock_going_backwards() {
        let clock = TagClock::new();
        let later = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
        let earlier = Utc.with_ymd_and_hms(2025, 3, 1, 11, 0, 0).unwrap();

        let a = clock.next_at(later);
        let b = clock.next_at(earlier);
        assert!(b > a);
    }

    #[test]
    fn test_rapid_tags_are_strictly_increasing() {
        let clock = TagClock::new();
        let tags: Vec<String> = (0..500).map(|_| clock.next_tag()).collect();
        for pair in tags.windows(2) {
            assert!(pair[0] < pair[1], "{} !< {}", pair[0], pair[1]);
            assert_eq!(pair[0].len(), 17);
        }
    }
}
