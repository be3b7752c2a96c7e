// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! Time-based (v1) event identifiers.
//!
//! Event ids on the log are v1 UUIDs, so an id doubles as a position in time.
//! Cursors and stop targets are built from synthetic ids at a given instant.

use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use uuid::{timestamp::context::NoContext, Timestamp, Uuid, Version};

const NODE_ID: [u8; 6] = *b"dpump0";

/// Synthetic event id positioned at `at`.
pub fn event_id_at(at: DateTime<Utc>) -> String {
    let secs = at.timestamp().max(0) as u64;
    let ts = Timestamp::from_unix(NoContext, secs, at.timestamp_subsec_nanos());
    Uuid::new_v1(ts, &NODE_ID).to_string()
}

pub fn event_id_now() -> String {
    event_id_at(Utc::now())
}

/// Instant encoded in a v1 id, if the id is one.
pub fn event_time(event_id: &str) -> Option<DateTime<Utc>> {
    let uuid = Uuid::parse_str(event_id).ok()?;
    if uuid.get_version() != Some(Version::Mac) {
        return None;
    }
    let (secs, nanos) = uuid.get_timestamp()?.to_unix();
    DateTime::from_timestamp(i64::try_from(secs).ok()?, nanos)
}

/// Compares ids by embedded time when both are v1 ids, lexically otherwise.
pub fn cmp_event_ids(a: &str, b: &str) -> Ordering {
    match (event_time(a), event_time(b)) {
        (Some(ta), Some(tb)) => ta.cmp(&tb).then_with(|| a.cmp(b)),
        _ => a.cmp(b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn synthetic_ids_round_trip_their_instant() {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap();
        let id = event_id_at(at);
        assert_eq!(event_time(&id), Some(at));
    }

    #[test]
    fn v1_ids_compare_by_time_not_text() {
        let early = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let late = early + Duration::milliseconds(1);
        let a = event_id_at(early);
        let b = event_id_at(late);
        assert_eq!(cmp_event_ids(&a, &b), Ordering::Less);
        assert_eq!(cmp_event_ids(&b, &a), Ordering::Greater);
    }

    #[test]
    fn non_uuid_ids_fall_back_to_lexical_order() {
        assert_eq!(cmp_event_ids("e1", "e2"), Ordering::Less);
        assert_eq!(event_time("e1"), None);
    }
}
