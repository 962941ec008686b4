use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::types::{RenderedReport, ReportKind};

struct CachedReport {
    report: RenderedReport,
    expires_at: Instant,
}

/// Time-boxed memo of rendered reports, one entry per report kind.
///
/// Nothing is held across the warehouse round trip: two callers that miss at
/// the same moment both fetch, and the later insert wins.
pub struct ReportCache {
    ttl: Duration,
    entries: DashMap<ReportKind, CachedReport>,
}

impl ReportCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: DashMap::new(),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// The stored report, if it has not expired.
    pub fn get(&self, kind: ReportKind) -> Option<RenderedReport> {
        self.get_at(kind, Instant::now())
    }

    pub fn insert(&self, report: RenderedReport) {
        self.insert_at(report, Instant::now());
    }

    fn get_at(&self, kind: ReportKind, now: Instant) -> Option<RenderedReport> {
        let entry = self.entries.get(&kind)?;
        if now < entry.expires_at {
            Some(entry.report.clone())
        } else {
            None
        }
    }

    fn insert_at(&self, report: RenderedReport, now: Instant) {
        let expires_at = now + self.ttl;
        self.entries.insert(report.kind, CachedReport { report, expires_at });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(kind: ReportKind, stamp: &str) -> RenderedReport {
        RenderedReport {
            kind,
            heading: "Sales".to_string(),
            columns: vec!["Date".to_string()],
            rows: vec![vec!["Total".to_string()]],
            last_update: stamp.to_string(),
        }
    }

    #[test]
    fn hit_within_ttl_miss_after() {
        let cache = ReportCache::new(Duration::from_secs(59));
        let t0 = Instant::now();
        cache.insert_at(report(ReportKind::Daily, "first"), t0);

        let hit = cache.get_at(ReportKind::Daily, t0 + Duration::from_secs(58)).unwrap();
        assert_eq!(hit.last_update, "first");
        assert!(cache.get_at(ReportKind::Daily, t0 + Duration::from_secs(59)).is_none());
    }

    #[test]
    fn entries_are_keyed_by_kind() {
        let cache = ReportCache::new(Duration::from_secs(59));
        let t0 = Instant::now();
        cache.insert_at(report(ReportKind::Daily, "daily"), t0);

        assert!(cache.get_at(ReportKind::ByMinute, t0).is_none());
        cache.insert_at(report(ReportKind::ByMinute, "minute"), t0);
        assert_eq!(cache.get_at(ReportKind::ByMinute, t0).unwrap().last_update, "minute");
        assert_eq!(cache.get_at(ReportKind::Daily, t0).unwrap().last_update, "daily");
    }

    #[test]
    fn reinsert_replaces_and_extends() {
        let cache = ReportCache::new(Duration::from_secs(10));
        let t0 = Instant::now();
        cache.insert_at(report(ReportKind::Daily, "old"), t0);
        cache.insert_at(report(ReportKind::Daily, "new"), t0 + Duration::from_secs(8));

        let hit = cache.get_at(ReportKind::Daily, t0 + Duration::from_secs(15)).unwrap();
        assert_eq!(hit.last_update, "new");
    }
}
