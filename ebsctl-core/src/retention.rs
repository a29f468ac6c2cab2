//! Snapshot retention classifier
//!
//! Decides which snapshots of a volume survive a cleanup. The history is
//! walked newest first in a single sweep; each snapshot is offered to the
//! highest-priority class (hourly, daily, weekly, monthly) whose quota is not
//! yet full, and kept only if it lands on that class's next calendar
//! boundary. Nothing is remembered between runs: the result depends only on
//! the snapshot list, the policy and the instant the run started.
//!
//! Boundary rules:
//! - hourly: the snapshot's hour is at or before the hour cursor, which starts
//!   at the top of the current hour
//! - daily: the snapshot's date is at or before the day cursor (today)
//! - weekly: the snapshot falls on a Sunday at or before the week cursor
//!   (this week's Sunday)
//! - monthly: the snapshot falls on the first of a month at or before the
//!   month cursor (the first of this month)
//!
//! A match moves the class cursor to the boundary before the matched one. A
//! snapshot kept on date `d` also clamps every coarser cursor to its latest
//! boundary strictly earlier than `d`, so one calendar period never satisfies
//! two classes. No boundary at or below the history floor is ever matched.

use crate::dates::{
    first_of_month, first_of_month_before, format_timestamp, history_floor, month_start_before,
    start_of_day, start_of_hour, sunday_before, sunday_on_or_before,
};
use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc, Weekday};
use ebsctl_common::{RetentionClass, RetentionPolicy, Snapshot, SnapshotStatus};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Classification of one snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifiedSnapshot {
    pub snapshot_id: String,
    pub start_time: DateTime<Utc>,
    pub status: SnapshotStatus,
    /// `None` means the snapshot is eligible for deletion
    pub class: Option<RetentionClass>,
}

impl ClassifiedSnapshot {
    pub fn is_kept(&self) -> bool {
        self.class.is_some()
    }
}

/// Per-class totals of a classification
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionSummary {
    pub hourly: u32,
    pub daily: u32,
    pub weekly: u32,
    pub monthly: u32,
    pub delete: u32,
}

impl RetentionSummary {
    pub fn from_classified(classified: &[ClassifiedSnapshot]) -> Self {
        Self::tally(classified.iter().map(|entry| entry.class))
    }

    /// Count kept snapshots per class; `None` counts as a deletion
    pub fn tally(classes: impl IntoIterator<Item = Option<RetentionClass>>) -> Self {
        let mut summary = Self::default();
        for class in classes {
            match class {
                Some(RetentionClass::Hourly) => summary.hourly += 1,
                Some(RetentionClass::Daily) => summary.daily += 1,
                Some(RetentionClass::Weekly) => summary.weekly += 1,
                Some(RetentionClass::Monthly) => summary.monthly += 1,
                None => summary.delete += 1,
            }
        }
        summary
    }

    pub fn kept(&self) -> u32 {
        self.hourly + self.daily + self.weekly + self.monthly
    }
}

/// Next eligible boundary of every class
#[derive(Debug, Clone)]
struct Cursors {
    hour: DateTime<Utc>,
    day: NaiveDate,
    week: NaiveDate,
    month: NaiveDate,
}

impl Cursors {
    fn new(now: DateTime<Utc>) -> Self {
        let today = now.date_naive();
        Self {
            hour: start_of_hour(now),
            day: today,
            week: sunday_on_or_before(today),
            month: first_of_month(today),
        }
    }

    /// Place a snapshot taken at `t` in `class`, advancing that class's cursor
    fn try_match(&mut self, class: RetentionClass, t: DateTime<Utc>, floor: DateTime<Utc>) -> bool {
        let date = t.date_naive();
        match class {
            RetentionClass::Hourly => {
                let hour = start_of_hour(t);
                if hour <= self.hour && hour > floor {
                    self.hour = hour - Duration::hours(1);
                    return true;
                }
            }
            RetentionClass::Daily => {
                if date <= self.day && start_of_day(date) > floor {
                    self.day = date - Duration::days(1);
                    return true;
                }
            }
            RetentionClass::Weekly => {
                if date.weekday() == Weekday::Sun && date <= self.week && start_of_day(date) > floor {
                    self.week = date - Duration::days(7);
                    return true;
                }
            }
            RetentionClass::Monthly => {
                if date.day() == 1 && date <= self.month && start_of_day(date) > floor {
                    self.month = month_start_before(date, 1);
                    return true;
                }
            }
        }
        false
    }

    /// Keep coarser classes out of the calendar period a kept snapshot used
    fn clamp_coarser(&mut self, kept: RetentionClass, date: NaiveDate) {
        if kept < RetentionClass::Daily {
            self.day = self.day.min(date - Duration::days(1));
        }
        if kept < RetentionClass::Weekly {
            self.week = self.week.min(sunday_before(date));
        }
        if kept < RetentionClass::Monthly {
            self.month = self.month.min(first_of_month_before(date));
        }
    }
}

/// Retention classifier bound to the instant a run started
#[derive(Debug, Clone)]
pub struct RetentionClassifier {
    now: DateTime<Utc>,
    floor: DateTime<Utc>,
}

impl RetentionClassifier {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now,
            floor: history_floor(),
        }
    }

    /// Override the history floor
    pub fn with_floor(mut self, floor: DateTime<Utc>) -> Self {
        self.floor = floor;
        self
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    /// Classify every snapshot, newest first
    ///
    /// Snapshots with identical start times are ordered by id, ascending.
    pub fn classify(&self, snapshots: &[Snapshot], policy: &RetentionPolicy) -> Vec<ClassifiedSnapshot> {
        let mut sorted: Vec<&Snapshot> = snapshots.iter().collect();
        sorted.sort_by(|a, b| {
            b.start_time
                .cmp(&a.start_time)
                .then_with(|| a.id.cmp(&b.id))
        });

        let mut cursors = Cursors::new(self.now);
        let mut tally: BTreeMap<RetentionClass, u32> = BTreeMap::new();

        let classified: Vec<ClassifiedSnapshot> = sorted
            .into_iter()
            .map(|snapshot| {
                let class = RetentionClass::PRIORITY
                    .iter()
                    .copied()
                    .find(|c| !policy.is_full(*c, tally.get(c).copied().unwrap_or(0)))
                    .filter(|c| cursors.try_match(*c, snapshot.start_time, self.floor));

                if let Some(c) = class {
                    *tally.entry(c).or_insert(0) += 1;
                    cursors.clamp_coarser(c, snapshot.start_time.date_naive());
                }

                ClassifiedSnapshot {
                    snapshot_id: snapshot.id.clone(),
                    start_time: snapshot.start_time,
                    status: snapshot.status,
                    class,
                }
            })
            .collect();

        let summary = RetentionSummary::from_classified(&classified);
        tracing::debug!(
            now = %format_timestamp(self.now),
            policy = %policy,
            kept = summary.kept(),
            delete = summary.delete,
            "Retention classification complete"
        );

        classified
    }
}

/// Three snapshots per day going back `days` days from `now`: at the same
/// time of day, 30 minutes earlier and 120 minutes earlier
pub fn synthetic_history(now: DateTime<Utc>, days: u32, volume_id: &str) -> Vec<Snapshot> {
    let offsets = [("a", 0), ("b", 30), ("c", 120)];
    (0..days)
        .flat_map(|day| {
            offsets.iter().map(move |(suffix, minutes)| Snapshot {
                id: format!("snap-{:07}{}", day, suffix),
                volume_id: volume_id.to_string(),
                start_time: now - Duration::days(i64::from(day)) - Duration::minutes(*minutes),
                status: SnapshotStatus::Completed,
                description: String::new(),
                encrypted: false,
                tags: BTreeMap::new(),
            })
        })
        .collect()
}
