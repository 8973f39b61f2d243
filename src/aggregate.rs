//! Daily aggregates
//!
//! Rolls one local calendar day of derived events into the summary shown on
//! the home screen. Events are attributed to the local date of their start
//! (or timestamp for stair events).

use crate::types::{
    CommuteMode, CommuteSession, DailyAggregate, SedentaryStreak, StairEvent, WalkBout,
};
use chrono::{DateTime, FixedOffset, NaiveDate, Utc};

/// Events to aggregate; may span more than one day
#[derive(Debug, Clone, Copy, Default)]
pub struct DayEvents<'a> {
    pub bouts: &'a [WalkBout],
    pub stairs: &'a [StairEvent],
    pub commutes: &'a [CommuteSession],
    pub streaks: &'a [SedentaryStreak],
}

/// Aggregator bound to the user's local offset
pub struct DailyAggregator {
    offset: FixedOffset,
    streak_min_minutes: u32,
}

impl DailyAggregator {
    pub fn new(offset: FixedOffset, streak_min_minutes: u32) -> Self {
        Self {
            offset,
            streak_min_minutes,
        }
    }

    fn local_date(&self, instant: DateTime<Utc>) -> NaiveDate {
        instant.with_timezone(&self.offset).date_naive()
    }

    pub fn aggregate(&self, date: NaiveDate, events: DayEvents<'_>) -> DailyAggregate {
        let bouts: Vec<&WalkBout> = events
            .bouts
            .iter()
            .filter(|b| self.local_date(b.start) == date)
            .collect();
        let walk_bout_minutes: i64 = bouts.iter().map(|b| b.duration_sec() / 60).sum();

        let (flights_up, flights_down) = events
            .stairs
            .iter()
            .filter(|e| self.local_date(e.timestamp) == date)
            .fold((0u32, 0u32), |(up, down), e| {
                (up.saturating_add(e.flights_up), down.saturating_add(e.flights_down))
            });

        let commute_minutes = |mode: CommuteMode| -> i64 {
            events
                .commutes
                .iter()
                .filter(|c| c.mode == mode && self.local_date(c.start) == date)
                .map(|c| c.duration_minutes())
                .sum()
        };

        let long_sedentary_streaks = events
            .streaks
            .iter()
            .filter(|s| self.local_date(s.start) == date)
            .filter(|s| s.duration_minutes >= self.streak_min_minutes)
            .count();

        DailyAggregate {
            date,
            walk_bouts_count: to_u32(bouts.len() as i64),
            walk_bout_minutes: to_u32(walk_bout_minutes),
            flights_up,
            flights_down,
            commute_walk_min: to_u32(commute_minutes(CommuteMode::Walk)),
            commute_auto_min: to_u32(commute_minutes(CommuteMode::Automotive)),
            commute_cycle_min: to_u32(commute_minutes(CommuteMode::Cycle)),
            long_sedentary_streaks: to_u32(long_sedentary_streaks as i64),
        }
    }
}

/// Aggregate `date` in the zone given by `offset`
pub fn aggregate_day(
    date: NaiveDate,
    offset: FixedOffset,
    events: DayEvents<'_>,
    streak_min_minutes: u32,
) -> DailyAggregate {
    DailyAggregator::new(offset, streak_min_minutes).aggregate(date, events)
}

fn to_u32(value: i64) -> u32 {
    u32::try_from(value.max(0)).unwrap_or(u32::MAX)
}
