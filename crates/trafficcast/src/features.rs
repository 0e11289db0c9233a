//! Lagged feature windows for the forecasting model.
//!
//! Every anchor point `t` is described by the `S` values strictly preceding
//! it, most recent first: `[v[t-1], v[t-2], ..., v[t-S]]`. The same ordering
//! is used for the calendar windows (hour of day, day of week, day of year)
//! so all four tensors stay row-aligned.
//!
//! Calendar values are read in the configured named time zone, so daylight
//! saving transitions shift the hour of day the way local traffic does.

use chrono::{DateTime, Datelike, Timelike, Utc};
use chrono_tz::Tz;
use ndarray::Array2;

/// Default number of lag steps (24h of 15-minute buckets).
pub const DEFAULT_HISTORY_TIME_STEPS: usize = 96;

/// Builds row-aligned lag and calendar windows from an ordered history.
#[derive(Debug, Clone)]
pub struct FeatureWindowBuilder {
    window: usize,
    time_zone: Tz,
}

/// Four aligned `[num_anchors, S]` tensors plus the anchor timestamps.
#[derive(Debug, Clone)]
pub struct FeatureWindows {
    pub hour_of_day: Array2<i64>,
    pub day_of_week: Array2<i64>,
    pub day_of_year: Array2<i64>,
    pub lags: Array2<f32>,
    pub anchors: Vec<DateTime<Utc>>,
}

/// A single anchor's worth of features.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureRow {
    pub anchor: DateTime<Utc>,
    pub hour_of_day: Vec<i64>,
    pub day_of_week: Vec<i64>,
    pub day_of_year: Vec<i64>,
    pub lags: Vec<f32>,
}

impl FeatureWindowBuilder {
    /// Create a builder for windows of `window` steps.
    ///
    /// Calendar features are evaluated in `time_zone`. A zero window is
    /// bumped to one.
    pub fn new(window: usize, time_zone: Tz) -> Self {
        Self {
            window: window.max(1),
            time_zone,
        }
    }

    pub fn window(&self) -> usize {
        self.window
    }

    /// Minimum number of raw points that yields at least one anchor.
    pub fn min_points(&self) -> usize {
        self.window + 1
    }

    /// Build windows from `history`, ordered oldest first.
    ///
    /// Anchors without a full lag history are dropped, so the output has
    /// `history.len() - S` rows (or none when the history is too short).
    pub fn build(&self, history: &[(DateTime<Utc>, f64)]) -> FeatureWindows {
        let s = self.window;
        let rows = history.len().saturating_sub(s);

        let mut lags = Array2::<f32>::zeros((rows, s));
        let mut hour_of_day = Array2::<i64>::zeros((rows, s));
        let mut day_of_week = Array2::<i64>::zeros((rows, s));
        let mut day_of_year = Array2::<i64>::zeros((rows, s));
        let mut anchors = Vec::with_capacity(rows);

        for (row, t) in (s..history.len()).enumerate() {
            anchors.push(history[t].0);
            for k in 0..s {
                let (ts, value) = history[t - 1 - k];
                let (hour, weekday, yearday) = self.calendar(ts);
                lags[[row, k]] = value as f32;
                hour_of_day[[row, k]] = hour;
                day_of_week[[row, k]] = weekday;
                day_of_year[[row, k]] = yearday;
            }
        }

        FeatureWindows {
            hour_of_day,
            day_of_week,
            day_of_year,
            lags,
            anchors,
        }
    }

    /// Features for the step after the newest point.
    ///
    /// The window ends at, and includes, the newest value: `[v[n-1], ...,
    /// v[n-S]]`. The row's anchor is the newest point's timestamp, which is
    /// what forecast times are counted from. Needs [`min_points`] values.
    ///
    /// [`min_points`]: Self::min_points
    pub fn next_row(&self, history: &[(DateTime<Utc>, f64)]) -> Option<FeatureRow> {
        if history.len() < self.min_points() {
            return None;
        }
        let (anchor, _) = *history.last()?;
        let recent = &history[history.len() - self.window..];

        let mut row = FeatureRow {
            anchor,
            hour_of_day: Vec::with_capacity(self.window),
            day_of_week: Vec::with_capacity(self.window),
            day_of_year: Vec::with_capacity(self.window),
            lags: Vec::with_capacity(self.window),
        };
        for &(ts, value) in recent.iter().rev() {
            let (hour, weekday, yearday) = self.calendar(ts);
            row.lags.push(value as f32);
            row.hour_of_day.push(hour);
            row.day_of_week.push(weekday);
            row.day_of_year.push(yearday);
        }
        Some(row)
    }

    /// Hour of day, day of week (Monday = 0) and 1-based day of year.
    fn calendar(&self, ts: DateTime<Utc>) -> (i64, i64, i64) {
        let local = ts.with_timezone(&self.time_zone);
        (
            i64::from(local.hour()),
            i64::from(local.weekday().num_days_from_monday()),
            i64::from(local.ordinal()),
        )
    }
}

impl FeatureWindows {
    /// Number of valid anchors.
    pub fn len(&self) -> usize {
        self.anchors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.anchors.is_empty()
    }

    /// Extract the row for anchor `index`.
    pub fn row(&self, index: usize) -> Option<FeatureRow> {
        let anchor = *self.anchors.get(index)?;
        Some(FeatureRow {
            anchor,
            hour_of_day: self.hour_of_day.row(index).to_vec(),
            day_of_week: self.day_of_week.row(index).to_vec(),
            day_of_year: self.day_of_year.row(index).to_vec(),
            lags: self.lags.row(index).to_vec(),
        })
    }

    /// The most recent anchor's row, the forecaster's starting state.
    pub fn latest(&self) -> Option<FeatureRow> {
        self.len().checked_sub(1).and_then(|i| self.row(i))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn utc() -> Tz {
        chrono_tz::UTC
    }

    fn series(values: &[f64]) -> Vec<(DateTime<Utc>, f64)> {
        let start = Utc.with_ymd_and_hms(2024, 3, 4, 22, 30, 0).unwrap();
        values
            .iter()
            .enumerate()
            .map(|(i, v)| (start + Duration::minutes(15 * i as i64), *v))
            .collect()
    }

    #[test]
    fn test_six_point_scenario() {
        let history = series(&[10.0, 12.0, 11.0, 13.0, 9.0, 14.0]);
        let windows = FeatureWindowBuilder::new(3, utc()).build(&history);

        assert_eq!(windows.len(), 3);
        assert_eq!(windows.anchors[0], history[3].0);
        assert_eq!(windows.anchors[2], history[5].0);

        // Anchor holding 13 sees 10, 12, 11 before it.
        assert_eq!(windows.row(0).unwrap().lags, vec![11.0, 12.0, 10.0]);
        assert_eq!(windows.row(1).unwrap().lags, vec![13.0, 11.0, 12.0]);
        assert_eq!(windows.row(2).unwrap().lags, vec![9.0, 13.0, 11.0]);
    }

    #[test]
    fn test_double_window_input_yields_window_anchors() {
        let s = 4;
        let values: Vec<f64> = (0..2 * s).map(|v| v as f64 * 1.5).collect();
        let history = series(&values);
        let windows = FeatureWindowBuilder::new(s, utc()).build(&history);

        assert_eq!(windows.len(), s);
        assert_eq!(windows.lags.shape(), &[s, s]);
        assert_eq!(windows.hour_of_day.shape(), &[s, s]);
        for (row, t) in (s..history.len()).enumerate() {
            let expected: Vec<f32> = (1..=s).map(|k| history[t - k].1 as f32).collect();
            assert_eq!(windows.row(row).unwrap().lags, expected);
        }
    }

    #[test]
    fn test_calendar_windows_share_alignment() {
        // 22:30, 22:45, 23:00, 23:15, 23:30, 23:45, 00:00 (Tuesday), ...
        let history = series(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]);
        let windows = FeatureWindowBuilder::new(3, utc()).build(&history);
        let last = windows.latest().unwrap();

        // Anchor is index 7 (00:15 Tuesday); lags come from 00:00, 23:45, 23:30.
        assert_eq!(last.lags, vec![7.0, 6.0, 5.0]);
        assert_eq!(last.hour_of_day, vec![0, 23, 23]);
        assert_eq!(last.day_of_week, vec![1, 0, 0]);
        assert_eq!(last.day_of_year, vec![65, 64, 64]);
    }

    #[test]
    fn test_calendar_follows_named_zone() {
        let history = series(&[1.0, 2.0]);
        let windows = FeatureWindowBuilder::new(1, chrono_tz::America::Edmonton).build(&history);
        let row = windows.latest().unwrap();
        // 22:30 UTC in early March is 15:30 MST.
        assert_eq!(row.hour_of_day, vec![15]);
    }

    #[test]
    fn test_calendar_tracks_daylight_saving() {
        let builder = FeatureWindowBuilder::new(1, chrono_tz::America::Edmonton);

        // 15:00 UTC in June is 09:00 MDT.
        let june = Utc.with_ymd_and_hms(2024, 6, 3, 15, 0, 0).unwrap();
        let row = builder.next_row(&[(june - Duration::minutes(15), 0.0), (june, 1.0)]);
        assert_eq!(row.unwrap().hour_of_day, vec![9]);

        // Clocks jump from 02:00 MST to 03:00 MDT at 09:00 UTC on 2024-03-10.
        let start = Utc.with_ymd_and_hms(2024, 3, 10, 8, 15, 0).unwrap();
        let history: Vec<(DateTime<Utc>, f64)> = (0..5)
            .map(|i| (start + Duration::minutes(15 * i), i as f64))
            .collect();
        let row = FeatureWindowBuilder::new(4, chrono_tz::America::Edmonton)
            .next_row(&history)
            .unwrap();
        // 09:15, 09:00, 08:45, 08:30 UTC
        assert_eq!(row.hour_of_day, vec![3, 3, 1, 1]);
        assert_eq!(row.day_of_week, vec![6, 6, 6, 6]);
        assert_eq!(row.day_of_year, vec![70, 70, 70, 70]);
    }

    #[test]
    fn test_next_row_includes_newest_point() {
        let history = series(&[10.0, 12.0, 11.0, 13.0, 9.0, 14.0]);
        let builder = FeatureWindowBuilder::new(3, utc());
        let row = builder.next_row(&history).unwrap();

        assert_eq!(row.anchor, history[5].0);
        assert_eq!(row.lags, vec![14.0, 9.0, 13.0]);
        // 23:45, 23:30, 23:15 on Monday 2024-03-04.
        assert_eq!(row.hour_of_day, vec![23, 23, 23]);
        assert_eq!(row.day_of_week, vec![0, 0, 0]);
        assert_eq!(row.day_of_year, vec![64, 64, 64]);

        assert!(builder.next_row(&history[..3]).is_none());
        assert_eq!(builder.next_row(&history[..4]).unwrap().lags, vec![13.0, 11.0, 12.0]);
    }

    #[test]
    fn test_short_history_is_empty() {
        let builder = FeatureWindowBuilder::new(3, utc());
        assert_eq!(builder.min_points(), 4);

        let windows = builder.build(&series(&[1.0, 2.0, 3.0]));
        assert!(windows.is_empty());
        assert!(windows.latest().is_none());
        assert_eq!(windows.lags.shape(), &[0, 3]);

        let windows = builder.build(&series(&[1.0, 2.0, 3.0, 4.0]));
        assert_eq!(windows.len(), 1);
    }
}
