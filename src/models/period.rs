//! Bar size enumeration (C1).
//!
//! `walkStep` is the chunking unit the planner uses to avoid handing a
//! provider a single-shot multi-decade intraday request; it is always
//! `>= barDuration` so chunking never subdivides below one bar.

use std::fmt;
use std::time::Duration;

const SECS_PER_DAY: u64 = 86_400;

/// Bar size, totally ordered by duration (see `Ord` impl below via the enum
/// discriminant order, which is declared smallest-first).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Period {
    OneMinute,
    FiveMinutes,
    FifteenMinutes,
    ThirtyMinutes,
    OneHour,
    OneDay,
    OneWeek,
    OneMonth,
    ThreeMonths,
}

impl Period {
    pub const ALL: [Self; 9] = [
        Self::OneMinute,
        Self::FiveMinutes,
        Self::FifteenMinutes,
        Self::ThirtyMinutes,
        Self::OneHour,
        Self::OneDay,
        Self::OneWeek,
        Self::OneMonth,
        Self::ThreeMonths,
    ];

    /// Catalog/config code, e.g. `"1d"`.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::OneMinute => "1m",
            Self::FiveMinutes => "5m",
            Self::FifteenMinutes => "15m",
            Self::ThirtyMinutes => "30m",
            Self::OneHour => "1h",
            Self::OneDay => "1d",
            Self::OneWeek => "1w",
            Self::OneMonth => "1mo",
            Self::ThreeMonths => "3mo",
        }
    }

    #[must_use]
    pub fn from_code(code: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.code() == code)
    }

    /// Nominal time between consecutive bars.
    #[must_use]
    pub const fn bar_duration(self) -> Duration {
        match self {
            Self::OneMinute => Duration::from_secs(60),
            Self::FiveMinutes => Duration::from_secs(5 * 60),
            Self::FifteenMinutes => Duration::from_secs(15 * 60),
            Self::ThirtyMinutes => Duration::from_secs(30 * 60),
            Self::OneHour => Duration::from_secs(3600),
            Self::OneDay => Duration::from_secs(SECS_PER_DAY),
            Self::OneWeek => Duration::from_secs(7 * SECS_PER_DAY),
            Self::OneMonth => Duration::from_secs(30 * SECS_PER_DAY),
            Self::ThreeMonths => Duration::from_secs(90 * SECS_PER_DAY),
        }
    }

    #[must_use]
    pub const fn is_intraday(self) -> bool {
        (self.bar_duration().as_secs()) < SECS_PER_DAY
    }

    /// The planner's chunking unit. Intraday periods scale `barDuration` by
    /// `24/5` to account for a 5-day trading week covering a 7-day wall
    /// clock span; daily+ periods map to flat 7d/30d approximations rather
    /// than the trading-week correction, matching the source's
    /// `get_delta_time`.
    #[must_use]
    pub fn walk_step(self) -> Duration {
        if self.is_intraday() {
            let secs = self.bar_duration().as_secs_f64() * (24.0 / 5.0);
            Duration::from_secs_f64(secs)
        } else {
            match self {
                Self::OneDay => Duration::from_secs(7 * SECS_PER_DAY),
                Self::OneWeek | Self::OneMonth | Self::ThreeMonths => {
                    Duration::from_secs(30 * SECS_PER_DAY)
                }
                _ => unreachable!("intraday periods handled above"),
            }
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_is_by_duration() {
        assert!(Period::OneMinute < Period::OneHour);
        assert!(Period::OneHour < Period::OneDay);
        assert!(Period::OneDay < Period::OneMonth);
    }

    #[test]
    fn intraday_classification() {
        assert!(Period::OneHour.is_intraday());
        assert!(!Period::OneDay.is_intraday());
        assert!(!Period::OneWeek.is_intraday());
    }

    #[test]
    fn walk_step_never_below_bar_duration() {
        for p in Period::ALL {
            assert!(p.walk_step() >= p.bar_duration());
        }
    }

    #[test]
    fn code_round_trips() {
        for p in Period::ALL {
            assert_eq!(Period::from_code(p.code()), Some(p));
        }
    }
}
