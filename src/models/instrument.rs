//! Instrument model (C2): a tagged variant over the three asset families this
//! engine downloads. `Future` is the only dated variant and carries its own
//! contract-window arithmetic.

use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;

use crate::error::{ErrorContext, VortexError};

/// Futures delivery month code, in exchange-standard order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MonthCode {
    F,
    G,
    H,
    J,
    K,
    M,
    N,
    Q,
    U,
    V,
    X,
    Z,
}

impl MonthCode {
    pub const ALL: [Self; 12] = [
        Self::F,
        Self::G,
        Self::H,
        Self::J,
        Self::K,
        Self::M,
        Self::N,
        Self::Q,
        Self::U,
        Self::V,
        Self::X,
        Self::Z,
    ];

    #[must_use]
    pub const fn as_char(self) -> char {
        match self {
            Self::F => 'F',
            Self::G => 'G',
            Self::H => 'H',
            Self::J => 'J',
            Self::K => 'K',
            Self::M => 'M',
            Self::N => 'N',
            Self::Q => 'Q',
            Self::U => 'U',
            Self::V => 'V',
            Self::X => 'X',
            Self::Z => 'Z',
        }
    }

    #[must_use]
    pub const fn from_char(c: char) -> Option<Self> {
        Some(match c {
            'F' => Self::F,
            'G' => Self::G,
            'H' => Self::H,
            'J' => Self::J,
            'K' => Self::K,
            'M' => Self::M,
            'N' => Self::N,
            'Q' => Self::Q,
            'U' => Self::U,
            'V' => Self::V,
            'X' => Self::X,
            'Z' => Self::Z,
            _ => return None,
        })
    }

    /// Calendar month, 1-indexed (January = 1).
    #[must_use]
    pub const fn calendar_month(self) -> u32 {
        match self {
            Self::F => 1,
            Self::G => 2,
            Self::H => 3,
            Self::J => 4,
            Self::K => 5,
            Self::M => 6,
            Self::N => 7,
            Self::Q => 8,
            Self::U => 9,
            Self::V => 10,
            Self::X => 11,
            Self::Z => 12,
        }
    }

    #[must_use]
    pub const fn from_calendar_month(month: u32) -> Option<Self> {
        Some(match month {
            1 => Self::F,
            2 => Self::G,
            3 => Self::H,
            4 => Self::J,
            5 => Self::K,
            6 => Self::M,
            7 => Self::N,
            8 => Self::Q,
            9 => Self::U,
            10 => Self::V,
            11 => Self::X,
            12 => Self::Z,
            _ => return None,
        })
    }

    /// Parse a root's cycle string, e.g. `"GJMQVZ"`.
    #[must_use]
    pub fn parse_cycle(cycle: &str) -> Vec<Self> {
        cycle.chars().filter_map(Self::from_char).collect()
    }
}

/// Sum type over the asset classes this engine handles. All variants share
/// an `id`; only `Future` is dated.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Instrument {
    Stock { id: String, symbol: String },
    Forex { id: String, pair: String },
    Future {
        id: String,
        root: String,
        year: i32,
        month_code: MonthCode,
        tick_date: Option<NaiveDate>,
        days_count: i64,
    },
}

impl Instrument {
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::Stock { id, .. } | Self::Forex { id, .. } | Self::Future { id, .. } => id,
        }
    }

    /// Trading symbol. For futures this is `root ∥ monthCode ∥ (year mod 100)`.
    #[must_use]
    pub fn symbol(&self) -> String {
        match self {
            Self::Stock { symbol, .. } => symbol.clone(),
            Self::Forex { pair, .. } => pair.clone(),
            Self::Future {
                root,
                year,
                month_code,
                ..
            } => format!("{root}{}{:02}", month_code.as_char(), year.rem_euclid(100)),
        }
    }

    #[must_use]
    pub const fn is_dated(&self) -> bool {
        matches!(self, Self::Future { .. })
    }

    /// Code used in path construction and logging — the contract symbol for
    /// futures, the plain symbol otherwise.
    #[must_use]
    pub fn code(&self) -> String {
        self.symbol()
    }

    /// `[start, end]` during which a dated future's bars are expected to
    /// exist: `end` is the last calendar day of the expiry month at
    /// midnight in `tz`; `start = end - daysCount`.
    pub fn contract_window(&self, tz: Tz) -> crate::error::Result<(DateTime<Utc>, DateTime<Utc>)> {
        let Self::Future {
            year,
            month_code,
            days_count,
            ..
        } = self
        else {
            return Err(VortexError::validation(
                "contract_window called on a non-dated instrument",
                ErrorContext::new().with_instrument(self.id()),
            ));
        };

        let month = month_code.calendar_month();
        let last_day = last_day_of_month(*year, month).ok_or_else(|| {
            VortexError::validation(
                format!("invalid contract month {year}-{month:02}"),
                ErrorContext::new().with_instrument(self.id()),
            )
        })?;

        let end_local = tz
            .from_local_datetime(&last_day.and_hms_opt(0, 0, 0).unwrap())
            .single()
            .ok_or_else(|| {
                VortexError::validation(
                    "ambiguous or nonexistent local midnight for contract end",
                    ErrorContext::new().with_instrument(self.id()),
                )
            })?;
        let end = end_local.with_timezone(&Utc);
        let start = end - chrono::Duration::days(*days_count);
        Ok((start, end))
    }
}

/// Last calendar day of `(year, month)`, handling leap years via the next
/// month's first day minus one day.
fn last_day_of_month(year: i32, month: u32) -> Option<NaiveDate> {
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    NaiveDate::from_ymd_opt(next_year, next_month, 1).map(|d| d.pred_opt().unwrap())
}
