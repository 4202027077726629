//! Job planner (C9): expands the instrument catalog into an ordered list of
//! `DownloadJob`s, applying provider capability constraints (§4.7).

use chrono::{DateTime, Datelike, Duration as ChronoDuration, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;

use crate::catalog::{AssetClass, Catalog, CycleOutcome, InstrumentConfig};
use crate::constants::low_data_threshold;
use crate::error::VortexError;
use crate::models::instrument::{Instrument, MonthCode};
use crate::models::job::DownloadJob;
use crate::models::period::Period;
use crate::provider::DataProvider;

/// Plans jobs for every instrument in `catalog` against a single `provider`,
/// over the half-open calendar window `[start_year, end_year)`.
pub fn plan_catalog(
    catalog: &Catalog,
    provider: &dyn DataProvider,
    start_year: i32,
    end_year: i32,
    use_backup: bool,
) -> crate::error::Result<Vec<DownloadJob>> {
    let mut jobs = Vec::new();
    for (id, entry) in catalog {
        match plan_instrument(id, entry, provider, start_year, end_year, use_backup) {
            Ok(mut instrument_jobs) => jobs.append(&mut instrument_jobs),
            Err(VortexError::Validation { message, .. }) => {
                tracing::warn!(instrument = %id, %message, "skipping instrument");
            }
            Err(other) => return Err(other),
        }
    }
    Ok(jobs)
}

fn resolve_tz(entry: &InstrumentConfig) -> crate::error::Result<Tz> {
    entry.tz.parse::<Tz>().map_err(|_| {
        VortexError::config(format!("unrecognized timezone: {}", entry.tz))
    })
}

/// Step 1: intersect `[startYear, endYear)` with the instrument's own
/// `startDate` (if set) and "now" at the instrument's exchange tz.
fn effective_window(
    entry: &InstrumentConfig,
    tz: Tz,
    start_year: i32,
    end_year: i32,
) -> crate::error::Result<(DateTime<Utc>, DateTime<Utc>)> {
    let window_start = NaiveDate::from_ymd_opt(start_year, 1, 1)
        .ok_or_else(|| VortexError::config(format!("invalid startYear {start_year}")))?;
    let window_end = NaiveDate::from_ymd_opt(end_year, 1, 1)
        .ok_or_else(|| VortexError::config(format!("invalid endYear {end_year}")))?;

    let mut s = Utc.from_utc_datetime(&window_start.and_hms_opt(0, 0, 0).unwrap());
    if let Some(start_date) = entry.start_date {
        let start_dt = Utc.from_utc_datetime(&start_date.and_hms_opt(0, 0, 0).unwrap());
        s = s.max(start_dt);
    }

    let now_at_exchange = Utc::now().with_timezone(&tz).with_timezone(&Utc);
    let e = Utc
        .from_utc_datetime(&window_end.and_hms_opt(0, 0, 0).unwrap())
        .min(now_at_exchange);

    Ok((s, e))
}

/// Step 2: catalog-specified periods, or the provider's own supported set,
/// filtered to what the provider actually supports.
fn resolve_periods(entry: &InstrumentConfig, provider: &dyn DataProvider) -> Vec<Period> {
    let candidates: Vec<Period> = match &entry.periods {
        Some(codes) => codes.iter().filter_map(|c| Period::from_code(c)).collect(),
        None => provider.supported_periods().to_vec(),
    };
    candidates
        .into_iter()
        .filter(|p| {
            let supported = provider.supported_periods().contains(p);
            if !supported {
                tracing::info!(period = %p, provider = %provider.name(), "period unsupported, dropping");
            }
            supported
        })
        .collect()
}

fn plan_instrument(
    id: &str,
    entry: &InstrumentConfig,
    provider: &dyn DataProvider,
    start_year: i32,
    end_year: i32,
    use_backup: bool,
) -> crate::error::Result<Vec<DownloadJob>> {
    let tz = resolve_tz(entry)?;
    let (s, e) = effective_window(entry, tz, start_year, end_year)?;
    let periods = resolve_periods(entry, provider);

    match entry.asset_class {
        AssetClass::Stock | AssetClass::Forex => {
            plan_undated(id, entry, &periods, provider, s, e, use_backup)
        }
        AssetClass::Future => plan_future(id, entry, &periods, provider, tz, s, e, use_backup),
    }
}

fn plan_undated(
    id: &str,
    entry: &InstrumentConfig,
    periods: &[Period],
    provider: &dyn DataProvider,
    s: DateTime<Utc>,
    e: DateTime<Utc>,
    use_backup: bool,
) -> crate::error::Result<Vec<DownloadJob>> {
    let mut jobs = Vec::new();
    for &p in periods {
        let min_start = provider.min_start(p);
        if let Some(min_start) = min_start {
            if min_start > e {
                continue;
            }
        }

        let mut s_prime = min_start.map_or(s, |m| s.max(m));
        if p.is_intraday() {
            if let Some(tick_date) = entry.tick_date {
                let tick_dt = Utc.from_utc_datetime(&tick_date.and_hms_opt(0, 0, 0).unwrap());
                s_prime = s_prime.max(tick_dt);
            }
        }
        if s_prime > e {
            continue;
        }

        let instrument = match entry.asset_class {
            AssetClass::Stock => Instrument::Stock {
                id: id.to_string(),
                symbol: entry.code.clone(),
            },
            AssetClass::Forex => Instrument::Forex {
                id: id.to_string(),
                pair: entry.code.clone(),
            },
            AssetClass::Future => unreachable!("futures handled in plan_future"),
        };

        for (chunk_start, chunk_end) in chunk_range(s_prime, e, provider.max_window(p)) {
            jobs.push(DownloadJob::new(
                provider.name().to_string(),
                instrument.clone(),
                p,
                chunk_start,
                chunk_end,
                use_backup,
            )?);
        }
    }
    Ok(jobs)
}

/// Chunk `[start, end]` into sub-ranges no longer than `max_window`, or a
/// single range when unbounded.
fn chunk_range(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    max_window: Option<std::time::Duration>,
) -> Vec<(DateTime<Utc>, DateTime<Utc>)> {
    let Some(window) = max_window else {
        return vec![(start, end)];
    };
    let window = ChronoDuration::from_std(window).unwrap_or(ChronoDuration::days(365));
    let mut chunks = Vec::new();
    let mut cursor = start;
    while cursor < end {
        let chunk_end = (cursor + window).min(end);
        chunks.push((cursor, chunk_end));
        cursor = chunk_end;
    }
    chunks
}

#[allow(clippy::too_many_arguments)]
fn plan_future(
    id: &str,
    entry: &InstrumentConfig,
    periods: &[Period],
    provider: &dyn DataProvider,
    tz: Tz,
    s: DateTime<Utc>,
    e: DateTime<Utc>,
    use_backup: bool,
) -> crate::error::Result<Vec<DownloadJob>> {
    let cycle = match entry.resolved_cycle(id)? {
        CycleOutcome::Disabled => return Ok(Vec::new()),
        CycleOutcome::Codes(codes) if !codes.is_empty() => codes,
        CycleOutcome::Codes(_) | CycleOutcome::NotApplicable => {
            return Err(VortexError::config(format!(
                "future instrument {id} has no usable cycle"
            )))
        }
    };
    let days_count = entry.days_count.ok_or_else(|| {
        VortexError::config(format!("future instrument {id} missing daysCount"))
    })?;

    let threshold = low_data_threshold();
    let iter_end = e + ChronoDuration::days(days_count);

    let mut jobs = Vec::new();
    // iterate every (year, month) in [S, E + daysCount]
    let mut year = s.naive_utc().date().year();
    let mut month = s.naive_utc().date().month();

    loop {
        let Some(month_code) = MonthCode::from_calendar_month(month) else {
            break;
        };
        let current = Utc.from_utc_datetime(&NaiveDate::from_ymd_opt(year, month, 1).unwrap().and_hms_opt(0, 0, 0).unwrap());
        if current > iter_end {
            break;
        }

        if cycle.contains(&month_code) {
            let future = Instrument::Future {
                id: id.to_string(),
                root: entry.code.clone(),
                year,
                month_code,
                tick_date: entry.tick_date,
                days_count,
            };
            let (cs, ce) = future.contract_window(tz)?;
            let overlap_start = cs.max(s);
            let overlap_end = ce.min(e);
            if overlap_end - overlap_start >= threshold {
                for &p in periods {
                    if p.is_intraday() {
                        if let Some(tick_date) = entry.tick_date {
                            let tick_dt =
                                Utc.from_utc_datetime(&tick_date.and_hms_opt(0, 0, 0).unwrap());
                            if cs < tick_dt {
                                continue;
                            }
                        }
                    }
                    if let Some(min_start) = provider.min_start(p) {
                        if min_start > cs {
                            continue;
                        }
                    }
                    jobs.push(DownloadJob::new(
                        provider.name().to_string(),
                        future.clone(),
                        p,
                        cs,
                        ce,
                        use_backup,
                    )?);
                }
            }
        }

        month += 1;
        if month > 12 {
            month = 1;
            year += 1;
        }
    }

    Ok(jobs)
}
