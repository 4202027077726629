//! The merge engine shared by the updating downloader (§4.9 step 6): given
//! existing bars and a freshly fetched window, produce the single series
//! that becomes the new persisted state.

use crate::error::Result;
use crate::models::series::PriceSeries;

/// Merges `existing` (possibly absent) with `incoming` (freshly fetched).
///
/// - No existing data: the incoming series is the result outright.
/// - Disjoint ranges: trust the new fetch as-is rather than splicing sparse
///   data into an unrelated history (the planner keeps this case rare).
/// - Overlapping or adjacent: concatenate and deduplicate by timestamp,
///   keeping the last occurrence — the new fetch wins on any conflict.
pub fn merge(existing: Option<PriceSeries>, incoming: PriceSeries) -> Result<PriceSeries> {
    let Some(existing) = existing else {
        return Ok(incoming);
    };
    if existing.is_empty() {
        return Ok(incoming);
    }
    if incoming.is_empty() {
        return Ok(existing);
    }

    let (existing_first, existing_last) = (existing.first_ts()?, existing.last_ts()?);
    let (incoming_first, incoming_last) = (incoming.first_ts()?, incoming.last_ts()?);

    if let (Some(ex_start), Some(ex_end), Some(nw_start), Some(nw_end)) =
        (existing_first, existing_last, incoming_first, incoming_last)
    {
        let disjoint = nw_end < ex_start || nw_start > ex_end;
        if disjoint {
            return Ok(incoming);
        }
    }

    existing.concat(incoming)?.sort_dedup()
}
