use std::collections::BTreeSet;

use chrono::{Days, NaiveDate};
use tracing::debug;

use crate::labels::WEEKS_PER_YEAR;
use crate::period::{fiscal_quarter, Period};

/// Calendar bucket an aggregate row belongs to.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Bucket {
    Day(NaiveDate),
    Week(u32),
    Month(u32),
    Year(i32),
}

/// One grouped row from the aggregate query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregateRow {
    pub bucket: Bucket,
    pub entry_type: Option<String>,
    /// Number of records in the bucket.
    pub count: i64,
    /// Sum of `number_of_clients` over the bucket (0 for kinds without it).
    pub number_of_clients: i64,
}

impl AggregateRow {
    pub fn count_of(row: &AggregateRow) -> i64 {
        row.count
    }

    pub fn clients_of(row: &AggregateRow) -> i64 {
        row.number_of_clients
    }
}

/// Distinct years present in `rows`, ascending.
pub fn unique_years(rows: &[AggregateRow]) -> Vec<i32> {
    rows.iter()
        .filter_map(|row| match row.bucket {
            Bucket::Year(year) => Some(year),
            _ => None,
        })
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Dense bucket sequence a series is laid out on. Quarters are not listed
/// here; they are accumulated from months instead.
pub fn dense_buckets(period: Period, start: NaiveDate, unique_years: &[i32]) -> Vec<Bucket> {
    match period {
        Period::Day => (0..7)
            .filter_map(|offset| start.checked_add_days(Days::new(offset)))
            .map(Bucket::Day)
            .collect(),
        Period::Week => (1..=WEEKS_PER_YEAR).map(Bucket::Week).collect(),
        Period::Month => (1..=12).map(Bucket::Month).collect(),
        Period::Quarter => Vec::new(),
        Period::Year => unique_years.iter().copied().map(Bucket::Year).collect(),
    }
}

/// Lays sparse rows onto a dense bucket sequence, zero-filling gaps.
///
/// Rows are sorted by bucket first. Walking both sequences together, a row
/// whose bucket equals the current dense bucket contributes its value and is
/// consumed; otherwise the slot is 0 and the row waits. Rows whose bucket
/// falls between dense buckets (week 53, out-of-range dates) are skipped, and
/// rows sharing a bucket are summed.
pub fn reindex<F>(buckets: &[Bucket], rows: &[&AggregateRow], value: F) -> Vec<i64>
where
    F: Fn(&AggregateRow) -> i64,
{
    let mut sorted = rows.to_vec();
    sorted.sort_by(|a, b| a.bucket.cmp(&b.bucket));

    let mut data = Vec::with_capacity(buckets.len());
    let mut j = 0;
    for bucket in buckets {
        while j < sorted.len() && sorted[j].bucket < *bucket {
            debug!(bucket = ?sorted[j].bucket, "aggregate row outside the dense buckets");
            j += 1;
        }
        let mut total = 0;
        while j < sorted.len() && sorted[j].bucket == *bucket {
            total += value(sorted[j]);
            j += 1;
        }
        data.push(total);
    }
    data
}

/// Sums month rows into the four fiscal quarters.
pub fn accumulate_quarters<F>(rows: &[&AggregateRow], value: F) -> Vec<i64>
where
    F: Fn(&AggregateRow) -> i64,
{
    let mut data = vec![0; 4];
    for &row in rows {
        if let Bucket::Month(month) = row.bucket {
            data[fiscal_quarter(month) - 1] += value(row);
        }
    }
    data
}

/// Dense series for one data shape over the resolved period.
pub fn build_series<F>(
    period: Period,
    start: NaiveDate,
    unique_years: &[i32],
    rows: &[&AggregateRow],
    value: F,
) -> Vec<i64>
where
    F: Fn(&AggregateRow) -> i64,
{
    match period {
        Period::Quarter => accumulate_quarters(rows, value),
        _ => reindex(&dense_buckets(period, start, unique_years), rows, value),
    }
}

/// Series for models where every record counts once.
pub fn single_series(
    period: Period,
    start: NaiveDate,
    unique_years: &[i32],
    rows: &[AggregateRow],
) -> Vec<i64> {
    let rows: Vec<&AggregateRow> = rows.iter().collect();
    build_series(period, start, unique_years, &rows, AggregateRow::count_of)
}

/// Series of summed `number_of_clients` for one `type` of a grouped or bridge model.
pub fn typed_series(
    period: Period,
    start: NaiveDate,
    unique_years: &[i32],
    rows: &[AggregateRow],
    entry_type: &str,
) -> Vec<i64> {
    let rows: Vec<&AggregateRow> = rows
        .iter()
        .filter(|row| row.entry_type.as_deref() == Some(entry_type))
        .collect();
    build_series(period, start, unique_years, &rows, AggregateRow::clients_of)
}

/// Distinct types in order of first appearance after sorting by bucket.
pub fn distinct_types(rows: &[AggregateRow]) -> Vec<String> {
    let mut sorted: Vec<&AggregateRow> = rows.iter().collect();
    sorted.sort_by(|a, b| a.bucket.cmp(&b.bucket));

    let mut types: Vec<String> = Vec::new();
    for row in sorted {
        if let Some(t) = &row.entry_type {
            if !types.contains(t) {
                types.push(t.clone());
            }
        }
    }
    types
}
