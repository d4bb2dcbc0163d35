use chrono::{Datelike, Days, Local, NaiveDate};

/// First year covered by the yearly chart.
pub const EPOCH_YEAR: i32 = 1996;

/// Source of "today" for period resolution.
pub trait Clock: Send + Sync {
    fn today(&self) -> NaiveDate;
}

/// Wall clock in the server's local timezone.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn today(&self) -> NaiveDate {
        Local::now().date_naive()
    }
}

/// Clock pinned to a single day.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub NaiveDate);

impl Clock for FixedClock {
    fn today(&self) -> NaiveDate {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Period {
    Day,
    Week,
    Month,
    Quarter,
    Year,
}

impl Period {
    /// Lenient parse: unknown, empty or missing codes mean `Day`.
    pub fn from_code(code: Option<&str>) -> Self {
        match code.map(|c| c.trim().to_ascii_lowercase()).as_deref() {
            Some("w") | Some("week") => Period::Week,
            Some("m") | Some("month") => Period::Month,
            Some("q") | Some("quarter") => Period::Quarter,
            Some("y") | Some("year") => Period::Year,
            _ => Period::Day,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Period::Day => "d",
            Period::Week => "w",
            Period::Month => "m",
            Period::Quarter => "q",
            Period::Year => "y",
        }
    }

    /// Bucket function the aggregate query groups dates by. `None` groups by raw date.
    pub fn group_key(&self) -> Option<GroupKey> {
        match self {
            Period::Day => None,
            Period::Week => Some(GroupKey::Week),
            Period::Month | Period::Quarter => Some(GroupKey::Month),
            Period::Year => Some(GroupKey::Year),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupKey {
    Week,
    Month,
    Year,
}

/// Resolved chart window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChartPeriod {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub group_key: Option<GroupKey>,
    pub period: Period,
}

/// Parses a strict `yyyy-mm-dd` date.
pub fn parse_iso_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    // chrono accepts unpadded fields, the wire format does not
    if value.len() != 10 {
        return None;
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d").ok()
}

/// Resolves a period code and anchor date into the chart's date range.
///
/// Neither argument can make this fail: an unrecognized code falls back to
/// the 7-day view and an unparsable anchor falls back to `clock.today()`.
/// Every period except `Day` spans the whole calendar year of the anchor,
/// apart from `Year`, which runs from [`EPOCH_YEAR`] up to today.
pub fn resolve_period(code: Option<&str>, anchor: Option<&str>, clock: &dyn Clock) -> ChartPeriod {
    let period = Period::from_code(code);
    let anchor = anchor
        .and_then(parse_iso_date)
        .unwrap_or_else(|| clock.today());

    let (start, end) = match period {
        Period::Day => {
            let start = anchor.checked_sub_days(Days::new(6)).unwrap_or(anchor);
            (start, anchor)
        }
        Period::Week | Period::Month | Period::Quarter => year_bounds(anchor.year()),
        Period::Year => (first_of_year(EPOCH_YEAR), clock.today()),
    };

    ChartPeriod {
        start,
        end,
        group_key: period.group_key(),
        period,
    }
}

/// Fiscal quarter of a month (1-12). The fiscal year starts in April.
pub fn fiscal_quarter(month: u32) -> usize {
    match month {
        4..=6 => 1,
        7..=9 => 2,
        10..=12 => 3,
        _ => 4,
    }
}

pub fn year_bounds(year: i32) -> (NaiveDate, NaiveDate) {
    let start = first_of_year(year);
    let end = NaiveDate::from_ymd_opt(year, 12, 31).unwrap_or(start);
    (start, end)
}

fn first_of_year(year: i32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, 1, 1).unwrap_or(NaiveDate::MIN)
}
