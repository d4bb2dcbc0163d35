use chrono::{Datelike, Days, NaiveDate};

use crate::period::Period;

pub const WEEKS_PER_YEAR: u32 = 52;

const MONTH_NAMES: [&str; 12] = [
    "January",
    "February",
    "March",
    "April",
    "May",
    "June",
    "July",
    "August",
    "September",
    "October",
    "November",
    "December",
];

/// Builds the x-axis labels for a chart.
///
/// `start` is the resolved range start. Day labels walk forward from it;
/// week, month and quarter labels only use its year. Year labels are exactly
/// `unique_years`, so a year with no records gets no label.
pub fn generate_labels(period: Period, start: NaiveDate, unique_years: &[i32]) -> Vec<String> {
    let year = start.year();
    match period {
        Period::Day => (0..7)
            .filter_map(|offset| start.checked_add_days(Days::new(offset)))
            .map(day_label)
            .collect(),
        Period::Week => (1..=WEEKS_PER_YEAR)
            .map(|week| format!("Week {} {}", week, year))
            .collect(),
        Period::Month => MONTH_NAMES
            .iter()
            .map(|name| format!("{} {}", name, year))
            .collect(),
        Period::Quarter => (1..=4).map(|q| format!("Q{} {}", q, year)).collect(),
        Period::Year => unique_years.iter().map(|y| y.to_string()).collect(),
    }
}

/// `Mon, Jan 1, 2024`
pub fn day_label(date: NaiveDate) -> String {
    date.format("%a, %b %-d, %Y").to_string()
}
