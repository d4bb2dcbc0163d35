use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::datasets::{self, AggregateRow};
use crate::error::StoreError;
use crate::labels::generate_labels;
use crate::models::{ChartData, ChartShape, Dataset, RecordKind};
use crate::period::{resolve_period, ChartPeriod, Clock, GroupKey, Period};

/// Parameters of one grouped aggregate query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregateQuery {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub group_key: Option<GroupKey>,
    pub group_by_type: bool,
}

impl AggregateQuery {
    pub fn for_period(period: &ChartPeriod, group_by_type: bool) -> Self {
        Self {
            start: period.start,
            end: period.end,
            group_key: period.group_key,
            group_by_type,
        }
    }
}

/// Data-access capability the charts are computed from.
///
/// Implementations return one row per bucket (and type, when grouping by
/// type), sorted ascending by bucket.
#[async_trait]
pub trait AggregateSource: Send + Sync {
    async fn query_aggregates(
        &self,
        kind: RecordKind,
        query: AggregateQuery,
    ) -> Result<Vec<AggregateRow>, StoreError>;
}

/// Builds chart payloads for every record kind.
///
/// Query failures are returned as-is; nothing here retries or logs.
#[derive(Clone)]
pub struct ChartDataService {
    source: Arc<dyn AggregateSource>,
    clock: Arc<dyn Clock>,
}

impl ChartDataService {
    pub fn new(source: Arc<dyn AggregateSource>, clock: Arc<dyn Clock>) -> Self {
        Self { source, clock }
    }

    /// Chart for `kind`, shaped according to its [`ChartShape`].
    pub async fn series_for(
        &self,
        kind: RecordKind,
        period: Option<&str>,
        date: Option<&str>,
    ) -> Result<ChartData, StoreError> {
        match kind.shape() {
            ChartShape::Single => self.single_series(kind, period, date).await,
            ChartShape::Grouped => self.grouped_series(kind, period, date).await,
            ChartShape::Bridge => self.bridge_series(kind, period, date).await,
        }
    }

    /// One unlabeled dataset of record counts.
    pub async fn single_series(
        &self,
        kind: RecordKind,
        period: Option<&str>,
        date: Option<&str>,
    ) -> Result<ChartData, StoreError> {
        let resolved = self.resolve(period, date);
        let rows = self
            .source
            .query_aggregates(kind, AggregateQuery::for_period(&resolved, false))
            .await?;
        Ok(single_chart(&resolved, &rows))
    }

    /// One dataset per `type`, labelled with the type.
    pub async fn grouped_series(
        &self,
        kind: RecordKind,
        period: Option<&str>,
        date: Option<&str>,
    ) -> Result<ChartData, StoreError> {
        let resolved = self.resolve(period, date);
        let rows = self
            .source
            .query_aggregates(kind, AggregateQuery::for_period(&resolved, true))
            .await?;
        Ok(grouped_chart(&resolved, &rows))
    }

    /// Same payload as [`grouped_series`](Self::grouped_series). The parent's
    /// `number_of_clients` already reflects its participants.
    pub async fn bridge_series(
        &self,
        kind: RecordKind,
        period: Option<&str>,
        date: Option<&str>,
    ) -> Result<ChartData, StoreError> {
        self.grouped_series(kind, period, date).await
    }

    /// Total clients served across every record kind, as a single dataset.
    ///
    /// All kinds are fetched concurrently. For the yearly view the labels are
    /// the union of years seen in any kind, so every contribution lines up.
    pub async fn client_count_series(
        &self,
        period: Option<&str>,
        date: Option<&str>,
    ) -> Result<ChartData, StoreError> {
        let resolved = self.resolve(period, date);
        let fetch = |kind: RecordKind| {
            let query = AggregateQuery::for_period(&resolved, kind.is_typed());
            self.source.query_aggregates(kind, query)
        };

        let (meal, special_event, core_activity, project_activity, harm_reduction, referral) = tokio::try_join!(
            fetch(RecordKind::Meal),
            fetch(RecordKind::SpecialEvent),
            fetch(RecordKind::CoreActivity),
            fetch(RecordKind::ProjectActivity),
            fetch(RecordKind::HarmReduction),
            fetch(RecordKind::Referral),
        )?;
        let fetched = [
            (RecordKind::Meal, meal),
            (RecordKind::SpecialEvent, special_event),
            (RecordKind::CoreActivity, core_activity),
            (RecordKind::ProjectActivity, project_activity),
            (RecordKind::HarmReduction, harm_reduction),
            (RecordKind::Referral, referral),
        ];

        let years: Vec<i32> = fetched
            .iter()
            .flat_map(|(_, rows)| datasets::unique_years(rows))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let labels = generate_labels(resolved.period, resolved.start, &years);

        let mut merged = vec![0; labels.len()];
        for (kind, rows) in &fetched {
            for series in kind_series(*kind, &resolved, &years, rows) {
                for (slot, value) in merged.iter_mut().zip(series) {
                    *slot += value;
                }
            }
        }

        Ok(ChartData {
            from: resolved.start.to_string(),
            to: resolved.end.to_string(),
            labels,
            datasets: vec![Dataset {
                label: None,
                data: merged,
            }],
        })
    }

    fn resolve(&self, period: Option<&str>, date: Option<&str>) -> ChartPeriod {
        resolve_period(period, date, self.clock.as_ref())
    }
}

/// Reshapes single-model rows into a chart payload.
pub fn single_chart(resolved: &ChartPeriod, rows: &[AggregateRow]) -> ChartData {
    let years = years_for(resolved.period, rows);
    let labels = generate_labels(resolved.period, resolved.start, &years);
    let data = datasets::single_series(resolved.period, resolved.start, &years, rows);

    ChartData {
        from: resolved.start.to_string(),
        to: resolved.end.to_string(),
        labels,
        datasets: vec![Dataset { label: None, data }],
    }
}

/// Reshapes grouped or bridge rows into one labelled dataset per type.
pub fn grouped_chart(resolved: &ChartPeriod, rows: &[AggregateRow]) -> ChartData {
    let years = years_for(resolved.period, rows);
    let labels = generate_labels(resolved.period, resolved.start, &years);
    let series = datasets::distinct_types(rows)
        .into_iter()
        .map(|entry_type| Dataset {
            data: datasets::typed_series(resolved.period, resolved.start, &years, rows, &entry_type),
            label: Some(entry_type),
        })
        .collect();

    ChartData {
        from: resolved.start.to_string(),
        to: resolved.end.to_string(),
        labels,
        datasets: series,
    }
}

fn years_for(period: Period, rows: &[AggregateRow]) -> Vec<i32> {
    if period == Period::Year {
        datasets::unique_years(rows)
    } else {
        Vec::new()
    }
}

fn kind_series(kind: RecordKind, resolved: &ChartPeriod, years: &[i32], rows: &[AggregateRow]) -> Vec<Vec<i64>> {
    if kind.is_typed() {
        datasets::distinct_types(rows)
            .iter()
            .map(|t| datasets::typed_series(resolved.period, resolved.start, years, rows, t))
            .collect()
    } else {
        vec![datasets::single_series(resolved.period, resolved.start, years, rows)]
    }
}
