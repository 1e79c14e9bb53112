use crate::models::{OrderStatus, RecordDate, ServiceOrder};
use crate::pipeline::PipelineConfig;
use chrono::{DateTime, Datelike, Duration, Months, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

const MONTH_LABELS: [&str; 12] = [
    "jan", "fev", "mar", "abr", "mai", "jun", "jul", "ago", "set", "out", "nov", "dez",
];
const SERIES_MONTHS: u32 = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeriodFilter {
    #[default]
    All,
    Week,
    Month,
}

/// `"all"` or a responsible-user name.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ResponsibleFilter {
    #[default]
    All,
    Named(String),
}

impl From<String> for ResponsibleFilter {
    fn from(value: String) -> Self {
        let trimmed = value.trim();
        if trimmed.is_empty() || trimmed == "all" {
            Self::All
        } else {
            Self::Named(trimmed.to_string())
        }
    }
}

impl From<ResponsibleFilter> for String {
    fn from(value: ResponsibleFilter) -> Self {
        match value {
            ResponsibleFilter::All => "all".to_string(),
            ResponsibleFilter::Named(name) => name,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardQuery {
    #[serde(default)]
    pub period: PeriodFilter,
    #[serde(default)]
    pub responsible_filter: ResponsibleFilter,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Kpis {
    pub open_value: f64,
    pub delivered_value: f64,
    pub in_progress: u32,
    pub overdue: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusCount {
    pub status: OrderStatus,
    pub label: String,
    pub color: String,
    pub count: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthlySeries {
    pub labels: Vec<String>,
    pub created: Vec<u32>,
    pub delivered: Vec<u32>,
    pub active: Vec<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardView {
    pub filtered_orders: Vec<ServiceOrder>,
    pub kpis: Kpis,
    pub status_breakdown: Vec<StatusCount>,
    pub monthly_series: MonthlySeries,
}

enum DateState {
    Absent,
    At(DateTime<Utc>),
    Malformed,
}

fn date_state(date: Option<&RecordDate>) -> DateState {
    match date {
        None => DateState::Absent,
        Some(raw) if raw.as_str().trim().is_empty() => DateState::Absent,
        Some(raw) => raw.resolve().map(DateState::At).unwrap_or(DateState::Malformed),
    }
}

pub fn build_dashboard(
    orders: &[ServiceOrder],
    query: &DashboardQuery,
    pipeline: &PipelineConfig,
    now: DateTime<Utc>,
) -> DashboardView {
    let filtered_orders = filter_orders(orders, query, now);
    let kpis = compute_kpis(&filtered_orders, pipeline, now);
    let status_breakdown = status_breakdown(&filtered_orders, pipeline);
    let monthly_series = monthly_series(orders, now);
    tracing::debug!(
        total = orders.len(),
        filtered = filtered_orders.len(),
        period = ?query.period,
        "dashboard aggregated"
    );
    DashboardView {
        filtered_orders,
        kpis,
        status_breakdown,
        monthly_series,
    }
}

/// Lower bound of the period window. `Month` uses calendar arithmetic, so the
/// day clamps to the end of a shorter month (Mar 31 becomes Feb 29 or 28).
pub fn period_start(period: PeriodFilter, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    match period {
        PeriodFilter::All => None,
        PeriodFilter::Week => Some(now - Duration::days(7)),
        PeriodFilter::Month => now.checked_sub_months(Months::new(1)),
    }
}

pub fn filter_orders(orders: &[ServiceOrder], query: &DashboardQuery, now: DateTime<Utc>) -> Vec<ServiceOrder> {
    let since = period_start(query.period, now);
    orders
        .iter()
        .filter(|order| match &query.responsible_filter {
            ResponsibleFilter::All => true,
            ResponsibleFilter::Named(name) => order.responsible == *name,
        })
        .filter(|order| match since {
            None => query.period == PeriodFilter::All,
            Some(since) => order
                .creation_date
                .resolve()
                .map(|created| created >= since)
                .unwrap_or(false),
        })
        .cloned()
        .collect()
}

pub fn compute_kpis(orders: &[ServiceOrder], pipeline: &PipelineConfig, now: DateTime<Utc>) -> Kpis {
    let first = pipeline.first_stage();
    let mut kpis = Kpis::default();
    for order in orders {
        let terminal = pipeline.is_terminal(order.status);
        if let Some(value) = order.value.filter(|value| value.is_finite()) {
            if terminal {
                kpis.delivered_value += value;
            } else {
                kpis.open_value += value;
            }
        }
        if !terminal && order.status != first {
            kpis.in_progress += 1;
        }
        if !terminal {
            if let DateState::At(expected) = date_state(order.expected_delivery_date.as_ref()) {
                if expected < now {
                    kpis.overdue += 1;
                }
            }
        }
    }
    kpis
}

pub fn status_breakdown(orders: &[ServiceOrder], pipeline: &PipelineConfig) -> Vec<StatusCount> {
    pipeline
        .columns()
        .iter()
        .filter(|column| !pipeline.is_terminal(column.status))
        .map(|column| StatusCount {
            status: column.status,
            label: column.title.clone(),
            color: column.color.clone(),
            count: orders.iter().filter(|order| order.status == column.status).count() as u32,
        })
        .collect()
}

/// Twelve calendar months ending with the month of `now`, oldest first.
pub fn monthly_series(orders: &[ServiceOrder], now: DateTime<Utc>) -> MonthlySeries {
    let mut series = MonthlySeries::default();
    let Some(current) = NaiveDate::from_ymd_opt(now.year(), now.month(), 1) else {
        return series;
    };

    for back in (0..SERIES_MONTHS).rev() {
        let Some(month_start) = current.checked_sub_months(Months::new(back)) else {
            continue;
        };
        let Some(next_start) = month_start.checked_add_months(Months::new(1)) else {
            continue;
        };
        let (Some(start), Some(end)) = (midnight(month_start), midnight(next_start)) else {
            continue;
        };
        let in_month = |instant: DateTime<Utc>| instant >= start && instant < end;

        let mut created = 0u32;
        let mut delivered = 0u32;
        let mut active = 0u32;
        for order in orders {
            let creation = order.creation_date.resolve();
            let delivery = date_state(order.delivery_date.as_ref());

            if creation.is_some_and(in_month) {
                created += 1;
            }
            if let DateState::At(at) = delivery {
                if in_month(at) {
                    delivered += 1;
                }
            }
            let Some(creation) = creation else {
                continue;
            };
            let still_open = match delivery {
                DateState::Absent => true,
                DateState::At(at) => at >= start,
                DateState::Malformed => false,
            };
            if creation < end && still_open {
                active += 1;
            }
        }

        series.labels.push(format!(
            "{}/{:02}",
            MONTH_LABELS[month_start.month0() as usize],
            month_start.year().rem_euclid(100)
        ));
        series.created.push(created);
        series.delivered.push(delivered);
        series.active.push(active);
    }
    series
}

/// Sorted distinct responsible names for the filter dropdown.
pub fn responsible_options(orders: &[ServiceOrder]) -> Vec<String> {
    orders
        .iter()
        .map(|order| order.responsible.trim())
        .filter(|name| !name.is_empty())
        .map(ToString::to_string)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

fn midnight(date: NaiveDate) -> Option<DateTime<Utc>> {
    date.and_hms_opt(0, 0, 0).map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests::sample_order;
    use chrono::TimeZone;

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).unwrap()
    }

    fn order(id: &str, status: OrderStatus, value: Option<f64>, created: &str) -> ServiceOrder {
        let mut order = sample_order(id, id, status);
        order.value = value;
        order.creation_date = RecordDate::from(created);
        order
    }

    fn month_query() -> DashboardQuery {
        DashboardQuery {
            period: PeriodFilter::Month,
            responsible_filter: ResponsibleFilter::All,
        }
    }

    #[test]
    fn month_period_uses_calendar_subtraction() {
        let orders = vec![order("a", OrderStatus::AwaitingProduct, Some(1000.0), "2024-01-15")];
        assert_eq!(filter_orders(&orders, &month_query(), at(2024, 2, 10)).len(), 1);
        assert!(filter_orders(&orders, &month_query(), at(2024, 3, 20)).is_empty());
    }

    #[test]
    fn month_subtraction_clamps_to_month_end() {
        let now = Utc.with_ymd_and_hms(2024, 3, 31, 10, 0, 0).unwrap();
        let start = period_start(PeriodFilter::Month, now).expect("start");
        assert_eq!(start, Utc.with_ymd_and_hms(2024, 2, 29, 10, 0, 0).unwrap());
    }

    #[test]
    fn week_period_and_responsible_filter_combine() {
        let mut mine = order("a", OrderStatus::Production, Some(10.0), "2024-02-05");
        mine.responsible = "Bruno".to_string();
        let theirs = order("b", OrderStatus::Production, Some(10.0), "2024-02-06");
        let old = {
            let mut old = order("c", OrderStatus::Production, Some(10.0), "2024-01-01");
            old.responsible = "Bruno".to_string();
            old
        };
        let query = DashboardQuery {
            period: PeriodFilter::Week,
            responsible_filter: ResponsibleFilter::from("Bruno".to_string()),
        };
        let filtered = filter_orders(&[mine, theirs, old], &query, at(2024, 2, 8));
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].id, "a");
    }

    #[test]
    fn malformed_creation_date_only_passes_all_period() {
        let orders = vec![order("a", OrderStatus::Production, Some(5.0), "ontem")];
        assert!(filter_orders(&orders, &month_query(), at(2024, 2, 10)).is_empty());
        assert_eq!(filter_orders(&orders, &DashboardQuery::default(), at(2024, 2, 10)).len(), 1);
    }

    #[test]
    fn kpis_split_value_between_open_and_delivered() {
        let delivered = order("a", OrderStatus::Delivered, Some(500.0), "2023-01-01");
        let mut production = order("b", OrderStatus::Production, Some(800.0), "2023-01-01");
        production.expected_delivery_date = Some(RecordDate::from("2023-01-01"));
        let orders = vec![delivered, production];

        let kpis = compute_kpis(&orders, &PipelineConfig::default(), at(2024, 1, 1));
        assert_eq!(kpis.delivered_value, 500.0);
        assert_eq!(kpis.open_value, 800.0);
        assert_eq!(kpis.overdue, 1);
        assert_eq!(kpis.in_progress, 1);
    }

    #[test]
    fn in_progress_excludes_first_and_terminal_stages() {
        let orders = vec![
            order("a", OrderStatus::AwaitingProduct, None, "2024-01-01"),
            order("b", OrderStatus::Editing, None, "2024-01-01"),
            order("c", OrderStatus::Approval, None, "2024-01-01"),
            order("d", OrderStatus::Delivered, None, "2024-01-01"),
        ];
        let kpis = compute_kpis(&orders, &PipelineConfig::default(), at(2024, 1, 1));
        assert_eq!(kpis.in_progress, 2);
    }

    #[test]
    fn overdue_ignores_delivered_future_and_malformed_dates() {
        let mut delivered = order("a", OrderStatus::Delivered, None, "2023-01-01");
        delivered.expected_delivery_date = Some(RecordDate::from("2023-01-01"));
        let mut future = order("b", OrderStatus::Production, None, "2023-01-01");
        future.expected_delivery_date = Some(RecordDate::from("2024-06-01"));
        let mut garbage = order("c", OrderStatus::Production, None, "2023-01-01");
        garbage.expected_delivery_date = Some(RecordDate::from("semana que vem"));
        let mut exact = order("d", OrderStatus::Production, None, "2023-01-01");
        exact.expected_delivery_date = Some(RecordDate::from(at(2024, 1, 1)));

        let kpis = compute_kpis(&[delivered, future, garbage, exact], &PipelineConfig::default(), at(2024, 1, 1));
        assert_eq!(kpis.overdue, 0);
    }

    #[test]
    fn malformed_values_are_excluded_from_sums() {
        let orders = vec![
            order("a", OrderStatus::Production, None, "2024-01-01"),
            order("b", OrderStatus::Production, Some(250.5), "2024-01-01"),
        ];
        let view = build_dashboard(&orders, &DashboardQuery::default(), &PipelineConfig::default(), at(2024, 1, 2));
        assert_eq!(view.kpis.open_value, 250.5);
        assert_eq!(view.filtered_orders.len(), 2);
    }

    #[test]
    fn breakdown_follows_column_order_and_skips_terminal() {
        let orders = vec![
            order("a", OrderStatus::Editing, None, "2024-01-01"),
            order("b", OrderStatus::Editing, None, "2024-01-01"),
            order("c", OrderStatus::Delivered, None, "2024-01-01"),
        ];
        let pipeline = PipelineConfig::default();
        let breakdown = status_breakdown(&orders, &pipeline);
        let statuses: Vec<OrderStatus> = breakdown.iter().map(|entry| entry.status).collect();
        assert_eq!(
            statuses,
            vec![
                OrderStatus::AwaitingProduct,
                OrderStatus::Production,
                OrderStatus::Editing,
                OrderStatus::Approval
            ]
        );
        assert_eq!(breakdown[2].count, 2);
        assert_eq!(breakdown[2].color, "#8b5cf6");
    }

    #[test]
    fn monthly_series_covers_twelve_months_ending_now() {
        let series = monthly_series(&[], at(2024, 3, 15));
        assert_eq!(series.labels.len(), 12);
        assert_eq!(series.labels.first().map(String::as_str), Some("abr/23"));
        assert_eq!(series.labels.last().map(String::as_str), Some("mar/24"));
        assert!(series.created.iter().all(|count| *count == 0));
    }

    #[test]
    fn monthly_series_counts_created_delivered_and_active() {
        let mut shipped = order("a", OrderStatus::Delivered, None, "2024-01-10");
        shipped.delivery_date = Some(RecordDate::from("2024-02-20"));
        let open = order("b", OrderStatus::Production, None, "2024-02-03");
        let mut broken = order("c", OrderStatus::Delivered, None, "2024-01-05");
        broken.delivery_date = Some(RecordDate::from("???"));

        let series = monthly_series(&[shipped, open, broken], at(2024, 3, 15));
        let index = |label: &str| series.labels.iter().position(|l| l == label).expect("label");
        let (jan, feb, mar) = (index("jan/24"), index("fev/24"), index("mar/24"));

        assert_eq!(series.created[jan], 2);
        assert_eq!(series.created[feb], 1);
        assert_eq!(series.delivered[feb], 1);
        assert_eq!(series.delivered[jan], 0);
        assert_eq!(series.active[jan], 1);
        assert_eq!(series.active[feb], 2);
        assert_eq!(series.active[mar], 1);
    }

    #[test]
    fn week_window_includes_its_exact_lower_bound() {
        let now = at(2024, 2, 8);
        let mut boundary = order("a", OrderStatus::Production, None, "2024-01-01");
        boundary.creation_date = RecordDate::from(now - Duration::days(7));
        let mut just_before = order("b", OrderStatus::Production, None, "2024-01-01");
        just_before.creation_date = RecordDate::from(now - Duration::days(7) - Duration::seconds(1));
        let query = DashboardQuery {
            period: PeriodFilter::Week,
            responsible_filter: ResponsibleFilter::All,
        };

        let filtered = filter_orders(&[boundary, just_before], &query, now);
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].id, "a");
    }

    #[test]
    fn delivery_at_month_start_still_counts_as_active_that_month() {
        let mut shipped = order("a", OrderStatus::Delivered, None, "2024-01-10");
        shipped.delivery_date = Some(RecordDate::from("2024-03-01T00:00:00Z"));

        let series = monthly_series(&[shipped], at(2024, 6, 15));
        let index = |label: &str| series.labels.iter().position(|l| l == label).expect("label");
        let (feb, mar, apr) = (index("fev/24"), index("mar/24"), index("abr/24"));

        assert_eq!(series.active[feb], 1);
        assert_eq!(series.active[mar], 1);
        assert_eq!(series.active[apr], 0);
        assert_eq!(series.delivered[feb], 0);
        assert_eq!(series.delivered[mar], 1);
    }

    #[test]
    fn last_minute_of_month_belongs_to_that_month() {
        let mut closed = order("a", OrderStatus::Delivered, None, "2024-01-31T23:59:00Z");
        closed.delivery_date = Some(RecordDate::from("2024-01-31T23:59:30Z"));
        let open = order("b", OrderStatus::Production, None, "2024-01-31T23:59:00Z");

        let series = monthly_series(&[closed, open], at(2024, 6, 15));
        let index = |label: &str| series.labels.iter().position(|l| l == label).expect("label");
        let (dec, jan, feb) = (index("dez/23"), index("jan/24"), index("fev/24"));

        assert_eq!(series.created[dec], 0);
        assert_eq!(series.created[jan], 2);
        assert_eq!(series.created[feb], 0);
        assert_eq!(series.delivered[jan], 1);
        assert_eq!(series.active[dec], 0);
        assert_eq!(series.active[jan], 2);
        assert_eq!(series.active[feb], 1);
    }

    #[test]
    fn responsible_options_are_sorted_and_distinct() {
        let mut a = order("a", OrderStatus::Production, None, "2024-01-01");
        a.responsible = "Carla".to_string();
        let mut b = order("b", OrderStatus::Production, None, "2024-01-01");
        b.responsible = String::new();
        let c = order("c", OrderStatus::Production, None, "2024-01-01");
        assert_eq!(responsible_options(&[a, b, c]), vec!["Ana".to_string(), "Carla".to_string()]);
    }

    #[test]
    fn responsible_filter_round_trips_through_json() {
        let query: DashboardQuery =
            serde_json::from_value(serde_json::json!({"period": "week", "responsibleFilter": "all"}))
                .expect("query");
        assert_eq!(query.responsible_filter, ResponsibleFilter::All);
        assert_eq!(
            serde_json::to_value(ResponsibleFilter::Named("Ana".to_string())).expect("json"),
            serde_json::json!("Ana")
        );
    }
}
