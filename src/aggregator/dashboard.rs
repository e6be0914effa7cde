use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::{count_by, growth, monthly_buckets, CategoryCount, Sources};
use crate::models::source_models::{Payment, UserAccount};
use crate::models::{COURSES, EXAMS, PAYMENTS, USERS};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TimeRange {
    #[serde(rename = "7d")]
    Week,
    #[serde(rename = "30d")]
    Month,
    #[serde(rename = "90d")]
    Quarter,
    #[default]
    #[serde(rename = "all")]
    All,
}

impl TimeRange {
    fn span(self) -> Option<Duration> {
        match self {
            TimeRange::Week => Some(Duration::days(7)),
            TimeRange::Month => Some(Duration::days(30)),
            TimeRange::Quarter => Some(Duration::days(90)),
            TimeRange::All => None,
        }
    }

    /// Whether a record stamped `at` falls inside the range ending at `as_of`.
    pub fn contains(self, at: Option<DateTime<Utc>>, as_of: DateTime<Utc>) -> bool {
        match (self.span(), at) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(span), Some(at)) => at <= as_of && at >= as_of - span,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStats {
    pub total_users: u64,
    pub total_courses: u64,
    pub total_exams: u64,
    pub total_revenue: f64,
}

/// Expects `payments` to hold only approved payments; anything else in it
/// is ignored.
pub fn dashboard_stats(sources: &Sources) -> DashboardStats {
    let payments: Vec<Payment> = sources.records(PAYMENTS);
    DashboardStats {
        total_users: sources.len(USERS) as u64,
        total_courses: sources.len(COURSES) as u64,
        total_exams: sources.len(EXAMS) as u64,
        total_revenue: payments
            .iter()
            .filter(|payment| payment.is_approved())
            .map(|payment| payment.amount)
            .sum(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Overview {
    pub total_revenue: f64,
    pub revenue_growth: f64,
    pub total_students: u64,
    pub student_growth: f64,
    pub total_enrollments: u64,
    pub total_exams: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RevenuePoint {
    pub name: String,
    pub revenue: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Default)]
pub struct UserGrowthPoint {
    pub name: String,
    pub students: u64,
    pub teachers: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Charts {
    pub revenue_trend: Vec<RevenuePoint>,
    pub user_growth: Vec<UserGrowthPoint>,
    pub payment_methods: Vec<CategoryCount>,
    pub role_distribution: Vec<CategoryCount>,
    pub class_distribution: Vec<CategoryCount>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdvancedAnalytics {
    pub range: TimeRange,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub as_of: DateTime<Utc>,
    pub overview: Overview,
    pub charts: Charts,
}

fn is_hsc(level: &str) -> bool {
    level.contains("11") || level.contains("12")
}

pub fn advanced_analytics(sources: &Sources, range: TimeRange, as_of: DateTime<Utc>) -> AdvancedAnalytics {
    let approved: Vec<Payment> = sources
        .records::<Payment>(PAYMENTS)
        .into_iter()
        .filter(|payment| payment.is_approved() && range.contains(payment.submitted_at, as_of))
        .collect();
    let users: Vec<UserAccount> = sources
        .records::<UserAccount>(USERS)
        .into_iter()
        .filter(|user| range.contains(user.join_date, as_of))
        .collect();

    let revenue_trend: Vec<RevenuePoint> = monthly_buckets(
        &approved,
        as_of,
        |payment| payment.submitted_at,
        |total: &mut f64, payment| *total += payment.amount,
    )
    .into_iter()
    .map(|(name, revenue)| RevenuePoint { name, revenue })
    .collect();

    let user_growth: Vec<UserGrowthPoint> = monthly_buckets(
        &users,
        as_of,
        |user| user.join_date,
        |point: &mut UserGrowthPoint, user| {
            if user.is_teacher() {
                point.teachers += 1;
            } else {
                point.students += 1;
            }
        },
    )
    .into_iter()
    .map(|(name, point)| UserGrowthPoint { name, ..point })
    .collect();

    let class_distribution = vec![
        ("Class 9", users.iter().filter(|u| u.class_level.as_deref() == Some("Class 9")).count()),
        ("Class 10", users.iter().filter(|u| u.class_level.as_deref() == Some("Class 10")).count()),
        ("HSC", users.iter().filter(|u| u.class_level.as_deref().is_some_and(is_hsc)).count()),
    ]
    .into_iter()
    .map(|(name, count)| CategoryCount {
        name: name.to_string(),
        value: count as u64,
    })
    .collect();

    let last_two = |values: Vec<f64>| match values.as_slice() {
        [.., previous, current] => growth(*previous, *current),
        _ => 0.0,
    };
    let revenue_growth = last_two(revenue_trend.iter().map(|p| p.revenue).collect());
    let student_growth = last_two(user_growth.iter().map(|p| p.students as f64).collect());

    AdvancedAnalytics {
        range,
        as_of,
        overview: Overview {
            total_revenue: approved.iter().map(|payment| payment.amount).sum(),
            revenue_growth,
            total_students: users.iter().filter(|user| !user.is_teacher()).count() as u64,
            student_growth,
            total_enrollments: approved.len() as u64,
            total_exams: sources.len(EXAMS) as u64,
        },
        charts: Charts {
            revenue_trend,
            user_growth,
            payment_methods: count_by(&approved, |payment| payment.payment_method.as_str()),
            role_distribution: count_by(&users, |user| user.role.as_str()),
            class_distribution,
        },
    }
}
