use std::ops::RangeInclusive;
use std::sync::LazyLock;

use chrono::{Datelike, NaiveDate};
use regex::Regex;

use crate::filing::{ClassificationBasis, ClassifiedRecord, FilingRecord, PeriodKey, ReportType};

static PERIOD_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\((\d{4})\.(\d{2})\)").unwrap());

const ANNUAL_MARKER: &str = "사업보고서";
const SEMIANNUAL_MARKER: &str = "반기보고서";
const QUARTERLY_MARKER: &str = "분기보고서";
const Q1_MARKERS: &[&str] = &["1분기", ".03", "3개월"];
const Q3_MARKERS: &[&str] = &["3분기", ".09", "9개월"];

/// Submission-month windows used when a quarterly title carries no quarter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifierPolicy {
    pub q1_months: RangeInclusive<u32>,
    pub q3_months: RangeInclusive<u32>,
}

impl Default for ClassifierPolicy {
    fn default() -> Self {
        ClassifierPolicy {
            q1_months: 4..=6,
            q3_months: 9..=12,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub report_type: ReportType,
    pub period: PeriodKey,
    pub basis: ClassificationBasis,
}

pub fn classify(title: &str, filed_at: NaiveDate) -> Classification {
    classify_with(&ClassifierPolicy::default(), title, filed_at)
}

pub fn classify_with(policy: &ClassifierPolicy, title: &str, filed_at: NaiveDate) -> Classification {
    let (report_type, basis) = resolve_type(policy, title, filed_at);
    let period = period_key(title, report_type, filed_at);
    Classification {
        report_type,
        period,
        basis,
    }
}

pub fn classify_record(policy: &ClassifierPolicy, record: &FilingRecord) -> ClassifiedRecord {
    let c = classify_with(policy, &record.title, record.filed_at);
    ClassifiedRecord {
        record: record.clone(),
        report_type: c.report_type,
        period: c.period,
        basis: c.basis,
    }
}

fn resolve_type(
    policy: &ClassifierPolicy,
    title: &str,
    filed_at: NaiveDate,
) -> (ReportType, ClassificationBasis) {
    if title.contains(ANNUAL_MARKER) {
        return (ReportType::Annual, ClassificationBasis::TitleMarker);
    }
    if title.contains(SEMIANNUAL_MARKER) {
        return (ReportType::SemiAnnual, ClassificationBasis::TitleMarker);
    }
    if !title.contains(QUARTERLY_MARKER) {
        return (ReportType::Other, ClassificationBasis::Unclassified);
    }

    if Q1_MARKERS.iter().any(|m| title.contains(m)) {
        return (ReportType::Q1, ClassificationBasis::TitleMarker);
    }
    if Q3_MARKERS.iter().any(|m| title.contains(m)) {
        return (ReportType::Q3, ClassificationBasis::TitleMarker);
    }

    let month = filed_at.month();
    if policy.q1_months.contains(&month) {
        (ReportType::Q1, ClassificationBasis::FilingMonth)
    } else if policy.q3_months.contains(&month) {
        (ReportType::Q3, ClassificationBasis::FilingMonth)
    } else {
        (ReportType::OtherQuarterly, ClassificationBasis::Unclassified)
    }
}

fn period_key(title: &str, report_type: ReportType, filed_at: NaiveDate) -> PeriodKey {
    if let Some(caps) = PERIOD_RE.captures(title) {
        return PeriodKey::title(&caps[1], &caps[2]);
    }

    let year = filed_at.year();
    match report_type {
        ReportType::Annual => PeriodKey::synthesized(year - 1, 12),
        ReportType::Q1 => PeriodKey::synthesized(year, 3),
        ReportType::SemiAnnual => PeriodKey::synthesized(year, 6),
        ReportType::Q3 => PeriodKey::synthesized(year, 9),
        ReportType::OtherQuarterly | ReportType::Other => PeriodKey::filing_date(filed_at),
    }
}
