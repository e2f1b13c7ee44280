use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;

static ILLEGAL_FILENAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"[\\/*?:"<>|]"#).unwrap());

/// Compact date form used by the disclosure service (`rcept_dt`).
pub const FILED_AT_FORMAT: &str = "%Y%m%d";

/// One filing as listed by the disclosure service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilingRecord {
    pub receipt_id: String,
    pub filed_at: NaiveDate,
    pub title: String,
    pub entity_name: String,
}

impl FilingRecord {
    pub fn filed_at_compact(&self) -> String {
        self.filed_at.format(FILED_AT_FORMAT).to_string()
    }
}

/// Parse a `YYYYMMDD` filing date.
pub fn parse_filed_at(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), FILED_AT_FORMAT).ok()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ReportType {
    Annual,
    SemiAnnual,
    Q1,
    Q3,
    OtherQuarterly,
    Other,
}

impl ReportType {
    pub const ALL: [ReportType; 6] = [
        ReportType::Annual,
        ReportType::SemiAnnual,
        ReportType::Q1,
        ReportType::Q3,
        ReportType::OtherQuarterly,
        ReportType::Other,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ReportType::Annual => "annual",
            ReportType::SemiAnnual => "semiannual",
            ReportType::Q1 => "q1",
            ReportType::Q3 => "q3",
            ReportType::OtherQuarterly => "quarterly",
            ReportType::Other => "other",
        }
    }
}

impl fmt::Display for ReportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReportType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        ReportType::ALL
            .into_iter()
            .find(|t| t.as_str() == wanted)
            .ok_or_else(|| {
                format!(
                    "unknown report type '{}' (expected one of: annual, semiannual, q1, q3, quarterly, other)",
                    s
                )
            })
    }
}

/// Where a period token came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PeriodSource {
    /// `(YYYY.MM)` written in the title.
    Title,
    /// Built from the report type and the filing year.
    Synthesized,
    /// Raw filing date; no period could be derived.
    FilingDate,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeriodKey {
    pub token: String,
    pub source: PeriodSource,
}

impl PeriodKey {
    pub fn title(year: &str, month: &str) -> Self {
        PeriodKey {
            token: format!("{}.{}", year, month),
            source: PeriodSource::Title,
        }
    }

    pub fn synthesized(year: i32, month: u32) -> Self {
        PeriodKey {
            token: format!("{:04}.{:02}", year, month),
            source: PeriodSource::Synthesized,
        }
    }

    pub fn filing_date(filed_at: NaiveDate) -> Self {
        PeriodKey {
            token: filed_at.format(FILED_AT_FORMAT).to_string(),
            source: PeriodSource::FilingDate,
        }
    }

    /// Fallback keys identify a single submission, never a period.
    pub fn is_fallback(&self) -> bool {
        self.source == PeriodSource::FilingDate
    }
}

impl fmt::Display for PeriodKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.token)
    }
}

/// How the report type was decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassificationBasis {
    TitleMarker,
    FilingMonth,
    Unclassified,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedRecord {
    pub record: FilingRecord,
    pub report_type: ReportType,
    pub period: PeriodKey,
    pub basis: ClassificationBasis,
}

impl ClassifiedRecord {
    /// Month-inferred quarter: worth a manual look.
    pub fn needs_review(&self) -> bool {
        self.basis == ClassificationBasis::FilingMonth
    }
}

/// Final text artifact for one filing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedText {
    pub file_name: String,
    pub receipt_id: String,
    pub report_type: ReportType,
    pub period: String,
    /// Quarter inferred from the submission month.
    pub needs_review: bool,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordFailure {
    pub receipt_id: String,
    pub title: String,
    pub reason: String,
}

/// Strip `\ / * ? : " < > |` from a candidate file name.
pub fn clean_filename(text: &str) -> String {
    ILLEGAL_FILENAME_RE.replace_all(text, "").trim().to_string()
}

/// `{entity_name}_{title}.txt`
pub fn output_file_name(record: &FilingRecord) -> String {
    clean_filename(&format!("{}_{}.txt", record.entity_name, record.title))
}
