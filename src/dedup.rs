use std::collections::HashMap;

use tracing::debug;

use crate::filing::{ClassifiedRecord, ReportType};

/// Keep the latest filing per `(ReportType, period)`.
///
/// Records are stable-sorted by filing date, newest first, so a correction filed after the
/// original wins and same-day filings keep arrival order. Records without a derivable period
/// are never merged.
pub fn deduplicate(mut records: Vec<ClassifiedRecord>) -> Vec<ClassifiedRecord> {
    records.sort_by(|a, b| b.record.filed_at.cmp(&a.record.filed_at));

    let mut kept_by: HashMap<(ReportType, String), String> = HashMap::new();
    let mut out = Vec::with_capacity(records.len());

    for rec in records {
        if rec.period.is_fallback() {
            out.push(rec);
            continue;
        }
        let key = (rec.report_type, rec.period.token.clone());
        if let Some(winner) = kept_by.get(&key) {
            debug!(
                receipt_id = %rec.record.receipt_id,
                superseded_by = %winner,
                "dropping superseded {} {} filing",
                rec.report_type,
                rec.period
            );
            continue;
        }
        kept_by.insert(key, rec.record.receipt_id.clone());
        out.push(rec);
    }

    out
}
