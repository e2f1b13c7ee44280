use std::future::Future;

use chrono::NaiveDate;

use crate::error::FetchError;
use crate::filing::FilingRecord;

/// The disclosure filing service the pipeline pulls from.
pub trait FilingService: Send + Sync + 'static {
    /// All filings of `entity` submitted between `start` and `end`, inclusive.
    fn list_filings(
        &self,
        entity: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> impl Future<Output = Result<Vec<FilingRecord>, FetchError>> + Send;

    /// Raw archive bytes for one receipt. May be an error payload served with a success status.
    fn fetch_filing_archive(
        &self,
        receipt_id: &str,
    ) -> impl Future<Output = Result<Vec<u8>, FetchError>> + Send;
}
