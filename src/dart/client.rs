use std::future::Future;
use std::time::Duration;

use chrono::NaiveDate;
use reqwest::StatusCode;
use serde::Deserialize;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use super::corp_code::{self, CorpCode};
use crate::archive::{self, DEFAULT_MAX_DOCUMENT_BYTES};
use crate::error::{ArchiveError, FetchError};
use crate::filing::{parse_filed_at, FilingRecord, FILED_AT_FORMAT};
use crate::normalize::decode::{self, DecodePolicy};
use crate::service::FilingService;

pub const DEFAULT_BASE_URL: &str = "https://opendart.fss.or.kr/api";
const PAGE_COUNT: u32 = 100;
// Periodic reports: annual, semiannual, quarterly.
const PERIODIC_REPORTS: &str = "A";

const STATUS_OK: &str = "000";
const STATUS_NO_DATA: &str = "013";
const STATUS_RATE_LIMITED: &str = "020";
const NO_PARAMS: &[(&str, String)] = &[];

#[derive(Debug, Clone)]
pub struct DartConfig {
    pub api_key: String,
    pub base_url: String,
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_retries: 3,
            base_backoff: Duration::from_millis(2000),
        }
    }
}

/// OpenDART client. Company names are resolved through the corp-code table, fetched once.
pub struct DartClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    retry: RetryPolicy,
    corp_codes: OnceCell<Vec<CorpCode>>,
}

impl DartClient {
    pub fn new(config: DartConfig) -> Result<Self, FetchError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(DartClient {
            http,
            api_key: config.api_key,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            retry: config.retry,
            corp_codes: OnceCell::new(),
        })
    }

    async fn get_bytes(&self, path: &str, query: &[(&str, String)]) -> Result<Vec<u8>, FetchError> {
        let url = format!("{}/{}", self.base_url, path);
        let response = self
            .http
            .get(&url)
            .query(&[("crtfc_key", self.api_key.as_str())])
            .query(query)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(FetchError::RateLimited);
        }
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }
        Ok(response.bytes().await?.to_vec())
    }

    async fn corp_codes(&self) -> Result<&[CorpCode], FetchError> {
        let corps = self
            .corp_codes
            .get_or_try_init(|| async move {
                let bytes =
                    with_retry(&self.retry, "corpCode.xml", || self.get_bytes("corpCode.xml", NO_PARAMS))
                        .await?;
                let corps = corp_codes_from_archive(&bytes)?;
                info!("Loaded {} corp codes", corps.len());
                Ok::<_, FetchError>(corps)
            })
            .await?;
        Ok(corps)
    }

    async fn resolve_entity(&self, entity: &str) -> Result<String, FetchError> {
        let entity = entity.trim();
        if corp_code::is_corp_code(entity) {
            return Ok(entity.to_string());
        }
        let corps = self.corp_codes().await?;
        let corp = corp_code::resolve(corps, entity)
            .ok_or_else(|| FetchError::NotFound(entity.to_string()))?;
        debug!("Resolved {} to corp code {}", entity, corp.corp_code);
        Ok(corp.corp_code.clone())
    }

    async fn list_page(
        &self,
        corp_code: &str,
        start: NaiveDate,
        end: NaiveDate,
        page_no: u32,
    ) -> Result<ListPage, FetchError> {
        let query = [
            ("corp_code", corp_code.to_string()),
            ("bgn_de", start.format(FILED_AT_FORMAT).to_string()),
            ("end_de", end.format(FILED_AT_FORMAT).to_string()),
            ("pblntf_ty", PERIODIC_REPORTS.to_string()),
            ("page_no", page_no.to_string()),
            ("page_count", PAGE_COUNT.to_string()),
        ];
        let body = self.get_bytes("list.json", &query).await?;
        parse_list_page(&body)
    }
}

impl FilingService for DartClient {
    async fn list_filings(
        &self,
        entity: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<FilingRecord>, FetchError> {
        let corp_code = self.resolve_entity(entity).await?;

        let mut records = Vec::new();
        let mut page_no = 1;
        loop {
            let page = with_retry(&self.retry, "list.json", || {
                self.list_page(&corp_code, start, end, page_no)
            })
            .await?;
            records.extend(page.records);
            if page_no >= page.total_page {
                break;
            }
            page_no += 1;
        }

        info!(
            "Listed {} filings for {} ({} to {})",
            records.len(),
            entity,
            start,
            end
        );
        Ok(records)
    }

    async fn fetch_filing_archive(&self, receipt_id: &str) -> Result<Vec<u8>, FetchError> {
        let query = [("rcept_no", receipt_id.to_string())];
        with_retry(&self.retry, receipt_id, || self.get_bytes("document.xml", &query)).await
    }
}

/// Run `op` until it succeeds, fails permanently, or runs out of retries.
///
/// Backoff doubles from `base_backoff` after every transient failure.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, what: &str, mut op: F) -> Result<T, FetchError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, FetchError>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Err(e) if e.is_transient() && attempt < policy.max_retries => {
                let backoff = policy.base_backoff * 2u32.pow(attempt);
                warn!(
                    "{} on {} (attempt {}/{}), backing off {:.1}s",
                    e,
                    what,
                    attempt + 1,
                    policy.max_retries,
                    backoff.as_secs_f64()
                );
                tokio::time::sleep(backoff).await;
                attempt += 1;
            }
            result => return result,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ListResponse {
    status: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    total_page: u32,
    #[serde(default)]
    list: Vec<ListRow>,
}

#[derive(Debug, Deserialize)]
struct ListRow {
    corp_name: String,
    report_nm: String,
    rcept_no: String,
    rcept_dt: String,
}

#[derive(Debug)]
struct ListPage {
    records: Vec<FilingRecord>,
    total_page: u32,
}

fn parse_list_page(body: &[u8]) -> Result<ListPage, FetchError> {
    let response: ListResponse = serde_json::from_slice(body)
        .map_err(|e| FetchError::Transport(format!("list.json: {}", e)))?;

    match response.status.as_str() {
        STATUS_OK => {}
        STATUS_NO_DATA => {
            return Ok(ListPage {
                records: Vec::new(),
                total_page: 0,
            })
        }
        STATUS_RATE_LIMITED => return Err(FetchError::RateLimited),
        _ => {
            return Err(FetchError::Service {
                status: response.status,
                message: response.message,
            })
        }
    }

    let records = response
        .list
        .into_iter()
        .filter_map(|row| {
            let Some(filed_at) = parse_filed_at(&row.rcept_dt) else {
                warn!(receipt_id = %row.rcept_no, "Skipping filing with bad date {:?}", row.rcept_dt);
                return None;
            };
            Some(FilingRecord {
                receipt_id: row.rcept_no,
                filed_at,
                title: row.report_nm.trim().to_string(),
                entity_name: row.corp_name.trim().to_string(),
            })
        })
        .collect();

    Ok(ListPage {
        records,
        total_page: response.total_page,
    })
}

fn corp_codes_from_archive(bytes: &[u8]) -> Result<Vec<CorpCode>, FetchError> {
    let doc = archive::extract_main_document_capped(bytes, DEFAULT_MAX_DOCUMENT_BYTES).map_err(|e| match e {
        ArchiveError::ServicePayload { status, message } => FetchError::Service { status, message },
        other => FetchError::Transport(format!("corp code archive: {}", other)),
    })?;
    let decoded = decode::decode(&doc.bytes, doc.encoding, DecodePolicy::Substitute)
        .map_err(|e| FetchError::Transport(format!("corp code table: {}", e)))?;
    corp_code::parse_corp_codes(&decoded.text)
}
