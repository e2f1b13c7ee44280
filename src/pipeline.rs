use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use tokio::sync::{mpsc, Mutex, Semaphore};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::archive::{self, DEFAULT_MAX_DOCUMENT_BYTES};
use crate::classify::{classify_record, ClassifierPolicy};
use crate::dedup::deduplicate;
use crate::error::{FetchError, PipelineError, RecordError};
use crate::filing::{
    output_file_name, ClassifiedRecord, FilingRecord, NormalizedText, RecordFailure, ReportType,
};
use crate::normalize::{self, NormalizerConfig};
use crate::service::FilingService;

/// Which filings to pull.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilingQuery {
    pub entity: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
    /// Empty selects every type.
    pub report_types: Vec<ReportType>,
}

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub classifier: ClassifierPolicy,
    pub normalizer: NormalizerConfig,
    /// Archives fetched and normalized at the same time.
    pub concurrency: usize,
    /// Minimum gap between the starts of two archive fetches.
    pub fetch_delay: Duration,
    pub fetch_timeout: Duration,
    pub max_document_bytes: u64,
    pub show_progress: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        PipelineOptions {
            classifier: ClassifierPolicy::default(),
            normalizer: NormalizerConfig::default(),
            concurrency: 1,
            fetch_delay: Duration::from_millis(1000),
            fetch_timeout: Duration::from_secs(120),
            max_document_bytes: DEFAULT_MAX_DOCUMENT_BYTES,
            show_progress: true,
        }
    }
}

#[derive(Debug, Default)]
pub struct PipelineOutput {
    /// Deduplicated records of the selected types, newest first.
    pub considered: Vec<ClassifiedRecord>,
    pub documents: Vec<NormalizedText>,
    pub failures: Vec<RecordFailure>,
}

pub struct Pipeline<S> {
    service: Arc<S>,
    options: PipelineOptions,
}

impl<S: FilingService> Pipeline<S> {
    pub fn new(service: Arc<S>, options: PipelineOptions) -> Self {
        Pipeline { service, options }
    }

    /// List, classify, filter and deduplicate. Nothing is downloaded.
    pub async fn plan(&self, query: &FilingQuery) -> Result<Vec<ClassifiedRecord>, PipelineError> {
        let records = self
            .service
            .list_filings(&query.entity, query.start, query.end)
            .await
            .map_err(PipelineError::List)?;
        let listed = records.len();

        let policy = &self.options.classifier;
        let selected: Vec<ClassifiedRecord> = records
            .par_iter()
            .map(|r| classify_record(policy, r))
            .filter(|c| query.report_types.is_empty() || query.report_types.contains(&c.report_type))
            .collect();
        let matching = selected.len();

        let considered = deduplicate(selected);
        info!(
            "{} filings listed, {} of selected types, {} after dedup",
            listed,
            matching,
            considered.len()
        );
        Ok(considered)
    }

    /// Full run: plan, then fetch and normalize every surviving record.
    ///
    /// Only a listing failure is fatal; per-record failures end up in `failures`.
    pub async fn run(&self, query: &FilingQuery) -> Result<PipelineOutput, PipelineError> {
        let considered = self.plan(query).await?;
        let results = self.process(&considered).await;

        let mut used_names = HashSet::new();
        let mut documents = Vec::new();
        let mut failures = Vec::new();

        for (rec, result) in considered.iter().zip(results) {
            let receipt_id = &rec.record.receipt_id;
            let result = result.unwrap_or_else(|| {
                Err(RecordError::Worker("task ended without a result".to_string()))
            });
            match result {
                Ok(text) => documents.push(NormalizedText {
                    file_name: unique_file_name(&rec.record, &mut used_names),
                    receipt_id: receipt_id.clone(),
                    report_type: rec.report_type,
                    period: rec.period.token.clone(),
                    needs_review: rec.needs_review(),
                    text,
                }),
                Err(e) => {
                    warn!(receipt_id = %receipt_id, error = %e, "Skipping {}", rec.record.title);
                    failures.push(RecordFailure {
                        receipt_id: receipt_id.clone(),
                        title: rec.record.title.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        info!(
            "Processed {} filings ({} ok, {} failed)",
            considered.len(),
            documents.len(),
            failures.len()
        );
        Ok(PipelineOutput {
            considered,
            documents,
            failures,
        })
    }

    /// One result slot per record, in input order.
    async fn process(&self, records: &[ClassifiedRecord]) -> Vec<Option<Result<String, RecordError>>> {
        let total = records.len();
        let concurrency = self.options.concurrency.max(1);
        let semaphore = Arc::new(Semaphore::new(concurrency));
        let pacer = Arc::new(Pacer::new(self.options.fetch_delay));
        let normalizer = Arc::new(self.options.normalizer.clone());

        let pb = self.progress_bar(total);

        // Channel: workers send results, the loop below slots them back in order
        let (tx, mut rx) = mpsc::channel::<(usize, Result<String, RecordError>)>(concurrency * 2);

        for (index, rec) in records.iter().enumerate() {
            let service = Arc::clone(&self.service);
            let sem = Arc::clone(&semaphore);
            let pacer = Arc::clone(&pacer);
            let normalizer = Arc::clone(&normalizer);
            let tx = tx.clone();
            let receipt_id = rec.record.receipt_id.clone();
            let fetch_timeout = self.options.fetch_timeout;
            let max_bytes = self.options.max_document_bytes;

            tokio::spawn(async move {
                let Ok(_permit) = sem.acquire_owned().await else {
                    return;
                };
                let result = process_record(
                    service.as_ref(),
                    &pacer,
                    &receipt_id,
                    fetch_timeout,
                    max_bytes,
                    normalizer,
                )
                .await;
                let _ = tx.send((index, result)).await;
            });
        }

        // Drop our copy of tx so rx closes when all spawned tasks finish
        drop(tx);

        let mut results: Vec<Option<Result<String, RecordError>>> = (0..total).map(|_| None).collect();
        while let Some((index, result)) = rx.recv().await {
            results[index] = Some(result);
            pb.inc(1);
        }
        pb.finish_and_clear();

        results
    }

    fn progress_bar(&self, total: usize) -> ProgressBar {
        if !self.options.show_progress {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new(total as u64);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec}, eta {eta})")
        {
            pb.set_style(style.progress_chars("=> "));
        }
        pb
    }
}

async fn process_record<S: FilingService>(
    service: &S,
    pacer: &Pacer,
    receipt_id: &str,
    fetch_timeout: Duration,
    max_bytes: u64,
    normalizer: Arc<NormalizerConfig>,
) -> Result<String, RecordError> {
    pacer.wait().await;

    let bytes = match tokio::time::timeout(fetch_timeout, service.fetch_filing_archive(receipt_id)).await {
        Ok(fetched) => fetched?,
        Err(_) => return Err(FetchError::Timeout.into()),
    };
    debug!(receipt_id, "Fetched {} bytes", bytes.len());

    tokio::task::spawn_blocking(move || -> Result<String, RecordError> {
        let doc = archive::extract_main_document_capped(&bytes, max_bytes)?;
        Ok(normalize::normalize(&doc, &normalizer)?)
    })
    .await
    .map_err(|e| RecordError::Worker(e.to_string()))?
}

/// Spaces out the starts of successive fetches by at least `delay`.
struct Pacer {
    delay: Duration,
    last_start: Mutex<Option<Instant>>,
}

impl Pacer {
    fn new(delay: Duration) -> Self {
        Pacer {
            delay,
            last_start: Mutex::new(None),
        }
    }

    async fn wait(&self) {
        let mut last = self.last_start.lock().await;
        if let Some(prev) = *last {
            tokio::time::sleep_until(prev + self.delay).await;
        }
        *last = Some(Instant::now());
    }
}

/// `{entity}_{title}.txt`, or `{entity}_{title}_{YYYYMMDD}.txt` when that name is taken.
fn unique_file_name(record: &FilingRecord, used: &mut HashSet<String>) -> String {
    let base = output_file_name(record);
    if used.insert(base.clone()) {
        return base;
    }

    let stem = base.strip_suffix(".txt").unwrap_or(&base);
    let dated = format!("{}_{}.txt", stem, record.filed_at_compact());
    if used.insert(dated.clone()) {
        return dated;
    }

    let by_receipt = format!("{}_{}.txt", stem, record.receipt_id);
    used.insert(by_receipt.clone());
    by_receipt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::tests::build_zip;
    use std::collections::HashMap;

    enum MockArchive {
        Bytes(Vec<u8>),
        Fail(FetchError),
        Hang,
    }

    #[derive(Default)]
    struct MockService {
        records: Vec<FilingRecord>,
        archives: HashMap<String, MockArchive>,
        list_error: Option<FetchError>,
        fetched: std::sync::Mutex<Vec<String>>,
    }

    impl MockService {
        fn fetched(&self) -> Vec<String> {
            self.fetched.lock().unwrap().clone()
        }
    }

    impl FilingService for MockService {
        async fn list_filings(
            &self,
            _entity: &str,
            _start: NaiveDate,
            _end: NaiveDate,
        ) -> Result<Vec<FilingRecord>, FetchError> {
            match &self.list_error {
                Some(e) => Err(e.clone()),
                None => Ok(self.records.clone()),
            }
        }

        async fn fetch_filing_archive(&self, receipt_id: &str) -> Result<Vec<u8>, FetchError> {
            self.fetched.lock().unwrap().push(receipt_id.to_string());
            match self.archives.get(receipt_id) {
                Some(MockArchive::Bytes(b)) => Ok(b.clone()),
                Some(MockArchive::Fail(e)) => Err(e.clone()),
                Some(MockArchive::Hang) => std::future::pending().await,
                None => Err(FetchError::Status(404)),
            }
        }
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn record(id: &str, filed_at: NaiveDate, title: &str) -> FilingRecord {
        FilingRecord {
            receipt_id: id.to_string(),
            filed_at,
            title: title.to_string(),
            entity_name: "삼성전자".to_string(),
        }
    }

    fn archive_with(body: &str) -> MockArchive {
        let xml = format!("<DOCUMENT><P>{}</P></DOCUMENT>", body);
        MockArchive::Bytes(build_zip(vec![("main.xml", xml.into_bytes())]))
    }

    fn query(types: &[ReportType]) -> FilingQuery {
        FilingQuery {
            entity: "삼성전자".to_string(),
            start: date(2023, 1, 1),
            end: date(2024, 12, 31),
            report_types: types.to_vec(),
        }
    }

    fn options() -> PipelineOptions {
        PipelineOptions {
            fetch_delay: Duration::ZERO,
            fetch_timeout: Duration::from_secs(5),
            show_progress: false,
            ..PipelineOptions::default()
        }
    }

    fn setup(service: MockService, options: PipelineOptions) -> (Arc<MockService>, Pipeline<MockService>) {
        let service = Arc::new(service);
        (Arc::clone(&service), Pipeline::new(service, options))
    }

    #[tokio::test]
    async fn corrections_supersede_and_other_types_are_filtered() {
        let mut archives = HashMap::new();
        archives.insert("A1".to_string(), archive_with("원본 사업보고서"));
        archives.insert("A2".to_string(), archive_with("정정 사업보고서"));
        archives.insert("Q1".to_string(), archive_with("1분기 본문"));
        archives.insert("X1".to_string(), archive_with("주요사항"));
        let service = MockService {
            records: vec![
                record("A1", date(2024, 3, 11), "사업보고서 (2023.12)"),
                record("Q1", date(2024, 5, 14), "분기보고서 (2024.03)"),
                record("A2", date(2024, 4, 1), "[기재정정]사업보고서 (2023.12)"),
                record("X1", date(2024, 6, 1), "주요사항보고서(자기주식취득결정)"),
            ],
            archives,
            ..MockService::default()
        };
        let (service, pipeline) = setup(service, options());

        let out = pipeline
            .run(&query(&[ReportType::Annual, ReportType::Q1]))
            .await
            .unwrap();

        let ids: Vec<&str> = out.documents.iter().map(|d| d.receipt_id.as_str()).collect();
        assert_eq!(ids, vec!["Q1", "A2"]);
        assert!(out.failures.is_empty());
        assert_eq!(out.considered.len(), 2);

        let annual = &out.documents[1];
        assert_eq!(annual.text, "정정 사업보고서");
        assert_eq!(annual.report_type, ReportType::Annual);
        assert_eq!(annual.period, "2023.12");
        assert_eq!(annual.file_name, "삼성전자_[기재정정]사업보고서 (2023.12).txt");
        assert!(!annual.needs_review);

        // superseded and filtered records are never downloaded
        let mut fetched = service.fetched();
        fetched.sort();
        assert_eq!(fetched, vec!["A2", "Q1"]);
    }

    #[tokio::test]
    async fn timed_out_fetch_fails_only_its_record() {
        let mut archives = HashMap::new();
        archives.insert("SLOW".to_string(), MockArchive::Hang);
        archives.insert("OK1".to_string(), archive_with("반기"));
        archives.insert("OK2".to_string(), archive_with("사업"));
        let service = MockService {
            records: vec![
                record("OK2", date(2024, 3, 11), "사업보고서 (2023.12)"),
                record("OK1", date(2024, 8, 14), "반기보고서 (2024.06)"),
                record("SLOW", date(2024, 11, 14), "분기보고서 (2024.09)"),
            ],
            archives,
            ..MockService::default()
        };
        let opts = PipelineOptions {
            fetch_timeout: Duration::from_millis(50),
            ..options()
        };
        let (_, pipeline) = setup(service, opts);

        let out = pipeline.run(&query(&[])).await.unwrap();

        assert_eq!(out.failures.len(), 1);
        assert_eq!(out.failures[0].receipt_id, "SLOW");
        assert!(out.failures[0].reason.contains("timed out"));
        let ids: Vec<&str> = out.documents.iter().map(|d| d.receipt_id.as_str()).collect();
        assert_eq!(ids, vec!["OK1", "OK2"]);
    }

    #[tokio::test]
    async fn list_failure_is_fatal() {
        let service = MockService {
            records: vec![record("A1", date(2024, 3, 11), "사업보고서 (2023.12)")],
            list_error: Some(FetchError::Status(500)),
            ..MockService::default()
        };
        let (service, pipeline) = setup(service, options());

        let err = pipeline.run(&query(&[])).await.unwrap_err();
        assert!(matches!(err, PipelineError::List(FetchError::Status(500))));
        assert!(service.fetched().is_empty());
    }

    #[tokio::test]
    async fn per_record_failures_are_collected() {
        let mut archives = HashMap::new();
        archives.insert(
            "JSON".to_string(),
            MockArchive::Bytes(r#"{"status":"014","message":"파일이 존재하지 않습니다."}"#.as_bytes().to_vec()),
        );
        archives.insert("GONE".to_string(), MockArchive::Fail(FetchError::Status(404)));
        archives.insert(
            "PDF".to_string(),
            MockArchive::Bytes(build_zip(vec![("report.pdf", vec![0u8; 100])])),
        );
        archives.insert("OK".to_string(), archive_with("본문"));
        let service = MockService {
            records: vec![
                record("JSON", date(2024, 11, 14), "분기보고서 (2024.09)"),
                record("GONE", date(2024, 8, 14), "반기보고서 (2024.06)"),
                record("PDF", date(2024, 5, 14), "분기보고서 (2024.03)"),
                record("OK", date(2024, 3, 11), "사업보고서 (2023.12)"),
            ],
            archives,
            ..MockService::default()
        };
        let (_, pipeline) = setup(service, options());

        let out = pipeline.run(&query(&[])).await.unwrap();

        assert_eq!(out.documents.len(), 1);
        assert_eq!(out.documents[0].receipt_id, "OK");
        let reasons: HashMap<&str, &str> = out
            .failures
            .iter()
            .map(|f| (f.receipt_id.as_str(), f.reason.as_str()))
            .collect();
        assert!(reasons["JSON"].starts_with("archive invalid"));
        assert!(reasons["JSON"].contains("014"));
        assert!(reasons["GONE"].contains("404"));
        assert!(reasons["PDF"].contains("no markup document"));
    }

    #[tokio::test]
    async fn colliding_names_get_filing_date() {
        let mut archives = HashMap::new();
        archives.insert("Q3".to_string(), archive_with("3분기"));
        archives.insert("Q1".to_string(), archive_with("1분기"));
        let service = MockService {
            records: vec![
                record("Q1", date(2024, 5, 14), "분기보고서"),
                record("Q3", date(2024, 11, 14), "분기보고서"),
            ],
            archives,
            ..MockService::default()
        };
        let (_, pipeline) = setup(service, options());

        let out = pipeline.run(&query(&[])).await.unwrap();

        let names: Vec<&str> = out.documents.iter().map(|d| d.file_name.as_str()).collect();
        assert_eq!(names, vec!["삼성전자_분기보고서.txt", "삼성전자_분기보고서_20240514.txt"]);
        assert_eq!(out.documents[0].period, "2024.09");
        assert_eq!(out.documents[1].period, "2024.03");
        // both quarters come from the submission month
        assert!(out.documents.iter().all(|d| d.needs_review));
    }

    #[tokio::test]
    async fn fetch_starts_are_spaced_out() {
        let mut archives = HashMap::new();
        let mut records = Vec::new();
        for (i, month) in [3u32, 6, 9].into_iter().enumerate() {
            let id = format!("R{}", i);
            archives.insert(id.clone(), archive_with("본문"));
            records.push(record(&id, date(2024, month + 2, 14), &format!("분기보고서 (2024.{:02})", month)));
        }
        let service = MockService {
            records,
            archives,
            ..MockService::default()
        };
        let opts = PipelineOptions {
            concurrency: 3,
            fetch_delay: Duration::from_millis(40),
            ..options()
        };
        let (_, pipeline) = setup(service, opts);

        let started = std::time::Instant::now();
        let out = pipeline.run(&query(&[])).await.unwrap();

        assert_eq!(out.documents.len(), 3);
        assert!(started.elapsed() >= Duration::from_millis(80));
    }

    #[test]
    fn unique_names_fall_back_to_receipt_id() {
        let mut used = HashSet::new();
        let a = record("A", date(2024, 5, 14), "분기보고서");
        let b = record("B", date(2024, 5, 14), "분기보고서");
        assert_eq!(unique_file_name(&a, &mut used), "삼성전자_분기보고서.txt");
        assert_eq!(unique_file_name(&a, &mut used), "삼성전자_분기보고서_20240514.txt");
        assert_eq!(unique_file_name(&b, &mut used), "삼성전자_분기보고서_B.txt");
    }
}
