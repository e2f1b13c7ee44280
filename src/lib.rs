//! Pull periodic reports of a listed company from DART, keep the latest filing per period,
//! and turn each report's main document into analysis-ready text.

pub mod archive;
pub mod classify;
pub mod config;
pub mod dart;
pub mod dedup;
pub mod error;
pub mod filing;
pub mod normalize;
pub mod pipeline;
pub mod service;

pub use filing::{ClassifiedRecord, FilingRecord, NormalizedText, RecordFailure, ReportType};
pub use pipeline::{FilingQuery, Pipeline, PipelineOptions, PipelineOutput};
pub use service::FilingService;
