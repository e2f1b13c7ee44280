use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Context};
use chrono::{Datelike, NaiveDate};
use clap::{Args, Parser, Subcommand};
use tracing::info;

use dart_filings::config::Settings;
use dart_filings::dart::DartClient;
use dart_filings::{FilingQuery, Pipeline, ReportType};

const DEFAULT_TYPES: [ReportType; 5] = [
    ReportType::Annual,
    ReportType::SemiAnnual,
    ReportType::Q1,
    ReportType::Q3,
    ReportType::OtherQuarterly,
];

#[derive(Parser)]
#[command(name = "dart_filings", about = "DART periodic report downloader")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the filings that would be downloaded, newest first
    List(QueryArgs),
    /// Download and normalize the latest filing per period
    Download {
        #[command(flatten)]
        query: QueryArgs,
        /// Output directory (default: output_dir setting)
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
}

#[derive(Args)]
struct QueryArgs {
    /// Company name, six-digit stock code or eight-digit corp code
    entity: String,
    /// First year to include (default: last year)
    #[arg(long)]
    from: Option<i32>,
    /// Last year to include (default: this year)
    #[arg(long)]
    to: Option<i32>,
    /// Report types: annual, semiannual, q1, q3, quarterly, other
    #[arg(short, long, value_delimiter = ',')]
    types: Vec<ReportType>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();

    let settings = Settings::load().context("loading settings")?;
    if settings.api_key.trim().is_empty() {
        bail!("no API key: set DART_API_KEY or api_key in dart_filings.toml");
    }
    info!(
        base_url = %settings.base_url,
        concurrency = settings.concurrency,
        fetch_delay_ms = settings.fetch_delay_ms,
        "Settings loaded"
    );

    let client = Arc::new(DartClient::new(settings.dart_config()).context("building DART client")?);
    let pipeline = Pipeline::new(client, settings.pipeline_options());
    let today = chrono::Local::now().date_naive();

    let result = match cli.command {
        Commands::List(args) => {
            let query = build_query(args, today)?;
            let records = pipeline.plan(&query).await?;
            if records.is_empty() {
                println!("No filings found for {}.", query.entity);
                return Ok(());
            }

            println!(
                "{:>3} | {:<10} | {:<10} | {:<8} | {:<14} | {:<40} | {}",
                "#", "Filed", "Type", "Period", "Receipt", "Title", "Review"
            );
            println!("{}", "-".repeat(110));

            for (i, r) in records.iter().enumerate() {
                println!(
                    "{:>3} | {:<10} | {:<10} | {:<8} | {:<14} | {:<40} | {}",
                    i + 1,
                    r.record.filed_at.to_string(),
                    r.report_type.as_str(),
                    r.period.token,
                    r.record.receipt_id,
                    truncate(&r.record.title, 40),
                    if r.needs_review() { "month" } else { "" }
                );
            }

            let flagged = records.iter().filter(|r| r.needs_review()).count();
            println!("\n{} filings", records.len());
            if flagged > 0 {
                println!(
                    "{} quarterly filings classified by submission month; check them by hand.",
                    flagged
                );
            }
            Ok(())
        }
        Commands::Download { query, out } => {
            let query = build_query(query, today)?;
            let out_dir = out.unwrap_or_else(|| PathBuf::from(&settings.output_dir));
            std::fs::create_dir_all(&out_dir)
                .with_context(|| format!("creating {}", out_dir.display()))?;

            let output = pipeline.run(&query).await?;
            if output.considered.is_empty() {
                println!("No filings found for {}.", query.entity);
                return Ok(());
            }

            for doc in &output.documents {
                let path = out_dir.join(&doc.file_name);
                std::fs::write(&path, &doc.text)
                    .with_context(|| format!("writing {}", path.display()))?;
            }

            println!(
                "Saved {} of {} filings to {}.",
                output.documents.len(),
                output.considered.len(),
                out_dir.display()
            );
            let flagged: Vec<_> = output.documents.iter().filter(|d| d.needs_review).collect();
            if !flagged.is_empty() {
                println!(
                    "\n--- Quarter inferred from submission month ({}) ---",
                    flagged.len()
                );
                for d in &flagged {
                    println!("  {} {}", d.receipt_id, d.file_name);
                }
            }
            if !output.failures.is_empty() {
                println!("\n--- Failed ---");
                for f in &output.failures {
                    println!("  {} {}: {}", f.receipt_id, truncate(&f.title, 40), f.reason);
                }
            }
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

/// `from`-01-01 through `to`-12-31, last year through this year by default.
fn build_query(args: QueryArgs, today: NaiveDate) -> anyhow::Result<FilingQuery> {
    let from = args.from.unwrap_or(today.year() - 1);
    let to = args.to.unwrap_or(today.year());
    let start = NaiveDate::from_ymd_opt(from, 1, 1).with_context(|| format!("bad year {}", from))?;
    let end = NaiveDate::from_ymd_opt(to, 12, 31).with_context(|| format!("bad year {}", to))?;
    if start > end {
        bail!("--from {} is after --to {}", from, to);
    }

    let report_types = if args.types.is_empty() {
        DEFAULT_TYPES.to_vec()
    } else {
        args.types
    };

    Ok(FilingQuery {
        entity: args.entity.trim().to_string(),
        start,
        end,
        report_types,
    })
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max).collect();
        format!("{}...", truncated)
    }
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(line: &[&str]) -> QueryArgs {
        let mut argv = vec!["dart_filings", "list"];
        argv.extend_from_slice(line);
        match Cli::parse_from(argv).command {
            Commands::List(a) => a,
            Commands::Download { .. } => unreachable!(),
        }
    }

    #[test]
    fn default_range_is_last_year_through_this_year() {
        let today = NaiveDate::from_ymd_opt(2024, 7, 1).unwrap();
        let q = build_query(args(&["삼성전자"]), today).unwrap();
        assert_eq!(q.start, NaiveDate::from_ymd_opt(2023, 1, 1).unwrap());
        assert_eq!(q.end, NaiveDate::from_ymd_opt(2024, 12, 31).unwrap());
        assert_eq!(q.report_types, DEFAULT_TYPES.to_vec());
    }

    #[test]
    fn explicit_years_and_types() {
        let today = NaiveDate::from_ymd_opt(2024, 7, 1).unwrap();
        let q = build_query(
            args(&["00126380", "--from", "2020", "--to", "2021", "--types", "annual,Q1"]),
            today,
        )
        .unwrap();
        assert_eq!(q.entity, "00126380");
        assert_eq!(q.start, NaiveDate::from_ymd_opt(2020, 1, 1).unwrap());
        assert_eq!(q.end, NaiveDate::from_ymd_opt(2021, 12, 31).unwrap());
        assert_eq!(q.report_types, vec![ReportType::Annual, ReportType::Q1]);
    }

    #[test]
    fn reversed_years_rejected() {
        let today = NaiveDate::from_ymd_opt(2024, 7, 1).unwrap();
        assert!(build_query(args(&["x", "--from", "2024", "--to", "2020"]), today).is_err());
    }

    #[test]
    fn truncates_by_chars() {
        assert_eq!(truncate("사업보고서", 10), "사업보고서");
        assert_eq!(truncate("사업보고서 (2023.12)", 5), "사업보고서...");
    }
}
