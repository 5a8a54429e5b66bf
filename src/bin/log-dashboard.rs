/// Log Analytics Dashboard
///
/// Uploads a CSV to the classification service, prints the label summary and
/// a bar chart, applies label/source/search filters, and saves the filtered
/// rows as CSV.
use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use log_classifier::dashboard::{render_bar_chart, LabeledTable, LogFilter};

#[derive(Debug, Parser)]
#[command(name = "log-dashboard", about = "Classify a CSV of logs and explore the labels")]
struct Args {
    /// CSV file with `source` and `log_message` columns
    file: PathBuf,

    /// Classification endpoint
    #[arg(long, env = "CLASSIFY_URL", default_value = "http://localhost:8000/classify/")]
    url: String,

    /// Keep only these labels (repeatable)
    #[arg(long = "label")]
    labels: Vec<String>,

    /// Keep only these sources (repeatable)
    #[arg(long = "source")]
    sources: Vec<String>,

    /// Case-insensitive substring search on log messages
    #[arg(long)]
    search: Option<String>,

    /// Where to save the filtered rows
    #[arg(long, default_value = "filtered_logs.csv")]
    out: PathBuf,

    /// Maximum number of filtered rows to print
    #[arg(long, default_value_t = 20)]
    show: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_target(false)
        .init();

    let args = Args::parse();

    let bytes = tokio::fs::read(&args.file)
        .await
        .with_context(|| format!("Failed to read {}", args.file.display()))?;
    let filename = args
        .file
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("upload.csv")
        .to_string();

    println!("⏳ Classifying logs...");
    let part = reqwest::multipart::Part::bytes(bytes)
        .file_name(filename)
        .mime_str("text/csv")?;
    let form = reqwest::multipart::Form::new().part("file", part);

    let response = reqwest::Client::new()
        .post(&args.url)
        .multipart(form)
        .send()
        .await
        .with_context(|| format!("Failed to reach {}", args.url))?;

    let status = response.status();
    let body = response.bytes().await?;
    if !status.is_success() {
        let detail = serde_json::from_slice::<serde_json::Value>(&body)
            .ok()
            .and_then(|v| v.get("detail").and_then(|d| d.as_str()).map(String::from))
            .unwrap_or_else(|| "Unknown error".to_string());
        eprintln!("❌ Failed to classify logs: {}", detail);
        std::process::exit(1);
    }

    let table = LabeledTable::from_csv_bytes(&body).context("Service returned an invalid CSV")?;
    println!("✅ Logs classified successfully!\n");

    let summary = table.summary();
    println!("📊 Log Classification Summary");
    println!("   Total Logs:    {:>8}", summary.total_logs);
    println!("   Unique Labels: {:>8}\n", summary.unique_labels);
    print!("{}", render_bar_chart(&summary.label_counts, 40));

    let filter = LogFilter {
        labels: args.labels,
        sources: args.sources,
        search: args.search,
    };
    let filtered = table.filter(&filter);

    println!("\n🧠 Filter & Explore Logs");
    if filter.is_empty() {
        println!("   (no filters; labels: {})", table.label_options().join(", "));
    }
    println!("Displaying {} of {} log entries.", filtered.len(), table.len());
    println!("{}", filtered.headers().join(" | "));
    for row in filtered.rows().iter().take(args.show) {
        println!("{}", row.join(" | "));
    }
    if filtered.len() > args.show {
        println!("... {} more", filtered.len() - args.show);
    }

    let csv = filtered.to_csv_bytes()?;
    tokio::fs::write(&args.out, csv)
        .await
        .with_context(|| format!("Failed to write {}", args.out.display()))?;
    println!("\n📥 Filtered logs saved to {}", args.out.display());

    Ok(())
}
