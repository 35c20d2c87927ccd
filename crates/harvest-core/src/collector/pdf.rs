//! PDF collector: text extraction through a provider, or locally with an
//! external extractor command.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::process::Command;
use tracing::{debug, info};

use crate::http_client::{HttpClient, HttpRequest, TransferProgress};
use crate::provider::ToolProviderClient;
use crate::quality::{assess_pdf, QualityThresholds};
use crate::{AcquisitionResult, ContentItem, ContentType, Platform, QualityReport, StrategyKind};

use super::fields::{entries, int_at, text_at};
use super::rules::PdfRules;
use super::source::NormalizedSource;
use super::strategy::{Acquisition, Strategy, StrategyChain, StrategyContext, StrategyFuture, StrategyTable};
use super::{CollectError, ContentPipeline};

const DEFAULT_MAX_PAGES: usize = 10_000;
const DOWNLOAD_FILE: &str = "source.pdf";
const PAGE_BREAK: char = '\u{c}';

pub struct PdfPipeline {
    rules: PdfRules,
    thresholds: QualityThresholds,
    table: StrategyTable,
}

impl PdfPipeline {
    pub fn new(
        rules: PdfRules,
        thresholds: QualityThresholds,
        providers: Arc<ToolProviderClient>,
        http: Arc<dyn HttpClient>,
    ) -> Self {
        let mut table = StrategyTable::default();
        table.insert(
            Platform::Pdf,
            Arc::new(ExtractorStrategy {
                providers,
                provider: rules.extractor_provider.clone(),
            }),
        );
        table.insert(
            Platform::Pdf,
            Arc::new(LocalExtractStrategy {
                http,
                command: rules.extract_command.clone(),
                timeout: Duration::from_secs(rules.extract_timeout_secs),
                keep_download: rules.keep_download,
            }),
        );
        Self {
            rules,
            thresholds,
            table,
        }
    }

    pub fn with_strategy(mut self, strategy: Arc<dyn Strategy>) -> Self {
        self.table.insert(Platform::Pdf, strategy);
        self
    }

    pub fn rules(&self) -> &PdfRules {
        &self.rules
    }
}

impl ContentPipeline for PdfPipeline {
    fn content_type(&self) -> ContentType {
        ContentType::Pdf
    }

    fn default_max_items(&self, _platform: Platform) -> usize {
        DEFAULT_MAX_PAGES
    }

    fn chain(&self, _platform: Platform) -> StrategyChain {
        self.rules.chain()
    }

    fn strategies(&self) -> &StrategyTable {
        &self.table
    }

    fn summarize(&self, source: &NormalizedSource, result: &mut AcquisitionResult) {
        let total_chars: usize = result.items.iter().map(|page| page.text.chars().count()).sum();
        result
            .stats
            .extra
            .insert(String::from("total_chars"), json!(total_chars));
        if let Some(title) = &source.title {
            result
                .metadata
                .extra
                .entry(String::from("title"))
                .or_insert_with(|| json!(title));
        }
    }

    fn assess(&self, _source: &NormalizedSource, result: &AcquisitionResult) -> QualityReport {
        assess_pdf(result, &self.thresholds)
    }
}

/// Splits extractor output on form feeds into numbered pages, dropping a trailing empty page.
pub fn split_pages(text: &str, max_pages: usize) -> Vec<ContentItem> {
    let mut pages: Vec<&str> = text.split(PAGE_BREAK).collect();
    while pages.last().is_some_and(|page| page.trim().is_empty()) {
        pages.pop();
    }
    pages
        .into_iter()
        .take(max_pages)
        .enumerate()
        .map(|(index, page)| ContentItem::page(index + 1, page.trim()))
        .collect()
}

/// `extractText` on the configured extractor provider.
pub struct ExtractorStrategy {
    providers: Arc<ToolProviderClient>,
    provider: String,
}

impl Strategy for ExtractorStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Actor
    }

    fn fetch<'a>(&'a self, source: &'a NormalizedSource, ctx: &'a StrategyContext) -> StrategyFuture<'a> {
        Box::pin(async move {
            ctx.events
                .status("extract", format!("extracting text via {}", self.provider));
            let output = self
                .providers
                .call(&self.provider, "extractText", json!({ "url": source.url }))
                .await?
                .ok_or_else(|| {
                    CollectError::unavailable(
                        StrategyKind::Actor,
                        format!("provider '{}' is disabled", self.provider),
                    )
                })?;

            let pages = provider_pages(&output, source.max_items);
            if pages.is_empty() {
                return Err(CollectError::failed(StrategyKind::Actor, "extractor returned no pages"));
            }
            Ok(Acquisition::new(pages)
                .with_metadata("title", text_at(&output, &["/title", "/metadata/title"]))
                .with_metadata("author", text_at(&output, &["/author", "/metadata/author"]))
                .with_metadata("page_count", int_at(&output, &["/pageCount", "/page_count"])))
        })
    }
}

fn provider_pages(output: &Value, max_pages: usize) -> Vec<ContentItem> {
    let pages = entries(output, &["pages"]);
    if pages.is_empty() {
        return text_at(output, &["/text"])
            .map(|text| split_pages(&text, max_pages))
            .unwrap_or_default();
    }
    pages
        .iter()
        .take(max_pages)
        .enumerate()
        .map(|(index, page)| {
            let text = match page {
                Value::String(text) => text.clone(),
                other => text_at(other, &["/text", "/content"]).unwrap_or_default(),
            };
            let number = int_at(page, &["/number", "/page"])
                .and_then(|number| usize::try_from(number).ok())
                .unwrap_or(index + 1);
            ContentItem::page(number, text.trim())
        })
        .collect()
}

/// Local file (downloaded when remote) run through the extractor command.
pub struct LocalExtractStrategy {
    http: Arc<dyn HttpClient>,
    command: Vec<String>,
    timeout: Duration,
    keep_download: bool,
}

impl LocalExtractStrategy {
    async fn resolve_file(&self, source: &NormalizedSource, ctx: &StrategyContext) -> Result<(PathBuf, bool), CollectError> {
        let lowered = source.url.to_ascii_lowercase();
        if !(lowered.starts_with("http://") || lowered.starts_with("https://")) {
            let path = PathBuf::from(source.url.strip_prefix("file://").unwrap_or(&source.url));
            tokio::fs::metadata(&path)
                .await
                .map_err(|error| CollectError::io(&path, error))?;
            return Ok((path, false));
        }

        let dest = ctx.source_dir.join(DOWNLOAD_FILE);
        ctx.events.status("download", format!("downloading {}", source.url));
        let events = ctx.events.clone();
        let progress = move |progress: TransferProgress| events.download_progress(progress);
        let bytes = self
            .http
            .download(HttpRequest::get(&source.url).with_timeout_ms(300_000), &dest, &progress)
            .await?;
        info!(source_id = %source.id, bytes, path = %dest.display(), "pdf downloaded");
        Ok((dest, true))
    }

    async fn extract(&self, file: &Path) -> Result<String, CollectError> {
        let file_arg = file.to_string_lossy();
        let argv: Vec<String> = self
            .command
            .iter()
            .map(|arg| arg.replace("{file}", &file_arg))
            .collect();
        let Some((program, args)) = argv.split_first() else {
            return Err(CollectError::unavailable(StrategyKind::Scrape, "extract command is empty"));
        };
        debug!(program = %program, "running pdf extractor");

        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();
        let output = tokio::time::timeout(self.timeout, output)
            .await
            .map_err(|_| {
                CollectError::failed(
                    StrategyKind::Scrape,
                    format!("{program} timed out after {}s", self.timeout.as_secs()),
                )
            })?
            .map_err(|error| CollectError::unavailable(StrategyKind::Scrape, format!("cannot run {program}: {error}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CollectError::failed(
                StrategyKind::Scrape,
                format!("{program} exited with {}: {}", output.status, stderr.trim()),
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl Strategy for LocalExtractStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Scrape
    }

    fn fetch<'a>(&'a self, source: &'a NormalizedSource, ctx: &'a StrategyContext) -> StrategyFuture<'a> {
        Box::pin(async move {
            let (file, downloaded) = self.resolve_file(source, ctx).await?;
            ctx.events.status("extract", format!("extracting {}", file.display()));
            let extracted = self.extract(&file).await;
            if downloaded && !self.keep_download {
                let _ = tokio::fs::remove_file(&file).await;
            }
            let pages = split_pages(&extracted?, source.max_items);
            if pages.is_empty() {
                return Err(CollectError::failed(StrategyKind::Scrape, "extractor produced no text"));
            }
            let page_count = pages.len();
            Ok(Acquisition::new(pages)
                .with_metadata("file", file.display().to_string())
                .with_metadata("page_count", page_count))
        })
    }
}
