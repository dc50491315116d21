use crate::config::default_workers;
use crate::error::IngestError;
use crate::models::{ExtractionReport, PageDocument, SkippedPage, Table};
use lopdf::{Document, Object, ObjectId};
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;
use std::sync::{Arc, OnceLock};
use std::time::Instant;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

const CELL_SEPARATOR: &str = r"\t| {2,}";

static CELL_SEPARATOR_RE: OnceLock<Regex> = OnceLock::new();

fn cell_separator() -> Result<&'static Regex, IngestError> {
    if let Some(separator) = CELL_SEPARATOR_RE.get() {
        return Ok(separator);
    }
    let separator = Regex::new(CELL_SEPARATOR)?;
    Ok(CELL_SEPARATOR_RE.get_or_init(|| separator))
}

/// Raw extraction output for a single page, before normalization.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawPage {
    pub text: String,
    pub tables: Vec<Table>,
}

/// A document whose pages can be read independently from worker threads.
pub trait PageSource: Send + Sync {
    fn source(&self) -> &str;

    /// 1-based page numbers in document order.
    fn page_numbers(&self) -> Vec<u32>;

    fn read_page(&self, page_number: u32) -> Result<RawPage, IngestError>;
}

pub struct LopdfSource {
    document: Document,
    pages: BTreeMap<u32, ObjectId>,
    source: String,
}

impl LopdfSource {
    pub fn open(path: &Path) -> Result<Self, IngestError> {
        if !path.is_file() {
            return Err(IngestError::InvalidArgument(format!(
                "not a readable file: {}",
                path.display()
            )));
        }

        let document =
            Document::load(path).map_err(|error| IngestError::PdfParse(error.to_string()))?;

        Ok(Self {
            pages: document.get_pages(),
            document,
            source: path.to_string_lossy().to_string(),
        })
    }

    /// Page text with one line per text line of the content stream.
    fn page_text(&self, page_number: u32) -> Result<String, lopdf::Error> {
        let page_id = *self
            .pages
            .get(&page_number)
            .ok_or(lopdf::Error::PageNumberNotFound(page_number))?;
        let encodings = self
            .document
            .get_page_fonts(page_id)
            .into_iter()
            .map(|(name, font)| (name, font.get_font_encoding()))
            .collect::<BTreeMap<Vec<u8>, &str>>();
        let content = self.document.get_and_decode_page_content(page_id)?;

        let mut text = String::new();
        let mut encoding = None;
        let mut line_y: Option<f32> = None;

        for operation in &content.operations {
            let operands = operation.operands.as_slice();
            match operation.operator.as_str() {
                "Tf" => {
                    encoding = operands
                        .first()
                        .and_then(|name| name.as_name().ok())
                        .and_then(|name| encodings.get(name).copied());
                }
                "Tj" | "TJ" => push_shown_text(&mut text, encoding, operands),
                "'" | "\"" => {
                    break_line(&mut text);
                    if let Some(shown) = operands.last() {
                        push_shown_text(&mut text, encoding, std::slice::from_ref(shown));
                    }
                }
                "Td" | "TD" => match operand_f32(operands, 1) {
                    Some(ty) if ty != 0.0 => break_line(&mut text),
                    _ => separate_words(&mut text),
                },
                "Tm" => {
                    let y = operand_f32(operands, 5);
                    if line_y.is_some() && y != line_y {
                        break_line(&mut text);
                    } else {
                        separate_words(&mut text);
                    }
                    line_y = y;
                }
                "T*" | "ET" => break_line(&mut text),
                _ => {}
            }
        }

        Ok(text)
    }
}

fn operand_f32(operands: &[Object], index: usize) -> Option<f32> {
    operands.get(index).and_then(|value| value.as_float().ok())
}

fn push_shown_text(text: &mut String, encoding: Option<&str>, operands: &[Object]) {
    for operand in operands {
        match operand {
            Object::String(bytes, _) => text.push_str(&Document::decode_text(encoding, bytes)),
            Object::Array(items) => push_shown_text(text, encoding, items),
            Object::Integer(_) | Object::Real(_) => {
                if operand.as_float().is_ok_and(|adjust| adjust < -100.0) {
                    text.push(' ');
                }
            }
            _ => {}
        }
    }
}

fn break_line(text: &mut String) {
    if !text.is_empty() && !text.ends_with('\n') {
        text.push('\n');
    }
}

fn separate_words(text: &mut String) {
    if !text.is_empty() && !text.ends_with(char::is_whitespace) {
        text.push(' ');
    }
}

impl PageSource for LopdfSource {
    fn source(&self) -> &str {
        &self.source
    }

    fn page_numbers(&self) -> Vec<u32> {
        self.pages.keys().copied().collect()
    }

    fn read_page(&self, page_number: u32) -> Result<RawPage, IngestError> {
        let text = self
            .page_text(page_number)
            .map_err(|error| IngestError::Page {
                page: page_number,
                details: error.to_string(),
            })?;
        let tables = detect_tables(&text)?;

        Ok(RawPage { text, tables })
    }
}

/// Finds column-aligned blocks in page text: runs of at least two lines that
/// each split into two or more cells on tabs or wide space gaps.
pub fn detect_tables(text: &str) -> Result<Vec<Table>, IngestError> {
    let separator = cell_separator()?;
    let mut tables = Vec::new();
    let mut current: Table = Vec::new();

    for line in text.lines() {
        let trimmed = line.trim();
        let cells = if trimmed.is_empty() {
            Vec::new()
        } else {
            separator.split(trimmed).collect::<Vec<_>>()
        };

        if cells.len() >= 2 {
            current.push(
                cells
                    .into_iter()
                    .map(|cell| {
                        let cell = cell.trim();
                        if cell.is_empty() {
                            None
                        } else {
                            Some(cell.to_string())
                        }
                    })
                    .collect(),
            );
            continue;
        }

        if current.len() >= 2 {
            tables.push(std::mem::take(&mut current));
        } else {
            current.clear();
        }
    }

    if current.len() >= 2 {
        tables.push(current);
    }

    Ok(tables)
}

pub fn render_table(table: &Table) -> String {
    table
        .iter()
        .filter(|row| !row.is_empty())
        .map(|row| {
            row.iter()
                .map(|cell| cell.as_deref().unwrap_or(""))
                .collect::<Vec<_>>()
                .join(" ")
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Page text followed by every rendered table, separated by blank lines and trimmed.
pub fn combine_page(page: &RawPage) -> String {
    let tables = page
        .tables
        .iter()
        .map(render_table)
        .collect::<Vec<_>>()
        .join("\n\n");

    format!("{}\n\n{}", page.text, tables).trim().to_string()
}

pub struct PageExtractor {
    workers: usize,
}

impl Default for PageExtractor {
    fn default() -> Self {
        Self::new(default_workers())
    }
}

impl PageExtractor {
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
        }
    }

    pub async fn extract(&self, path: &Path) -> Result<ExtractionReport, IngestError> {
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());
        info!(file = %name, "starting extraction");

        let owned = path.to_path_buf();
        let source = tokio::task::spawn_blocking(move || LopdfSource::open(&owned))
            .await
            .map_err(|error| IngestError::PdfParse(format!("pdf loader task failed: {error}")))??;

        Ok(self.extract_from(Arc::new(source)).await)
    }

    /// Reads every page on a pool of at most `workers` blocking tasks. Pages that
    /// fail or panic are reported in `skipped`; result order follows completion.
    pub async fn extract_from<S>(&self, source: Arc<S>) -> ExtractionReport
    where
        S: PageSource + 'static,
    {
        let started = Instant::now();
        let mut queue = source.page_numbers().into_iter();
        let mut outstanding = BTreeSet::new();
        let mut tasks = JoinSet::new();
        let mut report = ExtractionReport::default();

        for page_number in queue.by_ref().take(self.workers) {
            outstanding.insert(page_number);
            spawn_page(&mut tasks, Arc::clone(&source), page_number);
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((page_number, outcome)) => {
                    outstanding.remove(&page_number);
                    record_page(&mut report, source.source(), page_number, outcome);
                }
                Err(error) => warn!(error = %error, "page worker did not report"),
            }

            if let Some(page_number) = queue.next() {
                outstanding.insert(page_number);
                spawn_page(&mut tasks, Arc::clone(&source), page_number);
            }
        }

        for page_number in outstanding {
            report.skipped.push(SkippedPage {
                page_number,
                reason: "page worker aborted".to_string(),
            });
        }

        info!(
            pages = report.pages.len(),
            skipped = report.skipped.len(),
            empty = report.empty_pages,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "extraction finished"
        );

        report
    }
}

fn spawn_page<S>(
    tasks: &mut JoinSet<(u32, Result<RawPage, IngestError>)>,
    source: Arc<S>,
    page_number: u32,
) where
    S: PageSource + 'static,
{
    tasks.spawn_blocking(move || {
        let outcome = catch_unwind(AssertUnwindSafe(|| source.read_page(page_number)))
            .unwrap_or_else(|_| {
                Err(IngestError::Page {
                    page: page_number,
                    details: "extraction panicked".to_string(),
                })
            });
        (page_number, outcome)
    });
}

fn record_page(
    report: &mut ExtractionReport,
    source: &str,
    page_number: u32,
    outcome: Result<RawPage, IngestError>,
) {
    match outcome {
        Ok(raw) => match PageDocument::new(combine_page(&raw), source, page_number) {
            Some(page) => report.pages.push(page),
            None => {
                debug!(page = page_number, "page has no extractable content");
                report.empty_pages += 1;
            }
        },
        Err(error) => {
            warn!(page = page_number, error = %error, "failed processing page");
            report.skipped.push(SkippedPage {
                page_number,
                reason: error.to_string(),
            });
        }
    }
}
