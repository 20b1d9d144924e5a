//! Document Builder Module
//!
//! Renders a finished analysis for download: JSON, Markdown, or a plain
//! text PDF.

use crate::orchestrator::AnalysisResult;
use crate::sampler::SamplingStrategy;
use anyhow::{Context, Result};
use log::info;
use pdf_writer::{Content, Finish, Name, Pdf, Rect, Ref, Str};
use std::fmt::Write as _;
use std::fs;
use std::path::Path;

// Standard PDF page sizes in points (1/72 inch).
const A4_WIDTH_PT: f32 = 595.0;
const A4_HEIGHT_PT: f32 = 842.0;
const MARGIN_PT: f32 = 56.0;
const TITLE_SIZE_PT: f32 = 16.0;
const BODY_SIZE_PT: f32 = 11.0;
const LEADING_PT: f32 = 14.0;
// Helvetica at 11pt averages a little over 5pt per glyph.
const WRAP_COLUMNS: usize = 88;

const FONT_NAME: Name<'static> = Name(b"F1");

/// Output formats offered for a cached analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Markdown,
    Pdf,
}

impl ExportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Markdown => "md",
            ExportFormat::Pdf => "pdf",
        }
    }
}

/// Renders `result` in the requested format.
pub fn render(result: &AnalysisResult, format: ExportFormat) -> Result<Vec<u8>> {
    match format {
        ExportFormat::Json => to_json(result).map(String::into_bytes),
        ExportFormat::Markdown => Ok(to_markdown(result).into_bytes()),
        ExportFormat::Pdf => Ok(render_pdf(result)),
    }
}

pub fn to_json(result: &AnalysisResult) -> Result<String> {
    serde_json::to_string_pretty(result).context("Failed to serialize analysis result")
}

pub fn to_markdown(result: &AnalysisResult) -> String {
    let mut md = String::from("# Video Analysis Result\n\n");
    for (label, value) in header_fields(result) {
        let _ = writeln!(md, "**{label}:** {value}  ");
    }
    md.push('\n');
    match (&result.analysis, &result.error) {
        (_, Some(failure)) => {
            let _ = writeln!(md, "## Error\n\n{}", failure.message);
        }
        (Some(text), None) => {
            let _ = writeln!(md, "## Analysis\n\n{text}");
        }
        (None, None) => md.push_str("## Analysis\n\n_No analysis available._\n"),
    }
    md
}

/// Builds the PDF and writes it to `output_path`.
pub fn build_pdf(result: &AnalysisResult, output_path: &Path) -> Result<()> {
    if let Some(parent_dir) = output_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent_dir).context("Failed to create PDF parent directory")?;
    }
    info!("Writing PDF to {:?}", output_path);
    fs::write(output_path, render_pdf(result)).context("Failed to write PDF file")
}

/// Lays the report out as wrapped Helvetica text over as many A4 pages as needed.
pub fn render_pdf(result: &AnalysisResult) -> Vec<u8> {
    let mut lines: Vec<String> = header_fields(result)
        .into_iter()
        .map(|(label, value)| format!("{label}: {value}"))
        .flat_map(|line| wrap(&line, WRAP_COLUMNS))
        .collect();
    lines.push(String::new());
    let (heading, body) = match (&result.analysis, &result.error) {
        (_, Some(failure)) => ("Error:", failure.message.as_str()),
        (Some(text), None) => ("Analysis:", text.as_str()),
        (None, None) => ("Analysis:", "No analysis available."),
    };
    lines.push(heading.to_string());
    for paragraph in body.lines() {
        lines.extend(wrap(paragraph, WRAP_COLUMNS));
    }

    let lines_per_page = ((A4_HEIGHT_PT - 2.0 * MARGIN_PT - TITLE_SIZE_PT * 2.0) / LEADING_PT) as usize;
    let pages: Vec<&[String]> = lines.chunks(lines_per_page.max(1)).collect();

    let mut pdf = Pdf::new();
    let mut next_id = 0;
    let mut alloc = || {
        next_id += 1;
        Ref::new(next_id)
    };

    let catalog_ref = alloc();
    let page_tree_ref = alloc();
    let font_ref = alloc();
    pdf.catalog(catalog_ref).pages(page_tree_ref);
    pdf.type1_font(font_ref).base_font(Name(b"Helvetica"));

    let page_refs: Vec<(Ref, Ref)> = pages.iter().map(|_| (alloc(), alloc())).collect();

    for (number, (page_lines, (page_ref, content_ref))) in pages.iter().zip(&page_refs).enumerate() {
        let mut page = pdf.page(*page_ref);
        page.media_box(Rect::new(0.0, 0.0, A4_WIDTH_PT, A4_HEIGHT_PT));
        page.parent(page_tree_ref);
        page.contents(*content_ref);
        let mut resources = page.resources();
        resources.fonts().pair(FONT_NAME, font_ref);
        resources.finish();
        page.finish();

        let mut content = Content::new();
        content.begin_text();
        let mut y = A4_HEIGHT_PT - MARGIN_PT;
        if number == 0 {
            content.set_font(FONT_NAME, TITLE_SIZE_PT);
            content.set_text_matrix([1.0, 0.0, 0.0, 1.0, MARGIN_PT, y]);
            content.show(Str(b"Video Analysis Result"));
        }
        y -= TITLE_SIZE_PT * 2.0;
        content.set_font(FONT_NAME, BODY_SIZE_PT);
        for line in page_lines.iter() {
            content.set_text_matrix([1.0, 0.0, 0.0, 1.0, MARGIN_PT, y]);
            content.show(Str(&pdf_safe(line)));
            y -= LEADING_PT;
        }
        content.end_text();
        pdf.stream(*content_ref, &content.finish());
    }

    pdf.pages(page_tree_ref)
        .kids(page_refs.iter().map(|(page_ref, _)| *page_ref))
        .count(pages.len() as i32);
    pdf.finish()
}

fn header_fields(result: &AnalysisResult) -> Vec<(&'static str, String)> {
    let mut fields = vec![
        ("Filename", result.source.clone()),
        ("Analysis Type", result.style.clone()),
    ];
    if let Some(custom) = &result.custom_instructions {
        fields.push(("Custom Prompt", custom.clone()));
    }
    fields.push(("Frames extracted", result.frames_extracted.to_string()));
    if let Some(strategy) = &result.strategy {
        fields.push(("Sampling", describe_strategy(strategy)));
    }
    fields.push(("Cache key", result.cache_key.clone()));
    fields
}

fn describe_strategy(strategy: &SamplingStrategy) -> String {
    match strategy {
        SamplingStrategy::Dense { interval_secs } => {
            format!("one frame every {interval_secs:.0}s")
        }
        SamplingStrategy::FixedInterval { interval_secs } => {
            format!("one frame every {interval_secs:.2}s")
        }
        SamplingStrategy::SceneBoundaries { boundaries } => {
            format!("{boundaries} scene boundaries")
        }
        SamplingStrategy::SceneFallback { interval_secs } => {
            format!("one frame every {interval_secs:.2}s (scene detection fallback)")
        }
    }
}

/// Greedy word wrap; words longer than `width` are split.
fn wrap(text: &str, width: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    for word in text.split_whitespace() {
        let mut word: Vec<char> = word.chars().collect();
        while word.len() > width {
            if !current.is_empty() {
                lines.push(std::mem::take(&mut current));
            }
            lines.push(word.drain(..width).collect());
        }
        let word: String = word.into_iter().collect();
        let needed = if current.is_empty() { 0 } else { 1 } + word.chars().count();
        if current.chars().count() + needed > width && !current.is_empty() {
            lines.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(&word);
    }
    if !current.is_empty() || lines.is_empty() {
        lines.push(current);
    }
    lines
}

/// The built-in Helvetica only covers printable ASCII reliably.
fn pdf_safe(line: &str) -> Vec<u8> {
    line.chars()
        .map(|c| if c.is_ascii() && !c.is_ascii_control() { c as u8 } else { b'?' })
        .collect()
}
