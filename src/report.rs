//! Clinical report generation — rendering, PDF encoding, export.
//!
//! A report is built from either a completed live session or a history record:
//! 1. `render` lays the record out as a `ReportDocument` (plain fields plus the
//!    resolved heatmap source)
//! 2. `ReportExporter::export` fetches the heatmap, encodes the PDF via
//!    `printpdf`, and hands it to an `ExportSink`
//!
//! Text is drawn in built-in Helvetica unless a TrueType `ReportFont` is
//! supplied. Field text the font cannot encode fails the export rather than
//! printing an altered patient name.
//!
//! Export never touches session or history state; a failure is reported and
//! the caller's data stays as it was.

use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Local};
use printpdf::image_crate::{self, DynamicImage};
use printpdf::*;
use url::Url;

use crate::client::AnalysisService;
use crate::errors::ReportExportError;
use crate::models::{Finding, ScanRecord};
use crate::session::CompletedSession;

/// Display width of the heatmap in a live-session report, in CSS pixels.
pub const SESSION_HEATMAP_WIDTH_PX: u32 = 400;
/// Display width of the heatmap in a history-record report, in CSS pixels.
pub const RECORD_HEATMAP_WIDTH_PX: u32 = 350;

const SESSION_TITLE: &str = "NEUROSCAN AI REPORT";
const HEATMAP_CAPTION: &str = "Neural Activation Heatmap (Grad-CAM)";

const PAGE_WIDTH_MM: f32 = 210.0;
const PAGE_HEIGHT_MM: f32 = 297.0;
const MARGIN_MM: f32 = 20.0;
/// CSS reference pixel density.
const CSS_DPI: f32 = 96.0;

// ─── Types ────────────────────────────────────────────────────────────────────

/// What a report is built from. A live session only qualifies once completed.
#[derive(Debug, Clone, Copy)]
pub enum ReportSource<'a> {
    Session(CompletedSession<'a>),
    Record(&'a ScanRecord),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportField {
    pub label: String,
    pub value: String,
}

/// Fixed-layout report, ready to encode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportDocument {
    pub title: String,
    /// Patient, prediction, confidence, timestamp — in print order.
    pub fields: Vec<ReportField>,
    /// Absolute heatmap URL.
    pub heatmap_src: String,
    pub heatmap_width_px: u32,
    pub heatmap_caption: Option<String>,
    pub finding: Finding,
    /// File name without extension.
    pub file_stem: String,
}

impl ReportDocument {
    pub fn field(&self, label: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|f| f.label == label)
            .map(|f| f.value.as_str())
    }
}

fn field(label: &str, value: impl Into<String>) -> ReportField {
    ReportField {
        label: label.to_string(),
        value: value.into(),
    }
}

// ─── Rendering ────────────────────────────────────────────────────────────────

/// Resolve a heatmap reference against the service origin unless it is
/// already an absolute http(s) URL.
pub fn resolve_heatmap_url(base: &Url, raw: &str) -> String {
    let raw = raw.trim();
    if let Ok(url) = Url::parse(raw) {
        if matches!(url.scheme(), "http" | "https") {
            return url.into();
        }
    }
    match base.join(raw) {
        Ok(url) => url.into(),
        Err(e) => {
            tracing::warn!("Cannot resolve heatmap reference {raw:?}: {e}");
            format!("{}{}", base.as_str().trim_end_matches('/'), raw)
        }
    }
}

/// Render a report. `now` stamps live sessions; records carry their own date.
pub fn render(source: ReportSource<'_>, base: &Url, now: DateTime<Local>) -> ReportDocument {
    match source {
        ReportSource::Session(session) => {
            let result = session.result;
            ReportDocument {
                title: SESSION_TITLE.to_string(),
                fields: vec![
                    field("Patient", session.patient_name.to_uppercase()),
                    field("Diagnosis", result.prediction.to_uppercase()),
                    field("Confidence", result.confidence.clone()),
                    field("Timestamp", now.format("%Y-%m-%d %H:%M:%S").to_string()),
                ],
                heatmap_src: resolve_heatmap_url(base, &result.heatmap_url),
                heatmap_width_px: SESSION_HEATMAP_WIDTH_PX,
                heatmap_caption: Some(HEATMAP_CAPTION.to_string()),
                finding: result.finding(),
                file_stem: format!(
                    "neuroscan_report_{}_{}",
                    slug(session.patient_name),
                    now.format("%Y%m%d_%H%M%S")
                ),
            }
        }
        ReportSource::Record(record) => ReportDocument {
            title: format!("CLINICAL RECORD #{}", record.id),
            fields: vec![
                field("Patient", record.patient_name.clone()),
                field("Result", record.prediction.to_uppercase()),
                field("Confidence", record.confidence.clone()),
                field(
                    "Date",
                    record
                        .created_at
                        .with_timezone(&Local)
                        .format("%Y-%m-%d")
                        .to_string(),
                ),
            ],
            heatmap_src: resolve_heatmap_url(base, &record.heatmap_url),
            heatmap_width_px: RECORD_HEATMAP_WIDTH_PX,
            heatmap_caption: None,
            finding: record.finding(),
            file_stem: format!("clinical_record_{}", record.id),
        },
    }
}

fn slug(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.trim().chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        } else if !out.ends_with('_') {
            out.push('_');
        }
    }
    let trimmed = out.trim_matches('_');
    if trimmed.is_empty() {
        "patient".to_string()
    } else {
        trimmed.to_string()
    }
}

// ─── PDF generation ───────────────────────────────────────────────────────────

/// Heatmap content for the PDF.
pub enum Heatmap {
    Image(DynamicImage),
    /// Printed in place of the image, with the reason.
    Unavailable(String),
}

pub fn decode_heatmap(bytes: &[u8]) -> Heatmap {
    match image_crate::load_from_memory(bytes) {
        Ok(image) => Heatmap::Image(image),
        Err(e) => Heatmap::Unavailable(format!("cannot decode image: {e}")),
    }
}

/// Typeface for report text.
#[derive(Debug, Clone, Default)]
pub enum ReportFont {
    /// Built-in Helvetica. Only WinAnsi characters can be drawn.
    #[default]
    Builtin,
    /// TrueType face embedded in the PDF.
    TrueType(Arc<Vec<u8>>),
}

impl ReportFont {
    pub fn load(path: &Path) -> Result<Self, ReportExportError> {
        let bytes = std::fs::read(path)
            .map_err(|e| ReportExportError::Font(format!("cannot read {}: {e}", path.display())))?;
        Self::from_bytes(bytes)
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, ReportExportError> {
        ttf_parser::Face::parse(&bytes, 0)
            .map_err(|e| ReportExportError::Font(format!("not a usable TrueType face: {e}")))?;
        Ok(Self::TrueType(Arc::new(bytes)))
    }
}

/// What the active font can encode. printpdf drops anything outside it
/// without complaint, so every string is checked before it is drawn.
enum Coverage<'a> {
    WinAnsi,
    Glyphs(ttf_parser::Face<'a>),
}

impl Coverage<'_> {
    fn covers(&self, c: char) -> bool {
        match self {
            Coverage::WinAnsi => !printpdf::lopdf::Document::encode_text(
                Some("WinAnsiEncoding"),
                c.encode_utf8(&mut [0; 4]),
            )
            .is_empty(),
            Coverage::Glyphs(face) => face.glyph_index(c).is_some(),
        }
    }

    fn missing(&self, text: &str) -> String {
        text.chars().filter(|&c| !self.covers(c)).collect()
    }
}

struct Pen<'a> {
    layer: PdfLayerReference,
    regular: IndirectFontRef,
    bold: IndirectFontRef,
    coverage: Coverage<'a>,
}

impl Pen<'_> {
    /// Draw `text` unaltered or fail. Used for anything identifying the patient
    /// or the finding.
    fn exact(&self, text: &str, size: f32, x: Mm, y: Mm, bold: bool) -> Result<(), ReportExportError> {
        let missing = self.coverage.missing(text);
        if !missing.is_empty() {
            return Err(ReportExportError::UnsupportedText {
                text: text.to_string(),
                missing,
            });
        }
        self.draw(text, size, x, y, bold);
        Ok(())
    }

    /// Draw `text` with `?` in place of characters the font lacks.
    fn lossy(&self, text: &str, size: f32, x: Mm, y: Mm) {
        let text: String = text
            .chars()
            .map(|c| if self.coverage.covers(c) { c } else { '?' })
            .collect();
        self.draw(&text, size, x, y, false);
    }

    fn draw(&self, text: &str, size: f32, x: Mm, y: Mm, bold: bool) {
        let font = if bold { &self.bold } else { &self.regular };
        self.layer.use_text(text, size, x, y, font);
    }
}

/// Display size of a heatmap, in mm: `width_px` CSS pixels wide, shrunk
/// proportionally when taller than `max_height_mm`.
fn fit_heatmap(px_w: u32, px_h: u32, width_px: u32, max_height_mm: f32) -> (f32, f32) {
    let (px_w, px_h) = (px_w.max(1) as f32, px_h.max(1) as f32);
    let width_mm = width_px as f32 * 25.4 / CSS_DPI;
    let height_mm = width_mm * px_h / px_w;
    if height_mm <= max_height_mm {
        return (width_mm, height_mm);
    }
    let max_height_mm = max_height_mm.max(1.0);
    (width_mm * max_height_mm / height_mm, max_height_mm)
}

/// Encodes the report as a single A4 page. Returns PDF bytes.
pub fn encode_pdf(
    doc: &ReportDocument,
    heatmap: &Heatmap,
    font: &ReportFont,
) -> Result<Vec<u8>, ReportExportError> {
    let (pdf, page1, layer1) = PdfDocument::new(
        &doc.title,
        Mm(PAGE_WIDTH_MM),
        Mm(PAGE_HEIGHT_MM),
        "Layer 1",
    );
    let layer = pdf.get_page(page1).get_layer(layer1);
    let font_error = |e: Error| ReportExportError::Font(e.to_string());
    let pen = match font {
        ReportFont::Builtin => Pen {
            layer,
            regular: pdf.add_builtin_font(BuiltinFont::Helvetica).map_err(font_error)?,
            bold: pdf.add_builtin_font(BuiltinFont::HelveticaBold).map_err(font_error)?,
            coverage: Coverage::WinAnsi,
        },
        ReportFont::TrueType(bytes) => {
            let face = ttf_parser::Face::parse(bytes.as_slice(), 0)
                .map_err(|e| ReportExportError::Font(e.to_string()))?;
            // One face serves both weights.
            let regular = pdf.add_external_font(bytes.as_slice()).map_err(font_error)?;
            Pen {
                layer,
                bold: regular.clone(),
                regular,
                coverage: Coverage::Glyphs(face),
            }
        }
    };

    let mut y = Mm(280.0);

    pen.exact(&doc.title, 18.0, Mm(MARGIN_MM), y, true)?;
    y -= Mm(14.0);

    for f in &doc.fields {
        pen.exact(&format!("{}:", f.label), 11.0, Mm(MARGIN_MM), y, true)?;
        pen.exact(&f.value, 11.0, Mm(MARGIN_MM + 28.0), y, false)?;
        y -= Mm(7.0);
    }
    y -= Mm(8.0);

    let caption_room = if doc.heatmap_caption.is_some() { 6.0 } else { 0.0 };
    match heatmap {
        Heatmap::Image(image) => {
            let (width_mm, height_mm) = fit_heatmap(
                image.width(),
                image.height(),
                doc.heatmap_width_px,
                y.0 - MARGIN_MM - caption_room,
            );
            let bottom = y - Mm(height_mm);
            Image::from_dynamic_image(image).add_to_layer(
                pen.layer.clone(),
                ImageTransform {
                    translate_x: Some(Mm((PAGE_WIDTH_MM - width_mm) / 2.0)),
                    translate_y: Some(bottom),
                    // Native pixels at this density span exactly `width_mm`.
                    dpi: Some(image.width().max(1) as f32 * 25.4 / width_mm),
                    ..Default::default()
                },
            );
            y = bottom - Mm(6.0);
        }
        Heatmap::Unavailable(reason) => {
            pen.exact("Heatmap unavailable", 11.0, Mm(MARGIN_MM), y, true)?;
            y -= Mm(6.0);
            for line in wrap_text(&format!("{} ({reason})", doc.heatmap_src), 90) {
                pen.lossy(&line, 8.0, Mm(MARGIN_MM), y);
                y -= Mm(4.0);
            }
            y -= Mm(2.0);
        }
    }

    if let Some(caption) = &doc.heatmap_caption {
        pen.exact(caption, 9.0, Mm(MARGIN_MM), y, false)?;
    }

    let mut buf = BufWriter::new(Vec::new());
    pdf.save(&mut buf)
        .map_err(|e| ReportExportError::Pdf(format!("save error: {e}")))?;
    buf.into_inner()
        .map_err(|e| ReportExportError::Pdf(format!("buffer error: {e}")))
}

/// Simple word-wrap helper for PDF text rendering.
fn wrap_text(text: &str, max_chars: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();

    for word in text.split_whitespace() {
        if current.len() + word.len() + 1 > max_chars && !current.is_empty() {
            lines.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() || lines.is_empty() {
        lines.push(current);
    }
    lines
}

// ─── Export ───────────────────────────────────────────────────────────────────

/// Platform save/share facility for finished reports.
pub trait ExportSink: Send + Sync {
    /// Store the PDF under `file_name`; returns where it landed.
    fn deliver(&self, file_name: &str, pdf: &[u8]) -> Result<PathBuf, ReportExportError>;
}

/// Writes reports into a directory, creating it on first use.
pub struct FileExportSink {
    dir: PathBuf,
}

impl FileExportSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl ExportSink for FileExportSink {
    fn deliver(&self, file_name: &str, pdf: &[u8]) -> Result<PathBuf, ReportExportError> {
        std::fs::create_dir_all(&self.dir).map_err(|e| {
            ReportExportError::Sink(format!("cannot create {}: {e}", self.dir.display()))
        })?;

        let path = self.dir.join(file_name);
        std::fs::write(&path, pdf)?;
        Ok(path)
    }
}

/// Renders and exports reports against one service origin.
pub struct ReportExporter {
    service: Arc<dyn AnalysisService>,
    sink: Arc<dyn ExportSink>,
    font: ReportFont,
}

impl ReportExporter {
    pub fn new(service: Arc<dyn AnalysisService>, sink: Arc<dyn ExportSink>) -> Self {
        Self {
            service,
            sink,
            font: ReportFont::default(),
        }
    }

    pub fn with_font(mut self, font: ReportFont) -> Self {
        self.font = font;
        self
    }

    pub fn render(&self, source: ReportSource<'_>) -> ReportDocument {
        render(source, self.service.base_url(), Local::now())
    }

    /// Encode `doc` and hand it to the sink. A heatmap that cannot be fetched
    /// is noted on the page rather than failing the export.
    pub async fn export(&self, doc: &ReportDocument) -> Result<PathBuf, ReportExportError> {
        let heatmap = self.load_heatmap(doc).await;
        let pdf = encode_pdf(doc, &heatmap, &self.font)
            .inspect_err(|e| match e {
                // The message carries patient text.
                ReportExportError::UnsupportedText { missing, .. } => {
                    tracing::error!(missing = missing.chars().count(), "Report font lacks characters")
                }
                other => tracing::error!("Report encoding failed: {other}"),
            })?;
        let path = self
            .sink
            .deliver(&format!("{}.pdf", doc.file_stem), &pdf)
            .inspect_err(|e| tracing::error!("Report export failed: {e}"))?;

        tracing::info!(path = %path.display(), bytes = pdf.len(), "Report exported");
        Ok(path)
    }

    /// Fetch and decode the heatmap `doc` points at.
    pub async fn load_heatmap(&self, doc: &ReportDocument) -> Heatmap {
        let heatmap = match self.service.fetch_heatmap(&doc.heatmap_src).await {
            Ok(bytes) => decode_heatmap(&bytes),
            Err(e) => Heatmap::Unavailable(e.to_string()),
        };
        if let Heatmap::Unavailable(reason) = &heatmap {
            tracing::warn!(src = %doc.heatmap_src, "Exporting report without heatmap: {reason}");
        }
        heatmap
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
