use std::collections::HashMap;
use std::fmt::Write;
use std::io::BufWriter;

use printpdf::{BuiltinFont, IndirectFontRef, Mm, PdfDocument, PdfDocumentReference, PdfLayerReference};
use thiserror::Error;

use crate::models::{AnalysisRecord, DiagnosisSummary};
use crate::risk::{self, Diagnosis};

pub const CLINIC_NAME: &str = "MediSleep Clinic";
pub const CLINIC_TAGLINE: &str = "Sleep Disorder Analysis & Classification Center";
pub const REPORT_TITLE: &str = "Sleep Disorder Analysis Report";
pub const DISCLAIMER: &str = "This report is generated by an automated rule-based screening system \
     for informational purposes only. It does not constitute medical advice or diagnosis. Always \
     consult a qualified healthcare professional for proper diagnosis, treatment, and medical \
     guidance. The analysis is based on submitted metrics and should not replace professional \
     medical evaluation.";

const NOT_AVAILABLE: &str = "N/A";

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("PDF encoding failed: {0}")]
    Pdf(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReportLine {
    Field { label: String, value: String },
    Text(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReportSection {
    pub heading: String,
    pub lines: Vec<ReportLine>,
}

/// Layout-independent content of a patient report.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportDocument {
    pub title: String,
    pub header: Vec<String>,
    pub sections: Vec<ReportSection>,
}

impl ReportDocument {
    /// Every piece of text in the document, in reading order.
    pub fn text_lines(&self) -> Vec<String> {
        let mut lines = self.header.clone();
        lines.push(self.title.clone());
        for section in &self.sections {
            lines.push(section.heading.clone());
            for line in &section.lines {
                lines.push(match line {
                    ReportLine::Field { label, value } => format!("{label}: {value}"),
                    ReportLine::Text(text) => text.clone(),
                });
            }
        }
        lines
    }
}

fn field(label: &str, value: impl Into<String>) -> ReportLine {
    ReportLine::Field {
        label: label.to_string(),
        value: value.into(),
    }
}

fn or_na(value: &str) -> String {
    if value.trim().is_empty() {
        NOT_AVAILABLE.to_string()
    } else {
        value.to_string()
    }
}

pub fn build_report(record: &AnalysisRecord) -> ReportDocument {
    let survey = &record.survey;

    let details = ReportSection {
        heading: "REPORT DETAILS".to_string(),
        lines: vec![
            field("Report ID", record.id.to_string()),
            field(
                "Analysis Date",
                record.created_at.format("%Y-%m-%d %H:%M UTC").to_string(),
            ),
        ],
    };

    let patient = ReportSection {
        heading: "PATIENT INFORMATION".to_string(),
        lines: vec![
            field("Email", or_na(&record.user_email)),
            field("Phone", or_na(&survey.phone)),
            field("Age", format!("{} years", survey.age)),
            field("Gender", survey.gender.label()),
            field("Occupation", or_na(&survey.occupation)),
            field("BMI Category", survey.bmi_category.label()),
        ],
    };

    let vitals = ReportSection {
        heading: "VITAL SIGNS & HEALTH METRICS".to_string(),
        lines: vec![
            field("Blood Pressure", format!("{} mmHg", survey.blood_pressure)),
            field("Heart Rate", format!("{} bpm", survey.heart_rate)),
            field("Sleep Duration", format!("{} hours/night", survey.sleep_duration)),
            field("Stress Level", format!("{}/10", survey.stress)),
            field(
                "Snoring Frequency",
                format!("{} times/week", survey.snoring_frequency),
            ),
            field("Working Hours", format!("{} hours/day", survey.working_hours)),
        ],
    };

    let mut results = vec![
        field("Primary Diagnosis", or_na(&record.diagnosis)),
        field(
            "Risk Level",
            format!(
                "{} (Severity: {}/3)",
                risk::severity_label(record.severity),
                record.severity
            ),
        ),
    ];

    // Stored rows may predate the current rule set; only re-derive the
    // contributing factors when the stored verdict still matches.
    let assessment = risk::classify(survey);
    if Diagnosis::from_label(&record.diagnosis) == Some(assessment.diagnosis)
        && !assessment.rationale.is_empty()
    {
        results.push(ReportLine::Text("Contributing factors:".to_string()));
        results.extend(
            assessment
                .rationale
                .iter()
                .map(|reason| ReportLine::Text(format!("- {reason}"))),
        );
    }
    results.push(ReportLine::Text("Summary:".to_string()));
    results.extend(
        risk::recommendation(record.severity)
            .iter()
            .map(|line| ReportLine::Text(format!("- {line}"))),
    );

    let analysis = ReportSection {
        heading: "ANALYSIS RESULTS".to_string(),
        lines: results,
    };

    let disclaimer = ReportSection {
        heading: "MEDICAL DISCLAIMER".to_string(),
        lines: vec![ReportLine::Text(DISCLAIMER.to_string())],
    };

    ReportDocument {
        title: REPORT_TITLE.to_string(),
        header: vec![CLINIC_NAME.to_string(), CLINIC_TAGLINE.to_string()],
        sections: vec![details, patient, vitals, analysis, disclaimer],
    }
}

pub fn render(record: &AnalysisRecord) -> Result<Vec<u8>, ReportError> {
    render_pdf(&build_report(record))
}

pub fn render_markdown(doc: &ReportDocument) -> String {
    let mut output = String::new();

    for line in &doc.header {
        let _ = writeln!(output, "**{line}**  ");
    }
    let _ = writeln!(output);
    let _ = writeln!(output, "# {}", doc.title);

    for section in &doc.sections {
        let _ = writeln!(output);
        let _ = writeln!(output, "## {}", section.heading);
        for line in &section.lines {
            match line {
                ReportLine::Field { label, value } => {
                    let _ = writeln!(output, "- **{label}:** {value}");
                }
                ReportLine::Text(text) => {
                    let _ = writeln!(output, "{text}");
                }
            }
        }
    }

    output
}

const PAGE_WIDTH: f32 = 210.0;
const PAGE_HEIGHT: f32 = 297.0;
const TOP: f32 = 280.0;
const BOTTOM_MARGIN: f32 = 18.0;
const LEFT: f32 = 20.0;
const VALUE_COLUMN: f32 = 80.0;

/// Writes lines top to bottom, starting a new A4 page when the cursor
/// reaches the bottom margin.
struct PageCursor<'a> {
    doc: &'a PdfDocumentReference,
    layer: PdfLayerReference,
    y: f32,
    pages: usize,
}

impl<'a> PageCursor<'a> {
    fn new(doc: &'a PdfDocumentReference, layer: PdfLayerReference) -> Self {
        Self {
            doc,
            layer,
            y: TOP,
            pages: 1,
        }
    }

    fn ensure_room(&mut self, height: f32) {
        if self.y - height < BOTTOM_MARGIN {
            self.pages += 1;
            let (page, layer) = self.doc.add_page(
                Mm(PAGE_WIDTH),
                Mm(PAGE_HEIGHT),
                format!("Page {}", self.pages),
            );
            self.layer = self.doc.get_page(page).get_layer(layer);
            self.y = TOP;
        }
    }

    fn text(&mut self, text: &str, size: f32, x: f32, advance: f32, font: &IndirectFontRef) {
        self.ensure_room(advance);
        self.layer.use_text(latin1_lossy(text), size, Mm(x), Mm(self.y), font);
        self.y -= advance;
    }

    fn field(&mut self, label: &str, value: &str, font: &IndirectFontRef, bold: &IndirectFontRef) {
        let lines = wrap_text(value, 60);
        self.ensure_room(6.0 * lines.len() as f32);
        self.layer
            .use_text(latin1_lossy(&format!("{label}:")), 10.0, Mm(LEFT), Mm(self.y), bold);
        for line in lines {
            self.layer
                .use_text(latin1_lossy(&line), 10.0, Mm(VALUE_COLUMN), Mm(self.y), font);
            self.y -= 6.0;
        }
    }

    fn gap(&mut self, height: f32) {
        self.y -= height;
    }
}

/// Built-in Helvetica is single-byte (WinAnsi) encoded and cannot show text
/// outside Latin-1, so such characters are printed as `?`.
fn latin1_lossy(text: &str) -> String {
    text.chars()
        .map(|c| if u32::from(c) <= 0xFF { c } else { '?' })
        .collect()
}

/// Renders `doc` as A4 pages using the built-in Helvetica fonts. Characters
/// outside Latin-1 (for example CJK names) appear as `?`; the Markdown
/// renderer keeps them intact.
pub fn render_pdf(doc: &ReportDocument) -> Result<Vec<u8>, ReportError> {
    let (pdf, page1, layer1) =
        PdfDocument::new(doc.title.as_str(), Mm(PAGE_WIDTH), Mm(PAGE_HEIGHT), "Page 1");
    let font = pdf
        .add_builtin_font(BuiltinFont::Helvetica)
        .map_err(|e| ReportError::Pdf(format!("font error: {e}")))?;
    let bold = pdf
        .add_builtin_font(BuiltinFont::HelveticaBold)
        .map_err(|e| ReportError::Pdf(format!("font error: {e}")))?;
    let italic = pdf
        .add_builtin_font(BuiltinFont::HelveticaOblique)
        .map_err(|e| ReportError::Pdf(format!("font error: {e}")))?;

    let layer = pdf.get_page(page1).get_layer(layer1);
    let mut cursor = PageCursor::new(&pdf, layer);

    for (i, line) in doc.header.iter().enumerate() {
        let size = if i == 0 { 18.0 } else { 11.0 };
        cursor.text(line, size, LEFT, if i == 0 { 9.0 } else { 6.0 }, if i == 0 { &bold } else { &font });
    }
    cursor.gap(6.0);
    cursor.text(&doc.title, 16.0, LEFT, 10.0, &bold);

    for section in &doc.sections {
        cursor.gap(4.0);
        cursor.text(&section.heading, 12.0, LEFT, 8.0, &bold);
        let body = if section.heading == "MEDICAL DISCLAIMER" {
            &italic
        } else {
            &font
        };
        for line in &section.lines {
            match line {
                ReportLine::Field { label, value } => cursor.field(label, value, &font, &bold),
                ReportLine::Text(text) => {
                    for wrapped in wrap_text(text, 95) {
                        cursor.text(&wrapped, 9.0, LEFT, 5.0, body);
                    }
                }
            }
        }
    }

    let mut buf = BufWriter::new(Vec::new());
    pdf.save(&mut buf)
        .map_err(|e| ReportError::Pdf(format!("save error: {e}")))?;
    buf.into_inner()
        .map_err(|e| ReportError::Pdf(format!("buffer error: {e}")))
}

/// Greedy word wrap; a word longer than `max_chars` gets a line of its own.
fn wrap_text(text: &str, max_chars: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();

    for word in text.split_whitespace() {
        if !current.is_empty() && current.chars().count() + word.chars().count() + 1 > max_chars {
            lines.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() {
        lines.push(current);
    }
    if lines.is_empty() {
        lines.push(String::new());
    }
    lines
}

pub fn summarize_by_diagnosis(records: &[AnalysisRecord]) -> Vec<DiagnosisSummary> {
    let mut map: HashMap<String, (usize, u32)> = HashMap::new();

    for record in records {
        let entry = map.entry(record.diagnosis.clone()).or_insert((0, 0));
        entry.0 += 1;
        entry.1 += u32::from(record.severity);
    }

    let mut summaries: Vec<DiagnosisSummary> = map
        .into_iter()
        .map(|(diagnosis, (count, total_severity))| DiagnosisSummary {
            diagnosis,
            count,
            avg_severity: if count == 0 {
                0.0
            } else {
                f64::from(total_severity) / count as f64
            },
        })
        .collect();

    summaries.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.diagnosis.cmp(&b.diagnosis)));
    summaries
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaseCounts {
    pub total: usize,
    pub normal: usize,
    pub at_risk: usize,
}

pub fn count_cases(records: &[AnalysisRecord]) -> CaseCounts {
    CaseCounts {
        total: records.len(),
        normal: records
            .iter()
            .filter(|r| r.diagnosis == Diagnosis::Normal.label())
            .count(),
        at_risk: records.iter().filter(|r| r.diagnosis.contains("Risk")).count(),
    }
}

/// Markdown overview for the admin panel. `records` are expected newest first.
pub fn build_admin_summary(records: &[AnalysisRecord]) -> String {
    let summaries = summarize_by_diagnosis(records);
    let counts = count_cases(records);

    let mut output = String::new();

    let _ = writeln!(output, "# Sleep Screening Summary");
    let _ = writeln!(
        output,
        "{} analyses ({} normal, {} at risk)",
        counts.total, counts.normal, counts.at_risk
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Diagnosis Mix");

    if summaries.is_empty() {
        let _ = writeln!(output, "No analyses recorded yet.");
    } else {
        for summary in summaries.iter() {
            let _ = writeln!(
                output,
                "- {}: {} analyses (avg severity {:.1})",
                summary.diagnosis, summary.count, summary.avg_severity
            );
        }
    }

    let mut urgent: Vec<&AnalysisRecord> = records.iter().filter(|r| r.severity >= 2).collect();
    urgent.sort_by(|a, b| b.severity.cmp(&a.severity));
    let _ = writeln!(output);
    let _ = writeln!(output, "## Highest Severity Patients");

    if urgent.is_empty() {
        let _ = writeln!(output, "No patients need follow-up.");
    } else {
        for record in urgent.iter().take(10) {
            let _ = writeln!(
                output,
                "- [{}] {} ({}, phone {}): {}",
                risk::urgency(record.severity),
                record.user_email,
                record.created_at.format("%Y-%m-%d"),
                or_na(&record.survey.phone),
                record.diagnosis
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Recent Analyses");

    if records.is_empty() {
        let _ = writeln!(output, "No analyses recorded yet.");
    } else {
        for record in records.iter().take(5) {
            let _ = writeln!(
                output,
                "- {} on {}: {} (report {})",
                record.user_email,
                record.created_at.format("%Y-%m-%d %H:%M"),
                record.diagnosis,
                record.id
            );
        }
    }

    output
}
