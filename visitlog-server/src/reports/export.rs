use std::collections::HashSet;

use chrono::NaiveDateTime;
use printpdf::{BuiltinFont, IndirectFontRef, Mm, PdfDocument, PdfLayerReference};

use super::{ReportError, TIMESTAMP_FORMAT};
use crate::storage::models::VisitRow;

pub const CSV_HEADER: [&str; 5] = ["ID", "First Name", "Last Name", "Course", "Check-in Time"];

/// One exported attendance line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportRow {
    pub student_id: String,
    pub first_name: String,
    pub last_name: String,
    pub course_name: String,
    pub check_in_time: NaiveDateTime,
}

/// Keeps rows whose student has a course, oldest first. With `unique_per_day`
/// only the first check-in per student and calendar day survives.
pub fn export_rows(rows: Vec<VisitRow>, unique_per_day: bool) -> Vec<ExportRow> {
    let mut seen = HashSet::new();
    rows.into_iter()
        .filter_map(|r| {
            let course_name = r.course_name?;
            Some(ExportRow {
                student_id: r.student_id,
                first_name: r.first_name,
                last_name: r.last_name,
                course_name,
                check_in_time: r.check_in_time,
            })
        })
        .filter(|r| {
            !unique_per_day || seen.insert((r.student_id.clone(), r.check_in_time.date()))
        })
        .collect()
}

pub fn attendance_csv(rows: &[ExportRow]) -> Result<Vec<u8>, ReportError> {
    let mut wtr = csv::Writer::from_writer(Vec::new());
    wtr.write_record(CSV_HEADER)?;
    for r in rows {
        let at = r.check_in_time.format(TIMESTAMP_FORMAT).to_string();
        wtr.write_record([
            r.student_id.as_str(),
            r.first_name.as_str(),
            r.last_name.as_str(),
            r.course_name.as_str(),
            at.as_str(),
        ])?;
    }
    wtr.into_inner()
        .map_err(|e| ReportError::Io(std::io::Error::other(e.to_string())))
}

const PAGE_W: f32 = 210.0;
const PAGE_H: f32 = 297.0;
const MARGIN: f32 = 15.0;
const ROW_H: f32 = 7.0;
const BODY_PT: f32 = 9.0;
/// Column x offsets (mm) and the character budget of each column.
const COLUMNS: [(f32, usize); 5] = [(15.0, 16), (47.0, 18), (82.0, 18), (117.0, 24), (160.0, 19)];

struct PdfTable<'a> {
    doc: &'a printpdf::PdfDocumentReference,
    layer: PdfLayerReference,
    regular: IndirectFontRef,
    bold: IndirectFontRef,
    y: f32,
    page_no: usize,
}

impl PdfTable<'_> {
    fn header(&mut self) {
        for ((x, width), label) in COLUMNS.iter().zip(CSV_HEADER) {
            self.layer
                .use_text(clip(label, *width), BODY_PT, Mm(*x), Mm(self.y), &self.bold);
        }
        self.y -= ROW_H;
    }

    fn row(&mut self, cells: [&str; 5]) {
        if self.y < MARGIN + ROW_H {
            self.new_page();
        }
        for ((x, width), cell) in COLUMNS.iter().zip(cells) {
            self.layer
                .use_text(clip(cell, *width), BODY_PT, Mm(*x), Mm(self.y), &self.regular);
        }
        self.y -= ROW_H;
    }

    fn new_page(&mut self) {
        let (page, layer) = self
            .doc
            .add_page(Mm(PAGE_W), Mm(PAGE_H), format!("Page {}", self.page_no + 1));
        self.page_no += 1;
        self.layer = self.doc.get_page(page).get_layer(layer);
        self.y = PAGE_H - MARGIN;
        self.header();
    }
}

fn pdf_err<E: std::fmt::Display>(e: E) -> ReportError {
    ReportError::Pdf(e.to_string())
}

/// Code points the built-in fonts' WinAnsi table adds above Latin-1's C1 range.
const WIN_ANSI_EXTRAS: &str = "\u{20ac}\u{201a}\u{0192}\u{201e}\u{2026}\u{2020}\u{2021}\u{02c6}\u{2030}\u{0160}\u{2039}\u{0152}\u{017d}\u{2018}\u{2019}\u{201c}\u{201d}\u{2022}\u{2013}\u{2014}\u{02dc}\u{2122}\u{0161}\u{203a}\u{0153}\u{017e}\u{0178}";

/// Built-in Helvetica drops anything it cannot encode, so those become `?`.
fn win_ansi(c: char) -> char {
    match c {
        ' '..='~' | '\u{a0}'..='\u{ff}' => c,
        _ if WIN_ANSI_EXTRAS.contains(c) => c,
        _ => '?',
    }
}

fn clip(s: &str, max_chars: usize) -> String {
    let text = s.chars().map(win_ansi);
    if s.chars().count() <= max_chars {
        text.collect()
    } else {
        let mut out: String = text.take(max_chars.saturating_sub(1)).collect();
        out.push('~');
        out
    }
}

/// Renders `rows` as a paginated A4 table with a title block.
pub fn attendance_pdf(
    rows: &[ExportRow],
    window_label: &str,
    generated_at: NaiveDateTime,
) -> Result<Vec<u8>, ReportError> {
    let (doc, page, layer) =
        PdfDocument::new("Attendance Report", Mm(PAGE_W), Mm(PAGE_H), "Page 1");
    let regular = doc.add_builtin_font(BuiltinFont::Helvetica).map_err(pdf_err)?;
    let bold = doc
        .add_builtin_font(BuiltinFont::HelveticaBold)
        .map_err(pdf_err)?;

    let first = doc.get_page(page).get_layer(layer);
    let top = PAGE_H - MARGIN;
    first.use_text("Library Attendance Report", 16.0, Mm(MARGIN), Mm(top), &bold);
    first.use_text(
        format!("Generated: {}", generated_at.format(TIMESTAMP_FORMAT)),
        BODY_PT,
        Mm(MARGIN),
        Mm(top - 8.0),
        &regular,
    );
    first.use_text(window_label, BODY_PT, Mm(MARGIN), Mm(top - 13.0), &regular);
    first.use_text(
        format!("Total records: {}", rows.len()),
        BODY_PT,
        Mm(MARGIN),
        Mm(top - 18.0),
        &regular,
    );

    let mut table = PdfTable {
        doc: &doc,
        layer: first,
        regular,
        bold,
        y: top - 28.0,
        page_no: 1,
    };
    table.header();
    if rows.is_empty() {
        table.row(["No attendance records in this period.", "", "", "", ""]);
    }
    for r in rows {
        let at = r.check_in_time.format(TIMESTAMP_FORMAT).to_string();
        table.row([
            r.student_id.as_str(),
            r.first_name.as_str(),
            r.last_name.as_str(),
            r.course_name.as_str(),
            at.as_str(),
        ]);
    }

    doc.save_to_bytes().map_err(pdf_err)
}
