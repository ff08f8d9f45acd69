use std::collections::BTreeMap;
use std::path::Path;
use std::sync::OnceLock;

use plotters::coord::Shift;
use plotters::prelude::*;
use tracing::warn;
use visitlog_shared::api::PlaceVisitsDto;
use visitlog_shared::domain::{ChartKind, MONTH_LABELS, WEEKDAY_LABELS};

use super::ReportError;

/// Named series in display order.
pub type Series = Vec<(String, Vec<f64>)>;

static FONT_READY: OnceLock<bool> = OnceLock::new();

/// Registers the font at `path` as the "sans-serif" family used for captions,
/// ticks and legends. Without a registered font charts are drawn unlabelled.
pub fn install_font(path: &Path) -> Result<(), ReportError> {
    let bytes = std::fs::read(path)?;
    let bytes: &'static [u8] = Box::leak(bytes.into_boxed_slice());
    plotters::style::register_font("sans-serif", FontStyle::Normal, bytes)
        .map_err(|_| ReportError::Chart(format!("{} is not a usable font", path.display())))?;
    let _ = FONT_READY.set(true);
    Ok(())
}

fn fonts_available() -> bool {
    FONT_READY.get().copied().unwrap_or(false)
}

/// Parses a `{"Course": [n, ...]}` object whose arrays hold exactly `slots` values.
/// `null` entries count as zero.
pub fn parse_series(json: &str, slots: usize) -> Result<Series, ReportError> {
    let raw: BTreeMap<String, Vec<Option<f64>>> = serde_json::from_str(json)?;
    raw.into_iter()
        .map(|(name, values)| {
            if values.len() != slots {
                return Err(ReportError::InvalidData(format!(
                    "'{name}' has {} values, expected {slots}",
                    values.len()
                )));
            }
            Ok((name, values.into_iter().map(|v| v.unwrap_or(0.0)).collect()))
        })
        .collect()
}

pub fn parse_places(json: &str) -> Result<Vec<PlaceVisitsDto>, ReportError> {
    Ok(serde_json::from_str(json)?)
}

/// File name prefix for a downloaded chart.
pub fn file_stem(kind: ChartKind) -> &'static str {
    match kind {
        ChartKind::Weekly => "visitor_statistics",
        ChartKind::Monthly => "monthly_comparison",
        ChartKind::Summary => "dashboard_summary",
    }
}

/// Line chart of per-course visits by day of week.
pub fn weekly_png(series: &Series, title: &str) -> Result<Vec<u8>, ReportError> {
    render_png(1200, 720, |root, labelled| {
        draw_lines(root, series, &WEEKDAY_LABELS, title, "Day of the Week", labelled)
    })
}

/// Grouped bar chart of per-course visits by month.
pub fn monthly_png(series: &Series, title: &str) -> Result<Vec<u8>, ReportError> {
    render_png(1440, 840, |root, labelled| {
        draw_bars(root, series, &MONTH_LABELS, title, "Month", labelled)
    })
}

/// Weekly lines across the top, monthly trends and top places underneath.
pub fn summary_png(
    weekly: &Series,
    monthly: &Series,
    places: &[PlaceVisitsDto],
) -> Result<Vec<u8>, ReportError> {
    render_png(1920, 1200, |root, labelled| {
        root.fill(&WHITE).map_err(chart_err)?;
        let body = if labelled {
            root.titled("Library Attendance Dashboard", ("sans-serif", 34))
                .map_err(chart_err)?
        } else {
            root.clone()
        };
        let (_, h) = body.dim_in_pixel();
        let (top, bottom) = body.split_vertically((h / 2) as i32);
        let (w, _) = bottom.dim_in_pixel();
        let (left, right) = bottom.split_horizontally((w / 2) as i32);
        draw_lines(&top, weekly, &WEEKDAY_LABELS, "Weekly Course Visits", "Day of Week", labelled)?;
        draw_lines(&left, monthly, &MONTH_LABELS, "Monthly Trends", "Month", labelled)?;
        draw_places(&right, places, labelled)
    })
}

type Area<'a> = DrawingArea<BitMapBackend<'a>, Shift>;

/// Draws into an RGB buffer and encodes it as PNG. When a labelled draw fails
/// (usually a font problem) the chart is redrawn without text.
fn render_png<F>(width: u32, height: u32, draw: F) -> Result<Vec<u8>, ReportError>
where
    F: for<'a, 'b> Fn(&'a Area<'b>, bool) -> Result<(), ReportError>,
{
    let mut pixels = vec![0u8; width as usize * height as usize * 3];
    let labelled = fonts_available();
    let first = {
        let root = BitMapBackend::with_buffer(&mut pixels, (width, height)).into_drawing_area();
        draw(&root, labelled).and_then(|_| root.present().map_err(chart_err))
    };
    if let Err(e) = first {
        if !labelled {
            return Err(e);
        }
        warn!(error = %e, "chart: labelled render failed, retrying without text");
        pixels.fill(0);
        let root = BitMapBackend::with_buffer(&mut pixels, (width, height)).into_drawing_area();
        draw(&root, false)?;
        root.present().map_err(chart_err)?;
    }
    encode_png(&pixels, width, height)
}

fn encode_png(pixels: &[u8], width: u32, height: u32) -> Result<Vec<u8>, ReportError> {
    let mut out = Vec::new();
    {
        let mut encoder = png::Encoder::new(&mut out, width, height);
        encoder.set_color(png::ColorType::Rgb);
        encoder.set_depth(png::BitDepth::Eight);
        let mut writer = encoder.write_header().map_err(chart_err)?;
        writer.write_image_data(pixels).map_err(chart_err)?;
        writer.finish().map_err(chart_err)?;
    }
    Ok(out)
}

fn chart_err<E: std::fmt::Display>(e: E) -> ReportError {
    ReportError::Chart(e.to_string())
}

fn y_ceiling(series: &Series) -> f64 {
    let top = series
        .iter()
        .flat_map(|(_, v)| v.iter().copied())
        .fold(0.0_f64, f64::max);
    (top * 1.15).max(1.0)
}

/// Category label for an integral x position, blank between categories.
fn category_label(labels: &[&str], x: f64) -> String {
    let idx = x.round();
    if (x - idx).abs() > 1e-6 || idx < 0.0 {
        return String::new();
    }
    labels.get(idx as usize).map(|s| s.to_string()).unwrap_or_default()
}

fn draw_lines(
    area: &Area<'_>,
    series: &Series,
    labels: &[&str],
    title: &str,
    x_desc: &str,
    labelled: bool,
) -> Result<(), ReportError> {
    area.fill(&WHITE).map_err(chart_err)?;
    let mut builder = ChartBuilder::on(area);
    builder.margin(20);
    if labelled {
        builder
            .caption(title, ("sans-serif", 26))
            .x_label_area_size(45)
            .y_label_area_size(60);
    }
    let x_range = -0.5_f64..(labels.len() as f64 - 0.5);
    let mut chart = builder
        .build_cartesian_2d(x_range, 0.0_f64..y_ceiling(series))
        .map_err(chart_err)?;

    let fmt_x = |x: &f64| category_label(labels, *x);
    if labelled {
        chart
            .configure_mesh()
            .x_labels(labels.len())
            .x_label_formatter(&fmt_x)
            .x_desc(x_desc)
            .y_desc("Number of Visitors")
            .draw()
            .map_err(chart_err)?;
    }

    for (idx, (name, values)) in series.iter().enumerate() {
        let color = Palette99::pick(idx).to_rgba();
        let points: Vec<(f64, f64)> = values
            .iter()
            .enumerate()
            .map(|(i, v)| (i as f64, *v))
            .collect();
        let anno = chart
            .draw_series(LineSeries::new(points.clone(), color.stroke_width(3)))
            .map_err(chart_err)?;
        if labelled {
            anno.label(name.as_str()).legend(move |(x, y)| {
                PathElement::new(vec![(x, y), (x + 20, y)], color.stroke_width(3))
            });
        }
        chart
            .draw_series(points.into_iter().map(|p| Circle::new(p, 5, color.filled())))
            .map_err(chart_err)?;
    }

    if labelled && !series.is_empty() {
        chart
            .configure_series_labels()
            .position(SeriesLabelPosition::UpperRight)
            .background_style(WHITE.mix(0.85))
            .border_style(BLACK)
            .draw()
            .map_err(chart_err)?;
    }
    Ok(())
}

fn draw_bars(
    area: &Area<'_>,
    series: &Series,
    labels: &[&str],
    title: &str,
    x_desc: &str,
    labelled: bool,
) -> Result<(), ReportError> {
    area.fill(&WHITE).map_err(chart_err)?;
    let mut builder = ChartBuilder::on(area);
    builder.margin(20);
    if labelled {
        builder
            .caption(title, ("sans-serif", 28))
            .x_label_area_size(45)
            .y_label_area_size(60);
    }
    let x_range = -0.5_f64..(labels.len() as f64 - 0.5);
    let mut chart = builder
        .build_cartesian_2d(x_range, 0.0_f64..y_ceiling(series))
        .map_err(chart_err)?;

    let fmt_x = |x: &f64| category_label(labels, *x);
    if labelled {
        chart
            .configure_mesh()
            .disable_x_mesh()
            .x_labels(labels.len())
            .x_label_formatter(&fmt_x)
            .x_desc(x_desc)
            .y_desc("Number of Visitors")
            .draw()
            .map_err(chart_err)?;
    }

    let group_width = 0.8;
    let bar_width = group_width / series.len().max(1) as f64;
    for (idx, (name, values)) in series.iter().enumerate() {
        let color = Palette99::pick(idx).to_rgba();
        let offset = -group_width / 2.0 + idx as f64 * bar_width;
        let anno = chart
            .draw_series(values.iter().enumerate().map(|(i, v)| {
                let x0 = i as f64 + offset;
                Rectangle::new([(x0, 0.0), (x0 + bar_width, *v)], color.filled())
            }))
            .map_err(chart_err)?;
        if labelled {
            anno.label(name.as_str()).legend(move |(x, y)| {
                Rectangle::new([(x, y - 6), (x + 12, y + 6)], color.filled())
            });
        }
    }

    if labelled && !series.is_empty() {
        chart
            .configure_series_labels()
            .position(SeriesLabelPosition::UpperRight)
            .background_style(WHITE.mix(0.85))
            .border_style(BLACK)
            .draw()
            .map_err(chart_err)?;
    }
    Ok(())
}

/// Horizontal bars, busiest place on top.
fn draw_places(area: &Area<'_>, places: &[PlaceVisitsDto], labelled: bool) -> Result<(), ReportError> {
    area.fill(&WHITE).map_err(chart_err)?;
    if places.is_empty() {
        if labelled {
            let (w, h) = area.dim_in_pixel();
            let style: TextStyle = ("sans-serif", 22).into();
            area.draw_text(
                "No place data available",
                &style,
                (w as i32 / 2 - 120, h as i32 / 2),
            )
            .map_err(chart_err)?;
        }
        return Ok(());
    }

    let rows = places.len() as f64;
    let x_max = places
        .iter()
        .map(|p| p.visits as f64)
        .fold(0.0_f64, f64::max)
        .max(1.0)
        * 1.2;
    let mut builder = ChartBuilder::on(area);
    builder.margin(20);
    if labelled {
        builder
            .caption("Top Places of Residence", ("sans-serif", 26))
            .x_label_area_size(45)
            .y_label_area_size(10);
    }
    let mut chart = builder
        .build_cartesian_2d(0.0_f64..x_max, 0.0_f64..rows)
        .map_err(chart_err)?;
    if labelled {
        chart
            .configure_mesh()
            .disable_y_mesh()
            .y_labels(0)
            .x_desc("Number of Visits")
            .draw()
            .map_err(chart_err)?;
    }

    let band = |i: usize| rows - 1.0 - i as f64;
    chart
        .draw_series(places.iter().enumerate().map(|(i, p)| {
            let y0 = band(i);
            Rectangle::new(
                [(0.0, y0 + 0.15), (p.visits as f64, y0 + 0.85)],
                Palette99::pick(i).filled(),
            )
        }))
        .map_err(chart_err)?;
    if labelled {
        chart
            .draw_series(places.iter().enumerate().map(|(i, p)| {
                Text::new(
                    format!("{} ({})", p.municipality, p.visits),
                    (x_max * 0.01, band(i) + 0.7),
                    ("sans-serif", 16),
                )
            }))
            .map_err(chart_err)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_MAGIC: &[u8] = b"\x89PNG\r\n\x1a\n";

    #[test]
    fn malformed_json_is_a_client_error() {
        let err = parse_series("{not json", 7).unwrap_err();
        assert!(matches!(err, ReportError::InvalidJson(_)));
        assert!(err.is_client_error());
        assert!(err.to_string().starts_with("Invalid JSON data:"));
    }

    #[test]
    fn series_must_have_one_value_per_slot() {
        let err = parse_series(r#"{"IT": [1, 2, 3]}"#, 7).unwrap_err();
        assert!(matches!(err, ReportError::InvalidData(_)));

        let ok = parse_series(r#"{"IT": [1, 0, 2, null, 0, 0, 4]}"#, 7).unwrap();
        assert_eq!(ok[0].1, vec![1.0, 0.0, 2.0, 0.0, 0.0, 0.0, 4.0]);
    }

    #[test]
    fn category_labels_only_on_integral_ticks() {
        assert_eq!(category_label(&WEEKDAY_LABELS, 0.0), "Sun");
        assert_eq!(category_label(&WEEKDAY_LABELS, 6.0), "Sat");
        assert_eq!(category_label(&WEEKDAY_LABELS, 2.5), "");
        assert_eq!(category_label(&WEEKDAY_LABELS, 7.0), "");
    }

    #[test]
    fn charts_render_to_png() {
        let weekly = parse_series(r#"{"IT": [0, 3, 1, 4, 0, 2, 0], "MB": [1, 1, 1, 1, 1, 1, 1]}"#, 7)
            .unwrap();
        let monthly = parse_series(r#"{"IT": [5, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 9]}"#, 12).unwrap();
        let places = vec![PlaceVisitsDto {
            municipality: "Malolos".into(),
            visits: 7,
        }];
        for bytes in [
            weekly_png(&weekly, "Weekly Course Visits").unwrap(),
            monthly_png(&monthly, "Monthly Visitor Comparison").unwrap(),
            summary_png(&weekly, &monthly, &places).unwrap(),
            summary_png(&Vec::new(), &Vec::new(), &[]).unwrap(),
        ] {
            assert!(bytes.starts_with(PNG_MAGIC));
        }
    }
}
