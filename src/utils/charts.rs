//! SVG charts for training runs
//!
//! Hand-written SVG, so reports open in any browser without a plotting
//! dependency. Used for the learning curves and the test-split confusion
//! matrix written next to the checkpoint.

use std::path::Path;

use crate::utils::error::Result;
use crate::utils::metrics::ConfusionMatrix;

const PANEL_WIDTH: f64 = 520.0;
const PANEL_HEIGHT: f64 = 400.0;
const MARGIN_TOP: f64 = 60.0;
const MARGIN_RIGHT: f64 = 30.0;
const MARGIN_BOTTOM: f64 = 60.0;
const MARGIN_LEFT: f64 = 70.0;

pub const COLOR_PRIMARY: &str = "#3498db";
pub const COLOR_SECONDARY: &str = "#e67e22";
const COLOR_GRID: &str = "#ecf0f1";
const COLOR_AXIS: &str = "#2c3e50";
const COLOR_TEXT: &str = "#2c3e50";

/// Heat-map ramp end point (`COLOR_PRIMARY` as RGB)
const HEAT_RGB: (f64, f64, f64) = (52.0, 152.0, 219.0);

const FONT: &str = "Arial, sans-serif";

/// One line on a chart; `x` is typically the epoch
#[derive(Debug, Clone)]
pub struct DataSeries {
    pub name: String,
    pub points: Vec<(f64, f64)>,
    pub color: &'static str,
}

impl DataSeries {
    pub fn new(name: impl Into<String>, points: Vec<(f64, f64)>, color: &'static str) -> Self {
        Self {
            name: name.into(),
            points,
            color,
        }
    }
}

/// How a panel chooses its y range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum YScale {
    /// Fixed 0 to 100 with `%` tick labels
    Percent,
    /// 0 to a little above the largest value
    Auto,
}

/// A single line-chart panel
#[derive(Debug, Clone)]
pub struct Panel<'a> {
    pub title: &'a str,
    pub x_label: &'a str,
    pub y_label: &'a str,
    pub series: &'a [DataSeries],
    pub scale: YScale,
}

/// Line-chart panels laid out side by side in one SVG
pub fn line_panels(panels: &[Panel]) -> String {
    let width = PANEL_WIDTH * panels.len().max(1) as f64;
    let mut svg = svg_open(width, PANEL_HEIGHT);
    for (i, panel) in panels.iter().enumerate() {
        render_panel(&mut svg, i as f64 * PANEL_WIDTH, panel);
    }
    svg.push_str("</svg>");
    svg
}

fn render_panel(svg: &mut String, offset_x: f64, panel: &Panel) {
    let plot_width = PANEL_WIDTH - MARGIN_LEFT - MARGIN_RIGHT;
    let plot_height = PANEL_HEIGHT - MARGIN_TOP - MARGIN_BOTTOM;
    let left = offset_x + MARGIN_LEFT;
    let bottom = MARGIN_TOP + plot_height;

    let (x_min, x_max, y_max) = ranges(panel.series, panel.scale);
    let x_span = (x_max - x_min).max(1.0);
    let to_x = |x: f64| left + (x - x_min) / x_span * plot_width;
    let to_y = |y: f64| bottom - (y / y_max) * plot_height;

    svg.push_str(&format!(
        r#"<text x="{}" y="35" text-anchor="middle" font-family="{}" font-size="16" font-weight="bold" fill="{}">{}</text>"#,
        offset_x + PANEL_WIDTH / 2.0,
        FONT,
        COLOR_TEXT,
        escape_xml(panel.title)
    ));

    for i in 0..=5 {
        let value = i as f64 / 5.0 * y_max;
        let y = to_y(value);
        svg.push_str(&format!(
            r#"<line x1="{}" y1="{}" x2="{}" y2="{}" stroke="{}" stroke-width="1"/>"#,
            left,
            y,
            left + plot_width,
            y,
            COLOR_GRID
        ));
        let tick = match panel.scale {
            YScale::Percent => format!("{:.0}%", value),
            YScale::Auto => format!("{:.2}", value),
        };
        svg.push_str(&format!(
            r#"<text x="{}" y="{}" text-anchor="end" font-family="{}" font-size="11" fill="{}">{}</text>"#,
            left - 8.0,
            y + 4.0,
            FONT,
            COLOR_TEXT,
            tick
        ));
    }

    // axes
    svg.push_str(&format!(
        r#"<line x1="{}" y1="{}" x2="{}" y2="{}" stroke="{}" stroke-width="2"/>"#,
        left,
        bottom,
        left + plot_width,
        bottom,
        COLOR_AXIS
    ));
    svg.push_str(&format!(
        r#"<line x1="{}" y1="{}" x2="{}" y2="{}" stroke="{}" stroke-width="2"/>"#,
        left, MARGIN_TOP, left, bottom, COLOR_AXIS
    ));

    svg.push_str(&format!(
        r#"<text x="{}" y="{}" text-anchor="middle" font-family="{}" font-size="13" fill="{}">{}</text>"#,
        left + plot_width / 2.0,
        PANEL_HEIGHT - 15.0,
        FONT,
        COLOR_TEXT,
        escape_xml(panel.x_label)
    ));
    let label_x = offset_x + 18.0;
    svg.push_str(&format!(
        r#"<text x="{}" y="{}" text-anchor="middle" font-family="{}" font-size="13" fill="{}" transform="rotate(-90 {} {})">{}</text>"#,
        label_x,
        PANEL_HEIGHT / 2.0,
        FONT,
        COLOR_TEXT,
        label_x,
        PANEL_HEIGHT / 2.0,
        escape_xml(panel.y_label)
    ));

    for series in panel.series.iter().filter(|s| !s.points.is_empty()) {
        let path: Vec<String> = series
            .points
            .iter()
            .enumerate()
            .map(|(i, &(x, y))| {
                let cmd = if i == 0 { "M" } else { "L" };
                format!("{} {:.1} {:.1}", cmd, to_x(x), to_y(y))
            })
            .collect();
        svg.push_str(&format!(
            r#"<path d="{}" fill="none" stroke="{}" stroke-width="2.5"/>"#,
            path.join(" "),
            series.color
        ));
        for &(x, y) in &series.points {
            svg.push_str(&format!(
                r#"<circle cx="{:.1}" cy="{:.1}" r="3.5" fill="{}" stroke="white" stroke-width="1.5"/>"#,
                to_x(x),
                to_y(y),
                series.color
            ));
        }
    }

    // x ticks from the first series only
    if let Some(series) = panel.series.first() {
        let every = (series.points.len() / 10).max(1);
        for &(x, _) in series.points.iter().step_by(every) {
            svg.push_str(&format!(
                r#"<text x="{:.1}" y="{}" text-anchor="middle" font-family="{}" font-size="11" fill="{}">{:.0}</text>"#,
                to_x(x),
                bottom + 18.0,
                FONT,
                COLOR_TEXT,
                x
            ));
        }
    }

    let mut legend_y = MARGIN_TOP + 8.0;
    for series in panel.series {
        let legend_x = offset_x + PANEL_WIDTH - MARGIN_RIGHT - 130.0;
        svg.push_str(&format!(
            r#"<rect x="{}" y="{}" width="14" height="14" fill="{}"/>"#,
            legend_x, legend_y, series.color
        ));
        svg.push_str(&format!(
            r#"<text x="{}" y="{}" font-family="{}" font-size="12" fill="{}">{}</text>"#,
            legend_x + 20.0,
            legend_y + 11.0,
            FONT,
            COLOR_TEXT,
            escape_xml(&series.name)
        ));
        legend_y += 22.0;
    }
}

/// (x_min, x_max, y_max) over all points; y always starts at 0
fn ranges(series: &[DataSeries], scale: YScale) -> (f64, f64, f64) {
    let points = series.iter().flat_map(|s| s.points.iter());
    let (x_min, x_max, y_max) = points.fold(
        (f64::INFINITY, f64::NEG_INFINITY, 0.0_f64),
        |(lo, hi, top), &(x, y)| (lo.min(x), hi.max(x), top.max(y)),
    );
    let (x_min, x_max) = if x_min.is_finite() { (x_min, x_max) } else { (0.0, 1.0) };

    let y_max = match scale {
        YScale::Percent => 100.0_f64.max(y_max),
        YScale::Auto if y_max > 0.0 && y_max.is_finite() => y_max * 1.1,
        YScale::Auto => 1.0,
    };
    (x_min, x_max, y_max)
}

/// Confusion matrix heat map; rows are true classes, columns predictions
///
/// Cell shading is the row-normalized rate, so rare classes stay readable.
pub fn confusion_matrix_chart(cm: &ConfusionMatrix, class_names: &[String]) -> String {
    let n = cm.num_classes.max(1);
    let cell = (760.0 / n as f64).clamp(12.0, 48.0);
    let label_width = 230.0;
    let label_height = 190.0;
    let width = label_width + n as f64 * cell + 40.0;
    let height = label_height + n as f64 * cell + 40.0;
    let font_size = (cell * 0.35).clamp(7.0, 13.0);

    let mut svg = svg_open(width, height);
    svg.push_str(&format!(
        r#"<text x="{}" y="30" text-anchor="middle" font-family="{}" font-size="18" font-weight="bold" fill="{}">Confusion Matrix</text>"#,
        width / 2.0,
        FONT,
        COLOR_TEXT
    ));

    for actual in 0..cm.num_classes {
        let row_total: usize = (0..cm.num_classes).map(|p| cm.get(actual, p)).sum();
        let y = label_height + actual as f64 * cell;

        for predicted in 0..cm.num_classes {
            let count = cm.get(actual, predicted);
            let rate = if row_total > 0 {
                count as f64 / row_total as f64
            } else {
                0.0
            };
            let x = label_width + predicted as f64 * cell;
            svg.push_str(&format!(
                r#"<rect class="cell" x="{}" y="{}" width="{}" height="{}" fill="{}" stroke="white" stroke-width="1"/>"#,
                x,
                y,
                cell,
                cell,
                heat_color(rate)
            ));
            if count > 0 && cell >= 18.0 {
                let fill = if rate > 0.5 { "white" } else { COLOR_TEXT };
                svg.push_str(&format!(
                    r#"<text x="{}" y="{}" text-anchor="middle" font-family="{}" font-size="{}" fill="{}">{}</text>"#,
                    x + cell / 2.0,
                    y + cell / 2.0 + font_size / 3.0,
                    FONT,
                    font_size,
                    fill,
                    count
                ));
            }
        }

        let label = display_label(class_names, actual);
        svg.push_str(&format!(
            r#"<text x="{}" y="{}" text-anchor="end" font-family="{}" font-size="{}" fill="{}">{}</text>"#,
            label_width - 8.0,
            y + cell / 2.0 + font_size / 3.0,
            FONT,
            font_size,
            COLOR_TEXT,
            escape_xml(&label)
        ));

        let col_x = label_width + actual as f64 * cell + cell / 2.0;
        svg.push_str(&format!(
            r#"<text x="{}" y="{}" text-anchor="start" font-family="{}" font-size="{}" fill="{}" transform="rotate(-60 {} {})">{}</text>"#,
            col_x,
            label_height - 8.0,
            FONT,
            font_size,
            COLOR_TEXT,
            col_x,
            label_height - 8.0,
            escape_xml(&label)
        ));
    }

    svg.push_str(&format!(
        r#"<text x="{}" y="{}" text-anchor="middle" font-family="{}" font-size="13" fill="{}">Predicted</text>"#,
        label_width + n as f64 * cell / 2.0,
        height - 12.0,
        FONT,
        COLOR_TEXT
    ));
    svg.push_str(&format!(
        r#"<text x="16" y="{}" text-anchor="middle" font-family="{}" font-size="13" fill="{}" transform="rotate(-90 16 {})">True</text>"#,
        label_height + n as f64 * cell / 2.0,
        FONT,
        COLOR_TEXT,
        label_height + n as f64 * cell / 2.0
    ));

    svg.push_str("</svg>");
    svg
}

pub fn write_svg(path: &Path, svg: &str) -> Result<()> {
    std::fs::write(path, svg)?;
    Ok(())
}

fn svg_open(width: f64, height: f64) -> String {
    format!(
        r#"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 {w} {h}" width="{w}" height="{h}"><rect width="{w}" height="{h}" fill="white"/>"#,
        w = width,
        h = height
    )
}

/// White to `COLOR_PRIMARY` by `rate` in [0, 1]
fn heat_color(rate: f64) -> String {
    let t = rate.clamp(0.0, 1.0);
    let mix = |c: f64| (255.0 + (c - 255.0) * t).round() as u8;
    format!("rgb({},{},{})", mix(HEAT_RGB.0), mix(HEAT_RGB.1), mix(HEAT_RGB.2))
}

/// `Tomato___Late_blight` reads as `Tomato: Late blight`
fn display_label(class_names: &[String], idx: usize) -> String {
    match class_names.get(idx) {
        Some(name) => name.replace("___", ": ").replace('_', " "),
        None => format!("class {}", idx),
    }
}

fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn accuracy_series() -> Vec<DataSeries> {
        vec![
            DataSeries::new("Train", vec![(1.0, 52.0), (2.0, 71.5), (3.0, 84.0)], COLOR_PRIMARY),
            DataSeries::new("Validation", vec![(1.0, 48.0), (2.0, 66.0), (3.0, 79.0)], COLOR_SECONDARY),
        ]
    }

    #[test]
    fn test_two_panel_chart() {
        let accuracy = accuracy_series();
        let loss = vec![DataSeries::new("Train", vec![(1.0, 2.1), (2.0, 1.2), (3.0, 0.7)], COLOR_PRIMARY)];
        let svg = line_panels(&[
            Panel {
                title: "Accuracy",
                x_label: "Epoch",
                y_label: "Accuracy (%)",
                series: &accuracy,
                scale: YScale::Percent,
            },
            Panel {
                title: "Loss",
                x_label: "Epoch",
                y_label: "Loss",
                series: &loss,
                scale: YScale::Auto,
            },
        ]);

        assert!(svg.starts_with("<svg"));
        assert!(svg.ends_with("</svg>"));
        assert_eq!(svg.matches("<path").count(), 3);
        assert!(svg.contains("Validation"));
        assert!(svg.contains(&format!("width=\"{}\"", PANEL_WIDTH * 2.0)));
        assert!(!svg.contains("NaN"));
    }

    #[test]
    fn test_single_epoch_has_finite_coordinates() {
        let series = vec![DataSeries::new("Train", vec![(1.0, 0.0)], COLOR_PRIMARY)];
        let svg = line_panels(&[Panel {
            title: "Loss",
            x_label: "Epoch",
            y_label: "Loss",
            series: &series,
            scale: YScale::Auto,
        }]);
        assert!(!svg.contains("NaN"));
        assert!(!svg.contains("inf"));
    }

    #[test]
    fn test_confusion_matrix_chart() {
        let cm = ConfusionMatrix::from_predictions(&[0, 0, 1, 1, 1], &[0, 1, 1, 1, 0], 2);
        let names = vec!["Tomato___Late_blight".to_string(), "Tomato___healthy".to_string()];
        let svg = confusion_matrix_chart(&cm, &names);

        assert_eq!(svg.matches(r#"class="cell""#).count(), 4);
        assert!(svg.contains("Tomato: Late blight"));
        // diagonal of row 1 is 2 of 3
        assert!(svg.contains(">2</text>"));
        assert!(!svg.contains("NaN"));
    }

    #[test]
    fn test_heat_color_ramp() {
        assert_eq!(heat_color(0.0), "rgb(255,255,255)");
        assert_eq!(heat_color(1.0), "rgb(52,152,219)");
        assert_eq!(heat_color(3.0), heat_color(1.0));
    }

    #[test]
    fn test_labels_are_escaped() {
        let names = vec!["Leaf <&> spot".to_string()];
        let svg = confusion_matrix_chart(&ConfusionMatrix::new(1), &names);
        assert!(svg.contains("Leaf &lt;&amp;&gt; spot"));
        assert_eq!(display_label(&names, 5), "class 5");
    }
}
