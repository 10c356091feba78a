use std::panic;
use std::path::Path;

use anyhow::Result;
use liftcmp::compare::X_LABEL;
use liftcmp::{ComparisonFigure, LegendEntry, LineStyle, Subplot};
use plotters::coord::Shift;
use plotters::prelude::*;
use plotters::series::DashedLineSeries;
use plotters::style::text_anchor::{HPos, Pos, VPos};
use plotters::style::{FontDesc, FontFamily, FontStyle};

use crate::backend::TextTolerantBackend;

const CELL_WIDTH: u32 = 500;
const CELL_HEIGHT: u32 = 400;
const TITLE_HEIGHT: u32 = 60;
const SUBPLOT_TITLE_HEIGHT: u32 = 44;

/// matplotlib's tab10.
const PALETTE: [RGBColor; 10] = [
    RGBColor(31, 119, 180),
    RGBColor(255, 127, 14),
    RGBColor(44, 160, 44),
    RGBColor(214, 39, 40),
    RGBColor(148, 103, 189),
    RGBColor(140, 86, 75),
    RGBColor(227, 119, 194),
    RGBColor(127, 127, 127),
    RGBColor(188, 189, 34),
    RGBColor(23, 190, 207),
];

#[derive(Clone, Copy, Debug)]
pub enum ChartKind {
    Png,
    Svg,
}

impl ChartKind {
    pub fn extension(self) -> &'static str {
        match self {
            ChartKind::Png => "png",
            ChartKind::Svg => "svg",
        }
    }
}

pub fn palette_color(index: usize) -> RGBColor {
    PALETTE[index % PALETTE.len()]
}

pub fn figure_size(figure: &ComparisonFigure) -> (u32, u32) {
    (
        CELL_WIDTH * figure.layout.ncols as u32,
        CELL_HEIGHT * figure.layout.nrows as u32 + TITLE_HEIGHT,
    )
}

/// Render `figure` to `path`, turning backend panics into errors.
pub fn render_figure_guard(
    figure: &ComparisonFigure,
    path: &Path,
    kind: ChartKind,
) -> Result<(), String> {
    let render = || -> Result<(), String> {
        render_figure(figure, path, kind).map_err(|e| format!("plotting error: {}", e))
    };

    panic::catch_unwind(panic::AssertUnwindSafe(render))
        .map_err(|_| "plotting backend panicked".to_string())?
}

fn render_figure(figure: &ComparisonFigure, path: &Path, kind: ChartKind) -> Result<()> {
    let size = figure_size(figure);
    match kind {
        ChartKind::Png => {
            let backend = BitMapBackend::new(path, size);
            let root = TextTolerantBackend::new(backend).into_drawing_area();
            draw_figure(root, figure)?;
        }
        ChartKind::Svg => {
            let backend = SVGBackend::new(path, size);
            let root = TextTolerantBackend::new(backend).into_drawing_area();
            draw_figure(root, figure)?;
        }
    }
    Ok(())
}

fn draw_figure<DB>(root: DrawingArea<DB, Shift>, figure: &ComparisonFigure) -> Result<()>
where
    DB: DrawingBackend,
    DB::ErrorType: 'static,
{
    root.fill(&WHITE)?;
    let title_font = FontDesc::new(FontFamily::SansSerif, 28.0, FontStyle::Bold);
    let body = root.titled(&figure.title, title_font)?;
    let cells = body.split_evenly((figure.layout.nrows, figure.layout.ncols));

    for subplot in &figure.subplots {
        let idx = subplot.row * figure.layout.ncols + subplot.col;
        if let Some(cell) = cells.get(idx) {
            draw_subplot(cell, subplot)?;
        }
    }

    let (row, col) = figure.layout.legend_cell;
    if let Some(cell) = cells.get(row * figure.layout.ncols + col) {
        draw_legend(cell, &figure.legend)?;
    }

    root.present()?;
    Ok(())
}

fn y_range(subplot: &Subplot) -> (f64, f64) {
    let (lo, hi) = subplot
        .lines
        .iter()
        .flat_map(|l| l.y.iter().copied())
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)));
    if !lo.is_finite() || !hi.is_finite() {
        return (0.0, 1.0);
    }
    if (hi - lo).abs() < f64::EPSILON {
        return (lo - 1.0, hi + 1.0);
    }
    let pad = (hi - lo) * 0.05;
    (lo - pad, hi + pad)
}

fn draw_subplot<DB>(cell: &DrawingArea<DB, Shift>, subplot: &Subplot) -> Result<()>
where
    DB: DrawingBackend,
    DB::ErrorType: 'static,
{
    let (title_area, plot_area) = cell.split_vertically(SUBPLOT_TITLE_HEIGHT);
    let title_style = TextStyle::from(FontDesc::new(FontFamily::SansSerif, 16.0, FontStyle::Normal))
        .pos(Pos::new(HPos::Center, VPos::Top));
    let center_x = title_area.dim_in_pixel().0 as i32 / 2;
    for (line_no, line) in subplot.title.lines().enumerate() {
        title_area.draw(&Text::new(
            line.to_string(),
            (center_x, 4 + line_no as i32 * 18),
            title_style.clone(),
        ))?;
    }

    let (y_min, y_max) = y_range(subplot);
    let mut chart = ChartBuilder::on(&plot_area)
        .margin(10)
        .set_label_area_size(LabelAreaPosition::Left, 55)
        .set_label_area_size(LabelAreaPosition::Bottom, 40)
        .build_cartesian_2d(0.0..100.0, y_min..y_max)?;

    let axis_font = FontDesc::new(FontFamily::SansSerif, 13.0, FontStyle::Normal);
    chart
        .configure_mesh()
        .light_line_style(&BLACK.mix(0.05))
        .bold_line_style(&BLACK.mix(0.15))
        .x_desc(if subplot.show_x_label { X_LABEL } else { "" })
        .y_desc(subplot.column.as_str())
        .x_label_formatter(&|v| format!("{:.0}", v))
        .y_label_formatter(&|v| format!("{:.1}", v))
        .label_style(axis_font.color(&BLACK.mix(0.85)))
        .draw()?;

    for line in &subplot.lines {
        let style = palette_color(line.color_index).stroke_width(2);
        let points = line.x.iter().copied().zip(line.y.iter().copied());
        match line.line_style {
            LineStyle::Solid => {
                chart.draw_series(LineSeries::new(points, style))?;
            }
            LineStyle::Dashed => {
                chart.draw_series(DashedLineSeries::new(points, 8, 5, style))?;
            }
        }
    }
    Ok(())
}

fn draw_legend<DB>(cell: &DrawingArea<DB, Shift>, entries: &[LegendEntry]) -> Result<()>
where
    DB: DrawingBackend,
    DB::ErrorType: 'static,
{
    let (width, height) = cell.dim_in_pixel();
    let row_height = 26;
    let block = row_height * entries.len() as i32;
    let top = (height as i32 - block).max(0) / 2 + row_height / 2;
    let left = (width as i32 / 2 - 110).max(10);
    let label_style = TextStyle::from(FontDesc::new(FontFamily::SansSerif, 16.0, FontStyle::Normal))
        .pos(Pos::new(HPos::Left, VPos::Center));

    for (idx, entry) in entries.iter().enumerate() {
        let y = top + idx as i32 * row_height;
        let style = palette_color(entry.color_index).stroke_width(2);
        let segments: Vec<(i32, i32)> = match entry.line_style {
            LineStyle::Solid => vec![(0, 40)],
            LineStyle::Dashed => vec![(0, 10), (15, 25), (30, 40)],
        };
        for (from, to) in segments {
            cell.draw(&PathElement::new(vec![(left + from, y), (left + to, y)], style))?;
        }
        cell.draw(&Text::new(
            entry.label.clone(),
            (left + 50, y),
            label_style.clone(),
        ))?;
    }
    Ok(())
}
