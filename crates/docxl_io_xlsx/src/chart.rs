//! Chart specs: builders from the input tree and translation to encoder charts.

use rust_xlsxwriter::{
    Chart, ChartAxis, ChartDataLabel, ChartDataLabelPosition, ChartFont, ChartFormat, ChartLegendPosition,
    ChartLine, ChartMarker, ChartMarkerType, ChartSolidFill, ChartType, ObjectMovement, Worksheet,
};
use serde_json::{Map, Value};

use crate::conf::{
    N_CHART_BUBBLE_SIZE_DEFAULT, N_CHART_HEIGHT_DEFAULT, N_CHART_HOLE_SIZE_DEFAULT,
    N_CHART_WIDTH_DEFAULT,
};
use crate::error::{Result, XlsxBuildError};
use crate::mapper::{
    EnumFieldSetter, SpecField, cast_map, derive_field_path, derive_index_path, get_f64_value,
    get_list_value, get_str_value, map_fields,
};
use crate::spec::{
    EnumChartLineType, EnumDataLabelPosition, SpecChart, SpecChartAxis, SpecChartDimension,
    SpecChartLegend, SpecChartLine, SpecChartMarker, SpecChartNumFmt, SpecChartPlacement,
    SpecChartPlotArea, SpecChartSeries, SpecFill, SpecFont, SpecGraphicOptions, SpecRichTextRun,
    SpecXlsxBuildReport,
};
use crate::style::derive_color;
use crate::util::parse_cell_ref;

////////////////////////////////////////////////////////////////////////////////
// #region Builders

pub fn build_line(map: &Map<String, Value>, path: &str) -> Result<SpecChartLine> {
    let l_fields = vec![
        SpecField::new(
            "Type",
            EnumFieldSetter::LineType(|l: &mut SpecChartLine, v: EnumChartLineType| l.line_type = v),
        ),
        SpecField::new("Smooth", EnumFieldSetter::Bool(|l: &mut SpecChartLine, v: bool| l.smooth = v)),
        SpecField::new("Width", EnumFieldSetter::Float(|l: &mut SpecChartLine, v: f64| l.width = v)),
        SpecField::new(
            "ShowMarkerLine",
            EnumFieldSetter::Bool(|l: &mut SpecChartLine, v: bool| l.show_marker_line = v),
        ),
    ];
    let mut line = SpecChartLine::default();
    map_fields(&mut line, map, &l_fields, path)?;
    Ok(line)
}

/// Chart-area border: a line without marker options.
pub fn build_border_line(map: &Map<String, Value>, path: &str) -> Result<SpecChartLine> {
    let l_fields = vec![
        SpecField::new(
            "Type",
            EnumFieldSetter::LineType(|l: &mut SpecChartLine, v: EnumChartLineType| l.line_type = v),
        ),
        SpecField::new("Smooth", EnumFieldSetter::Bool(|l: &mut SpecChartLine, v: bool| l.smooth = v)),
        SpecField::new("Width", EnumFieldSetter::Float(|l: &mut SpecChartLine, v: f64| l.width = v)),
    ];
    let mut line = SpecChartLine::default();
    map_fields(&mut line, map, &l_fields, path)?;
    Ok(line)
}

pub fn build_marker(map: &Map<String, Value>, path: &str) -> Result<SpecChartMarker> {
    let l_fields = vec![
        SpecField::new("Fill", EnumFieldSetter::Fill(|m: &mut SpecChartMarker, v: SpecFill| m.fill = v)),
        SpecField::new(
            "Symbol",
            EnumFieldSetter::Str(|m: &mut SpecChartMarker, v: String| m.symbol = v),
        ),
        SpecField::new("Size", EnumFieldSetter::Int(|m: &mut SpecChartMarker, v: i64| m.size = v)),
    ];
    let mut marker = SpecChartMarker::default();
    map_fields(&mut marker, map, &l_fields, path)?;
    Ok(marker)
}

pub fn build_series_list(l_values: &[Value], path: &str) -> Result<Vec<SpecChartSeries>> {
    let l_fields = vec![
        SpecField::new("Name", EnumFieldSetter::Str(|s: &mut SpecChartSeries, v: String| s.name = v)),
        SpecField::new(
            "Categories",
            EnumFieldSetter::Str(|s: &mut SpecChartSeries, v: String| s.categories = v),
        ),
        SpecField::new(
            "Values",
            EnumFieldSetter::Str(|s: &mut SpecChartSeries, v: String| s.values = v),
        ),
        SpecField::new("Sizes", EnumFieldSetter::Str(|s: &mut SpecChartSeries, v: String| s.sizes = v)),
        SpecField::new("Fill", EnumFieldSetter::Fill(|s: &mut SpecChartSeries, v: SpecFill| s.fill = v)),
        SpecField::new(
            "Line",
            EnumFieldSetter::Line(|s: &mut SpecChartSeries, v: SpecChartLine| s.line = v),
        ),
        SpecField::new(
            "Marker",
            EnumFieldSetter::Marker(|s: &mut SpecChartSeries, v: SpecChartMarker| s.marker = v),
        ),
        SpecField::new(
            "DataLabelPosition",
            EnumFieldSetter::LabelPosition(|s: &mut SpecChartSeries, v: EnumDataLabelPosition| {
                s.data_label_position = v
            }),
        ),
    ];
    let mut l_series = Vec::with_capacity(l_values.len());
    for (idx, value) in l_values.iter().enumerate() {
        let path_item = derive_index_path(path, idx);
        let mut series = SpecChartSeries::default();
        map_fields(&mut series, cast_map(value, &path_item)?, &l_fields, &path_item)?;
        l_series.push(series);
    }
    Ok(l_series)
}

pub fn build_graphic_options(map: &Map<String, Value>, path: &str) -> Result<SpecGraphicOptions> {
    let l_fields = vec![
        SpecField::new(
            "AltText",
            EnumFieldSetter::Str(|g: &mut SpecGraphicOptions, v: String| g.alt_text = v),
        ),
        SpecField::new(
            "PrintObject",
            EnumFieldSetter::OptBool(|g: &mut SpecGraphicOptions, v: Option<bool>| g.print_object = v),
        ),
        SpecField::new(
            "Locked",
            EnumFieldSetter::OptBool(|g: &mut SpecGraphicOptions, v: Option<bool>| g.locked = v),
        ),
        SpecField::new(
            "LockAspectRatio",
            EnumFieldSetter::Bool(|g: &mut SpecGraphicOptions, v: bool| g.lock_aspect_ratio = v),
        ),
        SpecField::new(
            "AutoFit",
            EnumFieldSetter::Bool(|g: &mut SpecGraphicOptions, v: bool| g.auto_fit = v),
        ),
        SpecField::new(
            "OffsetX",
            EnumFieldSetter::Int(|g: &mut SpecGraphicOptions, v: i64| g.offset_x = v),
        ),
        SpecField::new(
            "OffsetY",
            EnumFieldSetter::Int(|g: &mut SpecGraphicOptions, v: i64| g.offset_y = v),
        ),
        SpecField::new(
            "ScaleX",
            EnumFieldSetter::Float(|g: &mut SpecGraphicOptions, v: f64| g.scale_x = v),
        ),
        SpecField::new(
            "ScaleY",
            EnumFieldSetter::Float(|g: &mut SpecGraphicOptions, v: f64| g.scale_y = v),
        ),
        SpecField::new(
            "Hyperlink",
            EnumFieldSetter::Str(|g: &mut SpecGraphicOptions, v: String| g.hyperlink = v),
        ),
        SpecField::new(
            "HyperlinkType",
            EnumFieldSetter::Str(|g: &mut SpecGraphicOptions, v: String| g.hyperlink_type = v),
        ),
        SpecField::new(
            "Positioning",
            EnumFieldSetter::Str(|g: &mut SpecGraphicOptions, v: String| g.positioning = v),
        ),
    ];
    let mut options = SpecGraphicOptions::default();
    map_fields(&mut options, map, &l_fields, path)?;
    Ok(options)
}

pub fn build_dimension(map: &Map<String, Value>, path: &str) -> Result<SpecChartDimension> {
    let l_fields = vec![
        SpecField::new(
            "Width",
            EnumFieldSetter::UInt(|d: &mut SpecChartDimension, v: u64| d.width = v),
        ),
        SpecField::new(
            "Height",
            EnumFieldSetter::UInt(|d: &mut SpecChartDimension, v: u64| d.height = v),
        ),
    ];
    let mut dimension = SpecChartDimension::default();
    map_fields(&mut dimension, map, &l_fields, path)?;
    Ok(dimension)
}

pub fn build_legend(map: &Map<String, Value>, path: &str) -> Result<SpecChartLegend> {
    let l_fields = vec![
        SpecField::new(
            "Position",
            EnumFieldSetter::Str(|l: &mut SpecChartLegend, v: String| l.position = v),
        ),
        SpecField::new(
            "ShowLegendKey",
            EnumFieldSetter::Bool(|l: &mut SpecChartLegend, v: bool| l.show_legend_key = v),
        ),
    ];
    let mut legend = SpecChartLegend::default();
    map_fields(&mut legend, map, &l_fields, path)?;
    Ok(legend)
}

/// Rich-text runs `[{Text, Font}]`; a `null` entry is an empty run.
pub fn build_rich_text(l_values: &[Value], path: &str) -> Result<Vec<SpecRichTextRun>> {
    let l_fields = vec![
        SpecField::new(
            "Text",
            EnumFieldSetter::Str(|r: &mut SpecRichTextRun, v: String| r.text = v),
        ),
        SpecField::new(
            "Font",
            EnumFieldSetter::Font(|r: &mut SpecRichTextRun, v: SpecFont| r.font = Some(v)),
        ),
    ];
    let mut l_runs = Vec::with_capacity(l_values.len());
    for (idx, value) in l_values.iter().enumerate() {
        let mut run = SpecRichTextRun::default();
        if !value.is_null() {
            let path_item = derive_index_path(path, idx);
            map_fields(&mut run, cast_map(value, &path_item)?, &l_fields, &path_item)?;
        }
        l_runs.push(run);
    }
    Ok(l_runs)
}

pub fn build_num_fmt(map: &Map<String, Value>, path: &str) -> Result<SpecChartNumFmt> {
    let l_fields = vec![
        SpecField::new(
            "CustomNumFmt",
            EnumFieldSetter::Str(|n: &mut SpecChartNumFmt, v: String| n.custom_num_fmt = v),
        ),
        SpecField::new(
            "SourceLinked",
            EnumFieldSetter::Bool(|n: &mut SpecChartNumFmt, v: bool| n.source_linked = v),
        ),
    ];
    let mut num_fmt = SpecChartNumFmt::default();
    map_fields(&mut num_fmt, map, &l_fields, path)?;
    Ok(num_fmt)
}

pub fn build_axis(map: &Map<String, Value>, path: &str) -> Result<SpecChartAxis> {
    let l_fields = vec![
        SpecField::new("None", EnumFieldSetter::Bool(|a: &mut SpecChartAxis, v: bool| a.none = v)),
        SpecField::new(
            "MajorGridLines",
            EnumFieldSetter::Bool(|a: &mut SpecChartAxis, v: bool| a.major_grid_lines = v),
        ),
        SpecField::new(
            "MinorGridLines",
            EnumFieldSetter::Bool(|a: &mut SpecChartAxis, v: bool| a.minor_grid_lines = v),
        ),
        SpecField::new(
            "MajorUnit",
            EnumFieldSetter::Float(|a: &mut SpecChartAxis, v: f64| a.major_unit = v),
        ),
        SpecField::new(
            "TickLabelSkip",
            EnumFieldSetter::Int(|a: &mut SpecChartAxis, v: i64| a.tick_label_skip = v),
        ),
        SpecField::new(
            "ReverseOrder",
            EnumFieldSetter::Bool(|a: &mut SpecChartAxis, v: bool| a.reverse_order = v),
        ),
        SpecField::new(
            "Secondary",
            EnumFieldSetter::Bool(|a: &mut SpecChartAxis, v: bool| a.secondary = v),
        ),
        SpecField::new(
            "Maximum",
            EnumFieldSetter::OptFloat(|a: &mut SpecChartAxis, v: Option<f64>| a.maximum = v),
        ),
        SpecField::new(
            "Minimum",
            EnumFieldSetter::OptFloat(|a: &mut SpecChartAxis, v: Option<f64>| a.minimum = v),
        ),
        SpecField::new("Font", EnumFieldSetter::Font(|a: &mut SpecChartAxis, v: SpecFont| a.font = v)),
        SpecField::new("LogBase", EnumFieldSetter::Float(|a: &mut SpecChartAxis, v: f64| a.log_base = v)),
        SpecField::new(
            "NumFmt",
            EnumFieldSetter::NumFmt(|a: &mut SpecChartAxis, v: SpecChartNumFmt| a.num_fmt = v),
        ),
        SpecField::new(
            "Title",
            EnumFieldSetter::RichText(|a: &mut SpecChartAxis, v: Vec<SpecRichTextRun>| a.title = v),
        ),
    ];
    let mut axis = SpecChartAxis::default();
    map_fields(&mut axis, map, &l_fields, path)?;
    Ok(axis)
}

pub fn build_plot_area(map: &Map<String, Value>, path: &str) -> Result<SpecChartPlotArea> {
    let l_fields = vec![
        SpecField::new(
            "SecondPlotValues",
            EnumFieldSetter::Int(|p: &mut SpecChartPlotArea, v: i64| p.second_plot_values = v),
        ),
        SpecField::new(
            "ShowBubbleSize",
            EnumFieldSetter::Bool(|p: &mut SpecChartPlotArea, v: bool| p.show_bubble_size = v),
        ),
        SpecField::new(
            "ShowCatName",
            EnumFieldSetter::Bool(|p: &mut SpecChartPlotArea, v: bool| p.show_cat_name = v),
        ),
        SpecField::new(
            "ShowLeaderLines",
            EnumFieldSetter::Bool(|p: &mut SpecChartPlotArea, v: bool| p.show_leader_lines = v),
        ),
        SpecField::new(
            "ShowPercent",
            EnumFieldSetter::Bool(|p: &mut SpecChartPlotArea, v: bool| p.show_percent = v),
        ),
        SpecField::new(
            "ShowSerName",
            EnumFieldSetter::Bool(|p: &mut SpecChartPlotArea, v: bool| p.show_ser_name = v),
        ),
        SpecField::new(
            "ShowVal",
            EnumFieldSetter::Bool(|p: &mut SpecChartPlotArea, v: bool| p.show_val = v),
        ),
        SpecField::new(
            "Fill",
            EnumFieldSetter::Fill(|p: &mut SpecChartPlotArea, v: SpecFill| p.fill = v),
        ),
        SpecField::new(
            "NumFmt",
            EnumFieldSetter::NumFmt(|p: &mut SpecChartPlotArea, v: SpecChartNumFmt| p.num_fmt = v),
        ),
    ];
    let mut plot_area = SpecChartPlotArea::default();
    map_fields(&mut plot_area, map, &l_fields, path)?;
    Ok(plot_area)
}

/// Build one chart map. `Type` is required.
pub fn build_chart(map: &Map<String, Value>, path: &str) -> Result<SpecChart> {
    let chart_type = match map.get("Type") {
        Some(Value::Number(val)) => val.as_f64().unwrap_or_default().trunc() as i64,
        Some(Value::Null) | None => {
            return Err(XlsxBuildError::MissingKey(derive_field_path(path, "Type")));
        }
        Some(other) => {
            return Err(XlsxBuildError::schema(
                derive_field_path(path, "Type"),
                "number",
                other,
            ));
        }
    };

    let l_fields = vec![
        SpecField::new(
            "Series",
            EnumFieldSetter::Series(|c: &mut SpecChart, v: Vec<SpecChartSeries>| c.series = v),
        ),
        SpecField::new(
            "Format",
            EnumFieldSetter::GraphicOptions(|c: &mut SpecChart, v: SpecGraphicOptions| c.format = v),
        ),
        SpecField::new(
            "Dimension",
            EnumFieldSetter::Dimension(|c: &mut SpecChart, v: SpecChartDimension| c.dimension = v),
        ),
        SpecField::new(
            "Legend",
            EnumFieldSetter::Legend(|c: &mut SpecChart, v: SpecChartLegend| c.legend = v),
        ),
        SpecField::new(
            "Title",
            EnumFieldSetter::RichText(|c: &mut SpecChart, v: Vec<SpecRichTextRun>| c.title = v),
        ),
        SpecField::new("XAxis", EnumFieldSetter::Axis(|c: &mut SpecChart, v: SpecChartAxis| c.x_axis = v)),
        SpecField::new("YAxis", EnumFieldSetter::Axis(|c: &mut SpecChart, v: SpecChartAxis| c.y_axis = v)),
        SpecField::new(
            "PlotArea",
            EnumFieldSetter::PlotArea(|c: &mut SpecChart, v: SpecChartPlotArea| c.plot_area = v),
        ),
        SpecField::new("Fill", EnumFieldSetter::Fill(|c: &mut SpecChart, v: SpecFill| c.fill = v)),
    ];
    let mut chart = SpecChart {
        chart_type,
        ..SpecChart::default()
    };
    map_fields(&mut chart, map, &l_fields, path)?;

    // Border carries no marker-line flag, unlike series lines.
    if let Some(value) = map.get("Border").filter(|val| !val.is_null()) {
        let path_border = derive_field_path(path, "Border");
        chart.border = build_border_line(cast_map(value, &path_border)?, &path_border)?;
    }
    chart.bubble_size = get_f64_value(map, "BubbleSize", N_CHART_BUBBLE_SIZE_DEFAULT, path)?;
    chart.hole_size = get_f64_value(map, "HoleSize", N_CHART_HOLE_SIZE_DEFAULT, path)?;
    Ok(chart)
}

/// Build one `{cell, chart: [...]}` placement.
pub fn build_chart_placement(map: &Map<String, Value>, path: &str) -> Result<SpecChartPlacement> {
    let cell = get_str_value(map, "cell", path)?;
    if cell.is_empty() {
        return Err(XlsxBuildError::MissingKey(derive_field_path(path, "cell")));
    }
    let path_charts = derive_field_path(path, "chart");
    let mut l_charts = Vec::new();
    for (idx, value) in get_list_value(map, "chart", path)?.iter().enumerate() {
        let path_item = derive_index_path(&path_charts, idx);
        l_charts.push(build_chart(cast_map(value, &path_item)?, &path_item)?);
    }
    Ok(SpecChartPlacement {
        cell,
        charts: l_charts,
    })
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region Translation

/// Outcome of mapping an Excel chart type index onto the encoder's types.
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum EnumChartTypeMatch {
    Native(ChartType),
    /// 3-D variant drawn with its 2-D counterpart.
    Degraded(ChartType),
    Rejected(&'static str),
}

/// Map an Excel chart type index (0..=54) onto an encoder chart type.
pub fn derive_chart_type(index: i64) -> EnumChartTypeMatch {
    use EnumChartTypeMatch::{Degraded, Native, Rejected};
    match index {
        0 => Native(ChartType::Area),
        1 => Native(ChartType::AreaStacked),
        2 => Native(ChartType::AreaPercentStacked),
        3 => Degraded(ChartType::Area),
        4 => Degraded(ChartType::AreaStacked),
        5 => Degraded(ChartType::AreaPercentStacked),
        6 => Native(ChartType::Bar),
        7 => Native(ChartType::BarStacked),
        8 => Native(ChartType::BarPercentStacked),
        9..=20 => Degraded(match (index - 9) % 3 {
            0 => ChartType::Bar,
            1 => ChartType::BarStacked,
            _ => ChartType::BarPercentStacked,
        }),
        21 => Native(ChartType::Column),
        22 => Native(ChartType::ColumnStacked),
        23 => Native(ChartType::ColumnPercentStacked),
        24..=39 => Degraded(match (index - 24) % 4 {
            2 => ChartType::ColumnStacked,
            3 => ChartType::ColumnPercentStacked,
            _ => ChartType::Column,
        }),
        40 => Native(ChartType::Doughnut),
        41 => Native(ChartType::Line),
        42 => Degraded(ChartType::Line),
        43 => Native(ChartType::Pie),
        44 => Degraded(ChartType::Pie),
        45 => Rejected("pie-of-pie"),
        46 => Rejected("bar-of-pie"),
        47 => Native(ChartType::Radar),
        48 => Native(ChartType::Scatter),
        49 | 50 => Rejected("surface"),
        51 | 52 => Rejected("contour"),
        53 | 54 => Rejected("bubble"),
        _ => Rejected("unknown"),
    }
}

/// Translate one chart spec. `Ok(None)` means the type is not drawable.
pub fn derive_chart(
    spec: &SpecChart,
    path: &str,
    report: &mut SpecXlsxBuildReport,
) -> Result<Option<Chart>> {
    let chart_type = match derive_chart_type(spec.chart_type) {
        EnumChartTypeMatch::Native(val) => val,
        EnumChartTypeMatch::Degraded(val) => {
            report.warn(format!(
                "{path}: 3-D chart type {} is drawn as its 2-D counterpart",
                spec.chart_type
            ));
            val
        }
        EnumChartTypeMatch::Rejected(kind) => {
            report.warn(format!(
                "{path}: {kind} chart type {} is not supported; chart skipped",
                spec.chart_type
            ));
            return Ok(None);
        }
    };

    let mut chart = Chart::new(chart_type);

    for (idx, series_spec) in spec.series.iter().enumerate() {
        let path_series = derive_index_path(&derive_field_path(path, "Series"), idx);
        apply_series(&mut chart, series_spec, spec, &path_series)?;
    }

    if !spec.title.is_empty() {
        let (text, font) = derive_rich_text(&spec.title);
        let title = chart.title();
        title.set_name(text.as_str());
        if let Some(font) = font {
            title.set_font(&derive_chart_font(font, path)?);
        }
    }

    apply_axis(chart.x_axis(), &spec.x_axis, &derive_field_path(path, "XAxis"))?;
    apply_axis(chart.y_axis(), &spec.y_axis, &derive_field_path(path, "YAxis"))?;

    match spec.legend.position.trim() {
        "" => {}
        "none" => {
            chart.legend().set_hidden();
        }
        "top" => {
            chart.legend().set_position(ChartLegendPosition::Top);
        }
        "bottom" => {
            chart.legend().set_position(ChartLegendPosition::Bottom);
        }
        "left" => {
            chart.legend().set_position(ChartLegendPosition::Left);
        }
        "right" => {
            chart.legend().set_position(ChartLegendPosition::Right);
        }
        "top_right" => {
            chart.legend().set_position(ChartLegendPosition::TopRight);
        }
        other => report.warn(format!("{path}: unknown legend position `{other}` ignored")),
    }

    if let Some(mut format) = derive_fill_format(&spec.plot_area.fill, path)? {
        chart.plot_area().set_format(&mut format);
    }
    let mut format_area = derive_fill_format(&spec.fill, path)?.unwrap_or_else(ChartFormat::new);
    let if_area_border = apply_line(&mut format_area, &spec.border, true);
    if !spec.fill.color.is_empty() || if_area_border {
        chart.chart_area().set_format(&mut format_area);
    }

    let scale_x = if spec.format.scale_x > 0.0 { spec.format.scale_x } else { 1.0 };
    let scale_y = if spec.format.scale_y > 0.0 { spec.format.scale_y } else { 1.0 };
    let n_width = if spec.dimension.width > 0 {
        spec.dimension.width as f64
    } else {
        N_CHART_WIDTH_DEFAULT as f64
    };
    let n_height = if spec.dimension.height > 0 {
        spec.dimension.height as f64
    } else {
        N_CHART_HEIGHT_DEFAULT as f64
    };
    chart.set_width((n_width * scale_x).round() as u32);
    chart.set_height((n_height * scale_y).round() as u32);

    if !spec.format.alt_text.is_empty() {
        chart.set_alt_text(spec.format.alt_text.as_str());
    }
    match spec.format.positioning.as_str() {
        "oneCell" => {
            chart.set_object_movement(ObjectMovement::MoveButDontSizeWithCells);
        }
        "absolute" => {
            chart.set_object_movement(ObjectMovement::DontMoveOrSizeWithCells);
        }
        _ => {}
    }
    if chart_type == ChartType::Doughnut {
        chart.set_hole_size(spec.hole_size.clamp(10.0, 90.0) as u8);
    }
    Ok(Some(chart))
}

fn apply_series(
    chart: &mut Chart,
    spec: &SpecChartSeries,
    chart_spec: &SpecChart,
    path: &str,
) -> Result<()> {
    let mut format = derive_fill_format(&spec.fill, path)?.unwrap_or_else(ChartFormat::new);
    let if_line = apply_line(&mut format, &spec.line, false);
    let marker = derive_marker(&spec.marker, path)?;
    let label = derive_data_label(&chart_spec.plot_area, spec.data_label_position);

    let series = chart.add_series();
    if !spec.values.is_empty() {
        series.set_values(derive_chart_range(&spec.values));
    }
    if !spec.categories.is_empty() {
        series.set_categories(derive_chart_range(&spec.categories));
    }
    if !spec.name.is_empty() {
        series.set_name(derive_series_name(&spec.name).as_str());
    }
    if !spec.fill.color.is_empty() || if_line {
        series.set_format(&mut format);
    }
    if spec.line.smooth {
        series.set_smooth(true);
    }
    if let Some(marker) = marker {
        series.set_marker(&marker);
    }
    if let Some(label) = label {
        series.set_data_label(&label);
    }
    if chart_spec.y_axis.secondary {
        series.set_secondary_axis(true);
    }
    Ok(())
}

/// Apply a line spec onto `format`; returns whether anything was set.
fn apply_line(format: &mut ChartFormat, line: &SpecChartLine, if_border: bool) -> bool {
    match line.line_type {
        EnumChartLineType::None => {
            if if_border {
                format.set_no_border();
            } else {
                format.set_no_line();
            }
            true
        }
        EnumChartLineType::Solid | EnumChartLineType::Unset if line.width > 0.0 => {
            let mut chart_line = ChartLine::new();
            chart_line.set_width(line.width);
            if if_border {
                format.set_border(&chart_line);
            } else {
                format.set_line(&chart_line);
            }
            true
        }
        _ => false,
    }
}

fn derive_fill_format(fill: &SpecFill, path: &str) -> Result<Option<ChartFormat>> {
    let Some(color) = fill.color.first() else {
        return Ok(None);
    };
    let mut solid = ChartSolidFill::new();
    solid.set_color(derive_color(color, &derive_field_path(path, "Fill"))?);
    let mut format = ChartFormat::new();
    format.set_solid_fill(&solid);
    Ok(Some(format))
}

fn derive_marker(spec: &SpecChartMarker, path: &str) -> Result<Option<ChartMarker>> {
    let mut marker = ChartMarker::new();
    match spec.symbol.trim() {
        "" => return Ok(None),
        "none" => {
            marker.set_none();
            return Ok(Some(marker));
        }
        "auto" | "picture" => {
            marker.set_automatic();
            return Ok(Some(marker));
        }
        "circle" | "dot" => {
            marker.set_type(ChartMarkerType::Circle);
        }
        "dash" => {
            marker.set_type(ChartMarkerType::ShortDash);
        }
        "diamond" => {
            marker.set_type(ChartMarkerType::Diamond);
        }
        "plus" => {
            marker.set_type(ChartMarkerType::PlusSign);
        }
        "square" => {
            marker.set_type(ChartMarkerType::Square);
        }
        "star" => {
            marker.set_type(ChartMarkerType::Star);
        }
        "triangle" => {
            marker.set_type(ChartMarkerType::Triangle);
        }
        "x" => {
            marker.set_type(ChartMarkerType::X);
        }
        other => {
            return Err(XlsxBuildError::invalid(
                derive_field_path(path, "Marker"),
                format!("unknown marker symbol `{other}`"),
            ));
        }
    }
    if spec.size > 0 {
        marker.set_size(spec.size.clamp(2, 72) as u8);
    }
    if let Some(mut format) = derive_fill_format(&spec.fill, path)? {
        marker.set_format(&mut format);
    }
    Ok(Some(marker))
}

fn derive_data_label(
    plot_area: &SpecChartPlotArea,
    position: EnumDataLabelPosition,
) -> Option<ChartDataLabel> {
    let if_any = plot_area.show_val
        || plot_area.show_cat_name
        || plot_area.show_ser_name
        || plot_area.show_percent
        || plot_area.show_leader_lines
        || position != EnumDataLabelPosition::Unset;
    if !if_any {
        return None;
    }
    let mut label = ChartDataLabel::new();
    // A position alone still needs a visible value.
    if plot_area.show_val || !(plot_area.show_cat_name || plot_area.show_ser_name || plot_area.show_percent) {
        label.show_value();
    }
    if plot_area.show_cat_name {
        label.show_category_name();
    }
    if plot_area.show_ser_name {
        label.show_series_name();
    }
    if plot_area.show_percent {
        label.show_percentage();
    }
    if plot_area.show_leader_lines {
        label.show_leader_lines();
    }
    if !plot_area.num_fmt.custom_num_fmt.is_empty() {
        label.set_num_format(plot_area.num_fmt.custom_num_fmt.as_str());
    }
    let position = match position {
        EnumDataLabelPosition::Unset => None,
        EnumDataLabelPosition::BestFit => Some(ChartDataLabelPosition::BestFit),
        EnumDataLabelPosition::Below => Some(ChartDataLabelPosition::Below),
        EnumDataLabelPosition::Center => Some(ChartDataLabelPosition::Center),
        EnumDataLabelPosition::InsideBase => Some(ChartDataLabelPosition::InsideBase),
        EnumDataLabelPosition::InsideEnd => Some(ChartDataLabelPosition::InsideEnd),
        EnumDataLabelPosition::Left => Some(ChartDataLabelPosition::Left),
        EnumDataLabelPosition::OutsideEnd => Some(ChartDataLabelPosition::OutsideEnd),
        EnumDataLabelPosition::Right => Some(ChartDataLabelPosition::Right),
        EnumDataLabelPosition::Above => Some(ChartDataLabelPosition::Above),
    };
    if let Some(position) = position {
        label.set_position(position);
    }
    Some(label)
}

fn apply_axis(axis: &mut ChartAxis, spec: &SpecChartAxis, path: &str) -> Result<()> {
    if spec.none {
        axis.set_hidden(true);
    }
    if spec.major_grid_lines {
        axis.set_major_gridlines(true);
    }
    if spec.minor_grid_lines {
        axis.set_minor_gridlines(true);
    }
    if spec.major_unit > 0.0 {
        axis.set_major_unit(spec.major_unit);
    }
    if spec.tick_label_skip > 0 {
        axis.set_label_interval(spec.tick_label_skip.min(i64::from(u16::MAX)) as u16);
    }
    if spec.reverse_order {
        axis.set_reverse();
    }
    if let Some(val) = spec.maximum {
        axis.set_max(val);
    }
    if let Some(val) = spec.minimum {
        axis.set_min(val);
    }
    if spec.log_base >= 2.0 {
        axis.set_log_base(spec.log_base.min(f64::from(u16::MAX)) as u16);
    }
    if !spec.num_fmt.custom_num_fmt.is_empty() {
        axis.set_num_format(spec.num_fmt.custom_num_fmt.as_str());
    }
    if spec.font != SpecFont::default() {
        axis.set_font(&derive_chart_font(&spec.font, path)?);
    }
    if !spec.title.is_empty() {
        let (text, font) = derive_rich_text(&spec.title);
        axis.set_name(text.as_str());
        if let Some(font) = font {
            axis.set_name_font(&derive_chart_font(font, path)?);
        }
    }
    Ok(())
}

fn derive_chart_font(font: &SpecFont, path: &str) -> Result<ChartFont> {
    let mut chart_font = ChartFont::new();
    if font.bold {
        chart_font.set_bold();
    }
    if font.italic {
        chart_font.set_italic();
    }
    if font.size > 0.0 {
        chart_font.set_size(font.size);
    }
    if !font.family.is_empty() {
        chart_font.set_name(font.family.as_str());
    }
    if !font.color.is_empty() {
        chart_font.set_color(derive_color(&font.color, &derive_field_path(path, "Font"))?);
    }
    Ok(chart_font)
}

/// Concatenated run text and the first run font.
fn derive_rich_text(l_runs: &[SpecRichTextRun]) -> (String, Option<&SpecFont>) {
    let text = l_runs.iter().map(|run| run.text.as_str()).collect::<String>();
    let font = l_runs.iter().find_map(|run| run.font.as_ref());
    (text, font)
}

fn derive_chart_range(reference: &str) -> &str {
    reference.trim().trim_start_matches('=')
}

/// Sheet references become formulas; anything else is a literal name.
fn derive_series_name(name: &str) -> String {
    let name = name.trim();
    if name.starts_with('=') || !name.contains('!') {
        name.to_string()
    } else {
        format!("={name}")
    }
}

/// Insert every placement's chart, combining the second chart into the first.
///
/// Failures are best-effort and land in the report.
pub fn insert_chart_placements(
    worksheet: &mut Worksheet,
    l_placements: &[SpecChartPlacement],
    path: &str,
    report: &mut SpecXlsxBuildReport,
) {
    for (idx, placement) in l_placements.iter().enumerate() {
        let path_item = derive_index_path(path, idx);
        if let Err(err) = insert_chart_placement(worksheet, placement, &path_item, report) {
            report.warn(format!("{path_item}: chart skipped: {err}"));
        }
    }
}

fn insert_chart_placement(
    worksheet: &mut Worksheet,
    placement: &SpecChartPlacement,
    path: &str,
    report: &mut SpecXlsxBuildReport,
) -> Result<()> {
    let (row, col) = parse_cell_ref(&placement.cell).ok_or_else(|| {
        XlsxBuildError::invalid(
            derive_field_path(path, "cell"),
            format!("invalid cell `{}`", placement.cell),
        )
    })?;
    let Some(spec_primary) = placement.charts.first() else {
        return Ok(());
    };
    let path_charts = derive_field_path(path, "chart");
    let Some(mut chart) = derive_chart(spec_primary, &derive_index_path(&path_charts, 0), report)?
    else {
        return Ok(());
    };

    if let Some(spec_combo) = placement.charts.get(1)
        && let Some(chart_combo) = derive_chart(spec_combo, &derive_index_path(&path_charts, 1), report)?
    {
        chart.combine(&chart_combo);
    }
    if placement.charts.len() > 2 {
        report.warn(format!(
            "{path}: only one combo chart is supported; {} dropped",
            placement.charts.len() - 2
        ));
    }

    let n_offset_x = u32::try_from(spec_primary.format.offset_x.max(0)).unwrap_or(0);
    let n_offset_y = u32::try_from(spec_primary.format.offset_y.max(0)).unwrap_or(0);
    worksheet.insert_chart_with_offset(row, col, &chart, n_offset_x, n_offset_y)?;
    Ok(())
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
