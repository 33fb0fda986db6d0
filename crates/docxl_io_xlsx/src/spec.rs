//! Typed document models hydrated from the loosely typed input tree.

use std::collections::{BTreeMap, BTreeSet};

////////////////////////////////////////////////////////////////////////////////
// #region DocumentSpecification

/// Sheet write strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EnumWriteEngine {
    /// Forward-only, row-ordered writer.
    #[default]
    Streaming,
    /// Coordinate-addressed writer with outline grouping.
    RandomAccess,
}

impl EnumWriteEngine {
    /// Parse an engine selector. Accepts both the wire names and the short names.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "NormalWriter" | "random_access" | "RandomAccess" | "normal" => {
                Some(EnumWriteEngine::RandomAccess)
            }
            "StreamWriter" | "streaming" | "Streaming" | "stream" => Some(EnumWriteEngine::Streaming),
            _ => None,
        }
    }

    /// Short display name used in reports and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            EnumWriteEngine::Streaming => "streaming",
            EnumWriteEngine::RandomAccess => "random_access",
        }
    }
}

/// Root input document.
#[derive(Debug, Clone, Default)]
pub struct SpecDocument {
    /// Raw named style specs, in declared order.
    pub styles: serde_json::Map<String, serde_json::Value>,
    /// Document metadata.
    pub file_props: SpecDocProperties,
    /// Optional workbook protection.
    pub protection: Option<SpecWorkbookProtection>,
    /// Sheets to write, in order.
    pub sheet_order: Vec<String>,
    /// Parsed sheets reachable from `sheet_order`.
    pub sheets: BTreeMap<String, SpecSheet>,
    /// Every sheet name present in `content`, reachable or not.
    pub sheet_names_content: BTreeSet<String>,
    /// Document-level engine selector.
    pub engine: Option<EnumWriteEngine>,
}

/// Document metadata (`file_props`).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SpecDocProperties {
    pub category: String,
    pub content_status: String,
    pub created: String,
    pub creator: String,
    pub description: String,
    pub identifier: String,
    pub keywords: String,
    pub last_modified_by: String,
    pub modified: String,
    pub revision: String,
    pub subject: String,
    pub title: String,
    pub language: String,
    pub version: String,
}

impl SpecDocProperties {
    /// Whether any field the encoder cannot express natively is set.
    pub fn has_package_fields(&self) -> bool {
        [
            &self.created,
            &self.identifier,
            &self.last_modified_by,
            &self.modified,
            &self.revision,
            &self.language,
            &self.version,
        ]
        .iter()
        .any(|val| !val.is_empty())
    }
}

/// Hash algorithm for workbook protection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnumProtectionAlgorithm {
    Xor,
    Md4,
    Md5,
    Sha1,
    Sha256,
    Sha384,
    Sha512,
}

impl EnumProtectionAlgorithm {
    /// Parse an algorithm name; empty selects the legacy XOR hash.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "" | "XOR" => Some(EnumProtectionAlgorithm::Xor),
            "MD4" => Some(EnumProtectionAlgorithm::Md4),
            "MD5" => Some(EnumProtectionAlgorithm::Md5),
            "SHA-1" | "SHA1" => Some(EnumProtectionAlgorithm::Sha1),
            "SHA-256" | "SHA256" => Some(EnumProtectionAlgorithm::Sha256),
            "SHA-384" | "SHA384" => Some(EnumProtectionAlgorithm::Sha384),
            "SHA-512" | "SHA512" => Some(EnumProtectionAlgorithm::Sha512),
            _ => None,
        }
    }

    /// Name written to `workbookAlgorithmName`.
    pub fn as_str(&self) -> &'static str {
        match self {
            EnumProtectionAlgorithm::Xor => "XOR",
            EnumProtectionAlgorithm::Md4 => "MD4",
            EnumProtectionAlgorithm::Md5 => "MD5",
            EnumProtectionAlgorithm::Sha1 => "SHA-1",
            EnumProtectionAlgorithm::Sha256 => "SHA-256",
            EnumProtectionAlgorithm::Sha384 => "SHA-384",
            EnumProtectionAlgorithm::Sha512 => "SHA-512",
        }
    }
}

/// Workbook password protection (`protection`).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SpecWorkbookProtection {
    pub algorithm: String,
    pub password: String,
    pub lock_structure: bool,
    pub lock_windows: bool,
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region StyleSpecification

/// Font fragment.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SpecFont {
    pub bold: bool,
    pub italic: bool,
    pub underline: String,
    pub family: String,
    pub size: f64,
    pub strike: bool,
    pub color: String,
    pub vert_align: String,
}

/// Fill fragment.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SpecFill {
    pub fill_type: String,
    pub color: Vec<String>,
    pub pattern: i64,
    pub shading: i64,
}

/// One border edge.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SpecBorderEdge {
    pub color: String,
    pub style: i64,
}

/// Border fragment; each edge is independently optional.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SpecBorder {
    pub left: Option<SpecBorderEdge>,
    pub top: Option<SpecBorderEdge>,
    pub bottom: Option<SpecBorderEdge>,
    pub right: Option<SpecBorderEdge>,
}

/// Alignment fragment.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SpecAlignment {
    pub horizontal: String,
    pub indent: i64,
    pub justify_last_line: bool,
    pub reading_order: u64,
    pub relative_indent: i64,
    pub shrink_to_fit: bool,
    pub text_rotation: i64,
    pub vertical: String,
    pub wrap_text: bool,
}

/// Cell protection fragment.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SpecCellProtection {
    pub hidden: bool,
    /// `None` keeps the encoder default (locked).
    pub locked: Option<bool>,
}

/// Composite named style.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SpecStyle {
    pub font: SpecFont,
    pub fill: SpecFill,
    pub border: SpecBorder,
    pub alignment: SpecAlignment,
    pub protection: SpecCellProtection,
    pub custom_num_fmt: String,
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region ChartSpecification

/// Chart line type (`ChartLineType`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EnumChartLineType {
    #[default]
    Unset,
    Solid,
    None,
    Automatic,
}

impl EnumChartLineType {
    pub fn from_index(value: i64) -> Option<Self> {
        match value {
            0 => Some(EnumChartLineType::Unset),
            1 => Some(EnumChartLineType::Solid),
            2 => Some(EnumChartLineType::None),
            3 => Some(EnumChartLineType::Automatic),
            _ => None,
        }
    }
}

/// Data label position (`ChartDataLabelPositionType`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EnumDataLabelPosition {
    #[default]
    Unset,
    BestFit,
    Below,
    Center,
    InsideBase,
    InsideEnd,
    Left,
    OutsideEnd,
    Right,
    Above,
}

impl EnumDataLabelPosition {
    pub fn from_index(value: i64) -> Option<Self> {
        let l_positions = [
            EnumDataLabelPosition::Unset,
            EnumDataLabelPosition::BestFit,
            EnumDataLabelPosition::Below,
            EnumDataLabelPosition::Center,
            EnumDataLabelPosition::InsideBase,
            EnumDataLabelPosition::InsideEnd,
            EnumDataLabelPosition::Left,
            EnumDataLabelPosition::OutsideEnd,
            EnumDataLabelPosition::Right,
            EnumDataLabelPosition::Above,
        ];
        usize::try_from(value)
            .ok()
            .and_then(|idx| l_positions.get(idx).copied())
    }
}

/// Series or border line.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SpecChartLine {
    pub line_type: EnumChartLineType,
    pub smooth: bool,
    pub width: f64,
    pub show_marker_line: bool,
}

/// Series marker.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SpecChartMarker {
    pub fill: SpecFill,
    pub symbol: String,
    pub size: i64,
}

/// Chart series.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SpecChartSeries {
    pub name: String,
    pub categories: String,
    pub values: String,
    pub sizes: String,
    pub fill: SpecFill,
    pub line: SpecChartLine,
    pub marker: SpecChartMarker,
    pub data_label_position: EnumDataLabelPosition,
}

/// Placement options (`Format`).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SpecGraphicOptions {
    pub alt_text: String,
    pub print_object: Option<bool>,
    pub locked: Option<bool>,
    pub lock_aspect_ratio: bool,
    pub auto_fit: bool,
    pub offset_x: i64,
    pub offset_y: i64,
    pub scale_x: f64,
    pub scale_y: f64,
    pub hyperlink: String,
    pub hyperlink_type: String,
    pub positioning: String,
}

/// Chart size in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SpecChartDimension {
    pub width: u64,
    pub height: u64,
}

/// Legend options.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SpecChartLegend {
    pub position: String,
    pub show_legend_key: bool,
}

/// One rich-text run of a title or comment.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SpecRichTextRun {
    pub text: String,
    pub font: Option<SpecFont>,
}

/// Number format for axes and labels.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SpecChartNumFmt {
    pub custom_num_fmt: String,
    pub source_linked: bool,
}

/// Chart axis.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SpecChartAxis {
    pub none: bool,
    pub major_grid_lines: bool,
    pub minor_grid_lines: bool,
    pub major_unit: f64,
    pub tick_label_skip: i64,
    pub reverse_order: bool,
    pub secondary: bool,
    pub maximum: Option<f64>,
    pub minimum: Option<f64>,
    pub font: SpecFont,
    pub log_base: f64,
    pub num_fmt: SpecChartNumFmt,
    pub title: Vec<SpecRichTextRun>,
}

/// Plot area options.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SpecChartPlotArea {
    pub second_plot_values: i64,
    pub show_bubble_size: bool,
    pub show_cat_name: bool,
    pub show_leader_lines: bool,
    pub show_percent: bool,
    pub show_ser_name: bool,
    pub show_val: bool,
    pub fill: SpecFill,
    pub num_fmt: SpecChartNumFmt,
}

/// One chart definition.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SpecChart {
    /// Excel chart type index.
    pub chart_type: i64,
    pub series: Vec<SpecChartSeries>,
    pub format: SpecGraphicOptions,
    pub dimension: SpecChartDimension,
    pub legend: SpecChartLegend,
    pub title: Vec<SpecRichTextRun>,
    pub x_axis: SpecChartAxis,
    pub y_axis: SpecChartAxis,
    pub plot_area: SpecChartPlotArea,
    pub fill: SpecFill,
    pub border: SpecChartLine,
    pub bubble_size: f64,
    pub hole_size: f64,
}

/// Chart anchored at a cell; extra entries are combined into the first.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SpecChartPlacement {
    pub cell: String,
    pub charts: Vec<SpecChart>,
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region PivotSpecification

/// Pivot field reference.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SpecPivotField {
    /// Source column header.
    pub data: String,
    /// Display name.
    pub name: String,
    pub compact: bool,
    pub outline: bool,
    pub subtotal: String,
    pub default_subtotal: bool,
}

/// Pivot table definition.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SpecPivotTable {
    pub data_range: String,
    pub pivot_table_range: String,
    pub rows: Vec<SpecPivotField>,
    pub columns: Vec<SpecPivotField>,
    pub filter: Vec<SpecPivotField>,
    pub data: Vec<SpecPivotField>,
    pub row_grand_totals: bool,
    pub col_grand_totals: bool,
    pub show_drill: bool,
    pub show_row_headers: bool,
    pub show_col_headers: bool,
    pub show_last_column: bool,
    pub classic_layout: bool,
    pub show_row_stripes: bool,
    pub show_col_stripes: bool,
    pub show_error: bool,
    pub style_name: String,
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region SheetSpecification

/// Cell value after classification.
#[derive(Debug, Clone, PartialEq)]
pub enum EnumCellValue {
    /// Missing value; nothing is written.
    None,
    /// Text value.
    String(String),
    /// Numeric value.
    Number(f64),
    /// Boolean value.
    Boolean(bool),
    /// Formula text, including the leading marker.
    Formula(String),
}

/// Raw cell as it appears in `Header`/`Data`.
#[derive(Debug, Clone, PartialEq)]
pub enum EnumRawCell {
    /// `null`: position is left untouched.
    Skip,
    /// `[]`: empty string with the default style.
    Empty,
    /// Bare scalar without a style reference.
    Bare(serde_json::Value),
    /// `[value, style name]`.
    Styled(serde_json::Value, String),
}

/// Zero-based inclusive cell range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SpecCellRange {
    pub row_first: u32,
    pub col_first: u16,
    pub row_last: u32,
    pub col_last: u16,
}

impl SpecCellRange {
    pub fn n_rows(&self) -> u32 {
        self.row_last - self.row_first + 1
    }

    pub fn n_cols(&self) -> u16 {
        self.col_last - self.col_first + 1
    }

    pub fn is_single_cell(&self) -> bool {
        self.row_first == self.row_last && self.col_first == self.col_last
    }
}

/// Pane selection.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SpecPaneSelection {
    pub sq_ref: String,
    pub active_cell: String,
    pub pane: String,
}

/// Freeze/split pane configuration.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SpecPanes {
    pub freeze: bool,
    pub split: bool,
    pub x_split: i64,
    pub y_split: i64,
    pub top_left_cell: String,
    pub active_pane: String,
    pub selection: Vec<SpecPaneSelection>,
}

/// Data validation rule.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SpecDataValidation {
    pub sq_ref: String,
    pub set_range_start: Option<f64>,
    pub set_range_stop: Option<f64>,
    pub input_title: String,
    pub input_body: String,
    pub error_title: String,
    pub error_body: String,
    pub drop_list: Vec<String>,
    pub sqref_drop_list: String,
}

/// Cell note.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SpecComment {
    pub cell: String,
    pub author: String,
    pub paragraph: Vec<SpecRichTextRun>,
}

/// Worksheet table.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SpecTable {
    pub range: String,
    pub name: String,
    pub style_name: String,
    pub show_first_column: bool,
    pub show_last_column: bool,
    pub show_row_stripes: bool,
    pub show_column_stripes: bool,
}

/// Row outline group, 1-based rows.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SpecOutlineRows {
    pub start_row: u64,
    pub end_row: Option<u64>,
    pub outline_level: u64,
    pub hidden: bool,
}

/// Column outline group, by column letters.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SpecOutlineCols {
    pub start_col: String,
    pub end_col: String,
    pub outline_level: u64,
    pub hidden: bool,
}

/// Per-sheet declarative content.
#[derive(Debug, Clone, PartialEq)]
pub struct SpecSheet {
    pub name: String,
    pub header: Vec<Vec<EnumRawCell>>,
    pub data: Vec<Vec<EnumRawCell>>,
    /// Zero-based column index to width.
    pub width: BTreeMap<u16, f64>,
    /// Zero-based row index to height.
    pub height: BTreeMap<u32, f64>,
    pub merge_cells: Vec<SpecCellRange>,
    pub auto_filter: Vec<SpecCellRange>,
    pub panes: Option<SpecPanes>,
    pub data_validation: Vec<SpecDataValidation>,
    pub comment: Vec<SpecComment>,
    pub table: Vec<SpecTable>,
    pub chart: Vec<SpecChartPlacement>,
    pub pivot_table: Vec<SpecPivotTable>,
    pub grouped_row: Vec<SpecOutlineRows>,
    pub grouped_col: Vec<SpecOutlineCols>,
    pub no_style: bool,
    pub visible: bool,
    pub engine: Option<EnumWriteEngine>,
    /// Entries dropped while parsing, surfaced as build warnings.
    pub skipped: Vec<String>,
}

impl SpecSheet {
    /// Empty sheet with default flags.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            header: vec![],
            data: vec![],
            width: BTreeMap::new(),
            height: BTreeMap::new(),
            merge_cells: vec![],
            auto_filter: vec![],
            panes: None,
            data_validation: vec![],
            comment: vec![],
            table: vec![],
            chart: vec![],
            pivot_table: vec![],
            grouped_row: vec![],
            grouped_col: vec![],
            no_style: false,
            visible: true,
            engine: None,
            skipped: vec![],
        }
    }

    /// Header rows followed by data rows, in sheet row order.
    pub fn rows(&self) -> impl Iterator<Item = &Vec<EnumRawCell>> {
        self.header.iter().chain(self.data.iter())
    }

    /// Number of rows occupied by header and data.
    pub fn n_rows(&self) -> usize {
        self.header.len() + self.data.len()
    }

    pub fn has_grouping(&self) -> bool {
        !self.grouped_row.is_empty() || !self.grouped_col.is_empty()
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region ReportSpecification

/// Summary of one written sheet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecSheetReport {
    /// Sheet name in the workbook.
    pub sheet_name: String,
    /// Engine that wrote the sheet.
    pub engine: EnumWriteEngine,
    /// Number of rows written (header plus data).
    pub n_rows_written: usize,
}

/// Per-build report.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SpecXlsxBuildReport {
    /// Sheets in workbook order.
    pub sheets: Vec<SpecSheetReport>,
    /// Number of pivot tables realized.
    pub n_pivot_tables: usize,
    /// Non-fatal warnings.
    pub warnings: Vec<String>,
}

impl SpecXlsxBuildReport {
    /// Add a warning message and log it.
    pub fn warn(&mut self, msg: impl AsRef<str>) {
        log::warn!("{}", msg.as_ref());
        self.warnings.push(msg.as_ref().to_string());
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
