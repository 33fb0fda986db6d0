//! XLSX constants and default presets.

/// Excel worksheet maximum row count.
pub const N_NROWS_EXCEL_MAX: usize = 1_048_576;
/// Excel worksheet maximum column count.
pub const N_NCOLS_EXCEL_MAX: usize = 16_384;
/// Excel sheet name maximum length.
pub const N_LEN_EXCEL_SHEET_NAME_MAX: usize = 31;
/// Deepest outline level Excel accepts for grouped rows/columns.
pub const N_OUTLINE_LEVEL_MAX: u8 = 7;

/// Name of the workbook's implicit first sheet.
pub const C_DEFAULT_SHEET_NAME: &str = "Sheet1";
/// Style name used for empty cells and unstyled bare values.
pub const C_DEFAULT_STYLE: &str = "DEFAULT_STYLE";
/// Prefix marking a string cell as a formula.
pub const C_FORMULA_MARKER: &str = "=";

/// Default chart size in pixels when `Dimension` is absent.
pub const N_CHART_WIDTH_DEFAULT: u32 = 480;
pub const N_CHART_HEIGHT_DEFAULT: u32 = 260;
/// Default bubble scale and doughnut hole size.
pub const N_CHART_BUBBLE_SIZE_DEFAULT: f64 = 100.0;
pub const N_CHART_HOLE_SIZE_DEFAULT: f64 = 75.0;

/// Default pivot table style.
pub const C_PIVOT_STYLE_DEFAULT: &str = "PivotStyleLight16";

/// Iteration count for salted workbook password hashes.
pub const N_PROTECTION_SPIN_COUNT: u32 = 100_000;
/// Salt length for salted workbook password hashes.
pub const N_PROTECTION_SALT_LEN: usize = 16;

/// Top-level document keys.
pub const C_KEY_STYLE: &str = "style";
pub const C_KEY_FILE_PROPS: &str = "file_props";
pub const C_KEY_PROTECTION: &str = "protection";
pub const C_KEY_SHEET_ORDER: &str = "sheet_order";
pub const C_KEY_CONTENT: &str = "content";
pub const C_KEY_ENGINE: &str = "engine";

/// Per-build options that are not part of the document itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpecXlsxBuildOptions {
    /// Engine used when neither the document nor the sheet selects one.
    pub engine_default: crate::spec::EnumWriteEngine,
    /// Reject grouping on streaming sheets instead of dropping it with a warning.
    pub if_strict_grouping: bool,
}

impl Default for SpecXlsxBuildOptions {
    fn default() -> Self {
        Self {
            engine_default: crate::spec::EnumWriteEngine::Streaming,
            if_strict_grouping: true,
        }
    }
}

/// Build default options.
pub fn derive_default_xlsx_build_options() -> SpecXlsxBuildOptions {
    SpecXlsxBuildOptions::default()
}
