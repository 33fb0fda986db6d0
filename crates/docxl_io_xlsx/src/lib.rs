//! `docxl_io_xlsx` v1:
//! JSON document to xlsx workbook to base64 text.
//!
//! Architecture:
//! - `conf`    : constants and default build options
//! - `error`   : error taxonomy
//! - `spec`    : typed document models and the build report
//! - `util`    : pure helpers (cell references, sheet names, password hashes)
//! - `mapper`  : declarative JSON-to-spec field mapper
//! - `style`   : style builders and the per-build style registry
//! - `cell`    : cell classification, resolution and writes
//! - `chart`   : chart builders and chart insertion
//! - `pivot`   : pivot builders and pivot part generation
//! - `sheet`   : sheet spec parsing and sheet-level features
//! - `engine`  : streaming and random-access write engines, committed ledger
//! - `package` : saved-package rewrite
//! - `writer`  : document orchestrator
//! - `ffi`     : C call boundary
pub mod cell;
pub mod chart;
pub mod conf;
pub mod engine;
pub mod error;
pub mod ffi;
pub mod mapper;
pub mod package;
pub mod pivot;
pub mod sheet;
pub mod spec;
pub mod style;
pub mod util;
pub mod writer;

pub use conf::{
    C_DEFAULT_SHEET_NAME, C_DEFAULT_STYLE, N_LEN_EXCEL_SHEET_NAME_MAX, N_NCOLS_EXCEL_MAX,
    N_NROWS_EXCEL_MAX, SpecXlsxBuildOptions, derive_default_xlsx_build_options,
};
pub use engine::{
    RandomAccessSheetWriter, RandomAccessWriter, SheetWriter, StreamingSheetWriter,
    WorkbookLedger,
};
pub use error::{Result, XlsxBuildError};
pub use spec::{
    EnumWriteEngine, SpecDocument, SpecSheet, SpecSheetReport, SpecXlsxBuildReport,
};
pub use style::{StyleHandle, StyleRegistry};
pub use writer::{XlsxDocumentWriter, build_workbook_base64, parse_document, plan_sheet_slots};
