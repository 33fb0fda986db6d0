//! Error taxonomy for one workbook build.
//!
//! Parse and schema errors abort before the workbook is touched. Engine errors
//! raised while writing cell data abort the build; engine errors raised by
//! cosmetic sub-features are downgraded to report warnings by the caller.

use rust_xlsxwriter::XlsxError;
use thiserror::Error;

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, XlsxBuildError>;

/// Failure raised while turning a document into a workbook.
#[derive(Debug, Error)]
pub enum XlsxBuildError {
    /// The input text is not a valid JSON document.
    #[error("failed to parse document: {0}")]
    Parse(#[from] serde_json::Error),

    /// A declared key holds a value of the wrong kind.
    #[error("schema error at `{path}`: expected {expected}, found {found}")]
    Schema {
        path: String,
        expected: &'static str,
        found: &'static str,
    },

    /// A required key is absent.
    #[error("schema error: missing required key `{0}`")]
    MissingKey(String),

    /// A value has the right kind but is outside the accepted vocabulary.
    #[error("invalid value at `{path}`: {reason}")]
    InvalidValue { path: String, reason: String },

    /// `sheet_order` names a sheet that is absent from `content`.
    #[error("sheet `{0}` is listed in sheet_order but missing from content")]
    UnknownSheet(String),

    /// A cell references a style name that was never registered.
    #[error("style `{0}` is not registered")]
    UnknownStyle(String),

    /// A writer call was issued out of its allowed order.
    #[error("sheet `{sheet}`: {op} is not allowed after {state}")]
    EngineOrder {
        sheet: String,
        op: &'static str,
        state: String,
    },

    /// The spreadsheet encoder rejected an operation.
    #[error("xlsx write error: {0}")]
    Engine(#[from] XlsxError),

    /// The saved package could not be rewritten.
    #[error("package error: {0}")]
    Package(String),

    /// Zip container error while rewriting the package.
    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// XML error while reading a package part.
    #[error("xml error: {0}")]
    Xml(#[from] quick_xml::Error),

    /// I/O error on an in-memory buffer.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl XlsxBuildError {
    /// Build a wrong-kind schema error for `path`.
    pub fn schema(path: impl Into<String>, expected: &'static str, found: &serde_json::Value) -> Self {
        XlsxBuildError::Schema {
            path: path.into(),
            expected,
            found: derive_json_kind(found),
        }
    }

    /// Build an out-of-vocabulary error for `path`.
    pub fn invalid(path: impl Into<String>, reason: impl Into<String>) -> Self {
        XlsxBuildError::InvalidValue {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Whether this error belongs to the input-validation class.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            XlsxBuildError::Parse(_)
                | XlsxBuildError::Schema { .. }
                | XlsxBuildError::MissingKey(_)
                | XlsxBuildError::InvalidValue { .. }
                | XlsxBuildError::UnknownSheet(_)
                | XlsxBuildError::UnknownStyle(_)
        )
    }
}

/// Name the JSON kind of `value` for error messages.
pub fn derive_json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}
