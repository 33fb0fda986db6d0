use docxl_io_xlsx::conf::derive_default_xlsx_build_options;
use docxl_io_xlsx::{
    EnumWriteEngine, XlsxBuildError, XlsxDocumentWriter as RsXlsxDocumentWriter,
    build_workbook_base64,
};
use pyo3::exceptions::{PyRuntimeError, PyValueError};
use pyo3::prelude::*;
use pyo3::types::{PyDict, PyList, PyTuple};

const N_BRIDGE_ABI_VERSION: u64 = 1;
const C_BRIDGE_CONTRACT_VERSION: &str = "docxl.xlsx.document.v1";

fn derive_py_err(err: XlsxBuildError) -> PyErr {
    if err.is_input_error() {
        PyValueError::new_err(err.to_string())
    } else {
        PyRuntimeError::new_err(err.to_string())
    }
}

#[pyclass(name = "XlsxDocumentWriter")]
struct PyXlsxDocumentWriter {
    inner: RsXlsxDocumentWriter,
    if_built: bool,
}

#[pymethods]
impl PyXlsxDocumentWriter {
    #[new]
    #[pyo3(signature = (engine = None, if_strict_grouping = true))]
    fn new(engine: Option<&str>, if_strict_grouping: bool) -> PyResult<Self> {
        let mut options = derive_default_xlsx_build_options();
        if let Some(val) = engine {
            options.engine_default = EnumWriteEngine::parse(val)
                .ok_or_else(|| PyValueError::new_err(format!("Unknown writer engine `{val}`.")))?;
        }
        options.if_strict_grouping = if_strict_grouping;
        Ok(Self {
            inner: RsXlsxDocumentWriter::new(options),
            if_built: false,
        })
    }

    /// Build the document and return base64 xlsx text. One build per writer.
    fn build(&mut self, py: Python<'_>, text: String) -> PyResult<String> {
        if self.if_built {
            return Err(PyRuntimeError::new_err(
                "Writer already built a workbook; create a new one.",
            ));
        }
        self.if_built = true;
        let inner = &mut self.inner;
        py.allow_threads(|| inner.build_base64(&text))
            .map_err(derive_py_err)
    }

    fn report(&self, py: Python<'_>) -> PyResult<Py<PyAny>> {
        let report = self.inner.report();

        let mut l_sheet_obj = Vec::with_capacity(report.sheets.len());
        for sheet in &report.sheets {
            let tup_sheet = PyTuple::new(
                py,
                [
                    sheet.sheet_name.clone().into_pyobject(py)?.into_any(),
                    sheet.engine.as_str().into_pyobject(py)?.into_any(),
                    sheet.n_rows_written.into_pyobject(py)?.into_any(),
                ],
            )?;
            l_sheet_obj.push(tup_sheet);
        }

        let dict_report = PyDict::new(py);
        dict_report.set_item("sheets", PyList::new(py, l_sheet_obj)?)?;
        dict_report.set_item("n_pivot_tables", report.n_pivot_tables)?;
        dict_report.set_item("warnings", report.warnings)?;
        Ok(dict_report.into_any().unbind())
    }
}

/// Build a workbook from document text and return base64 xlsx text.
#[pyfunction]
fn build_workbook(py: Python<'_>, text: String) -> PyResult<String> {
    py.allow_threads(|| build_workbook_base64(&text))
        .map_err(derive_py_err)
}

#[pymodule]
fn _docxl_io_xlsx_rs(_py: Python<'_>, module: &Bound<'_, PyModule>) -> PyResult<()> {
    module.add_class::<PyXlsxDocumentWriter>()?;
    module.add_function(wrap_pyfunction!(build_workbook, module)?)?;
    module.add("__bridge_abi__", N_BRIDGE_ABI_VERSION)?;
    module.add("__bridge_contract__", C_BRIDGE_CONTRACT_VERSION)?;
    Ok(())
}
