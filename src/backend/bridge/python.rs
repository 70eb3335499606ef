//! CPython host for the embedded bridge.
//!
//! The interpreter is process-wide: it is initialized on first use and never
//! finalized. Call results are converted to JSON inside the interpreter so
//! the bridge only ever sees `serde_json::Value`s; health calls skip the
//! conversion since only their success matters.

use std::sync::Once;

use pyo3::exceptions::PyAttributeError;
use pyo3::prelude::*;
use pyo3::types::{PyDict, PyList, PyModule, PyString};
use serde_json::Value;

use super::{LoadedModule, ModuleHost, RuntimeEnvironment};
use crate::backend::error::BridgeError;

static INTERPRETER: Once = Once::new();

/// Embedded CPython
#[derive(Debug, Default, Clone, Copy)]
pub struct PythonHost;

impl ModuleHost for PythonHost {
    fn initialize(&self, env: &RuntimeEnvironment) -> Result<(), BridgeError> {
        INTERPRETER.call_once(|| {
            log::info!("[Bridge] Initializing Python interpreter");
            pyo3::prepare_freethreaded_python();
        });

        Python::with_gil(|py| -> PyResult<()> {
            let version = py.version();
            log::info!("[Bridge] Python {}", version.lines().next().unwrap_or(version));

            let sys = py.import_bound("sys")?;
            let path = sys.getattr("path")?.downcast_into::<PyList>()?;
            for dir in &env.library_paths {
                let entry = dir.to_string_lossy();
                if !path.contains(entry.as_ref())? {
                    log::info!("[Bridge] Adding {} to sys.path", entry);
                    path.append(entry.as_ref())?;
                }
            }
            Ok(())
        })
        .map_err(|e| BridgeError::Init(e.to_string()))
    }

    fn load_module(&self, name: &str) -> Result<Box<dyn LoadedModule>, BridgeError> {
        Python::with_gil(|py| match PyModule::import_bound(py, name) {
            Ok(module) => Ok(Box::new(PythonModule {
                module: module.unbind(),
            }) as Box<dyn LoadedModule>),
            Err(e) => {
                let reason = describe(py, &e);
                Err(BridgeError::ModuleLoad {
                    module: name.to_string(),
                    reason,
                })
            }
        })
    }
}

struct PythonModule {
    module: Py<PyModule>,
}

impl PythonModule {
    /// Call `entry` with no arguments
    fn call_entry<'py>(&self, py: Python<'py>, entry: &str) -> Result<Bound<'py, PyAny>, BridgeError> {
        let module = self.module.bind(py);

        let func = match module.getattr(entry) {
            Ok(func) if func.is_callable() => func,
            Ok(_) => return Err(BridgeError::EntryMissing(entry.to_string())),
            Err(e) if e.is_instance_of::<PyAttributeError>(py) => {
                return Err(BridgeError::EntryMissing(entry.to_string()))
            }
            Err(e) => {
                return Err(BridgeError::CallFailed {
                    entry: entry.to_string(),
                    reason: describe(py, &e),
                })
            }
        };

        func.call0().map_err(|e| BridgeError::CallFailed {
            entry: entry.to_string(),
            reason: describe(py, &e),
        })
    }
}

impl LoadedModule for PythonModule {
    fn call(&self, entry: &str) -> Result<Value, BridgeError> {
        Python::with_gil(|py| {
            let result = self.call_entry(py, entry)?;
            to_json(py, &result).map_err(|e| BridgeError::BadShape(describe(py, &e)))
        })
    }

    fn invoke(&self, entry: &str) -> Result<(), BridgeError> {
        Python::with_gil(|py| self.call_entry(py, entry).map(|_| ()))
    }
}

/// `json.dumps(value, default=str)` parsed back into a `Value`
fn to_json(py: Python<'_>, value: &Bound<'_, PyAny>) -> PyResult<Value> {
    let json = py.import_bound("json")?;
    let kwargs = PyDict::new_bound(py);
    kwargs.set_item("default", py.get_type_bound::<PyString>())?;

    let text: String = json
        .call_method("dumps", (value,), Some(&kwargs))?
        .extract()?;

    serde_json::from_str(&text)
        .map_err(|e| pyo3::exceptions::PyValueError::new_err(e.to_string()))
}

/// Exception text with its type, e.g. `ModuleNotFoundError: No module named 'main'`
fn describe(py: Python<'_>, err: &PyErr) -> String {
    let kind = err
        .get_type_bound(py)
        .qualname()
        .map(|n| n.to_string())
        .unwrap_or_else(|_| "Exception".to_string());
    format!("{}: {}", kind, err.value_bound(py))
}
