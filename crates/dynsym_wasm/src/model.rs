//! Linearized model handle exposed to JavaScript.

use dynsym_core::evaluator::LookupPolicy;
use dynsym_core::linearize::{read_model, LinearModel, LinearizeSettings};
use nalgebra::DMatrix;
use serde::Serialize;
use serde_wasm_bindgen::to_value;
use wasm_bindgen::prelude::*;

#[wasm_bindgen]
pub struct WasmModel {
    pub(crate) model: LinearModel,
}

#[derive(Debug, Serialize, PartialEq)]
pub(crate) struct MatrixPayload {
    pub rows: usize,
    pub cols: usize,
    /// Row-major entries.
    pub data: Vec<f64>,
}

impl From<&DMatrix<f64>> for MatrixPayload {
    fn from(matrix: &DMatrix<f64>) -> Self {
        let (rows, cols) = matrix.shape();
        let data = matrix.transpose().as_slice().to_vec();
        Self { rows, cols, data }
    }
}

#[derive(Serialize)]
struct MatricesPayload {
    a: MatrixPayload,
    b: MatrixPayload,
    c: MatrixPayload,
    d: MatrixPayload,
}

#[derive(Serialize)]
struct DiagnosticPayload {
    message: String,
    line: usize,
    column: usize,
}

#[wasm_bindgen]
impl WasmModel {
    #[wasm_bindgen(constructor)]
    pub fn new(source: &str, lax: bool) -> Result<WasmModel, JsValue> {
        console_error_panic_hook::set_once();

        let policy = if lax {
            LookupPolicy::Lax
        } else {
            LookupPolicy::Strict
        };
        let model = read_model(source, LinearizeSettings { policy })
            .map_err(|e| JsValue::from_str(&format!("Model error: {:#}", e)))?;
        Ok(WasmModel { model })
    }

    pub fn endogenous(&self) -> Vec<String> {
        self.model.endogenous.clone()
    }

    pub fn exogenous(&self) -> Vec<String> {
        self.model.exogenous.clone()
    }

    pub fn steady_residuals(&self) -> Vec<f64> {
        self.model.steady_residuals.clone()
    }

    pub fn steady_state(&self) -> Vec<f64> {
        let steady = &self.model.steady_state;
        steady
            .endogenous
            .iter()
            .chain(&steady.exogenous)
            .copied()
            .collect()
    }

    pub fn matrices(&self) -> Result<JsValue, JsValue> {
        let m = &self.model.matrices;
        let payload = MatricesPayload {
            a: (&m.a).into(),
            b: (&m.b).into(),
            c: (&m.c).into(),
            d: (&m.d).into(),
        };
        to_value(&payload).map_err(|e| JsValue::from_str(&format!("Serialization error: {}", e)))
    }

    pub fn diagnostics(&self) -> Result<JsValue, JsValue> {
        let payload: Vec<DiagnosticPayload> = self
            .model
            .diagnostics
            .iter()
            .map(|d| DiagnosticPayload {
                message: d.message.clone(),
                line: d.location.line,
                column: d.location.column,
            })
            .collect();
        to_value(&payload).map_err(|e| JsValue::from_str(&format!("Serialization error: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matrices_flatten_row_major() {
        let matrix = DMatrix::from_row_slice(2, 3, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let payload = MatrixPayload::from(&matrix);
        assert_eq!(payload.rows, 2);
        assert_eq!(payload.cols, 3);
        assert_eq!(payload.data, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn empty_exogenous_block_keeps_its_shape() {
        let payload = MatrixPayload::from(&DMatrix::<f64>::zeros(2, 0));
        assert_eq!((payload.rows, payload.cols), (2, 0));
        assert!(payload.data.is_empty());
    }
}
