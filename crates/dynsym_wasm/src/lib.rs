//! WebAssembly bindings for `dynsym_core`.

mod model;

pub use model::WasmModel;
