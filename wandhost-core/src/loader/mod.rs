//! Loader utilities for wandhost-core.
//!
//! Responsibilities:
//! - Detect whether the provided guest bytes are a `.wasm` binary or `.wat` text.
//! - If it looks like WAT, convert it to WASM bytes (via the `wat` crate).
//! - Compile a wasmtime `Module` from the resulting WASM bytes.
//!
//! libretro frontends and the desktop CLI both hand us raw bytes, and file extensions are
//! unreliable, so we sniff the bytes themselves.

use thiserror::Error;
use wasmtime::{Engine, Module};

#[derive(Debug, Error)]
pub enum LoadError {
    /// The input was empty or otherwise not recognized as WASM/WAT.
    #[error("unrecognized guest format (expected wasm or wat)")]
    UnrecognizedFormat,
    #[error("failed to parse WAT: {0}")]
    WatParseFailed(#[from] wat::Error),
    #[error("failed to compile WASM module: {0:#}")]
    CompileFailed(anyhow::Error),
}

/// What kind of module the loader inferred from the bytes.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum DetectedFormat {
    Wasm,
    Wat,
}

/// Result of normalizing (detecting + possibly converting) the input.
#[derive(Clone, Debug)]
pub struct Detected {
    pub format: DetectedFormat,
    /// Always valid WASM bytes (for WASM/WAT inputs).
    pub wasm_bytes: Vec<u8>,
}

/// Detect, convert WAT if needed, compile.
pub fn compile_module(engine: &Engine, guest_bytes: &[u8]) -> Result<Module, LoadError> {
    let Detected { format, wasm_bytes } = normalize_to_wasm(guest_bytes)?;
    log::debug!("compiling {format:?} guest ({} wasm bytes)", wasm_bytes.len());
    Module::new(engine, &wasm_bytes).map_err(LoadError::CompileFailed)
}

/// Detect format and normalize to valid WASM bytes.
pub fn normalize_to_wasm(guest_bytes: &[u8]) -> Result<Detected, LoadError> {
    let format = detect_format(guest_bytes).ok_or(LoadError::UnrecognizedFormat)?;

    let wasm_bytes = match format {
        DetectedFormat::Wasm => guest_bytes.to_vec(),
        DetectedFormat::Wat => wat::parse_bytes(guest_bytes)?.into_owned(),
    };
    Ok(Detected { format, wasm_bytes })
}

/// Best-effort detection.
///
/// - If the first 4 bytes are `\0asm`, treat as WASM.
/// - Else, after stripping a UTF-8 BOM and leading whitespace, a `(` means WAT.
pub fn detect_format(bytes: &[u8]) -> Option<DetectedFormat> {
    if bytes.starts_with(b"\0asm") {
        return Some(DetectedFormat::Wasm);
    }

    let text = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    text.iter()
        .find(|b| !matches!(b, b' ' | b'\t' | b'\r' | b'\n'))
        .filter(|b| **b == b'(')
        .map(|_| DetectedFormat::Wat)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_wasm_magic() {
        assert_eq!(
            detect_format(b"\0asm\x01\x00\x00\x00"),
            Some(DetectedFormat::Wasm)
        );
    }

    #[test]
    fn detects_wat_with_whitespace() {
        assert_eq!(detect_format(b"   \n\t(module)"), Some(DetectedFormat::Wat));
    }

    #[test]
    fn detects_wat_with_bom() {
        assert_eq!(
            detect_format(b"\xEF\xBB\xBF(module)"),
            Some(DetectedFormat::Wat)
        );
    }

    #[test]
    fn unrecognized_returns_none() {
        assert_eq!(detect_format(b"not wasm"), None);
        assert_eq!(detect_format(b""), None);
    }

    #[test]
    fn wat_is_converted_and_compiles() {
        let detected = normalize_to_wasm(b"(module (memory (export \"memory\") 1))").unwrap();
        assert_eq!(detected.format, DetectedFormat::Wat);
        assert!(detected.wasm_bytes.starts_with(b"\0asm"));

        let engine = Engine::default();
        assert!(compile_module(&engine, &detected.wasm_bytes).is_ok());
    }

    #[test]
    fn bad_wat_reports_parse_error() {
        assert!(matches!(
            normalize_to_wasm(b"(module (func $f (unknown)))"),
            Err(LoadError::WatParseFailed(_))
        ));
    }
}
