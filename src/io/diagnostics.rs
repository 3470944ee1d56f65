//! JSON export of per-gene fit diagnostics

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::error::Result;
use crate::pipeline::GeneDiagnostics;

/// Write one JSON array entry per gene
pub fn write_diagnostics<P: AsRef<Path>>(path: P, diagnostics: &[GeneDiagnostics]) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut writer, diagnostics)?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    Ok(())
}
