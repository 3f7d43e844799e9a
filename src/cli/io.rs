//! JSON output for the CLI
//!
//! One JSON object per line on stdout, UTF-8.

use std::io::{self, Write};

use serde_json::Value;

use super::errors::CliResult;

fn envelope(data: Value) -> Value {
    serde_json::json!({
        "status": "ok",
        "data": data
    })
}

/// Write a success response to stdout
pub fn write_response(data: Value) -> CliResult<()> {
    let mut stdout = io::stdout().lock();
    write_response_to(&mut stdout, data)
}

/// Write a success response to any writer
pub fn write_response_to<W: Write>(out: &mut W, data: Value) -> CliResult<()> {
    serde_json::to_writer(&mut *out, &envelope(data))?;
    writeln!(out)?;
    out.flush()?;
    Ok(())
}
