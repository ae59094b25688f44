// Writing command results as CSV, XLSX or a JSON envelope

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use clap::ValueEnum;
use deltagrid_io::export::write_csv_to;
use deltagrid_io::{write_xlsx, FlatTable};
use serde::Serialize;

use crate::CliError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Csv,
    Xlsx,
    Json,
}

/// Explicit `--format` wins; otherwise the `-o` extension decides, and CSV
/// is the fallback. XLSX needs a file.
pub fn resolve_format(explicit: Option<OutputFormat>, path: Option<&Path>) -> Result<OutputFormat, CliError> {
    let format = explicit.unwrap_or_else(|| {
        match path
            .and_then(|p| p.extension())
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .as_deref()
        {
            Some("xlsx") => OutputFormat::Xlsx,
            Some("json") => OutputFormat::Json,
            _ => OutputFormat::Csv,
        }
    });
    if format == OutputFormat::Xlsx && path.is_none() {
        return Err(CliError::usage("xlsx output cannot go to stdout").with_hint("pass -o FILE.xlsx"));
    }
    Ok(format)
}

#[derive(Serialize)]
struct Meta<'a> {
    tool: &'static str,
    command: &'a str,
    engine_version: &'static str,
    generated_at: String,
}

#[derive(Serialize)]
struct Envelope<'a, T: Serialize> {
    meta: Meta<'a>,
    result: &'a T,
}

/// Write one command's result. `table` feeds CSV and XLSX, `result` feeds
/// JSON.
pub fn emit<T: Serialize>(
    command: &str,
    table: &FlatTable,
    result: &T,
    format: OutputFormat,
    path: Option<&Path>,
) -> Result<(), CliError> {
    let target = path.map_or_else(|| "stdout".to_string(), |p| p.display().to_string());
    let fail = |e: &dyn std::fmt::Display| CliError::output(format!("cannot write {target}: {e}"));

    match format {
        OutputFormat::Csv => match path {
            Some(p) => {
                let file = File::create(p).map_err(|e| fail(&e))?;
                write_csv_to(table, BufWriter::new(file)).map_err(|e| fail(&e))
            }
            None => write_csv_to(table, io::stdout().lock()).map_err(|e| fail(&e)),
        },
        OutputFormat::Xlsx => {
            let p = path.ok_or_else(|| CliError::usage("xlsx output cannot go to stdout"))?;
            write_xlsx(table, p, command).map_err(|e| fail(&e))
        }
        OutputFormat::Json => {
            let envelope = Envelope {
                meta: Meta {
                    tool: "dgrid",
                    command,
                    engine_version: env!("CARGO_PKG_VERSION"),
                    generated_at: chrono::Utc::now().to_rfc3339(),
                },
                result,
            };
            let writer: Box<dyn Write> = match path {
                Some(p) => Box::new(BufWriter::new(File::create(p).map_err(|e| fail(&e))?)),
                None => Box::new(io::stdout().lock()),
            };
            write_json(writer, &envelope).map_err(|e| fail(&e))
        }
    }
}

fn write_json<W: Write, T: Serialize>(mut writer: W, value: &T) -> io::Result<()> {
    serde_json::to_writer_pretty(&mut writer, value)?;
    writeln!(writer)?;
    writer.flush()
}
