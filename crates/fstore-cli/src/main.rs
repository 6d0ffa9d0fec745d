#![forbid(unsafe_code)]

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use fstore_fsck::{check_files, CheckConfig, InputFile, Severity};
use fstore_vfs::UnixFile;
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Offline consistency checker for FrankenStore database files.
///
/// Reads every on-disk structure of the given serializer files, verifies
/// every invariant, and prints one line per finding. Nothing is ever
/// written. Exit status 0 means no errors were found.
#[derive(Parser)]
#[command(name = "fstore-fsck", version)]
struct Cli {
    /// The database's data files, in serializer order.
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// The database's metadata file, if it has one.
    #[arg(long)]
    metadata: Option<PathBuf>,

    /// Emit the report as JSON instead of text.
    #[arg(long)]
    json: bool,

    /// Scan but do not replay the diff log when reading blocks.
    #[arg(long)]
    ignore_diff_log: bool,

    /// Print the files' format version and exit.
    #[arg(long)]
    file_version: bool,

    /// Print the engine flags that would recreate this database's
    /// geometry, and exit.
    #[arg(long)]
    command_line: bool,
}

fn open_inputs(cli: &Cli) -> Result<(Vec<InputFile>, Option<InputFile>)> {
    let mut files = Vec::with_capacity(cli.files.len());
    for path in &cli.files {
        let file = UnixFile::open(path)
            .with_context(|| format!("opening '{}'", path.display()))?;
        files.push(InputFile::new(path.display().to_string(), Arc::new(file)));
    }
    let metadata = match &cli.metadata {
        Some(path) => {
            let file = UnixFile::open(path)
                .with_context(|| format!("opening '{}'", path.display()))?;
            Some(InputFile::new(path.display().to_string(), Arc::new(file)))
        }
        None => None,
    };
    Ok((files, metadata))
}

fn run(cli: &Cli) -> Result<bool> {
    let (files, metadata) = open_inputs(cli)?;

    if cli.file_version {
        let version = fstore_fsck::check::extract_version(&*files[0].file)
            .context("could not load the first block of the file")?;
        println!("VERSION: {version}");
        return Ok(true);
    }

    if cli.command_line {
        let flags = fstore_fsck::check::extract_creation_flags(&files, metadata.as_ref())
            .context("files are too damaged to reconstruct their creation flags")?;
        println!("FLAGS: {flags}");
        return Ok(true);
    }

    let config = CheckConfig {
        ignore_diff_log: cli.ignore_diff_log,
    };
    let report = check_files(&files, metadata.as_ref(), &config);
    debug!(
        findings = report.diagnostics.len(),
        errors = report.count(Severity::Error),
        "check finished"
    );

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        for diagnostic in &report.diagnostics {
            println!("{diagnostic}");
        }
        let errors = report.count(Severity::Error);
        if errors == 0 {
            println!("fsck: no errors found");
        } else {
            println!("fsck: {errors} error(s) found");
        }
    }
    Ok(!report.has_errors())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(&cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(err) => {
            eprintln!("fstore-fsck: {err:#}");
            ExitCode::from(2)
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn at_least_one_file_required() {
        assert!(Cli::try_parse_from(["fstore-fsck"]).is_err());
        let cli = Cli::try_parse_from(["fstore-fsck", "data_0", "--json"]).unwrap();
        assert_eq!(cli.files.len(), 1);
        assert!(cli.json);
    }
}
