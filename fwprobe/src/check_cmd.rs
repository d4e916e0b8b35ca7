use anyhow::{bail, Context, Result};
use fwprobe::check::{build_check_report, render_check_text};

use crate::cli::{CheckArgs, OutputFormat};

pub fn run_check(args: CheckArgs) -> Result<()> {
    let report = build_check_report(&args.model)
        .with_context(|| format!("failed to load {}", args.model.display()))?;

    match args.format {
        OutputFormat::Text => println!("{}", render_check_text(&report)),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
    }

    if report.errors > 0 {
        bail!("check failed: {} errors", report.errors);
    }
    if args.strict && report.warnings > 0 {
        bail!("check failed in strict mode: {} warnings", report.warnings);
    }
    Ok(())
}
