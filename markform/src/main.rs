//! Fill and check typed markdown forms.
//!
//! Thin adapter over the library: every command reads a document, runs one
//! engine operation, and reports through stdout and a stable exit code.

use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use serde::Serialize;

use markform::agents::mock::MockAgent;
use markform::core::export::value_export;
use markform::core::inspect::{InspectOptions, InspectResult, inspect};
use markform::core::patch::{ApplyStatus, apply_patches};
use markform::exit_codes;
use markform::fill::run_fill;
use markform::io::config::resolve_config;
use markform::io::document_store::{parse_patches, read_document, read_patches, write_document};
use markform::io::fill_record::{FillRecord, FillRecordInput, fill_record_path, write_fill_record};
use markform::logging;

#[derive(Parser)]
#[command(name = "markform", version, about = "Typed, fillable forms in markdown")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List open issues; exits 2 while required fields are unresolved.
    Inspect {
        path: PathBuf,
        /// Only fields owned by these roles (comma-separated).
        #[arg(long, value_delimiter = ',')]
        roles: Vec<String>,
        #[arg(long)]
        json: bool,
    },
    /// Apply a JSON patch batch all-or-nothing; exits 3 if it is rejected.
    Apply {
        path: PathBuf,
        /// Patch file, or `-` for stdin.
        #[arg(short, long)]
        patches: String,
        /// Print the result instead of writing it.
        #[arg(long)]
        dry_run: bool,
        /// Write here instead of replacing the input.
        #[arg(short, long)]
        output: Option<PathBuf>,
        #[arg(long)]
        json: bool,
    },
    /// Fill a form from a reference document with the mock delegate.
    Fill {
        path: PathBuf,
        /// Filled document to copy answers from.
        #[arg(long)]
        reference: PathBuf,
        /// Harness config (TOML); overrides front-matter hints.
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long, value_delimiter = ',')]
        roles: Vec<String>,
        #[arg(long)]
        concurrent: bool,
        /// Write a `<doc>.fill.json` record next to the output.
        #[arg(long)]
        record: bool,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Rewrite every field body in canonical form.
    Format {
        path: PathBuf,
        /// Exit 1 instead of writing when the file is not canonical.
        #[arg(long)]
        check: bool,
    },
    /// Print answered values as JSON.
    Export { path: PathBuf },
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Inspect { path, roles, json } => cmd_inspect(&path, &roles, json),
        Command::Apply {
            path,
            patches,
            dry_run,
            output,
            json,
        } => cmd_apply(&path, &patches, dry_run, output.as_deref(), json),
        Command::Fill {
            path,
            reference,
            config,
            roles,
            concurrent,
            record,
            output,
        } => cmd_fill(&FillArgs {
            path: &path,
            reference: &reference,
            config: config.as_deref(),
            roles: &roles,
            concurrent,
            record,
            output: output.as_deref(),
        }),
        Command::Format { path, check } => cmd_format(&path, check),
        Command::Export { path } => cmd_export(&path),
    }
}

fn cmd_inspect(path: &Path, roles: &[String], json: bool) -> Result<i32> {
    let (_, doc) = read_document(path)?;
    let result = inspect(&doc, &InspectOptions::for_roles(roles));
    if json {
        print_json(&result)?;
    } else {
        print_inspection(&doc.form().id, &result);
    }
    Ok(completion_code(&result))
}

fn cmd_apply(
    path: &Path,
    patches: &str,
    dry_run: bool,
    output: Option<&Path>,
    json: bool,
) -> Result<i32> {
    let (_, mut doc) = read_document(path)?;
    let batch = if patches == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("read patches from stdin")?;
        parse_patches(&buf)?
    } else {
        read_patches(Path::new(patches))?
    };

    let outcome = apply_patches(&mut doc, &batch);
    if json {
        print_json(&outcome)?;
    }
    if outcome.status == ApplyStatus::Rejected {
        if !json {
            for rejection in &outcome.rejections {
                println!("rejected {rejection}");
            }
        }
        return Ok(exit_codes::REJECTED);
    }

    if dry_run {
        if !json {
            print!("{}", doc.serialize());
        }
    } else {
        write_document(output.unwrap_or(path), &doc)?;
        if !json {
            println!("applied {} patches", outcome.applied);
        }
    }
    Ok(exit_codes::OK)
}

struct FillArgs<'a> {
    path: &'a Path,
    reference: &'a Path,
    config: Option<&'a Path>,
    roles: &'a [String],
    concurrent: bool,
    record: bool,
    output: Option<&'a Path>,
}

fn cmd_fill(args: &FillArgs<'_>) -> Result<i32> {
    let (before, mut doc) = read_document(args.path)?;
    let (_, reference) = read_document(args.reference).context("load reference document")?;

    let mut config = resolve_config(&doc.form().harness, args.config)?;
    if !args.roles.is_empty() {
        config.target_roles = args.roles.to_vec();
    }
    if args.concurrent {
        config.concurrent = true;
    }

    let agent = MockAgent::new(reference);
    let started_at = Utc::now();
    let outcome = run_fill(&mut doc, &agent, &config, |turn| {
        println!(
            "turn {} {}: {:?}, {} of {} patches applied",
            turn.turn,
            turn.execution_id,
            turn.status,
            turn.applied,
            turn.patches.len()
        );
    })?;
    let finished_at = Utc::now();

    let target = args.output.unwrap_or(args.path);
    let after = write_document(target, &doc)?;
    if args.record {
        let record = FillRecord::new(&FillRecordInput {
            form_id: &doc.form().id,
            started_at,
            finished_at,
            text_before: &before,
            text_after: &after,
            outcome: &outcome,
        });
        write_fill_record(&fill_record_path(target), &record)?;
    }

    println!("{}", outcome.termination);
    Ok(if outcome.termination.is_complete() {
        exit_codes::OK
    } else {
        exit_codes::INCOMPLETE
    })
}

fn cmd_format(path: &Path, check: bool) -> Result<i32> {
    let (text, mut doc) = read_document(path)?;
    doc.normalize_bodies();
    let canonical = doc.serialize();
    if canonical == text {
        return Ok(exit_codes::OK);
    }
    if check {
        println!("{} is not canonically formatted", path.display());
        return Ok(exit_codes::INVALID);
    }
    write_document(path, &doc)?;
    println!("formatted {}", path.display());
    Ok(exit_codes::OK)
}

fn cmd_export(path: &Path) -> Result<i32> {
    let (_, doc) = read_document(path)?;
    print_json(&value_export(&doc))?;
    Ok(exit_codes::OK)
}

fn completion_code(result: &InspectResult) -> i32 {
    if result.complete {
        exit_codes::OK
    } else {
        exit_codes::INCOMPLETE
    }
}

fn print_inspection(form_id: &str, result: &InspectResult) {
    println!(
        "{form_id}: {:?}, {}/{} required resolved",
        result.state, result.summary.resolved_required, result.summary.required
    );
    for issue in &result.issues {
        println!(
            "  p{} {:?} {} [{}] {}",
            issue.priority,
            issue.severity,
            issue.field_id(),
            issue.category.as_str(),
            issue.message
        );
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let payload = serde_json::to_string_pretty(value).context("serialize json")?;
    println!("{payload}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_inspect_roles() {
        let cli = Cli::parse_from(["markform", "inspect", "a.form.md", "--roles", "user,agent"]);
        let Command::Inspect { roles, json, .. } = cli.command else {
            panic!("expected inspect");
        };
        assert_eq!(roles, vec!["user".to_string(), "agent".to_string()]);
        assert!(!json);
    }

    #[test]
    fn parse_fill_flags() {
        let cli = Cli::parse_from([
            "markform",
            "fill",
            "a.form.md",
            "--reference",
            "b.form.md",
            "--concurrent",
            "--record",
        ]);
        let Command::Fill {
            reference,
            concurrent,
            record,
            output,
            ..
        } = cli.command
        else {
            panic!("expected fill");
        };
        assert_eq!(reference, PathBuf::from("b.form.md"));
        assert!(concurrent && record);
        assert!(output.is_none());
    }
}
