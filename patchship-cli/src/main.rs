use anyhow::Context;
use camino::Utf8PathBuf;
use clap::{ArgAction, Parser, Subcommand};
use patchship_cli::config::{self, ConfigMerger, RunOverrides};
use patchship_core::adapters::{FsWritePort, HttpHealthProbe, ShellRunner};
use patchship_core::pipeline::{RunGuard, RunPorts, plan_steps, run, write_run_artifacts};
use patchship_core::ToolError;
use patchship_edit::{ApplyOptions, apply_rules, combined_diff, validate_rules};
use patchship_render::render_text;
use std::process::ExitCode;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

static RUN_GUARD: RunGuard = RunGuard::new();

#[derive(Debug, Parser)]
#[command(
    name = "patchship",
    version,
    about = "Patch files, commit, push and redeploy in one operator-invoked run."
)]
struct Cli {
    /// Log at debug level (overrides RUST_LOG).
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Patch, commit, push, deploy and health-check.
    Run(RunArgs),
    /// Apply patch rules only and print the diff.
    Patch(PatchArgs),
    /// Parse and validate the config, then print the planned steps.
    CheckConfig(ConfigArgs),
}

#[derive(Debug, Parser)]
struct ConfigArgs {
    /// Config file (.toml, .json, .yaml). Default: <repo_root>/patchship.toml.
    #[arg(long)]
    config: Option<Utf8PathBuf>,

    /// Repository root (default: current directory).
    #[arg(long, default_value = ".")]
    repo_root: Utf8PathBuf,
}

#[derive(Debug, Parser)]
struct RunArgs {
    #[command(flatten)]
    cfg: ConfigArgs,

    /// Write run.json, run.md and patch.diff here.
    #[arg(long)]
    out_dir: Option<Utf8PathBuf>,

    /// Preview patches only; no file, git or deploy changes.
    #[arg(long, default_value_t = false)]
    dry_run: bool,

    /// Back up each patched file before writing it.
    #[arg(long, default_value_t = false)]
    backup: bool,

    /// Stop after the git steps.
    #[arg(long, default_value_t = false)]
    no_deploy: bool,
}

#[derive(Debug, Parser)]
struct PatchArgs {
    #[command(flatten)]
    cfg: ConfigArgs,

    /// Print the diff without writing.
    #[arg(long, default_value_t = false)]
    dry_run: bool,

    /// Back up each patched file before writing it.
    #[arg(long, default_value_t = false)]
    backup: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = if cli.verbose > 0 {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env()
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match real_main(cli.cmd) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            error!("{:?}", e);
            ExitCode::from(1)
        }
    }
}

fn real_main(cmd: Command) -> anyhow::Result<u8> {
    match cmd {
        Command::Run(args) => cmd_run(args),
        Command::Patch(args) => cmd_patch(args),
        Command::CheckConfig(args) => cmd_check_config(args),
    }
}

fn cmd_run(args: RunArgs) -> anyhow::Result<u8> {
    let file_config = config::load(args.cfg.config.as_deref(), &args.cfg.repo_root)
        .context("load patchship config")?;
    let merged = ConfigMerger::new(file_config).merge_run_args(&RunOverrides {
        repo_root: args.cfg.repo_root.clone(),
        dry_run: args.dry_run,
        backup: args.backup,
        no_deploy: args.no_deploy,
    })?;

    let runner = ShellRunner::new(merged.process_timeout);
    let probe = HttpHealthProbe::default();
    let ports = RunPorts {
        runner: &runner,
        probe: &probe,
    };

    let outcome = match run(&merged.settings, ports, &RUN_GUARD) {
        Ok(outcome) => outcome,
        Err(ToolError::Busy) => {
            error!("{}", ToolError::Busy);
            return Ok(ToolError::Busy.exit_code());
        }
        Err(ToolError::Internal(e)) => return Err(e),
    };

    print!("{}", render_text(&outcome));

    if let Some(out_dir) = &args.out_dir {
        write_run_artifacts(&outcome, out_dir, &FsWritePort)
            .with_context(|| format!("write run artifacts to {}", out_dir))?;
        info!("wrote run artifacts to {}", out_dir);
    }

    Ok(outcome.exit_code())
}

fn cmd_patch(args: PatchArgs) -> anyhow::Result<u8> {
    let file_config = config::load(args.cfg.config.as_deref(), &args.cfg.repo_root)
        .context("load patchship config")?;
    if file_config.rules.is_empty() {
        anyhow::bail!("config has no patch rules");
    }

    let opts = ApplyOptions {
        dry_run: args.dry_run,
        backup: args.backup || file_config.backup,
    };
    let outcomes = match apply_rules(&args.cfg.repo_root, &file_config.rules, &opts) {
        Ok(outcomes) => outcomes,
        Err(e) if e.is_patch_block() => {
            error!("{}", e);
            println!("PATCH FAILED: {}", e);
            println!("No files were written.");
            return Ok(e.exit_code());
        }
        Err(e) => return Err(e.into()),
    };

    print!("{}", combined_diff(&outcomes));
    for o in &outcomes {
        let state = if args.dry_run {
            "would write"
        } else if o.written {
            "written"
        } else {
            "unchanged"
        };
        println!(
            "{}: {}/{} rules applied, {}",
            o.path,
            o.applied_count(),
            o.results.len(),
            state
        );
        if let Some(backup) = &o.backup_path {
            println!("  backup: {}", backup);
        }
    }
    Ok(0)
}

fn cmd_check_config(args: ConfigArgs) -> anyhow::Result<u8> {
    let file_config =
        config::load(args.config.as_deref(), &args.repo_root).context("load patchship config")?;
    validate_rules(&file_config.rules).context("invalid patch rule")?;
    let merged = ConfigMerger::new(file_config).merge_run_args(&RunOverrides {
        repo_root: args.repo_root.clone(),
        ..RunOverrides::default()
    })?;
    debug!(timeout = ?merged.process_timeout, "process timeout");

    println!("config OK; planned steps:");
    for (i, planned) in plan_steps(&merged.settings).iter().enumerate() {
        println!(
            "{:>3}. {}{}",
            i + 1,
            planned.step.label(),
            if planned.abort_on_failure {
                ""
            } else {
                " (best-effort)"
            }
        );
    }
    Ok(0)
}
