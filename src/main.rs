//! The `imagedephi` command line front-end.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use serde::Deserialize;
use tracing_subscriber::EnvFilter;

use imagedephi::batch::{self, PlanOptions, RedactOptions};
use imagedephi::rules::Profile;

#[derive(Debug, Parser)]
#[command(
    name = "imagedephi",
    version,
    about = "Redact microscopy whole slide images."
)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Args)]
struct GlobalArgs {
    /// Show INFO (-v) or DEBUG (-vv) level logging; defaults to WARNING
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Show only ERROR and more severe logging
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    quiet: u8,

    /// Path where a log file will be created
    #[arg(short = 'l', long, global = true)]
    log_file: Option<PathBuf>,

    /// User-defined rules to override defaults
    #[arg(short = 'R', long, global = true)]
    override_rules: Option<PathBuf>,

    /// Select a redaction profile; this determines the base rule set used
    /// for a run of the program
    #[arg(short, long, global = true, value_enum, default_value_t = Profile::Default)]
    profile: Profile,

    /// Apply the command to images in subdirectories
    #[arg(short, long, global = true)]
    recursive: bool,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Perform the redaction of images
    Run(RunArgs),
    /// Print the redaction plan for images
    Plan(PlanArgs),
}

#[derive(Debug, Args)]
struct RunArgs {
    /// Files or directories to redact
    #[arg(required_unless_present_any = ["command_file", "file_list"])]
    input_paths: Vec<PathBuf>,

    /// Path where the output directory will be created
    #[arg(short, long, default_value = ".")]
    output_dir: PathBuf,

    /// Keep original file names instead of renaming outputs
    #[arg(long)]
    skip_rename: bool,

    /// Rename output files (the default; negated by --skip-rename)
    #[arg(long, conflicts_with = "skip_rename")]
    rename: bool,

    /// Overwrite previously redacted files in the output directory
    #[arg(long)]
    overwrite_existing_output: bool,

    /// Starting index for renamed output files
    #[arg(long, default_value_t = 1)]
    index: usize,

    /// YAML file supplying these options
    #[arg(long)]
    command_file: Option<PathBuf>,

    /// Newline-separated list of additional input paths
    #[arg(long)]
    file_list: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct PlanArgs {
    /// Files or directories to report on
    #[arg(required = true)]
    input_paths: Vec<PathBuf>,
}

/// YAML mirror of the `run` options; only `input_paths` is mandatory.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CommandFile {
    input_paths: Vec<PathBuf>,
    output_dir: Option<PathBuf>,
    override_rules: Option<PathBuf>,
    profile: Option<Profile>,
    recursive: Option<bool>,
    rename: Option<bool>,
    index: Option<usize>,
}

fn init_logging(
    global: &GlobalArgs,
    default_verbose: u8,
) -> anyhow::Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let verbose = global.verbose.max(default_verbose);
    let level = match i16::from(verbose) - i16::from(global.quiet) {
        i16::MIN..=-1 => "error",
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("imagedephi={level}")));

    if let Some(log_file) = &global.log_file {
        let file = std::fs::File::create(log_file)
            .with_context(|| format!("could not create log file {}", log_file.display()))?;
        let (writer, guard) = tracing_appender::non_blocking(file);
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(writer)
            .with_ansi(false)
            .init();
        Ok(Some(guard))
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
        Ok(None)
    }
}

fn run(global: GlobalArgs, args: RunArgs) -> anyhow::Result<()> {
    let mut options = RedactOptions {
        input_paths: args.input_paths,
        output_dir: args.output_dir,
        override_rules: global.override_rules,
        profile: global.profile,
        rename: !args.skip_rename,
        overwrite: args.overwrite_existing_output,
        recursive: global.recursive,
        index: args.index,
    };

    if let Some(command_file) = &args.command_file {
        let text = std::fs::read_to_string(command_file)
            .with_context(|| format!("could not read {}", command_file.display()))?;
        let file: CommandFile = serde_yaml::from_str(&text)
            .with_context(|| format!("could not parse {}", command_file.display()))?;

        // Options given on the command line win over the command file.
        options.input_paths.extend(file.input_paths);
        if let Some(output_dir) = file.output_dir {
            options.output_dir = output_dir;
        }
        if options.override_rules.is_none() {
            options.override_rules = file.override_rules;
        }
        if let Some(profile) = file.profile {
            if global.profile == Profile::Default {
                options.profile = profile;
            }
        }
        if let Some(recursive) = file.recursive {
            options.recursive = options.recursive || recursive;
        }
        if let Some(rename) = file.rename {
            if !args.skip_rename && !args.rename {
                options.rename = rename;
            }
        }
        if let Some(index) = file.index {
            if args.index == 1 {
                options.index = index;
            }
        }
    }

    if let Some(file_list) = &args.file_list {
        let text = std::fs::read_to_string(file_list)
            .with_context(|| format!("could not read {}", file_list.display()))?;
        options
            .input_paths
            .extend(text.lines().filter(|line| !line.trim().is_empty()).map(PathBuf::from));
    }

    anyhow::ensure!(
        !options.input_paths.is_empty(),
        "no input paths given on the command line or in the command file"
    );

    let summary = batch::redact_images(&options, None)?;
    println!(
        "Redacted {} of {} file(s) into {}",
        summary.written,
        summary.processed,
        summary.redact_dir.display()
    );
    if summary.failed > 0 {
        println!(
            "{} file(s) could not be redacted; see {}",
            summary.failed,
            summary.manifest_path.display()
        );
    }
    Ok(())
}

fn plan(global: GlobalArgs, args: PlanArgs) -> anyhow::Result<()> {
    let options = PlanOptions {
        input_paths: args.input_paths,
        override_rules: global.override_rules,
        profile: global.profile,
        recursive: global.recursive,
    };
    batch::show_redaction_plan(&options)?;
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    // The plan report is written through the logger; make sure it shows
    // even without -v.
    let default_verbose = match &cli.command {
        Command::Plan(_) => 1,
        _ => 0,
    };
    let _guard = init_logging(&cli.global, default_verbose)?;

    match cli.command {
        Command::Run(args) => run(cli.global, args),
        Command::Plan(args) => plan(cli.global, args),
    }
}
