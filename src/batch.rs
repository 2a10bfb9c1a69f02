//! The batch driver: enumerate inputs, build and execute a plan per file,
//! name outputs, and report comprehensively on everything that happened.
//!
//! Processing is sequential; the only state shared across files is the UID
//! map and the manifest rows, both owned here. Failures are soft per file:
//! a row records each skip, and files failing the comprehensiveness gate
//! are quarantined into a parallel `Failed_<ts>` tree together with a
//! resume manifest. Only configuration errors abort the whole batch.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::Sender;

use chrono::Local;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::redact::{build_redaction_plan, RedactError, SaveOutcome, UidMap};
use crate::rules::{load_rule_set, Profile, RuleSet};
use crate::sniff::sniff_format;

/// One record per file boundary, consumed non-blockingly by collaborators
/// (the GUI polls the receiving end with `try_recv`).
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressUpdate {
    pub count: usize,
    pub max: usize,
    pub redact_dir: PathBuf,
}

/// Options of one redaction run.
#[derive(Debug, Clone)]
pub struct RedactOptions {
    pub input_paths: Vec<PathBuf>,
    pub output_dir: PathBuf,
    pub override_rules: Option<PathBuf>,
    pub profile: Profile,
    pub rename: bool,
    pub overwrite: bool,
    pub recursive: bool,
    /// Starting index for renamed outputs.
    pub index: usize,
}

impl Default for RedactOptions {
    fn default() -> Self {
        RedactOptions {
            input_paths: Vec::new(),
            output_dir: PathBuf::from("."),
            override_rules: None,
            profile: Profile::Default,
            rename: true,
            overwrite: false,
            recursive: false,
            index: 1,
        }
    }
}

/// What a finished batch did.
#[derive(Debug, Default)]
pub struct RedactionSummary {
    pub processed: usize,
    pub written: usize,
    pub failed: usize,
    pub redact_dir: PathBuf,
    pub manifest_path: PathBuf,
}

#[derive(Debug, Serialize)]
struct ManifestRow {
    input_path: String,
    output_path: String,
    detail: String,
}

fn row(input: &Path, output: Option<&Path>, detail: impl Into<String>) -> ManifestRow {
    ManifestRow {
        input_path: input.display().to_string(),
        output_path: output.map(|p| p.display().to_string()).unwrap_or_default(),
        detail: detail.into(),
    }
}

#[derive(Debug, Serialize)]
struct FailedImageEntry {
    missing_tags: Vec<String>,
}

#[derive(Debug, Serialize)]
struct FailureManifest {
    failed_images: Vec<BTreeMap<String, FailedImageEntry>>,
    failed_images_count: usize,
    command: String,
}

/// Enumerate candidate files, paired with the input root they came from so
/// relative locations can be preserved. Directory children are visited in
/// alphabetical order; `recursive` descends depth first.
fn gather_files(inputs: &[PathBuf], recursive: bool) -> Vec<(PathBuf, PathBuf)> {
    let mut files = Vec::new();
    for input in inputs {
        if input.is_dir() {
            collect_dir(input, input, recursive, &mut files);
        } else {
            match sniff_format(input) {
                Ok(Some(_)) => {
                    let root = input
                        .parent()
                        .map(Path::to_path_buf)
                        .unwrap_or_else(|| PathBuf::from("."));
                    files.push((input.clone(), root));
                }
                Ok(None) => {
                    info!(
                        "Image format for {} not supported. Skipping...",
                        input.display()
                    );
                }
                Err(err) => {
                    warn!("Could not read {}: {err}. Skipping...", input.display());
                }
            }
        }
    }
    files
}

fn collect_dir(dir: &Path, root: &Path, recursive: bool, out: &mut Vec<(PathBuf, PathBuf)>) {
    let mut children: Vec<PathBuf> = match fs::read_dir(dir) {
        Ok(entries) => entries.filter_map(|entry| entry.ok().map(|e| e.path())).collect(),
        Err(err) => {
            warn!("Could not list {}: {err}. Skipping...", dir.display());
            return;
        }
    };
    children.sort();
    for child in children {
        if child.is_dir() {
            if recursive {
                collect_dir(&child, root, recursive, out);
            }
            continue;
        }
        match sniff_format(&child) {
            Ok(Some(_)) => out.push((child, root.to_path_buf())),
            Ok(None) => {}
            Err(err) => warn!("Could not read {}: {err}. Skipping...", child.display()),
        }
    }
}

/// The effective rule set of a run: profile base, optionally overlaid.
fn effective_rules(options: &RedactOptions) -> Result<RuleSet, RedactError> {
    let base = options.profile.base_rules();
    let override_set = options
        .override_rules
        .as_deref()
        .map(load_rule_set)
        .transpose()?;
    Ok(RuleSet::layered(base, override_set.as_ref()))
}

/// Hardlink `file` into the failure tree, preserving its location relative
/// to `root`; falls back to a metadata-preserving copy across filesystems.
fn quarantine(file: &Path, root: &Path, failure_dir: &Path) -> std::io::Result<PathBuf> {
    let relative = file.strip_prefix(root).unwrap_or_else(|_| {
        Path::new(file.file_name().unwrap_or(file.as_os_str()))
    });
    let target = failure_dir.join(relative);
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }
    if !target.exists() && fs::hard_link(file, &target).is_err() {
        // A plain copy carries permissions but not timestamps; restore
        // those from the source.
        fs::copy(file, &target)?;
        let metadata = fs::metadata(file)?;
        let mut times = fs::FileTimes::new();
        if let Ok(modified) = metadata.modified() {
            times = times.set_modified(modified);
        }
        if let Ok(accessed) = metadata.accessed() {
            times = times.set_accessed(accessed);
        }
        fs::File::options()
            .write(true)
            .open(&target)?
            .set_times(times)?;
    }
    Ok(target)
}

/// Render the command that re-runs the driver over the failure tree.
fn resume_command(options: &RedactOptions, failure_dir: &Path, next_index: usize) -> String {
    let mut command = format!(
        "imagedephi run {} --output-dir {} --index {}",
        failure_dir.display(),
        options.output_dir.display(),
        next_index
    );
    if let Some(rules_path) = &options.override_rules {
        command.push_str(&format!(" --override-rules {}", rules_path.display()));
    }
    if options.overwrite {
        command.push_str(" --overwrite-existing-output");
    }
    if options.profile != Profile::Default {
        command.push_str(&format!(" --profile {}", options.profile));
    }
    if options.recursive {
        command.push_str(" --recursive");
    }
    if !options.rename {
        command.push_str(" --skip-rename");
    }
    command
}

/// Run a whole batch.
///
/// Any error returned aborts the batch; everything recoverable becomes a
/// manifest row instead.
pub fn redact_images(
    options: &RedactOptions,
    progress: Option<&Sender<ProgressUpdate>>,
) -> Result<RedactionSummary, RedactError> {
    let rules = effective_rules(options)?;

    let time_stamp = Local::now().format("%Y-%m-%d_%H-%M-%S").to_string();
    let redact_dir = options.output_dir.join(format!("Redacted_{time_stamp}"));
    let manifest_path = options
        .output_dir
        .join(format!("Redacted_{time_stamp}_manifest.csv"));
    let failure_dir = options.output_dir.join(format!("Failed_{time_stamp}"));
    fs::create_dir_all(&redact_dir)?;

    let files = gather_files(&options.input_paths, options.recursive);
    let total = files.len();
    let pad_width = total.to_string().len().max(1);

    let mut uid_map = UidMap::new();
    let mut rows: Vec<ManifestRow> = Vec::new();
    let mut failures: Vec<(PathBuf, Vec<String>)> = Vec::new();
    let mut output_index = options.index;
    let mut written = 0usize;

    for (count, (file, root)) in files.iter().enumerate() {
        let count = count + 1;
        if let Some(sender) = progress {
            let _ = sender.send(ProgressUpdate {
                count,
                max: total,
                redact_dir: redact_dir.clone(),
            });
        }
        info!("Redacting {} ({count}/{total})", file.display());

        let mut plan = match build_redaction_plan(file, &rules, &mut uid_map) {
            Ok(plan) => plan,
            Err(err) if err.is_fatal() => return Err(err),
            Err(err) => {
                warn!("{err}. Skipping...");
                rows.push(row(file, None, err.to_string()));
                continue;
            }
        };

        if !plan.is_comprehensive() {
            error!(
                "Redaction could not be performed for {}: the plan is not comprehensive.",
                file.display()
            );
            let missing = plan.missing_keys();
            for key in &missing {
                error!("Missing rule: {key}");
            }
            if let Err(err) = quarantine(file, root, &failure_dir) {
                warn!("Could not quarantine {}: {err}", file.display());
            }
            failures.push((file.clone(), missing));
            rows.push(row(file, None, "Could not redact with the provided rule set"));
            continue;
        }

        if let Err(err) = plan.execute() {
            warn!("Could not redact {}: {err}. Skipping...", file.display());
            rows.push(row(file, None, err.to_string()));
            continue;
        }

        let file_name = if options.rename {
            let suffix = file
                .extension()
                .map(|ext| format!(".{}", ext.to_string_lossy()))
                .unwrap_or_default();
            format!(
                "{}_{:0pad_width$}{}",
                rules.output_base(),
                output_index,
                suffix
            )
        } else {
            file.file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| format!("image_{output_index}"))
        };
        let target_dir = if options.recursive {
            match file.parent().and_then(|parent| parent.strip_prefix(root).ok()) {
                Some(relative) => redact_dir.join(relative),
                None => redact_dir.clone(),
            }
        } else {
            redact_dir.clone()
        };
        if let Err(err) = fs::create_dir_all(&target_dir) {
            warn!("Could not create {}: {err}. Skipping...", target_dir.display());
            rows.push(row(file, None, err.to_string()));
            continue;
        }
        let output_path = target_dir.join(file_name);

        match plan.save(&output_path, options.overwrite) {
            Ok(SaveOutcome::Written) => {
                written += 1;
                output_index += 1;
                rows.push(row(file, Some(&output_path), ""));
            }
            Ok(SaveOutcome::SkippedExisting) => {
                output_index += 1;
                rows.push(row(file, None, "Output file already exists"));
            }
            Ok(SaveOutcome::SkippedImageRule) => {
                rows.push(row(
                    file,
                    None,
                    "Image scheduled for deletion; no output written",
                ));
            }
            Err(err) if err.is_fatal() => return Err(err),
            Err(err) => {
                warn!("Could not save {}: {err}. Skipping...", file.display());
                rows.push(row(file, None, err.to_string()));
            }
        }
    }

    let mut writer = csv::Writer::from_path(&manifest_path)?;
    if rows.is_empty() {
        // serialize() would emit the header from the first record; an empty
        // batch still gets a well-formed manifest.
        writer.write_record(["input_path", "output_path", "detail"])?;
    }
    for record in &rows {
        writer.serialize(record)?;
    }
    writer.flush().map_err(RedactError::from)?;

    if !failures.is_empty() {
        write_failure_manifest(options, &failure_dir, &failures, output_index)?;
    }

    info!(
        "Redacted {written} of {total} file(s) into {}",
        redact_dir.display()
    );
    Ok(RedactionSummary {
        processed: total,
        written,
        failed: failures.len(),
        redact_dir,
        manifest_path,
    })
}

fn write_failure_manifest(
    options: &RedactOptions,
    failure_dir: &Path,
    failures: &[(PathBuf, Vec<String>)],
    next_index: usize,
) -> Result<(), RedactError> {
    fs::create_dir_all(failure_dir)?;
    let manifest = FailureManifest {
        failed_images: failures
            .iter()
            .map(|(path, missing)| {
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| path.display().to_string());
                BTreeMap::from([(
                    name,
                    FailedImageEntry {
                        missing_tags: missing.clone(),
                    },
                )])
            })
            .collect(),
        failed_images_count: failures.len(),
        command: resume_command(options, failure_dir, next_index),
    };
    let text = serde_yaml::to_string(&manifest)?;
    fs::write(failure_dir.join("failure_manifest.yaml"), text)?;
    Ok(())
}

/// Options of a `plan` invocation.
#[derive(Debug, Clone)]
pub struct PlanOptions {
    pub input_paths: Vec<PathBuf>,
    pub override_rules: Option<PathBuf>,
    pub profile: Profile,
    pub recursive: bool,
}

/// Print the redaction plan for each input file without writing output.
pub fn show_redaction_plan(options: &PlanOptions) -> Result<(), RedactError> {
    let redact_options = RedactOptions {
        input_paths: options.input_paths.clone(),
        override_rules: options.override_rules.clone(),
        profile: options.profile,
        recursive: options.recursive,
        ..RedactOptions::default()
    };
    let rules = effective_rules(&redact_options)?;
    let mut uid_map = UidMap::new();

    for (file, _) in gather_files(&options.input_paths, options.recursive) {
        match build_redaction_plan(&file, &rules, &mut uid_map) {
            Ok(plan) => {
                println!("\nRedaction plan for {}\n", file.display());
                println!("{}", plan.report());
            }
            Err(err) if err.is_fatal() => return Err(err),
            Err(err) => {
                warn!("{err}. Skipping...");
            }
        }
    }
    Ok(())
}
