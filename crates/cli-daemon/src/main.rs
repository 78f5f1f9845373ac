//! CLI entry point for ManageHD
//!
//! Takes `key=value` tokens naming the source, archive and destination
//! directories, converts every matching video and archives the converted
//! sources.

use clap::Parser;
use log::{error, info, warn};
use managehd::{
    parse_extensions, run_startup_checks, BatchPhase, BatchReport, BatchRequest, BatchRunner,
    Config, Platform, Preset, Settings,
};
use std::path::PathBuf;
use std::process::ExitCode;

/// ManageHD - batch conversion of HD videos to 720p with HandBrakeCLI
#[derive(Parser, Debug)]
#[command(name = "managehd")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// s=<source dir> a=<archive dir> d=<destination dir> m=<max files> v=<ext,ext>
    tokens: Vec<String>,

    /// Path to the settings file (created when missing)
    #[arg(short, long, default_value = "managehd.toml")]
    config: PathBuf,

    /// Output preset: standard (mkv) or alternate (mp4)
    #[arg(short, long)]
    preset: Option<Preset>,

    /// Number of concurrent transcoder workers
    #[arg(short, long)]
    workers: Option<u32>,

    /// Print the final batch report as JSON
    #[arg(long, default_value = "false")]
    json: bool,

    /// Skip the HandBrakeCLI availability check. For testing only.
    #[arg(long, default_value = "false")]
    skip_checks: bool,

    #[arg(long = "h", hide = true)]
    legacy_help: bool,
}

/// Values picked out of the positional tokens
#[derive(Debug, Default, PartialEq)]
struct Tokens {
    source_dir: Option<PathBuf>,
    archive_dir: Option<PathBuf>,
    destination_dir: Option<PathBuf>,
    max_files: usize,
    extensions: Option<String>,
    help: bool,
    /// Tokens that were ignored, with the reason
    problems: Vec<String>,
}

fn parse_tokens(tokens: &[String]) -> Tokens {
    let mut parsed = Tokens::default();

    for token in tokens.iter().filter(|t| !t.is_empty()) {
        if matches!(token.as_str(), "h" | "-h" | "--h") {
            parsed.help = true;
            continue;
        }

        let Some((key, value)) = token.split_once('=') else {
            parsed.problems.push(format!("Unrecognized parameter: {}", token));
            continue;
        };

        match key {
            "s" => parsed.source_dir = non_empty_path(value),
            "a" => parsed.archive_dir = non_empty_path(value),
            "d" => parsed.destination_dir = non_empty_path(value),
            "v" => parsed.extensions = Some(value.to_string()),
            "m" => match value.trim().parse::<usize>() {
                Ok(max) => parsed.max_files = max,
                Err(_) => parsed
                    .problems
                    .push(format!("Invalid file count '{}', converting all files", value)),
            },
            _ => parsed.problems.push(format!("Unrecognized parameter: {}", token)),
        }
    }

    parsed
}

fn non_empty_path(value: &str) -> Option<PathBuf> {
    if value.is_empty() {
        None
    } else {
        Some(PathBuf::from(value))
    }
}

fn print_help() {
    println!();
    println!("Converts 1080p (or 1080i) video files to 720p.");
    println!("Requires HandBrakeCLI to be installed.");
    println!();
    println!("managehd s=<video dir> d=<destination dir> [a=<archive dir>] [m=...] [v=...]");
    println!();
    println!("    s=   Source directory for videos.");
    println!("    a=   Optional. Archive directory the converted originals are moved to.");
    println!("    d=   Destination directory the converted videos are written to.");
    println!("    m=   Optional. Maximum number of videos to convert. Default is all.");
    println!("    v=   Optional. Extensions to convert, no spaces. Default is mkv,mp4,ogm,avi.");
    println!();
    println!("Directories left out are taken from the settings file (--config).");
    println!();
}

fn print_missing_params() {
    eprintln!();
    eprintln!("ERROR: A mandatory parameter is missing!");
    eprintln!();
    eprintln!("You must specify a video source directory using s=");
    eprintln!("             and a destination directory using d=");
    eprintln!("  For example (on Linux):");
    eprintln!("    managehd s=/vids/fam/2010 d=/vids/new a=/vids/archive");
    eprintln!();
    eprintln!("  or on Windows:");
    eprintln!("    managehd s=d:\\vids\\fam\\2010 d=d:\\vids\\new a=d:\\vids\\archive");
    eprintln!();
    eprintln!("  For more info type: managehd h");
    eprintln!();
}

fn print_report(report: &BatchReport) {
    println!("Batch {}: {}", report.id, report.phase);
    println!(
        "  Converted: {} of {} ({} failed)",
        report.jobs_completed - report.jobs_failed,
        report.jobs_total,
        report.jobs_failed
    );
    println!(
        "  Processed: {:.1} of {:.1} MB in {}s",
        report.processed_mb, report.total_mb, report.elapsed_secs
    );
    if let Some(speed) = report.throughput_gb_per_hour {
        println!("  Speed: {:.1} GB/hour", speed);
    }
    for path in &report.rejected {
        println!("  Skipped (double quote in name): {}", path.display());
    }
    if !report.archived.is_empty() {
        println!("  Archived: {} files", report.archived.len());
    }
    for failure in &report.archive_failures {
        println!(
            "  Not archived: {} ({})",
            failure.file.display(),
            failure.reason
        );
    }
}

/// Store the directories and final speed estimate for the next run
///
/// Reads the file again so CLI and environment overrides are not persisted.
fn persist_settings(
    config_path: &std::path::Path,
    platform: &Platform,
    settings: &Settings,
) -> Result<(), managehd::ConfigError> {
    let mut stored = Config::load_from_file(config_path)?;
    stored.record_settings(platform.host, settings);
    stored.save(config_path)
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_secs()
        .init();

    let args = Args::parse();
    let tokens = parse_tokens(&args.tokens);

    if tokens.help || args.legacy_help {
        print_help();
        return ExitCode::SUCCESS;
    }
    for problem in &tokens.problems {
        warn!("{}", problem);
    }

    let mut cfg = match Config::load_or_create(&args.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("Failed to load settings from {}: {}", args.config.display(), e);
            return ExitCode::FAILURE;
        }
    };
    if let Some(preset) = args.preset {
        cfg.transcoder.preset = preset;
    }
    if let Some(workers) = args.workers {
        cfg.pool.workers = workers;
    }

    let platform = Platform::detect();
    let stored = cfg.settings(platform.host);

    let source_dir = tokens.source_dir.or(stored.source_dir);
    let destination_dir = tokens.destination_dir.or(stored.destination_dir);
    let archive_dir = tokens.archive_dir.or(stored.archive_dir);

    let (Some(source_dir), Some(destination_dir)) = (source_dir, destination_dir) else {
        print_missing_params();
        return ExitCode::FAILURE;
    };

    let binary = platform.transcoder_binary(&cfg);
    if args.skip_checks {
        warn!("Skipping transcoder check (--skip-checks enabled)");
        if let Err(e) = managehd::check_directories(&source_dir, &destination_dir) {
            error!("Startup check failed: {}", e);
            return ExitCode::FAILURE;
        }
    } else {
        match run_startup_checks(&binary, &source_dir, &destination_dir) {
            Ok(Some(version)) => info!("Using {} ({})", binary, version),
            Ok(None) => info!("Using {}", binary),
            Err(e) => {
                error!("Startup check failed: {}", e);
                return ExitCode::FAILURE;
            }
        }
    }

    let request = BatchRequest {
        source_dir: source_dir.clone(),
        archive_dir: archive_dir.clone(),
        destination_dir: destination_dir.clone(),
        max_files: tokens.max_files,
        extensions: parse_extensions(tokens.extensions.as_deref().unwrap_or("")),
    };

    let runner = BatchRunner::new(&platform, &cfg, stored.speed_estimate);
    info!(
        "ManageHD starting: {} -> {} with {} workers",
        source_dir.display(),
        destination_dir.display(),
        runner.workers()
    );

    let mut updates = runner.progress().subscribe();
    let poller = tokio::spawn(async move {
        while updates.changed().await.is_ok() {
            let snapshot = updates.borrow_and_update().clone();
            if snapshot.total_jobs == 0 {
                continue;
            }
            info!(
                "{}/{} done, {} running, {:.1}/{:.1} MB, time remaining: {}",
                snapshot.jobs_completed,
                snapshot.total_jobs,
                snapshot.jobs_in_flight,
                snapshot.processed_mb,
                snapshot.total_mb,
                snapshot.time_remaining
            );
        }
    });

    let result = runner.run(&request).await;
    poller.abort();

    let report = match result {
        Ok(report) => report,
        Err(e) => {
            error!("Batch failed: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let settings = Settings {
        source_dir: Some(source_dir),
        archive_dir,
        destination_dir: Some(destination_dir),
        speed_estimate: report.throughput_gb_per_hour,
    };
    if let Err(e) = persist_settings(&args.config, &platform, &settings) {
        warn!("Failed to save settings to {}: {}", args.config.display(), e);
    }

    if args.json {
        match serde_json::to_string_pretty(&report) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                error!("Failed to render report: {}", e);
                return ExitCode::FAILURE;
            }
        }
    } else {
        print_report(&report);
    }

    if report.phase == BatchPhase::InsufficientSpace {
        eprintln!(
            "Not enough space on the archive drive: {} bytes needed, {} available.",
            report.required_bytes.unwrap_or(0),
            report.available_bytes.unwrap_or(0)
        );
        eprintln!("Converted files were kept. Free some space and run again to archive.");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_all_tokens() {
        let parsed = parse_tokens(&tokens(&[
            "s=/vids/fam/2010",
            "d=/vids/new",
            "a=/vids/archive",
            "m=3",
            "v=mkv,avi",
        ]));

        assert_eq!(parsed.source_dir, Some(PathBuf::from("/vids/fam/2010")));
        assert_eq!(parsed.destination_dir, Some(PathBuf::from("/vids/new")));
        assert_eq!(parsed.archive_dir, Some(PathBuf::from("/vids/archive")));
        assert_eq!(parsed.max_files, 3);
        assert_eq!(parsed.extensions.as_deref(), Some("mkv,avi"));
        assert!(parsed.problems.is_empty());
        assert!(!parsed.help);
    }

    #[test]
    fn test_paths_keep_equals_signs() {
        let parsed = parse_tokens(&tokens(&["s=/vids/a=b"]));
        assert_eq!(parsed.source_dir, Some(PathBuf::from("/vids/a=b")));
    }

    #[test]
    fn test_unrecognized_tokens_are_reported() {
        let parsed = parse_tokens(&tokens(&["x=1", "bogus", "", "s=/v"]));
        assert_eq!(parsed.problems.len(), 2);
        assert!(parsed.problems[0].contains("x=1"));
        assert_eq!(parsed.source_dir, Some(PathBuf::from("/v")));
    }

    #[test]
    fn test_bad_max_files_is_reported() {
        let parsed = parse_tokens(&tokens(&["m=lots"]));
        assert_eq!(parsed.max_files, 0);
        assert_eq!(parsed.problems.len(), 1);
    }

    #[test]
    fn test_help_tokens() {
        for help in ["h", "-h", "--h"] {
            assert!(parse_tokens(&tokens(&[help])).help);
        }
    }

    #[test]
    fn test_empty_archive_means_unset() {
        let parsed = parse_tokens(&tokens(&["a="]));
        assert_eq!(parsed.archive_dir, None);
    }

    #[test]
    fn test_args_accept_tokens_and_options() {
        let args = Args::try_parse_from([
            "managehd",
            "--preset",
            "alternate",
            "--workers",
            "2",
            "s=/v",
            "d=/out",
        ])
        .unwrap();
        assert_eq!(args.preset, Some(Preset::Alternate));
        assert_eq!(args.workers, Some(2));
        assert_eq!(args.tokens, tokens(&["s=/v", "d=/out"]));
        assert_eq!(args.config, PathBuf::from("managehd.toml"));
    }
}
