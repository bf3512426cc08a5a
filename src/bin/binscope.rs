use anyhow::Context;
use binscope::{
    AnalysedArtifact, Analyser, AnalyserConfig, ApplicationReport, ArtifactKind, FrameworkVersion,
};
use clap::Parser;
use fs_err as fs;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "binscope")]
#[command(about = "Classify binaries and map the dependencies between them")]
#[command(version)]
struct Cli {
    /// Artifact (.dll, .exe, .jar), application directory, or packed application
    /// (.zip, .tar, .tar.gz, .7z)
    input: PathBuf,

    /// Write the result in JSON format to this path
    #[arg(short, long, value_name = "PATH")]
    json: Option<PathBuf>,

    /// Newest runtime version supported for managed assemblies (e.g. 8.0)
    #[arg(long, value_name = "MAJOR.MINOR", value_parser = parse_version)]
    max_runtime: Option<FrameworkVersion>,

    /// Skip circular dependency detection
    #[arg(long)]
    no_cycles: bool,

    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn parse_version(s: &str) -> Result<FrameworkVersion, String> {
    FrameworkVersion::parse(s).ok_or_else(|| format!("not a version number: {}", s))
}

fn log_level(verbose: u8) -> tracing::Level {
    match verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    }
}

fn print_artifact(a: &AnalysedArtifact, dependents: Option<&[String]>) {
    let name = if a.name().is_empty() {
        "<unnamed>"
    } else {
        a.name()
    };
    println!("{} => {:?} [{:?}]", name, a.kind(), a.origin());

    if let Some(error) = a.analysis_error() {
        println!("\tanalysis incomplete: {}", error);
    }
    if a.kind() == ArtifactKind::NativeExecutable && a.possible_managed_bootstrapper() {
        println!("\tmanaged bootstrapper: possible");
    }
    if let Some(info) = a.framework_info() {
        match (&info.display_name, &info.version) {
            (Some(display), Some(version)) => println!("\tframework: {} ({})", display, version),
            (Some(display), None) => println!("\tframework: {}", display),
            (None, Some(version)) => println!("\tframework: {}", version),
            (None, None) => {}
        }
    }
    if let Some(java) = a.java() {
        if let Some(group) = &java.group_id {
            println!("\tgroup: {}", group);
        }
        if let Some(version) = &java.version {
            println!("\tversion: {}", version);
        }
    }
    if !a.dependencies().is_empty() {
        println!("\tdependencies:");
        for d in a.dependencies() {
            println!("\t\t{}", d);
        }
    }
    if let Some(dependents) = dependents.filter(|d| !d.is_empty()) {
        println!("\tdependents:");
        for d in dependents {
            println!("\t\t{}", d);
        }
    }
}

fn print_report(report: &ApplicationReport) {
    for (file, artifact) in report.files.iter().zip(&report.artifacts) {
        println!("{}", file.display());
        print_artifact(artifact, Some(artifact.dependents()));
        println!();
    }

    match &report.cycles {
        Some(cycles) if cycles.is_empty() => println!("No circular dependencies detected"),
        Some(cycles) => {
            println!("Circular dependencies detected!");
            for c in cycles {
                println!("\t{}", c);
            }
        }
        None => {}
    }
}

fn write_json<T: serde::Serialize>(value: &T, path: &Path) -> anyhow::Result<()> {
    let js = serde_json::to_string_pretty(value).context("Error serializing")?;
    fs::write(path, js).context(format!("couldn't write to {}", path.display()))?;
    Ok(())
}

const ARCHIVE_EXTENSIONS: &[&str] = &["zip", "tar", "gz", "tgz", "7z"];

fn is_application_archive(path: &Path) -> bool {
    path.extension()
        .map(|e| ARCHIVE_EXTENSIONS.iter().any(|a| e.eq_ignore_ascii_case(a)))
        .unwrap_or(false)
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(log_level(cli.verbose))
        .with_writer(std::io::stderr)
        .init();

    if !cli.input.exists() {
        eprintln!(
            "Specified input not found at {}\nCurrent working directory: {}",
            cli.input.display(),
            std::env::current_dir()?.display(),
        );
        std::process::exit(1);
    }

    let analyser = Analyser::new(AnalyserConfig {
        max_runtime_version: cli.max_runtime,
        detect_cycles: !cli.no_cycles,
        ..AnalyserConfig::default()
    });

    if cli.input.is_dir() || is_application_archive(&cli.input) {
        let report = if cli.input.is_dir() {
            analyser.analyse_application(&cli.input)
        } else {
            analyser.analyse_application_archive(&cli.input)
        }
        .with_context(|| format!("could not analyse {}", cli.input.display()))?;

        match &cli.json {
            Some(path) => write_json(&report, path)?,
            None => print_report(&report),
        }
    } else {
        let artifact = analyser.analyse_path(&cli.input);
        match &cli.json {
            Some(path) => write_json(&artifact, path)?,
            None => print_artifact(&artifact, None),
        }
    }

    Ok(())
}
