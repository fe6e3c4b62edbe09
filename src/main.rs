use reentrancy_scan::cli::{self, Args};
use reentrancy_scan::detectors::DetectorRegistry;
use reentrancy_scan::{Reporter, ScanError, Scanner};
use std::process;
use tracing::{debug, error};

const EXIT_CLEAN: i32 = 0;
const EXIT_FINDINGS: i32 = 1;
const EXIT_ERROR: i32 = 2;

fn print_banner() {
    println!("{}", "=".repeat(64));
    println!("  reentrancy-scan v{}", env!("CARGO_PKG_VERSION"));
    println!("  Re-entrancy pattern analysis for Solidity contracts");
    println!("{}\n", "=".repeat(64));
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let default = if verbose {
        "reentrancy_scan=debug"
    } else {
        "reentrancy_scan=warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn main() {
    let matches = cli::build_command().get_matches();
    let verbose = matches.get_flag("verbose");
    init_logging(verbose);

    let args = match Args::from_matches(&matches) {
        Ok(args) => args,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(EXIT_ERROR);
        }
    };

    if args.no_color {
        colored::control::set_override(false);
    }

    if args.list_detectors {
        list_detectors();
        return;
    }

    match run(&args) {
        Ok(code) => process::exit(code),
        Err(e) => {
            error!(error = %e, "scan aborted");
            eprintln!("Error: {}", e);
            process::exit(EXIT_ERROR);
        }
    }
}

fn run(args: &Args) -> Result<i32, ScanError> {
    if !args.has_input() {
        return Err(ScanError::config_error(
            "no targets given; pass one or more .sol files or directories",
        ));
    }

    let config = args.resolve_config()?;
    let format = args.output_format(&config)?;
    debug!(?config, "resolved configuration");

    if args.verbose && format == cli::OutputFormat::Text && config.output.file.is_none() {
        print_banner();
    }

    let scanner = Scanner::new(config);
    let report = scanner.scan_targets(&args.targets)?;

    let reporter = Reporter::new(format, !args.no_color, args.verbose).with_quiet(args.quiet);
    match &scanner.config().output.file {
        Some(path) => {
            reporter.write_to_file(&report, std::path::Path::new(path))?;
            if !args.quiet {
                println!("Report written to {}", path);
            }
        }
        None => reporter.print(&report)?,
    }

    Ok(if report.has_findings() {
        EXIT_FINDINGS
    } else if report.has_errors() {
        EXIT_ERROR
    } else {
        EXIT_CLEAN
    })
}

fn list_detectors() {
    let registry = DetectorRegistry::new();
    println!("Available patterns ({}):\n", registry.detector_count());
    for detector in registry.get_all_detectors() {
        println!(
            "  ├─ {:<27} [{:<6}] {}",
            detector.name(),
            detector.default_severity().as_str(),
            detector.description()
        );
    }
    println!();
    println!("Use --detectors to run specific patterns or --exclude-detectors to skip some");
}
