use clap::Parser;
use miette::IntoDiagnostic;
use pypi_inspect::{
    resolve_dependencies, Config, ResolveInputs, ResolveOptions, DEFAULT_MAX_ROUNDS,
};
use std::path::PathBuf;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use url::Url;

/// Resolve the dependency graph of Python requirements for a chosen Python
/// version and operating system, without installing anything.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Paths of pip requirements files to resolve.
    #[clap(long = "requirement", short = 'r')]
    requirement_files: Vec<PathBuf>,

    /// Path of a setup.py to collect requirements from.
    #[clap(long)]
    setup_py: Option<PathBuf>,

    /// Requirement specifiers such as "flask==2.1.2".
    #[clap(long = "specifier", short = 's')]
    specifiers: Vec<String>,

    /// The Python version to resolve for, e.g. 310 or 3.10.
    #[clap(long, short = 'p')]
    python_version: Option<String>,

    /// The operating system to resolve for: linux, macos or windows.
    #[clap(long, short = 'o')]
    operating_system: Option<String>,

    /// Base URLs of PEP 503 simple indexes, in priority order.
    #[clap(long = "index-url")]
    index_urls: Vec<Url>,

    /// An explicit netrc file for authenticated indexes.
    #[clap(long)]
    netrc: Option<PathBuf>,

    /// The maximum number of backtracking rounds.
    #[clap(long, default_value_t = DEFAULT_MAX_ROUNDS)]
    max_rounds: usize,

    /// Serve index pages from the on-disk cache without re-fetching.
    #[clap(long)]
    use_cached_index: bool,

    /// Use the PyPI JSON API instead of the simple indexes.
    #[clap(long)]
    use_pypi_json_api: bool,

    /// Evaluate setup.py files by executing them. Runs arbitrary code from
    /// the packages being resolved.
    #[clap(long)]
    analyze_setup_py_insecurely: bool,

    /// Prefer source archives over wheels in the reported package data.
    #[clap(long)]
    prefer_source: bool,

    /// Emit a pipdeptree-style nested tree instead of the flat graph.
    #[clap(long)]
    pdt_output: bool,

    /// Keep going when a requirement has no matching versions at all.
    #[clap(long)]
    ignore_errors: bool,

    /// Write the JSON result to this file instead of stdout.
    #[clap(long)]
    json: Option<PathBuf>,

    /// Verbose logging.
    #[clap(long, short)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> miette::Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_env_filter(args.verbose)),
        )
        .init();

    let config = Config::from_env();
    let mut options = ResolveOptions::from_config(&config);
    if let Some(python_version) = args.python_version {
        options.python_version = python_version;
    }
    if let Some(operating_system) = args.operating_system {
        options.operating_system = operating_system;
    }
    options.index_urls = args.index_urls;
    options.netrc_file = args.netrc;
    options.max_rounds = args.max_rounds;
    options.use_cached_index = args.use_cached_index;
    options.use_pypi_json_api = args.use_pypi_json_api;
    options.analyze_setup_py_insecurely = args.analyze_setup_py_insecurely;
    options.prefer_source = args.prefer_source;
    options.pdt_output = args.pdt_output;
    options.ignore_errors = args.ignore_errors;

    let inputs = ResolveInputs {
        requirement_files: args.requirement_files,
        setup_py_file: args.setup_py,
        specifiers: args.specifiers,
    };

    let result = resolve_dependencies(&inputs, &options, &config)
        .await
        .map_err(|e| miette::miette!("{e}"))?;

    let rendered = serde_json::to_string_pretty(&result).into_diagnostic()?;
    match args.json {
        Some(path) => std::fs::write(path, rendered).into_diagnostic()?,
        None => println!("{rendered}"),
    }

    Ok(())
}

fn default_env_filter(verbose: bool) -> EnvFilter {
    if verbose {
        EnvFilter::new("pypi_inspect=debug")
    } else {
        EnvFilter::new("pypi_inspect=warn")
    }
}
