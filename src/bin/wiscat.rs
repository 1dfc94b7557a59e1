use std::path::PathBuf;
use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand, ValueEnum};
use miette::IntoDiagnostic;
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use wiscat::app::{App, CacheSource, ReportResult};
use wiscat::config::ConfigLoader;
use wiscat::domain::{BoundingBox, DataPolicy, MatchMode, RecordId, SearchQuery};
use wiscat::error::WiscatError;
use wiscat::gdc::{CatalogueClient, FetchedRecord, GdcHttpClient, SearchPage};
use wiscat::index::{self, RecordSource};
use wiscat::output::{JsonOutput, LogSink, OutputMode, TextOutput};
use wiscat::report::Grouping;

#[derive(Parser)]
#[command(name = "wiscat")]
#[command(about = "Reporting client for the WIS discovery metadata catalogue")]
#[command(version, author)]
struct Cli {
    /// Log level; falls back to RUST_LOG, then warn.
    #[arg(long, short = 'v', global = true)]
    verbosity: Option<Verbosity>,

    /// Print machine-readable JSON instead of text.
    #[arg(long, global = true)]
    json: bool,

    /// Path to a wiscat.json config file.
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Verbosity {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl Verbosity {
    fn as_filter(self) -> &'static str {
        match self {
            Verbosity::Error => "error",
            Verbosity::Warn => "warn",
            Verbosity::Info => "info",
            Verbosity::Debug => "debug",
            Verbosity::Trace => "trace",
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Cache a local copy of the catalogue archive")]
    Cache(CacheArgs),
    #[command(about = "Reports over cached metadata records")]
    Report(ReportArgs),
    #[command(about = "Metrics over cached WCMP2 records")]
    Metrics(MetricsArgs),
    #[command(about = "Search the WIS2 Global Discovery Catalogue")]
    Search(SearchArgs),
    #[command(about = "Get a catalogue record by identifier")]
    Get(GetArgs),
}

#[derive(Args)]
struct CacheArgs {
    /// Target directory; defaults to the platform cache directory.
    #[arg(long, short = 'd')]
    directory: Option<Utf8PathBuf>,

    /// Cache the WIS1 catalogue dump instead of the WIS2 GDC archive
    #[arg(long)]
    wis1: bool,
}

#[derive(Args)]
#[group(required = true, multiple = false)]
struct SourceArgs {
    /// Directory with metadata files to process
    #[arg(long, short = 'd')]
    directory: Option<PathBuf>,

    /// File containing a JSON list of metadata files, alternative to --directory
    #[arg(long = "file-list", short = 'f')]
    file_list: Option<PathBuf>,
}

impl SourceArgs {
    fn resolve(&self) -> Result<RecordSource, WiscatError> {
        match (&self.directory, &self.file_list) {
            (Some(directory), None) => {
                info!("analyzing records in {}", directory.display());
                Ok(RecordSource::Directory(directory.clone()))
            }
            (None, Some(file_list)) => Ok(RecordSource::Files(index::load_file_list(file_list)?)),
            _ => Err(WiscatError::InvalidArgument(
                "exactly one of --directory or --file-list is required".to_string(),
            )),
        }
    }
}

#[derive(Args)]
struct ReportArgs {
    #[command(subcommand)]
    command: ReportCommand,
}

#[derive(Subcommand)]
enum ReportCommand {
    #[command(about = "Analyze term searches by organization")]
    TermsByOrg(TermsArgs),
    #[command(about = "Report number of records by organization")]
    RecordsByOrg(RecordsArgs),
}

#[derive(Args)]
struct TermsArgs {
    #[command(flatten)]
    source: SourceArgs,

    /// Terms (sub-strings) to search for in the metadata, case insensitive
    #[arg(long = "term", short = 't', required = true)]
    terms: Vec<String>,

    #[arg(long = "match", value_enum, default_value_t = MatchMode::All)]
    mode: MatchMode,

    /// Group organizations by citation authority in the record identifier
    #[arg(long, short = 'g')]
    group: bool,
}

#[derive(Args)]
struct RecordsArgs {
    #[command(flatten)]
    source: SourceArgs,

    /// Group organizations by citation authority in the record identifier
    #[arg(long, short = 'g')]
    group: bool,
}

#[derive(Args)]
struct MetricsArgs {
    #[command(subcommand)]
    command: MetricsCommand,
}

#[derive(Subcommand)]
enum MetricsCommand {
    #[command(about = "Count records with a data policy per centre")]
    DataPolicy(DataPolicyArgs),
    #[command(about = "Count Earth system disciplines per centre")]
    EarthSystemDiscipline(DisciplineArgs),
}

#[derive(Args)]
struct DataPolicyArgs {
    #[arg(value_enum)]
    policy: DataPolicy,

    #[command(flatten)]
    source: SourceArgs,
}

#[derive(Args)]
struct DisciplineArgs {
    #[command(flatten)]
    source: SourceArgs,
}

#[derive(Args)]
struct SearchArgs {
    /// Full text query
    #[arg(long, short = 'q')]
    query: Option<String>,

    /// Bounding box filter: west,south,east,north
    #[arg(long, short = 'b', allow_hyphen_values = true)]
    bbox: Option<String>,

    #[arg(long, value_enum)]
    data_policy: Option<DataPolicy>,

    /// Start of the temporal filter (RFC 3339)
    #[arg(long)]
    begin: Option<String>,

    /// End of the temporal filter (RFC 3339)
    #[arg(long)]
    end: Option<String>,

    /// Sort property, optionally suffixed with :A or :D
    #[arg(long)]
    sortby: Option<String>,

    #[arg(long)]
    limit: Option<u32>,

    #[arg(long)]
    offset: Option<u32>,
}

#[derive(Args)]
struct GetArgs {
    identifier: String,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<WiscatError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &WiscatError) -> u8 {
    match error {
        WiscatError::NotFound(_) | WiscatError::InvalidArgument(_) => 2,
        WiscatError::RemoteUnavailable { .. } | WiscatError::ResponseParse(_) => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbosity {
        Some(verbosity) => EnvFilter::new(verbosity.as_filter()),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let output_mode = if cli.json {
        OutputMode::Json
    } else {
        OutputMode::Text
    };
    let config = ConfigLoader::resolve(cli.config.as_deref())?;

    match cli.command {
        Commands::Cache(args) => {
            let (source, catalogue) = if args.wis1 {
                (CacheSource::Wis1, "wis1")
            } else {
                (CacheSource::Gdc, "gdc")
            };
            let directory = match args.directory {
                Some(directory) => directory,
                None => config.cache_dir_or_default(catalogue)?,
            };
            let client = GdcHttpClient::new(&config)?;
            let app = App::new(config, client);
            let result = app.cache(&directory, source, &LogSink)?;
            match output_mode {
                OutputMode::Json => JsonOutput::print_json(&result).into_diagnostic(),
                OutputMode::Text => TextOutput::print_cache(&result).into_diagnostic(),
            }
        }
        Commands::Report(args) => {
            let app = App::new(config, NopCatalogue);
            match args.command {
                ReportCommand::TermsByOrg(args) => {
                    let source = args.source.resolve()?;
                    info!("searching for terms {:?}", args.terms);
                    let result =
                        app.terms_by_org(&source, &args.terms, args.mode, grouping(args.group))?;
                    print_report(&result, result.results.is_empty(), output_mode)
                }
                ReportCommand::RecordsByOrg(args) => {
                    let source = args.source.resolve()?;
                    let result = app.records_by_org(&source, grouping(args.group))?;
                    print_report(&result, result.results.is_empty(), output_mode)
                }
            }
        }
        Commands::Metrics(args) => {
            let app = App::new(config, NopCatalogue);
            match args.command {
                MetricsCommand::DataPolicy(args) => {
                    let source = args.source.resolve()?;
                    let result = app.data_policy_metrics(&source, args.policy)?;
                    print_report(&result, result.results.is_empty(), output_mode)
                }
                MetricsCommand::EarthSystemDiscipline(args) => {
                    let source = args.source.resolve()?;
                    let result = app.discipline_metrics(&source)?;
                    print_report(&result, result.results.is_empty(), output_mode)
                }
            }
        }
        Commands::Search(args) => {
            let query = build_query(args)?;
            let client = GdcHttpClient::new(&config)?;
            let app = App::new(config, client);
            let page = app.search(&query)?;
            match output_mode {
                OutputMode::Json => JsonOutput::print_json(&page).into_diagnostic(),
                OutputMode::Text => TextOutput::print_search(&page).into_diagnostic(),
            }
        }
        Commands::Get(args) => {
            let id = args.identifier.parse::<RecordId>()?;
            let client = GdcHttpClient::new(&config)?;
            let app = App::new(config, client);
            let fetched = app.get(&id)?;
            match output_mode {
                OutputMode::Json => JsonOutput::print_json(&fetched.raw_json).into_diagnostic(),
                OutputMode::Text => TextOutput::print_record(&fetched).into_diagnostic(),
            }
        }
    }
}

fn grouping(group: bool) -> Grouping {
    if group {
        Grouping::Authority
    } else {
        Grouping::Organization
    }
}

fn build_query(args: SearchArgs) -> Result<SearchQuery, WiscatError> {
    let bbox = args
        .bbox
        .as_deref()
        .map(|value| value.parse::<BoundingBox>())
        .transpose()?;
    Ok(SearchQuery {
        q: args.query,
        bbox,
        data_policy: args.data_policy,
        begin: args.begin,
        end: args.end,
        sortby: args.sortby,
        limit: args.limit,
        offset: args.offset,
    })
}

fn print_report<T: Serialize>(
    result: &ReportResult<T>,
    is_empty: bool,
    output_mode: OutputMode,
) -> miette::Result<()> {
    for skipped in &result.skipped {
        warn!("skipped {}: {}", skipped.path, skipped.reason);
    }
    match output_mode {
        OutputMode::Json => JsonOutput::print_json(result).into_diagnostic(),
        OutputMode::Text if is_empty => {
            println!("No results");
            Ok(())
        }
        OutputMode::Text => JsonOutput::print_json(&result.results).into_diagnostic(),
    }
}

/// Stands in for the catalogue on commands that only read the local cache.
struct NopCatalogue;

impl CatalogueClient for NopCatalogue {
    fn archive_url(&self) -> Result<String, WiscatError> {
        Err(WiscatError::remote("catalogue client not configured"))
    }

    fn download(&self, _url: &str) -> Result<Vec<u8>, WiscatError> {
        Err(WiscatError::remote("catalogue client not configured"))
    }

    fn search(&self, _query: &SearchQuery) -> Result<SearchPage, WiscatError> {
        Err(WiscatError::remote("catalogue client not configured"))
    }

    fn get_record(&self, _id: &RecordId) -> Result<FetchedRecord, WiscatError> {
        Err(WiscatError::remote("catalogue client not configured"))
    }
}
