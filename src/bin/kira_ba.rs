use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use kira_bioassay::app::{App, ProgressSink};
use kira_bioassay::config::{ConfigLoader, ResolvedConfig};
use kira_bioassay::domain::UniprotId;
use kira_bioassay::error::KiraError;
use kira_bioassay::output::{JsonOutput, OutputMode, TextOutput};
use kira_bioassay::pug::PugHttpClient;
use kira_bioassay::store::TableStore;
use kira_bioassay::substance::DataItemNotation;

#[derive(Parser)]
#[command(name = "kira-ba")]
#[command(about = "Normalize PubChem bioassay dumps into a SQLite database")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    non_interactive: bool,

    #[arg(long, global = true)]
    config: Option<String>,

    #[arg(long, global = true)]
    database: Option<Utf8PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Load targets, substances and bioassays")]
    Build(BuildArgs),
    #[command(about = "Reload the target relation from the cross-reference file")]
    Targets(TargetArgs),
    #[command(about = "Reload substances from structure files")]
    Substances(SubstanceArgs),
    #[command(about = "Reload bioassays from archive units")]
    Bioassays(BioassayArgs),
    #[command(about = "Query PubChem for the assays of every target UniProt id")]
    UniprotMap(UniprotMapArgs),
    #[command(about = "Print stored bioassay rows for a UniProt id with substance structures")]
    Query(QueryArgs),
    #[command(about = "Show row counts of the database")]
    Status,
}

#[derive(Args, Clone)]
struct QueryArgs {
    uniprot_id: String,
}

#[derive(Args, Clone, Default)]
struct TargetArgs {
    #[arg(long)]
    protein_xrefs: Option<Utf8PathBuf>,
}

#[derive(Args, Clone, Default)]
struct SubstanceArgs {
    #[arg(long)]
    substance_dir: Option<Utf8PathBuf>,
}

#[derive(Args, Clone, Default)]
struct BioassayArgs {
    #[arg(long)]
    bioassay_dir: Option<Utf8PathBuf>,

    #[arg(long, conflicts_with = "all_assays")]
    protein_only: bool,

    #[arg(long)]
    all_assays: bool,

    #[arg(long)]
    record_empty_assays: bool,
}

#[derive(Args, Clone, Default)]
struct BuildArgs {
    #[command(flatten)]
    targets: TargetArgs,

    #[command(flatten)]
    substances: SubstanceArgs,

    #[command(flatten)]
    bioassays: BioassayArgs,
}

#[derive(Args, Clone, Default)]
struct UniprotMapArgs {
    #[arg(long)]
    request_interval_ms: Option<u64>,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(kira) = report.downcast_ref::<KiraError>() {
            return ExitCode::from(map_exit_code(kira));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &KiraError) -> u8 {
    match error {
        KiraError::MissingConfig
        | KiraError::ConfigRead(_)
        | KiraError::ConfigParse(_)
        | KiraError::MissingInput(_) => 2,
        KiraError::PubchemHttp(_) | KiraError::PubchemStatus { .. } => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.non_interactive {
        OutputMode::NonInteractive
    } else {
        OutputMode::Interactive
    };

    let mut config = ConfigLoader::resolve_or_default(cli.config.as_deref())?;
    if let Some(database) = cli.database {
        config.database = database;
    }
    match &cli.command {
        Commands::Build(args) => {
            apply_targets(&mut config, &args.targets);
            apply_substances(&mut config, &args.substances);
            apply_bioassays(&mut config, &args.bioassays);
        }
        Commands::Targets(args) => apply_targets(&mut config, args),
        Commands::Substances(args) => apply_substances(&mut config, args),
        Commands::Bioassays(args) => apply_bioassays(&mut config, args),
        Commands::UniprotMap(args) => {
            if let Some(interval) = args.request_interval_ms {
                config.request_interval_ms = interval;
            }
        }
        Commands::Query(_) | Commands::Status => {}
    }

    tracing::debug!(database = %config.database, "opening database");
    let store = TableStore::open(&config.database)?;
    let notation = DataItemNotation::new(config.line_notation_field.clone());
    let index = PugHttpClient::new()?;
    let mut app = App::new(store, index, notation, config);

    let sink: &dyn ProgressSink = match output_mode {
        OutputMode::NonInteractive => &JsonOutput,
        OutputMode::Interactive => &TextOutput,
    };

    match cli.command {
        Commands::Build(_) => {
            let report = app.build(sink)?;
            emit(output_mode, &report, || TextOutput::build(&report))
        }
        Commands::Targets(_) => {
            let report = app.rebuild_targets(sink)?;
            emit(output_mode, &report, || TextOutput::targets(&report))
        }
        Commands::Substances(_) => {
            let report = app.rebuild_substances(sink)?;
            emit(output_mode, &report, || TextOutput::substances(&report))
        }
        Commands::Bioassays(_) => {
            let report = app.rebuild_bioassays(sink)?;
            emit(output_mode, &report, || TextOutput::bioassays(&report))
        }
        Commands::UniprotMap(_) => {
            let report = app.rebuild_uniprot_assay_map(sink)?;
            emit(output_mode, &report, || TextOutput::uniprot_map(&report))
        }
        Commands::Query(args) => {
            let uniprot: UniprotId = args.uniprot_id.parse()?;
            let report = app.query_uniprot(&uniprot, sink)?;
            emit(output_mode, &report, || TextOutput::query(&report))
        }
        Commands::Status => {
            let status = app.status(sink)?;
            emit(output_mode, &status, || TextOutput::status(&status))
        }
    }
}

fn emit<T: serde::Serialize>(
    mode: OutputMode,
    value: &T,
    summary: impl FnOnce() -> String,
) -> miette::Result<()> {
    match mode {
        OutputMode::NonInteractive => JsonOutput::print(value).into_diagnostic(),
        OutputMode::Interactive => {
            println!("{}", summary());
            Ok(())
        }
    }
}

fn apply_targets(config: &mut ResolvedConfig, args: &TargetArgs) {
    if let Some(path) = &args.protein_xrefs {
        config.protein_xrefs = Some(path.clone());
    }
}

fn apply_substances(config: &mut ResolvedConfig, args: &SubstanceArgs) {
    if let Some(path) = &args.substance_dir {
        config.substance_dir = Some(path.clone());
    }
}

fn apply_bioassays(config: &mut ResolvedConfig, args: &BioassayArgs) {
    if let Some(path) = &args.bioassay_dir {
        config.bioassay_dir = Some(path.clone());
    }
    if args.protein_only {
        config.protein_only = true;
    }
    if args.all_assays {
        config.protein_only = false;
    }
    if args.record_empty_assays {
        config.record_empty_assays = true;
    }
}
