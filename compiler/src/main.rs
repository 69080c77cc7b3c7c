use clap::Parser;
use std::path::PathBuf;

use streamgen::diag::Diagnostic;
use streamgen::generate::GeneratorOptions;
use streamgen::pipeline::{run_pipeline, CompilationState, CompileOptions, Stage};
use streamgen::templates::CppTemplates;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum Emit {
    /// Domain sections and global groups as JSON
    Json,
    /// Stitched template text (requires --template)
    Text,
    /// Provenance of the run
    BuildInfo,
}

#[derive(Parser, Debug)]
#[command(
    name = "streamgen",
    version,
    about = "Stream code generator: lowers dataflow program trees to per-domain code sections"
)]
struct Cli {
    /// Program tree (JSON) produced by the front-end
    tree: PathBuf,

    /// Output file path (stdout when omitted)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// What to write
    #[arg(long, value_enum, default_value_t = Emit::Json)]
    emit: Emit,

    /// Target template with %%Domain:section%% tokens
    #[arg(long)]
    template: Option<PathBuf>,

    /// Platform namespace whose blocks are visible
    #[arg(long)]
    platform: Option<String>,

    /// Domain of streams that declare none
    #[arg(long, default_value = "AudioDomain")]
    default_domain: String,

    /// Default rate of the default domain
    #[arg(long)]
    default_rate: Option<f64>,

    /// Print stage timing and generator tracing
    #[arg(short, long)]
    verbose: bool,
}

fn read_file(path: &PathBuf) -> String {
    match std::fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("streamgen: error: {}: {}", path.display(), e);
            std::process::exit(2);
        }
    }
}

fn main() {
    let cli = Cli::parse();

    env_logger::Builder::new()
        .format_timestamp(None)
        .filter_level(if cli.verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Warn
        })
        .target(env_logger::Target::Stderr)
        .init();

    log::info!("tree = {}", cli.tree.display());
    log::info!("emit = {:?}", cli.emit);

    let source = read_file(&cli.tree);
    let template = cli.template.as_ref().map(read_file);
    if cli.emit == Emit::Text && template.is_none() {
        eprintln!("streamgen: error: --emit text requires --template");
        std::process::exit(2);
    }

    let options = CompileOptions {
        generator: GeneratorOptions {
            platform: cli.platform.clone(),
            framework: None,
            default_domain: cli.default_domain.clone(),
            default_rate: cli.default_rate,
        },
        template,
        verbose: cli.verbose,
    };

    let mut state = CompilationState::new();
    let templates = CppTemplates::new();
    let terminal = match cli.emit {
        Emit::BuildInfo => Stage::Load,
        Emit::Json => Stage::Generate,
        Emit::Text => Stage::Stitch,
    };
    let mut print_diags = |_: Stage, diags: &[Diagnostic]| {
        for d in diags {
            eprintln!("streamgen: {}", d);
        }
    };
    if run_pipeline(
        &mut state,
        &source,
        &templates,
        &options,
        terminal,
        &mut print_diags,
    )
    .is_err()
    {
        std::process::exit(1);
    }

    let text = match cli.emit {
        Emit::BuildInfo => state
            .provenance
            .as_ref()
            .map(|p| p.to_json())
            .unwrap_or_default(),
        Emit::Json => match &state.generated {
            Some(g) => match serde_json::to_string_pretty(g) {
                Ok(mut s) => {
                    s.push('\n');
                    s
                }
                Err(e) => {
                    eprintln!("streamgen: error: cannot serialize output: {}", e);
                    std::process::exit(1);
                }
            },
            None => std::process::exit(1),
        },
        Emit::Text => state.stitched.clone().unwrap_or_default(),
    };

    match &cli.output {
        Some(path) => {
            if let Err(e) = std::fs::write(path, text) {
                eprintln!("streamgen: error: {}: {}", path.display(), e);
                std::process::exit(2);
            }
        }
        None => print!("{}", text),
    }
}
