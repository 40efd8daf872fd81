mod commands;

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use commands::{
    EXIT_CACHE_ERROR, EXIT_DECODE_ERROR, EXIT_FAILURE, EXIT_SOURCE_ERROR,
};
use layerscope_core::{install_signal_handler, CancelToken, Engine, ScanConfig, Scope};
use layerscope_format::Format;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "layerscope",
    version,
    about = "Layer-aware file catalogs and SBOMs for container images"
)]
struct Cli {
    /// Content cache directory (overrides the config file).
    #[arg(long, global = true)]
    cache: Option<String>,

    /// Config file to read instead of ~/.config/layerscope/config.toml.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output results as structured JSON.
    #[arg(long, default_value_t = false, global = true)]
    json: bool,

    /// Enable verbose (debug) logging output.
    #[arg(short, long, default_value_t = false, global = true)]
    verbose: bool,

    /// Enable trace-level logging (more detailed than --verbose).
    #[arg(long, default_value_t = false, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Catalog every file of an image and write an SBOM.
    Catalog {
        /// Image source: dir:PATH, oci-dir:PATH, docker-archive:PATH, tar:PATH[,PATH...], or a path.
        source: String,
        /// Resolver scope: squashed or all-layers.
        #[arg(long)]
        scope: Option<Scope>,
        /// Document format: layerscope-json, spdx-tag-value, spdx-json, cyclonedx-json.
        #[arg(short, long)]
        output: Option<Format>,
        /// Write the document here instead of stdout.
        #[arg(long)]
        file: Option<PathBuf>,
        /// Worker threads for entry fetch and digesting.
        #[arg(long)]
        workers: Option<usize>,
        /// Compute SHA-256 and BLAKE3 digests of file contents.
        #[arg(long, default_value_t = false)]
        digests: bool,
        /// Skip content digests even if the config enables them.
        #[arg(long, default_value_t = false, conflicts_with = "digests")]
        no_digests: bool,
    },
    /// List cataloged files with their type, mode, and owner.
    Files {
        /// Image source.
        source: String,
        /// Resolver scope: squashed or all-layers.
        #[arg(long)]
        scope: Option<Scope>,
        /// Only list paths matching this glob (`*` within a component, `**` across).
        #[arg(long)]
        glob: Option<String>,
    },
    /// Show the layers of an image, bottom first.
    Layers {
        /// Image source.
        source: String,
    },
    /// Print the content of a file.
    Cat {
        /// Image source.
        source: String,
        /// Absolute path inside the image.
        path: String,
        /// Read the version recorded by this layer (full or short id) instead of the squashed one.
        #[arg(long)]
        layer: Option<String>,
    },
    /// Re-encode an SBOM document into another format.
    Convert {
        /// Input document (`-` for stdin); its format is detected.
        input: PathBuf,
        /// Target format.
        #[arg(short, long)]
        output: Format,
        /// Write the document here instead of stdout.
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Verify content cache integrity.
    VerifyCache,
    /// Generate shell completions for bash, zsh, fish, elvish, or powershell.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
    /// Generate man pages in the specified directory.
    ManPages {
        /// Output directory for man pages.
        #[arg(default_value = "man")]
        dir: PathBuf,
    },
}

fn load_config(cli: &Cli) -> Result<ScanConfig, String> {
    let mut config = match &cli.config {
        Some(path) => ScanConfig::load(&expand_tilde(&path.to_string_lossy())),
        None => ScanConfig::load_default(),
    }
    .map_err(|e| e.to_string())?;
    if let Some(cache) = &cli.cache {
        config.cache_dir = Some(expand_tilde(cache));
    }
    Ok(config)
}

fn engine(config: ScanConfig) -> Result<Engine, String> {
    Engine::from_config(config).map_err(|e| e.to_string())
}

fn run(cli: Cli, cancel: &CancelToken) -> Result<u8, String> {
    let json = cli.json;
    let mut config = load_config(&cli)?;

    match cli.command {
        Commands::Catalog {
            source,
            scope,
            output,
            file,
            workers,
            digests,
            no_digests,
        } => {
            if let Some(scope) = scope {
                config.scope = scope;
            }
            if let Some(format) = output {
                config.format = format;
            }
            if workers.is_some() {
                config.workers = workers;
            }
            if digests {
                config.digests = true;
            } else if no_digests {
                config.digests = false;
            }
            let engine = engine(config)?;
            commands::catalog::run(&engine, &source, file.as_deref(), cancel, json)
        }
        Commands::Files {
            source,
            scope,
            glob,
        } => {
            let scope = scope.unwrap_or(config.scope);
            let engine = engine(config)?;
            commands::files::run(&engine, &source, scope, glob.as_deref(), cancel, json)
        }
        Commands::Layers { source } => commands::layers::run(&engine(config)?, &source, json),
        Commands::Cat {
            source,
            path,
            layer,
        } => commands::cat::run(&engine(config)?, &source, &path, layer.as_deref()),
        Commands::Convert {
            input,
            output,
            file,
        } => commands::convert::run(&input, output, file.as_deref(), json),
        Commands::VerifyCache => commands::verify_cache::run(&engine(config)?, json),
        Commands::Completions { shell } => commands::completions::run::<Cli>(shell),
        Commands::ManPages { dir } => commands::man_pages::run::<Cli>(&dir),
    }
}

fn main() -> ExitCode {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let msg = info.to_string();
        if msg.contains("Broken pipe")
            || msg.contains("broken pipe")
            || msg.contains("os error 32")
            || msg.contains("failed printing to stdout")
        {
            std::process::exit(0);
        }
        default_hook(info);
    }));

    let cli = Cli::parse();

    let default_level = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("LAYERSCOPE_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    let cancel = CancelToken::new();
    install_signal_handler(cancel.clone());

    match run(cli, &cancel) {
        Ok(code) => ExitCode::from(code),
        Err(msg) => {
            eprintln!("error: {msg}");
            let code = if msg.starts_with("cannot construct layer store:")
                || msg.starts_with("invalid source")
            {
                EXIT_SOURCE_ERROR
            } else if msg.starts_with("cache error:") || msg.starts_with("cache lock error:") {
                EXIT_CACHE_ERROR
            } else if msg.starts_with("document error:") {
                EXIT_DECODE_ERROR
            } else {
                EXIT_FAILURE
            };
            ExitCode::from(code)
        }
    }
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(stripped);
        }
    }
    PathBuf::from(path)
}
