//! Main entry point for CLI command to start server.

use std::io::IsTerminal;
use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use anyhow::Result;
use anyhow::anyhow;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::configuration::Configuration;
use crate::configuration::generate_config_schema;
use crate::router::RouterHttpServer;
use crate::router::ShutdownSource;

/// Options for the gateway
#[derive(Parser, Debug)]
#[command(
    name = "stitch-router",
    about = "GraphQL gateway stitching remote schemas together",
    disable_version_flag = true
)]
pub(crate) struct Opt {
    /// Log level (off|error|warn|info|debug|trace).
    #[arg(
        long = "log",
        default_value = "info",
        alias = "log-level",
        env = "STITCH_ROUTER_LOG"
    )]
    log_level: String,

    /// Configuration location relative to the current directory.
    #[arg(short, long = "config", env = "STITCH_ROUTER_CONFIG_PATH")]
    config_path: Option<PathBuf>,

    /// Overrides `server.listen` from the configuration.
    #[arg(long, env = "STITCH_ROUTER_LISTEN")]
    listen: Option<SocketAddr>,

    /// Prints the configuration schema.
    #[arg(long)]
    schema: bool,

    /// Display version and exit.
    #[arg(long, short = 'V')]
    pub(crate) version: bool,
}

/// This is the main gateway entrypoint.
pub fn main() -> Result<()> {
    let mut builder = tokio::runtime::Builder::new_multi_thread();
    builder.enable_all();
    if let Some(nb) = std::env::var("STITCH_ROUTER_NUM_CORES")
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
    {
        builder.worker_threads(nb);
    }
    let runtime = builder.build()?;
    runtime.block_on(Executable::builder().start())
}

/// Entry point into creating a gateway executable.
pub struct Executable {}

#[buildstructor::buildstructor]
impl Executable {
    /// Parses the command line, sets up logging and serves until CTRL+C or SIGTERM.
    ///
    /// Note that if you do not specify a runtime you must be in the context of an existing tokio runtime.
    #[builder(entry = "builder", exit = "start")]
    pub async fn start(shutdown: Option<ShutdownSource>) -> Result<()> {
        let opt = Opt::parse();

        if opt.version {
            println!("{}", std::env!("CARGO_PKG_VERSION"));
            return Ok(());
        }

        if opt.schema {
            let schema = generate_config_schema();
            println!("{}", serde_json::to_string_pretty(&schema)?);
            return Ok(());
        }

        let builder = tracing_subscriber::fmt::fmt().with_env_filter(
            EnvFilter::try_new(&opt.log_level).context("could not parse log configuration")?,
        );
        if std::io::stdout().is_terminal() {
            builder.try_init()
        } else {
            builder.json().try_init()
        }
        .map_err(|e| anyhow!("could not set up logging: {e}"))?;
        setup_panic_handler();

        let configuration = load_configuration(opt.config_path)?.with_listen(opt.listen);
        tracing::info!(
            "Stitch Router v{} // {}",
            std::env!("CARGO_PKG_VERSION"),
            configuration
        );

        let server = RouterHttpServer::builder()
            .configuration(configuration)
            .shutdown(shutdown.unwrap_or(ShutdownSource::CtrlC))
            .start();
        if let Err(err) = server.await {
            tracing::error!("{}", err);
            return Err(err.into());
        }
        Ok(())
    }
}

fn load_configuration(path: Option<PathBuf>) -> Result<Configuration> {
    let Some(path) = path else {
        return Err(anyhow!(
            r#"the gateway needs a configuration declaring its upstream sources:

    $ stitch-router --config router.yaml

The JSON schema of the configuration is printed by:

    $ stitch-router --schema
"#
        ));
    };
    let path = if path.is_relative() {
        std::env::current_dir()?.join(path)
    } else {
        path
    };
    Ok(Configuration::from_file(&path)?)
}

fn setup_panic_handler() {
    // Redirect panics to the logs.
    let backtrace_env = std::env::var("RUST_BACKTRACE");
    let show_backtraces =
        backtrace_env.as_deref() == Ok("1") || backtrace_env.as_deref() == Ok("full");
    std::panic::set_hook(Box::new(move |e| {
        if show_backtraces {
            let backtrace = std::backtrace::Backtrace::force_capture();
            tracing::error!("{}\n{}", e, backtrace)
        } else {
            tracing::error!("{}", e)
        }
    }));
}
