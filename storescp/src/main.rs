use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use dicom_archive_storescp::{ScpConfig, StorageScp};
use dicom_archive_ul::association::negotiation::CalledAeTitlePolicy;
use snafu::{Report, ResultExt, Whatever};
use tracing::{error, info, Level};
use tracing_subscriber::EnvFilter;

/// DICOM C-STORE SCP persisting instances into an archive
#[derive(Debug, Parser)]
#[command(version)]
struct App {
    /// Verbose mode
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,
    /// Application Entity title of this node
    #[arg(long = "ae-title", default_value = "STORE-SCP")]
    ae_title: String,
    /// Reject association requests not calling this node's AE title
    #[arg(long = "require-called-ae-title")]
    require_called_ae_title: bool,
    /// Enforce max pdu length
    #[arg(short = 's', long = "strict")]
    strict: bool,
    /// Only accept native/uncompressed transfer syntaxes
    #[arg(long)]
    uncompressed_only: bool,
    /// Accept unknown SOP classes
    #[arg(long)]
    promiscuous: bool,
    /// Maximum PDU length
    #[arg(
        short = 'm',
        long = "max-pdu-length",
        default_value = "16384",
        value_parser(clap::value_parser!(u32).range(4096..=131072))
    )]
    max_pdu_length: u32,
    /// Seconds without incoming data before an association is aborted (0 to wait forever)
    #[arg(long = "idle-timeout", default_value = "60")]
    idle_timeout: u64,
    /// Seconds granted to open associations on shutdown
    #[arg(long = "shutdown-deadline", default_value = "10")]
    shutdown_deadline: u64,
    /// Archive root directory
    #[arg(short = 'o', long = "archive", default_value = ".")]
    archive_root: PathBuf,
    /// Address to listen on
    #[arg(long = "bind", default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    bind_address: IpAddr,
    /// Which port to listen on
    #[arg(short, default_value = "11111")]
    port: u16,
}

impl From<&App> for ScpConfig {
    fn from(app: &App) -> Self {
        ScpConfig {
            bind_address: app.bind_address,
            port: app.port,
            ae_title: app.ae_title.clone(),
            max_pdu_length: app.max_pdu_length,
            idle_timeout: (app.idle_timeout > 0).then(|| Duration::from_secs(app.idle_timeout)),
            strict: app.strict,
            promiscuous: app.promiscuous,
            uncompressed_only: app.uncompressed_only,
            called_ae_title_policy: if app.require_called_ae_title {
                CalledAeTitlePolicy::RequireOwn
            } else {
                CalledAeTitlePolicy::AcceptAny
            },
            archive_root: app.archive_root.clone(),
        }
    }
}

fn main() {
    let app = App::parse();
    let level = if app.verbose { Level::DEBUG } else { Level::INFO };
    tracing::subscriber::set_global_default(
        tracing_subscriber::FmtSubscriber::builder()
            .with_env_filter(
                EnvFilter::builder()
                    .with_default_directive(level.into())
                    .from_env_lossy(),
            )
            .finish(),
    )
    .whatever_context("Could not set up global logging subscriber")
    .unwrap_or_else(|e: Whatever| {
        eprintln!("[ERROR] {}", Report::from_error(e));
    });

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .whatever_context("Could not start async runtime");
    let result = runtime.and_then(|runtime| runtime.block_on(run(app)));
    if let Err(e) = result {
        error!("{}", Report::from_error(e));
        std::process::exit(-2);
    }
}

async fn run(app: App) -> Result<(), Whatever> {
    let deadline = Duration::from_secs(app.shutdown_deadline);
    let mut handle = StorageScp::start(ScpConfig::from(&app))
        .await
        .whatever_context("Could not start storage service provider")?;

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.whatever_context("Could not listen for shutdown signal")?;
            info!("Shutdown requested");
            handle
                .stop(deadline)
                .await
                .whatever_context("Storage service provider failed while stopping")
        }
        result = handle.wait() => {
            result.whatever_context("Storage service provider failed")
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::App;
    use clap::CommandFactory;

    #[test]
    fn verify_cli() {
        App::command().debug_assert();
    }
}
