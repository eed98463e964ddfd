use lfsg_core::api;
use lfsg_core::util::config::Config;
use lfsg_core::util::shutdown::shutdown_signal;
use lfsg_core::util::usage;
use std::future::Future;
use tracing_subscriber::EnvFilter;

const APP_VERSION: &str = match option_env!("LFSG_APP_VERSION") {
    Some(value) => value,
    None => env!("CARGO_PKG_VERSION"),
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    if usage::handle_cli_flags(APP_VERSION) {
        return Ok(());
    }

    install_crypto_provider();
    init_tracing();

    let config = Config::load()?;
    let state = api::AppState::new(config)?;
    tracing::info!(
        listen = %state.config.listen,
        bucket = %state.config.s3_bucket,
        "starting LFS broker"
    );

    let servers = api::build_servers(state)?;
    wait_for_exit(servers.run_all()).await;
    Ok(())
}

fn install_crypto_provider() {
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("failed to install rustls ring crypto provider");
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
}

async fn wait_for_exit<F>(run_all: F)
where
    F: Future<Output = ()>,
{
    tokio::select! {
        _ = run_all => {},
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received");
        }
    }
}
