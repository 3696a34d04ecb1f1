use anyhow::{Context, Result};
use page_fixture::{
    config::{AppConfig, Command, ImageCommand},
    models::page::PageAsset,
    routes::routes,
    server,
    services::{
        bucket_backend::LocalBucketBackend,
        image_contract::{self, ImageContract},
        page_service::PageService,
        provisioner::Provisioner,
        report::Report,
        state_store::StateStore,
    },
};
use std::path::Path;
use tokio::signal;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // --- Parse config + command ---
    let (cfg, command) = AppConfig::from_env_and_args()?;
    tracing::debug!("Resolved config: {:?}", cfg);

    match command {
        Command::Serve => serve(&cfg).await,
        Command::Plan { destroy } => {
            let provisioner = provisioner(&cfg).await?;
            let plan = if destroy {
                provisioner.plan_destroy().await?
            } else {
                provisioner.plan().await?
            };
            println!("{}", plan);
            Ok(())
        }
        Command::Apply => {
            let summary = provisioner(&cfg).await?.apply().await?;
            println!("Apply complete! {}", summary);
            Ok(())
        }
        Command::Destroy => {
            let summary = provisioner(&cfg).await?.destroy().await?;
            println!("Destroy complete! {}", summary);
            Ok(())
        }
        Command::Output => {
            let outputs = provisioner(&cfg).await?.outputs().await?;
            match (outputs.bucket_name, outputs.bucket_arn) {
                (Some(name), Some(arn)) => {
                    println!("bucket_name = \"{}\"", name);
                    println!("bucket_arn = \"{}\"", arn);
                }
                _ => println!("No outputs. Run `apply` first."),
            }
            Ok(())
        }
        Command::Image(ImageCommand::Check { context, file }) => {
            let plan = image_contract::check(&ImageContract::default(), &context, &file)?;
            println!("{}", serde_json::to_string_pretty(&plan)?);
            println!("Image contract satisfied.");
            Ok(())
        }
        Command::Image(ImageCommand::Build {
            context,
            file,
            tag,
            builder,
        }) => {
            image_contract::build(&ImageContract::default(), &context, &file, &tag, &builder)
                .await?;
            println!("Built {}", tag);
            Ok(())
        }
        Command::Report { root, out } => report(&root, &out),
    }
}

async fn serve(cfg: &AppConfig) -> Result<()> {
    tracing::info!("Starting page-fixture with config: {:?}", cfg);

    // --- Load the page once; the server never starts without it ---
    let page = PageAsset::load(&cfg.page_path).await?;
    tracing::info!(
        "Loaded page {} ({} bytes)",
        page.source.display(),
        page.len()
    );

    let app = routes::app(PageService::new(page));

    // --- Start server ---
    let listener = server::bind_listener(cfg).await?;
    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn provisioner(cfg: &AppConfig) -> Result<Provisioner<LocalBucketBackend>> {
    let state = StateStore::open(&cfg.state_url)
        .await
        .with_context(|| format!("opening state at {}", cfg.state_url))?;
    tracing::debug!(
        "State lineage {} at serial {}",
        state.lineage().await?,
        state.serial().await?
    );
    Ok(Provisioner::new(
        state,
        LocalBucketBackend::new(&cfg.cloud_dir),
        cfg.declaration(),
    ))
}

fn report(root: &Path, out: &Path) -> Result<()> {
    let report = Report::collect(root)?;
    let (csv_path, summary_path) = report.write_outputs(out)?;
    println!("Found SARIF files: {}", report.files.len());
    println!("Findings: {}", report.findings.len());
    println!("Wrote: {}", csv_path.display());
    println!("Wrote: {}", summary_path.display());
    Ok(())
}

/// Resolves on Ctrl-C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::warn!("failed to listen for Ctrl-C: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                tracing::warn!("failed to listen for SIGTERM: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received");
}
