use crate::{
    models::bucket::DEFAULT_BUCKET_PREFIX, services::image_contract::SERVER_PORT,
    services::provisioner::Declaration,
};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::{env, path::PathBuf};

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub page_path: PathBuf,
    pub state_url: String,
    pub cloud_dir: PathBuf,
    pub bucket_prefix: String,
    pub region: String,
    /// Retry on 127.0.0.1 when binding a wildcard host is refused.
    pub loopback_fallback: bool,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Static page server, image contract checker and bucket provisioner"
)]
pub struct Args {
    /// Host to bind to (overrides FIXTURE_HOST)
    #[arg(long, global = true)]
    pub host: Option<String>,

    /// Port to bind to (overrides FIXTURE_PORT)
    #[arg(long, global = true)]
    pub port: Option<u16>,

    /// HTML document to serve (overrides FIXTURE_PAGE_PATH)
    #[arg(long, global = true)]
    pub page_path: Option<PathBuf>,

    /// Provisioning state database URL (overrides FIXTURE_STATE_URL)
    #[arg(long, global = true)]
    pub state_url: Option<String>,

    /// Directory backing provisioned buckets (overrides FIXTURE_CLOUD_DIR)
    #[arg(long, global = true)]
    pub cloud_dir: Option<PathBuf>,

    /// Literal the bucket suffix is appended to (overrides FIXTURE_BUCKET_PREFIX)
    #[arg(long, global = true)]
    pub bucket_prefix: Option<String>,

    /// Bucket region (overrides FIXTURE_REGION)
    #[arg(long, global = true)]
    pub region: Option<String>,

    /// Fall back to 127.0.0.1 if binding 0.0.0.0 is not permitted
    /// (or set FIXTURE_LOOPBACK_FALLBACK=true)
    #[arg(long, global = true)]
    pub loopback_fallback: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Serve the page (default)
    Serve,
    /// Show what apply would change
    Plan {
        /// Plan removal of every managed resource instead
        #[arg(long)]
        destroy: bool,
    },
    /// Create or converge the bucket and its suffix
    Apply,
    /// Remove the bucket and forget the suffix
    Destroy,
    /// Print the provisioned bucket name and ARN
    Output,
    /// Container image contract
    #[command(subcommand)]
    Image(ImageCommand),
    /// Summarize SARIF scan results into CSV and Markdown
    Report {
        /// Directory searched recursively for *.sarif files
        #[arg(long, default_value = ".")]
        root: PathBuf,
        /// Directory the report is written to
        #[arg(long, default_value = "reports")]
        out: PathBuf,
    },
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum ImageCommand {
    /// Verify the Dockerfile and build context
    Check {
        #[arg(long, default_value = ".")]
        context: PathBuf,
        #[arg(long, short = 'f', default_value = "Dockerfile")]
        file: PathBuf,
    },
    /// Verify, then run the image builder
    Build {
        #[arg(long, default_value = ".")]
        context: PathBuf,
        #[arg(long, short = 'f', default_value = "Dockerfile")]
        file: PathBuf,
        #[arg(long, short = 't', default_value = "page-fixture:latest")]
        tag: String,
        /// Builder executable invoked as `<builder> build -t <tag> -f <file> <context>`
        #[arg(long, default_value = "docker")]
        builder: String,
    },
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and the command to run.
    pub fn from_env_and_args() -> Result<(Self, Command)> {
        Self::from_args(Args::parse())
    }

    pub fn from_args(args: Args) -> Result<(Self, Command)> {
        // --- Environment fallback ---
        let env_host = env::var("FIXTURE_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = port_from_env(env::var("FIXTURE_PORT"))?;
        let env_page = env::var("FIXTURE_PAGE_PATH").unwrap_or_else(|_| "./index.html".into());
        let env_state = env::var("FIXTURE_STATE_URL")
            .unwrap_or_else(|_| "sqlite://./data/state/fixture.db".into());
        let env_cloud = env::var("FIXTURE_CLOUD_DIR").unwrap_or_else(|_| "./data/cloud".into());
        let env_prefix =
            env::var("FIXTURE_BUCKET_PREFIX").unwrap_or_else(|_| DEFAULT_BUCKET_PREFIX.into());
        let env_region = env::var("FIXTURE_REGION").unwrap_or_else(|_| "us-east-1".into());
        let env_fallback = flag_from_env(env::var("FIXTURE_LOOPBACK_FALLBACK"));

        // --- Merge ---
        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            page_path: args.page_path.unwrap_or_else(|| env_page.into()),
            state_url: args.state_url.unwrap_or(env_state),
            cloud_dir: args.cloud_dir.unwrap_or_else(|| env_cloud.into()),
            bucket_prefix: args.bucket_prefix.unwrap_or(env_prefix),
            region: args.region.unwrap_or(env_region),
            loopback_fallback: args.loopback_fallback || env_fallback,
        };

        Ok((cfg, args.command.unwrap_or(Command::Serve)))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn declaration(&self) -> Declaration {
        Declaration::fixture(self.bucket_prefix.clone(), self.region.clone())
    }
}

fn flag_from_env(value: Result<String, env::VarError>) -> bool {
    value.is_ok_and(|value| matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
}

fn port_from_env(value: Result<String, env::VarError>) -> Result<u16> {
    match value {
        Ok(value) => value
            .parse::<u16>()
            .with_context(|| format!("parsing FIXTURE_PORT value `{}`", value)),
        Err(env::VarError::NotPresent) => Ok(SERVER_PORT),
        Err(err) => Err(err).context("reading FIXTURE_PORT"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_subcommand_means_serve() {
        let (_, command) = AppConfig::from_args(Args::parse_from(["page-fixture"])).unwrap();
        assert_eq!(command, Command::Serve);
    }

    #[test]
    fn flags_override_environment_after_subcommand() {
        let args = Args::parse_from([
            "page-fixture",
            "apply",
            "--state-url",
            "sqlite://./tmp/state.db",
            "--bucket-prefix",
            "other-prefix",
            "--port",
            "8081",
        ]);
        let (cfg, command) = AppConfig::from_args(args).unwrap();

        assert_eq!(command, Command::Apply);
        assert_eq!(cfg.state_url, "sqlite://./tmp/state.db");
        assert_eq!(cfg.bucket_prefix, "other-prefix");
        assert_eq!(cfg.port, 8081);
        assert_eq!(cfg.declaration().bucket.name_prefix, "other-prefix");
    }

    #[test]
    fn image_subcommands_parse() {
        let args = Args::parse_from(["page-fixture", "image", "build", "-t", "site:1"]);
        assert_eq!(
            args.command,
            Some(Command::Image(ImageCommand::Build {
                context: ".".into(),
                file: "Dockerfile".into(),
                tag: "site:1".into(),
                builder: "docker".into(),
            }))
        );
    }

    #[test]
    fn loopback_fallback_is_opt_in() {
        assert!(!flag_from_env(Err(env::VarError::NotPresent)));
        assert!(!flag_from_env(Ok("no".into())));
        assert!(flag_from_env(Ok("TRUE".into())));
        assert!(flag_from_env(Ok("1".into())));

        let args = Args::parse_from(["page-fixture", "serve", "--loopback-fallback"]);
        let (cfg, _) = AppConfig::from_args(args).unwrap();
        assert!(cfg.loopback_fallback);
    }

    #[test]
    fn port_env_parsing() {
        assert_eq!(port_from_env(Err(env::VarError::NotPresent)).unwrap(), 5000);
        assert_eq!(port_from_env(Ok("8080".into())).unwrap(), 8080);
        let err = port_from_env(Ok("eighty".into())).unwrap_err();
        assert!(err.to_string().contains("FIXTURE_PORT"));
    }
}
