//! src/services/image_contract.rs
//!
//! The container build contract. A Dockerfile is reduced to a `BuildPlan`
//! (what the final image will look like and what the build reads from the
//! context), and `ImageContract::verify` checks it before any builder runs.
//! A plan with violations is never handed to the builder, so a broken build
//! context can not produce a tagged image.

use dockerfile_parser::{
    BreakableString, BreakableStringComponent, Dockerfile, Instruction, ShellOrExecExpr,
};
use serde::Serialize;
use std::{
    fmt, io,
    path::{Path, PathBuf},
    process::ExitStatus,
};
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info};

/// Port the page server listens on.
pub const SERVER_PORT: u16 = 5000;

#[derive(Debug, Error)]
pub enum ImageError {
    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse Dockerfile: {0}")]
    Parse(#[from] dockerfile_parser::Error),
    #[error("Dockerfile has no build stage")]
    NoStage,
    #[error("image contract violated:{}", render_violations(.0))]
    Contract(Vec<Violation>),
    #[error("failed to launch `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("`{program}` exited with {status}")]
    BuildFailed { program: String, status: ExitStatus },
}

fn render_violations(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(|violation| format!("\n  - {}", violation))
        .collect()
}

/// One way a build plan breaks the contract.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Violation {
    MissingSource(PathBuf),
    Workdir {
        expected: String,
        found: Option<String>,
    },
    Cmd {
        expected: Vec<String>,
        found: Option<Vec<String>>,
    },
    Ports {
        expected: u16,
        found: Vec<String>,
    },
    CopyOrder {
        expected: Vec<String>,
        found: Vec<String>,
    },
    NoInstallStep(String),
    RetainedCache(String),
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Violation::MissingSource(path) => {
                write!(f, "build context is missing `{}`", path.display())
            }
            Violation::Workdir { expected, found } => {
                write!(f, "workdir must be `{}`, found {:?}", expected, found)
            }
            Violation::Cmd { expected, found } => {
                write!(f, "startup command must be {:?}, found {:?}", expected, found)
            }
            Violation::Ports { expected, found } => write!(
                f,
                "image must expose exactly port {}, found {:?}",
                expected, found
            ),
            Violation::CopyOrder { expected, found } => write!(
                f,
                "final stage must copy {:?} in that order, found {:?}",
                expected, found
            ),
            Violation::NoInstallStep(marker) => {
                write!(f, "no dependency install step (`{}`) found", marker)
            }
            Violation::RetainedCache(command) => {
                write!(f, "install step keeps its package cache: `{}`", command)
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CopyStep {
    pub sources: Vec<String>,
    pub destination: String,
    /// Stage the sources come from; `None` means the build context.
    pub from_stage: Option<String>,
}

/// What a Dockerfile builds, reduced to the parts the contract looks at.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct BuildPlan {
    pub base_image: String,
    pub workdir: Option<String>,
    /// Copies in the final stage, in order.
    pub copies: Vec<CopyStep>,
    pub exposed_ports: Vec<String>,
    pub cmd: Option<Vec<String>>,
    /// Every RUN command of every stage, flattened to one line each.
    pub run_commands: Vec<String>,
    /// Every path any stage copies from the build context.
    pub context_sources: Vec<String>,
}

impl BuildPlan {
    pub fn from_dockerfile(text: &str) -> Result<Self, ImageError> {
        let dockerfile = Dockerfile::parse(text)?;
        let stages = dockerfile.stages();
        let last = stages.stages.last().ok_or(ImageError::NoStage)?;

        let mut plan = BuildPlan::default();

        for instruction in dockerfile.instructions.iter() {
            match instruction {
                Instruction::Run(run) => plan.run_commands.push(expr_to_line(&run.expr)),
                Instruction::Copy(copy)
                    if !copy.flags.iter().any(|f| is_from_flag(&f.name.content)) =>
                {
                    for source in copy.sources.iter() {
                        if !plan.context_sources.contains(&source.content) {
                            plan.context_sources.push(source.content.clone());
                        }
                    }
                }
                _ => {}
            }
        }

        for instruction in last.instructions.iter() {
            match instruction {
                Instruction::From(from) => plan.base_image = from.image.content.clone(),
                Instruction::Copy(copy) => plan.copies.push(CopyStep {
                    sources: copy.sources.iter().map(|s| s.content.clone()).collect(),
                    destination: copy.destination.content.clone(),
                    from_stage: copy
                        .flags
                        .iter()
                        .find(|f| is_from_flag(&f.name.content))
                        .map(|f| f.value.content.clone()),
                }),
                Instruction::Cmd(cmd) => plan.cmd = Some(expr_to_argv(&cmd.expr)),
                Instruction::Misc(misc) => {
                    let arguments = breakable_to_line(&misc.arguments);
                    if misc.instruction.content.eq_ignore_ascii_case("WORKDIR") {
                        plan.workdir = Some(arguments);
                    } else if misc.instruction.content.eq_ignore_ascii_case("EXPOSE") {
                        plan.exposed_ports
                            .extend(arguments.split_whitespace().map(str::to_string));
                    }
                }
                _ => {}
            }
        }

        Ok(plan)
    }

    /// File names of the first source of each final-stage copy.
    pub fn copied_names(&self) -> Vec<String> {
        self.copies
            .iter()
            .filter_map(|copy| copy.sources.first())
            .filter_map(|source| Path::new(source).file_name())
            .map(|name| name.to_string_lossy().into_owned())
            .collect()
    }
}

/// Expected shape of the runtime image.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageContract {
    pub workdir: String,
    pub port: u16,
    pub cmd: Vec<String>,
    /// Final-stage copies that must appear, in this order: server before page.
    pub copy_order: Vec<String>,
    /// Context files that must exist even if the Dockerfile forgot them.
    pub required_context: Vec<PathBuf>,
    /// Substring identifying the dependency install step.
    pub install_marker: String,
}

impl Default for ImageContract {
    fn default() -> Self {
        Self {
            workdir: "/app".into(),
            port: SERVER_PORT,
            cmd: vec!["/app/page-fixture".into()],
            copy_order: vec!["page-fixture".into(), "index.html".into()],
            required_context: vec!["Cargo.toml".into(), "static/index.html".into()],
            install_marker: "cargo fetch".into(),
        }
    }
}

impl ImageContract {
    /// Every violation of the contract, missing context files first.
    pub fn verify(&self, plan: &BuildPlan, context_dir: &Path) -> Vec<Violation> {
        let mut violations = Vec::new();

        let mut sources: Vec<PathBuf> = self.required_context.clone();
        for source in plan.context_sources.iter().filter(|s| !is_glob(s)) {
            let source = PathBuf::from(source.trim_start_matches("./"));
            if !sources.contains(&source) {
                sources.push(source);
            }
        }
        for source in sources {
            if !context_dir.join(&source).exists() {
                violations.push(Violation::MissingSource(source));
            }
        }

        if plan.workdir.as_deref() != Some(self.workdir.as_str()) {
            violations.push(Violation::Workdir {
                expected: self.workdir.clone(),
                found: plan.workdir.clone(),
            });
        }

        if plan.cmd.as_ref() != Some(&self.cmd) {
            violations.push(Violation::Cmd {
                expected: self.cmd.clone(),
                found: plan.cmd.clone(),
            });
        }

        let expected_port = self.port.to_string();
        let ports_ok = !plan.exposed_ports.is_empty()
            && plan.exposed_ports.iter().all(|port| {
                port == &expected_port || port == &format!("{}/tcp", expected_port)
            });
        if !ports_ok {
            violations.push(Violation::Ports {
                expected: self.port,
                found: plan.exposed_ports.clone(),
            });
        }

        let copied = plan.copied_names();
        if !is_subsequence(&self.copy_order, &copied) {
            violations.push(Violation::CopyOrder {
                expected: self.copy_order.clone(),
                found: copied,
            });
        }

        if !plan
            .run_commands
            .iter()
            .any(|command| command.contains(&self.install_marker))
        {
            violations.push(Violation::NoInstallStep(self.install_marker.clone()));
        }

        for command in &plan.run_commands {
            if retains_cache(command) {
                violations.push(Violation::RetainedCache(command.clone()));
            }
        }

        violations
    }
}

/// Read and verify `dockerfile` against `context_dir`.
pub fn check(
    contract: &ImageContract,
    context_dir: &Path,
    dockerfile: &Path,
) -> Result<BuildPlan, ImageError> {
    let text = std::fs::read_to_string(dockerfile).map_err(|source| ImageError::Read {
        path: dockerfile.to_path_buf(),
        source,
    })?;
    let plan = BuildPlan::from_dockerfile(&text)?;
    debug!("build plan: {:?}", plan);

    let violations = contract.verify(&plan, context_dir);
    if violations.is_empty() {
        Ok(plan)
    } else {
        Err(ImageError::Contract(violations))
    }
}

/// Verify, then run `{builder} build -t {tag} -f {dockerfile} {context_dir}`.
/// The builder is never started when verification fails.
pub async fn build(
    contract: &ImageContract,
    context_dir: &Path,
    dockerfile: &Path,
    tag: &str,
    builder: &str,
) -> Result<BuildPlan, ImageError> {
    let plan = check(contract, context_dir, dockerfile)?;

    info!("building image {} with {}", tag, builder);
    let status = Command::new(builder)
        .arg("build")
        .arg("-t")
        .arg(tag)
        .arg("-f")
        .arg(dockerfile)
        .arg(context_dir)
        .status()
        .await
        .map_err(|source| ImageError::Spawn {
            program: builder.to_string(),
            source,
        })?;

    if !status.success() {
        return Err(ImageError::BuildFailed {
            program: builder.to_string(),
            status,
        });
    }

    info!("image {} built", tag);
    Ok(plan)
}

fn is_from_flag(name: &str) -> bool {
    name.eq_ignore_ascii_case("from")
}

fn is_glob(source: &str) -> bool {
    source.contains(['*', '?', '['])
}

fn is_subsequence(needle: &[String], haystack: &[String]) -> bool {
    let mut remaining = haystack.iter();
    needle
        .iter()
        .all(|wanted| remaining.any(|candidate| candidate == wanted))
}

fn retains_cache(command: &str) -> bool {
    (command.contains("apt-get install") && !command.contains("/var/lib/apt/lists"))
        || (command.contains("pip install") && !command.contains("--no-cache-dir"))
        || (command.contains("apk add") && !command.contains("--no-cache"))
}

fn breakable_to_line(value: &BreakableString) -> String {
    value
        .components
        .iter()
        .filter_map(|component| match component {
            BreakableStringComponent::String(s) => Some(s.content.trim()),
            BreakableStringComponent::Comment(_) => None,
        })
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn expr_to_line(expr: &ShellOrExecExpr) -> String {
    match expr {
        ShellOrExecExpr::Exec(exec) => exec.as_str_vec().join(" "),
        ShellOrExecExpr::Shell(shell) => breakable_to_line(shell),
    }
}

fn expr_to_argv(expr: &ShellOrExecExpr) -> Vec<String> {
    match expr {
        ShellOrExecExpr::Exec(exec) => exec
            .as_str_vec()
            .iter()
            .map(|s| s.to_string())
            .collect(),
        ShellOrExecExpr::Shell(shell) => {
            vec!["/bin/sh".into(), "-c".into(), breakable_to_line(shell)]
        }
    }
}
