//! Linear build sequence: apt mirror, toolchain, pip mirror, dependencies,
//! source copy and finally the application server.
//!
//! The first failing step aborts the run. Nothing is retried.

use crate::config::Settings;
use crate::error::{MirrorError, Result};
use crate::sources::{apt::AptManager, pip::PipManager};
use crate::utils;
use serde::Serialize;
use std::path::PathBuf;
use tokio::process::Command;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Action {
    RewriteSources,
    ConfigurePipMirror {
        index_url: String,
        trusted_host: String,
    },
    Exec {
        program: String,
        args: Vec<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        cwd: Option<PathBuf>,
    },
    CopyTree {
        from: PathBuf,
        to: PathBuf,
        exclude: Vec<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Step {
    pub name: &'static str,
    #[serde(flatten)]
    pub action: Action,
}

impl Step {
    fn exec(name: &'static str, program: &str, args: Vec<String>) -> Self {
        Step {
            name,
            action: Action::Exec {
                program: program.to_string(),
                args,
                cwd: None,
            },
        }
    }
}

/// The full ordered plan. `start` appends the application server launch.
pub fn plan(settings: &Settings, start: bool) -> Vec<Step> {
    let app = &settings.app;

    let mut install_args: Vec<String> = ["install", "-y", "--no-install-recommends"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    install_args.extend(settings.toolchain.packages.iter().cloned());

    let mut steps = vec![
        Step {
            name: "rewrite-sources",
            action: Action::RewriteSources,
        },
        Step::exec("apt-update", "apt-get", vec!["update".to_string()]),
        Step::exec("install-toolchain", "apt-get", install_args),
        Step {
            name: "configure-pip-mirror",
            action: Action::ConfigurePipMirror {
                index_url: settings.pip.index_url.clone(),
                trusted_host: settings.pip.trusted_host.clone(),
            },
        },
        Step::exec(
            "install-dependencies",
            &settings.pip.program,
            vec![
                "install".to_string(),
                "--no-cache-dir".to_string(),
                "-r".to_string(),
                app.source_dir.join(&app.manifest).to_string_lossy().into_owned(),
            ],
        ),
        Step {
            name: "copy-source",
            action: Action::CopyTree {
                from: app.source_dir.clone(),
                to: app.target_dir.clone(),
                exclude: app.exclude.clone(),
            },
        },
    ];

    if start {
        steps.push(start_step(settings));
    }
    steps
}

/// `uvicorn main:app --host 0.0.0.0 --port 8000`, run from the target dir.
pub fn start_step(settings: &Settings) -> Step {
    let app = &settings.app;
    Step {
        name: "start",
        action: Action::Exec {
            program: app.server.clone(),
            args: vec![
                app.module.clone(),
                "--host".to_string(),
                app.host.clone(),
                "--port".to_string(),
                app.port.to_string(),
            ],
            cwd: Some(app.target_dir.clone()),
        },
    }
}

pub struct Sequencer<'a> {
    settings: &'a Settings,
    dry_run: bool,
}

impl<'a> Sequencer<'a> {
    pub fn new(settings: &'a Settings) -> Self {
        Self {
            settings,
            dry_run: false,
        }
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Run `steps` in order, stopping at the first failure.
    pub async fn run(&self, steps: &[Step]) -> Result<()> {
        let total = steps.len();
        for (i, step) in steps.iter().enumerate() {
            info!("[{}/{}] {}", i + 1, total, step.name);
            if self.dry_run {
                info!("  (dry run) {:?}", step.action);
                continue;
            }
            if let Err(err) = self.run_step(step).await {
                warn!("Step '{}' failed, aborting remaining steps", step.name);
                return Err(err);
            }
        }
        Ok(())
    }

    async fn run_step(&self, step: &Step) -> Result<()> {
        match &step.action {
            Action::RewriteSources => {
                let outcome = AptManager::new(self.settings.apt.clone())
                    .rewrite_mirrors()
                    .await?;
                info!("  {}", outcome);
            }
            Action::ConfigurePipMirror {
                index_url,
                trusted_host,
            } => {
                PipManager::new(self.settings.pip.clone())
                    .configure_package_mirror(index_url, trusted_host)
                    .await?;
            }
            Action::Exec { program, args, cwd } => {
                let mut cmd = Command::new(program);
                cmd.args(args);
                if let Some(dir) = cwd {
                    cmd.current_dir(dir);
                }
                let status = cmd.status().await.map_err(|source| MirrorError::Spawn {
                    program: program.clone(),
                    source,
                })?;
                if !status.success() {
                    return Err(MirrorError::StepFailed {
                        step: step.name.to_string(),
                        code: status.code().unwrap_or(1),
                    });
                }
            }
            Action::CopyTree { from, to, exclude } => {
                let copied = utils::copy_tree(from, to, exclude).await?;
                info!("  copied {} files from {:?} to {:?}", copied, from, to);
            }
        }
        Ok(())
    }
}
