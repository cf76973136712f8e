// Desktop builds: unzip into scratch, find the binary, run the command template
use super::{BuildRunner, HandleSet, LaunchSettings, expand_profile};
use crate::archive;
use crate::descriptor::FetchedArtifacts;
use crate::error::{BisectError, Result};
use crate::target::Target;
use crate::tools::{self, ToolOutput, ToolRunner};
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

pub struct DesktopRunner {
    tools: Arc<dyn ToolRunner>,
    settings: LaunchSettings,
    binary_name: &'static str,
    chromedriver_binary: Option<&'static str>,
    no_sandbox: bool,
}

impl DesktopRunner {
    pub fn new(target: &Target, settings: LaunchSettings, tools: Arc<dyn ToolRunner>) -> Result<Self> {
        let binary_name = target.context.binary_name.ok_or_else(|| {
            BisectError::InternalInvariantViolation(format!("no binary name for {}", target.archive))
        })?;
        let chromedriver_binary = if target.chromedriver {
            Some(target.context.chromedriver_binary_name.ok_or_else(|| {
                BisectError::CliUsage(format!("chromedriver is not available for {}", target.archive))
            })?)
        } else {
            None
        };
        if settings.template.uses_chromedriver() && chromedriver_binary.is_none() {
            return Err(BisectError::CliUsage(
                "%d in the command template requires --chromedriver".into(),
            ));
        }
        Ok(Self {
            tools,
            settings,
            binary_name,
            chromedriver_binary,
            // Release builds refuse to start the sandbox as a non-root user.
            no_sandbox: target.is_linux(),
        })
    }

    /// Flags passed ahead of the user's browser args.
    fn extra_args(&self, scratch: &Path) -> Vec<String> {
        let mut args = vec![format!(
            "--user-data-dir={}",
            expand_profile(&self.settings.profile, scratch)
        )];
        if self.no_sandbox {
            args.push("--no-sandbox".to_string());
        }
        args
    }
}

#[async_trait]
impl BuildRunner for DesktopRunner {
    async fn install(&self, artifacts: &FetchedArtifacts, scratch: &Path) -> Result<HandleSet> {
        // chromedriver either has its own archive or ships in the same one.
        for path in artifacts.paths() {
            archive::extract_async(path.to_path_buf(), scratch.to_path_buf()).await?;
        }
        let chrome = archive::glob_unique(
            "chrome",
            &archive::glob_in(scratch, &format!("*/{}", self.binary_name)),
        )?;
        let chromedriver = match self.chromedriver_binary {
            Some(name) => Some(archive::glob_unique(
                "chromedriver",
                &archive::glob_in(scratch, &format!("*/{}", name)),
            )?),
            None => None,
        };
        Ok(HandleSet::Desktop {
            chrome,
            chromedriver,
            scratch: scratch.to_path_buf(),
        })
    }

    async fn launch(&self, handles: &HandleSet, args: &[String], timeout: Duration) -> Result<ToolOutput> {
        let HandleSet::Desktop {
            chrome,
            chromedriver,
            scratch,
        } = handles
        else {
            return Err(BisectError::InternalInvariantViolation(
                "desktop runner given non-desktop handles".into(),
            ));
        };
        let mut full_args = self.extra_args(scratch);
        full_args.extend(args.iter().cloned());
        let command = self
            .settings
            .template
            .render(chrome, chromedriver.as_deref(), &full_args, scratch)?;
        log::info!("Running: {}", command);
        let (program, shell_args) = tools::shell_command(&command);
        self.tools.run(&program, &shell_args, Some(timeout)).await
    }

    /// Nothing to undo; the scratch dir goes away with the run.
    async fn uninstall(&self, _handles: &HandleSet) -> Result<()> {
        Ok(())
    }
}
