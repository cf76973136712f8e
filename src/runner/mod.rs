// Installing and launching fetched builds on the host, a device or a simulator
mod android;
mod desktop;
mod ios;
mod template;

pub use android::{AdbDevice, AndroidPackage, AndroidRunner, InstallPlan, package_info};
pub use desktop::DesktopRunner;
pub use ios::{IosDeviceRunner, IosSimulatorRunner};
pub use template::{CommandTemplate, expand_profile};

use crate::constants;
use crate::descriptor::FetchedArtifacts;
use crate::error::Result;
use crate::target::{BackendVariant, Target};
use crate::tools::{ToolOutput, ToolRunner};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// What `install` left behind for `launch` and `uninstall`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandleSet {
    Desktop {
        chrome: PathBuf,
        chromedriver: Option<PathBuf>,
        scratch: PathBuf,
    },
    Android {
        /// Packages in install order
        packages: Vec<&'static str>,
    },
    Ios {
        bundle_id: String,
    },
}

/// Platform lifecycle for one tested revision. Calls are strictly serial.
#[async_trait]
pub trait BuildRunner: Send + Sync {
    async fn install(&self, artifacts: &FetchedArtifacts, scratch: &Path) -> Result<HandleSet>;

    /// Runs the build once. Exceeding `timeout` yields `LaunchTimeout`.
    async fn launch(&self, handles: &HandleSet, args: &[String], timeout: Duration) -> Result<ToolOutput>;

    async fn uninstall(&self, handles: &HandleSet) -> Result<()>;
}

/// Desktop launch options from `-c` and `-p`.
#[derive(Debug, Clone)]
pub struct LaunchSettings {
    pub template: CommandTemplate,
    pub profile: String,
}

impl LaunchSettings {
    pub fn new(command: &str, profile: impl Into<String>) -> Result<Self> {
        Ok(Self {
            template: CommandTemplate::parse(command)?,
            profile: profile.into(),
        })
    }

    /// `%p %a` with the profile inside the scratch dir.
    pub fn standard() -> Result<Self> {
        Self::new(constants::DEFAULT_COMMAND, constants::DEFAULT_PROFILE)
    }
}

/// Picks the runner family matching the target's variant.
pub fn create_runner(
    target: &Target,
    settings: LaunchSettings,
    tools: Arc<dyn ToolRunner>,
) -> Result<Arc<dyn BuildRunner>> {
    let runner: Arc<dyn BuildRunner> = match target.variant() {
        BackendVariant::SnapshotHttp
        | BackendVariant::OfficialGcs
        | BackendVariant::ReleaseGcs
        | BackendVariant::AsanGcs => Arc::new(DesktopRunner::new(target, settings, tools)?),
        BackendVariant::AndroidReleaseGcs
        | BackendVariant::AndroidTrichromeRelease
        | BackendVariant::AndroidTrichromeOfficial
        | BackendVariant::AndroidOfficial
        | BackendVariant::AndroidSnapshot => Arc::new(AndroidRunner::new(target, tools)?),
        BackendVariant::IosRelease => Arc::new(IosDeviceRunner::new(target, tools)?),
        BackendVariant::IosSimulator => Arc::new(IosSimulatorRunner::new(target, tools)?),
    };
    Ok(runner)
}
