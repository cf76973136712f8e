// Android builds over adb: apk and apks installs, command-line file, activity launch
use super::{BuildRunner, HandleSet};
use crate::archive;
use crate::constants;
use crate::descriptor::{FetchedArtifacts, Role};
use crate::error::{BisectError, Result};
use crate::path_context;
use crate::target::{BackendVariant, Target};
use crate::tools::{ToolOutput, ToolRunner};
use async_trait::async_trait;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Launch information of a browser apk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AndroidPackage {
    pub package: &'static str,
    pub activity: &'static str,
    /// Command-line file name under the device's tmp dir
    pub cmdline_file: &'static str,
}

const CHROME_MAIN: &str = "com.google.android.apps.chrome.Main";
const CHROME_CMDLINE: &str = "chrome-command-line";

static PACKAGES: &[(&str, AndroidPackage)] = &[
    ("chrome", package("com.google.android.apps.chrome")),
    ("chrome_stable", package("com.android.chrome")),
    ("chrome_beta", package("com.chrome.beta")),
    ("chrome_dev", package("com.chrome.dev")),
    ("chrome_canary", package("com.chrome.canary")),
    ("chromium", package("org.chromium.chrome")),
];

const fn package(name: &'static str) -> AndroidPackage {
    AndroidPackage {
        package: name,
        activity: CHROME_MAIN,
        cmdline_file: CHROME_CMDLINE,
    }
}

/// Package info for `apk`; WebView apks have none and take no args.
pub fn package_info(apk: &str) -> Option<&'static AndroidPackage> {
    PACKAGES
        .iter()
        .find(|(name, _)| *name == apk)
        .map(|(_, info)| info)
}

// ============================================================================
// Device bridge
// ============================================================================

/// One device reached through `adb` (and `bundletool` for `.apks`).
#[derive(Clone)]
pub struct AdbDevice {
    tools: Arc<dyn ToolRunner>,
    serial: Option<String>,
}

impl AdbDevice {
    pub fn new(tools: Arc<dyn ToolRunner>, serial: Option<String>) -> Self {
        Self { tools, serial }
    }

    async fn adb(&self, args: &[&str], what: &str, timeout: Option<Duration>) -> Result<ToolOutput> {
        let mut full = Vec::new();
        if let Some(serial) = &self.serial {
            full.push("-s".to_string());
            full.push(serial.clone());
        }
        full.extend(args.iter().map(|a| a.to_string()));
        let out = self.tools.run(constants::ADB_TOOL, &full, timeout).await?;
        if !out.success() {
            return Err(out.failure(constants::ADB_TOOL, what));
        }
        Ok(out)
    }

    /// `ro.build.version.sdk` of the device.
    pub async fn sdk_level(&self) -> Result<u32> {
        let out = self
            .adb(&["shell", "getprop", "ro.build.version.sdk"], "Query SDK level", None)
            .await?;
        out.stdout.trim().parse().map_err(|_| {
            BisectError::tool(
                constants::ADB_TOOL,
                format!("unexpected SDK level {:?}", out.stdout.trim()),
            )
        })
    }

    /// Installs an `.apk` (replacing and allowing downgrades) or an `.apks` set.
    pub async fn install(&self, path: &Path) -> Result<()> {
        log::info!("Installing {} on android device...", path.display());
        let path_text = path.display().to_string();
        if path_text.ends_with(".apks") {
            let mut args = vec![
                "install-apks".to_string(),
                format!("--apks={}", path_text),
                "--allow-downgrade".to_string(),
            ];
            if let Some(serial) = &self.serial {
                args.push(format!("--device-id={}", serial));
            }
            let out = self.tools.run(constants::BUNDLETOOL, &args, None).await?;
            if !out.success() {
                return Err(out.failure(constants::BUNDLETOOL, "Install apks"));
            }
            return Ok(());
        }
        let out = self
            .adb(&["install", "-r", "-d", &path_text], "Install apk", None)
            .await?;
        // Older adb versions exit 0 and report the failure on stdout.
        if out.stdout.contains("Failure") {
            return Err(out.failure(constants::ADB_TOOL, "Install apk"));
        }
        Ok(())
    }

    pub async fn uninstall(&self, package: &str) -> Result<()> {
        self.adb(&["uninstall", package], "Uninstall package", None).await?;
        Ok(())
    }

    /// Replaces the flags in the package's command-line file.
    pub async fn set_command_line(&self, file: &str, args: &[String]) -> Result<()> {
        let joined = shlex::try_join(args.iter().map(String::as_str))
            .map_err(|e| BisectError::CliUsage(format!("cannot quote browser args: {}", e)))?;
        let mut local = tempfile::NamedTempFile::new()?;
        // The first token stands in for the program name.
        writeln!(local, "_ {}", joined)?;
        let remote = format!("{}/{}", constants::ANDROID_CMDLINE_DIR, file);
        let local_text = local.path().display().to_string();
        self.adb(&["push", &local_text, &remote], "Write command-line file", None)
            .await?;
        Ok(())
    }

    /// Force-stops and starts `package`, waiting for the launch to complete.
    pub async fn start_activity(&self, package: &AndroidPackage, timeout: Duration) -> Result<ToolOutput> {
        log::info!("Launching {} on android device...", package.package);
        let component = format!("{}/{}", package.package, package.activity);
        self.adb(
            &[
                "shell",
                "am",
                "start",
                "-W",
                "-S",
                "-a",
                "android.intent.action.MAIN",
                "-n",
                &component,
            ],
            "Start activity",
            Some(timeout),
        )
        .await
    }
}

// ============================================================================
// Runner
// ============================================================================

/// Where the apks come from for each Android variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallPlan {
    /// The download is the apk itself
    Direct,
    /// Library then base bundle, both downloaded directly
    TrichromeDirect,
    /// Zip holding `*/apks/<apk>`
    Archived { apk: &'static str },
    /// Zip holding the library and the minimal base bundle
    TrichromeArchived { library: &'static str, apks: String },
}

pub struct AndroidRunner {
    device: AdbDevice,
    apk: String,
    plan: InstallPlan,
    package: Option<&'static AndroidPackage>,
}

impl AndroidRunner {
    pub fn new(target: &Target, tools: Arc<dyn ToolRunner>) -> Result<Self> {
        let plan = match target.variant() {
            BackendVariant::AndroidReleaseGcs => InstallPlan::Direct,
            BackendVariant::AndroidTrichromeRelease => InstallPlan::TrichromeDirect,
            BackendVariant::AndroidTrichromeOfficial => {
                let names = path_context::trichrome_names(&target.apk, &target.archive, true)?;
                InstallPlan::TrichromeArchived {
                    library: names.library,
                    apks: names.apks.replace(".apks", ".minimal.apks"),
                }
            }
            BackendVariant::AndroidOfficial | BackendVariant::AndroidSnapshot => InstallPlan::Archived {
                apk: path_context::apk_filename(&target.apk, target.require_sdk()?)?,
            },
            other => {
                return Err(BisectError::InternalInvariantViolation(format!(
                    "{} is not an Android variant",
                    other
                )));
            }
        };
        Ok(Self {
            device: AdbDevice::new(tools, target.device_id.clone()),
            apk: target.apk.clone(),
            plan,
            package: package_info(&target.apk),
        })
    }

    pub fn plan(&self) -> &InstallPlan {
        &self.plan
    }

    fn packages(&self) -> Vec<&'static str> {
        let mut packages = Vec::new();
        if matches!(
            self.plan,
            InstallPlan::TrichromeDirect | InstallPlan::TrichromeArchived { .. }
        ) {
            packages.push(constants::TRICHROME_LIBRARY_PACKAGE);
        }
        if let Some(info) = self.package {
            packages.push(info.package);
        }
        packages
    }

    /// Installs the shared library, then the browser on top of it. A failed
    /// browser install takes the library back off the device.
    async fn install_trichrome(&self, library: &Path, base: &Path) -> Result<()> {
        self.device.install(library).await?;
        if let Err(e) = self.device.install(base).await {
            let package = constants::TRICHROME_LIBRARY_PACKAGE;
            if let Err(rollback) = self.device.uninstall(package).await {
                log::warn!("Failed to uninstall {} after a failed install: {}", package, rollback);
            }
            return Err(e);
        }
        Ok(())
    }
}

fn find_apk(scratch: &Path, name: &str) -> Result<std::path::PathBuf> {
    archive::glob_unique(name, &archive::glob_in(scratch, &format!("*/apks/{}", name)))
}

#[async_trait]
impl BuildRunner for AndroidRunner {
    async fn install(&self, artifacts: &FetchedArtifacts, scratch: &Path) -> Result<HandleSet> {
        match &self.plan {
            InstallPlan::Direct => {
                self.device.install(artifacts.require(Role::Chrome)?).await?;
            }
            InstallPlan::TrichromeDirect => {
                self.install_trichrome(
                    artifacts.require(Role::TrichromeLibrary)?,
                    artifacts.require(Role::Trichrome)?,
                )
                .await?;
            }
            InstallPlan::Archived { apk } => {
                let zip = artifacts.require(Role::Chrome)?;
                archive::extract_async(zip.to_path_buf(), scratch.to_path_buf()).await?;
                self.device.install(&find_apk(scratch, apk)?).await?;
            }
            InstallPlan::TrichromeArchived { library, apks } => {
                let zip = artifacts.require(Role::Chrome)?;
                archive::extract_async(zip.to_path_buf(), scratch.to_path_buf()).await?;
                let library = find_apk(scratch, library)?;
                let apks = find_apk(scratch, apks)?;
                self.install_trichrome(&library, &apks).await?;
            }
        }
        Ok(HandleSet::Android {
            packages: self.packages(),
        })
    }

    async fn launch(&self, _handles: &HandleSet, args: &[String], timeout: Duration) -> Result<ToolOutput> {
        if !args.is_empty() {
            let info = self
                .package
                .ok_or_else(|| BisectError::ArgsUnsupported(self.apk.clone()))?;
            self.device.set_command_line(info.cmdline_file, args).await?;
        }
        match self.package {
            Some(info) => self.device.start_activity(info, timeout).await,
            None => {
                log::warn!("{} has no launcher activity; start an app using it to test", self.apk);
                Ok(ToolOutput {
                    status: Some(0),
                    ..ToolOutput::default()
                })
            }
        }
    }

    /// Removes the installed packages in reverse install order. Failures
    /// only warn: the next install replaces the packages anyway.
    async fn uninstall(&self, handles: &HandleSet) -> Result<()> {
        let HandleSet::Android { packages } = handles else {
            return Err(BisectError::InternalInvariantViolation(
                "android runner given non-android handles".into(),
            ));
        };
        for package in packages.iter().rev() {
            if let Err(e) = self.device.uninstall(package).await {
                log::warn!("Failed to uninstall {}: {}", package, e);
            }
        }
        Ok(())
    }
}
