// iOS builds: devicectl for devices, simctl for simulators
use super::{BuildRunner, HandleSet};
use crate::archive;
use crate::constants;
use crate::descriptor::{FetchedArtifacts, Role};
use crate::error::{BisectError, Result};
use crate::target::Target;
use crate::tools::{ToolOutput, ToolRunner};
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

fn require_device(target: &Target) -> Result<String> {
    target
        .device_id
        .clone()
        .ok_or_else(|| BisectError::CliUsage("--device-id is required for iOS builds.".into()))
}

fn args_of(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|p| p.to_string()).collect()
}

async fn xcrun(tools: &dyn ToolRunner, args: Vec<String>, what: &str, timeout: Option<Duration>) -> Result<ToolOutput> {
    let out = tools.run(constants::XCRUN_TOOL, &args, timeout).await?;
    if !out.success() {
        return Err(out.failure(constants::XCRUN_TOOL, what));
    }
    Ok(out)
}

/// CFBundleIdentifier read from an Info.plist with plutil.
async fn bundle_identifier(tools: &dyn ToolRunner, plist: &Path) -> Result<String> {
    let args = vec![
        "-extract".to_string(),
        "CFBundleIdentifier".to_string(),
        "raw".to_string(),
        plist.display().to_string(),
    ];
    let out = tools.run(constants::PLUTIL_TOOL, &args, None).await?;
    if !out.success() {
        return Err(out.failure(constants::PLUTIL_TOOL, "Read bundle identifier"));
    }
    let bundle_id = out.stdout.trim();
    if bundle_id.is_empty() {
        return Err(BisectError::tool(
            constants::PLUTIL_TOOL,
            format!("no CFBundleIdentifier in {}", plist.display()),
        ));
    }
    Ok(bundle_id.to_string())
}

fn bundle_of(handles: &HandleSet) -> Result<&str> {
    match handles {
        HandleSet::Ios { bundle_id } => Ok(bundle_id),
        _ => Err(BisectError::InternalInvariantViolation(
            "iOS runner given non-iOS handles".into(),
        )),
    }
}

// ============================================================================
// Device
// ============================================================================

pub struct IosDeviceRunner {
    tools: Arc<dyn ToolRunner>,
    device_id: String,
}

impl IosDeviceRunner {
    pub fn new(target: &Target, tools: Arc<dyn ToolRunner>) -> Result<Self> {
        Ok(Self {
            tools,
            device_id: require_device(target)?,
        })
    }
}

#[async_trait]
impl BuildRunner for IosDeviceRunner {
    async fn install(&self, artifacts: &FetchedArtifacts, scratch: &Path) -> Result<HandleSet> {
        let ipa = artifacts.require(Role::Chrome)?;
        log::info!("Installing {} on iOS device {}...", ipa.display(), self.device_id);
        let mut args = args_of(&["devicectl", "device", "install", "app", "--device", &self.device_id]);
        args.push(ipa.display().to_string());
        xcrun(self.tools.as_ref(), args, "Install app", None).await?;

        // The ipa is a zip; the bundle id lives in Payload/<name>.app/Info.plist.
        archive::extract_async(ipa.to_path_buf(), scratch.to_path_buf()).await?;
        let plist = archive::glob_unique("Info.plist", &archive::glob_in(scratch, "Payload/*/Info.plist"))?;
        let bundle_id = bundle_identifier(self.tools.as_ref(), &plist).await?;
        Ok(HandleSet::Ios { bundle_id })
    }

    async fn launch(&self, handles: &HandleSet, args: &[String], timeout: Duration) -> Result<ToolOutput> {
        let bundle_id = bundle_of(handles)?;
        let mut full = args_of(&[
            "devicectl",
            "device",
            "process",
            "launch",
            "--device",
            &self.device_id,
            bundle_id,
        ]);
        full.extend(args.iter().cloned());
        xcrun(self.tools.as_ref(), full, "Launch app", Some(timeout)).await
    }

    async fn uninstall(&self, handles: &HandleSet) -> Result<()> {
        let bundle_id = bundle_of(handles)?;
        let args = args_of(&["devicectl", "device", "uninstall", "app", "--device", &self.device_id, bundle_id]);
        if let Err(e) = xcrun(self.tools.as_ref(), args, "Uninstall app", None).await {
            log::warn!("Failed to uninstall {}: {}", bundle_id, e);
        }
        Ok(())
    }
}

// ============================================================================
// Simulator
// ============================================================================

pub struct IosSimulatorRunner {
    tools: Arc<dyn ToolRunner>,
    device_id: String,
    app_name: &'static str,
}

impl IosSimulatorRunner {
    pub fn new(target: &Target, tools: Arc<dyn ToolRunner>) -> Result<Self> {
        let app_name = target.context.binary_name.ok_or_else(|| {
            BisectError::InternalInvariantViolation(format!("no app name for {}", target.archive))
        })?;
        Ok(Self {
            tools,
            device_id: require_device(target)?,
            app_name,
        })
    }
}

#[async_trait]
impl BuildRunner for IosSimulatorRunner {
    async fn install(&self, artifacts: &FetchedArtifacts, scratch: &Path) -> Result<HandleSet> {
        // Booting an already booted simulator fails; that is fine.
        let boot = args_of(&["simctl", "boot", &self.device_id]);
        if let Err(e) = xcrun(self.tools.as_ref(), boot, "Boot simulator", None).await {
            log::warn!("{}", e);
        }

        let archive_path = artifacts.require(Role::Chrome)?;
        archive::extract_async(archive_path.to_path_buf(), scratch.to_path_buf()).await?;
        let app = archive::glob_unique(self.app_name, &archive::glob_in(scratch, self.app_name))?;
        log::info!("Installing {} on simulator {}...", app.display(), self.device_id);
        let mut install = args_of(&["simctl", "install", &self.device_id]);
        install.push(app.display().to_string());
        xcrun(self.tools.as_ref(), install, "Install app", None).await?;

        let bundle_id = bundle_identifier(self.tools.as_ref(), &app.join("Info.plist")).await?;
        Ok(HandleSet::Ios { bundle_id })
    }

    /// A failed launch is reported through the exit code.
    async fn launch(&self, handles: &HandleSet, args: &[String], timeout: Duration) -> Result<ToolOutput> {
        let bundle_id = bundle_of(handles)?;
        let mut full = args_of(&["simctl", "launch", &self.device_id, bundle_id]);
        full.extend(args.iter().cloned());
        let out = self.tools.run(constants::XCRUN_TOOL, &full, Some(timeout)).await?;
        if !out.success() {
            log::warn!("{}", out.failure(constants::XCRUN_TOOL, "Launch app"));
        }
        Ok(out)
    }

    async fn uninstall(&self, handles: &HandleSet) -> Result<()> {
        let bundle_id = bundle_of(handles)?;
        let args = args_of(&["simctl", "uninstall", &self.device_id, bundle_id]);
        if let Err(e) = xcrun(self.tools.as_ref(), args, "Uninstall app", None).await {
            log::warn!("Failed to uninstall {}: {}", bundle_id, e);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::test_support::RecordingTools;
    use crate::target::BuildType;
    use std::io::Write;

    fn target(archive: &str) -> Target {
        let mut target = Target::new(BuildType::Release, archive).unwrap();
        target.device_id = Some("DEVICE-1".into());
        target
    }

    #[tokio::test]
    async fn test_device_install_reads_bundle_id() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let ipa = dir.path().join("bisect-canary.ipa");
        {
            let mut zip = zip::ZipWriter::new(std::fs::File::create(&ipa)?);
            zip.start_file("Payload/Chrome.app/Info.plist", zip::write::SimpleFileOptions::default())?;
            zip.write_all(b"<plist/>")?;
            zip.finish()?;
        }
        let tools = Arc::new(RecordingTools::default().reply("plutil", "com.google.chrome.ios.canary\n", 0));
        let runner = IosDeviceRunner::new(&target("ios"), tools.clone())?;
        let handles = runner.install(&FetchedArtifacts::Single(ipa), &dir.path().join("scratch")).await?;
        assert_eq!(
            handles,
            HandleSet::Ios {
                bundle_id: "com.google.chrome.ios.canary".into()
            }
        );
        runner
            .launch(&handles, &["--flag".to_string()], Duration::from_secs(5))
            .await?;

        let calls = tools.calls();
        assert!(calls[0].starts_with("xcrun devicectl device install app --device DEVICE-1 "));
        assert!(calls[1].starts_with("plutil -extract CFBundleIdentifier raw "));
        assert!(calls[1].ends_with("Payload/Chrome.app/Info.plist"));
        assert_eq!(
            calls[2],
            "xcrun devicectl device process launch --device DEVICE-1 com.google.chrome.ios.canary --flag"
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_simulator_boot_failure_is_tolerated() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let archive_path = dir.path().join("Chromium.tar.gz");
        {
            let encoder = flate2::write::GzEncoder::new(
                std::fs::File::create(&archive_path)?,
                flate2::Compression::default(),
            );
            let mut builder = tar::Builder::new(encoder);
            let mut header = tar::Header::new_gnu();
            header.set_size(0);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, "Chromium.app/Info.plist", &b""[..])?;
            builder.into_inner()?.finish()?;
        }
        let tools = Arc::new(
            RecordingTools::default()
                .reply("xcrun simctl boot", "", 149)
                .reply("xcrun simctl launch", "", 1)
                .reply("plutil", "org.chromium.ost.chrome\n", 0),
        );
        let runner = IosSimulatorRunner::new(&target("ios-simulator"), tools.clone())?;
        let handles = runner
            .install(&FetchedArtifacts::Single(archive_path), &dir.path().join("scratch"))
            .await?;
        let out = runner.launch(&handles, &[], Duration::from_secs(5)).await?;
        assert_eq!(out.status, Some(1));

        let calls = tools.calls();
        assert_eq!(calls[0], "xcrun simctl boot DEVICE-1");
        assert!(calls[1].starts_with("xcrun simctl install DEVICE-1 "));
        assert!(calls[1].ends_with("Chromium.app"));
        assert_eq!(calls[3], "xcrun simctl launch DEVICE-1 org.chromium.ost.chrome");
        Ok(())
    }

    #[test]
    fn test_device_id_required() {
        let tools: Arc<dyn ToolRunner> = Arc::new(RecordingTools::default());
        let target = Target::new(BuildType::Release, "ios").unwrap();
        assert!(matches!(IosDeviceRunner::new(&target, tools), Err(BisectError::CliUsage(_))));
    }
}
