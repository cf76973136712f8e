use crate::bisect::{DriverConfig, PrefetchStrategy};
use crate::constants;
use crate::error::{BisectError, Result};
use crate::path_context;
use crate::retry::RetryPolicy;
use crate::revision::Version;
use crate::runner::{CommandTemplate, LaunchSettings};
use crate::target::{BuildType, Target};
use std::path::PathBuf;
use std::time::Duration;

/// Validated configuration for one bisection
#[derive(Debug, Clone)]
pub struct BisectOptions {
    /// Archive tag (`-a`); detected from the host when `None`
    pub archive: Option<String>,
    pub build_type: BuildType,
    pub good: String,
    /// Bad endpoint; the latest build when `None`
    pub bad: Option<String>,
    pub signed: bool,
    pub apk: String,
    pub ipa: String,
    /// adb serial or iOS device/simulator id
    pub device_id: Option<String>,
    pub chromedriver: bool,
    /// Desktop command template (`-c`)
    pub command: String,
    pub profile: String,
    /// Launches per revision
    pub times: u32,
    pub use_local_cache: bool,
    /// Cache file override; `BISECT_BUILDS_CACHE` or the user cache dir otherwise
    pub cache_path: Option<PathBuf>,
    pub verify_range: bool,
    /// Judge by exit code instead of asking
    pub not_interactive: bool,
    pub launch_timeout: Duration,
    pub prefetch: PrefetchStrategy,
    /// Browser args after `--`
    pub args: Vec<String>,
}

impl Default for BisectOptions {
    fn default() -> Self {
        Self {
            archive: None,
            build_type: BuildType::Snapshot,
            good: String::new(),
            bad: None,
            signed: false,
            apk: constants::DEFAULT_APK.to_string(),
            ipa: constants::DEFAULT_IPA.to_string(),
            device_id: None,
            chromedriver: false,
            command: constants::DEFAULT_COMMAND.to_string(),
            profile: constants::DEFAULT_PROFILE.to_string(),
            times: 1,
            use_local_cache: true,
            cache_path: None,
            verify_range: false,
            not_interactive: false,
            launch_timeout: Duration::from_secs(constants::DEFAULT_LAUNCH_TIMEOUT_SECS),
            prefetch: PrefetchStrategy::AssumeGood,
            args: Vec::new(),
        }
    }
}

impl BisectOptions {
    /// The archive to bisect: `-a` if given, else the host's.
    pub fn archive(&self) -> Result<String> {
        match &self.archive {
            Some(archive) => Ok(archive.clone()),
            None => detect_archive(std::env::consts::OS, std::env::consts::ARCH)
                .map(str::to_string)
                .ok_or_else(|| BisectError::CliUsage("Error: Missing required parameter: --archive".into())),
        }
    }

    /// Checks the flag combinations that cannot work, before anything is
    /// listed or downloaded.
    pub fn validate(&self) -> Result<()> {
        let archive = self.archive()?;
        // Fails with the list of supported archives.
        Target::new(self.build_type, archive.as_str())?;

        if self.signed && !(archive.starts_with("android-") || archive.starts_with("ios")) {
            return Err(BisectError::CliUsage(
                "--signed is only supported for Android and iOS platform.".into(),
            ));
        }
        if self.signed && self.build_type != BuildType::Release {
            return Err(BisectError::CliUsage("--signed is only supported for release bisection.".into()));
        }
        if self.good.trim().is_empty() {
            return Err(BisectError::CliUsage("Please specify a good version.".into()));
        }
        if self.build_type == BuildType::Release {
            let Some(bad) = &self.bad else {
                return Err(BisectError::CliUsage("Please specify a bad version.".into()));
            };
            if !is_full_version(&self.good) || !is_full_version(bad) {
                return Err(BisectError::CliUsage(
                    "For release, you can only use chrome version to bisect.".into(),
                ));
            }
        }
        if self.times < 1 {
            return Err(BisectError::CliUsage(format!(
                "Number of times to run ({}) must be greater than or equal to 1.",
                self.times
            )));
        }
        if archive.starts_with("android") {
            if !path_context::apk_choices().contains(&self.apk.as_str()) {
                return Err(BisectError::CliUsage(format!("unknown --apk {}", self.apk)));
            }
            if path_context::is_webview(&self.apk) && !self.args.is_empty() {
                return Err(BisectError::ArgsUnsupported(self.apk.clone()));
            }
        }
        if archive.starts_with("ios") && self.device_id.is_none() {
            return Err(BisectError::CliUsage("--device-id is required for iOS builds.".into()));
        }
        if CommandTemplate::parse(&self.command)?.uses_chromedriver() && !self.chromedriver {
            return Err(BisectError::CliUsage(
                "%d in the command template requires --chromedriver".into(),
            ));
        }
        Ok(())
    }

    /// Non-fatal advice about the chosen options.
    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        let archive = self.archive().unwrap_or_default();
        if self.build_type == BuildType::Official {
            warnings.push(
                "Bisecting on continuous Chrome builds. If you would like to bisect on release builds, \
                 try running with -r option instead."
                    .to_string(),
            );
        }
        if self.build_type == BuildType::Release && archive.starts_with("android-") && !self.apk.contains('_') {
            // Channel builds are named chrome_stable, chrome_beta, ...
            warnings.push(format!(
                "Android release typically only uploads channel builds, so you will often see \
                 \"Found 0 builds\" with --apk={}. Switch to using --apk=chrome_stable or one of \
                 the other channels.",
                self.apk
            ));
        }
        if self.build_type == BuildType::Release && archive == "ios" && !self.signed {
            warnings.push("--signed is recommended for iOS release builds.".to_string());
        }
        warnings
    }

    /// Target for backend and runner selection. Android targets still need
    /// the device SDK filled in.
    pub fn target(&self) -> Result<Target> {
        let mut target = Target::new(self.build_type, self.archive()?)?;
        target.chromedriver = self.chromedriver;
        target.signed = self.signed;
        target.apk = self.apk.clone();
        target.ipa = self.ipa.clone();
        target.device_id = self.device_id.clone();
        Ok(target)
    }

    pub fn launch_settings(&self) -> Result<LaunchSettings> {
        LaunchSettings::new(&self.command, self.profile.clone())
    }

    pub fn driver_config(&self) -> DriverConfig {
        DriverConfig {
            times: self.times,
            launch_timeout: self.launch_timeout,
            args: self.args.clone(),
            verify_range: self.verify_range,
            prefetch: self.prefetch,
            temp_root: std::env::temp_dir(),
            retry: RetryPolicy::default(),
        }
    }
}

fn is_full_version(s: &str) -> bool {
    Version::parse(s.trim()).is_ok_and(|v| v.is_full())
}

/// Archive matching a host OS and CPU architecture, as named by
/// `std::env::consts`.
pub fn detect_archive(os: &str, arch: &str) -> Option<&'static str> {
    let arch = match arch {
        "x86_64" => "x64",
        "x86" => "x86",
        "arm" | "aarch64" => "arm",
        _ => return None,
    };
    match (os, arch) {
        ("linux", "x64") => Some("linux64"),
        ("macos", "x64") => Some("mac64"),
        ("macos", "x86") => Some("mac"),
        ("macos", "arm") => Some("mac-arm"),
        ("windows", "x64") => Some("win64"),
        ("windows", "x86") => Some("win"),
        ("windows", "arm") => Some("win-arm64"),
        _ => None,
    }
}

/// Builder for BisectOptions
pub struct OptionsBuilder {
    options: BisectOptions,
}

impl OptionsBuilder {
    pub fn new() -> Self {
        Self {
            options: BisectOptions::default(),
        }
    }

    pub fn archive<S: Into<String>>(mut self, archive: S) -> Self {
        self.options.archive = Some(archive.into());
        self
    }

    pub fn build_type(mut self, build_type: BuildType) -> Self {
        self.options.build_type = build_type;
        self
    }

    pub fn good<S: Into<String>>(mut self, good: S) -> Self {
        self.options.good = good.into();
        self
    }

    pub fn bad<S: Into<String>>(mut self, bad: S) -> Self {
        self.options.bad = Some(bad.into());
        self
    }

    pub fn signed(mut self, signed: bool) -> Self {
        self.options.signed = signed;
        self
    }

    pub fn apk<S: Into<String>>(mut self, apk: S) -> Self {
        self.options.apk = apk.into();
        self
    }

    pub fn ipa<S: Into<String>>(mut self, ipa: S) -> Self {
        self.options.ipa = ipa.into();
        self
    }

    pub fn device_id<S: Into<String>>(mut self, id: S) -> Self {
        self.options.device_id = Some(id.into());
        self
    }

    pub fn chromedriver(mut self, enabled: bool) -> Self {
        self.options.chromedriver = enabled;
        self
    }

    pub fn command<S: Into<String>>(mut self, command: S) -> Self {
        self.options.command = command.into();
        self
    }

    pub fn profile<S: Into<String>>(mut self, profile: S) -> Self {
        self.options.profile = profile.into();
        self
    }

    pub fn times(mut self, n: u32) -> Self {
        self.options.times = n;
        self
    }

    pub fn use_local_cache(mut self, enabled: bool) -> Self {
        self.options.use_local_cache = enabled;
        self
    }

    pub fn cache_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.options.cache_path = Some(path.into());
        self
    }

    pub fn verify_range(mut self, enabled: bool) -> Self {
        self.options.verify_range = enabled;
        self
    }

    pub fn not_interactive(mut self, enabled: bool) -> Self {
        self.options.not_interactive = enabled;
        self
    }

    pub fn launch_timeout(mut self, timeout: Duration) -> Self {
        self.options.launch_timeout = timeout;
        self
    }

    pub fn prefetch(mut self, strategy: PrefetchStrategy) -> Self {
        self.options.prefetch = strategy;
        self
    }

    pub fn args(mut self, args: Vec<String>) -> Self {
        self.options.args = args;
        self
    }

    pub fn build(self) -> BisectOptions {
        self.options
    }
}

impl Default for OptionsBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> OptionsBuilder {
        OptionsBuilder::new().archive("linux64").good("1000").bad("2000")
    }

    #[test]
    fn test_valid_snapshot() {
        assert!(snapshot().build().validate().is_ok());
    }

    #[test]
    fn test_signed_rules() {
        let err = snapshot().signed(true).build().validate().unwrap_err();
        assert!(err.to_string().contains("Android and iOS"));

        let opts = OptionsBuilder::new()
            .archive("android-arm64")
            .build_type(BuildType::Official)
            .good("1000")
            .signed(true)
            .build();
        assert!(opts.validate().unwrap_err().to_string().contains("release bisection"));
    }

    #[test]
    fn test_release_endpoints_must_be_versions() {
        let release = OptionsBuilder::new().archive("linux64").build_type(BuildType::Release);
        assert!(release.good("112.0.5615.0").build().validate().is_err());

        let opts = OptionsBuilder::new()
            .archive("linux64")
            .build_type(BuildType::Release)
            .good("112.0.5615.0")
            .bad("1109224")
            .build();
        assert!(opts.validate().is_err());

        let opts = OptionsBuilder::new()
            .archive("linux64")
            .build_type(BuildType::Release)
            .good("112.0.5615.0")
            .bad("112.0.5616.0")
            .build();
        assert!(opts.validate().is_ok());
    }

    #[test]
    fn test_times_and_template() {
        assert!(snapshot().times(0).build().validate().is_err());
        assert!(snapshot().command("%d %p").build().validate().is_err());
        assert!(snapshot().command("%d %p").chromedriver(true).build().validate().is_ok());
        assert!(snapshot().command("%p %q").build().validate().is_err());
    }

    #[test]
    fn test_webview_rejects_args() {
        let opts = OptionsBuilder::new()
            .archive("android-arm64")
            .good("1000")
            .apk("system_webview")
            .args(vec!["--enable-logging".into()])
            .build();
        assert!(matches!(opts.validate(), Err(BisectError::ArgsUnsupported(_))));
    }

    #[test]
    fn test_ios_needs_device() {
        let opts = OptionsBuilder::new()
            .archive("ios-simulator")
            .build_type(BuildType::Release)
            .good("120.0.6099.0")
            .bad("120.0.6100.0")
            .build();
        assert!(opts.validate().is_err());
        assert!(
            OptionsBuilder::new()
                .archive("ios-simulator")
                .build_type(BuildType::Release)
                .good("120.0.6099.0")
                .bad("120.0.6100.0")
                .device_id("SIM-1")
                .build()
                .validate()
                .is_ok()
        );
    }

    #[test]
    fn test_unsupported_archive() {
        let opts = OptionsBuilder::new()
            .archive("ios")
            .build_type(BuildType::Asan)
            .good("1000")
            .build();
        let err = opts.validate().unwrap_err();
        assert!(err.to_string().contains("only supported on these platforms"));
    }

    #[test]
    fn test_detect_archive() {
        assert_eq!(detect_archive("linux", "x86_64"), Some("linux64"));
        assert_eq!(detect_archive("macos", "aarch64"), Some("mac-arm"));
        assert_eq!(detect_archive("windows", "x86"), Some("win"));
        assert_eq!(detect_archive("windows", "aarch64"), Some("win-arm64"));
        assert_eq!(detect_archive("linux", "aarch64"), None);
        assert_eq!(detect_archive("freebsd", "x86_64"), None);
    }

    #[test]
    fn test_warnings() {
        let opts = OptionsBuilder::new()
            .archive("android-arm64")
            .build_type(BuildType::Release)
            .apk("chrome")
            .build();
        assert_eq!(opts.warnings().len(), 1);
        assert!(snapshot().build().warnings().is_empty());
    }
}
