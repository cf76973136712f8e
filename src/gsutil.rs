// gsutil wrapper: listing with `ls -l` and copying objects to local files
use crate::constants;
use crate::error::{BisectError, Result};
use crate::tools::{self, ToolOutput, ToolRunner};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};

static CREDENTIAL_ERROR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(status|ServiceException:)[ |=]40[1|3]").expect("static regex"));

static MISSING_OBJECT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(status|ServiceException:)[ |=]40[34]|No URLs matched|matched no objects")
        .expect("static regex")
});

/// How a failed gsutil invocation is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureMode {
    /// Any failure is an error
    Strict,
    /// Return whatever stdout was produced (missing paths in a batch probe)
    IgnoreFail,
}

/// Locates and drives gsutil.
#[derive(Clone)]
pub struct Gsutil {
    program: String,
    prefix_args: Vec<String>,
    tools: Arc<dyn ToolRunner>,
}

impl std::fmt::Debug for Gsutil {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gsutil")
            .field("program", &self.program)
            .field("prefix_args", &self.prefix_args)
            .finish()
    }
}

impl Gsutil {
    pub fn new(program: impl Into<String>, prefix_args: Vec<String>, tools: Arc<dyn ToolRunner>) -> Self {
        Self {
            program: program.into(),
            prefix_args,
            tools,
        }
    }

    /// Prefers `gsutil.py` from a depot_tools checkout in PATH, then a
    /// `gsutil` binary.
    pub fn locate(tools: Arc<dyn ToolRunner>) -> Option<Self> {
        if let Some(depot_tools) = depot_tools_dir() {
            let script = depot_tools.join("gsutil.py");
            return Some(Self::new(
                "python3",
                vec![script.display().to_string()],
                tools,
            ));
        }
        tools::find_in_path(if cfg!(windows) { "gsutil.cmd" } else { "gsutil" })
            .map(|path| Self::new(path.display().to_string(), Vec::new(), tools))
    }

    /// Hint printed when credentials are missing or stale.
    pub fn credentials_hint(&self) -> String {
        let config = format!("{} {}", self.program, self.prefix_args.join(" "));
        format!(
            "Follow these steps to configure your credentials and try running bisect-builds again:\n  \
             1. Run \"{} config\" and follow its instructions.\n  \
             2. If you have a @google.com account, use that account.\n  \
             3. For the project-id, just enter 0.\n\
             Warning: You might have an outdated .boto file. If this issue persists after running \
             `gsutil.py config`, try removing your .boto, usually located in your home directory.",
            config.trim()
        )
    }

    async fn run(&self, args: Vec<String>, mode: FailureMode) -> Result<ToolOutput> {
        let mut full = self.prefix_args.clone();
        full.extend(args);
        log::debug!("Running gsutil command: {:?}", full);
        let out = self.tools.run(&self.program, &full, None).await?;
        if out.success() || (mode == FailureMode::IgnoreFail && !is_credential_error(&out.stderr)) {
            return Ok(out);
        }
        if is_credential_error(&out.stderr) {
            return Err(BisectError::Credentials(self.credentials_hint()));
        }
        Err(BisectError::BackendUnavailable(format!(
            "gsutil {:?} failed:\n{}",
            full,
            out.stderr.trim()
        )))
    }

    /// `gsutil ls -l` over `urls`, filtered by [`parse_listing`].
    pub async fn list(&self, urls: &[String], mode: FailureMode) -> Result<Vec<String>> {
        let mut args = vec!["ls".to_string(), "-l".to_string()];
        args.extend(urls.iter().cloned());
        let out = self.run(args, mode).await?;
        Ok(parse_listing(&out.stdout))
    }

    /// `gsutil cp url dest`; missing objects surface as `ArtifactMissing`.
    pub async fn copy(&self, url: &str, dest: &Path) -> Result<()> {
        let mut args = self.prefix_args.clone();
        args.extend(["cp".to_string(), url.to_string(), dest.display().to_string()]);
        let out = self.tools.run(&self.program, &args, None).await?;
        if out.success() {
            return Ok(());
        }
        if out.stderr.starts_with(constants::CREDENTIAL_ERROR_MESSAGE) {
            return Err(BisectError::Credentials(self.credentials_hint()));
        }
        if MISSING_OBJECT_RE.is_match(&out.stderr) {
            return Err(BisectError::ArtifactMissing(url.to_string()));
        }
        Err(BisectError::BackendUnavailable(format!(
            "gsutil cp {} failed:\n{}",
            url,
            out.stderr.trim()
        )))
    }
}

fn is_credential_error(stderr: &str) -> bool {
    CREDENTIAL_ERROR_RE.is_match(stderr) || stderr.starts_with(constants::CREDENTIAL_ERROR_MESSAGE)
}

fn depot_tools_dir() -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path).find(|dir| {
        dir.file_name()
            .is_some_and(|name| name == "depot_tools")
            && dir.join("gsutil.py").is_file()
    })
}

/// Extracts object paths from `gsutil ls -l` output.
///
/// Typical lines:
/// ```text
///         7  2023-11-27T21:08:36Z  gs://.../LAST_CHANGE
/// 144486938  2023-03-07T14:41:25Z  gs://.../full-build-win32_1113893.zip
///                                  gs://.../120.0.6099.0/
/// TOTAL: 114167 objects, 15913845813421 bytes (14.47 TiB)
/// ```
/// Objects under 1000 bytes are broken uploads (an empty zip is 22 bytes),
/// except `LAST_CHANGE`. Directory lines carry no size and are kept.
pub fn parse_listing(stdout: &str) -> Vec<String> {
    let mut paths = Vec::new();
    for line in stdout.lines() {
        let parts: Vec<&str> = line.split_whitespace().collect();
        let Some(path) = parts.last() else {
            continue;
        };
        if !path.starts_with("gs://") {
            continue;
        }
        if parts.len() > 1 {
            if line.contains(constants::ANDROID_INVALID_BUCKET) {
                continue;
            }
            let size: u64 = parts[0].parse().unwrap_or(0);
            if path.ends_with(constants::LAST_CHANGE_FILE) || size > constants::GSUTIL_MIN_OBJECT_SIZE {
                paths.push(path.to_string());
            }
        } else {
            paths.push(path.to_string());
        }
    }
    paths
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;

    struct Scripted {
        output: ToolOutput,
        calls: Mutex<Vec<Vec<String>>>,
    }

    #[async_trait]
    impl ToolRunner for Scripted {
        async fn run(&self, _program: &str, args: &[String], _timeout: Option<Duration>) -> Result<ToolOutput> {
            self.calls.lock().unwrap().push(args.to_vec());
            Ok(self.output.clone())
        }
    }

    fn gsutil_with(status: i32, stdout: &str, stderr: &str) -> (Gsutil, Arc<Scripted>) {
        let tools = Arc::new(Scripted {
            output: ToolOutput {
                status: Some(status),
                stdout: stdout.into(),
                stderr: stderr.into(),
            },
            calls: Mutex::new(Vec::new()),
        });
        (Gsutil::new("gsutil", Vec::new(), tools.clone()), tools)
    }

    #[test]
    fn test_parse_listing_filters() {
        let stdout = "\
         7  2023-11-27T21:08:36Z  gs://b/Linux/LAST_CHANGE
        22  2023-03-07T14:41:25Z  gs://b/Linux/full-build-linux_1113892.zip
 144486938  2023-03-07T14:41:25Z  gs://b/Linux/full-build-linux_1113893.zip
      5000  2023-03-07T14:41:25Z  gs://chrome-signed/android-B0urB0N/Test/x.apk
                                 gs://b/120.0.6099.0/
TOTAL: 3 objects, 144486967 bytes (137.79 MiB)
";
        let paths = parse_listing(stdout);
        assert_eq!(
            paths,
            vec![
                "gs://b/Linux/LAST_CHANGE",
                "gs://b/Linux/full-build-linux_1113893.zip",
                "gs://b/120.0.6099.0/",
            ]
        );
    }

    #[tokio::test]
    async fn test_list_passes_urls() -> anyhow::Result<()> {
        let (gsutil, tools) = gsutil_with(0, "gs://b/1.0.0.0/\n", "");
        let paths = gsutil.list(&["gs://b".to_string()], FailureMode::Strict).await?;
        assert_eq!(paths, vec!["gs://b/1.0.0.0/"]);
        assert_eq!(tools.calls.lock().unwrap()[0], vec!["ls", "-l", "gs://b"]);
        Ok(())
    }

    #[tokio::test]
    async fn test_list_credential_error() {
        let (gsutil, _) = gsutil_with(1, "", "AccessDeniedException: 403 ... status=403");
        let result = gsutil.list(&["gs://b".to_string()], FailureMode::IgnoreFail).await;
        assert!(matches!(result, Err(BisectError::Credentials(_))));
    }

    #[tokio::test]
    async fn test_list_ignore_fail_returns_stdout() -> anyhow::Result<()> {
        let out = "   5000  2023-03-07T14:41:25Z  gs://b/1.0.0.0/linux64/chrome-linux64.zip\n";
        let (gsutil, _) = gsutil_with(1, out, "CommandException: One or more URLs matched no objects.");
        let paths = gsutil.list(&["gs://b/*".to_string()], FailureMode::IgnoreFail).await?;
        assert_eq!(paths.len(), 1);
        let (gsutil, _) = gsutil_with(1, out, "CommandException: boom");
        assert!(gsutil.list(&["gs://b".to_string()], FailureMode::Strict).await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn test_copy_missing_object() {
        let (gsutil, _) = gsutil_with(1, "", "CommandException: No URLs matched: gs://b/x.zip");
        let result = gsutil.copy("gs://b/x.zip", Path::new("/tmp/x")).await;
        assert!(matches!(result, Err(BisectError::ArtifactMissing(_))));
        let (gsutil, _) = gsutil_with(1, "", "ServiceException: 403 Forbidden");
        let result = gsutil.copy("gs://b/x.zip", Path::new("/tmp/x")).await;
        assert!(matches!(result, Err(BisectError::ArtifactMissing(_))));
    }

    #[tokio::test]
    async fn test_copy_without_credentials() {
        let (gsutil, _) = gsutil_with(1, "", constants::CREDENTIAL_ERROR_MESSAGE);
        let result = gsutil.copy("gs://b/x.zip", Path::new("/tmp/x")).await;
        assert!(matches!(result, Err(BisectError::Credentials(_))));
    }
}
