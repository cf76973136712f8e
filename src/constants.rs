//! Global constants and helpers: storage endpoints, URL templates, networking defaults, filenames and thresholds
use std::path::PathBuf;

/// Binary name used in user agents and temp file prefixes
pub const BINARY_NAME: &str = "bisect-builds";

/// Package version from Cargo.toml (set at compile time)
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Returns the user agent string for HTTP requests
pub fn user_agent() -> String {
    format!("{}/{}", BINARY_NAME, VERSION)
}

// ============================================================================
// Storage Endpoints
// ============================================================================

/// Chromium snapshot archives (public HTTP listing)
pub const CHROMIUM_BASE_URL: &str = "http://commondatastorage.googleapis.com/chromium-browser-snapshots";

/// ASAN archives (public HTTP listing)
pub const ASAN_BASE_URL: &str = "http://commondatastorage.googleapis.com/chromium-browser-asan";

/// Continuous official builds, one archive per commit
pub const PERF_BASE_URL: &str = "gs://chrome-test-builds/official-by-commit";

/// Desktop release builds
pub const RELEASE_BASE_URL: &str = "gs://chrome-unsigned/desktop-5c0tCh";

/// Android release builds (M45 onwards)
pub const ANDROID_RELEASE_BASE_URL: &str = "gs://chrome-unsigned/android-B0urB0N";
pub const ANDROID_RELEASE_BASE_URL_SIGNED: &str = "gs://chrome-signed/android-B0urB0N";

/// Bucket that shows up in signed Android listings but never holds real builds
pub const ANDROID_INVALID_BUCKET: &str = "gs://chrome-signed/android-B0urB0N/Test";

/// iOS release builds
pub const IOS_RELEASE_BASE_URL: &str = "gs://chrome-unsigned/ios-G1N";
pub const IOS_RELEASE_BASE_URL_SIGNED: &str = "gs://chrome-signed/ios-G1N";

/// iOS simulator builds archived by version
pub const IOS_ARCHIVE_BASE_URL: &str = "gs://bling-archive";

/// Name of the file holding the newest snapshot revision of a platform dir
pub const LAST_CHANGE_FILE: &str = "LAST_CHANGE";

// ============================================================================
// URL Templates
// ============================================================================

/// Short changelog between two commit positions
pub fn short_changelog_url(min_rev: &str, max_rev: &str) -> String {
    format!("https://crrev.com/{}..{}", min_rev, max_rev)
}

/// Changelog between two release versions
pub fn release_changelog_url(min_version: &str, max_version: &str) -> String {
    format!(
        "https://chromium.googlesource.com/chromium/src/+log/{}..{}?n=10000",
        min_version, max_version
    )
}

/// chromiumdash version lookup
pub fn version_info_url(version: &str) -> String {
    format!("https://chromiumdash.appspot.com/fetch_version?version={}", version)
}

/// chromiumdash milestone lookup
pub fn milestones_url(milestone: u32) -> String {
    format!("https://chromiumdash.appspot.com/fetch_milestones?mstone={}", milestone)
}

/// Gitiles JSON view of a version tag
pub fn source_tag_url(tag: &str) -> String {
    format!(
        "https://chromium.googlesource.com/chromium/src/+/refs/tags/{}?format=JSON",
        tag
    )
}

/// Canonical location of the tool, served base64-encoded by gitiles
pub const UPDATE_SCRIPT_URL: &str =
    "https://chromium.googlesource.com/chromium/src/+/HEAD/tools/bisect-builds.py?format=TEXT";

/// Prefix gitiles puts in front of JSON payloads
pub const XSSI_PREFIX: &str = ")]}'\n";

// ============================================================================
// Timeout and Retry Constants
// ============================================================================

/// Default HTTP request timeout for listings and lookups
pub const HTTP_TIMEOUT_SECS: u64 = 60;

/// Connect timeout for archive downloads (the transfer itself is unbounded)
pub const HTTP_CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default timeout for a single browser launch
pub const DEFAULT_LAUNCH_TIMEOUT_SECS: u64 = 300;

/// Attempts for retryable listing and download failures
pub const RETRY_MAX_ATTEMPTS: u32 = 3;

/// First backoff delay, doubled after every failed attempt
pub const RETRY_BASE_DELAY_MS: u64 = 1000;

/// Interval at which download progress is reported while waiting
pub const PROGRESS_POLL_INTERVAL_MS: u64 = 250;

// ============================================================================
// Bisection Constants
// ============================================================================

/// Print the changelog URL with the window once this few steps remain
pub const STEPS_TO_SHOW_CHANGELOG_URL: u32 = 5;

/// Lines of captured stdout/stderr shown when a run is inconclusive
pub const OUTPUT_PREVIEW_LINES: usize = 20;

/// Marker emitted by AddressSanitizer on a detected error
pub const ASAN_ERROR_MARKER: &str = "ERROR: AddressSanitizer:";

/// Default desktop command template
pub const DEFAULT_COMMAND: &str = "%p %a";

/// Default profile directory, relative to the scratch dir
pub const DEFAULT_PROFILE: &str = "%t/profile";

/// Default Android apk selection
pub const DEFAULT_APK: &str = "chromium";

/// Default iOS ipa selection
pub const DEFAULT_IPA: &str = "canary.ipa";

// ============================================================================
// Listing Constants
// ============================================================================

/// gsutil objects smaller than this are treated as broken uploads
pub const GSUTIL_MIN_OBJECT_SIZE: u64 = 1000;

/// Release versions probed per gsutil invocation (command line length bound)
pub const RELEASE_PROBE_BATCH_SIZE: usize = 100;

/// Snapshot archive names changed for chromeos/win/win64 at this revision
pub const SNAPSHOT_ARCHIVE_RENAME_REVISION: u32 = 591_483;

/// Trichrome 64-bit (6432) release builds are served from this milestone on
pub const TRICHROME_64BIT_MIN_MILESTONE: u32 = 112;

/// Release build type path segment used by ASAN listings
pub const ASAN_BUILD_TYPE: &str = "release";

/// gsutil stderr prefix when no credentials are configured at all
pub const CREDENTIAL_ERROR_MESSAGE: &str =
    "You are attempting to access protected data with no configured credentials";

// ============================================================================
// Android Constants
// ============================================================================

/// Android SDK levels selecting the apk flavour
pub const SDK_LOLLIPOP: u32 = 21;
pub const SDK_NOUGAT: u32 = 24;
pub const SDK_Q: u32 = 29;

/// Directory holding per-package command-line files on the device
pub const ANDROID_CMDLINE_DIR: &str = "/data/local/tmp";

/// Package name of the Trichrome shared library
pub const TRICHROME_LIBRARY_PACKAGE: &str = "com.google.android.trichromelibrary";

/// Device bridge and bundle installer executables
pub const ADB_TOOL: &str = "adb";
pub const BUNDLETOOL: &str = "bundletool";

// ============================================================================
// iOS Constants
// ============================================================================

/// Xcode tool driver (devicectl, simctl)
pub const XCRUN_TOOL: &str = "xcrun";

/// macOS property list tool
pub const PLUTIL_TOOL: &str = "plutil";

// ============================================================================
// File and Directory Constants
// ============================================================================

/// Prefix of every download temp file
pub const TEMP_FILE_PREFIX: &str = "bisect-builds-";

/// Prefix of every per-run scratch directory
pub const SCRATCH_DIR_PREFIX: &str = "bisect-builds-run-";

/// Cache subdirectory and filename under the user cache dir
pub const CACHE_DIR_NAME: &str = "bisect-builds";
pub const CACHE_FILE_NAME: &str = "rev-list-cache.json";

/// Environment variable overriding the cache file location
pub const CACHE_PATH_ENV: &str = "BISECT_BUILDS_CACHE";

/// Environment variable that disables in-process mocks in the test suite
pub const NO_MOCK_SERVER_ENV: &str = "NO_MOCK_SERVER";

/// Resolves the per-user revision list cache path
pub fn default_cache_path() -> Option<PathBuf> {
    if let Some(path) = std::env::var_os(CACHE_PATH_ENV)
        && !path.is_empty()
    {
        return Some(PathBuf::from(path));
    }
    dirs::cache_dir().map(|dir| dir.join(CACHE_DIR_NAME).join(CACHE_FILE_NAME))
}
