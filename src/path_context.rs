// Per build type and archive layout tables, plus Android apk naming
//
// Everything that depends on how builders name their uploads lives here:
// listing directories, archive names, extracted directories and the apk
// filenames chosen by device SDK level.

use crate::constants;
use crate::error::{BisectError, Result};
use crate::target::BuildType;

/// How one build type lays out the archives of one platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathContext {
    /// Main binary, relative to the extracted top directory
    pub binary_name: Option<&'static str>,
    pub listing_platform_dir: &'static str,
    pub archive_name: Option<&'static str>,
    pub archive_extract_dir: Option<&'static str>,
    pub chromedriver_binary_name: Option<&'static str>,
    pub chromedriver_archive_name: Option<&'static str>,
}

impl PathContext {
    pub const EMPTY: PathContext = PathContext {
        binary_name: None,
        listing_platform_dir: "",
        archive_name: None,
        archive_extract_dir: None,
        chromedriver_binary_name: None,
        chromedriver_archive_name: None,
    };
}

const MAC_CHROME: &str = "Google Chrome.app/Contents/MacOS/Google Chrome";
const MAC_CHROMIUM: &str = "Chromium.app/Contents/MacOS/Chromium";

static RELEASE: &[(&str, PathContext)] = &[
    (
        "android-arm",
        PathContext {
            listing_platform_dir: "arm/",
            archive_extract_dir: Some("android-arm"),
            ..PathContext::EMPTY
        },
    ),
    (
        "android-arm64",
        PathContext {
            listing_platform_dir: "arm_64/",
            archive_extract_dir: Some("android-arm64"),
            ..PathContext::EMPTY
        },
    ),
    (
        "android-arm64-high",
        PathContext {
            listing_platform_dir: "high-arm_64/",
            archive_extract_dir: Some("android-arm64"),
            ..PathContext::EMPTY
        },
    ),
    (
        "android-x86",
        PathContext {
            listing_platform_dir: "x86/",
            archive_extract_dir: Some("android-x86"),
            ..PathContext::EMPTY
        },
    ),
    (
        "android-x64",
        PathContext {
            listing_platform_dir: "x86_64/",
            archive_extract_dir: Some("android-x64"),
            ..PathContext::EMPTY
        },
    ),
    (
        "ios",
        PathContext {
            listing_platform_dir: "ios/",
            ..PathContext::EMPTY
        },
    ),
    (
        "ios-simulator",
        PathContext {
            binary_name: Some("Chromium.app"),
            archive_name: Some("Chromium.tar.gz"),
            ..PathContext::EMPTY
        },
    ),
    (
        "linux64",
        PathContext {
            binary_name: Some("chrome"),
            listing_platform_dir: "linux64/",
            archive_name: Some("chrome-linux64.zip"),
            archive_extract_dir: Some("chrome-linux64"),
            chromedriver_binary_name: Some("chromedriver"),
            chromedriver_archive_name: Some("chromedriver_linux64.zip"),
        },
    ),
    (
        "mac",
        PathContext {
            binary_name: Some(MAC_CHROME),
            listing_platform_dir: "mac/",
            archive_name: Some("chrome-mac.zip"),
            archive_extract_dir: Some("chrome-mac"),
            ..PathContext::EMPTY
        },
    ),
    (
        "mac64",
        PathContext {
            binary_name: Some(MAC_CHROME),
            listing_platform_dir: "mac64/",
            archive_name: Some("chrome-mac.zip"),
            archive_extract_dir: Some("chrome-mac"),
            chromedriver_binary_name: Some("chromedriver"),
            chromedriver_archive_name: Some("chromedriver_mac64.zip"),
        },
    ),
    (
        "mac-arm",
        PathContext {
            binary_name: Some(MAC_CHROME),
            listing_platform_dir: "mac-arm64/",
            archive_name: Some("chrome-mac.zip"),
            archive_extract_dir: Some("chrome-mac"),
            chromedriver_binary_name: Some("chromedriver"),
            chromedriver_archive_name: Some("chromedriver_mac64.zip"),
        },
    ),
    // Release builds switched to -clang in M64.
    (
        "win",
        PathContext {
            binary_name: Some("chrome.exe"),
            listing_platform_dir: "win-clang/",
            archive_name: Some("chrome-win-clang.zip"),
            archive_extract_dir: Some("chrome-win-clang"),
            chromedriver_binary_name: Some("chromedriver.exe"),
            chromedriver_archive_name: Some("chromedriver_win32.zip"),
        },
    ),
    (
        "win64",
        PathContext {
            binary_name: Some("chrome.exe"),
            listing_platform_dir: "win64-clang/",
            archive_name: Some("chrome-win64-clang.zip"),
            archive_extract_dir: Some("chrome-win64-clang"),
            chromedriver_binary_name: Some("chromedriver.exe"),
            chromedriver_archive_name: Some("chromedriver_win64.zip"),
        },
    ),
    (
        "win-arm64",
        PathContext {
            binary_name: Some("chrome.exe"),
            listing_platform_dir: "win-arm64-clang/",
            archive_name: Some("chrome-win-arm64-clang.zip"),
            archive_extract_dir: Some("chrome-win-arm64-clang"),
            chromedriver_binary_name: Some("chromedriver.exe"),
            chromedriver_archive_name: Some("chromedriver_win64.zip"),
        },
    ),
];

static OFFICIAL: &[(&str, PathContext)] = &[
    (
        "android-arm",
        PathContext {
            listing_platform_dir: "android-builder-perf/",
            archive_name: Some("full-build-linux.zip"),
            archive_extract_dir: Some("full-build-linux"),
            ..PathContext::EMPTY
        },
    ),
    (
        "android-arm64",
        PathContext {
            listing_platform_dir: "android_arm64-builder-perf/",
            archive_name: Some("full-build-linux.zip"),
            archive_extract_dir: Some("full-build-linux"),
            ..PathContext::EMPTY
        },
    ),
    (
        "android-arm64-high",
        PathContext {
            listing_platform_dir: "android_arm64_high_end-builder-perf/",
            archive_name: Some("full-build-linux.zip"),
            archive_extract_dir: Some("full-build-linux"),
            ..PathContext::EMPTY
        },
    ),
    (
        "linux64",
        PathContext {
            binary_name: Some("chrome"),
            listing_platform_dir: "linux-builder-perf/",
            archive_name: Some("chrome-perf-linux.zip"),
            archive_extract_dir: Some("full-build-linux"),
            chromedriver_binary_name: Some("chromedriver"),
            chromedriver_archive_name: None,
        },
    ),
    (
        "mac",
        PathContext {
            binary_name: Some(MAC_CHROME),
            listing_platform_dir: "mac-builder-perf/",
            archive_name: Some("chrome-perf-mac.zip"),
            archive_extract_dir: Some("full-build-mac"),
            chromedriver_binary_name: Some("chromedriver"),
            chromedriver_archive_name: None,
        },
    ),
    (
        "mac-arm",
        PathContext {
            binary_name: Some(MAC_CHROME),
            listing_platform_dir: "mac-arm-builder-perf/",
            archive_name: Some("chrome-perf-mac.zip"),
            archive_extract_dir: Some("full-build-mac"),
            chromedriver_binary_name: Some("chromedriver"),
            chromedriver_archive_name: None,
        },
    ),
    (
        "win64",
        PathContext {
            binary_name: Some("chrome.exe"),
            listing_platform_dir: "win64-builder-perf/",
            archive_name: Some("chrome-perf-win.zip"),
            archive_extract_dir: Some("full-build-win32"),
            chromedriver_binary_name: Some("chromedriver.exe"),
            chromedriver_archive_name: None,
        },
    ),
];

static SNAPSHOT: &[(&str, PathContext)] = &[
    (
        "android-arm",
        PathContext {
            listing_platform_dir: "Android/",
            archive_name: Some("chrome-android.zip"),
            archive_extract_dir: Some("chrome-android"),
            ..PathContext::EMPTY
        },
    ),
    (
        "android-arm64",
        PathContext {
            listing_platform_dir: "Android_Arm64/",
            archive_name: Some("chrome-android.zip"),
            archive_extract_dir: Some("chrome-android"),
            ..PathContext::EMPTY
        },
    ),
    (
        "linux64",
        PathContext {
            binary_name: Some("chrome"),
            listing_platform_dir: "Linux_x64/",
            archive_name: Some("chrome-linux.zip"),
            archive_extract_dir: Some("chrome-linux"),
            chromedriver_binary_name: Some("chromedriver"),
            chromedriver_archive_name: Some("chromedriver_linux64.zip"),
        },
    ),
    (
        "linux-arm",
        PathContext {
            binary_name: Some("chrome"),
            listing_platform_dir: "Linux_ARM_Cross-Compile/",
            archive_name: Some("chrome-linux.zip"),
            archive_extract_dir: Some("chrome-linux"),
            ..PathContext::EMPTY
        },
    ),
    (
        "chromeos",
        PathContext {
            binary_name: Some("chrome"),
            listing_platform_dir: "Linux_ChromiumOS_Full/",
            archive_name: Some("chrome-chromeos.zip"),
            archive_extract_dir: Some("chrome-chromeos"),
            ..PathContext::EMPTY
        },
    ),
    (
        "mac",
        PathContext {
            binary_name: Some(MAC_CHROMIUM),
            listing_platform_dir: "Mac/",
            archive_name: Some("chrome-mac.zip"),
            archive_extract_dir: Some("chrome-mac"),
            chromedriver_binary_name: Some("chromedriver"),
            chromedriver_archive_name: Some("chromedriver_mac64.zip"),
        },
    ),
    (
        "mac64",
        PathContext {
            binary_name: Some(MAC_CHROMIUM),
            listing_platform_dir: "Mac/",
            archive_name: Some("chrome-mac.zip"),
            archive_extract_dir: Some("chrome-mac"),
            chromedriver_binary_name: Some("chromedriver"),
            chromedriver_archive_name: Some("chromedriver_mac64.zip"),
        },
    ),
    (
        "mac-arm",
        PathContext {
            binary_name: Some(MAC_CHROMIUM),
            listing_platform_dir: "Mac_Arm/",
            archive_name: Some("chrome-mac.zip"),
            archive_extract_dir: Some("chrome-mac"),
            chromedriver_binary_name: Some("chromedriver"),
            chromedriver_archive_name: Some("chromedriver_mac64.zip"),
        },
    ),
    (
        "win",
        PathContext {
            binary_name: Some("chrome.exe"),
            listing_platform_dir: "Win/",
            archive_name: Some("chrome-win.zip"),
            archive_extract_dir: Some("chrome-win"),
            chromedriver_binary_name: Some("chromedriver.exe"),
            chromedriver_archive_name: Some("chromedriver_win32.zip"),
        },
    ),
    (
        "win64",
        PathContext {
            binary_name: Some("chrome.exe"),
            listing_platform_dir: "Win_x64/",
            archive_name: Some("chrome-win.zip"),
            archive_extract_dir: Some("chrome-win"),
            chromedriver_binary_name: Some("chromedriver.exe"),
            chromedriver_archive_name: Some("chromedriver_win32.zip"),
        },
    ),
    (
        "win-arm64",
        PathContext {
            binary_name: Some("chrome.exe"),
            listing_platform_dir: "Win_Arm64/",
            archive_name: Some("chrome-win.zip"),
            archive_extract_dir: Some("chrome-win"),
            chromedriver_binary_name: Some("chromedriver.exe"),
            chromedriver_archive_name: Some("chromedriver_win64.zip"),
        },
    ),
];

// ASAN listings are keyed by platform name alone.
static ASAN: &[(&str, PathContext)] = &[
    (
        "linux",
        PathContext {
            binary_name: Some("chrome"),
            ..PathContext::EMPTY
        },
    ),
    (
        "mac",
        PathContext {
            binary_name: Some(MAC_CHROMIUM),
            ..PathContext::EMPTY
        },
    ),
    (
        "win",
        PathContext {
            binary_name: Some("chrome.exe"),
            ..PathContext::EMPTY
        },
    ),
];

fn table(build_type: BuildType) -> &'static [(&'static str, PathContext)] {
    match build_type {
        BuildType::Release => RELEASE,
        BuildType::Official => OFFICIAL,
        BuildType::Snapshot => SNAPSHOT,
        BuildType::Asan => ASAN,
    }
}

/// Layout of `archive` for `build_type`, if that combination exists.
pub fn lookup(build_type: BuildType, archive: &str) -> Option<&'static PathContext> {
    table(build_type)
        .iter()
        .find(|(name, _)| *name == archive)
        .map(|(_, ctx)| ctx)
}

/// Archives supported by `build_type`, in table order.
pub fn archives(build_type: BuildType) -> Vec<&'static str> {
    table(build_type).iter().map(|(name, _)| *name).collect()
}

/// Every archive of every build type, sorted and deduplicated.
pub fn all_archives() -> Vec<&'static str> {
    let mut all: Vec<&'static str> = BuildType::ALL
        .iter()
        .flat_map(|bt| archives(*bt))
        .collect();
    all.sort_unstable();
    all.dedup();
    all
}

/// Build types that know `archive`.
pub fn build_types_for(archive: &str) -> Vec<BuildType> {
    BuildType::ALL
        .iter()
        .copied()
        .filter(|bt| lookup(*bt, archive).is_some())
        .collect()
}

// ============================================================================
// Android apk names
// ============================================================================

type ApkTable = &'static [(&'static str, &'static str)];

static CHROME_APKS: ApkTable = &[
    ("chrome", "Chrome.apk"),
    ("chrome_beta", "ChromeBeta.apk"),
    ("chrome_canary", "ChromeCanary.apk"),
    ("chrome_dev", "ChromeDev.apk"),
    ("chrome_stable", "ChromeStable.apk"),
    ("chromium", "ChromePublic.apk"),
];

static CHROME_MODERN_APKS: ApkTable = &[
    ("chrome", "ChromeModern.apk"),
    ("chrome_beta", "ChromeModernBeta.apk"),
    ("chrome_canary", "ChromeModernCanary.apk"),
    ("chrome_dev", "ChromeModernDev.apk"),
    ("chrome_stable", "ChromeModernStable.apk"),
    ("chromium", "ChromePublic.apk"),
];

static MONOCHROME_APKS: ApkTable = &[
    ("chrome", "Monochrome.apk"),
    ("chrome_beta", "MonochromeBeta.apk"),
    ("chrome_canary", "MonochromeCanary.apk"),
    ("chrome_dev", "MonochromeDev.apk"),
    ("chrome_stable", "MonochromeStable.apk"),
    ("chromium", "ChromePublic.apk"),
];

static TRICHROME_APKS: ApkTable = &[
    ("chrome", "TrichromeChromeGoogle.apks"),
    ("chrome_beta", "TrichromeChromeGoogleBeta.apks"),
    ("chrome_canary", "TrichromeChromeGoogleCanary.apks"),
    ("chrome_dev", "TrichromeChromeGoogleDev.apks"),
    ("chrome_stable", "TrichromeChromeGoogleStable.apks"),
];

static TRICHROME64_APKS: ApkTable = &[
    ("chrome", "TrichromeChromeGoogle6432.apks"),
    ("chrome_beta", "TrichromeChromeGoogle6432Beta.apks"),
    ("chrome_canary", "TrichromeChromeGoogle6432Canary.apks"),
    ("chrome_dev", "TrichromeChromeGoogle6432Dev.apks"),
    ("chrome_stable", "TrichromeChromeGoogle6432Stable.apks"),
];

static TRICHROME_LIBRARIES: ApkTable = &[
    ("chrome", "TrichromeLibraryGoogle.apk"),
    ("chrome_beta", "TrichromeLibraryGoogleBeta.apk"),
    ("chrome_canary", "TrichromeLibraryGoogleCanary.apk"),
    ("chrome_dev", "TrichromeLibraryGoogleDev.apk"),
    ("chrome_stable", "TrichromeLibraryGoogleStable.apk"),
];

static TRICHROME64_LIBRARIES: ApkTable = &[
    ("chrome", "TrichromeLibraryGoogle6432.apk"),
    ("chrome_beta", "TrichromeLibraryGoogle6432Beta.apk"),
    ("chrome_canary", "TrichromeLibraryGoogle6432Canary.apk"),
    ("chrome_dev", "TrichromeLibraryGoogle6432Dev.apk"),
    ("chrome_stable", "TrichromeLibraryGoogle6432Stable.apk"),
];

static WEBVIEW_APKS: ApkTable = &[
    // clank release
    ("android_webview", "AndroidWebview.apk"),
    // clank official
    ("system_webview_google", "SystemWebViewGoogle.apk"),
    // upstream
    ("system_webview", "SystemWebView.apk"),
];

const TRICHROME_64BIT_ARCHIVES: &[&str] = &["android-arm64", "android-x64", "android-arm64-high"];

fn find(table: ApkTable, apk: &str, what: &str) -> Result<&'static str> {
    table
        .iter()
        .find(|(name, _)| *name == apk)
        .map(|(_, file)| *file)
        .ok_or_else(|| {
            let names: Vec<&str> = table.iter().map(|(name, _)| *name).collect();
            BisectError::CliUsage(format!(
                "Bisecting {} only supported for these apks: [{}].",
                what,
                names.join("|")
            ))
        })
}

pub fn is_webview(apk: &str) -> bool {
    apk.to_ascii_lowercase().contains("webview")
}

/// Apk choices accepted by `--apk`.
pub fn apk_choices() -> Vec<&'static str> {
    let mut all: Vec<&'static str> = [CHROME_APKS, CHROME_MODERN_APKS, MONOCHROME_APKS, WEBVIEW_APKS]
        .iter()
        .flat_map(|t| t.iter().map(|(name, _)| *name))
        .collect();
    all.sort_unstable();
    all.dedup();
    all
}

/// Single-apk filename for `apk` on a device running `sdk`.
pub fn apk_filename(apk: &str, sdk: u32) -> Result<&'static str> {
    let table = if is_webview(apk) {
        WEBVIEW_APKS
    } else if sdk < constants::SDK_LOLLIPOP {
        CHROME_APKS
    } else if sdk < constants::SDK_NOUGAT {
        CHROME_MODERN_APKS
    } else {
        MONOCHROME_APKS
    };
    find(table, apk, "on Android")
}

/// Filenames of the Trichrome base bundle and its library.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrichromeNames {
    pub apks: &'static str,
    pub library: &'static str,
}

/// Trichrome names for `archive`; 64-bit platforms use the 6432 builds when
/// `prefer_64bit` is set.
pub fn trichrome_names(apk: &str, archive: &str, prefer_64bit: bool) -> Result<TrichromeNames> {
    let use_64 = prefer_64bit && TRICHROME_64BIT_ARCHIVES.contains(&archive);
    let (apks, libraries) = if use_64 {
        (TRICHROME64_APKS, TRICHROME64_LIBRARIES)
    } else {
        (TRICHROME_APKS, TRICHROME_LIBRARIES)
    };
    Ok(TrichromeNames {
        apks: find(apks, apk, "for Android Trichrome")?,
        library: find(libraries, apk, "for Android Trichrome")?,
    })
}
