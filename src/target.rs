// What is being bisected: build type, archive and the variant they select
use crate::error::{BisectError, Result};
use crate::path_context::{self, PathContext};
use crate::revision::RevisionKind;
use std::fmt;

/// Granularity of the archived builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuildType {
    Snapshot,
    Official,
    Release,
    Asan,
}

impl BuildType {
    pub const ALL: [BuildType; 4] = [
        BuildType::Release,
        BuildType::Official,
        BuildType::Snapshot,
        BuildType::Asan,
    ];

    /// Resolves the build type flags with priority `--asan > -r > -o > -s`.
    pub fn from_flags(asan: bool, release: bool, official: bool) -> Self {
        if asan {
            BuildType::Asan
        } else if release {
            BuildType::Release
        } else if official {
            BuildType::Official
        } else {
            BuildType::Snapshot
        }
    }

    /// Command line flag selecting this build type.
    pub fn flag(&self) -> &'static str {
        match self {
            BuildType::Snapshot => "-s",
            BuildType::Official => "-o",
            BuildType::Release => "-r",
            BuildType::Asan => "--asan",
        }
    }

    pub fn revision_kind(&self) -> RevisionKind {
        match self {
            BuildType::Release => RevisionKind::Version,
            _ => RevisionKind::CommitPosition,
        }
    }

    /// Release and official listings go through gsutil.
    pub fn needs_gsutil(&self) -> bool {
        matches!(self, BuildType::Release | BuildType::Official)
    }
}

impl fmt::Display for BuildType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BuildType::Snapshot => "snapshot",
            BuildType::Official => "official",
            BuildType::Release => "release",
            BuildType::Asan => "asan",
        };
        f.write_str(name)
    }
}

/// Concrete artifact source + runner family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendVariant {
    SnapshotHttp,
    OfficialGcs,
    ReleaseGcs,
    AsanGcs,
    AndroidReleaseGcs,
    AndroidTrichromeRelease,
    AndroidTrichromeOfficial,
    AndroidOfficial,
    AndroidSnapshot,
    IosRelease,
    IosSimulator,
}

impl BackendVariant {
    pub fn build_type(&self) -> BuildType {
        match self {
            BackendVariant::SnapshotHttp | BackendVariant::AndroidSnapshot => BuildType::Snapshot,
            BackendVariant::OfficialGcs
            | BackendVariant::AndroidOfficial
            | BackendVariant::AndroidTrichromeOfficial => BuildType::Official,
            BackendVariant::AsanGcs => BuildType::Asan,
            BackendVariant::ReleaseGcs
            | BackendVariant::AndroidReleaseGcs
            | BackendVariant::AndroidTrichromeRelease
            | BackendVariant::IosRelease
            | BackendVariant::IosSimulator => BuildType::Release,
        }
    }

    pub fn is_android(&self) -> bool {
        matches!(
            self,
            BackendVariant::AndroidReleaseGcs
                | BackendVariant::AndroidTrichromeRelease
                | BackendVariant::AndroidTrichromeOfficial
                | BackendVariant::AndroidOfficial
                | BackendVariant::AndroidSnapshot
        )
    }

    pub fn is_trichrome(&self) -> bool {
        matches!(
            self,
            BackendVariant::AndroidTrichromeRelease | BackendVariant::AndroidTrichromeOfficial
        )
    }
}

impl fmt::Display for BackendVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Everything the backends and runners need to know about the bisect target.
#[derive(Debug, Clone)]
pub struct Target {
    pub build_type: BuildType,
    pub archive: String,
    pub context: &'static PathContext,
    pub chromedriver: bool,
    pub signed: bool,
    pub apk: String,
    pub ipa: String,
    pub device_id: Option<String>,
    /// SDK level of the attached Android device, queried before selection
    pub android_sdk: Option<u32>,
}

impl Target {
    pub fn new(build_type: BuildType, archive: impl Into<String>) -> Result<Self> {
        let archive = archive.into();
        let context = path_context::lookup(build_type, &archive).ok_or_else(|| {
            let supported: Vec<String> = path_context::build_types_for(&archive)
                .iter()
                .map(|bt| format!("{}({})", bt, bt.flag()))
                .collect();
            BisectError::CliUsage(format!(
                "Bisecting on {} is only supported on these platforms (-a/--archive): {{{}}}\n\
                 To bisect for {}, please choose from {}",
                build_type,
                path_context::archives(build_type).join(","),
                archive,
                supported.join(", ")
            ))
        })?;
        Ok(Self {
            build_type,
            archive,
            context,
            chromedriver: false,
            signed: false,
            apk: crate::constants::DEFAULT_APK.to_string(),
            ipa: crate::constants::DEFAULT_IPA.to_string(),
            device_id: None,
            android_sdk: None,
        })
    }

    pub fn is_android(&self) -> bool {
        self.archive.starts_with("android")
    }

    pub fn is_linux(&self) -> bool {
        self.archive.starts_with("linux")
    }

    /// Variant selected by build type and archive.
    pub fn variant(&self) -> BackendVariant {
        let archive = self.archive.as_str();
        match self.build_type {
            BuildType::Asan => BackendVariant::AsanGcs,
            BuildType::Release => {
                if archive == "android-arm64-high" {
                    BackendVariant::AndroidTrichromeRelease
                } else if self.is_android() {
                    BackendVariant::AndroidReleaseGcs
                } else if archive == "ios-simulator" {
                    BackendVariant::IosSimulator
                } else if archive == "ios" {
                    BackendVariant::IosRelease
                } else {
                    BackendVariant::ReleaseGcs
                }
            }
            BuildType::Official => {
                if archive == "android-arm64-high" {
                    BackendVariant::AndroidTrichromeOfficial
                } else if self.is_android() {
                    BackendVariant::AndroidOfficial
                } else {
                    BackendVariant::OfficialGcs
                }
            }
            BuildType::Snapshot => {
                if self.is_android() {
                    BackendVariant::AndroidSnapshot
                } else {
                    BackendVariant::SnapshotHttp
                }
            }
        }
    }

    /// Device SDK, required by every Android variant.
    pub fn require_sdk(&self) -> Result<u32> {
        self.android_sdk.ok_or_else(|| {
            BisectError::CliUsage(format!(
                "the Android SDK level of the device is needed to bisect {}",
                self.archive
            ))
        })
    }

    /// `--ipa` without a trailing `.ipa`.
    pub fn ipa_stem(&self) -> &str {
        self.ipa.strip_suffix(".ipa").unwrap_or(&self.ipa)
    }
}
