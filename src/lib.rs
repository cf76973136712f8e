//! Bisects archived Chrome and Chromium builds to find the revision that
//! introduced a regression.
//!
//! The pieces fit together as follows: a [`Target`] names the build type and
//! archive, [`create_backend`] picks the [`ArtifactBackend`] that lists and
//! locates its builds, [`create_runner`] picks the [`BuildRunner`] that
//! installs and launches them, and [`BisectDriver`] narrows the window with
//! verdicts from an [`Evaluator`].

pub mod advisor;
pub mod archive;
pub mod backend;
pub mod bisect;
pub mod cache;
pub mod constants;
pub mod descriptor;
pub mod download;
pub mod error;
pub mod gsutil;
pub mod logger;
pub mod options;
pub mod path_context;
pub mod remote;
pub mod resolve;
pub mod retry;
pub mod revision;
pub mod runner;
pub mod target;
pub mod tools;
pub mod update;
pub mod verdict;

pub use advisor::suggest_mode_switch;
pub use backend::{ArtifactBackend, create_backend, list_with_cache};
pub use bisect::{BisectDriver, BisectReport, DriverConfig, HistoryEntry, PrefetchStrategy};
pub use cache::RevListCache;
pub use descriptor::{DownloadDescriptor, FetchedArtifacts, Role};
pub use download::{DownloadJob, JobState};
pub use error::{BisectError, Result};
pub use logger::{BisectLogger, SilentLogger};
pub use options::{BisectOptions, OptionsBuilder};
pub use remote::{DownloadProgress, Fetcher, LiveFetcher};
pub use resolve::resolve_endpoint;
pub use retry::RetryPolicy;
pub use revision::{Revision, RevisionKind, RevisionList, Version};
pub use runner::{BuildRunner, HandleSet, LaunchSettings, create_runner};
pub use target::{BackendVariant, BuildType, Target};
pub use tools::{LiveToolRunner, ToolOutput, ToolRunner};
pub use verdict::{
    AsanEvaluator, Evaluation, Evaluator, ExitCodeEvaluator, InteractivePrompt, RunStatus, Verdict,
};
