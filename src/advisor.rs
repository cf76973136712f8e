// Suggests re-running a finished release bisection against per-commit official builds
use crate::path_context;
use crate::revision::Revision;
use crate::target::{BackendVariant, BuildType};

/// Flags taking a value that the suggestion replaces.
const VALUE_FLAGS: &[&str] = &["-a", "--archive", "-g", "--good", "-b", "--bad"];

/// Switches that the suggestion replaces.
const SWITCH_FLAGS: &[&str] = &[
    "-r",
    "--release",
    "-o",
    "--official",
    "-s",
    "--snapshot",
    "--asan",
    "--signed",
    "--verify-range",
];

/// Whether `variant` lists coarse enough builds that an official listing
/// for `archive` could split the final window further.
pub fn has_finer_backend(variant: BackendVariant, archive: &str) -> bool {
    variant.build_type() == BuildType::Release && path_context::lookup(BuildType::Official, archive).is_some()
}

/// Builds the command line that repeats the bisection of `good..bad` with
/// official builds, or `None` when no finer backend serves `archive`.
///
/// `argv` is the original invocation including the program name; flags
/// that select the build type, archive or endpoints are replaced and
/// everything else is kept in order.
pub fn suggest_mode_switch(
    variant: BackendVariant,
    archive: &str,
    good: &Revision,
    bad: &Revision,
    argv: &[String],
) -> Option<Vec<String>> {
    if !has_finer_backend(variant, archive) {
        return None;
    }
    let (program, rest) = argv.split_first()?;

    let mut command = vec![
        program.clone(),
        "-o".to_string(),
        "-a".to_string(),
        archive.to_string(),
        "-g".to_string(),
        good.to_string(),
        "-b".to_string(),
        bad.to_string(),
        "--verify-range".to_string(),
    ];
    command.extend(strip_replaced_flags(rest));
    Some(command)
}

fn strip_replaced_flags(args: &[String]) -> Vec<String> {
    let mut kept = Vec::with_capacity(args.len());
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if arg == "--" {
            kept.push(arg.clone());
            kept.extend(iter.cloned());
            break;
        }
        if VALUE_FLAGS.contains(&arg.as_str()) {
            iter.next();
            continue;
        }
        if SWITCH_FLAGS.contains(&arg.as_str()) || is_inline_value_flag(arg) {
            continue;
        }
        kept.push(arg.clone());
    }
    kept
}

/// `--good=85.0.4183.0`, or `-g85.0.4183.0` in short form.
fn is_inline_value_flag(arg: &str) -> bool {
    VALUE_FLAGS.iter().any(|flag| {
        if flag.starts_with("--") {
            arg.strip_prefix(flag).is_some_and(|rest| rest.starts_with('='))
        } else {
            arg.len() > flag.len() && arg.starts_with(flag)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::revision::RevisionKind;

    fn argv(line: &str) -> Vec<String> {
        shlex::split(line).unwrap()
    }

    fn version(s: &str) -> Revision {
        Revision::parse(s, RevisionKind::Version).unwrap()
    }

    #[test]
    fn test_release_to_official() {
        let suggestion = suggest_mode_switch(
            BackendVariant::ReleaseGcs,
            "linux64",
            &version("112.0.5615.0"),
            &version("112.0.5616.0"),
            &argv("bisect-builds -r -a linux64 -g 112.0.5615.0 -b 112.0.5616.0 --times=2 -- --enable-foo"),
        )
        .unwrap();
        assert_eq!(
            suggestion,
            argv(
                "bisect-builds -o -a linux64 -g 112.0.5615.0 -b 112.0.5616.0 --verify-range --times=2 -- --enable-foo"
            )
        );
    }

    #[test]
    fn test_strips_inline_and_signed_flags() {
        let suggestion = suggest_mode_switch(
            BackendVariant::AndroidReleaseGcs,
            "android-arm64",
            &version("120.0.6099.0"),
            &version("120.0.6100.0"),
            &argv("bisect-builds --release --signed --archive=android-arm64 -g120.0.6099.0 --bad=120.0.6100.0 --apk chrome_stable"),
        )
        .unwrap();
        assert_eq!(&suggestion[9..], &["--apk".to_string(), "chrome_stable".to_string()]);
        assert!(!suggestion.contains(&"--signed".to_string()));
    }

    #[test]
    fn test_browser_args_untouched() {
        let suggestion = suggest_mode_switch(
            BackendVariant::ReleaseGcs,
            "mac-arm",
            &version("120.0.6099.0"),
            &version("120.0.6100.0"),
            &argv("bisect-builds -r -a mac-arm -g 1 -b 2 -- -g --asan"),
        )
        .unwrap();
        assert_eq!(&suggestion[9..], &["--", "-g", "--asan"]);
    }

    #[test]
    fn test_no_finer_backend() {
        let good = Revision::CommitPosition(1000);
        let bad = Revision::CommitPosition(1001);
        let args = argv("bisect-builds -a linux64 -g 1000 -b 1001");
        assert!(suggest_mode_switch(BackendVariant::SnapshotHttp, "linux64", &good, &bad, &args).is_none());
        assert!(suggest_mode_switch(BackendVariant::OfficialGcs, "linux64", &good, &bad, &args).is_none());
        assert!(
            suggest_mode_switch(
                BackendVariant::IosRelease,
                "ios",
                &version("1.0.0.0"),
                &version("1.0.0.1"),
                &args
            )
            .is_none()
        );
    }
}
