// Verdicts on tested revisions and the evaluators that produce them
use crate::constants;
use crate::error::Result;
use crate::revision::Revision;
use std::fmt;
use std::io::{BufRead, Write};

/// Classification of one tested revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verdict {
    Good,
    Bad,
    /// Run the same revision again
    Retry,
    /// Drop the revision from the candidates
    Unknown,
    Quit,
}

impl Verdict {
    /// Parses a prompt answer (`g`, `b`, `r`, `u`, `q`).
    pub fn from_answer(answer: &str) -> Option<Self> {
        match answer.trim().to_ascii_lowercase().as_str() {
            "g" | "good" => Some(Verdict::Good),
            "b" | "bad" => Some(Verdict::Bad),
            "r" | "retry" => Some(Verdict::Retry),
            "u" | "unknown" => Some(Verdict::Unknown),
            "q" | "quit" => Some(Verdict::Quit),
            _ => None,
        }
    }

    pub fn key(&self) -> char {
        match self {
            Verdict::Good => 'g',
            Verdict::Bad => 'b',
            Verdict::Retry => 'r',
            Verdict::Unknown => 'u',
            Verdict::Quit => 'q',
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Verdict::Good => "good",
            Verdict::Bad => "bad",
            Verdict::Retry => "retry",
            Verdict::Unknown => "unknown",
            Verdict::Quit => "quit",
        };
        f.write_str(name)
    }
}

/// How the last launch of a revision ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStatus {
    Exited(i32),
    Timeout,
    /// Install or launch failed before an exit code was available
    Failed(String),
}

impl RunStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, RunStatus::Exited(0))
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Exited(code) => write!(f, "exit code {}", code),
            RunStatus::Timeout => f.write_str("timed out"),
            RunStatus::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

/// Everything known about one tested revision when asking for a verdict.
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub revision: Revision,
    pub status: RunStatus,
    pub stdout: String,
    pub stderr: String,
}

impl Evaluation {
    /// Verdict offered as the default answer: bad on a non-zero exit,
    /// unknown when the run timed out or never started.
    pub fn proposed(&self) -> Option<Verdict> {
        match self.status {
            RunStatus::Exited(0) => None,
            RunStatus::Exited(_) => Some(Verdict::Bad),
            RunStatus::Timeout | RunStatus::Failed(_) => Some(Verdict::Unknown),
        }
    }
}

/// The oracle consulted after each tested revision.
pub trait Evaluator {
    fn evaluate(&mut self, evaluation: &Evaluation) -> Result<Verdict>;
}

impl<E: Evaluator + ?Sized> Evaluator for Box<E> {
    fn evaluate(&mut self, evaluation: &Evaluation) -> Result<Verdict> {
        (**self).evaluate(evaluation)
    }
}

/// Asks on a terminal until a valid answer is given.
pub struct InteractivePrompt<R, W> {
    input: R,
    output: W,
}

impl<R: BufRead, W: Write> InteractivePrompt<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }
}

impl InteractivePrompt<std::io::StdinLock<'static>, std::io::Stdout> {
    pub fn stdio() -> Self {
        Self::new(std::io::stdin().lock(), std::io::stdout())
    }
}

impl<R: BufRead, W: Write> Evaluator for InteractivePrompt<R, W> {
    fn evaluate(&mut self, evaluation: &Evaluation) -> Result<Verdict> {
        let proposed = evaluation.proposed();
        loop {
            match proposed {
                Some(default) => write!(
                    self.output,
                    "Revision {} is [(g)ood/(b)ad/(r)etry/(u)nknown/(s)tdout/(q)uit] ({}, default {}): ",
                    evaluation.revision,
                    evaluation.status,
                    default.key()
                )?,
                None => write!(
                    self.output,
                    "Revision {} is [(g)ood/(b)ad/(r)etry/(u)nknown/(s)tdout/(q)uit]: ",
                    evaluation.revision
                )?,
            }
            self.output.flush()?;

            let mut line = String::new();
            if self.input.read_line(&mut line)? == 0 {
                // Closed input cannot answer any further prompts.
                return Ok(Verdict::Quit);
            }
            let answer = line.trim();
            if answer.eq_ignore_ascii_case("s") {
                write_output(&mut self.output, evaluation, usize::MAX)?;
                continue;
            }
            let verdict = match proposed {
                Some(default) if answer.is_empty() => default,
                _ => match Verdict::from_answer(answer) {
                    Some(verdict) => verdict,
                    None => continue,
                },
            };
            if verdict == Verdict::Unknown {
                write_output(&mut self.output, evaluation, constants::OUTPUT_PREVIEW_LINES)?;
            }
            return Ok(verdict);
        }
    }
}

/// Prints the head of the captured streams.
pub fn write_output(out: &mut dyn Write, evaluation: &Evaluation, max_lines: usize) -> Result<()> {
    for (name, text) in [("stdout", &evaluation.stdout), ("stderr", &evaluation.stderr)] {
        if text.trim().is_empty() {
            continue;
        }
        writeln!(out, "--- {} ---", name)?;
        let mut lines = text.lines();
        for line in lines.by_ref().take(max_lines) {
            writeln!(out, "{}", line)?;
        }
        let rest = lines.count();
        if rest > 0 {
            writeln!(out, "... ({} more lines)", rest)?;
        }
    }
    Ok(())
}

/// `--not-interactive`: the exit code decides.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExitCodeEvaluator;

impl Evaluator for ExitCodeEvaluator {
    fn evaluate(&mut self, evaluation: &Evaluation) -> Result<Verdict> {
        Ok(if evaluation.status.is_success() {
            Verdict::Good
        } else {
            Verdict::Bad
        })
    }
}

/// Echoes stderr and calls the build bad when AddressSanitizer reported
/// an error; asks `fallback` otherwise.
pub struct AsanEvaluator<E, W> {
    fallback: E,
    output: W,
}

impl<E: Evaluator, W: Write> AsanEvaluator<E, W> {
    pub fn new(fallback: E, output: W) -> Self {
        Self { fallback, output }
    }
}

impl<E: Evaluator, W: Write> Evaluator for AsanEvaluator<E, W> {
    fn evaluate(&mut self, evaluation: &Evaluation) -> Result<Verdict> {
        let mut errors = 0;
        for line in evaluation.stderr.lines() {
            writeln!(self.output, "{}", line)?;
            if line.contains(constants::ASAN_ERROR_MARKER) {
                errors += 1;
            }
        }
        if errors > 0 {
            writeln!(self.output, "Revision {} determined to be bad.", evaluation.revision)?;
            return Ok(Verdict::Bad);
        }
        self.fallback.evaluate(evaluation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn evaluation(status: RunStatus) -> Evaluation {
        Evaluation {
            revision: Revision::from(1234),
            status,
            stdout: "hello\nworld\n".into(),
            stderr: String::new(),
        }
    }

    fn ask(answers: &str, status: RunStatus) -> (Verdict, String) {
        let mut out = Vec::new();
        let verdict = InteractivePrompt::new(Cursor::new(answers.to_string()), &mut out)
            .evaluate(&evaluation(status))
            .unwrap();
        (verdict, String::from_utf8(out).unwrap())
    }

    #[test]
    fn test_prompt_answers() {
        assert_eq!(ask("g\n", RunStatus::Exited(0)).0, Verdict::Good);
        assert_eq!(ask("B\n", RunStatus::Exited(0)).0, Verdict::Bad);
        assert_eq!(ask("r\n", RunStatus::Exited(0)).0, Verdict::Retry);
        assert_eq!(ask("u\n", RunStatus::Exited(0)).0, Verdict::Unknown);
        assert_eq!(ask("q\n", RunStatus::Exited(0)).0, Verdict::Quit);
    }

    #[test]
    fn test_prompt_reasks_on_garbage() {
        let (verdict, out) = ask("x\n\ng\n", RunStatus::Exited(0));
        assert_eq!(verdict, Verdict::Good);
        assert_eq!(out.matches("Revision 1234 is").count(), 3);
    }

    #[test]
    fn test_prompt_default_follows_status() {
        let (verdict, out) = ask("\n", RunStatus::Exited(3));
        assert_eq!(verdict, Verdict::Bad);
        assert!(out.contains("default b"));
        assert_eq!(ask("\n", RunStatus::Timeout).0, Verdict::Unknown);
    }

    #[test]
    fn test_prompt_shows_output() {
        let (verdict, out) = ask("s\ng\n", RunStatus::Exited(0));
        assert_eq!(verdict, Verdict::Good);
        assert!(out.contains("--- stdout ---\nhello\nworld\n"));
    }

    #[test]
    fn test_unknown_previews_output() {
        let (verdict, out) = ask("u\n", RunStatus::Exited(0));
        assert_eq!(verdict, Verdict::Unknown);
        assert!(out.contains("--- stdout ---"));
        assert!(!ask("g\n", RunStatus::Exited(0)).1.contains("--- stdout ---"));
    }

    #[test]
    fn test_prompt_eof_quits() {
        assert_eq!(ask("", RunStatus::Exited(0)).0, Verdict::Quit);
    }

    #[test]
    fn test_exit_code_evaluator() {
        let mut eval = ExitCodeEvaluator;
        assert_eq!(eval.evaluate(&evaluation(RunStatus::Exited(0))).unwrap(), Verdict::Good);
        assert_eq!(eval.evaluate(&evaluation(RunStatus::Exited(1))).unwrap(), Verdict::Bad);
        assert_eq!(eval.evaluate(&evaluation(RunStatus::Timeout)).unwrap(), Verdict::Bad);
    }

    #[test]
    fn test_asan_marker_is_bad() {
        let mut out = Vec::new();
        let mut eval = AsanEvaluator::new(ExitCodeEvaluator, &mut out);
        let mut e = evaluation(RunStatus::Exited(0));
        e.stderr = "==1==ERROR: AddressSanitizer: heap-use-after-free\n".into();
        assert_eq!(eval.evaluate(&e).unwrap(), Verdict::Bad);

        e.stderr = "all clean\n".into();
        assert_eq!(eval.evaluate(&e).unwrap(), Verdict::Good);
        drop(eval);
        let printed = String::from_utf8(out).unwrap();
        assert!(printed.contains("determined to be bad"));
        assert!(printed.contains("all clean"));
    }

    #[test]
    fn test_output_preview_truncates() {
        let mut e = evaluation(RunStatus::Exited(0));
        e.stdout = (0..30).map(|i| format!("line{}\n", i)).collect();
        let mut out = Vec::new();
        write_output(&mut out, &e, 20).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("line19"));
        assert!(!text.contains("line20"));
        assert!(text.contains("(10 more lines)"));
    }
}
