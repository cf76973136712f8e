// Desktop command templates (`-c`): %p, %d, %a/%s, %t and %%
use crate::error::{BisectError, Result};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Piece {
    Literal(String),
    Program,
    Chromedriver,
    Args,
    Scratch,
}

/// A parsed `-c` command template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTemplate {
    source: String,
    pieces: Vec<Piece>,
}

impl CommandTemplate {
    /// Parses `source`, rejecting unknown `%` specifiers.
    pub fn parse(source: &str) -> Result<Self> {
        let mut pieces = Vec::new();
        let mut literal = String::new();
        let mut chars = source.chars();
        while let Some(c) = chars.next() {
            if c != '%' {
                literal.push(c);
                continue;
            }
            let piece = match chars.next() {
                Some('%') => {
                    literal.push('%');
                    continue;
                }
                Some('p') => Piece::Program,
                Some('d') => Piece::Chromedriver,
                Some('a') | Some('s') => Piece::Args,
                Some('t') => Piece::Scratch,
                Some(other) => {
                    return Err(BisectError::CliUsage(format!(
                        "unknown specifier %{} in command template {:?}",
                        other, source
                    )));
                }
                None => {
                    return Err(BisectError::CliUsage(format!(
                        "command template {:?} ends with a lone %",
                        source
                    )));
                }
            };
            if !literal.is_empty() {
                pieces.push(Piece::Literal(std::mem::take(&mut literal)));
            }
            pieces.push(piece);
        }
        if !literal.is_empty() {
            pieces.push(Piece::Literal(literal));
        }
        Ok(Self {
            source: source.to_string(),
            pieces,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn uses_chromedriver(&self) -> bool {
        self.pieces.contains(&Piece::Chromedriver)
    }

    /// Substitutes the paths (shell-quoted) and the shell-joined `args`.
    pub fn render(
        &self,
        program: &Path,
        chromedriver: Option<&Path>,
        args: &[String],
        scratch: &Path,
    ) -> Result<String> {
        let mut out = String::new();
        for piece in &self.pieces {
            match piece {
                Piece::Literal(text) => out.push_str(text),
                Piece::Program => out.push_str(&quote_path(program)?),
                Piece::Chromedriver => {
                    let path = chromedriver.ok_or_else(|| {
                        BisectError::CliUsage("%d in the command template requires --chromedriver".into())
                    })?;
                    out.push_str(&quote_path(path)?);
                }
                Piece::Args => {
                    let joined = shlex::try_join(args.iter().map(String::as_str))
                        .map_err(|e| BisectError::CliUsage(format!("cannot quote browser args: {}", e)))?;
                    out.push_str(&joined);
                }
                Piece::Scratch => out.push_str(&quote_path(scratch)?),
            }
        }
        Ok(out)
    }
}

fn quote_path(path: &Path) -> Result<String> {
    let text = path.display().to_string();
    shlex::try_quote(&text)
        .map(|quoted| quoted.into_owned())
        .map_err(|e| BisectError::CliUsage(format!("cannot quote {}: {}", text, e)))
}

/// Replaces `%t` in the profile option with the scratch dir.
pub fn expand_profile(profile: &str, scratch: &Path) -> String {
    profile.replace("%t", &scratch.display().to_string())
}
