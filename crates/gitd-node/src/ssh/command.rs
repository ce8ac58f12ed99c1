//! Parsing of SSH `exec` command lines.
//!
//! Git clients run `git-upload-pack '<repo>'` on the remote side, quoting
//! the path for a POSIX shell. There is no shell here, so the command line
//! is split into words with the same quoting rules.

use gitd_git::Service;
use thiserror::Error;

/// Errors in an exec command line.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    /// Nothing to run.
    #[error("empty command")]
    Empty,
    /// A quote was opened and never closed.
    #[error("unterminated quote in command")]
    UnterminatedQuote,
    /// The line ends in a lone backslash.
    #[error("dangling escape in command")]
    DanglingEscape,
    /// Anything other than the git pack services.
    #[error("unsupported command '{0}'")]
    Unsupported(String),
}

/// A git pack service request received over SSH.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitCommand {
    /// Requested service.
    pub service: Service,
    /// Remaining words; the first is the repository identifier.
    pub args: Vec<String>,
}

impl GitCommand {
    /// Parses an exec request such as `git-upload-pack '/team/app.git'`.
    ///
    /// `git upload-pack` (with a space) is accepted too.
    pub fn parse(line: &str) -> Result<Self, CommandError> {
        let mut words = split_words(line)?.into_iter();
        let Some(program) = words.next() else {
            return Err(CommandError::Empty);
        };

        let service_name = if program == "git" {
            match words.next() {
                Some(sub) => format!("git-{sub}"),
                None => return Err(CommandError::Unsupported(program)),
            }
        } else {
            program
        };

        let service = service_name
            .parse::<Service>()
            .map_err(|_| CommandError::Unsupported(service_name.clone()))?;

        Ok(Self {
            service,
            args: words.collect(),
        })
    }
}

/// Splits a command line into words using POSIX shell quoting.
///
/// Single quotes preserve everything literally; inside double quotes a
/// backslash escapes only `"`, `\`, `$` and `` ` ``; elsewhere a backslash
/// escapes any character.
pub fn split_words(line: &str) -> Result<Vec<String>, CommandError> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        match c {
            c if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            '\'' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(c) => current.push(c),
                        None => return Err(CommandError::UnterminatedQuote),
                    }
                }
            }
            '"' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some(c @ ('"' | '\\' | '$' | '`')) => current.push(c),
                            Some('\n') => {}
                            Some(c) => {
                                current.push('\\');
                                current.push(c);
                            }
                            None => return Err(CommandError::UnterminatedQuote),
                        },
                        Some(c) => current.push(c),
                        None => return Err(CommandError::UnterminatedQuote),
                    }
                }
            }
            '\\' => {
                in_word = true;
                match chars.next() {
                    Some('\n') => {}
                    Some(c) => current.push(c),
                    None => return Err(CommandError::DanglingEscape),
                }
            }
            c => {
                in_word = true;
                current.push(c);
            }
        }
    }

    if in_word {
        words.push(current);
    }
    Ok(words)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_words() {
        assert_eq!(
            split_words("git-upload-pack '/team/app.git'").unwrap(),
            vec!["git-upload-pack", "/team/app.git"]
        );
        assert_eq!(
            split_words("  a   \"b c\"  d\\ e ").unwrap(),
            vec!["a", "b c", "d e"]
        );
        assert_eq!(split_words("'it'\\''s'").unwrap(), vec!["it's"]);
        assert_eq!(split_words("\"a\\\"b\\n\"").unwrap(), vec!["a\"b\\n"]);
        assert_eq!(split_words("''").unwrap(), vec![""]);
        assert!(split_words("").unwrap().is_empty());
    }

    #[test]
    fn test_split_words_errors() {
        assert_eq!(split_words("'open"), Err(CommandError::UnterminatedQuote));
        assert_eq!(split_words("\"open"), Err(CommandError::UnterminatedQuote));
        assert_eq!(split_words("trailing\\"), Err(CommandError::DanglingEscape));
    }

    #[test]
    fn test_parse_git_commands() {
        let cmd = GitCommand::parse("git-upload-pack 'foo.git'").unwrap();
        assert_eq!(cmd.service, Service::UploadPack);
        assert_eq!(cmd.args, vec!["foo.git"]);

        let cmd = GitCommand::parse("git receive-pack \"/team/app\"").unwrap();
        assert_eq!(cmd.service, Service::ReceivePack);
        assert_eq!(cmd.args, vec!["/team/app"]);

        let cmd = GitCommand::parse("git-upload-pack").unwrap();
        assert!(cmd.args.is_empty());
    }

    #[test]
    fn test_parse_rejects_other_commands() {
        assert_eq!(GitCommand::parse("   "), Err(CommandError::Empty));
        assert!(matches!(
            GitCommand::parse("ls -la"),
            Err(CommandError::Unsupported(_))
        ));
        assert!(matches!(
            GitCommand::parse("git-upload-archive foo"),
            Err(CommandError::Unsupported(_))
        ));
        assert!(matches!(
            GitCommand::parse("git"),
            Err(CommandError::Unsupported(_))
        ));
    }
}
