// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Shell command construction.
//!
//! Every command sent to a host is built as a [`ShellCommand`] value instead
//! of a formatted string. Arguments are quoted for a POSIX shell only when the
//! command gets rendered, so user names, database names, and paths can never
//! split into extra words or smuggle in extra commands.
//!
//! # Words
//!
//! A command is a program name followed by a list of [`Word`]s. There are
//! three kinds of word:
//!
//! - __Literal__ words are always quoted when they contain anything besides a
//!   conservative set of safe characters.
//! - __Path__ words behave like literals, except that a leading `~/` is left
//!   bare so the remote shell still performs tilde expansion.
//! - __Raw__ words are rendered verbatim. They exist for the few places that
//!   need the shell itself, e.g., `$VIRTUAL_ENV` or `$(cat pidfile)`. Raw words
//!   must never carry caller supplied data.
//!
//! # Composition
//!
//! Simple commands can be joined into pipelines, `&&` chains, and
//! redirections. Chains that end up inside a pipeline or redirection are
//! grouped with braces so the shell applies the operator to the whole chain.

use std::fmt::{Display, Formatter, Result as FmtResult};

/// Single argument of a simple command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Word {
    /// Literal argument, quoted on render.
    Literal(String),

    /// Path argument, quoted on render except for a leading `~/`.
    Path(String),

    /// Shell fragment rendered verbatim.
    Raw(String),
}

impl Word {
    /// Unquoted text of the word.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Literal(text) | Self::Path(text) | Self::Raw(text) => text.as_str(),
        }
    }
}

impl Display for Word {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Literal(text) => fmt.write_str(&quote(text)),
            Self::Path(path) => fmt.write_str(&quote_path(path)),
            Self::Raw(fragment) => fmt.write_str(fragment),
        }
    }
}

/// Simple command: program plus arguments.
///
/// The program name is trusted and rendered as is. Only arguments go through
/// quoting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cmd {
    program: String,
    args: Vec<Word>,
}

impl Cmd {
    /// Start a new command for target program.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Append literal argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(Word::Literal(arg.into()));
        self
    }

    /// Append series of literal arguments.
    pub fn args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args
            .extend(args.into_iter().map(|arg| Word::Literal(arg.into())));
        self
    }

    /// Append literal argument only when `condition` holds.
    pub fn arg_if(self, condition: bool, arg: impl Into<String>) -> Self {
        if condition {
            self.arg(arg)
        } else {
            self
        }
    }

    /// Append path argument that keeps tilde expansion.
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.args.push(Word::Path(path.into()));
        self
    }

    /// Append raw shell fragment.
    pub fn raw(mut self, fragment: impl Into<String>) -> Self {
        self.args.push(Word::Raw(fragment.into()));
        self
    }

    /// Name of program to execute.
    pub fn program(&self) -> &str {
        self.program.as_str()
    }

    /// Unquoted argument text.
    pub fn argv(&self) -> Vec<&str> {
        self.args.iter().map(Word::as_str).collect()
    }

    /// Feed standard output into `next`.
    pub fn pipe(self, next: impl Into<ShellCommand>) -> ShellCommand {
        ShellCommand::from(self).pipe(next)
    }

    /// Run `next` only if this command succeeds.
    pub fn and_then(self, next: impl Into<ShellCommand>) -> ShellCommand {
        ShellCommand::from(self).and_then(next)
    }

    /// Truncate target file with standard output.
    pub fn write_to(self, path: impl Into<String>) -> ShellCommand {
        ShellCommand::from(self).write_to(path)
    }

    /// Append standard output to target file.
    pub fn append_to(self, path: impl Into<String>) -> ShellCommand {
        ShellCommand::from(self).append_to(path)
    }
}

impl Display for Cmd {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(&self.program)?;
        for arg in &self.args {
            write!(fmt, " {arg}")?;
        }

        Ok(())
    }
}

/// Full shell command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellCommand {
    /// Single program invocation.
    Simple(Cmd),

    /// `left | right`
    Pipe(Box<ShellCommand>, Box<ShellCommand>),

    /// `left && right`
    And(Box<ShellCommand>, Box<ShellCommand>),

    /// `command > target` or `command >> target`
    Redirect {
        command: Box<ShellCommand>,
        target: Word,
        append: bool,
    },
}

impl ShellCommand {
    /// Feed standard output into `next`.
    pub fn pipe(self, next: impl Into<ShellCommand>) -> Self {
        Self::Pipe(Box::new(self), Box::new(next.into()))
    }

    /// Run `next` only if this command succeeds.
    pub fn and_then(self, next: impl Into<ShellCommand>) -> Self {
        Self::And(Box::new(self), Box::new(next.into()))
    }

    /// Truncate target file with standard output.
    pub fn write_to(self, path: impl Into<String>) -> Self {
        Self::Redirect {
            command: Box::new(self),
            target: Word::Path(path.into()),
            append: false,
        }
    }

    /// Append standard output to target file.
    pub fn append_to(self, path: impl Into<String>) -> Self {
        Self::Redirect {
            command: Box::new(self),
            target: Word::Path(path.into()),
            append: true,
        }
    }

    fn is_chain(&self) -> bool {
        matches!(self, Self::And(..))
    }

    fn fmt_grouped(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        if self.is_chain() {
            write!(fmt, "{{ {self}; }}")
        } else {
            write!(fmt, "{self}")
        }
    }
}

impl From<Cmd> for ShellCommand {
    fn from(cmd: Cmd) -> Self {
        Self::Simple(cmd)
    }
}

impl Display for ShellCommand {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Simple(cmd) => write!(fmt, "{cmd}"),
            Self::Pipe(left, right) => {
                left.fmt_grouped(fmt)?;
                fmt.write_str(" | ")?;
                right.fmt_grouped(fmt)
            }
            Self::And(left, right) => write!(fmt, "{left} && {right}"),
            Self::Redirect {
                command,
                target,
                append,
            } => {
                command.fmt_grouped(fmt)?;
                let operator = if *append { ">>" } else { ">" };
                write!(fmt, " {operator} {target}")
            }
        }
    }
}

/// Quote word for a POSIX shell.
///
/// Words made purely of safe characters are returned untouched. Everything
/// else is wrapped in single quotes, with embedded single quotes spliced in
/// through `'"'"'`.
pub fn quote(word: &str) -> String {
    if !word.is_empty() && word.chars().all(is_safe) {
        return word.to_string();
    }

    let mut quoted = String::with_capacity(word.len() + 2);
    quoted.push('\'');
    for ch in word.chars() {
        if ch == '\'' {
            quoted.push_str("'\"'\"'");
        } else {
            quoted.push(ch);
        }
    }
    quoted.push('\'');

    quoted
}

/// Quote path for a POSIX shell, keeping leading `~/` expandable.
pub fn quote_path(path: &str) -> String {
    if path == "~" {
        return path.to_string();
    }

    match path.strip_prefix("~/") {
        Some("") => "~/".to_string(),
        Some(rest) => format!("~/{}", quote(rest)),
        None => quote(path),
    }
}

/// Escape text for use inside a basic regular expression.
pub fn escape_bre(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        if matches!(ch, '\\' | '.' | '*' | '[' | ']' | '^' | '$') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }

    escaped
}

fn is_safe(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.' | '/' | ':' | '=' | '@' | ',' | '+' | '%')
}
