//! Interpreter Loop
//!
//! Feeds tokens either to the JIT (inside a definition) or to the host
//! value stack (at top level). Top-level words run through
//! [`Jit::invoke`] with their inputs taken from the host stack.
//!
//! Multi-token forms (`: name ( ... )`, `-> x`, `extern`, `variable`,
//! `see`, stack comments) may span lines; the interpreter keeps a pending
//! state between calls to [`Interpreter::run`].
//!
//! On any error the JIT is restored to the last point where no form was
//! half-read, so a failed definition leaves nothing behind, and the value
//! stack goes back to what it held before the failing input.

use crate::reader::{Token, parse_number, tokenize};
use kilnc::{CompileError, Jit, Signature, Snapshot, SymbolId};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReplError {
    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error("stack underflow: '{word}' needs {needed} value(s), {available} available")]
    Underflow {
        word: String,
        needed: usize,
        available: usize,
    },

    #[error("'{0}' is only valid inside a definition")]
    CompileOnly(String),

    #[error("'{0}' cannot be used inside a definition")]
    InterpretOnly(String),

    #[error("malformed stack comment: {0}")]
    StackComment(String),

    #[error("expected a name after '{0}'")]
    MissingName(String),
}

/// An error with the source position of the token that caused it.
#[derive(Debug)]
pub struct Located {
    pub line: usize,
    pub column: usize,
    pub error: ReplError,
}

impl fmt::Display for Located {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}: {}", self.line, self.column, self.error)
    }
}

impl std::error::Error for Located {}

/// What the next token completes.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Pending {
    None,
    /// After `:`
    DefinitionName,
    /// After `: name`, before its stack comment
    DefinitionHeader(String),
    /// After `extern`
    ExternName,
    /// After `extern name`
    ExternHeader(String),
    /// Collecting a stack comment for a definition or an external
    Signature {
        target: Header,
        items: Vec<String>,
    },
    /// Inside a `( ... )` comment that is ignored
    Comment,
    /// After `->`
    Local,
    /// After `variable`
    Variable,
    /// After `see`
    See,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Header {
    Definition(String),
    Extern(String),
}

pub struct Interpreter {
    jit: Jit,
    stack: Vec<i64>,
    pending: Pending,
    /// JIT state with no form half-read
    checkpoint: Snapshot,
    /// Print a listing after each definition
    dump: bool,
}

impl Interpreter {
    pub fn new(jit: Jit) -> Self {
        let checkpoint = jit.snapshot();
        Interpreter {
            jit,
            stack: Vec::new(),
            pending: Pending::None,
            checkpoint,
            dump: false,
        }
    }

    pub fn with_dump(mut self, dump: bool) -> Self {
        self.dump = dump;
        self
    }

    pub fn jit(&self) -> &Jit {
        &self.jit
    }

    /// The host value stack, bottom first.
    pub fn stack(&self) -> &[i64] {
        &self.stack
    }

    /// Whether a definition or multi-token form is still open.
    pub fn is_continuing(&self) -> bool {
        self.pending != Pending::None || self.jit.compiling().is_some()
    }

    /// Interpret `source`, whose first line is `first_line`.
    ///
    /// Stops at the first error, after rewinding the JIT, dropping any
    /// half-read form and putting the value stack back as it was before
    /// `source`.
    pub fn run(&mut self, source: &str, first_line: usize) -> Result<(), Located> {
        let saved = self.stack.clone();
        for token in tokenize(source, first_line) {
            if let Err(error) = self.feed(&token) {
                self.recover(saved);
                return Err(Located {
                    line: token.line,
                    column: token.column,
                    error,
                });
            }
        }
        Ok(())
    }

    fn recover(&mut self, stack: Vec<i64>) {
        self.pending = Pending::None;
        self.stack = stack;
        self.jit.restore(self.checkpoint);
        tracing::debug!("rewound after error");
    }

    fn settle(&mut self) {
        if self.pending == Pending::None && self.jit.compiling().is_none() {
            self.checkpoint = self.jit.snapshot();
        }
    }

    fn feed(&mut self, token: &Token) -> Result<(), ReplError> {
        let word = token.text.as_str();
        match std::mem::replace(&mut self.pending, Pending::None) {
            Pending::None => self.word(word)?,
            Pending::DefinitionName => self.pending = Pending::DefinitionHeader(self.name(word, ":")?),
            Pending::DefinitionHeader(name) => {
                self.open_signature(word, Header::Definition(name))?;
            }
            Pending::ExternName => self.pending = Pending::ExternHeader(self.name(word, "extern")?),
            Pending::ExternHeader(name) => self.open_signature(word, Header::Extern(name))?,
            Pending::Signature { target, mut items } => {
                if word == ")" {
                    self.close_signature(target, &items)?;
                } else {
                    items.push(word.to_string());
                    self.pending = Pending::Signature { target, items };
                }
            }
            Pending::Comment => {
                if word != ")" {
                    self.pending = Pending::Comment;
                }
            }
            Pending::Local => {
                let name = self.name(word, "->")?;
                self.jit.compile_local_set(&name)?;
            }
            Pending::Variable => {
                let name = self.name(word, "variable")?;
                self.define_variable(&name)?;
            }
            Pending::See => {
                let id = self
                    .jit
                    .lookup(word)
                    .ok_or_else(|| CompileError::UnknownWord(word.to_string()))?;
                if let Some(listing) = self.jit.dump(id) {
                    print!("{}", listing);
                }
            }
        }
        self.settle();
        Ok(())
    }

    /// A name operand: anything that is not a number or a parenthesis.
    fn name(&self, word: &str, after: &str) -> Result<String, ReplError> {
        if word == "(" || word == ")" || parse_number(word).is_some() {
            return Err(ReplError::MissingName(after.to_string()));
        }
        Ok(word.to_string())
    }

    fn open_signature(&mut self, word: &str, target: Header) -> Result<(), ReplError> {
        if word != "(" {
            return Err(ReplError::StackComment(format!("expected '(' but found '{}'", word)));
        }
        self.pending = Pending::Signature {
            target,
            items: Vec::new(),
        };
        Ok(())
    }

    fn close_signature(&mut self, target: Header, items: &[String]) -> Result<(), ReplError> {
        let (inputs, outputs) = parse_signature(items)?;
        match target {
            Header::Definition(name) => {
                self.jit.begin_word(&name, Signature::new(inputs, outputs))?;
            }
            Header::Extern(name) => {
                self.jit.resolve_external(&name, inputs, outputs)?;
            }
        }
        Ok(())
    }

    fn define_variable(&mut self, name: &str) -> Result<(), ReplError> {
        let address = self.jit.allocate_data(1)?;
        self.jit.begin_word(name, Signature::new(0, 1))?;
        self.jit.compile_literal(address as i64)?;
        self.jit.end_word()?;
        Ok(())
    }

    fn word(&mut self, word: &str) -> Result<(), ReplError> {
        if self.jit.compiling().is_some() {
            self.compile(word)
        } else {
            self.interpret(word)
        }
    }

    fn compile(&mut self, word: &str) -> Result<(), ReplError> {
        match word {
            ";" => {
                let id = self.jit.end_word()?;
                if self.dump {
                    self.print_dump(id);
                }
            }
            "->" => self.pending = Pending::Local,
            "(" => self.pending = Pending::Comment,
            "if" => self.jit.compile_if()?,
            "else" => self.jit.compile_else()?,
            "then" => self.jit.compile_then()?,
            "recurse" => self.jit.compile_recurse()?,
            "return" => self.jit.compile_return()?,
            "throw" => self.jit.compile_throw()?,
            ":" | "extern" | "variable" | "see" | "words" | ".s" => {
                return Err(ReplError::InterpretOnly(word.to_string()));
            }
            _ => match parse_number(word) {
                Some(value) => self.jit.compile_literal(value)?,
                None => self.jit.compile_word(word)?,
            },
        }
        Ok(())
    }

    fn interpret(&mut self, word: &str) -> Result<(), ReplError> {
        match word {
            ":" => self.pending = Pending::DefinitionName,
            "extern" => self.pending = Pending::ExternName,
            "variable" => self.pending = Pending::Variable,
            "see" => self.pending = Pending::See,
            "(" => self.pending = Pending::Comment,
            "words" => println!("{}", self.jit.symbols().visible_names().join(" ")),
            ".s" => println!("{}", self.render_stack()),
            ";" | "->" | "if" | "else" | "then" | "recurse" | "return" | "throw" => {
                return Err(ReplError::CompileOnly(word.to_string()));
            }
            _ => match parse_number(word) {
                Some(value) => self.stack.push(value),
                None => {
                    let id = self
                        .jit
                        .lookup(word)
                        .ok_or_else(|| CompileError::UnknownWord(word.to_string()))?;
                    self.execute(word, id)?;
                }
            },
        }
        Ok(())
    }

    /// Run `id` on the top of the host stack, replacing its inputs with
    /// its outputs only if it succeeds.
    fn execute(&mut self, word: &str, id: SymbolId) -> Result<(), ReplError> {
        let inputs = self.jit.symbols()[id].inputs;
        if self.stack.len() < inputs {
            return Err(ReplError::Underflow {
                word: word.to_string(),
                needed: inputs,
                available: self.stack.len(),
            });
        }
        let base = self.stack.len() - inputs;
        let results = self.jit.invoke(id, &self.stack[base..])?;
        self.stack.truncate(base);
        self.stack.extend(results);
        Ok(())
    }

    fn render_stack(&self) -> String {
        let values: Vec<String> = self.stack.iter().map(i64::to_string).collect();
        format!("<{}> {}", self.stack.len(), values.join(" "))
    }

    fn print_dump(&self, id: SymbolId) {
        if let Some(listing) = self.jit.dump(id) {
            print!("{}", listing);
        }
    }
}

/// Count the items on each side of `--`.
fn parse_signature(items: &[String]) -> Result<(usize, usize), ReplError> {
    let mut sides = items.split(|item| item == "--");
    let inputs = sides.next().map_or(0, <[String]>::len);
    let Some(outputs) = sides.next() else {
        return Err(ReplError::StackComment(format!("missing '--' in ( {} )", items.join(" "))));
    };
    if sides.next().is_some() {
        return Err(ReplError::StackComment(format!("more than one '--' in ( {} )", items.join(" "))));
    }
    Ok((inputs, outputs.len()))
}
