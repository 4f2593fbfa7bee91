//! The sabr preprocessor.
//!
//! The preprocessor sits between the lexer and the compiler and is a small
//! stack-based meta-language of its own: directives consume argument tokens
//! from the input stream, pop and push values on the tail of the output
//! stream, define and expand user words, and splice included files in
//! place. Everything it synthesizes is marked `generated` and anchored at
//! the call site so later diagnostics still point at real source.

pub mod dictionary;

use std::collections::HashSet;

use sabr_foundation::{
    errors::{Diagnostic, Label},
    source::{FileId, LoadError, Sources},
    value::{parse_number, Value},
};
use sabr_lexer::{LexError, Lexer, Token, DEFAULT_TAB_SIZE};
use thiserror::Error;

pub use dictionary::{global_dictionary, Definition, Dictionary, Directive, Word};

/// Non-local unwinding of preprocessor execution. `#break` and `#continue`
/// set the top flag; every token loop checks it after dispatching and stops
/// consuming input while it is raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopFlag {
    None,
    Break,
    Continue,
}

#[derive(Debug, Error)]
pub enum PreprocError {
    #[error(transparent)]
    Lex(#[from] LexError),
    #[error("unknown preprocessor directive")]
    UnknownDirective { token: Token },
    #[error("word is not defined")]
    UndefinedWord { token: Token },
    #[error("compile-time stack underflow")]
    StackUnderflow { token: Token },
    #[error("compile-time type mismatch")]
    TypeMismatch { token: Token },
    #[error("malformed directive arguments: {reason}")]
    MalformedDirectiveArgs { token: Token, reason: &'static str },
    #[error("inclusion cycle")]
    InclusionCycle { token: Token },
    #[error("malformed token")]
    MalformedToken { token: Token },
    #[error("division by zero at compile time")]
    DivisionByZero { token: Token },
    #[error("cannot include file")]
    Include {
        token: Token,
        #[source]
        source: LoadError,
    },
}

impl PreprocError {
    pub fn token(&self) -> &Token {
        match self {
            Self::Lex(error) => error.token(),
            Self::UnknownDirective { token }
            | Self::UndefinedWord { token }
            | Self::StackUnderflow { token }
            | Self::TypeMismatch { token }
            | Self::MalformedDirectiveArgs { token, .. }
            | Self::InclusionCycle { token }
            | Self::MalformedToken { token }
            | Self::DivisionByZero { token }
            | Self::Include { token, .. } => token,
        }
    }

    pub fn to_diagnostic(&self, sources: &Sources) -> Diagnostic {
        if let Self::Lex(error) = self {
            return error.to_diagnostic(sources);
        }
        let token = self.token();
        let mut message = format!("{self}: {}", token.locate(sources));
        if let Self::Include { source, .. } = self {
            message = format!("{message} ({source})");
        }
        let diagnostic = Diagnostic::error(message);
        if token.range.is_empty() {
            diagnostic
        } else {
            diagnostic.with_label(Label::primary(token.file, token.range.clone(), ""))
        }
    }
}

/// Walks the input token stream; directives use it to consume their
/// argument tokens.
struct Cursor<'t> {
    tokens: &'t [Token],
    index: usize,
}

impl<'t> Cursor<'t> {
    fn next(&mut self) -> Option<&'t Token> {
        let token = self.tokens.get(self.index)?;
        self.index += 1;
        Some(token)
    }
}

/// The three shapes a string-like token can take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StringKind {
    Single,
    Double,
    Brace,
}

impl StringKind {
    fn wrap(self, inner: &str) -> String {
        match self {
            Self::Single => format!("'{inner}'"),
            Self::Double => format!("\"{inner}\""),
            Self::Brace => format!("{{{inner}}}"),
        }
    }
}

/// Splits a string-like token into its kind and inner text. Returns `None`
/// for ordinary tokens.
fn split_string(text: &str) -> Option<(StringKind, &str)> {
    let kind = match text.as_bytes().first()? {
        b'\'' => StringKind::Single,
        b'"' => StringKind::Double,
        b'{' => StringKind::Brace,
        _ => return None,
    };
    Some((kind, &text[1..text.len() - 1]))
}

pub struct Preprocessor<'a> {
    sources: &'a mut Sources,
    global: Dictionary,
    locals: Vec<Dictionary>,
    stops: Vec<StopFlag>,
    /// Files already spliced by `#import`, which is once-only.
    imported: HashSet<FileId>,
    /// Files currently being preprocessed; `#include` into this set is a
    /// cycle.
    active: Vec<FileId>,
    tab_size: u32,
}

impl<'a> Preprocessor<'a> {
    pub fn new(sources: &'a mut Sources) -> Self {
        Self {
            sources,
            global: global_dictionary(),
            locals: vec![],
            stops: vec![],
            imported: HashSet::new(),
            active: vec![],
            tab_size: DEFAULT_TAB_SIZE,
        }
    }

    pub fn with_tab_size(mut self, tab_size: u32) -> Self {
        self.tab_size = tab_size.max(1);
        self
    }

    /// Preprocesses a loaded file into a flat token stream.
    pub fn preprocess_file(&mut self, file: FileId) -> Result<Vec<Token>, PreprocError> {
        tracing::debug!("preprocessing {}", self.sources.filename(file));
        let mut output = vec![];
        self.imported.insert(file);
        self.splice_file(file, &mut output)?;
        Ok(output)
    }

    /// Preprocesses an already-lexed token stream. Exposed mostly for tests
    /// and embedders; `preprocess_file` is the usual entry point.
    pub fn preprocess_tokens(&mut self, input: &[Token]) -> Result<Vec<Token>, PreprocError> {
        let mut output = vec![];
        self.locals.push(Dictionary::new());
        self.stops.push(StopFlag::None);
        let result = self.process(input, &mut output);
        self.stops.pop();
        self.locals.pop();
        result.map(|_| output)
    }

    /// Lexes `file` and processes its tokens in a fresh file-level scope.
    fn splice_file(&mut self, file: FileId, output: &mut Vec<Token>) -> Result<(), PreprocError> {
        let tokens = Lexer::new(self.sources.text(file), file)
            .with_tab_size(self.tab_size)
            .tokenize()?;

        self.active.push(file);
        self.locals.push(Dictionary::new());
        self.stops.push(StopFlag::None);
        let result = self.process(&tokens, output);
        self.stops.pop();
        self.locals.pop();
        self.active.pop();
        result
    }

    fn stop(&self) -> StopFlag {
        self.stops.last().copied().unwrap_or(StopFlag::None)
    }

    fn lookup(&self, text: &str) -> Option<&Word> {
        self.locals
            .last()
            .and_then(|local| local.get(text))
            .or_else(|| self.global.get(text))
    }

    fn process(&mut self, input: &[Token], output: &mut Vec<Token>) -> Result<(), PreprocError> {
        let mut cursor = Cursor {
            tokens: input,
            index: 0,
        };
        while let Some(token) = cursor.next() {
            match self.lookup(&token.text).cloned() {
                Some(Word::Directive(directive)) => {
                    self.dispatch(directive, token, &mut cursor, output)?;
                }
                Some(Word::Def(def)) => {
                    self.expand(&def.body, def.is_func, output)?;
                }
                None => {
                    if token.text.starts_with('#') {
                        return Err(PreprocError::UnknownDirective {
                            token: token.clone(),
                        });
                    }
                    self.validate_passthrough(token)?;
                    output.push(token.clone());
                    continue;
                }
            }
            if self.stop() != StopFlag::None {
                break;
            }
        }
        Ok(())
    }

    /// Checks the brace discipline of a token about to be copied through:
    /// outside of quoted strings, braces must balance, and a token that
    /// contains any brace must *be* a brace block.
    fn validate_passthrough(&self, token: &Token) -> Result<(), PreprocError> {
        if matches!(token.text.as_bytes().first(), Some(b'\'' | b'"')) {
            return Ok(());
        }
        let mut balance = 0i64;
        let mut any_brace = false;
        for byte in token.text.bytes() {
            match byte {
                b'{' => {
                    balance += 1;
                    any_brace = true;
                }
                b'}' => {
                    balance -= 1;
                    any_brace = true;
                }
                _ => (),
            }
        }
        if balance != 0 || (any_brace && !token.text.starts_with('{')) {
            return Err(PreprocError::MalformedToken {
                token: token.clone(),
            });
        }
        Ok(())
    }

    /// Re-tokenizes a stored code token and processes the result, pushing a
    /// fresh local scope (and stop-flag frame) iff `is_func`.
    fn expand(
        &mut self,
        code: &Token,
        is_func: bool,
        output: &mut Vec<Token>,
    ) -> Result<(), PreprocError> {
        let (content, pos, base) = if code.text.starts_with('{') {
            let mut pos = code.origin;
            if !code.generated {
                pos.column += 1;
            }
            (
                &code.text[1..code.text.len() - 1],
                pos,
                code.range.start + 1,
            )
        } else {
            (&code.text[..], code.origin, code.range.start)
        };

        let tokens = Lexer::new(content, code.file)
            .with_origin(pos, base)
            .with_generated(code.generated)
            .with_tab_size(self.tab_size)
            .tokenize()?;

        if is_func {
            self.locals.push(Dictionary::new());
            self.stops.push(StopFlag::None);
        }
        let result = self.process(&tokens, output);
        if is_func {
            // Both break and continue are absorbed at the function-style
            // boundary; macro-style expansions share the caller's frame and
            // let the flag propagate.
            self.stops.pop();
            self.locals.pop();
        }
        result
    }

    fn arg<'t>(
        &self,
        token: &Token,
        cursor: &mut Cursor<'t>,
        reason: &'static str,
    ) -> Result<&'t Token, PreprocError> {
        cursor.next().ok_or(PreprocError::MalformedDirectiveArgs {
            token: token.clone(),
            reason,
        })
    }

    fn pop_token(&self, token: &Token, output: &mut Vec<Token>) -> Result<Token, PreprocError> {
        output.pop().ok_or(PreprocError::StackUnderflow {
            token: token.clone(),
        })
    }

    fn pop_value(&self, token: &Token, output: &mut Vec<Token>) -> Result<Value, PreprocError> {
        let popped = self.pop_token(token, output)?;
        parse_number(&popped.text).ok_or(PreprocError::TypeMismatch { token: popped })
    }

    fn pop_string(
        &self,
        token: &Token,
        output: &mut Vec<Token>,
    ) -> Result<(StringKind, String, Token), PreprocError> {
        let popped = self.pop_token(token, output)?;
        match split_string(&popped.text) {
            Some((kind, inner)) => Ok((kind, inner.to_owned(), popped)),
            None => Err(PreprocError::TypeMismatch { token: popped }),
        }
    }

    /// Pushes a computed value in its canonical `0x…` bit-pattern spelling.
    /// `#fmti`/`#fmtu`/`#fmtf` exist to render it readably.
    fn push_value(&self, token: &Token, output: &mut Vec<Token>, value: Value) {
        output.push(Token::generated(
            format!("0x{:x}", value.as_u64()),
            token,
        ));
    }

    fn dispatch(
        &mut self,
        directive: Directive,
        token: &Token,
        cursor: &mut Cursor<'_>,
        output: &mut Vec<Token>,
    ) -> Result<(), PreprocError> {
        use Directive as D;
        match directive {
            D::Def => self.define(token, cursor, true, false),
            D::Macro => self.define(token, cursor, false, false),
            D::LDef => self.define(token, cursor, true, true),
            D::LMacro => self.define(token, cursor, false, true),
            D::Isdef | D::LIsdef => {
                let name = self.arg(token, cursor, "expected a word name")?;
                let defined = matches!(
                    self.dictionary(directive == D::LIsdef).get(&name.text),
                    Some(Word::Def(_))
                );
                self.push_value(token, output, Value::from_bool(defined));
                Ok(())
            }
            D::Undef | D::LUndef => {
                let name = self.arg(token, cursor, "expected a word name")?.clone();
                self.dictionary_mut(directive == D::LUndef)
                    .shift_remove(&name.text);
                Ok(())
            }
            D::Getdef | D::LGetdef => {
                let name = self.arg(token, cursor, "expected a word name")?;
                match self.dictionary(directive == D::LGetdef).get(&name.text) {
                    Some(Word::Def(def)) => {
                        output.push(def.body.clone());
                        Ok(())
                    }
                    _ => Err(PreprocError::UndefinedWord {
                        token: name.clone(),
                    }),
                }
            }
            D::Import => self.include(token, cursor, output, true),
            D::Include => self.include(token, cursor, output, false),
            D::Eval => {
                let code = self.arg(token, cursor, "expected a code block")?.clone();
                self.expand(&code, true, output)
            }
            D::If => {
                let condition = self.pop_value(token, output)?;
                let then_code = self.arg(token, cursor, "expected a `then` block")?.clone();
                let else_code = self.arg(token, cursor, "expected an `else` block")?.clone();
                let chosen = if condition.is_zero() {
                    else_code
                } else {
                    then_code
                };
                self.expand(&chosen, false, output)
            }
            D::Break => {
                *self.stops.last_mut().expect("stop stack is never empty") = StopFlag::Break;
                Ok(())
            }
            D::Continue => {
                *self.stops.last_mut().expect("stop stack is never empty") = StopFlag::Continue;
                Ok(())
            }

            D::Concat => {
                let (kind_b, inner_b, _) = self.pop_string(token, output)?;
                let (kind_a, inner_a, popped_a) = self.pop_string(token, output)?;
                if kind_a != kind_b {
                    return Err(PreprocError::TypeMismatch { token: popped_a });
                }
                output.push(Token::generated(
                    kind_a.wrap(&format!("{inner_a}{inner_b}")),
                    token,
                ));
                Ok(())
            }
            D::Substr => {
                let len = self.pop_value(token, output)?.as_u64() as usize;
                let start = self.pop_value(token, output)?.as_u64() as usize;
                let (kind, inner, _) = self.pop_string(token, output)?;
                let slice: String = inner.chars().skip(start).take(len).collect();
                output.push(Token::generated(kind.wrap(&slice), token));
                Ok(())
            }
            D::Compare => {
                let (_, inner_b, _) = self.pop_string(token, output)?;
                let (_, inner_a, _) = self.pop_string(token, output)?;
                let order = inner_a.cmp(&inner_b) as i64;
                self.push_value(token, output, Value::from_i64(order));
                Ok(())
            }
            D::Len => {
                let (_, inner, _) = self.pop_string(token, output)?;
                self.push_value(token, output, Value::from_u64(inner.chars().count() as u64));
                Ok(())
            }

            D::Drop => self.stack_shuffle(token, output, 1, &[]),
            D::Nip => self.stack_shuffle(token, output, 2, &[1]),
            D::Dup => self.stack_shuffle(token, output, 1, &[0, 0]),
            D::Over => self.stack_shuffle(token, output, 2, &[0, 1, 0]),
            D::Tuck => self.stack_shuffle(token, output, 2, &[1, 0, 1]),
            D::Swap => self.stack_shuffle(token, output, 2, &[1, 0]),
            D::Rot => self.stack_shuffle(token, output, 3, &[1, 2, 0]),
            D::TwoDrop => self.stack_shuffle(token, output, 4, &[]),
            D::TwoNip => self.stack_shuffle(token, output, 4, &[2, 3]),
            D::TwoDup => self.stack_shuffle(token, output, 2, &[0, 1, 0, 1]),
            D::TwoOver => self.stack_shuffle(token, output, 4, &[0, 1, 2, 3, 0, 1]),
            D::TwoTuck => self.stack_shuffle(token, output, 4, &[2, 3, 0, 1, 2, 3]),
            D::TwoSwap => self.stack_shuffle(token, output, 4, &[2, 3, 0, 1]),
            D::TwoRot => self.stack_shuffle(token, output, 6, &[2, 3, 4, 5, 0, 1]),

            D::Add => self.binary_i64(token, output, |a, b| Ok(a.wrapping_add(b))),
            D::Sub => self.binary_i64(token, output, |a, b| Ok(a.wrapping_sub(b))),
            D::Mul => self.binary_i64(token, output, |a, b| Ok(a.wrapping_mul(b))),
            D::Div => self.binary_i64(token, output, |a, b| {
                a.checked_div(b).ok_or(())
            }),
            D::Mod => self.binary_i64(token, output, |a, b| {
                a.checked_rem(b).ok_or(())
            }),
            D::Udiv => self.binary_u64(token, output, |a, b| a.checked_div(b).ok_or(())),
            D::Umod => self.binary_u64(token, output, |a, b| a.checked_rem(b).ok_or(())),

            D::Equ => self.compare_i64(token, output, |a, b| a == b),
            D::Neq => self.compare_i64(token, output, |a, b| a != b),
            D::Lst => self.compare_i64(token, output, |a, b| a < b),
            D::Leq => self.compare_i64(token, output, |a, b| a <= b),
            D::Grt => self.compare_i64(token, output, |a, b| a > b),
            D::Geq => self.compare_i64(token, output, |a, b| a >= b),
            D::Ulst => self.compare_u64(token, output, |a, b| a < b),
            D::Uleq => self.compare_u64(token, output, |a, b| a <= b),
            D::Ugrt => self.compare_u64(token, output, |a, b| a > b),
            D::Ugeq => self.compare_u64(token, output, |a, b| a >= b),

            D::Fadd => self.binary_f64(token, output, |a, b| a + b),
            D::Fsub => self.binary_f64(token, output, |a, b| a - b),
            D::Fmul => self.binary_f64(token, output, |a, b| a * b),
            D::Fdiv => self.binary_f64(token, output, |a, b| a / b),
            D::Fmod => self.binary_f64(token, output, |a, b| a % b),
            D::Flst => self.compare_f64(token, output, |a, b| a < b),
            D::Fleq => self.compare_f64(token, output, |a, b| a <= b),
            D::Fgrt => self.compare_f64(token, output, |a, b| a > b),
            D::Fgeq => self.compare_f64(token, output, |a, b| a >= b),

            D::Band => self.binary_u64(token, output, |a, b| Ok(a & b)),
            D::Bor => self.binary_u64(token, output, |a, b| Ok(a | b)),
            D::Bxor => self.binary_u64(token, output, |a, b| Ok(a ^ b)),
            D::Bnot => {
                let a = self.pop_value(token, output)?;
                self.push_value(token, output, Value::from_u64(!a.as_u64()));
                Ok(())
            }
            D::Blsft => self.binary_u64(token, output, |a, b| Ok(a.wrapping_shl(b as u32))),
            D::Brsft => self.binary_u64(token, output, |a, b| Ok(a.wrapping_shr(b as u32))),

            D::Ftoi => {
                let a = self.pop_value(token, output)?;
                self.push_value(token, output, Value::from_i64(a.as_f64() as i64));
                Ok(())
            }
            D::Itof => {
                let a = self.pop_value(token, output)?;
                self.push_value(token, output, Value::from_f64(a.as_i64() as f64));
                Ok(())
            }

            D::Fmti => {
                let a = self.pop_value(token, output)?;
                output.push(Token::generated(format!("{}", a.as_i64()), token));
                Ok(())
            }
            D::Fmtu => {
                let a = self.pop_value(token, output)?;
                output.push(Token::generated(format!("{}", a.as_u64()), token));
                Ok(())
            }
            D::Fmtf => {
                let a = self.pop_value(token, output)?;
                output.push(Token::generated(format!("{:?}", a.as_f64()), token));
                Ok(())
            }
        }
    }

    fn dictionary(&self, local: bool) -> &Dictionary {
        if local {
            self.locals.last().expect("local stack is never empty")
        } else {
            &self.global
        }
    }

    fn dictionary_mut(&mut self, local: bool) -> &mut Dictionary {
        if local {
            self.locals.last_mut().expect("local stack is never empty")
        } else {
            &mut self.global
        }
    }

    fn define(
        &mut self,
        token: &Token,
        cursor: &mut Cursor<'_>,
        is_func: bool,
        local: bool,
    ) -> Result<(), PreprocError> {
        let name = self.arg(token, cursor, "expected a word name")?;
        if split_string(&name.text).is_some() {
            return Err(PreprocError::MalformedDirectiveArgs {
                token: name.clone(),
                reason: "a word name cannot be a string or block",
            });
        }
        let body = self.arg(token, cursor, "expected a body")?.clone();
        self.dictionary_mut(local).insert(
            name.text.clone(),
            Word::Def(Definition { body, is_func }),
        );
        Ok(())
    }

    fn include(
        &mut self,
        token: &Token,
        cursor: &mut Cursor<'_>,
        output: &mut Vec<Token>,
        once: bool,
    ) -> Result<(), PreprocError> {
        let path_token = self.arg(token, cursor, "expected a path string")?;
        let Some((StringKind::Single | StringKind::Double, path)) =
            split_string(&path_token.text)
        else {
            return Err(PreprocError::MalformedDirectiveArgs {
                token: path_token.clone(),
                reason: "the path must be a quoted string",
            });
        };

        let file = self
            .sources
            .load(path)
            .map_err(|source| PreprocError::Include {
                token: path_token.clone(),
                source,
            })?;

        if once {
            if !self.imported.insert(file) {
                return Ok(());
            }
        } else if self.active.contains(&file) {
            return Err(PreprocError::InclusionCycle {
                token: path_token.clone(),
            });
        }

        self.splice_file(file, output)
    }

    fn stack_shuffle(
        &self,
        token: &Token,
        output: &mut Vec<Token>,
        depth: usize,
        order: &[usize],
    ) -> Result<(), PreprocError> {
        if output.len() < depth {
            return Err(PreprocError::StackUnderflow {
                token: token.clone(),
            });
        }
        let taken: Vec<Token> = output.split_off(output.len() - depth);
        for &index in order {
            output.push(taken[index].clone());
        }
        Ok(())
    }

    fn binary_i64(
        &self,
        token: &Token,
        output: &mut Vec<Token>,
        op: impl FnOnce(i64, i64) -> Result<i64, ()>,
    ) -> Result<(), PreprocError> {
        let b = self.pop_value(token, output)?;
        let a = self.pop_value(token, output)?;
        let result = op(a.as_i64(), b.as_i64()).map_err(|_| PreprocError::DivisionByZero {
            token: token.clone(),
        })?;
        self.push_value(token, output, Value::from_i64(result));
        Ok(())
    }

    fn binary_u64(
        &self,
        token: &Token,
        output: &mut Vec<Token>,
        op: impl FnOnce(u64, u64) -> Result<u64, ()>,
    ) -> Result<(), PreprocError> {
        let b = self.pop_value(token, output)?;
        let a = self.pop_value(token, output)?;
        let result = op(a.as_u64(), b.as_u64()).map_err(|_| PreprocError::DivisionByZero {
            token: token.clone(),
        })?;
        self.push_value(token, output, Value::from_u64(result));
        Ok(())
    }

    fn binary_f64(
        &self,
        token: &Token,
        output: &mut Vec<Token>,
        op: impl FnOnce(f64, f64) -> f64,
    ) -> Result<(), PreprocError> {
        let b = self.pop_value(token, output)?;
        let a = self.pop_value(token, output)?;
        self.push_value(token, output, Value::from_f64(op(a.as_f64(), b.as_f64())));
        Ok(())
    }

    fn compare_i64(
        &self,
        token: &Token,
        output: &mut Vec<Token>,
        op: impl FnOnce(i64, i64) -> bool,
    ) -> Result<(), PreprocError> {
        let b = self.pop_value(token, output)?;
        let a = self.pop_value(token, output)?;
        self.push_value(token, output, Value::from_bool(op(a.as_i64(), b.as_i64())));
        Ok(())
    }

    fn compare_u64(
        &self,
        token: &Token,
        output: &mut Vec<Token>,
        op: impl FnOnce(u64, u64) -> bool,
    ) -> Result<(), PreprocError> {
        let b = self.pop_value(token, output)?;
        let a = self.pop_value(token, output)?;
        self.push_value(token, output, Value::from_bool(op(a.as_u64(), b.as_u64())));
        Ok(())
    }

    fn compare_f64(
        &self,
        token: &Token,
        output: &mut Vec<Token>,
        op: impl FnOnce(f64, f64) -> bool,
    ) -> Result<(), PreprocError> {
        let b = self.pop_value(token, output)?;
        let a = self.pop_value(token, output)?;
        self.push_value(token, output, Value::from_bool(op(a.as_f64(), b.as_f64())));
        Ok(())
    }
}
