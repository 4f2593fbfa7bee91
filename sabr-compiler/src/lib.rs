//! Single-pass lowering from the post-preprocess token stream to bytecode.
//!
//! Structured control flow is resolved with a stack of keyword frames:
//! opening keywords push a frame, intermediate keywords append to the top
//! frame, and `end` pops it and back-patches every jump the construct
//! emitted. Jump operands are byte offsets into the encoded bytecode.

pub mod keyword;
pub mod literal;

use indexmap::IndexMap;
use sabr_bytecode::{Bytecode, Op, Opcode};
use sabr_foundation::{
    errors::{Diagnostic, Label},
    source::Sources,
    value::{parse_number, Value},
};
use sabr_lexer::{LexError, Lexer, Token, DEFAULT_TAB_SIZE};
use thiserror::Error;

use keyword::{Keyword, Structured};

#[derive(Debug, Error)]
pub enum CompileError {
    #[error(transparent)]
    Lex(#[from] LexError),
    #[error("`end` without an open construct")]
    UnmatchedEnd { token: Token },
    #[error("`{}` is not valid here", .token.text)]
    UnmatchedIntermediate { token: Token },
    #[error("duplicate `{}` in a for loop", .token.text)]
    DuplicateFromToStep { token: Token },
    #[error("malformed switch")]
    MalformedSwitch { token: Token },
    #[error("`return` outside of a function")]
    ReturnOutsideFunction { token: Token },
    #[error("invalid numeric literal")]
    InvalidNumeric { token: Token },
    #[error("invalid escape sequence in string")]
    InvalidEscape { token: Token },
    #[error("invalid identifier")]
    InvalidIdentifier { token: Token },
    #[error("`{}` expects a {{ … }} block", .token.text)]
    ExpectedBlock { token: Token },
    #[error("`{}` is never closed by `end`", .token.text)]
    UnclosedConstruct { token: Token },
}

impl CompileError {
    pub fn token(&self) -> &Token {
        match self {
            Self::Lex(error) => error.token(),
            Self::UnmatchedEnd { token }
            | Self::UnmatchedIntermediate { token }
            | Self::DuplicateFromToStep { token }
            | Self::MalformedSwitch { token }
            | Self::ReturnOutsideFunction { token }
            | Self::InvalidNumeric { token }
            | Self::InvalidEscape { token }
            | Self::InvalidIdentifier { token }
            | Self::ExpectedBlock { token }
            | Self::UnclosedConstruct { token } => token,
        }
    }

    pub fn to_diagnostic(&self, sources: &Sources) -> Diagnostic {
        if let Self::Lex(error) = self {
            return error.to_diagnostic(sources);
        }
        let token = self.token();
        let diagnostic = Diagnostic::error(format!("{self}: {}", token.locate(sources)));
        if token.range.is_empty() {
            diagnostic
        } else {
            diagnostic.with_label(Label::primary(token.file, token.range.clone(), ""))
        }
    }
}

/// A pending jump or marker inside an open construct, to be resolved when
/// the matching `end` is reached.
#[derive(Debug, Clone)]
struct FrameEntry {
    keyword: Structured,
    /// Op index of the instruction this entry refers to.
    index: usize,
    /// Byte offset of that instruction.
    pos: u64,
    token: Token,
    /// The braced code block of a `defer` entry.
    fragment: Option<Token>,
}

#[derive(Debug)]
pub struct Compiler {
    identifiers: IndexMap<String, u64>,
    frames: Vec<Vec<FrameEntry>>,
    tab_size: u32,
    /// Set while a deferred fragment compiles; `return` and `defer` cannot
    /// nest inside one.
    in_defer: bool,
}

impl Default for Compiler {
    fn default() -> Self {
        Self::new()
    }
}

impl Compiler {
    pub fn new() -> Self {
        Self {
            identifiers: IndexMap::new(),
            frames: vec![],
            tab_size: DEFAULT_TAB_SIZE,
            in_defer: false,
        }
    }

    pub fn with_tab_size(mut self, tab_size: u32) -> Self {
        self.tab_size = tab_size.max(1);
        self
    }

    /// The identifier interning table, in declaration order. Indices start
    /// at 1; 0 is the `exec`-an-address sentinel.
    pub fn identifiers(&self) -> &IndexMap<String, u64> {
        &self.identifiers
    }

    pub fn compile(&mut self, tokens: &[Token]) -> Result<Bytecode, CompileError> {
        self.frames.clear();
        let mut bytecode = Bytecode::new();
        self.compile_slice(tokens, &mut bytecode)?;
        if let Some(frame) = self.frames.first() {
            return Err(CompileError::UnclosedConstruct {
                token: frame[0].token.clone(),
            });
        }
        tracing::debug!(
            ops = bytecode.current_index(),
            bytes = bytecode.current_pos(),
            "compiled"
        );
        Ok(bytecode)
    }

    fn compile_slice(
        &mut self,
        tokens: &[Token],
        bytecode: &mut Bytecode,
    ) -> Result<(), CompileError> {
        let mut index = 0;
        while index < tokens.len() {
            let token = &tokens[index];
            index += 1;
            match keyword::lookup(&token.text) {
                Some(Keyword::Simple(opcode)) => {
                    bytecode.push(Op::new(opcode));
                }
                Some(Keyword::Structured(structured)) => {
                    // `lambda` and `defer` are the two keywords that look
                    // ahead and consume a braced block.
                    let fragment = if matches!(structured, Structured::Lambda | Structured::Defer)
                    {
                        let block = tokens
                            .get(index)
                            .filter(|next| next.text.starts_with('{'))
                            .cloned()
                            .ok_or_else(|| CompileError::ExpectedBlock {
                                token: token.clone(),
                            })?;
                        index += 1;
                        Some(block)
                    } else {
                        None
                    };
                    self.compile_structured(structured, token, fragment, bytecode)?;
                }
                None => {
                    if let Some(&id) = self.identifiers.get(&token.text) {
                        bytecode.push(Op::with_operand(Opcode::Exec, Value::from_u64(id)));
                    } else {
                        self.compile_literal(token, bytecode)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn compile_literal(
        &mut self,
        token: &Token,
        bytecode: &mut Bytecode,
    ) -> Result<(), CompileError> {
        match token.text.as_bytes().first() {
            Some(b'+' | b'-' | b'.' | b'0'..=b'9') => {
                let value =
                    parse_number(&token.text).ok_or_else(|| CompileError::InvalidNumeric {
                        token: token.clone(),
                    })?;
                bytecode.push(Op::with_operand(Opcode::Value, value));
            }
            Some(b'$') => {
                let id = self.intern(&token.text[1..], token)?;
                bytecode.push(Op::with_operand(Opcode::Value, Value::from_u64(id)));
            }
            Some(b'\'') => {
                let values = literal::decode_string(&token.text).map_err(|_| {
                    CompileError::InvalidEscape {
                        token: token.clone(),
                    }
                })?;
                // Emitted in reverse so that popping reads the string
                // left to right.
                for value in values.into_iter().rev() {
                    bytecode.push(Op::with_operand(Opcode::Value, value));
                }
            }
            Some(b'"') => {
                let values = literal::decode_string(&token.text).map_err(|_| {
                    CompileError::InvalidEscape {
                        token: token.clone(),
                    }
                })?;
                bytecode.push(Op::new(Opcode::Array));
                for value in values {
                    bytecode.push(Op::with_operand(Opcode::Value, value));
                    bytecode.push(Op::new(Opcode::ArrayComma));
                }
                bytecode.push(Op::new(Opcode::ArrayEnd));
            }
            // A standalone block emits nothing; the keywords that want one
            // have already consumed it.
            Some(b'{') => (),
            _ => {
                let id = self.intern(&token.text, token)?;
                bytecode.push(Op::with_operand(Opcode::Exec, Value::from_u64(id)));
            }
        }
        Ok(())
    }

    fn intern(&mut self, name: &str, token: &Token) -> Result<u64, CompileError> {
        if keyword::lookup(name).is_some() {
            return Err(CompileError::InvalidIdentifier {
                token: token.clone(),
            });
        }
        if let Some(&id) = self.identifiers.get(name) {
            return Ok(id);
        }
        if !literal::is_valid_identifier(name) {
            return Err(CompileError::InvalidIdentifier {
                token: token.clone(),
            });
        }
        let id = self.identifiers.len() as u64 + 1;
        self.identifiers.insert(name.to_owned(), id);
        Ok(id)
    }

    fn entry(&self, keyword: Structured, token: &Token, bytecode: &Bytecode) -> FrameEntry {
        FrameEntry {
            keyword,
            index: bytecode.current_index(),
            pos: bytecode.current_pos(),
            token: token.clone(),
            fragment: None,
        }
    }

    fn append(&mut self, entry: FrameEntry) -> Result<(), CompileError> {
        match self.frames.last_mut() {
            Some(frame) => {
                frame.push(entry);
                Ok(())
            }
            None => Err(CompileError::UnmatchedIntermediate { token: entry.token }),
        }
    }

    /// Moves a `break`/`continue`/`return` that the closed construct cannot
    /// resolve into the parent frame.
    fn forward(&mut self, entry: FrameEntry) -> Result<(), CompileError> {
        match self.frames.last_mut() {
            Some(parent) => {
                parent.push(entry);
                Ok(())
            }
            None if entry.keyword == Structured::Return => {
                Err(CompileError::ReturnOutsideFunction { token: entry.token })
            }
            None => Err(CompileError::UnmatchedIntermediate { token: entry.token }),
        }
    }

    fn compile_structured(
        &mut self,
        structured: Structured,
        token: &Token,
        fragment: Option<Token>,
        bytecode: &mut Bytecode,
    ) -> Result<(), CompileError> {
        use Structured as S;
        match structured {
            S::If => {
                let entry = self.entry(S::If, token, bytecode);
                self.frames.push(vec![entry]);
                bytecode.push(Op::new(Opcode::If));
            }
            S::Else => {
                self.append(self.entry(S::Else, token, bytecode))?;
                bytecode.push(Op::new(Opcode::Jump));
            }
            S::Loop => {
                let entry = self.entry(S::Loop, token, bytecode);
                self.frames.push(vec![entry]);
            }
            S::While => {
                self.append(self.entry(S::While, token, bytecode))?;
                bytecode.push(Op::new(Opcode::If));
            }
            S::Break | S::Continue => {
                self.append(self.entry(structured, token, bytecode))?;
                bytecode.push(Op::new(Opcode::Jump));
            }
            S::For | S::Ufor | S::Ffor => {
                let entry = self.entry(structured, token, bytecode);
                self.frames.push(vec![entry]);
                let for_type = match structured {
                    S::Ufor => 1,
                    S::Ffor => 2,
                    _ => 0,
                };
                bytecode.push(Op::with_operand(Opcode::For, Value::from_u64(for_type)));
                self.push_check_placeholder(bytecode);
            }
            S::From | S::To | S::Step => {
                self.append(self.entry(structured, token, bytecode))?;
                let opcode = match structured {
                    S::From => Opcode::ForFrom,
                    S::To => Opcode::ForTo,
                    _ => Opcode::ForStep,
                };
                bytecode.push(Op::new(opcode));
                self.push_check_placeholder(bytecode);
            }
            S::Switch => {
                let entry = self.entry(S::Switch, token, bytecode);
                self.frames.push(vec![entry]);
                bytecode.push(Op::new(Opcode::Switch));
            }
            S::Case => {
                self.append(self.entry(S::Case, token, bytecode))?;
                bytecode.push(Op::new(Opcode::SwitchCase));
                bytecode.push(Op::new(Opcode::Equ));
                bytecode.push(Op::new(Opcode::If));
            }
            S::Pass => {
                self.append(self.entry(S::Pass, token, bytecode))?;
                bytecode.push(Op::new(Opcode::Jump));
            }
            S::Func | S::Macro => {
                let entry = self.entry(structured, token, bytecode);
                self.frames.push(vec![entry]);
                bytecode.push(Op::new(Opcode::Lambda));
                if structured == S::Func {
                    bytecode.push(Op::new(Opcode::Local));
                }
            }
            S::Lambda => {
                let entry = self.entry(S::Lambda, token, bytecode);
                let lambda_index = entry.index;
                self.frames.push(vec![entry]);
                bytecode.push(Op::new(Opcode::Lambda));
                bytecode.push(Op::new(Opcode::Local));
                self.compile_fragment(&fragment.expect("lambda always carries a block"), bytecode)?;

                let frame = self.frames.pop().expect("lambda frame is still open");
                if frame[0].keyword != S::Lambda || frame[0].index != lambda_index {
                    return Err(CompileError::UnclosedConstruct {
                        token: frame[0].token.clone(),
                    });
                }
                self.close_function(frame, bytecode, true, false)?;
            }
            S::Defer => {
                if self.in_defer {
                    return Err(CompileError::UnmatchedIntermediate {
                        token: token.clone(),
                    });
                }
                let mut entry = self.entry(S::Defer, token, bytecode);
                entry.fragment = fragment;
                let target = self
                    .frames
                    .iter_mut()
                    .rev()
                    .find(|frame| {
                        matches!(frame[0].keyword, S::Func | S::Macro | S::Lambda)
                    })
                    .ok_or_else(|| CompileError::UnmatchedIntermediate {
                        token: token.clone(),
                    })?;
                target.push(entry);
            }
            S::Return => {
                if self.in_defer {
                    return Err(CompileError::ReturnOutsideFunction {
                        token: token.clone(),
                    });
                }
                let entry = self.entry(S::Return, token, bytecode);
                if self.frames.is_empty() {
                    return Err(CompileError::ReturnOutsideFunction {
                        token: token.clone(),
                    });
                }
                self.append(entry)?;
                bytecode.push(Op::new(Opcode::Jump));
            }
            S::Struct => {
                let entry = self.entry(S::Struct, token, bytecode);
                self.frames.push(vec![entry]);
                bytecode.push(Op::new(Opcode::Datagroup));
            }
            S::Member => {
                self.append(self.entry(S::Member, token, bytecode))?;
                bytecode.push(Op::new(Opcode::Member));
            }
            S::End => self.close_construct(token, bytecode)?,
        }
        Ok(())
    }

    /// The 9-byte slot after `for`/`from`/`to`/`step` where `end` will
    /// place the single `for_check`. Until then it is a fall-through jump,
    /// which keeps the encoding width fixed by opcode.
    fn push_check_placeholder(&self, bytecode: &mut Bytecode) {
        let pos = bytecode.current_pos();
        bytecode.push(Op::with_operand(Opcode::Jump, Value::from_u64(pos + 9)));
    }

    fn compile_fragment(
        &mut self,
        fragment: &Token,
        bytecode: &mut Bytecode,
    ) -> Result<(), CompileError> {
        let content = &fragment.text[1..fragment.text.len() - 1];
        let mut pos = fragment.origin;
        if !fragment.generated {
            pos.column += 1;
        }
        let tokens = Lexer::new(content, fragment.file)
            .with_origin(pos, fragment.range.start + 1)
            .with_generated(fragment.generated)
            .with_tab_size(self.tab_size)
            .tokenize()?;
        self.compile_slice(&tokens, bytecode)
    }

    fn close_construct(
        &mut self,
        token: &Token,
        bytecode: &mut Bytecode,
    ) -> Result<(), CompileError> {
        let frame = self
            .frames
            .pop()
            .ok_or_else(|| CompileError::UnmatchedEnd {
                token: token.clone(),
            })?;
        match frame[0].keyword {
            Structured::If => self.close_if(frame, bytecode),
            Structured::Loop => self.close_loop(frame, bytecode),
            Structured::For | Structured::Ufor | Structured::Ffor => {
                self.close_for(frame, bytecode)
            }
            Structured::Switch => self.close_switch(frame, token, bytecode),
            Structured::Func => self.close_function(frame, bytecode, true, true),
            Structured::Macro => self.close_function(frame, bytecode, false, true),
            Structured::Struct => self.close_struct(frame, bytecode),
            // A stray `end` inside a lambda block would close the lambda's
            // own frame.
            _ => Err(CompileError::UnmatchedEnd {
                token: token.clone(),
            }),
        }
    }

    fn close_if(
        &mut self,
        mut frame: Vec<FrameEntry>,
        bytecode: &mut Bytecode,
    ) -> Result<(), CompileError> {
        let end_pos = bytecode.current_pos();
        let first = frame.remove(0);
        let mut inner_else: Option<FrameEntry> = None;
        for entry in frame {
            match entry.keyword {
                Structured::Else => {
                    if inner_else.is_some() {
                        return Err(CompileError::UnmatchedIntermediate { token: entry.token });
                    }
                    inner_else = Some(entry);
                }
                Structured::Break | Structured::Continue | Structured::Return => {
                    self.forward(entry)?
                }
                _ => return Err(CompileError::UnmatchedIntermediate { token: entry.token }),
            }
        }
        if let Some(else_entry) = inner_else {
            // The `if` jumps to the first op of the else branch, right
            // after the else's own jump.
            bytecode.patch(first.index, Value::from_u64(else_entry.pos + 9));
            bytecode.patch(else_entry.index, Value::from_u64(end_pos));
        } else {
            bytecode.patch(first.index, Value::from_u64(end_pos));
        }
        Ok(())
    }

    fn close_loop(
        &mut self,
        mut frame: Vec<FrameEntry>,
        bytecode: &mut Bytecode,
    ) -> Result<(), CompileError> {
        let end_pos = bytecode.current_pos();
        let first = frame.remove(0);
        let mut has_while = false;
        for entry in frame {
            match entry.keyword {
                Structured::While => {
                    if has_while {
                        return Err(CompileError::UnmatchedIntermediate { token: entry.token });
                    }
                    has_while = true;
                    bytecode.patch(entry.index, Value::from_u64(end_pos + 9));
                }
                Structured::Break => bytecode.patch(entry.index, Value::from_u64(end_pos + 9)),
                Structured::Continue => bytecode.patch(entry.index, Value::from_u64(first.pos)),
                Structured::Return => self.forward(entry)?,
                _ => return Err(CompileError::UnmatchedIntermediate { token: entry.token }),
            }
        }
        bytecode.push(Op::with_operand(Opcode::Jump, Value::from_u64(first.pos)));
        Ok(())
    }

    fn close_for(
        &mut self,
        mut frame: Vec<FrameEntry>,
        bytecode: &mut Bytecode,
    ) -> Result<(), CompileError> {
        let end_pos = bytecode.current_pos();
        let first = frame.remove(0);
        let mut last_clause = (first.index, first.pos);
        let (mut has_from, mut has_to, mut has_step) = (false, false, false);
        let mut continues = vec![];
        for entry in frame {
            match entry.keyword {
                Structured::From | Structured::To | Structured::Step => {
                    let seen = match entry.keyword {
                        Structured::From => &mut has_from,
                        Structured::To => &mut has_to,
                        _ => &mut has_step,
                    };
                    if *seen {
                        return Err(CompileError::DuplicateFromToStep { token: entry.token });
                    }
                    *seen = true;
                    last_clause = (entry.index, entry.pos);
                }
                Structured::Break => bytecode.patch(entry.index, Value::from_u64(end_pos + 9)),
                Structured::Continue => continues.push(entry),
                Structured::Return => self.forward(entry)?,
                _ => return Err(CompileError::UnmatchedIntermediate { token: entry.token }),
            }
        }

        // The placeholder right after the last provided clause becomes the
        // loop's single check; its exit target is the for_end op.
        let check_index = last_clause.0 + 1;
        let check_pos = bytecode.position_of(check_index);
        bytecode.rewrite(check_index, Opcode::ForCheck, Value::from_u64(end_pos + 9));
        for entry in continues {
            bytecode.rewrite(entry.index, Opcode::ForNext, Value::from_u64(check_pos));
        }
        bytecode.push(Op::with_operand(Opcode::ForNext, Value::from_u64(check_pos)));
        bytecode.push(Op::new(Opcode::ForEnd));
        Ok(())
    }

    fn close_switch(
        &mut self,
        mut frame: Vec<FrameEntry>,
        end_token: &Token,
        bytecode: &mut Bytecode,
    ) -> Result<(), CompileError> {
        let end_pos = bytecode.current_pos();
        let first = frame.remove(0);
        if !matches!(frame.first().map(|e| e.keyword), Some(Structured::Case)) {
            return Err(CompileError::MalformedSwitch {
                token: first.token.clone(),
            });
        }

        let mut group: Vec<FrameEntry> = vec![];
        let mut any_pass = false;
        for entry in frame {
            match entry.keyword {
                Structured::Case => group.push(entry),
                Structured::Pass => {
                    let Some(last_case) = group.last() else {
                        return Err(CompileError::MalformedSwitch { token: entry.token });
                    };
                    // Matching the last case of the chain falls straight
                    // into the body; failing it skips past the pass jump to
                    // the next group. Chained cases are inverted to `neq`
                    // so that a match jumps into the shared body.
                    let body_pos = last_case.pos + 11;
                    bytecode.patch(last_case.index + 2, Value::from_u64(entry.pos + 9));
                    for chained in &group[..group.len() - 1] {
                        bytecode.rewrite(chained.index + 1, Opcode::Neq, Value::ZERO);
                        bytecode.patch(chained.index + 2, Value::from_u64(body_pos));
                    }
                    bytecode.patch(entry.index, Value::from_u64(end_pos));
                    group.clear();
                    any_pass = true;
                }
                Structured::Break | Structured::Continue | Structured::Return => {
                    self.forward(entry)?
                }
                _ => return Err(CompileError::UnmatchedIntermediate { token: entry.token }),
            }
        }
        if !group.is_empty() || !any_pass {
            return Err(CompileError::MalformedSwitch {
                token: end_token.clone(),
            });
        }
        bytecode.push(Op::new(Opcode::SwitchEnd));
        Ok(())
    }

    fn close_function(
        &mut self,
        mut frame: Vec<FrameEntry>,
        bytecode: &mut Bytecode,
        with_local: bool,
        with_define: bool,
    ) -> Result<(), CompileError> {
        let first = frame.remove(0);
        let mut returns = vec![];
        let mut defers = vec![];
        for entry in frame {
            match entry.keyword {
                Structured::Return => returns.push(entry),
                Structured::Defer => defers.push(entry),
                _ => return Err(CompileError::UnmatchedIntermediate { token: entry.token }),
            }
        }

        // Deferred fragments run on every exit path: `return` jumps here,
        // and normal flow falls through. Last deferred, first run.
        let epilogue_pos = bytecode.current_pos();
        self.in_defer = true;
        let deferred = defers.iter().rev().try_for_each(|entry| {
            let fragment = entry.fragment.as_ref().expect("defer always carries a block");
            self.compile_fragment(fragment, bytecode)
        });
        self.in_defer = false;
        deferred?;

        for entry in returns {
            bytecode.patch(entry.index, Value::from_u64(epilogue_pos));
        }
        if with_local {
            bytecode.push(Op::new(Opcode::LocalEnd));
        }
        bytecode.push(Op::new(Opcode::Return));
        bytecode.patch(first.index, Value::from_u64(bytecode.current_pos()));
        if with_define {
            bytecode.push(Op::new(Opcode::Define));
        }
        Ok(())
    }

    fn close_struct(
        &mut self,
        mut frame: Vec<FrameEntry>,
        bytecode: &mut Bytecode,
    ) -> Result<(), CompileError> {
        let first = frame.remove(0);
        let mut member_count = 0u64;
        for entry in frame {
            match entry.keyword {
                Structured::Member => member_count += 1,
                _ => return Err(CompileError::UnmatchedIntermediate { token: entry.token }),
            }
        }
        bytecode.patch(first.index, Value::from_u64(member_count));
        bytecode.push(Op::new(Opcode::DatagroupEnd));
        Ok(())
    }
}
