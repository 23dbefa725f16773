//! # Expression Module
//!
//! The closed expression sum type and its restricted source language.
//!
//! An expression is a pure callable over a keyword-parameter bag. The
//! language admits unsigned 64-bit integers, named parameters, wrapping
//! arithmetic, comparisons, `if/then/else`, and a closed set of pure
//! primitives (`fib`, `mix`, `min`, `max`). There is no I/O, no clock
//! access, no randomness, and no reflection: evaluation is deterministic
//! by construction.
//!
//! Expression kinds form a closed sum type rather than a class hierarchy;
//! adding a kind is an explicit edit to the enum and its exhaustive matches.

use crate::ops;
use crate::primitives::MAX_PARAM_NAME_LENGTH;
use crate::types::{CoreError, Identity};
use std::collections::BTreeMap;

/// Keyword-parameter bag passed to `invoke`.
///
/// Sorted map so canonicalized parameter sets are deterministic.
pub type ParamBag = BTreeMap<String, u64>;

// =============================================================================
// EXPRESSION SUM TYPE
// =============================================================================

/// The closed set of expression kinds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expression {
    /// A fixed value: `constant:42`.
    Constant(u64),
    /// An identity literal: `identity:1`. Evaluates to the seed itself but
    /// is typed as an identity echo rather than plain data.
    IdentitySeed(u64),
    /// A composed program over parameters: `expr:(a + (b * 2))`.
    Program { ast: Node },
    /// The projection of one dimension of a parent substrate.
    Projected { parent: Identity, position: u8 },
    /// A residue from a modulus operation, seeding the next dimensional level.
    ResidueSeeded { parent: Identity, seed: u64 },
    /// A substrate spawned from SRL-fetched bytes; re-returns the cached
    /// payload identity.
    Spawned { srl: Identity, payload: u64 },
}

impl Expression {
    /// Parse an expression source string.
    ///
    /// The form is `<kind>:<body>`. Unknown kinds and malformed bodies are
    /// rejected; nothing in the grammar can reach the outside world.
    pub fn parse(source: &str) -> Result<Self, CoreError> {
        let source = source.trim();
        let (kind, body) = source
            .split_once(':')
            .ok_or_else(|| reject("missing `kind:` prefix"))?;
        let body = body.trim();
        match kind.trim() {
            "constant" => Ok(Self::Constant(parse_u64(body)?)),
            "identity" => Ok(Self::IdentitySeed(parse_u64(body)?)),
            "expr" => {
                let ast = Parser::new(body)?.parse_complete()?;
                Ok(Self::Program { ast })
            }
            "projected" => {
                let (parent, position) = split_pair(body)?;
                let position = parse_u64(position)?;
                if position >= crate::primitives::DIMENSION_COUNT as u64 {
                    return Err(CoreError::InvalidDimensionIndex(position as u8));
                }
                Ok(Self::Projected {
                    parent: Identity::new(parse_hex_identity(parent)?),
                    position: position as u8,
                })
            }
            "residue" => {
                let (parent, seed) = split_pair(body)?;
                Ok(Self::ResidueSeeded {
                    parent: Identity::new(parse_hex_identity(parent)?),
                    seed: parse_u64(seed)?,
                })
            }
            "spawned" => {
                let (srl, payload) = split_pair(body)?;
                Ok(Self::Spawned {
                    srl: Identity::new(parse_hex_identity(srl)?),
                    payload: parse_hex_identity(payload)?,
                })
            }
            other => Err(reject(&format!("unknown expression kind `{other}`"))),
        }
    }

    /// Render the canonical source.
    ///
    /// Canonicalization is parse-then-render: all whitespace variants of the
    /// same program collapse to one string, so content-derived identities
    /// are stable (non-duplication).
    #[must_use]
    pub fn canonical_source(&self) -> String {
        match self {
            Self::Constant(n) => format!("constant:{n}"),
            Self::IdentitySeed(n) => format!("identity:{n}"),
            Self::Program { ast } => format!("expr:{}", ast.render()),
            Self::Projected { parent, position } => {
                format!("projected:{parent}:{position}")
            }
            Self::ResidueSeeded { parent, seed } => format!("residue:{parent}:{seed}"),
            Self::Spawned { srl, payload } => format!("spawned:{srl}:{payload:016x}"),
        }
    }

    /// The content-derived identity of this expression.
    #[must_use]
    pub fn identity(&self) -> Identity {
        Identity::from_content(&self.canonical_source())
    }

    /// Evaluate against a parameter bag.
    ///
    /// Same inputs always produce the same output; failures are surfaced,
    /// never swallowed.
    pub fn evaluate(&self, params: &ParamBag) -> Result<u64, CoreError> {
        match self {
            Self::Constant(n) | Self::IdentitySeed(n) => Ok(*n),
            Self::Program { ast } => ast.evaluate(params),
            Self::Projected { parent, position } => {
                Ok(ops::part_identity(parent.value(), *position as usize))
            }
            Self::ResidueSeeded { seed, .. } => Ok(*seed),
            Self::Spawned { payload, .. } => Ok(*payload),
        }
    }

    /// Whether evaluation reads from the parameter bag.
    ///
    /// The registry's determinism probe only double-evaluates closed
    /// expressions; open ones are exercised at invocation time.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        match self {
            Self::Program { ast } => !ast.reads_params(),
            _ => true,
        }
    }
}

/// Canonicalize a source string without keeping the compiled expression.
pub fn canonicalize(source: &str) -> Result<String, CoreError> {
    Ok(Expression::parse(source)?.canonical_source())
}

fn reject(msg: &str) -> CoreError {
    CoreError::SourceRejected(msg.to_string())
}

fn split_pair(body: &str) -> Result<(&str, &str), CoreError> {
    body.split_once(':')
        .ok_or_else(|| reject("expected two `:`-separated fields"))
}

fn parse_u64(text: &str) -> Result<u64, CoreError> {
    let text = text.trim();
    let parsed = if let Some(hex) = text.strip_prefix("0x") {
        u64::from_str_radix(hex, 16)
    } else {
        text.parse::<u64>()
    };
    parsed.map_err(|_| reject(&format!("invalid integer `{text}`")))
}

fn parse_hex_identity(text: &str) -> Result<u64, CoreError> {
    u64::from_str_radix(text.trim(), 16)
        .map_err(|_| reject(&format!("invalid identity `{text}`")))
}

// =============================================================================
// ABSTRACT SYNTAX
// =============================================================================

/// Binary operators of the program grammar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl BinOp {
    const fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Mod => "%",
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        }
    }
}

/// The closed set of pure primitives callable from a program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    /// `fib(n)` - the n-th Fibonacci number, wrapping.
    Fib,
    /// `mix(x)` - the splitmix64 finalizer, a bijective hash.
    Mix,
    /// `min(a, b)`.
    Min,
    /// `max(a, b)`.
    Max,
}

impl Builtin {
    fn lookup(name: &str) -> Option<(Self, usize)> {
        match name {
            "fib" => Some((Self::Fib, 1)),
            "mix" => Some((Self::Mix, 1)),
            "min" => Some((Self::Min, 2)),
            "max" => Some((Self::Max, 2)),
            _ => None,
        }
    }

    const fn name(self) -> &'static str {
        match self {
            Self::Fib => "fib",
            Self::Mix => "mix",
            Self::Min => "min",
            Self::Max => "max",
        }
    }
}

/// A node of a compiled program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Number(u64),
    Param(String),
    Binary {
        op: BinOp,
        lhs: Box<Node>,
        rhs: Box<Node>,
    },
    If {
        cond: Box<Node>,
        then: Box<Node>,
        els: Box<Node>,
    },
    Call {
        func: Builtin,
        args: Vec<Node>,
    },
}

impl Node {
    /// Evaluate the node. Arithmetic wraps; division and modulo by zero fail.
    pub fn evaluate(&self, params: &ParamBag) -> Result<u64, CoreError> {
        match self {
            Self::Number(n) => Ok(*n),
            Self::Param(name) => params.get(name).copied().ok_or_else(|| {
                CoreError::EvaluationFailed(format!("unknown parameter `{name}`"))
            }),
            Self::Binary { op, lhs, rhs } => {
                let l = lhs.evaluate(params)?;
                let r = rhs.evaluate(params)?;
                match op {
                    BinOp::Add => Ok(l.wrapping_add(r)),
                    BinOp::Sub => Ok(l.wrapping_sub(r)),
                    BinOp::Mul => Ok(l.wrapping_mul(r)),
                    BinOp::Div => l.checked_div(r).ok_or(CoreError::DivisionByZero),
                    BinOp::Mod => l.checked_rem(r).ok_or(CoreError::DivisionByZero),
                    BinOp::Eq => Ok(u64::from(l == r)),
                    BinOp::Ne => Ok(u64::from(l != r)),
                    BinOp::Lt => Ok(u64::from(l < r)),
                    BinOp::Le => Ok(u64::from(l <= r)),
                    BinOp::Gt => Ok(u64::from(l > r)),
                    BinOp::Ge => Ok(u64::from(l >= r)),
                }
            }
            Self::If { cond, then, els } => {
                if cond.evaluate(params)? != 0 {
                    then.evaluate(params)
                } else {
                    els.evaluate(params)
                }
            }
            Self::Call { func, args } => {
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(arg.evaluate(params)?);
                }
                Ok(match func {
                    Builtin::Fib => fibonacci(values[0]),
                    Builtin::Mix => splitmix64(values[0]),
                    Builtin::Min => values[0].min(values[1]),
                    Builtin::Max => values[0].max(values[1]),
                })
            }
        }
    }

    /// Render canonical text. Compound nodes are fully parenthesized so the
    /// rendering is unambiguous and whitespace-independent.
    #[must_use]
    pub fn render(&self) -> String {
        match self {
            Self::Number(n) => n.to_string(),
            Self::Param(name) => name.clone(),
            Self::Binary { op, lhs, rhs } => {
                format!("({} {} {})", lhs.render(), op.symbol(), rhs.render())
            }
            Self::If { cond, then, els } => format!(
                "(if {} then {} else {})",
                cond.render(),
                then.render(),
                els.render()
            ),
            Self::Call { func, args } => {
                let rendered: Vec<String> = args.iter().map(Node::render).collect();
                format!("{}({})", func.name(), rendered.join(", "))
            }
        }
    }

    /// Whether any parameter reference appears in this subtree.
    #[must_use]
    pub fn reads_params(&self) -> bool {
        match self {
            Self::Number(_) => false,
            Self::Param(_) => true,
            Self::Binary { lhs, rhs, .. } => lhs.reads_params() || rhs.reads_params(),
            Self::If { cond, then, els } => {
                cond.reads_params() || then.reads_params() || els.reads_params()
            }
            Self::Call { args, .. } => args.iter().any(Node::reads_params),
        }
    }
}

/// The n-th Fibonacci number with wrapping addition.
fn fibonacci(n: u64) -> u64 {
    let mut a: u64 = 0;
    let mut b: u64 = 1;
    // Beyond 93 iterations the sequence only cycles within the wrap.
    for _ in 0..n.min(512) {
        let next = a.wrapping_add(b);
        a = b;
        b = next;
    }
    a
}

/// The splitmix64 finalizer: a fixed bijective mixing function.
fn splitmix64(x: u64) -> u64 {
    let mut z = x.wrapping_add(crate::primitives::GOLDEN_GAMMA);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

// =============================================================================
// LEXER
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Number(u64),
    Ident(String),
    If,
    Then,
    Else,
    Op(BinOp),
    LParen,
    RParen,
    Comma,
}

fn lex(input: &str) -> Result<Vec<Token>, CoreError> {
    let mut tokens = Vec::new();
    let bytes = input.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i] as char;
        match c {
            ' ' | '\t' | '\n' | '\r' => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '+' => {
                tokens.push(Token::Op(BinOp::Add));
                i += 1;
            }
            '-' => {
                tokens.push(Token::Op(BinOp::Sub));
                i += 1;
            }
            '*' => {
                tokens.push(Token::Op(BinOp::Mul));
                i += 1;
            }
            '/' => {
                tokens.push(Token::Op(BinOp::Div));
                i += 1;
            }
            '%' => {
                tokens.push(Token::Op(BinOp::Mod));
                i += 1;
            }
            '=' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    tokens.push(Token::Op(BinOp::Eq));
                    i += 2;
                } else {
                    return Err(reject("single `=` is not an operator"));
                }
            }
            '!' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    tokens.push(Token::Op(BinOp::Ne));
                    i += 2;
                } else {
                    return Err(reject("single `!` is not an operator"));
                }
            }
            '<' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    tokens.push(Token::Op(BinOp::Le));
                    i += 2;
                } else {
                    tokens.push(Token::Op(BinOp::Lt));
                    i += 1;
                }
            }
            '>' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    tokens.push(Token::Op(BinOp::Ge));
                    i += 2;
                } else {
                    tokens.push(Token::Op(BinOp::Gt));
                    i += 1;
                }
            }
            '0'..='9' => {
                let start = i;
                while i < bytes.len() && (bytes[i] as char).is_ascii_alphanumeric() {
                    i += 1;
                }
                let text = &input[start..i];
                tokens.push(Token::Number(parse_u64(text)?));
            }
            'a'..='z' | 'A'..='Z' | '_' => {
                let start = i;
                while i < bytes.len()
                    && ((bytes[i] as char).is_ascii_alphanumeric() || bytes[i] == b'_')
                {
                    i += 1;
                }
                let word = &input[start..i];
                if word.len() > MAX_PARAM_NAME_LENGTH {
                    return Err(reject("identifier too long"));
                }
                tokens.push(match word {
                    "if" => Token::If,
                    "then" => Token::Then,
                    "else" => Token::Else,
                    _ => Token::Ident(word.to_string()),
                });
            }
            other => return Err(reject(&format!("illegal character `{other}`"))),
        }
    }
    Ok(tokens)
}

// =============================================================================
// PARSER (recursive descent)
// =============================================================================

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn new(input: &str) -> Result<Self, CoreError> {
        Ok(Self {
            tokens: lex(input)?,
            pos: 0,
        })
    }

    fn parse_complete(mut self) -> Result<Node, CoreError> {
        let node = self.comparison()?;
        if self.pos != self.tokens.len() {
            return Err(reject("trailing tokens after expression"));
        }
        Ok(node)
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn bump(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expect(&mut self, expected: &Token, what: &str) -> Result<(), CoreError> {
        match self.bump() {
            Some(ref token) if token == expected => Ok(()),
            _ => Err(reject(&format!("expected {what}"))),
        }
    }

    fn comparison(&mut self) -> Result<Node, CoreError> {
        let mut node = self.additive()?;
        while let Some(Token::Op(op)) = self.peek() {
            let op = *op;
            if !matches!(
                op,
                BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge
            ) {
                break;
            }
            self.pos += 1;
            let rhs = self.additive()?;
            node = Node::Binary {
                op,
                lhs: Box::new(node),
                rhs: Box::new(rhs),
            };
        }
        Ok(node)
    }

    fn additive(&mut self) -> Result<Node, CoreError> {
        let mut node = self.multiplicative()?;
        while let Some(Token::Op(op)) = self.peek() {
            let op = *op;
            if !matches!(op, BinOp::Add | BinOp::Sub) {
                break;
            }
            self.pos += 1;
            let rhs = self.multiplicative()?;
            node = Node::Binary {
                op,
                lhs: Box::new(node),
                rhs: Box::new(rhs),
            };
        }
        Ok(node)
    }

    fn multiplicative(&mut self) -> Result<Node, CoreError> {
        let mut node = self.primary()?;
        while let Some(Token::Op(op)) = self.peek() {
            let op = *op;
            if !matches!(op, BinOp::Mul | BinOp::Div | BinOp::Mod) {
                break;
            }
            self.pos += 1;
            let rhs = self.primary()?;
            node = Node::Binary {
                op,
                lhs: Box::new(node),
                rhs: Box::new(rhs),
            };
        }
        Ok(node)
    }

    fn primary(&mut self) -> Result<Node, CoreError> {
        match self.bump() {
            Some(Token::Number(n)) => Ok(Node::Number(n)),
            Some(Token::LParen) => {
                let node = self.comparison()?;
                self.expect(&Token::RParen, "closing `)`")?;
                Ok(node)
            }
            Some(Token::If) => {
                let cond = self.comparison()?;
                self.expect(&Token::Then, "`then`")?;
                let then = self.comparison()?;
                self.expect(&Token::Else, "`else`")?;
                let els = self.comparison()?;
                Ok(Node::If {
                    cond: Box::new(cond),
                    then: Box::new(then),
                    els: Box::new(els),
                })
            }
            Some(Token::Ident(name)) => {
                if self.peek() == Some(&Token::LParen) {
                    self.pos += 1;
                    let (func, arity) = Builtin::lookup(&name)
                        .ok_or_else(|| reject(&format!("unknown primitive `{name}`")))?;
                    let mut args = Vec::with_capacity(arity);
                    if self.peek() == Some(&Token::RParen) {
                        self.pos += 1;
                    } else {
                        loop {
                            args.push(self.comparison()?);
                            match self.bump() {
                                Some(Token::Comma) => continue,
                                Some(Token::RParen) => break,
                                _ => return Err(reject("expected `,` or `)`")),
                            }
                        }
                    }
                    if args.len() != arity {
                        return Err(reject(&format!(
                            "primitive `{name}` takes {arity} argument(s)"
                        )));
                    }
                    Ok(Node::Call { func, args })
                } else {
                    Ok(Node::Param(name))
                }
            }
            _ => Err(reject("expected a number, parameter, call, or `if`")),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
