//! Postfix ratio expressions.
//!
//! An expression combines channel codes and integer literals with `+ - * /`
//! in reverse Polish notation, e.g. `A1#2048-A2#2048-/` is
//! `(A1 - 2048) / (A2 - 2048)`.
//!
//! | Token      | Syntax                   | Meaning                          |
//! |------------|--------------------------|----------------------------------|
//! | channel    | `[A-L][12]`              | code of timeslot letter, channel |
//! | literal    | `#` followed by digits   | integer constant                 |
//! | operator   | `+` `-` `*` `/`          | binary arithmetic                |
//!
//! Evaluation starts at the last token and recurses leftwards, so an
//! expression only needs to be *right-complete*: stray leading operands are
//! ignored and a missing operand reads as zero. Division by zero yields zero
//! so a momentarily dark channel never stops the stream.

use heapless::{String, Vec};

/// Longest expression text that fits the 8-word calibration slot.
pub const MAX_EXPRESSION_LEN: usize = 32;

/// Channel ids in frame order (`A1 A2 B1 … L2`).
pub const CHANNEL_IDS: [&str; 24] = [
    "A1", "A2", "B1", "B2", "C1", "C2", "D1", "D2", "E1", "E2", "F1", "F2", "G1", "G2", "H1",
    "H2", "I1", "I2", "J1", "J2", "K1", "K2", "L1", "L2",
];

/// Error returned when an expression string cannot be tokenized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ExpressionError {
    /// Text longer than [`MAX_EXPRESSION_LEN`] bytes.
    TooLong,
    /// Unrecognised character at byte `position`.
    InvalidToken {
        /// Byte offset into the source text.
        position: u8,
    },
    /// `#` literal with no digits, or digits that overflow `i32`.
    BadLiteral {
        /// Byte offset of the `#`.
        position: u8,
    },
    /// An operator found fewer than two operands (structural check only).
    OperandUnderflow,
    /// Operands left over after the last operator (structural check only).
    TrailingOperand,
}

/// Binary operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Operator {
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`, with `x / 0 == 0`
    Div,
}

impl Operator {
    fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            b'+' => Some(Self::Add),
            b'-' => Some(Self::Sub),
            b'*' => Some(Self::Mul),
            b'/' => Some(Self::Div),
            _ => None,
        }
    }

    /// Apply the operator to `lhs` and `rhs`.
    pub fn apply(self, lhs: f32, rhs: f32) -> f32 {
        match self {
            Self::Add => lhs + rhs,
            Self::Sub => lhs - rhs,
            Self::Mul => lhs * rhs,
            Self::Div if rhs == 0.0 => 0.0,
            Self::Div => lhs / rhs,
        }
    }
}

/// One lexical element of an expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Token {
    /// Channel index `0..24` (`A1` = 0, `A2` = 1, `B1` = 2, …).
    Channel(u8),
    /// Immediate integer.
    Literal(i32),
    /// Arithmetic operator.
    Op(Operator),
}

/// Source of channel values an expression is evaluated against.
pub trait ChannelSource {
    /// Value of channel `index` (`0..24`); unknown channels read as zero.
    fn channel(&self, index: u8) -> f32;
}

/// Outcome of [`Expression::evaluate`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Evaluation {
    /// Normal result.
    Value(f32),
    /// The expression is empty; contributes zero.
    Empty,
    /// The last token is not an operator; contributes zero.
    NoOperator,
}

impl Evaluation {
    /// Numeric contribution of this outcome.
    pub fn value(self) -> f32 {
        match self {
            Self::Value(v) => v,
            Self::Empty | Self::NoOperator => 0.0,
        }
    }
}

/// A tokenized ratio expression that keeps its source text for echoing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Expression {
    text: String<MAX_EXPRESSION_LEN>,
    tokens: Vec<Token, MAX_EXPRESSION_LEN>,
}

impl Expression {
    /// The empty expression.
    pub const fn empty() -> Self {
        Self {
            text: String::new(),
            tokens: Vec::new(),
        }
    }

    /// Tokenize `source`. Letters are case-insensitive, whitespace is skipped.
    ///
    /// Only lexical errors are reported here; see [`Expression::validate`]
    /// for the structural check.
    pub fn parse(source: &str) -> Result<Self, ExpressionError> {
        let source = source.trim();
        let mut text = String::new();
        text.push_str(source).map_err(|_| ExpressionError::TooLong)?;
        let mut tokens = Vec::new();

        let bytes = source.as_bytes();
        let mut pos = 0usize;
        while let Some(&byte) = bytes.get(pos) {
            let at = u8::try_from(pos).unwrap_or(u8::MAX);
            let (token, width) = match byte.to_ascii_uppercase() {
                b' ' | b'\t' => {
                    pos = pos.saturating_add(1);
                    continue;
                }
                letter @ b'A'..=b'L' => {
                    let channel = match bytes.get(pos.saturating_add(1)) {
                        Some(b'1') => 0,
                        Some(b'2') => 1,
                        _ => return Err(ExpressionError::InvalidToken { position: at }),
                    };
                    #[allow(clippy::arithmetic_side_effects)] // Safety: letter in 'A'..='L' so the index is < 24
                    let index = (letter - b'A') * 2 + channel;
                    (Token::Channel(index), 2)
                }
                b'#' => {
                    let digits = bytes
                        .get(pos.saturating_add(1)..)
                        .unwrap_or_default()
                        .iter()
                        .take_while(|b| b.is_ascii_digit())
                        .count();
                    let literal = source
                        .get(pos.saturating_add(1)..pos.saturating_add(1).saturating_add(digits))
                        .filter(|s| !s.is_empty())
                        .and_then(|s| s.parse::<i32>().ok())
                        .ok_or(ExpressionError::BadLiteral { position: at })?;
                    (Token::Literal(literal), digits.saturating_add(1))
                }
                other => match Operator::from_byte(other) {
                    Some(op) => (Token::Op(op), 1),
                    None => return Err(ExpressionError::InvalidToken { position: at }),
                },
            };
            // Token count never exceeds byte count, which is already bounded.
            tokens.push(token).map_err(|_| ExpressionError::TooLong)?;
            pos = pos.saturating_add(width);
        }

        Ok(Self { text, tokens })
    }

    /// Source text as entered.
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Token sequence.
    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    /// True when the expression contributes nothing.
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Check that the tokens form exactly one balanced postfix term.
    pub fn validate(&self) -> Result<(), ExpressionError> {
        let mut depth = 0usize;
        for token in &self.tokens {
            depth = match token {
                Token::Channel(_) | Token::Literal(_) => depth.saturating_add(1),
                Token::Op(_) => depth
                    .checked_sub(2)
                    .map(|d| d.saturating_add(1))
                    .ok_or(ExpressionError::OperandUnderflow)?,
            };
        }
        if depth > 1 {
            return Err(ExpressionError::TrailingOperand);
        }
        Ok(())
    }

    /// Evaluate against `frame`, starting from the rightmost operator.
    pub fn evaluate<S: ChannelSource + ?Sized>(&self, frame: &S) -> Evaluation {
        match self.tokens.last() {
            None => Evaluation::Empty,
            Some(Token::Op(_)) => {
                let mut cursor = self.tokens.len();
                Evaluation::Value(self.operand(&mut cursor, frame))
            }
            Some(_) => Evaluation::NoOperator,
        }
    }

    /// Consume the token just before `cursor` and return its value.
    fn operand<S: ChannelSource + ?Sized>(&self, cursor: &mut usize, frame: &S) -> f32 {
        let Some(index) = cursor.checked_sub(1) else {
            return 0.0;
        };
        *cursor = index;
        match self.tokens.get(index) {
            Some(Token::Channel(ch)) => frame.channel(*ch),
            #[allow(clippy::cast_precision_loss)] // literals are small calibration offsets
            Some(Token::Literal(v)) => *v as f32,
            Some(Token::Op(op)) => {
                let rhs = self.operand(cursor, frame);
                let lhs = self.operand(cursor, frame);
                op.apply(lhs, rhs)
            }
            None => 0.0,
        }
    }
}
