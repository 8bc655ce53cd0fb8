//! Conditional logic for approval rules.
//!
//! A rule's condition is parsed once into a small typed expression tree and
//! evaluated against a [`TransactionSnapshot`]. Nothing is executed
//! dynamically: the grammar only knows comparisons over a closed set of
//! fields, joined with `and`, `or` and `not`.
//!
//! ```text
//! expr       := or
//! or         := and (("or" | "||") and)*
//! and        := unary (("and" | "&&") unary)*
//! unary      := ("not" | "!") unary | comparison
//! comparison := primary (op primary)?
//! op         := "==" | "!=" | ">" | ">=" | "<" | "<=" | "contains"
//! primary    := field | integer | string | "true" | "false" | "null" | "(" expr ")"
//! ```
//!
//! Field names may carry a `stock_entry.` prefix. Parentheses and `not` nest
//! at most 32 deep and an expression holds at most 512 operands, so the tree
//! stays small enough to walk and drop recursively.
use std::fmt;
use std::time::{Duration, Instant};

use super::entry::TransactionSnapshot;
use super::material::ZoneStatus;

const MAX_DEPTH: usize = 32;
const MAX_TERMS: usize = 512;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Int(i64),
    Text(String),
    Bool(bool),
    Null,
}

impl Value {
    fn type_name(&self) -> &'static str {
        match self {
            Self::Int(_) => "integer",
            Self::Text(_) => "text",
            Self::Bool(_) => "boolean",
            Self::Null => "null",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    Contains,
}

impl fmt::Display for CmpOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self {
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Contains => "contains",
        };
        f.write_str(op)
    }
}

/// Transaction fields a condition may refer to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Purpose,
    MovementType,
    FromWarehouse,
    ToWarehouse,
    TotalQty,
    TotalValue,
    ItemCount,
    WorkOrder,
    ZoneStatus,
    CompletionPercentage,
    Owner,
}

impl Field {
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.strip_prefix("stock_entry.").unwrap_or(name);
        let field = match name {
            "purpose" => Self::Purpose,
            "movement_type" => Self::MovementType,
            "from_warehouse" => Self::FromWarehouse,
            "to_warehouse" => Self::ToWarehouse,
            "total_qty" => Self::TotalQty,
            "total_value" => Self::TotalValue,
            "item_count" => Self::ItemCount,
            "work_order" => Self::WorkOrder,
            "zone_status" => Self::ZoneStatus,
            "completion_percentage" => Self::CompletionPercentage,
            "owner" => Self::Owner,
            _ => return None,
        };
        Some(field)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    Literal(Value),
    Field(Field),
    Compare {
        lhs: Box<Expr>,
        op: CmpOp,
        rhs: Box<Expr>,
    },
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum PredicateError {
    #[error("syntax error at offset {position}: {message}")]
    Syntax { position: usize, message: String },
    #[error("unknown field '{0}'")]
    UnknownField(String),
    #[error("expression nests deeper than {} levels", MAX_DEPTH)]
    TooDeep,
    #[error("expression has more than {} operands", MAX_TERMS)]
    TooManyTerms,
    #[error("cannot apply '{op}' to {lhs} and {rhs}")]
    TypeMismatch {
        op: String,
        lhs: &'static str,
        rhs: &'static str,
    },
    #[error("condition evaluated to {0}, expected a boolean")]
    NotBoolean(&'static str),
    #[error("evaluation step budget of {0} exhausted")]
    BudgetExhausted(u32),
    #[error("evaluation exceeded {0:?}")]
    DeadlineExceeded(Duration),
}

/// Bounds applied to a single predicate evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvaluationLimits {
    pub step_budget: u32,
    pub timeout: Duration,
}

impl Default for EvaluationLimits {
    fn default() -> Self {
        Self {
            step_budget: 1_000,
            timeout: Duration::from_millis(50),
        }
    }
}

/// A parsed condition together with the text it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Predicate {
    source: String,
    expr: Expr,
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl Predicate {
    pub fn parse(source: &str) -> Result<Self, PredicateError> {
        let tokens = tokenize(source)?;
        let mut parser = Parser {
            tokens,
            pos: 0,
            depth: 0,
            terms: 0,
        };
        let expr = parser.expr()?;
        if let Some(token) = parser.peek() {
            return Err(PredicateError::Syntax {
                position: token.offset,
                message: format!("unexpected {}", token.kind),
            });
        }
        Ok(Self {
            source: source.trim().to_string(),
            expr,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn expr(&self) -> &Expr {
        &self.expr
    }

    pub fn evaluate(
        &self,
        snapshot: &TransactionSnapshot,
        limits: &EvaluationLimits,
    ) -> Result<bool, PredicateError> {
        let mut eval = Evaluator {
            snapshot,
            limits,
            steps: 0,
            started: Instant::now(),
        };
        match eval.eval(&self.expr)? {
            Value::Bool(b) => Ok(b),
            other => Err(PredicateError::NotBoolean(other.type_name())),
        }
    }
}

impl TransactionSnapshot {
    pub fn field(&self, field: Field) -> Value {
        let text = |v: &Option<String>| v.clone().map(Value::Text).unwrap_or(Value::Null);
        let int = |v: u64| Value::Int(i64::try_from(v).unwrap_or(i64::MAX));
        match field {
            Field::Purpose => text(&self.purpose),
            Field::MovementType => text(&self.movement_type),
            Field::FromWarehouse => text(&self.from_warehouse),
            Field::ToWarehouse => text(&self.to_warehouse),
            Field::TotalQty => int(self.total_qty),
            Field::TotalValue => int(self.total_value),
            Field::ItemCount => int(self.item_count),
            Field::WorkOrder => text(&self.work_order),
            Field::ZoneStatus => match self.zone_status {
                Some(ZoneStatus::Red) => Value::Text("Red".into()),
                Some(ZoneStatus::Yellow) => Value::Text("Yellow".into()),
                Some(ZoneStatus::Green) => Value::Text("Green".into()),
                None => Value::Null,
            },
            Field::CompletionPercentage => Value::Int(self.completion_percentage.into()),
            Field::Owner => text(&self.owner),
        }
    }
}

struct Evaluator<'a> {
    snapshot: &'a TransactionSnapshot,
    limits: &'a EvaluationLimits,
    steps: u32,
    started: Instant,
}

impl Evaluator<'_> {
    fn tick(&mut self) -> Result<(), PredicateError> {
        self.steps += 1;
        if self.steps > self.limits.step_budget {
            return Err(PredicateError::BudgetExhausted(self.limits.step_budget));
        }
        if self.started.elapsed() > self.limits.timeout {
            return Err(PredicateError::DeadlineExceeded(self.limits.timeout));
        }
        Ok(())
    }

    fn eval(&mut self, expr: &Expr) -> Result<Value, PredicateError> {
        self.tick()?;
        match expr {
            Expr::Literal(v) => Ok(v.clone()),
            Expr::Field(field) => Ok(self.snapshot.field(*field)),
            Expr::Not(inner) => Ok(Value::Bool(!self.boolean(inner)?)),
            Expr::And(lhs, rhs) => Ok(Value::Bool(self.boolean(lhs)? && self.boolean(rhs)?)),
            Expr::Or(lhs, rhs) => Ok(Value::Bool(self.boolean(lhs)? || self.boolean(rhs)?)),
            Expr::Compare { lhs, op, rhs } => {
                let lhs = self.eval(lhs)?;
                let rhs = self.eval(rhs)?;
                compare(&lhs, *op, &rhs).map(Value::Bool)
            }
        }
    }

    fn boolean(&mut self, expr: &Expr) -> Result<bool, PredicateError> {
        match self.eval(expr)? {
            Value::Bool(b) => Ok(b),
            other => Err(PredicateError::NotBoolean(other.type_name())),
        }
    }
}

fn compare(lhs: &Value, op: CmpOp, rhs: &Value) -> Result<bool, PredicateError> {
    let mismatch = || PredicateError::TypeMismatch {
        op: op.to_string(),
        lhs: lhs.type_name(),
        rhs: rhs.type_name(),
    };
    match (lhs, rhs) {
        (Value::Int(a), Value::Int(b)) => match op {
            CmpOp::Eq => Ok(a == b),
            CmpOp::Ne => Ok(a != b),
            CmpOp::Gt => Ok(a > b),
            CmpOp::Ge => Ok(a >= b),
            CmpOp::Lt => Ok(a < b),
            CmpOp::Le => Ok(a <= b),
            CmpOp::Contains => Err(mismatch()),
        },
        (Value::Text(a), Value::Text(b)) => match op {
            CmpOp::Eq => Ok(a == b),
            CmpOp::Ne => Ok(a != b),
            CmpOp::Contains => Ok(a.contains(b.as_str())),
            _ => Err(mismatch()),
        },
        (Value::Bool(a), Value::Bool(b)) => match op {
            CmpOp::Eq => Ok(a == b),
            CmpOp::Ne => Ok(a != b),
            _ => Err(mismatch()),
        },
        // an unset field equals only null
        (Value::Null, _) | (_, Value::Null) => match op {
            CmpOp::Eq => Ok(lhs == rhs),
            CmpOp::Ne => Ok(lhs != rhs),
            CmpOp::Contains => Ok(false),
            _ => Err(mismatch()),
        },
        _ => Err(mismatch()),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum TokenKind {
    Ident(String),
    Int(i64),
    Str(String),
    Op(CmpOp),
    And,
    Or,
    Not,
    LParen,
    RParen,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ident(name) => write!(f, "'{name}'"),
            Self::Int(n) => write!(f, "{n}"),
            Self::Str(s) => write!(f, "string '{s}'"),
            Self::Op(op) => write!(f, "'{op}'"),
            Self::And => f.write_str("'and'"),
            Self::Or => f.write_str("'or'"),
            Self::Not => f.write_str("'not'"),
            Self::LParen => f.write_str("'('"),
            Self::RParen => f.write_str("')'"),
        }
    }
}

#[derive(Debug, Clone)]
struct Token {
    kind: TokenKind,
    offset: usize,
}

fn tokenize(source: &str) -> Result<Vec<Token>, PredicateError> {
    let chars: Vec<(usize, char)> = source.char_indices().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    let syntax = |position: usize, message: &str| PredicateError::Syntax {
        position,
        message: message.to_string(),
    };

    while i < chars.len() {
        let (offset, c) = chars[i];
        let next = chars.get(i + 1).map(|(_, c)| *c);

        if c.is_whitespace() {
            i += 1;
            continue;
        }

        let two = |kind: TokenKind| Token { kind, offset };
        let (kind, width) = match (c, next) {
            ('=', Some('=')) => (TokenKind::Op(CmpOp::Eq), 2),
            ('!', Some('=')) => (TokenKind::Op(CmpOp::Ne), 2),
            ('>', Some('=')) => (TokenKind::Op(CmpOp::Ge), 2),
            ('<', Some('=')) => (TokenKind::Op(CmpOp::Le), 2),
            ('&', Some('&')) => (TokenKind::And, 2),
            ('|', Some('|')) => (TokenKind::Or, 2),
            ('>', _) => (TokenKind::Op(CmpOp::Gt), 1),
            ('<', _) => (TokenKind::Op(CmpOp::Lt), 1),
            ('!', _) => (TokenKind::Not, 1),
            ('(', _) => (TokenKind::LParen, 1),
            (')', _) => (TokenKind::RParen, 1),
            ('\'' | '"', _) => {
                let quote = c;
                let mut text = String::new();
                let mut j = i + 1;
                loop {
                    match chars.get(j) {
                        None => return Err(syntax(offset, "unterminated string")),
                        Some((_, '\\')) => {
                            if let Some((_, escaped)) = chars.get(j + 1) {
                                text.push(*escaped);
                            }
                            j += 2;
                        }
                        Some((_, ch)) if *ch == quote => break,
                        Some((_, ch)) => {
                            text.push(*ch);
                            j += 1;
                        }
                    }
                }
                tokens.push(two(TokenKind::Str(text)));
                i = j + 1;
                continue;
            }
            (c, _) if c.is_ascii_digit() || (c == '-' && next.is_some_and(|n| n.is_ascii_digit())) => {
                let mut j = i + 1;
                while chars.get(j).is_some_and(|(_, ch)| ch.is_ascii_digit() || *ch == '_') {
                    j += 1;
                }
                let end = chars.get(j).map(|(o, _)| *o).unwrap_or(source.len());
                let digits: String = source[offset..end].chars().filter(|ch| *ch != '_').collect();
                let n = digits
                    .parse::<i64>()
                    .map_err(|_| syntax(offset, "integer out of range"))?;
                tokens.push(two(TokenKind::Int(n)));
                i = j;
                continue;
            }
            (c, _) if c.is_ascii_alphabetic() || c == '_' => {
                let mut j = i + 1;
                while chars
                    .get(j)
                    .is_some_and(|(_, ch)| ch.is_ascii_alphanumeric() || *ch == '_' || *ch == '.')
                {
                    j += 1;
                }
                let end = chars.get(j).map(|(o, _)| *o).unwrap_or(source.len());
                let word = &source[offset..end];
                let kind = match word.to_ascii_lowercase().as_str() {
                    "and" => TokenKind::And,
                    "or" => TokenKind::Or,
                    "not" => TokenKind::Not,
                    "contains" => TokenKind::Op(CmpOp::Contains),
                    _ => TokenKind::Ident(word.to_string()),
                };
                tokens.push(two(kind));
                i = j;
                continue;
            }
            _ => return Err(syntax(offset, &format!("unexpected character '{c}'"))),
        };
        tokens.push(two(kind));
        i += width;
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
    terms: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn end_offset(&self) -> usize {
        self.tokens.last().map(|t| t.offset + 1).unwrap_or(0)
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.peek().is_some_and(|t| &t.kind == kind) {
            self.pos += 1;
            return true;
        }
        false
    }

    fn descend(&mut self) -> Result<(), PredicateError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(PredicateError::TooDeep);
        }
        Ok(())
    }

    fn expr(&mut self) -> Result<Expr, PredicateError> {
        self.descend()?;
        let mut lhs = self.and()?;
        while self.eat(&TokenKind::Or) {
            let rhs = self.and()?;
            lhs = Expr::Or(Box::new(lhs), Box::new(rhs));
        }
        self.depth -= 1;
        Ok(lhs)
    }

    fn and(&mut self) -> Result<Expr, PredicateError> {
        let mut lhs = self.unary()?;
        while self.eat(&TokenKind::And) {
            let rhs = self.unary()?;
            lhs = Expr::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr, PredicateError> {
        if self.eat(&TokenKind::Not) {
            self.descend()?;
            let inner = self.unary()?;
            self.depth -= 1;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Expr, PredicateError> {
        let lhs = self.primary()?;
        if let Some(TokenKind::Op(op)) = self.peek().map(|t| t.kind.clone()) {
            self.pos += 1;
            let rhs = self.primary()?;
            return Ok(Expr::Compare {
                lhs: Box::new(lhs),
                op,
                rhs: Box::new(rhs),
            });
        }
        Ok(lhs)
    }

    fn primary(&mut self) -> Result<Expr, PredicateError> {
        let Some(token) = self.tokens.get(self.pos).cloned() else {
            return Err(PredicateError::Syntax {
                position: self.end_offset(),
                message: "unexpected end of expression".into(),
            });
        };
        self.pos += 1;
        // flat and/or chains never descend, so their length is bounded here
        self.terms += 1;
        if self.terms > MAX_TERMS {
            return Err(PredicateError::TooManyTerms);
        }
        match token.kind {
            TokenKind::Int(n) => Ok(Expr::Literal(Value::Int(n))),
            TokenKind::Str(s) => Ok(Expr::Literal(Value::Text(s))),
            TokenKind::Ident(name) => match name.to_ascii_lowercase().as_str() {
                "true" => Ok(Expr::Literal(Value::Bool(true))),
                "false" => Ok(Expr::Literal(Value::Bool(false))),
                "null" | "none" => Ok(Expr::Literal(Value::Null)),
                _ => Field::from_name(&name)
                    .map(Expr::Field)
                    .ok_or(PredicateError::UnknownField(name)),
            },
            TokenKind::LParen => {
                let inner = self.expr()?;
                if !self.eat(&TokenKind::RParen) {
                    return Err(PredicateError::Syntax {
                        position: self.peek().map(|t| t.offset).unwrap_or(self.end_offset()),
                        message: "expected ')'".into(),
                    });
                }
                Ok(inner)
            }
            other => Err(PredicateError::Syntax {
                position: token.offset,
                message: format!("unexpected {other}"),
            }),
        }
    }
}
