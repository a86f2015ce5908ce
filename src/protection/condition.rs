use crate::protection::getters::{GetterError, Getters, Subject, Value, ValueType};
use crate::protection::ConfigurationError;
use crate::protection::segment::MAX_RANGE;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    pub fn symbol(self) -> &'static str {
        match self {
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    Or(Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    Compare {
        left: Box<Expr>,
        op: CompareOp,
        right: Box<Expr>,
    },
    Getter(String),
    Literal(Value),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConditionError {
    #[error("cannot compare {left} {op} {right}")]
    TypeMismatch {
        left: ValueType,
        op: &'static str,
        right: ValueType,
    },
    #[error("{0} values cannot be ordered")]
    NotOrderable(ValueType),
    #[error("expected bool, found {0}")]
    NotBoolean(ValueType),
    #[error("expected int, found {0}")]
    NotInteger(ValueType),
    #[error("range cannot be negative, got {0}")]
    NegativeRange(i64),
    #[error("range {0} is above the limit of {max}", max = MAX_RANGE)]
    RangeTooLarge(i64),
}

/// Runtime fault while evaluating a condition or a range getter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EvalError {
    #[error(transparent)]
    Getter(#[from] GetterError),
    #[error(transparent)]
    Condition(#[from] ConditionError),
}

/// A parsed boolean expression over getters, e.g.
/// `entityType == "creeper" and not hasOwner`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Condition {
    source: String,
    root: Expr,
}

impl Condition {
    pub fn parse(source: &str) -> Result<Self, ConfigurationError> {
        let syntax = |message: String| ConfigurationError::Syntax {
            condition: source.to_string(),
            message,
        };
        let tokens = tokenize(source).map_err(syntax)?;
        if tokens.is_empty() {
            return Err(syntax("empty condition".to_string()));
        }
        let mut parser = Parser { tokens, pos: 0 };
        let root = parser.expr().map_err(syntax)?;
        if let Some(token) = parser.peek() {
            return Err(syntax(format!("unexpected {token}")));
        }
        Ok(Self {
            source: source.to_string(),
            root,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn root(&self) -> &Expr {
        &self.root
    }

    /// Rejects unknown getters and type errors that do not depend on the
    /// subject.
    pub fn validate(&self, getters: &Getters) -> Result<(), ConfigurationError> {
        let root = self.infer(&self.root, getters)?;
        self.mismatch(expect_bool(root))
    }

    pub fn evaluate(&self, subject: &dyn Subject, getters: &Getters) -> Result<bool, EvalError> {
        let value = eval(&self.root, subject, getters)?;
        Ok(truthy(value)?)
    }

    fn infer(&self, expr: &Expr, getters: &Getters) -> Result<ValueType, ConfigurationError> {
        match expr {
            Expr::Or(left, right) | Expr::And(left, right) => {
                let left = self.infer(left, getters)?;
                self.mismatch(expect_bool(left))?;
                let right = self.infer(right, getters)?;
                self.mismatch(expect_bool(right))?;
                Ok(ValueType::Bool)
            }
            Expr::Not(inner) => {
                let inner = self.infer(inner, getters)?;
                self.mismatch(expect_bool(inner))?;
                Ok(ValueType::Bool)
            }
            Expr::Compare { left, op, right } => {
                let left = self.infer(left, getters)?;
                let right = self.infer(right, getters)?;
                self.mismatch(check_comparison(left, *op, right))?;
                Ok(ValueType::Bool)
            }
            Expr::Getter(name) => {
                getters
                    .output_type(name)
                    .ok_or_else(|| ConfigurationError::UnknownGetter {
                        condition: self.source.clone(),
                        getter: name.clone(),
                    })
            }
            Expr::Literal(value) => Ok(value.value_type()),
        }
    }

    fn mismatch(&self, result: Result<(), ConditionError>) -> Result<(), ConfigurationError> {
        result.map_err(|err| ConfigurationError::TypeMismatch {
            condition: self.source.clone(),
            message: err.to_string(),
        })
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

fn expect_bool(found: ValueType) -> Result<(), ConditionError> {
    if found == ValueType::Bool {
        Ok(())
    } else {
        Err(ConditionError::NotBoolean(found))
    }
}

fn check_comparison(left: ValueType, op: CompareOp, right: ValueType) -> Result<(), ConditionError> {
    if left != right {
        return Err(ConditionError::TypeMismatch {
            left,
            op: op.symbol(),
            right,
        });
    }
    match op {
        CompareOp::Eq | CompareOp::Ne => Ok(()),
        _ if left == ValueType::Int => Ok(()),
        _ => Err(ConditionError::NotOrderable(left)),
    }
}

fn truthy(value: Value) -> Result<bool, ConditionError> {
    match value {
        Value::Bool(value) => Ok(value),
        other => Err(ConditionError::NotBoolean(other.value_type())),
    }
}

fn eval(expr: &Expr, subject: &dyn Subject, getters: &Getters) -> Result<Value, EvalError> {
    match expr {
        Expr::Or(left, right) => {
            if truthy(eval(left, subject, getters)?)? {
                return Ok(Value::Bool(true));
            }
            Ok(Value::Bool(truthy(eval(right, subject, getters)?)?))
        }
        Expr::And(left, right) => {
            if !truthy(eval(left, subject, getters)?)? {
                return Ok(Value::Bool(false));
            }
            Ok(Value::Bool(truthy(eval(right, subject, getters)?)?))
        }
        Expr::Not(inner) => Ok(Value::Bool(!truthy(eval(inner, subject, getters)?)?)),
        Expr::Compare { left, op, right } => {
            let left = eval(left, subject, getters)?;
            let right = eval(right, subject, getters)?;
            Ok(Value::Bool(compare(&left, *op, &right)?))
        }
        Expr::Getter(name) => Ok(getters.get(name, subject)?),
        Expr::Literal(value) => Ok(value.clone()),
    }
}

fn compare(left: &Value, op: CompareOp, right: &Value) -> Result<bool, ConditionError> {
    check_comparison(left.value_type(), op, right.value_type())?;
    match (op, left, right) {
        (CompareOp::Eq, left, right) => Ok(left == right),
        (CompareOp::Ne, left, right) => Ok(left != right),
        (op, Value::Int(a), Value::Int(b)) => Ok(match op {
            CompareOp::Lt => a < b,
            CompareOp::Le => a <= b,
            CompareOp::Gt => a > b,
            CompareOp::Ge => a >= b,
            CompareOp::Eq => a == b,
            CompareOp::Ne => a != b,
        }),
        (_, left, _) => Err(ConditionError::NotOrderable(left.value_type())),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Int(i64),
    Str(String),
    Ident(String),
    True,
    False,
    And,
    Or,
    Not,
    Op(CompareOp),
    Open,
    Close,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Int(value) => write!(f, "'{value}'"),
            Token::Str(value) => write!(f, "\"{value}\""),
            Token::Ident(name) => write!(f, "'{name}'"),
            Token::True => f.write_str("'true'"),
            Token::False => f.write_str("'false'"),
            Token::And => f.write_str("'and'"),
            Token::Or => f.write_str("'or'"),
            Token::Not => f.write_str("'not'"),
            Token::Op(op) => write!(f, "'{}'", op.symbol()),
            Token::Open => f.write_str("'('"),
            Token::Close => f.write_str("')'"),
        }
    }
}

fn tokenize(source: &str) -> Result<Vec<Token>, String> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let ch = chars[i];
        let next = chars.get(i + 1).copied();
        match ch {
            c if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push(Token::Open);
                i += 1;
            }
            ')' => {
                tokens.push(Token::Close);
                i += 1;
            }
            '"' | '\'' => {
                let mut value = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        None => return Err("unterminated string".to_string()),
                        Some('\\') => {
                            let escaped = chars
                                .get(i + 1)
                                .ok_or_else(|| "unterminated string".to_string())?;
                            value.push(*escaped);
                            i += 2;
                        }
                        Some(c) if *c == ch => {
                            i += 1;
                            break;
                        }
                        Some(c) => {
                            value.push(*c);
                            i += 1;
                        }
                    }
                }
                tokens.push(Token::Str(value));
            }
            '&' if next == Some('&') => {
                tokens.push(Token::And);
                i += 2;
            }
            '|' if next == Some('|') => {
                tokens.push(Token::Or);
                i += 2;
            }
            '=' if next == Some('=') => {
                tokens.push(Token::Op(CompareOp::Eq));
                i += 2;
            }
            '!' if next == Some('=') => {
                tokens.push(Token::Op(CompareOp::Ne));
                i += 2;
            }
            '!' => {
                tokens.push(Token::Not);
                i += 1;
            }
            '<' | '>' => {
                let or_equal = next == Some('=');
                let op = match (ch, or_equal) {
                    ('<', true) => CompareOp::Le,
                    ('<', false) => CompareOp::Lt,
                    (_, true) => CompareOp::Ge,
                    (_, false) => CompareOp::Gt,
                };
                if next == Some('>') {
                    return Err(format!("unknown operator '{ch}>'"));
                }
                tokens.push(Token::Op(op));
                i += if or_equal { 2 } else { 1 };
            }
            c if c.is_ascii_digit() || (c == '-' && next.is_some_and(|n| n.is_ascii_digit())) => {
                let start = i;
                i += 1;
                while chars.get(i).is_some_and(char::is_ascii_digit) {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let value = text
                    .parse::<i64>()
                    .map_err(|_| format!("integer '{text}' is out of range"))?;
                tokens.push(Token::Int(value));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while chars
                    .get(i)
                    .is_some_and(|c| c.is_alphanumeric() || *c == '_' || *c == '.')
                {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                tokens.push(match word.to_ascii_lowercase().as_str() {
                    "and" => Token::And,
                    "or" => Token::Or,
                    "not" => Token::Not,
                    "true" => Token::True,
                    "false" => Token::False,
                    _ => Token::Ident(word),
                });
            }
            other => return Err(format!("unknown operator '{other}'")),
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expr(&mut self) -> Result<Expr, String> {
        let mut left = self.and()?;
        while self.eat(&Token::Or) {
            let right = self.and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and(&mut self) -> Result<Expr, String> {
        let mut left = self.unary()?;
        while self.eat(&Token::And) {
            let right = self.unary()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<Expr, String> {
        if self.eat(&Token::Not) {
            return Ok(Expr::Not(Box::new(self.unary()?)));
        }
        self.compare()
    }

    fn compare(&mut self) -> Result<Expr, String> {
        let left = self.operand()?;
        let Some(Token::Op(op)) = self.peek().cloned() else {
            return Ok(left);
        };
        self.pos += 1;
        let right = self.operand()?;
        Ok(Expr::Compare {
            left: Box::new(left),
            op,
            right: Box::new(right),
        })
    }

    fn operand(&mut self) -> Result<Expr, String> {
        let token = self
            .peek()
            .cloned()
            .ok_or_else(|| "unexpected end of condition".to_string())?;
        self.pos += 1;
        match token {
            Token::Int(value) => Ok(Expr::Literal(Value::Int(value))),
            Token::Str(value) => Ok(Expr::Literal(Value::Str(value))),
            Token::True => Ok(Expr::Literal(Value::Bool(true))),
            Token::False => Ok(Expr::Literal(Value::Bool(false))),
            Token::Ident(name) => Ok(Expr::Getter(name)),
            Token::Open => {
                let inner = self.expr()?;
                if !self.eat(&Token::Close) {
                    return Err("missing ')'".to_string());
                }
                Ok(inner)
            }
            other => Err(format!("unexpected {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protection::getters::tests::TestSubject;
    use crate::world::position::Location;

    fn getter(name: &str) -> Box<Expr> {
        Box::new(Expr::Getter(name.to_string()))
    }

    fn zombie() -> TestSubject {
        let mut subject = TestSubject::new("zombie", Location::new(0, 1.0, 70.0, 1.0));
        subject.hostile = true;
        subject
    }

    #[test]
    fn or_binds_weaker_than_and() {
        let condition = Condition::parse("isHostile or hasOwner AND NOT isTamed").expect("parse");
        assert_eq!(
            condition.root(),
            &Expr::Or(
                getter("isHostile"),
                Box::new(Expr::And(getter("hasOwner"), Box::new(Expr::Not(getter("isTamed")))))
            )
        );
        let symbols = Condition::parse("isHostile || hasOwner && !isTamed").expect("parse");
        assert_eq!(symbols.root(), condition.root());
    }

    #[test]
    fn parses_comparisons_and_literals() {
        let condition = Condition::parse("(dimension >= -1) and entityType != 'item frame'").expect("parse");
        assert_eq!(
            condition.root(),
            &Expr::And(
                Box::new(Expr::Compare {
                    left: getter("dimension"),
                    op: CompareOp::Ge,
                    right: Box::new(Expr::Literal(Value::Int(-1))),
                }),
                Box::new(Expr::Compare {
                    left: getter("entityType"),
                    op: CompareOp::Ne,
                    right: Box::new(Expr::Literal(Value::Str("item frame".to_string()))),
                })
            )
        );
    }

    #[test]
    fn rejects_bad_syntax() {
        for source in [
            "",
            "dimension = 1",
            "dimension <> 1",
            "entityType == \"zombie",
            "(isHostile",
            "isHostile)",
            "dimension == 1 == 2",
            "isHostile and",
            "dimension ~ 3",
        ] {
            assert!(
                matches!(Condition::parse(source), Err(ConfigurationError::Syntax { .. })),
                "{source:?} should not parse"
            );
        }
    }

    #[test]
    fn validation_catches_unknown_getters_and_types() {
        let getters = Getters::builtin();
        let unknown = Condition::parse("isTamed").expect("parse");
        assert!(matches!(
            unknown.validate(&getters),
            Err(ConfigurationError::UnknownGetter { ref getter, .. }) if getter == "isTamed"
        ));

        for source in ["entityType == 3", "dimension", "entityType < \"b\"", "not dimension"] {
            let condition = Condition::parse(source).expect("parse");
            assert!(
                matches!(condition.validate(&getters), Err(ConfigurationError::TypeMismatch { .. })),
                "{source:?} should not validate"
            );
        }

        Condition::parse("entityType == \"zombie\" and dimension == 0")
            .expect("parse")
            .validate(&getters)
            .expect("valid");
    }

    #[test]
    fn evaluates_against_subject() {
        let getters = Getters::builtin();
        let subject = zombie();
        let check = |source: &str| {
            Condition::parse(source)
                .expect("parse")
                .evaluate(&subject, &getters)
                .expect("evaluate")
        };
        assert!(check("entityType == \"zombie\" && isHostile"));
        assert!(!check("hasOwner"));
        assert!(check("not hasOwner and dimension < 1"));
        assert!(check("isHostile or ownerDistance > 5"));
    }

    #[test]
    fn runtime_faults_are_reported() {
        let getters = Getters::builtin();
        let subject = zombie();

        let missing_owner = Condition::parse("ownerDistance > 5").expect("parse");
        assert!(matches!(
            missing_owner.evaluate(&subject, &getters),
            Err(EvalError::Getter(GetterError::Unavailable { .. }))
        ));

        let unvalidated = Condition::parse("entityType > 1").expect("parse");
        assert!(matches!(
            unvalidated.evaluate(&subject, &getters),
            Err(EvalError::Condition(ConditionError::TypeMismatch { .. }))
        ));

        let not_bool = Condition::parse("dimension").expect("parse");
        assert_eq!(
            not_bool.evaluate(&subject, &getters),
            Err(EvalError::Condition(ConditionError::NotBoolean(ValueType::Int)))
        );
    }
}
