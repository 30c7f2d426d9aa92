//! Recursive-descent parser producing the lambda AST.
//!
//! Precedence, loosest first: conditional, `or`, `and`, `not`, comparisons,
//! `+ -`, `* / // %`, unary sign, `**`, then calls, subscripts and
//! attribute access.

use super::lexer::{tokenize, Spanned, Token};
use super::value::Value;
use super::ExprError;

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    NotIn,
    Is,
    IsNot,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum UnaryOp {
    Neg,
    Pos,
    Not,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Expr {
    Literal(Value),
    Name(String),
    List(Vec<Expr>),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Compare(Box<Expr>, Vec<(CompareOp, Expr)>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    IfElse {
        condition: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
    Call {
        func: Box<Expr>,
        args: Vec<Expr>,
        kwargs: Vec<(String, Expr)>,
    },
    Attribute(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
    Slice {
        target: Box<Expr>,
        start: Option<Box<Expr>>,
        end: Option<Box<Expr>>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Param {
    pub name: String,
    pub default: Option<Expr>,
}

/// A parsed `lambda` definition.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct LambdaDef {
    pub params: Vec<Param>,
    pub kwargs: Option<String>,
    pub body: Expr,
}

const KEYWORDS: &[&str] = &[
    "lambda", "if", "else", "and", "or", "not", "in", "is", "True", "False", "None",
];

pub(crate) fn parse_lambda(source: &str) -> Result<LambdaDef, ExprError> {
    let mut parser = Parser {
        tokens: tokenize(source)?,
        pos: 0,
    };
    let def = parser.lambda()?;
    parser.expect_eof()?;
    Ok(def)
}

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)].token
    }

    fn peek_at(&self, offset: usize) -> &Token {
        let idx = (self.pos + offset).min(self.tokens.len() - 1);
        &self.tokens[idx].token
    }

    fn position(&self) -> usize {
        self.tokens[self.pos.min(self.tokens.len() - 1)].position
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn error(&self, message: impl Into<String>) -> ExprError {
        ExprError::Syntax {
            position: self.position(),
            message: message.into(),
        }
    }

    fn at_op(&self, op: &str) -> bool {
        matches!(self.peek(), Token::Op(o) if *o == op)
    }

    fn at_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Token::Name(n) if n == keyword)
    }

    fn eat_op(&mut self, op: &str) -> bool {
        if self.at_op(op) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if self.at_keyword(keyword) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_op(&mut self, op: &str) -> Result<(), ExprError> {
        if self.eat_op(op) {
            Ok(())
        } else {
            Err(self.error(format!("expected '{}'", op)))
        }
    }

    fn expect_eof(&self) -> Result<(), ExprError> {
        match self.peek() {
            Token::Eof => Ok(()),
            other => Err(self.error(format!("unexpected trailing token {:?}", other))),
        }
    }

    fn identifier(&mut self) -> Result<String, ExprError> {
        match self.peek().clone() {
            Token::Name(name) if !KEYWORDS.contains(&name.as_str()) => {
                self.advance();
                Ok(name)
            }
            other => Err(self.error(format!("expected identifier, found {:?}", other))),
        }
    }

    fn lambda(&mut self) -> Result<LambdaDef, ExprError> {
        if !self.eat_keyword("lambda") {
            return Err(self.error("expected 'lambda'"));
        }

        let mut params: Vec<Param> = Vec::new();
        let mut kwargs = None;

        while !self.at_op(":") {
            if kwargs.is_some() {
                return Err(self.error("no parameters may follow '**'"));
            }

            if self.eat_op("**") {
                kwargs = Some(self.identifier()?);
            } else if self.at_op("*") {
                return Err(self.error("variadic positional parameters are not supported"));
            } else {
                let name = self.identifier()?;
                if params.iter().any(|p| p.name == name) {
                    return Err(self.error(format!("duplicate parameter '{}'", name)));
                }
                let default = if self.eat_op("=") {
                    Some(self.expression()?)
                } else {
                    if params.iter().any(|p| p.default.is_some()) {
                        return Err(self.error("non-default parameter follows default parameter"));
                    }
                    None
                };
                params.push(Param { name, default });
            }

            if !self.eat_op(",") {
                break;
            }
        }

        self.expect_op(":")?;
        let body = self.expression()?;
        Ok(LambdaDef {
            params,
            kwargs,
            body,
        })
    }

    fn expression(&mut self) -> Result<Expr, ExprError> {
        if self.at_keyword("lambda") {
            return Err(self.error("nested lambdas are not supported"));
        }

        let then = self.or_test()?;
        if self.eat_keyword("if") {
            let condition = self.or_test()?;
            if !self.eat_keyword("else") {
                return Err(self.error("expected 'else' in conditional expression"));
            }
            let otherwise = self.expression()?;
            return Ok(Expr::IfElse {
                condition: Box::new(condition),
                then: Box::new(then),
                otherwise: Box::new(otherwise),
            });
        }
        Ok(then)
    }

    fn or_test(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.and_test()?;
        while self.eat_keyword("or") {
            let right = self.and_test()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and_test(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.not_test()?;
        while self.eat_keyword("and") {
            let right = self.not_test()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn not_test(&mut self) -> Result<Expr, ExprError> {
        if self.eat_keyword("not") {
            let operand = self.not_test()?;
            return Ok(Expr::Unary(UnaryOp::Not, Box::new(operand)));
        }
        self.comparison()
    }

    fn compare_op(&mut self) -> Option<CompareOp> {
        let is_name = |token: &Token, word: &str| matches!(token, Token::Name(n) if n == word);
        let (op, width) = match self.peek() {
            Token::Op("==") => (CompareOp::Eq, 1),
            Token::Op("!=") => (CompareOp::Ne, 1),
            Token::Op("<") => (CompareOp::Lt, 1),
            Token::Op("<=") => (CompareOp::Le, 1),
            Token::Op(">") => (CompareOp::Gt, 1),
            Token::Op(">=") => (CompareOp::Ge, 1),
            t if is_name(t, "in") => (CompareOp::In, 1),
            t if is_name(t, "not") && is_name(self.peek_at(1), "in") => (CompareOp::NotIn, 2),
            t if is_name(t, "is") && is_name(self.peek_at(1), "not") => (CompareOp::IsNot, 2),
            t if is_name(t, "is") => (CompareOp::Is, 1),
            _ => return None,
        };
        for _ in 0..width {
            self.advance();
        }
        Some(op)
    }

    fn comparison(&mut self) -> Result<Expr, ExprError> {
        let left = self.arith()?;
        let mut rest = Vec::new();
        while let Some(op) = self.compare_op() {
            rest.push((op, self.arith()?));
        }
        if rest.is_empty() {
            Ok(left)
        } else {
            Ok(Expr::Compare(Box::new(left), rest))
        }
    }

    fn arith(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.term()?;
        loop {
            let op = match self.peek() {
                Token::Op("+") => BinaryOp::Add,
                Token::Op("-") => BinaryOp::Sub,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.term()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn term(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.factor()?;
        loop {
            let op = match self.peek() {
                Token::Op("*") => BinaryOp::Mul,
                Token::Op("/") => BinaryOp::Div,
                Token::Op("//") => BinaryOp::FloorDiv,
                Token::Op("%") => BinaryOp::Mod,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.factor()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn factor(&mut self) -> Result<Expr, ExprError> {
        if self.eat_op("-") {
            return Ok(Expr::Unary(UnaryOp::Neg, Box::new(self.factor()?)));
        }
        if self.eat_op("+") {
            return Ok(Expr::Unary(UnaryOp::Pos, Box::new(self.factor()?)));
        }
        self.power()
    }

    fn power(&mut self) -> Result<Expr, ExprError> {
        let base = self.postfix()?;
        if self.eat_op("**") {
            // right-associative, binds tighter than unary minus on its left
            let exponent = self.factor()?;
            return Ok(Expr::Binary(BinaryOp::Pow, Box::new(base), Box::new(exponent)));
        }
        Ok(base)
    }

    fn postfix(&mut self) -> Result<Expr, ExprError> {
        let mut expr = self.atom()?;
        loop {
            if self.eat_op("(") {
                let (args, kwargs) = self.call_arguments()?;
                expr = Expr::Call {
                    func: Box::new(expr),
                    args,
                    kwargs,
                };
            } else if self.eat_op("[") {
                expr = self.subscript(expr)?;
            } else if self.eat_op(".") {
                let name = self.identifier()?;
                expr = Expr::Attribute(Box::new(expr), name);
            } else {
                return Ok(expr);
            }
        }
    }

    fn call_arguments(&mut self) -> Result<(Vec<Expr>, Vec<(String, Expr)>), ExprError> {
        let mut args = Vec::new();
        let mut kwargs: Vec<(String, Expr)> = Vec::new();

        while !self.at_op(")") {
            let is_keyword = matches!(self.peek(), Token::Name(_))
                && matches!(self.peek_at(1), Token::Op("="));
            if is_keyword {
                let name = self.identifier()?;
                self.expect_op("=")?;
                kwargs.push((name, self.expression()?));
            } else {
                if !kwargs.is_empty() {
                    return Err(self.error("positional argument follows keyword argument"));
                }
                args.push(self.expression()?);
            }

            if !self.eat_op(",") {
                break;
            }
        }

        self.expect_op(")")?;
        Ok((args, kwargs))
    }

    fn subscript(&mut self, target: Expr) -> Result<Expr, ExprError> {
        let start = if self.at_op(":") {
            None
        } else {
            Some(Box::new(self.expression()?))
        };

        if self.eat_op(":") {
            let end = if self.at_op("]") {
                None
            } else {
                Some(Box::new(self.expression()?))
            };
            self.expect_op("]")?;
            return Ok(Expr::Slice {
                target: Box::new(target),
                start,
                end,
            });
        }

        self.expect_op("]")?;
        match start {
            Some(index) => Ok(Expr::Index(Box::new(target), index)),
            None => Err(self.error("empty subscript")),
        }
    }

    fn atom(&mut self) -> Result<Expr, ExprError> {
        match self.advance() {
            Token::Int(i) => Ok(Expr::Literal(Value::Int(i))),
            Token::Float(f) => Ok(Expr::Literal(Value::Float(f))),
            Token::Str(mut s) => {
                // adjacent literals concatenate
                while let Token::Str(next) = self.peek() {
                    s.push_str(next);
                    self.advance();
                }
                Ok(Expr::Literal(Value::Str(s)))
            }
            Token::Name(name) => {
                let literal = match name.as_str() {
                    "True" => Some(Value::Bool(true)),
                    "False" => Some(Value::Bool(false)),
                    "None" => Some(Value::None),
                    _ => None,
                };
                if let Some(value) = literal {
                    return Ok(Expr::Literal(value));
                }
                if KEYWORDS.contains(&name.as_str()) {
                    self.pos = self.pos.saturating_sub(1);
                    return Err(self.error(format!("unexpected keyword '{}'", name)));
                }
                Ok(Expr::Name(name))
            }
            Token::Op("(") => {
                let inner = self.expression()?;
                self.expect_op(")")?;
                Ok(inner)
            }
            Token::Op("[") => {
                let mut items = Vec::new();
                while !self.at_op("]") {
                    items.push(self.expression()?);
                    if !self.eat_op(",") {
                        break;
                    }
                }
                self.expect_op("]")?;
                Ok(Expr::List(items))
            }
            Token::Eof => Err(self.error("unexpected end of expression")),
            other => {
                self.pos = self.pos.saturating_sub(1);
                Err(self.error(format!("unexpected token {:?}", other)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_params_and_kwargs() {
        let def = parse_lambda("lambda response, limit=3, **kw: response").unwrap();
        assert_eq!(def.params.len(), 2);
        assert_eq!(def.params[0].name, "response");
        assert!(def.params[1].default.is_some());
        assert_eq!(def.kwargs.as_deref(), Some("kw"));
        assert_eq!(def.body, Expr::Name("response".into()));
    }

    #[test]
    fn test_precedence() {
        let def = parse_lambda("lambda: 1 + 2 * 3").unwrap();
        assert_eq!(
            def.body,
            Expr::Binary(
                BinaryOp::Add,
                Box::new(Expr::Literal(Value::Int(1))),
                Box::new(Expr::Binary(
                    BinaryOp::Mul,
                    Box::new(Expr::Literal(Value::Int(2))),
                    Box::new(Expr::Literal(Value::Int(3))),
                )),
            )
        );
    }

    #[test]
    fn test_not_in() {
        let def = parse_lambda("lambda r: 'x' not in r").unwrap();
        assert!(matches!(
            def.body,
            Expr::Compare(_, ref rest) if rest[0].0 == CompareOp::NotIn
        ));
    }

    #[test]
    fn test_requires_lambda_keyword() {
        assert!(matches!(
            parse_lambda("response == 'ok'"),
            Err(ExprError::Syntax { position: 0, .. })
        ));
    }

    #[test]
    fn test_rejects_trailing_tokens() {
        assert!(parse_lambda("lambda r: r r").is_err());
    }

    #[test]
    fn test_rejects_params_after_kwargs() {
        assert!(parse_lambda("lambda **kw, x: x").is_err());
    }

    #[test]
    fn test_rejects_duplicate_params() {
        assert!(parse_lambda("lambda x, x: x").is_err());
    }

    #[test]
    fn test_slice_and_method_call() {
        let def = parse_lambda("lambda r: r.strip()[1:]").unwrap();
        assert!(matches!(def.body, Expr::Slice { end: None, .. }));
    }
}
