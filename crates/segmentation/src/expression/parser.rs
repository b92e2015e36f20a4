//! Recursive-descent parser. Precedence, loosest first:
//! `or`, `and`, `not`, comparison / `in`, operand.

use audience_core::{AudienceResult, Scalar};

use super::ast::{CompareOp, Expr};
use super::lexer::{syntax, tokenize, Token, TokenKind};

/// Deepest parenthesis nesting accepted.
pub const MAX_NESTING: usize = 64;

/// Most `and` / `or` / `not` operators in one expression. Together with
/// [`MAX_NESTING`] this bounds the depth of every recursive pass over the tree.
pub const MAX_OPERATORS: usize = 512;

pub fn parse(input: &str) -> AudienceResult<Expr> {
    let tokens = tokenize(input)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        nesting: 0,
        operators: 0,
    };
    if parser.peek() == &TokenKind::Eof {
        return Err(syntax(0, "empty expression"));
    }
    let expr = parser.parse_or()?;
    match parser.peek() {
        TokenKind::Eof => Ok(expr),
        other => Err(syntax(
            parser.offset(),
            format!("unexpected {} after end of expression", describe(other)),
        )),
    }
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    nesting: usize,
    operators: usize,
}

impl Parser {
    fn peek(&self) -> &TokenKind {
        &self.tokens[self.pos.min(self.tokens.len() - 1)].kind
    }

    fn peek_second(&self) -> &TokenKind {
        &self.tokens[(self.pos + 1).min(self.tokens.len() - 1)].kind
    }

    fn offset(&self) -> usize {
        self.tokens[self.pos.min(self.tokens.len() - 1)].offset
    }

    fn advance(&mut self) -> TokenKind {
        let kind = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        kind
    }

    fn expect(&mut self, expected: TokenKind) -> AudienceResult<()> {
        if self.peek() == &expected {
            self.advance();
            Ok(())
        } else {
            Err(syntax(
                self.offset(),
                format!("expected {}, found {}", describe(&expected), describe(self.peek())),
            ))
        }
    }

    /// Consume a boolean operator token, enforcing [`MAX_OPERATORS`].
    fn take_operator(&mut self) -> AudienceResult<()> {
        self.operators += 1;
        if self.operators > MAX_OPERATORS {
            return Err(syntax(
                self.offset(),
                format!("expression has more than {MAX_OPERATORS} and/or/not operators"),
            ));
        }
        self.advance();
        Ok(())
    }

    fn parse_or(&mut self) -> AudienceResult<Expr> {
        let mut left = self.parse_and()?;
        while self.peek() == &TokenKind::Or {
            self.take_operator()?;
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> AudienceResult<Expr> {
        let mut left = self.parse_not()?;
        while self.peek() == &TokenKind::And {
            self.take_operator()?;
            let right = self.parse_not()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> AudienceResult<Expr> {
        if self.peek() == &TokenKind::Not {
            self.take_operator()?;
            return Ok(Expr::Not(Box::new(self.parse_not()?)));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> AudienceResult<Expr> {
        let left = self.parse_operand()?;

        let op = match self.peek() {
            TokenKind::Eq => Some(CompareOp::Eq),
            TokenKind::Ne => Some(CompareOp::Ne),
            TokenKind::Lt => Some(CompareOp::Lt),
            TokenKind::Le => Some(CompareOp::Le),
            TokenKind::Gt => Some(CompareOp::Gt),
            TokenKind::Ge => Some(CompareOp::Ge),
            _ => None,
        };
        if let Some(op) = op {
            self.advance();
            let right = self.parse_operand()?;
            return Ok(Expr::Compare {
                op,
                left: Box::new(left),
                right: Box::new(right),
            });
        }

        let negated = match (self.peek(), self.peek_second()) {
            (TokenKind::In, _) => false,
            (TokenKind::Not, TokenKind::In) => {
                self.advance();
                true
            }
            _ => return Ok(left),
        };
        self.advance();
        let values = self.parse_list()?;
        Ok(Expr::InList {
            operand: Box::new(left),
            values,
            negated,
        })
    }

    fn parse_operand(&mut self) -> AudienceResult<Expr> {
        match self.peek() {
            TokenKind::LParen => {
                if self.nesting == MAX_NESTING {
                    return Err(syntax(
                        self.offset(),
                        format!("parentheses nested deeper than {MAX_NESTING}"),
                    ));
                }
                self.nesting += 1;
                self.advance();
                let inner = self.parse_or()?;
                self.expect(TokenKind::RParen)?;
                self.nesting -= 1;
                Ok(inner)
            }
            TokenKind::Ident(name) => {
                let column = Expr::Column(name.clone());
                self.advance();
                Ok(column)
            }
            _ => self.parse_literal().map(Expr::Literal),
        }
    }

    fn parse_literal(&mut self) -> AudienceResult<Scalar> {
        let offset = self.offset();
        match self.advance() {
            TokenKind::Int(i) => Ok(Scalar::Int(i)),
            TokenKind::Float(f) => Ok(Scalar::Float(f)),
            TokenKind::Str(s) => Ok(Scalar::Str(s)),
            TokenKind::True => Ok(Scalar::Bool(true)),
            TokenKind::False => Ok(Scalar::Bool(false)),
            TokenKind::Null => Ok(Scalar::Null),
            TokenKind::Minus => match self.advance() {
                TokenKind::Int(i) => Ok(Scalar::Int(-i)),
                TokenKind::Float(f) => Ok(Scalar::Float(-f)),
                other => Err(syntax(
                    offset,
                    format!("expected a number after '-', found {}", describe(&other)),
                )),
            },
            other => Err(syntax(
                offset,
                format!("expected a value, found {}", describe(&other)),
            )),
        }
    }

    fn parse_list(&mut self) -> AudienceResult<Vec<Scalar>> {
        let close = match self.peek() {
            TokenKind::LBracket => TokenKind::RBracket,
            TokenKind::LParen => TokenKind::RParen,
            other => {
                return Err(syntax(
                    self.offset(),
                    format!("expected a list after 'in', found {}", describe(other)),
                ))
            }
        };
        self.advance();

        let mut values = Vec::new();
        if self.peek() == &close {
            self.advance();
            return Ok(values);
        }
        loop {
            values.push(self.parse_literal()?);
            if self.peek() == &TokenKind::Comma {
                self.advance();
                continue;
            }
            self.expect(close.clone())?;
            return Ok(values);
        }
    }
}

fn describe(kind: &TokenKind) -> String {
    match kind {
        TokenKind::Ident(name) => format!("column '{name}'"),
        TokenKind::Str(s) => format!("string '{s}'"),
        TokenKind::Int(i) => format!("number {i}"),
        TokenKind::Float(f) => format!("number {f}"),
        TokenKind::True => "'true'".to_string(),
        TokenKind::False => "'false'".to_string(),
        TokenKind::Null => "'null'".to_string(),
        TokenKind::And => "'and'".to_string(),
        TokenKind::Or => "'or'".to_string(),
        TokenKind::Not => "'not'".to_string(),
        TokenKind::In => "'in'".to_string(),
        TokenKind::Eq => "'=='".to_string(),
        TokenKind::Ne => "'!='".to_string(),
        TokenKind::Lt => "'<'".to_string(),
        TokenKind::Le => "'<='".to_string(),
        TokenKind::Gt => "'>'".to_string(),
        TokenKind::Ge => "'>='".to_string(),
        TokenKind::Minus => "'-'".to_string(),
        TokenKind::LParen => "'('".to_string(),
        TokenKind::RParen => "')'".to_string(),
        TokenKind::LBracket => "'['".to_string(),
        TokenKind::RBracket => "']'".to_string(),
        TokenKind::Comma => "','".to_string(),
        TokenKind::Eof => "end of input".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use audience_core::AudienceError;

    fn col(name: &str) -> Box<Expr> {
        Box::new(Expr::Column(name.to_string()))
    }

    fn int(value: i64) -> Box<Expr> {
        Box::new(Expr::Literal(Scalar::Int(value)))
    }

    #[test]
    fn test_and_binds_tighter_than_or() {
        let expr = parse("Age > 60 or Age < 18 and Balance >= 100").unwrap();
        assert_eq!(
            expr,
            Expr::Or(
                Box::new(Expr::Compare {
                    op: CompareOp::Gt,
                    left: col("Age"),
                    right: int(60),
                }),
                Box::new(Expr::And(
                    Box::new(Expr::Compare {
                        op: CompareOp::Lt,
                        left: col("Age"),
                        right: int(18),
                    }),
                    Box::new(Expr::Compare {
                        op: CompareOp::Ge,
                        left: col("Balance"),
                        right: int(100),
                    }),
                )),
            )
        );
    }

    #[test]
    fn test_membership_forms() {
        let expr = parse("Location not in ('Paris', 'Lyon')").unwrap();
        assert_eq!(
            expr,
            Expr::InList {
                operand: col("Location"),
                values: vec!["Paris".into(), "Lyon".into()],
                negated: true,
            }
        );

        let expr = parse("Age in [18, -1, 2.5]").unwrap();
        assert_eq!(
            expr,
            Expr::InList {
                operand: col("Age"),
                values: vec![Scalar::Int(18), Scalar::Int(-1), Scalar::Float(2.5)],
                negated: false,
            }
        );
    }

    #[test]
    fn test_parentheses_and_not() {
        let expr = parse("not (Gender == 'Male' or Gender == 'Female')").unwrap();
        assert!(matches!(expr, Expr::Not(inner) if matches!(*inner, Expr::Or(_, _))));
        let parsed = parse("not (Gender == 'Male' or Gender == 'Female')").unwrap();
        assert_eq!(parsed.columns().into_iter().collect::<Vec<_>>(), vec!["Gender"]);
    }

    #[test]
    fn test_syntax_errors() {
        for bad in ["", "Age >", "Age > 18 and", "(Age > 18", "Age in 18", "Age > 18 Balance", "- Age"] {
            let err = parse(bad).unwrap_err();
            assert!(
                matches!(err, AudienceError::ExpressionSyntax { .. }),
                "{bad:?} gave {err:?}"
            );
        }
    }

    #[test]
    fn test_long_boolean_chain_is_rejected() {
        let chain = vec!["Age > 1"; 20_000].join(" and ");
        let err = parse(&chain).unwrap_err();
        assert!(matches!(err, AudienceError::ExpressionSyntax { .. }), "{err:?}");

        let nots = format!("{}Age > 1", "not ".repeat(MAX_OPERATORS + 1));
        assert!(matches!(
            parse(&nots).unwrap_err(),
            AudienceError::ExpressionSyntax { .. }
        ));
    }

    #[test]
    fn test_deep_parentheses_are_rejected() {
        let deep = format!("{}Age > 1{}", "(".repeat(5_000), ")".repeat(5_000));
        let err = parse(&deep).unwrap_err();
        assert!(matches!(err, AudienceError::ExpressionSyntax { .. }), "{err:?}");

        let allowed = format!(
            "{}Age > 1{}",
            "(".repeat(MAX_NESTING),
            ")".repeat(MAX_NESTING)
        );
        assert!(parse(&allowed).is_ok());
    }

    #[test]
    fn test_chain_at_the_operator_limit_parses() {
        let chain = vec!["Age > 1"; MAX_OPERATORS + 1].join(" or ");
        assert!(parse(&chain).is_ok());
    }
}
