//! The statement dialect understood by the in-memory backend.
//!
//! ```text
//! select * | col[, col...] from table [where col = operand]
//! insert into table (col[, col...]) values (operand[, operand...])
//! delete from table [where col = operand]
//!
//! operand := :bind_name | 'text' | integer | null
//! ```
//!
//! Keywords are case-insensitive. Anything else is rejected with a
//! `BadInput` transport error, the way a backend rejects a syntax error.

use shardgate_core::{Bindings, Error, Result, RpcCode, Value};

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Word(String),
    Text(String),
    Comma,
    Open,
    Close,
    Equals,
    Star,
}

fn tokenize(sql: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = sql.chars().peekable();
    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            ',' | '(' | ')' | '=' | '*' => {
                chars.next();
                tokens.push(match c {
                    ',' => Token::Comma,
                    '(' => Token::Open,
                    ')' => Token::Close,
                    '=' => Token::Equals,
                    _ => Token::Star,
                });
            }
            '\'' => {
                chars.next();
                let mut text = String::new();
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(ch) => text.push(ch),
                        None => return Err(syntax("unterminated string literal")),
                    }
                }
                tokens.push(Token::Text(text));
            }
            _ => {
                let mut word = String::new();
                while let Some(&ch) = chars.peek() {
                    if ch.is_whitespace() || matches!(ch, ',' | '(' | ')' | '=' | '*' | '\'') {
                        break;
                    }
                    word.push(ch);
                    chars.next();
                }
                tokens.push(Token::Word(word));
            }
        }
    }
    Ok(tokens)
}

fn syntax(reason: impl Into<String>) -> Error {
    Error::transport(RpcCode::BadInput, format!("syntax error: {}", reason.into()))
}

/// Value position in a statement
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Operand {
    Bind(String),
    Literal(Value),
}

impl Operand {
    pub(crate) fn resolve(&self, bind_vars: &Bindings) -> Result<Value> {
        match self {
            Operand::Literal(value) => Ok(value.clone()),
            Operand::Bind(name) => bind_vars.get(name).cloned().ok_or_else(|| {
                Error::transport(RpcCode::BadInput, format!("missing bind variable :{}", name))
            }),
        }
    }
}

/// `col = operand` predicate
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Condition {
    pub column: String,
    pub operand: Operand,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Projection {
    All,
    Columns(Vec<String>),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Statement {
    Select {
        table: String,
        projection: Projection,
        condition: Option<Condition>,
    },
    Insert {
        table: String,
        columns: Vec<String>,
        values: Vec<Operand>,
    },
    Delete {
        table: String,
        condition: Option<Condition>,
    },
}

impl Statement {
    pub(crate) fn parse(sql: &str) -> Result<Self> {
        let mut parser = Parser {
            tokens: tokenize(sql)?,
            pos: 0,
        };
        let statement = match parser.keyword()?.as_str() {
            "select" => parser.select()?,
            "insert" => parser.insert()?,
            "delete" => parser.delete()?,
            other => return Err(syntax(format!("unsupported statement '{}'", other))),
        };
        parser.finish()?;
        Ok(statement)
    }

    pub(crate) fn table(&self) -> &str {
        match self {
            Statement::Select { table, .. }
            | Statement::Insert { table, .. }
            | Statement::Delete { table, .. } => table,
        }
    }

    pub(crate) fn is_write(&self) -> bool {
        !matches!(self, Statement::Select { .. })
    }
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn word(&mut self) -> Result<String> {
        match self.next() {
            Some(Token::Word(w)) => Ok(w),
            other => Err(syntax(format!("expected identifier, found {:?}", other))),
        }
    }

    fn keyword(&mut self) -> Result<String> {
        self.word().map(|w| w.to_ascii_lowercase())
    }

    fn expect_keyword(&mut self, kw: &str) -> Result<()> {
        let found = self.keyword()?;
        if found == kw {
            Ok(())
        } else {
            Err(syntax(format!("expected '{}', found '{}'", kw, found)))
        }
    }

    fn expect(&mut self, token: Token) -> Result<()> {
        match self.next() {
            Some(t) if t == token => Ok(()),
            other => Err(syntax(format!("expected {:?}, found {:?}", token, other))),
        }
    }

    fn finish(&mut self) -> Result<()> {
        match self.peek() {
            None => Ok(()),
            Some(t) => Err(syntax(format!("unexpected trailing {:?}", t))),
        }
    }

    fn identifiers(&mut self) -> Result<Vec<String>> {
        let mut names = vec![self.word()?];
        while self.peek() == Some(&Token::Comma) {
            self.next();
            names.push(self.word()?);
        }
        Ok(names)
    }

    fn operand(&mut self) -> Result<Operand> {
        match self.next() {
            Some(Token::Text(text)) => Ok(Operand::Literal(Value::String(text))),
            Some(Token::Word(w)) => {
                if let Some(name) = w.strip_prefix(':') {
                    if name.is_empty() {
                        return Err(syntax("empty bind variable name"));
                    }
                    Ok(Operand::Bind(name.to_string()))
                } else if w.eq_ignore_ascii_case("null") {
                    Ok(Operand::Literal(Value::Null))
                } else {
                    w.parse::<i64>()
                        .map(|n| Operand::Literal(Value::Int(n)))
                        .map_err(|_| syntax(format!("bad literal '{}'", w)))
                }
            }
            other => Err(syntax(format!("expected value, found {:?}", other))),
        }
    }

    fn condition(&mut self) -> Result<Option<Condition>> {
        match self.peek() {
            Some(Token::Word(w)) if w.eq_ignore_ascii_case("where") => {
                self.next();
                let column = self.word()?;
                self.expect(Token::Equals)?;
                let operand = self.operand()?;
                Ok(Some(Condition { column, operand }))
            }
            _ => Ok(None),
        }
    }

    fn select(&mut self) -> Result<Statement> {
        let projection = if self.peek() == Some(&Token::Star) {
            self.next();
            Projection::All
        } else {
            Projection::Columns(self.identifiers()?)
        };
        self.expect_keyword("from")?;
        let table = self.word()?;
        let condition = self.condition()?;
        Ok(Statement::Select {
            table,
            projection,
            condition,
        })
    }

    fn insert(&mut self) -> Result<Statement> {
        self.expect_keyword("into")?;
        let table = self.word()?;
        self.expect(Token::Open)?;
        let columns = self.identifiers()?;
        self.expect(Token::Close)?;
        self.expect_keyword("values")?;
        self.expect(Token::Open)?;
        let mut values = vec![self.operand()?];
        while self.peek() == Some(&Token::Comma) {
            self.next();
            values.push(self.operand()?);
        }
        self.expect(Token::Close)?;
        if columns.len() != values.len() {
            return Err(syntax(format!(
                "{} columns but {} values",
                columns.len(),
                values.len()
            )));
        }
        Ok(Statement::Insert {
            table,
            columns,
            values,
        })
    }

    fn delete(&mut self) -> Result<Statement> {
        self.expect_keyword("from")?;
        let table = self.word()?;
        let condition = self.condition()?;
        Ok(Statement::Delete { table, condition })
    }
}
