//! Restricted SQL-subset parser for the in-memory tables.
//!
//! A small tokenizer plus four typed productions (insert, select, update,
//! delete) and a metadata introspection form. Statements are compiled once,
//! at prepare time. The grammar is deliberately narrow and deliberately
//! forgiving: anything outside it compiles to [`ParsedStatement::Unsupported`]
//! which executes as an empty/zero-change no-op, and a WHERE clause outside
//! the two supported shapes becomes [`WhereClause::Opaque`]. Callers depend
//! on this leniency when running degraded; do not tighten it.

// =============================================================================
// Tokens
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Token {
    /// Identifier or keyword; quoting (backtick or double quote) is stripped.
    Word(String),
    /// Integer literal.
    Number(i64),
    /// Positional `?` placeholder.
    Placeholder,
    LParen,
    RParen,
    Comma,
    Eq,
    Star,
    Semicolon,
    /// Anything outside the subset; its presence fails every production.
    Other(char),
}

fn tokenize(sql: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut chars = sql.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '?' => {
                chars.next();
                tokens.push(Token::Placeholder);
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            ',' => {
                chars.next();
                tokens.push(Token::Comma);
            }
            '=' => {
                chars.next();
                tokens.push(Token::Eq);
            }
            '*' => {
                chars.next();
                tokens.push(Token::Star);
            }
            ';' => {
                chars.next();
                tokens.push(Token::Semicolon);
            }
            '`' | '"' => {
                chars.next();
                let mut word = String::new();
                for inner in chars.by_ref() {
                    if inner == c {
                        break;
                    }
                    word.push(inner);
                }
                tokens.push(Token::Word(word));
            }
            c if c.is_ascii_alphanumeric() || c == '_' => {
                let mut word = String::new();
                while let Some(&inner) = chars.peek() {
                    if inner.is_ascii_alphanumeric() || inner == '_' {
                        word.push(inner);
                        chars.next();
                    } else {
                        break;
                    }
                }
                if word.bytes().all(|b| b.is_ascii_digit()) {
                    match word.parse() {
                        Ok(n) => tokens.push(Token::Number(n)),
                        Err(_) => tokens.push(Token::Other('#')),
                    }
                } else {
                    tokens.push(Token::Word(word));
                }
            }
            other => {
                chars.next();
                tokens.push(Token::Other(other));
            }
        }
    }

    tokens
}

fn is_kw(token: &Token, kw: &str) -> bool {
    matches!(token, Token::Word(w) if w.eq_ignore_ascii_case(kw))
}

// =============================================================================
// Parsed forms
// =============================================================================

/// A statement compiled for the in-memory tables.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ParsedStatement {
    Insert {
        table: String,
        columns: Vec<String>,
    },
    Select {
        table: String,
        projection: Projection,
        filter: Option<WhereClause>,
    },
    Update {
        table: String,
        assignments: Vec<String>,
        filter: WhereClause,
    },
    Delete {
        table: String,
        filter: WhereClause,
    },
    /// `PRAGMA table_info(<table>)` metadata introspection.
    TableInfo {
        table: String,
    },
    /// Outside the subset: executes as an empty/zero-change no-op.
    Unsupported,
}

/// What a select produces.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Projection {
    /// The filtered rows as stored.
    Rows,
    /// A single `{count: N}` record (the `COUNT(*) as count` field pattern).
    Count,
}

/// The two supported filter shapes, plus the permissive escape hatch.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum WhereClause {
    /// `column = ?`, compared by string coercion.
    Eq { column: String },
    /// `c1 = ? AND c2 = ? AND c3 = <int>`; the literal is compared
    /// numerically, with a missing column coercing to zero.
    TripleEq {
        column1: String,
        column2: String,
        column3: String,
        literal: i64,
    },
    /// Unrecognized shape: selects pass every row through, writes touch none.
    Opaque,
}

/// Compile one SQL text. Never fails; unrecognized statements become
/// [`ParsedStatement::Unsupported`].
pub(crate) fn parse(sql: &str) -> ParsedStatement {
    let mut tokens = tokenize(sql);
    while tokens.last() == Some(&Token::Semicolon) {
        tokens.pop();
    }
    // Multi-statement texts are outside the subset.
    if tokens.contains(&Token::Semicolon) {
        return ParsedStatement::Unsupported;
    }

    try_table_info(&tokens)
        .or_else(|| try_insert(&tokens))
        .or_else(|| try_update(&tokens))
        .or_else(|| try_delete(&tokens))
        .or_else(|| try_select(&tokens))
        .unwrap_or(ParsedStatement::Unsupported)
}

// =============================================================================
// Productions
// =============================================================================

struct Cursor<'a> {
    tokens: &'a [Token],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(tokens: &'a [Token]) -> Self {
        Self { tokens, pos: 0 }
    }

    fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.pos)
    }

    fn bump(&mut self) -> Option<&'a Token> {
        let token = self.tokens.get(self.pos)?;
        self.pos += 1;
        Some(token)
    }

    fn keyword(&mut self, kw: &str) -> Option<()> {
        if is_kw(self.peek()?, kw) {
            self.pos += 1;
            Some(())
        } else {
            None
        }
    }

    fn word(&mut self) -> Option<String> {
        match self.peek()? {
            Token::Word(w) => {
                self.pos += 1;
                Some(w.clone())
            }
            _ => None,
        }
    }

    fn token(&mut self, expected: &Token) -> Option<()> {
        if self.peek()? == expected {
            self.pos += 1;
            Some(())
        } else {
            None
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn rest(&self) -> &'a [Token] {
        &self.tokens[self.pos.min(self.tokens.len())..]
    }
}

fn try_table_info(tokens: &[Token]) -> Option<ParsedStatement> {
    let mut c = Cursor::new(tokens);
    c.keyword("pragma")?;
    c.keyword("table_info")?;
    c.token(&Token::LParen)?;
    let table = c.word()?;
    c.token(&Token::RParen)?;
    c.at_end().then_some(ParsedStatement::TableInfo { table })
}

fn try_insert(tokens: &[Token]) -> Option<ParsedStatement> {
    let mut c = Cursor::new(tokens);
    c.keyword("insert")?;
    c.keyword("into")?;
    let table = c.word()?;
    c.token(&Token::LParen)?;

    let mut columns = vec![c.word()?];
    while c.token(&Token::Comma).is_some() {
        columns.push(c.word()?);
    }
    c.token(&Token::RParen)?;

    c.keyword("values")?;
    c.token(&Token::LParen)?;
    c.token(&Token::Placeholder)?;
    while c.token(&Token::Comma).is_some() {
        c.token(&Token::Placeholder)?;
    }
    c.token(&Token::RParen)?;

    // Trailing clauses after the value list are tolerated and ignored.
    Some(ParsedStatement::Insert { table, columns })
}

fn try_update(tokens: &[Token]) -> Option<ParsedStatement> {
    let mut c = Cursor::new(tokens);
    c.keyword("update")?;
    let table = c.word()?;
    c.keyword("set")?;

    let mut assignments = Vec::new();
    loop {
        let column = c.word()?;
        c.token(&Token::Eq)?;
        c.token(&Token::Placeholder)?;
        assignments.push(column);
        if c.token(&Token::Comma).is_none() {
            break;
        }
    }

    c.keyword("where")?;
    let filter = parse_where(c.rest());
    (!c.at_end()).then_some(ParsedStatement::Update {
        table,
        assignments,
        filter,
    })
}

fn try_delete(tokens: &[Token]) -> Option<ParsedStatement> {
    let mut c = Cursor::new(tokens);
    c.keyword("delete")?;
    c.keyword("from")?;
    let table = c.word()?;
    c.keyword("where")?;
    let filter = parse_where(c.rest());
    (!c.at_end()).then_some(ParsedStatement::Delete { table, filter })
}

fn try_select(tokens: &[Token]) -> Option<ParsedStatement> {
    let mut c = Cursor::new(tokens);
    c.keyword("select")?;

    // Field list runs up to the first top-level FROM.
    let fields_start = c.pos;
    let mut depth = 0usize;
    let mut from_pos = None;
    while let Some(token) = c.peek() {
        match token {
            Token::LParen => depth += 1,
            Token::RParen => depth = depth.saturating_sub(1),
            t if depth == 0 && is_kw(t, "from") => {
                from_pos = Some(c.pos);
                break;
            }
            _ => {}
        }
        c.pos += 1;
    }
    let from_pos = from_pos?;
    if from_pos == fields_start {
        return None;
    }
    let projection = if contains_count_pattern(&tokens[fields_start..from_pos]) {
        Projection::Count
    } else {
        Projection::Rows
    };
    c.pos = from_pos;
    c.keyword("from")?;
    let table = c.word()?;

    let mut filter = None;
    if c.keyword("where").is_some() {
        let where_start = c.pos;
        while let Some(token) = c.peek() {
            if is_kw(token, "order") || is_kw(token, "limit") {
                break;
            }
            c.pos += 1;
        }
        if c.pos == where_start {
            return None;
        }
        filter = Some(parse_where(&tokens[where_start..c.pos]));
    }

    // ORDER BY and LIMIT are recognized but not applied.
    if c.keyword("order").is_some() {
        c.keyword("by")?;
        let order_start = c.pos;
        while let Some(token) = c.peek() {
            if is_kw(token, "limit") {
                break;
            }
            c.pos += 1;
        }
        if c.pos == order_start {
            return None;
        }
    }
    if c.keyword("limit").is_some() {
        match c.bump()? {
            Token::Number(_) => {}
            _ => return None,
        }
    }

    c.at_end().then_some(ParsedStatement::Select {
        table,
        projection,
        filter,
    })
}

/// Detect the special-cased `COUNT(*) as count` field pattern anywhere in the
/// field list.
fn contains_count_pattern(fields: &[Token]) -> bool {
    fields.windows(6).any(|w| {
        is_kw(&w[0], "count")
            && w[1] == Token::LParen
            && w[2] == Token::Star
            && w[3] == Token::RParen
            && is_kw(&w[4], "as")
            && is_kw(&w[5], "count")
    })
}

fn parse_where(tokens: &[Token]) -> WhereClause {
    match tokens {
        [Token::Word(column), Token::Eq, Token::Placeholder] => WhereClause::Eq {
            column: column.clone(),
        },
        [Token::Word(c1), Token::Eq, Token::Placeholder, a1, Token::Word(c2), Token::Eq, Token::Placeholder, a2, Token::Word(c3), Token::Eq, Token::Number(literal)]
            if is_kw(a1, "and") && is_kw(a2, "and") =>
        {
            WhereClause::TripleEq {
                column1: c1.clone(),
                column2: c2.clone(),
                column3: c3.clone(),
                literal: *literal,
            }
        }
        _ => WhereClause::Opaque,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_insert() {
        let parsed = parse("INSERT INTO users (id, email, role) VALUES (?, ?, ?)");
        assert_eq!(
            parsed,
            ParsedStatement::Insert {
                table: "users".to_string(),
                columns: vec!["id".to_string(), "email".to_string(), "role".to_string()],
            }
        );
    }

    #[test]
    fn test_parse_insert_quoted_columns() {
        let parsed = parse("INSERT INTO `users` (`id`, \"email\") VALUES (?, ?)");
        assert_eq!(
            parsed,
            ParsedStatement::Insert {
                table: "users".to_string(),
                columns: vec!["id".to_string(), "email".to_string()],
            }
        );
    }

    #[test]
    fn test_parse_insert_with_literal_value_is_unsupported() {
        let parsed = parse("INSERT INTO users (id, role) VALUES (?, 'client')");
        assert_eq!(parsed, ParsedStatement::Unsupported);
    }

    #[test]
    fn test_parse_select_star() {
        let parsed = parse("SELECT * FROM users");
        assert_eq!(
            parsed,
            ParsedStatement::Select {
                table: "users".to_string(),
                projection: Projection::Rows,
                filter: None,
            }
        );
    }

    #[test]
    fn test_parse_select_with_eq_filter() {
        let parsed = parse("SELECT * FROM users WHERE id = ?");
        assert_eq!(
            parsed,
            ParsedStatement::Select {
                table: "users".to_string(),
                projection: Projection::Rows,
                filter: Some(WhereClause::Eq {
                    column: "id".to_string()
                }),
            }
        );
    }

    #[test]
    fn test_parse_select_count() {
        let parsed = parse("SELECT COUNT(*) as count FROM refresh_tokens WHERE user_id = ?");
        assert_eq!(
            parsed,
            ParsedStatement::Select {
                table: "refresh_tokens".to_string(),
                projection: Projection::Count,
                filter: Some(WhereClause::Eq {
                    column: "user_id".to_string()
                }),
            }
        );
    }

    #[test]
    fn test_parse_select_triple_conjunction() {
        let parsed = parse("SELECT * FROM refresh_tokens WHERE user_id = ? AND token = ? AND is_revoked = 0");
        assert_eq!(
            parsed,
            ParsedStatement::Select {
                table: "refresh_tokens".to_string(),
                projection: Projection::Rows,
                filter: Some(WhereClause::TripleEq {
                    column1: "user_id".to_string(),
                    column2: "token".to_string(),
                    column3: "is_revoked".to_string(),
                    literal: 0,
                }),
            }
        );
    }

    #[test]
    fn test_parse_select_order_and_limit_recognized() {
        let parsed = parse("SELECT * FROM appointments WHERE user_id = ? ORDER BY scheduled_at DESC LIMIT 10");
        assert_eq!(
            parsed,
            ParsedStatement::Select {
                table: "appointments".to_string(),
                projection: Projection::Rows,
                filter: Some(WhereClause::Eq {
                    column: "user_id".to_string()
                }),
            }
        );
    }

    #[test]
    fn test_parse_select_opaque_filter() {
        let parsed = parse("SELECT * FROM users WHERE email LIKE ?");
        assert_eq!(
            parsed,
            ParsedStatement::Select {
                table: "users".to_string(),
                projection: Projection::Rows,
                filter: Some(WhereClause::Opaque),
            }
        );

        let parsed = parse("SELECT * FROM users WHERE a = ? AND b = ?");
        assert!(matches!(
            parsed,
            ParsedStatement::Select {
                filter: Some(WhereClause::Opaque),
                ..
            }
        ));
    }

    #[test]
    fn test_parse_update() {
        let parsed = parse("UPDATE users SET role = ?, city = ? WHERE id = ?");
        assert_eq!(
            parsed,
            ParsedStatement::Update {
                table: "users".to_string(),
                assignments: vec!["role".to_string(), "city".to_string()],
                filter: WhereClause::Eq {
                    column: "id".to_string()
                },
            }
        );
    }

    #[test]
    fn test_parse_update_without_where_is_unsupported() {
        assert_eq!(parse("UPDATE users SET role = ?"), ParsedStatement::Unsupported);
    }

    #[test]
    fn test_parse_delete() {
        let parsed = parse("DELETE FROM refresh_tokens WHERE token = ?");
        assert_eq!(
            parsed,
            ParsedStatement::Delete {
                table: "refresh_tokens".to_string(),
                filter: WhereClause::Eq {
                    column: "token".to_string()
                },
            }
        );
    }

    #[test]
    fn test_parse_pragma_table_info() {
        let parsed = parse("PRAGMA table_info(users)");
        assert_eq!(
            parsed,
            ParsedStatement::TableInfo {
                table: "users".to_string()
            }
        );
    }

    #[test]
    fn test_parse_trailing_semicolon() {
        assert!(matches!(
            parse("SELECT * FROM users;"),
            ParsedStatement::Select { .. }
        ));
    }

    #[test]
    fn test_parse_ddl_is_unsupported() {
        assert_eq!(
            parse("CREATE TABLE IF NOT EXISTS users (id TEXT PRIMARY KEY)"),
            ParsedStatement::Unsupported
        );
        assert_eq!(
            parse("ALTER TABLE users ADD COLUMN first_name TEXT"),
            ParsedStatement::Unsupported
        );
        assert_eq!(
            parse("CREATE INDEX IF NOT EXISTS idx_users_email ON users(email)"),
            ParsedStatement::Unsupported
        );
    }

    #[test]
    fn test_parse_multi_statement_is_unsupported() {
        assert_eq!(
            parse("SELECT * FROM users; DELETE FROM users WHERE id = ?"),
            ParsedStatement::Unsupported
        );
    }

    #[test]
    fn test_parse_garbage_is_unsupported() {
        assert_eq!(parse(""), ParsedStatement::Unsupported);
        assert_eq!(parse("EXPLAIN QUERY PLAN SELECT 1"), ParsedStatement::Unsupported);
        assert_eq!(parse("WITH x AS (SELECT 1) SELECT * FROM x"), ParsedStatement::Unsupported);
    }
}
