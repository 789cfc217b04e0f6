//! Cypher parser.
//!
//! Recursive descent over the token stream, with one function per
//! precedence level for expressions. Every error is a syntax
//! [`QueryError`] positioned at the offending token.

use super::ast::*;
use super::lexer::{Lexer, Token, TokenKind};
use trellis_common::utils::error::{Error, QueryError, QueryErrorKind, Result, SourceSpan};

/// Deepest nesting of brackets, CASE and prefix operators in one expression.
pub const MAX_NESTING: usize = 64;

/// Longest run of infix and postfix operators along one path of an expression.
pub const MAX_OPERATOR_CHAIN: usize = 1024;

/// Cypher statement parser.
///
/// Everything downstream walks the expression tree recursively, so the
/// parser refuses trees deeper than [`MAX_NESTING`] and
/// [`MAX_OPERATOR_CHAIN`] allow.
pub struct Parser<'a> {
    source: &'a str,
    lexer: Lexer<'a>,
    current: Token,
    previous: Token,
    nesting: usize,
    operators: usize,
}

impl<'a> Parser<'a> {
    /// Creates a new parser for the given query.
    pub fn new(query: &'a str) -> Self {
        let mut lexer = Lexer::new(query);
        let current = lexer.next_token();
        let previous = Token {
            kind: TokenKind::Eof,
            text: String::new(),
            span: current.span,
        };
        Self {
            source: query,
            lexer,
            current,
            previous,
            nesting: 0,
            operators: 0,
        }
    }

    /// Parses exactly one statement, optionally followed by `;`.
    pub fn parse(&mut self) -> Result<Statement> {
        if self.current.kind == TokenKind::Eof {
            return Err(self.error("Expected a statement, found empty query"));
        }
        let stmt = self.parse_statement()?;
        if self.current.kind == TokenKind::Semicolon {
            self.advance();
        }
        if self.current.kind != TokenKind::Eof {
            return Err(self.error(&format!("Expected end of query, found {}", self.found())));
        }
        Ok(stmt)
    }

    fn parse_statement(&mut self) -> Result<Statement> {
        match self.current.kind {
            TokenKind::Explain => {
                self.advance();
                if self.current.kind == TokenKind::Explain {
                    return Err(self.error("EXPLAIN cannot be nested"));
                }
                let inner = self.parse_statement()?;
                Ok(Statement::Explain(Box::new(inner)))
            }
            TokenKind::Begin => {
                self.advance();
                self.expect(TokenKind::Transaction)?;
                Ok(Statement::Begin)
            }
            TokenKind::Commit => {
                self.advance();
                Ok(Statement::Commit)
            }
            TokenKind::Rollback => {
                self.advance();
                Ok(Statement::Rollback)
            }
            TokenKind::Checkpoint => {
                self.advance();
                Ok(Statement::Checkpoint)
            }
            TokenKind::Drop => {
                let span = self.current.span;
                self.advance();
                self.expect(TokenKind::Table)?;
                let name = self.expect_name()?;
                Ok(Statement::DropTable { name, span })
            }
            TokenKind::Create if matches!(self.peek_kind(), TokenKind::Node | TokenKind::Rel) => {
                self.parse_create_table()
            }
            _ => self.parse_query().map(Statement::Query),
        }
    }

    // ==================== DDL ====================

    fn parse_create_table(&mut self) -> Result<Statement> {
        let span = self.current.span;
        self.expect(TokenKind::Create)?;
        let is_node = self.current.kind == TokenKind::Node;
        self.advance();
        self.expect(TokenKind::Table)?;
        let name = self.expect_name()?;
        self.expect(TokenKind::LParen)?;

        if is_node {
            let mut columns = Vec::new();
            let mut primary_key: Option<String> = None;
            loop {
                if self.current.kind == TokenKind::Primary {
                    let at = self.current.span;
                    self.advance();
                    self.expect(TokenKind::Key)?;
                    self.expect(TokenKind::LParen)?;
                    let column = self.expect_name()?;
                    self.expect(TokenKind::RParen)?;
                    if primary_key.replace(column).is_some() {
                        return Err(self.error_at(at, "Only one PRIMARY KEY may be declared"));
                    }
                } else {
                    let column = self.parse_column_def()?;
                    // Inline form: `id INT64 PRIMARY KEY`
                    if self.current.kind == TokenKind::Primary {
                        let at = self.current.span;
                        self.advance();
                        self.expect(TokenKind::Key)?;
                        if primary_key.replace(column.name.clone()).is_some() {
                            return Err(self.error_at(at, "Only one PRIMARY KEY may be declared"));
                        }
                    }
                    columns.push(column);
                }
                if self.current.kind != TokenKind::Comma {
                    break;
                }
                self.advance();
            }
            self.expect(TokenKind::RParen)?;
            let Some(primary_key) = primary_key else {
                return Err(self.error_at(span, &format!("Node table {name} must declare a PRIMARY KEY")));
            };
            return Ok(Statement::CreateNodeTable(CreateNodeTable {
                name,
                columns,
                primary_key,
                span,
            }));
        }

        self.expect(TokenKind::From)?;
        let from = self.expect_name()?;
        self.expect(TokenKind::To)?;
        let to = self.expect_name()?;
        let mut columns = Vec::new();
        while self.current.kind == TokenKind::Comma {
            self.advance();
            columns.push(self.parse_column_def()?);
        }
        self.expect(TokenKind::RParen)?;
        Ok(Statement::CreateRelTable(CreateRelTable {
            name,
            from,
            to,
            columns,
            span,
        }))
    }

    fn parse_column_def(&mut self) -> Result<ColumnDef> {
        let span = self.current.span;
        let name = self.expect_name()?;
        let mut type_name = self.expect_name()?;
        // List types: `STRING[]`, `INT64[][]`.
        while self.current.kind == TokenKind::LBracket {
            self.advance();
            self.expect(TokenKind::RBracket)?;
            type_name.push_str("[]");
        }
        Ok(ColumnDef { name, type_name, span })
    }

    // ==================== Queries ====================

    fn parse_query(&mut self) -> Result<Query> {
        let mut clauses = Vec::new();

        loop {
            match self.current.kind {
                TokenKind::Match => clauses.push(Clause::Match(self.parse_match_clause()?)),
                TokenKind::Optional => return Err(self.error("OPTIONAL MATCH is not supported")),
                TokenKind::Unwind => clauses.push(Clause::Unwind(self.parse_unwind_clause()?)),
                TokenKind::With => {
                    let clause = self.parse_projection(TokenKind::With)?;
                    clauses.push(Clause::With(clause));
                }
                TokenKind::Return => {
                    let clause = self.parse_projection(TokenKind::Return)?;
                    clauses.push(Clause::Return(clause));
                }
                TokenKind::Create => clauses.push(Clause::Create(self.parse_create_clause()?)),
                TokenKind::Set => clauses.push(Clause::Set(self.parse_set_clause()?)),
                TokenKind::Delete | TokenKind::Detach => clauses.push(Clause::Delete(self.parse_delete_clause()?)),
                TokenKind::Where => return Err(self.error("WHERE must follow MATCH or WITH")),
                _ => break,
            }
        }

        if clauses.is_empty() {
            return Err(self.error(&format!("Expected a Cypher clause, found {}", self.found())));
        }
        Ok(Query { clauses })
    }

    fn parse_match_clause(&mut self) -> Result<MatchClause> {
        let span = self.current.span;
        self.expect(TokenKind::Match)?;
        let patterns = self.parse_pattern_list()?;
        let where_clause = self.parse_where()?;
        Ok(MatchClause {
            patterns,
            where_clause,
            span,
        })
    }

    fn parse_where(&mut self) -> Result<Option<Expression>> {
        if self.current.kind != TokenKind::Where {
            return Ok(None);
        }
        self.advance();
        self.parse_expression().map(Some)
    }

    fn parse_unwind_clause(&mut self) -> Result<UnwindClause> {
        let span = self.current.span;
        self.expect(TokenKind::Unwind)?;
        let expression = self.parse_expression()?;
        self.expect(TokenKind::As)?;
        let alias = self.expect_identifier()?;
        Ok(UnwindClause {
            expression,
            alias,
            span,
        })
    }

    /// `WITH` / `RETURN`: items, then ORDER BY, SKIP, LIMIT and (WITH only) WHERE.
    fn parse_projection(&mut self, keyword: TokenKind) -> Result<ProjectionClause> {
        let span = self.current.span;
        self.expect(keyword)?;
        let distinct = if self.current.kind == TokenKind::Distinct {
            self.advance();
            true
        } else {
            false
        };

        let items = if self.current.kind == TokenKind::Star {
            self.advance();
            ProjectionItems::All
        } else {
            ProjectionItems::Explicit(self.parse_projection_items()?)
        };

        let mut order_by = Vec::new();
        if self.current.kind == TokenKind::Order {
            self.advance();
            self.expect(TokenKind::By)?;
            order_by.push(self.parse_sort_item()?);
            while self.current.kind == TokenKind::Comma {
                self.advance();
                order_by.push(self.parse_sort_item()?);
            }
        }

        let skip = if self.current.kind == TokenKind::Skip {
            self.advance();
            Some(self.parse_expression()?)
        } else {
            None
        };
        let limit = if self.current.kind == TokenKind::Limit {
            self.advance();
            Some(self.parse_expression()?)
        } else {
            None
        };

        let where_clause = if keyword == TokenKind::With {
            self.parse_where()?
        } else {
            None
        };

        Ok(ProjectionClause {
            distinct,
            items,
            order_by,
            skip,
            limit,
            where_clause,
            span,
        })
    }

    fn parse_projection_items(&mut self) -> Result<Vec<ProjectionItem>> {
        let mut items = vec![self.parse_projection_item()?];
        while self.current.kind == TokenKind::Comma {
            self.advance();
            items.push(self.parse_projection_item()?);
        }
        Ok(items)
    }

    fn parse_projection_item(&mut self) -> Result<ProjectionItem> {
        let start = self.current.span.start;
        let expression = self.parse_expression()?;
        let text = self.source[start..self.previous.span.end].trim().to_string();
        let alias = if self.current.kind == TokenKind::As {
            self.advance();
            Some(self.expect_identifier()?)
        } else {
            None
        };
        Ok(ProjectionItem {
            expression,
            alias,
            text,
        })
    }

    fn parse_sort_item(&mut self) -> Result<SortItem> {
        let expression = self.parse_expression()?;
        let descending = match self.current.kind {
            TokenKind::Desc | TokenKind::Descending => {
                self.advance();
                true
            }
            TokenKind::Asc | TokenKind::Ascending => {
                self.advance();
                false
            }
            _ => false,
        };
        Ok(SortItem { expression, descending })
    }

    fn parse_create_clause(&mut self) -> Result<CreateClause> {
        let span = self.current.span;
        self.expect(TokenKind::Create)?;
        let patterns = self.parse_pattern_list()?;
        Ok(CreateClause { patterns, span })
    }

    fn parse_set_clause(&mut self) -> Result<SetClause> {
        let span = self.current.span;
        self.expect(TokenKind::Set)?;
        let mut items = vec![self.parse_set_item()?];
        while self.current.kind == TokenKind::Comma {
            self.advance();
            items.push(self.parse_set_item()?);
        }
        Ok(SetClause { items, span })
    }

    fn parse_set_item(&mut self) -> Result<SetItem> {
        let variable = self.expect_identifier()?;
        if self.current.kind != TokenKind::Dot {
            return Err(self.error("Expected '.': only property assignments (n.prop = value) are supported"));
        }
        self.advance();
        let property = self.expect_name()?;
        self.expect(TokenKind::Eq)?;
        let value = self.parse_expression()?;
        Ok(SetItem {
            variable,
            property,
            value,
        })
    }

    fn parse_delete_clause(&mut self) -> Result<DeleteClause> {
        let span = self.current.span;
        let detach = if self.current.kind == TokenKind::Detach {
            self.advance();
            true
        } else {
            false
        };
        self.expect(TokenKind::Delete)?;
        let mut expressions = vec![self.parse_expression()?];
        while self.current.kind == TokenKind::Comma {
            self.advance();
            expressions.push(self.parse_expression()?);
        }
        Ok(DeleteClause {
            detach,
            expressions,
            span,
        })
    }

    // ==================== Patterns ====================

    fn parse_pattern_list(&mut self) -> Result<Vec<Pattern>> {
        let mut patterns = vec![self.parse_pattern()?];
        while self.current.kind == TokenKind::Comma {
            self.advance();
            patterns.push(self.parse_pattern()?);
        }
        Ok(patterns)
    }

    fn parse_pattern(&mut self) -> Result<Pattern> {
        if self.can_be_identifier() && self.peek_kind() == TokenKind::Eq {
            return Err(self.error("Named paths are not supported"));
        }
        let start = self.parse_node_pattern()?;
        let mut chain = Vec::new();
        while matches!(self.current.kind, TokenKind::Minus | TokenKind::LeftArrow) {
            let rel = self.parse_relationship_pattern()?;
            let node = self.parse_node_pattern()?;
            chain.push((rel, node));
        }
        Ok(Pattern { start, chain })
    }

    fn parse_node_pattern(&mut self) -> Result<NodePattern> {
        let span = self.current.span;
        self.expect(TokenKind::LParen)?;

        let variable = if self.can_be_identifier() {
            Some(self.expect_identifier()?)
        } else {
            None
        };

        // `:A:B` and `:A|B` both mean "any of these tables".
        let mut labels = Vec::new();
        while self.current.kind == TokenKind::Colon {
            self.advance();
            labels.push(self.expect_name()?);
            while self.current.kind == TokenKind::Pipe {
                self.advance();
                labels.push(self.expect_name()?);
            }
        }

        let properties = if self.current.kind == TokenKind::LBrace {
            self.parse_property_map()?
        } else {
            Vec::new()
        };

        self.expect(TokenKind::RParen)?;
        Ok(NodePattern {
            variable,
            labels,
            properties,
            span,
        })
    }

    fn parse_relationship_pattern(&mut self) -> Result<RelationshipPattern> {
        let span = self.current.span;
        let incoming = self.current.kind == TokenKind::LeftArrow;
        self.advance();

        let mut variable = None;
        let mut types = Vec::new();
        let mut properties = Vec::new();

        if self.current.kind == TokenKind::LBracket {
            self.advance();
            if self.can_be_identifier() {
                variable = Some(self.expect_identifier()?);
            }
            if self.current.kind == TokenKind::Colon {
                self.advance();
                types.push(self.expect_name()?);
                while self.current.kind == TokenKind::Pipe {
                    self.advance();
                    // `:A|:B` is accepted as well as `:A|B`.
                    if self.current.kind == TokenKind::Colon {
                        self.advance();
                    }
                    types.push(self.expect_name()?);
                }
            }
            if self.current.kind == TokenKind::Star {
                return Err(self.error("Variable-length relationships are not supported"));
            }
            if self.current.kind == TokenKind::LBrace {
                properties = self.parse_property_map()?;
            }
            self.expect(TokenKind::RBracket)?;
        }

        let direction = if incoming {
            self.expect(TokenKind::Minus)?;
            PatternDirection::Incoming
        } else {
            match self.current.kind {
                TokenKind::Arrow => {
                    self.advance();
                    PatternDirection::Outgoing
                }
                TokenKind::Minus => {
                    self.advance();
                    PatternDirection::Undirected
                }
                _ => return Err(self.error(&format!("Expected '-' or '->', found {}", self.found()))),
            }
        };

        Ok(RelationshipPattern {
            variable,
            types,
            direction,
            properties,
            span,
        })
    }

    fn parse_property_map(&mut self) -> Result<Vec<(String, Expression)>> {
        self.expect(TokenKind::LBrace)?;
        let mut properties = Vec::new();
        if self.current.kind != TokenKind::RBrace {
            properties.push(self.parse_property_pair()?);
            while self.current.kind == TokenKind::Comma {
                self.advance();
                properties.push(self.parse_property_pair()?);
            }
        }
        self.expect(TokenKind::RBrace)?;
        Ok(properties)
    }

    fn parse_property_pair(&mut self) -> Result<(String, Expression)> {
        let key = self.expect_name()?;
        self.expect(TokenKind::Colon)?;
        let value = self.parse_expression()?;
        Ok((key, value))
    }

    // ==================== Expressions ====================

    fn parse_expression(&mut self) -> Result<Expression> {
        self.nested(Self::parse_or_expression)
    }

    fn parse_or_expression(&mut self) -> Result<Expression> {
        let mark = self.operators;
        let mut left = self.parse_xor_expression()?;
        while self.current.kind == TokenKind::Or {
            self.chain()?;
            self.advance();
            let right = self.parse_xor_expression()?;
            left = Expression::binary(left, BinaryOp::Or, right);
        }
        self.operators = mark;
        Ok(left)
    }

    fn parse_xor_expression(&mut self) -> Result<Expression> {
        let mark = self.operators;
        let mut left = self.parse_and_expression()?;
        while self.current.kind == TokenKind::Xor {
            self.chain()?;
            self.advance();
            let right = self.parse_and_expression()?;
            left = Expression::binary(left, BinaryOp::Xor, right);
        }
        self.operators = mark;
        Ok(left)
    }

    fn parse_and_expression(&mut self) -> Result<Expression> {
        let mark = self.operators;
        let mut left = self.parse_not_expression()?;
        while self.current.kind == TokenKind::And {
            self.chain()?;
            self.advance();
            let right = self.parse_not_expression()?;
            left = Expression::binary(left, BinaryOp::And, right);
        }
        self.operators = mark;
        Ok(left)
    }

    fn parse_not_expression(&mut self) -> Result<Expression> {
        if self.current.kind == TokenKind::Not {
            self.advance();
            let operand = self.nested(Self::parse_not_expression)?;
            return Ok(Expression::Unary {
                op: UnaryOp::Not,
                operand: Box::new(operand),
            });
        }
        self.parse_comparison_expression()
    }

    fn parse_comparison_expression(&mut self) -> Result<Expression> {
        let mark = self.operators;
        let mut left = self.parse_additive_expression()?;
        loop {
            if matches!(
                self.current.kind,
                TokenKind::Eq
                    | TokenKind::Ne
                    | TokenKind::Lt
                    | TokenKind::Le
                    | TokenKind::Gt
                    | TokenKind::Ge
                    | TokenKind::In
                    | TokenKind::Contains
                    | TokenKind::Starts
                    | TokenKind::Ends
                    | TokenKind::Is
            ) {
                self.chain()?;
            }
            let op = match self.current.kind {
                TokenKind::Eq => BinaryOp::Eq,
                TokenKind::Ne => BinaryOp::Ne,
                TokenKind::Lt => BinaryOp::Lt,
                TokenKind::Le => BinaryOp::Le,
                TokenKind::Gt => BinaryOp::Gt,
                TokenKind::Ge => BinaryOp::Ge,
                TokenKind::In => BinaryOp::In,
                TokenKind::Contains => BinaryOp::Contains,
                TokenKind::Starts | TokenKind::Ends => {
                    let op = if self.current.kind == TokenKind::Starts {
                        BinaryOp::StartsWith
                    } else {
                        BinaryOp::EndsWith
                    };
                    self.advance();
                    self.expect(TokenKind::With)?;
                    let right = self.parse_additive_expression()?;
                    left = Expression::binary(left, op, right);
                    continue;
                }
                TokenKind::Is => {
                    self.advance();
                    let negated = if self.current.kind == TokenKind::Not {
                        self.advance();
                        true
                    } else {
                        false
                    };
                    self.expect(TokenKind::Null)?;
                    left = Expression::IsNull {
                        operand: Box::new(left),
                        negated,
                    };
                    continue;
                }
                _ => break,
            };
            self.advance();
            let right = self.parse_additive_expression()?;
            left = Expression::binary(left, op, right);
        }
        self.operators = mark;
        Ok(left)
    }

    fn parse_additive_expression(&mut self) -> Result<Expression> {
        let mark = self.operators;
        let mut left = self.parse_multiplicative_expression()?;
        loop {
            let op = match self.current.kind {
                TokenKind::Plus => BinaryOp::Add,
                TokenKind::Minus => BinaryOp::Sub,
                _ => break,
            };
            self.chain()?;
            self.advance();
            let right = self.parse_multiplicative_expression()?;
            left = Expression::binary(left, op, right);
        }
        self.operators = mark;
        Ok(left)
    }

    fn parse_multiplicative_expression(&mut self) -> Result<Expression> {
        let mark = self.operators;
        let mut left = self.parse_power_expression()?;
        loop {
            let op = match self.current.kind {
                TokenKind::Star => BinaryOp::Mul,
                TokenKind::Slash => BinaryOp::Div,
                TokenKind::Percent => BinaryOp::Mod,
                _ => break,
            };
            self.chain()?;
            self.advance();
            let right = self.parse_power_expression()?;
            left = Expression::binary(left, op, right);
        }
        self.operators = mark;
        Ok(left)
    }

    /// `^` is left-associative, as in openCypher.
    fn parse_power_expression(&mut self) -> Result<Expression> {
        let mark = self.operators;
        let mut left = self.parse_unary_expression()?;
        while self.current.kind == TokenKind::Caret {
            self.chain()?;
            self.advance();
            let right = self.parse_unary_expression()?;
            left = Expression::binary(left, BinaryOp::Pow, right);
        }
        self.operators = mark;
        Ok(left)
    }

    fn parse_unary_expression(&mut self) -> Result<Expression> {
        match self.current.kind {
            TokenKind::Minus => {
                self.advance();
                // Fold `-<integer>` so i64::MIN is expressible.
                if self.current.kind == TokenKind::Integer {
                    let text = format!("-{}", self.current.text);
                    if let Ok(value) = text.parse::<i64>() {
                        self.advance();
                        return self.parse_postfix(Expression::Literal(Literal::Integer(value)));
                    }
                }
                let operand = self.nested(Self::parse_unary_expression)?;
                Ok(Expression::Unary {
                    op: UnaryOp::Neg,
                    operand: Box::new(operand),
                })
            }
            TokenKind::Plus => {
                self.advance();
                let operand = self.nested(Self::parse_unary_expression)?;
                Ok(Expression::Unary {
                    op: UnaryOp::Pos,
                    operand: Box::new(operand),
                })
            }
            _ => {
                let primary = self.parse_primary_expression()?;
                self.parse_postfix(primary)
            }
        }
    }

    fn parse_postfix(&mut self, mut expr: Expression) -> Result<Expression> {
        let mark = self.operators;
        loop {
            match self.current.kind {
                TokenKind::Dot => {
                    self.chain()?;
                    self.advance();
                    let property = self.expect_name()?;
                    expr = Expression::Property {
                        base: Box::new(expr),
                        property,
                    };
                }
                TokenKind::LBracket => {
                    self.chain()?;
                    self.advance();
                    let index = self.parse_expression()?;
                    if self.current.kind == TokenKind::DotDot {
                        return Err(self.error("List slices are not supported"));
                    }
                    self.expect(TokenKind::RBracket)?;
                    expr = Expression::Index {
                        base: Box::new(expr),
                        index: Box::new(index),
                    };
                }
                _ => {
                    self.operators = mark;
                    return Ok(expr);
                }
            }
        }
    }

    fn parse_primary_expression(&mut self) -> Result<Expression> {
        match self.current.kind {
            TokenKind::Integer => {
                let value = self.current.text.parse::<i64>().map_err(|_| {
                    self.error(&format!("Integer literal {} is out of range", self.current.text))
                })?;
                self.advance();
                Ok(Expression::Literal(Literal::Integer(value)))
            }
            TokenKind::Float => {
                let value = self
                    .current
                    .text
                    .parse::<f64>()
                    .map_err(|_| self.error(&format!("Invalid number literal {}", self.current.text)))?;
                self.advance();
                Ok(Expression::Literal(Literal::Float(value)))
            }
            TokenKind::String => {
                let value = std::mem::take(&mut self.current.text);
                self.advance();
                Ok(Expression::Literal(Literal::String(value)))
            }
            TokenKind::True | TokenKind::False => {
                let value = self.current.kind == TokenKind::True;
                self.advance();
                Ok(Expression::Literal(Literal::Bool(value)))
            }
            TokenKind::Null => {
                self.advance();
                Ok(Expression::Literal(Literal::Null))
            }
            TokenKind::Dollar => {
                self.advance();
                if self.current.kind == TokenKind::Integer {
                    let name = std::mem::take(&mut self.current.text);
                    self.advance();
                    return Ok(Expression::Parameter(name));
                }
                let name = self.expect_name()?;
                Ok(Expression::Parameter(name))
            }
            TokenKind::LParen => {
                self.advance();
                let expr = self.parse_expression()?;
                self.expect(TokenKind::RParen)?;
                Ok(expr)
            }
            TokenKind::LBracket => {
                self.advance();
                let mut items = Vec::new();
                if self.current.kind != TokenKind::RBracket {
                    items.push(self.parse_expression()?);
                    while self.current.kind == TokenKind::Comma {
                        self.advance();
                        items.push(self.parse_expression()?);
                    }
                }
                self.expect(TokenKind::RBracket)?;
                Ok(Expression::List(items))
            }
            TokenKind::LBrace => self.parse_property_map().map(Expression::Map),
            TokenKind::Case => self.parse_case_expression(),
            _ if self.can_be_identifier() => {
                let name = self.expect_identifier()?;
                if self.current.kind == TokenKind::LParen {
                    self.parse_function_call(name)
                } else {
                    Ok(Expression::Variable(name))
                }
            }
            _ => Err(self.error(&format!("Expected an expression, found {}", self.found()))),
        }
    }

    fn parse_function_call(&mut self, name: String) -> Result<Expression> {
        self.expect(TokenKind::LParen)?;
        if self.current.kind == TokenKind::Star {
            if !name.eq_ignore_ascii_case("count") {
                return Err(self.error(&format!("'*' is only allowed in count(*), not {name}(*)")));
            }
            self.advance();
            self.expect(TokenKind::RParen)?;
            return Ok(Expression::CountStar);
        }

        let distinct = if self.current.kind == TokenKind::Distinct {
            self.advance();
            true
        } else {
            false
        };

        let mut args = Vec::new();
        if self.current.kind != TokenKind::RParen {
            args.push(self.parse_expression()?);
            while self.current.kind == TokenKind::Comma {
                self.advance();
                args.push(self.parse_expression()?);
            }
        }
        self.expect(TokenKind::RParen)?;
        Ok(Expression::FunctionCall { name, distinct, args })
    }

    fn parse_case_expression(&mut self) -> Result<Expression> {
        self.expect(TokenKind::Case)?;
        let operand = if self.current.kind == TokenKind::When {
            None
        } else {
            Some(Box::new(self.parse_expression()?))
        };

        let mut branches = Vec::new();
        while self.current.kind == TokenKind::When {
            self.advance();
            let condition = self.parse_expression()?;
            self.expect(TokenKind::Then)?;
            let result = self.parse_expression()?;
            branches.push((condition, result));
        }
        if branches.is_empty() {
            return Err(self.error("CASE requires at least one WHEN branch"));
        }

        let default = if self.current.kind == TokenKind::Else {
            self.advance();
            Some(Box::new(self.parse_expression()?))
        } else {
            None
        };
        self.expect(TokenKind::End)?;

        Ok(Expression::Case {
            operand,
            branches,
            default,
        })
    }

    // Helper methods

    /// Runs `parse` one nesting level deeper.
    fn nested<T>(&mut self, parse: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        if self.nesting >= MAX_NESTING {
            return Err(self.error(&format!("Expression is nested too deeply (limit {MAX_NESTING})")));
        }
        self.nesting += 1;
        let result = parse(self);
        self.nesting -= 1;
        result
    }

    /// Counts one more operator folded onto the current path.
    fn chain(&mut self) -> Result<()> {
        if self.operators >= MAX_OPERATOR_CHAIN {
            return Err(self.error(&format!(
                "Expression chains too many operators (limit {MAX_OPERATOR_CHAIN})"
            )));
        }
        self.operators += 1;
        Ok(())
    }

    fn advance(&mut self) {
        self.previous = std::mem::replace(&mut self.current, self.lexer.next_token());
    }

    fn expect(&mut self, kind: TokenKind) -> Result<()> {
        if self.current.kind == kind {
            self.advance();
            Ok(())
        } else {
            Err(self.error(&format!("Expected {}, found {}", kind.describe(), self.found())))
        }
    }

    fn expect_identifier(&mut self) -> Result<String> {
        if self.can_be_identifier() {
            let text = std::mem::take(&mut self.current.text);
            self.advance();
            Ok(text)
        } else {
            Err(self.error(&format!("Expected identifier, found {}", self.found())))
        }
    }

    /// Table, property and type names may be any word, keywords included.
    fn expect_name(&mut self) -> Result<String> {
        let is_word = self.current.kind == TokenKind::QuotedIdentifier
            || self
                .current
                .text
                .chars()
                .next()
                .is_some_and(|c| c.is_alphabetic() || c == '_')
                && !matches!(self.current.kind, TokenKind::String | TokenKind::Error);
        if is_word {
            let text = std::mem::take(&mut self.current.text);
            self.advance();
            Ok(text)
        } else {
            Err(self.error(&format!("Expected a name, found {}", self.found())))
        }
    }

    /// Check if the current token can be used as a variable name.
    /// This includes true identifiers and contextual keywords.
    fn can_be_identifier(&self) -> bool {
        matches!(
            self.current.kind,
            TokenKind::Identifier
                | TokenKind::QuotedIdentifier
                // Contextual keywords
                | TokenKind::End
                | TokenKind::Starts
                | TokenKind::Ends
                | TokenKind::Contains
                | TokenKind::Asc
                | TokenKind::Desc
                | TokenKind::Ascending
                | TokenKind::Descending
                | TokenKind::Node
                | TokenKind::Rel
                | TokenKind::Table
                | TokenKind::From
                | TokenKind::To
                | TokenKind::Primary
                | TokenKind::Key
                | TokenKind::Transaction
                | TokenKind::Checkpoint
        )
    }

    fn peek_kind(&self) -> TokenKind {
        let mut lookahead = self.lexer.clone();
        lookahead.next_token().kind
    }

    fn found(&self) -> String {
        match self.current.kind {
            TokenKind::Eof => "end of input".to_string(),
            TokenKind::String => format!("string '{}'", self.current.text),
            _ => format!("'{}'", self.current.text),
        }
    }

    fn error(&self, message: &str) -> Error {
        self.error_at(self.current.span, message)
    }

    fn error_at(&self, span: SourceSpan, message: &str) -> Error {
        // A lexer error token explains itself better than the parser can.
        if self.current.kind == TokenKind::Error {
            return QueryError::new(QueryErrorKind::Syntax, self.current.text.as_str())
                .with_span(self.current.span)
                .into();
        }
        QueryError::new(QueryErrorKind::Syntax, message).with_span(span).into()
    }
}

/// Parses one Cypher statement.
pub fn parse(query: &str) -> Result<Statement> {
    Parser::new(query).parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    // Helper to parse and expect success
    fn parse_ok(query: &str) -> Statement {
        parse(query).unwrap_or_else(|e| panic!("Failed to parse {query}: {e}"))
    }

    fn parse_query(query: &str) -> Query {
        match parse_ok(query) {
            Statement::Query(q) => q,
            other => panic!("expected a query, got {other:?}"),
        }
    }

    // Helper to parse and expect failure; returns the error span
    fn parse_err(query: &str) -> (String, SourceSpan) {
        match parse(query) {
            Err(Error::Query(QueryError {
                kind: QueryErrorKind::Syntax,
                message,
                span: Some(span),
                ..
            })) => (message, span),
            other => panic!("Expected syntax error for {query}, got {other:?}"),
        }
    }

    fn return_expr(query: &str) -> Expression {
        let q = parse_query(query);
        let Some(Clause::Return(ret)) = q.clauses.last() else {
            panic!("no RETURN");
        };
        let ProjectionItems::Explicit(items) = &ret.items else {
            panic!("RETURN *");
        };
        items[0].expression.clone()
    }

    // ==================== Clauses ====================

    #[test]
    fn test_parse_return_literal() {
        let q = parse_query("RETURN 1");
        assert_eq!(q.clauses.len(), 1);
        let Clause::Return(ret) = &q.clauses[0] else {
            panic!("expected RETURN");
        };
        let ProjectionItems::Explicit(items) = &ret.items else {
            panic!("expected items");
        };
        assert_eq!(items[0].expression, Expression::Literal(Literal::Integer(1)));
        assert_eq!(items[0].text, "1");
    }

    #[test]
    fn test_parse_match_where_return() {
        let q = parse_query("MATCH (n:Person {name: 'Alice'}) WHERE n.age > 30 RETURN n.name AS name ORDER BY name DESC SKIP 1 LIMIT 2");
        let Clause::Match(m) = &q.clauses[0] else {
            panic!("expected MATCH");
        };
        assert_eq!(m.patterns[0].start.labels, ["Person"]);
        assert_eq!(m.patterns[0].start.properties.len(), 1);
        assert!(m.where_clause.is_some());
        let Clause::Return(ret) = &q.clauses[1] else {
            panic!("expected RETURN");
        };
        assert!(ret.order_by[0].descending);
        assert!(ret.skip.is_some() && ret.limit.is_some());
        let ProjectionItems::Explicit(items) = &ret.items else {
            panic!("expected items");
        };
        assert_eq!(items[0].alias.as_deref(), Some("name"));
        assert_eq!(items[0].text, "n.name");
    }

    #[test]
    fn test_parse_relationship_directions() {
        let q = parse_query("MATCH (a)-[r:KNOWS]->(b)<-[:LIKES|:HATES]-(c)--(d) RETURN a");
        let Clause::Match(m) = &q.clauses[0] else {
            panic!("expected MATCH");
        };
        let chain = &m.patterns[0].chain;
        assert_eq!(chain.len(), 3);
        assert_eq!(chain[0].0.direction, PatternDirection::Outgoing);
        assert_eq!(chain[0].0.variable.as_deref(), Some("r"));
        assert_eq!(chain[1].0.direction, PatternDirection::Incoming);
        assert_eq!(chain[1].0.types, ["LIKES", "HATES"]);
        assert_eq!(chain[2].0.direction, PatternDirection::Undirected);
    }

    #[test]
    fn test_parse_with_distinct_and_where() {
        let q = parse_query("MATCH (n) WITH DISTINCT n.city AS city WHERE city <> 'x' RETURN city");
        let Clause::With(with) = &q.clauses[1] else {
            panic!("expected WITH");
        };
        assert!(with.distinct);
        assert!(with.where_clause.is_some());
    }

    #[test]
    fn test_parse_writes() {
        let q = parse_query("MATCH (a:P {id: 1}), (b:P {id: 2}) CREATE (a)-[:K {since: 2020}]->(b)");
        assert!(q.is_write());
        assert!(matches!(q.clauses[1], Clause::Create(_)));

        let q = parse_query("MATCH (n:P) SET n.age = n.age + 1, n.name = 'x' RETURN n");
        let Clause::Set(set) = &q.clauses[1] else {
            panic!("expected SET");
        };
        assert_eq!(set.items.len(), 2);

        let q = parse_query("MATCH (n) DETACH DELETE n");
        let Clause::Delete(del) = &q.clauses[1] else {
            panic!("expected DELETE");
        };
        assert!(del.detach);

        let q = parse_query("UNWIND [1, 2] AS x RETURN x");
        assert!(!q.is_write());
    }

    #[test]
    fn test_parse_ddl() {
        let Statement::CreateNodeTable(t) =
            parse_ok("CREATE NODE TABLE Person(name STRING, age INT64, PRIMARY KEY (name))")
        else {
            panic!("expected node table");
        };
        assert_eq!(t.name, "Person");
        assert_eq!(t.columns.len(), 2);
        assert_eq!(t.columns[1].type_name, "INT64");
        assert_eq!(t.primary_key, "name");

        let Statement::CreateNodeTable(t) = parse_ok("create node table City(id INT64 PRIMARY KEY)") else {
            panic!("expected node table");
        };
        assert_eq!(t.primary_key, "id");

        let Statement::CreateNodeTable(t) = parse_ok("CREATE NODE TABLE T(id INT64, tags STRING[], PRIMARY KEY (id))")
        else {
            panic!("expected node table");
        };
        assert_eq!(t.columns[1].type_name, "STRING[]");

        let Statement::CreateRelTable(r) = parse_ok("CREATE REL TABLE LivesIn(FROM Person TO City, since INT64)") else {
            panic!("expected rel table");
        };
        assert_eq!((r.from.as_str(), r.to.as_str()), ("Person", "City"));
        assert_eq!(r.columns.len(), 1);

        assert!(matches!(parse_ok("DROP TABLE Person"), Statement::DropTable { name, .. } if name == "Person"));
        assert!(parse_ok("DROP TABLE Person").is_ddl());
    }

    #[test]
    fn test_parse_node_table_without_primary_key() {
        let (message, span) = parse_err("CREATE NODE TABLE T(a INT64)");
        assert!(message.contains("PRIMARY KEY"));
        assert_eq!(span.start, 0);
    }

    #[test]
    fn test_parse_transaction_statements() {
        assert_eq!(parse_ok("BEGIN TRANSACTION"), Statement::Begin);
        assert_eq!(parse_ok("commit;"), Statement::Commit);
        assert_eq!(parse_ok("ROLLBACK"), Statement::Rollback);
        assert_eq!(parse_ok("CHECKPOINT"), Statement::Checkpoint);
        assert!(matches!(parse_ok("EXPLAIN MATCH (n) RETURN n"), Statement::Explain(_)));
    }

    // ==================== Expressions ====================

    #[test]
    fn test_precedence() {
        let expr = return_expr("RETURN 1 + 2 * 3");
        let Expression::Binary { op: BinaryOp::Add, right, .. } = expr else {
            panic!("expected +");
        };
        assert!(matches!(*right, Expression::Binary { op: BinaryOp::Mul, .. }));

        let expr = return_expr("RETURN NOT a = 1 AND b OR c");
        assert!(matches!(expr, Expression::Binary { op: BinaryOp::Or, .. }));
    }

    #[test]
    fn test_negative_integer_literals() {
        assert_eq!(
            return_expr("RETURN -9223372036854775808"),
            Expression::Literal(Literal::Integer(i64::MIN))
        );
        let (message, _) = parse_err("RETURN 9223372036854775808");
        assert!(message.contains("out of range"));
    }

    #[test]
    fn test_string_predicates_and_null_checks() {
        assert!(matches!(
            return_expr("RETURN a STARTS WITH 'x'"),
            Expression::Binary { op: BinaryOp::StartsWith, .. }
        ));
        assert!(matches!(
            return_expr("RETURN a IS NOT NULL"),
            Expression::IsNull { negated: true, .. }
        ));
        assert!(matches!(return_expr("RETURN 1 IN [1, 2]"), Expression::Binary { op: BinaryOp::In, .. }));
    }

    #[test]
    fn test_functions_parameters_and_case() {
        assert_eq!(return_expr("RETURN count(*)"), Expression::CountStar);
        assert!(matches!(
            return_expr("RETURN count(DISTINCT n.x)"),
            Expression::FunctionCall { distinct: true, .. }
        ));
        assert_eq!(return_expr("RETURN $name"), Expression::Parameter("name".into()));
        assert!(matches!(
            return_expr("RETURN CASE WHEN x > 1 THEN 'a' ELSE 'b' END"),
            Expression::Case { operand: None, .. }
        ));
        assert!(matches!(return_expr("RETURN {a: 1}.a"), Expression::Property { .. }));
        assert!(matches!(return_expr("RETURN [1, 2][0]"), Expression::Index { .. }));
    }

    #[test]
    fn test_keywords_as_names() {
        let expr = return_expr("RETURN n.from, n.end");
        assert!(matches!(expr, Expression::Property { property, .. } if property == "from"));
        parse_query("MATCH (node:Table) RETURN node");
    }

    // ==================== Errors ====================

    #[test]
    fn test_empty_query() {
        let (_, span) = parse_err("");
        assert_eq!((span.start, span.line, span.column), (0, 1, 1));
        parse_err("   \n  ");
    }

    #[test]
    fn test_unbalanced_punctuation() {
        let (message, span) = parse_err("RETURN (1");
        assert!(message.contains("')'"), "{message}");
        assert_eq!(span.start, 9);
        parse_err("MATCH (n RETURN n");
        parse_err("RETURN [1, 2");
        parse_err("RETURN 1)");
    }

    #[test]
    fn test_error_position() {
        let (_, span) = parse_err("MATCH (n)\nRETRN n");
        assert_eq!((span.line, span.column), (2, 1));
        assert_eq!(span.start, 10);
    }

    #[test]
    fn test_lexer_errors_surface() {
        let (message, span) = parse_err("RETURN 'abc");
        assert_eq!(message, "Unterminated string literal");
        assert_eq!(span.start, 7);
    }

    #[test]
    fn test_unsupported_constructs() {
        parse_err("MATCH (a)-[*1..3]->(b) RETURN a");
        parse_err("MATCH p = (a)-->(b) RETURN p");
        parse_err("OPTIONAL MATCH (n) RETURN n");
        parse_err("WHERE 1 = 1 RETURN 1");
        parse_err("RETURN 1 RETURN 2 garbage");
    }

    #[test]
    fn test_deep_nesting_is_rejected() {
        let shallow = format!("RETURN {}1{}", "(".repeat(50), ")".repeat(50));
        assert_eq!(return_expr(&shallow), Expression::Literal(Literal::Integer(1)));

        let deep = format!("RETURN {}1{}", "(".repeat(1000), ")".repeat(1000));
        let (message, span) = parse_err(&deep);
        assert!(message.contains("nested too deeply"), "{message}");
        assert_eq!(span.line, 1);
        assert!(span.start > 7 && span.start < 7 + 1000, "{span:?}");

        for query in [
            format!("RETURN {}1{}", "[".repeat(1000), "]".repeat(1000)),
            format!("RETURN {}1{}", "{a: ".repeat(1000), "}".repeat(1000)),
            format!("RETURN {}1{}", "CASE WHEN true THEN ".repeat(1000), " END".repeat(1000)),
            format!("RETURN {}1{}", "abs(".repeat(1000), ")".repeat(1000)),
            format!("RETURN {}true", "NOT ".repeat(1000)),
            format!("RETURN {}x", "- ".repeat(1000)),
            format!("RETURN x{}", "[0".repeat(1000) + &"]".repeat(1000)),
        ] {
            let (message, _) = parse_err(&query);
            assert!(message.contains("nested too deeply"), "{message}");
        }
    }

    #[test]
    fn test_long_operator_chains_are_rejected() {
        let fine = format!("RETURN 1{}", " + 1".repeat(500));
        assert!(matches!(return_expr(&fine), Expression::Binary { op: BinaryOp::Add, .. }));
        // Chains restart for every item, so many short items are fine.
        parse_ok(&format!("RETURN {}", vec!["x + 1 AND y"; 2000].join(", ")));

        for query in [
            format!("RETURN 1{}", " + 1".repeat(5000)),
            format!("RETURN true{}", " AND true".repeat(5000)),
            format!("RETURN x{}", ".y".repeat(5000)),
            format!("RETURN 1{}", " < 1".repeat(5000)),
        ] {
            let (message, _) = parse_err(&query);
            assert!(message.contains("too many operators"), "{message}");
        }
    }

    #[test]
    fn test_nested_explain_fails_fast() {
        let (message, _) = parse_err(&format!("{}RETURN 1", "EXPLAIN ".repeat(10_000)));
        assert_eq!(message, "EXPLAIN cannot be nested");
    }
}
