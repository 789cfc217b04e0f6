//! Cypher abstract syntax tree.
//!
//! Operators reuse the executable [`BinaryOp`] and [`UnaryOp`] so the binder
//! does not have to translate them.

use trellis_common::utils::error::SourceSpan;
pub use trellis_core::execution::{BinaryOp, UnaryOp};

/// A top-level statement.
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Query(Query),
    /// Plan the inner statement and return the plan instead of running it.
    Explain(Box<Statement>),
    CreateNodeTable(CreateNodeTable),
    CreateRelTable(CreateRelTable),
    DropTable { name: String, span: SourceSpan },
    Begin,
    Commit,
    Rollback,
    Checkpoint,
}

impl Statement {
    /// Whether this is schema DDL (which runs in its own transaction).
    #[must_use]
    pub fn is_ddl(&self) -> bool {
        matches!(self, Self::CreateNodeTable(_) | Self::CreateRelTable(_) | Self::DropTable { .. })
    }
}

/// `CREATE NODE TABLE name (col TYPE, ..., PRIMARY KEY (col))`
#[derive(Debug, Clone, PartialEq)]
pub struct CreateNodeTable {
    pub name: String,
    pub columns: Vec<ColumnDef>,
    pub primary_key: String,
    pub span: SourceSpan,
}

/// `CREATE REL TABLE name (FROM A TO B, col TYPE, ...)`
#[derive(Debug, Clone, PartialEq)]
pub struct CreateRelTable {
    pub name: String,
    pub from: String,
    pub to: String,
    pub columns: Vec<ColumnDef>,
    pub span: SourceSpan,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDef {
    pub name: String,
    pub type_name: String,
    pub span: SourceSpan,
}

/// A read or read-write query: a sequence of clauses.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub clauses: Vec<Clause>,
}

impl Query {
    /// Whether any clause writes to the graph.
    #[must_use]
    pub fn is_write(&self) -> bool {
        self.clauses
            .iter()
            .any(|c| matches!(c, Clause::Create(_) | Clause::Set(_) | Clause::Delete(_)))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Clause {
    Match(MatchClause),
    Unwind(UnwindClause),
    With(ProjectionClause),
    Create(CreateClause),
    Set(SetClause),
    Delete(DeleteClause),
    Return(ProjectionClause),
}

#[derive(Debug, Clone, PartialEq)]
pub struct MatchClause {
    pub patterns: Vec<Pattern>,
    pub where_clause: Option<Expression>,
    pub span: SourceSpan,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UnwindClause {
    pub expression: Expression,
    pub alias: String,
    pub span: SourceSpan,
}

/// Shared shape of `WITH` and `RETURN`.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectionClause {
    pub distinct: bool,
    pub items: ProjectionItems,
    pub order_by: Vec<SortItem>,
    pub skip: Option<Expression>,
    pub limit: Option<Expression>,
    /// Only for `WITH`.
    pub where_clause: Option<Expression>,
    pub span: SourceSpan,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProjectionItems {
    /// `*`: every variable in scope.
    All,
    Explicit(Vec<ProjectionItem>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProjectionItem {
    pub expression: Expression,
    pub alias: Option<String>,
    /// The item's source text, used as its column name when unaliased.
    pub text: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SortItem {
    pub expression: Expression,
    pub descending: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateClause {
    pub patterns: Vec<Pattern>,
    pub span: SourceSpan,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SetClause {
    pub items: Vec<SetItem>,
    pub span: SourceSpan,
}

/// `variable.property = value`
#[derive(Debug, Clone, PartialEq)]
pub struct SetItem {
    pub variable: String,
    pub property: String,
    pub value: Expression,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeleteClause {
    pub detach: bool,
    pub expressions: Vec<Expression>,
    pub span: SourceSpan,
}

/// A path pattern: a node followed by zero or more hops.
#[derive(Debug, Clone, PartialEq)]
pub struct Pattern {
    pub start: NodePattern,
    pub chain: Vec<(RelationshipPattern, NodePattern)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NodePattern {
    pub variable: Option<String>,
    pub labels: Vec<String>,
    pub properties: Vec<(String, Expression)>,
    pub span: SourceSpan,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternDirection {
    /// `-[]->`
    Outgoing,
    /// `<-[]-`
    Incoming,
    /// `-[]-`
    Undirected,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RelationshipPattern {
    pub variable: Option<String>,
    /// Alternatives written as `:A|B`.
    pub types: Vec<String>,
    pub direction: PatternDirection,
    pub properties: Vec<(String, Expression)>,
    pub span: SourceSpan,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Literal(Literal),
    /// `$name`
    Parameter(String),
    Variable(String),
    Property {
        base: Box<Expression>,
        property: String,
    },
    Index {
        base: Box<Expression>,
        index: Box<Expression>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expression>,
    },
    Binary {
        left: Box<Expression>,
        op: BinaryOp,
        right: Box<Expression>,
    },
    IsNull {
        operand: Box<Expression>,
        negated: bool,
    },
    List(Vec<Expression>),
    Map(Vec<(String, Expression)>),
    Case {
        operand: Option<Box<Expression>>,
        branches: Vec<(Expression, Expression)>,
        default: Option<Box<Expression>>,
    },
    FunctionCall {
        name: String,
        distinct: bool,
        args: Vec<Expression>,
    },
    /// `count(*)`
    CountStar,
}

impl Expression {
    pub(crate) fn binary(left: Expression, op: BinaryOp, right: Expression) -> Self {
        Self::Binary {
            left: Box::new(left),
            op,
            right: Box::new(right),
        }
    }
}
