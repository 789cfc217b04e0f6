//! Semantic binding.
//!
//! The binder walks a parsed query clause by clause, resolving every name
//! against the catalog and the variables in scope. Each variable gets a slot
//! in the fixed-width rows the operators exchange; a `WITH` starts a new
//! query part whose variables are renumbered from zero. Parameters are
//! substituted as literals here, so the rest of the pipeline never sees them.
//!
//! Everything the planner needs comes out as a [`BoundQuery`]: resolved
//! patterns, predicates split into conjuncts, and projections with their
//! sort keys and aggregates already in slot terms.

use std::collections::HashMap;
use std::sync::Arc;

use smallvec::SmallVec;
use trellis_adapters::query::cypher::ast::{
    Clause, ColumnDef, CreateClause, CreateNodeTable, CreateRelTable, DeleteClause, Expression, Literal,
    MatchClause, NodePattern, Pattern, PatternDirection, ProjectionClause, ProjectionItems, Query,
    RelationshipPattern, SetClause, UnwindClause,
};
use trellis_common::types::{LogicalType, PropertyKey, TableId, Value};
use trellis_common::utils::error::{Error, QueryError, QueryErrorKind, Result, SourceSpan};
use trellis_common::utils::strings::suggestion_hint;
use trellis_core::execution::operators::{CreateStep, SetItem, SortKey};
use trellis_core::execution::{AggregateExpr, AggregateFunction, BinaryOp, Expr, Function, UnaryOp};
use trellis_core::graph::{Catalog, Direction, PropertyDef, TableSchema};

/// Query parameters by name, without the `$`.
pub type Params = HashMap<String, Value>;

const AGGREGATE_NAMES: &[&str] = &["count", "sum", "avg", "min", "max", "collect"];

/// A fully bound read or read-write query.
#[derive(Debug, Clone)]
pub struct BoundQuery {
    pub clauses: Vec<BoundClause>,
    /// Slots per row, enough for every query part.
    pub width: usize,
    pub columns: Vec<String>,
    pub column_types: Vec<LogicalType>,
}

#[derive(Debug, Clone)]
pub enum BoundClause {
    Match(BoundMatch),
    Unwind { expr: Expr, slot: usize },
    Create(Vec<CreateStep>),
    Set(Vec<SetItem>),
    Delete { slots: Vec<usize>, detach: bool },
    Project(BoundProjection),
}

#[derive(Debug, Clone)]
pub struct BoundMatch {
    pub patterns: Vec<BoundPattern>,
    /// `WHERE` and inline property conditions, as conjuncts.
    pub predicates: Vec<Expr>,
    /// Slots already holding values when the clause starts.
    pub bound: Vec<usize>,
}

/// A path pattern: `hops[i]` connects `nodes[i]` and `nodes[i + 1]`.
#[derive(Debug, Clone)]
pub struct BoundPattern {
    pub nodes: SmallVec<[BoundNode; 4]>,
    pub hops: SmallVec<[BoundHop; 4]>,
}

#[derive(Debug, Clone)]
pub struct BoundNode {
    pub slot: usize,
    /// Candidate node tables; empty means any.
    pub tables: Vec<TableId>,
    pub label: String,
}

#[derive(Debug, Clone)]
pub struct BoundHop {
    pub slot: Option<usize>,
    /// Candidate rel tables; empty means any.
    pub tables: Vec<TableId>,
    /// Seen from the left node towards the right one.
    pub direction: Direction,
    pub label: String,
}

/// `WITH` or `RETURN` in slot terms.
///
/// Without aggregation the pipeline is sort, project, distinct, skip/limit,
/// filter, with sort keys over the input slots. With aggregation it is
/// aggregate, project, sort, distinct, skip/limit, filter, with sort keys
/// over the projected columns.
#[derive(Debug, Clone)]
pub struct BoundProjection {
    pub aggregate: Option<BoundAggregate>,
    pub exprs: Vec<Expr>,
    pub order_by: Vec<SortKey>,
    pub distinct: bool,
    pub skip: usize,
    pub limit: Option<usize>,
    /// `WITH ... WHERE`, over the projected columns.
    pub filter: Option<Expr>,
}

#[derive(Debug, Clone)]
pub struct BoundAggregate {
    pub group_by: Vec<Expr>,
    pub aggregates: Vec<AggregateExpr>,
}

#[derive(Debug, Clone, PartialEq)]
enum VarKind {
    /// Candidate tables; empty means any node table.
    Node(Vec<TableId>),
    Rel(Vec<TableId>),
    Value(LogicalType),
}

impl VarKind {
    fn logical_type(&self) -> LogicalType {
        match self {
            Self::Node(_) => LogicalType::Node,
            Self::Rel(_) => LogicalType::Rel,
            Self::Value(ty) => ty.clone(),
        }
    }

    fn may_be_node(&self) -> bool {
        matches!(self, Self::Node(_) | Self::Value(LogicalType::Node | LogicalType::Any))
    }

    fn may_be_entity(&self) -> bool {
        matches!(
            self,
            Self::Node(_) | Self::Rel(_) | Self::Value(LogicalType::Node | LogicalType::Rel | LogicalType::Any)
        )
    }
}

#[derive(Debug, Clone)]
struct Variable {
    name: String,
    slot: usize,
    kind: VarKind,
}

/// Expressions already computed into a slot, matched structurally.
type Computed = Vec<(Expression, Expr, LogicalType)>;

/// How an expression is being bound.
struct ExprCtx<'c> {
    computed: &'c [(Expression, Expr, LogicalType)],
    /// Where aggregate calls go; `None` when they are not allowed.
    aggregates: Option<&'c mut Vec<AggregateExpr>>,
    /// Slot of the first aggregate in the aggregation output.
    base: usize,
    /// Variables must come from `computed` (after grouping).
    grouped: bool,
}

impl ExprCtx<'_> {
    fn plain() -> Self {
        ExprCtx {
            computed: &[],
            aggregates: None,
            base: 0,
            grouped: false,
        }
    }
}

fn binding_error(message: impl Into<String>) -> Error {
    Error::binding(message)
}

fn syntax_error(message: impl Into<String>, span: SourceSpan) -> Error {
    QueryError::new(QueryErrorKind::Syntax, message).with_span(span).into()
}

/// Adds `span` to a query error that has no location yet.
fn locate(err: Error, span: SourceSpan) -> Error {
    match err {
        Error::Query(q) if q.span.is_none() => Error::Query(q.with_span(span)),
        other => other,
    }
}

fn with_hint(err: QueryError, name: &str, candidates: &[&str]) -> Error {
    match suggestion_hint(name, candidates) {
        Some(hint) => err.with_hint(hint).into(),
        None => err.into(),
    }
}

fn contains_aggregate(expr: &Expression) -> bool {
    match expr {
        Expression::CountStar => true,
        Expression::FunctionCall { name, args, .. } => {
            AggregateFunction::from_name(name).is_some() || args.iter().any(contains_aggregate)
        }
        Expression::Literal(_) | Expression::Parameter(_) | Expression::Variable(_) => false,
        Expression::Property { base, .. } => contains_aggregate(base),
        Expression::Index { base, index } => contains_aggregate(base) || contains_aggregate(index),
        Expression::Unary { operand, .. } | Expression::IsNull { operand, .. } => contains_aggregate(operand),
        Expression::Binary { left, right, .. } => contains_aggregate(left) || contains_aggregate(right),
        Expression::List(items) => items.iter().any(contains_aggregate),
        Expression::Map(entries) => entries.iter().any(|(_, e)| contains_aggregate(e)),
        Expression::Case {
            operand,
            branches,
            default,
        } => {
            operand.as_deref().is_some_and(contains_aggregate)
                || branches.iter().any(|(w, t)| contains_aggregate(w) || contains_aggregate(t))
                || default.as_deref().is_some_and(contains_aggregate)
        }
    }
}

fn literal_value(lit: &Literal) -> Value {
    match lit {
        Literal::Null => Value::Null,
        Literal::Bool(b) => Value::Bool(*b),
        Literal::Integer(i) => Value::Int64(*i),
        Literal::Float(f) => Value::Float64(*f),
        Literal::String(s) => Value::from(s.as_str()),
    }
}

fn arithmetic_type(op: BinaryOp, left: &LogicalType, right: &LogicalType) -> LogicalType {
    use LogicalType as T;
    match (op, left, right) {
        (BinaryOp::Pow, _, _) => T::Float64,
        (_, T::Int64, T::Int64) => T::Int64,
        (_, T::Int64 | T::Float64, T::Int64 | T::Float64) => T::Float64,
        (BinaryOp::Add, T::String, T::String) => T::String,
        (BinaryOp::Add, T::List(a), T::List(b)) => T::List(Box::new(a.unify(b))),
        _ => T::Any,
    }
}

fn function_type(func: Function, args: &[LogicalType]) -> LogicalType {
    use LogicalType as T;
    match func {
        Function::Id | Function::Size | Function::ToInteger => T::Int64,
        Function::Label | Function::Lower | Function::Upper | Function::Trim | Function::ToString => T::String,
        Function::Substring => T::String,
        Function::ToFloat | Function::Round | Function::Floor | Function::Ceil | Function::Sqrt => T::Float64,
        Function::Abs => match args.first() {
            Some(T::Int64) => T::Int64,
            Some(T::Float64) => T::Float64,
            _ => T::Any,
        },
        Function::Coalesce => args
            .iter()
            .skip(1)
            .fold(args.first().cloned().unwrap_or(T::Any), |acc, t| acc.unify(t)),
        Function::Keys => T::List(Box::new(T::String)),
        Function::Range => T::List(Box::new(T::Int64)),
    }
}

fn aggregate_type(func: AggregateFunction, arg: &LogicalType) -> LogicalType {
    match func {
        AggregateFunction::Count | AggregateFunction::CountStar => LogicalType::Int64,
        AggregateFunction::Avg => LogicalType::Float64,
        AggregateFunction::Sum => match arg {
            LogicalType::Int64 | LogicalType::Float64 => arg.clone(),
            _ => LogicalType::Any,
        },
        AggregateFunction::Min | AggregateFunction::Max => arg.clone(),
        AggregateFunction::Collect => LogicalType::List(Box::new(arg.clone())),
    }
}

fn pattern_direction(direction: PatternDirection) -> Direction {
    match direction {
        PatternDirection::Outgoing => Direction::Outgoing,
        PatternDirection::Incoming => Direction::Incoming,
        PatternDirection::Undirected => Direction::Both,
    }
}

fn element_label(variable: Option<&str>, names: &[String]) -> String {
    let mut out = variable.unwrap_or("_").to_string();
    if !names.is_empty() {
        out.push(':');
        out.push_str(&names.join("|"));
    }
    out
}

/// Resolves names in one query against a catalog snapshot.
pub struct Binder<'a> {
    catalog: &'a Catalog,
    params: &'a Params,
    scope: Vec<Variable>,
    next_slot: usize,
    width: usize,
}

impl<'a> Binder<'a> {
    #[must_use]
    pub fn new(catalog: &'a Catalog, params: &'a Params) -> Self {
        Self {
            catalog,
            params,
            scope: Vec::new(),
            next_slot: 0,
            width: 0,
        }
    }

    /// Binds a query.
    ///
    /// # Errors
    ///
    /// Binding errors for unknown names and semantic violations; syntax
    /// errors for clause orders the grammar admits but Cypher does not.
    pub fn bind(mut self, query: &Query) -> Result<BoundQuery> {
        let mut clauses = Vec::with_capacity(query.clauses.len());
        let mut columns = Vec::new();
        let mut column_types = Vec::new();
        let last = query.clauses.len().saturating_sub(1);

        for (i, clause) in query.clauses.iter().enumerate() {
            let span = clause_span(clause);
            let bound = match clause {
                Clause::Match(m) => self.bind_match(m).map(BoundClause::Match),
                Clause::Unwind(u) => self.bind_unwind(u),
                Clause::Create(c) => self.bind_create(c).map(BoundClause::Create),
                Clause::Set(s) => self.bind_set(s).map(BoundClause::Set),
                Clause::Delete(d) => self.bind_delete(d),
                Clause::With(w) => self.bind_projection(w, false).map(|(p, _, _)| BoundClause::Project(p)),
                Clause::Return(r) => {
                    if i != last {
                        return Err(syntax_error("RETURN must be the last clause of a query", r.span));
                    }
                    self.bind_projection(r, true).map(|(p, names, types)| {
                        columns = names;
                        column_types = types;
                        BoundClause::Project(p)
                    })
                }
            };
            clauses.push(bound.map_err(|e| locate(e, span))?);
        }

        match query.clauses.last() {
            Some(Clause::Return(_) | Clause::Create(_) | Clause::Set(_) | Clause::Delete(_)) => {}
            Some(other) => {
                return Err(syntax_error(
                    "Query must end with RETURN or an updating clause (CREATE, SET, DELETE)",
                    clause_span(other),
                ));
            }
            None => return Err(syntax_error("Expected a Cypher clause", SourceSpan::default())),
        }

        Ok(BoundQuery {
            clauses,
            width: self.width.max(self.next_slot),
            columns,
            column_types,
        })
    }

    fn alloc(&mut self) -> usize {
        let slot = self.next_slot;
        self.next_slot += 1;
        self.width = self.width.max(self.next_slot);
        slot
    }

    fn lookup(&self, name: &str) -> Option<&Variable> {
        self.scope.iter().rev().find(|v| v.name == name)
    }

    fn declare(&mut self, name: &str, kind: VarKind) -> Result<usize> {
        if self.lookup(name).is_some() {
            return Err(binding_error(format!("Variable {name} is already declared")));
        }
        let slot = self.alloc();
        self.scope.push(Variable {
            name: name.to_string(),
            slot,
            kind,
        });
        Ok(slot)
    }

    fn undefined_variable(&self, name: &str) -> Error {
        let names: Vec<&str> = self.scope.iter().map(|v| v.name.as_str()).collect();
        with_hint(
            QueryError::new(QueryErrorKind::Binding, format!("Variable {name} is not defined")),
            name,
            &names,
        )
    }

    // === Tables and properties ===

    fn node_tables(&self, labels: &[String], span: SourceSpan) -> Result<Vec<TableId>> {
        labels
            .iter()
            .map(|l| self.catalog.node_table(l).map(|t| t.id).map_err(|e| locate(e, span)))
            .collect()
    }

    fn rel_tables(&self, types: &[String], span: SourceSpan) -> Result<Vec<TableId>> {
        types
            .iter()
            .map(|t| self.catalog.rel_table(t).map(|t| t.id).map_err(|e| locate(e, span)))
            .collect()
    }

    /// Checks that `key` exists on at least one candidate table and returns
    /// its type. Empty `tables` means every table of that kind.
    fn property_type(&self, tables: &[TableId], node: bool, key: &str) -> Result<LogicalType> {
        let candidates: Vec<&TableSchema> = if tables.is_empty() {
            if node {
                self.catalog.node_tables().map(|t| &**t).collect()
            } else {
                self.catalog.rel_tables().map(|t| &**t).collect()
            }
        } else {
            tables.iter().filter_map(|t| self.catalog.table(*t)).map(|t| &**t).collect()
        };
        let mut found: Option<LogicalType> = None;
        for table in &candidates {
            if let Some(def) = table.property(key) {
                found = Some(found.map_or_else(|| def.ty.clone(), |t| t.unify(&def.ty)));
            }
        }
        if let Some(ty) = found {
            return Ok(ty);
        }
        let owner = if candidates.is_empty() {
            if node { "any node table" } else { "any rel table" }.to_string()
        } else {
            candidates.iter().map(|t| t.name.as_str()).collect::<Vec<_>>().join("|")
        };
        let known: Vec<&str> = candidates
            .iter()
            .flat_map(|t| t.properties.iter().map(|p| p.name.as_str()))
            .collect();
        Err(with_hint(
            QueryError::new(
                QueryErrorKind::Binding,
                format!("Property {key} does not exist on {owner}"),
            ),
            key,
            &known,
        ))
    }

    fn entity_property_type(&self, kind: &VarKind, key: &str) -> Result<LogicalType> {
        match kind {
            VarKind::Node(tables) => self.property_type(tables, true, key),
            VarKind::Rel(tables) => self.property_type(tables, false, key),
            VarKind::Value(_) => Ok(LogicalType::Any),
        }
    }

    // === Expressions ===

    fn bind_expr(&mut self, expr: &Expression, ctx: &mut ExprCtx<'_>) -> Result<(Expr, LogicalType)> {
        if let Some((_, bound, ty)) = ctx.computed.iter().find(|(ast, _, _)| ast == expr) {
            return Ok((bound.clone(), ty.clone()));
        }
        match expr {
            Expression::Literal(lit) => {
                let value = literal_value(lit);
                let ty = value.logical_type();
                Ok((Expr::Literal(value), ty))
            }
            Expression::Parameter(name) => {
                let value = self
                    .params
                    .get(name)
                    .cloned()
                    .ok_or_else(|| binding_error(format!("Parameter ${name} was not provided")))?;
                let ty = value.logical_type();
                Ok((Expr::Literal(value), ty))
            }
            Expression::Variable(name) => {
                if ctx.grouped {
                    return Err(binding_error(format!(
                        "Variable {name} must appear as a grouping key or inside an aggregate function"
                    )));
                }
                let var = self.lookup(name).ok_or_else(|| self.undefined_variable(name))?;
                Ok((Expr::Column(var.slot), var.kind.logical_type()))
            }
            Expression::Property { base, property } => {
                let shadowed = ctx.computed.iter().any(|(ast, _, _)| ast == base.as_ref());
                let known = match base.as_ref() {
                    Expression::Variable(name) if !ctx.grouped && !shadowed => {
                        self.lookup(name).map(|v| v.kind.clone())
                    }
                    _ => None,
                };
                let (input, _) = self.bind_expr(base, ctx)?;
                let ty = match known {
                    Some(kind) => self.entity_property_type(&kind, property)?,
                    None => LogicalType::Any,
                };
                Ok((Expr::property(input, property.as_str()), ty))
            }
            Expression::Index { base, index } => {
                let (input, base_ty) = self.bind_expr(base, ctx)?;
                let (index, _) = self.bind_expr(index, ctx)?;
                let ty = match base_ty {
                    LogicalType::List(inner) => *inner,
                    LogicalType::String => LogicalType::String,
                    _ => LogicalType::Any,
                };
                Ok((
                    Expr::Index {
                        input: Box::new(input),
                        index: Box::new(index),
                    },
                    ty,
                ))
            }
            Expression::Unary { op, operand } => {
                let (operand, ty) = self.bind_expr(operand, ctx)?;
                let ty = if *op == UnaryOp::Not { LogicalType::Bool } else { ty };
                Ok((
                    Expr::Unary {
                        op: *op,
                        operand: Box::new(operand),
                    },
                    ty,
                ))
            }
            Expression::Binary { left, op, right } => {
                let (l, lt) = self.bind_expr(left, ctx)?;
                let (r, rt) = self.bind_expr(right, ctx)?;
                let ty = match op {
                    BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod | BinaryOp::Pow => {
                        arithmetic_type(*op, &lt, &rt)
                    }
                    _ => LogicalType::Bool,
                };
                Ok((Expr::binary(*op, l, r), ty))
            }
            Expression::IsNull { operand, negated } => {
                let (operand, _) = self.bind_expr(operand, ctx)?;
                Ok((
                    Expr::IsNull {
                        operand: Box::new(operand),
                        negated: *negated,
                    },
                    LogicalType::Bool,
                ))
            }
            Expression::List(items) => {
                let mut exprs = Vec::with_capacity(items.len());
                let mut elem: Option<LogicalType> = None;
                for item in items {
                    let (e, t) = self.bind_expr(item, ctx)?;
                    exprs.push(e);
                    elem = Some(elem.map_or(t.clone(), |acc| acc.unify(&t)));
                }
                Ok((Expr::List(exprs), LogicalType::List(Box::new(elem.unwrap_or(LogicalType::Any)))))
            }
            Expression::Map(entries) => {
                let mut out = Vec::with_capacity(entries.len());
                for (key, value) in entries {
                    let (e, _) = self.bind_expr(value, ctx)?;
                    out.push((PropertyKey::new(key.as_str()), e));
                }
                Ok((Expr::Map(out), LogicalType::Map))
            }
            Expression::Case {
                operand,
                branches,
                default,
            } => {
                let operand = match operand {
                    Some(o) => Some(Box::new(self.bind_expr(o, ctx)?.0)),
                    None => None,
                };
                let mut bound = Vec::with_capacity(branches.len());
                let mut ty: Option<LogicalType> = None;
                for (when, then) in branches {
                    let (w, _) = self.bind_expr(when, ctx)?;
                    let (t, tt) = self.bind_expr(then, ctx)?;
                    ty = Some(ty.map_or(tt.clone(), |acc| acc.unify(&tt)));
                    bound.push((w, t));
                }
                let default = match default {
                    Some(d) => {
                        let (e, dt) = self.bind_expr(d, ctx)?;
                        ty = Some(ty.map_or(dt.clone(), |acc| acc.unify(&dt)));
                        Some(Box::new(e))
                    }
                    None => None,
                };
                Ok((
                    Expr::Case {
                        operand,
                        branches: bound,
                        default,
                    },
                    ty.unwrap_or(LogicalType::Any),
                ))
            }
            Expression::CountStar => self.bind_aggregate(AggregateFunction::CountStar, false, &[], ctx),
            Expression::FunctionCall { name, distinct, args } => {
                if let Some(func) = AggregateFunction::from_name(name) {
                    return self.bind_aggregate(func, *distinct, args, ctx);
                }
                let Some(func) = Function::from_name(name) else {
                    let mut known: Vec<&str> = Function::NAMES.to_vec();
                    known.extend_from_slice(AGGREGATE_NAMES);
                    return Err(with_hint(
                        QueryError::new(QueryErrorKind::Binding, format!("Unknown function {name}")),
                        &name.to_ascii_lowercase(),
                        &known,
                    ));
                };
                if *distinct {
                    return Err(binding_error(format!(
                        "DISTINCT is only allowed in aggregate functions, not in {name}"
                    )));
                }
                let (min, max) = func.arity();
                if args.len() < min || args.len() > max {
                    let expected = if min == max {
                        format!("{min}")
                    } else if max == usize::MAX {
                        format!("at least {min}")
                    } else {
                        format!("{min} to {max}")
                    };
                    return Err(binding_error(format!(
                        "Function {} expects {expected} argument{}, got {}",
                        func.name(),
                        if expected == "1" { "" } else { "s" },
                        args.len()
                    )));
                }
                let mut bound = Vec::with_capacity(args.len());
                let mut types = Vec::with_capacity(args.len());
                for arg in args {
                    let (e, t) = self.bind_expr(arg, ctx)?;
                    bound.push(e);
                    types.push(t);
                }
                let ty = function_type(func, &types);
                Ok((Expr::Function { func, args: bound }, ty))
            }
        }
    }

    fn bind_aggregate(
        &mut self,
        func: AggregateFunction,
        distinct: bool,
        args: &[Expression],
        ctx: &mut ExprCtx<'_>,
    ) -> Result<(Expr, LogicalType)> {
        let Some(aggregates) = ctx.aggregates.as_deref_mut() else {
            return Err(binding_error(format!(
                "Aggregate function {}() is not allowed here",
                func.name()
            )));
        };
        let arg = if func == AggregateFunction::CountStar {
            None
        } else {
            if args.len() != 1 {
                return Err(binding_error(format!(
                    "Function {} expects 1 argument, got {}",
                    func.name(),
                    args.len()
                )));
            }
            if contains_aggregate(&args[0]) {
                return Err(binding_error("Aggregate functions cannot be nested"));
            }
            Some(&args[0])
        };
        // Arguments read the rows before grouping.
        let (arg, arg_ty) = match arg {
            Some(a) => {
                let (e, t) = self.bind_expr(a, &mut ExprCtx::plain())?;
                (Some(e), t)
            }
            None => (None, LogicalType::Any),
        };
        let agg = AggregateExpr {
            function: func,
            arg,
            distinct,
        };
        let position = match aggregates.iter().position(|a| *a == agg) {
            Some(existing) => existing,
            None => {
                aggregates.push(agg);
                aggregates.len() - 1
            }
        };
        Ok((Expr::Column(ctx.base + position), aggregate_type(func, &arg_ty)))
    }

    fn bind_plain(&mut self, expr: &Expression) -> Result<(Expr, LogicalType)> {
        self.bind_expr(expr, &mut ExprCtx::plain())
    }

    // === Clauses ===

    fn bind_match(&mut self, clause: &MatchClause) -> Result<BoundMatch> {
        let bound = self.scope.iter().map(|v| v.slot).collect();
        let mut predicates = Vec::new();
        let mut patterns = Vec::with_capacity(clause.patterns.len());
        for pattern in &clause.patterns {
            patterns.push(self.bind_match_pattern(pattern, &mut predicates)?);
        }
        if let Some(condition) = &clause.where_clause {
            let (expr, _) = self.bind_plain(condition)?;
            predicates.extend(expr.into_conjuncts());
        }
        Ok(BoundMatch {
            patterns,
            predicates,
            bound,
        })
    }

    fn bind_match_pattern(&mut self, pattern: &Pattern, predicates: &mut Vec<Expr>) -> Result<BoundPattern> {
        let mut nodes = SmallVec::new();
        let mut hops = SmallVec::new();
        nodes.push(self.bind_match_node(&pattern.start, predicates)?);
        for (rel, node) in &pattern.chain {
            hops.push(self.bind_match_rel(rel, predicates)?);
            nodes.push(self.bind_match_node(node, predicates)?);
        }
        Ok(BoundPattern { nodes, hops })
    }

    fn property_predicates(
        &mut self,
        slot: usize,
        kind: &VarKind,
        properties: &[(String, Expression)],
        predicates: &mut Vec<Expr>,
    ) -> Result<()> {
        for (key, value) in properties {
            self.entity_property_type(kind, key)?;
            let (value, _) = self.bind_plain(value)?;
            predicates.push(Expr::binary(
                BinaryOp::Eq,
                Expr::property(Expr::Column(slot), key.as_str()),
                value,
            ));
        }
        Ok(())
    }

    fn bind_match_node(&mut self, node: &NodePattern, predicates: &mut Vec<Expr>) -> Result<BoundNode> {
        let tables = self.node_tables(&node.labels, node.span)?;
        let label = element_label(node.variable.as_deref(), &node.labels);
        let existing = node.variable.as_deref().and_then(|name| self.lookup(name)).cloned();

        let (slot, kind) = match (existing, node.variable.as_deref()) {
            (Some(var), _) => {
                if !var.kind.may_be_node() {
                    return Err(binding_error(format!("Variable {} is not a node", var.name)));
                }
                if !node.labels.is_empty() {
                    let names = node.labels.iter().map(|l| Value::from(l.as_str())).collect::<Vec<_>>();
                    predicates.push(Expr::binary(
                        BinaryOp::In,
                        Expr::Function {
                            func: Function::Label,
                            args: vec![Expr::Column(var.slot)],
                        },
                        Expr::Literal(Value::List(names.into())),
                    ));
                }
                let slot = var.slot;
                let kind = match var.kind {
                    VarKind::Node(_) => var.kind,
                    _ => VarKind::Node(tables.clone()),
                };
                (slot, kind)
            }
            (None, Some(name)) => {
                let kind = VarKind::Node(tables.clone());
                (self.declare(name, kind.clone())?, kind)
            }
            (None, None) => (self.alloc(), VarKind::Node(tables.clone())),
        };
        self.property_predicates(slot, &kind, &node.properties, predicates)
            .map_err(|e| locate(e, node.span))?;
        Ok(BoundNode { slot, tables, label })
    }

    fn bind_match_rel(&mut self, rel: &RelationshipPattern, predicates: &mut Vec<Expr>) -> Result<BoundHop> {
        let tables = self.rel_tables(&rel.types, rel.span)?;
        let kind = VarKind::Rel(tables.clone());
        let slot = match rel.variable.as_deref() {
            Some(name) => {
                if self.lookup(name).is_some() {
                    return Err(locate(
                        binding_error(format!(
                            "Variable {name} is already bound; a relationship variable can be matched only once"
                        )),
                        rel.span,
                    ));
                }
                Some(self.declare(name, kind.clone())?)
            }
            None if !rel.properties.is_empty() => Some(self.alloc()),
            None => None,
        };
        if let Some(slot) = slot {
            self.property_predicates(slot, &kind, &rel.properties, predicates)
                .map_err(|e| locate(e, rel.span))?;
        }
        Ok(BoundHop {
            slot,
            tables,
            direction: pattern_direction(rel.direction),
            label: format!("[{}]", element_label(rel.variable.as_deref(), &rel.types)),
        })
    }

    fn bind_unwind(&mut self, clause: &UnwindClause) -> Result<BoundClause> {
        let (expr, ty) = self.bind_plain(&clause.expression)?;
        let elem = match ty {
            LogicalType::List(inner) => *inner,
            other => other,
        };
        let slot = self.declare(&clause.alias, VarKind::Value(elem))?;
        Ok(BoundClause::Unwind { expr, slot })
    }

    fn bind_create(&mut self, clause: &CreateClause) -> Result<Vec<CreateStep>> {
        let mut steps = Vec::new();
        for pattern in &clause.patterns {
            let mut prev = self.bind_create_node(&pattern.start, &mut steps)?;
            for (rel, node) in &pattern.chain {
                let next = self.bind_create_node(node, &mut steps)?;
                self.bind_create_rel(rel, prev, next, &mut steps)
                    .map_err(|e| locate(e, rel.span))?;
                prev = next;
            }
        }
        Ok(steps)
    }

    fn bind_properties(&mut self, schema: &TableSchema, properties: &[(String, Expression)]) -> Result<Vec<(PropertyKey, Expr)>> {
        let mut out = Vec::with_capacity(properties.len());
        let kind = if schema.is_node() {
            VarKind::Node(vec![schema.id])
        } else {
            VarKind::Rel(vec![schema.id])
        };
        for (key, value) in properties {
            self.entity_property_type(&kind, key)?;
            let (value, _) = self.bind_plain(value)?;
            out.push((PropertyKey::new(key.as_str()), value));
        }
        Ok(out)
    }

    fn bind_create_node(&mut self, node: &NodePattern, steps: &mut Vec<CreateStep>) -> Result<usize> {
        if let Some(name) = node.variable.as_deref()
            && let Some(var) = self.lookup(name).cloned()
        {
            if !node.labels.is_empty() || !node.properties.is_empty() {
                return Err(locate(
                    binding_error(format!("Variable {name} is already declared")),
                    node.span,
                ));
            }
            if !var.kind.may_be_node() {
                return Err(locate(binding_error(format!("Variable {name} is not a node")), node.span));
            }
            return Ok(var.slot);
        }
        let [label] = node.labels.as_slice() else {
            return Err(locate(
                binding_error(format!(
                    "Create node {} requires exactly one node table label",
                    element_label(node.variable.as_deref(), &node.labels)
                )),
                node.span,
            ));
        };
        let schema = Arc::clone(self.catalog.node_table(label).map_err(|e| locate(e, node.span))?);
        let properties = self
            .bind_properties(&schema, &node.properties)
            .map_err(|e| locate(e, node.span))?;
        let slot = match node.variable.as_deref() {
            Some(name) => self.declare(name, VarKind::Node(vec![schema.id]))?,
            None => self.alloc(),
        };
        steps.push(CreateStep::Node {
            slot,
            table: schema.id,
            properties,
        });
        Ok(slot)
    }

    fn bind_create_rel(
        &mut self,
        rel: &RelationshipPattern,
        left: usize,
        right: usize,
        steps: &mut Vec<CreateStep>,
    ) -> Result<()> {
        let [rel_type] = rel.types.as_slice() else {
            return Err(binding_error("Relationships created by CREATE must have exactly one type"));
        };
        let (src_slot, dst_slot) = match rel.direction {
            PatternDirection::Outgoing => (left, right),
            PatternDirection::Incoming => (right, left),
            PatternDirection::Undirected => {
                return Err(binding_error("Relationships created by CREATE must have a direction"));
            }
        };
        let schema = Arc::clone(self.catalog.rel_table(rel_type)?);
        let properties = self.bind_properties(&schema, &rel.properties)?;
        let slot = match rel.variable.as_deref() {
            Some(name) => Some(self.declare(name, VarKind::Rel(vec![schema.id]))?),
            None => None,
        };
        steps.push(CreateStep::Edge {
            slot,
            table: schema.id,
            src_slot,
            dst_slot,
            properties,
        });
        Ok(())
    }

    fn bind_set(&mut self, clause: &SetClause) -> Result<Vec<SetItem>> {
        let mut items = Vec::with_capacity(clause.items.len());
        for item in &clause.items {
            let var = self
                .lookup(&item.variable)
                .cloned()
                .ok_or_else(|| self.undefined_variable(&item.variable))?;
            if !var.kind.may_be_entity() {
                return Err(binding_error(format!(
                    "SET expects a node or relationship, but {} is {}",
                    var.name,
                    var.kind.logical_type()
                )));
            }
            self.entity_property_type(&var.kind, &item.property)?;
            let (value, _) = self.bind_plain(&item.value)?;
            items.push(SetItem {
                slot: var.slot,
                key: PropertyKey::new(item.property.as_str()),
                value,
            });
        }
        Ok(items)
    }

    fn bind_delete(&mut self, clause: &DeleteClause) -> Result<BoundClause> {
        let mut slots = Vec::with_capacity(clause.expressions.len());
        for expr in &clause.expressions {
            let Expression::Variable(name) = expr else {
                return Err(binding_error("DELETE expects a node or relationship variable"));
            };
            let var = self.lookup(name).ok_or_else(|| self.undefined_variable(name))?;
            if !var.kind.may_be_entity() {
                return Err(binding_error(format!(
                    "DELETE expects a node or relationship, but {name} is {}",
                    var.kind.logical_type()
                )));
            }
            if !slots.contains(&var.slot) {
                slots.push(var.slot);
            }
        }
        Ok(BoundClause::Delete {
            slots,
            detach: clause.detach,
        })
    }

    /// Evaluates a `SKIP` or `LIMIT` argument, which must be a constant.
    fn bind_count(&mut self, expr: &Expression, what: &str) -> Result<usize> {
        let (bound, _) = self.bind_plain(expr)?;
        let mut columns = Vec::new();
        bound.collect_columns(&mut columns);
        if !columns.is_empty() {
            return Err(binding_error(format!("{what} must be a constant or a parameter")));
        }
        let value = bound.eval(&[]).map_err(Error::from)?;
        match value {
            Value::Int64(n) if n >= 0 => usize::try_from(n).map_err(|_| binding_error(format!("{what} is too large"))),
            other => Err(binding_error(format!(
                "{what} expects a non-negative integer, got {other}"
            ))),
        }
    }

    /// Binds `WITH` or `RETURN`. Returns the projection plus the output
    /// column names and types.
    fn bind_projection(
        &mut self,
        clause: &ProjectionClause,
        is_return: bool,
    ) -> Result<(BoundProjection, Vec<String>, Vec<LogicalType>)> {
        let keyword = if is_return { "RETURN" } else { "WITH" };
        let items: Vec<(Expression, String, bool)> = match &clause.items {
            ProjectionItems::All => {
                let vars: Vec<(Expression, String, bool)> = self
                    .scope
                    .iter()
                    .map(|v| (Expression::Variable(v.name.clone()), v.name.clone(), false))
                    .collect();
                if vars.is_empty() {
                    return Err(binding_error(format!(
                        "{keyword} * is not allowed when there are no variables in scope"
                    )));
                }
                vars
            }
            ProjectionItems::Explicit(items) => items
                .iter()
                .map(|item| {
                    let name = item.alias.clone().unwrap_or_else(|| item.text.clone());
                    (item.expression.clone(), name, item.alias.is_some())
                })
                .collect(),
        };

        for (i, (expr, name, aliased)) in items.iter().enumerate() {
            if !is_return && !aliased && !matches!(expr, Expression::Variable(_)) {
                return Err(binding_error(format!(
                    "Expression {name} in WITH must be aliased (use AS)"
                )));
            }
            if items[..i].iter().any(|(_, other, _)| other == name) {
                return Err(QueryError::new(QueryErrorKind::Binding, format!("Duplicate column name {name}"))
                    .with_hint("use AS to give each column a distinct name")
                    .into());
            }
        }

        let aggregating = items.iter().any(|(e, _, _)| contains_aggregate(e));
        let mut exprs = Vec::with_capacity(items.len());
        let mut types = Vec::with_capacity(items.len());
        let mut aggregate = None;
        let order_by;

        if aggregating {
            let mut keys: Computed = Vec::new();
            let mut group_by = Vec::new();
            for (expr, _, _) in &items {
                if !contains_aggregate(expr) {
                    let (bound, ty) = self.bind_plain(expr)?;
                    keys.push((expr.clone(), Expr::Column(group_by.len()), ty));
                    group_by.push(bound);
                }
            }
            let mut aggregates = Vec::new();
            for (expr, _, _) in &items {
                let mut ctx = ExprCtx {
                    computed: &keys,
                    aggregates: Some(&mut aggregates),
                    base: group_by.len(),
                    grouped: true,
                };
                let (bound, ty) = self.bind_expr(expr, &mut ctx)?;
                exprs.push(bound);
                types.push(ty);
            }
            self.width = self.width.max(group_by.len() + aggregates.len());

            let mut outputs: Computed = Vec::new();
            for (i, (expr, name, aliased)) in items.iter().enumerate() {
                outputs.push((expr.clone(), Expr::Column(i), types[i].clone()));
                if *aliased {
                    outputs.push((Expression::Variable(name.clone()), Expr::Column(i), types[i].clone()));
                }
            }
            let mut keys_out = Vec::with_capacity(clause.order_by.len());
            for item in &clause.order_by {
                let mut ctx = ExprCtx {
                    computed: &outputs,
                    aggregates: None,
                    base: 0,
                    grouped: true,
                };
                let (expr, _) = self.bind_expr(&item.expression, &mut ctx)?;
                keys_out.push(SortKey {
                    expr,
                    descending: item.descending,
                });
            }
            order_by = keys_out;
            aggregate = Some(BoundAggregate { group_by, aggregates });
        } else {
            for (expr, _, _) in &items {
                let (bound, ty) = self.bind_plain(expr)?;
                exprs.push(bound);
                types.push(ty);
            }
            // Aliases shadow input variables of the same name.
            let aliases: Computed = items
                .iter()
                .zip(&exprs)
                .zip(&types)
                .filter(|(((_, _, aliased), _), _)| *aliased)
                .map(|(((_, name, _), e), t)| (Expression::Variable(name.clone()), e.clone(), t.clone()))
                .collect();
            let mut keys_out = Vec::with_capacity(clause.order_by.len());
            for item in &clause.order_by {
                let mut ctx = ExprCtx {
                    computed: &aliases,
                    aggregates: None,
                    base: 0,
                    grouped: false,
                };
                let (expr, _) = self.bind_expr(&item.expression, &mut ctx)?;
                keys_out.push(SortKey {
                    expr,
                    descending: item.descending,
                });
            }
            order_by = keys_out;
        }
        self.width = self.width.max(items.len());

        let skip = match &clause.skip {
            Some(e) => self.bind_count(e, "SKIP")?,
            None => 0,
        };
        let limit = match &clause.limit {
            Some(e) => Some(self.bind_count(e, "LIMIT")?),
            None => None,
        };

        // The next query part sees only the projected columns.
        let scope: Vec<Variable> = items
            .iter()
            .enumerate()
            .map(|(slot, (expr, name, _))| {
                let kind = match expr {
                    Expression::Variable(v) => self
                        .lookup(v)
                        .map_or_else(|| VarKind::Value(types[slot].clone()), |var| var.kind.clone()),
                    _ => VarKind::Value(types[slot].clone()),
                };
                Variable {
                    name: name.clone(),
                    slot,
                    kind,
                }
            })
            .collect();
        self.scope = scope;
        self.next_slot = items.len();

        let filter = match &clause.where_clause {
            Some(condition) => Some(self.bind_plain(condition)?.0),
            None => None,
        };

        let names = items.into_iter().map(|(_, name, _)| name).collect();
        Ok((
            BoundProjection {
                aggregate,
                exprs,
                order_by,
                distinct: clause.distinct,
                skip,
                limit,
                filter,
            },
            names,
            types,
        ))
    }
}

fn clause_span(clause: &Clause) -> SourceSpan {
    match clause {
        Clause::Match(m) => m.span,
        Clause::Unwind(u) => u.span,
        Clause::With(p) | Clause::Return(p) => p.span,
        Clause::Create(c) => c.span,
        Clause::Set(s) => s.span,
        Clause::Delete(d) => d.span,
    }
}

// === DDL ===

fn property_defs(columns: &[ColumnDef]) -> Result<Vec<PropertyDef>> {
    columns
        .iter()
        .map(|c| {
            let ty = LogicalType::from_type_name(&c.type_name).ok_or_else(|| {
                Error::from(
                    QueryError::new(QueryErrorKind::Binding, format!("Unknown type {}", c.type_name))
                        .with_span(c.span),
                )
            })?;
            Ok(PropertyDef::new(c.name.as_str(), ty))
        })
        .collect()
}

/// Translates `CREATE NODE TABLE` into a schema.
///
/// # Errors
///
/// Unknown type names and an unusable primary key.
pub fn bind_node_table(stmt: &CreateNodeTable) -> Result<TableSchema> {
    let properties = property_defs(&stmt.columns)?;
    TableSchema::node(stmt.name.as_str(), properties, &stmt.primary_key).map_err(|e| locate(e, stmt.span))
}

/// Translates `CREATE REL TABLE` into a schema.
///
/// # Errors
///
/// Unknown endpoint tables and unknown type names.
pub fn bind_rel_table(catalog: &Catalog, stmt: &CreateRelTable) -> Result<TableSchema> {
    let from = catalog.node_table(&stmt.from).map_err(|e| locate(e, stmt.span))?.id;
    let to = catalog.node_table(&stmt.to).map_err(|e| locate(e, stmt.span))?.id;
    let properties = property_defs(&stmt.columns)?;
    TableSchema::rel(stmt.name.as_str(), from, to, properties).map_err(|e| locate(e, stmt.span))
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_adapters::query::cypher::ast::Statement;
    use trellis_adapters::query::cypher::parse;

    fn catalog() -> Catalog {
        let person = TableSchema::node(
            "Person",
            vec![
                PropertyDef::new("name", LogicalType::String),
                PropertyDef::new("age", LogicalType::Int64),
            ],
            "name",
        )
        .unwrap();
        let (catalog, person_id) = Catalog::new().with_table(person).unwrap();
        let city = TableSchema::node("City", vec![PropertyDef::new("name", LogicalType::String)], "name").unwrap();
        let (catalog, city_id) = catalog.with_table(city).unwrap();
        let knows = TableSchema::rel(
            "Knows",
            person_id,
            person_id,
            vec![PropertyDef::new("since", LogicalType::Int64)],
        )
        .unwrap();
        let (catalog, _) = catalog.with_table(knows).unwrap();
        let lives = TableSchema::rel("LivesIn", person_id, city_id, Vec::new()).unwrap();
        catalog.with_table(lives).unwrap().0
    }

    fn bind_with(query: &str, params: &Params) -> Result<BoundQuery> {
        let Statement::Query(q) = parse(query)? else {
            panic!("not a query: {query}");
        };
        let catalog = catalog();
        Binder::new(&catalog, params).bind(&q)
    }

    fn bind(query: &str) -> Result<BoundQuery> {
        bind_with(query, &Params::new())
    }

    fn binding_message(query: &str) -> (String, Option<String>) {
        match bind(query) {
            Err(Error::Query(QueryError {
                kind: QueryErrorKind::Binding,
                message,
                hint,
                ..
            })) => (message, hint),
            other => panic!("expected a binding error for {query}, got {other:?}"),
        }
    }

    #[test]
    fn test_return_literal() {
        let bound = bind("RETURN 1").unwrap();
        assert_eq!(bound.columns, vec!["1".to_string()]);
        assert_eq!(bound.column_types, vec![LogicalType::Int64]);
        assert_eq!(bound.width, 1);
    }

    #[test]
    fn test_match_slots_and_types() {
        let bound = bind("MATCH (a:Person)-[k:Knows]->(b:Person) RETURN a.name, k.since, b").unwrap();
        assert_eq!(bound.columns, vec!["a.name", "k.since", "b"]);
        assert_eq!(
            bound.column_types,
            vec![LogicalType::String, LogicalType::Int64, LogicalType::Node]
        );
        let BoundClause::Match(m) = &bound.clauses[0] else {
            panic!("expected MATCH");
        };
        assert_eq!(m.patterns[0].nodes.len(), 2);
        assert_eq!(m.patterns[0].hops[0].slot, Some(1));
        assert_eq!(m.patterns[0].hops[0].direction, Direction::Outgoing);
        assert!(m.bound.is_empty());
    }

    #[test]
    fn test_unknown_table_has_hint() {
        let (message, hint) = binding_message("MATCH (p:Peson) RETURN p");
        assert_eq!(message, "Node table Peson does not exist");
        assert_eq!(hint.as_deref(), Some("did you mean 'Person'?"));

        let (message, _) = binding_message("MATCH (p:Person)-[:Person]->(q) RETURN p");
        assert_eq!(message, "Rel table Person does not exist");
    }

    #[test]
    fn test_unknown_property_and_variable() {
        let (message, hint) = binding_message("MATCH (p:Person) RETURN p.nme");
        assert_eq!(message, "Property nme does not exist on Person");
        assert_eq!(hint.as_deref(), Some("did you mean 'name'?"));

        let (message, hint) = binding_message("MATCH (person:Person) RETURN persn");
        assert_eq!(message, "Variable persn is not defined");
        assert!(hint.is_some());
    }

    #[test]
    fn test_unknown_parameter() {
        let (message, _) = binding_message("RETURN $missing");
        assert_eq!(message, "Parameter $missing was not provided");

        let mut params = Params::new();
        params.insert("x".into(), Value::Int64(7));
        let bound = bind_with("RETURN $x AS x", &params).unwrap();
        let BoundClause::Project(p) = &bound.clauses[0] else {
            panic!("expected a projection");
        };
        assert_eq!(p.exprs, vec![Expr::Literal(Value::Int64(7))]);
    }

    #[test]
    fn test_duplicate_columns() {
        let (message, _) = binding_message("MATCH (p:Person) RETURN p.name, p.name");
        assert_eq!(message, "Duplicate column name p.name");
        assert!(bind("MATCH (p:Person) RETURN p.name, p.name AS again").is_ok());
    }

    #[test]
    fn test_function_checks() {
        let (message, hint) = binding_message("RETURN lowr('A')");
        assert_eq!(message, "Unknown function lowr");
        assert_eq!(hint.as_deref(), Some("did you mean 'lower'?"));

        let (message, _) = binding_message("RETURN lower('A', 'B')");
        assert_eq!(message, "Function lower expects 1 argument, got 2");

        let (message, _) = binding_message("RETURN substring('abc')");
        assert_eq!(message, "Function substring expects 2 to 3 arguments, got 1");
    }

    #[test]
    fn test_aggregate_grouping() {
        let bound = bind("MATCH (p:Person) RETURN p.age AS age, count(*) AS n ORDER BY n DESC").unwrap();
        let BoundClause::Project(p) = &bound.clauses[1] else {
            panic!("expected a projection");
        };
        let agg = p.aggregate.as_ref().unwrap();
        assert_eq!(agg.group_by.len(), 1);
        assert_eq!(agg.aggregates.len(), 1);
        assert_eq!(p.exprs, vec![Expr::Column(0), Expr::Column(1)]);
        assert_eq!(p.order_by[0].expr, Expr::Column(1));
        assert_eq!(bound.column_types, vec![LogicalType::Int64, LogicalType::Int64]);
    }

    #[test]
    fn test_ungrouped_variable_in_aggregate_item() {
        let (message, _) = binding_message("MATCH (p:Person) RETURN p.age + count(*)");
        assert!(message.contains("grouping key or inside an aggregate"), "{message}");
        assert!(bind("MATCH (p:Person) RETURN p.age, p.age + count(*) AS x").is_ok());
    }

    #[test]
    fn test_aggregate_placement() {
        let (message, _) = binding_message("MATCH (p:Person) WHERE count(*) > 1 RETURN p");
        assert_eq!(message, "Aggregate function count() is not allowed here");
        let (message, _) = binding_message("MATCH (p:Person) RETURN sum(count(*))");
        assert_eq!(message, "Aggregate functions cannot be nested");
    }

    #[test]
    fn test_with_renumbers_slots() {
        let bound = bind("MATCH (a:Person)-[:Knows]->(b:Person) WITH b AS friend RETURN friend.name").unwrap();
        let BoundClause::Project(with) = &bound.clauses[1] else {
            panic!("expected WITH");
        };
        // The anonymous relationship binds no slot, so `b` sits right after `a`.
        assert_eq!(with.exprs, vec![Expr::Column(1)]);
        let BoundClause::Project(ret) = &bound.clauses[2] else {
            panic!("expected RETURN");
        };
        assert_eq!(ret.exprs, vec![Expr::property(Expr::Column(0), "name")]);
        assert_eq!(bound.column_types, vec![LogicalType::String]);

        let named = bind("MATCH (a:Person)-[k:Knows]->(b:Person) WITH b AS friend RETURN friend.name").unwrap();
        let BoundClause::Project(with) = &named.clauses[1] else {
            panic!("expected WITH");
        };
        assert_eq!(with.exprs, vec![Expr::Column(2)]);
    }

    #[test]
    fn test_with_requires_alias() {
        let (message, _) = binding_message("MATCH (p:Person) WITH p.name RETURN 1");
        assert_eq!(message, "Expression p.name in WITH must be aliased (use AS)");
    }

    #[test]
    fn test_order_by_alias_and_input_variable() {
        let bound = bind("MATCH (p:Person) RETURN p.name AS name ORDER BY name, p.age DESC").unwrap();
        let BoundClause::Project(p) = &bound.clauses[1] else {
            panic!("expected RETURN");
        };
        assert_eq!(p.order_by[0].expr, Expr::property(Expr::Column(0), "name"));
        assert_eq!(p.order_by[1].expr, Expr::property(Expr::Column(0), "age"));
        assert!(p.order_by[1].descending);
    }

    #[test]
    fn test_skip_limit_constants() {
        let bound = bind("UNWIND [1, 2, 3] AS x RETURN x SKIP 1 LIMIT 1").unwrap();
        let BoundClause::Project(p) = &bound.clauses[1] else {
            panic!("expected RETURN");
        };
        assert_eq!((p.skip, p.limit), (1, Some(1)));

        let (message, _) = binding_message("UNWIND [1] AS x RETURN x LIMIT x");
        assert_eq!(message, "LIMIT must be a constant or a parameter");
        let (message, _) = binding_message("RETURN 1 LIMIT -1");
        assert_eq!(message, "LIMIT expects a non-negative integer, got -1");
    }

    #[test]
    fn test_create_checks() {
        let bound = bind("CREATE (a:Person {name: 'A'})-[:Knows {since: 2020}]->(b:Person {name: 'B'})").unwrap();
        let BoundClause::Create(steps) = &bound.clauses[0] else {
            panic!("expected CREATE");
        };
        assert_eq!(steps.len(), 3);
        assert!(matches!(steps[2], CreateStep::Edge { src_slot: 0, dst_slot: 1, .. }));
        assert!(bound.columns.is_empty());

        let (message, _) = binding_message("CREATE (a {name: 'A'})");
        assert_eq!(message, "Create node a requires exactly one node table label");
        let (message, _) = binding_message("CREATE (a:Person)-[:Knows]-(b:Person)");
        assert_eq!(message, "Relationships created by CREATE must have a direction");
        let (message, _) = binding_message("CREATE (a:Person {nam: 'A'})");
        assert_eq!(message, "Property nam does not exist on Person");
    }

    #[test]
    fn test_incoming_create_swaps_endpoints() {
        let bound = bind("MATCH (a:Person), (b:Person) CREATE (a)<-[:Knows]-(b)").unwrap();
        let BoundClause::Create(steps) = &bound.clauses[1] else {
            panic!("expected CREATE");
        };
        assert!(matches!(steps[..], [CreateStep::Edge { src_slot: 1, dst_slot: 0, .. }]));
    }

    #[test]
    fn test_set_and_delete_checks() {
        assert!(bind("MATCH (p:Person) SET p.age = 3").is_ok());
        let (message, _) = binding_message("MATCH (p:Person) SET p.height = 3");
        assert_eq!(message, "Property height does not exist on Person");
        let (message, _) = binding_message("UNWIND [1] AS x DELETE x");
        assert_eq!(message, "DELETE expects a node or relationship, but x is INT64");
    }

    #[test]
    fn test_clause_order() {
        let err = bind("MATCH (p:Person)").unwrap_err();
        assert_eq!(err.query_kind(), Some(QueryErrorKind::Syntax));
        let err = bind("RETURN 1 RETURN 2").unwrap_err();
        assert_eq!(err.query_kind(), Some(QueryErrorKind::Syntax));
    }

    #[test]
    fn test_relationship_variable_reuse() {
        let (message, _) = binding_message("MATCH (a)-[r]->(b), (c)-[r]->(d) RETURN a");
        assert!(message.starts_with("Variable r is already bound"), "{message}");
    }

    #[test]
    fn test_return_star() {
        let bound = bind("MATCH (a:Person)-[]->(b) RETURN *").unwrap();
        assert_eq!(bound.columns, vec!["a", "b"]);
        let (message, _) = binding_message("RETURN *");
        assert_eq!(message, "RETURN * is not allowed when there are no variables in scope");
    }

    #[test]
    fn test_ddl_binding() {
        let Statement::CreateNodeTable(stmt) =
            parse("CREATE NODE TABLE T (id INT64, tags STRING[], PRIMARY KEY (id))").unwrap()
        else {
            panic!("expected DDL");
        };
        let schema = bind_node_table(&stmt).unwrap();
        assert_eq!(schema.properties[1].ty, LogicalType::List(Box::new(LogicalType::String)));

        let Statement::CreateNodeTable(stmt) = parse("CREATE NODE TABLE T (id INT128, PRIMARY KEY (id))").unwrap()
        else {
            panic!("expected DDL");
        };
        let err = bind_node_table(&stmt).unwrap_err();
        assert_eq!(err.query_kind(), Some(QueryErrorKind::Binding));
    }
}
