//! Owned SELECT statement model consumed by the plan builder.
//!
//! The tree is `Clone` so that a planner can take its own copy of a
//! statement and resolve column references in place without touching the
//! caller's tree. Column references carry an optional [`ColumnRef`] that a
//! planner fills in when it resolves the symbol.

/// Opaque handle to a planner-owned column symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ColumnRef(pub usize);

/// SQL identifier. Comparison of column identifiers is case-insensitive,
/// table identifiers compare exactly.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Ident(pub String);

impl Ident {
    pub fn new(s: impl Into<String>) -> Self {
        Ident(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn lowered(&self) -> String {
        self.0.to_lowercase()
    }

    pub fn equal_ci(&self, other: &Ident) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }

    pub fn equal_str(&self, s: &str) -> bool {
        self.0.eq_ignore_ascii_case(s)
    }

    /// Identifier with every non-alphanumeric character replaced by `_`,
    /// suitable as a bind variable name.
    pub fn compliant_name(&self) -> String {
        self.0
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
            .collect()
    }
}

/// `[qualifier.]name`, where the qualifier is a keyspace (possibly carrying
/// a shard destination such as `ks:-80`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct TableName {
    pub qualifier: Option<Ident>,
    pub name: Ident,
}

impl TableName {
    pub fn new(name: impl Into<String>) -> Self {
        TableName { qualifier: None, name: Ident::new(name) }
    }

    pub fn qualified(qualifier: impl Into<String>, name: impl Into<String>) -> Self {
        TableName { qualifier: Some(Ident::new(qualifier)), name: Ident::new(name) }
    }

    pub fn qualifier_str(&self) -> &str {
        self.qualifier.as_ref().map(|q| q.as_str()).unwrap_or("")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColName {
    pub metadata: Option<ColumnRef>,
    pub qualifier: Option<TableName>,
    pub name: Ident,
}

impl ColName {
    pub fn new(name: impl Into<String>) -> Self {
        ColName { metadata: None, qualifier: None, name: Ident::new(name) }
    }

    pub fn qualified(table: impl Into<String>, name: impl Into<String>) -> Self {
        ColName {
            metadata: None,
            qualifier: Some(TableName::new(table)),
            name: Ident::new(name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Literal {
    Int(String),
    Float(String),
    Str(String),
    /// Hex digits of an `X'..'` / `0x..` literal.
    Hex(String),
    Bool(bool),
    Null,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    NullSafeEq,
    In,
    NotIn,
    Like,
    NotLike,
}

impl ComparisonOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComparisonOp::Eq => "=",
            ComparisonOp::NotEq => "!=",
            ComparisonOp::Lt => "<",
            ComparisonOp::LtEq => "<=",
            ComparisonOp::Gt => ">",
            ComparisonOp::GtEq => ">=",
            ComparisonOp::NullSafeEq => "<=>",
            ComparisonOp::In => "in",
            ComparisonOp::NotIn => "not in",
            ComparisonOp::Like => "like",
            ComparisonOp::NotLike => "not like",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Plus,
    Minus,
    Mult,
    Div,
    IntDiv,
    Mod,
    BitAnd,
    BitOr,
    BitXor,
    ShiftLeft,
    ShiftRight,
}

impl BinaryOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            BinaryOp::Plus => "+",
            BinaryOp::Minus => "-",
            BinaryOp::Mult => "*",
            BinaryOp::Div => "/",
            BinaryOp::IntDiv => "div",
            BinaryOp::Mod => "%",
            BinaryOp::BitAnd => "&",
            BinaryOp::BitOr => "|",
            BinaryOp::BitXor => "^",
            BinaryOp::ShiftLeft => "<<",
            BinaryOp::ShiftRight => ">>",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Minus,
    Plus,
    BitNot,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FuncArg {
    Star,
    Expr(Expr),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FuncExpr {
    pub qualifier: Option<Ident>,
    pub name: Ident,
    pub distinct: bool,
    pub args: Vec<FuncArg>,
}

impl FuncExpr {
    pub fn new(name: impl Into<String>, args: Vec<FuncArg>) -> Self {
        FuncExpr { qualifier: None, name: Ident::new(name), distinct: false, args }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    Column(ColName),
    Literal(Literal),
    /// `:name`
    Argument(String),
    /// `::name`
    ListArg(String),
    Comparison {
        op: ComparisonOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        expr: Box<Expr>,
    },
    IsNull {
        expr: Box<Expr>,
        negated: bool,
    },
    Between {
        expr: Box<Expr>,
        low: Box<Expr>,
        high: Box<Expr>,
        negated: bool,
    },
    Tuple(Vec<Expr>),
    Func(FuncExpr),
    Subquery(Box<Select>),
    Exists(Box<Select>),
    Paren(Box<Expr>),
}

impl Expr {
    pub fn col(name: impl Into<String>) -> Expr {
        Expr::Column(ColName::new(name))
    }

    pub fn int(v: i64) -> Expr {
        Expr::Literal(Literal::Int(v.to_string()))
    }

    pub fn string(s: impl Into<String>) -> Expr {
        Expr::Literal(Literal::Str(s.into()))
    }

    pub fn arg(name: impl Into<String>) -> Expr {
        Expr::Argument(name.into())
    }

    pub fn cmp(op: ComparisonOp, left: Expr, right: Expr) -> Expr {
        Expr::Comparison { op, left: Box::new(left), right: Box::new(right) }
    }

    pub fn and(left: Expr, right: Expr) -> Expr {
        Expr::And(Box::new(left), Box::new(right))
    }

    pub fn or(left: Expr, right: Expr) -> Expr {
        Expr::Or(Box::new(left), Box::new(right))
    }

    pub fn as_column(&self) -> Option<&ColName> {
        match self {
            Expr::Column(c) => Some(c),
            _ => None,
        }
    }

    pub fn is_null_literal(&self) -> bool {
        matches!(self, Expr::Literal(Literal::Null))
    }

    /// Literal or bind argument: something a shard can be routed by.
    pub fn is_value(&self) -> bool {
        match self {
            Expr::Literal(Literal::Null) => false,
            Expr::Literal(_) | Expr::Argument(_) => true,
            _ => false,
        }
    }

    /// Function name, lowercased, when this is a function call.
    pub fn func_name(&self) -> Option<String> {
        match self {
            Expr::Func(f) => Some(f.name.lowered()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AliasedExpr {
    pub expr: Expr,
    pub alias: Option<Ident>,
}

impl AliasedExpr {
    pub fn new(expr: Expr) -> Self {
        AliasedExpr { expr, alias: None }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectExpr {
    /// `*` or `t.*`
    Star(Option<TableName>),
    Aliased(AliasedExpr),
    /// `NEXT <n> VALUES`
    Nextval(Expr),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimpleTableExpr {
    Table(TableName),
    Derived(Box<Select>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AliasedTableExpr {
    pub expr: SimpleTableExpr,
    pub alias: Option<Ident>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Straight,
    Left,
    Right,
}

impl JoinKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JoinKind::Inner => "join",
            JoinKind::Straight => "straight_join",
            JoinKind::Left => "left join",
            JoinKind::Right => "right join",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct JoinCondition {
    pub on: Option<Expr>,
    pub using: Vec<Ident>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinTableExpr {
    pub left: TableExpr,
    pub kind: JoinKind,
    pub right: TableExpr,
    pub condition: JoinCondition,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableExpr {
    Aliased(AliasedTableExpr),
    Join(Box<JoinTableExpr>),
    Paren(Vec<TableExpr>),
}

impl TableExpr {
    pub fn table(name: TableName) -> TableExpr {
        TableExpr::Aliased(AliasedTableExpr { expr: SimpleTableExpr::Table(name), alias: None })
    }

    pub fn derived(sel: Select, alias: impl Into<String>) -> TableExpr {
        TableExpr::Aliased(AliasedTableExpr {
            expr: SimpleTableExpr::Derived(Box::new(sel)),
            alias: Some(Ident::new(alias)),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub expr: Expr,
    pub direction: OrderDirection,
}

impl Order {
    pub fn asc(expr: Expr) -> Self {
        Order { expr, direction: OrderDirection::Asc }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Limit {
    pub offset: Option<Expr>,
    pub rowcount: Expr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Lock {
    #[default]
    None,
    ForUpdate,
    ShareMode,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Select {
    /// Raw `/* ... */` comments, delimiters included.
    pub comments: Vec<String>,
    pub distinct: bool,
    pub sql_calc_found_rows: bool,
    pub select_exprs: Vec<SelectExpr>,
    pub from: Vec<TableExpr>,
    pub where_clause: Option<Expr>,
    pub group_by: Vec<Expr>,
    pub having: Option<Expr>,
    pub order_by: Vec<Order>,
    pub limit: Option<Limit>,
    pub lock: Lock,
    pub into: Option<String>,
}

impl Select {
    /// A select whose only content is the given FROM list.
    pub fn from_tables(from: Vec<TableExpr>) -> Self {
        Select { from, ..Default::default() }
    }

    pub fn add_where(&mut self, expr: Expr) {
        self.where_clause = Some(match self.where_clause.take() {
            None => expr,
            Some(existing) => Expr::and(existing, expr),
        });
    }

    pub fn add_having(&mut self, expr: Expr) {
        self.having = Some(match self.having.take() {
            None => expr,
            Some(existing) => Expr::and(existing, expr),
        });
    }

    pub fn add_order(&mut self, order: Order) {
        self.order_by.push(order);
    }
}
