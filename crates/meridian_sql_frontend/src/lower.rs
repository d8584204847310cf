//! Lowering from the sqlparser tree into the owned statement model.

use meridian_common::error::{PlanError, PlanResult};
use sqlparser::ast;

use crate::ast::*;

#[derive(Debug, Default)]
pub(crate) struct Lowerer {
    /// Counter for `?` placeholders, rewritten to `:v1`, `:v2`, ...
    positional: usize,
}

fn unsupported<T>(what: impl std::fmt::Display) -> PlanResult<T> {
    Err(PlanError::unsupported(what.to_string()))
}

fn ident(id: &ast::Ident) -> Ident {
    Ident::new(id.value.clone())
}

fn table_name(name: &ast::ObjectName) -> PlanResult<TableName> {
    match name.0.as_slice() {
        [t] => Ok(TableName { qualifier: None, name: ident(t) }),
        [ks, t] => Ok(TableName { qualifier: Some(ident(ks)), name: ident(t) }),
        _ => unsupported(format_args!("table name {name}")),
    }
}

fn is_float(n: &str) -> bool {
    n.contains(|c| matches!(c, '.' | 'e' | 'E'))
}

impl Lowerer {
    pub(crate) fn lower_query(&mut self, query: &ast::Query) -> PlanResult<Select> {
        if query.with.is_some() {
            return unsupported("WITH clause");
        }
        let mut sel = match query.body.as_ref() {
            ast::SetExpr::Select(s) => self.lower_select(s)?,
            ast::SetExpr::Query(inner) => self.lower_query(inner)?,
            other => return unsupported(format_args!("set operation: {other}")),
        };

        if let Some(ob) = &query.order_by {
            for o in &ob.exprs {
                let direction = match o.asc {
                    Some(false) => OrderDirection::Desc,
                    _ => OrderDirection::Asc,
                };
                sel.order_by.push(Order { expr: self.lower_expr(&o.expr)?, direction });
            }
        }

        match (&query.limit, &query.offset) {
            (Some(count), offset) => {
                let offset = match offset {
                    Some(o) => Some(self.lower_expr(&o.value)?),
                    None => None,
                };
                sel.limit = Some(Limit { offset, rowcount: self.lower_expr(count)? });
            }
            (None, Some(_)) => return unsupported("OFFSET without LIMIT"),
            (None, None) => {}
        }

        if let Some(lock) = query.locks.first() {
            sel.lock = match lock.lock_type {
                ast::LockType::Update => Lock::ForUpdate,
                ast::LockType::Share => Lock::ShareMode,
            };
        }
        Ok(sel)
    }

    fn lower_select(&mut self, s: &ast::Select) -> PlanResult<Select> {
        let distinct = match &s.distinct {
            None => false,
            Some(ast::Distinct::Distinct) => true,
            Some(ast::Distinct::On(_)) => return unsupported("DISTINCT ON"),
        };

        let mut select_exprs = Vec::with_capacity(s.projection.len());
        for item in &s.projection {
            select_exprs.push(match item {
                ast::SelectItem::UnnamedExpr(e) => {
                    SelectExpr::Aliased(AliasedExpr::new(self.lower_expr(e)?))
                }
                ast::SelectItem::ExprWithAlias { expr, alias } => SelectExpr::Aliased(AliasedExpr {
                    expr: self.lower_expr(expr)?,
                    alias: Some(ident(alias)),
                }),
                ast::SelectItem::QualifiedWildcard(name, _) => {
                    SelectExpr::Star(Some(table_name(name)?))
                }
                ast::SelectItem::Wildcard(_) => SelectExpr::Star(None),
            });
        }

        let mut from = Vec::with_capacity(s.from.len());
        for twj in &s.from {
            from.push(self.lower_table_with_joins(twj)?);
        }
        if from.is_empty() {
            from.push(TableExpr::table(TableName::new("dual")));
        }

        let where_clause = match &s.selection {
            Some(e) => Some(self.lower_expr(e)?),
            None => None,
        };

        let group_by = match &s.group_by {
            ast::GroupByExpr::Expressions(exprs, ..) => exprs
                .iter()
                .map(|e| self.lower_expr(e))
                .collect::<PlanResult<Vec<_>>>()?,
            ast::GroupByExpr::All(..) => return unsupported("GROUP BY ALL"),
        };

        let having = match &s.having {
            Some(e) => Some(self.lower_expr(e)?),
            None => None,
        };

        Ok(Select {
            distinct,
            select_exprs,
            from,
            where_clause,
            group_by,
            having,
            into: s.into.as_ref().map(|into| into.name.to_string()),
            ..Default::default()
        })
    }

    fn lower_table_with_joins(&mut self, twj: &ast::TableWithJoins) -> PlanResult<TableExpr> {
        let mut acc = self.lower_table_factor(&twj.relation)?;
        for join in &twj.joins {
            let right = self.lower_table_factor(&join.relation)?;
            let (kind, constraint) = match &join.join_operator {
                ast::JoinOperator::Inner(c) => (JoinKind::Inner, Some(c)),
                ast::JoinOperator::LeftOuter(c) => (JoinKind::Left, Some(c)),
                ast::JoinOperator::RightOuter(c) => (JoinKind::Right, Some(c)),
                ast::JoinOperator::CrossJoin => (JoinKind::Inner, None),
                other => return unsupported(format_args!("join type {other:?}")),
            };
            let mut condition = JoinCondition::default();
            match constraint {
                Some(ast::JoinConstraint::On(e)) => condition.on = Some(self.lower_expr(e)?),
                Some(ast::JoinConstraint::Using(cols)) => {
                    condition.using = cols.iter().map(|c| Ident::new(c.to_string())).collect();
                }
                Some(ast::JoinConstraint::Natural) => return unsupported("NATURAL JOIN"),
                Some(ast::JoinConstraint::None) | None => {}
            }
            acc = TableExpr::Join(Box::new(JoinTableExpr { left: acc, kind, right, condition }));
        }
        Ok(acc)
    }

    fn lower_table_factor(&mut self, tf: &ast::TableFactor) -> PlanResult<TableExpr> {
        match tf {
            ast::TableFactor::Table { name, alias, .. } => Ok(TableExpr::Aliased(AliasedTableExpr {
                expr: SimpleTableExpr::Table(table_name(name)?),
                alias: alias.as_ref().map(|a| ident(&a.name)),
            })),
            ast::TableFactor::Derived { subquery, alias, .. } => {
                let Some(alias) = alias else {
                    return Err(PlanError::InvalidArgument(
                        "Every derived table must have its own alias".to_string(),
                    ));
                };
                Ok(TableExpr::Aliased(AliasedTableExpr {
                    expr: SimpleTableExpr::Derived(Box::new(self.lower_query(subquery)?)),
                    alias: Some(ident(&alias.name)),
                }))
            }
            ast::TableFactor::NestedJoin { table_with_joins, .. } => {
                Ok(TableExpr::Paren(vec![self.lower_table_with_joins(table_with_joins)?]))
            }
            other => unsupported(format_args!("table expression {other}")),
        }
    }

    fn boxed(&mut self, e: &ast::Expr) -> PlanResult<Box<Expr>> {
        Ok(Box::new(self.lower_expr(e)?))
    }

    pub(crate) fn lower_expr(&mut self, e: &ast::Expr) -> PlanResult<Expr> {
        use ast::BinaryOperator as B;
        Ok(match e {
            ast::Expr::Identifier(id) => Expr::Column(ColName {
                metadata: None,
                qualifier: None,
                name: ident(id),
            }),
            ast::Expr::CompoundIdentifier(parts) => match parts.as_slice() {
                [t, c] => Expr::Column(ColName {
                    metadata: None,
                    qualifier: Some(TableName { qualifier: None, name: ident(t) }),
                    name: ident(c),
                }),
                [ks, t, c] => Expr::Column(ColName {
                    metadata: None,
                    qualifier: Some(TableName { qualifier: Some(ident(ks)), name: ident(t) }),
                    name: ident(c),
                }),
                _ => return unsupported(format_args!("column reference {e}")),
            },
            ast::Expr::Value(v) => self.lower_value(v)?,
            ast::Expr::BinaryOp { left, op, right } => {
                let comparison = match op {
                    B::Eq => Some(ComparisonOp::Eq),
                    B::NotEq => Some(ComparisonOp::NotEq),
                    B::Lt => Some(ComparisonOp::Lt),
                    B::LtEq => Some(ComparisonOp::LtEq),
                    B::Gt => Some(ComparisonOp::Gt),
                    B::GtEq => Some(ComparisonOp::GtEq),
                    B::Spaceship => Some(ComparisonOp::NullSafeEq),
                    _ => None,
                };
                if let Some(op) = comparison {
                    Expr::Comparison { op, left: self.boxed(left)?, right: self.boxed(right)? }
                } else {
                    let arith = match op {
                        B::And => return Ok(Expr::And(self.boxed(left)?, self.boxed(right)?)),
                        B::Or => return Ok(Expr::Or(self.boxed(left)?, self.boxed(right)?)),
                        B::Plus => BinaryOp::Plus,
                        B::Minus => BinaryOp::Minus,
                        B::Multiply => BinaryOp::Mult,
                        B::Divide => BinaryOp::Div,
                        B::MyIntegerDivide => BinaryOp::IntDiv,
                        B::Modulo => BinaryOp::Mod,
                        B::BitwiseAnd => BinaryOp::BitAnd,
                        B::BitwiseOr => BinaryOp::BitOr,
                        B::BitwiseXor => BinaryOp::BitXor,
                        B::PGBitwiseShiftLeft => BinaryOp::ShiftLeft,
                        B::PGBitwiseShiftRight => BinaryOp::ShiftRight,
                        other => return unsupported(format_args!("operator {other}")),
                    };
                    Expr::Binary { op: arith, left: self.boxed(left)?, right: self.boxed(right)? }
                }
            }
            ast::Expr::UnaryOp { op, expr } => match op {
                ast::UnaryOperator::Not => Expr::Not(self.boxed(expr)?),
                ast::UnaryOperator::Minus => match expr.as_ref() {
                    ast::Expr::Value(ast::Value::Number(n, _)) => {
                        let neg = format!("-{n}");
                        if is_float(n) {
                            Expr::Literal(Literal::Float(neg))
                        } else {
                            Expr::Literal(Literal::Int(neg))
                        }
                    }
                    _ => Expr::Unary { op: UnaryOp::Minus, expr: self.boxed(expr)? },
                },
                ast::UnaryOperator::Plus => Expr::Unary { op: UnaryOp::Plus, expr: self.boxed(expr)? },
                ast::UnaryOperator::PGBitwiseNot => {
                    Expr::Unary { op: UnaryOp::BitNot, expr: self.boxed(expr)? }
                }
                other => return unsupported(format_args!("unary operator {other}")),
            },
            ast::Expr::Nested(inner) => Expr::Paren(self.boxed(inner)?),
            ast::Expr::IsNull(inner) => Expr::IsNull { expr: self.boxed(inner)?, negated: false },
            ast::Expr::IsNotNull(inner) => Expr::IsNull { expr: self.boxed(inner)?, negated: true },
            ast::Expr::InList { expr, list, negated } => {
                let items = list.iter().map(|i| self.lower_expr(i)).collect::<PlanResult<Vec<_>>>()?;
                Expr::Comparison {
                    op: if *negated { ComparisonOp::NotIn } else { ComparisonOp::In },
                    left: self.boxed(expr)?,
                    right: Box::new(Expr::Tuple(items)),
                }
            }
            ast::Expr::InSubquery { expr, subquery, negated } => Expr::Comparison {
                op: if *negated { ComparisonOp::NotIn } else { ComparisonOp::In },
                left: self.boxed(expr)?,
                right: Box::new(Expr::Subquery(Box::new(self.lower_query(subquery)?))),
            },
            ast::Expr::Between { expr, negated, low, high } => Expr::Between {
                expr: self.boxed(expr)?,
                low: self.boxed(low)?,
                high: self.boxed(high)?,
                negated: *negated,
            },
            ast::Expr::Like { negated, expr, pattern, .. } => Expr::Comparison {
                op: if *negated { ComparisonOp::NotLike } else { ComparisonOp::Like },
                left: self.boxed(expr)?,
                right: self.boxed(pattern)?,
            },
            ast::Expr::Exists { subquery, negated } => {
                let exists = Expr::Exists(Box::new(self.lower_query(subquery)?));
                if *negated {
                    Expr::Not(Box::new(exists))
                } else {
                    exists
                }
            }
            ast::Expr::Subquery(q) => Expr::Subquery(Box::new(self.lower_query(q)?)),
            ast::Expr::Tuple(items) => Expr::Tuple(
                items.iter().map(|i| self.lower_expr(i)).collect::<PlanResult<Vec<_>>>()?,
            ),
            ast::Expr::Function(f) => Expr::Func(self.lower_function(f)?),
            other => return unsupported(format_args!("expression {other}")),
        })
    }

    fn lower_function(&mut self, f: &ast::Function) -> PlanResult<FuncExpr> {
        if f.over.is_some() {
            return unsupported(format_args!("window function {f}"));
        }
        let (qualifier, name) = match f.name.0.as_slice() {
            [n] => (None, ident(n)),
            [q, n] => (Some(ident(q)), ident(n)),
            _ => return unsupported(format_args!("function name {}", f.name)),
        };
        let mut distinct = false;
        let mut args = Vec::new();
        match &f.args {
            ast::FunctionArguments::None => {}
            ast::FunctionArguments::List(list) => {
                distinct = matches!(list.duplicate_treatment, Some(ast::DuplicateTreatment::Distinct));
                for arg in &list.args {
                    args.push(match arg {
                        ast::FunctionArg::Unnamed(ast::FunctionArgExpr::Expr(e)) => {
                            FuncArg::Expr(self.lower_expr(e)?)
                        }
                        ast::FunctionArg::Unnamed(ast::FunctionArgExpr::Wildcard) => FuncArg::Star,
                        other => return unsupported(format_args!("function argument {other}")),
                    });
                }
            }
            ast::FunctionArguments::Subquery(_) => {
                return unsupported(format_args!("function argument {f}"))
            }
        }
        Ok(FuncExpr { qualifier, name, distinct, args })
    }

    fn lower_value(&mut self, v: &ast::Value) -> PlanResult<Expr> {
        Ok(match v {
            ast::Value::Number(n, _) => {
                if is_float(n) {
                    Expr::Literal(Literal::Float(n.clone()))
                } else {
                    Expr::Literal(Literal::Int(n.clone()))
                }
            }
            ast::Value::SingleQuotedString(s) | ast::Value::DoubleQuotedString(s) => {
                Expr::Literal(Literal::Str(s.clone()))
            }
            ast::Value::HexStringLiteral(h) => Expr::Literal(Literal::Hex(h.clone())),
            ast::Value::Boolean(b) => Expr::Literal(Literal::Bool(*b)),
            ast::Value::Null => Expr::Literal(Literal::Null),
            ast::Value::Placeholder(p) => {
                if p == "?" {
                    self.positional += 1;
                    Expr::Argument(format!("v{}", self.positional))
                } else if let Some(name) = p.strip_prefix("::") {
                    Expr::ListArg(name.to_string())
                } else if let Some(name) = p.strip_prefix(':') {
                    Expr::Argument(name.to_string())
                } else {
                    return unsupported(format_args!("placeholder {p}"));
                }
            }
            other => return unsupported(format_args!("value {other}")),
        })
    }
}
