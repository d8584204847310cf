//! Bind variable allocation for values that flow between operators at
//! execution time.

use std::collections::{HashMap, HashSet};

use meridian_common::error::PlanResult;
use meridian_sql_frontend::ast::{ColName, ColumnRef};

use crate::builder::{NodeId, Plan};
use crate::symtab::col_ref;

/// Join variable names per column, unique against the statement's own bind
/// variables and against each other.
#[derive(Debug, Clone, Default)]
pub(crate) struct Jointab {
    refs: HashMap<ColumnRef, String>,
    vars: HashSet<String>,
    var_index: usize,
}

impl Jointab {
    pub fn new(bind_vars: HashSet<String>) -> Self {
        Jointab { refs: HashMap::new(), vars: bind_vars, var_index: 0 }
    }

    /// Names for the result and the has-values flag of a pulled-out subquery.
    pub fn generate_subquery_vars(&mut self) -> (String, String) {
        loop {
            self.var_index += 1;
            let sq = format!("__sq{}", self.var_index);
            let has_values = format!("__sq_has_values{}", self.var_index);
            if self.vars.contains(&sq) || self.vars.contains(&has_values) {
                continue;
            }
            self.vars.insert(sq.clone());
            self.vars.insert(has_values.clone());
            return (sq, has_values);
        }
    }

    fn reserve(&mut self, c: ColumnRef, col: &ColName) -> String {
        let base = match &col.qualifier {
            Some(q) => format!("{}_{}", q.name.compliant_name(), col.name.compliant_name()),
            None => col.name.compliant_name(),
        };
        let mut name = base.clone();
        let mut suffix = 0;
        while self.vars.contains(&name) {
            suffix += 1;
            name = format!("{base}{suffix}");
        }
        self.vars.insert(name.clone());
        self.refs.insert(c, name.clone());
        name
    }
}

impl Plan<'_> {
    /// Bind variable that carries `col` into the operator at order `to`.
    /// The same column always gets the same name.
    pub(crate) fn procure(&mut self, root: NodeId, col: &ColName, to: usize) -> PlanResult<String> {
        let c = col_ref(col)?;
        let from = self.order(self.column_origin(c));
        let name = match self.jt.refs.get(&c) {
            Some(name) => name.clone(),
            None => self.jt.reserve(c, col),
        };
        self.supply_var(root, from, to, col, &name)?;
        Ok(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserve_avoids_statement_bind_vars() {
        let mut jt = Jointab::new(["user_id".to_string()].into_iter().collect());
        let name = jt.reserve(ColumnRef(0), &ColName::qualified("user", "id"));
        assert_eq!(name, "user_id1");
        let name = jt.reserve(ColumnRef(1), &ColName::qualified("user", "id"));
        assert_eq!(name, "user_id2");
        assert_eq!(jt.reserve(ColumnRef(2), &ColName::new("col")), "col");
    }

    #[test]
    fn test_subquery_vars_skip_taken_names() {
        let mut jt = Jointab::new(["__sq1".to_string()].into_iter().collect());
        assert_eq!(jt.generate_subquery_vars(), ("__sq2".to_string(), "__sq_has_values2".to_string()));
        assert_eq!(jt.generate_subquery_vars(), ("__sq3".to_string(), "__sq_has_values3".to_string()));
    }
}
