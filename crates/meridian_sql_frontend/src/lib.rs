pub mod ast;
pub mod directives;
pub mod format;
mod lower;
pub mod parser;
pub mod visit;

pub use ast::*;
pub use directives::CommentDirectives;
pub use format::{impossible_query, SqlWriter};
pub use parser::{parse_select, parse_sql};
pub use visit::{
    bind_var_names, has_subquery, is_aggregate_func, is_locking_func, node_has_aggregates,
    split_and_expression,
};
