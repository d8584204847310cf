#[cfg(test)]
mod planner_tests {
    use meridian_common::config::PlannerConfig;
    use meridian_sql_frontend::ast::{Expr, Select};
    use meridian_sql_frontend::{bind_var_names, parse_select};

    use crate::builder::{build_select_plan, Plan};
    use crate::engine::{Primitive, RouteOpcode};
    use crate::jointab::Jointab;
    use crate::planner::Planner;
    use crate::vschema::StaticVSchema;

    fn test_vschema() -> StaticVSchema {
        StaticVSchema::from_json_value(serde_json::json!({
            "keyspaces": {
                "main": { "tables": { "unsharded": {} } },
                "user": {
                    "sharded": true,
                    "vindexes": { "user_index": { "type": "hash" } },
                    "tables": {
                        "user": { "column_vindexes": [{ "column": "id", "name": "user_index" }] },
                        "user_extra": { "column_vindexes": [{ "column": "user_id", "name": "user_index" }] }
                    }
                }
            }
        }))
        .unwrap()
    }

    fn parse(sql: &str) -> Select {
        parse_select(sql).unwrap()
    }

    #[test]
    fn test_plan_select_leaves_statement_untouched() {
        let vs = test_vschema();
        let planner = Planner::new(&vs, PlannerConfig::default());
        let sql = "select u.col from user as u join user_extra as e on u.col = e.col where u.id = 1";
        let sel = parse(sql);
        let before = sel.clone();
        planner.plan_select(&sel, sql).unwrap();
        assert_eq!(sel, before);
    }

    #[test]
    fn test_builder_resolves_columns_in_place() {
        let vs = test_vschema();
        let config = PlannerConfig::default();
        let sql = "select id from user where id = 1";
        let mut sel = parse(sql);
        build_select_plan(&vs, &config, &mut sel, sql).unwrap();
        let Some(Expr::Comparison { left, .. }) = &sel.where_clause else {
            panic!("expected comparison, got {:?}", sel.where_clause);
        };
        assert!(left.as_column().is_some_and(|c| c.metadata.is_some()));
    }

    #[test]
    fn test_join_variables_avoid_statement_bind_vars() {
        let vs = test_vschema();
        let planner = Planner::new(&vs, PlannerConfig::default());
        let plan = planner
            .plan_sql("select u.col, e.col from user as u join user_extra as e on u.col = e.col and e.id = :u_col")
            .unwrap();
        let Primitive::Join(j) = plan else {
            panic!("expected join, got {plan:?}");
        };
        assert!(j.vars.contains_key("u_col1"));
        assert_eq!(
            j.right.as_route().map(|r| r.query.as_str()),
            Some("select e.col from user_extra as e where e.col = :u_col1 and e.id = :u_col")
        );
    }

    #[test]
    fn test_subquery_variables_avoid_statement_bind_vars() {
        let vs = test_vschema();
        let planner = Planner::new(&vs, PlannerConfig::default());
        let plan = planner
            .plan_sql("select col from user where :__sq1 = 1 and id in (select col from user_extra)")
            .unwrap();
        let Primitive::PulloutSubquery(p) = plan else {
            panic!("expected pullout, got {plan:?}");
        };
        assert_eq!(p.subquery_name, "__sq2");
        assert_eq!(p.has_values, "__sq_has_values2");
    }

    #[test]
    fn test_same_column_reuses_join_variable() {
        let vs = test_vschema();
        let planner = Planner::new(&vs, PlannerConfig::default());
        let plan = planner
            .plan_sql(
                "select u.col from user as u join user_extra as e on e.col = u.col and e.other = u.col",
            )
            .unwrap();
        let Primitive::Join(j) = plan else {
            panic!("expected join, got {plan:?}");
        };
        assert_eq!(j.vars.len(), 1);
        assert_eq!(
            j.right.as_route().map(|r| r.query.as_str()),
            Some("select 1 from user_extra as e where e.col = :u_col and e.other = :u_col")
        );
    }

    #[test]
    fn test_three_way_join_nests_on_the_left() {
        let vs = test_vschema();
        let planner = Planner::new(&vs, PlannerConfig::default());
        let plan = planner
            .plan_sql(
                "select u.col, e.col, m.col from user as u join user_extra as e on u.col = e.col \
                 join unsharded as m on m.col = e.col",
            )
            .unwrap();
        let Primitive::Join(outer) = plan else {
            panic!("expected join, got {plan:?}");
        };
        assert!(matches!(outer.left.as_ref(), Primitive::Join(_)));
        let right = outer.right.as_route().unwrap();
        assert_eq!(right.opcode, RouteOpcode::Unsharded);
        assert_eq!(right.query, "select m.col from unsharded as m where m.col = :e_col");
        assert_eq!(outer.cols, vec![-1, -2, 1]);
    }

    #[test]
    fn test_config_from_toml_drives_planner() {
        let vs = test_vschema();
        let config = PlannerConfig::from_toml_str("[planner]\ndefault_query_timeout_ms = 75\n").unwrap();
        let planner = Planner::new(&vs, config);
        assert_eq!(planner.config().default_query_timeout_ms, 75);
        let plan = planner.plan_sql("select col from user where id = 3").unwrap();
        assert_eq!(plan.as_route().map(|r| r.query_timeout_ms), Some(75));
    }

    #[test]
    fn test_routes_and_scatter_detection() {
        let vs = test_vschema();
        let planner = Planner::new(&vs, PlannerConfig::default());
        let plan = planner
            .plan_sql("select u.col from user as u join unsharded as m on u.id = m.id where u.id = 4")
            .unwrap();
        let opcodes: Vec<RouteOpcode> = plan.routes().iter().map(|r| r.opcode).collect();
        assert_eq!(opcodes, vec![RouteOpcode::EqualUnique, RouteOpcode::Unsharded]);
        assert!(!plan.has_scatter());
    }

    #[test]
    fn test_wireup_twice_keeps_plan() {
        let vs = test_vschema();
        let config = PlannerConfig::default();
        let sql = "select u.col, e.id from user as u join user_extra as e on e.user_id = u.col where u.id in (1, 2)";
        let mut sel = parse(sql);
        let mut plan = Plan::new(&vs, &config, Jointab::new(bind_var_names(&sel)));
        let pb = plan.process_select(&mut sel, None, sql).unwrap();
        plan.wireup(pb.bldr, pb.bldr).unwrap();
        let first = plan.primitive(pb.bldr).unwrap();
        plan.wireup(pb.bldr, pb.bldr).unwrap();
        assert_eq!(plan.primitive(pb.bldr).unwrap(), first);
    }
}
