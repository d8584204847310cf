#![allow(dead_code)]

use meridian_common::config::PlannerConfig;
use meridian_common::error::PlanResult;
use meridian_planner::engine::Route;
use meridian_planner::{Planner, Primitive, StaticVSchema};

pub fn vschema() -> StaticVSchema {
    StaticVSchema::from_json_value(serde_json::json!({
        "keyspaces": {
            "main": {
                "sharded": false,
                "tables": {
                    "unsharded": {},
                    "unsharded_auth": {
                        "columns": [{ "name": "id" }, { "name": "val" }],
                        "column_list_authoritative": true
                    }
                }
            },
            "user": {
                "sharded": true,
                "vindexes": {
                    "user_index": { "type": "hash" },
                    "name_user_map": { "type": "lookup_hash" },
                    "music_user_map": { "type": "lookup_hash_unique" }
                },
                "tables": {
                    "user": {
                        "column_vindexes": [
                            { "column": "id", "name": "user_index" },
                            { "column": "name", "name": "name_user_map" }
                        ]
                    },
                    "user_extra": {
                        "column_vindexes": [{ "column": "user_id", "name": "user_index" }]
                    },
                    "music": {
                        "column_vindexes": [
                            { "column": "user_id", "name": "user_index" },
                            { "column": "id", "name": "music_user_map" }
                        ]
                    },
                    "authoritative": {
                        "column_vindexes": [{ "column": "user_id", "name": "user_index" }],
                        "columns": [
                            { "name": "user_id", "type": "INT64" },
                            { "name": "col1", "type": "VARCHAR" },
                            { "name": "col2", "type": "VARCHAR" }
                        ],
                        "column_list_authoritative": true
                    },
                    "ref": { "type": "reference" },
                    "seq": { "type": "sequence" },
                    "pin_test": { "pinned": "80" }
                }
            }
        }
    }))
    .expect("test vschema")
}

pub fn plan_with(config: PlannerConfig, sql: &str) -> PlanResult<Primitive> {
    let vs = vschema();
    Planner::new(&vs, config).plan_sql(sql)
}

pub fn plan(sql: &str) -> PlanResult<Primitive> {
    plan_with(PlannerConfig::default(), sql)
}

pub fn plan_ok(sql: &str) -> Primitive {
    match plan(sql) {
        Ok(p) => p,
        Err(e) => panic!("planning {sql:?} failed: {e}"),
    }
}

pub fn plan_err(sql: &str) -> String {
    match plan(sql) {
        Ok(p) => panic!("planning {sql:?} should fail, got {p:?}"),
        Err(e) => e.to_string(),
    }
}

/// The plan must be one route; returns it.
pub fn single_route(sql: &str) -> Route {
    match plan_ok(sql) {
        Primitive::Route(r) => r,
        other => panic!("expected a single route for {sql:?}, got {other:?}"),
    }
}
