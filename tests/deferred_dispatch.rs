//! Motion deferral: `move` only queues, the planner sees batches at sync
//! points, and queued actions keep the settings captured at creation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use kinescript::interpreter::ast::{
    Block, Connector, Expr, ModifierCall, MoveStmt, Program, Stmt, StmtKind,
};
use kinescript::interpreter::ffi::{HostFunction, Signature};
use kinescript::interpreter::value::Value;
use kinescript::runtime::error::ExecErrorKind;
use kinescript::runtime::{PlannerError, Runtime, RuntimeConfig, SimulatedPlanner};

fn config() -> RuntimeConfig {
    RuntimeConfig {
        controllers: vec!["left".into()],
        default_controller: Some("left".into()),
        ..RuntimeConfig::default()
    }
}

fn move_to(x: f64) -> Stmt {
    Stmt::new(StmtKind::Move(MoveStmt {
        connector: Connector::Line,
        target: Expr::pose([x, 0.0, 0.0, 0.0, 0.0, 0.0]),
        tcp: None,
        frame_relation: None,
        modifiers: vec![],
    }))
}

fn bare_sync() -> Stmt {
    Stmt::new(StmtKind::Sync {
        do_body: None,
        sync_body: None,
        handler: None,
    })
}

fn program(statements: Vec<Stmt>) -> Program {
    Program {
        body: Block::new(statements),
    }
}

#[tokio::test]
async fn no_planner_call_before_sync() {
    let planner = Arc::new(SimulatedPlanner::new(&["left"]));
    let runtime = Runtime::new(config(), Arc::clone(&planner) as _);

    // Records how many dispatches the planner has seen at call time.
    let observed = Arc::new(Mutex::new(Vec::new()));
    let observed_in = Arc::clone(&observed);
    let planner_in = Arc::clone(&planner);
    runtime.register_host_function(
        "observe",
        HostFunction::simple(Signature::any_args(), move |_args| {
            observed_in
                .lock()
                .unwrap()
                .push(planner_in.dispatch_log().len());
            Ok(Value::Null)
        }),
    );

    runtime
        .run(
            &program(vec![
                move_to(1.0),
                move_to(2.0),
                Stmt::new(StmtKind::Expr(Expr::call("observe", vec![]))),
                bare_sync(),
                Stmt::new(StmtKind::Expr(Expr::call("observe", vec![]))),
            ]),
            HashMap::new(),
        )
        .await
        .unwrap();

    assert_eq!(*observed.lock().unwrap(), vec![0, 1]);
    let log = planner.dispatch_log();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].actions.len(), 2);
    assert_eq!(log[0].actions[1].target.position.x, 2.0);
}

#[tokio::test]
async fn actions_keep_creation_time_settings() {
    let planner = Arc::new(SimulatedPlanner::new(&["left"]));
    let runtime = Runtime::new(config(), Arc::clone(&planner) as _);

    let with_velocity = |velocity: f64, body: Vec<Stmt>| {
        Stmt::new(StmtKind::With {
            modifiers: vec![ModifierCall {
                name: "velocity".into(),
                value: Expr::number(velocity),
            }],
            body: Block::new(body),
        })
    };

    runtime
        .run(
            &program(vec![
                with_velocity(
                    10.0,
                    vec![
                        move_to(1.0),
                        with_velocity(20.0, vec![move_to(2.0)]),
                        move_to(3.0),
                    ],
                ),
                bare_sync(),
            ]),
            HashMap::new(),
        )
        .await
        .unwrap();

    let actions = &planner.dispatch_log()[0].actions;
    let velocities: Vec<Option<f64>> = actions.iter().map(|a| a.velocity).collect();
    assert_eq!(velocities, vec![Some(10.0), Some(20.0), Some(10.0)]);
}

#[tokio::test]
async fn move_with_suffix_applies_to_that_move_only() {
    let planner = Arc::new(SimulatedPlanner::new(&["left"]));
    let runtime = Runtime::new(config(), Arc::clone(&planner) as _);

    runtime
        .run(
            &program(vec![
                Stmt::new(StmtKind::Move(MoveStmt {
                    connector: Connector::PointToPoint,
                    target: Expr::pose([1.0, 0.0, 0.0, 0.0, 0.0, 0.0]),
                    tcp: None,
                    frame_relation: None,
                    modifiers: vec![ModifierCall {
                        name: "blending".into(),
                        value: Expr::number(5.0),
                    }],
                })),
                move_to(2.0),
                bare_sync(),
            ]),
            HashMap::new(),
        )
        .await
        .unwrap();

    let actions = &planner.dispatch_log()[0].actions;
    assert_eq!(actions[0].blending, Some(5.0));
    assert_eq!(actions[1].blending, None);
}

#[tokio::test]
async fn trailing_motions_flush_at_program_end() {
    let planner = Arc::new(SimulatedPlanner::new(&["left"]));
    let runtime = Runtime::new(config(), Arc::clone(&planner) as _);

    runtime
        .run(&program(vec![move_to(4.0)]), HashMap::new())
        .await
        .unwrap();

    assert_eq!(planner.dispatch_log().len(), 1);
}

#[tokio::test]
async fn pipeline_threshold_flushes_early() {
    let planner = Arc::new(SimulatedPlanner::new(&["left"]));
    let runtime = Runtime::new(
        RuntimeConfig {
            pipeline_threshold: 2,
            ..config()
        },
        Arc::clone(&planner) as _,
    );

    runtime
        .run(
            &program(vec![
                move_to(1.0),
                move_to(2.0),
                move_to(3.0),
                move_to(4.0),
                move_to(5.0),
            ]),
            HashMap::new(),
        )
        .await
        .unwrap();

    let sizes: Vec<usize> = planner
        .dispatch_log()
        .iter()
        .map(|record| record.actions.len())
        .collect();
    assert_eq!(sizes, vec![2, 2, 1]);
}

#[tokio::test]
async fn queue_hard_limit_is_enforced() {
    let planner = Arc::new(SimulatedPlanner::new(&["left"]));
    let runtime = Runtime::new(config(), Arc::clone(&planner) as _);

    let err = runtime
        .run(
            &program(vec![Stmt::new(StmtKind::Repeat {
                count: Expr::number(10_001.0),
                body: Block::new(vec![move_to(1.0)]),
            })]),
            HashMap::new(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err.kind, ExecErrorKind::QueueLimit { .. }));
    assert!(planner.dispatch_log().is_empty());
}

fn write_valve(value: bool) -> Stmt {
    Stmt::new(StmtKind::Write {
        device: Expr::string("plc"),
        key: Expr::string("valve"),
        value: Expr::boolean(value),
    })
}

#[tokio::test]
async fn write_without_queued_motions_is_immediate() {
    let planner = Arc::new(SimulatedPlanner::new(&["left"]));
    let runtime = Runtime::new(config(), Arc::clone(&planner) as _);

    // Records the device state at call time, before any sync has run.
    let observed = Arc::new(Mutex::new(Vec::new()));
    let observed_in = Arc::clone(&observed);
    let planner_in = Arc::clone(&planner);
    runtime.register_host_function(
        "observe",
        HostFunction::simple(Signature::any_args(), move |_args| {
            observed_in
                .lock()
                .unwrap()
                .push(planner_in.device("plc", "valve"));
            Ok(Value::Null)
        }),
    );

    runtime
        .run(
            &program(vec![
                write_valve(true),
                Stmt::new(StmtKind::Expr(Expr::call("observe", vec![]))),
            ]),
            HashMap::new(),
        )
        .await
        .unwrap();

    let observed = observed.lock().unwrap();
    assert!(observed[0].as_ref().unwrap().is_truthy());
}

#[tokio::test]
async fn write_behind_motions_defers_to_the_flush() {
    let planner = Arc::new(SimulatedPlanner::new(&["left"]));
    let runtime = Runtime::new(config(), Arc::clone(&planner) as _);

    // Records (dispatches so far, device state) at call time.
    let observed = Arc::new(Mutex::new(Vec::new()));
    let observed_in = Arc::clone(&observed);
    let planner_in = Arc::clone(&planner);
    runtime.register_host_function(
        "observe",
        HostFunction::simple(Signature::any_args(), move |_args| {
            observed_in.lock().unwrap().push((
                planner_in.dispatch_log().len(),
                planner_in.device("plc", "valve").is_some(),
            ));
            Ok(Value::Null)
        }),
    );

    runtime
        .run(
            &program(vec![
                move_to(1.0),
                write_valve(true),
                Stmt::new(StmtKind::Expr(Expr::call("observe", vec![]))),
                bare_sync(),
                Stmt::new(StmtKind::Expr(Expr::call("observe", vec![]))),
            ]),
            HashMap::new(),
        )
        .await
        .unwrap();

    // Queued behind the motion, the write lands only after the dispatch.
    assert_eq!(*observed.lock().unwrap(), vec![(0, false), (1, true)]);
}

#[tokio::test]
async fn deferred_write_is_skipped_when_dispatch_fails() {
    let planner = Arc::new(SimulatedPlanner::new(&["left"]));
    planner.inject_failure(PlannerError::Motion {
        controller: "left".into(),
        reason: "target unreachable".into(),
    });
    let runtime = Runtime::new(config(), Arc::clone(&planner) as _);

    let outcome = runtime
        .run(
            &program(vec![
                move_to(1.0),
                write_valve(true),
                Stmt::new(StmtKind::Sync {
                    do_body: None,
                    sync_body: None,
                    handler: Some(Block::new(vec![Stmt::new(StmtKind::Assign {
                        target: kinescript::interpreter::ast::AssignTarget::Name(
                            "caught".into(),
                        ),
                        value: Expr::boolean(true),
                    })])),
                }),
            ]),
            HashMap::new(),
        )
        .await
        .unwrap();

    assert!(outcome.variable("caught").unwrap().is_truthy());
    // The write was queued behind the failed motion and never reached the
    // device.
    assert!(planner.device("plc", "valve").is_none());
}

#[tokio::test]
async fn device_call_echoes_through_the_planner() {
    let planner = Arc::new(SimulatedPlanner::new(&["left"]));
    let runtime = Runtime::new(config(), Arc::clone(&planner) as _);

    let outcome = runtime
        .run(
            &program(vec![Stmt::new(StmtKind::Assign {
                target: kinescript::interpreter::ast::AssignTarget::Name("r".into()),
                value: Expr::device_call(
                    Expr::string("plc"),
                    Expr::string("open"),
                    vec![Expr::number(3.0), Expr::boolean(true)],
                ),
            })]),
            HashMap::new(),
        )
        .await
        .unwrap();

    let expected = Value::Array(vec![Value::Number(3.0), Value::Bool(true)]);
    assert!(outcome.variable("r").unwrap().equals(&expected));
    assert!(planner
        .device("plc", "last_call:open")
        .unwrap()
        .equals(&expected));
}

#[tokio::test]
async fn robot_pose_read_forces_flush() {
    let planner = Arc::new(SimulatedPlanner::new(&["left"]));
    let runtime = Runtime::new(config(), Arc::clone(&planner) as _);

    let outcome = runtime
        .run(
            &program(vec![
                move_to(7.0),
                Stmt::new(StmtKind::Assign {
                    target: kinescript::interpreter::ast::AssignTarget::Name("p".into()),
                    value: Expr::read(Expr::ident("left"), Expr::string("pose")),
                }),
            ]),
            HashMap::new(),
        )
        .await
        .unwrap();

    // The read observed the post-motion pose, so the flush happened first.
    match outcome.variable("p").unwrap() {
        Value::Pose(pose) => assert_eq!(pose.position.x, 7.0),
        other => panic!("expected pose, got {other:?}"),
    }
    assert_eq!(planner.dispatch_log().len(), 1);
}

#[tokio::test]
async fn tcp_change_without_sync_is_rejected() {
    let planner = Arc::new(SimulatedPlanner::new(&["left"]));
    let runtime = Runtime::new(config(), Arc::clone(&planner) as _);

    let move_with_tcp = |tcp: &str| {
        Stmt::new(StmtKind::Move(MoveStmt {
            connector: Connector::Line,
            target: Expr::pose([1.0, 0.0, 0.0, 0.0, 0.0, 0.0]),
            tcp: Some(Expr::string(tcp)),
            frame_relation: None,
            modifiers: vec![],
        }))
    };

    let err = runtime
        .run(
            &program(vec![move_with_tcp("gripper"), move_with_tcp("welder")]),
            HashMap::new(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err.kind, ExecErrorKind::Type(_)));
}
