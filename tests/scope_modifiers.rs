//! Scoping and dynamic modifiers: lexical closures, write-to-owner
//! semantics, and modifier-stack restoration on every exit path.

use std::collections::HashMap;
use std::sync::Arc;

use kinescript::interpreter::ast::{
    AssignTarget, BinaryOp, Block, Connector, Expr, FunctionDef, IfArm, ModifierCall, MoveStmt,
    Program, Stmt, StmtKind,
};
use kinescript::interpreter::value::Value;
use kinescript::runtime::{Runtime, RuntimeConfig, SimulatedPlanner};

fn config() -> RuntimeConfig {
    RuntimeConfig {
        controllers: vec!["left".into()],
        default_controller: Some("left".into()),
        ..RuntimeConfig::default()
    }
}

fn assign(name: &str, value: Expr) -> Stmt {
    Stmt::new(StmtKind::Assign {
        target: AssignTarget::Name(name.into()),
        value,
    })
}

fn function(name: &str, params: Vec<&str>, body: Vec<Stmt>) -> Stmt {
    Stmt::new(StmtKind::FunctionDef(Arc::new(FunctionDef {
        name: name.into(),
        params: params.into_iter().map(str::to_string).collect(),
        body: Block::new(body),
    })))
}

fn with_velocity(velocity: f64, body: Vec<Stmt>) -> Stmt {
    Stmt::new(StmtKind::With {
        modifiers: vec![ModifierCall {
            name: "velocity".into(),
            value: Expr::number(velocity),
        }],
        body: Block::new(body),
    })
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

async fn run_with_planner(statements: Vec<Stmt>) -> (kinescript::runtime::ProgramOutcome, Arc<SimulatedPlanner>) {
    let planner = Arc::new(SimulatedPlanner::new(&["left"]));
    let outcome = Runtime::new(config(), Arc::clone(&planner) as _)
        .run(
            &Program {
                body: Block::new(statements),
            },
            HashMap::new(),
        )
        .await
        .unwrap();
    (outcome, planner)
}

#[tokio::test]
async fn closure_reads_and_writes_its_defining_scope() {
    let (outcome, _) = run_with_planner(vec![
        assign("counter", Expr::number(0.0)),
        function(
            "bump",
            vec![],
            vec![assign(
                "counter",
                Expr::binary(BinaryOp::Add, Expr::ident("counter"), Expr::number(1.0)),
            )],
        ),
        Stmt::new(StmtKind::Expr(Expr::call("bump", vec![]))),
        Stmt::new(StmtKind::Expr(Expr::call("bump", vec![]))),
    ])
    .await;

    assert!(outcome
        .variable("counter")
        .unwrap()
        .equals(&Value::Number(2.0)));
}

#[tokio::test]
async fn parameters_shadow_outer_names() {
    let (outcome, _) = run_with_planner(vec![
        assign("n", Expr::number(100.0)),
        function(
            "id",
            vec!["n"],
            vec![Stmt::new(StmtKind::Return {
                value: Some(Expr::ident("n")),
            })],
        ),
        assign("result", Expr::call("id", vec![Expr::number(7.0)])),
    ])
    .await;

    assert!(outcome.variable("result").unwrap().equals(&Value::Number(7.0)));
    assert!(outcome.variable("n").unwrap().equals(&Value::Number(100.0)));
}

#[tokio::test]
async fn modifier_stack_restored_across_function_calls() {
    // The function pushes its own velocity and returns early from inside it;
    // the caller's setting must survive.
    let (_, planner) = run_with_planner(vec![
        function(
            "detour",
            vec![],
            vec![with_velocity(
                99.0,
                vec![
                    move_to(2.0),
                    Stmt::new(StmtKind::If {
                        arms: vec![IfArm {
                            condition: Expr::boolean(true),
                            body: Block::new(vec![Stmt::new(StmtKind::Return { value: None })]),
                        }],
                        else_body: None,
                    }),
                ],
            )],
        ),
        with_velocity(
            10.0,
            vec![
                move_to(1.0),
                Stmt::new(StmtKind::Expr(Expr::call("detour", vec![]))),
                move_to(3.0),
            ],
        ),
    ])
    .await;

    let velocities: Vec<Option<f64>> = planner.dispatch_log()[0]
        .actions
        .iter()
        .map(|a| a.velocity)
        .collect();
    assert_eq!(velocities, vec![Some(10.0), Some(99.0), Some(10.0)]);
}

#[tokio::test]
async fn break_restores_modifier_stack() {
    let loop_body = Block::new(vec![with_velocity(
        50.0,
        vec![move_to(1.0), Stmt::new(StmtKind::Break)],
    )]);
    let (_, planner) = run_with_planner(vec![
        Stmt::new(StmtKind::While {
            condition: Expr::boolean(true),
            body: loop_body,
        }),
        move_to(2.0),
    ])
    .await;

    let velocities: Vec<Option<f64>> = planner.dispatch_log()[0]
        .actions
        .iter()
        .map(|a| a.velocity)
        .collect();
    // The move after the loop no longer sees the inner velocity.
    assert_eq!(velocities, vec![Some(50.0), None]);
}

#[tokio::test]
async fn unbound_write_in_function_stays_local() {
    let (outcome, _) = run_with_planner(vec![
        function(
            "scratch",
            vec![],
            vec![assign("tmp", Expr::number(1.0))],
        ),
        Stmt::new(StmtKind::Expr(Expr::call("scratch", vec![]))),
    ])
    .await;

    assert!(outcome.variable("tmp").is_none());
}

#[tokio::test]
async fn nested_with_blocks_unwind_in_order() {
    let (_, planner) = run_with_planner(vec![with_velocity(
        1.0,
        vec![
            with_velocity(2.0, vec![with_velocity(3.0, vec![move_to(1.0)]), move_to(2.0)]),
            move_to(3.0),
        ],
    )])
    .await;

    let velocities: Vec<Option<f64>> = planner.dispatch_log()[0]
        .actions
        .iter()
        .map(|a| a.velocity)
        .collect();
    assert_eq!(velocities, vec![Some(3.0), Some(2.0), Some(1.0)]);
}
