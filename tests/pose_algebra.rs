//! Pose and frame algebra: composition/inversion laws and relation-graph
//! resolution, both on the types directly and through programs.

use std::collections::HashMap;
use std::sync::Arc;

use proptest::prelude::*;

use kinescript::interpreter::ast::{
    AssignTarget, BinaryOp, Block, Connector, Expr, MoveStmt, Program, Stmt, StmtKind, UnaryOp,
};
use kinescript::interpreter::pose::Pose;
use kinescript::interpreter::value::Value;
use kinescript::runtime::{Runtime, RuntimeConfig, SimulatedPlanner};

const TOL: f64 = 1e-6;

proptest! {
    #[test]
    fn compose_with_inverse_is_identity(
        x in -100.0..100.0f64,
        y in -100.0..100.0f64,
        z in -100.0..100.0f64,
        rx in -3.0..3.0f64,
        ry in -3.0..3.0f64,
        rz in -3.0..3.0f64,
    ) {
        let p = Pose::from_components([x, y, z, rx, ry, rz]);
        prop_assert!(p.compose(&p.inverse()).approx_eq(&Pose::identity(), TOL));
        prop_assert!(p.inverse().compose(&p).approx_eq(&Pose::identity(), TOL));
    }

    #[test]
    fn double_inverse_is_identity_map(
        x in -100.0..100.0f64,
        rx in -3.0..3.0f64,
        ry in -3.0..3.0f64,
        rz in -3.0..3.0f64,
    ) {
        let p = Pose::from_components([x, 0.5, -2.0, rx, ry, rz]);
        prop_assert!(p.inverse().inverse().approx_eq(&p, TOL));
    }

    #[test]
    fn composition_is_associative(
        a in -2.0..2.0f64,
        b in -2.0..2.0f64,
        c in -2.0..2.0f64,
    ) {
        let p = Pose::from_components([1.0, 0.0, 0.0, a, 0.0, 0.0]);
        let q = Pose::from_components([0.0, 2.0, 0.0, 0.0, b, 0.0]);
        let r = Pose::from_components([0.0, 0.0, 3.0, 0.0, 0.0, c]);
        let left = p.compose(&q).compose(&r);
        let right = p.compose(&q.compose(&r));
        prop_assert!(left.approx_eq(&right, TOL));
    }
}

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

async fn run(statements: Vec<Stmt>) -> kinescript::runtime::ProgramOutcome {
    let planner = Arc::new(SimulatedPlanner::new(&["left"]));
    Runtime::new(config(), planner as _)
        .run(
            &Program {
                body: Block::new(statements),
            },
            HashMap::new(),
        )
        .await
        .unwrap()
}

fn expect_pose(value: &Value) -> Pose {
    match value {
        Value::Pose(pose) => *pose,
        other => panic!("expected pose, got {other:?}"),
    }
}

#[tokio::test]
async fn compose_and_invert_operators() {
    let outcome = run(vec![
        assign("p", Expr::pose([1.0, 2.0, 3.0, 0.1, 0.2, 0.3])),
        assign(
            "q",
            Expr::binary(
                BinaryOp::Compose,
                Expr::ident("p"),
                Expr::unary(UnaryOp::Invert, Expr::ident("p")),
            ),
        ),
    ])
    .await;

    let q = expect_pose(outcome.variable("q").unwrap());
    assert!(q.approx_eq(&Pose::identity(), TOL));
}

#[tokio::test]
async fn three_component_tuple_is_a_position() {
    let outcome = run(vec![assign(
        "p",
        Expr::tuple(vec![
            Expr::number(1.0),
            Expr::number(2.0),
            Expr::number(3.0),
        ]),
    )])
    .await;

    let p = expect_pose(outcome.variable("p").unwrap());
    assert_eq!(p.position.y, 2.0);
    assert_eq!(p.orientation, kinescript::interpreter::pose::Vector3::default());
}

#[tokio::test]
async fn frame_relations_compose_along_the_graph() {
    let set_relation = |target: &str, source: &str, pose: [f64; 6]| {
        Stmt::new(StmtKind::Assign {
            target: AssignTarget::Relation {
                target: target.into(),
                source: source.into(),
            },
            value: Expr::pose(pose),
        })
    };
    let outcome = run(vec![
        set_relation("part", "table", [1.0, 0.0, 0.0, 0.0, 0.0, 0.0]),
        set_relation("hole", "part", [0.0, 2.0, 0.0, 0.0, 0.0, 0.0]),
        assign("direct", Expr::relation("hole", "table")),
        assign("reversed", Expr::relation("table", "hole")),
    ])
    .await;

    let direct = expect_pose(outcome.variable("direct").unwrap());
    assert!(direct.approx_eq(&Pose::from_components([1.0, 2.0, 0.0, 0.0, 0.0, 0.0]), TOL));
    let reversed = expect_pose(outcome.variable("reversed").unwrap());
    assert!(reversed.approx_eq(&direct.inverse(), TOL));
}

#[tokio::test]
async fn flange_relation_seeds_from_planned_pose() {
    let outcome = run(vec![
        Stmt::new(StmtKind::Move(MoveStmt {
            connector: Connector::Line,
            target: Expr::pose([5.0, 0.0, 1.0, 0.0, 0.0, 0.0]),
            tcp: None,
            frame_relation: None,
            modifiers: vec![],
        })),
        Stmt::new(StmtKind::Sync {
            do_body: None,
            sync_body: None,
            handler: None,
        }),
        assign("flange", Expr::relation("flange", "robot")),
    ])
    .await;

    let flange = expect_pose(outcome.variable("flange").unwrap());
    assert!(flange.approx_eq(&Pose::from_components([5.0, 0.0, 1.0, 0.0, 0.0, 0.0]), TOL));
}

#[tokio::test]
async fn anchored_move_targets_the_flange_through_the_relation() {
    let planner = Arc::new(SimulatedPlanner::new(&["left"]));
    let runtime = Runtime::new(config(), Arc::clone(&planner) as _);

    // Tool tip sits 0.1 above the flange; asking the tip to reach z=1.0
    // must send the flange to z=0.9.
    let statements = vec![
        Stmt::new(StmtKind::Assign {
            target: AssignTarget::Relation {
                target: "tip".into(),
                source: "flange".into(),
            },
            value: Expr::pose([0.0, 0.0, 0.1, 0.0, 0.0, 0.0]),
        }),
        Stmt::new(StmtKind::Move(MoveStmt {
            connector: Connector::Line,
            target: Expr::pose([0.0, 0.0, 1.0, 0.0, 0.0, 0.0]),
            tcp: None,
            frame_relation: Some(("tip".into(), "robot".into())),
            modifiers: vec![],
        })),
    ];
    runtime
        .run(
            &Program {
                body: Block::new(statements),
            },
            HashMap::new(),
        )
        .await
        .unwrap();

    let log = planner.dispatch_log();
    assert_eq!(log.len(), 1);
    let target = log[0].actions[0].target;
    assert!((target.position.z - 0.9).abs() < TOL);
}

#[tokio::test]
async fn unknown_relation_is_an_error() {
    let planner = Arc::new(SimulatedPlanner::new(&["left"]));
    let runtime = Runtime::new(config(), planner as _);
    let err = runtime
        .run(
            &Program {
                body: Block::new(vec![assign("q", Expr::relation("ghost", "table"))]),
            },
            HashMap::new(),
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err.kind,
        kinescript::runtime::error::ExecErrorKind::FrameResolution { .. }
    ));
}
