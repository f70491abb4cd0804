use parfor_rs::plan::{
    BlockId, BlockKind, DataPartitioner, ExecMode, Hop, HopInput, HopMemoryEstimator,
    LocalVariableMap, LoopBounds, MatrixFormat, MatrixMeta, NodeId, ParForParams, ParamType,
    PartitionFormat, Program, ProgramBlock, ResultMerge, LEFT_INDEXING_OP, RIGHT_INDEXING_OP,
};
use parfor_rs::{
    ExecType, OptimizeServices, OptimizerConfig, ParForPlan, ParforError, RuleBasedOptimizer,
    StaticInfrastructure, TaskPartitionerKind,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const MB: f64 = 1024.0 * 1024.0;
const GB: u64 = 1 << 30;

fn cluster() -> StaticInfrastructure {
    StaticInfrastructure::new(8, GB, 4, 32, GB)
}

fn optimizer(nested: bool) -> RuleBasedOptimizer {
    RuleBasedOptimizer::new(OptimizerConfig {
        apply_nested_parallelism: nested,
        ..OptimizerConfig::default()
    })
}

fn run(
    optimizer: &RuleBasedOptimizer,
    plan: &mut ParForPlan,
    vars: &LocalVariableMap,
) -> parfor_rs::Result<parfor_rs::OptimizeSummary> {
    run_on(&cluster(), optimizer, plan, vars)
}

fn run_on(
    infra: &StaticInfrastructure,
    optimizer: &RuleBasedOptimizer,
    plan: &mut ParForPlan,
    vars: &LocalVariableMap,
) -> parfor_rs::Result<parfor_rs::OptimizeSummary> {
    let estimator = HopMemoryEstimator::new();
    optimizer.optimize(
        plan,
        vars,
        OptimizeServices {
            infrastructure: infra,
            estimator: &estimator,
        },
    )
}

struct LoopBuilder {
    program: Program,
    root: BlockId,
}

impl LoopBuilder {
    fn new(n: i64, params: ParForParams) -> Self {
        let mut program = Program::new();
        let root = program.add_block(ProgramBlock::parfor(LoopBounds::constant("i", 1, n, 1), params));
        Self { program, root }
    }

    fn plan(self) -> ParForPlan {
        ParForPlan::new(self.program, self.root).expect("root is a parfor block")
    }
}

fn local_hop(plan: &mut ParForPlan, parent: NodeId, op: &str, bytes: f64) -> NodeId {
    let hop = plan
        .program_mut()
        .add_hop(Hop::new(op, vec![HopInput::data("A")], Some(bytes)));
    plan.add_hop_node(parent, hop, ExecType::Local)
}

/// Root loop over `n` iterations with a generic body holding one local hop of `bytes`.
fn flat_plan(n: i64, bytes: f64) -> ParForPlan {
    let mut builder = LoopBuilder::new(n, ParForParams::default());
    let body = builder
        .program
        .add_child_block(builder.root, ProgramBlock::generic())
        .expect("root exists");
    let mut plan = builder.plan();
    let root = plan.tree().root();
    let body = plan.add_block_node(root, body).expect("body block exists");
    local_hop(&mut plan, body, "ba+*", bytes);
    plan
}

/// Root loop over `outer` iterations containing a parallel loop over `inner` iterations.
fn nested_plan(outer: i64, inner: i64, bytes: f64) -> (ParForPlan, NodeId) {
    let mut builder = LoopBuilder::new(outer, ParForParams::default());
    let inner_block = builder
        .program
        .add_child_block(
            builder.root,
            ProgramBlock::parfor(LoopBounds::constant("j", 1, inner, 1), ParForParams::default()),
        )
        .expect("root exists");
    let mut plan = builder.plan();
    let root = plan.tree().root();
    let inner = plan
        .add_block_node(root, inner_block)
        .expect("inner block exists");
    local_hop(&mut plan, inner, "ba+*", bytes);
    (plan, inner)
}

#[test]
fn small_loop_runs_locally_with_all_cores() {
    let mut plan = flat_plan(10, 10.0 * MB);
    let summary = run(&optimizer(false), &mut plan, &LocalVariableMap::new()).expect("optimize");

    assert_eq!(summary.num_iterations, 10);
    assert_eq!(summary.exec_type, ExecType::Local);
    assert_eq!(summary.data_partitioner, DataPartitioner::None);
    assert_eq!(summary.colocated_matrix, None);
    assert!(!summary.nested);
    assert_eq!(summary.evaluated_plans, 1);
    assert_eq!(summary.decisions.len(), 1);

    let decision = &summary.decisions[0];
    assert_eq!(decision.k, 8);
    assert_eq!(decision.task_partitioner, TaskPartitionerKind::Factoring);
    assert_eq!(decision.result_merge, ResultMerge::LocalAutomatic);

    let root = plan.tree().root();
    let params = plan.parfor_params(root).expect("root params");
    assert_eq!(params.exec_mode, ExecMode::Local);
    assert_eq!(params.degree_of_parallelism, 8);
    let budget = params.recompile_memory_budget.expect("local loop gets a budget");
    let expected = 0.7 * GB as f64 / 8.0;
    assert!((budget - expected).abs() < 1.0, "budget {budget} != {expected}");
}

#[test]
fn large_loop_goes_remote_and_serializes_inner_loops() {
    let (mut plan, inner) = nested_plan(1000, 50, 10.0 * MB);
    let summary = run(&optimizer(false), &mut plan, &LocalVariableMap::new()).expect("optimize");

    assert_eq!(summary.exec_type, ExecType::Remote);
    let root = plan.tree().root();
    assert_eq!(plan.tree().node(root).k(), 32);
    let params = plan.parfor_params(root).expect("root params");
    assert_eq!(params.exec_mode, ExecMode::RemoteMr);
    assert_eq!(params.recompile_memory_budget, None);

    // k = 1 leaves nothing to parallelize, so the inner loop is demoted
    assert_eq!(summary.removed_parfors, 1);
    assert_eq!(summary.decisions.len(), 1);
    let demoted = plan
        .program()
        .block(plan.block_of(inner).expect("inner bound"))
        .expect("inner block");
    assert_eq!(demoted.kind, BlockKind::For);
    assert!(demoted.parfor.is_none());
}

#[test]
fn leftover_parallelism_flows_to_inner_loop() {
    let (mut plan, inner) = nested_plan(4, 100, 10.0 * MB);
    let summary = run(&optimizer(false), &mut plan, &LocalVariableMap::new()).expect("optimize");

    assert_eq!(summary.exec_type, ExecType::Local);
    assert_eq!(summary.max_problem_size, 100);
    assert_eq!(summary.removed_parfors, 0);
    let root = plan.tree().root();
    assert_eq!(plan.tree().node(root).k(), 4);
    assert_eq!(plan.tree().node(inner).k(), 2);
    assert!(plan.tree().total_k(root) <= 8);

    let ks: Vec<usize> = summary.decisions.iter().map(|decision| decision.k).collect();
    assert_eq!(ks, vec![4, 2]);
}

#[test]
fn saturated_outer_loop_demotes_inner_parfor() {
    let (mut plan, inner) = nested_plan(10, 100, 10.0 * MB);
    let summary = run(&optimizer(false), &mut plan, &LocalVariableMap::new()).expect("optimize");

    assert_eq!(summary.exec_type, ExecType::Local);
    assert_eq!(summary.removed_parfors, 1);
    let root = plan.tree().root();
    assert_eq!(plan.tree().node(root).k(), 8);
    let block = plan
        .program()
        .block(plan.block_of(inner).expect("inner bound"))
        .expect("inner block");
    assert_eq!(block.kind, BlockKind::For);
}

#[test]
fn remote_loop_is_split_across_nodes() {
    let mut plan = flat_plan(1000, 10.0 * MB);
    let root = plan.tree().root();
    let body = plan.tree().children(root)[0];
    let summary = run(&optimizer(true), &mut plan, &LocalVariableMap::new()).expect("optimize");

    assert!(summary.nested);
    assert_eq!(summary.num_iterations, 1000);
    assert_eq!(summary.exec_type, ExecType::Remote);

    let inner = plan.tree().children(root)[0];
    assert_ne!(inner, body);
    assert_eq!(plan.tree().children(inner), &[body]);
    assert_eq!(plan.tree().num_iterations(root).expect("outer count"), 4);
    assert_eq!(plan.tree().num_iterations(inner).expect("inner count"), 250);

    let outer_block = plan
        .program()
        .block(plan.block_of(root).expect("outer bound"))
        .expect("outer block");
    let bounds = outer_block.bounds.as_ref().expect("outer bounds");
    assert_eq!(bounds.var, "__pixi");
    assert_eq!(bounds.incr, 250);

    assert_eq!(summary.decisions.len(), 2);
    let (outer, nested) = (&summary.decisions[0], &summary.decisions[1]);
    assert_eq!(outer.exec_type, ExecType::Remote);
    assert_eq!(outer.k, 4);
    assert_eq!(outer.task_partitioner, TaskPartitionerKind::Static);
    assert_eq!(nested.exec_type, ExecType::Local);
    assert_eq!(nested.k, 8);
    assert_eq!(nested.task_partitioner, TaskPartitionerKind::Factoring);
}

fn partitioned_plan() -> (ParForPlan, LocalVariableMap) {
    let params = ParForParams {
        partition_candidates: vec![("X".to_string(), PartitionFormat::RowWise)],
        ..ParForParams::default()
    };
    let mut plan = LoopBuilder::new(1000, params).plan();
    let root = plan.tree().root();
    let rix = plan.program_mut().add_hop(Hop::new(
        RIGHT_INDEXING_OP,
        vec![
            HopInput::data("X"),
            HopInput::data("i"),
            HopInput::data("i"),
            HopInput::expr("1"),
            HopInput::expr("1000"),
        ],
        Some(800.0 * MB),
    ));
    plan.add_hop_node(root, rix, ExecType::Remote);
    local_hop(&mut plan, root, "uak+", MB);

    let mut vars = LocalVariableMap::new();
    vars.insert("X", MatrixMeta::new(100_000, 1000, 100_000_000));
    (plan, vars)
}

#[test]
fn row_slices_are_partitioned_and_colocated() {
    let (mut plan, vars) = partitioned_plan();
    let summary = run(&optimizer(false), &mut plan, &vars).expect("optimize");

    assert_eq!(summary.data_partitioner, DataPartitioner::RemoteMr);
    assert_eq!(summary.exec_type, ExecType::Remote);
    assert_eq!(summary.colocated_matrix.as_deref(), Some("X"));
    assert_eq!(summary.memory_estimate, MB);

    let root = plan.tree().root();
    let rix = plan.tree().children(root)[0];
    let node = plan.tree().node(rix);
    assert_eq!(node.exec_type(), ExecType::Local);
    assert_eq!(node.param(ParamType::DataPartitionFormat), Some("ROW_WISE"));
    let hop = plan
        .program()
        .hop(plan.hop_of(rix).expect("rix bound"))
        .expect("rix hop");
    assert_eq!(hop.mem_estimate, Some(8000.0));
}

#[test]
fn repeated_optimization_is_stable() {
    for nested in [false, true] {
        let (mut plan, vars) = partitioned_plan();
        let optimizer = optimizer(nested);
        let first = run(&optimizer, &mut plan, &vars).expect("first pass");
        assert_eq!(first.nested, nested);
        let after_first = plan.clone();
        let second = run(&optimizer, &mut plan, &vars).expect("second pass");

        assert_eq!(first, second, "nested={nested}");
        assert_eq!(plan, after_first, "nested={nested}");
    }
}

#[test]
fn split_loop_keeps_its_decisions_when_optimized_again() {
    let mut plan = flat_plan(1000, 10.0 * MB);
    let optimizer = optimizer(true);
    let first = run(&optimizer, &mut plan, &LocalVariableMap::new()).expect("first pass");
    let root = plan.tree().root();
    let nodes = plan.tree().len();
    let second = run(&optimizer, &mut plan, &LocalVariableMap::new()).expect("second pass");

    assert_eq!(plan.tree().len(), nodes, "the loop is not split twice");
    assert_eq!(first.decisions, second.decisions);
    assert!(second.nested);
    assert_eq!(second.num_iterations, 1000);
    assert_eq!(second.max_problem_size, 1000);
    assert_eq!(plan.tree().num_iterations(root).expect("outer count"), 4);

    let shape: Vec<_> = second
        .decisions
        .iter()
        .map(|decision| (decision.exec_type, decision.k, decision.task_partitioner))
        .collect();
    assert_eq!(
        shape,
        vec![
            (ExecType::Remote, 4, TaskPartitionerKind::Static),
            (ExecType::Local, 8, TaskPartitionerKind::Factoring),
        ]
    );
}

#[test]
fn remote_slack_reaches_inner_loop() {
    // 10 remote tasks leave floor(32 / 10) = 3 workers per task
    let (mut plan, inner) = nested_plan(10, 2000, 10.0 * MB);
    let summary = run(&optimizer(false), &mut plan, &LocalVariableMap::new()).expect("optimize");

    assert_eq!(summary.exec_type, ExecType::Remote);
    assert_eq!(summary.removed_parfors, 0);
    let root = plan.tree().root();
    assert_eq!(plan.tree().node(root).k(), 10);
    assert_eq!(plan.tree().node(inner).k(), 3);
    assert_eq!(plan.tree().total_k(root), 30);
}

#[test]
fn parallelism_never_exceeds_the_worker_budget() {
    let mut rng = StdRng::seed_from_u64(0xfeed);
    for _ in 0..300 {
        let lk: usize = rng.gen_range(1..=16);
        let rnk: usize = rng.gen_range(1..=8);
        let rk: usize = rng.gen_range(rnk..=64);
        let infra = StaticInfrastructure::new(lk, 4 * GB, rnk, rk, 2 * GB);
        let outer: i64 = rng.gen_range(1..200);
        let bytes = f64::from(rng.gen_range(1..400u32)) * MB;
        let mut plan = if rng.gen_bool(0.3) {
            flat_plan(outer, bytes)
        } else {
            nested_plan(outer, rng.gen_range(1..3000), bytes).0
        };
        let mixed = rng.gen_bool(0.2);
        if mixed {
            let root = plan.tree().root();
            let hop = plan
                .program_mut()
                .add_hop(Hop::new("ba+*", vec![HopInput::data("B")], None));
            plan.add_hop_node(root, hop, ExecType::Remote);
        }

        let summary = run_on(
            &infra,
            &optimizer(rng.gen_bool(0.5)),
            &mut plan,
            &LocalVariableMap::new(),
        )
        .expect("optimize");
        let cap = match summary.exec_type {
            ExecType::Local if mixed => 2 * lk,
            ExecType::Local => lk,
            ExecType::Remote => rk,
        };
        let total = plan.tree().total_k(plan.tree().root());
        assert!(
            total <= cap,
            "total k {total} > {cap} for lk={lk} rnk={rnk} rk={rk} n={outer} ({:?})",
            summary.exec_type
        );
    }
}

fn left_indexing_plan(result: MatrixMeta) -> (ParForPlan, LocalVariableMap) {
    let params = ParForParams {
        result_vars: vec!["R".to_string()],
        ..ParForParams::default()
    };
    let mut plan = LoopBuilder::new(1000, params).plan();
    let root = plan.tree().root();
    let lix = plan.program_mut().add_hop(Hop::new(
        LEFT_INDEXING_OP,
        vec![
            HopInput::data("R"),
            HopInput::data("tmp"),
            HopInput::data("i"),
            HopInput::data("i"),
            HopInput::expr("1"),
            HopInput::expr("100"),
        ],
        None,
    ));
    plan.add_hop_node(root, lix, ExecType::Remote);
    local_hop(&mut plan, root, "uak+", MB);

    let mut vars = LocalVariableMap::new();
    vars.insert("R", result);
    (plan, vars)
}

#[test]
fn remote_left_indexing_merges_remotely() {
    let (mut plan, vars) = left_indexing_plan(MatrixMeta::new(1000, 100, 50_000));
    let summary = run(&optimizer(false), &mut plan, &vars).expect("optimize");

    // a remote operator keeps the loop itself in-process
    assert_eq!(summary.exec_type, ExecType::Local);
    assert_eq!(summary.decisions[0].k, 16);
    assert_eq!(summary.decisions[0].result_merge, ResultMerge::RemoteMr);
    let root = plan.tree().root();
    assert_eq!(
        plan.tree().node(root).param(ParamType::ResultMerge),
        Some("REMOTE_MR")
    );
}

#[test]
fn empty_cell_results_are_merged_by_copy() {
    let meta = MatrixMeta::new(1000, 100, 0).with_format(MatrixFormat::TextCell);
    let (mut plan, vars) = left_indexing_plan(meta);
    let summary = run(&optimizer(false), &mut plan, &vars).expect("optimize");
    assert_eq!(summary.decisions[0].result_merge, ResultMerge::LocalAutomatic);

    let (mut plan, vars) = left_indexing_plan(meta);
    let no_copy = RuleBasedOptimizer::new(OptimizerConfig {
        allow_copy_cell_files: false,
        apply_nested_parallelism: false,
        ..OptimizerConfig::default()
    });
    let summary = run(&no_copy, &mut plan, &vars).expect("optimize");
    assert_eq!(summary.decisions[0].result_merge, ResultMerge::RemoteMr);
}

#[test]
fn missing_infrastructure_metric_aborts() {
    let mut plan = flat_plan(10, MB);
    let infra = StaticInfrastructure {
        local_max_memory: None,
        ..cluster()
    };
    let estimator = HopMemoryEstimator::new();
    let err = optimizer(false)
        .optimize(
            &mut plan,
            &LocalVariableMap::new(),
            OptimizeServices {
                infrastructure: &infra,
                estimator: &estimator,
            },
        )
        .expect_err("metric is missing");
    assert!(matches!(err, ParforError::ConfigMissing(_)));
}

#[test]
fn hop_without_estimate_fails_estimation() {
    let mut plan = LoopBuilder::new(10, ParForParams::default()).plan();
    let hop = plan
        .program_mut()
        .add_hop(Hop::new("ba+*", vec![HopInput::data("A")], None));
    let root = plan.tree().root();
    plan.add_hop_node(root, hop, ExecType::Local);

    let err = run(&optimizer(false), &mut plan, &LocalVariableMap::new())
        .expect_err("estimate is missing");
    assert!(matches!(err, ParforError::EstimationFailed(_)));
}
