mod common;

use std::sync::Arc;

use common::*;
use configurator_explorer::error::OracleError;
use configurator_explorer::models::{ConfidenceThresholds, ExplorationTarget};
use configurator_explorer::services::{compute_signature, InMemoryStore, MemoryHandle, SqliteStore};
use configurator_explorer::workflow::{ExplorationOutcome, TerminationReason};

/// 型号页直接进入汇总页
fn one_step_configurator() -> ScriptedDriver {
    one_step_configurator_with("Continue", false)
}

fn model_page(continue_label: &str, disabled: bool) -> configurator_explorer::models::Snapshot {
    let mut next = element("button", "btn-next", continue_label);
    next.disabled = disabled;
    page(
        &["Step 1: Model", "The Solo", "The Duo", continue_label],
        vec![
            priced("div", "model-card", "The Solo", "$39,000"),
            priced("div", "model-card", "The Duo", "$52,000"),
            next,
        ],
    )
}

/// 继续按钮的文字和可用状态可调，页面签名不变
fn one_step_configurator_with(continue_label: &str, disabled: bool) -> ScriptedDriver {
    ScriptedDriver::new("model")
        .with_page("model", model_page(continue_label, disabled))
        .with_page(
            "summary",
            page(
                &["Your sauna", "Total $39,000", "Add to cart"],
                vec![
                    priced("div", "summary-line", "Total $39,000", "$39,000"),
                    element("button", "btn-cart", "Add to cart"),
                ],
            ),
        )
        .with_link("model", 2, "summary")
}

fn pick_solo() -> configurator_explorer::models::OracleGuidance {
    select_and_continue(
        "Model",
        options("Model", &["The Solo", "The Duo"]),
        card("model-card", "The Solo"),
    )
}

async fn run_once(oracle: &Arc<ScriptedOracle>, memory: &MemoryHandle) -> ExplorationOutcome {
    run_on(oracle, memory, one_step_configurator()).await
}

async fn run_on(
    oracle: &Arc<ScriptedOracle>,
    memory: &MemoryHandle,
    mut driver: ScriptedDriver,
) -> ExplorationOutcome {
    let flow = flow_with(Some(oracle.clone()), memory.clone());
    let outcome = flow.run(&mut driver, &ExplorationTarget::new(TARGET_URL)).await;
    assert!(driver.closed);
    outcome
}

/// 三次成功运行，让型号页的转移达到置信度门槛
async fn learn_model_step(oracle: &Arc<ScriptedOracle>, memory: &MemoryHandle) {
    let first = run_once(oracle, memory).await;
    assert_eq!(first.stats.oracle_calls, 2);
    for _ in 0..2 {
        let outcome = run_once(oracle, memory).await;
        assert_eq!(outcome.stats.oracle_calls, 1);
    }
}

#[tokio::test]
async fn test_fourth_run_replays_from_memory() {
    // 第一次：型号页 + 汇总页各问一次；之后汇总页已是终止状态
    let oracle = ScriptedOracle::new([
        Ok(pick_solo()),
        Ok(complete()),
        Ok(pick_solo()),
        Ok(pick_solo()),
    ]);
    let memory = MemoryHandle::new(Arc::new(InMemoryStore::new()), ConfidenceThresholds::default());

    let first = run_once(&oracle, &memory).await;
    assert_eq!(first.termination(), Some(TerminationReason::Completed));
    assert_eq!(first.stats.oracle_calls, 2);
    assert_eq!(first.options.len(), 2);

    for _ in 0..2 {
        let outcome = run_once(&oracle, &memory).await;
        assert!(outcome.is_complete());
        assert_eq!(outcome.stats.oracle_calls, 1);
        assert_eq!(outcome.stats.memory_replays, 0);
    }

    let fourth = run_once(&oracle, &memory).await;
    assert!(fourth.is_complete());
    assert_eq!(fourth.stats.oracle_calls, 0);
    assert_eq!(fourth.stats.memory_replays, 1);
    assert_eq!(oracle.call_count(), 4);
    // 回放时按记忆中的选项模式记录页面上的选项
    let components: Vec<_> = fourth.options.iter().map(|o| o.component.as_str()).collect();
    assert_eq!(components, vec!["The Solo", "The Duo"]);

    let stats = memory.stats(Some("sauna.example")).await.unwrap();
    assert_eq!(stats.states, 2);
    assert_eq!(stats.transitions, 1);
    assert_eq!(stats.continue_patterns, 1);
}

#[tokio::test]
async fn test_sqlite_memory_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("memory.db");
    let oracle = ScriptedOracle::new([
        Ok(pick_solo()),
        Ok(complete()),
        Ok(pick_solo()),
        Ok(pick_solo()),
    ]);

    let open = || {
        MemoryHandle::new(
            Arc::new(SqliteStore::open(&db_path).unwrap()),
            ConfidenceThresholds::default(),
        )
    };

    let memory = open();
    run_once(&oracle, &memory).await;
    run_once(&oracle, &memory).await;
    drop(memory);

    // 新进程：计数从文件中恢复
    let memory = open();
    let third = run_once(&oracle, &memory).await;
    assert_eq!(third.stats.oracle_calls, 1);

    let fourth = run_once(&oracle, &memory).await;
    assert_eq!(fourth.stats.oracle_calls, 0);
    assert_eq!(fourth.stats.memory_replays, 1);
    assert_eq!(fourth.termination(), Some(TerminationReason::Completed));
    assert_eq!(oracle.call_count(), 4);
}

#[tokio::test]
async fn test_disabled_memory_always_asks_oracle() {
    let oracle = ScriptedOracle::new([
        Ok(pick_solo()),
        Ok(complete()),
        Ok(pick_solo()),
        Ok(complete()),
    ]);
    let memory = MemoryHandle::disabled();

    for _ in 0..2 {
        let outcome = run_once(&oracle, &memory).await;
        assert!(outcome.is_complete());
        assert_eq!(outcome.stats.oracle_calls, 2);
        assert_eq!(outcome.stats.transitions_recorded, 0);
    }
    assert!(memory.stats(None).await.is_none());
}

#[tokio::test]
async fn test_replay_survives_renamed_continue_button() {
    let oracle = ScriptedOracle::new([
        Ok(pick_solo()),
        Ok(complete()),
        Ok(pick_solo()),
        Ok(pick_solo()),
    ]);
    let memory = MemoryHandle::new(Arc::new(InMemoryStore::new()), ConfidenceThresholds::default());
    learn_model_step(&oracle, &memory).await;

    let renamed = run_on(&oracle, &memory, one_step_configurator_with("Next", false)).await;
    assert_eq!(renamed.termination(), Some(TerminationReason::Completed));
    assert_eq!(renamed.stats.oracle_calls, 0);
    assert_eq!(renamed.stats.memory_replays, 1);
    assert_eq!(oracle.call_count(), 4);

    let recorded: Vec<_> = renamed
        .options
        .iter()
        .map(|o| {
            (
                o.category.as_str(),
                o.component.as_str(),
                o.price.as_deref(),
                o.model_context.as_str(),
            )
        })
        .collect();
    assert_eq!(
        recorded,
        vec![
            ("step-0", "The Solo", Some("$39,000"), "default"),
            ("step-0", "The Duo", Some("$52,000"), "default"),
        ]
    );
}

#[tokio::test]
async fn test_unresolvable_replay_counts_as_failure() {
    let oracle = ScriptedOracle::new([
        Ok(pick_solo()),
        Ok(complete()),
        Ok(pick_solo()),
        Ok(pick_solo()),
        Err(OracleError::Timeout { timeout_secs: 60 }),
        Ok(pick_solo()),
    ]);
    let memory = MemoryHandle::new(Arc::new(InMemoryStore::new()), ConfidenceThresholds::default());
    learn_model_step(&oracle, &memory).await;

    // 继续按钮可见但被禁用：记忆动作落不到元素上
    let blocked = run_on(&oracle, &memory, one_step_configurator_with("Continue", true)).await;
    assert_eq!(blocked.termination(), Some(TerminationReason::OracleUnavailable));
    assert_eq!(blocked.stats.memory_replays, 0);
    assert_eq!(blocked.stats.oracle_calls, 1);
    assert_eq!(blocked.stats.transitions_recorded, 1);

    let signature = compute_signature(&model_page("Continue", true));
    let state = memory
        .get_state_by_signature("sauna.example", &signature)
        .await
        .unwrap();
    assert!(memory.confident_transition(state.id).await.is_none());

    // 3 成功 / 4 次低于门槛，恢复后重新询问决策服务
    let recovered = run_once(&oracle, &memory).await;
    assert!(recovered.is_complete());
    assert_eq!(recovered.stats.oracle_calls, 1);
    assert_eq!(recovered.stats.memory_replays, 0);
    assert_eq!(oracle.call_count(), 6);
}
