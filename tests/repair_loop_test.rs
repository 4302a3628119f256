mod common;

use common::*;
use nl2sql_repair::CancellationToken;
use nl2sql_repair::config::ContextPolicy;
use nl2sql_repair::error::{QuestionFailure, RepairError};
use nl2sql_repair::execution_loop::{AttemptOutcome, RepairLoop, SqlErrorClass};
use nl2sql_repair::store::{QueryStore, Value};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_orders_in_bangalore_last_week() {
    let translator = Arc::new(FnTranslator::new(|_: &str, _: usize| Ok(BANGALORE_LAST_WEEK.to_string())));
    let repair = RepairLoop::new(translator.clone(), Arc::new(orders_store()), fast_config(3)).unwrap();

    let result = repair
        .run("Show orders in Bangalore in the last 7 days")
        .await
        .unwrap();

    assert_eq!(result.query, BANGALORE_LAST_WEEK);
    assert_eq!(result.columns, vec!["order_id"]);
    assert_eq!(
        result.rows,
        vec![
            vec![Value::Text("o1".into())],
            vec![Value::Text("o2".into())],
            vec![Value::Text("o4".into())],
        ]
    );
    assert_eq!(result.attempts.len(), 1);
    assert_eq!(translator.calls(), 1);
}

#[tokio::test]
async fn test_repairs_missing_column_on_second_attempt() {
    let translator = Arc::new(FnTranslator::new(|prompt: &str, _: usize| {
        if prompt.contains("no such column: city_name") {
            Ok("SELECT order_id FROM orders WHERE city = 'Bangalore'".to_string())
        } else {
            Ok("SELECT order_id FROM orders WHERE city_name = 'Bangalore'".to_string())
        }
    }));
    let repair = RepairLoop::new(translator.clone(), Arc::new(orders_store()), fast_config(2)).unwrap();

    let result = repair.run("Show orders in Bangalore").await.unwrap();

    assert_eq!(result.attempts.len(), 2);
    assert_eq!(result.attempts[0].outcome, AttemptOutcome::QueryError);
    assert_eq!(
        result.attempts[0].error_detail.as_deref(),
        Some("no such column: city_name")
    );
    assert_eq!(result.attempts[0].error_class, Some(SqlErrorClass::ColumnNotFound));
    assert_eq!(result.attempts[1].outcome, AttemptOutcome::RowsReturned);
    assert!(result.query.contains("city = 'Bangalore'"));
    assert_eq!(result.rows.len(), 4);

    let prompts = translator.prompts();
    assert_eq!(prompts[0], "Show orders in Bangalore");
    assert!(prompts[1].contains("Show orders in Bangalore"));
    assert!(prompts[1].contains("WHERE city_name = 'Bangalore'"));
}

#[tokio::test]
async fn test_execute_calls_never_exceed_budget() {
    for max_attempts in 1..=5 {
        let translator = Arc::new(FnTranslator::new(|_: &str, _: usize| Ok("SELECT nope FROM orders".to_string())));
        let store = Arc::new(CountingStore::new(orders_store()));
        let repair = RepairLoop::new(translator, store.clone(), fast_config(max_attempts)).unwrap();

        let failure = repair.run("q").await.unwrap_err();

        assert_eq!(store.calls(), max_attempts as usize);
        match failure {
            QuestionFailure::Exhausted(e) => {
                assert_eq!(e.attempts.len(), max_attempts as usize);
                let numbers: Vec<u32> = e.attempts.iter().map(|a| a.attempt_number).collect();
                let expected: Vec<u32> = (1..=max_attempts).collect();
                assert_eq!(numbers, expected);
                assert_eq!(e.last_error, "no such column: nope");
            }
            other => panic!("unexpected failure: {:?}", other),
        }
    }
}

#[tokio::test]
async fn test_success_short_circuits_remaining_budget() {
    // Fails twice, then succeeds on the third of five attempts
    let translator = Arc::new(FnTranslator::new(|_: &str, call: usize| {
        if call < 3 {
            Ok(format!("SELECT broken_{} FROM orders", call))
        } else {
            Ok("SELECT COUNT(*) FROM orders".to_string())
        }
    }));
    let store = Arc::new(CountingStore::new(orders_store()));
    let repair = RepairLoop::new(translator.clone(), store.clone(), fast_config(5)).unwrap();

    let result = repair.run("How many orders?").await.unwrap();

    assert_eq!(result.attempts.len(), 3);
    assert_eq!(translator.calls(), 3);
    assert_eq!(store.calls(), 3);
    assert_eq!(result.rows, vec![vec![Value::Integer(5)]]);
}

#[tokio::test]
async fn test_bounded_context_excludes_older_errors() {
    let translator = Arc::new(FnTranslator::new(|_: &str, call: usize| {
        Ok(format!("SELECT missing_{} FROM orders", call))
    }));
    let repair = RepairLoop::new(translator.clone(), Arc::new(orders_store()), fast_config(4)).unwrap();

    repair.run("q").await.unwrap_err();

    let prompts = translator.prompts();
    assert_eq!(prompts.len(), 4);
    for k in 2..=4usize {
        let prompt = &prompts[k - 1];
        assert!(prompt.contains(&format!("no such column: missing_{}", k - 1)));
        for older in 1..(k - 1) {
            assert!(
                !prompt.contains(&format!("missing_{}", older)),
                "prompt {} leaks error from attempt {}",
                k,
                older
            );
        }
    }
}

#[tokio::test]
async fn test_full_history_context_includes_older_errors() {
    let translator = Arc::new(FnTranslator::new(|_: &str, call: usize| {
        Ok(format!("SELECT missing_{} FROM orders", call))
    }));
    let mut config = fast_config(3);
    config.context_policy = ContextPolicy::FullHistory;
    let repair = RepairLoop::new(translator.clone(), Arc::new(orders_store()), config).unwrap();

    repair.run("q").await.unwrap_err();

    let prompts = translator.prompts();
    assert!(prompts[2].contains("no such column: missing_2"));
    assert!(prompts[2].contains("no such column: missing_1"));
}

#[tokio::test]
async fn test_same_question_twice_gives_identical_history() {
    let translator = Arc::new(FnTranslator::new(|prompt: &str, _: usize| {
        if prompt.contains("no such column") {
            Ok("SELECT city FROM orders ORDER BY order_id".to_string())
        } else {
            Ok("SELECT town FROM orders".to_string())
        }
    }));
    let repair = RepairLoop::new(translator, Arc::new(orders_store()), fast_config(3)).unwrap();

    let first = repair.run("Which cities?").await.unwrap();
    let second = repair.run("Which cities?").await.unwrap();

    let strip = |r: &nl2sql_repair::ResultSet| {
        r.attempts
            .iter()
            .map(|a| {
                (
                    a.attempt_number,
                    a.generated_query.clone(),
                    a.outcome,
                    a.error_detail.clone(),
                    a.error_class,
                )
            })
            .collect::<Vec<_>>()
    };
    assert_eq!(strip(&first), strip(&second));
    assert_eq!(first.rows, second.rows);
}

#[tokio::test]
async fn test_translation_failures_exhaust_budget() {
    let translator = Arc::new(unreachable_translator());
    let store = Arc::new(CountingStore::new(orders_store()));
    let repair = RepairLoop::new(translator, store.clone(), fast_config(3)).unwrap();

    let failure = repair.run("q").await.unwrap_err();

    assert_eq!(store.calls(), 0);
    assert_eq!(failure.attempts().len(), 3);
    assert!(failure
        .attempts()
        .iter()
        .all(|a| a.outcome == AttemptOutcome::QueryError && a.generated_query.is_empty()));
    match failure {
        QuestionFailure::Exhausted(e) => assert_eq!(e.last_error, "service unreachable"),
        other => panic!("unexpected failure: {:?}", other),
    }
}

#[tokio::test]
async fn test_failed_write_is_rolled_back_between_attempts() {
    let translator = Arc::new(FnTranslator::new(|_: &str, call: usize| {
        if call == 1 {
            Ok("INSERT INTO orders (order_id) VALUES ('o9'), ('o1')".to_string())
        } else {
            Ok("SELECT COUNT(*) FROM orders".to_string())
        }
    }));
    let repair = RepairLoop::new(translator, Arc::new(orders_store()), fast_config(2)).unwrap();

    let result = repair.run("q").await.unwrap();

    assert_eq!(
        result.attempts[0].error_class,
        Some(SqlErrorClass::ConstraintViolation)
    );
    assert_eq!(result.rows, vec![vec![Value::Integer(5)]]);
}

#[tokio::test]
async fn test_timed_out_write_is_not_kept() {
    let translator = Arc::new(FnTranslator::new(|_: &str, _: usize| {
        Ok("INSERT INTO orders (order_id) \
            WITH RECURSIVE n(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM n WHERE x < 3000000) \
            SELECT 'bulk_' || x FROM n"
            .to_string())
    }));
    let store = orders_store();
    let mut config = fast_config(1);
    config.attempt_timeout = Some(Duration::from_millis(5));
    let repair = RepairLoop::new(translator, Arc::new(store.clone()), config).unwrap();

    let failure = repair.run("copy every order").await.unwrap_err();
    assert_eq!(failure.attempts()[0].error_class, Some(SqlErrorClass::Timeout));
    assert_eq!(
        failure.attempts()[0].error_detail.as_deref(),
        Some("Timed out after 5ms")
    );

    let output = store.execute("SELECT COUNT(*) FROM orders").await.unwrap();
    assert_eq!(output.rows, vec![vec![Value::Integer(5)]]);
}

#[tokio::test]
async fn test_pre_cancelled_run_makes_no_calls() {
    let translator = Arc::new(FnTranslator::new(|_: &str, _: usize| {
        Err(RepairError::Translation("should not be called".to_string()))
    }));
    let repair = RepairLoop::new(translator.clone(), Arc::new(orders_store()), fast_config(3)).unwrap();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let failure = repair.run_with("q", 3, &cancel).await.unwrap_err();

    assert!(failure.is_cancelled());
    assert_eq!(translator.calls(), 0);
}
