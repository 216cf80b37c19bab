//! Runs `data_processing` tasks: applies one guarded, data-only
//! operation — `filter`, `map`, `reduce`, or `sort` — to the item list.
//! A predicate/transform that cannot be evaluated against a given item
//! (missing field, wrong type) is logged and the item is skipped for
//! `filter`/`map`, or simply left out of the accumulation for `reduce`.
//! Items are never discarded silently: every skip produces a log line.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{OrchestratorError, Result};
use crate::models::execution::ExecutionOutcome;
use crate::models::task::{DataOperation, DataPredicate, DataReducer, DataTransform, Task, TaskPayload};
use crate::ports::TaskExecutor;
use crate::sandbox::ArtifactSandbox;

#[derive(Default)]
pub struct DataProcessingExecutor;

#[async_trait]
impl TaskExecutor for DataProcessingExecutor {
    async fn execute(&self, task: &Task, _sandbox: &ArtifactSandbox) -> Result<ExecutionOutcome> {
        let TaskPayload::DataProcessing { operation, items } = &task.payload else {
            return Err(OrchestratorError::UnsupportedType(
                "data_processing executor received a non-data_processing payload".to_string(),
            ));
        };

        let mut logs = Vec::new();
        let result = match operation {
            DataOperation::Filter { predicate } => {
                let kept: Vec<Value> = items
                    .iter()
                    .enumerate()
                    .filter_map(|(index, item)| match eval_predicate(predicate, item) {
                        Some(true) => Some(item.clone()),
                        Some(false) => None,
                        None => {
                            logs.push(format!("item {index}: predicate could not be evaluated, skipped"));
                            None
                        }
                    })
                    .collect();
                Value::Array(kept)
            }
            DataOperation::Map { transform } => {
                let mapped: Vec<Value> = items
                    .iter()
                    .enumerate()
                    .filter_map(|(index, item)| match apply_transform(transform, item) {
                        Some(value) => Some(value),
                        None => {
                            logs.push(format!("item {index}: transform could not be applied, skipped"));
                            None
                        }
                    })
                    .collect();
                Value::Array(mapped)
            }
            DataOperation::Reduce { reducer, initial } => {
                let mut acc = initial.clone().unwrap_or_else(|| default_initial(reducer));
                for (index, item) in items.iter().enumerate() {
                    match apply_reducer(reducer, &acc, item) {
                        Some(next) => acc = next,
                        None => logs.push(format!("item {index}: reducer step skipped")),
                    }
                }
                acc
            }
            DataOperation::Sort { key, descending } => {
                let mut sorted = items.clone();
                sorted.sort_by(|a, b| {
                    let ordering = compare_by_key(a, b, key);
                    if *descending {
                        ordering.reverse()
                    } else {
                        ordering
                    }
                });
                Value::Array(sorted)
            }
        };

        Ok(ExecutionOutcome::Succeeded { result, logs })
    }
}

fn eval_predicate(predicate: &DataPredicate, item: &Value) -> Option<bool> {
    match predicate {
        DataPredicate::FieldExists { field } => Some(item.get(field).is_some()),
        DataPredicate::FieldEquals { field, value } => item.get(field).map(|v| v == value),
        DataPredicate::FieldGreaterThan { field, value } => {
            item.get(field).and_then(Value::as_f64).map(|n| n > *value)
        }
        DataPredicate::FieldLessThan { field, value } => {
            item.get(field).and_then(Value::as_f64).map(|n| n < *value)
        }
        DataPredicate::Not(inner) => eval_predicate(inner, item).map(|b| !b),
        DataPredicate::And(predicates) => {
            let mut all_true = true;
            for p in predicates {
                match eval_predicate(p, item)? {
                    true => {}
                    false => all_true = false,
                }
            }
            Some(all_true)
        }
        DataPredicate::Or(predicates) => {
            let mut evaluated_any = false;
            for p in predicates {
                if let Some(result) = eval_predicate(p, item) {
                    evaluated_any = true;
                    if result {
                        return Some(true);
                    }
                }
            }
            if evaluated_any {
                Some(false)
            } else {
                None
            }
        }
    }
}

fn apply_transform(transform: &DataTransform, item: &Value) -> Option<Value> {
    match transform {
        DataTransform::PluckField { field } => item.get(field).cloned(),
        DataTransform::SetField { field, value } => {
            let mut next = item.as_object()?.clone();
            next.insert(field.clone(), value.clone());
            Some(Value::Object(next))
        }
        DataTransform::MultiplyField { field, factor } => {
            let mut next = item.as_object()?.clone();
            let current = next.get(field)?.as_f64()?;
            next.insert(field.clone(), serde_json::json!(current * factor));
            Some(Value::Object(next))
        }
        DataTransform::UppercaseField { field } => {
            let mut next = item.as_object()?.clone();
            let current = next.get(field)?.as_str()?.to_uppercase();
            next.insert(field.clone(), Value::String(current));
            Some(Value::Object(next))
        }
    }
}

fn default_initial(reducer: &DataReducer) -> Value {
    match reducer {
        DataReducer::SumField { .. } => serde_json::json!(0.0),
        DataReducer::CountItems => serde_json::json!(0),
        DataReducer::ConcatField { .. } => serde_json::json!(""),
        DataReducer::MaxField { .. } | DataReducer::MinField { .. } => Value::Null,
    }
}

fn apply_reducer(reducer: &DataReducer, acc: &Value, item: &Value) -> Option<Value> {
    match reducer {
        DataReducer::SumField { field } => {
            let current = acc.as_f64().unwrap_or(0.0);
            let delta = item.get(field)?.as_f64()?;
            Some(serde_json::json!(current + delta))
        }
        DataReducer::CountItems => {
            let current = acc.as_u64().unwrap_or(0);
            Some(serde_json::json!(current + 1))
        }
        DataReducer::ConcatField { field, separator } => {
            let piece = item.get(field)?.as_str()?;
            let current = acc.as_str().unwrap_or("");
            let joined = if current.is_empty() {
                piece.to_string()
            } else {
                format!("{current}{separator}{piece}")
            };
            Some(Value::String(joined))
        }
        DataReducer::MaxField { field } => {
            let candidate = item.get(field)?.as_f64()?;
            match acc.as_f64() {
                Some(current) => Some(serde_json::json!(current.max(candidate))),
                None => Some(serde_json::json!(candidate)),
            }
        }
        DataReducer::MinField { field } => {
            let candidate = item.get(field)?.as_f64()?;
            match acc.as_f64() {
                Some(current) => Some(serde_json::json!(current.min(candidate))),
                None => Some(serde_json::json!(candidate)),
            }
        }
    }
}

/// Items missing the sort key sort to the end regardless of direction,
/// so reversing for `descending` never surfaces them first.
fn compare_by_key(a: &Value, b: &Value, key: &str) -> std::cmp::Ordering {
    use std::cmp::Ordering;

    let a_key = a.get(key);
    let b_key = b.get(key);

    match (a_key, b_key) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(a_val), Some(b_val)) => {
            if let (Some(a_num), Some(b_num)) = (a_val.as_f64(), b_val.as_f64()) {
                a_num.partial_cmp(&b_num).unwrap_or(Ordering::Equal)
            } else {
                let a_str = a_val.as_str().unwrap_or_default();
                let b_str = b_val.as_str().unwrap_or_default();
                a_str.cmp(b_str)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::SandboxQuotas;

    async fn sandbox() -> (tempfile::TempDir, ArtifactSandbox) {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = ArtifactSandbox::open(dir.path(), "data-task", SandboxQuotas::default())
            .await
            .unwrap();
        (dir, sandbox)
    }

    fn task(operation: DataOperation, items: Vec<Value>) -> Task {
        Task::new(
            crate::models::task::TaskType::DataProcessing,
            "process data".to_string(),
            TaskPayload::DataProcessing { operation, items },
            5,
        )
    }

    #[tokio::test]
    async fn filter_keeps_items_matching_predicate() {
        let (_dir, sandbox) = sandbox().await;
        let items = vec![
            serde_json::json!({"age": 30}),
            serde_json::json!({"age": 12}),
            serde_json::json!({"name": "no age field"}),
        ];
        let outcome = DataProcessingExecutor
            .execute(
                &task(
                    DataOperation::Filter {
                        predicate: DataPredicate::FieldGreaterThan {
                            field: "age".to_string(),
                            value: 18.0,
                        },
                    },
                    items,
                ),
                &sandbox,
            )
            .await
            .unwrap();

        match outcome {
            ExecutionOutcome::Succeeded { result, logs } => {
                assert_eq!(result.as_array().unwrap().len(), 1);
                assert_eq!(logs.len(), 1);
            }
            other => panic!("expected success, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn map_multiplies_field() {
        let (_dir, sandbox) = sandbox().await;
        let items = vec![serde_json::json!({"price": 10.0}), serde_json::json!({"price": 20.0})];
        let outcome = DataProcessingExecutor
            .execute(
                &task(
                    DataOperation::Map {
                        transform: DataTransform::MultiplyField {
                            field: "price".to_string(),
                            factor: 1.1,
                        },
                    },
                    items,
                ),
                &sandbox,
            )
            .await
            .unwrap();

        match outcome {
            ExecutionOutcome::Succeeded { result, .. } => {
                let array = result.as_array().unwrap();
                assert!((array[0]["price"].as_f64().unwrap() - 11.0).abs() < 1e-9);
            }
            other => panic!("expected success, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn reduce_sums_field_across_items() {
        let (_dir, sandbox) = sandbox().await;
        let items = vec![serde_json::json!({"amount": 5}), serde_json::json!({"amount": 7})];
        let outcome = DataProcessingExecutor
            .execute(
                &task(
                    DataOperation::Reduce {
                        reducer: DataReducer::SumField { field: "amount".to_string() },
                        initial: None,
                    },
                    items,
                ),
                &sandbox,
            )
            .await
            .unwrap();

        match outcome {
            ExecutionOutcome::Succeeded { result, .. } => assert_eq!(result.as_f64().unwrap(), 12.0),
            other => panic!("expected success, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn sort_orders_descending_with_missing_keys_last() {
        let (_dir, sandbox) = sandbox().await;
        let items = vec![
            serde_json::json!({"score": 1}),
            serde_json::json!({"other": true}),
            serde_json::json!({"score": 5}),
        ];
        let outcome = DataProcessingExecutor
            .execute(
                &task(
                    DataOperation::Sort {
                        key: "score".to_string(),
                        descending: true,
                    },
                    items,
                ),
                &sandbox,
            )
            .await
            .unwrap();

        match outcome {
            ExecutionOutcome::Succeeded { result, .. } => {
                let array = result.as_array().unwrap();
                assert_eq!(array[0]["score"], 5);
                assert_eq!(array[1]["score"], 1);
                assert!(array[2].get("score").is_none());
            }
            other => panic!("expected success, got {other:?}"),
        }
    }
}
