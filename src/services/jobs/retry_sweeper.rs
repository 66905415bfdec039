use serde::Serialize;

use crate::{
    db::LogStore,
    error::AppResult,
    models::{SystemLog, CHUNK_FAILURE_OPERATION},
    services::{
        budget::TimeBudget,
        jobs::{duration_seconds, Pipeline},
    },
};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryReport {
    pub success: bool,
    pub found: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Rows without a replayable function and parameters; left for manual triage
    pub invalid: usize,
    pub duration: f64,
}

/// Replay body: the recorded parameters tagged with the log row they came from
fn replay_params(log: &SystemLog, params: serde_json::Value) -> serde_json::Value {
    match params {
        serde_json::Value::Object(mut map) => {
            map.insert("retryOf".to_string(), serde_json::json!(log.id));
            serde_json::Value::Object(map)
        }
        other => other,
    }
}

/// Entry point of `retry-failed-threads`. Each replay is awaited; a success
/// deletes its log row, a failure leaves it for the next sweep.
pub async fn run(pipeline: &Pipeline) -> AppResult<RetryReport> {
    let store = pipeline.store.as_ref();
    let budget = TimeBudget::unbounded();

    let logs = store
        .unresolved_logs(CHUNK_FAILURE_OPERATION, pipeline.settings.retry_batch_size)
        .await?;
    let mut report = RetryReport {
        found: logs.len(),
        ..RetryReport::default()
    };

    for log in &logs {
        let Some(context) = log.retry_context() else {
            tracing::warn!(log_id = %log.id, "Log row has no replayable context, skipping");
            report.invalid += 1;
            continue;
        };

        let body = replay_params(log, context.params);
        match pipeline.dispatcher.invoke(&context.function, body).await {
            Ok(_) => {
                store.delete_log(log.id).await?;
                report.succeeded += 1;
                tracing::info!(log_id = %log.id, function = %context.function, "Retry succeeded");
            }
            Err(e) => {
                report.failed += 1;
                tracing::warn!(log_id = %log.id, function = %context.function, error = %e, "Retry failed");
            }
        }
    }

    report.success = true;
    report.duration = duration_seconds(budget.elapsed());

    tracing::info!(
        found = report.found,
        succeeded = report.succeeded,
        failed = report.failed,
        invalid = report.invalid,
        "Retry sweep finished"
    );

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use crate::error::AppError;
    use crate::models::{NewSystemLog, Severity};
    use crate::services::{
        catalog::MockCatalogClient, dispatch::MockDispatcher, jobs::FULL_REFRESH_TITLES,
    };
    use std::sync::Arc;

    fn chunk_log(year: i32) -> NewSystemLog {
        NewSystemLog {
            severity: Severity::Error,
            operation: CHUNK_FAILURE_OPERATION.to_string(),
            error_message: "Database error: pool timed out".to_string(),
            context: serde_json::json!({
                "function": FULL_REFRESH_TITLES,
                "params": { "chunk": { "languageCode": "en", "year": year, "genreId": 28 } },
            }),
        }
    }

    fn pipeline(store: MemoryStore, dispatcher: MockDispatcher) -> Pipeline {
        Pipeline::new(
            Arc::new(store),
            Arc::new(MockCatalogClient::new()),
            None,
            Arc::new(dispatcher),
        )
    }

    #[tokio::test]
    async fn test_success_deletes_only_that_row() {
        let store = MemoryStore::seeded();
        let ok_id = store.insert_log(&chunk_log(2020)).await.unwrap();
        let failing_id = store.insert_log(&chunk_log(2021)).await.unwrap();
        let other = store
            .insert_log(&NewSystemLog {
                operation: "enrich_failed".to_string(),
                ..chunk_log(2022)
            })
            .await
            .unwrap();

        let mut dispatcher = MockDispatcher::new();
        dispatcher
            .expect_invoke()
            .times(2)
            .returning(move |function, body| {
                assert_eq!(function, FULL_REFRESH_TITLES);
                assert!(body.get("retryOf").is_some());
                if body["chunk"]["year"] == 2020 {
                    Ok(serde_json::json!({ "success": true }))
                } else {
                    Err(AppError::ExternalApi("status 500".to_string()))
                }
            });

        let report = run(&pipeline(store.clone(), dispatcher)).await.unwrap();

        assert_eq!(report.found, 2);
        assert_eq!(report.succeeded, 1);
        assert_eq!(report.failed, 1);
        let remaining: Vec<_> = store.logs().await.into_iter().map(|l| l.id).collect();
        assert!(!remaining.contains(&ok_id));
        assert!(remaining.contains(&failing_id));
        assert!(remaining.contains(&other));
    }

    #[tokio::test]
    async fn test_row_without_context_is_counted_invalid() {
        let store = MemoryStore::seeded();
        store
            .insert_log(&NewSystemLog {
                context: serde_json::json!({ "params": {} }),
                ..chunk_log(2020)
            })
            .await
            .unwrap();

        let mut dispatcher = MockDispatcher::new();
        dispatcher.expect_invoke().never();

        let report = run(&pipeline(store.clone(), dispatcher)).await.unwrap();
        assert_eq!(report.invalid, 1);
        assert_eq!(store.logs().await.len(), 1);
    }

    #[tokio::test]
    async fn test_sweep_is_capped_per_run() {
        let store = MemoryStore::seeded();
        for year in 2000..2015 {
            store.insert_log(&chunk_log(year)).await.unwrap();
        }

        let mut dispatcher = MockDispatcher::new();
        dispatcher
            .expect_invoke()
            .times(10)
            .returning(|_, _| Ok(serde_json::Value::Null));

        let report = run(&pipeline(store.clone(), dispatcher)).await.unwrap();
        assert_eq!(report.succeeded, 10);
        assert_eq!(store.logs().await.len(), 5);
    }
}
