//! The admin HTTP surface.
//!
//! Every route delegates to the backfill planner or the dead-letter
//! managers and translates their outcomes into the response contract:
//! 201 for accepted submissions, 400 for validation failures, 500 with
//! partial progress counts when the chain gave up mid-range.

use {
    quarry_chain::EthRpc,
    quarry_ingest::{BackfillError, BackfillPlanner, BackfillRequest},
    quarry_process::FailedJobs,
    quarry_queue::JobQueue,
    quarry_store::Store,
    serde::Deserialize,
    serde_json::json,
    std::sync::Arc,
    warp::{Filter, Rejection, Reply, http::StatusCode, reply},
};

pub struct ApiContext<Q, R, S> {
    pub planner: BackfillPlanner<Q, R>,
    pub failed_blocks: FailedJobs<Q, S>,
    pub failed_logs: FailedJobs<Q, S>,
}

#[derive(Debug, Deserialize)]
struct BackfillBody {
    start: i64,
    end: i64,
    batch_size: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct RangeBody {
    start: i64,
    end: i64,
}

pub fn routes<Q, R, S>(
    ctx: ApiContext<Q, R, S>,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone
where
    Q: JobQueue + Send + Sync + 'static,
    R: EthRpc + Send + Sync + 'static,
    S: Store + Send + Sync + 'static,
{
    let ctx = Arc::new(ctx);
    let with_ctx = warp::any().map(move || Arc::clone(&ctx));

    let health = warp::path!("api" / "health").and(warp::get()).map(|| {
        reply::json(&json!({"status": "healthy", "service": "quarry-api"}))
    });

    let backfill = warp::path!("api" / "backfill")
        .and(warp::post())
        .and(with_ctx.clone())
        .and(warp::body::json())
        .and_then(|ctx: Arc<ApiContext<Q, R, S>>, body: BackfillBody| async move {
            Ok::<_, Rejection>(backfill_reply(&ctx, body).await)
        });

    let queue_blocks = warp::path!("api" / "queue-blocks")
        .and(warp::post())
        .and(with_ctx.clone())
        .and(warp::body::json())
        .and_then(|ctx: Arc<ApiContext<Q, R, S>>, body: RangeBody| async move {
            Ok::<_, Rejection>(queue_blocks_reply(&ctx, body).await)
        });

    let redrive_blocks = warp::path!("api" / "redrive-blocks")
        .and(warp::post())
        .and(with_ctx.clone())
        .and_then(|ctx: Arc<ApiContext<Q, R, S>>| async move {
            Ok::<_, Rejection>(redrive_reply(&ctx.failed_blocks, "blocks").await)
        });

    let redrive_logs = warp::path!("api" / "redrive-logs")
        .and(warp::post())
        .and(with_ctx)
        .and_then(|ctx: Arc<ApiContext<Q, R, S>>| async move {
            Ok::<_, Rejection>(redrive_reply(&ctx.failed_logs, "logs").await)
        });

    health
        .or(backfill)
        .or(queue_blocks)
        .or(redrive_blocks)
        .or(redrive_logs)
}

fn json_reply(code: StatusCode, body: serde_json::Value) -> reply::Response {
    reply::with_status(reply::json(&body), code).into_response()
}

fn validate_non_negative(start: i64, end: i64) -> Result<(u64, u64), reply::Response> {
    if start < 0 || end < 0 {
        return Err(json_reply(
            StatusCode::BAD_REQUEST,
            json!({"error": "Block numbers must be non-negative"}),
        ));
    }
    Ok((start as u64, end as u64))
}

async fn backfill_reply<Q, R, S>(ctx: &ApiContext<Q, R, S>, body: BackfillBody) -> reply::Response
where
    Q: JobQueue,
    R: EthRpc,
    S: Store,
{
    let (start, end) = match validate_non_negative(body.start, body.end) {
        Ok(range) => range,
        Err(response) => return response,
    };
    let batch_size = body.batch_size.unwrap_or(100);
    if batch_size < 1 {
        return json_reply(
            StatusCode::BAD_REQUEST,
            json!({"error": "batch_size must be between 1 and 1000"}),
        );
    }

    let request = BackfillRequest::new(start, end).with_batch_size(batch_size as u64);
    match ctx.planner.plan(request).await {
        Ok(report) => json_reply(
            StatusCode::CREATED,
            json!({
                "status": "success",
                "blocks_queued": report.blocks_queued,
                "logs_queued": report.logs_queued,
                "start_block": report.start_block,
                "end_block": report.end_block,
                "message": format!(
                    "Queued {} blocks and {} logs for processing",
                    report.blocks_queued, report.logs_queued
                ),
            }),
        ),
        Err(BackfillError::InvalidRange(message)) => {
            json_reply(StatusCode::BAD_REQUEST, json!({"error": message}))
        }
        Err(BackfillError::WindowExhausted {
            failed_at_block,
            blocks_queued,
            logs_queued,
            details,
        }) => json_reply(
            StatusCode::INTERNAL_SERVER_ERROR,
            json!({
                "error": "Unable to fetch logs - too many logs even in small batches",
                "details": details,
                "failed_at_block": failed_at_block,
                "blocks_queued": blocks_queued,
                "logs_queued": logs_queued,
                "hint": "Try a smaller block range",
            }),
        ),
        Err(BackfillError::Upstream {
            failed_at_block,
            blocks_queued,
            logs_queued,
            details,
        }) => json_reply(
            StatusCode::INTERNAL_SERVER_ERROR,
            json!({
                "error": "Failed to fetch logs from blockchain",
                "details": details,
                "failed_at_block": failed_at_block,
                "blocks_queued": blocks_queued,
                "logs_queued": logs_queued,
            }),
        ),
        Err(BackfillError::Queue(details)) => json_reply(
            StatusCode::INTERNAL_SERVER_ERROR,
            json!({"error": "Failed to backfill", "details": details}),
        ),
    }
}

async fn queue_blocks_reply<Q, R, S>(ctx: &ApiContext<Q, R, S>, body: RangeBody) -> reply::Response
where
    Q: JobQueue,
    R: EthRpc,
    S: Store,
{
    let (start, end) = match validate_non_negative(body.start, body.end) {
        Ok(range) => range,
        Err(response) => return response,
    };
    match ctx.planner.queue_blocks(start, end).await {
        Ok(queued) => json_reply(
            StatusCode::CREATED,
            json!({"queued": queued, "start": start, "end": end}),
        ),
        Err(BackfillError::InvalidRange(message)) => {
            json_reply(StatusCode::BAD_REQUEST, json!({"error": message}))
        }
        Err(e) => json_reply(
            StatusCode::INTERNAL_SERVER_ERROR,
            json!({"error": "Failed to queue blocks", "details": e.to_string()}),
        ),
    }
}

async fn redrive_reply<Q, S>(failed: &FailedJobs<Q, S>, kind: &str) -> reply::Response
where
    Q: JobQueue,
    S: Store,
{
    match failed.redrive().await {
        Ok(pushed) => json_reply(
            StatusCode::OK,
            json!({"status": format!("starting redrive on failed {kind}"), "pushed": pushed}),
        ),
        Err(e) => {
            tracing::error!("Redrive of failed {kind} failed: {e}");
            json_reply(
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({"error": format!("Failed to redrive {kind}"), "details": e.to_string()}),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        quarry_chain::test_doubles::{StubRpc, StubRpcError},
        quarry_queue::InMemoryQueue,
        quarry_shared::{JobType, QueueName},
        quarry_store::InMemoryStore,
    };

    fn context(
        queue: &InMemoryQueue,
        store: &InMemoryStore,
        rpc: StubRpc,
    ) -> ApiContext<InMemoryQueue, StubRpc, InMemoryStore> {
        ApiContext {
            planner: BackfillPlanner::new(queue.clone(), rpc),
            failed_blocks: FailedJobs::new(queue.clone(), store.clone(), JobType::Block),
            failed_logs: FailedJobs::new(queue.clone(), store.clone(), JobType::Log),
        }
    }

    #[tokio::test]
    async fn test_health_reports_healthy() {
        let queue = InMemoryQueue::new();
        let store = InMemoryStore::new();
        let filter = routes(context(&queue, &store, StubRpc::new()));

        let response = warp::test::request()
            .method("GET")
            .path("/api/health")
            .reply(&filter)
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body: serde_json::Value = serde_json::from_slice(response.body()).unwrap();
        assert_eq!(body["status"], "healthy");
    }

    #[tokio::test]
    async fn test_backfill_accepts_a_range() {
        let queue = InMemoryQueue::new();
        let store = InMemoryStore::new();
        let filter = routes(context(&queue, &store, StubRpc::new()));

        let response = warp::test::request()
            .method("POST")
            .path("/api/backfill")
            .json(&json!({"start": 0, "end": 4}))
            .reply(&filter)
            .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let body: serde_json::Value = serde_json::from_slice(response.body()).unwrap();
        assert_eq!(body["blocks_queued"], 5);
        assert_eq!(body["start_block"], 0);
        assert_eq!(body["end_block"], 4);
        assert_eq!(queue.len(QueueName::Blocks), 5);
    }

    #[tokio::test]
    async fn test_backfill_rejects_bad_ranges() {
        let queue = InMemoryQueue::new();
        let store = InMemoryStore::new();
        let filter = routes(context(&queue, &store, StubRpc::new()));

        for body in [
            json!({"start": -1, "end": 4}),
            json!({"start": 9, "end": 2}),
            json!({"start": 0, "end": 1, "batch_size": 1001}),
        ] {
            let response = warp::test::request()
                .method("POST")
                .path("/api/backfill")
                .json(&body)
                .reply(&filter)
                .await;
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{body}");
            let parsed: serde_json::Value = serde_json::from_slice(response.body()).unwrap();
            assert!(parsed["error"].is_string());
        }
    }

    #[tokio::test]
    async fn test_backfill_reports_partial_progress_on_oracle_exhaustion() {
        let queue = InMemoryQueue::new();
        let store = InMemoryStore::new();
        let rpc = StubRpc::new().with_log_batch(Err(StubRpcError::TooManyResults));
        let filter = routes(context(&queue, &store, rpc));

        let response = warp::test::request()
            .method("POST")
            .path("/api/backfill")
            .json(&json!({"start": 0, "end": 9, "batch_size": 10}))
            .reply(&filter)
            .await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body: serde_json::Value = serde_json::from_slice(response.body()).unwrap();
        assert_eq!(body["failed_at_block"], 0);
        assert_eq!(body["blocks_queued"], 10);
        assert_eq!(body["logs_queued"], 0);
    }

    #[tokio::test]
    async fn test_queue_blocks_honors_the_cap() {
        let queue = InMemoryQueue::new();
        let store = InMemoryStore::new();
        let filter = routes(context(&queue, &store, StubRpc::new()));

        let response = warp::test::request()
            .method("POST")
            .path("/api/queue-blocks")
            .json(&json!({"start": 0, "end": 10_000}))
            .reply(&filter)
            .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = warp::test::request()
            .method("POST")
            .path("/api/queue-blocks")
            .json(&json!({"start": 0, "end": 3}))
            .reply(&filter)
            .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let body: serde_json::Value = serde_json::from_slice(response.body()).unwrap();
        assert_eq!(body["queued"], 4);
    }

    #[tokio::test]
    async fn test_redrive_endpoints_answer_ok() {
        let queue = InMemoryQueue::new();
        let store = InMemoryStore::new();
        let filter = routes(context(&queue, &store, StubRpc::new()));

        for path in ["/api/redrive-blocks", "/api/redrive-logs"] {
            let response = warp::test::request()
                .method("POST")
                .path(path)
                .reply(&filter)
                .await;
            assert_eq!(response.status(), StatusCode::OK);
        }
    }
}
