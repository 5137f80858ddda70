//! Queue handlers registered by the server binary.
//!
//! The engine treats handlers as opaque; these implementations stand in
//! for the document pipeline, user request fulfilment, and AI analysis
//! work the surrounding application performs. Each reports progress and
//! honors cooperative cancellation between stages.

use lexflow_core::LexError;
use lexflow_jobs::{handler_fn, JobHandler, JobPayload, ProgressHandle};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::info;

async fn checkpoint(progress: &ProgressHandle, percent: u8) -> Result<(), LexError> {
    if progress.is_cancelled() {
        return Err(LexError::handler("cancelled by caller"));
    }
    progress.report(percent).await
}

/// Handler for the document-processing queue.
#[must_use]
pub fn document_processing_handler() -> JobHandler {
    handler_fn(|payload, progress| async move {
        let JobPayload::DocumentProcessing(doc) = payload else {
            return Err(LexError::handler("unexpected payload type"));
        };

        info!(doc_id = doc.doc_id, "Processing document");
        checkpoint(&progress, 10).await?;

        // Text extraction stage
        tokio::time::sleep(Duration::from_millis(50)).await;
        checkpoint(&progress, 60).await?;

        // Indexing stage
        tokio::time::sleep(Duration::from_millis(50)).await;
        checkpoint(&progress, 90).await?;

        Ok(json!({
            "docId": doc.doc_id,
            "fileName": doc.file_name,
            "extractedText": format!("Extracted text for document {}", doc.doc_id),
        }))
    })
}

/// Handler for the user-requests queue.
#[must_use]
pub fn user_request_handler() -> JobHandler {
    handler_fn(|payload, progress| async move {
        let JobPayload::UserRequest(request) = payload else {
            return Err(LexError::handler("unexpected payload type"));
        };

        info!(user_id = %request.user_id, action = %request.action, "Fulfilling user request");
        checkpoint(&progress, 25).await?;

        tokio::time::sleep(Duration::from_millis(25)).await;
        checkpoint(&progress, 75).await?;

        Ok(json!({
            "userId": request.user_id,
            "action": request.action,
            "params": request.params.unwrap_or(Value::Null),
            "fulfilled": true,
        }))
    })
}

/// Handler for the ai-analysis queue.
#[must_use]
pub fn ai_analysis_handler() -> JobHandler {
    handler_fn(|payload, progress| async move {
        let JobPayload::AiAnalysis(analysis) = payload else {
            return Err(LexError::handler("unexpected payload type"));
        };

        info!(
            doc_id = analysis.doc_id,
            analysis_type = %analysis.analysis_type,
            "Running AI analysis"
        );
        checkpoint(&progress, 10).await?;

        // Model call stands in for the real AI backend round trip
        tokio::time::sleep(Duration::from_millis(100)).await;
        checkpoint(&progress, 80).await?;

        Ok(json!({
            "docId": analysis.doc_id,
            "analysisType": analysis.analysis_type,
            "summary": format!(
                "{} analysis for document {}",
                analysis.analysis_type, analysis.doc_id
            ),
        }))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use lexflow_jobs::store::MemoryJobStore;
    use lexflow_jobs::{JobControl, JobEngine, JobsConfig, QueueName};
    use serde_json::json;
    use std::sync::Arc;

    async fn run_to_completion(queue: QueueName, handler: JobHandler, payload: Value) -> Value {
        let store = Arc::new(MemoryJobStore::new(60_000));
        let engine = JobEngine::new(store, JobsConfig::default());
        let job = engine
            .enqueue(queue, payload, Default::default())
            .await
            .unwrap();

        let pool = Arc::new(engine.worker_pool(queue, handler));
        let runner = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.start().await })
        };

        let mut result = None;
        for _ in 0..100 {
            let record = engine.job(queue, &job.id).await.unwrap();
            if record.status == lexflow_jobs::JobStatus::Completed {
                result = record.result;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        pool.stop();
        let _ = runner.await;
        result.expect("job did not complete")
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_document_handler_extracts_text() {
        let result = run_to_completion(
            QueueName::DocumentProcessing,
            document_processing_handler(),
            json!({ "docId": 42, "fileName": "brief.pdf" }),
        )
        .await;

        assert_eq!(result["docId"], 42);
        assert!(result["extractedText"]
            .as_str()
            .unwrap()
            .contains("document 42"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_ai_handler_summarizes() {
        let result = run_to_completion(
            QueueName::AiAnalysis,
            ai_analysis_handler(),
            json!({ "docId": 7, "analysisType": "summary" }),
        )
        .await;

        assert_eq!(result["docId"], 7);
        assert_eq!(result["analysisType"], "summary");
    }
}
