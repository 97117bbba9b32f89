//! Line-oriented JSON front end over stdio.
//!
//! Each input line is a request `{"question": "...", "collection": "...", "id": ...}`
//! (`collection` and `id` optional). Each output line is either
//! `{"id": ..., "ok": true, "answer": {...}}` or
//! `{"id": ..., "ok": false, "error": {"kind": "...", "message": "..."}}`.
//! Requests are answered concurrently, so responses may arrive out of order;
//! clients correlate by `id`. Logs go to stderr.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::app::App;
use crate::error::{FaqError, FaqResult, PublicError};
use crate::router::{Answer, Router};

#[derive(Debug, Deserialize)]
pub struct Request {
    pub question: String,
    #[serde(default)]
    pub collection: Option<String>,
    #[serde(default)]
    pub id: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
pub struct Response {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<serde_json::Value>,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer: Option<Answer>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<PublicError>,
}

impl Response {
    fn from_result(id: Option<serde_json::Value>, result: FaqResult<Answer>) -> Self {
        match result {
            Ok(answer) => Self {
                id,
                ok: true,
                answer: Some(answer),
                error: None,
            },
            Err(err) => {
                match &err {
                    FaqError::InvalidArgument(_) | FaqError::NotFound(_) => {
                        tracing::debug!(error = %err, "request rejected")
                    }
                    _ => tracing::error!(error = %err, "request failed"),
                }
                Self {
                    id,
                    ok: false,
                    answer: None,
                    error: Some(err.to_public()),
                }
            }
        }
    }
}

async fn handle_line(router: &Router, line: &str) -> Response {
    match serde_json::from_str::<Request>(line) {
        Ok(req) => {
            let result = router.answer(&req.question, req.collection.as_deref()).await;
            Response::from_result(req.id, result)
        }
        Err(e) => Response::from_result(
            None,
            Err(FaqError::InvalidArgument(format!("malformed request: {e}"))),
        ),
    }
}

/// Answer requests read from `reader` until EOF or cancellation.
pub async fn serve_lines<R, W>(
    router: Arc<Router>,
    reader: R,
    mut writer: W,
    cancel: CancellationToken,
) -> FaqResult<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<Response>(64);

    let writer_task = tokio::spawn(async move {
        while let Some(response) = rx.recv().await {
            let mut line = match serde_json::to_vec(&response) {
                Ok(line) => line,
                Err(e) => {
                    tracing::error!(error = %e, "failed to encode response");
                    continue;
                }
            };
            line.push(b'\n');
            writer.write_all(&line).await?;
            writer.flush().await?;
        }
        Ok::<_, std::io::Error>(())
    });

    let mut requests = JoinSet::new();
    let mut lines = reader.lines();
    loop {
        let line = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            line = lines.next_line() => line?,
        };
        let Some(line) = line else { break };
        if line.trim().is_empty() {
            continue;
        }

        let router = Arc::clone(&router);
        let tx = tx.clone();
        requests.spawn(async move {
            let response = handle_line(&router, &line).await;
            if tx.send(response).await.is_err() {
                tracing::warn!("response dropped: writer closed");
            }
        });

        // reap finished requests so the set stays small
        while let Some(done) = requests.try_join_next() {
            if let Err(e) = done {
                tracing::error!(error = %e, "request task panicked");
            }
        }
    }

    while let Some(done) = requests.join_next().await {
        if let Err(e) = done {
            tracing::error!(error = %e, "request task panicked");
        }
    }
    drop(tx);

    writer_task
        .await
        .map_err(|e| FaqError::Internal(format!("response writer failed: {e}")))??;
    Ok(())
}

/// Serve on stdin/stdout with write-back workers running, until EOF or Ctrl-C.
pub async fn serve_stdio(app: App) -> FaqResult<()> {
    let cancel = CancellationToken::new();
    let workers = app.start_workers(cancel.child_token()).await?;

    let signal_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received; shutting down");
            signal_token.cancel();
        }
    });

    tracing::info!(
        collection = %app.config.matching.default_collection,
        threshold = app.config.matching.similarity_threshold,
        "answering questions on stdin"
    );
    let stdin = BufReader::new(tokio::io::stdin());
    let result = serve_lines(
        Arc::clone(&app.router),
        stdin,
        tokio::io::stdout(),
        cancel.clone(),
    )
    .await;

    workers.shutdown().await;
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_accepts_optional_fields() {
        let req: Request = serde_json::from_str(r#"{"question": "hi"}"#).unwrap();
        assert_eq!(req.question, "hi");
        assert!(req.collection.is_none());
        assert!(req.id.is_none());

        let req: Request =
            serde_json::from_str(r#"{"question": "hi", "collection": "hr", "id": 7}"#).unwrap();
        assert_eq!(req.collection.as_deref(), Some("hr"));
        assert_eq!(req.id, Some(serde_json::json!(7)));
    }

    #[test]
    fn failures_are_sanitized() {
        let response = Response::from_result(
            Some(serde_json::json!("r1")),
            Err(FaqError::Generation("401 from upstream, key sk-abc".into())),
        );
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["ok"], false);
        assert_eq!(json["error"]["kind"], "internal");
        assert_eq!(json["error"]["message"], "internal error");
        assert_eq!(json["id"], "r1");
        assert!(json.get("answer").is_none());
    }
}
