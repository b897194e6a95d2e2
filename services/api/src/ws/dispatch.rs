//! Tool dispatch queue.
//!
//! The response pump enqueues tool-call batches without waiting. One consumer
//! runs them in order, one invocation at a time, and answers each batch
//! upstream with a single tool response.

use super::{
    client::ClientSink,
    protocol::{FunctionCallPayload, ServerMessage},
    state::Session,
};
use anyhow::{Context, Result};
use avatar_core::{ToolExecutor, builtin};
use gemini_live::{FunctionCall, FunctionResponse, ToolCall};
use serde_json::{Value, json};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info};

pub type ToolCallQueue = mpsc::UnboundedSender<ToolCall>;

/// Consumes tool-call batches until cancelled. Batches still queued at
/// cancellation are dropped.
pub async fn run_tool_dispatch(
    session: Arc<Session>,
    client: Arc<dyn ClientSink>,
    mut queue: mpsc::UnboundedReceiver<ToolCall>,
    cancel: CancellationToken,
) {
    loop {
        let tool_call = tokio::select! {
            () = cancel.cancelled() => break,
            next = queue.recv() => match next {
                Some(tool_call) => tool_call,
                None => break,
            },
        };
        info!(calls = tool_call.function_calls.len(), "Received tool call");
        tokio::select! {
            () = cancel.cancelled() => break,
            result = dispatch_batch(&session, client.as_ref(), tool_call) => {
                if let Err(e) = result {
                    error!(error = ?e, "Failed to process tool call");
                }
            }
        }
    }
    info!("Tool dispatcher stopped.");
}

async fn dispatch_batch(session: &Arc<Session>, client: &dyn ClientSink, tool_call: ToolCall) -> Result<()> {
    let mut responses = Vec::with_capacity(tool_call.function_calls.len());
    for call in tool_call.function_calls {
        let result = run_invocation(session, &call).await;
        client
            .send(ServerMessage::FunctionCall {
                data: FunctionCallPayload {
                    name: call.name.clone(),
                    args: call.args.clone(),
                    result: result.clone(),
                },
            })
            .await?;
        responses.push(FunctionResponse {
            id: call.id,
            name: call.name,
            response: json!({ "output": result }),
        });
    }

    if !responses.is_empty() {
        info!(count = responses.len(), "Sending function responses");
        session
            .upstream()
            .context("No upstream stream attached to session")?
            .send_tool_response(responses)
            .await?;
    }
    Ok(())
}

/// Runs one invocation as the session's in-flight task and waits for it.
/// Failures become a descriptive result string.
async fn run_invocation(session: &Arc<Session>, call: &FunctionCall) -> Value {
    let (tx, rx) = oneshot::channel();
    let executor = session.tool_client().cloned();
    let name = call.name.clone();
    let args = call.args.clone();
    let handle = tokio::spawn(
        async move {
            let _ = tx.send(execute(executor, &name, args).await);
        }
        .in_current_span(),
    );
    session.set_in_flight(handle);
    let outcome = rx.await;
    session.take_in_flight();

    match outcome {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => {
            error!(name = %call.name, error = ?e, "Error during tool execution");
            Value::String(format!("Error executing function `{}`: {e}", call.name))
        }
        Err(_) => Value::String(format!(
            "Error executing function `{}`: execution was cancelled",
            call.name
        )),
    }
}

async fn execute(executor: Option<Arc<dyn ToolExecutor>>, name: &str, args: Value) -> Result<Value> {
    if let Some(executor) = executor {
        if executor.list_tool_names().await?.contains(name) {
            debug!(name, "Delegating to MCP tool");
            return executor.invoke(name, args).await;
        }
        info!(name, "Tool not found in MCP tools, handling as built-in function");
    }
    Ok(builtin::call_builtin(name, &args))
}
