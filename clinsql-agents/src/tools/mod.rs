//! Tool layer
//!
//! Stateless operations each agent exposes to itself. Every tool returns
//! the uniform `ToolResult` envelope; typed payloads are serialized into
//! `data` and deserialized by the calling agent. Expected failures are
//! carried in the envelope, never thrown.

pub mod cg;
pub mod ir;
pub mod re;
pub mod ss;
pub mod ut;

use crate::Services;
use clinsql_core::{AgentError, ClinsqlError, ClinsqlResult};
use clinsql_llm::{ChatRequest, ChatResponse};
use tokio_util::sync::CancellationToken;

/// Run one gateway call for a tool, surfacing cancellation as an error and
/// provider emptiness as `Ok` with no content (the tool decides how to
/// fall back).
pub(crate) async fn tool_llm_call(
    services: &Services,
    request: &ChatRequest,
    cancel: &CancellationToken,
) -> ClinsqlResult<ChatResponse> {
    if cancel.is_cancelled() {
        return Err(ClinsqlError::Agent(AgentError::Cancelled));
    }
    services.gateway.complete(request, cancel).await
}
