// d365fo-cache-mcp/src/server.rs
//
// `ServerHandler` wiring one `Core` into the stdio MCP surface.
// Tool definitions and dispatch live in `tools`; this module only speaks
// the rmcp protocol types.

use crate::tools;
use d365fo_cache_core::application::Core;
use rmcp::model::{
    CallToolRequestParam, CallToolResult, Content, ErrorData, Implementation, InitializeResult,
    ListToolsResult, PaginatedRequestParam, ProtocolVersion, ServerCapabilities,
};
use rmcp::service::{RequestContext, RoleServer};
use rmcp::ServerHandler;
use std::sync::Arc;

#[derive(Clone)]
pub struct D365foCacheServer {
    core: Arc<Core>,
}

impl D365foCacheServer {
    pub fn new(core: Arc<Core>) -> Self {
        Self { core }
    }
}

impl ServerHandler for D365foCacheServer {
    fn get_info(&self) -> InitializeResult {
        InitializeResult {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "d365fo-cache-mcp".into(),
                version: env!("CARGO_PKG_VERSION").into(),
                ..Default::default()
            },
            instructions: Some(
                "Reads and syncs Dynamics 365 Finance & Operations metadata through the \
                 local cache. Call get_environment_info first to see whether a sync has \
                 completed; most read tools need an active global version to answer from.".into(),
            ),
        }
    }

    fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> impl std::future::Future<Output = Result<ListToolsResult, ErrorData>> + Send + '_ {
        async move {
            Ok(ListToolsResult {
                tools: tools::tool_list(),
                next_cursor: None,
            })
        }
    }

    fn call_tool(
        &self,
        request: CallToolRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> impl std::future::Future<Output = Result<CallToolResult, ErrorData>> + Send + '_ {
        async move {
            let args = request.arguments.map(serde_json::Value::Object).unwrap_or(serde_json::Value::Null);

            match tools::dispatch(&self.core, &request.name, &args).await {
                Ok(value) => Ok(CallToolResult::success(vec![Content::text(
                    serde_json::to_string_pretty(&value).unwrap_or_default(),
                )])),
                Err(structured) => Ok(CallToolResult::error(vec![Content::text(
                    serde_json::to_string_pretty(&structured).unwrap_or_default(),
                )])),
            }
        }
    }
}
