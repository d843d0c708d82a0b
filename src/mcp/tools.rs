/// MCP tool handlers for VectorMind.
///
/// Documents: `ingest_document`, `ingest_directory`, `search_documents`,
/// `remove_document`. Memory: `add_memory`, `update_memory`, `remove_memory`,
/// `search_memory`, `get_memory_by_agent`. Maintenance: `get_stats`,
/// `clear_data`, `check_connection`.
use crate::db::MetadataFilter;
use crate::db::models::NewMemory;
use crate::mcp::server::McpContext;
use crate::retrieval::{ClearScope, OperationResult, SearchOptions};
use rmcp::handler::server::ServerHandler;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::{ErrorData as McpError, handler::server::tool::ToolRouter, model::*, tool, tool_router};
use schemars::JsonSchema;
use serde::Deserialize;
use std::path::Path;

// ── Parameter structs ────────────────────────────────────────────────

#[derive(Deserialize, JsonSchema)]
struct FilePathParam {
    /// Path to the file, as it should be recorded as the chunk source
    file_path: String,
}

#[derive(Deserialize, JsonSchema)]
struct DirectoryParam {
    /// Directory to ingest recursively (respects .gitignore)
    directory: String,
}

#[derive(Deserialize, JsonSchema)]
struct SearchDocumentsParams {
    /// Search query (natural language)
    query: String,
    /// Max results (default from config)
    limit: Option<usize>,
    /// Minimum similarity score (default from config, usually 0.7)
    threshold: Option<f32>,
}

#[derive(Deserialize, JsonSchema)]
struct SearchMemoryParams {
    /// Search query (natural language)
    query: String,
    /// Restrict to memories of this agent
    agent_id: Option<String>,
    /// Restrict to one category
    category: Option<String>,
    /// Max results (default from config)
    limit: Option<usize>,
    /// Minimum similarity score (default from config, usually 0.7)
    threshold: Option<f32>,
}

#[derive(Deserialize, JsonSchema)]
struct MemoryParams {
    /// Memory text
    content: String,
    /// Agent that owns the memory
    agent_id: String,
    /// Conversation or session identifier (default: "default")
    session_id: Option<String>,
    /// Category (default: general)
    category: Option<String>,
    /// Importance 1-10 (default: 5)
    importance: Option<i64>,
    /// Free-form tags
    tags: Option<Vec<String>>,
}

impl From<MemoryParams> for NewMemory {
    fn from(p: MemoryParams) -> Self {
        NewMemory {
            content: p.content,
            agent_id: p.agent_id,
            session_id: p.session_id.unwrap_or_else(|| "default".to_string()),
            category: p.category,
            importance: p.importance,
            tags: p.tags.unwrap_or_default(),
        }
    }
}

#[derive(Deserialize, JsonSchema)]
struct UpdateMemoryParams {
    /// Id of the memory to replace
    id: String,
    #[serde(flatten)]
    memory: MemoryParams,
}

#[derive(Deserialize, JsonSchema)]
struct MemoryIdParam {
    /// Memory id returned by add_memory
    id: String,
}

#[derive(Deserialize, JsonSchema)]
struct AgentParam {
    /// Agent id
    agent_id: String,
}

#[derive(Deserialize, JsonSchema)]
struct ClearParams {
    /// What to clear: files | memory | all
    scope: ClearScope,
}

// ── Response helpers ─────────────────────────────────────────────────

fn json_result(value: serde_json::Value) -> Result<CallToolResult, McpError> {
    Ok(CallToolResult::success(vec![Content::text(
        serde_json::to_string_pretty(&value).unwrap_or_default(),
    )]))
}

fn error_result(msg: &str) -> Result<CallToolResult, McpError> {
    Ok(CallToolResult::error(vec![Content::text(msg.to_string())]))
}

/// Failed operations are tool errors carrying the same JSON shape.
fn operation_result(result: OperationResult) -> Result<CallToolResult, McpError> {
    let text = serde_json::to_string_pretty(&result).unwrap_or_default();
    if result.success {
        Ok(CallToolResult::success(vec![Content::text(text)]))
    } else {
        Ok(CallToolResult::error(vec![Content::text(text)]))
    }
}

// ── Tool implementations ─────────────────────────────────────────────

#[derive(Clone)]
pub struct AppTools {
    pub ctx: McpContext,
    pub tool_router: ToolRouter<Self>,
}

impl ServerHandler for AppTools {}

#[tool_router]
impl AppTools {
    pub fn new(ctx: McpContext) -> Self {
        Self {
            ctx,
            tool_router: Self::tool_router(),
        }
    }

    // ── Documents ───────────────────────────────────────────────────

    #[tool(
        description = "Extract, chunk, embed and store a file (txt, md, csv, json, jsonl, pdf, docx, xlsx, html)"
    )]
    async fn ingest_document(
        &self,
        params: Parameters<FilePathParam>,
    ) -> Result<CallToolResult, McpError> {
        let file_path = &params.0.file_path;
        if file_path.is_empty() {
            return error_result("file_path is required");
        }
        operation_result(self.ctx.service.ingest_document(Path::new(file_path)).await)
    }

    #[tool(description = "Ingest every supported file under a directory")]
    async fn ingest_directory(
        &self,
        params: Parameters<DirectoryParam>,
    ) -> Result<CallToolResult, McpError> {
        let directory = &params.0.directory;
        if directory.is_empty() {
            return error_result("directory is required");
        }
        match self
            .ctx
            .service
            .ingest_directory(Path::new(directory))
            .await
        {
            Ok(report) => json_result(serde_json::json!({
                "success": report.failed == 0,
                "indexed": report.indexed,
                "skipped": report.skipped,
                "failed": report.failed,
                "chunks": report.chunks,
                "errors": report.errors,
            })),
            Err(e) => error_result(&format!("Failed to ingest {directory}: {e}")),
        }
    }

    #[tool(description = "Similarity search over ingested documents")]
    async fn search_documents(
        &self,
        params: Parameters<SearchDocumentsParams>,
    ) -> Result<CallToolResult, McpError> {
        let p = params.0;
        if p.query.is_empty() {
            return error_result("query is required");
        }
        let options = SearchOptions {
            limit: p.limit,
            threshold: p.threshold,
            ..SearchOptions::default()
        };
        match self.ctx.service.search_documents(&p.query, options).await {
            Ok(results) => json_result(serde_json::json!({
                "count": results.len(),
                "results": results,
            })),
            Err(e) => error_result(&format!("Search failed: {e}")),
        }
    }

    #[tool(description = "Delete every chunk whose source equals the given path")]
    async fn remove_document(
        &self,
        params: Parameters<FilePathParam>,
    ) -> Result<CallToolResult, McpError> {
        let file_path = &params.0.file_path;
        if file_path.is_empty() {
            return error_result("file_path is required");
        }
        operation_result(self.ctx.service.remove_document(file_path).await)
    }

    // ── Memory ──────────────────────────────────────────────────────

    #[tool(description = "Store a memory for an agent; returns the generated id")]
    async fn add_memory(&self, params: Parameters<MemoryParams>) -> Result<CallToolResult, McpError> {
        operation_result(self.ctx.service.add_memory(params.0.into()).await)
    }

    #[tool(description = "Replace a memory's content; the memory gets a new id")]
    async fn update_memory(
        &self,
        params: Parameters<UpdateMemoryParams>,
    ) -> Result<CallToolResult, McpError> {
        let p = params.0;
        if p.id.is_empty() {
            return error_result("id is required");
        }
        operation_result(self.ctx.service.update_memory(&p.id, p.memory.into()).await)
    }

    #[tool(description = "Delete a memory by id")]
    async fn remove_memory(
        &self,
        params: Parameters<MemoryIdParam>,
    ) -> Result<CallToolResult, McpError> {
        let id = &params.0.id;
        if id.is_empty() {
            return error_result("id is required");
        }
        operation_result(self.ctx.service.remove_memory(id).await)
    }

    #[tool(description = "Similarity search over memories, optionally for one agent or category")]
    async fn search_memory(
        &self,
        params: Parameters<SearchMemoryParams>,
    ) -> Result<CallToolResult, McpError> {
        let p = params.0;
        if p.query.is_empty() {
            return error_result("query is required");
        }
        let mut filter = MetadataFilter::new();
        if let Some(category) = p.category.filter(|c| !c.is_empty()) {
            filter = filter.field("category", category);
        }
        let options = SearchOptions {
            limit: p.limit,
            threshold: p.threshold,
            filter,
        };
        match self
            .ctx
            .service
            .search_memory(&p.query, p.agent_id.as_deref(), options)
            .await
        {
            Ok(results) => json_result(serde_json::json!({
                "count": results.len(),
                "results": results,
            })),
            Err(e) => error_result(&format!("Memory search failed: {e}")),
        }
    }

    #[tool(description = "List every memory stored by an agent")]
    async fn get_memory_by_agent(
        &self,
        params: Parameters<AgentParam>,
    ) -> Result<CallToolResult, McpError> {
        let agent_id = &params.0.agent_id;
        match self.ctx.service.get_memory_by_agent(agent_id).await {
            Ok(memories) => json_result(serde_json::json!({
                "agent_id": agent_id,
                "count": memories.len(),
                "memories": memories,
            })),
            Err(e) => error_result(&format!("Failed to load memories for {agent_id}: {e}")),
        }
    }

    // ── Maintenance ─────────────────────────────────────────────────

    #[tool(description = "Vector counts for documents and memory")]
    async fn get_stats(&self) -> Result<CallToolResult, McpError> {
        let stats = self.ctx.service.stats().await;
        json_result(serde_json::to_value(stats).unwrap_or_default())
    }

    #[tool(description = "Delete all stored vectors in scope: files, memory or all")]
    async fn clear_data(&self, params: Parameters<ClearParams>) -> Result<CallToolResult, McpError> {
        operation_result(self.ctx.service.clear(params.0.scope).await)
    }

    #[tool(description = "Test the embedding provider and report store counts")]
    async fn check_connection(&self) -> Result<CallToolResult, McpError> {
        let report = self.ctx.service.check_connection().await;
        json_result(serde_json::to_value(report).unwrap_or_default())
    }
}
