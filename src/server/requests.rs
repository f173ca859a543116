//! MCP tool request types.
//!
//! These structs define the parameters for each MCP tool exposed by the server.

use rmcp::schemars::JsonSchema;
use serde::Deserialize;

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SessionOpenRequest {
    #[schemars(description = "Path to the binary file to analyze")]
    #[serde(alias = "input_path")]
    pub path: String,
    #[schemars(description = "Run automatic analysis on the binary (default: true)")]
    #[serde(alias = "auto_analysis")]
    pub run_auto_analysis: Option<bool>,
    #[schemars(description = "Custom session id (auto-generated if not provided)")]
    #[serde(alias = "id")]
    pub session_id: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SessionCloseRequest {
    #[schemars(description = "Id of the session to close")]
    #[serde(alias = "id")]
    pub session_id: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SessionSwitchRequest {
    #[schemars(description = "Id of the session to make current")]
    #[serde(alias = "id")]
    pub session_id: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct EmptyParams {}
