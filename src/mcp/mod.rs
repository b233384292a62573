//! MCP (Model Context Protocol) server
//!
//! Exposes the hub's tools at `/mcp` over Streamable HTTP using the rmcp SDK.
//! Each tool returns one human-readable string; hub errors come back as
//! error results, never as protocol errors.

use crate::api::AppState;
use crate::devices::television::DEFAULT_ADB_PORT;
use crate::error::HubResult;
use rmcp::{
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::*,
    schemars, tool, tool_handler, tool_router, ErrorData as McpError, ServerHandler,
};
use serde::Deserialize;

#[derive(Clone)]
pub struct HubMcpServer {
    state: AppState,
    tool_router: ToolRouter<HubMcpServer>,
}

/// Arguments naming one device
#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct DeviceArgs {
    /// Room name, e.g. "kitchen", "living room", "bedroom"
    pub room: String,
    /// Device name within the room, e.g. "light1", "fan1", "tv"
    pub device_name: String,
}

/// Arguments for set_device_value
#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct SetValueArgs {
    pub room: String,
    pub device_name: String,
    /// Setting to change: brightness, speed, temperature or mode
    pub key: String,
    /// New value (number or text)
    pub value: serde_json::Value,
}

/// Arguments for tv_open_app
#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct OpenAppArgs {
    pub room: String,
    pub device_name: String,
    /// netflix, youtube or home
    #[serde(alias = "app_name")]
    pub app: String,
}

/// Arguments for tv_navigate
#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct NavigateArgs {
    pub room: String,
    pub device_name: String,
    /// up, down, left, right, enter, back or home
    pub direction: String,
    /// Number of presses, 1-10 (default 1)
    #[serde(default)]
    pub steps: Option<i64>,
}

/// Arguments for adding or updating a TV
#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct TvEndpointArgs {
    pub room: String,
    pub device_name: String,
    /// IPv4 address of the TV, e.g. 192.168.1.20
    pub ip_address: String,
    /// ADB port (default 5555)
    #[serde(default)]
    pub port: Option<i64>,
}

/// Arguments for the search tools
#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct SearchArgs {
    pub room: String,
    pub device_name: String,
    /// What to look for, e.g. "Young Sheldon"
    pub query: String,
    /// netflix (default) or youtube
    #[serde(default)]
    pub app: Option<String>,
}

/// Arguments for play_netflix_show
#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct ShowArgs {
    pub room: String,
    pub device_name: String,
    /// Title of the show or film
    pub show_name: String,
}

/// Arguments for play_youtube_video
#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct VideoArgs {
    pub room: String,
    pub device_name: String,
    /// What to search for on YouTube
    pub search_query: String,
}

/// Arguments for tv_send_text
#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct TextArgs {
    pub room: String,
    pub device_name: String,
    /// Text to type into the focused field
    pub text: String,
}

/// Arguments for tv_press_key
#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct KeyArgs {
    pub room: String,
    pub device_name: String,
    /// enter, back, home, up, down, left, right, menu, play, pause, playpause,
    /// search, volume_up, volume_down or mute
    pub key: String,
}

/// Turn a router outcome into a tool result.
fn respond(result: HubResult<String>) -> Result<CallToolResult, McpError> {
    match result {
        Ok(message) => Ok(CallToolResult::success(vec![Content::text(message)])),
        Err(e) => Ok(CallToolResult::error(vec![Content::text(e.to_string())])),
    }
}

fn value_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[tool_router]
impl HubMcpServer {
    pub fn new(state: AppState) -> Self {
        Self {
            state,
            tool_router: Self::tool_router(),
        }
    }

    #[tool(description = "Turn on a device in a room")]
    async fn turn_on_device(
        &self,
        Parameters(args): Parameters<DeviceArgs>,
    ) -> Result<CallToolResult, McpError> {
        respond(self.state.router.turn_on_device(&args.room, &args.device_name).await)
    }

    #[tool(description = "Turn off a device in a room")]
    async fn turn_off_device(
        &self,
        Parameters(args): Parameters<DeviceArgs>,
    ) -> Result<CallToolResult, McpError> {
        respond(self.state.router.turn_off_device(&args.room, &args.device_name).await)
    }

    #[tool(
        description = "Set a device value: brightness (lights, 0-100), speed (fans, 0-10), temperature (AC, 16-30) or mode (chimney)"
    )]
    async fn set_device_value(
        &self,
        Parameters(args): Parameters<SetValueArgs>,
    ) -> Result<CallToolResult, McpError> {
        let value = value_text(&args.value);
        respond(
            self.state
                .router
                .set_device_value(&args.room, &args.device_name, &args.key, &value)
                .await,
        )
    }

    #[tool(description = "Get the current state of one device")]
    async fn get_device_state(
        &self,
        Parameters(args): Parameters<DeviceArgs>,
    ) -> Result<CallToolResult, McpError> {
        respond(self.state.router.get_device_state(&args.room, &args.device_name).await)
    }

    #[tool(description = "Get the state of every device, grouped by room")]
    async fn get_all_states(&self) -> Result<CallToolResult, McpError> {
        respond(self.state.router.get_all_states().await)
    }

    #[tool(description = "Raise TV volume by one step")]
    async fn tv_volume_up(
        &self,
        Parameters(args): Parameters<DeviceArgs>,
    ) -> Result<CallToolResult, McpError> {
        respond(self.state.router.tv_volume_up(&args.room, &args.device_name).await)
    }

    #[tool(description = "Lower TV volume by one step")]
    async fn tv_volume_down(
        &self,
        Parameters(args): Parameters<DeviceArgs>,
    ) -> Result<CallToolResult, McpError> {
        respond(self.state.router.tv_volume_down(&args.room, &args.device_name).await)
    }

    #[tool(description = "Toggle TV mute")]
    async fn tv_mute(
        &self,
        Parameters(args): Parameters<DeviceArgs>,
    ) -> Result<CallToolResult, McpError> {
        respond(self.state.router.tv_mute(&args.room, &args.device_name).await)
    }

    #[tool(description = "Open an app on the TV: netflix, youtube or home")]
    async fn tv_open_app(
        &self,
        Parameters(args): Parameters<OpenAppArgs>,
    ) -> Result<CallToolResult, McpError> {
        respond(
            self.state
                .router
                .tv_open_app(&args.room, &args.device_name, &args.app)
                .await,
        )
    }

    #[tool(description = "Move the TV focus: up, down, left, right, enter, back or home, optionally repeated 1-10 times")]
    async fn tv_navigate(
        &self,
        Parameters(args): Parameters<NavigateArgs>,
    ) -> Result<CallToolResult, McpError> {
        respond(
            self.state
                .router
                .tv_navigate(&args.room, &args.device_name, &args.direction, args.steps)
                .await,
        )
    }

    #[tool(description = "Check whether the TV's remote connection is alive")]
    async fn check_tv_connection(
        &self,
        Parameters(args): Parameters<DeviceArgs>,
    ) -> Result<CallToolResult, McpError> {
        respond(self.state.router.check_tv_connection(&args.room, &args.device_name).await)
    }

    #[tool(
        description = "Step-by-step TV connection diagnosis: network, remote connection, installed apps"
    )]
    async fn diagnose_tv_connection(
        &self,
        Parameters(args): Parameters<DeviceArgs>,
    ) -> Result<CallToolResult, McpError> {
        respond(
            self.state
                .router
                .diagnose_tv_connection(&args.room, &args.device_name)
                .await,
        )
    }

    #[tool(description = "Add a TV reachable over ADB at ip_address:port (default port 5555)")]
    async fn add_tv_device(
        &self,
        Parameters(args): Parameters<TvEndpointArgs>,
    ) -> Result<CallToolResult, McpError> {
        let port = args.port.unwrap_or(i64::from(DEFAULT_ADB_PORT));
        respond(
            self.state
                .router
                .add_tv_device(&args.room, &args.device_name, &args.ip_address, port)
                .await,
        )
    }

    #[tool(description = "Change the address of an existing TV")]
    async fn update_tv_config(
        &self,
        Parameters(args): Parameters<TvEndpointArgs>,
    ) -> Result<CallToolResult, McpError> {
        let port = args.port.unwrap_or(i64::from(DEFAULT_ADB_PORT));
        respond(
            self.state
                .router
                .update_tv_config(&args.room, &args.device_name, &args.ip_address, port)
                .await,
        )
    }

    #[tool(description = "Remove a TV from the hub")]
    async fn remove_tv_device(
        &self,
        Parameters(args): Parameters<DeviceArgs>,
    ) -> Result<CallToolResult, McpError> {
        respond(self.state.router.remove_tv_device(&args.room, &args.device_name).await)
    }

    #[tool(description = "List every TV with its address, connection status and playback state")]
    async fn list_tv_devices(&self) -> Result<CallToolResult, McpError> {
        respond(self.state.router.list_tv_devices().await)
    }

    #[tool(description = "Reload TVs from tv_config.json, adding new ones and updating addresses")]
    async fn load_tv_configs_from_file(&self) -> Result<CallToolResult, McpError> {
        respond(self.state.router.load_tv_configs_from_file().await)
    }

    #[tool(
        description = "Search for a title in netflix (default) or youtube and play the first result"
    )]
    async fn tv_search_and_play(
        &self,
        Parameters(args): Parameters<SearchArgs>,
    ) -> Result<CallToolResult, McpError> {
        respond(
            self.state
                .router
                .tv_search_and_play(
                    &args.room,
                    &args.device_name,
                    &args.query,
                    args.app.as_deref(),
                )
                .await,
        )
    }

    #[tool(description = "Search for content in netflix (default) or youtube and leave results on screen")]
    async fn tv_search_content(
        &self,
        Parameters(args): Parameters<SearchArgs>,
    ) -> Result<CallToolResult, McpError> {
        respond(
            self.state
                .router
                .tv_search_content(
                    &args.room,
                    &args.device_name,
                    &args.query,
                    args.app.as_deref(),
                )
                .await,
        )
    }

    #[tool(description = "Open Netflix, search for a show and play it")]
    async fn play_netflix_show(
        &self,
        Parameters(args): Parameters<ShowArgs>,
    ) -> Result<CallToolResult, McpError> {
        respond(
            self.state
                .router
                .tv_search_and_play(
                    &args.room,
                    &args.device_name,
                    &args.show_name,
                    Some("netflix"),
                )
                .await,
        )
    }

    #[tool(description = "Open YouTube, search for a video and play the first result")]
    async fn play_youtube_video(
        &self,
        Parameters(args): Parameters<VideoArgs>,
    ) -> Result<CallToolResult, McpError> {
        respond(
            self.state
                .router
                .tv_search_and_play(
                    &args.room,
                    &args.device_name,
                    &args.search_query,
                    Some("youtube"),
                )
                .await,
        )
    }

    #[tool(description = "Type text into the focused field on the TV")]
    async fn tv_send_text(
        &self,
        Parameters(args): Parameters<TextArgs>,
    ) -> Result<CallToolResult, McpError> {
        respond(
            self.state
                .router
                .tv_send_text(&args.room, &args.device_name, &args.text)
                .await,
        )
    }

    #[tool(description = "Press a remote key on the TV")]
    async fn tv_press_key(
        &self,
        Parameters(args): Parameters<KeyArgs>,
    ) -> Result<CallToolResult, McpError> {
        respond(
            self.state
                .router
                .tv_press_key(&args.room, &args.device_name, &args.key)
                .await,
        )
    }
}

#[tool_handler]
impl ServerHandler for HubMcpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation::from_build_env(),
            instructions: Some(
                "Smart Home Hub - control lights, fans, AC, chimney and TVs by room.\n\n\
                Rooms: kitchen, livingroom, bedroom (aliases like 'living room' or 'lounge' work). \
                Use get_all_states to see every device, turn_on_device/turn_off_device and \
                set_device_value to control them, and the tv_* tools for televisions."
                    .to_string(),
            ),
        }
    }
}

/// Create the MCP service for mounting with `router.nest_service("/mcp", ..)`
pub fn create_mcp_service(state: AppState) -> StreamableHttpService {
    use rmcp::transport::streamable_http_server::{
        session::local::LocalSessionManager, StreamableHttpServerConfig,
        StreamableHttpService as SHS,
    };

    SHS::new(
        move || Ok(HubMcpServer::new(state.clone())),
        LocalSessionManager::default().into(),
        StreamableHttpServerConfig::default(),
    )
}

pub type StreamableHttpService =
    rmcp::transport::streamable_http_server::StreamableHttpService<HubMcpServer>;
