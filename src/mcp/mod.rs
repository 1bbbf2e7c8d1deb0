//! MCP 工具服务器客户端：单个对端（子进程 + 按行 JSON-RPC）与多对端路由

pub mod peer;
pub mod protocol;
pub mod router;

pub use peer::{PeerState, PeerTimeouts, ToolDescriptor, ToolPeer};
pub use router::{CloseReport, PeerFailure, RoutedResult, ToolRouter};
