//! 工具层：Tool / ToolRegistry、提供方、调用网关，以及内置的进程族与文件族提供方

pub mod filesystem;
pub mod gateway;
pub mod process;
pub mod provider;
pub mod registry;
pub mod schema;

pub use filesystem::{filesystem_provider, SafeFs};
pub use gateway::{ToolFilter, ToolGateway, ToolReply, ESCALATE_TOOL};
pub use process::{process_provider, ProcessCleanup, ProcessTable};
pub use provider::{RegistryProvider, ToolProvider};
pub use registry::{Tool, ToolDescriptor, ToolRegistry};
pub use schema::tool_call_schema_json;
