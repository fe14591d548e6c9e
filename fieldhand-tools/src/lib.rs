//! Tool descriptors, the runtime registry, dynamic capability synthesis,
//! and the CRM example tools for the fieldhand agent runtime.

#![warn(missing_docs, clippy::pedantic)]

pub mod crm;
mod descriptor;
mod handler;
mod registry;
pub mod synthesis;

pub use descriptor::{ToolDescriptor, ToolDescriptorBuilder};
pub use handler::{ToolError, ToolHandler, ToolResult};
pub use registry::ToolRegistry;
