// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Client side of externally-hosted tool servers.
//!
//! Servers are configured in `tove-config` and contacted once at startup;
//! every tool they advertise is wrapped as a regular [`tove_tools::Tool`]
//! whose dispatch asks the permission broker first.  A server that cannot
//! be reached only shrinks the tool set.

mod external;
mod protocol;
mod sse;
mod stdio;
mod transport;

pub use external::{discover, ExternalTool};
pub use protocol::{ToolCallResult, ToolDescriptor, ToolsListResult};
pub use sse::SseTransport;
pub use stdio::StdioTransport;
pub use transport::McpTransport;
