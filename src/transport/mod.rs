//! The dual XML-RPC / JSON-RPC transport layer (spec §4.1-§4.3).

pub mod callback_server;
pub mod json_rpc;
pub mod rpc_value;
pub mod xml_rpc;

pub use callback_server::{CallbackServer, CallbackSink, DeviceEvent};
pub use json_rpc::JsonRpcClient;
pub use xml_rpc::{XmlRpcProxy, XmlRpcProxyConfig};
