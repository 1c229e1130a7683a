pub mod error;
pub mod requests;
pub mod responses;

#[cfg(test)]
mod tests;

pub use error::{Result, SkeinError};
pub use requests::{InvokeType, MethodName, Request, RequestId, RpcArgs, ServiceName};
pub use responses::{Response, ResponseCode, RpcResult};
