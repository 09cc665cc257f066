//! The daemon's JSON-RPC surface.
//!
//! Handlers take a single request object and answer with a plain JSON value
//! that echoes the request; domain failures (unknown transfer, bad door,
//! missing field) travel inside the payload rather than as transport-level
//! errors, so clients always get their request context back.

pub mod admin;
pub mod witness;

use std::sync::Arc;

use jsonrpsee::{types::Params, RpcModule};
use serde_json::{json, Value};
use tokio::sync::watch;

use crate::{cfg::AdminConfig, db::Db, federator::Federator, types::Bridge};

pub struct RpcContext {
    pub db: Arc<Db>,
    pub bridge: Bridge,
    pub federator: Arc<Federator>,
    /// Signalled by the privileged `stop` command; the launcher watches it.
    pub stop: watch::Sender<bool>,
    pub admin: Option<AdminConfig>,
}

pub fn rpc_module(ctx: Arc<RpcContext>) -> RpcModule<Arc<RpcContext>> {
    let mut module = RpcModule::new(ctx.clone());
    module.merge(admin::rpc_module(ctx.clone())).unwrap();
    module.merge(witness::rpc_module(ctx)).unwrap();
    module
}

/// Returns an `RpcModule<Arc<RpcContext>>`. Call with the following syntax:
/// ```ignore
/// declare_module!(
///     ctx,
///     [
///         ("method1", method_one),
///         ("method2", method_two),
///     ],
/// )
/// ```
///
/// where each implementation method has the signature
/// `Fn(jsonrpsee::types::Params, &Arc<RpcContext>) -> anyhow::Result<Value>`.
/// Panics in handlers are caught and surfaced as internal errors.
macro_rules! declare_module {
    (
        $ctx:expr,
        [ $(($name:expr, $method:expr)),* $(,)? ] $(,)?
    ) => {{
        let mut module: jsonrpsee::RpcModule<std::sync::Arc<crate::api::RpcContext>> =
            jsonrpsee::RpcModule::new($ctx);
        $(
            module
                .register_method($name, move |params, context, _| {
                    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                        #[allow(clippy::redundant_closure_call)]
                        $method(params, context)
                    }))
                    .unwrap_or_else(|_| {
                        Err(anyhow::anyhow!("Unhandled panic in RPC handler {}", $name))
                    });
                    result.map_err(|e| {
                        tracing::error!(?e);
                        jsonrpsee::types::ErrorObject::owned(
                            jsonrpsee::types::error::ErrorCode::InternalError.code(),
                            e.to_string(),
                            None as Option<String>,
                        )
                    })
                })
                .unwrap();
        )*
        module
    }};
}

pub(crate) use declare_module;

/// The request object: either the named-params object itself or the first
/// element of a positional list.
fn request_object(params: Params<'_>) -> Value {
    let value: Value = params.parse().unwrap_or(Value::Null);
    match value {
        Value::Array(mut items) if !items.is_empty() => items.remove(0),
        Value::Null => json!({}),
        other => other,
    }
}
