//! Operational commands: liveness and shutdown.

use std::sync::Arc;

use anyhow::Result;
use jsonrpsee::{types::Params, RpcModule};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::api::RpcContext;

pub fn rpc_module(ctx: Arc<RpcContext>) -> RpcModule<Arc<RpcContext>> {
    super::declare_module!(
        ctx,
        [
            ("server_info", server_info),
            ("stop", stop),
        ]
    )
}

fn server_info(params: Params<'_>, ctx: &Arc<RpcContext>) -> Result<Value> {
    let request = super::request_object(params);
    Ok(json!({
        "request": request,
        "result": "normal",
        "info": ctx.federator.get_info(),
    }))
}

fn stop(params: Params<'_>, ctx: &Arc<RpcContext>) -> Result<Value> {
    let request = super::request_object(params);
    let mut result = json!({ "request": request.clone() });

    if let Some(admin) = &ctx.admin {
        let username = request.get("username").and_then(Value::as_str);
        let password = request.get("password").and_then(Value::as_str);
        if username != Some(admin.username.as_str()) || password != Some(admin.password.as_str()) {
            warn!("rejected stop command with bad credentials");
            result["error"] = json!("Unauthorized");
            return Ok(result);
        }
    }

    info!("stop requested over RPC");
    let _ = ctx.stop.send(true);
    result["result"] = json!("stopping");
    Ok(result)
}
