//! ADOM (administrative domain) operations.

use std::sync::Arc;

use serde_json::{json, Value};

use super::{get_options, list_or_empty, path_segment, required_str};
use crate::dispatch::{operation, ModuleTable, OperationArgs};
use crate::rpc::{RpcClient, RpcError};

pub const MODULE: &str = "adom_tools";

pub fn module() -> ModuleTable {
    ModuleTable::new(MODULE)
        .with_operation("list_adoms", operation(list_adoms))
        .with_operation("get_adom", operation(get_adom))
        .with_operation("lock_adom", operation(lock_adom))
        .with_operation("unlock_adom", operation(unlock_adom))
        .with_operation("commit_adom", operation(commit_adom))
}

async fn list_adoms(client: Arc<RpcClient>, args: OperationArgs) -> Result<Value, RpcError> {
    let data = client.get_with("/dvmdb/adom", get_options(&args)?).await?;
    Ok(list_or_empty(data))
}

async fn get_adom(client: Arc<RpcClient>, args: OperationArgs) -> Result<Value, RpcError> {
    let adom = path_segment(&args, "adom")?;
    let data = client.get(&format!("/dvmdb/adom/{adom}")).await?;
    Ok(data.unwrap_or(Value::Null))
}

/// Workspace actions share one shape: exec with `{"adom": name}`.
async fn workspace(
    client: &RpcClient,
    args: &OperationArgs,
    action: &str,
) -> Result<Value, RpcError> {
    let adom = required_str(args, "adom")?;
    client
        .exec(
            &format!("/dvmdb/adom/workspace/{action}"),
            Some(json!({ "adom": adom })),
        )
        .await?;
    Ok(json!({ "adom": adom, "action": action, "done": true }))
}

async fn lock_adom(client: Arc<RpcClient>, args: OperationArgs) -> Result<Value, RpcError> {
    workspace(&client, &args, "lock").await
}

async fn unlock_adom(client: Arc<RpcClient>, args: OperationArgs) -> Result<Value, RpcError> {
    workspace(&client, &args, "unlock").await
}

async fn commit_adom(client: Arc<RpcClient>, args: OperationArgs) -> Result<Value, RpcError> {
    workspace(&client, &args, "commit").await
}
