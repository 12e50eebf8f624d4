//! System status and task monitoring.

use std::sync::Arc;

use serde_json::Value;

use super::list_or_empty;
use crate::dispatch::{operation, ModuleTable, OperationArgs};
use crate::rpc::{GetOptions, RpcClient, RpcError};

pub const MODULE: &str = "monitoring_tools";

/// Tasks returned when no `limit` is given.
const DEFAULT_TASK_LIMIT: u64 = 50;

pub fn module() -> ModuleTable {
    ModuleTable::new(MODULE)
        .with_operation("get_system_status", operation(get_system_status))
        .with_operation("list_tasks", operation(list_tasks))
        .with_operation("get_task_status", operation(get_task_status))
}

async fn get_system_status(client: Arc<RpcClient>, _: OperationArgs) -> Result<Value, RpcError> {
    Ok(client
        .get("/cli/global/system/status")
        .await?
        .unwrap_or(Value::Null))
}

async fn list_tasks(client: Arc<RpcClient>, args: OperationArgs) -> Result<Value, RpcError> {
    let limit = args
        .get("limit")
        .and_then(Value::as_u64)
        .unwrap_or(DEFAULT_TASK_LIMIT);
    let options = GetOptions {
        filter: args.get("filter").cloned(),
        range: Some((0, limit)),
        ..GetOptions::default()
    };
    Ok(list_or_empty(client.get_with("/task/task", options).await?))
}

async fn get_task_status(client: Arc<RpcClient>, args: OperationArgs) -> Result<Value, RpcError> {
    let task_id = args
        .get("task_id")
        .and_then(Value::as_u64)
        .ok_or_else(|| RpcError::InvalidPayload {
            reason: "'task_id' must be a non-negative integer".into(),
        })?;
    Ok(client
        .get(&format!("/task/task/{task_id}"))
        .await?
        .unwrap_or(Value::Null))
}
