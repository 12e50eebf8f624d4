//! Managed device operations.

use std::sync::Arc;

use serde_json::Value;

use super::{get_options, list_or_empty, optional_segment, path_segment};
use crate::dispatch::{operation, ModuleTable, OperationArgs};
use crate::rpc::{RpcClient, RpcError};

pub const MODULE: &str = "device_tools";

pub fn module() -> ModuleTable {
    ModuleTable::new(MODULE)
        .with_operation("list_devices", operation(list_devices))
        .with_operation("get_device_details", operation(get_device_details))
        .with_operation("list_device_vdoms", operation(list_device_vdoms))
}

/// Device table URL, scoped to an ADOM when one is given.
fn device_url(adom: Option<&str>) -> String {
    match adom {
        Some(adom) => format!("/dvmdb/adom/{adom}/device"),
        None => "/dvmdb/device".to_string(),
    }
}

async fn list_devices(client: Arc<RpcClient>, args: OperationArgs) -> Result<Value, RpcError> {
    let url = device_url(optional_segment(&args, "adom")?);
    let data = client.get_with(&url, get_options(&args)?).await?;
    Ok(list_or_empty(data))
}

async fn get_device_details(
    client: Arc<RpcClient>,
    args: OperationArgs,
) -> Result<Value, RpcError> {
    let device = path_segment(&args, "device")?;
    let url = format!("{}/{device}", device_url(optional_segment(&args, "adom")?));
    Ok(client.get(&url).await?.unwrap_or(Value::Null))
}

async fn list_device_vdoms(
    client: Arc<RpcClient>,
    args: OperationArgs,
) -> Result<Value, RpcError> {
    let device = path_segment(&args, "device")?;
    let adom = path_segment(&args, "adom")?;
    let data = client
        .get(&format!("/dvmdb/adom/{adom}/device/{device}/vdom"))
        .await?;
    Ok(list_or_empty(data))
}
