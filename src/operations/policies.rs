//! Policy packages and firewall policies.

use std::sync::Arc;

use serde_json::{json, Value};

use super::{get_options, list_or_empty, path_segment, required_str};
use crate::dispatch::{operation, ModuleTable, OperationArgs};
use crate::rpc::{RpcClient, RpcError};

pub const MODULE: &str = "policy_tools";

pub fn module() -> ModuleTable {
    ModuleTable::new(MODULE)
        .with_operation("list_policy_packages", operation(list_policy_packages))
        .with_operation("list_firewall_policies", operation(list_firewall_policies))
        .with_operation("install_policy_package", operation(install_policy_package))
}

async fn list_policy_packages(
    client: Arc<RpcClient>,
    args: OperationArgs,
) -> Result<Value, RpcError> {
    let adom = path_segment(&args, "adom")?;
    Ok(list_or_empty(client.get(&format!("/pm/pkg/adom/{adom}")).await?))
}

async fn list_firewall_policies(
    client: Arc<RpcClient>,
    args: OperationArgs,
) -> Result<Value, RpcError> {
    let adom = path_segment(&args, "adom")?;
    let package = path_segment(&args, "package")?;
    let url = format!("/pm/config/adom/{adom}/pkg/{package}/firewall/policy");
    Ok(list_or_empty(client.get_with(&url, get_options(&args)?).await?))
}

/// Install a package (device settings and security settings) to one
/// device. Returns the install task, e.g. `{"task": 412}`.
async fn install_policy_package(
    client: Arc<RpcClient>,
    args: OperationArgs,
) -> Result<Value, RpcError> {
    let adom = required_str(&args, "adom")?;
    let package = required_str(&args, "package")?;
    let device = required_str(&args, "device")?;
    let vdom = required_str(&args, "vdom")?;
    let flags = args.get("flags").cloned().unwrap_or_else(|| json!(["none"]));

    let data = json!({
        "adom": adom,
        "pkg": package,
        "scope": [{ "name": device, "vdom": vdom }],
        "flags": flags,
    });
    let task = client
        .exec("/securityconsole/install/package", Some(data))
        .await?;
    Ok(task.unwrap_or(Value::Null))
}
