//! Firewall address objects.

use std::net::Ipv4Addr;
use std::sync::Arc;

use serde_json::{json, Value};

use super::{get_options, list_or_empty, optional_str, path_segment, required_str};
use crate::dispatch::{operation, ModuleTable, OperationArgs};
use crate::rpc::{RpcClient, RpcError};

pub const MODULE: &str = "object_tools";

pub fn module() -> ModuleTable {
    ModuleTable::new(MODULE)
        .with_operation("list_firewall_addresses", operation(list_firewall_addresses))
        .with_operation("create_firewall_address", operation(create_firewall_address))
        .with_operation("delete_firewall_address", operation(delete_firewall_address))
}

fn address_url(adom: &str) -> String {
    format!("/pm/config/adom/{adom}/obj/firewall/address")
}

/// `10.0.0.0/24` → `["10.0.0.0", "255.255.255.0"]`. Anything without a
/// prefix length is passed through as given (e.g. `"10.0.0.1 255.255.255.255"`).
fn subnet_value(subnet: &str) -> Result<Value, RpcError> {
    let Some((ip, prefix)) = subnet.split_once('/') else {
        return Ok(Value::from(subnet));
    };
    let invalid = || RpcError::InvalidPayload {
        reason: format!("invalid subnet '{subnet}', expected a.b.c.d/nn"),
    };
    let ip: Ipv4Addr = ip.trim().parse().map_err(|_| invalid())?;
    let prefix: u32 = prefix.trim().parse().map_err(|_| invalid())?;
    if prefix > 32 {
        return Err(invalid());
    }
    let mask = u32::MAX.checked_shl(32 - prefix).unwrap_or(0);
    Ok(json!([ip.to_string(), Ipv4Addr::from(mask).to_string()]))
}

async fn list_firewall_addresses(
    client: Arc<RpcClient>,
    args: OperationArgs,
) -> Result<Value, RpcError> {
    let adom = path_segment(&args, "adom")?;
    let data = client
        .get_with(&address_url(adom), get_options(&args)?)
        .await?;
    Ok(list_or_empty(data))
}

async fn create_firewall_address(
    client: Arc<RpcClient>,
    args: OperationArgs,
) -> Result<Value, RpcError> {
    let adom = path_segment(&args, "adom")?;
    let name = required_str(&args, "name")?;
    let subnet = subnet_value(required_str(&args, "subnet")?)?;

    let mut data = json!({ "name": name, "type": "ipmask", "subnet": subnet });
    if let Some(comment) = optional_str(&args, "comment") {
        data["comment"] = Value::from(comment);
    }

    client.add(&address_url(adom), data.clone()).await?;
    Ok(json!({ "adom": adom, "created": data }))
}

async fn delete_firewall_address(
    client: Arc<RpcClient>,
    args: OperationArgs,
) -> Result<Value, RpcError> {
    let adom = path_segment(&args, "adom")?;
    let name = path_segment(&args, "name")?;
    client
        .delete(&format!("{}/{name}", address_url(adom)))
        .await?;
    Ok(json!({ "adom": adom, "deleted": name }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operations::testing::run;
    use crate::rpc::Verb;

    #[test]
    fn test_subnet_value() {
        assert_eq!(
            subnet_value("192.168.1.0/24").unwrap(),
            json!(["192.168.1.0", "255.255.255.0"])
        );
        assert_eq!(subnet_value("10.1.2.3/32").unwrap(), json!(["10.1.2.3", "255.255.255.255"]));
        assert_eq!(subnet_value("0.0.0.0/0").unwrap(), json!(["0.0.0.0", "0.0.0.0"]));
        assert_eq!(
            subnet_value("10.0.0.1 255.255.255.255").unwrap(),
            json!("10.0.0.1 255.255.255.255")
        );
        assert!(subnet_value("10.0.0.0/33").is_err());
        assert!(subnet_value("host/24").is_err());
    }

    #[tokio::test]
    async fn test_create_firewall_address_payload() {
        let (result, transport) = run(
            module(),
            "create_firewall_address",
            json!({"adom": "root", "name": "web-net", "subnet": "10.20.0.0/16", "comment": "web tier"}),
            None,
        )
        .await;
        assert_eq!(result.unwrap()["created"]["name"], "web-net");

        let (request, _) = &transport.requests()[0];
        assert_eq!(request.method, Verb::Add);
        assert_eq!(request.url(), "/pm/config/adom/root/obj/firewall/address");
        assert_eq!(
            request.params[0].data,
            Some(json!({
                "name": "web-net",
                "type": "ipmask",
                "subnet": ["10.20.0.0", "255.255.0.0"],
                "comment": "web tier",
            }))
        );
    }

    #[tokio::test]
    async fn test_bad_subnet_never_sent() {
        let (result, transport) = run(
            module(),
            "create_firewall_address",
            json!({"adom": "root", "name": "x", "subnet": "10.0.0.0/40"}),
            None,
        )
        .await;
        assert_eq!(result.unwrap_err().kind(), "InvalidArgumentError");
        assert_eq!(transport.call_count(), 0);
    }

    #[tokio::test]
    async fn test_delete_firewall_address_url() {
        let (_, transport) = run(
            module(),
            "delete_firewall_address",
            json!({"adom": "lab", "name": "old-host"}),
            None,
        )
        .await;
        let (request, _) = &transport.requests()[0];
        assert_eq!(request.method, Verb::Delete);
        assert_eq!(request.url(), "/pm/config/adom/lab/obj/firewall/address/old-host");
    }

    #[tokio::test]
    async fn test_delete_rejects_path_in_name() {
        let (result, transport) = run(
            module(),
            "delete_firewall_address",
            json!({"adom": "root", "name": "x/../../../dvmdb/adom/root"}),
            None,
        )
        .await;
        assert_eq!(result.unwrap_err().kind(), "InvalidArgumentError");
        assert_eq!(transport.call_count(), 0);
    }
}
