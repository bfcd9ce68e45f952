//! Packet filter lifecycle against a mock control plane

#![allow(clippy::disallowed_methods)] // Allow unwrap() in tests for clarity

mod common;

use cloud::api::common::{Protocol, RuleAction};
use cloud::resources::PacketFilterSpec;
use common::{not_found, provider};
use converge::{Context, ErrorKind};
use mockito::{Matcher, Server};
use tokio_test::assert_ok;

const FILTER: &str = r#"{"filter_id":"filter-5","instance_id":"ins-1234","protocol":"TCP",
    "port_range":"8080-8090","cidr":"10.0.0.0/8","action":"ACCEPT","description":"app ports"}"#;

fn spec() -> PacketFilterSpec {
    PacketFilterSpec {
        instance_id: "ins-1234".to_string(),
        protocol: Protocol::Tcp,
        port_range: "8080-8090".to_string(),
        cidr: "10.0.0.0/8".to_string(),
        action: RuleAction::Accept,
        description: Some("app ports".to_string()),
    }
}

#[tokio::test]
async fn create_encodes_both_ids_into_handle() {
    let mut server = Server::new_async().await;
    let list = server
        .mock("GET", "/v1/instances/ins-1234/packet-filters")
        .with_body(r#"{"data":{"items":[]}}"#)
        .create_async()
        .await;
    let create = server
        .mock("POST", "/v1/instances/ins-1234/packet-filters")
        .match_body(Matcher::PartialJson(serde_json::json!({
            "protocol": "TCP",
            "port_range": "8080-8090",
            "action": "ACCEPT"
        })))
        .with_body(r#"{"data":{"filter_id":"filter-5"}}"#)
        .create_async()
        .await;

    let handle = provider(server.url())
        .packet_filters()
        .create(&Context::new(), &spec())
        .await
        .unwrap();

    assert_eq!(handle.as_str(), "ins-1234#filter-5");
    assert_eq!(handle.parts(), ["ins-1234", "filter-5"]);
    list.assert_async().await;
    create.assert_async().await;
}

#[tokio::test]
async fn create_rejects_duplicate_rule() {
    let mut server = Server::new_async().await;
    let _list = server
        .mock("GET", "/v1/instances/ins-1234/packet-filters")
        .with_body(format!(r#"{{"data":{{"items":[{}]}}}}"#, FILTER))
        .create_async()
        .await;
    let create = server
        .mock("POST", "/v1/instances/ins-1234/packet-filters")
        .expect(0)
        .create_async()
        .await;

    let err = provider(server.url())
        .packet_filters()
        .create(&Context::new(), &spec())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::AlreadyExists);
    assert_eq!(err.handle(), Some("ins-1234#filter-5"));
    create.assert_async().await;
}

#[tokio::test]
async fn update_modifies_rule_in_one_call() {
    let mut server = Server::new_async().await;
    let _current = server
        .mock("GET", "/v1/instances/ins-1234/packet-filters/filter-5")
        .with_body(format!(r#"{{"data":{}}}"#, FILTER))
        .create_async()
        .await;
    let modify = server
        .mock("PUT", "/v1/instances/ins-1234/packet-filters/filter-5")
        .match_body(Matcher::Json(serde_json::json!({
            "cidr": "192.168.0.0/16",
            "action": "DROP",
            "description": "app ports"
        })))
        .with_body(r#"{"data":{}}"#)
        .expect(1)
        .create_async()
        .await;

    let mut desired = spec();
    desired.cidr = "192.168.0.0/16".to_string();
    desired.action = RuleAction::Drop;

    provider(server.url())
        .packet_filters()
        .update(&Context::new(), "ins-1234#filter-5", &desired)
        .await
        .unwrap();

    modify.assert_async().await;
}

#[tokio::test]
async fn update_rejects_port_change() {
    let mut server = Server::new_async().await;
    let _current = server
        .mock("GET", "/v1/instances/ins-1234/packet-filters/filter-5")
        .with_body(format!(r#"{{"data":{}}}"#, FILTER))
        .create_async()
        .await;

    let mut desired = spec();
    desired.port_range = "443".to_string();
    desired.protocol = Protocol::Udp;

    let err = provider(server.url())
        .packet_filters()
        .update(&Context::new(), "ins-1234#filter-5", &desired)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Invalid);
    assert!(err.to_string().contains("protocol, port_range"));
}

#[tokio::test]
async fn delete_twice_succeeds() {
    let mut server = Server::new_async().await;
    let first = server
        .mock("DELETE", "/v1/instances/ins-1234/packet-filters/filter-5")
        .with_body(r#"{"data":{}}"#)
        .expect(1)
        .create_async()
        .await;
    let second = server
        .mock("DELETE", "/v1/instances/ins-1234/packet-filters/filter-5")
        .with_status(404)
        .with_body(not_found("ResourceNotFound.PacketFilter"))
        .create_async()
        .await;

    let driver = provider(server.url()).packet_filters();
    let ctx = Context::new();
    assert_ok!(driver.delete(&ctx, "ins-1234#filter-5").await);
    assert_ok!(driver.delete(&ctx, "ins-1234#filter-5").await);

    first.assert_async().await;
    second.assert_async().await;
}

#[tokio::test]
async fn malformed_handle_is_rejected_without_calls() {
    let mut server = Server::new_async().await;
    let any = server
        .mock("GET", Matcher::Any)
        .expect(0)
        .create_async()
        .await;

    let err = provider(server.url())
        .packet_filters()
        .read(&Context::new(), "ins-1234")
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::MalformedHandle);
    any.assert_async().await;
}
