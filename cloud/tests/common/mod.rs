//! Shared helpers for provider tests against a mock control plane

#![allow(dead_code)]

use cloud::config::ProviderConfig;
use cloud::CloudProvider;
use std::time::Duration;

pub fn config(url: String) -> ProviderConfig {
    ProviderConfig::new(url, "AKID", "secret")
        .with_read_timeout(Duration::from_secs(2))
        .with_write_timeout(Duration::from_secs(5))
        .with_poll_interval(Duration::from_millis(10))
        .with_settle_delay(Duration::from_millis(10))
}

pub fn provider(url: String) -> CloudProvider {
    CloudProvider::new(config(url)).unwrap()
}

pub fn instance_json(status: &str, instance_type: &str) -> String {
    format!(
        r#"{{"instance_id":"ins-1234","name":"web","description":null,"zone":"zone-a",
        "instance_type":"{}","image_id":"img-1","status":"{}","deletion_protection":false}}"#,
        instance_type, status
    )
}

pub fn instance_body(status: &str, instance_type: &str) -> String {
    format!(r#"{{"data":{}}}"#, instance_json(status, instance_type))
}

pub fn not_found(code: &str) -> String {
    format!(
        r#"{{"error":{{"code":"{}","message":"the resource does not exist"}}}}"#,
        code
    )
}

pub fn api_error(code: &str) -> String {
    format!(r#"{{"error":{{"code":"{}","message":"request rejected"}}}}"#, code)
}
