use std::{
    net::IpAddr,
    sync::Arc,
};

use async_trait::async_trait;
use chrono::{
    SecondsFormat,
    Utc,
};
use common::types::EventContext;
use serde_json::{
    json,
    Value as JsonValue,
};

use super::BuiltinContext;
use crate::{
    FuncReturn,
    StepFunction,
};

pub(super) fn add_timestamp_factory(
    _ctx: &BuiltinContext,
) -> anyhow::Result<Arc<dyn StepFunction>> {
    Ok(Arc::new(AddTimestamp))
}

/// Backfills `timestamp` (and `receivedAt`) on events whose client did not
/// set them. Existing values are left alone.
pub struct AddTimestamp;

#[async_trait]
impl StepFunction for AddTimestamp {
    async fn exec(&self, mut event: JsonValue, _ctx: &EventContext) -> anyhow::Result<FuncReturn> {
        if let Some(obj) = event.as_object_mut() {
            let now = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
            if !obj.contains_key("timestamp") {
                obj.insert("timestamp".to_owned(), json!(now));
            }
            if !obj.contains_key("receivedAt") {
                obj.insert("receivedAt".to_owned(), json!(now));
            }
        }
        Ok(FuncReturn::Event(event))
    }
}

pub(super) fn anonymize_ip_factory(
    _ctx: &BuiltinContext,
) -> anyhow::Result<Arc<dyn StepFunction>> {
    Ok(Arc::new(AnonymizeIp))
}

/// Truncates `context.ip`: the last octet of an IPv4 address, the last 80
/// bits of an IPv6 address. Unparseable values pass through untouched.
pub struct AnonymizeIp;

#[async_trait]
impl StepFunction for AnonymizeIp {
    async fn exec(&self, mut event: JsonValue, _ctx: &EventContext) -> anyhow::Result<FuncReturn> {
        let anonymized = event
            .pointer("/context/ip")
            .and_then(|v| v.as_str())
            .and_then(|raw| raw.parse::<IpAddr>().ok())
            .map(anonymize);
        if let Some(ip) = anonymized {
            if let Some(context) = event.pointer_mut("/context") {
                if let Some(obj) = context.as_object_mut() {
                    obj.insert("ip".to_owned(), json!(ip));
                }
            }
        }
        Ok(FuncReturn::Event(event))
    }
}

fn anonymize(ip: IpAddr) -> String {
    match ip {
        IpAddr::V4(v4) => {
            let [a, b, c, _] = v4.octets();
            format!("{a}.{b}.{c}.0")
        },
        IpAddr::V6(v6) => {
            let [a, b, c, ..] = v6.segments();
            format!("{a:x}:{b:x}:{c:x}::")
        },
    }
}
