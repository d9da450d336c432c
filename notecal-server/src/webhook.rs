//! Notion webhook payloads: signature checks and page-id extraction.

use hmac::{Hmac, Mac};
use notecal_core::ChangeSignal;
use serde_json::{Map, Value};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "x-notion-signature";
const SIGNATURE_PREFIX: &str = "sha256=";
const PAGE_ID_KEYS: [&str; 2] = ["page_id", "pageId"];
const DELETED_EVENT: &str = "page.deleted";

/// Constant-time check of an `X-Notion-Signature` header value
/// (`sha256=<hex>` HMAC of the raw body keyed with the verification token).
pub fn verify_signature(token: &str, body: &[u8], header: &str) -> bool {
    let Some(hex_digest) = header.trim().strip_prefix(SIGNATURE_PREFIX) else {
        return false;
    };
    let Ok(expected) = hex::decode(hex_digest) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(token.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

/// Constant-time equality of two shared secrets, by comparing their MACs
/// under `expected`.
pub fn secrets_match(expected: &str, provided: &str) -> bool {
    let Ok(mut reference) = HmacSha256::new_from_slice(expected.as_bytes()) else {
        return false;
    };
    reference.update(expected.as_bytes());
    let tag = reference.finalize().into_bytes();

    let Ok(mut mac) = HmacSha256::new_from_slice(expected.as_bytes()) else {
        return false;
    };
    mac.update(provided.as_bytes());
    mac.verify_slice(&tag).is_ok()
}

/// `verification_token` of a subscription handshake, if this is one.
pub fn handshake_token(payload: &Value) -> Option<&str> {
    payload.get("verification_token").and_then(Value::as_str)
}

/// Every page id mentioned in the payload, in first-seen order.
pub fn collect_page_ids(payload: &Value) -> Vec<String> {
    let mut found = Vec::new();
    walk(payload, None, &mut found);

    let mut seen = std::collections::HashSet::new();
    found.retain(|id| seen.insert(id.clone()));
    found
}

fn walk(value: &Value, parent_key: Option<&str>, found: &mut Vec<String>) {
    match value {
        Value::Object(map) => {
            let hint = object_hint(map);
            if hint == "page" || parent_key == Some("page") {
                push_id(map.get("id").or_else(|| map.get("page_id")), found);
            }
            for (key, nested) in map {
                if PAGE_ID_KEYS.contains(&key.as_str()) {
                    push_id(Some(nested), found);
                    continue;
                }
                if key == "parent" {
                    push_id(nested.get("page_id"), found);
                }
                if nested.is_object() || nested.is_array() {
                    walk(nested, Some(key), found);
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                walk(item, parent_key, found);
            }
        }
        _ => {}
    }
}

fn object_hint(map: &Map<String, Value>) -> String {
    ["object", "type"]
        .iter()
        .filter_map(|key| map.get(*key).and_then(Value::as_str))
        .find(|s| !s.is_empty())
        .unwrap_or_default()
        .to_lowercase()
}

fn push_id(candidate: Option<&Value>, found: &mut Vec<String>) {
    if let Some(id) = candidate.and_then(Value::as_str).and_then(normalize_page_id) {
        found.push(id);
    }
}

/// Canonical hyphenated form of a Notion id, with or without dashes.
pub fn normalize_page_id(value: &str) -> Option<String> {
    let compact: String = value.trim().chars().filter(|c| *c != '-').collect();
    if compact.len() != 32 {
        return None;
    }
    let id = uuid::Uuid::try_parse(&compact).ok()?;
    Some(id.hyphenated().to_string())
}

/// Change signals for a verified payload. `page.deleted` events skip the refetch.
pub fn change_signals(payload: &Value, page_ids: &[String]) -> Vec<ChangeSignal> {
    let removed = payload.get("type").and_then(Value::as_str) == Some(DELETED_EVENT);
    page_ids
        .iter()
        .map(|id| {
            if removed {
                ChangeSignal::removed(id.as_str())
            } else {
                ChangeSignal::changed(id.as_str())
            }
        })
        .collect()
}
