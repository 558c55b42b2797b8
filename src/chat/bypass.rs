//! Bypass detection (spec §4.8 step 1, glossary "Bypass"): some clients
//! send a throwaway warmup or liveness-probe request before the user types
//! anything. Those are identified by a short canonical greeting as the
//! sole user message, or by a known health-check client's user agent, and
//! short-circuit with a synthetic response rather than spending a real
//! upstream call and a credential slot.

use serde_json::Value;

const PROBE_MESSAGES: [&str; 6] = ["hi", "hello", "test", "ping", "warmup", "hey"];
const PROBE_USER_AGENTS: [&str; 3] = ["health-check", "uptime-kuma", "kube-probe"];

/// True when `body` looks like a warmup/liveness probe rather than a real
/// chat turn.
pub fn is_probe(body: &Value, user_agent: Option<&str>) -> bool {
    if let Some(ua) = user_agent {
        let lower = ua.to_ascii_lowercase();
        if PROBE_USER_AGENTS.iter().any(|p| lower.contains(p)) {
            return true;
        }
    }
    sole_user_message_is_canonical_probe(body)
}

fn sole_user_message_is_canonical_probe(body: &Value) -> bool {
    let Some(messages) = body.get("messages").and_then(Value::as_array) else {
        return false;
    };
    let user_messages: Vec<&Value> = messages.iter().filter(|m| m.get("role").and_then(Value::as_str) == Some("user")).collect();
    let [only] = user_messages.as_slice() else {
        return false;
    };
    let Some(text) = only.get("content").and_then(Value::as_str) else {
        return false;
    };
    let normalized = text.trim().to_ascii_lowercase();
    PROBE_MESSAGES.contains(&normalized.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn canonical_greeting_as_sole_user_message_is_a_probe() {
        let body = json!({"messages": [{"role": "user", "content": "Hi"}]});
        assert!(is_probe(&body, None));
    }

    #[test]
    fn known_health_check_user_agent_is_a_probe_regardless_of_body() {
        let body = json!({"messages": [{"role": "user", "content": "describe this dataset in depth"}]});
        assert!(is_probe(&body, Some("kube-probe/1.30")));
    }

    #[test]
    fn real_chat_turn_is_not_a_probe() {
        let body = json!({"messages": [{"role": "user", "content": "Summarize this PR for me"}]});
        assert!(!is_probe(&body, None));
    }

    #[test]
    fn multiple_user_messages_never_count_as_a_probe() {
        let body = json!({"messages": [
            {"role": "user", "content": "hi"},
            {"role": "assistant", "content": "hello!"},
            {"role": "user", "content": "hi"}
        ]});
        assert!(!is_probe(&body, None));
    }
}
