//! MQTT-style topic pattern matching for the bridge channel.
//!
//! Patterns are slash-delimited with two wildcard forms: `+` matches
//! exactly one segment, `#` matches one or more trailing segments and is
//! only meaningful as the final token. Every inbound delivery is tested
//! against every tracked pattern -- subscription counts are small enough
//! that a linear scan beats maintaining a trie.

/// Check whether `topic` matches the subscription `pattern`.
///
/// Exact string equality is accepted trivially. Otherwise segments are
/// walked index by index: `#` succeeds unconditionally regardless of the
/// remaining topic segments, `+` consumes exactly one segment, and any
/// other pattern segment must equal the topic segment at the same index.
/// Without a `#` shortcut the segment counts must agree.
pub fn topic_matches(pattern: &str, topic: &str) -> bool {
    if pattern == topic {
        return true;
    }

    let pattern_parts: Vec<&str> = pattern.split('/').collect();
    let topic_parts: Vec<&str> = topic.split('/').collect();

    for (i, part) in pattern_parts.iter().enumerate() {
        match *part {
            "#" => return true,
            "+" => {
                if i >= topic_parts.len() {
                    return false;
                }
            }
            literal => {
                if topic_parts.get(i) != Some(&literal) {
                    return false;
                }
            }
        }
    }

    pattern_parts.len() == topic_parts.len()
}

// ── Tests ────────────────────────────────────────────────────────────
