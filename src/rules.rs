use regex::Regex;
use serde::Deserialize;

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::{PgScrubError, Result};
use crate::transform::Transform;

type HmacSha256 = Hmac<Sha256>;

fn default_pseudonym_length() -> usize {
    16
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum RuleAction {
    /// Replace every match with a fixed string; `$1`-style capture group
    /// references are expanded.
    Replace { replacement: String },
    /// Replace every match with a keyed HMAC-SHA256 hex token of the matched
    /// text. Same input and key always produce the same token, so foreign
    /// keys on pseudonymized values stay consistent across tables.
    Pseudonym {
        #[serde(default = "default_pseudonym_length")]
        length: usize,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct RuleSpec {
    pub pattern: String,
    #[serde(flatten)]
    pub action: RuleAction,
}

#[derive(Debug)]
struct CompiledRule {
    pattern: Regex,
    action: RuleAction,
}

/// Line-oriented rule engine over the COPY text of a data block.
///
/// Rules are applied in order; later rules see the output of earlier ones.
#[derive(Debug)]
pub struct RuleTransform {
    rules: Vec<CompiledRule>,
    key: Vec<u8>,
}

impl RuleTransform {
    pub fn new(specs: Vec<RuleSpec>, key: Vec<u8>) -> Result<Self> {
        let mut rules = Vec::with_capacity(specs.len());
        for spec in specs {
            let pattern = Regex::new(&spec.pattern).map_err(|e| {
                PgScrubError::Transform(format!("bad pattern {:?}: {}", spec.pattern, e))
            })?;
            rules.push(CompiledRule {
                pattern,
                action: spec.action,
            });
        }
        Ok(Self { rules, key })
    }

    fn pseudonym(&self, value: &str, length: usize) -> String {
        const HEX: &[u8; 16] = b"0123456789abcdef";

        let mut mac = HmacSha256::new_from_slice(&self.key).expect("HMAC accepts any key length");
        mac.update(value.as_bytes());
        let digest = mac.finalize().into_bytes();

        let mut token = String::with_capacity(length);
        for &byte in digest.iter() {
            if token.len() >= length {
                break;
            }
            token.push(HEX[(byte >> 4) as usize] as char);
            token.push(HEX[(byte & 0x0f) as usize] as char);
        }
        token.truncate(length);
        token
    }

    fn apply_line(&self, line: &str) -> String {
        let mut current = line.to_string();
        for rule in &self.rules {
            if !rule.pattern.is_match(&current) {
                continue;
            }
            let replaced = match &rule.action {
                RuleAction::Replace { replacement } => rule
                    .pattern
                    .replace_all(&current, replacement.as_str())
                    .into_owned(),
                RuleAction::Pseudonym { length } => {
                    let length = *length;
                    rule.pattern
                        .replace_all(&current, |caps: &regex::Captures| {
                            self.pseudonym(&caps[0], length)
                        })
                        .into_owned()
                }
            };
            current = replaced;
        }
        current
    }
}

impl Transform for RuleTransform {
    fn transform(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        let text = std::str::from_utf8(data)?;

        let mut out = Vec::with_capacity(data.len());
        let mut start = 0;
        loop {
            match memchr::memchr(b'\n', &data[start..]) {
                Some(pos) => {
                    let end = start + pos;
                    out.extend_from_slice(self.apply_line(&text[start..end]).as_bytes());
                    out.push(b'\n');
                    start = end + 1;
                }
                None => {
                    if start < text.len() {
                        out.extend_from_slice(self.apply_line(&text[start..]).as_bytes());
                    }
                    break;
                }
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transform_str(rules: Vec<RuleSpec>, input: &str) -> String {
        let mut t = RuleTransform::new(rules, b"test-key".to_vec()).unwrap();
        String::from_utf8(t.transform(input.as_bytes()).unwrap()).unwrap()
    }

    #[test]
    fn replace_fixed() {
        let rules = vec![RuleSpec {
            pattern: "alice".to_string(),
            action: RuleAction::Replace {
                replacement: "ALICE".to_string(),
            },
        }];
        assert_eq!(
            transform_str(rules, "1\talice\n2\tbob\n"),
            "1\tALICE\n2\tbob\n"
        );
    }

    #[test]
    fn replace_with_captures() {
        let rules = vec![RuleSpec {
            pattern: r"(\w+)@[\w.]+".to_string(),
            action: RuleAction::Replace {
                replacement: "$1@example.invalid".to_string(),
            },
        }];
        assert_eq!(
            transform_str(rules, "1\tjoe@corp.com\n"),
            "1\tjoe@example.invalid\n"
        );
    }

    #[test]
    fn pseudonym_is_deterministic() {
        let spec = || {
            vec![RuleSpec {
                pattern: "secret".to_string(),
                action: RuleAction::Pseudonym { length: 12 },
            }]
        };
        let a = transform_str(spec(), "secret\n");
        let b = transform_str(spec(), "secret\n");
        assert_eq!(a, b);
        assert_eq!(a.trim_end().len(), 12);
        assert_ne!(a.trim_end(), "secret");
        assert!(a.trim_end().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn pseudonym_differs_per_input() {
        let rules = vec![RuleSpec {
            pattern: r"user\d+".to_string(),
            action: RuleAction::Pseudonym { length: 16 },
        }];
        let out = transform_str(rules, "user1\tuser2\n");
        let fields: Vec<&str> = out.trim_end().split('\t').collect();
        assert_eq!(fields.len(), 2);
        assert_ne!(fields[0], fields[1]);
    }

    #[test]
    fn rules_chain_in_order() {
        let rules = vec![
            RuleSpec {
                pattern: "a".to_string(),
                action: RuleAction::Replace {
                    replacement: "b".to_string(),
                },
            },
            RuleSpec {
                pattern: "b+".to_string(),
                action: RuleAction::Replace {
                    replacement: "x".to_string(),
                },
            },
        ];
        assert_eq!(transform_str(rules, "aab\n"), "x\n");
    }

    #[test]
    fn no_trailing_newline_preserved() {
        let rules = vec![RuleSpec {
            pattern: "x".to_string(),
            action: RuleAction::Replace {
                replacement: "y".to_string(),
            },
        }];
        assert_eq!(transform_str(rules.clone(), "x"), "y");
        assert_eq!(transform_str(rules, "x\n"), "y\n");
    }

    #[test]
    fn bad_pattern_is_rejected() {
        let err = RuleTransform::new(
            vec![RuleSpec {
                pattern: "(".to_string(),
                action: RuleAction::Replace {
                    replacement: String::new(),
                },
            }],
            Vec::new(),
        )
        .unwrap_err();
        assert!(matches!(err, PgScrubError::Transform(_)));
    }

    #[test]
    fn non_utf8_payload_is_rejected() {
        let mut t = RuleTransform::new(Vec::new(), Vec::new()).unwrap();
        assert!(matches!(
            t.transform(b"\xff\xfe"),
            Err(PgScrubError::InvalidUtf8(_))
        ));
    }

    #[test]
    fn specs_deserialize_from_json() {
        let json = r#"[
            {"pattern": "a", "action": "replace", "replacement": "b"},
            {"pattern": "c", "action": "pseudonym"},
            {"pattern": "d", "action": "pseudonym", "length": 8}
        ]"#;
        let specs: Vec<RuleSpec> = serde_json::from_str(json).unwrap();
        assert_eq!(specs.len(), 3);
        assert!(matches!(
            specs[1].action,
            RuleAction::Pseudonym { length: 16 }
        ));
        assert!(matches!(specs[2].action, RuleAction::Pseudonym { length: 8 }));
    }
}
