use serde::Deserialize;

use crate::job::{Destination, FieldRef, JobRecord, RecordError, ResourceName};

/// Maps queue (partition) names to a resource. A rule matches on an exact name or on a prefix.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct QueueRule {
    pub resource: String,
    #[serde(default)]
    pub names: Vec<String>,
    #[serde(default)]
    pub prefixes: Vec<String>,
    /// used by the `cores` output column
    #[serde(default)]
    pub cores_per_node: Option<u32>,
    /// used by the `gres` output column
    #[serde(default)]
    pub gres: Option<String>,
}

impl QueueRule {
    fn matches(&self, queue: &str, case_insensitive: bool) -> bool {
        let fold = |s: &str| if case_insensitive { s.to_lowercase() } else { s.to_owned() };
        let queue = fold(queue);
        self.names.iter().any(|name| fold(name) == queue) || self.prefixes.iter().any(|p| queue.starts_with(&fold(p)))
    }
}

/// How a record's destination resource is determined.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResourceRule {
    /// a single bucket, written straight into the output directory
    #[default]
    Flat,
    /// a single named resource
    Fixed { name: String },
    /// by queue/partition name; first matching rule wins
    Queue {
        field: FieldRef,
        rules: Vec<QueueRule>,
        #[serde(default)]
        default: Option<String>,
        #[serde(default)]
        case_insensitive: bool,
    },
    /// whatever follows the first `skip` characters of the account, e.g. `bbka-delta-gpu` -> `delta-gpu`
    AccountSuffix { skip: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification<'a> {
    pub destination: Destination,
    /// the queue rule that matched, if any
    pub rule: Option<&'a QueueRule>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Unclassified {
    UnknownQueue(String),
    EmptyAccountSuffix(String),
}

impl std::fmt::Display for Unclassified {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Unclassified::UnknownQueue(queue) => write!(f, "Unrecognized queue {queue}"),
            Unclassified::EmptyAccountSuffix(account) => write!(f, "No resource in account {account}"),
        }
    }
}

impl ResourceRule {
    /// `account` is the original (not yet rewritten) account string.
    pub fn classify(
        &self,
        record: &JobRecord,
        account: &str,
    ) -> Result<Result<Classification<'_>, Unclassified>, RecordError> {
        let resource = |name: &str| Destination::Resource(ResourceName(name.to_owned()));
        Ok(match self {
            ResourceRule::Flat => Ok(Classification {
                destination: Destination::Root,
                rule: None,
            }),
            ResourceRule::Fixed { name } => Ok(Classification {
                destination: resource(name),
                rule: None,
            }),
            ResourceRule::Queue {
                field,
                rules,
                default,
                case_insensitive,
            } => {
                let queue = record.get(field)?;
                match rules.iter().find(|rule| rule.matches(&queue, *case_insensitive)) {
                    Some(rule) => Ok(Classification {
                        destination: resource(&rule.resource),
                        rule: Some(rule),
                    }),
                    None => match default {
                        Some(name) => Ok(Classification {
                            destination: resource(name),
                            rule: None,
                        }),
                        None => Err(Unclassified::UnknownQueue(queue)),
                    },
                }
            }
            ResourceRule::AccountSuffix { skip } => match account.get(*skip..) {
                Some(suffix) if !suffix.is_empty() => Ok(Classification {
                    destination: resource(suffix),
                    rule: None,
                }),
                _ => Err(Unclassified::EmptyAccountSuffix(account.to_owned())),
            },
        })
    }
}
