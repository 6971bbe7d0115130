//! Declared actions: what to deploy or call, with which arguments, after what.

use std::fmt;

use alloy::primitives::Address;
use serde::{Deserialize, Serialize};

/// A unit of work in a deployment graph.
///
/// The `id` is the journal key, so it must stay stable across re-runs of the same graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub id: String,
    #[serde(flatten)]
    pub kind: ActionKind,
    #[serde(default)]
    pub args: Vec<Arg>,
    /// Identity override, the configured default sender is used otherwise
    #[serde(default, rename = "from", skip_serializing_if = "Option::is_none")]
    pub sender: Option<Address>,
    /// Explicit dependencies; deferred references add implicit ones
    #[serde(default, rename = "after", skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// Create a new contract instance from a named artifact
    Deploy { contract: String },
    /// Call `method` on an existing contract
    Invoke {
        target: Target,
        method: String,
        /// Artifact describing a literal target address; deploy targets already name theirs
        #[serde(default, skip_serializing_if = "Option::is_none")]
        contract: Option<String>,
    },
}

/// Where an invoke is sent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Target {
    Address(Address),
    /// Id of a Deploy action, replaced by its produced address at run time
    Action(String),
}

/// One positional argument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Arg {
    /// A value taken from the journaled result of another action
    Deferred {
        result_of: String,
        #[serde(default)]
        field: ResultField,
    },
    Literal(serde_json::Value),
}

/// The part of an action result a deferred argument reads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultField {
    /// Address produced by a Deploy
    #[default]
    Address,
    /// Raw return payload of an Invoke
    ReturnData,
    /// Transaction hash of any action
    SubmissionRef,
}

impl Action {
    pub fn deploy(id: impl Into<String>, contract: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: ActionKind::Deploy {
                contract: contract.into(),
            },
            args: Vec::new(),
            sender: None,
            depends_on: Vec::new(),
        }
    }

    pub fn invoke(id: impl Into<String>, target: Target, method: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: ActionKind::Invoke {
                target,
                method: method.into(),
                contract: None,
            },
            args: Vec::new(),
            sender: None,
            depends_on: Vec::new(),
        }
    }

    pub fn with_args(mut self, args: impl IntoIterator<Item = Arg>) -> Self {
        self.args = args.into_iter().collect();
        self
    }

    pub fn with_sender(mut self, sender: Address) -> Self {
        self.sender = Some(sender);
        self
    }

    pub fn after(mut self, ids: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.depends_on.extend(ids.into_iter().map(Into::into));
        self
    }

    pub fn is_deploy(&self) -> bool {
        matches!(self.kind, ActionKind::Deploy { .. })
    }

    /// Ids whose results this action reads, with the field it needs from each.
    ///
    /// An invoke on a deployed action reads that action's address.
    pub fn references(&self) -> impl Iterator<Item = (&str, ResultField)> {
        let target = match &self.kind {
            ActionKind::Invoke {
                target: Target::Action(id),
                ..
            } => Some((id.as_str(), ResultField::Address)),
            _ => None,
        };
        let deferred = self.args.iter().filter_map(|arg| match arg {
            Arg::Deferred { result_of, field } => Some((result_of.as_str(), *field)),
            Arg::Literal(_) => None,
        });
        target.into_iter().chain(deferred)
    }

    /// Explicit dependencies followed by the implicit ones from references
    pub fn dependencies(&self) -> impl Iterator<Item = &str> {
        self.depends_on
            .iter()
            .map(String::as_str)
            .chain(self.references().map(|(id, _)| id))
    }
}

impl Arg {
    pub fn literal(value: impl Into<serde_json::Value>) -> Self {
        Arg::Literal(value.into())
    }

    pub fn address_of(id: impl Into<String>) -> Self {
        Arg::Deferred {
            result_of: id.into(),
            field: ResultField::Address,
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Address(address) => write!(f, "{address}"),
            Target::Action(id) => f.write_str(id),
        }
    }
}

impl From<&str> for Target {
    fn from(value: &str) -> Self {
        match value.parse::<Address>() {
            Ok(address) => Target::Address(address),
            Err(_) => Target::Action(value.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn references_include_target_and_deferred_args() {
        let action = Action::invoke("setup", Target::Action("token".into()), "configure")
            .with_args([
                Arg::literal("hello"),
                Arg::address_of("registry"),
                Arg::Deferred {
                    result_of: "mint".into(),
                    field: ResultField::ReturnData,
                },
            ])
            .after(["other"]);

        let refs: Vec<_> = action.references().collect();
        assert_eq!(
            refs,
            vec![
                ("token", ResultField::Address),
                ("registry", ResultField::Address),
                ("mint", ResultField::ReturnData),
            ]
        );
        let deps: Vec<_> = action.dependencies().collect();
        assert_eq!(deps, vec!["other", "token", "registry", "mint"]);
    }

    #[test]
    fn literal_address_target_has_no_reference() {
        let action = Action::invoke(
            "ping",
            Target::from("0xAb8483F64d9C6d1EcF9b849Ae677dD3315835cb2"),
            "ping",
        );
        assert!(matches!(
            action.kind,
            ActionKind::Invoke {
                target: Target::Address(_),
                ..
            }
        ));
        assert_eq!(action.references().count(), 0);
    }

    #[test]
    fn parses_yaml_declaration() {
        let yaml = r#"
id: registerMerchant1
invoke: { target: campusCredit, method: registerMerchant }
args:
  - "0xAb8483F64d9C6d1EcF9b849Ae677dD3315835cb2"
  - Kafetaria
  - { result_of: campusCredit }
after: [mint1]
"#;
        let action: Action = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(action.id, "registerMerchant1");
        assert_eq!(
            action.kind,
            ActionKind::Invoke {
                target: Target::Action("campusCredit".into()),
                method: "registerMerchant".into(),
                contract: None,
            }
        );
        assert_eq!(action.args.len(), 3);
        assert_eq!(action.args[1], Arg::literal("Kafetaria"));
        assert_eq!(action.args[2], Arg::address_of("campusCredit"));
        assert_eq!(action.depends_on, vec!["mint1".to_string()]);
    }
}
