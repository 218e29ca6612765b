//! Namespace negotiation
//!
//! A proposal names the chains, methods and events it wants per namespace key. The
//! wallet approves the intersection with what its signing capability supports, and
//! refuses outright when a *required* item is not supported.

use crate::capability::{account_id, namespace_of, SigningCapability};
use crate::types::{Proposal, ProposalNamespace, SessionNamespace, SessionNamespaces};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NamespaceError {
    #[error("unsupported namespace: {0}")]
    UnsupportedNamespace(String),

    #[error("unsupported chains in {namespace}: {items:?}")]
    UnsupportedChains { namespace: String, items: Vec<String> },

    #[error("unsupported methods in {namespace}: {items:?}")]
    UnsupportedMethods { namespace: String, items: Vec<String> },

    #[error("unsupported events in {namespace}: {items:?}")]
    UnsupportedEvents { namespace: String, items: Vec<String> },

    #[error("no requested namespace overlaps what the wallet supports")]
    NoOverlap,
}

/// What the bound capability can serve, as session namespaces
pub fn supported_namespaces(capability: &dyn SigningCapability) -> SessionNamespaces {
    let chain = capability.chain_id();
    let account = account_id(&chain, &capability.current_account());

    let mut namespaces = SessionNamespaces::new();
    namespaces.insert(
        namespace_of(&chain).to_string(),
        SessionNamespace {
            chains: vec![chain.clone()],
            accounts: vec![account],
            methods: capability.supported_methods(),
            events: capability.supported_events(),
        },
    );
    namespaces
}

/// A requested namespace with chain-id keys (`"aleo:1"`) folded into `chains`
fn normalize(key: &str, requested: &ProposalNamespace) -> (String, ProposalNamespace) {
    let mut requested = requested.clone();
    if key.contains(':') {
        if requested.chains.is_empty() {
            requested.chains.push(key.to_string());
        }
        return (namespace_of(key).to_string(), requested);
    }
    (key.to_string(), requested)
}

fn missing(requested: &[String], supported: &[String]) -> Vec<String> {
    requested
        .iter()
        .filter(|item| !supported.contains(*item))
        .cloned()
        .collect()
}

/// Reject the proposal if any required namespace item is unsupported
fn check_required(
    proposal: &Proposal,
    supported: &SessionNamespaces,
) -> Result<(), NamespaceError> {
    for (key, requested) in &proposal.required_namespaces {
        let (namespace, requested) = normalize(key, requested);
        let available = supported
            .get(&namespace)
            .ok_or_else(|| NamespaceError::UnsupportedNamespace(key.clone()))?;

        let chains = missing(&requested.chains, &available.chains);
        if !chains.is_empty() {
            return Err(NamespaceError::UnsupportedChains {
                namespace,
                items: chains,
            });
        }
        let methods = missing(&requested.methods, &available.methods);
        if !methods.is_empty() {
            return Err(NamespaceError::UnsupportedMethods {
                namespace,
                items: methods,
            });
        }
        let events = missing(&requested.events, &available.events);
        if !events.is_empty() {
            return Err(NamespaceError::UnsupportedEvents {
                namespace,
                items: events,
            });
        }
    }
    Ok(())
}

/// Union of everything requested under one namespace key
#[derive(Default)]
struct Wanted {
    chains: BTreeSet<String>,
    methods: BTreeSet<String>,
    events: BTreeSet<String>,
}

/// Intersect the proposal's required and optional namespaces with `supported`
pub fn build_approved_namespaces(
    proposal: &Proposal,
    supported: &SessionNamespaces,
) -> Result<SessionNamespaces, NamespaceError> {
    check_required(proposal, supported)?;

    let mut wanted: BTreeMap<String, Wanted> = BTreeMap::new();
    for (key, requested) in proposal
        .required_namespaces
        .iter()
        .chain(proposal.optional_namespaces.iter())
    {
        let (namespace, requested) = normalize(key, requested);
        let entry = wanted.entry(namespace).or_default();
        entry.chains.extend(requested.chains);
        entry.methods.extend(requested.methods);
        entry.events.extend(requested.events);
    }

    let mut approved = SessionNamespaces::new();
    for (namespace, requested) in wanted {
        let Some(available) = supported.get(&namespace) else {
            continue;
        };

        let chains: Vec<String> = available
            .chains
            .iter()
            .filter(|chain| requested.chains.contains(*chain))
            .cloned()
            .collect();
        if chains.is_empty() {
            continue;
        }

        let accounts = available
            .accounts
            .iter()
            .filter(|account| {
                chains
                    .iter()
                    .any(|chain| account.starts_with(&format!("{}:", chain)))
            })
            .cloned()
            .collect();

        approved.insert(
            namespace,
            SessionNamespace {
                chains,
                accounts,
                methods: keep_requested(&available.methods, &requested.methods),
                events: keep_requested(&available.events, &requested.events),
            },
        );
    }

    if approved.is_empty() {
        return Err(NamespaceError::NoOverlap);
    }
    Ok(approved)
}

/// Supported items that were requested, in supported order
fn keep_requested(supported: &[String], requested: &BTreeSet<String>) -> Vec<String> {
    supported
        .iter()
        .filter(|item| requested.contains(*item))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PeerMetadata, ProposalNamespaces};

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn aleo_supported() -> SessionNamespaces {
        let mut supported = SessionNamespaces::new();
        supported.insert(
            "aleo".to_string(),
            SessionNamespace {
                chains: strings(&["aleo:1"]),
                accounts: strings(&["aleo:1:aleo1abc"]),
                methods: strings(&["aleo_sign", "aleo_decrypt"]),
                events: strings(&["accountSelected", "chainChanged"]),
            },
        );
        supported
    }

    fn proposal(required: ProposalNamespaces, optional: ProposalNamespaces) -> Proposal {
        Proposal {
            id: 1,
            proposer: PeerMetadata::default(),
            relays: Vec::new(),
            required_namespaces: required,
            optional_namespaces: optional,
            pairing_topic: "pairing".to_string(),
            verify_context: Default::default(),
        }
    }

    fn namespace(chains: &[&str], methods: &[&str], events: &[&str]) -> ProposalNamespace {
        ProposalNamespace {
            chains: strings(chains),
            methods: strings(methods),
            events: strings(events),
        }
    }

    #[test]
    fn approves_intersection() {
        let mut required = ProposalNamespaces::new();
        required.insert(
            "aleo".to_string(),
            namespace(&["aleo:1"], &["aleo_sign"], &["chainChanged"]),
        );

        let approved = build_approved_namespaces(&proposal(required, Default::default()), &aleo_supported())
            .unwrap();
        let aleo = &approved["aleo"];
        assert_eq!(aleo.chains, strings(&["aleo:1"]));
        assert_eq!(aleo.accounts, strings(&["aleo:1:aleo1abc"]));
        assert_eq!(aleo.methods, strings(&["aleo_sign"]));
        assert_eq!(aleo.events, strings(&["chainChanged"]));
    }

    #[test]
    fn optional_items_widen_the_approval() {
        let mut required = ProposalNamespaces::new();
        required.insert("aleo".to_string(), namespace(&["aleo:1"], &["aleo_sign"], &[]));
        let mut optional = ProposalNamespaces::new();
        optional.insert(
            "aleo".to_string(),
            namespace(&["aleo:1"], &["aleo_decrypt", "aleo_unknown"], &["accountSelected"]),
        );

        let approved =
            build_approved_namespaces(&proposal(required, optional), &aleo_supported()).unwrap();
        assert_eq!(approved["aleo"].methods, strings(&["aleo_sign", "aleo_decrypt"]));
        assert_eq!(approved["aleo"].events, strings(&["accountSelected"]));
    }

    #[test]
    fn chain_keyed_namespace_is_accepted() {
        let mut required = ProposalNamespaces::new();
        required.insert("aleo:1".to_string(), namespace(&[], &["aleo_sign"], &[]));

        let approved = build_approved_namespaces(&proposal(required, Default::default()), &aleo_supported())
            .unwrap();
        assert_eq!(approved["aleo"].chains, strings(&["aleo:1"]));
    }

    #[test]
    fn unsupported_required_method_fails() {
        let mut required = ProposalNamespaces::new();
        required.insert(
            "aleo".to_string(),
            namespace(&["aleo:1"], &["aleo_transfer"], &[]),
        );

        let err = build_approved_namespaces(&proposal(required, Default::default()), &aleo_supported())
            .unwrap_err();
        assert_eq!(
            err,
            NamespaceError::UnsupportedMethods {
                namespace: "aleo".to_string(),
                items: strings(&["aleo_transfer"]),
            }
        );
    }

    #[test]
    fn unsupported_required_namespace_fails() {
        let mut required = ProposalNamespaces::new();
        required.insert("eip155".to_string(), namespace(&["eip155:1"], &["eth_sign"], &[]));

        let err = build_approved_namespaces(&proposal(required, Default::default()), &aleo_supported())
            .unwrap_err();
        assert_eq!(err, NamespaceError::UnsupportedNamespace("eip155".to_string()));
    }

    #[test]
    fn unsupported_required_chain_fails() {
        let mut required = ProposalNamespaces::new();
        required.insert("aleo".to_string(), namespace(&["aleo:2"], &[], &[]));

        let err = build_approved_namespaces(&proposal(required, Default::default()), &aleo_supported())
            .unwrap_err();
        assert!(matches!(err, NamespaceError::UnsupportedChains { .. }));
    }

    #[test]
    fn nothing_in_common_fails() {
        let mut optional = ProposalNamespaces::new();
        optional.insert("eip155".to_string(), namespace(&["eip155:1"], &["eth_sign"], &[]));

        let err = build_approved_namespaces(&proposal(Default::default(), optional), &aleo_supported())
            .unwrap_err();
        assert_eq!(err, NamespaceError::NoOverlap);
    }
}
