//! Frontend rule reconciliation
//!
//! A logical routing rule is the pair (host-header ACL, backend-switching
//! rule referencing it). The pair is never written in separate
//! non-transactional calls: every switching rule must have a matching ACL at
//! every commit point, so both lists are replaced inside one transaction.
//!
//! Operator-authored ACLs with other criteria, and switching rules that do
//! not pair with a host ACL, are carried through every rewrite untouched.

use std::collections::HashMap;

use tracing::{info, warn};

use super::intent::DomainMatch;
use super::{Outcome, naming, with_version_retry};
use crate::haproxy::{Acl, BackendSwitchingRule, DataplaneApi};
use crate::{Error, Result};

/// Match criterion of the ACLs the bridge owns
const HOST_CRITERION: &str = "hdr(host)";

/// A logical host-header routing rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrontendRule {
    /// Host header value (or pattern)
    pub domain: String,
    /// Match semantics
    pub match_type: DomainMatch,
    /// Target backend
    pub backend: String,
}

fn acl_value(domain: &str, match_type: DomainMatch) -> String {
    match match_type {
        DomainMatch::Exact => domain.to_string(),
        DomainMatch::Prefix => format!("-m beg {domain}"),
        DomainMatch::Regex => format!("-m reg {domain}"),
    }
}

fn parse_acl_value(value: &str) -> (DomainMatch, &str) {
    if let Some(domain) = value.strip_prefix("-m reg ") {
        (DomainMatch::Regex, domain)
    } else if let Some(domain) = value.strip_prefix("-m beg ") {
        (DomainMatch::Prefix, domain)
    } else {
        (DomainMatch::Exact, value)
    }
}

/// The frontend's rule state, split into the logical rules the bridge owns
/// and the foreign entries it must preserve verbatim
struct RuleSets {
    foreign_acls: Vec<Acl>,
    foreign_rules: Vec<BackendSwitchingRule>,
    logical: Vec<FrontendRule>,
}

impl RuleSets {
    /// Pair each switching rule's `cond_test` with the ACL of the same name;
    /// host-header pairs become logical rules, everything else is foreign
    fn reconstruct(acls: Vec<Acl>, rules: Vec<BackendSwitchingRule>) -> Self {
        let mut acl_by_name: HashMap<String, Acl> = acls
            .into_iter()
            .map(|acl| (acl.acl_name.clone(), acl))
            .collect();

        let mut logical = Vec::new();
        let mut foreign_rules = Vec::new();

        for rule in rules {
            let paired = acl_by_name
                .get(&rule.cond_test)
                .is_some_and(|acl| acl.criterion == HOST_CRITERION);

            if paired {
                if let Some(acl) = acl_by_name.remove(&rule.cond_test) {
                    let (match_type, domain) = parse_acl_value(&acl.value);
                    logical.push(FrontendRule {
                        domain: domain.to_string(),
                        match_type,
                        backend: rule.name,
                    });
                }
            } else {
                foreign_rules.push(rule);
            }
        }

        let foreign_acls = acl_by_name.into_values().collect();

        Self {
            foreign_acls,
            foreign_rules,
            logical,
        }
    }

    /// Rebuild the full ACL and switching-rule lists, reindexed 0..n, with
    /// the foreign entries first
    fn rebuild(mut self) -> (Vec<Acl>, Vec<BackendSwitchingRule>) {
        self.foreign_acls.sort_by_key(|acl| acl.index);
        self.foreign_rules.sort_by_key(|rule| rule.index);

        let mut acls = self.foreign_acls;
        let mut rules = self.foreign_rules;

        for rule in &self.logical {
            let name = naming::acl_name(&rule.backend, &rule.domain);
            acls.push(Acl {
                index: 0,
                acl_name: name.clone(),
                criterion: HOST_CRITERION.to_string(),
                value: acl_value(&rule.domain, rule.match_type),
            });
            rules.push(BackendSwitchingRule {
                index: 0,
                cond: "if".to_string(),
                cond_test: name,
                name: rule.backend.clone(),
            });
        }

        for (i, acl) in acls.iter_mut().enumerate() {
            acl.index = i as i64;
        }
        for (i, rule) in rules.iter_mut().enumerate() {
            rule.index = i as i64;
        }

        (acls, rules)
    }
}

/// Edit applied to the logical rule set inside one transaction
#[derive(Debug, Clone, Copy)]
enum RuleEdit<'a> {
    Upsert(&'a FrontendRule),
    RemoveDomain(&'a str),
    RemoveBackend(&'a str),
}

/// Idempotently ensure the host-header rule `domain -> backend` exists on
/// the frontend. An existing rule for the domain has its backend and match
/// type replaced.
pub async fn ensure_rule(
    api: &dyn DataplaneApi,
    frontend: &str,
    rule: &FrontendRule,
) -> Result<Outcome> {
    let (outcome, _) = run_edit(api, frontend, RuleEdit::Upsert(rule)).await?;

    if outcome != Outcome::Unchanged {
        info!(
            frontend,
            domain = %rule.domain,
            backend = %rule.backend,
            "Routing rule written"
        );
    }
    Ok(outcome)
}

/// Remove the rule for `domain`, if present
pub async fn remove_rule(api: &dyn DataplaneApi, frontend: &str, domain: &str) -> Result<Outcome> {
    let (outcome, _) = run_edit(api, frontend, RuleEdit::RemoveDomain(domain)).await?;
    Ok(outcome)
}

/// Remove every rule pointing at `backend`, returning the domains dropped.
/// Called when the backend's last server is gone; a rule must never route to
/// an empty pool.
pub async fn remove_rules_for_backend(
    api: &dyn DataplaneApi,
    frontend: &str,
    backend: &str,
) -> Result<Vec<String>> {
    let (outcome, removed) = run_edit(api, frontend, RuleEdit::RemoveBackend(backend)).await?;

    if outcome == Outcome::Deleted {
        info!(frontend, backend, domains = ?removed, "Routing rules removed");
    }
    Ok(removed)
}

/// One transactional read-edit-write of the frontend's rule lists, retried
/// once on version conflict. On any mid-transaction failure the transaction
/// is aborted and the error surfaced; fail-closed on routing means the
/// server stays in place while no dangling rule is ever committed.
async fn run_edit(
    api: &dyn DataplaneApi,
    frontend: &str,
    edit: RuleEdit<'_>,
) -> Result<(Outcome, Vec<String>)> {
    with_version_retry(api, |version| async move {
        let id = api.start_transaction(version).await?;

        let result = match apply_edit(api, frontend, edit, &id).await {
            Ok(result) => match api.commit_transaction(&id).await {
                Ok(()) => return Ok(result),
                Err(e) => Err(e),
            },
            Err(e) => Err(e),
        };

        // Leave nothing staged behind a failed edit or commit
        if let Err(abort_err) = api.abort_transaction(&id).await {
            if !abort_err.is_not_found() {
                warn!(transaction = %id, error = %abort_err, "Transaction abort failed");
            }
        }

        result.map_err(|e| match e {
            // Let the retry wrapper re-read the version
            Error::VersionConflict => Error::VersionConflict,
            e => Error::Transaction {
                id,
                message: e.to_string(),
            },
        })
    })
    .await
}

async fn apply_edit(
    api: &dyn DataplaneApi,
    frontend: &str,
    edit: RuleEdit<'_>,
    transaction_id: &str,
) -> Result<(Outcome, Vec<String>)> {
    let acls = api.acls(frontend, transaction_id).await?;
    let rules = api.switching_rules(frontend, transaction_id).await?;
    let mut sets = RuleSets::reconstruct(acls, rules);

    let mut removed = Vec::new();
    let outcome = match edit {
        RuleEdit::Upsert(rule) => {
            match sets.logical.iter_mut().find(|r| r.domain == rule.domain) {
                Some(existing) if *existing == *rule => Outcome::Unchanged,
                Some(existing) => {
                    *existing = rule.clone();
                    Outcome::Updated
                }
                None => {
                    sets.logical.push(rule.clone());
                    Outcome::Created
                }
            }
        }
        RuleEdit::RemoveDomain(domain) => {
            let before = sets.logical.len();
            sets.logical.retain(|r| {
                if r.domain == domain {
                    removed.push(r.domain.clone());
                    false
                } else {
                    true
                }
            });
            if sets.logical.len() == before {
                Outcome::Skipped {
                    reason: "no rule for domain".to_string(),
                }
            } else {
                Outcome::Deleted
            }
        }
        RuleEdit::RemoveBackend(backend) => {
            sets.logical.retain(|r| {
                if r.backend == backend {
                    removed.push(r.domain.clone());
                    false
                } else {
                    true
                }
            });
            if removed.is_empty() {
                Outcome::Skipped {
                    reason: "no rules for backend".to_string(),
                }
            } else {
                Outcome::Deleted
            }
        }
    };

    let (acls, rules) = sets.rebuild();
    api.replace_acls(frontend, &acls, transaction_id).await?;
    api.replace_switching_rules(frontend, &rules, transaction_id)
        .await?;

    Ok((outcome, removed))
}
