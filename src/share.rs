//! Share slots
//!
//! A container materializes as one resource share named
//! `<prefix>-<PPPP><ZZZZ>`: a principal slot and a zone slot, each four
//! lowercase hex digits. Reading those names back out of a collected
//! [`Dataset`] recovers the previous grouping that the rebalancer tries to
//! preserve.

use crate::collect::{lookup_path, Dataset};
use crate::error::RebalanceError;
use crate::rebalance::Grouping;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

pub const RESOLVER_RULE_TYPE: &str = "route53resolver:ResolverRule";

/// Principal and zone slot of one share
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SlotName {
    pub principal: u16,
    pub zone: u16,
}

impl SlotName {
    /// Slot pair for two container ids, if both fit in four hex digits
    pub fn new(principal: u64, zone: u64) -> Result<Self, RebalanceError> {
        let principal =
            u16::try_from(principal).map_err(|_| RebalanceError::SlotOverflow(principal))?;
        let zone = u16::try_from(zone).map_err(|_| RebalanceError::SlotOverflow(zone))?;
        Ok(Self { principal, zone })
    }

    pub fn format(&self, prefix: &str) -> String {
        format!("{}-{:04x}{:04x}", prefix, self.principal, self.zone)
    }

    /// Parse `<prefix>-<8 hex digits>`; anything else is not ours
    pub fn parse(prefix: &str, name: &str) -> Option<Self> {
        let slots = name.strip_prefix(prefix)?.strip_prefix('-')?;
        if slots.len() != 8 || !slots.chars().all(|c| c.is_ascii_hexdigit()) {
            return None;
        }
        Some(Self {
            principal: u16::from_str_radix(&slots[..4], 16).ok()?,
            zone: u16::from_str_radix(&slots[4..], 16).ok()?,
        })
    }
}

/// One share to declare
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SharePlan {
    pub principals: Vec<String>,
    pub domains: Vec<String>,
}

fn str_field<'a>(item: &'a Value, path: &str) -> Option<&'a str> {
    lookup_path(item, path).and_then(Value::as_str)
}

/// Our ACTIVE shares in a region, with their slots
fn active_shares<'a>(
    dataset: &'a Dataset,
    region: &str,
    prefix: &str,
) -> Vec<(SlotName, &'a str)> {
    let Some(shares) = dataset.get("resource-shares") else {
        tracing::warn!("resource-shares not collected; no previous shares");
        return Vec::new();
    };

    shares
        .items_in(region)
        .filter(|share| str_field(share, "status") == Some("ACTIVE"))
        .filter_map(|share| {
            let slot = SlotName::parse(prefix, str_field(share, "name")?)?;
            Some((slot, str_field(share, "resourceShareArn")?))
        })
        .collect()
}

fn merge_into(grouping: &mut Grouping, slot: u16, members: Vec<String>) {
    let entry = grouping.entry(u64::from(slot)).or_default();
    entry.extend(members);
    entry.sort();
    entry.dedup();
}

/// Zone slot -> domain names shared today in `region`.
///
/// Joins our shares to their resolver-rule resources and those to COMPLETE
/// resolver rules. Shares with the same zone slot (one per principal slot)
/// are merged.
pub fn previous_grouping(dataset: &Dataset, region: &str, prefix: &str) -> Grouping {
    let domains_by_arn: BTreeMap<&str, &str> = dataset
        .get("resolver-rules")
        .map(|rules| {
            rules
                .items_in(region)
                .filter(|rule| str_field(rule, "Status") == Some("COMPLETE"))
                .filter_map(|rule| Some((str_field(rule, "Arn")?, str_field(rule, "DomainName")?)))
                .collect()
        })
        .unwrap_or_default();

    let resources: Vec<&Value> = dataset
        .get("shared-resources")
        .map(|r| r.items_in(region).collect())
        .unwrap_or_default();

    let mut grouping = Grouping::new();
    for (slot, share_arn) in active_shares(dataset, region, prefix) {
        let domains = resources
            .iter()
            .filter(|r| str_field(r, "type") == Some(RESOLVER_RULE_TYPE))
            .filter(|r| str_field(r, "resourceShareArn") == Some(share_arn))
            .filter_map(|r| domains_by_arn.get(str_field(r, "arn")?))
            .map(|d| d.to_string())
            .collect();
        merge_into(&mut grouping, slot.zone, domains);
    }
    grouping
}

/// Principal slot -> principal ids shared with today in `region`
pub fn previous_principals(dataset: &Dataset, region: &str, prefix: &str) -> Grouping {
    let principals: Vec<&Value> = dataset
        .get("shared-principals")
        .map(|p| p.items_in(region).collect())
        .unwrap_or_default();

    let mut grouping = Grouping::new();
    for (slot, share_arn) in active_shares(dataset, region, prefix) {
        let ids = principals
            .iter()
            .filter(|p| str_field(p, "resourceShareArn") == Some(share_arn))
            .filter_map(|p| str_field(p, "id"))
            .map(str::to_string)
            .collect();
        merge_into(&mut grouping, slot.principal, ids);
    }
    grouping
}

/// Domain names of the region's COMPLETE resolver rules
pub fn complete_rule_domains(dataset: &Dataset, region: &str) -> Vec<String> {
    let Some(rules) = dataset.get("resolver-rules") else {
        return Vec::new();
    };
    rules
        .items_in(region)
        .filter(|rule| str_field(rule, "Status") == Some("COMPLETE"))
        .filter_map(|rule| str_field(rule, "DomainName"))
        .map(str::to_string)
        .collect()
}

/// Normalize domain names: trimmed, lowercase, with a trailing dot
pub fn rule_universe<I, S>(names: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    names
        .into_iter()
        .filter_map(|name| {
            let name = name.as_ref().trim().to_lowercase();
            match name.as_str() {
                "" => None,
                n if n.ends_with('.') => Some(name),
                _ => Some(format!("{}.", name)),
            }
        })
        .collect()
}

/// Every share to declare: one per (principal container, zone container)
pub fn share_plan(
    prefix: &str,
    principals: &Grouping,
    zones: &Grouping,
) -> Result<BTreeMap<String, SharePlan>, RebalanceError> {
    let mut plan = BTreeMap::new();
    for (&principal_slot, principal_ids) in principals {
        for (&zone_slot, domains) in zones {
            let name = SlotName::new(principal_slot, zone_slot)?.format(prefix);
            plan.insert(
                name,
                SharePlan {
                    principals: principal_ids.clone(),
                    domains: domains.clone(),
                },
            );
        }
    }
    Ok(plan)
}
