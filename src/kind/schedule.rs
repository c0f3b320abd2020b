//! Dependency scheduling
//!
//! Global kinds are ordered before regional ones; within each list a kind is
//! inserted right after the last of its dependencies, as early as valid.

use super::KindRegistry;
use crate::error::CollectError;
use std::collections::{BTreeSet, VecDeque};

/// Compute the fetch order for `registry`.
///
/// A kind whose dependencies can never be satisfied (a cycle, an unknown name,
/// or a global kind depending on a regional one) fails with
/// [`CollectError::CyclicDependency`] naming it.
pub fn schedule(registry: &KindRegistry) -> Result<Vec<String>, CollectError> {
    let mut queue: VecDeque<&str> = registry.names().into_iter().collect();
    let mut global: Vec<&str> = Vec::new();
    let mut regional: Vec<&str> = Vec::new();
    // Consecutive requeues without placing anything
    let mut stalled = 0usize;

    while let Some(name) = queue.pop_front() {
        let kind = registry
            .get(name)
            .ok_or_else(|| CollectError::UnknownKind(name.to_string()))?;

        if kind.dependency_names().any(|d| d == name) {
            return Err(CollectError::CyclicDependency {
                kind: name.to_string(),
                unresolved: vec![name.to_string()],
            });
        }
        let mut pending: BTreeSet<&str> = kind.dependency_names().collect();

        // Regional kinds run after every global kind
        if !kind.global {
            for scheduled in &global {
                pending.remove(scheduled);
            }
        }

        let dst = if kind.global { &mut global } else { &mut regional };
        let position = if pending.is_empty() {
            Some(0)
        } else {
            dst.iter()
                .position(|entry| pending.remove(entry) && pending.is_empty())
                .map(|i| i + 1)
        };

        match position {
            Some(at) => {
                dst.insert(at, name);
                stalled = 0;
            }
            None => {
                stalled += 1;
                if stalled > queue.len() {
                    let unresolved = kind
                        .dependency_names()
                        .filter(|d| !global.contains(d) && !regional.contains(d))
                        .map(str::to_string)
                        .collect();
                    return Err(CollectError::CyclicDependency {
                        kind: name.to_string(),
                        unresolved,
                    });
                }
                queue.push_back(name);
            }
        }
    }

    tracing::debug!("Fetch order: global={:?} regional={:?}", global, regional);

    Ok(global
        .into_iter()
        .chain(regional)
        .map(str::to_string)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kind::{default_registry, FanOut, Kind, RegionSource};

    fn registry(kinds: Vec<Kind>) -> KindRegistry {
        KindRegistry::new(kinds, RegionSource::Static(vec!["us-east-1".to_string()])).unwrap()
    }

    fn position(order: &[String], name: &str) -> usize {
        order.iter().position(|n| n == name).unwrap()
    }

    #[test]
    fn test_dependencies_come_first() {
        let reg = registry(vec![
            Kind::regional("rules", "r53r", "list_resolver_rules").depends_on("endpoints"),
            Kind::regional("endpoints", "r53r", "list_resolver_endpoints").depends_on("vpcs"),
            Kind::regional("vpcs", "ec2", "describe_vpcs"),
            Kind::global("zones", "route53", "list_hosted_zones"),
        ]);

        let order = schedule(&reg).unwrap();
        assert_eq!(order, vec!["zones", "vpcs", "endpoints", "rules"]);
    }

    #[test]
    fn test_globals_precede_regionals() {
        let reg = registry(vec![
            Kind::regional("vpcs", "ec2", "describe_vpcs"),
            Kind::global("regions", "ec2", "describe_regions"),
            Kind::regional("subnets", "ec2", "describe_subnets").depends_on("regions"),
            Kind::global("zones", "route53", "list_hosted_zones"),
        ]);

        let order = schedule(&reg).unwrap();
        let last_global = position(&order, "regions").max(position(&order, "zones"));
        let first_regional = position(&order, "vpcs").min(position(&order, "subnets"));
        assert!(last_global < first_regional);
    }

    #[test]
    fn test_default_registry_is_schedulable() {
        let reg = default_registry().unwrap();
        let order = schedule(&reg).unwrap();
        assert_eq!(order.len(), reg.len());

        for kind in reg.kinds() {
            for dep in kind.dependency_names() {
                assert!(
                    position(&order, dep) < position(&order, &kind.name),
                    "{} must come before {}",
                    dep,
                    kind.name
                );
            }
        }
    }

    #[test]
    fn test_two_kind_cycle_is_rejected() {
        let reg = registry(vec![
            Kind::global("a", "svc", "op_a").depends_on("b"),
            Kind::global("b", "svc", "op_b").depends_on("a"),
        ]);

        match schedule(&reg) {
            Err(CollectError::CyclicDependency { kind, .. }) => {
                assert!(kind == "a" || kind == "b");
            }
            other => panic!("expected cycle error, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_dependency_is_rejected() {
        let reg = registry(vec![
            Kind::global("zones", "route53", "list_hosted_zones"),
            Kind::global("links", "route53", "get_hosted_zone")
                .fan_out("missing", FanOut::new("Id", "Id")),
        ]);

        match schedule(&reg) {
            Err(CollectError::CyclicDependency { kind, unresolved }) => {
                assert_eq!(kind, "links");
                assert_eq!(unresolved, vec!["missing".to_string()]);
            }
            other => panic!("expected cycle error, got {:?}", other),
        }
    }

    #[test]
    fn test_global_depending_on_regional_is_rejected() {
        let reg = registry(vec![
            Kind::regional("vpcs", "ec2", "describe_vpcs"),
            Kind::global("zones", "route53", "list_hosted_zones").depends_on("vpcs"),
        ]);
        assert!(matches!(
            schedule(&reg),
            Err(CollectError::CyclicDependency { .. })
        ));
    }

    #[test]
    fn test_self_dependency_is_rejected() {
        let reg = registry(vec![Kind::global("a", "svc", "op").depends_on("a")]);
        assert!(matches!(
            schedule(&reg),
            Err(CollectError::CyclicDependency { .. })
        ));
    }

    #[test]
    fn test_order_is_deterministic() {
        let reg = default_registry().unwrap();
        assert_eq!(schedule(&reg).unwrap(), schedule(&reg).unwrap());
    }
}
