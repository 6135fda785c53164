use std::collections::{BTreeMap, HashSet};

use crate::resources::workspacekinds::{ImageConfigValue, PodConfigValue};
use crate::resources::workspaces::RedirectStep;

/// An entry of a kind's option list that may redirect to another entry
pub trait OptionValue {
    fn id(&self) -> &str;
    fn redirect_to(&self) -> Option<&str>;
}

impl OptionValue for ImageConfigValue {
    fn id(&self) -> &str {
        &self.id
    }

    fn redirect_to(&self) -> Option<&str> {
        self.redirect.as_ref().map(|r| r.to.as_str())
    }
}

impl OptionValue for PodConfigValue {
    fn id(&self) -> &str {
        &self.id
    }

    fn redirect_to(&self) -> Option<&str> {
        self.redirect.as_ref().map(|r| r.to.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RedirectError {
    #[error("cycle detected: {}", .path.join(" -> "))]
    CycleDetected { path: Vec<String> },

    #[error("invalid redirect target {target:?} in {source_id:?}")]
    DanglingRedirect { source_id: String, target: String },

    #[error("option {0:?} not found")]
    UnknownOption(String),

    #[error("default {0:?} not found")]
    DefaultMissing(String),
}

/// The terminal value of a walk and the hops taken to reach it
#[derive(Debug)]
pub struct Resolution<'a, V> {
    pub value: &'a V,
    pub chain: Vec<RedirectStep>,
}

impl<V: OptionValue> Resolution<'_, V> {
    pub fn id(&self) -> &str {
        self.value.id()
    }
}

/// Follow redirects from `start` until a value without a redirect is reached.
pub fn resolve<'a, V: OptionValue>(
    values: &'a [V],
    start: &str,
) -> Result<Resolution<'a, V>, RedirectError> {
    let by_id: BTreeMap<&str, &V> = values.iter().map(|v| (v.id(), v)).collect();

    let mut current = *by_id
        .get(start)
        .ok_or_else(|| RedirectError::UnknownOption(start.to_owned()))?;
    let mut visited = HashSet::from([current.id()]);
    let mut path = vec![current.id()];
    let mut chain = Vec::new();

    loop {
        let target = match current.redirect_to() {
            Some(target) if !target.is_empty() => target,
            _ => {
                return Ok(Resolution {
                    value: current,
                    chain,
                })
            }
        };

        let next = *by_id
            .get(target)
            .ok_or_else(|| RedirectError::DanglingRedirect {
                source_id: current.id().to_owned(),
                target: target.to_owned(),
            })?;

        chain.push(RedirectStep {
            source: current.id().to_owned(),
            target: target.to_owned(),
        });
        path.push(target);

        if !visited.insert(target) {
            return Err(RedirectError::CycleDetected {
                path: path.into_iter().map(str::to_owned).collect(),
            });
        }

        current = next;
    }
}

/// Resolve the declared default. A default that is not among the values is `DefaultMissing`, a default
/// whose chain is broken reports why.
pub fn resolve_default<'a, V: OptionValue>(
    values: &'a [V],
    default: &str,
) -> Result<Resolution<'a, V>, RedirectError> {
    match resolve(values, default) {
        Err(RedirectError::UnknownOption(id)) => Err(RedirectError::DefaultMissing(id)),
        other => other,
    }
}

/// Check every value of a graph. Each broken value is reported once, keyed by its id.
pub fn validate_graph<V: OptionValue>(values: &[V]) -> Vec<(String, RedirectError)> {
    let mut errors = Vec::new();
    let mut reported_cycles: HashSet<Vec<String>> = HashSet::new();

    for value in values {
        // only values that redirect can be at fault
        if value.redirect_to().is_none_or(str::is_empty) {
            continue;
        }

        match resolve(values, value.id()) {
            Ok(_) => {}
            Err(RedirectError::CycleDetected { path }) => {
                // values leading into a cycle walk into it too; report it once, under its smallest member
                let members = cycle_members(&path);
                let Some(owner) = members.first().cloned() else {
                    continue;
                };
                if reported_cycles.insert(members) {
                    errors.push((owner, RedirectError::CycleDetected { path }));
                }
            }
            Err(RedirectError::DanglingRedirect { source_id, target }) => {
                if source_id == value.id() {
                    errors.push((
                        value.id().to_owned(),
                        RedirectError::DanglingRedirect { source_id, target },
                    ));
                }
            }
            Err(err) => errors.push((value.id().to_owned(), err)),
        }
    }

    errors
}

// The repeated id closes the cycle; everything from its first occurrence is the cycle itself.
fn cycle_members(path: &[String]) -> Vec<String> {
    let Some(last) = path.last() else {
        return Vec::new();
    };
    let first = path.iter().position(|p| p == last).unwrap_or(0);
    let mut members = path[first..path.len() - 1].to_vec();
    members.sort();
    members
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::workspacekinds::OptionRedirect;

    fn value(id: &str, to: Option<&str>) -> ImageConfigValue {
        ImageConfigValue {
            id: id.into(),
            redirect: to.map(|to| OptionRedirect {
                to: to.into(),
                message: None,
            }),
            ..Default::default()
        }
    }

    fn step(source: &str, target: &str) -> RedirectStep {
        RedirectStep {
            source: source.into(),
            target: target.into(),
        }
    }

    #[test]
    fn test_resolve_chain() {
        let values = vec![
            value("a", Some("b")),
            value("b", Some("c")),
            value("c", None),
        ];
        let resolution = resolve(&values, "a").unwrap();

        assert_eq!(resolution.id(), "c");
        assert_eq!(resolution.chain, vec![step("a", "b"), step("b", "c")]);
    }

    #[test]
    fn test_resolve_terminal_has_empty_chain() {
        let values = vec![value("a", Some("b")), value("b", Some(""))];

        let resolution = resolve(&values, "b").unwrap();
        assert_eq!(resolution.id(), "b");
        assert!(resolution.chain.is_empty());

        // empty target is terminal
        let resolution = resolve(&values, "a").unwrap();
        assert_eq!(resolution.id(), "b");
        assert_eq!(resolution.chain.len(), 1);
    }

    #[test]
    fn test_chain_length_matches_hops() {
        for n in 1..8 {
            let values: Vec<_> = (0..n)
                .map(|i| {
                    let next = format!("v{}", i + 1);
                    value(&format!("v{i}"), (i + 1 < n).then_some(next.as_str()))
                })
                .collect();
            let resolution = resolve_default(&values, "v0").unwrap();
            assert_eq!(resolution.chain.len(), n - 1);
            assert_eq!(resolution.id(), format!("v{}", n - 1));
        }
    }

    #[test]
    fn test_cycle_detected() {
        let values = vec![
            value("a", Some("b")),
            value("b", Some("c")),
            value("c", Some("a")),
        ];

        match resolve_default(&values, "a").unwrap_err() {
            RedirectError::CycleDetected { path } => {
                assert_eq!(path, vec!["a", "b", "c", "a"]);
            }
            err => panic!("unexpected error {err:?}"),
        }
    }

    #[test]
    fn test_self_redirect_is_a_cycle() {
        let values = vec![value("a", Some("a"))];
        assert!(matches!(
            resolve(&values, "a").unwrap_err(),
            RedirectError::CycleDetected { .. }
        ));
    }

    #[test]
    fn test_cycle_reachable_from_default() {
        let values = vec![
            value("default", Some("x")),
            value("x", Some("y")),
            value("y", Some("x")),
        ];
        assert!(matches!(
            resolve_default(&values, "default").unwrap_err(),
            RedirectError::CycleDetected { .. }
        ));
    }

    #[test]
    fn test_dangling_redirect() {
        let values = vec![value("a", Some("b")), value("b", Some("gone"))];
        assert_eq!(
            resolve(&values, "a").unwrap_err(),
            RedirectError::DanglingRedirect {
                source_id: "b".into(),
                target: "gone".into()
            }
        );
    }

    #[test]
    fn test_default_missing() {
        let values = vec![value("a", None)];
        assert_eq!(
            resolve_default(&values, "b").unwrap_err(),
            RedirectError::DefaultMissing("b".into())
        );
        assert_eq!(
            resolve(&values, "b").unwrap_err(),
            RedirectError::UnknownOption("b".into())
        );
    }

    #[test]
    fn test_validate_graph_reports_each_fault_once() {
        let values = vec![
            value("a", Some("b")),
            value("b", Some("a")),
            value("c", Some("a")),
            value("d", Some("missing")),
            value("e", Some("d")),
            value("f", None),
        ];

        let errors = validate_graph(&values);
        assert_eq!(errors.len(), 2, "{errors:?}");
        assert!(matches!(
            errors[0],
            (ref id, RedirectError::CycleDetected { .. }) if id == "a"
        ));
        assert!(matches!(
            errors[1],
            (ref id, RedirectError::DanglingRedirect { ref target, .. }) if id == "d" && target == "missing"
        ));
    }

    #[test]
    fn test_cycle_is_reported_under_a_member() {
        let values = vec![
            value("c", Some("a")),
            value("b", Some("a")),
            value("a", Some("b")),
        ];

        let errors = validate_graph(&values);
        assert_eq!(errors.len(), 1, "{errors:?}");
        assert_eq!(errors[0].0, "a");
        assert_eq!(
            errors[0].1,
            RedirectError::CycleDetected {
                path: vec!["c".into(), "a".into(), "b".into(), "a".into()]
            }
        );
    }

    #[test]
    fn test_validate_graph_accepts_acyclic() {
        let values = vec![
            value("a", Some("c")),
            value("b", Some("c")),
            value("c", None),
        ];
        assert!(validate_graph(&values).is_empty());
    }
}
