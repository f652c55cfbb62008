//! Turning a [`Resolution`] into the serializable output shapes: a flat
//! parent/children list, a nested dependency tree, and the pipdeptree-style
//! tree. All of them are pure functions of the mapping and graph, with every
//! list sorted so output is stable across runs.

use super::resolver::{Identifier, Resolution};
use serde::Serialize;

/// One pinned package and the purls of its direct dependencies.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PackageWithDeps {
    /// The `pkg:pypi` purl of the package.
    pub package: String,

    /// The purls of its direct dependencies, sorted.
    pub dependencies: Vec<String>,
}

/// A node of the nested dependency tree.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct TreeNode {
    /// The `pkg:pypi` purl of the package.
    pub package: String,

    /// The resolved subtrees of its dependencies, sorted by purl.
    pub dependencies: Vec<TreeNode>,
}

/// A node of the pipdeptree-style tree.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PdtNode {
    /// The identifier used during resolution.
    pub key: String,

    /// The package name.
    pub package_name: String,

    /// The pinned version.
    pub installed_version: String,

    /// The resolved subtrees of its dependencies, sorted by key.
    pub dependencies: Vec<PdtNode>,
}

/// The sorted purls of every pinned candidate.
pub fn format_package_list(resolution: &Resolution) -> Vec<String> {
    let mut purls: Vec<String> = resolution
        .mapping
        .values()
        .map(|candidate| candidate.purl())
        .collect();
    purls.sort();
    purls.dedup();
    purls
}

/// The flat `parent -> children` representation, sorted by package purl.
pub fn format_parent_children(resolution: &Resolution) -> Vec<PackageWithDeps> {
    let mut packages: Vec<PackageWithDeps> = resolution
        .mapping
        .iter()
        .map(|(identifier, candidate)| {
            let mut dependencies: Vec<String> = resolution
                .graph
                .children(Some(identifier))
                .filter_map(|child| resolution.mapping.get(child))
                .map(|child| child.purl())
                .collect();
            dependencies.sort();
            dependencies.dedup();
            PackageWithDeps {
                package: candidate.purl(),
                dependencies,
            }
        })
        .collect();
    packages.sort_by(|a, b| a.package.cmp(&b.package));
    packages
}

/// The identifiers whose only parent is the synthetic root.
fn graph_sources(resolution: &Resolution) -> Vec<&Identifier> {
    resolution
        .mapping
        .keys()
        .filter(|identifier| {
            resolution
                .graph
                .parents(identifier)
                .all(|parent| parent.is_none())
        })
        .collect()
}

/// The nested dependency tree, one subtree per direct input. Dependency
/// cycles are cut at the repeated identifier, which then appears as a leaf.
pub fn format_tree(resolution: &Resolution) -> Vec<TreeNode> {
    fn subtree(
        resolution: &Resolution,
        identifier: &Identifier,
        path: &mut Vec<Identifier>,
    ) -> TreeNode {
        let package = resolution.mapping[identifier].purl();
        if path.contains(identifier) {
            return TreeNode {
                package,
                dependencies: Vec::new(),
            };
        }

        path.push(identifier.clone());
        let mut dependencies: Vec<TreeNode> = resolution
            .graph
            .children(Some(identifier))
            .filter(|child| resolution.mapping.contains_key(*child))
            .map(|child| subtree(resolution, child, path))
            .collect();
        path.pop();

        dependencies.sort_by(|a, b| a.package.cmp(&b.package));
        TreeNode {
            package,
            dependencies,
        }
    }

    let mut nodes: Vec<TreeNode> = graph_sources(resolution)
        .into_iter()
        .map(|source| subtree(resolution, source, &mut Vec::new()))
        .collect();
    nodes.sort_by(|a, b| a.package.cmp(&b.package));
    nodes
}

/// The pipdeptree-style tree, one subtree per direct input. Dependency
/// cycles are cut at the repeated identifier.
pub fn format_pdt_tree(resolution: &Resolution) -> Vec<PdtNode> {
    fn subtree(
        resolution: &Resolution,
        identifier: &Identifier,
        path: &mut Vec<Identifier>,
    ) -> PdtNode {
        let candidate = &resolution.mapping[identifier];
        let mut node = PdtNode {
            key: identifier.clone(),
            package_name: candidate.name.to_string(),
            installed_version: candidate.version.to_string(),
            dependencies: Vec::new(),
        };
        if path.contains(identifier) {
            return node;
        }

        path.push(identifier.clone());
        node.dependencies = resolution
            .graph
            .children(Some(identifier))
            .filter(|child| resolution.mapping.contains_key(*child))
            .map(|child| subtree(resolution, child, path))
            .collect();
        path.pop();

        node.dependencies.sort_by(|a, b| a.key.cmp(&b.key));
        node
    }

    let mut nodes: Vec<PdtNode> = graph_sources(resolution)
        .into_iter()
        .map(|source| subtree(resolution, source, &mut Vec::new()))
        .collect();
    nodes.sort_by(|a, b| a.key.cmp(&b.key));
    nodes
}
