//! The backtracking resolution engine, the provider that feeds it from the
//! package indexes, and the output formatters for its result.

mod output;
mod provider;
mod resolver;

pub use output::{
    format_package_list, format_parent_children, format_pdt_tree, format_tree, PackageWithDeps,
    PdtNode, TreeNode,
};
pub use provider::{ProviderError, PypiInputProvider};
pub use resolver::{
    Candidate, Criterion, DependencyGraph, DependencyProvider, Identifier, RequirementInformation,
    Resolution, ResolutionError, Resolver,
};
