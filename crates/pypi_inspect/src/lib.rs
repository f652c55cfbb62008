//! Resolve the transitive dependency closure of Python package requirements
//! against a target interpreter and operating system, without installing
//! anything.
//!
//! Given requirement specifiers, pip requirements files or a `setup.py`,
//! this library queries PEP 503 "simple" indexes (or the PyPI JSON API),
//! inspects wheels and sdists for their nested dependencies, and runs a
//! backtracking resolver until a consistent set of pins is found. The result
//! is a deterministic dependency graph over `pkg:pypi` package urls together
//! with per-package distribution metadata.

#![deny(missing_docs)]

pub mod types;

pub mod artifacts;
pub mod dependencies;
pub mod environment;
pub mod index;
pub mod manifests;
pub mod resolve;

mod api;
mod config;
mod package_data;
mod utils;

pub use api::{
    resolve_dependencies, FileData, FilePackageData, ResolutionGraph, ResolveError, ResolveInputs,
    ResolveOptions, ResolvedDependencies, DEFAULT_MAX_ROUNDS,
};
pub use config::Config;
pub use package_data::{PackageData, Party};
pub use utils::normalize_index_url;

pub use pep440_rs::{Version, VersionSpecifier, VersionSpecifiers};
pub use pep508_rs::{MarkerEnvironment, Requirement};
