//! Discovery of the nested dependencies of a resolved candidate: prefer the
//! `METADATA` of a compatible wheel, fall back to unpacking the sdist and
//! reading its build manifests, or ask the PyPI JSON API when no simple
//! index is configured.

mod extractor;
mod insecure;

pub use extractor::{DependencyExtractor, ExtractError, ExtractorOptions};
pub use insecure::{evaluate_setup_py, SetupPyEvalError, SpecifierLevel};
