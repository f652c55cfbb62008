//! Resolution engine tests against an in-memory package universe, covering
//! marker-driven platform differences, compatible-release pinning, local
//! version pins, backtracking and the failure modes.

use pep508_rs::VersionOrUrl;
use pypi_inspect::environment::Environment;
use pypi_inspect::resolve::{
    format_package_list, format_parent_children, format_pdt_tree, format_tree, Candidate,
    DependencyProvider, Identifier, RequirementInformation, Resolution, ResolutionError, Resolver,
};
use pypi_inspect::types::{NormalizedPackageName, PypiVersion};
use pypi_inspect::Requirement;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::str::FromStr;
use thiserror::Error;

/// A package universe held in memory: name to released versions, each with
/// its requirement strings (markers included).
struct StubUniverse {
    environment: Environment,
    releases: HashMap<String, Vec<(PypiVersion, Vec<String>)>>,
}

#[derive(Debug, Error)]
enum StubError {
    #[error("No versions found for the requirement '{0}'")]
    NoVersionsFound(String),
}

impl StubUniverse {
    fn new(environment: Environment, packages: &[(&str, &[(&str, &[&str])])]) -> Self {
        let mut releases = HashMap::new();
        for (name, versions) in packages {
            let parsed = versions
                .iter()
                .map(|(version, requirements)| {
                    (
                        version.parse::<PypiVersion>().unwrap(),
                        requirements.iter().map(|r| r.to_string()).collect(),
                    )
                })
                .collect();
            releases.insert((*name).to_owned(), parsed);
        }
        StubUniverse {
            environment,
            releases,
        }
    }

    fn identifier(name: &str, extras: &mut Vec<String>) -> Identifier {
        extras.sort();
        let canonical = name.to_ascii_lowercase().replace(['_', '.'], "-");
        if extras.is_empty() {
            canonical
        } else {
            format!("{}[{}]", canonical, extras.join(","))
        }
    }
}

impl DependencyProvider for StubUniverse {
    type Error = StubError;

    fn identify_requirement(&self, requirement: &Requirement) -> Identifier {
        let mut extras: Vec<String> = requirement.extras.iter().flatten().cloned().collect();
        Self::identifier(&requirement.name, &mut extras)
    }

    fn identify_candidate(&self, candidate: &Candidate) -> Identifier {
        let mut extras: Vec<String> = candidate.extras.iter().cloned().collect();
        Self::identifier(candidate.name.as_str(), &mut extras)
    }

    fn preference(
        &self,
        identifier: &Identifier,
        information: &[RequirementInformation],
    ) -> (bool, Identifier) {
        let transitive = information.iter().all(|info| info.parent.is_some());
        (transitive, identifier.clone())
    }

    fn find_matches(
        &self,
        identifier: &Identifier,
        requirements: &[Requirement],
        incompatibilities: &[Candidate],
    ) -> Result<Vec<Candidate>, Self::Error> {
        let bare_name = identifier.split('[').next().unwrap();
        let Some(releases) = self.releases.get(bare_name) else {
            return Err(StubError::NoVersionsFound(identifier.clone()));
        };
        let name: NormalizedPackageName = bare_name.parse().unwrap();

        let bad: HashSet<&PypiVersion> = incompatibilities
            .iter()
            .map(|candidate| &candidate.version)
            .collect();
        let mut versions: Vec<PypiVersion> = releases
            .iter()
            .map(|(version, _)| version.clone())
            .filter(|version| !bad.contains(version))
            .filter(|version| {
                requirements.iter().all(|requirement| {
                    match &requirement.version_or_url {
                        None => true,
                        Some(VersionOrUrl::Url(_)) => false,
                        Some(VersionOrUrl::VersionSpecifier(specifiers)) => {
                            version.satisfies(specifiers)
                        }
                    }
                })
            })
            .collect();

        if versions.iter().any(|version| !version.is_prerelease()) {
            versions.retain(|version| !version.is_prerelease());
        }

        let extras: BTreeSet<String> = requirements
            .iter()
            .flat_map(|requirement| requirement.extras.iter().flatten().cloned())
            .collect();

        versions.sort_by(|a, b| b.cmp(a));
        Ok(versions
            .into_iter()
            .map(|version| Candidate {
                name: name.clone(),
                version,
                extras: extras.clone(),
            })
            .collect())
    }

    fn is_satisfied_by(&self, requirement: &Requirement, candidate: &Candidate) -> bool {
        match &requirement.version_or_url {
            None => true,
            Some(VersionOrUrl::Url(_)) => false,
            Some(VersionOrUrl::VersionSpecifier(specifiers)) => {
                candidate.version.satisfies(specifiers)
            }
        }
    }

    fn get_dependencies(&self, candidate: &Candidate) -> Result<Vec<Requirement>, Self::Error> {
        let releases = self
            .releases
            .get(candidate.name.as_str())
            .ok_or_else(|| StubError::NoVersionsFound(candidate.name.to_string()))?;
        let requirements = releases
            .iter()
            .find(|(version, _)| version == &candidate.version)
            .map(|(_, requirements)| requirements.clone())
            .unwrap_or_default();

        let mut dependencies = Vec::new();
        if !candidate.extras.is_empty() {
            dependencies.push(
                Requirement::from_str(&format!("{}=={}", candidate.name, candidate.version))
                    .unwrap(),
            );
        }

        let extras: Vec<&str> = candidate.extras.iter().map(String::as_str).collect();
        for requirement in requirements {
            let requirement = Requirement::from_str(&requirement).unwrap();
            let applies = match &requirement.marker {
                None => true,
                Some(marker) => marker.evaluate(self.environment.markers(), &extras),
            };
            if applies {
                dependencies.push(requirement);
            }
        }
        Ok(dependencies)
    }
}

/// The flask 2.1.2 corner of PyPI, as published in mid 2022.
const FLASK_UNIVERSE: &[(&str, &[(&str, &[&str])])] = &[
    (
        "flask",
        &[(
            "2.1.2",
            &[
                "Werkzeug >=2.0",
                "Jinja2 >=3.0",
                "itsdangerous >=2.0",
                "click >=8.0",
            ],
        )],
    ),
    (
        "click",
        &[("8.1.3", &["colorama ; platform_system == \"Windows\""])],
    ),
    ("colorama", &[("0.4.5", &[])]),
    ("itsdangerous", &[("2.1.2", &[])]),
    ("jinja2", &[("3.1.2", &["MarkupSafe >=2.0"])]),
    ("markupsafe", &[("2.1.1", &[])]),
    ("werkzeug", &[("2.1.2", &[])]),
];

fn resolve_universe(
    environment: Environment,
    packages: &[(&str, &[(&str, &[&str])])],
    requirements: &[&str],
    max_rounds: usize,
) -> Result<Resolution, ResolutionError<StubError>> {
    let universe = StubUniverse::new(environment, packages);
    let requirements = requirements
        .iter()
        .map(|requirement| Requirement::from_str(requirement).unwrap())
        .collect();
    Resolver::new(&universe).resolve(requirements, max_rounds)
}

fn linux() -> Environment {
    Environment::from_python_version_and_os("310", "linux").unwrap()
}

fn windows() -> Environment {
    Environment::from_python_version_and_os("310", "windows").unwrap()
}

#[test]
fn test_flask_on_linux() {
    let resolution =
        resolve_universe(linux(), FLASK_UNIVERSE, &["flask==2.1.2"], 200_000).unwrap();
    assert_eq!(
        format_package_list(&resolution),
        vec![
            "pkg:pypi/click@8.1.3",
            "pkg:pypi/flask@2.1.2",
            "pkg:pypi/itsdangerous@2.1.2",
            "pkg:pypi/jinja2@3.1.2",
            "pkg:pypi/markupsafe@2.1.1",
            "pkg:pypi/werkzeug@2.1.2",
        ]
    );
}

#[test]
fn test_flask_on_windows_adds_colorama() {
    let linux_purls = format_package_list(
        &resolve_universe(linux(), FLASK_UNIVERSE, &["flask==2.1.2"], 200_000).unwrap(),
    );
    let windows_purls = format_package_list(
        &resolve_universe(windows(), FLASK_UNIVERSE, &["flask==2.1.2"], 200_000).unwrap(),
    );

    // the delta between the two platforms is exactly click's colorama marker
    let linux_set: HashSet<_> = linux_purls.iter().collect();
    let delta: Vec<_> = windows_purls
        .iter()
        .filter(|purl| !linux_set.contains(purl))
        .collect();
    assert_eq!(delta, vec!["pkg:pypi/colorama@0.4.5"]);
}

#[test]
fn test_flask_graph_shape() {
    let resolution =
        resolve_universe(linux(), FLASK_UNIVERSE, &["flask==2.1.2"], 200_000).unwrap();

    // every pinned identifier is a graph vertex
    let vertices: HashSet<_> = resolution.graph.vertices().collect();
    for identifier in resolution.mapping.keys() {
        assert!(vertices.contains(identifier), "missing vertex {identifier}");
    }

    // the root's children are exactly the direct inputs
    let roots: Vec<_> = resolution.graph.children(None).collect();
    assert_eq!(roots, vec!["flask"]);

    let parent_children = format_parent_children(&resolution);
    let flask = parent_children
        .iter()
        .find(|package| package.package == "pkg:pypi/flask@2.1.2")
        .unwrap();
    assert_eq!(
        flask.dependencies,
        vec![
            "pkg:pypi/click@8.1.3",
            "pkg:pypi/itsdangerous@2.1.2",
            "pkg:pypi/jinja2@3.1.2",
            "pkg:pypi/werkzeug@2.1.2",
        ]
    );
}

#[test]
fn test_pdt_tree_is_rooted_at_flask() {
    let resolution =
        resolve_universe(linux(), FLASK_UNIVERSE, &["flask==2.1.2"], 200_000).unwrap();
    let tree = format_pdt_tree(&resolution);

    assert_eq!(tree.len(), 1);
    assert_eq!(tree[0].key, "flask");
    assert_eq!(tree[0].package_name, "flask");
    assert_eq!(tree[0].installed_version, "2.1.2");

    let children: Vec<_> = tree[0]
        .dependencies
        .iter()
        .map(|node| node.key.as_str())
        .collect();
    assert_eq!(children, vec!["click", "itsdangerous", "jinja2", "werkzeug"]);

    // jinja2 carries its own subtree
    let jinja2 = &tree[0].dependencies[2];
    assert_eq!(jinja2.dependencies.len(), 1);
    assert_eq!(jinja2.dependencies[0].key, "markupsafe");
}

#[test]
fn test_nested_tree_mirrors_the_graph() {
    let resolution =
        resolve_universe(linux(), FLASK_UNIVERSE, &["flask==2.1.2"], 200_000).unwrap();
    let tree = format_tree(&resolution);

    assert_eq!(tree.len(), 1);
    assert_eq!(tree[0].package, "pkg:pypi/flask@2.1.2");
    let children: Vec<_> = tree[0]
        .dependencies
        .iter()
        .map(|node| node.package.as_str())
        .collect();
    assert_eq!(
        children,
        vec![
            "pkg:pypi/click@8.1.3",
            "pkg:pypi/itsdangerous@2.1.2",
            "pkg:pypi/jinja2@3.1.2",
            "pkg:pypi/werkzeug@2.1.2",
        ]
    );
}

#[test]
fn test_old_python_pulls_in_compat_backfills() {
    let universe: &[(&str, &[(&str, &[&str])])] = &[
        (
            "flask",
            &[(
                "2.0.1",
                &[
                    "click >=7.1.2",
                    "itsdangerous >=2.0",
                ],
            )],
        ),
        (
            "click",
            &[(
                "8.0.4",
                &["importlib-metadata ; python_version < \"3.8\""],
            )],
        ),
        (
            "importlib-metadata",
            &[("4.8.3", &["zipp >=0.5", "typing-extensions >=3.6.4 ; python_version < \"3.8\""])],
        ),
        ("zipp", &[("3.6.0", &[])]),
        ("typing-extensions", &[("4.1.1", &[])]),
        ("itsdangerous", &[("2.0.1", &[])]),
    ];

    let py36 = Environment::from_python_version_and_os("36", "linux").unwrap();
    let purls = format_package_list(&resolve_universe(py36, universe, &["flask"], 200_000).unwrap());
    assert!(purls.contains(&"pkg:pypi/importlib-metadata@4.8.3".to_owned()));
    assert!(purls.contains(&"pkg:pypi/zipp@3.6.0".to_owned()));
    assert!(purls.contains(&"pkg:pypi/typing-extensions@4.1.1".to_owned()));

    // a modern interpreter does not need the backfills
    let purls =
        format_package_list(&resolve_universe(linux(), universe, &["flask"], 200_000).unwrap());
    assert!(!purls.iter().any(|purl| purl.contains("importlib-metadata")));
}

#[test]
fn test_compatible_release_picks_highest_matching() {
    let universe: &[(&str, &[(&str, &[&str])])] = &[(
        "zipp",
        &[
            ("3.7.0", &[]),
            ("3.8.0", &[]),
            ("3.8.1", &[]),
            ("3.9.0", &[]),
        ],
    )];
    let resolution = resolve_universe(linux(), universe, &["zipp~=3.8.0"], 200_000).unwrap();
    assert_eq!(format_package_list(&resolution), vec!["pkg:pypi/zipp@3.8.1"]);
}

#[test]
fn test_local_version_pin_resolves() {
    let universe: &[(&str, &[(&str, &[&str])])] = &[
        (
            "torch",
            &[
                ("2.0.0", &[]),
                (
                    "2.0.0+cpu",
                    &[
                        "filelock",
                        "typing-extensions",
                        "sympy",
                        "networkx",
                        "jinja2",
                    ],
                ),
            ],
        ),
        ("filelock", &[("3.12.0", &[])]),
        ("typing-extensions", &[("4.5.0", &[])]),
        ("sympy", &[("1.11.1", &["mpmath >=0.19"])]),
        ("mpmath", &[("1.3.0", &[])]),
        ("networkx", &[("3.1", &[])]),
        ("jinja2", &[("3.1.2", &["MarkupSafe >=2.0"])]),
        ("markupsafe", &[("2.1.1", &[])]),
    ];
    let resolution =
        resolve_universe(linux(), universe, &["torch==2.0.0+cpu"], 200_000).unwrap();
    assert_eq!(
        format_package_list(&resolution),
        vec![
            "pkg:pypi/filelock@3.12.0",
            "pkg:pypi/jinja2@3.1.2",
            "pkg:pypi/markupsafe@2.1.1",
            "pkg:pypi/mpmath@1.3.0",
            "pkg:pypi/networkx@3.1",
            "pkg:pypi/sympy@1.11.1",
            "pkg:pypi/torch@2.0.0+cpu",
            "pkg:pypi/typing-extensions@4.5.0",
        ]
    );
}

#[test]
fn test_backtracking_unpins_a_conflicting_choice() {
    let universe: &[(&str, &[(&str, &[&str])])] = &[
        (
            "a",
            &[("1.0", &["b >=1.0"]), ("2.0", &["b ==1.0"])],
        ),
        ("b", &[("1.0", &[]), ("2.0", &[])]),
    ];

    // a==2.0 would be preferred but conflicts with the direct b>=2.0
    let resolution = resolve_universe(linux(), universe, &["a", "b>=2.0"], 200_000).unwrap();
    assert_eq!(
        format_package_list(&resolution),
        vec!["pkg:pypi/a@1.0", "pkg:pypi/b@2.0"]
    );
}

#[test]
fn test_prereleases_are_suppressed_unless_requested() {
    let universe: &[(&str, &[(&str, &[&str])])] =
        &[("frob", &[("1.0", &[]), ("2.0b1", &[])])];

    let resolution = resolve_universe(linux(), universe, &["frob"], 200_000).unwrap();
    assert_eq!(format_package_list(&resolution), vec!["pkg:pypi/frob@1.0"]);

    let resolution = resolve_universe(linux(), universe, &["frob==2.0b1"], 200_000).unwrap();
    assert_eq!(format_package_list(&resolution), vec!["pkg:pypi/frob@2.0b1"]);
}

#[test]
fn test_extras_pull_in_optional_dependencies() {
    let universe: &[(&str, &[(&str, &[&str])])] = &[
        (
            "frob",
            &[("1.0", &["click ; extra == 'cli'", "jinja2"])],
        ),
        ("click", &[("8.1.3", &[])]),
        ("jinja2", &[("3.1.2", &[])]),
    ];

    let resolution = resolve_universe(linux(), universe, &["frob[cli]"], 200_000).unwrap();
    let purls = format_package_list(&resolution);
    assert!(purls.contains(&"pkg:pypi/click@8.1.3".to_owned()));

    // the extra candidate and the base package pin the same version
    assert!(resolution.mapping.contains_key("frob[cli]"));
    assert!(resolution.mapping.contains_key("frob"));
    assert_eq!(
        resolution.mapping["frob[cli]"].version,
        resolution.mapping["frob"].version
    );

    // without the extra, click stays out
    let resolution = resolve_universe(linux(), universe, &["frob"], 200_000).unwrap();
    assert!(!format_package_list(&resolution)
        .contains(&"pkg:pypi/click@8.1.3".to_owned()));
}

#[test]
fn test_conflicting_pins_are_impossible() {
    let universe: &[(&str, &[(&str, &[&str])])] =
        &[("frob", &[("1.0", &[]), ("2.0", &[])])];

    let result = resolve_universe(linux(), universe, &["frob==1.0", "frob==2.0"], 200_000);
    assert!(matches!(
        result,
        Err(ResolutionError::ResolutionImpossible { .. })
    ));
}

#[test]
fn test_unknown_package_raises_no_versions_found() {
    let result = resolve_universe(linux(), FLASK_UNIVERSE, &["no-such-package"], 200_000);
    assert!(matches!(
        result,
        Err(ResolutionError::Provider(StubError::NoVersionsFound(_)))
    ));
}

#[test]
fn test_round_budget_is_enforced() {
    let result = resolve_universe(linux(), FLASK_UNIVERSE, &["flask==2.1.2"], 1);
    assert!(matches!(
        result,
        Err(ResolutionError::ResolutionTooDeep { max_rounds: 1 })
    ));
}

#[test]
fn test_resolution_is_deterministic() {
    let first = resolve_universe(linux(), FLASK_UNIVERSE, &["flask==2.1.2"], 200_000).unwrap();
    let second = resolve_universe(linux(), FLASK_UNIVERSE, &["flask==2.1.2"], 200_000).unwrap();

    let first_keys: Vec<_> = first.mapping.keys().collect();
    let second_keys: Vec<_> = second.mapping.keys().collect();
    assert_eq!(first_keys, second_keys);
    assert_eq!(
        format_parent_children(&first),
        format_parent_children(&second)
    );
}

#[test]
fn test_pinned_candidates_satisfy_their_requirements() {
    let resolution =
        resolve_universe(linux(), FLASK_UNIVERSE, &["flask==2.1.2"], 200_000).unwrap();
    for (identifier, criterion) in &resolution.criteria {
        let Some(candidate) = resolution.mapping.get(identifier) else {
            continue;
        };
        for requirement in criterion.requirements() {
            let ok = match &requirement.version_or_url {
                None => true,
                Some(VersionOrUrl::Url(_)) => false,
                Some(VersionOrUrl::VersionSpecifier(specifiers)) => {
                    candidate.version.satisfies(specifiers)
                }
            };
            assert!(ok, "{identifier} pin violates {requirement}");
        }
    }
}
