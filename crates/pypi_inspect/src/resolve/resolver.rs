//! A conflict-driven backtracking resolver over an abstract dependency
//! provider.
//!
//! The engine keeps a stack of states, one per pinned candidate. Each state
//! holds the partial solution (`mapping`) and, per package identifier, a
//! [`Criterion`]: the candidates still in play, the requirements that were
//! collected for it (with the candidate that introduced each one), and the
//! candidates proven unusable. When a pin turns out to be unsatisfiable the
//! engine pops states, records the offending candidate as incompatible in the
//! state below, and tries again until either every identifier is pinned or
//! no state is left to rewind to.

use crate::types::{NormalizedPackageName, PypiVersion, Requirement};
use indexmap::{IndexMap, IndexSet};
use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};

/// The string under which the resolver tracks a package: the canonicalized
/// name, plus a sorted `[extra,...]` suffix when extras are requested.
pub type Identifier = String;

/// A concrete `(name, version, extras)` proposed by the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    /// The canonicalized package name.
    pub name: NormalizedPackageName,

    /// The pinned version.
    pub version: PypiVersion,

    /// The extras requested for this package.
    pub extras: BTreeSet<String>,
}

impl Candidate {
    /// The `pkg:pypi` package url of this candidate.
    pub fn purl(&self) -> String {
        format!("pkg:pypi/{}@{}", self.name, self.version)
    }
}

impl Display for Candidate {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.extras.is_empty() {
            write!(f, "{}=={}", self.name, self.version)
        } else {
            write!(
                f,
                "{}[{}]=={}",
                self.name,
                self.extras.iter().cloned().collect::<Vec<_>>().join(","),
                self.version
            )
        }
    }
}

/// A requirement together with the candidate identifier that introduced it,
/// or `None` for a direct user input.
#[derive(Debug, Clone)]
pub struct RequirementInformation {
    /// The requirement itself.
    pub requirement: Requirement,

    /// The identifier of the candidate that depends on it.
    pub parent: Option<Identifier>,
}

/// Everything known about one identifier during resolution.
#[derive(Debug, Clone, Default)]
pub struct Criterion {
    /// Candidates that may satisfy the collected requirements, in the
    /// provider's preferred order.
    pub candidates: Vec<Candidate>,

    /// The requirements collected for this identifier so far.
    pub information: Vec<RequirementInformation>,

    /// Candidates that have been ruled out.
    pub incompatibilities: Vec<Candidate>,
}

impl Criterion {
    /// The requirements collected for this identifier.
    pub fn requirements(&self) -> impl Iterator<Item = &Requirement> {
        self.information.iter().map(|info| &info.requirement)
    }

    /// The parents that introduced those requirements; `None` is the root.
    pub fn parents(&self) -> impl Iterator<Item = Option<&Identifier>> {
        self.information.iter().map(|info| info.parent.as_ref())
    }
}

/// The interface between the resolution engine and the package universe.
pub trait DependencyProvider {
    /// The error the provider operations can fail with. Provider failures
    /// abort the resolution; recoverable conditions are expressed by
    /// returning empty match lists instead.
    type Error: std::error::Error + Send + Sync + 'static;

    /// The identifier a requirement targets.
    fn identify_requirement(&self, requirement: &Requirement) -> Identifier;

    /// The identifier a candidate provides.
    fn identify_candidate(&self, candidate: &Candidate) -> Identifier;

    /// The key by which the next unpinned identifier is chosen; the engine
    /// picks the minimum. `information` holds the requirements collected for
    /// the identifier so far.
    fn preference(
        &self,
        identifier: &Identifier,
        information: &[RequirementInformation],
    ) -> (bool, Identifier);

    /// All candidates matching every requirement and none of the
    /// incompatibilities, best first.
    fn find_matches(
        &self,
        identifier: &Identifier,
        requirements: &[Requirement],
        incompatibilities: &[Candidate],
    ) -> Result<Vec<Candidate>, Self::Error>;

    /// Whether a candidate satisfies a requirement.
    fn is_satisfied_by(&self, requirement: &Requirement, candidate: &Candidate) -> bool;

    /// The dependencies of a candidate, already filtered for applicability.
    fn get_dependencies(&self, candidate: &Candidate) -> Result<Vec<Requirement>, Self::Error>;
}

/// A directed graph over identifiers with a synthetic root vertex whose
/// children are the direct user inputs.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    children: IndexMap<Option<Identifier>, IndexSet<Identifier>>,
    parents: IndexMap<Identifier, IndexSet<Option<Identifier>>>,
}

impl DependencyGraph {
    fn connect(&mut self, parent: Option<Identifier>, child: Identifier) {
        self.parents
            .entry(child.clone())
            .or_default()
            .insert(parent.clone());
        self.children.entry(parent).or_default().insert(child);
    }

    fn add_vertex(&mut self, identifier: Identifier) {
        self.parents.entry(identifier).or_default();
    }

    /// The children of a vertex; `None` is the root.
    pub fn children(&self, parent: Option<&str>) -> impl Iterator<Item = &Identifier> {
        self.children
            .get(&parent.map(ToOwned::to_owned))
            .into_iter()
            .flatten()
    }

    /// The parents of a vertex; a `None` entry means the vertex is a direct
    /// input.
    pub fn parents(&self, child: &str) -> impl Iterator<Item = Option<&Identifier>> {
        self.parents
            .get(child)
            .into_iter()
            .flatten()
            .map(Option::as_ref)
    }

    /// All non-root vertices.
    pub fn vertices(&self) -> impl Iterator<Item = &Identifier> {
        self.parents.keys()
    }
}

/// The outcome of a successful resolution.
#[derive(Debug, Clone)]
pub struct Resolution {
    /// The pinned candidate per identifier.
    pub mapping: IndexMap<Identifier, Candidate>,

    /// Which identifier depends on which.
    pub graph: DependencyGraph,

    /// The final criteria, useful for explaining the solution.
    pub criteria: IndexMap<Identifier, Criterion>,
}

/// Why a resolution did not produce a solution.
#[derive(Debug)]
pub enum ResolutionError<E> {
    /// Every candidate of some identifier conflicts with the collected
    /// requirements and backtracking ran out of states to rewind.
    ResolutionImpossible {
        /// The requirements that could not be reconciled.
        causes: Vec<RequirementInformation>,
    },

    /// The round budget was exhausted before a solution was found.
    ResolutionTooDeep {
        /// The configured budget.
        max_rounds: usize,
    },

    /// A provider operation failed.
    Provider(E),
}

impl<E: Display> Display for ResolutionError<E> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ResolutionError::ResolutionImpossible { causes } => {
                write!(f, "resolution impossible, conflicting requirements:")?;
                for cause in causes {
                    write!(f, " {}", cause.requirement)?;
                    if let Some(parent) = &cause.parent {
                        write!(f, " (from {parent})")?;
                    }
                }
                Ok(())
            }
            ResolutionError::ResolutionTooDeep { max_rounds } => {
                write!(f, "resolution exceeded the limit of {max_rounds} rounds")
            }
            ResolutionError::Provider(e) => write!(f, "{e}"),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for ResolutionError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ResolutionError::Provider(e) => Some(e),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct State {
    mapping: IndexMap<Identifier, Candidate>,
    criteria: IndexMap<Identifier, Criterion>,
}

enum AddError<E> {
    /// No candidate is left after merging in the new requirement.
    Conflicted(Criterion),
    Provider(E),
}

/// The backtracking resolver. Borrows the provider for a single
/// [`Resolver::resolve`] call.
pub struct Resolver<'p, P: DependencyProvider> {
    provider: &'p P,
    states: Vec<State>,
}

impl<'p, P: DependencyProvider> Resolver<'p, P> {
    /// Create a resolver over a provider.
    pub fn new(provider: &'p P) -> Self {
        Resolver {
            provider,
            states: Vec::new(),
        }
    }

    /// Resolve the given direct requirements into a pinned mapping and
    /// dependency graph, within `max_rounds` backtracking rounds.
    pub fn resolve(
        &mut self,
        requirements: Vec<Requirement>,
        max_rounds: usize,
    ) -> Result<Resolution, ResolutionError<P::Error>> {
        self.states = vec![State::default()];

        for requirement in requirements {
            let provider = self.provider;
            let criteria = &mut self.states.last_mut().expect("states is never empty").criteria;
            match Self::add_to_criteria(provider, criteria, requirement, None) {
                Ok(()) => {}
                Err(AddError::Conflicted(criterion)) => {
                    return Err(ResolutionError::ResolutionImpossible {
                        causes: criterion.information,
                    })
                }
                Err(AddError::Provider(e)) => return Err(ResolutionError::Provider(e)),
            }
        }

        self.push_new_state();

        for _round in 0..max_rounds {
            let state = self.state();
            let mut unsatisfied: Vec<Identifier> = state
                .criteria
                .iter()
                .filter(|(identifier, criterion)| {
                    !self.is_current_pin_satisfying(identifier, criterion)
                })
                .map(|(identifier, _)| (*identifier).clone())
                .collect();

            if unsatisfied.is_empty() {
                let state = self.states.pop().expect("states is never empty");
                return Ok(self.build_result(state));
            }

            // identifiers are part of the preference key, so the choice is
            // deterministic
            unsatisfied.sort_by_cached_key(|identifier| {
                self.provider
                    .preference(identifier, &self.state().criteria[identifier].information)
            });
            let chosen = unsatisfied.into_iter().next().expect("non-empty");
            tracing::debug!("pinning {chosen}");

            let causes = self.attempt_to_pin(&chosen)?;
            if causes.is_empty() {
                self.push_new_state();
            } else {
                let causes: Vec<RequirementInformation> = causes
                    .into_iter()
                    .flat_map(|criterion| criterion.information)
                    .collect();
                tracing::debug!("backtracking from {chosen}");
                if !self.backtrack()? {
                    return Err(ResolutionError::ResolutionImpossible { causes });
                }
            }
        }

        Err(ResolutionError::ResolutionTooDeep { max_rounds })
    }

    fn state(&self) -> &State {
        self.states.last().expect("states is never empty")
    }

    fn push_new_state(&mut self) {
        let state = self.state().clone();
        self.states.push(state);
    }

    /// Merge a new requirement into the criteria, re-querying the candidate
    /// list for its identifier.
    fn add_to_criteria(
        provider: &P,
        criteria: &mut IndexMap<Identifier, Criterion>,
        requirement: Requirement,
        parent: Option<Identifier>,
    ) -> Result<(), AddError<P::Error>> {
        let identifier = provider.identify_requirement(&requirement);

        let (mut information, incompatibilities) = match criteria.get(&identifier) {
            Some(criterion) => (
                criterion.information.clone(),
                criterion.incompatibilities.clone(),
            ),
            None => (Vec::new(), Vec::new()),
        };
        information.push(RequirementInformation {
            requirement,
            parent,
        });

        let requirements: Vec<Requirement> = information
            .iter()
            .map(|info| info.requirement.clone())
            .collect();
        let candidates = provider
            .find_matches(&identifier, &requirements, &incompatibilities)
            .map_err(AddError::Provider)?;

        let criterion = Criterion {
            candidates,
            information,
            incompatibilities,
        };
        if criterion.candidates.is_empty() {
            return Err(AddError::Conflicted(criterion));
        }
        criteria.insert(identifier, criterion);
        Ok(())
    }

    fn is_current_pin_satisfying(&self, identifier: &Identifier, criterion: &Criterion) -> bool {
        match self.state().mapping.get(identifier) {
            Some(candidate) => criterion
                .requirements()
                .all(|requirement| self.provider.is_satisfied_by(requirement, candidate)),
            None => false,
        }
    }

    /// Try the candidates of an identifier in order. Returns the criteria
    /// that conflicted for every failed candidate; an empty list means a
    /// candidate was pinned.
    fn attempt_to_pin(
        &mut self,
        identifier: &Identifier,
    ) -> Result<Vec<Criterion>, ResolutionError<P::Error>> {
        let criterion = self.state().criteria[identifier].clone();
        let mut causes = Vec::new();

        'candidates: for candidate in &criterion.candidates {
            let dependencies = self
                .provider
                .get_dependencies(candidate)
                .map_err(ResolutionError::Provider)?;

            let mut updated_criteria = self.state().criteria.clone();
            for dependency in dependencies {
                match Self::add_to_criteria(
                    self.provider,
                    &mut updated_criteria,
                    dependency,
                    Some(identifier.clone()),
                ) {
                    Ok(()) => {}
                    Err(AddError::Conflicted(conflict)) => {
                        causes.push(conflict);
                        continue 'candidates;
                    }
                    Err(AddError::Provider(e)) => return Err(ResolutionError::Provider(e)),
                }
            }

            // the provider only returns matching candidates, but the pinned
            // set may have gained requirements since this list was computed
            if !criterion
                .requirements()
                .all(|requirement| self.provider.is_satisfied_by(requirement, candidate))
            {
                continue;
            }

            let state = self.states.last_mut().expect("states is never empty");
            state.criteria = updated_criteria;
            // a re-pin moves the identifier to the end of the mapping
            state.mapping.shift_remove(identifier);
            state.mapping.insert(identifier.clone(), candidate.clone());
            return Ok(Vec::new());
        }

        Ok(causes)
    }

    /// Rewind to the most recent state that still has an alternative: unpin
    /// its last pinned candidate, mark it incompatible and recompute the
    /// affected candidate lists.
    fn backtrack(&mut self) -> Result<bool, ResolutionError<P::Error>> {
        while self.states.len() >= 3 {
            // drop the state that turned out to be a dead end
            self.states.pop();
            let mut broken = self.states.pop().expect("checked above");
            let Some((name, candidate)) = broken.mapping.pop() else {
                continue;
            };
            tracing::debug!("unpinning {name}");

            let mut incompatibilities: Vec<(Identifier, Vec<Candidate>)> = broken
                .criteria
                .iter()
                .map(|(identifier, criterion)| {
                    (identifier.clone(), criterion.incompatibilities.clone())
                })
                .collect();
            incompatibilities.push((name, vec![candidate]));

            self.push_new_state();
            if self.patch_criteria(incompatibilities)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Merge incompatibilities into the current state. Fails when some
    /// identifier is left without candidates, meaning this state cannot lead
    /// to a solution either.
    fn patch_criteria(
        &mut self,
        incompatibilities: Vec<(Identifier, Vec<Candidate>)>,
    ) -> Result<bool, ResolutionError<P::Error>> {
        for (identifier, incompatible) in incompatibilities {
            if incompatible.is_empty() {
                continue;
            }
            let Some(criterion) = self.state().criteria.get(&identifier) else {
                continue;
            };
            let criterion = criterion.clone();

            let mut merged = criterion.incompatibilities.clone();
            for candidate in incompatible {
                if !merged.contains(&candidate) {
                    merged.push(candidate);
                }
            }

            let requirements: Vec<Requirement> = criterion
                .information
                .iter()
                .map(|info| info.requirement.clone())
                .collect();
            let candidates = self
                .provider
                .find_matches(&identifier, &requirements, &merged)
                .map_err(ResolutionError::Provider)?;
            if candidates.is_empty() {
                return Ok(false);
            }

            let state = self.states.last_mut().expect("states is never empty");
            state.criteria.insert(
                identifier,
                Criterion {
                    candidates,
                    information: criterion.information,
                    incompatibilities: merged,
                },
            );
        }
        Ok(true)
    }

    /// Keep only the identifiers reachable from the root and build the
    /// dependency graph over them.
    fn build_result(&self, state: State) -> Resolution {
        let State { mapping, criteria } = state;

        let mut connected: IndexSet<Option<Identifier>> = IndexSet::new();
        connected.insert(None);
        for identifier in criteria.keys() {
            let mut visiting = IndexSet::new();
            has_route_to_root(&criteria, Some(identifier), &mut connected, &mut visiting);
        }

        let mut graph = DependencyGraph::default();
        for (identifier, criterion) in &criteria {
            if !connected.contains(&Some(identifier.clone())) {
                continue;
            }
            graph.add_vertex(identifier.clone());
            for parent in criterion.parents() {
                match parent {
                    None => graph.connect(None, identifier.clone()),
                    Some(parent) if connected.contains(&Some(parent.clone())) => {
                        graph.connect(Some(parent.clone()), identifier.clone());
                    }
                    Some(_) => {}
                }
            }
        }

        let mapping: IndexMap<Identifier, Candidate> = mapping
            .into_iter()
            .filter(|(identifier, _)| connected.contains(&Some(identifier.clone())))
            .collect();

        Resolution {
            mapping,
            graph,
            criteria,
        }
    }
}

/// Whether an identifier can reach the root by following requirement
/// parents. Reachable identifiers are accumulated in `connected`; `visiting`
/// cuts dependency cycles so they do not recurse forever.
fn has_route_to_root(
    criteria: &IndexMap<Identifier, Criterion>,
    key: Option<&Identifier>,
    connected: &mut IndexSet<Option<Identifier>>,
    visiting: &mut IndexSet<Identifier>,
) -> bool {
    let owned = key.cloned();
    if connected.contains(&owned) {
        return true;
    }
    let Some(key) = key else {
        return true;
    };
    if !visiting.insert(key.clone()) {
        return false;
    }
    let Some(criterion) = criteria.get(key) else {
        visiting.shift_remove(key);
        return false;
    };
    let parents: Vec<Option<Identifier>> = criterion
        .parents()
        .map(|parent| parent.cloned())
        .collect();
    for parent in parents {
        if connected.contains(&parent)
            || has_route_to_root(criteria, parent.as_ref(), connected, visiting)
        {
            connected.insert(owned);
            visiting.shift_remove(key);
            return true;
        }
    }
    visiting.shift_remove(key);
    false
}
