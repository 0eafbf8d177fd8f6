// tb-common/src/dependency/resolver.rs
// Expands a root formula into the requirements it leaves unsatisfied and the ordered list of
// formulae that must be present before it.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use tracing::{debug, warn};

use super::definition::{Dependency, DependencyTag};
use super::requirement::{Requirement, SystemProbe};
use crate::error::{Result, TbError, UnsatisfiedRequirement};
use crate::formulary::Formulary;
use crate::keg::KegRegistry;
use crate::model::{BuildOptions, Formula, Options};

// --- ResolutionContext ---
pub struct ResolutionContext<'a> {
    pub formulary: &'a Formulary,
    pub keg_registry: &'a KegRegistry,
    pub probe: &'a dyn SystemProbe,
    /// Whether `formula`, built with the given options, will be poured from a bottle.
    pub pours_bottle: &'a dyn Fn(&Formula, &BuildOptions) -> bool,
}

/// What the traversal does with an edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visit {
    /// Follow the edge and keep its target.
    Keep,
    /// Drop the edge and everything only reachable through it.
    Prune,
    /// The target is already present: keep walking its edges but do not install it.
    Skip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanAction {
    Install,
    AlreadySatisfied,
}

// --- ExpandedDependency ---
#[derive(Debug, Clone)]
pub struct ExpandedDependency {
    pub dependency: Dependency,
    pub formula: Arc<Formula>,
    /// Options to build the target with: those requested on its edges plus inherited ones.
    pub options: Options,
    pub action: PlanAction,
}

impl ExpandedDependency {
    pub fn name(&self) -> &str {
        &self.formula.name
    }
}

#[derive(Debug, Clone, Default)]
pub struct Expansion {
    /// Unsatisfied requirements per dependent, in discovery order.
    pub unsatisfied: Vec<(String, Vec<Requirement>)>,
    /// Install order, dependencies first.
    pub dependencies: Vec<ExpandedDependency>,
}

impl Expansion {
    pub fn to_install(&self) -> impl Iterator<Item = &ExpandedDependency> {
        self.dependencies
            .iter()
            .filter(|d| d.action == PlanAction::Install)
    }

    pub fn names(&self) -> Vec<&str> {
        self.dependencies.iter().map(ExpandedDependency::name).collect()
    }

    /// Fails with every fatal unsatisfied requirement; non-fatal ones are only logged.
    pub fn check_requirements(&self) -> Result<()> {
        let mut fatal = Vec::new();
        for (dependent, reqs) in &self.unsatisfied {
            for req in reqs {
                if req.fatal {
                    fatal.push(UnsatisfiedRequirement {
                        dependent: dependent.clone(),
                        requirement: req.to_string(),
                        fatal: true,
                    });
                } else {
                    warn!("{}: unsatisfied requirement {}", dependent, req);
                }
            }
        }
        if fatal.is_empty() {
            Ok(())
        } else {
            Err(TbError::UnsatisfiedRequirements(fatal))
        }
    }
}

#[derive(Default)]
struct RequirementPass {
    unsatisfied: Vec<(String, Vec<Requirement>)>,
    /// Dependencies standing in for requirements, newest first.
    derived: VecDeque<Dependency>,
    queued: HashSet<String>,
}

impl RequirementPass {
    fn record_unsatisfied(&mut self, dependent: &str, req: &Requirement) {
        match self.unsatisfied.iter_mut().find(|(d, _)| d == dependent) {
            Some((_, reqs)) => reqs.push(req.clone()),
            None => self
                .unsatisfied
                .push((dependent.to_string(), vec![req.clone()])),
        }
    }
}

pub struct DependencyResolver<'a> {
    context: ResolutionContext<'a>,
    root: Arc<Formula>,
    root_options: Options,
    /// Options requested on the kept edges reaching each formula.
    requested: HashMap<String, Options>,
}

impl<'a> DependencyResolver<'a> {
    pub fn new(context: ResolutionContext<'a>, root: Arc<Formula>, root_options: Options) -> Self {
        Self {
            context,
            root,
            root_options,
            requested: HashMap::new(),
        }
    }

    /// Requested options are collected over the whole graph first, so requirements and
    /// optional edges are judged against every option a formula will be built with.
    /// Requirement pruning then runs to a fixpoint: a formula pulled in through
    /// `default_formula` joins the root's edges and its closure is walked again.
    pub fn expand(mut self) -> Result<Expansion> {
        let root = Arc::clone(&self.root);
        debug!("Expanding dependencies of {}", root.name);

        let mut pass = RequirementPass::default();
        pass.queued.insert(root.name.clone());
        let root_edges = loop {
            let mut edges: Vec<Dependency> = pass.derived.iter().cloned().collect();
            edges.extend(root.dependencies.iter().cloned());
            let closure = self.collect_requested(&root, &edges)?;
            if !self.expand_requirements(&closure, &mut pass)? {
                break edges;
            }
        };

        let mut order = PlanOrder::default();
        let mut path = vec![root.name.clone()];
        self.order_edges(&root, &root_edges, &mut path, &mut order)?;
        let dependencies = order.entries;
        debug!(
            "Expansion of {}: [{}]",
            root.name,
            dependencies
                .iter()
                .map(ExpandedDependency::name)
                .collect::<Vec<_>>()
                .join(", ")
        );
        Ok(Expansion {
            unsatisfied: pass.unsatisfied,
            dependencies,
        })
    }

    fn effective_build_options(&self, formula: &Formula) -> BuildOptions {
        let mut args = if formula.name == self.root.name {
            self.root_options.clone()
        } else {
            Options::new()
        };
        if let Some(requested) = self.requested.get(&formula.name) {
            args.extend(requested);
        }
        BuildOptions::new(args, formula.declared_options())
    }

    fn pours_bottle(&self, formula: &Formula, build: &BuildOptions) -> bool {
        (self.context.pours_bottle)(formula, build)
    }

    // --- Requested options ---

    /// Walks every kept edge from the root, recording the options each edge asks of its
    /// target. A target is walked again only when its requested options grew, since new
    /// options can switch on more of its optional edges. Returns the closure in walk order.
    fn collect_requested(
        &mut self,
        root: &Arc<Formula>,
        root_edges: &[Dependency],
    ) -> Result<Vec<Arc<Formula>>> {
        let mut walked: HashMap<String, Options> = HashMap::new();
        walked.insert(root.name.clone(), Options::new());
        let mut closure = vec![Arc::clone(root)];
        let mut queue: VecDeque<(Arc<Formula>, Vec<Dependency>)> = VecDeque::new();
        queue.push_back((Arc::clone(root), root_edges.to_vec()));

        while let Some((dependent, edges)) = queue.pop_front() {
            let build = self.effective_build_options(&dependent);
            for dep in &edges {
                if dep.formula_name() == dependent.name
                    || self.edge_excluded(&dependent, &build, dep.tags, dep.option_name())
                {
                    continue;
                }
                let target = self.context.formulary.load_formula(dep.formula_name())?;
                let inherited = self.inherited_options_for(&dependent, dep, &target);
                let requested = self.requested.entry(target.name.clone()).or_default();
                requested.extend(&inherited);
                let requested = requested.clone();

                match walked.get(&target.name) {
                    Some(previous) if previous.is_superset(&requested) => continue,
                    Some(_) => {}
                    None => closure.push(Arc::clone(&target)),
                }
                walked.insert(target.name.clone(), requested);
                let target_edges = target.dependencies.clone();
                queue.push_back((target, target_edges));
            }
        }
        Ok(closure)
    }

    // --- Requirements ---

    /// Re-evaluates the requirements of every formula in `closure`. Returns true when a
    /// requirement was converted into a new dependency and the closure must be walked again.
    fn expand_requirements(
        &self,
        closure: &[Arc<Formula>],
        pass: &mut RequirementPass,
    ) -> Result<bool> {
        pass.unsatisfied.clear();
        let mut added = false;
        for formula in closure {
            let build = self.effective_build_options(formula);
            for req in &formula.requirements {
                match self.visit_requirement(formula, &build, req, pass)? {
                    RequirementVisit::Keep => {
                        debug!("[{}] Unsatisfied requirement {}", formula.name, req);
                        pass.record_unsatisfied(&formula.name, req);
                    }
                    RequirementVisit::Converted => added = true,
                    RequirementVisit::Prune => {}
                }
            }
        }
        Ok(added)
    }

    fn visit_requirement(
        &self,
        dependent: &Formula,
        build: &BuildOptions,
        req: &Requirement,
        pass: &mut RequirementPass,
    ) -> Result<RequirementVisit> {
        if self.edge_excluded(dependent, build, req.tags, req.option_name()) {
            return Ok(RequirementVisit::Prune);
        }
        let satisfied = req.satisfied(self.context.probe);
        if let Some(dep) = req.to_dependency().filter(|_| !satisfied) {
            let target = self.context.formulary.load_formula(dep.formula_name())?;
            if !pass.queued.insert(target.name.clone()) {
                return Ok(RequirementVisit::Prune);
            }
            debug!(
                "[{}] Requirement {} provided by formula {}",
                dependent.name, req.name, target.name
            );
            pass.derived.push_front(dep);
            return Ok(RequirementVisit::Converted);
        }
        Ok(if satisfied {
            RequirementVisit::Prune
        } else {
            RequirementVisit::Keep
        })
    }

    /// Optional/recommended edges the build leaves out, and build-only edges of a formula
    /// that will be poured.
    fn edge_excluded(
        &self,
        dependent: &Formula,
        build: &BuildOptions,
        tags: DependencyTag,
        option_name: &str,
    ) -> bool {
        if tags.intersects(DependencyTag::OPTIONAL | DependencyTag::RECOMMENDED)
            && build.without(option_name)
        {
            return true;
        }
        tags.contains(DependencyTag::BUILD) && self.pours_bottle(dependent, build)
    }

    // --- Dependencies ---

    fn inherited_options_for(&self, dependent: &Formula, dep: &Dependency, target: &Formula) -> Options {
        let mut inherited = dep.options.clone();
        let build = self.effective_build_options(dependent);
        if (build.include("universal") || dependent.require_universal_deps)
            && !dep.is_build()
            && target.option_defined("universal")
        {
            inherited.insert("universal");
        }
        inherited
    }

    fn visit_dependency(
        &self,
        dependent: &Formula,
        build: &BuildOptions,
        dep: &Dependency,
        target: &Formula,
    ) -> Visit {
        if self.edge_excluded(dependent, build, dep.tags, dep.option_name()) {
            Visit::Prune
        } else if self.dependency_satisfied(target) {
            Visit::Skip
        } else {
            Visit::Keep
        }
    }

    /// The current version is installed and was built with every option requested on it.
    fn dependency_satisfied(&self, target: &Formula) -> bool {
        let Some(keg) = self
            .context
            .keg_registry
            .installed_keg(&target.name, &target.pkg_version())
        else {
            return false;
        };
        let required = self.requested.get(&target.name).cloned().unwrap_or_default();
        if required.is_empty() {
            return true;
        }
        match keg.receipt() {
            Ok(Some(receipt)) => receipt.used_options.is_superset(&required),
            Ok(None) => false,
            Err(e) => {
                warn!("[{}] Could not read install receipt: {}", target.name, e);
                false
            }
        }
    }

    /// Depth-first post-order over `edges`. Each formula is expanded once; later edges
    /// reaching it only merge their tags into the existing entry.
    fn order_edges(
        &self,
        dependent: &Formula,
        edges: &[Dependency],
        path: &mut Vec<String>,
        order: &mut PlanOrder,
    ) -> Result<()> {
        let build = self.effective_build_options(dependent);
        for dep in edges {
            if dep.formula_name() == dependent.name {
                continue;
            }
            let target = self.context.formulary.load_formula(dep.formula_name())?;
            let visit = self.visit_dependency(dependent, &build, dep, &target);
            debug!("[{}] {} -> {:?}", dependent.name, dep, visit);
            if visit == Visit::Prune {
                continue;
            }
            if path.contains(&target.name) {
                return Err(TbError::DependencyError(format!(
                    "dependency cycle: {} -> {}",
                    path.join(" -> "),
                    target.name
                )));
            }
            if let Some(&i) = order.index.get(&target.name) {
                let existing = &mut order.entries[i];
                existing.dependency.tags |= dep.tags;
                existing.dependency.options.extend(&dep.options);
                if visit == Visit::Keep {
                    existing.action = PlanAction::Install;
                }
                continue;
            }

            path.push(target.name.clone());
            self.order_edges(&target, &target.dependencies, path, order)?;
            path.pop();

            let mut dependency = dep.clone();
            dependency.name = target.name.clone();
            order.index.insert(target.name.clone(), order.entries.len());
            order.entries.push(ExpandedDependency {
                dependency,
                options: self.requested.get(&target.name).cloned().unwrap_or_default(),
                formula: target,
                action: if visit == Visit::Skip {
                    PlanAction::AlreadySatisfied
                } else {
                    PlanAction::Install
                },
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RequirementVisit {
    Keep,
    Prune,
    /// Replaced by a dependency on its default formula.
    Converted,
}

#[derive(Default)]
struct PlanOrder {
    entries: Vec<ExpandedDependency>,
    index: HashMap<String, usize>,
}
