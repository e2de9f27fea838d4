// Index-based storage for the tree under construction.
// Parent links are indices, so nothing owned points back up the tree.

use crate::state::{CaseResult, StepResult, SuiteResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SuiteId(pub(crate) usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CaseId(pub(crate) usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StepId(pub(crate) usize);

/// Owner of a step node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StepOwner {
    Case(CaseId),
    Step(StepId),
    Suite(SuiteId),
}

#[derive(Debug)]
pub(crate) struct SuiteNode {
    pub result: SuiteResult,
    pub parent: Option<SuiteId>,
    pub children: Vec<SuiteId>,
    pub cases: Vec<CaseId>,
    pub hooks: Vec<StepId>,
}

#[derive(Debug)]
pub(crate) struct CaseNode {
    pub result: CaseResult,
    pub suite: SuiteId,
    pub attempt_id: String,
    pub steps: Vec<StepId>,
    pub finished: bool,
}

#[derive(Debug)]
pub(crate) struct StepNode {
    pub result: StepResult,
    pub owner: StepOwner,
    pub case: Option<CaseId>,
    pub children: Vec<StepId>,
    pub open: bool,
}

#[derive(Debug, Default)]
pub(crate) struct Arena {
    pub suites: Vec<SuiteNode>,
    pub cases: Vec<CaseNode>,
    pub steps: Vec<StepNode>,
    pub roots: Vec<SuiteId>,
}

impl Arena {
    pub fn suite(&self, id: SuiteId) -> &SuiteNode {
        &self.suites[id.0]
    }

    pub fn suite_mut(&mut self, id: SuiteId) -> &mut SuiteNode {
        &mut self.suites[id.0]
    }

    pub fn case(&self, id: CaseId) -> &CaseNode {
        &self.cases[id.0]
    }

    pub fn case_mut(&mut self, id: CaseId) -> &mut CaseNode {
        &mut self.cases[id.0]
    }

    pub fn step(&self, id: StepId) -> &StepNode {
        &self.steps[id.0]
    }

    pub fn step_mut(&mut self, id: StepId) -> &mut StepNode {
        &mut self.steps[id.0]
    }

    pub fn add_suite(&mut self, result: SuiteResult, parent: Option<SuiteId>) -> SuiteId {
        let id = SuiteId(self.suites.len());
        self.suites.push(SuiteNode {
            result,
            parent,
            children: Vec::new(),
            cases: Vec::new(),
            hooks: Vec::new(),
        });
        match parent {
            Some(parent) => self.suite_mut(parent).children.push(id),
            None => self.roots.push(id),
        }
        id
    }

    pub fn add_case(&mut self, result: CaseResult, suite: SuiteId, attempt_id: &str) -> CaseId {
        let id = CaseId(self.cases.len());
        self.cases.push(CaseNode {
            result,
            suite,
            attempt_id: attempt_id.to_string(),
            steps: Vec::new(),
            finished: false,
        });
        self.suite_mut(suite).cases.push(id);
        id
    }

    pub fn add_step(&mut self, result: StepResult, owner: StepOwner, open: bool) -> StepId {
        let id = StepId(self.steps.len());
        let case = match owner {
            StepOwner::Case(case) => Some(case),
            StepOwner::Step(parent) => self.step(parent).case,
            StepOwner::Suite(_) => None,
        };
        self.steps.push(StepNode {
            result,
            owner,
            case,
            children: Vec::new(),
            open,
        });
        match owner {
            StepOwner::Case(case) => self.case_mut(case).steps.push(id),
            StepOwner::Step(parent) => self.step_mut(parent).children.push(id),
            StepOwner::Suite(suite) => self.suite_mut(suite).hooks.push(id),
        }
        id
    }

    /// Root-first chain of suites from the root down to `id`
    pub fn suite_path(&self, id: SuiteId) -> Vec<SuiteId> {
        let mut path = vec![id];
        let mut current = self.suite(id).parent;
        while let Some(parent) = current {
            path.push(parent);
            current = self.suite(parent).parent;
        }
        path.reverse();
        path
    }

    /// True when the step or any nested step is failed
    pub fn step_subtree_failed(&self, id: StepId) -> bool {
        let node = self.step(id);
        node.result.has_failure()
            || node
                .children
                .iter()
                .any(|child| self.step_subtree_failed(*child))
    }

    pub fn any_step_failed(&self, steps: &[StepId]) -> bool {
        steps.iter().any(|s| self.step_subtree_failed(*s))
    }

    pub fn assemble_step(&self, id: StepId) -> StepResult {
        let node = self.step(id);
        let mut result = node.result.clone();
        result
            .steps
            .extend(node.children.iter().map(|child| self.assemble_step(*child)));
        result
    }

    pub fn assemble_case(&self, id: CaseId) -> CaseResult {
        let node = self.case(id);
        let mut result = node.result.clone();
        result.steps = node.steps.iter().map(|s| self.assemble_step(*s)).collect();
        result
    }

    pub fn assemble_suite(&self, id: SuiteId) -> SuiteResult {
        let node = self.suite(id);
        let mut result = node.result.clone();
        result.cases = node.cases.iter().map(|c| self.assemble_case(*c)).collect();
        result.suites = node
            .children
            .iter()
            .map(|s| self.assemble_suite(*s))
            .collect();
        result.hooks = node.hooks.iter().map(|h| self.assemble_step(*h)).collect();
        result
    }

    pub fn assemble_roots(&self) -> Vec<SuiteResult> {
        self.roots.iter().map(|s| self.assemble_suite(*s)).collect()
    }
}
