use std::collections::{BTreeSet, HashMap, HashSet};

use super::stage::StageDescriptor;
use crate::core::error::{PipelineError, PipelineResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    InProgress,
    Done,
}

/// A validated, acyclic stage graph in topological order.
#[derive(Debug, Clone)]
pub struct StageGraph {
    stages: Vec<StageDescriptor>,
    index: HashMap<String, usize>,
    /// Direct dependents of each stage, by position.
    dependents: Vec<Vec<usize>>,
}

impl StageGraph {
    /// Validate `stages` and order them so that every stage comes after its
    /// inputs. Among independent stages, declaration order is kept.
    pub fn new(stages: Vec<StageDescriptor>) -> PipelineResult<Self> {
        let mut declared: HashMap<&str, usize> = HashMap::with_capacity(stages.len());
        for (i, stage) in stages.iter().enumerate() {
            if declared.insert(stage.name.as_str(), i).is_some() {
                return Err(PipelineError::DuplicateStage(stage.name.clone()));
            }
        }
        for stage in &stages {
            let mut seen = HashSet::new();
            for input in &stage.inputs {
                if !declared.contains_key(input.as_str()) {
                    return Err(PipelineError::UnknownStage {
                        stage: stage.name.clone(),
                        missing: input.clone(),
                    });
                }
                if !seen.insert(input.as_str()) {
                    return Err(PipelineError::Config(format!(
                        "stage '{}' lists input '{}' twice",
                        stage.name, input
                    )));
                }
            }
        }

        let mut marks = vec![Mark::Unvisited; stages.len()];
        let mut stack = Vec::new();
        let mut order = Vec::with_capacity(stages.len());
        for i in 0..stages.len() {
            visit(i, &stages, &declared, &mut marks, &mut stack, &mut order)?;
        }
        drop(declared);

        let mut slots: Vec<Option<StageDescriptor>> = stages.into_iter().map(Some).collect();
        let ordered: Vec<StageDescriptor> = order.iter().filter_map(|&i| slots[i].take()).collect();
        let index: HashMap<String, usize> = ordered
            .iter()
            .enumerate()
            .map(|(i, s)| (s.name.clone(), i))
            .collect();
        let mut dependents = vec![Vec::new(); ordered.len()];
        for (i, stage) in ordered.iter().enumerate() {
            for input in &stage.inputs {
                if let Some(&j) = index.get(input) {
                    dependents[j].push(i);
                }
            }
        }
        Ok(Self {
            stages: ordered,
            index,
            dependents,
        })
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Stages in topological order.
    pub fn stages(&self) -> &[StageDescriptor] {
        &self.stages
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn get(&self, name: &str) -> Option<&StageDescriptor> {
        self.position(name).map(|i| &self.stages[i])
    }

    /// Positions of the direct inputs of the stage at `i`.
    pub fn inputs_of(&self, i: usize) -> Vec<usize> {
        self.stages[i]
            .inputs
            .iter()
            .filter_map(|name| self.position(name))
            .collect()
    }

    /// Every stage that depends on the stage at `i`, directly or not.
    pub fn downstream_of(&self, i: usize) -> BTreeSet<usize> {
        let mut out = BTreeSet::new();
        let mut pending = self.dependents[i].clone();
        while let Some(j) = pending.pop() {
            if out.insert(j) {
                pending.extend(self.dependents[j].iter().copied());
            }
        }
        out
    }
}

fn visit(
    i: usize,
    stages: &[StageDescriptor],
    declared: &HashMap<&str, usize>,
    marks: &mut [Mark],
    stack: &mut Vec<usize>,
    order: &mut Vec<usize>,
) -> PipelineResult<()> {
    match marks[i] {
        Mark::Done => return Ok(()),
        Mark::InProgress => {
            let from = stack.iter().position(|&s| s == i).unwrap_or(0);
            let mut path: Vec<String> = stack[from..].iter().map(|&s| stages[s].name.clone()).collect();
            path.push(stages[i].name.clone());
            return Err(PipelineError::GraphCycle(path));
        }
        Mark::Unvisited => {}
    }
    marks[i] = Mark::InProgress;
    stack.push(i);
    for input in &stages[i].inputs {
        if let Some(&j) = declared.get(input.as_str()) {
            visit(j, stages, declared, marks, stack, order)?;
        }
    }
    stack.pop();
    marks[i] = Mark::Done;
    order.push(i);
    Ok(())
}
