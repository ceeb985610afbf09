//! Rule dependency graph and recursion detection.

use std::collections::{BTreeMap, HashMap, VecDeque};

use crate::ast::visit::{Visitor, walk_term};
use crate::ast::{DATA_ROOT, Term, TermKind};
use crate::types::RuleGroup;

type Path = Vec<String>;

/// Order the groups so every group comes after the groups it reads.
///
/// Returns the offending cycle, rendered as `data.` paths with the first
/// entry repeated at the end, if the rules are recursive.
pub(crate) fn topological_sort(groups: &BTreeMap<Path, RuleGroup>) -> Result<Vec<&Path>, Vec<String>> {
    let edges: BTreeMap<&Path, Vec<&Path>> = groups
        .iter()
        .map(|(path, group)| (path, dependencies(group, groups)))
        .collect();

    // dependents[X] = groups that read X
    let mut dependents: HashMap<&Path, Vec<&Path>> = HashMap::new();
    let mut in_degree: HashMap<&Path, usize> = groups.keys().map(|p| (p, 0)).collect();

    for (&path, deps) in &edges {
        for &dep in deps {
            dependents.entry(dep).or_default().push(path);
            *in_degree.entry(path).or_insert(0) += 1;
        }
    }

    let mut queue: VecDeque<&Path> = groups
        .keys()
        .filter(|p| in_degree.get(p) == Some(&0))
        .collect();

    let mut sorted = Vec::with_capacity(groups.len());
    while let Some(path) = queue.pop_front() {
        for &dependent in dependents.get(&path).into_iter().flatten() {
            if let Some(deg) = in_degree.get_mut(&dependent) {
                *deg -= 1;
                if *deg == 0 {
                    queue.push_back(dependent);
                }
            }
        }
        sorted.push(path);
    }

    if sorted.len() != groups.len() {
        return Err(find_cycle(&edges));
    }
    Ok(sorted)
}

/// Groups read by any rule of `group`, including its default value.
fn dependencies<'g>(group: &RuleGroup, groups: &'g BTreeMap<Path, RuleGroup>) -> Vec<&'g Path> {
    let mut refs = DataRefs::default();
    for rule in &group.rules {
        refs.visit_rule(rule);
    }
    if let Some(default) = &group.default {
        refs.visit_term(default);
    }

    let mut deps: Vec<&Path> = Vec::new();
    for prefix in &refs.0 {
        for path in groups.keys() {
            // data.p.r.x reads group p.r; data.p reads every group under p.
            if (prefix.starts_with(path) || path.starts_with(prefix)) && !deps.contains(&path) {
                deps.push(path);
            }
        }
    }
    deps
}

/// Constant prefixes of every `data` reference.
#[derive(Default)]
struct DataRefs(Vec<Path>);

impl Visitor for DataRefs {
    fn visit_term(&mut self, term: &Term) {
        match &term.kind {
            TermKind::Var(name) if name == DATA_ROOT => self.0.push(Vec::new()),
            TermKind::Ref(segments) if segments.first().and_then(Term::as_var) == Some(DATA_ROOT) => {
                let prefix = segments[1..]
                    .iter()
                    .map_while(|s| match &s.kind {
                        TermKind::String(key) => Some(key.clone()),
                        _ => None,
                    })
                    .collect();
                self.0.push(prefix);
                for segment in &segments[1..] {
                    self.visit_term(segment);
                }
                return;
            }
            _ => {}
        }
        walk_term(self, term);
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum DfsState {
    Unvisited,
    InStack,
    Done,
}

fn render(path: &Path) -> String {
    std::iter::once(DATA_ROOT)
        .chain(path.iter().map(String::as_str))
        .collect::<Vec<_>>()
        .join(".")
}

/// DFS-based cycle finder for error reporting.
fn find_cycle(edges: &BTreeMap<&Path, Vec<&Path>>) -> Vec<String> {
    let mut state: HashMap<&Path, DfsState> = edges.keys().map(|&p| (p, DfsState::Unvisited)).collect();
    let mut stack: Vec<&Path> = Vec::new();

    for &path in edges.keys() {
        if state.get(&path) == Some(&DfsState::Unvisited)
            && let Some(cycle) = dfs(path, edges, &mut state, &mut stack)
        {
            return cycle;
        }
    }
    Vec::new()
}

fn dfs<'a>(
    node: &'a Path,
    edges: &BTreeMap<&'a Path, Vec<&'a Path>>,
    state: &mut HashMap<&'a Path, DfsState>,
    stack: &mut Vec<&'a Path>,
) -> Option<Vec<String>> {
    state.insert(node, DfsState::InStack);
    stack.push(node);

    for &neighbor in edges.get(&node).into_iter().flatten() {
        match state.get(&neighbor) {
            Some(DfsState::InStack) => {
                let pos = stack.iter().position(|&n| n == neighbor).unwrap_or(0);
                let mut cycle: Vec<String> = stack[pos..].iter().map(|&p| render(p)).collect();
                cycle.push(render(neighbor));
                return Some(cycle);
            }
            Some(DfsState::Unvisited) | None => {
                if let Some(cycle) = dfs(neighbor, edges, state, stack) {
                    return Some(cycle);
                }
            }
            Some(DfsState::Done) => {}
        }
    }

    stack.pop();
    state.insert(node, DfsState::Done);
    None
}
