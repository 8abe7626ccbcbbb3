use super::{ModuleDescriptor, ModuleId};
use crate::error::{Error, Result};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;

/// The `requires` relation over a set of declared modules.
///
/// Construction order is a topological order of that relation: every module
/// comes after all of its transitive requirements. Independent modules keep
/// their declaration order so that runs are reproducible.
pub struct ModuleGraph {
    modules: Vec<Arc<ModuleDescriptor>>,
    index: HashMap<ModuleId, usize>,
}

impl ModuleGraph {
    /// Index `modules` by identity. Declaring two modules with one identity is
    /// a [`Error::DuplicateRegistration`].
    pub fn new(modules: impl IntoIterator<Item = Arc<ModuleDescriptor>>) -> Result<Self> {
        let modules: Vec<_> = modules.into_iter().collect();
        let mut index = HashMap::with_capacity(modules.len());
        for (i, module) in modules.iter().enumerate() {
            if index.insert(module.id().clone(), i).is_some() {
                return Err(Error::duplicate(format!("module '{}'", module.id())));
            }
        }
        Ok(Self { modules, index })
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    pub fn get(&self, id: &ModuleId) -> Option<&Arc<ModuleDescriptor>> {
        self.index.get(id).map(|&i| &self.modules[i])
    }

    /// Order every declared module.
    pub fn resolve(&self) -> Result<Vec<Arc<ModuleDescriptor>>> {
        let adjacency = self.adjacency()?;
        self.order(&adjacency, &vec![true; self.modules.len()])
    }

    /// Order `roots` and everything they transitively require.
    pub fn resolve_from(&self, roots: &[ModuleId]) -> Result<Vec<Arc<ModuleDescriptor>>> {
        let adjacency = self.adjacency()?;
        let mut stack = roots
            .iter()
            .map(|root| {
                self.index
                    .get(root)
                    .copied()
                    .ok_or_else(|| Error::UnknownModule {
                        module: "<application>".to_string(),
                        required: root.to_string(),
                    })
            })
            .collect::<Result<Vec<_>>>()?;

        let mut reachable = vec![false; self.modules.len()];
        while let Some(node) = stack.pop() {
            if !std::mem::replace(&mut reachable[node], true) {
                stack.extend(adjacency[node].iter().copied());
            }
        }
        self.order(&adjacency, &reachable)
    }

    /// `adjacency[i]` lists the modules `i` requires.
    fn adjacency(&self) -> Result<Vec<Vec<usize>>> {
        self.modules
            .iter()
            .map(|module| {
                module
                    .requires()
                    .iter()
                    .map(|required| {
                        self.index
                            .get(required)
                            .copied()
                            .ok_or_else(|| Error::UnknownModule {
                                module: module.id().to_string(),
                                required: required.to_string(),
                            })
                    })
                    .collect()
            })
            .collect()
    }

    fn order(
        &self,
        adjacency: &[Vec<usize>],
        selected: &[bool],
    ) -> Result<Vec<Arc<ModuleDescriptor>>> {
        if let Some(path) = self.find_cycle(adjacency, selected) {
            return Err(Error::CyclicDependency { path });
        }

        // Kahn's algorithm; a min-heap over declaration index breaks ties.
        let mut pending = vec![0usize; self.modules.len()];
        let mut dependents = vec![Vec::new(); self.modules.len()];
        for (node, requires) in adjacency.iter().enumerate() {
            if !selected[node] {
                continue;
            }
            pending[node] = requires.len();
            for &required in requires {
                dependents[required].push(node);
            }
        }

        let mut ready: BinaryHeap<Reverse<usize>> = (0..self.modules.len())
            .filter(|&node| selected[node] && pending[node] == 0)
            .map(Reverse)
            .collect();
        let mut order = Vec::new();
        while let Some(Reverse(node)) = ready.pop() {
            order.push(Arc::clone(&self.modules[node]));
            for &dependent in &dependents[node] {
                pending[dependent] -= 1;
                if pending[dependent] == 0 {
                    ready.push(Reverse(dependent));
                }
            }
        }

        tracing::info!(
            order = ?order.iter().map(|m| m.id().as_str()).collect::<Vec<_>>(),
            "Resolved module construction order"
        );
        Ok(order)
    }

    /// Depth-first search with three colors. Returns the cycle as a path that
    /// starts and ends with the same module.
    fn find_cycle(&self, adjacency: &[Vec<usize>], selected: &[bool]) -> Option<Vec<String>> {
        #[derive(Clone, Copy, PartialEq)]
        enum Color {
            White,
            Gray,
            Black,
        }

        fn visit(
            node: usize,
            adjacency: &[Vec<usize>],
            colors: &mut [Color],
            path: &mut Vec<usize>,
        ) -> Option<Vec<usize>> {
            colors[node] = Color::Gray;
            path.push(node);
            for &next in &adjacency[node] {
                match colors[next] {
                    Color::Gray => {
                        let start = path.iter().position(|&n| n == next)?;
                        let mut cycle = path[start..].to_vec();
                        cycle.push(next);
                        return Some(cycle);
                    }
                    Color::White => {
                        if let Some(cycle) = visit(next, adjacency, colors, path) {
                            return Some(cycle);
                        }
                    }
                    Color::Black => {}
                }
            }
            path.pop();
            colors[node] = Color::Black;
            None
        }

        let mut colors = vec![Color::White; self.modules.len()];
        let mut path = Vec::new();
        (0..self.modules.len())
            .filter(|&node| selected[node])
            .find_map(|node| {
                if colors[node] != Color::White {
                    return None;
                }
                visit(node, adjacency, &mut colors, &mut path)
            })
            .map(|cycle| {
                cycle
                    .into_iter()
                    .map(|node| self.modules[node].id().to_string())
                    .collect()
            })
    }
}

/// Order `modules` so that each one follows everything it requires.
pub fn resolve(modules: &[Arc<ModuleDescriptor>]) -> Result<Vec<Arc<ModuleDescriptor>>> {
    ModuleGraph::new(modules.iter().cloned())?.resolve()
}
