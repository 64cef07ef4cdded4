//! Grafo dirigido acíclico de stages.
//!
//! - `add_stage` sólo rechaza nombres duplicados; las dependencias pueden
//!   declararse antes que el stage al que apuntan.
//! - `topological_order` valida referencias y ciclos y devuelve un orden
//!   determinista: algoritmo de Kahn con desempate por nombre.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use indexmap::IndexMap;

use crate::errors::DagError;
use crate::stage::StageSpec;

#[derive(Debug, Clone, Default)]
pub struct Dag {
    stages: IndexMap<String, StageSpec>,
    dependents: HashMap<String, BTreeSet<String>>,
}

impl Dag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_stage(&mut self, spec: StageSpec) -> Result<(), DagError> {
        if self.stages.contains_key(&spec.name) {
            return Err(DagError::DuplicateStage(spec.name));
        }
        for dep in &spec.dependencies {
            self.dependents.entry(dep.clone()).or_default().insert(spec.name.clone());
        }
        self.stages.insert(spec.name.clone(), spec);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&StageSpec> {
        self.stages.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.stages.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Nombres en orden de inserción.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.stages.keys().map(String::as_str)
    }

    fn require(&self, name: &str) -> Result<&StageSpec, DagError> {
        self.stages.get(name).ok_or_else(|| DagError::UnknownStage(name.to_string()))
    }

    pub fn dependencies_of(&self, name: &str) -> Result<&BTreeSet<String>, DagError> {
        Ok(&self.require(name)?.dependencies)
    }

    pub fn dependents_of(&self, name: &str) -> Result<BTreeSet<String>, DagError> {
        self.require(name)?;
        Ok(self.dependents.get(name).cloned().unwrap_or_default())
    }

    /// Comprueba que toda dependencia apunte a un stage existente.
    pub fn validate(&self) -> Result<(), DagError> {
        for spec in self.stages.values() {
            if let Some(missing) = spec.dependencies.iter().find(|d| !self.stages.contains_key(*d)) {
                return Err(DagError::UnknownDependency { stage: spec.name.clone(),
                                                         dependency: missing.clone() });
            }
        }
        Ok(())
    }

    pub fn topological_order(&self) -> Result<Vec<String>, DagError> {
        self.validate()?;
        let mut in_degree: BTreeMap<&str, usize> =
            self.stages.values().map(|s| (s.name.as_str(), s.dependencies.len())).collect();
        let mut ready: BTreeSet<&str> = in_degree.iter().filter(|(_, d)| **d == 0).map(|(n, _)| *n).collect();
        let mut order = Vec::with_capacity(self.stages.len());

        while let Some(name) = ready.pop_first() {
            order.push(name.to_string());
            if let Some(children) = self.dependents.get(name) {
                for child in children {
                    if let Some(d) = in_degree.get_mut(child.as_str()) {
                        *d -= 1;
                        if *d == 0 {
                            ready.insert(child.as_str());
                        }
                    }
                }
            }
        }

        if order.len() < self.stages.len() {
            let remaining: BTreeSet<&str> = in_degree.into_iter().filter(|(_, d)| *d > 0).map(|(n, _)| n).collect();
            return Err(DagError::Cycle { cycle: self.find_cycle(&remaining) });
        }
        Ok(order)
    }

    /// Camino cerrado dentro de los nodos no procesados por Kahn. Todo nodo
    /// restante tiene al menos una dependencia restante, así que seguir esas
    /// aristas termina repitiendo un nodo.
    fn find_cycle(&self, remaining: &BTreeSet<&str>) -> Vec<String> {
        let Some(&start) = remaining.first() else {
            return Vec::new();
        };
        let mut path: Vec<&str> = vec![start];
        let mut position: HashMap<&str, usize> = HashMap::from([(start, 0)]);
        let mut current = start;
        loop {
            let next = self.stages
                           .get(current)
                           .and_then(|s| s.dependencies.iter().find(|d| remaining.contains(d.as_str())));
            let Some(next) = next.map(String::as_str) else {
                return path.iter().map(|s| s.to_string()).collect();
            };
            if let Some(&at) = position.get(next) {
                // path[at..] sigue aristas "depende de"; se invierte para leerlo como flujo de datos.
                let mut cycle: Vec<String> = path[at..].iter().rev().map(|s| s.to_string()).collect();
                cycle.insert(0, next.to_string());
                return cycle;
            }
            position.insert(next, path.len());
            path.push(next);
            current = next;
        }
    }

    /// `start` y todos sus descendientes, en orden topológico.
    pub fn subgraph_from(&self, start: &str) -> Result<Vec<String>, DagError> {
        self.require(start)?;
        let mut reachable: BTreeSet<&str> = BTreeSet::from([start]);
        let mut frontier = vec![start];
        while let Some(name) = frontier.pop() {
            if let Some(children) = self.dependents.get(name) {
                for child in children {
                    if reachable.insert(child.as_str()) {
                        frontier.push(child.as_str());
                    }
                }
            }
        }
        Ok(self.topological_order()?
               .into_iter()
               .filter(|n| reachable.contains(n.as_str()))
               .collect())
    }

    /// Orden topológico completo menos `excluded`.
    pub fn subgraph_excluding<S: AsRef<str>>(&self, excluded: &[S]) -> Result<Vec<String>, DagError> {
        let mut skip = BTreeSet::new();
        for name in excluded {
            skip.insert(self.require(name.as_ref())?.name.as_str());
        }
        Ok(self.topological_order()?
               .into_iter()
               .filter(|n| !skip.contains(n.as_str()))
               .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::StageError;
    use crate::model::ExecutionContext;
    use crate::stage::{Stage, StageKind, StageResult};

    #[derive(Debug)]
    struct Noop;

    impl Stage for Noop {
        fn kind(&self) -> StageKind {
            StageKind::Custom
        }
        fn code_version(&self) -> &str {
            "noop-1"
        }
        fn run(&self, _ctx: &ExecutionContext) -> Result<StageResult, StageError> {
            Err(StageError::msg("not runnable"))
        }
    }

    /// `("c", "a b")` declara `c` dependiente de `a` y `b`.
    fn dag(edges: &[(&str, &str)]) -> Dag {
        let mut d = Dag::new();
        for (name, deps) in edges {
            d.add_stage(StageSpec::new(*name, Noop).with_dependencies(deps.split_whitespace())).unwrap();
        }
        d
    }

    #[test]
    fn ties_are_broken_by_name() {
        let d = dag(&[("zeta", ""), ("alpha", ""), ("mid", "zeta alpha")]);
        assert_eq!(d.topological_order().unwrap(), vec!["alpha", "zeta", "mid"]);
    }

    #[test]
    fn order_is_independent_of_insertion_order() {
        let a = dag(&[("ingest", ""), ("normalize", "ingest"), ("validate", "normalize"), ("b", "")]);
        let b = dag(&[("validate", "normalize"), ("b", ""), ("normalize", "ingest"), ("ingest", "")]);
        assert_eq!(a.topological_order().unwrap(), b.topological_order().unwrap());
    }

    #[test]
    fn dependencies_precede_dependents() {
        let d = dag(&[("d", "b c"), ("b", "a"), ("c", "a"), ("a", "")]);
        let order = d.topological_order().unwrap();
        let pos = |n: &str| order.iter().position(|x| x == n).unwrap();
        for (name, deps) in [("b", vec!["a"]), ("c", vec!["a"]), ("d", vec!["b", "c"])] {
            for dep in deps {
                assert!(pos(dep) < pos(name), "{dep} must precede {name}");
            }
        }
    }

    #[test]
    fn cycle_is_named() {
        let d = dag(&[("a", "c"), ("b", "a"), ("c", "b"), ("x", "")]);
        match d.topological_order() {
            Err(DagError::Cycle { cycle }) => {
                assert_eq!(cycle.first(), cycle.last());
                let members: BTreeSet<&str> = cycle.iter().map(String::as_str).collect();
                assert_eq!(members, BTreeSet::from(["a", "b", "c"]));
            }
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn self_dependency_is_a_cycle() {
        let d = dag(&[("a", "a")]);
        assert_eq!(d.topological_order(), Err(DagError::Cycle { cycle: vec!["a".into(), "a".into()] }));
    }

    #[test]
    fn duplicate_and_unknown_references_are_rejected() {
        let mut d = dag(&[("a", "")]);
        assert_eq!(d.add_stage(StageSpec::new("a", Noop)), Err(DagError::DuplicateStage("a".into())));

        d.add_stage(StageSpec::new("b", Noop).depends_on("ghost")).unwrap();
        assert_eq!(d.topological_order(),
                   Err(DagError::UnknownDependency { stage: "b".into(),
                                                     dependency: "ghost".into() }));
        assert!(matches!(d.dependents_of("nope"), Err(DagError::UnknownStage(_))));
    }

    #[test]
    fn subgraph_from_includes_all_descendants() {
        let d = dag(&[("ingest", ""),
                      ("normalize", "ingest"),
                      ("validate", "normalize"),
                      ("side", "ingest"),
                      ("other", "")]);
        assert_eq!(d.subgraph_from("normalize").unwrap(), vec!["normalize", "validate"]);
        assert_eq!(d.subgraph_from("ingest").unwrap(), vec!["ingest", "normalize", "side", "validate"]);
        assert_eq!(d.subgraph_excluding(&["ingest", "other"]).unwrap(), vec!["normalize", "side", "validate"]);
        assert!(d.subgraph_excluding(&["nope"]).is_err());
    }

    #[test]
    fn dependents_and_dependencies() {
        let d = dag(&[("a", ""), ("b", "a"), ("c", "a")]);
        assert_eq!(d.dependents_of("a").unwrap(), BTreeSet::from(["b".to_string(), "c".to_string()]));
        assert!(d.dependents_of("b").unwrap().is_empty());
        assert_eq!(d.dependencies_of("b").unwrap(), &BTreeSet::from(["a".to_string()]));
    }
}
