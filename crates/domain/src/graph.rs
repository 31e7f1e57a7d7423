//! 任务依赖图
//!
//! 当任务 T1 的某个输出是任务 T2 的输入时存在边 T1 -> T2。
//! 使用 Kahn 拓扑排序，入度为零的任务中按声明顺序优先。

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};

use datapipe_core::{DataPipeError, DataPipeResult};

use crate::task::Task;

#[derive(Debug, Clone)]
pub struct TaskGraph {
    ids: Vec<String>,
    /// 每个任务的直接下游（按下标）
    edges: Vec<Vec<usize>>,
}

impl TaskGraph {
    /// 由 (任务ID, 输入, 输出) 三元组构建依赖图，顺序即声明顺序
    pub fn build<I, S>(nodes: I) -> Self
    where
        I: IntoIterator<Item = (String, Vec<S>, Vec<S>)>,
        S: AsRef<str>,
    {
        let mut ids = Vec::new();
        let mut inputs: Vec<Vec<String>> = Vec::new();
        let mut producers: HashMap<String, Vec<usize>> = HashMap::new();

        for (index, (id, ins, outs)) in nodes.into_iter().enumerate() {
            ids.push(id);
            inputs.push(ins.iter().map(|s| s.as_ref().to_string()).collect());
            for out in outs {
                producers.entry(out.as_ref().to_string()).or_default().push(index);
            }
        }

        let mut edges = vec![Vec::new(); ids.len()];
        for (consumer, ins) in inputs.iter().enumerate() {
            for input in ins {
                for &producer in producers.get(input).into_iter().flatten() {
                    if !edges[producer].contains(&consumer) {
                        edges[producer].push(consumer);
                    }
                }
            }
        }

        Self { ids, edges }
    }

    pub fn from_tasks(tasks: &[Task]) -> Self {
        Self::build(tasks.iter().map(|t| {
            (
                t.id.to_string(),
                t.input_ids.iter().map(|i| i.to_string()).collect::<Vec<_>>(),
                t.output_ids.iter().map(|o| o.to_string()).collect::<Vec<_>>(),
            )
        }))
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// 拓扑序（下标），存在环时返回 [`DataPipeError::CircularDependency`]
    pub fn topological_order(&self) -> DataPipeResult<Vec<usize>> {
        let mut in_degree = vec![0usize; self.ids.len()];
        for targets in &self.edges {
            for &target in targets {
                in_degree[target] += 1;
            }
        }

        let mut ready: BinaryHeap<Reverse<usize>> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, &degree)| degree == 0)
            .map(|(index, _)| Reverse(index))
            .collect();

        let mut order = Vec::with_capacity(self.ids.len());
        while let Some(Reverse(node)) = ready.pop() {
            order.push(node);
            for &target in &self.edges[node] {
                in_degree[target] -= 1;
                if in_degree[target] == 0 {
                    ready.push(Reverse(target));
                }
            }
        }

        if order.len() < self.ids.len() {
            let task_ids = in_degree
                .iter()
                .enumerate()
                .filter(|(_, &degree)| degree > 0)
                .map(|(index, _)| self.ids[index].clone())
                .collect();
            return Err(DataPipeError::CircularDependency { task_ids });
        }
        Ok(order)
    }

    /// 传递下游（不含自身），按声明顺序
    pub fn dependents_of(&self, index: usize) -> Vec<usize> {
        let mut visited = HashSet::new();
        let mut queue: VecDeque<usize> = self.edges.get(index).cloned().unwrap_or_default().into();
        while let Some(current) = queue.pop_front() {
            if current == index || !visited.insert(current) {
                continue;
            }
            queue.extend(self.edges[current].iter().copied());
        }
        let mut result: Vec<usize> = visited.into_iter().collect();
        result.sort_unstable();
        result
    }

    pub fn id(&self, index: usize) -> &str {
        &self.ids[index]
    }
}

/// 按依赖顺序排列任务
pub fn order_tasks(tasks: &[Task]) -> DataPipeResult<Vec<Task>> {
    let order = TaskGraph::from_tasks(tasks).topological_order()?;
    Ok(order.into_iter().map(|index| tasks[index].clone()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str, ins: &[&str], outs: &[&str]) -> (String, Vec<String>, Vec<String>) {
        (
            id.to_string(),
            ins.iter().map(|s| s.to_string()).collect(),
            outs.iter().map(|s| s.to_string()).collect(),
        )
    }

    #[test]
    fn test_order_respects_dependencies_and_declaration() {
        // 声明顺序故意与依赖顺序相反
        let graph = TaskGraph::build(vec![
            node("b_c", &["b"], &["c"]),
            node("x_y", &["x"], &["y"]),
            node("a_b", &["a"], &["b"]),
            node("b_d", &["b"], &["d"]),
        ]);
        let order: Vec<&str> = graph
            .topological_order()
            .unwrap()
            .into_iter()
            .map(|i| graph.id(i))
            .collect();
        assert_eq!(order, vec!["x_y", "a_b", "b_c", "b_d"]);
    }

    #[test]
    fn test_cycle_is_rejected() {
        let graph = TaskGraph::build(vec![
            node("t1", &["a"], &["b"]),
            node("t2", &["b"], &["c"]),
            node("t3", &["c"], &["a"]),
            node("t4", &["z"], &["w"]),
        ]);
        match graph.topological_order() {
            Err(DataPipeError::CircularDependency { task_ids }) => {
                assert_eq!(task_ids, vec!["t1", "t2", "t3"]);
            }
            other => panic!("expected circular dependency, got {other:?}"),
        }
    }

    #[test]
    fn test_transitive_dependents() {
        let graph = TaskGraph::build(vec![
            node("a_b", &["a"], &["b"]),
            node("b_c", &["b"], &["c"]),
            node("c_d", &["c"], &["d"]),
            node("x_y", &["x"], &["y"]),
        ]);
        assert_eq!(graph.dependents_of(0), vec![1, 2]);
        assert!(graph.dependents_of(3).is_empty());
    }
}
