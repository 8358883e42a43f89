use good_lp::{
    constraint::{self, Constraint},
    default_solver, variable, Expression, ProblemVariables, ResolutionError, Solution,
    SolverModel, Variable,
};
use serde::Serialize;
use std::collections::BTreeSet;
use thiserror::Error;

use crate::models::Catalog;
use crate::services::compiler::{CompiledCriterion, CriterionKind, HardRule};

/// Error types for the sequential solver
#[derive(Debug, Error)]
pub enum SolverError {
    #[error("Criterion references column {index}, schema has {columns} columns")]
    ColumnOutOfRange { index: usize, columns: usize },

    #[error("Solver failed: {0}")]
    Backend(String),
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SelectionStatus {
    /// Every requested rank was filled
    Complete,
    /// The hard constraints ran out of feasible items before K ranks
    Partial,
    /// Nothing to choose from; no solve was attempted
    EmptyCatalog,
}

impl std::fmt::Display for SelectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SelectionStatus::Complete => write!(f, "complete"),
            SelectionStatus::Partial => write!(f, "partial"),
            SelectionStatus::EmptyCatalog => write!(f, "empty_catalog"),
        }
    }
}

/// One ranked pick
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SelectedItem {
    pub rank: usize,
    pub index: usize,
    pub name: String,
    /// Objective value of this item alone
    pub score: f64,
}

/// Ordered, duplicate-free recommendation list
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SelectionResult {
    pub items: Vec<SelectedItem>,
    pub requested: usize,
    pub status: SelectionStatus,
    pub unfilled_ranks: usize,
}

impl SelectionResult {
    pub fn is_infeasible(&self) -> bool {
        self.status == SelectionStatus::Partial
    }

    pub fn names(&self) -> Vec<&str> {
        self.items.iter().map(|i| i.name.as_str()).collect()
    }
}

/// Builds a top-K list by solving one single-item program per rank
///
/// Each rank is a fresh 0/1 program: exactly one item selected, every
/// previously chosen item fixed to zero, the compiled constraints applied,
/// and the soft objective maximised. Solving rank by rank makes each pick
/// the best feasible choice given the ranks above it.
pub struct SequentialSolver<'a> {
    catalog: &'a Catalog,
    criteria: &'a [CompiledCriterion],
}

impl<'a> SequentialSolver<'a> {
    /// Creates a solver, rejecting criteria that index outside the schema
    pub fn new(catalog: &'a Catalog, criteria: &'a [CompiledCriterion]) -> Result<Self, SolverError> {
        let columns = catalog.schema().len();
        if let Some(bad) = criteria.iter().find(|c| c.feature_index >= columns) {
            return Err(SolverError::ColumnOutOfRange {
                index: bad.feature_index,
                columns,
            });
        }

        Ok(Self { catalog, criteria })
    }

    /// Selects up to `k` distinct items in rank order
    pub fn select(&self, k: usize) -> Result<SelectionResult, SolverError> {
        if self.catalog.is_empty() {
            tracing::info!(requested = k, "Empty catalog, skipping solve");
            return Ok(SelectionResult {
                items: Vec::new(),
                requested: k,
                status: SelectionStatus::EmptyCatalog,
                unfilled_ranks: k,
            });
        }

        let mut items = Vec::with_capacity(k);
        // Ordered set keeps the constraint order, and so the tie-breaking, stable
        let mut excluded = BTreeSet::new();

        for rank in 1..=k {
            match self.solve_rank(&excluded)? {
                Some(index) => {
                    let item = &self.catalog.items()[index];
                    tracing::debug!(rank, item = %item.name, "Selected item");
                    items.push(SelectedItem {
                        rank,
                        index,
                        name: item.name.clone(),
                        score: self.score(index),
                    });
                    excluded.insert(index);
                }
                None => {
                    tracing::info!(
                        rank,
                        requested = k,
                        "No feasible item for rank, stopping early"
                    );
                    break;
                }
            }
        }

        let unfilled_ranks = k - items.len();
        let status = if unfilled_ranks == 0 {
            SelectionStatus::Complete
        } else {
            SelectionStatus::Partial
        };

        Ok(SelectionResult {
            items,
            requested: k,
            status,
            unfilled_ranks,
        })
    }

    /// Solves one rank; `None` when no item satisfies the constraints
    fn solve_rank(&self, excluded: &BTreeSet<usize>) -> Result<Option<usize>, SolverError> {
        let items = self.catalog.items();
        if excluded.len() >= items.len() {
            return Ok(None);
        }

        let mut vars = ProblemVariables::new();

        // Create binary variables for each item (0 = not selected, 1 = selected)
        let decision: Vec<Variable> = items.iter().map(|_| vars.add(variable().binary())).collect();

        let mut constraints: Vec<Constraint> = Vec::new();

        // Constraint: exactly one item is selected
        let mut selected = Expression::from(0);
        for &x in &decision {
            selected = selected + x;
        }
        constraints.push(constraint::eq(selected, 1));

        // Constraint: items picked at higher ranks stay out
        for &i in excluded {
            constraints.push(constraint::eq(decision[i], 0));
        }

        for criterion in self.criteria {
            let column = criterion.feature_index;
            match criterion.kind {
                CriterionKind::Constraint(HardRule::Required) => {
                    // Per-item implication: x_i may be 1 only if the item has the feature
                    for (i, item) in items.iter().enumerate() {
                        let allowed = if item.value(column) != 0.0 { 1.0 } else { 0.0 };
                        constraints.push(constraint::leq(decision[i], allowed));
                    }
                }
                CriterionKind::Constraint(HardRule::Excluded) => {
                    // Fixed per item so tiny normalized values still count as present
                    for (i, item) in items.iter().enumerate() {
                        if item.value(column) != 0.0 {
                            constraints.push(constraint::eq(decision[i], 0));
                        }
                    }
                }
                CriterionKind::ObjectiveTerm => {}
            }
        }

        let mut objective = Expression::from(0);
        for (i, &x) in decision.iter().enumerate() {
            let coefficient = self.score(i);
            if coefficient != 0.0 {
                objective = objective + coefficient * x;
            }
        }

        let mut problem = vars.maximise(objective).using(default_solver);
        for constraint in constraints {
            problem = problem.with(constraint);
        }

        match problem.solve() {
            // Binary variables might be slightly off from 1.0 due to floating point
            Ok(solution) => Ok(decision.iter().position(|&x| solution.value(x) > 0.5)),
            Err(ResolutionError::Infeasible) => Ok(None),
            Err(e) => Err(SolverError::Backend(e.to_string())),
        }
    }

    /// Sum of the soft terms for a single item
    fn score(&self, index: usize) -> f64 {
        let item = &self.catalog.items()[index];
        self.criteria
            .iter()
            .filter(|c| c.kind == CriterionKind::ObjectiveTerm)
            .map(|c| c.weight * item.value(c.feature_index))
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FeatureColumn, Item};
    use std::collections::HashSet;

    fn beef_catalog() -> Catalog {
        Catalog::from_rows(
            vec![
                FeatureColumn::indicator("has_beef"),
                FeatureColumn::continuous("price"),
            ],
            vec![
                Item::new("A", vec![1.0, 0.2]),
                Item::new("B", vec![0.0, 0.5]),
                Item::new("C", vec![1.0, 0.8]),
            ],
        )
        .unwrap()
    }

    fn pork_catalog() -> Catalog {
        Catalog::from_rows(
            vec![
                FeatureColumn::indicator("has_pork"),
                FeatureColumn::indicator("is_spicy"),
            ],
            vec![
                Item::new("A", vec![0.0, 1.0]),
                Item::new("B", vec![0.0, 0.0]),
                Item::new("C", vec![0.0, 1.0]),
                Item::new("D", vec![1.0, 1.0]),
            ],
        )
        .unwrap()
    }

    fn run(catalog: &Catalog, criteria: &[CompiledCriterion], k: usize) -> SelectionResult {
        SequentialSolver::new(catalog, criteria).unwrap().select(k).unwrap()
    }

    fn assert_distinct(result: &SelectionResult) {
        let unique: HashSet<usize> = result.items.iter().map(|i| i.index).collect();
        assert_eq!(unique.len(), result.items.len());
    }

    #[test]
    fn test_soft_like_prefers_items_with_feature() {
        let catalog = beef_catalog();
        let criteria = vec![CompiledCriterion::objective(0, 1.0)];

        let result = run(&catalog, &criteria, 2);

        assert_eq!(result.status, SelectionStatus::Complete);
        let names: HashSet<&str> = result.names().into_iter().collect();
        assert_eq!(names, HashSet::from(["A", "C"]));
        assert_distinct(&result);
    }

    #[test]
    fn test_ranks_follow_objective() {
        let catalog = beef_catalog();

        let likes_price = vec![CompiledCriterion::objective(1, 1.0)];
        assert_eq!(run(&catalog, &likes_price, 3).names(), vec!["C", "B", "A"]);

        let dislikes_price = vec![CompiledCriterion::objective(1, -1.0)];
        assert_eq!(run(&catalog, &dislikes_price, 3).names(), vec!["A", "B", "C"]);
    }

    #[test]
    fn test_scores_reported_per_item() {
        let catalog = beef_catalog();
        let criteria = vec![
            CompiledCriterion::objective(0, 2.0),
            CompiledCriterion::objective(1, -1.0),
        ];

        let result = run(&catalog, &criteria, 1);
        assert_eq!(result.names(), vec!["A"]);
        assert!((result.items[0].score - 1.8).abs() < 1e-9);
        assert_eq!(result.items[0].rank, 1);
    }

    #[test]
    fn test_excluded_feature_never_selected() {
        let catalog = pork_catalog();
        // A large soft weight on the excluded column must not pull D back in
        let criteria = vec![
            CompiledCriterion::excluded(0),
            CompiledCriterion::objective(0, 10.0),
            CompiledCriterion::objective(1, 1.0),
        ];

        for k in 1..=4 {
            let result = run(&catalog, &criteria, k);
            assert!(!result.names().contains(&"D"), "D selected with k={}", k);
            assert_distinct(&result);
        }

        let result = run(&catalog, &criteria, 4);
        assert_eq!(result.items.len(), 3);
        assert_eq!(result.status, SelectionStatus::Partial);
        assert_eq!(result.unfilled_ranks, 1);
    }

    #[test]
    fn test_excluded_feature_with_tiny_normalized_value() {
        // Wide range: B scales to 1e-15, still non-zero
        let catalog = Catalog::from_json(
            r#"[
                {"name": "A", "features": {"sodium": 0}},
                {"name": "B", "features": {"sodium": 1}},
                {"name": "C", "features": {"sodium": 1e15}}
            ]"#,
            None,
        )
        .unwrap();
        assert!(catalog.items()[1].value(0) > 0.0);

        let criteria = vec![CompiledCriterion::excluded(0), CompiledCriterion::objective(0, 1.0)];
        let result = run(&catalog, &criteria, 3);

        assert_eq!(result.names(), vec!["A"]);
        assert_eq!(result.status, SelectionStatus::Partial);
        assert_eq!(result.unfilled_ranks, 2);
        for item in &result.items {
            assert_eq!(catalog.items()[item.index].value(0), 0.0);
        }
    }

    #[test]
    fn test_required_feature_on_every_result() {
        let catalog = pork_catalog();
        let criteria = vec![CompiledCriterion::required(1)];

        let result = run(&catalog, &criteria, 4);
        assert_eq!(result.items.len(), 3);
        for item in &result.items {
            assert_ne!(catalog.items()[item.index].value(1), 0.0);
        }
    }

    #[test]
    fn test_partial_when_constraints_run_out() {
        let catalog = beef_catalog();
        let criteria = vec![CompiledCriterion::required(0)];

        let result = run(&catalog, &criteria, 5);
        assert_eq!(result.items.len(), 2);
        assert!(result.is_infeasible());
        assert_eq!(result.unfilled_ranks, 3);
        assert_eq!(result.requested, 5);
    }

    #[test]
    fn test_contradictory_constraints_yield_empty_result() {
        let catalog = beef_catalog();
        let criteria = vec![CompiledCriterion::required(0), CompiledCriterion::excluded(0)];

        let result = run(&catalog, &criteria, 3);
        assert!(result.items.is_empty());
        assert_eq!(result.status, SelectionStatus::Partial);
        assert_eq!(result.unfilled_ranks, 3);
    }

    #[test]
    fn test_empty_catalog_returns_immediately() {
        let catalog = Catalog::default();
        let result = run(&catalog, &[], 3);
        assert!(result.items.is_empty());
        assert_eq!(result.status, SelectionStatus::EmptyCatalog);
    }

    #[test]
    fn test_zero_k_is_complete() {
        let catalog = beef_catalog();
        let result = run(&catalog, &[], 0);
        assert!(result.items.is_empty());
        assert_eq!(result.status, SelectionStatus::Complete);
    }

    #[test]
    fn test_k_larger_than_catalog() {
        let catalog = beef_catalog();
        let result = run(&catalog, &[], 10);
        assert_eq!(result.items.len(), 3);
        assert_eq!(result.unfilled_ranks, 7);
        assert_distinct(&result);
    }

    #[test]
    fn test_repeated_runs_are_deterministic() {
        let catalog = beef_catalog();
        let criteria = vec![CompiledCriterion::objective(0, 1.0)];

        let first = run(&catalog, &criteria, 3);
        for _ in 0..5 {
            assert_eq!(run(&catalog, &criteria, 3), first);
        }
    }

    #[test]
    fn test_larger_k_keeps_prefix() {
        let catalog = pork_catalog();
        let criteria = vec![CompiledCriterion::objective(1, 1.0)];

        let short = run(&catalog, &criteria, 2);
        let long = run(&catalog, &criteria, 4);
        assert_eq!(short.items[..], long.items[..2]);
    }

    #[test]
    fn test_rejects_out_of_range_column() {
        let catalog = beef_catalog();
        let criteria = vec![CompiledCriterion::required(7)];
        let err = SequentialSolver::new(&catalog, &criteria).err().unwrap();
        assert!(matches!(err, SolverError::ColumnOutOfRange { index: 7, columns: 2 }));
    }
}
