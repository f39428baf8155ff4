//! Dependency ordering of tables.
//!
//! Tables are ordered so that every table comes after the tables it
//! references. Upserts walk the order forward; deletes walk it backwards.
//!
//! The sort is a depth-first walk over parent links, seeded in declaration
//! order. A table reached again while its own parents are still being
//! visited closes a cycle; that edge is skipped, so malformed (cyclic)
//! schemas still produce a total order and the walk always terminates.

use crate::schema::{SyncSet, TableName};
use std::collections::HashMap;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    InProgress,
    Done,
}

/// Returns the indices of `set.tables` in dependency order.
///
/// Relations naming tables outside the set and self references are ignored.
/// The result is a permutation of `0..set.tables.len()`, deterministic for a
/// given set.
pub fn dependency_order(set: &SyncSet) -> Vec<usize> {
    let positions: HashMap<&TableName, usize> = set
        .tables
        .iter()
        .enumerate()
        .map(|(i, t)| (&t.name, i))
        .collect();

    let mut parents: Vec<Vec<usize>> = vec![Vec::new(); set.tables.len()];
    for relation in &set.relations {
        if relation.is_self_reference() {
            continue;
        }
        let (Some(&child), Some(&parent)) = (
            positions.get(&relation.child_table),
            positions.get(&relation.parent_table),
        ) else {
            continue;
        };
        if !parents[child].contains(&parent) {
            parents[child].push(parent);
        }
    }

    let mut marks = vec![Mark::Unvisited; set.tables.len()];
    let mut order = Vec::with_capacity(set.tables.len());
    for i in 0..set.tables.len() {
        visit(i, &parents, &mut marks, &mut order);
    }
    order
}

fn visit(i: usize, parents: &[Vec<usize>], marks: &mut [Mark], order: &mut Vec<usize>) {
    if marks[i] != Mark::Unvisited {
        return;
    }
    marks[i] = Mark::InProgress;
    for &parent in &parents[i] {
        visit(parent, parents, marks, order);
    }
    marks[i] = Mark::Done;
    order.push(i);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{DataType, SyncColumn, SyncRelation, SyncTable};
    use proptest::prelude::*;

    fn table(name: &str) -> SyncTable {
        SyncTable::new(TableName::new(name))
            .with_column(SyncColumn::new("id", DataType::Integer))
            .with_column(SyncColumn::new("ref_id", DataType::Integer))
            .with_primary_keys(["id"])
    }

    fn fk(child: &str, parent: &str) -> SyncRelation {
        SyncRelation::new(
            format!("FK_{child}_{parent}"),
            TableName::new(child),
            ["ref_id"],
            TableName::new(parent),
            ["id"],
        )
    }

    fn names(set: &SyncSet) -> Vec<String> {
        set.upsert_order()
            .into_iter()
            .map(|t| t.name.name.clone())
            .collect()
    }

    #[test]
    fn parents_before_children() {
        let set = SyncSet::new()
            .with_table(table("OrderLine"))
            .with_table(table("Order"))
            .with_table(table("Customer"))
            .with_relation(fk("OrderLine", "Order"))
            .with_relation(fk("Order", "Customer"));

        assert_eq!(names(&set), vec!["Customer", "Order", "OrderLine"]);

        let deletes: Vec<_> = set
            .delete_order()
            .into_iter()
            .map(|t| t.name.name.clone())
            .collect();
        assert_eq!(deletes, vec!["OrderLine", "Order", "Customer"]);
    }

    #[test]
    fn independent_tables_keep_declaration_order() {
        let set = SyncSet::new()
            .with_table(table("B"))
            .with_table(table("A"))
            .with_table(table("C"));
        assert_eq!(names(&set), vec!["B", "A", "C"]);
    }

    #[test]
    fn self_reference_is_ignored() {
        let set = SyncSet::new()
            .with_table(table("Employee"))
            .with_table(table("Department"))
            .with_relation(fk("Employee", "Employee"))
            .with_relation(fk("Employee", "Department"));
        assert_eq!(names(&set), vec!["Department", "Employee"]);
    }

    #[test]
    fn cycle_is_broken_deterministically() {
        let set = SyncSet::new()
            .with_table(table("A"))
            .with_table(table("B"))
            .with_table(table("C"))
            .with_relation(fk("A", "B"))
            .with_relation(fk("B", "C"))
            .with_relation(fk("C", "A"));

        let first = names(&set);
        assert_eq!(first.len(), 3);
        assert_eq!(first, names(&set));
        assert_eq!(first, vec!["C", "B", "A"]);
    }

    #[test]
    fn unknown_tables_in_relations_are_ignored() {
        let set = SyncSet::new()
            .with_table(table("A"))
            .with_relation(fk("A", "Missing"));
        assert_eq!(names(&set), vec!["A"]);
    }

    fn build_set(n: usize, edges: &[(usize, usize)]) -> SyncSet {
        let mut set = SyncSet::new();
        for i in 0..n {
            set = set.with_table(table(&format!("T{i}")));
        }
        for &(child, parent) in edges {
            set = set.with_relation(fk(&format!("T{child}"), &format!("T{parent}")));
        }
        set
    }

    proptest! {
        #[test]
        fn any_graph_yields_a_permutation(
            n in 1usize..16,
            raw in prop::collection::vec((0usize..16, 0usize..16), 0..40),
        ) {
            let edges: Vec<_> = raw.into_iter().map(|(a, b)| (a % n, b % n)).collect();
            let set = build_set(n, &edges);

            let mut order = dependency_order(&set);
            prop_assert_eq!(order.len(), n);
            order.sort_unstable();
            prop_assert_eq!(order, (0..n).collect::<Vec<_>>());
        }

        #[test]
        fn acyclic_graph_orders_parents_first(
            n in 2usize..16,
            raw in prop::collection::vec((0usize..16, 0usize..16), 0..40),
        ) {
            // Parents always have a higher index than their children, so the
            // graph is acyclic and declaration order is the worst case.
            let edges: Vec<_> = raw
                .into_iter()
                .map(|(a, b)| (a % n, b % n))
                .filter(|(a, b)| a != b)
                .map(|(a, b)| (a.min(b), a.max(b)))
                .collect();
            let set = build_set(n, &edges);

            let order = dependency_order(&set);
            let mut position = vec![0usize; n];
            for (pos, &table) in order.iter().enumerate() {
                position[table] = pos;
            }
            for &(child, parent) in &edges {
                prop_assert!(position[parent] < position[child]);
            }
        }
    }
}
