//! Dependency ordering of diff operations.
//!
//! Operations run in fixed phases so that nothing references an object that
//! does not exist yet or still needs an object that is about to disappear:
//! renames first (everything after them uses target names), then drops from
//! the most dependent object outwards, then creations in the opposite
//! direction, and foreign key renames last.

use crate::diff::DiffOperation;

/// Execution phase of an operation; lower runs first.
pub fn phase(op: &DiffOperation) -> u8 {
    use DiffOperation::*;

    match op {
        RenameTable { .. } => 0,
        RenameColumn { .. } => 1,
        DropForeignKey { .. } => 2,
        DropUniqueConstraint { .. } => 3,
        DropPrimaryKey { .. } => 4,
        DropColumn { .. } => 5,
        DropTable { .. } => 6,
        CreateTable { .. } => 7,
        AddColumn { .. } => 8,
        AlterColumnType { .. }
        | AlterColumnNullability { .. }
        | AlterColumnDefault { .. }
        | AlterColumnIdentity { .. } => 9,
        AddPrimaryKey { .. } => 10,
        AddUniqueConstraint { .. } => 11,
        AddForeignKey { .. } => 12,
        RenameForeignKey { .. } => 13,
    }
}

/// Stable-sort operations by phase.
pub fn order_operations(ops: &mut [DiffOperation]) {
    ops.sort_by_key(phase);
}

#[cfg(test)]
mod tests {
    use super::*;
    use tidemark_schema::{Column, ColumnRef, ForeignKey, Table};

    fn fk() -> ForeignKey {
        ForeignKey::new(
            ColumnRef::new("posts", ["author_id"]),
            ColumnRef::new("users", ["id"]),
        )
    }

    #[test]
    fn test_phases_follow_dependencies() {
        let mut ops = vec![
            DiffOperation::AddForeignKey {
                foreign_key: fk(),
                name: "posts_author_id_fkey".into(),
            },
            DiffOperation::CreateTable {
                table: Table::new("users"),
            },
            DiffOperation::DropTable {
                table: Table::new("legacy"),
            },
            DiffOperation::DropForeignKey {
                foreign_key: fk(),
                name: "old".into(),
            },
            DiffOperation::RenameTable {
                from: "a".into(),
                to: "b".into(),
            },
        ];
        order_operations(&mut ops);

        let kinds: Vec<&str> = ops.iter().map(DiffOperation::kind).collect();
        assert_eq!(
            kinds,
            vec![
                "rename table",
                "drop foreign key",
                "drop table",
                "create table",
                "add foreign key"
            ]
        );
    }

    #[test]
    fn test_sort_is_stable_within_phase() {
        let mut ops = vec![
            DiffOperation::AddColumn {
                table: "t".into(),
                column: Column::new("b", "int"),
            },
            DiffOperation::RenameColumn {
                table: "t".into(),
                from: "x".into(),
                to: "y".into(),
            },
            DiffOperation::AddColumn {
                table: "t".into(),
                column: Column::new("a", "int"),
            },
        ];
        order_operations(&mut ops);

        let added: Vec<&str> = ops
            .iter()
            .filter_map(|op| match op {
                DiffOperation::AddColumn { column, .. } => Some(column.name.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(added, vec!["b", "a"]);
        assert!(matches!(ops[0], DiffOperation::RenameColumn { .. }));
    }
}
