use std::hash::{DefaultHasher, Hash, Hasher};

use crate::results::ColumnSet;

/// Structural hash of a result's ordered column metadata.
///
/// Deterministic within a process; only compared against fingerprints computed
/// by the same build.
#[must_use]
pub fn fingerprint(columns: &ColumnSet) -> u64 {
    let mut hasher = DefaultHasher::new();
    columns.len().hash(&mut hasher);
    for column in columns.iter() {
        column.name.hash(&mut hasher);
        column.decl_type.hash(&mut hasher);
    }
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::results::ColumnInfo;

    #[test]
    fn equal_layouts_hash_equal() {
        let a = ColumnSet::from_names(["id", "name"]);
        let b = ColumnSet::from_names(["id", "name"]);
        assert_eq!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn order_names_and_types_change_the_hash() {
        let base = fingerprint(&ColumnSet::from_names(["id", "name"]));
        assert_ne!(base, fingerprint(&ColumnSet::from_names(["name", "id"])));
        assert_ne!(base, fingerprint(&ColumnSet::from_names(["id", "title"])));
        assert_ne!(base, fingerprint(&ColumnSet::from_names(["id", "name", "extra"])));
        let typed = ColumnSet::new(vec![
            ColumnInfo::new("id").with_decl_type("INTEGER"),
            ColumnInfo::new("name"),
        ]);
        assert_ne!(base, fingerprint(&typed));
    }
}
