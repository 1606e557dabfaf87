/// One visible row: depth below the root, display name, whether it is a folder.
pub type Row<'a> = (usize, &'a str, bool);

/// Build pretty tree-style labels in **O(n)**.
///
/// * `rows` **must** be in display order: each folder's children directly
///   follow it, one level deeper.
pub fn build_tree_labels(rows: &[Row<'_>]) -> Vec<String> {
    let n = rows.len();

    // PASS #1 – walk backwards; a row is last if no sibling follows it
    let mut is_last = vec![false; n];
    let mut sibling_follows: Vec<bool> = Vec::new();
    for (idx, &(depth, _, _)) in rows.iter().enumerate().rev() {
        sibling_follows.resize(depth + 1, false);
        is_last[idx] = !sibling_follows[depth];
        sibling_follows[depth] = true;
    }

    // PASS #2 – scan once, tracking whether each open ancestor was a last child
    let mut ancestor_is_last: Vec<bool> = Vec::new();
    let mut labels = Vec::with_capacity(n);
    for (idx, &(depth, name, is_dir)) in rows.iter().enumerate() {
        ancestor_is_last.truncate(depth);
        let mut prefix = String::new();
        for &last in &ancestor_is_last {
            prefix.push_str(if last { "   " } else { "│  " });
        }
        prefix.push_str(if is_last[idx] { "└─ " } else { "├─ " });

        labels.push(if is_dir {
            format!("{}{}/", prefix, name)
        } else {
            format!("{}{}", prefix, name)
        });
        ancestor_is_last.push(is_last[idx]);
    }
    labels
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn draws_branches_for_nested_rows() {
        let rows = [
            (0, "src", true),
            (1, "lib.rs", false),
            (1, "nested", true),
            (2, "deep.rs", false),
            (0, "main.rs", false),
        ];
        assert_eq!(
            build_tree_labels(&rows),
            vec![
                "├─ src/",
                "│  ├─ lib.rs",
                "│  └─ nested/",
                "│     └─ deep.rs",
                "└─ main.rs",
            ]
        );
    }

    #[test]
    fn empty_input_gives_no_labels() {
        assert!(build_tree_labels(&[]).is_empty());
    }
}
