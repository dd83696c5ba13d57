//! Newick reading and writing.
//!
//! Parsing is delegated to `phylotree`, whose node arena is then copied into
//! the crate's own [`Tree`]. Writing is done here so that internal support
//! labels, label quoting and branch-length precision are under our control.

use crate::error::{PhyloError, Result};
use crate::tree::{NodeId, Tree};
use phylotree::tree::{Tree as PhyloTree, TreeError};

/// Decimal places kept for branch lengths in written trees.
const LENGTH_PRECISION: usize = 6;

fn tree_err(e: TreeError) -> PhyloError {
    PhyloError::Parse(e.to_string())
}

/// Parse one Newick tree. A missing trailing `;` is tolerated.
///
/// # Errors
/// [`PhyloError::Parse`] for empty or malformed input.
pub fn parse_newick(text: &str) -> Result<Tree> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(PhyloError::Parse("empty Newick string".into()));
    }
    check_parentheses(trimmed)?;
    let owned = if trimmed.ends_with(';') {
        trimmed.to_string()
    } else {
        format!("{trimmed};")
    };
    let parsed = PhyloTree::from_newick(&owned)
        .map_err(|e| PhyloError::Parse(format!("invalid Newick '{}': {e}", abbreviate(trimmed))))?;
    let tree = from_phylotree(&parsed)?;
    if tree.num_leaves() < 2 {
        return Err(PhyloError::Parse(format!(
            "Newick '{}' has fewer than two leaves",
            abbreviate(trimmed)
        )));
    }
    Ok(tree)
}

/// Copy a `phylotree` tree into the crate's arena, preserving child order.
pub fn from_phylotree(src: &PhyloTree) -> Result<Tree> {
    let src_root = src.get_root().map_err(tree_err)?;
    let mut tree = Tree::new();
    let root = tree.root();
    tree.node_mut(root).name = clean_label(src.get(&src_root).map_err(tree_err)?.name.as_deref());

    let mut stack: Vec<(usize, NodeId)> = vec![(src_root, root)];
    while let Some((src_id, dst_id)) = stack.pop() {
        let node = src.get(&src_id).map_err(tree_err)?;
        for &child_id in &node.children {
            let child = src.get(&child_id).map_err(tree_err)?;
            let id = tree.add_child(dst_id, clean_label(child.name.as_deref()), child.parent_edge);
            stack.push((child_id, id));
        }
    }
    Ok(tree)
}

/// Reject unbalanced parentheses before handing the text to the parser.
fn check_parentheses(text: &str) -> Result<()> {
    let mut depth = 0i64;
    let mut quoted = false;
    for ch in text.chars() {
        match ch {
            '\'' => quoted = !quoted,
            '(' if !quoted => depth += 1,
            ')' if !quoted => {
                depth -= 1;
                if depth < 0 {
                    return Err(PhyloError::Parse(format!("unbalanced ')' in '{}'", abbreviate(text))));
                }
            }
            _ => {}
        }
    }
    if depth != 0 || quoted {
        return Err(PhyloError::Parse(format!("unbalanced Newick '{}'", abbreviate(text))));
    }
    Ok(())
}

fn clean_label(raw: Option<&str>) -> Option<String> {
    let s = raw?.trim();
    let s = s
        .strip_prefix('\'')
        .and_then(|t| t.strip_suffix('\''))
        .map(|t| t.replace("''", "'"))
        .unwrap_or_else(|| s.to_string());
    if s.is_empty() { None } else { Some(s) }
}

fn abbreviate(s: &str) -> String {
    const MAX: usize = 40;
    if s.chars().count() <= MAX {
        s.to_string()
    } else {
        format!("{}...", s.chars().take(MAX).collect::<String>())
    }
}

/// Serialise a tree to Newick, ending with `;`.
///
/// ```
/// # use phylo_engine::newick::{parse_newick, to_newick};
/// let t = parse_newick("((A:0.1,B:0.2):0.05,C:0.3,D:0.4);").unwrap();
/// assert_eq!(to_newick(&t), "((A:0.1,B:0.2):0.05,C:0.3,D:0.4);");
/// ```
pub fn to_newick(tree: &Tree) -> String {
    let mut out = String::new();
    write_node(tree, tree.root(), &mut out);
    out.push(';');
    out
}

fn write_node(tree: &Tree, id: NodeId, out: &mut String) {
    let node = tree.node(id);
    if !node.children.is_empty() {
        out.push('(');
        for (k, &child) in node.children.iter().enumerate() {
            if k > 0 {
                out.push(',');
            }
            write_node(tree, child, out);
        }
        out.push(')');
    }
    if let Some(name) = &node.name {
        out.push_str(&quote_label(name));
    }
    if id != tree.root() {
        if let Some(len) = node.branch_length {
            out.push(':');
            out.push_str(&format_length(len));
        }
    }
}

/// Quote a label when it contains Newick metacharacters.
pub fn quote_label(name: &str) -> String {
    const SPECIAL: &[char] = &['(', ')', '[', ']', ':', ';', ',', '\'', ' ', '\t'];
    if name.contains(SPECIAL) {
        format!("'{}'", name.replace('\'', "''"))
    } else {
        name.to_string()
    }
}

/// Fixed precision with trailing zeros trimmed: `0.100000` becomes `0.1`.
pub fn format_length(len: f64) -> String {
    let s = format!("{len:.LENGTH_PRECISION$}");
    let s = s.trim_end_matches('0').trim_end_matches('.');
    if s.is_empty() || s == "-" { "0".to_string() } else { s.to_string() }
}
