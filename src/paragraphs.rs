/// Paragraph folding: groups inline runs into paragraph nodes
///
/// Runs after parsing. Inline nodes that contain block children are first
/// split around them, then sibling runs between blank lines and block nodes
/// become `Paragraph` nodes.
use std::mem;

use crate::ast::{Node, NodeKind, strip};

/// Fold the children of `root` into paragraphs, recursing into block nodes.
pub fn fold_paragraphs(root: &mut Node) {
    root.children = create_paragraphs(mem::take(&mut root.children));
    root.paragraphs_set = true;
}

fn flatten_inline_nodes(nodes: Vec<Node>) -> Vec<Node> {
    nodes.into_iter().flat_map(flatten_inline_node).collect()
}

/// Split an inline node around its block children.
///
/// `[[span]]a[[div]]b[[/div]]c[[/span]]` becomes span(a), div(b), span(c).
fn flatten_inline_node(mut node: Node) -> Vec<Node> {
    let trim = node.trim_paragraphs();
    let mut children = mem::take(&mut node.children);
    if trim {
        children = strip(children);
    }
    let children = flatten_inline_nodes(children);
    if node.is_block() || children.is_empty() {
        node.children = children;
        return vec![node];
    }

    // A single newline between two non-newlines stays inline
    let soft: Vec<bool> = (0..children.len())
        .map(|i| {
            !trim
                && children[i].is_newline()
                && children.get(i + 1).is_some_and(|next| !next.is_newline())
                && (i == 0 || !children[i - 1].is_newline())
        })
        .collect();

    let mut new_nodes = Vec::new();
    let mut run = Vec::new();
    for (mut child, soft) in children.into_iter().zip(soft) {
        if !child.is_block() || soft {
            run.push(child);
            continue;
        }
        if !run.is_empty() {
            new_nodes.push(clone_with(&node, mem::take(&mut run)));
        }
        if node.is_span() {
            wrap_text_in_span(&mut child, &node);
        }
        new_nodes.push(child);
    }
    if !run.is_empty() {
        new_nodes.push(clone_with(&node, run));
    }
    new_nodes
}

fn clone_with(parent: &Node, children: Vec<Node>) -> Node {
    let mut node = parent.clone_empty();
    for child in children {
        node.append_child(child);
    }
    node
}

/// Re-wrap text under a block split out of a span, so the span's styling
/// still applies to it.
fn wrap_text_in_span(node: &mut Node, span: &Node) {
    node.children = mem::take(&mut node.children)
        .into_iter()
        .map(|mut child| match child.kind {
            NodeKind::Text { .. } | NodeKind::HtmlLiteral(_) => {
                let mut wrapped = span.clone_empty();
                wrapped.children.push(child);
                wrapped
            }
            _ => {
                wrap_text_in_span(&mut child, span);
                child
            }
        })
        .collect();
}

fn create_paragraphs(nodes: Vec<Node>) -> Vec<Node> {
    let nodes = flatten_inline_nodes(nodes);
    let newline: Vec<bool> = nodes.iter().map(Node::is_newline).collect();
    let literal: Vec<bool> = nodes.iter().map(Node::is_literal).collect();

    let mut new_nodes = Vec::new();
    let mut paragraph = Vec::new();
    let mut skip_next = false;
    for (i, mut node) in nodes.into_iter().enumerate() {
        if skip_next {
            skip_next = false;
            continue;
        }
        let prev = i.checked_sub(1);
        let prev_prev = i.checked_sub(2);
        let next = Some(i + 1);

        // `text\n@@literal@@` keeps its line break
        if literal[i] && flag(&newline, prev) && !flag(&newline, prev_prev) {
            if flag(&literal, prev_prev) || !paragraph.is_empty() {
                paragraph.push(Node::newline(true));
            } else {
                new_nodes.push(Node::newline(true));
            }
        }
        if newline[i] && flag(&literal, next) {
            continue;
        }

        let blank_line = newline[i] && flag(&newline, next);
        if !blank_line && !(node.is_block() && !newline[i]) {
            paragraph.push(node);
            continue;
        }

        flush_paragraph(&mut paragraph, &mut new_nodes);
        if blank_line {
            skip_next = true;
            continue;
        }
        if !node.paragraphs_set {
            node.children = create_paragraphs(mem::take(&mut node.children));
            if node.trim_paragraphs() {
                collapse_paragraph(node.children.first_mut());
                collapse_paragraph(node.children.last_mut());
            }
        }
        new_nodes.push(node);
    }
    flush_paragraph(&mut paragraph, &mut new_nodes);

    for node in &mut new_nodes {
        node.paragraphs_set = true;
    }
    new_nodes
}

fn flag(flags: &[bool], index: Option<usize>) -> bool {
    index.and_then(|i| flags.get(i).copied()).unwrap_or(false)
}

fn flush_paragraph(paragraph: &mut Vec<Node>, out: &mut Vec<Node>) {
    let children = strip(mem::take(paragraph));
    if !children.is_empty() {
        out.push(Node::with_children(
            NodeKind::Paragraph { collapsed: false },
            children,
        ));
    }
}

fn collapse_paragraph(node: Option<&mut Node>) {
    if let Some(Node {
        kind: NodeKind::Paragraph { collapsed },
        ..
    }) = node
    {
        *collapsed = true;
    }
}
