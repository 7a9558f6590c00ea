//! Pointer dereferencing with cycle detection.
//!
//! Walks a root document on an explicit frame stack. Every `include` and every
//! field `extends` pushes a frame keyed by its target; meeting a key that is
//! already on the stack is a cycle. Targets resolved earlier in the same pass are
//! served from a memo, so diamond-shaped reference graphs expand each shared
//! target once.

use std::collections::{HashMap, HashSet};

use tracing::trace;

use crate::error::PipelineError;
use crate::types::{Constituent, Discriminator, FieldDef, Node, RefKey, SchemaDocument};

/// A node after dereferencing: only fields and compositions remain.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolvedNode {
    /// A field with every `extends` already overlaid.
    Field(FieldDef),
    Composition(Vec<ResolvedConstituent>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedConstituent {
    pub when: Option<Discriminator>,
    pub nodes: Vec<ResolvedNode>,
}

enum FrameKind<'d> {
    Root,
    /// Output is spliced into the parent.
    Include,
    /// Output is the single target field; the local declaration is overlaid on it.
    Extends(&'d FieldDef),
    Composition {
        constituents: &'d [Constituent],
        next: usize,
        done: Vec<ResolvedConstituent>,
    },
    Constituent(Option<Discriminator>),
}

struct Frame<'d> {
    /// Set for frames entered through a pointer.
    key: Option<RefKey>,
    document: &'d str,
    nodes: &'d [Node],
    next: usize,
    out: Vec<ResolvedNode>,
    kind: FrameKind<'d>,
}

struct Resolver<'d> {
    documents: &'d HashMap<String, SchemaDocument>,
    max_depth: usize,
    stack: Vec<Frame<'d>>,
    memo: HashMap<RefKey, Vec<ResolvedNode>>,
}

/// Dereference every pointer reachable from `root`.
///
/// `documents` must already contain every document the root transitively
/// references; a missing one is reported as [`PipelineError::Reference`].
///
/// # Errors
///
/// [`PipelineError::Reference`] for unknown documents or fields,
/// [`PipelineError::Cycle`] with the full pointer path for circular references,
/// [`PipelineError::DepthExceeded`] when a chain of references, the root
/// included, would hold more than `max_depth` pointers, and
/// [`PipelineError::InvalidPointer`] for malformed pointer text.
pub fn resolve_references(
    root: &str,
    documents: &HashMap<String, SchemaDocument>,
    max_depth: usize,
) -> Result<Vec<ResolvedNode>, PipelineError> {
    let doc = documents
        .get(root)
        .ok_or_else(|| PipelineError::Reference {
            pointer: root.to_owned(),
            referenced_from: root.to_owned(),
        })?;
    let mut resolver = Resolver {
        documents,
        max_depth,
        stack: Vec::new(),
        memo: HashMap::new(),
    };
    resolver.stack.push(Frame {
        key: Some(RefKey {
            document: root.to_owned(),
            field: None,
        }),
        document: doc.id.as_str(),
        nodes: &doc.nodes,
        next: 0,
        out: Vec::new(),
        kind: FrameKind::Root,
    });
    resolver.run()
}

impl<'d> Resolver<'d> {
    fn run(&mut self) -> Result<Vec<ResolvedNode>, PipelineError> {
        loop {
            let Some(top) = self.stack.last_mut() else {
                return Ok(Vec::new());
            };

            let nodes: &'d [Node] = top.nodes;
            if let Some(node) = nodes.get(top.next) {
                top.next += 1;
                let document = top.document;
                match node {
                    Node::Field(def) => match &def.extends {
                        None => top.out.push(ResolvedNode::Field(def.clone())),
                        Some(pointer) => {
                            let key = parse_pointer(pointer, document)?;
                            if key.field.is_none() {
                                return Err(PipelineError::InvalidPointer {
                                    pointer: pointer.clone(),
                                });
                            }
                            self.enter(key, pointer, FrameKind::Extends(def))?;
                        }
                    },
                    Node::Include { target } => {
                        let key = parse_pointer(target, document)?;
                        self.enter(key, target, FrameKind::Include)?;
                    }
                    Node::Composition { constituents } => {
                        self.stack.push(Frame {
                            key: None,
                            document,
                            nodes: &[],
                            next: 0,
                            out: Vec::new(),
                            kind: FrameKind::Composition {
                                constituents,
                                next: 0,
                                done: Vec::new(),
                            },
                        });
                    }
                }
                continue;
            }

            // Node list exhausted. Compositions open their next constituent.
            if let FrameKind::Composition {
                constituents, next, ..
            } = &mut top.kind
            {
                let list: &'d [Constituent] = *constituents;
                if let Some(constituent) = list.get(*next) {
                    *next += 1;
                    let document = top.document;
                    self.stack.push(Frame {
                        key: None,
                        document,
                        nodes: &constituent.nodes,
                        next: 0,
                        out: Vec::new(),
                        kind: FrameKind::Constituent(constituent.when.clone()),
                    });
                    continue;
                }
            }

            let Some(frame) = self.stack.pop() else {
                return Ok(Vec::new());
            };
            if let Some(key) = &frame.key
                && !matches!(frame.kind, FrameKind::Root)
            {
                self.memo.insert(key.clone(), frame.out.clone());
            }
            match frame.kind {
                FrameKind::Root => return Ok(frame.out),
                FrameKind::Include => self.parent()?.out.extend(frame.out),
                FrameKind::Extends(local) => {
                    let key = frame.key.unwrap_or_else(|| RefKey {
                        document: frame.document.to_owned(),
                        field: None,
                    });
                    let merged = overlay(local, &frame.out, &key)?;
                    self.parent()?.out.push(merged);
                }
                FrameKind::Composition { done, .. } => {
                    self.parent()?.out.push(ResolvedNode::Composition(done));
                }
                FrameKind::Constituent(when) => {
                    let parent = self.parent()?;
                    if let FrameKind::Composition { done, .. } = &mut parent.kind {
                        done.push(ResolvedConstituent {
                            when,
                            nodes: frame.out,
                        });
                    }
                }
            }
        }
    }

    fn parent(&mut self) -> Result<&mut Frame<'d>, PipelineError> {
        let document = self.stack.first().map(|f| f.document).unwrap_or_default();
        self.stack
            .last_mut()
            .ok_or_else(|| PipelineError::Reference {
                pointer: document.to_owned(),
                referenced_from: document.to_owned(),
            })
    }

    /// Follow a pointer: serve it from the memo, or push a frame for its target.
    fn enter(
        &mut self,
        key: RefKey,
        pointer: &str,
        kind: FrameKind<'d>,
    ) -> Result<(), PipelineError> {
        if let Some(done) = self.memo.get(&key) {
            trace!(target_key = %key, "reference served from memo");
            let done = done.clone();
            let parent = self.parent()?;
            match kind {
                FrameKind::Extends(local) => {
                    let merged = overlay(local, &done, &key)?;
                    parent.out.push(merged);
                }
                _ => parent.out.extend(done),
            }
            return Ok(());
        }

        if let Some(first) = self
            .stack
            .iter()
            .position(|f| f.key.as_ref() == Some(&key))
        {
            let mut path: Vec<String> = self.stack[first..]
                .iter()
                .filter_map(|f| f.key.as_ref().map(ToString::to_string))
                .collect();
            path.push(key.to_string());
            return Err(PipelineError::Cycle { path });
        }

        // Keyed frames already on the stack, root included.
        let depth = self.stack.iter().filter(|f| f.key.is_some()).count();
        if depth >= self.max_depth {
            return Err(PipelineError::DepthExceeded {
                max: self.max_depth,
            });
        }

        let referenced_from = self
            .stack
            .last()
            .map(|f| f.document.to_owned())
            .unwrap_or_default();
        let unresolved = || PipelineError::Reference {
            pointer: pointer.to_owned(),
            referenced_from: referenced_from.clone(),
        };

        let documents: &'d HashMap<String, SchemaDocument> = self.documents;
        let doc = documents.get(&key.document).ok_or_else(unresolved)?;
        let nodes: &'d [Node] = match &key.field {
            None => &doc.nodes,
            Some(name) => {
                let idx = doc
                    .nodes
                    .iter()
                    .position(|n| matches!(n, Node::Field(def) if def.name == *name))
                    .ok_or_else(unresolved)?;
                &doc.nodes[idx..=idx]
            }
        };

        trace!(target_key = %key, depth, "dereferencing");
        self.stack.push(Frame {
            key: Some(key),
            document: doc.id.as_str(),
            nodes,
            next: 0,
            out: Vec::new(),
            kind,
        });
        Ok(())
    }
}

fn parse_pointer(pointer: &str, current: &str) -> Result<RefKey, PipelineError> {
    RefKey::parse(pointer, current).ok_or_else(|| PipelineError::InvalidPointer {
        pointer: pointer.to_owned(),
    })
}

fn overlay(
    local: &FieldDef,
    target: &[ResolvedNode],
    key: &RefKey,
) -> Result<ResolvedNode, PipelineError> {
    match target {
        [ResolvedNode::Field(base)] => Ok(ResolvedNode::Field(local.overlay(base))),
        _ => Err(PipelineError::Reference {
            pointer: key.to_string(),
            referenced_from: key.document.clone(),
        }),
    }
}

/// Ids of other documents `doc` points at directly. Malformed pointers are
/// skipped here and reported by [`resolve_references`].
#[must_use]
pub fn referenced_documents(doc: &SchemaDocument) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    let mut pending: Vec<&Node> = doc.nodes.iter().rev().collect();
    while let Some(node) = pending.pop() {
        let pointer = match node {
            Node::Field(def) => def.extends.as_deref(),
            Node::Include { target } => Some(target.as_str()),
            Node::Composition { constituents } => {
                for c in constituents.iter().rev() {
                    pending.extend(c.nodes.iter().rev());
                }
                None
            }
        };
        if let Some(key) = pointer.and_then(|p| RefKey::parse(p, &doc.id))
            && key.document != doc.id
            && seen.insert(key.document.clone())
        {
            out.push(key.document);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FieldType, ValidationRule};

    fn docs(list: Vec<SchemaDocument>) -> HashMap<String, SchemaDocument> {
        list.into_iter().map(|d| (d.id.clone(), d)).collect()
    }

    fn extends(name: &str, pointer: &str) -> FieldDef {
        FieldDef {
            name: name.to_owned(),
            extends: Some(pointer.to_owned()),
            ..FieldDef::default()
        }
    }

    fn names(nodes: &[ResolvedNode]) -> Vec<&str> {
        nodes
            .iter()
            .filter_map(|n| match n {
                ResolvedNode::Field(f) => Some(f.name.as_str()),
                ResolvedNode::Composition(_) => None,
            })
            .collect()
    }

    #[test]
    fn no_references_returns_fields_unchanged() {
        let a = FieldDef::new("a", FieldType::Text);
        let b = FieldDef::new("b", FieldType::Number);
        let set = docs(vec![SchemaDocument::new("root").field(a.clone()).field(b.clone())]);
        let out = resolve_references("root", &set, 8).unwrap();
        assert_eq!(out, vec![ResolvedNode::Field(a), ResolvedNode::Field(b)]);
    }

    #[test]
    fn include_splices_document_in_place() {
        let set = docs(vec![
            SchemaDocument::new("root")
                .field(FieldDef::new("first", FieldType::Text))
                .include("address")
                .field(FieldDef::new("last", FieldType::Text)),
            SchemaDocument::new("address")
                .field(FieldDef::new("street", FieldType::Text))
                .field(FieldDef::new("zip", FieldType::Text)),
        ]);
        let out = resolve_references("root", &set, 8).unwrap();
        assert_eq!(names(&out), vec!["first", "street", "zip", "last"]);
    }

    #[test]
    fn include_single_field() {
        let set = docs(vec![
            SchemaDocument::new("root").include("shared#email"),
            SchemaDocument::new("shared")
                .field(FieldDef::new("phone", FieldType::Text))
                .field(FieldDef::new("email", FieldType::Email)),
        ]);
        let out = resolve_references("root", &set, 8).unwrap();
        assert_eq!(names(&out), vec!["email"]);
    }

    #[test]
    fn extends_overlays_local_attributes() {
        let base = FieldDef {
            label: Some("Base".into()),
            validation: [ValidationRule::MaxLength(50)].into_iter().collect(),
            ..FieldDef::new("base", FieldType::Text)
        };
        let local = FieldDef {
            label: Some("Email".into()),
            field_type: Some(FieldType::Email),
            ..extends("email", "#base")
        };
        let set = docs(vec![SchemaDocument::new("root").field(base).field(local)]);
        let out = resolve_references("root", &set, 8).unwrap();
        match &out[1] {
            ResolvedNode::Field(f) => {
                assert_eq!(f.name, "email");
                assert_eq!(f.field_type, Some(FieldType::Email));
                assert_eq!(f.label.as_deref(), Some("Email"));
                assert!(f.validation.contains(&ValidationRule::MaxLength(50)));
                assert_eq!(f.extends, None);
            }
            other => panic!("expected field, got {other:?}"),
        }
    }

    #[test]
    fn mutual_extends_is_a_cycle_naming_both_fields() {
        let set = docs(vec![
            SchemaDocument::new("root")
                .field(extends("a", "#b"))
                .field(extends("b", "#a")),
        ]);
        match resolve_references("root", &set, 8) {
            Err(PipelineError::Cycle { path }) => {
                assert!(path.iter().any(|p| p == "root#a"), "{path:?}");
                assert!(path.iter().any(|p| p == "root#b"), "{path:?}");
                assert_eq!(path.first(), path.last());
            }
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn include_cycle_across_documents() {
        let set = docs(vec![
            SchemaDocument::new("a").include("b"),
            SchemaDocument::new("b").include("c"),
            SchemaDocument::new("c").include("a"),
        ]);
        match resolve_references("a", &set, 8) {
            Err(PipelineError::Cycle { path }) => {
                assert_eq!(path, vec!["a", "b", "c", "a"]);
            }
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn diamond_is_not_a_cycle() {
        let set = docs(vec![
            SchemaDocument::new("root").include("left").include("right"),
            SchemaDocument::new("left").include("shared#id"),
            SchemaDocument::new("right").include("shared#id"),
            SchemaDocument::new("shared").field(FieldDef::new("id", FieldType::Hidden)),
        ]);
        let out = resolve_references("root", &set, 8).unwrap();
        assert_eq!(names(&out), vec!["id", "id"]);
    }

    #[test]
    fn missing_targets_are_reference_errors() {
        let set = docs(vec![SchemaDocument::new("root").include("ghost")]);
        assert!(matches!(
            resolve_references("root", &set, 8),
            Err(PipelineError::Reference { pointer, referenced_from })
                if pointer == "ghost" && referenced_from == "root"
        ));

        let set = docs(vec![SchemaDocument::new("root").field(extends("x", "#nope"))]);
        assert!(matches!(
            resolve_references("root", &set, 8),
            Err(PipelineError::Reference { .. })
        ));
    }

    #[test]
    fn malformed_pointer() {
        let set = docs(vec![SchemaDocument::new("root").include("a#b#c")]);
        assert!(matches!(
            resolve_references("root", &set, 8),
            Err(PipelineError::InvalidPointer { .. })
        ));
        let set = docs(vec![SchemaDocument::new("root").field(extends("x", "other"))]);
        assert!(matches!(
            resolve_references("root", &set, 8),
            Err(PipelineError::InvalidPointer { .. })
        ));
    }

    #[test]
    fn depth_limit_is_enforced() {
        let mut list: Vec<SchemaDocument> = (0..10)
            .map(|i| SchemaDocument::new(&format!("d{i}")).include(&format!("d{}", i + 1)))
            .collect();
        list.push(SchemaDocument::new("d10").field(FieldDef::new("leaf", FieldType::Text)));
        let set = docs(list);
        assert!(matches!(
            resolve_references("d0", &set, 4),
            Err(PipelineError::DepthExceeded { max: 4 })
        ));
        assert_eq!(names(&resolve_references("d0", &set, 16).unwrap()), vec!["leaf"]);
    }

    #[test]
    fn depth_limit_boundary() {
        let set = docs(vec![
            SchemaDocument::new("a").include("b"),
            SchemaDocument::new("b").field(FieldDef::new("x", FieldType::Text)),
        ]);
        assert!(matches!(
            resolve_references("a", &set, 1),
            Err(PipelineError::DepthExceeded { max: 1 })
        ));
        assert_eq!(names(&resolve_references("a", &set, 2).unwrap()), vec!["x"]);

        let single = docs(vec![SchemaDocument::new("solo").field(FieldDef::new("y", FieldType::Text))]);
        assert_eq!(names(&resolve_references("solo", &single, 1).unwrap()), vec!["y"]);
    }

    #[test]
    fn compositions_keep_structure() {
        let set = docs(vec![
            SchemaDocument::new("root").composition(vec![
                Constituent::new(vec![Node::Include {
                    target: "extra".into(),
                }]),
                Constituent::new(vec![Node::Field(FieldDef::new("b", FieldType::Text))])
                    .when("form.kind", "x"),
            ]),
            SchemaDocument::new("extra").field(FieldDef::new("a", FieldType::Text)),
        ]);
        let out = resolve_references("root", &set, 8).unwrap();
        match &out[..] {
            [ResolvedNode::Composition(parts)] => {
                assert_eq!(parts.len(), 2);
                assert_eq!(names(&parts[0].nodes), vec!["a"]);
                assert!(parts[0].when.is_none());
                assert_eq!(names(&parts[1].nodes), vec!["b"]);
                assert!(parts[1].when.is_some());
            }
            other => panic!("expected one composition, got {other:?}"),
        }
    }

    #[test]
    fn referenced_documents_walks_compositions() {
        let doc = SchemaDocument::new("root")
            .include("a")
            .field(extends("x", "b#y"))
            .field(extends("z", "#local"))
            .composition(vec![Constituent::new(vec![Node::Include {
                target: "c".into(),
            }])])
            .include("a#again");
        assert_eq!(referenced_documents(&doc), vec!["a", "b", "c"]);
    }
}
