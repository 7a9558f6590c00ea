use std::collections::{BTreeMap, HashMap};
use std::slice;

use crate::error::PipelineError;
use crate::resolve::ResolvedNode;
use crate::types::{Discriminator, Field, FieldDef, RuntimeConditional, Value};

/// How a constituent gate is decided.
enum Gate {
    Always,
    Never,
    Deferred(Discriminator),
}

fn decide(
    when: Option<&Discriminator>,
    constants: &BTreeMap<String, Value>,
    kind: &str,
) -> Gate {
    let Some(d) = when else {
        return Gate::Always;
    };
    let known = if let Some(name) = d.path.strip_prefix("const.") {
        Some(constants.get(name).is_some_and(|v| v.matches(&d.equals)))
    } else if d.path == "schema.kind" {
        Some(Value::from(kind).matches(&d.equals))
    } else {
        None
    };
    match known {
        Some(true) => Gate::Always,
        Some(false) => Gate::Never,
        None => Gate::Deferred(d.clone()),
    }
}

/// Merge a resolved tree into one field list, ordered by first declaration.
///
/// Later declarations overwrite scalar attributes and union validation. Gates on
/// `const.<name>` (looked up in `constants`) and `schema.kind` are decided here.
/// Any other gate is deferred: the declaration is kept whole as a
/// [`RuntimeConditional`] on the field and nothing of it reaches the base
/// attributes.
///
/// # Errors
///
/// [`PipelineError::CompositionConflict`] when a field is redeclared with an
/// incompatible type, [`PipelineError::MissingFieldType`] when a field's first
/// declaration carries no type.
pub fn flatten(
    nodes: &[ResolvedNode],
    constants: &BTreeMap<String, Value>,
    kind: &str,
) -> Result<Vec<Field>, PipelineError> {
    let mut fields: Vec<Field> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut work: Vec<(slice::Iter<'_, ResolvedNode>, Vec<Discriminator>)> =
        vec![(nodes.iter(), Vec::new())];

    while let Some((iter, gates)) = work.last_mut() {
        let Some(node) = iter.next() else {
            work.pop();
            continue;
        };
        match node {
            ResolvedNode::Field(def) => {
                let gates = gates.clone();
                merge(&mut fields, &mut index, def, gates)?;
            }
            ResolvedNode::Composition(constituents) => {
                let outer = gates.clone();
                // Reverse push so the first constituent is processed first.
                for constituent in constituents.iter().rev() {
                    match decide(constituent.when.as_ref(), constants, kind) {
                        Gate::Never => {}
                        Gate::Always => work.push((constituent.nodes.iter(), outer.clone())),
                        Gate::Deferred(d) => {
                            let mut inner = outer.clone();
                            inner.push(d);
                            work.push((constituent.nodes.iter(), inner));
                        }
                    }
                }
            }
        }
    }

    Ok(fields)
}

fn merge(
    fields: &mut Vec<Field>,
    index: &mut HashMap<String, usize>,
    def: &FieldDef,
    gates: Vec<Discriminator>,
) -> Result<(), PipelineError> {
    let deferred = !gates.is_empty();

    let Some(&i) = index.get(&def.name) else {
        let field_type = def
            .field_type
            .ok_or_else(|| PipelineError::MissingFieldType {
                field: def.name.clone(),
            })?;
        let mut field = Field::new(&def.name, field_type);
        if deferred {
            field.gated = true;
            field.conditionals.push(RuntimeConditional::new(gates, def));
        } else {
            field.apply(def);
        }
        index.insert(def.name.clone(), fields.len());
        fields.push(field);
        return Ok(());
    };

    let field = &mut fields[i];
    if let Some(incoming) = def.field_type
        && !field.field_type.compatible_with(incoming)
    {
        return Err(PipelineError::CompositionConflict {
            field: def.name.clone(),
            existing: field.field_type,
            incoming,
        });
    }

    if deferred {
        field.conditionals.push(RuntimeConditional::new(gates, def));
    } else {
        // Now exists unconditionally.
        field.gated = false;
        field.apply(def);
    }
    Ok(())
}
