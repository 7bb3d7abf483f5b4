use std::collections::{BTreeMap, BTreeSet};

use crate::expr;
use crate::spec::{FieldKind, FormSchema};

/// Orders calculated fields so every field comes after the calculated fields it reads.
///
/// Dependencies are the union of the declared `dependencies` list and the
/// fields referenced by the expression. Returns the offending path on a cycle.
pub fn calculation_order(schema: &FormSchema) -> Result<Vec<String>, Vec<String>> {
    let mut graph: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for entry in schema.fields() {
        if let FieldKind::Calculated(attrs) = &entry.field.kind {
            let mut deps: BTreeSet<String> = attrs.dependencies.iter().cloned().collect();
            if let Ok(referenced) = expr::check(&attrs.expression) {
                deps.extend(referenced);
            }
            graph.insert(entry.field.id.clone(), deps);
        }
    }

    let mut order = Vec::with_capacity(graph.len());
    let mut done = BTreeSet::new();
    for id in graph.keys() {
        let mut trail = Vec::new();
        visit(id, &graph, &mut done, &mut trail, &mut order)?;
    }
    Ok(order)
}

fn visit(
    id: &str,
    graph: &BTreeMap<String, BTreeSet<String>>,
    done: &mut BTreeSet<String>,
    trail: &mut Vec<String>,
    order: &mut Vec<String>,
) -> Result<(), Vec<String>> {
    if done.contains(id) {
        return Ok(());
    }
    if let Some(start) = trail.iter().position(|seen| seen == id) {
        let mut cycle = trail[start..].to_vec();
        cycle.push(id.to_string());
        return Err(cycle);
    }
    let Some(deps) = graph.get(id) else {
        return Ok(());
    };
    trail.push(id.to_string());
    for dep in deps {
        if graph.contains_key(dep) {
            visit(dep, graph, done, trail, order)?;
        }
    }
    trail.pop();
    done.insert(id.to_string());
    order.push(id.to_string());
    Ok(())
}
