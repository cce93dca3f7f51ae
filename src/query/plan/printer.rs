use std::fmt::Write;

use super::{ExchangeKind, PlanNode};

/// Renders a plan as an indented text tree, one node per line
pub fn explain(plan: &PlanNode) -> String {
    let mut out = String::new();
    render(plan, 0, &mut out);
    out
}

fn render(node: &PlanNode, depth: usize, out: &mut String) {
    let indent = "    ".repeat(depth);
    let outputs: Vec<String> = node
        .output_symbols()
        .iter()
        .map(|s| format!("{}:{}", s, s.data_type()))
        .collect();
    let _ = writeln!(
        out,
        "{}- {}[{}] => [{}]",
        indent,
        node.name(),
        details(node),
        outputs.join(", ")
    );
    for source in node.sources() {
        render(&source, depth + 1, out);
    }
}

fn details(node: &PlanNode) -> String {
    match node {
        PlanNode::TableScan(scan) => {
            let shards: usize = scan.partitions.values().map(Vec::len).sum();
            format!("table = {}, shards = {}", scan.table, shards)
        }
        PlanNode::Filter(filter) => format!("predicate = {}", filter.predicate),
        PlanNode::Projection(project) => project
            .assignments
            .iter()
            .map(|(symbol, expression)| format!("{} := {}", symbol, expression))
            .collect::<Vec<_>>()
            .join(", "),
        PlanNode::Aggregation(aggregation) => {
            let calls: Vec<String> = aggregation
                .aggregations
                .iter()
                .map(|(symbol, call)| format!("{} := {}", symbol, call))
                .collect();
            let keys: Vec<String> = aggregation.grouping_keys.iter().map(|k| k.to_string()).collect();
            format!(
                "{}, keys = [{}], {}",
                aggregation.step,
                keys.join(", "),
                calls.join(", ")
            )
        }
        PlanNode::Join(join) => join
            .criteria
            .iter()
            .map(|c| format!("{} = {}", c.left, c.right))
            .collect::<Vec<_>>()
            .join(" AND "),
        PlanNode::Exchange(exchange) => {
            let kind = match &exchange.kind {
                ExchangeKind::Gather => "GATHER".to_string(),
                ExchangeKind::Repartition { partition_keys } => {
                    let keys: Vec<String> = partition_keys.iter().map(|k| k.to_string()).collect();
                    format!("REPARTITION [{}]", keys.join(", "))
                }
            };
            format!("{:?} {}", exchange.scope, kind)
        }
        PlanNode::Output(output) => output.column_names.join(", "),
        PlanNode::RemoteSource(remote) => {
            let fragments: Vec<String> = remote.source_fragments.iter().map(|f| f.to_string()).collect();
            format!("fragments = [{}]", fragments.join(", "))
        }
        PlanNode::Values(values) => format!("rows = {}", values.rows.len()),
        PlanNode::GroupReference(reference) => format!("group = {}", reference.group.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::DataType;
    use crate::query::plan::test_support::*;
    use crate::query::plan::{Expression, FilterNode, PlanNodeId, Symbol};
    use std::sync::Arc;

    #[test]
    fn test_explain_indents_children() {
        let scan = table_scan(0, "cpu", &[("host", DataType::Varchar)], single_partition());
        let filter = PlanNode::Filter(FilterNode {
            id: PlanNodeId(1),
            source: Arc::clone(&scan),
            predicate: Expression::is_null(Symbol::new("host", DataType::Varchar).to_reference()),
        });
        let text = explain(&filter);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("- Filter[predicate = (host IS NULL)]"));
        assert!(lines[1].starts_with("    - TableScan[table = db.public.cpu, shards = 1]"));
    }
}
