//! Per-node aggregation over decoded records.
//!
//! Every aggregate is recomputed from the record list on demand. Nodes are
//! keyed by their label (`null` when the emitting process had no address), in
//! a `BTreeMap` so output order never depends on input order.

use std::collections::BTreeMap;

use serde::Serialize;

use iotrace_types::TelemetryRecord;

/// Per-node sums plus the number of records that contributed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NodeTotals {
    pub per_node: BTreeMap<String, i64>,
    pub count: u64,
}

impl NodeTotals {
    fn add(&mut self, node: &str, value: i64) {
        *self.per_node.entry(node.to_string()).or_insert(0) += value;
        self.count += 1;
    }

    /// Sum over all nodes.
    pub fn total(&self) -> i64 {
        self.per_node.values().sum()
    }

    /// Integer mean per record, truncated toward zero. 0 when no records
    /// contributed.
    pub fn mean(&self) -> i64 {
        match i64::try_from(self.count) {
            Ok(0) | Err(_) => 0,
            Ok(count) => self.total() / count,
        }
    }

    pub fn get(&self, node: &str) -> Option<i64> {
        self.per_node.get(node).copied()
    }
}

/// Subjects touched per node, in the order their records appear.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FilesPerNode {
    pub per_node: BTreeMap<String, Vec<String>>,
}

impl FilesPerNode {
    /// Total number of entries across nodes.
    pub fn count(&self) -> usize {
        self.per_node.values().map(Vec::len).sum()
    }

    pub fn get(&self, node: &str) -> Option<&[String]> {
        self.per_node.get(node).map(Vec::as_slice)
    }
}

/// Sum of `bytes_transferred` per node over every record.
///
/// Filesystem records carry 0. Stream sentinels (`-1` for n/a or end of
/// stream) are summed as they are.
pub fn bytes_per_node(records: &[TelemetryRecord]) -> NodeTotals {
    let mut totals = NodeTotals::default();
    for record in records {
        totals.add(record.node_label(), record.bytes_transferred);
    }
    totals
}

/// Sum of `elapsed_nanos` per node, limited to `operation` when one is given.
/// An empty filter is the same as none.
pub fn elapsed_per_node(records: &[TelemetryRecord], operation: Option<&str>) -> NodeTotals {
    let filter = operation.filter(|op| !op.is_empty());
    let mut totals = NodeTotals::default();
    for record in records {
        if let Some(op) = filter {
            if record.operation != op {
                continue;
            }
        }
        let elapsed = i64::try_from(record.elapsed_nanos).unwrap_or(i64::MAX);
        totals.add(record.node_label(), elapsed);
    }
    totals
}

/// Every record's subject grouped by node.
pub fn files_per_node(records: &[TelemetryRecord]) -> FilesPerNode {
    let mut files = FilesPerNode::default();
    for record in records {
        files
            .per_node
            .entry(record.node_label().to_string())
            .or_default()
            .push(record.subject.clone());
    }
    files
}

#[cfg(test)]
mod tests {
    use super::*;
    use iotrace_types::{op, InstanceId, UNKNOWN_NODE};

    fn rec(node: &str, operation: &str, bytes: i64, elapsed: u64) -> TelemetryRecord {
        TelemetryRecord::stream(
            InstanceId(1),
            Some(node.to_string()),
            format!("/f/{}", bytes),
            operation,
            1000,
            elapsed,
        )
        .with_bytes(bytes)
    }

    #[test]
    fn test_bytes_per_node() {
        let records = vec![
            rec("n1", op::READ, 100, 1),
            rec("n1", op::READ, 200, 1),
            rec("n2", op::READ, 0, 1),
            rec("n2", op::READ, 50, 1),
        ];
        let totals = bytes_per_node(&records);
        assert_eq!(totals.get("n1"), Some(300));
        assert_eq!(totals.get("n2"), Some(50));
        assert_eq!(totals.count, 4);
        assert_eq!(totals.total(), 350);
        assert_eq!(totals.mean(), 87);
    }

    #[test]
    fn test_file_system_records_add_no_bytes() {
        let records = vec![
            TelemetryRecord::file_system(InstanceId(1), Some("n1".into()), "/a", op::OPEN, 100, 5),
            rec("n1", op::READ, 100, 7),
            TelemetryRecord::file_system(InstanceId(1), Some("n1".into()), "/a", op::GET_FILE_STATUS, 100, 3),
        ];
        let totals = bytes_per_node(&records);
        assert_eq!(totals.get("n1"), Some(100));
        assert_eq!(totals.count, 3);
        assert_eq!(totals.mean(), 33);

        let log = "x INFO FileSystemProxy iotrace_1,n1,/a,open,100,5\n\
                   x INFO StreamProxy iotrace_2,n1,/a,read,100,0,100,-1,100,7\n\
                   x INFO FileSystemProxy iotrace_1,n1,/a,getFileStatus,100,3\n";
        let ingested = crate::ingest::ingest_reader(log.as_bytes()).unwrap();
        assert_eq!(bytes_per_node(&ingested.records).get("n1"), Some(100));
    }

    #[test]
    fn test_elapsed_with_operation_filter() {
        let records = vec![
            rec("n1", op::READ, 1, 10),
            rec("n1", op::READ, 1, 20),
            rec("n2", op::CLOSE, 1, 5),
            rec("n2", op::READ, 1, 30),
        ];

        let reads = elapsed_per_node(&records, Some(op::READ));
        assert_eq!(reads.total(), 60);
        assert_eq!(reads.count, 3);
        assert_eq!(reads.mean(), 20);

        let closes = elapsed_per_node(&records, Some(op::CLOSE));
        assert_eq!(closes.total(), 5);
        assert_eq!(closes.count, 1);
        assert_eq!(closes.get("n2"), Some(5));
        assert_eq!(closes.get("n1"), None);

        let all = elapsed_per_node(&records, None);
        assert_eq!(all.total(), 65);
        assert_eq!(all.count, 4);
        assert_eq!(elapsed_per_node(&records, Some("")), all);
    }

    #[test]
    fn test_empty_aggregation() {
        let totals = bytes_per_node(&[]);
        assert_eq!(totals.count, 0);
        assert_eq!(totals.total(), 0);
        assert_eq!(totals.mean(), 0);

        let records = vec![rec("n1", op::READ, 1, 1)];
        let none = elapsed_per_node(&records, Some(op::SEEK));
        assert_eq!(none.count, 0);
        assert_eq!(none.mean(), 0);
    }

    #[test]
    fn test_mean_truncates_negative_toward_zero() {
        let records = vec![rec("n1", op::READ, -1, 1), rec("n1", op::READ, 0, 1)];
        assert_eq!(bytes_per_node(&records).mean(), 0);
    }

    #[test]
    fn test_unknown_node_label() {
        let record = TelemetryRecord::file_system(InstanceId(2), None, "/x", op::OPEN, 3, 9);
        let totals = elapsed_per_node(&[record], None);
        assert_eq!(totals.get(UNKNOWN_NODE), Some(9));
    }

    #[test]
    fn test_files_per_node_keeps_order() {
        let records = vec![
            rec("n2", op::READ, 3, 1),
            rec("n1", op::READ, 2, 1),
            rec("n2", op::READ, 1, 1),
        ];
        let files = files_per_node(&records);
        assert_eq!(files.count(), 3);
        assert_eq!(files.get("n1").unwrap(), ["/f/2".to_string()]);
        assert_eq!(
            files.get("n2").unwrap(),
            ["/f/3".to_string(), "/f/1".to_string()]
        );
        let nodes: Vec<_> = files.per_node.keys().cloned().collect();
        assert_eq!(nodes, vec!["n1", "n2"]);
    }
}
