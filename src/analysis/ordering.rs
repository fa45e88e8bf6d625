use crate::models::record::TrackedRecord;
use std::collections::{HashMap, HashSet, VecDeque};

/// Orders records so every parent comes before its children, walking the
/// self-referential `parent_field` breadth-first from the roots.
pub fn dependency_order<'a>(
    records: &'a [TrackedRecord],
    parent_field: Option<&str>,
) -> Vec<&'a TrackedRecord> {
    let Some(parent_field) = parent_field else {
        return records.iter().collect();
    };

    let ids: HashSet<&str> = records.iter().map(|r| r.id.as_str()).collect();
    let mut children: HashMap<&str, Vec<usize>> = HashMap::new();
    let mut queue: VecDeque<usize> = VecDeque::new();

    for (index, record) in records.iter().enumerate() {
        match record.str_field(parent_field) {
            Some(parent) if parent != record.id && ids.contains(parent) => {
                children.entry(parent).or_default().push(index);
            }
            _ => queue.push_back(index),
        }
    }

    let mut ordered = Vec::with_capacity(records.len());
    let mut visited = vec![false; records.len()];
    while let Some(index) = queue.pop_front() {
        if visited[index] {
            continue;
        }
        visited[index] = true;
        let record = &records[index];
        ordered.push(record);
        if let Some(kids) = children.get(record.id.as_str()) {
            queue.extend(kids.iter().copied());
        }
    }

    // Parent cycles are unreachable from any root.
    for (index, record) in records.iter().enumerate() {
        if !visited[index] {
            ordered.push(record);
        }
    }

    ordered
}
