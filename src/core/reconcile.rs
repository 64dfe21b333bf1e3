use crate::core::record::{Conflict, FileRecord, Plan, RecordMap};

/// 两侧摘要都存在、非空且相等
fn same_content(local: &FileRecord, remote: &FileRecord) -> bool {
    local.has_hash() && remote.has_hash() && local.content_hash == remote.content_hash
}

/// 对比本地和云端快照，生成同步计划
///
/// 上传、未变化和冲突按本地顺序排列，下载按云端顺序排列。
/// 任一侧缺少摘要都视为冲突。
pub fn reconcile(local: &RecordMap, remote: &RecordMap) -> Plan {
    let mut plan = Plan::default();

    for record in local.iter() {
        match remote.get(&record.path) {
            None => plan.uploads.push(record.clone()),
            Some(remote_record) if same_content(record, remote_record) => {
                plan.unchanged.push(record.clone())
            }
            Some(remote_record) => plan.conflicts.push(Conflict {
                path: record.path.clone(),
                local: record.clone(),
                remote: remote_record.clone(),
            }),
        }
    }

    plan.downloads = remote
        .iter()
        .filter(|r| !local.contains(&r.path))
        .cloned()
        .collect();

    plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn local(entries: &[(&str, Option<&str>)]) -> RecordMap {
        RecordMap::from_records(entries.iter().map(|(p, h)| FileRecord {
            path: p.to_string(),
            size: 1,
            mtime: Some(0),
            content_hash: h.map(String::from),
            remote_id: None,
        }))
        .unwrap()
    }

    fn remote(entries: &[(&str, Option<&str>)]) -> RecordMap {
        RecordMap::from_records(
            entries
                .iter()
                .enumerate()
                .map(|(i, (p, h))| FileRecord::remote(format!("id{}", i), *p, 1, None, h.map(String::from))),
        )
        .unwrap()
    }

    fn paths(records: &[FileRecord]) -> Vec<&str> {
        records.iter().map(|r| r.path.as_str()).collect()
    }

    #[test]
    fn test_end_to_end_example() {
        let plan = reconcile(
            &local(&[("n.txt", Some("H1"))]),
            &remote(&[("n.txt", Some("H1")), ("m.txt", Some("H2"))]),
        );
        assert_eq!(paths(&plan.unchanged), vec!["n.txt"]);
        assert_eq!(paths(&plan.downloads), vec!["m.txt"]);
        assert!(plan.uploads.is_empty());
        assert!(plan.conflicts.is_empty());
    }

    #[test]
    fn test_identical_sides_are_unchanged() {
        let entries = [("a", Some("1")), ("b/c", Some("2")), ("d", Some("3"))];
        let plan = reconcile(&local(&entries), &remote(&entries));
        assert_eq!(paths(&plan.unchanged), vec!["a", "b/c", "d"]);
        assert!(!plan.has_work());
    }

    #[test]
    fn test_missing_hash_never_matches() {
        let plan = reconcile(
            &local(&[("a", None), ("b", Some("x")), ("c", Some(""))]),
            &remote(&[("a", Some("x")), ("b", None), ("c", Some(""))]),
        );
        assert!(plan.unchanged.is_empty());
        let conflict_paths: Vec<_> = plan.conflicts.iter().map(|c| c.path.as_str()).collect();
        assert_eq!(conflict_paths, vec!["a", "b", "c"]);
        assert_eq!(plan.conflicts[0].remote.remote_id.as_deref(), Some("id0"));
    }

    #[test]
    fn test_every_path_lands_in_exactly_one_bucket() {
        let l = local(&[
            ("only-local", Some("1")),
            ("same", Some("2")),
            ("differs", Some("3")),
            ("no-hash", None),
        ]);
        let r = remote(&[
            ("only-remote", Some("9")),
            ("same", Some("2")),
            ("differs", Some("4")),
            ("no-hash", Some("5")),
            ("another-remote", Some("6")),
        ]);
        let plan = reconcile(&l, &r);

        let mut seen = HashSet::new();
        for path in plan.all_paths() {
            assert!(seen.insert(path), "{} appears twice", path);
        }
        let union: HashSet<&str> = l.paths().chain(r.paths()).collect();
        assert_eq!(seen, union);

        assert_eq!(paths(&plan.uploads), vec!["only-local"]);
        assert_eq!(paths(&plan.downloads), vec!["only-remote", "another-remote"]);
        assert_eq!(plan.summary().conflict_count, 2);
    }

    #[test]
    fn test_empty_sides() {
        let empty = RecordMap::new();
        let plan = reconcile(&empty, &empty);
        assert_eq!(plan, Plan::default());

        let plan = reconcile(&local(&[("a", Some("1"))]), &empty);
        assert_eq!(paths(&plan.uploads), vec!["a"]);
    }
}
