use pretty_assertions::assert_eq;

use super::*;
use crate::MemoryOrigin;

fn history(len: usize) -> Vec<String> {
	(0..len).map(|i| format!("q{i:02}")).collect()
}

#[test]
fn test_keys_and_clear_stay_inside_namespace() {
	let store = MemoryOrigin::new().context();
	let ns = Namespace::default();
	store.set(&ns.key("theme"), r#""dark""#).unwrap();
	store.set(&ns.key("votes"), "{}").unwrap();
	store.set("theme", "light").unwrap();
	store.set("lft_v2x/theme", "1").unwrap();

	assert_eq!(namespaced_keys(&store, &ns), vec![ns.key("theme"), ns.key("votes")]);
	assert_eq!(clear(&store, &ns), 2);
	assert!(namespaced_keys(&store, &ns).is_empty());
	assert_eq!(store.get("theme").as_deref(), Some("light"));
	assert_eq!(store.get("lft_v2x/theme").as_deref(), Some("1"));
}

#[test]
fn test_stats_count_namespaced_bytes() {
	let store = MemoryOrigin::new().context();
	let ns = Namespace::default();
	store.set(&ns.key("theme"), r#""dark""#).unwrap();
	store.set("outside", "ignored").unwrap();

	assert_eq!(stats(&store, &ns), StorageStats {
		used: ns.key("theme").len() + r#""dark""#.len(),
		items: 1,
	});
	assert_eq!(stats(&MemoryOrigin::disabled().context(), &ns), StorageStats::default());
}

#[test]
fn test_export_import_between_origins() {
	let ns = Namespace::default();
	let source = MemoryOrigin::new().context();
	source.set(&ns.key("theme"), r#""light""#).unwrap();
	source.set(&ns.key("votes"), r#"{"a":1}"#).unwrap();
	source.set(&ns.key("broken"), "{oops").unwrap();

	let mut snapshot = export(&source, &ns);
	assert_eq!(snapshot.version, crate::migrate::SCHEMA_VERSION);
	assert_eq!(snapshot.data.len(), 2);
	snapshot.data.insert("elsewhere".into(), serde_json::json!(1));

	let target = MemoryOrigin::new().context();
	let report = import(&target, &ns, &snapshot);
	assert_eq!(report.written, vec![ns.key("theme"), ns.key("votes")]);
	assert_eq!(report.skipped, vec!["elsewhere".to_string()]);
	assert!(report.failed.is_empty());
	assert_eq!(target.get(&ns.key("votes")).as_deref(), Some(r#"{"a":1}"#));
	assert_eq!(target.get("elsewhere"), None);
}

#[test]
fn test_export_encodes_camel_case() {
	let snapshot = export(&MemoryOrigin::new().context(), &Namespace::default());
	let encoded = serde_json::to_value(&snapshot).unwrap();
	assert!(encoded.get("exportedAt").is_some());
	assert_eq!(encoded["data"], serde_json::json!({}));
}

#[test]
fn test_quota_recovery_trims_histories_so_writes_fit() {
	let store = MemoryOrigin::with_quota(500).context();
	let ns = Namespace::default();
	set_json(&store, &ns.key("searchHistory"), &history(30)).unwrap();
	set_json(&store, &ns.key("recentlyOpened"), &history(30)).unwrap();

	let big = "x".repeat(100);
	let error = store.set(&ns.key("votes"), &big).unwrap_err();
	assert!(error.is_quota_exceeded());

	assert_eq!(recover_quota(&store, &ns), vec!["searchHistory", "recentlyOpened"]);
	let kept: Vec<String> = get_json(&store, &ns.key("searchHistory")).unwrap();
	assert_eq!(kept, history(30)[20..].to_vec());
	let kept: Vec<String> = get_json(&store, &ns.key("recentlyOpened")).unwrap();
	assert_eq!(kept.len(), HISTORY_KEEP);

	store.set(&ns.key("votes"), &big).unwrap();
}

#[test]
fn test_quota_recovery_leaves_short_or_foreign_values() {
	let store = MemoryOrigin::new().context();
	let ns = Namespace::default();
	set_json(&store, &ns.key("searchHistory"), &history(HISTORY_KEEP)).unwrap();
	set_json(&store, &ns.key("recentlyOpened"), &serde_json::json!({ "a": 1 })).unwrap();
	set_json(&store, "searchHistory", &history(40)).unwrap();

	assert!(recover_quota(&store, &ns).is_empty());
	let legacy: Vec<String> = get_json(&store, "searchHistory").unwrap();
	assert_eq!(legacy.len(), 40);
}
