//! Integration tests for accounts and account tree import.

use pretty_assertions::assert_eq;

use feedstore::storage::{Database, Message, NodeKind, OutlineNode, TreeNode};

async fn test_db() -> Database {
    Database::open(":memory:").await.unwrap()
}

const TREE_JSON: &str = r#"[
    {
        "kind": "category",
        "custom_id": 10,
        "title": "Tech",
        "children": [
            {"kind": "feed", "custom_id": 100, "title": "LWN", "url": "https://lwn.net/headlines/rss"},
            {
                "kind": "category",
                "custom_id": 11,
                "title": "Rust",
                "children": [
                    {"kind": "feed", "custom_id": 101, "title": "This Week in Rust", "update_interval": 60, "auto_update": "specific"}
                ]
            }
        ]
    },
    {"kind": "feed", "custom_id": 102, "title": "Top level"}
]"#;

/// Minimal tree type to show that any node type can be imported.
struct Folder {
    id: i64,
    name: &'static str,
    items: Vec<Folder>,
}

impl TreeNode for Folder {
    fn kind(&self) -> NodeKind {
        if self.items.is_empty() {
            NodeKind::Feed
        } else {
            NodeKind::Category
        }
    }

    fn custom_id(&self) -> i64 {
        self.id
    }

    fn title(&self) -> &str {
        self.name
    }

    fn children(&self) -> &[Self] {
        &self.items
    }
}

#[tokio::test]
async fn test_import_tree_from_json() {
    let db = test_db().await;
    let account = db.create_account("std-rss").await.unwrap();
    let tree: Vec<OutlineNode> = serde_json::from_str(TREE_JSON).unwrap();

    let stored = db.store_account_tree(&tree, account).await.unwrap();
    assert_eq!(stored.len(), 5);

    let feeds = db.feeds_for_account(account).await.unwrap();
    let custom_ids: Vec<i64> = feeds.iter().map(|f| f.custom_id).collect();
    assert_eq!(custom_ids, vec![100, 101, 102]);
    assert_eq!(feeds[1].update_interval, 60);
    assert_eq!(feeds[1].category, Some(11));
    assert_eq!(feeds[2].category, None);

    let categories = db.categories_for_account(account).await.unwrap();
    let parents: Vec<(i64, Option<i64>)> = categories.iter().map(|c| (c.custom_id, c.parent_id)).collect();
    assert_eq!(parents, vec![(11, Some(10)), (10, None)]);
}

#[tokio::test]
async fn test_category_counts_after_import() {
    let db = test_db().await;
    let account = db.create_account("std-rss").await.unwrap();
    let tree: Vec<OutlineNode> = serde_json::from_str(TREE_JSON).unwrap();
    db.store_account_tree(&tree, account).await.unwrap();

    let message = |title: &str| Message {
        title: title.to_string(),
        created_at: chrono::Utc::now(),
        ..Message::default()
    };
    db.apply_batch(vec![message("a"), message("b")], 100, account, "")
        .await;
    db.apply_batch(vec![message("c")], 101, account, "").await;

    let tech = db.message_counts_for_category(10, account).await.unwrap();
    assert_eq!(tech.len(), 1);
    assert_eq!(tech[&100].total, 2);

    let rust = db.message_counts_for_category(11, account).await.unwrap();
    assert_eq!(rust[&101].unread, 1);
}

#[tokio::test]
async fn test_import_custom_tree_type() {
    let db = test_db().await;
    let tree = Folder {
        id: 1,
        name: "Root folder",
        items: vec![
            Folder {
                id: 2,
                name: "Feed A",
                items: Vec::new(),
            },
            Folder {
                id: 3,
                name: "Feed B",
                items: Vec::new(),
            },
        ],
    };

    let stored = db.store_account_tree(std::slice::from_ref(&tree), 4).await.unwrap();
    let kinds: Vec<NodeKind> = stored.iter().map(|n| n.kind).collect();
    assert_eq!(kinds, vec![NodeKind::Feed, NodeKind::Feed, NodeKind::Category]);
    assert_eq!(db.feeds_for_account(4).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_account_removal_keeps_other_accounts() {
    let db = test_db().await;
    let first = db.create_account("std-rss").await.unwrap();
    let second = db.create_account("std-rss").await.unwrap();
    let tree: Vec<OutlineNode> = serde_json::from_str(TREE_JSON).unwrap();
    db.store_account_tree(&tree, first).await.unwrap();
    db.store_account_tree(&tree, second).await.unwrap();

    db.delete_account(first).await.unwrap();

    assert!(db.feeds_for_account(first).await.unwrap().is_empty());
    assert_eq!(db.feeds_for_account(second).await.unwrap().len(), 3);
    let remaining: Vec<i64> = db
        .accounts_of_type("std-rss")
        .await
        .unwrap()
        .iter()
        .map(|a| a.id)
        .collect();
    assert_eq!(remaining, vec![second]);
}
