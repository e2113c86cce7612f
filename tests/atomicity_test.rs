mod helpers;

use helpers::{grid_nodes, node, small_config, test_db};
use plexus::federation::IndexOptions;
use plexus::{Error, Federation};

/// A federation whose backend aborts any insert of a node with id `poison`.
fn poisoned_federation() -> Federation {
    let conn = test_db();
    conn.execute_batch(
        "CREATE TRIGGER fail_on_poison BEFORE INSERT ON nodes
         WHEN NEW.id = 'poison'
         BEGIN SELECT RAISE(ABORT, 'injected failure'); END;",
    )
    .unwrap();
    Federation::new(conn, small_config()).unwrap()
}

#[tokio::test]
async fn failed_batch_leaves_store_and_params_unchanged() {
    let fed = poisoned_federation();
    fed.add_project_index("p", grid_nodes("g"), IndexOptions::default())
        .await
        .unwrap();
    let params_before = fed.get_quant_params().await.unwrap().unwrap();
    let node_before = fed.get_project_node("p", "g-1-1").await.unwrap().unwrap();

    let mut changed = node("g-1-1", "rewritten", 5.0, -5.0);
    changed.title = "Changed".into();
    let err = fed
        .add_project_index(
            "p",
            vec![changed, node("new", "added", 0.3, 0.3), node("poison", "boom", 0.0, 0.0)],
            IndexOptions::default(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Storage(_)), "got {err:?}");

    assert_eq!(fed.get_quant_params().await.unwrap().unwrap(), params_before);
    assert_eq!(fed.get_project_node("p", "g-1-1").await.unwrap().unwrap(), node_before);
    assert!(fed.get_project_node("p", "new").await.unwrap().is_none());
    assert_eq!(fed.get_federation_stats().await.unwrap().total_nodes, 16);
}

#[tokio::test]
async fn failed_batch_does_not_register_project() {
    let fed = poisoned_federation();
    fed.add_project_index("p", grid_nodes("g"), IndexOptions::default())
        .await
        .unwrap();

    let err = fed
        .add_project_index(
            "q",
            vec![node("ok", "fine", 0.5, 0.5), node("poison", "boom", 0.1, 0.1)],
            IndexOptions {
                name: Some("Q".into()),
                ..IndexOptions::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Storage(_)));

    assert_eq!(fed.get_all_project_ids().await.unwrap(), vec!["p".to_string()]);
    assert!(fed.get_project("q").await.unwrap().is_none());
}

#[tokio::test]
async fn failed_update_rolls_back_every_node() {
    let fed = poisoned_federation();
    fed.add_project_index("p", grid_nodes("g"), IndexOptions::default())
        .await
        .unwrap();

    let err = fed
        .update_project_nodes(
            "p",
            vec![node("g-0-0", "edited", 1.0, 1.0), node("poison", "boom", 0.0, 0.0)],
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Storage(_)));

    let untouched = fed.get_project_node("p", "g-0-0").await.unwrap().unwrap();
    assert_eq!(untouched.text, "g cell 0 0");
    assert_eq!(untouched.morton_key.as_deref(), Some("00"));
}
