//! S1: repeated `get` on one Facade Connection returns
//! the same document identity; `get_existing` agrees with it, and
//! returns `None` for a key never fetched.

mod common;

use std::sync::Arc;

use common::Cluster;

#[tokio::test]
async fn repeated_get_and_get_existing_agree_on_identity() {
    let cluster = Cluster::new();
    let tab = cluster.open_tab();

    let first = tab.get("posts", "d1").await.unwrap();
    let second = tab.get("posts", "d1").await.unwrap();
    assert!(Arc::ptr_eq(&first, &second));

    let existing = tab.get_existing("posts", "d1").expect("cached after get");
    assert!(Arc::ptr_eq(&first, &existing));

    assert!(tab.get_existing("posts", "d2").is_none());
}
