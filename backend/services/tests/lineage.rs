mod common;

use common::{SITE_URL, setup_db};
use layerscope_services::fingerprint::fingerprint;
use layerscope_services::{ImageStore, InspectedVersion, LineageService};
use layerscope_shared::{ImageLayer, RelatedVersion, User, Viewer};

fn layer(name: &str) -> ImageLayer {
    ImageLayer {
        blob_sum: format!("sha256:{}", name),
        command: format!("RUN make {}", name),
        download_size: 10,
    }
}

/// Stores one fully sized version, tagged `latest`, for `image_name`.
async fn add_version(store: &ImageStore, image_name: &str, sha: &str, layer_names: &[&str]) {
    let image = store.get_or_create_image(image_name).await.unwrap();
    let inspected = InspectedVersion {
        sha: sha.to_string(),
        author: String::new(),
        labels: r#"{"org.label-schema.license":"MIT"}"#.to_string(),
        created: None,
        layer_count: layer_names.len() as i32,
        manifest: "{}".to_string(),
        tags: vec!["latest".to_string()],
    };
    store.put_image(&image, &[inspected]).await.unwrap();

    let layers: Vec<ImageLayer> = layer_names.iter().map(|n| layer(n)).collect();
    let version = store.image_version(image_name, sha).await.unwrap().unwrap();
    store
        .save_version_size(version, 10 * layers.len() as i64, Some(&layers), Some(fingerprint(&layers)))
        .await
        .unwrap();
}

async fn family() -> (ImageStore, LineageService) {
    let store = ImageStore::new(setup_db().await, SITE_URL);
    add_version(&store, "library/alpine", "alpine-sha", &["a"]).await;
    add_version(&store, "someone/alpine-copy", "copy-sha", &["a"]).await;
    add_version(&store, "org/mid", "mid-sha", &["a", "b"]).await;
    add_version(&store, "org/app", "app-sha", &["a", "b", "c"]).await;
    let lineage = LineageService::new(store.clone());
    (store, lineage)
}

fn names(related: &[RelatedVersion]) -> Vec<&str> {
    related.iter().map(|r| r.image_name.as_str()).collect()
}

#[tokio::test]
async fn longest_matching_prefix_is_the_parent() {
    let (_, lineage) = family().await;

    let detail = lineage
        .version_detail("org/app", "app-sha", &Viewer::Anonymous)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(names(&detail.parents), vec!["org/mid"]);
    let parent = &detail.parents[0];
    assert_eq!(parent.sha, "mid-sha");
    assert_eq!(parent.tags, vec!["latest"]);
    assert_eq!(parent.page_url, "https://inspector.test/images/org/mid");
    assert_eq!(parent.layers, vec![layer("a"), layer("b")]);

    // Only what this version adds on top of its parent remains
    assert_eq!(detail.layers, vec![layer("c")]);
    assert!(detail.identical.is_empty());
    assert_eq!(detail.license.map(|l| l.code).as_deref(), Some("MIT"));
    assert_eq!(detail.tags, vec!["latest"]);
}

#[tokio::test]
async fn official_parents_win() {
    let (_, lineage) = family().await;

    let detail = lineage
        .version_detail("org/mid", "mid-sha", &Viewer::Anonymous)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(names(&detail.parents), vec!["library/alpine"]);
    assert_eq!(detail.parents[0].page_url, "https://inspector.test/images/alpine");
    assert_eq!(detail.layers, vec![layer("b")]);
}

#[tokio::test]
async fn identical_versions_exclude_only_themselves() {
    let (_, lineage) = family().await;

    let copy = lineage
        .version_detail("someone/alpine-copy", "copy-sha", &Viewer::Anonymous)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(names(&copy.identical), vec!["library/alpine"]);
    // A single layer has no proper prefix
    assert!(copy.parents.is_empty());
    assert_eq!(copy.layers, vec![layer("a")]);

    // Without an official match every identical version is kept
    let official = lineage
        .version_detail("library/alpine", "alpine-sha", &Viewer::Anonymous)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(official.image_name, "alpine");
    assert_eq!(names(&official.identical), vec!["someone/alpine-copy"]);
}

#[tokio::test]
async fn private_matches_need_permission() {
    let (store, lineage) = family().await;

    let mut mid = store.get_image("org/mid").await.unwrap().unwrap();
    mid.is_private = true;
    store.put_image_only(&mid).await.unwrap();

    let detail = lineage
        .version_detail("org/app", "app-sha", &Viewer::Anonymous)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(names(&detail.parents), vec!["library/alpine"]);
    assert_eq!(detail.layers, vec![layer("b"), layer("c")]);

    store.grant_image_permission(9, "org/mid").await.unwrap();
    let owner = Viewer::Authenticated(User {
        id: 9,
        name: "owner".to_string(),
    });
    let detail = lineage
        .version_detail("org/app", "app-sha", &owner)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(names(&detail.parents), vec!["org/mid"]);
    assert_eq!(
        detail.parents[0].page_url,
        "https://inspector.test/registry/docker/images/org/mid"
    );

    assert!(
        lineage
            .version_detail("org/mid", "mid-sha", &Viewer::Anonymous)
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn unknown_versions() {
    let (_, lineage) = family().await;

    assert!(
        lineage
            .version_detail("org/app", "no-such-sha", &Viewer::Anonymous)
            .await
            .unwrap()
            .is_none()
    );
    assert!(
        lineage
            .version_detail("org/nothing", "sha", &Viewer::Anonymous)
            .await
            .is_err()
    );
}

#[tokio::test]
async fn more_specific_parent_beats_shorter_one() {
    let (store, lineage) = family().await;
    add_version(&store, "org/top", "top-sha", &["a", "b", "c", "d"]).await;

    let detail = lineage
        .version_detail("org/top", "top-sha", &Viewer::Anonymous)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(names(&detail.parents), vec!["org/app"]);
    assert_eq!(detail.layers, vec![layer("d")]);
}
