// tests/images_rerun.rs
mod common;

use common::MockSource;
use reads_enricher::images::{
    apply_icons, plan_downloads, DownloadOutcome, DownloadSummary, ImageManager,
};
use reads_enricher::record::PublicationRecord;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

fn record(name: &str, icon: &str) -> PublicationRecord {
    let mut r = PublicationRecord::new(name, "", format!("https://{}.example.com", name.len()));
    r.icon_url = Some(icon.to_string());
    r
}

fn fixture() -> (Vec<PublicationRecord>, MockSource) {
    let recs = vec![
        record("Money Stuff", "https://cdn.example/ms.png"),
        record("Platformer", "https://cdn.example/pf.jpeg?w=120"),
        record("The Honest Broker", "https://cdn.example/hb"),
    ];
    let src = MockSource::new()
        .blob("https://cdn.example/ms.png", b"png-bytes")
        .blob("https://cdn.example/pf.jpeg?w=120", b"jpeg-bytes")
        .blob("https://cdn.example/hb", b"raw");
    (recs, src)
}

fn sorted_outcomes(
    results: &[(reads_enricher::images::DownloadTask, DownloadOutcome)],
) -> Vec<(String, DownloadOutcome)> {
    let mut v: Vec<_> = results
        .iter()
        .map(|(t, o)| (t.target.display().to_string(), o.clone()))
        .collect();
    v.sort_by(|a, b| a.0.cmp(&b.0));
    v
}

#[tokio::test]
async fn second_run_reuses_every_file() {
    let dir = tempfile::tempdir().unwrap();
    let (recs, src) = fixture();
    let src = Arc::new(src);
    let mgr = ImageManager::new(src.clone(), 4, Duration::from_secs(2));

    let first = mgr.run(plan_downloads(&recs, dir.path())).await;
    let s1 = DownloadSummary::from_results(&first);
    assert_eq!(s1.downloaded, 3);
    assert_eq!(s1.bytes_written, (9 + 10 + 3) as u64);
    assert!(dir.path().join("Money_Stuff.png").exists());
    assert!(dir.path().join("Platformer.jpeg").exists());
    assert!(dir.path().join("The_Honest_Broker.jpg").exists());

    let second = mgr.run(plan_downloads(&recs, dir.path())).await;
    let s2 = DownloadSummary::from_results(&second);
    assert_eq!(s2.reused, 3);
    assert_eq!(s2.downloaded, 0);
    assert_eq!(s2.bytes_written, 0);
    assert_eq!(src.byte_calls(), 3);
}

#[tokio::test]
async fn one_failure_does_not_abort_the_others() {
    let dir = tempfile::tempdir().unwrap();
    let (mut recs, src) = fixture();
    recs.push(record("Broken Feed", "https://cdn.example/missing.png"));
    let mgr = ImageManager::new(Arc::new(src), 2, Duration::from_secs(2));

    let results = mgr.run(plan_downloads(&recs, dir.path())).await;
    let s = DownloadSummary::from_results(&results);
    assert_eq!(s.downloaded, 3);
    assert_eq!(s.failed, 1);
    assert!(!dir.path().join("Broken_Feed.png").exists());

    apply_icons(&mut recs, dir.path(), &results);
    assert!(recs[3].icon_path.is_none());
    for r in &recs[..3] {
        let p = r.icon_path.as_ref().expect("icon set");
        assert!(p.is_absolute());
        assert!(p.exists());
    }
}

#[tokio::test]
async fn empty_leftover_is_downloaded_again() {
    let dir = tempfile::tempdir().unwrap();
    let (recs, src) = fixture();
    std::fs::write(dir.path().join("Money_Stuff.png"), b"").unwrap();
    let mgr = ImageManager::new(Arc::new(src), 1, Duration::from_secs(2));

    let results = mgr.run(plan_downloads(&recs, dir.path())).await;
    let ms = results
        .iter()
        .find(|(t, _)| t.identity == "Money Stuff")
        .map(|(_, o)| o.clone());
    assert_eq!(ms, Some(DownloadOutcome::Downloaded { bytes: 9 }));
    assert_eq!(
        std::fs::read(dir.path().join("Money_Stuff.png")).unwrap(),
        b"png-bytes"
    );
}

#[tokio::test]
async fn worker_count_does_not_change_results() {
    let narrow_dir = tempfile::tempdir().unwrap();
    let wide_dir = tempfile::tempdir().unwrap();
    let (recs, _) = fixture();

    let run = |dir: &Path, workers: usize| {
        let (_, src) = fixture();
        let tasks = plan_downloads(&recs, dir);
        async move {
            ImageManager::new(Arc::new(src), workers, Duration::from_secs(2))
                .run(tasks)
                .await
        }
    };
    let narrow = run(narrow_dir.path(), 1).await;
    let wide = run(wide_dir.path(), 4).await;

    let strip = |v: Vec<(String, DownloadOutcome)>, root: &Path| -> Vec<(String, DownloadOutcome)> {
        let root = root.display().to_string();
        v.into_iter()
            .map(|(p, o)| (p.replacen(&root, "", 1), o))
            .collect()
    };
    assert_eq!(
        strip(sorted_outcomes(&narrow), narrow_dir.path()),
        strip(sorted_outcomes(&wide), wide_dir.path())
    );
}

#[tokio::test]
async fn unwritable_partial_file_fails_only_that_task() {
    let dir = tempfile::tempdir().unwrap();
    let (recs, src) = fixture();
    // a directory squatting on the partial path makes the write fail
    std::fs::create_dir_all(dir.path().join("Platformer.jpeg.part")).unwrap();
    let mgr = ImageManager::new(Arc::new(src), 3, Duration::from_secs(2));

    let results = mgr.run(plan_downloads(&recs, dir.path())).await;
    let s = DownloadSummary::from_results(&results);
    assert_eq!(s.failed, 1);
    assert_eq!(s.downloaded, 2);
    assert!(!dir.path().join("Platformer.jpeg").exists());
    assert!(!dir.path().join("Money_Stuff.png.part").exists());
    assert!(!dir.path().join("The_Honest_Broker.jpg.part").exists());
}
