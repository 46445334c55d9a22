//! Copy engine scenarios against local endpoints

use std::sync::Arc;
use std::time::Duration;

use omnirun_copy::{CopyEngine, CopyError, CopyOptions};
use omnirun_exec::MemoryReporter;
use omnirun_inventory::Inventory;
use tempfile::TempDir;

struct Fixture {
    _dir: TempDir,
    root: std::path::PathBuf,
    inventory: Inventory,
    reporter: Arc<MemoryReporter>,
    engine: CopyEngine,
}

fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let reporter = Arc::new(MemoryReporter::new());
    let engine = CopyEngine::new(reporter.clone());
    Fixture {
        root: dir.path().to_path_buf(),
        _dir: dir,
        inventory: Inventory::new(),
        reporter,
        engine,
    }
}

fn write(path: &std::path::Path, content: &[u8]) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, content).unwrap();
}

#[tokio::test]
async fn single_file_copy_is_byte_exact() {
    let fx = fixture();
    let src = fx.root.join("src.bin");
    let dest = fx.root.join("dest.bin");
    write(&src, b"\x00\x01\xfe\xffpayload");

    let summary = fx
        .engine
        .copy(
            &fx.inventory,
            &src.to_string_lossy(),
            &dest.to_string_lossy(),
            &CopyOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(summary.copied, 1);
    assert_eq!(std::fs::read(&dest).unwrap(), b"\x00\x01\xfe\xffpayload");
}

#[tokio::test]
async fn directory_without_recursive_is_rejected() {
    let fx = fixture();
    let src = fx.root.join("tree");
    std::fs::create_dir_all(&src).unwrap();

    let err = fx
        .engine
        .copy(
            &fx.inventory,
            &src.to_string_lossy(),
            &fx.root.join("out").to_string_lossy(),
            &CopyOptions::default(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, CopyError::IsDirectory { .. }));
    assert!(
        err.to_string()
            .contains("is a directory (use --recursive to copy directories)")
    );
}

#[tokio::test]
async fn recursive_copy_reproduces_subtree_with_empty_dirs() {
    let fx = fixture();
    let src = fx.root.join("tree");
    write(&src.join("a.txt"), b"a");
    write(&src.join("sub/deep/b.txt"), b"b");
    std::fs::create_dir_all(src.join("hollow")).unwrap();

    let dest = fx.root.join("out");
    let summary = fx
        .engine
        .copy(
            &fx.inventory,
            &src.to_string_lossy(),
            &dest.to_string_lossy(),
            &CopyOptions {
                recursive: true,
                ..CopyOptions::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(summary.copied, 2);
    assert_eq!(std::fs::read(dest.join("a.txt")).unwrap(), b"a");
    assert_eq!(std::fs::read(dest.join("sub/deep/b.txt")).unwrap(), b"b");
    assert!(dest.join("hollow").is_dir());
}

#[tokio::test]
async fn glob_copies_only_matching_extension() {
    let fx = fixture();
    let src = fx.root.join("data");
    write(&src.join("one.txt"), b"1");
    write(&src.join("two.txt"), b"2");
    write(&src.join("skip.log"), b"x");

    let dest = fx.root.join("out");
    std::fs::create_dir_all(&dest).unwrap();

    let pattern = format!("{}/*.txt", src.display());
    let summary = fx
        .engine
        .copy(
            &fx.inventory,
            &pattern,
            &dest.to_string_lossy(),
            &CopyOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(summary.copied, 2);
    assert!(dest.join("one.txt").exists());
    assert!(dest.join("two.txt").exists());
    assert!(!dest.join("skip.log").exists());
}

#[tokio::test]
async fn name_template_renames_every_match() {
    let fx = fixture();
    let src = fx.root.join("data");
    write(&src.join("a.txt"), b"alpha");
    write(&src.join("b.cfg"), b"beta");

    let pattern = format!("{}/*", src.display());
    let template = format!("{}/backup/{{name}}-backup", fx.root.display());
    let summary = fx
        .engine
        .copy(
            &fx.inventory,
            &pattern,
            &template,
            &CopyOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(summary.copied, 2);
    assert_eq!(
        std::fs::read(fx.root.join("backup/a.txt-backup")).unwrap(),
        b"alpha"
    );
    assert_eq!(
        std::fs::read(fx.root.join("backup/b.cfg-backup")).unwrap(),
        b"beta"
    );
}

#[tokio::test]
async fn preserve_keeps_mtime_within_tolerance() {
    let fx = fixture();
    let src = fx.root.join("stamped.txt");
    write(&src, b"x");
    let old = std::time::SystemTime::now() - Duration::from_secs(7200);
    std::fs::OpenOptions::new()
        .write(true)
        .open(&src)
        .unwrap()
        .set_modified(old)
        .unwrap();

    let dest = fx.root.join("copy.txt");
    fx.engine
        .copy(
            &fx.inventory,
            &src.to_string_lossy(),
            &dest.to_string_lossy(),
            &CopyOptions {
                preserve: true,
                ..CopyOptions::default()
            },
        )
        .await
        .unwrap();

    let src_mtime = std::fs::metadata(&src).unwrap().modified().unwrap();
    let dest_mtime = std::fs::metadata(&dest).unwrap().modified().unwrap();
    let drift = src_mtime
        .duration_since(dest_mtime)
        .unwrap_or_else(|e| e.duration());
    assert!(drift < Duration::from_millis(1000), "drift was {drift:?}");
}

#[tokio::test]
async fn existing_destination_is_skipped_without_force() {
    let fx = fixture();
    let src = fx.root.join("new.txt");
    let dest = fx.root.join("existing.txt");
    write(&src, b"new content");
    write(&dest, b"keep me");

    let summary = fx
        .engine
        .copy(
            &fx.inventory,
            &src.to_string_lossy(),
            &dest.to_string_lossy(),
            &CopyOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.copied, 0);
    assert_eq!(std::fs::read(&dest).unwrap(), b"keep me");
}

#[tokio::test]
async fn force_overwrites_existing_destination() {
    let fx = fixture();
    let src = fx.root.join("new.txt");
    let dest = fx.root.join("existing.txt");
    write(&src, b"new content");
    write(&dest, b"old content");

    let summary = fx
        .engine
        .copy(
            &fx.inventory,
            &src.to_string_lossy(),
            &dest.to_string_lossy(),
            &CopyOptions {
                force: true,
                ..CopyOptions::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(summary.copied, 1);
    assert_eq!(std::fs::read(&dest).unwrap(), b"new content");
}

#[tokio::test]
async fn parallel_copy_moves_every_file() {
    let fx = fixture();
    let src = fx.root.join("many");
    for i in 0..10 {
        write(&src.join(format!("file-{i}.txt")), format!("payload {i}").as_bytes());
    }

    let dest = fx.root.join("out/");
    let pattern = format!("{}/*.txt", src.display());
    let summary = fx
        .engine
        .copy(
            &fx.inventory,
            &pattern,
            &dest.to_string_lossy(),
            &CopyOptions {
                parallel: true,
                max_concurrent: 5,
                ..CopyOptions::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(summary.copied, 10);
    assert!(summary.success());
    for i in 0..10 {
        assert_eq!(
            std::fs::read(fx.root.join(format!("out/file-{i}.txt"))).unwrap(),
            format!("payload {i}").as_bytes()
        );
    }
}

#[tokio::test]
async fn dry_run_reports_pairs_and_touches_nothing() {
    let fx = fixture();
    let src = fx.root.join("data");
    write(&src.join("a.txt"), b"a");
    write(&src.join("b.txt"), b"b");

    let dest = fx.root.join("out/");
    let pattern = format!("{}/*.txt", src.display());
    let summary = fx
        .engine
        .copy(
            &fx.inventory,
            &pattern,
            &dest.to_string_lossy(),
            &CopyOptions {
                dry_run: true,
                ..CopyOptions::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(summary.planned, 2);
    assert_eq!(summary.copied, 0);
    assert!(!fx.root.join("out").exists());
    assert!(fx.reporter.contains("would copy"));
    assert!(fx.reporter.contains("a.txt"));
    assert!(fx.reporter.contains("b.txt"));
}

#[tokio::test]
async fn glob_matching_nothing_reports_no_items() {
    let fx = fixture();
    let src = fx.root.join("data");
    std::fs::create_dir_all(&src).unwrap();

    let pattern = format!("{}/*.txt", src.display());
    let summary = fx
        .engine
        .copy(
            &fx.inventory,
            &pattern,
            &fx.root.join("out/").to_string_lossy(),
            &CopyOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(summary.planned, 0);
    assert!(fx.reporter.contains("no files matched"));
}

#[tokio::test]
async fn missing_explicit_source_is_an_error() {
    let fx = fixture();
    let err = fx
        .engine
        .copy(
            &fx.inventory,
            &fx.root.join("nope.txt").to_string_lossy(),
            &fx.root.join("out.txt").to_string_lossy(),
            &CopyOptions::default(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, CopyError::SourceMissing(_)));
}

#[tokio::test]
async fn empty_specs_fail_validation() {
    let fx = fixture();
    let err = fx
        .engine
        .copy(&fx.inventory, "", "somewhere", &CopyOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, CopyError::Validation(_)));

    let err = fx
        .engine
        .copy(&fx.inventory, "somewhere", " ", &CopyOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, CopyError::Validation(_)));
}

#[tokio::test]
async fn many_files_into_plain_file_destination_is_invalid() {
    let fx = fixture();
    let src = fx.root.join("data");
    write(&src.join("a.txt"), b"a");
    write(&src.join("b.txt"), b"b");

    let pattern = format!("{}/*.txt", src.display());
    let err = fx
        .engine
        .copy(
            &fx.inventory,
            &pattern,
            &fx.root.join("single-file.txt").to_string_lossy(),
            &CopyOptions::default(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, CopyError::Validation(_)));
}
