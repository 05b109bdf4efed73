use std::io::Write;

use vfs_index::Context;

fn write_zip(path: &std::path::Path, entries: &[(&str, &[u8])]) {
    let file = std::fs::File::create(path).unwrap();
    let mut writer = zip::ZipWriter::new(file);
    let options = zip::write::SimpleFileOptions::default();
    for (name, contents) in entries {
        writer.start_file(*name, options).unwrap();
        writer.write_all(contents).unwrap();
    }
    writer.finish().unwrap();
}

#[test]
fn s1_empty_scan_yields_empty_index() {
    let scratch = tempfile::tempdir().unwrap();
    let source = tempfile::tempdir().unwrap();

    let ctx = Context::new(scratch.path());
    ctx.add_root(source.path()).unwrap();

    assert!(ctx.index().all_files().is_empty());
}

#[test]
fn s2_flat_directory_indexes_every_file() {
    let scratch = tempfile::tempdir().unwrap();
    let source = tempfile::tempdir().unwrap();
    std::fs::write(source.path().join("a.txt"), format!("hello{}", " ".repeat(5))).unwrap();
    std::fs::write(source.path().join("b.bin"), b"hi").unwrap();
    std::fs::write(source.path().join("c.dat"), vec![0u8; 100]).unwrap();

    let ctx = Context::new(scratch.path());
    ctx.add_root(source.path()).unwrap();

    let index = ctx.index();
    assert_eq!(index.all_files().len(), 3);
    for name in ["a.txt", "b.bin", "c.dat"] {
        let path = source.path().join(name).to_string_lossy().into_owned();
        let file = index.by_root_path(&path).unwrap();
        assert!(file.parent().is_none());
        assert!(file.hash().is_some());
    }
}

#[test]
fn s3_rescan_of_unchanged_directory_reuses_nodes() {
    let scratch = tempfile::tempdir().unwrap();
    let source = tempfile::tempdir().unwrap();
    std::fs::write(source.path().join("a.txt"), b"hello").unwrap();

    let ctx = Context::new(scratch.path());
    ctx.add_root(source.path()).unwrap();
    let first = ctx.index().all_files()[0].clone();

    ctx.add_root(source.path()).unwrap();
    let second = ctx.index().all_files()[0].clone();

    assert_eq!(first, second);
    assert_eq!(first.hash(), second.hash());
    assert_eq!(first.last_modified(), second.last_modified());
}

#[test]
fn s4_archive_descent_hashes_nested_contents() {
    let scratch = tempfile::tempdir().unwrap();
    let source = tempfile::tempdir().unwrap();
    write_zip(&source.path().join("pack.zip"), &[("inner/x.txt", b"hello")]);

    let ctx = Context::new(scratch.path());
    ctx.add_root(source.path()).unwrap();

    let index = ctx.index();
    assert_eq!(index.all_files().len(), 1);
    let root = &index.all_files()[0];
    let children = root.children();
    assert_eq!(children.len(), 1);
    assert_eq!(children[0].name(), "inner/x.txt");
    assert_eq!(children[0].parent().as_ref(), Some(root));
    assert!(children[0].hash().is_some());
    assert_ne!(children[0].hash(), root.hash());
}

#[test]
fn s5_staging_extracts_outer_archives_before_inner_ones() {
    let scratch = tempfile::tempdir().unwrap();
    let source = tempfile::tempdir().unwrap();

    let middle_path = source.path().join("middle.zip");
    write_zip(&middle_path, &[("leaf.txt", b"leaf contents")]);
    let middle_bytes = std::fs::read(&middle_path).unwrap();
    write_zip(&source.path().join("outer.zip"), &[("middle.zip", &middle_bytes)]);

    let ctx = Context::new(scratch.path());
    ctx.add_root(source.path()).unwrap();

    let index = ctx.index();
    let outer = &index.all_files()[0];
    let middle = outer.children().into_iter().find(|f| f.name() == "middle.zip").unwrap();
    let leaf = middle.children().into_iter().find(|f| f.name() == "leaf.txt").unwrap();

    let stager = ctx.stager();
    let handle = stager.stage(&[leaf.clone()]).unwrap();

    let leaf_path = leaf.staged_path().expect("leaf should be staged");
    assert!(leaf_path.exists());
    let middle_path_staged = middle.staged_path().expect("middle archive should be staged too");
    assert!(middle_path_staged.exists());
    assert_eq!(std::fs::read(&leaf_path).unwrap(), b"leaf contents");

    handle.release();
    assert!(!leaf_path.exists());
    assert!(!middle_path_staged.exists());
    assert!(leaf.staged_path().is_none());
    assert!(middle.staged_path().is_none());
}

#[test]
fn s6_cache_round_trip_preserves_every_derived_table() {
    let scratch = tempfile::tempdir().unwrap();
    let source = tempfile::tempdir().unwrap();
    write_zip(&source.path().join("pack.zip"), &[("inner/x.txt", b"hello")]);

    let ctx = Context::new(scratch.path());
    ctx.add_root(source.path()).unwrap();

    let mut bytes = Vec::new();
    ctx.write_to_file(&mut bytes).unwrap();

    let restored_scratch = tempfile::tempdir().unwrap();
    let restored = Context::new(restored_scratch.path());
    restored.integrate_from_file(&mut std::io::Cursor::new(bytes)).unwrap();

    let original_index = ctx.index();
    let restored_index = restored.index();

    let original_root = &original_index.all_files()[0];
    let restored_root = &restored_index.all_files()[0];
    assert_eq!(original_root.name(), restored_root.name());
    assert_eq!(original_root.hash(), restored_root.hash());

    let original_child = original_root.children().into_iter().next().unwrap();
    let restored_child = restored_root.children().into_iter().next().unwrap();
    assert_eq!(original_child.name(), restored_child.name());
    assert_eq!(original_child.hash(), restored_child.hash());

    assert_eq!(
        restored_index.by_hash(original_child.hash().unwrap()).len(),
        original_index.by_hash(original_child.hash().unwrap()).len()
    );
    assert_eq!(
        restored_index.by_name("inner/x.txt").len(),
        original_index.by_name("inner/x.txt").len()
    );

    assert_eq!(
        restored_index.by_root_path(original_root.name()).map(|f| f.hash()),
        Some(original_root.hash())
    );
    assert_eq!(
        restored_index.by_full_path(&restored_child.full_path()).map(|f| f.hash()),
        Some(original_child.hash())
    );
}
