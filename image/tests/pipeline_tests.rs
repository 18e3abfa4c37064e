// Integration tests for the image pipeline
// Builds, extends, forks and verifies images end to end through the local engine

#![cfg(unix)]

use cim_core::StreamName;
use cim_image::local::manifest::Manifest;
use cim_image::{
    CimError, ImageBuilder, ImageExtender, ImageForker, ImageIdentity, ImageVerifier,
    LinkOutcome, LocalEngine, Mismatch, MountSession, PipelineConfig, RelativePath,
};
use std::fs;
use std::io::Read;
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

struct Workspace {
    dir: TempDir,
    engine: LocalEngine,
    config: PipelineConfig,
}

impl Workspace {
    fn new() -> Self {
        let _ = env_logger::builder().is_test(true).try_init();
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let config = PipelineConfig {
            mount_root: Some(dir.path().join("volumes")),
            ..Default::default()
        };
        let engine = LocalEngine::new(&config);
        fs::create_dir(dir.path().join("src")).expect("Failed to create source dir");
        Self { dir, engine, config }
    }

    fn container(&self) -> PathBuf {
        self.dir.path().join("img")
    }

    fn src(&self, relative: &str) -> PathBuf {
        self.dir.path().join("src").join(relative)
    }

    fn write(&self, relative: &str, contents: &[u8]) -> PathBuf {
        let path = self.src(relative);
        fs::create_dir_all(path.parent().unwrap()).expect("Failed to create parent");
        fs::write(&path, contents).expect("Failed to write source");
        path
    }

    fn identity(&self, name: &str) -> ImageIdentity {
        ImageIdentity::new(self.container(), name).expect("Failed to build identity")
    }

    fn image_bytes(&self, name: &str) -> Vec<u8> {
        fs::read(self.container().join(name)).expect("Failed to read image manifest")
    }

    fn builder(&self) -> ImageBuilder<'_, LocalEngine> {
        ImageBuilder::new(&self.engine, &self.config)
    }

    fn verifier(&self) -> ImageVerifier<'_, LocalEngine> {
        ImageVerifier::new(&self.engine, &self.config)
    }
}

fn rel(path: &str) -> RelativePath {
    RelativePath::parse(path).expect("Failed to parse image path")
}

fn set_stream(path: &Path, name: &str, value: &[u8]) -> bool {
    xattr::set(path, format!("user.{}", name), value).is_ok()
}

#[test]
fn test_single_file_round_trip() {
    let ws = Workspace::new();
    let contents: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
    let source = ws.write("file.txt", &contents);

    let image = ws
        .builder()
        .build_new(&ws.container(), "a.cim", &source, &rel("file.txt"))
        .expect("Failed to build image");
    assert_eq!(image, ws.identity("a.cim"));

    let (mismatches, read_back) = MountSession::new(&ws.engine)
        .with_mount(&image, |root| {
            let mounted = root.join("file.txt");
            let mismatches = ws.verifier().compare_entry(&source, &mounted);
            (mismatches, fs::read(&mounted))
        })
        .expect("Failed to mount");

    assert_eq!(mismatches.expect("Failed to compare"), Vec::new());
    assert_eq!(read_back.expect("Failed to read mounted file"), contents);
}

#[test]
fn test_nested_image_path() {
    let ws = Workspace::new();
    let source = ws.write("file.txt", b"nested");
    let image = ws
        .builder()
        .build_new(&ws.container(), "a.cim", &source, &rel("x\\y\\renamed.txt"))
        .expect("Failed to build image");

    let mismatches = ws
        .verifier()
        .verify_entry(&image, &source, &rel("x/y/renamed.txt"))
        .expect("Failed to verify");
    assert!(mismatches.is_empty(), "{:?}", mismatches);
}

#[test]
fn test_directory_entry_has_no_content() {
    let ws = Workspace::new();
    let source = ws.src("dir");
    fs::create_dir(&source).unwrap();
    fs::write(source.join("ignored.txt"), b"not part of a single-entry build").unwrap();

    let image = ws
        .builder()
        .build_new(&ws.container(), "a.cim", &source, &rel("dir"))
        .expect("Directory build must not fail");

    let manifest = Manifest::load(&ws.container().join("a.cim")).unwrap();
    let node = manifest.lookup(&rel("dir")).expect("directory entry missing");
    assert!(node.is_directory());
    assert_eq!(node.file_size, 0);
    assert!(node.content.is_none());
    assert!(node.streams.is_empty());
    assert_eq!(manifest.paths.len(), 1);

    let verifier = ws.verifier();
    assert!(verifier.verify_entry(&image, &source, &rel("dir")).unwrap().is_empty());
    assert!(!verifier.path_exists(&image, &rel("dir/ignored.txt")).unwrap());
}

#[test]
fn test_fork_isolation() {
    let ws = Workspace::new();
    let source = ws.write("file.txt", b"base content");
    let base = ws
        .builder()
        .build_new(&ws.container(), "a.cim", &source, &rel("file.txt"))
        .unwrap();
    let base_bytes = ws.image_bytes("a.cim");

    let fork = ImageForker::new(&ws.engine)
        .fork_with_deletion(&base, &rel("file.txt"), "a_fork.cim")
        .expect("Failed to fork");
    assert_eq!(fork, ws.identity("a_fork.cim"));

    let verifier = ws.verifier();
    assert!(!verifier.path_exists(&fork, &rel("file.txt")).unwrap());
    assert!(verifier.path_exists(&base, &rel("file.txt")).unwrap());
    assert!(verifier.verify_entry(&base, &source, &rel("file.txt")).unwrap().is_empty());
    assert_eq!(ws.image_bytes("a.cim"), base_bytes);
}

#[test]
fn test_fork_of_directory_removes_subtree() {
    let ws = Workspace::new();
    ws.write("tree/keep.txt", b"keep");
    ws.write("tree/sub/a.txt", b"a");
    ws.write("tree/sub/b.txt", b"b");
    let base = ws
        .builder()
        .build_tree(&ws.container(), "a.cim", &ws.src("tree"))
        .unwrap();

    let fork = ImageForker::new(&ws.engine)
        .fork_with_deletion(&base, &rel("sub"), "b.cim")
        .unwrap();

    let verifier = ws.verifier();
    assert!(!verifier.path_exists(&fork, &rel("sub/a.txt")).unwrap());
    assert!(!verifier.path_exists(&fork, &rel("sub")).unwrap());
    assert!(verifier.path_exists(&fork, &rel("keep.txt")).unwrap());
    assert!(verifier.path_exists(&base, &rel("sub/b.txt")).unwrap());
}

#[test]
fn test_fork_onto_base_name_leaves_base_intact() {
    let ws = Workspace::new();
    let source = ws.write("file.txt", b"keep me");
    let base = ws
        .builder()
        .build_new(&ws.container(), "a.cim", &source, &rel("file.txt"))
        .unwrap();
    let base_bytes = ws.image_bytes("a.cim");

    let err = ImageForker::new(&ws.engine)
        .fork_with_deletion(&base, &rel("file.txt"), "a.cim")
        .unwrap_err();
    assert!(err.is_already_exists());

    assert_eq!(ws.image_bytes("a.cim"), base_bytes);
    assert!(ws.verifier().path_exists(&base, &rel("file.txt")).unwrap());
}

#[test]
fn test_fork_missing_path_is_not_found() {
    let ws = Workspace::new();
    let source = ws.write("file.txt", b"x");
    let base = ws
        .builder()
        .build_new(&ws.container(), "a.cim", &source, &rel("file.txt"))
        .unwrap();

    let err = ImageForker::new(&ws.engine)
        .fork_with_deletion(&base, &rel("nope.txt"), "b.cim")
        .unwrap_err();
    assert!(err.is_not_found());
    assert!(!ws.container().join("b.cim").exists());
}

#[test]
fn test_hardlink_identity() {
    let ws = Workspace::new();
    ws.write("tree/a.txt", b"shared bytes");
    ws.write("tree/b.txt", b"other bytes");
    let image = ws
        .builder()
        .build_tree(&ws.container(), "a.cim", &ws.src("tree"))
        .unwrap();

    let outcome = ImageExtender::new(&ws.engine)
        .add_hardlink(&image, &rel("a.txt"), &rel("links/a_link.txt"))
        .expect("Failed to add hardlink");
    assert_eq!(outcome, LinkOutcome::Linked);

    let verifier = ws.verifier();
    assert!(verifier
        .verify_hardlink(&image, &rel("a.txt"), &rel("links/a_link.txt"))
        .unwrap());
    assert!(!verifier
        .verify_hardlink(&image, &rel("a.txt"), &rel("b.txt"))
        .unwrap());
    assert!(verifier
        .verify_entry(&image, &ws.src("tree/a.txt"), &rel("links/a_link.txt"))
        .unwrap()
        .is_empty());
}

#[test]
fn test_hardlink_to_directory_is_reported_not_committed() {
    let ws = Workspace::new();
    ws.write("tree/dir/file.txt", b"x");
    let image = ws
        .builder()
        .build_tree(&ws.container(), "a.cim", &ws.src("tree"))
        .unwrap();
    let before = ws.image_bytes("a.cim");

    let outcome = ImageExtender::new(&ws.engine)
        .add_hardlink(&image, &rel("dir"), &rel("dir_link"))
        .expect("Directory link must not be an error");
    assert_eq!(outcome, LinkOutcome::DirectoryNotLinked);
    assert_eq!(ws.image_bytes("a.cim"), before);
}

#[test]
fn test_existing_targets_are_rejected_without_mutation() {
    let ws = Workspace::new();
    let first = ws.write("first.txt", b"first");
    let second = ws.write("second.txt", b"second");
    let image = ws
        .builder()
        .build_new(&ws.container(), "a.cim", &first, &rel("first.txt"))
        .unwrap();
    ws.builder()
        .build_new(&ws.container(), "b.cim", &second, &rel("second.txt"))
        .unwrap();
    let a_bytes = ws.image_bytes("a.cim");
    let b_bytes = ws.image_bytes("b.cim");

    let err = ws
        .builder()
        .build_new(&ws.container(), "a.cim", &second, &rel("second.txt"))
        .unwrap_err();
    assert!(matches!(err, CimError::AlreadyExists(_)));

    let err = ImageForker::new(&ws.engine)
        .fork_with_deletion(&image, &rel("first.txt"), "b.cim")
        .unwrap_err();
    assert!(err.is_already_exists());

    let err = ImageExtender::new(&ws.engine)
        .add_hardlink(&image, &rel("first.txt"), &rel("first.txt"))
        .unwrap_err();
    assert!(err.is_already_exists());

    assert_eq!(ws.image_bytes("a.cim"), a_bytes);
    assert_eq!(ws.image_bytes("b.cim"), b_bytes);
    assert!(ws.container().exists());
}

#[test]
fn test_alternate_stream_round_trip() {
    let ws = Workspace::new();
    let source = ws.write("file.txt", b"main content");
    let payload = vec![0xABu8; 300];
    if !set_stream(&source, "notes", &payload) {
        eprintln!("Skipping: extended attributes unsupported on this filesystem");
        return;
    }

    let image = ws
        .builder()
        .build_new(&ws.container(), "a.cim", &source, &rel("file.txt"))
        .unwrap();

    let streams = MountSession::new(&ws.engine)
        .with_mount(&image, |root| {
            let mounted = root.join("file.txt");
            let mismatches = ws.verifier().compare_entry(&source, &mounted).unwrap();
            let meta = cim_image::MetadataExtractor::default().extract(&mounted).unwrap();
            let mut bytes = Vec::new();
            cim_platform::open_alternate_stream(&mounted, &StreamName::data("notes").unwrap())
                .unwrap()
                .read_to_end(&mut bytes)
                .unwrap();
            (mismatches, meta.alternate_streams, bytes)
        })
        .unwrap();

    let (mismatches, listed, bytes) = streams;
    assert!(mismatches.is_empty(), "{:?}", mismatches);
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].name.name(), "notes");
    assert_eq!(listed[0].size, 300);
    assert_eq!(bytes, payload);
}

#[test]
fn test_tree_round_trip() {
    let ws = Workspace::new();
    ws.write("tree/readme.md", b"# tree");
    ws.write("tree/docs/guide.txt", &vec![b'g'; 70_000]);
    ws.write("tree/docs/empty.txt", b"");
    fs::create_dir_all(ws.src("tree/empty_dir")).unwrap();
    symlink("docs/guide.txt", ws.src("tree/guide_link")).unwrap();

    let image = ws
        .builder()
        .build_tree(&ws.container(), "tree.cim", &ws.src("tree"))
        .expect("Failed to build tree");

    let report = ws
        .verifier()
        .verify_image_tree(&image, &ws.src("tree"))
        .expect("Failed to verify tree");
    assert_eq!(report.entries_checked, 6);
    assert!(report.is_clean(), "{:?}", report.mismatches);
}

#[test]
fn test_path_below_a_file_does_not_exist() {
    let ws = Workspace::new();
    let source = ws.write("file.txt", b"leaf");
    let image = ws
        .builder()
        .build_new(&ws.container(), "a.cim", &source, &rel("file.txt"))
        .unwrap();

    let verifier = ws.verifier();
    assert!(verifier.path_exists(&image, &rel("file.txt")).unwrap());
    assert!(!verifier.path_exists(&image, &rel("file.txt/child")).unwrap());
}

#[test]
fn test_tree_with_fifo_builds_and_verifies() {
    let ws = Workspace::new();
    ws.write("tree/data.txt", b"data");
    nix::unistd::mkfifo(&ws.src("tree/pipe"), nix::sys::stat::Mode::S_IRWXU)
        .expect("Failed to create fifo");

    let image = ws
        .builder()
        .build_tree(&ws.container(), "tree.cim", &ws.src("tree"))
        .expect("Failed to build tree");

    let report = ws
        .verifier()
        .verify_image_tree(&image, &ws.src("tree"))
        .expect("Failed to verify tree");
    assert_eq!(report.entries_checked, 2);
    assert!(report.is_clean(), "{:?}", report.mismatches);
}

#[test]
fn test_modified_source_is_reported() {
    let ws = Workspace::new();
    let source = ws.write("file.txt", b"original");
    let image = ws
        .builder()
        .build_new(&ws.container(), "a.cim", &source, &rel("file.txt"))
        .unwrap();
    fs::write(&source, b"changed!").unwrap();

    let mismatches = ws
        .verifier()
        .verify_entry(&image, &source, &rel("file.txt"))
        .unwrap();
    assert!(mismatches.contains(&Mismatch::ContentBytes { offset: 0 }));

    let strict = PipelineConfig { mismatches_fatal: true, ..ws.config.clone() };
    let err = ImageVerifier::new(&ws.engine, &strict)
        .verify_entry(&image, &source, &rel("file.txt"))
        .unwrap_err();
    assert!(matches!(err, CimError::VerificationFailed(n) if n == mismatches.len()));
}

#[test]
fn test_forks_share_objects() {
    let ws = Workspace::new();
    ws.write("tree/a.bin", &vec![1u8; 10_000]);
    ws.write("tree/b.bin", &vec![2u8; 10_000]);
    let base = ws
        .builder()
        .build_tree(&ws.container(), "a.cim", &ws.src("tree"))
        .unwrap();
    ImageForker::new(&ws.engine)
        .fork_with_deletion(&base, &rel("b.bin"), "b.cim")
        .unwrap();

    let objects = fs::read_dir(ws.container().join("objects"))
        .unwrap()
        .filter(|e| e.as_ref().unwrap().file_type().unwrap().is_file())
        .count();
    assert_eq!(objects, 2);

    assert_eq!(
        ws.engine.list_images(&ws.container()).unwrap(),
        vec!["a.cim".to_string(), "b.cim".to_string()]
    );
    assert_eq!(ws.engine.collect_garbage(&ws.container()).unwrap(), 0);
}
