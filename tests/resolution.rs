//! End-to-end resolution scenarios over tempdir project fixtures.

use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use semver::Version;
use serde_json::{json, Value};
use tempfile::TempDir;

use fpm::downloader::unpack_archive;
use fpm::{Downloader, Error, OutputSink, Tree};

/// Canned downloader that serves a fixed registry response and archive,
/// recording every call.
struct MockDownloader {
    response: Value,
    archive: Vec<u8>,
    queries: RefCell<Vec<String>>,
    downloads: RefCell<Vec<String>>,
}

impl MockDownloader {
    fn new(response: Value, archive: Vec<u8>) -> Self {
        Self {
            response,
            archive,
            queries: RefCell::new(Vec::new()),
            downloads: RefCell::new(Vec::new()),
        }
    }

    /// A downloader for scenarios that must not touch the network.
    fn unused() -> Self {
        Self::new(Value::Null, Vec::new())
    }

    fn query_count(&self) -> usize {
        self.queries.borrow().len() + self.downloads.borrow().len()
    }
}

impl Downloader for MockDownloader {
    fn get_pkg_data(&self, url: &str, _requested_version: Option<&Version>) -> fpm::Result<Value> {
        self.queries.borrow_mut().push(url.to_string());
        Ok(self.response.clone())
    }

    fn get_file(&self, url: &str, dest: &Path) -> fpm::Result<()> {
        self.downloads.borrow_mut().push(url.to_string());
        fs::write(dest, &self.archive)?;
        Ok(())
    }
}

/// Write an `fpm.toml` (and its directory) under `dir`.
fn write_manifest(dir: &Path, content: &str) {
    fs::create_dir_all(dir).unwrap();
    fs::write(dir.join("fpm.toml"), content).unwrap();
}

fn quiet_tree(tmp: &TempDir) -> Tree {
    Tree::new()
        .with_output(OutputSink::Quiet)
        .with_dep_dir(tmp.path().join("deps"))
        .with_settings_path(tmp.path().join("no-config.toml"))
}

fn link_names(tree: &Tree) -> Vec<String> {
    tree.link_order(0)
        .unwrap()
        .into_iter()
        .map(|id| tree.nodes[id].name.clone())
        .collect()
}

#[test]
fn path_only_tree_resolves_and_orders() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().join("proj");
    write_manifest(
        &root,
        r#"
        name = "demo"
        version = "0.1.0"
        [dependencies]
        a = { path = "./a" }
        b = { path = "./b" }
        "#,
    );
    write_manifest(
        &root.join("a"),
        "name = \"a\"\n[dependencies]\nc = { path = \"../c\" }\n",
    );
    write_manifest(&root.join("b"), "name = \"b\"\n");
    write_manifest(&tmp.path().join("c"), "name = \"c\"\n");

    let mut tree = quiet_tree(&tmp);
    let mock = MockDownloader::unused();
    tree.add_project_with(&root, &mock).unwrap();

    assert_eq!(tree.nodes.len(), 4);
    assert!(tree.finished());
    assert_eq!(mock.query_count(), 0);

    // Every requirement set references tree members only.
    for node in &tree.nodes {
        for name in node.package_dep.as_ref().unwrap() {
            assert!(tree.find(name).is_some());
        }
    }
    assert_eq!(
        tree.node("demo").unwrap().package_dep.as_ref().unwrap(),
        &vec!["a".to_string(), "b".to_string(), "c".to_string()]
    );
    assert_eq!(
        tree.node("a").unwrap().package_dep.as_ref().unwrap(),
        &vec!["c".to_string()]
    );

    assert_eq!(link_names(&tree), vec!["c", "a", "b", "demo"]);
}

#[test]
fn second_resolve_is_idempotent() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().join("proj");
    write_manifest(
        &root,
        "name = \"demo\"\n[dependencies]\na = { path = \"./a\" }\n",
    );
    write_manifest(&root.join("a"), "name = \"a\"\n");

    let mut tree = quiet_tree(&tmp);
    let mock = MockDownloader::unused();
    tree.add_project_with(&root, &mock).unwrap();

    let before = tree.nodes.clone();
    tree.resolve(&root, &mock).unwrap();
    assert_eq!(tree.nodes, before);
    assert_eq!(mock.query_count(), 0);
}

#[test]
fn diamond_link_order_is_deterministic() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().join("proj");
    write_manifest(
        &root,
        r#"
        name = "demo"
        [dependencies]
        a = { path = "./a" }
        b = { path = "./b" }
        "#,
    );
    write_manifest(
        &root.join("a"),
        "name = \"a\"\n[dependencies]\nc = { path = \"./c\" }\n",
    );
    write_manifest(
        &root.join("b"),
        "name = \"b\"\n[dependencies]\nc = { path = \"./c\" }\n",
    );
    write_manifest(&root.join("c"), "name = \"c\"\n");

    let mut tree = quiet_tree(&tmp);
    tree.add_project_with(&root, &MockDownloader::unused()).unwrap();

    let order = link_names(&tree);
    assert_eq!(order, vec!["c", "a", "b", "demo"]);

    // A fresh resolution of the same layout orders identically.
    let mut again = quiet_tree(&tmp);
    again
        .add_project_with(&root, &MockDownloader::unused())
        .unwrap();
    assert_eq!(link_names(&again), order);
}

#[test]
fn cache_hit_skips_refetch() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().join("proj");
    write_manifest(
        &root,
        "name = \"demo\"\n[dependencies]\na = { path = \"./a\" }\n",
    );
    write_manifest(&root.join("a"), "name = \"a\"\nversion = \"1.2.0\"\n");

    let cache_file = tmp.path().join("cache.toml");
    let mut first = quiet_tree(&tmp).with_cache(&cache_file);
    first
        .add_project_with(&root, &MockDownloader::unused())
        .unwrap();
    assert!(cache_file.is_file());

    let mock = MockDownloader::unused();
    let mut second = quiet_tree(&tmp).with_cache(&cache_file);
    second.add_project_with(&root, &mock).unwrap();

    let node = second.node("a").unwrap();
    assert!(node.cached);
    assert!(!node.update);
    assert_eq!(node.resolved_version, Some(Version::new(1, 2, 0)));
    assert_eq!(mock.query_count(), 0);
}

#[test]
fn changed_git_pin_invalidates_cached_entry() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().join("proj");
    write_manifest(
        &root,
        r#"
        name = "demo"
        [dependencies]
        a = { git = "https://example.com/a.git", rev = "bbbb" }
        "#,
    );

    // A prior snapshot that pinned a different revision.
    let cache_file = tmp.path().join("cache.toml");
    fs::write(
        &cache_file,
        r#"
        ndep = 2
        [dependencies.demo]
        path = "."
        done = true
        [dependencies.a]
        git = "https://example.com/a.git"
        rev = "aaaa"
        revision = "aaaa"
        done = true
        "#,
    )
    .unwrap();

    let mut tree = quiet_tree(&tmp).with_cache(&cache_file);
    let package = fpm::read_manifest(&root.join("fpm.toml")).unwrap();
    tree.add_node(fpm::Node::new(
        "demo",
        fpm::Origin::Path {
            path: PathBuf::from("."),
        },
    ));
    tree.nodes[0].done = true;
    tree.nodes[0].proj_dir = Some(root.clone());
    tree.add_manifest(&package, true).unwrap();

    let mut snapshot = Tree::new();
    snapshot.load_cache(&cache_file).unwrap();
    for mut node in snapshot.nodes.into_iter().skip(1) {
        node.cached = true;
        tree.add_node(node);
    }

    let node = tree.node("a").unwrap();
    assert!(node.update);
    assert!(!node.done);
}

#[test]
fn registry_miss_downloads_and_unpacks() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().join("proj");
    write_manifest(
        &root,
        r#"
        name = "demo"
        [dependencies]
        pkg = { namespace = "ns", v = "2.0.0" }
        "#,
    );

    let cache_root = tmp.path().join("registry-cache");
    let config = tmp.path().join("config.toml");
    fs::write(
        &config,
        format!(
            "[registry]\nurl = \"https://registry.test\"\ncache_path = \"{}\"\n",
            cache_root.display()
        ),
    )
    .unwrap();

    let response = json!({
        "code": 200,
        "data": {
            "version_data": {
                "download_url": "/download/ns/pkg/2.0.0.tar.gz",
                "version": "2.0.0"
            }
        }
    });
    let mock = MockDownloader::new(response, tar_gz(&[(
        "fpm.toml",
        "name = \"pkg\"\nversion = \"2.0.0\"\n",
    )]));

    let mut tree = Tree::new()
        .with_output(OutputSink::Quiet)
        .with_dep_dir(tmp.path().join("deps"))
        .with_settings_path(&config);
    tree.add_project_with(&root, &mock).unwrap();

    assert_eq!(
        mock.queries.borrow().as_slice(),
        ["https://registry.test/packages/ns/pkg"]
    );
    assert_eq!(
        mock.downloads.borrow().as_slice(),
        ["https://registry.test/download/ns/pkg/2.0.0.tar.gz"]
    );

    let node = tree.node("pkg").unwrap();
    let expected_dir = cache_root.join("ns").join("pkg").join("2.0.0");
    assert_eq!(node.proj_dir.as_ref().unwrap(), &expected_dir);
    assert_eq!(node.resolved_version, Some(Version::new(2, 0, 0)));
    assert!(expected_dir.join("fpm.toml").is_file());
}

#[test]
fn registry_download_cache_is_reused() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().join("proj");
    write_manifest(
        &root,
        "name = \"demo\"\n[dependencies]\npkg = { namespace = \"ns\", v = \"2.0.0\" }\n",
    );

    let cache_root = tmp.path().join("registry-cache");
    let unpacked = cache_root.join("ns").join("pkg").join("2.0.0");
    write_manifest(&unpacked, "name = \"pkg\"\nversion = \"2.0.0\"\n");

    let config = tmp.path().join("config.toml");
    fs::write(
        &config,
        format!(
            "[registry]\nurl = \"https://registry.test\"\ncache_path = \"{}\"\n",
            cache_root.display()
        ),
    )
    .unwrap();

    let mock = MockDownloader::unused();
    let mut tree = Tree::new()
        .with_output(OutputSink::Quiet)
        .with_dep_dir(tmp.path().join("deps"))
        .with_settings_path(&config);
    tree.add_project_with(&root, &mock).unwrap();

    assert_eq!(mock.query_count(), 0);
    assert_eq!(tree.node("pkg").unwrap().proj_dir.as_ref().unwrap(), &unpacked);
}

#[test]
fn local_registry_is_preferred() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().join("proj");
    write_manifest(
        &root,
        "name = \"demo\"\n[dependencies]\npkg = { namespace = \"ns\" }\n",
    );

    let local = tmp.path().join("local-registry");
    write_manifest(
        &local.join("ns").join("pkg").join("1.0.0"),
        "name = \"pkg\"\nversion = \"1.0.0\"\n",
    );
    write_manifest(
        &local.join("ns").join("pkg").join("1.5.0"),
        "name = \"pkg\"\nversion = \"1.5.0\"\n",
    );

    let config = tmp.path().join("config.toml");
    fs::write(
        &config,
        format!("[registry]\npath = \"{}\"\n", local.display()),
    )
    .unwrap();

    let mock = MockDownloader::unused();
    let mut tree = Tree::new()
        .with_output(OutputSink::Quiet)
        .with_dep_dir(tmp.path().join("deps"))
        .with_settings_path(&config);
    tree.add_project_with(&root, &mock).unwrap();

    assert_eq!(mock.query_count(), 0);
    let node = tree.node("pkg").unwrap();
    assert_eq!(node.resolved_version, Some(Version::new(1, 5, 0)));
    assert_eq!(
        node.proj_dir.as_ref().unwrap(),
        &local.join("ns").join("pkg").join("1.5.0")
    );
}

#[test]
fn name_mismatch_is_reported() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().join("proj");
    write_manifest(
        &root,
        "name = \"demo\"\n[dependencies]\na = { path = \"./a\" }\n",
    );
    write_manifest(&root.join("a"), "name = \"impostor\"\n");

    let mut tree = quiet_tree(&tmp);
    let err = tree
        .add_project_with(&root, &MockDownloader::unused())
        .unwrap_err();
    assert!(matches!(err, Error::ManifestMismatch { .. }));
}

#[test]
fn git_dependency_first_fetch() {
    let tmp = TempDir::new().unwrap();

    // An upstream repository with a committed manifest.
    let upstream = tmp.path().join("upstream");
    write_manifest(&upstream, "name = \"libx\"\nversion = \"0.3.0\"\n");
    git(&upstream, &["init", "-q"]);
    git(&upstream, &["add", "fpm.toml"]);
    commit(&upstream, "initial");
    let head = git_output(&upstream, &["rev-parse", "HEAD"]);

    let root = tmp.path().join("proj");
    write_manifest(
        &root,
        &format!(
            "name = \"demo\"\n[dependencies]\nlibx = {{ git = \"file://{}\" }}\n",
            upstream.display()
        ),
    );

    let mut tree = quiet_tree(&tmp);
    tree.add_project_with(&root, &MockDownloader::unused()).unwrap();

    let node = tree.node("libx").unwrap();
    assert!(node.done);
    assert_eq!(
        node.proj_dir.as_ref().unwrap(),
        &tmp.path().join("deps").join("libx")
    );
    assert_eq!(node.revision.as_deref(), Some(head.as_str()));
    assert!(tmp.path().join("deps").join("libx").join("fpm.toml").is_file());
}

#[test]
fn update_refetches_flagged_git_dependency() {
    let tmp = TempDir::new().unwrap();

    let upstream = tmp.path().join("upstream");
    write_manifest(&upstream, "name = \"libx\"\nversion = \"0.3.0\"\n");
    git(&upstream, &["init", "-q"]);
    git(&upstream, &["add", "fpm.toml"]);
    commit(&upstream, "initial");
    let head1 = git_output(&upstream, &["rev-parse", "HEAD"]);

    let root = tmp.path().join("proj");
    write_manifest(
        &root,
        &format!(
            "name = \"demo\"\n[dependencies]\nlibx = {{ git = \"file://{}\" }}\n",
            upstream.display()
        ),
    );

    let mock = MockDownloader::unused();
    let mut tree = quiet_tree(&tmp);
    tree.add_project_with(&root, &mock).unwrap();
    assert_eq!(tree.node("libx").unwrap().revision.as_deref(), Some(head1.as_str()));

    // The upstream moves on.
    write_manifest(&upstream, "name = \"libx\"\nversion = \"0.4.0\"\n");
    git(&upstream, &["add", "fpm.toml"]);
    commit(&upstream, "bump");
    let head2 = git_output(&upstream, &["rev-parse", "HEAD"]);
    assert_ne!(head1, head2);

    // Without the update flag the checkout is left alone.
    tree.update_all(&root, &mock).unwrap();
    assert_eq!(tree.node("libx").unwrap().revision.as_deref(), Some(head1.as_str()));

    // Flagged: update re-runs the checkout and re-resolves the node.
    let id = tree.find("libx").unwrap();
    tree.nodes[id].update = true;
    tree.update("libx", &root, &mock).unwrap();

    let node = tree.node("libx").unwrap();
    assert!(node.done);
    assert!(!node.update);
    assert_eq!(node.revision.as_deref(), Some(head2.as_str()));
    assert_eq!(node.resolved_version, Some(Version::new(0, 4, 0)));
}

fn commit(dir: &Path, message: &str) {
    git(
        dir,
        &[
            "-c",
            "user.name=fpm-test",
            "-c",
            "user.email=fpm-test@localhost",
            "commit",
            "-q",
            "-m",
            message,
        ],
    );
}

fn git(dir: &Path, args: &[&str]) {
    let status = Command::new("git")
        .args(args)
        .current_dir(dir)
        .status()
        .expect("git not available");
    assert!(status.success(), "git {args:?} failed");
}

fn git_output(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .expect("git not available");
    assert!(output.status.success());
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

/// Build an in-memory tar.gz archive from (name, contents) pairs.
fn tar_gz(files: &[(&str, &str)]) -> Vec<u8> {
    use flate2::write::GzEncoder;
    use flate2::Compression;

    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = tar::Builder::new(encoder);
    for (name, contents) in files {
        let data = contents.as_bytes();
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, name, data).unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap()
}

#[test]
fn mock_archives_unpack_cleanly() {
    let tmp = TempDir::new().unwrap();
    let archive = tmp.path().join("pkg.tar.gz");
    fs::write(&archive, tar_gz(&[("fpm.toml", "name = \"pkg\"\n")])).unwrap();

    let dest = tmp.path().join("out");
    unpack_archive(&archive, &dest).unwrap();
    assert!(dest.join("fpm.toml").is_file());
}
