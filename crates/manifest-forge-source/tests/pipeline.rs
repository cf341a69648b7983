//! Pipeline scenarios against in-memory git and registry mocks.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use color_eyre::eyre;
use indoc::indoc;
use manifest_forge_api::{
    ChartRepositoryChartReference, GitPathReference, HelmRenderParameters, Reference,
};
use manifest_forge_cache::{ByteCache, MemoryCache};
use manifest_forge_fs::{targz, Filesystem, ROOT};
use manifest_forge_git::{is_commit_hash, GitError, GitResult};
use manifest_forge_helm::{ChartRenderer, RenderDefaults};
use manifest_forge_kustomize::OverlayRenderer;
use manifest_forge_registry::RegistryResult;
use manifest_forge_source::{
    ChartProvider, ChartRemote, GitRepositoryCache, GitSource, HelmChartCache, HelmIndexCache,
    KustomizationProvider, ManifestService, SourceError,
};
use url::Url;

const COMMIT_A: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
const COMMIT_B: &str = "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";

struct MockGit {
    refs: Mutex<HashMap<String, String>>,
    snapshot: Filesystem,
    clones: AtomicUsize,
    listings: AtomicUsize,
}

impl MockGit {
    fn new(snapshot: Filesystem) -> Self {
        Self {
            refs: Mutex::new(HashMap::from([
                ("HEAD".to_string(), COMMIT_A.to_string()),
                ("refs/heads/main".to_string(), COMMIT_A.to_string()),
            ])),
            snapshot,
            clones: AtomicUsize::new(0),
            listings: AtomicUsize::new(0),
        }
    }

    fn push(&self, reference: &str, hash: &str) {
        self.refs
            .lock()
            .unwrap()
            .insert(reference.to_string(), hash.to_string());
    }
}

#[async_trait]
impl GitSource for MockGit {
    async fn to_hash(&self, url: &str, reference: &str) -> GitResult<String> {
        if is_commit_hash(reference) {
            return Ok(reference.to_string());
        }
        self.listings.fetch_add(1, Ordering::SeqCst);
        self.refs
            .lock()
            .unwrap()
            .get(reference)
            .cloned()
            .ok_or_else(|| GitError::ReferenceNotFound {
                url: url.to_string(),
                reference: reference.to_string(),
            })
    }

    async fn clone_commit(&self, _url: &str, _reference: &str) -> GitResult<Filesystem> {
        self.clones.fetch_add(1, Ordering::SeqCst);
        Ok(self.snapshot.clone())
    }
}

#[derive(Default)]
struct MockRemote {
    index: Vec<u8>,
    charts: HashMap<String, Vec<u8>>,
    index_fetches: AtomicUsize,
    chart_fetches: AtomicUsize,
}

#[async_trait]
impl ChartRemote for MockRemote {
    async fn get_index(&self, _repository_url: &Url) -> RegistryResult<Vec<u8>> {
        self.index_fetches.fetch_add(1, Ordering::SeqCst);
        Ok(self.index.clone())
    }

    async fn get_chart(&self, chart_url: &str) -> RegistryResult<Vec<u8>> {
        self.chart_fetches.fetch_add(1, Ordering::SeqCst);
        self.charts.get(chart_url).cloned().ok_or_else(|| {
            manifest_forge_registry::RegistryError::ChartNotFound {
                url: chart_url.to_string(),
            }
        })
    }
}

/// Build a chart tgz the way a repository would serve it: entries prefixed
/// with the chart directory.
fn chart_archive(name: &str, version: &str, extra: &[(&str, &str)]) -> Vec<u8> {
    let fs = Filesystem::new();
    fs.write_file(
        "/Chart.yaml",
        format!("apiVersion: v2\nname: {name}\nversion: {version}\n").as_bytes(),
    )
    .unwrap();
    fs.write_file(
        "/templates/configmap.yaml",
        format!("apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: {name}\n").as_bytes(),
    )
    .unwrap();
    for (path, content) in extra {
        fs.write_file(&format!("/{path}"), content.as_bytes()).unwrap();
    }
    targz::compress_to_vec(&fs, ROOT, name).unwrap()
}

fn git_chart_snapshot() -> Filesystem {
    let fs = Filesystem::new();
    fs.write_file(
        "/chart/Chart.yaml",
        b"apiVersion: v2\nname: demo\nversion: 0.1.0\n",
    )
    .unwrap();
    fs.write_file("/chart/values.yaml", b"name: demo\n").unwrap();
    fs.write_file(
        "/chart/templates/configmap.yaml",
        indoc! {br#"
            apiVersion: v1
            kind: ConfigMap
            metadata:
              name: {{ .Values.name }}
        "#},
    )
    .unwrap();
    fs
}

struct Harness {
    git: Arc<MockGit>,
    remote: Arc<MockRemote>,
    git_bytes: Arc<MemoryCache>,
    service: ManifestService,
}

fn harness(git: MockGit, remote: MockRemote) -> Harness {
    let git = Arc::new(git);
    let remote = Arc::new(remote);
    let git_bytes = Arc::new(MemoryCache::new());

    let git_cache = Arc::new(GitRepositoryCache::new(
        git.clone(),
        git_bytes.clone(),
    ));
    let index_cache = Arc::new(HelmIndexCache::new(
        remote.clone(),
        Arc::new(MemoryCache::new()),
    ));
    let chart_cache = Arc::new(HelmChartCache::new(
        remote.clone(),
        index_cache,
        Arc::new(MemoryCache::new()),
    ));

    let service = ManifestService::new(
        ChartProvider::new(chart_cache, git_cache.clone()),
        ChartRenderer::new(RenderDefaults::default()),
        KustomizationProvider::new(git_cache.clone()),
        OverlayRenderer::new(),
        git_cache,
    );
    Harness {
        git,
        remote,
        git_bytes,
        service,
    }
}

fn git_reference() -> Reference {
    Reference::GitPath(GitPathReference {
        url: "https://git.example/x".to_string(),
        reference: "refs/heads/main".to_string(),
        path: Some("chart".to_string()),
    })
}

#[tokio::test]
async fn first_render_clones_and_caches_under_the_commit_hash() -> eyre::Result<()> {
    let h = harness(MockGit::new(git_chart_snapshot()), MockRemote::default());

    let (manifests, metadata) = h.service.render_chart(&git_reference(), None).await?;
    assert!(!manifests.is_empty());
    assert_eq!(metadata.release_name, "RELEASE-NAME");
    assert_eq!(h.git.clones.load(Ordering::SeqCst), 1);

    let keys = h.git_bytes.keys().await?;
    assert_eq!(keys, vec![format!("https://git.example/x|{COMMIT_A}")]);
    Ok(())
}

#[tokio::test]
async fn re_render_resolves_the_reference_but_skips_the_clone() -> eyre::Result<()> {
    let h = harness(MockGit::new(git_chart_snapshot()), MockRemote::default());

    let (first, _) = h.service.render_chart(&git_reference(), None).await?;
    let (second, _) = h.service.render_chart(&git_reference(), None).await?;
    assert_eq!(first, second);
    assert_eq!(h.git.clones.load(Ordering::SeqCst), 1);
    // the symbolic reference was still resolved both times
    assert_eq!(h.git.listings.load(Ordering::SeqCst), 2);
    Ok(())
}

#[tokio::test]
async fn any_reference_resolving_to_the_same_commit_hits() -> eyre::Result<()> {
    let h = harness(MockGit::new(git_chart_snapshot()), MockRemote::default());

    h.service.render_chart(&git_reference(), None).await?;

    let by_hash = Reference::GitPath(GitPathReference {
        url: "https://git.example/x".to_string(),
        reference: COMMIT_A.to_string(),
        path: Some("chart".to_string()),
    });
    h.service.render_chart(&by_hash, None).await?;
    assert_eq!(h.git.clones.load(Ordering::SeqCst), 1);

    // a push moves the reference: same symbolic input now misses
    h.git.push("refs/heads/main", COMMIT_B);
    h.service.render_chart(&git_reference(), None).await?;
    assert_eq!(h.git.clones.load(Ordering::SeqCst), 2);
    Ok(())
}

#[tokio::test]
async fn unknown_reference_is_reference_not_found() {
    let h = harness(MockGit::new(git_chart_snapshot()), MockRemote::default());
    let reference = Reference::GitPath(GitPathReference {
        url: "https://git.example/x".to_string(),
        reference: "refs/heads/does-not-exist".to_string(),
        path: None,
    });
    let err = h.service.render_chart(&reference, None).await.unwrap_err();
    let SourceError::Git(GitError::ReferenceNotFound { url, reference }) = err else {
        panic!("expected ReferenceNotFound, got {err}");
    };
    assert_eq!(url, "https://git.example/x");
    assert_eq!(reference, "refs/heads/does-not-exist");
}

#[tokio::test]
async fn non_qualified_references_reject() {
    let h = harness(MockGit::new(git_chart_snapshot()), MockRemote::default());
    let reference = Reference::GitPath(GitPathReference {
        url: "https://git.example/x".to_string(),
        reference: "main".to_string(),
        path: None,
    });
    let err = h.service.render_chart(&reference, None).await.unwrap_err();
    assert!(matches!(
        err,
        SourceError::Git(GitError::InvalidReference { .. })
    ));
}

#[tokio::test]
async fn missing_value_file_names_the_file() {
    let h = harness(MockGit::new(git_chart_snapshot()), MockRemote::default());
    let parameters = HelmRenderParameters {
        value_files: vec!["values-prod.yaml".to_string()],
        ..Default::default()
    };
    let err = h
        .service
        .render_chart(&git_reference(), Some(&parameters))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("values-prod.yaml"));

    let parameters = HelmRenderParameters {
        value_files: vec!["values-prod.yaml".to_string()],
        ignore_missing_value_files: Some(true),
        ..Default::default()
    };
    assert!(h
        .service
        .render_chart(&git_reference(), Some(&parameters))
        .await
        .is_ok());
}

#[tokio::test]
async fn chart_repository_render_fetches_index_then_archive() -> eyre::Result<()> {
    let index = indoc! {r#"
        apiVersion: v1
        entries:
          web:
            - name: web
              version: 0.1.0
              digest: sha256:feed
              urls:
                - charts/web-0.1.0.tgz
    "#};
    let remote = MockRemote {
        index: index.as_bytes().to_vec(),
        charts: HashMap::from([(
            "https://charts.example/charts/web-0.1.0.tgz".to_string(),
            chart_archive("web", "0.1.0", &[]),
        )]),
        ..Default::default()
    };
    let h = harness(MockGit::new(Filesystem::new()), remote);

    let reference = Reference::ChartRepositoryChart(ChartRepositoryChartReference {
        repository_url: "https://charts.example".to_string(),
        chart_name: "web".to_string(),
        chart_version: Some("0.1.0".to_string()),
    });
    let (manifests, _) = h.service.render_chart(&reference, None).await?;
    assert_eq!(manifests.len(), 1);
    assert_eq!(h.remote.index_fetches.load(Ordering::SeqCst), 1);
    assert_eq!(h.remote.chart_fetches.load(Ordering::SeqCst), 1);

    // both caches hit the second time
    h.service.render_chart(&reference, None).await?;
    assert_eq!(h.remote.index_fetches.load(Ordering::SeqCst), 1);
    assert_eq!(h.remote.chart_fetches.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test]
async fn file_scheme_dependency_resolves_locally() -> eyre::Result<()> {
    let snapshot = git_chart_snapshot();
    snapshot
        .write_file(
            "/chart/Chart.yaml",
            indoc! {br#"
                apiVersion: v2
                name: demo
                version: 0.1.0
                dependencies:
                  - name: bar
                    version: 0.2.0
                    repository: file://subcharts/bar
            "#},
        )
        .unwrap();
    snapshot
        .write_file(
            "/chart/subcharts/bar/Chart.yaml",
            b"apiVersion: v2\nname: bar\nversion: 0.2.0\n",
        )
        .unwrap();
    snapshot
        .write_file(
            "/chart/subcharts/bar/templates/cm.yaml",
            b"apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: bar\n",
        )
        .unwrap();

    let h = harness(MockGit::new(snapshot), MockRemote::default());
    let (manifests, _) = h.service.render_chart(&git_reference(), None).await?;
    assert_eq!(h.remote.chart_fetches.load(Ordering::SeqCst), 0);
    assert!(manifests
        .iter()
        .any(|m| m.source.as_deref() == Some("demo/charts/bar/templates/cm.yaml")));
    Ok(())
}

#[tokio::test]
async fn vendored_tgz_wins_only_on_version_equality() -> eyre::Result<()> {
    let index = indoc! {r#"
        apiVersion: v1
        entries:
          foo:
            - name: foo
              version: 1.2.3
              digest: sha256:cafe
              urls:
                - charts/foo-1.2.3.tgz
    "#};

    // matching vendored archive: no remote fetch
    let snapshot = git_chart_snapshot();
    snapshot.write_file(
        "/chart/Chart.yaml",
        indoc! {br#"
            apiVersion: v2
            name: demo
            version: 0.1.0
            dependencies:
              - name: foo
                version: 1.2.3
                repository: https://charts.example
        "#},
    )?;
    snapshot.write_file("/chart/charts/foo-1.2.3.tgz", &chart_archive("foo", "1.2.3", &[]))?;

    let remote = MockRemote {
        index: index.as_bytes().to_vec(),
        charts: HashMap::from([(
            "https://charts.example/charts/foo-1.2.3.tgz".to_string(),
            chart_archive("foo", "1.2.3", &[]),
        )]),
        ..Default::default()
    };
    let h = harness(MockGit::new(snapshot.clone()), remote);
    h.service.render_chart(&git_reference(), None).await?;
    assert_eq!(h.remote.chart_fetches.load(Ordering::SeqCst), 0);

    // vendored archive carries the wrong version: the remote fetch happens
    let snapshot = git_chart_snapshot();
    snapshot.write_file(
        "/chart/Chart.yaml",
        indoc! {br#"
            apiVersion: v2
            name: demo
            version: 0.1.0
            dependencies:
              - name: foo
                version: 1.2.3
                repository: https://charts.example
        "#},
    )?;
    snapshot.write_file("/chart/charts/foo-1.2.3.tgz", &chart_archive("foo", "1.2.4", &[]))?;

    let remote = MockRemote {
        index: index.as_bytes().to_vec(),
        charts: HashMap::from([(
            "https://charts.example/charts/foo-1.2.3.tgz".to_string(),
            chart_archive("foo", "1.2.3", &[]),
        )]),
        ..Default::default()
    };
    let h = harness(MockGit::new(snapshot), remote);
    h.service.render_chart(&git_reference(), None).await?;
    assert_eq!(h.remote.chart_fetches.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test]
async fn chart_metadata_returns_default_values() -> eyre::Result<()> {
    let h = harness(MockGit::new(git_chart_snapshot()), MockRemote::default());
    let values = h.service.get_chart_metadata(&git_reference()).await?;
    assert_eq!(values["name"], "demo");
    Ok(())
}

#[tokio::test]
async fn kustomization_renders_from_git() -> eyre::Result<()> {
    let snapshot = Filesystem::new();
    snapshot.write_file(
        "/overlay/kustomization.yaml",
        b"resources: [cm.yaml]\nnamespace: prod\n",
    )?;
    snapshot.write_file(
        "/overlay/cm.yaml",
        b"apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: app\n",
    )?;

    let h = harness(MockGit::new(snapshot), MockRemote::default());
    let reference = Reference::GitPath(GitPathReference {
        url: "https://git.example/x".to_string(),
        reference: "refs/heads/main".to_string(),
        path: Some("overlay".to_string()),
    });
    let manifests = h.service.render_kustomization(&reference, None).await?;
    assert_eq!(manifests.len(), 1);
    assert_eq!(manifests[0].content["metadata"]["namespace"], "prod");
    Ok(())
}

#[tokio::test]
async fn kustomization_rejects_chart_repository_references() {
    let h = harness(MockGit::new(Filesystem::new()), MockRemote::default());
    let reference = Reference::ChartRepositoryChart(ChartRepositoryChartReference {
        repository_url: "https://charts.example".to_string(),
        chart_name: "web".to_string(),
        chart_version: None,
    });
    let err = h
        .service
        .render_kustomization(&reference, None)
        .await
        .unwrap_err();
    assert!(matches!(err, SourceError::KustomizationReferenceInvalid));
}
