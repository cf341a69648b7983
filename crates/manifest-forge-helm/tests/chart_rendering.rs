use color_eyre::eyre;
use indoc::indoc;
use manifest_forge_api::{HelmRenderParameters, ValueMap};
use manifest_forge_fs::Filesystem;
use manifest_forge_helm::values::merge_values;
use manifest_forge_helm::{load_chart, ChartRenderer, RenderDefaults};
use test_util::prelude::*;
use test_util::write;

fn demo_chart() -> eyre::Result<Filesystem> {
    let fs = Filesystem::new();
    write(
        &fs,
        "/chart/Chart.yaml",
        indoc! {r#"
            apiVersion: v2
            name: demo
            version: 0.1.0
        "#},
    )?;
    write(
        &fs,
        "/chart/values.yaml",
        indoc! {r#"
            replicaCount: 1
            image:
              repository: nginx
              tag: "1.27"
        "#},
    )?;
    write(
        &fs,
        "/chart/templates/_helpers.tpl",
        indoc! {r#"
            {{- define "demo.fullname" -}}
            {{ .Release.Name }}-{{ .Chart.Name }}
            {{- end -}}
        "#},
    )?;
    write(
        &fs,
        "/chart/templates/deployment.yaml",
        indoc! {r#"
            apiVersion: apps/v1
            kind: Deployment
            metadata:
              name: {{ include "demo.fullname" . }}
            spec:
              replicas: {{ .Values.replicaCount }}
              template:
                spec:
                  containers:
                    - name: {{ .Chart.Name }}
                      image: {{ .Values.image.repository }}:{{ .Values.image.tag }}
            "#},
    )?;
    Ok(fs)
}

#[test]
fn loads_and_renders_a_full_chart() -> eyre::Result<()> {
    test_util::Builder::default().build();
    let fs = demo_chart()?;

    let chart = load_chart(&fs, "/chart")?;
    let renderer = ChartRenderer::new(RenderDefaults::default());
    let (manifests, metadata) =
        renderer.render(&chart, ValueMap::new(), &HelmRenderParameters::default())?;

    assert_that!(manifests, len(eq(1)));
    let deployment = &manifests[0];
    sim_assert_eq!(
        deployment.source.as_deref(),
        Some("demo/templates/deployment.yaml")
    );
    sim_assert_eq!(
        deployment.content["metadata"]["name"],
        serde_json::json!("RELEASE-NAME-demo")
    );
    sim_assert_eq!(
        deployment.content["spec"]["template"]["spec"]["containers"][0]["image"],
        serde_json::json!("nginx:1.27")
    );
    assert_that!(metadata.api_versions, contains(eq("v1")));
    Ok(())
}

#[test]
fn value_expressions_override_chart_defaults() -> eyre::Result<()> {
    test_util::Builder::default().build();
    let fs = demo_chart()?;

    let parameters = HelmRenderParameters {
        values_flat: vec!["replicaCount=4".to_string(), "image.tag=1.28".to_string()],
        ..Default::default()
    };
    let merged = merge_values(&fs, "/chart", &parameters, &[])?;

    let chart = load_chart(&fs, "/chart")?;
    let renderer = ChartRenderer::new(RenderDefaults::default());
    let (manifests, metadata) = renderer.render(&chart, merged, &parameters)?;

    sim_assert_eq!(
        manifests[0].content["spec"]["replicas"],
        serde_json::json!(4)
    );
    sim_assert_eq!(
        metadata.merged_values["image"]["tag"],
        serde_json::json!(1.28)
    );
    // the chart default survives where no override was given
    sim_assert_eq!(
        metadata.merged_values["image"]["repository"],
        serde_json::json!("nginx")
    );
    Ok(())
}

#[test]
fn release_overrides_flow_into_metadata() -> eyre::Result<()> {
    test_util::Builder::default().build();
    let fs = demo_chart()?;

    let parameters = HelmRenderParameters {
        release_name: Some("edge".to_string()),
        namespace: Some("staging".to_string()),
        ..Default::default()
    };
    let chart = load_chart(&fs, "/chart")?;
    let renderer = ChartRenderer::new(RenderDefaults::default());
    let (manifests, metadata) = renderer.render(&chart, ValueMap::new(), &parameters)?;

    sim_assert_eq!(metadata.release_name, "edge");
    sim_assert_eq!(metadata.namespace, "staging");
    sim_assert_eq!(
        manifests[0].content["metadata"]["name"],
        serde_json::json!("edge-demo")
    );
    Ok(())
}
