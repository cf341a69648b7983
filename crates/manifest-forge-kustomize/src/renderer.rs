//! Overlay renderer: writes injected manifests into the overlay tree,
//! invokes the engine and parses the produced resources back into maps.

use manifest_forge_api::{KustomizeRenderParameters, Manifest};
use manifest_forge_fs::{Filesystem, SEPARATOR};

use crate::{engine, OverlayError, OverlayResult};

const DOCUMENT_SEPARATOR: &str = "\n---\n";

#[derive(Debug, Default)]
pub struct OverlayRenderer;

impl OverlayRenderer {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    pub fn render(
        &self,
        fs: &Filesystem,
        target_path: &str,
        parameters: &KustomizeRenderParameters,
    ) -> OverlayResult<Vec<Manifest>> {
        for injection in &parameters.manifest_injections {
            if injection.file_name.is_empty() {
                return Err(OverlayError::EmptyInjectionFileName);
            }
            if injection.file_name.contains(SEPARATOR) {
                return Err(OverlayError::InjectionFileNameWithSeparator {
                    file_name: injection.file_name.clone(),
                    separator: SEPARATOR,
                });
            }

            let documents: Vec<String> = injection
                .manifests
                .iter()
                .map(|manifest| serde_yaml::to_string(&manifest.content))
                .collect::<Result<_, _>>()?;
            let content = documents.join(DOCUMENT_SEPARATOR);
            fs.write_file(
                &Filesystem::join(target_path, &injection.file_name),
                content.as_bytes(),
            )?;
        }

        let resources = engine::run(fs, target_path)?;

        let mut manifests = Vec::new();
        for resource in resources {
            // serialize-then-parse keeps the output shape identical to what
            // a consumer reading the YAML stream would see
            let rendered = serde_yaml::to_string(&resource)?;
            let parsed: serde_yaml::Value = serde_yaml::from_str(&rendered)?;
            let parsed = serde_json::to_value(parsed).map_err(|e| OverlayError::Parse {
                path: "<rendered resource>".to_string(),
                reason: e.to_string(),
            })?;
            let serde_json::Value::Object(content) = parsed else {
                continue;
            };
            if content.is_empty() {
                continue;
            }
            manifests.push(Manifest {
                source: None,
                content,
            });
        }
        Ok(manifests)
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use manifest_forge_api::{ManifestInjection, ValueMap};
    use serde_json::json;
    use similar_asserts::assert_eq as sim_assert_eq;

    use super::*;

    fn value_map(value: serde_json::Value) -> ValueMap {
        value.as_object().cloned().unwrap_or_default()
    }

    fn overlay_fs() -> Filesystem {
        let fs = Filesystem::new();
        fs.write_file(
            "/k/kustomization.yaml",
            indoc! {r#"
                resources:
                  - app.yaml
                  - injected.yaml
            "#}
            .as_bytes(),
        )
        .unwrap();
        fs.write_file(
            "/k/app.yaml",
            indoc! {r#"
                apiVersion: v1
                kind: ConfigMap
                metadata:
                  name: app
            "#}
            .as_bytes(),
        )
        .unwrap();
        fs
    }

    fn injection() -> ManifestInjection {
        ManifestInjection {
            file_name: "injected.yaml".to_string(),
            manifests: vec![Manifest {
                source: None,
                content: value_map(json!({
                    "apiVersion": "v1",
                    "kind": "Secret",
                    "metadata": {"name": "extra"}
                })),
            }],
        }
    }

    #[test]
    fn injected_manifests_flow_through_the_overlay() {
        let fs = overlay_fs();
        let parameters = KustomizeRenderParameters {
            manifest_injections: vec![injection()],
        };
        let manifests = OverlayRenderer::new().render(&fs, "/k", &parameters).unwrap();
        assert_eq!(manifests.len(), 2);
        sim_assert_eq!(manifests[1].content["kind"], json!("Secret"));
    }

    #[test]
    fn empty_injection_filename_rejects() {
        let fs = overlay_fs();
        let mut bad = injection();
        bad.file_name = String::new();
        let parameters = KustomizeRenderParameters {
            manifest_injections: vec![bad],
        };
        let err = OverlayRenderer::new().render(&fs, "/k", &parameters).unwrap_err();
        assert!(matches!(err, OverlayError::EmptyInjectionFileName));
    }

    #[test]
    fn injection_filename_with_separator_rejects() {
        let fs = overlay_fs();
        let mut bad = injection();
        bad.file_name = "nested/evil.yaml".to_string();
        let parameters = KustomizeRenderParameters {
            manifest_injections: vec![bad],
        };
        let err = OverlayRenderer::new().render(&fs, "/k", &parameters).unwrap_err();
        assert!(matches!(
            err,
            OverlayError::InjectionFileNameWithSeparator { .. }
        ));
    }

    #[test]
    fn multiple_injected_documents_join_with_separator() {
        let fs = overlay_fs();
        let parameters = KustomizeRenderParameters {
            manifest_injections: vec![ManifestInjection {
                file_name: "injected.yaml".to_string(),
                manifests: vec![
                    Manifest {
                        source: None,
                        content: value_map(
                            json!({"apiVersion": "v1", "kind": "Secret", "metadata": {"name": "a"}}),
                        ),
                    },
                    Manifest {
                        source: None,
                        content: value_map(
                            json!({"apiVersion": "v1", "kind": "Secret", "metadata": {"name": "b"}}),
                        ),
                    },
                ],
            }],
        };
        let manifests = OverlayRenderer::new().render(&fs, "/k", &parameters).unwrap();
        assert_eq!(manifests.len(), 3);
        let written = fs.read_file("/k/injected.yaml").unwrap();
        assert!(String::from_utf8_lossy(&written).contains("\n---\n"));
    }

    #[test]
    fn render_without_injections_just_runs_the_overlay() {
        let fs = Filesystem::new();
        fs.write_file("/k/kustomization.yaml", b"resources: [cm.yaml]\n")
            .unwrap();
        fs.write_file(
            "/k/cm.yaml",
            b"apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: solo\n",
        )
        .unwrap();
        let manifests = OverlayRenderer::new()
            .render(&fs, "/k", &KustomizeRenderParameters::default())
            .unwrap();
        assert_eq!(manifests.len(), 1);
        assert_eq!(manifests[0].source, None);
    }
}
