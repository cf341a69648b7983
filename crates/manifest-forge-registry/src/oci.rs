//! Minimal OCI distribution client, just enough to pull a Helm chart layer.
//!
//! A chart reference `oci://host/repo/name:version` maps to a manifest at
//! `/v2/<repo/name>/manifests/<version>`; the chart bytes are the single
//! layer with the Helm chart content media type.

use serde::Deserialize;
use url::Url;

use crate::{BasicAuth, RegistryError, RegistryResult};

const CHART_LAYER_MEDIA_TYPE: &str = "application/vnd.cncf.helm.chart.content.v1.tar+gzip";
const MANIFEST_ACCEPT: &str =
    "application/vnd.oci.image.manifest.v1+json, application/vnd.docker.distribution.manifest.v2+json";

#[derive(Debug, Deserialize)]
struct ManifestLayer {
    #[serde(rename = "mediaType")]
    media_type: String,
    digest: String,
}

#[derive(Debug, Deserialize)]
struct ImageManifest {
    layers: Vec<ManifestLayer>,
}

/// Split `oci://host/repo/name:tag` into `(repository, tag)`.
fn split_reference(url: &Url) -> RegistryResult<(String, String)> {
    let path = url.path().trim_matches('/');
    let Some((repository, tag)) = path.rsplit_once(':') else {
        return Err(RegistryError::Oci(format!(
            "invalid reference: '{url}' carries no tag"
        )));
    };
    if repository.is_empty() || tag.is_empty() || tag.contains('/') {
        return Err(RegistryError::Oci(format!("invalid reference: '{url}'")));
    }
    Ok((repository.to_string(), tag.to_string()))
}

pub async fn pull_chart(
    client: &reqwest::Client,
    chart_url: &Url,
    basic_auth: Option<&BasicAuth>,
) -> RegistryResult<Vec<u8>> {
    let host = chart_url.host_str().unwrap_or_default();
    let (repository, tag) = match split_reference(chart_url) {
        Ok(parts) => parts,
        // a tagless reference cannot name content
        Err(_) => {
            return Err(RegistryError::ChartNotFound {
                url: chart_url.to_string(),
            })
        }
    };

    let authed = |request: reqwest::RequestBuilder| match basic_auth {
        Some(auth) => request.basic_auth(&auth.username, Some(&auth.password)),
        None => request,
    };

    let manifest_url = format!("https://{host}/v2/{repository}/manifests/{tag}");
    let response = authed(client.get(&manifest_url))
        .header(reqwest::header::ACCEPT, MANIFEST_ACCEPT)
        .send()
        .await?;
    if response.status() == reqwest::StatusCode::NOT_FOUND {
        return Err(RegistryError::ChartNotFound {
            url: chart_url.to_string(),
        });
    }
    if !response.status().is_success() {
        return Err(RegistryError::UnexpectedStatus {
            url: manifest_url,
            status: response.status().as_u16(),
        });
    }
    let manifest: ImageManifest = response
        .json()
        .await
        .map_err(|e| RegistryError::Oci(format!("malformed manifest: {e}")))?;

    let layer = manifest
        .layers
        .iter()
        .find(|layer| layer.media_type == CHART_LAYER_MEDIA_TYPE)
        .ok_or_else(|| RegistryError::ChartNotFound {
            url: chart_url.to_string(),
        })?;

    let blob_url = format!("https://{host}/v2/{repository}/blobs/{}", layer.digest);
    let response = authed(client.get(&blob_url)).send().await?;
    if !response.status().is_success() {
        return Err(RegistryError::UnexpectedStatus {
            url: blob_url,
            status: response.status().as_u16(),
        });
    }
    Ok(response.bytes().await?.to_vec())
}
