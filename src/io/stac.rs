use crate::types::{BoundingBox, ExportError, ExportResult, SceneReference};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;

/// Subset of a STAC item consumed by this pipeline.
#[derive(Debug, Deserialize)]
pub struct StacItem {
    pub id: String,
    pub properties: StacProperties,
    pub assets: HashMap<String, StacAsset>,
}

#[derive(Debug, Deserialize)]
pub struct StacProperties {
    pub datetime: DateTime<Utc>,
    #[serde(rename = "eo:cloud_cover")]
    pub cloud_cover: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct StacAsset {
    pub href: String,
}

#[derive(Debug, Deserialize)]
struct StacLink {
    rel: String,
    #[serde(default)]
    href: Option<String>,
    #[serde(default)]
    body: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ItemCollection {
    features: Vec<StacItem>,
    #[serde(default)]
    links: Vec<StacLink>,
}

/// Descriptive metadata of one spectral band, from a collection summary.
#[derive(Debug, Clone, Deserialize)]
pub struct BandMetadata {
    pub name: String,
    #[serde(default)]
    pub common_name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub center_wavelength: Option<f64>,
    #[serde(default)]
    pub gsd: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct CollectionSummaries {
    #[serde(rename = "eo:bands", default)]
    eo_bands: Vec<BandMetadata>,
}

#[derive(Debug, Deserialize)]
struct CollectionDescription {
    #[serde(default)]
    summaries: Option<CollectionSummaries>,
}

/// Upper bound on `rel="next"` hops per search, against endless catalogs
/// and servers that keep handing out pagination links.
const MAX_SEARCH_PAGES: usize = 50;

/// Follow-up request derived from a page's `rel="next"` link.
///
/// Returns None when there is no next link or when it repeats the request
/// just made, which would otherwise loop forever on a misbehaving server.
fn next_request(
    links: Vec<StacLink>,
    url: &str,
    body: &serde_json::Value,
) -> Option<(String, serde_json::Value)> {
    let link = links.into_iter().find(|l| l.rel == "next")?;
    if link.href.is_none() && link.body.is_none() {
        return None;
    }
    let next_url = link.href.unwrap_or_else(|| url.to_string());
    let next_body = link.body.unwrap_or_else(|| body.clone());
    if next_url == url && next_body == *body {
        log::warn!("catalog repeated its pagination link, stopping at {}", url);
        return None;
    }
    Some((next_url, next_body))
}

impl StacItem {
    /// Flatten an item into the scene reference the materializer works with.
    pub fn to_scene_reference(&self) -> SceneReference {
        SceneReference {
            id: self.id.clone(),
            acquired: self.properties.datetime,
            cloud_cover: self.properties.cloud_cover,
            band_hrefs: self
                .assets
                .iter()
                .map(|(name, asset)| (name.clone(), asset.href.clone()))
                .collect(),
        }
    }
}

/// Thin adapter over a STAC `/search` endpoint.
///
/// Translation only: collection, bbox, ISO8601 date interval and cloud-cover
/// filter go in, scene references come out. Remote failures propagate
/// unmodified and are never retried.
pub struct StacSearchAdapter {
    client: reqwest::blocking::Client,
    endpoint: String,
}

impl StacSearchAdapter {
    pub fn new(endpoint: &str) -> ExportResult<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(300))
            .user_agent("mapa/0.1.0 (satellite export pipeline)")
            .build()?;
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        })
    }

    /// Search the catalog for scenes intersecting the bounding box.
    ///
    /// `date_range` is an ISO8601 interval string, e.g.
    /// `2023-10-01T00:00:00Z/2023-10-31T23:59:59Z`. Zero results are a
    /// terminal condition for the whole pipeline.
    pub fn search(
        &self,
        collection: &str,
        bbox: &BoundingBox,
        date_range: &str,
        cloud_cover_max: f64,
    ) -> ExportResult<Vec<SceneReference>> {
        let mut body = json!({
            "collections": [collection],
            "bbox": bbox.to_stac_array(),
            "datetime": date_range,
            "query": {
                "eo:cloud_cover": { "lt": cloud_cover_max },
            },
            "limit": 100,
        });

        let mut url = format!("{}/search", self.endpoint);
        let mut scenes = Vec::new();

        for page_no in 1.. {
            log::info!("searching STAC catalog: {} [{}]", url, collection);
            let page: ItemCollection = self
                .client
                .post(&url)
                .json(&body)
                .send()?
                .error_for_status()?
                .json()?;

            log::debug!("received {} items", page.features.len());
            scenes.extend(page.features.iter().map(StacItem::to_scene_reference));

            if page_no >= MAX_SEARCH_PAGES {
                log::warn!("stopping catalog pagination after {} pages", page_no);
                break;
            }

            // Follow POST pagination: a rel="next" link carries the follow-up
            // request body (and possibly a different href).
            match next_request(page.links, &url, &body) {
                Some((next_url, next_body)) => {
                    url = next_url;
                    body = next_body;
                }
                None => break,
            }
        }

        if scenes.is_empty() {
            return Err(ExportError::NoStacItemFound(format!(
                "no {} scene matches the drawn region and date range {}",
                collection, date_range
            )));
        }

        scenes.sort_by_key(|s| s.acquired);
        log::info!("catalog search matched {} scenes", scenes.len());
        Ok(scenes)
    }

    /// Band table of a collection, from its `eo:bands` summary. Collections
    /// without the summary yield an empty table.
    pub fn band_metadata(&self, collection: &str) -> ExportResult<Vec<BandMetadata>> {
        let url = format!("{}/collections/{}", self.endpoint, collection);
        log::info!("fetching band metadata: {}", url);
        let description: CollectionDescription = self
            .client
            .get(&url)
            .send()?
            .error_for_status()?
            .json()?;
        Ok(description
            .summaries
            .map(|s| s.eo_bands)
            .unwrap_or_default())
    }
}
