//! HAR (HTTP Archive) import
//!
//! Turns recorded browser sessions into [`HttpExchange`]s that can be fed
//! through the interception entry point.

use anyhow::{Context, Result};
use serde::Deserialize;

use super::{HttpExchange, HttpRequest, HttpResponse};

/// Parse a HAR document into exchanges, in file order
pub fn import(content: &str) -> Result<Vec<HttpExchange>> {
    let har: HarFile = serde_json::from_str(content).context("Failed to parse HAR file")?;

    Ok(har.log.entries.iter().map(convert_entry).collect())
}

fn convert_entry(entry: &HarEntry) -> HttpExchange {
    let mut request = HttpRequest::new(&entry.request.method, &entry.request.url);

    for header in &entry.request.headers {
        // Skip HTTP/2 pseudo-headers
        if !header.name.starts_with(':') {
            request.headers.insert(header.name.clone(), header.value.clone());
        }
    }

    if let Some(post_data) = &entry.request.post_data {
        request.body = post_data.text.clone().into_bytes();
    }

    let response = entry.response.as_ref().filter(|r| r.status > 0).map(|r| {
        let mut response = HttpResponse::new(r.status);
        response.status_text = r.status_text.clone();
        for header in &r.headers {
            if !header.name.starts_with(':') {
                response = response.with_header(&header.name, &header.value);
            }
        }
        if let Some(text) = r.content.as_ref().and_then(|c| c.text.as_ref()) {
            response.body = text.clone().into_bytes();
        }
        response
    });

    HttpExchange::new(request, response)
}

// HAR file structures

#[derive(Debug, Deserialize)]
struct HarFile {
    log: HarLog,
}

#[derive(Debug, Deserialize)]
struct HarLog {
    entries: Vec<HarEntry>,
}

#[derive(Debug, Deserialize)]
struct HarEntry {
    request: HarRequest,
    #[serde(default)]
    response: Option<HarResponse>,
}

#[derive(Debug, Deserialize)]
struct HarRequest {
    method: String,
    url: String,
    #[serde(default)]
    headers: Vec<HarHeader>,
    #[serde(rename = "postData")]
    post_data: Option<HarPostData>,
}

#[derive(Debug, Deserialize)]
struct HarResponse {
    status: u16,
    #[serde(rename = "statusText", default)]
    status_text: String,
    #[serde(default)]
    headers: Vec<HarHeader>,
    content: Option<HarContent>,
}

#[derive(Debug, Deserialize)]
struct HarHeader {
    name: String,
    value: String,
}

#[derive(Debug, Deserialize)]
struct HarPostData {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct HarContent {
    text: Option<String>,
}
