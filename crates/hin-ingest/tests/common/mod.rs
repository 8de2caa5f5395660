//! Shared fixtures for integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use hin_common::Crs;
use hin_ingest::config::{HttpConfig, PortalConfig, PortalCredentials};
use hin_ingest::sink::{TablePlan, TableWriter};
use hin_ingest::{IngestError, Result, ServiceDescriptor};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Stands in for PostGIS: keeps the last plan written per table
#[derive(Default)]
pub struct MemoryWriter {
    tables: Mutex<HashMap<String, TablePlan>>,
    writes: AtomicUsize,
    reject_spatial: AtomicBool,
}

impl MemoryWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every spatial write fail the way the post-insert check does
    pub fn rejecting_spatial() -> Self {
        let writer = Self::default();
        writer.reject_spatial.store(true, Ordering::SeqCst);
        writer
    }

    pub fn table(&self, name: &str) -> Option<TablePlan> {
        self.tables.lock().unwrap().get(name).cloned()
    }

    pub fn table_count(&self) -> usize {
        self.tables.lock().unwrap().len()
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TableWriter for MemoryWriter {
    async fn replace_table(&self, plan: &TablePlan) -> Result<u64> {
        self.writes.fetch_add(1, Ordering::SeqCst);

        if plan.geometry.is_some() && self.reject_spatial.load(Ordering::SeqCst) {
            return Err(IngestError::NoValidGeometries);
        }

        self.tables
            .lock()
            .unwrap()
            .insert(format!("{}.{}", plan.schema, plan.table), plan.clone());
        Ok(plan.row_count() as u64)
    }
}

pub fn column_names(plan: &TablePlan) -> Vec<String> {
    plan.columns.iter().map(|c| c.name.clone()).collect()
}

pub fn http_config() -> HttpConfig {
    HttpConfig {
        timeout_secs: 5,
        max_retries: 3,
        backoff_ms: 0,
    }
}

pub fn query_path(service: &str) -> String {
    format!("/arcgis/rest/services/{}/FeatureServer/0/query", service)
}

pub fn service_url(server: &MockServer, service: &str, format: &str) -> String {
    format!(
        "{}{}?where=1%3D1&outFields=*&f={}",
        server.uri(),
        query_path(service),
        format
    )
}

pub fn descriptor(server: &MockServer, key: &str, format: &str) -> ServiceDescriptor {
    ServiceDescriptor::new(key, &service_url(server, key, format), "input", Crs::EPSG_26918)
        .unwrap()
}

pub fn portal_config(server: &MockServer) -> PortalConfig {
    PortalConfig {
        token_url: format!("{}/portal/sharing/rest/generateToken", server.uri()),
        auth_host: server.uri(),
        credentials: PortalCredentials {
            username: "alice".to_string(),
            password: "hunter2".to_string(),
            client: "referer".to_string(),
            referer: "https://example.org".to_string(),
            expiration: 60,
            format: "json".to_string(),
        },
        refresh_margin_secs: 120,
    }
}

pub async fn mount_count(server: &MockServer, service: &str, body: Value) {
    Mock::given(method("GET"))
        .and(path(query_path(service)))
        .and(query_param("returnCountOnly", "true"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

pub async fn mount_page(server: &MockServer, service: &str, offset: u64, body: Value) {
    Mock::given(method("GET"))
        .and(path(query_path(service)))
        .and(query_param("resultOffset", offset.to_string()))
        .and(query_param("resultRecordCount", "2000"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .expect(1)
        .mount(server)
        .await;
}

pub fn geojson_feature(id: i64, geometry: Value) -> Value {
    json!({
        "type": "Feature",
        "properties": {"OBJECTID": id, "Crash_Year": 2021},
        "geometry": geometry
    })
}

pub fn geojson_page(features: Vec<Value>) -> Value {
    json!({"type": "FeatureCollection", "features": features})
}

pub fn point(x: f64, y: f64) -> Value {
    json!({"type": "Point", "coordinates": [x, y]})
}
