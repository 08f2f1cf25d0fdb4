//! WAN/ISP detection: hybrid scoring over default routes, traffic volume,
//! and name/comment patterns, with a short-lived decision cache. The
//! detector never panics when the router is away; it degrades to a
//! `none`/`error` decision.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::sync::Mutex as StdMutex;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::WanDetectionConfig;
use crate::router::RouterClient;
use crate::ws::models::EVENT_WAN_DETECTED;
use crate::ws::WsHub;

pub const METHOD_ROUTE: &str = "default_route";
pub const METHOD_TRAFFIC: &str = "traffic_analysis";
pub const METHOD_PATTERN: &str = "name_pattern";
pub const METHOD_MANUAL: &str = "manual";

const ROUTE_CONFIDENCE: f64 = 0.95;
const TRAFFIC_CONFIDENCE: f64 = 0.70;
const PATTERN_CONFIDENCE: f64 = 0.50;

static WAN_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)wan",
        r"(?i)isp",
        r"(?i)pppoe",
        r"(?i)sumber",
        r"(?i)ether.*wan",
        r"(?i)bridge.*wan",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("static pattern"))
    .collect()
});

static ISP_NAME_PATTERNS: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    [
        ("telkom", r"(?i)(telkom|indihome|indihomo)"),
        ("indosat", r"(?i)(indosat|im3|mentari)"),
        ("xl", r"(?i)(xl|axis)"),
        ("starlink", r"(?i)(starlink|strlnk)"),
        ("biznet", r"(?i)biznet"),
    ]
    .iter()
    .map(|(name, p)| (*name, Regex::new(p).expect("static pattern")))
    .collect()
});

/// The detector's answer: which interface carries the uplink, how it was
/// found, and how sure we are.
#[derive(Clone, Debug, Serialize)]
pub struct WanDecision {
    pub name: String,
    pub method: String,
    pub confidence: f64,
    pub isp_name: String,
    pub traffic: u64,
    pub last_updated: DateTime<Utc>,
}

impl WanDecision {
    fn unavailable(method: &str) -> Self {
        Self {
            name: "none".to_string(),
            method: method.to_string(),
            confidence: 0.0,
            isp_name: "unknown".to_string(),
            traffic: 0,
            last_updated: Utc::now(),
        }
    }
}

/// A method's vote before scoring.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Candidate {
    pub name: String,
    pub traffic: u64,
}

#[derive(Debug, Default)]
pub struct WanMetrics {
    cache_hits: AtomicI64,
    total_detections: AtomicI64,
    failures: AtomicI64,
    method_counts: StdMutex<HashMap<String, i64>>,
}

impl WanMetrics {
    fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    fn record_detection(&self, method: &str) {
        self.total_detections.fetch_add(1, Ordering::Relaxed);
        *self
            .method_counts
            .lock()
            .unwrap()
            .entry(method.to_string())
            .or_insert(0) += 1;
    }

    fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn failures(&self) -> i64 {
        self.failures.load(Ordering::Relaxed)
    }

    pub fn requests(&self) -> i64 {
        self.total_detections.load(Ordering::Relaxed) + self.cache_hits.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> Value {
        serde_json::json!({
            "cache_hits": self.cache_hits.load(Ordering::Relaxed),
            "total_detections": self.total_detections.load(Ordering::Relaxed),
            "detection_failure": self.failures.load(Ordering::Relaxed),
            "methods": *self.method_counts.lock().unwrap(),
        })
    }
}

pub struct WanDetector {
    config: WanDetectionConfig,
    client: Arc<RouterClient>,
    hub: Arc<WsHub>,
    cache: RwLock<Option<WanDecision>>,
    metrics: WanMetrics,
}

impl WanDetector {
    pub fn new(config: WanDetectionConfig, client: Arc<RouterClient>, hub: Arc<WsHub>) -> Self {
        Self {
            config,
            client,
            hub,
            cache: RwLock::new(None),
            metrics: WanMetrics::default(),
        }
    }

    /// Runs detection, serving from the cache within its TTL. Router
    /// unavailability degrades to a `none`/`error` decision.
    pub async fn detect(&self) -> WanDecision {
        // Liveness gate; a failed ping also invalidates the session so the
        // next attempt reconnects.
        if let Err(e) = self.client.ping().await {
            warn!(error = %e, "router unavailable, WAN detection degraded");
            self.metrics.record_failure();
            return WanDecision::unavailable("error");
        }

        {
            let cache = self.cache.read().await;
            if let Some(decision) = cache.as_ref() {
                let age = Utc::now() - decision.last_updated;
                if age.to_std().unwrap_or_default() < self.config.cache_duration {
                    self.metrics.record_cache_hit();
                    return decision.clone();
                }
            }
        }

        let outcome = match self.config.detection_method.as_str() {
            "manual" if !self.config.manual_interface.is_empty() => self.detect_manual().await,
            "auto" | "hybrid" => self.detect_hybrid().await,
            _ => self
                .detect_by_route()
                .await
                .map(|c| (c, METHOD_ROUTE, ROUTE_CONFIDENCE)),
        };

        match outcome {
            Some((candidate, method, confidence)) => {
                let decision = WanDecision {
                    isp_name: classify_isp(&candidate.name),
                    name: candidate.name,
                    method: method.to_string(),
                    confidence,
                    traffic: candidate.traffic,
                    last_updated: Utc::now(),
                };
                info!(
                    interface = %decision.name,
                    method = %decision.method,
                    confidence = decision.confidence,
                    isp = %decision.isp_name,
                    "WAN interface detected"
                );
                *self.cache.write().await = Some(decision.clone());
                self.metrics.record_detection(&decision.method);
                self.hub.broadcast_event(
                    EVENT_WAN_DETECTED,
                    &format!("WAN interface detected: {}", decision.name),
                    serde_json::json!({
                        "name": decision.name,
                        "isp": decision.isp_name,
                    }),
                );
                decision
            }
            None => {
                self.metrics.record_failure();
                WanDecision::unavailable("not_found")
            }
        }
    }

    async fn detect_manual(&self) -> Option<(Candidate, &'static str, f64)> {
        let name = self.config.manual_interface.clone();
        let traffic = match self.client.get_interface(&name).await {
            Ok(sample) if sample.running => sample.rx_bytes + sample.tx_bytes,
            Ok(_) => {
                debug!(interface = %name, "manual WAN interface is not running");
                0
            }
            Err(_) => 0,
        };
        Some((Candidate { name, traffic }, METHOD_MANUAL, 1.0))
    }

    async fn detect_hybrid(&self) -> Option<(Candidate, &'static str, f64)> {
        let route = self.detect_by_route().await;
        let traffic = self.detect_by_traffic().await;
        let pattern = self.detect_by_pattern().await;
        score_candidates(route.as_ref(), traffic.as_ref(), pattern.as_ref())
    }

    /// Default-route method: the outgoing interface of the first active
    /// `0.0.0.0/0` route whose interface is actually running.
    async fn detect_by_route(&self) -> Option<Candidate> {
        let routes = self.client.get_routes().await.ok()?;
        for route in routes {
            // "gateway%iface" puts the egress interface after the percent.
            let mut name = if route.immediate_gw.contains('%') {
                route
                    .immediate_gw
                    .rsplit('%')
                    .next()
                    .unwrap_or_default()
                    .to_string()
            } else {
                route.immediate_gw.clone()
            };
            if name.is_empty() {
                name = route.interface.clone();
            }
            if name.is_empty() {
                continue;
            }
            match self.client.get_interface(&name).await {
                Ok(sample) if sample.running => {
                    return Some(Candidate {
                        name,
                        traffic: sample.rx_bytes + sample.tx_bytes,
                    });
                }
                _ => continue,
            }
        }
        None
    }

    /// Traffic method: the running, non-bridge interface with the largest
    /// cumulative volume.
    async fn detect_by_traffic(&self) -> Option<Candidate> {
        let interfaces = self.client.list_interfaces().await.ok()?;
        let mut best: Option<Candidate> = None;
        for iface in interfaces {
            if !iface.running || iface.name.starts_with("bridge") {
                continue;
            }
            let total = iface.rx_bytes + iface.tx_bytes;
            if total == 0 {
                continue;
            }
            if best.as_ref().map(|b| total > b.traffic).unwrap_or(true) {
                best = Some(Candidate {
                    name: iface.name,
                    traffic: total,
                });
            }
        }
        best
    }

    /// Pattern method: the first running interface whose name or comment
    /// matches a known uplink naming convention.
    async fn detect_by_pattern(&self) -> Option<Candidate> {
        let interfaces = self.client.list_interfaces().await.ok()?;
        for iface in interfaces {
            if !iface.running {
                continue;
            }
            let matched = WAN_PATTERNS
                .iter()
                .any(|p| p.is_match(&iface.name) || p.is_match(&iface.comment));
            if matched {
                return Some(Candidate {
                    traffic: iface.rx_bytes + iface.tx_bytes,
                    name: iface.name,
                });
            }
        }
        None
    }

    /// Last successful decision without touching the router.
    pub async fn cached(&self) -> Option<WanDecision> {
        self.cache.read().await.clone()
    }

    pub fn metrics(&self) -> &WanMetrics {
        &self.metrics
    }
}

/// Sums per-candidate confidences across the three methods and picks the
/// argmax. The reported method reflects the winning score: route-grade
/// (>= 0.90), traffic-grade (>= 0.70), else pattern. The decision carries
/// the winning method's base confidence, so it stays within [0, 1] even
/// when several methods agree.
pub(crate) fn score_candidates(
    route: Option<&Candidate>,
    traffic: Option<&Candidate>,
    pattern: Option<&Candidate>,
) -> Option<(Candidate, &'static str, f64)> {
    let mut scores: Vec<(Candidate, f64)> = Vec::new();
    let mut add = |candidate: &Candidate, confidence: f64| {
        match scores.iter_mut().find(|(c, _)| c.name == candidate.name) {
            Some((existing, score)) => {
                *score += confidence;
                if existing.traffic == 0 {
                    existing.traffic = candidate.traffic;
                }
            }
            None => scores.push((candidate.clone(), confidence)),
        }
    };

    if let Some(c) = route {
        add(c, ROUTE_CONFIDENCE);
    }
    if let Some(c) = traffic {
        add(c, TRAFFIC_CONFIDENCE);
    }
    if let Some(c) = pattern {
        add(c, PATTERN_CONFIDENCE);
    }

    let (best, score) = scores
        .into_iter()
        .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))?;
    let (method, confidence) = if score >= 0.90 {
        (METHOD_ROUTE, ROUTE_CONFIDENCE)
    } else if score >= 0.70 {
        (METHOD_TRAFFIC, TRAFFIC_CONFIDENCE)
    } else {
        (METHOD_PATTERN, PATTERN_CONFIDENCE)
    };
    Some((best, method, confidence))
}

/// Maps an interface name onto a known ISP, or "unknown".
pub fn classify_isp(name: &str) -> String {
    for (isp, pattern) in ISP_NAME_PATTERNS.iter() {
        if pattern.is_match(name) {
            return (*isp).to_string();
        }
    }
    "unknown".to_string()
}
