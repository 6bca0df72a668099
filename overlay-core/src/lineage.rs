//! Lineage events and the graph shapes projected from them.

use crate::{sha256_hex, CacheError, CacheRegion, CacheResult, CacheValue, ValidationError};
use chrono::DateTime;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

// ============================================================================
// EVENTS
// ============================================================================

/// Run state transition reported by an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    Start,
    Running,
    Complete,
    Abort,
    Other,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Start => "START",
            EventType::Running => "RUNNING",
            EventType::Complete => "COMPLETE",
            EventType::Abort => "ABORT",
            EventType::Other => "OTHER",
        }
    }

    /// Whether the run has ended.
    pub fn is_terminal(&self) -> bool {
        matches!(self, EventType::Complete | EventType::Abort)
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "START" => Ok(EventType::Start),
            "RUNNING" => Ok(EventType::Running),
            "COMPLETE" => Ok(EventType::Complete),
            "ABORT" => Ok(EventType::Abort),
            "OTHER" => Ok(EventType::Other),
            other => Err(ValidationError::InvalidValue {
                field: "eventType".to_string(),
                reason: format!("unknown event type {:?}", other),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRef {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub facets: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRef {
    #[serde(rename = "runId")]
    pub run_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub facets: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetRef {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub facets: Option<Value>,
}

impl DatasetRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            facets: None,
        }
    }
}

/// Provenance event emitted by a producer.
///
/// Immutable once stored. The content hash of its canonical JSON form is the
/// idempotency key for ingestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineageEvent {
    pub namespace: String,
    pub event_type: EventType,
    /// RFC 3339 timestamp.
    pub event_time: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub producer: Option<String>,
    pub job: JobRef,
    pub run: RunRef,
    #[serde(default)]
    pub inputs: Vec<DatasetRef>,
    #[serde(default)]
    pub outputs: Vec<DatasetRef>,
}

impl CacheValue for LineageEvent {
    const REGION: CacheRegion = CacheRegion::LineageEvent;
}

impl LineageEvent {
    /// JSON form with object keys sorted at every level.
    pub fn canonical_json(&self) -> Result<String, ValidationError> {
        let value = serde_json::to_value(self).map_err(|e| ValidationError::InvalidValue {
            field: "event".to_string(),
            reason: e.to_string(),
        })?;
        Ok(canonicalize(value).to_string())
    }

    /// Lowercase hex SHA-256 of the canonical JSON form.
    pub fn content_hash(&self) -> Result<String, ValidationError> {
        Ok(sha256_hex(self.canonical_json()?.as_bytes()))
    }

    /// Event time in milliseconds since the epoch.
    pub fn event_time_millis(&self) -> Result<i64, ValidationError> {
        DateTime::parse_from_rfc3339(&self.event_time)
            .map(|t| t.timestamp_millis())
            .map_err(|e| ValidationError::InvalidValue {
                field: "eventTime".to_string(),
                reason: e.to_string(),
            })
    }

    /// Check the event is well-formed and its canonical form is at most
    /// `max_bytes` long.
    pub fn validate(&self, max_bytes: usize) -> Result<(), ValidationError> {
        require_non_empty("namespace", &self.namespace)?;
        if self.namespace.contains(':') {
            return Err(ValidationError::InvalidValue {
                field: "namespace".to_string(),
                reason: "must not contain ':'".to_string(),
            });
        }
        require_non_empty("job.name", &self.job.name)?;
        require_non_empty("run.runId", &self.run.run_id)?;
        for dataset in self.inputs.iter().chain(self.outputs.iter()) {
            require_non_empty("dataset.name", &dataset.name)?;
        }
        self.event_time_millis()?;

        let size = self.canonical_json()?.len();
        if size > max_bytes {
            return Err(ValidationError::InvalidValue {
                field: "event".to_string(),
                reason: format!("canonical payload is {} bytes, limit is {}", size, max_bytes),
            });
        }
        Ok(())
    }

    /// Distinct datasets referenced by the event, inputs first.
    ///
    /// When a dataset appears more than once, the last occurrence carrying
    /// facets wins.
    pub fn datasets(&self) -> Vec<DatasetRef> {
        let mut out: Vec<DatasetRef> = Vec::new();
        let mut index: HashMap<&str, usize> = HashMap::new();
        for dataset in self.inputs.iter().chain(self.outputs.iter()) {
            match index.get(dataset.name.as_str()) {
                Some(&i) => {
                    if dataset.facets.is_some() {
                        out[i].facets = dataset.facets.clone();
                    }
                }
                None => {
                    index.insert(dataset.name.as_str(), out.len());
                    out.push(dataset.clone());
                }
            }
        }
        out
    }

    /// Distinct `(input, output)` name pairs. Empty when either side is empty.
    pub fn edge_pairs(&self) -> Vec<(&str, &str)> {
        let mut pairs = Vec::with_capacity(self.inputs.len() * self.outputs.len());
        for input in &self.inputs {
            for output in &self.outputs {
                let pair = (input.name.as_str(), output.name.as_str());
                if !pairs.contains(&pair) {
                    pairs.push(pair);
                }
            }
        }
        pairs
    }
}

fn require_non_empty(field: &str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::RequiredFieldMissing {
            field: field.to_string(),
        });
    }
    Ok(())
}

fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            let mut sorted = Map::new();
            for (k, v) in entries {
                sorted.insert(k, canonicalize(v));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}

// ============================================================================
// NODES AND EDGES
// ============================================================================

/// Dataset identifier of the form `dataset:<namespace>:<name>`.
///
/// The namespace may not contain `:`; the name may.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NodeId {
    pub namespace: String,
    pub name: String,
}

impl NodeId {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Same dataset name under another namespace.
    pub fn with_namespace(&self, namespace: &str) -> Self {
        Self::new(namespace, self.name.clone())
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dataset:{}:{}", self.namespace, self.name)
    }
}

impl FromStr for NodeId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ValidationError::InvalidNode {
            value: s.to_string(),
        };
        let mut parts = s.splitn(3, ':');
        match (parts.next(), parts.next(), parts.next()) {
            (Some("dataset"), Some(namespace), Some(name))
                if !namespace.is_empty() && !name.is_empty() =>
            {
                Ok(Self::new(namespace, name))
            }
            _ => Err(invalid()),
        }
    }
}

impl TryFrom<String> for NodeId {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<NodeId> for String {
    fn from(node: NodeId) -> Self {
        node.to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    #[default]
    Dataset,
}

/// Dataset materialized in the projection. Best-effort, not authoritative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineageNode {
    pub namespace: String,
    pub name: String,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    #[serde(default)]
    pub facets: Value,
}

impl LineageNode {
    pub fn id(&self) -> NodeId {
        NodeId::new(self.namespace.clone(), self.name.clone())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeRel {
    #[default]
    Parent,
}

/// `from` is a parent of `to`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LineageEdge {
    pub from: NodeId,
    pub to: NodeId,
    pub rel: EdgeRel,
}

impl LineageEdge {
    pub fn parent(from: NodeId, to: NodeId) -> Self {
        Self {
            from,
            to,
            rel: EdgeRel::Parent,
        }
    }
}

// ============================================================================
// QUERY PARAMETERS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
    #[default]
    Both,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Up => "up",
            Direction::Down => "down",
            Direction::Both => "both",
        }
    }

    pub fn includes_up(&self) -> bool {
        matches!(self, Direction::Up | Direction::Both)
    }

    pub fn includes_down(&self) -> bool {
        matches!(self, Direction::Down | Direction::Both)
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "up" => Ok(Direction::Up),
            "down" => Ok(Direction::Down),
            "both" => Ok(Direction::Both),
            other => Err(ValidationError::InvalidValue {
                field: "direction".to_string(),
                reason: format!("expected up, down or both, got {:?}", other),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GraphFormat {
    #[default]
    Simple,
    Cyto,
}

impl GraphFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            GraphFormat::Simple => "simple",
            GraphFormat::Cyto => "cyto",
        }
    }
}

impl fmt::Display for GraphFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GraphFormat {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "simple" => Ok(GraphFormat::Simple),
            "cyto" => Ok(GraphFormat::Cyto),
            other => Err(ValidationError::InvalidValue {
                field: "format".to_string(),
                reason: format!("expected simple or cyto, got {:?}", other),
            }),
        }
    }
}

// ============================================================================
// QUERY RESULTS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GraphStats {
    pub nodes: usize,
    pub edges: usize,
    /// The depth cap cut off at least one unexplored neighbor.
    pub truncated: bool,
    /// Visited nodes whose metadata had expired from the projection.
    #[serde(default)]
    pub missing_metadata: usize,
    /// A projection read failed during traversal; the result is partial.
    #[serde(default)]
    pub degraded: bool,
}

/// Traversal result in the simple output format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineageGraph {
    pub node: NodeId,
    pub depth: u32,
    pub direction: Direction,
    pub nodes: Vec<LineageNode>,
    pub edges: Vec<LineageEdge>,
    pub stats: GraphStats,
}

impl LineageGraph {
    /// Convert to Cytoscape elements. Edge ids are positional.
    pub fn to_cyto(&self) -> CytoGraph {
        let nodes = self
            .nodes
            .iter()
            .map(|node| CytoNode {
                data: CytoNodeData {
                    id: node.id().to_string(),
                    label: node.name.clone(),
                    namespace: node.namespace.clone(),
                    node_type: node.node_type,
                    facets: node.facets.clone(),
                },
            })
            .collect();
        let edges = self
            .edges
            .iter()
            .enumerate()
            .map(|(i, edge)| CytoEdge {
                data: CytoEdgeData {
                    id: format!("edge-{}", i),
                    source: edge.from.to_string(),
                    target: edge.to.to_string(),
                    rel: edge.rel,
                },
            })
            .collect();

        CytoGraph {
            node: self.node.clone(),
            depth: self.depth,
            direction: self.direction,
            elements: CytoElements { nodes, edges },
            stats: self.stats,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CytoNodeData {
    pub id: String,
    pub label: String,
    pub namespace: String,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    pub facets: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CytoNode {
    pub data: CytoNodeData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CytoEdgeData {
    pub id: String,
    pub source: String,
    pub target: String,
    pub rel: EdgeRel,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CytoEdge {
    pub data: CytoEdgeData,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CytoElements {
    pub nodes: Vec<CytoNode>,
    pub edges: Vec<CytoEdge>,
}

/// Traversal result in the Cytoscape output format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CytoGraph {
    pub node: NodeId,
    pub depth: u32,
    pub direction: Direction,
    pub elements: CytoElements,
    pub stats: GraphStats,
}

/// Cached traversal result in either output format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "format", rename_all = "lowercase")]
pub enum GraphView {
    Simple(LineageGraph),
    Cyto(CytoGraph),
}

impl CacheValue for GraphView {
    const REGION: CacheRegion = CacheRegion::LineageGraph;
}

impl GraphView {
    pub fn render(graph: LineageGraph, format: GraphFormat) -> Self {
        match format {
            GraphFormat::Simple => GraphView::Simple(graph),
            GraphFormat::Cyto => GraphView::Cyto(graph.to_cyto()),
        }
    }

    pub fn format(&self) -> GraphFormat {
        match self {
            GraphView::Simple(_) => GraphFormat::Simple,
            GraphView::Cyto(_) => GraphFormat::Cyto,
        }
    }

    pub fn stats(&self) -> &GraphStats {
        match self {
            GraphView::Simple(graph) => &graph.stats,
            GraphView::Cyto(graph) => &graph.stats,
        }
    }
}

// ============================================================================
// PROJECTION RECORDS
// ============================================================================

fn decode_facets(
    key: &str,
    fields: &HashMap<String, String>,
    field: &str,
) -> CacheResult<Option<Value>> {
    fields
        .get(field)
        .map(|raw| {
            serde_json::from_str(raw).map_err(|e| CacheError::Decode {
                key: key.to_string(),
                region: CacheRegion::LineageEvent,
                reason: format!("{}: {}", field, e),
            })
        })
        .transpose()
}

/// Dataset metadata hash from the projection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetInfo {
    pub namespace: String,
    pub name: String,
    pub facets: Option<Value>,
}

impl DatasetInfo {
    /// Decode the hash stored at `key`. `None` when the hash is absent.
    pub fn from_hash(key: &str, fields: &HashMap<String, String>) -> CacheResult<Option<Self>> {
        let Some(name) = fields.get("name") else {
            return Ok(None);
        };
        Ok(Some(Self {
            namespace: fields.get("namespace").cloned().unwrap_or_default(),
            name: name.clone(),
            facets: decode_facets(key, fields, "facets")?,
        }))
    }

    pub fn into_node(self) -> LineageNode {
        LineageNode {
            namespace: self.namespace,
            name: self.name,
            node_type: NodeType::Dataset,
            facets: self.facets.unwrap_or_else(|| Value::Object(Map::new())),
        }
    }
}

/// Job metadata hash from the projection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobInfo {
    pub namespace: String,
    pub name: String,
    pub facets: Option<Value>,
    /// Event time, in milliseconds, of the latest event for this job.
    pub updated_at: Option<i64>,
}

impl JobInfo {
    pub fn from_hash(key: &str, fields: &HashMap<String, String>) -> CacheResult<Option<Self>> {
        let Some(name) = fields.get("name") else {
            return Ok(None);
        };
        Ok(Some(Self {
            namespace: fields.get("namespace").cloned().unwrap_or_default(),
            name: name.clone(),
            facets: decode_facets(key, fields, "facets")?,
            updated_at: fields.get("updatedAt").and_then(|v| v.parse().ok()),
        }))
    }
}

/// Run metadata hash from the projection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunInfo {
    pub run_id: String,
    pub job_name: Option<String>,
    /// Type of the latest event for this run.
    pub state: Option<EventType>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub facets: Option<Value>,
}

impl RunInfo {
    pub fn from_hash(key: &str, fields: &HashMap<String, String>) -> CacheResult<Option<Self>> {
        let Some(run_id) = fields.get("runId") else {
            return Ok(None);
        };
        let state = fields
            .get("state")
            .map(|raw| {
                raw.parse::<EventType>().map_err(|e| CacheError::Decode {
                    key: key.to_string(),
                    region: CacheRegion::LineageEvent,
                    reason: e.to_string(),
                })
            })
            .transpose()?;
        Ok(Some(Self {
            run_id: run_id.clone(),
            job_name: fields.get("jobName").cloned(),
            state,
            start_time: fields.get("startTime").cloned(),
            end_time: fields.get("endTime").cloned(),
            facets: decode_facets(key, fields, "facets")?,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event() -> LineageEvent {
        LineageEvent {
            namespace: "prod".to_string(),
            event_type: EventType::Complete,
            event_time: "2024-05-01T12:00:00Z".to_string(),
            producer: None,
            job: JobRef {
                name: "etl".to_string(),
                facets: None,
            },
            run: RunRef {
                run_id: "run-1".to_string(),
                facets: Some(json!({"b": 1, "a": {"z": true, "y": false}})),
            },
            inputs: vec![DatasetRef::new("raw")],
            outputs: vec![DatasetRef::new("clean"), DatasetRef::new("raw")],
        }
    }

    #[test]
    fn test_event_wire_names() {
        let json = serde_json::to_value(event()).unwrap();
        assert_eq!(json["eventType"], "COMPLETE");
        assert_eq!(json["run"]["runId"], "run-1");
        assert!(json.get("producer").is_none());
    }

    #[test]
    fn test_canonical_json_sorts_keys() {
        let canonical = event().canonical_json().unwrap();
        let a = canonical.find("\"a\":").unwrap();
        let b = canonical.find("\"b\":").unwrap();
        assert!(a < b);
        let y = canonical.find("\"y\":").unwrap();
        let z = canonical.find("\"z\":").unwrap();
        assert!(y < z);
    }

    #[test]
    fn test_content_hash_is_stable_across_roundtrip() {
        let original = event();
        let decoded: LineageEvent =
            serde_json::from_str(&serde_json::to_string(&original).unwrap()).unwrap();
        assert_eq!(
            original.content_hash().unwrap(),
            decoded.content_hash().unwrap()
        );
        assert_eq!(original.content_hash().unwrap().len(), 64);
    }

    #[test]
    fn test_validate_rejects_bad_events() {
        let mut bad = event();
        bad.job.name = "  ".to_string();
        assert!(matches!(
            bad.validate(1024),
            Err(ValidationError::RequiredFieldMissing { .. })
        ));

        let mut bad = event();
        bad.event_time = "yesterday".to_string();
        assert!(bad.validate(1024).is_err());

        let mut bad = event();
        bad.namespace = "a:b".to_string();
        assert!(bad.validate(1024).is_err());

        assert!(event().validate(16).is_err());
        assert!(event().validate(64 * 1024).is_ok());
    }

    #[test]
    fn test_datasets_are_deduplicated() {
        let names: Vec<String> = event().datasets().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["raw", "clean"]);
    }

    #[test]
    fn test_edge_pairs() {
        let e = event();
        assert_eq!(e.edge_pairs(), vec![("raw", "clean"), ("raw", "raw")]);

        let mut start = event();
        start.outputs.clear();
        assert!(start.edge_pairs().is_empty());
    }

    #[test]
    fn test_node_id_parse_and_display() {
        let node: NodeId = "dataset:prod:db.schema:table".parse().unwrap();
        assert_eq!(node.namespace, "prod");
        assert_eq!(node.name, "db.schema:table");
        assert_eq!(node.to_string(), "dataset:prod:db.schema:table");

        assert!("job:prod:x".parse::<NodeId>().is_err());
        assert!("dataset::x".parse::<NodeId>().is_err());
        assert!("dataset:prod".parse::<NodeId>().is_err());
    }

    #[test]
    fn test_node_id_serializes_as_string() {
        let edge = LineageEdge::parent(NodeId::new("ns", "a"), NodeId::new("ns", "b"));
        let json = serde_json::to_value(&edge).unwrap();
        assert_eq!(
            json,
            json!({"from": "dataset:ns:a", "to": "dataset:ns:b", "rel": "parent"})
        );
    }

    #[test]
    fn test_edges_dedupe_in_hash_sets() {
        let ab = LineageEdge::parent(NodeId::new("ns", "a"), NodeId::new("ns", "b"));
        let ba = LineageEdge::parent(NodeId::new("ns", "b"), NodeId::new("ns", "a"));
        let edges: std::collections::HashSet<LineageEdge> =
            [ab.clone(), ab, ba].into_iter().collect();
        assert_eq!(edges.len(), 2);
    }

    #[test]
    fn test_graph_view_roundtrip_keeps_format() {
        let graph = LineageGraph {
            node: NodeId::new("ns", "a"),
            depth: 1,
            direction: Direction::Up,
            nodes: vec![LineageNode {
                namespace: "ns".to_string(),
                name: "a".to_string(),
                node_type: NodeType::Dataset,
                facets: json!({}),
            }],
            edges: vec![],
            stats: GraphStats {
                nodes: 1,
                ..GraphStats::default()
            },
        };
        let view = GraphView::render(graph, GraphFormat::Cyto);
        let decoded: GraphView =
            serde_json::from_str(&serde_json::to_string(&view).unwrap()).unwrap();
        assert_eq!(decoded.format(), GraphFormat::Cyto);
        assert_eq!(decoded.stats().nodes, 1);
    }

    #[test]
    fn test_run_info_from_hash() {
        let mut fields = HashMap::new();
        fields.insert("runId".to_string(), "r1".to_string());
        fields.insert("state".to_string(), "START".to_string());
        fields.insert("facets".to_string(), "{not json".to_string());
        let err = RunInfo::from_hash("ol:ns:prod:run:r1", &fields).unwrap_err();
        assert!(matches!(err, CacheError::Decode { .. }));

        fields.remove("facets");
        let run = RunInfo::from_hash("ol:ns:prod:run:r1", &fields)
            .unwrap()
            .unwrap();
        assert_eq!(run.state, Some(EventType::Start));
        assert!(RunInfo::from_hash("k", &HashMap::new()).unwrap().is_none());
    }
}
