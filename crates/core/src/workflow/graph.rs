//! Workflow graph index.
//!
//! ComfyUI writes two unrelated JSON shapes into generated files:
//!
//! - **API format** (the `prompt` chunk): a flat object of
//!   `node_id -> { "class_type": ..., "inputs": { ... } }` where a linked
//!   input is encoded as a `[source_node_id, output_slot]` pair.
//! - **UI format** (the `workflow` chunk): `{ "nodes": [...], "links": [...] }`
//!   where nodes carry positional `widgets_values` and named `inputs` that
//!   reference link ids.
//!
//! [`GraphIndex::build`] sniffs the shape and runs one adapter per format so
//! that everything downstream (the tracer and extractor) only sees the
//! uniform [`GraphIndex`].

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;
use serde_json::{Map, Value};

use crate::types::NodeId;
use crate::workflow::widgets::map_widget_values;

// ---------------------------------------------------------------------------
// Node model
// ---------------------------------------------------------------------------

/// A back-reference from an input slot to the output slot feeding it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct SourceRef {
    pub node_id: NodeId,
    pub output_slot: u32,
}

/// The value bound to a node input: a literal widget value or a link.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeInput {
    Literal(Value),
    Link(SourceRef),
}

/// Execution mode of a UI-format node. API documents only contain active
/// nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NodeMode {
    #[default]
    Active,
    /// Never executed (`mode == 2`).
    Muted,
    /// Executed as a wire from inputs to outputs (`mode == 4`).
    Bypassed,
}

impl NodeMode {
    fn from_ui(raw: Option<&Value>) -> Self {
        match raw.and_then(Value::as_u64) {
            Some(2) => Self::Muted,
            Some(4) => Self::Bypassed,
            _ => Self::Active,
        }
    }
}

/// A single normalised workflow node.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub id: NodeId,
    /// ComfyUI class type (`class_type` in API format, `type` in UI format).
    pub kind: String,
    /// Named inputs. Iteration order is by slot name.
    pub inputs: BTreeMap<String, NodeInput>,
    /// Raw `widgets_values` (UI format only).
    pub widget_values: Option<Value>,
    pub mode: NodeMode,
}

impl Node {
    pub fn input(&self, name: &str) -> Option<&NodeInput> {
        self.inputs.get(name)
    }

    /// The link bound to `name`, if that input is linked.
    pub fn link(&self, name: &str) -> Option<&SourceRef> {
        match self.inputs.get(name) {
            Some(NodeInput::Link(source)) => Some(source),
            _ => None,
        }
    }

    /// The literal bound to `name`, if that input is a literal.
    pub fn literal(&self, name: &str) -> Option<&Value> {
        match self.inputs.get(name) {
            Some(NodeInput::Literal(value)) => Some(value),
            _ => None,
        }
    }

    /// All linked inputs, ordered by slot name.
    pub fn links(&self) -> impl Iterator<Item = (&str, &SourceRef)> {
        self.inputs.iter().filter_map(|(name, input)| match input {
            NodeInput::Link(source) => Some((name.as_str(), source)),
            NodeInput::Literal(_) => None,
        })
    }

    /// All literal inputs, ordered by slot name.
    pub fn literals(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.inputs.iter().filter_map(|(name, input)| match input {
            NodeInput::Literal(value) => Some((name.as_str(), value)),
            NodeInput::Link(_) => None,
        })
    }

    pub fn is_active(&self) -> bool {
        self.mode == NodeMode::Active
    }
}

// ---------------------------------------------------------------------------
// Index
// ---------------------------------------------------------------------------

/// Which JSON shape a document was parsed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowFormat {
    Api,
    Ui,
}

/// A tolerated defect found while normalising a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphAnomaly {
    /// An input referenced a node that does not exist; the input was dropped.
    DanglingLink {
        target: NodeId,
        input: String,
        source: NodeId,
    },
    /// A UI input referenced a link id missing from the link table.
    UnknownLinkId {
        target: NodeId,
        input: String,
        link_id: i64,
    },
    /// A UI link table entry could not be decoded.
    InvalidLinkEntry { index: usize },
}

/// Why a document could not be indexed.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GraphError {
    /// The JSON is not a workflow at all. Expected for most metadata.
    #[error("document is not a workflow")]
    NotAWorkflow,

    /// The JSON looks like a workflow but is structurally invalid.
    #[error("malformed workflow: {reason} (nodes: {node_ids:?})")]
    Malformed {
        reason: String,
        node_ids: Vec<NodeId>,
    },
}

impl GraphError {
    fn malformed(reason: impl Into<String>, node_ids: Vec<NodeId>) -> Self {
        Self::Malformed {
            reason: reason.into(),
            node_ids,
        }
    }
}

/// Uniform, format-agnostic view of a workflow document.
#[derive(Debug, Clone, PartialEq)]
pub struct GraphIndex {
    pub format: WorkflowFormat,
    pub nodes_by_id: BTreeMap<NodeId, Node>,
    /// `(target node, input slot name) -> source`. Every source is present
    /// in `nodes_by_id`.
    pub links_by_target: BTreeMap<(NodeId, String), SourceRef>,
    pub anomalies: Vec<GraphAnomaly>,
}

impl GraphIndex {
    /// Sniff the document shape and normalise it.
    pub fn build(document: &Value) -> Result<Self, GraphError> {
        let obj = document.as_object().ok_or(GraphError::NotAWorkflow)?;
        match detect_format(obj)? {
            WorkflowFormat::Api => normalize_api(obj),
            WorkflowFormat::Ui => normalize_ui(obj),
        }
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes_by_id.get(id)
    }

    /// Resolve a link to its source node.
    pub fn source(&self, source: &SourceRef) -> Option<&Node> {
        self.nodes_by_id.get(&source.node_id)
    }

    /// Nodes ordered by numeric id where ids are numeric, so `"9"` sorts
    /// before `"10"` independently of document order.
    pub fn nodes_in_id_order(&self) -> Vec<&Node> {
        let mut nodes: Vec<&Node> = self.nodes_by_id.values().collect();
        nodes.sort_by(|a, b| node_order_key(&a.id).cmp(&node_order_key(&b.id)));
        nodes
    }

    /// Check the link invariant and drop dangling links, recording anomalies.
    fn finish(
        format: WorkflowFormat,
        mut nodes_by_id: BTreeMap<NodeId, Node>,
        mut anomalies: Vec<GraphAnomaly>,
    ) -> Self {
        let mut dangling = Vec::new();
        for node in nodes_by_id.values() {
            for (input, source) in node.links() {
                if !nodes_by_id.contains_key(&source.node_id) {
                    dangling.push((node.id.clone(), input.to_string(), source.node_id.clone()));
                }
            }
        }
        for (target, input, source) in dangling {
            if let Some(node) = nodes_by_id.get_mut(&target) {
                node.inputs.remove(&input);
            }
            anomalies.push(GraphAnomaly::DanglingLink {
                target,
                input,
                source,
            });
        }

        let links_by_target = nodes_by_id
            .values()
            .flat_map(|node| {
                node.links().map(move |(input, source)| {
                    ((node.id.clone(), input.to_string()), source.clone())
                })
            })
            .collect();

        Self {
            format,
            nodes_by_id,
            links_by_target,
            anomalies,
        }
    }
}

/// Sort key placing numeric ids in numeric order ahead of non-numeric ids.
pub fn node_order_key(id: &str) -> (u64, &str) {
    (id.parse::<u64>().unwrap_or(u64::MAX), id)
}

// ---------------------------------------------------------------------------
// Format detection
// ---------------------------------------------------------------------------

fn detect_format(obj: &Map<String, Value>) -> Result<WorkflowFormat, GraphError> {
    if let Some(nodes) = obj.get("nodes") {
        if !nodes.is_array() {
            return Err(GraphError::malformed("'nodes' must be an array", Vec::new()));
        }
        if let Some(links) = obj.get("links") {
            if !links.is_array() {
                return Err(GraphError::malformed("'links' must be an array", Vec::new()));
            }
        }
        return Ok(WorkflowFormat::Ui);
    }

    let looks_like_api = obj
        .values()
        .any(|v| v.get("class_type").is_some());
    if looks_like_api {
        Ok(WorkflowFormat::Api)
    } else {
        Err(GraphError::NotAWorkflow)
    }
}

/// Decode a node id that may be serialised as a string or an integer.
fn parse_node_id(value: &Value) -> Option<NodeId> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => n
            .as_u64()
            .map(|v| v.to_string())
            .or_else(|| n.as_i64().map(|v| v.to_string())),
        _ => None,
    }
}

fn parse_slot(value: &Value) -> Option<u32> {
    value.as_u64().and_then(|v| u32::try_from(v).ok())
}

// ---------------------------------------------------------------------------
// API format adapter
// ---------------------------------------------------------------------------

/// Decode an API-format input value: `[node_id, slot]` is a link.
fn parse_api_input(value: &Value) -> NodeInput {
    if let Some([node, slot]) = value.as_array().map(Vec::as_slice) {
        if let (Some(node_id), Some(output_slot)) = (parse_node_id(node), parse_slot(slot)) {
            return NodeInput::Link(SourceRef {
                node_id,
                output_slot,
            });
        }
    }
    NodeInput::Literal(value.clone())
}

fn normalize_api(obj: &Map<String, Value>) -> Result<GraphIndex, GraphError> {
    let mut nodes_by_id = BTreeMap::new();
    let mut invalid = Vec::new();

    for (node_id, node_value) in obj {
        let Some(node_obj) = node_value.as_object() else {
            invalid.push(node_id.clone());
            continue;
        };
        let Some(kind) = node_obj.get("class_type").and_then(Value::as_str) else {
            invalid.push(node_id.clone());
            continue;
        };

        let inputs = match node_obj.get("inputs") {
            None | Some(Value::Null) => BTreeMap::new(),
            Some(Value::Object(raw)) => raw
                .iter()
                .map(|(name, value)| (name.clone(), parse_api_input(value)))
                .collect(),
            Some(_) => {
                invalid.push(node_id.clone());
                continue;
            }
        };

        nodes_by_id.insert(
            node_id.clone(),
            Node {
                id: node_id.clone(),
                kind: kind.to_string(),
                inputs,
                widget_values: None,
                mode: NodeMode::Active,
            },
        );
    }

    if !invalid.is_empty() {
        return Err(GraphError::malformed(
            "API node without an object body, a 'class_type' or object 'inputs'",
            invalid,
        ));
    }

    Ok(GraphIndex::finish(WorkflowFormat::Api, nodes_by_id, Vec::new()))
}

// ---------------------------------------------------------------------------
// UI format adapter
// ---------------------------------------------------------------------------

/// One decoded entry of the UI link table.
struct UiLink {
    origin: NodeId,
    origin_slot: u32,
}

/// Decode a link table entry in either the legacy array layout
/// `[id, origin_id, origin_slot, target_id, target_slot, type]` or the
/// object layout used by newer frontends.
fn parse_ui_link(entry: &Value) -> Option<(i64, UiLink)> {
    match entry {
        Value::Array(items) if items.len() >= 5 => Some((
            items[0].as_i64()?,
            UiLink {
                origin: parse_node_id(&items[1])?,
                origin_slot: parse_slot(&items[2])?,
            },
        )),
        Value::Object(fields) => Some((
            fields.get("id")?.as_i64()?,
            UiLink {
                origin: parse_node_id(fields.get("origin_id")?)?,
                origin_slot: parse_slot(fields.get("origin_slot")?)?,
            },
        )),
        _ => None,
    }
}

fn normalize_ui(obj: &Map<String, Value>) -> Result<GraphIndex, GraphError> {
    let raw_nodes = obj
        .get("nodes")
        .and_then(Value::as_array)
        .ok_or_else(|| GraphError::malformed("'nodes' must be an array", Vec::new()))?;

    if raw_nodes.is_empty() {
        return Err(GraphError::NotAWorkflow);
    }

    let mut anomalies = Vec::new();
    let mut link_table: HashMap<i64, UiLink> = HashMap::new();
    if let Some(raw_links) = obj.get("links").and_then(Value::as_array) {
        for (index, entry) in raw_links.iter().enumerate() {
            match parse_ui_link(entry) {
                Some((id, link)) => {
                    link_table.insert(id, link);
                }
                None => anomalies.push(GraphAnomaly::InvalidLinkEntry { index }),
            }
        }
    }

    let mut nodes_by_id = BTreeMap::new();
    let mut invalid = Vec::new();

    for (position, raw) in raw_nodes.iter().enumerate() {
        let id = raw.get("id").and_then(parse_node_id);
        let kind = raw.get("type").and_then(Value::as_str);
        let (id, kind) = match (id, kind) {
            (Some(id), Some(kind)) => (id, kind),
            (id, _) => {
                invalid.push(id.unwrap_or_else(|| format!("#{position}")));
                continue;
            }
        };

        let widget_values = raw.get("widgets_values").cloned();
        let mut inputs: BTreeMap<String, NodeInput> = widget_values
            .as_ref()
            .map(|wv| map_widget_values(kind, wv))
            .unwrap_or_default()
            .into_iter()
            .map(|(name, value)| (name, NodeInput::Literal(value)))
            .collect();

        if let Some(raw_inputs) = raw.get("inputs").and_then(Value::as_array) {
            for slot in raw_inputs {
                let Some(name) = slot.get("name").and_then(Value::as_str) else {
                    continue;
                };
                let Some(link_id) = slot.get("link").and_then(Value::as_i64) else {
                    continue;
                };
                match link_table.get(&link_id) {
                    Some(link) => {
                        inputs.insert(
                            name.to_string(),
                            NodeInput::Link(SourceRef {
                                node_id: link.origin.clone(),
                                output_slot: link.origin_slot,
                            }),
                        );
                    }
                    None => anomalies.push(GraphAnomaly::UnknownLinkId {
                        target: id.clone(),
                        input: name.to_string(),
                        link_id,
                    }),
                }
            }
        }

        nodes_by_id.insert(
            id.clone(),
            Node {
                id,
                kind: kind.to_string(),
                inputs,
                widget_values,
                mode: NodeMode::from_ui(raw.get("mode")),
            },
        );
    }

    if !invalid.is_empty() {
        return Err(GraphError::malformed(
            "UI node without an 'id' or 'type'",
            invalid,
        ));
    }

    Ok(GraphIndex::finish(WorkflowFormat::Ui, nodes_by_id, anomalies))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;

    fn api_workflow() -> Value {
        json!({
            "3": {
                "class_type": "KSampler",
                "inputs": {
                    "seed": 42,
                    "steps": 20,
                    "model": ["4", 0],
                    "positive": ["6", 0],
                    "latent_image": [5, 0]
                }
            },
            "4": {
                "class_type": "CheckpointLoaderSimple",
                "inputs": { "ckpt_name": "sd_xl.safetensors" }
            },
            "5": {
                "class_type": "EmptyLatentImage",
                "inputs": { "width": 1024, "height": 1024, "batch_size": 1 }
            },
            "6": {
                "class_type": "CLIPTextEncode",
                "inputs": { "text": "a cat", "clip": ["4", 1] }
            }
        })
    }

    fn ui_workflow() -> Value {
        json!({
            "version": 0.4,
            "nodes": [
                {
                    "id": 3,
                    "type": "KSampler",
                    "mode": 0,
                    "inputs": [
                        { "name": "model", "type": "MODEL", "link": 1 },
                        { "name": "positive", "type": "CONDITIONING", "link": 2 },
                        { "name": "negative", "type": "CONDITIONING", "link": null }
                    ],
                    "widgets_values": [42, "randomize", 20, 7.0, "euler", "normal", 1.0]
                },
                {
                    "id": 4,
                    "type": "CheckpointLoaderSimple",
                    "inputs": [],
                    "widgets_values": ["sd_xl.safetensors"]
                },
                {
                    "id": 6,
                    "type": "CLIPTextEncode",
                    "inputs": [{ "name": "clip", "type": "CLIP", "link": 3 }],
                    "widgets_values": ["a cat"]
                }
            ],
            "links": [
                [1, 4, 0, 3, 0, "MODEL"],
                { "id": 2, "origin_id": 6, "origin_slot": 0, "target_id": 3, "target_slot": 1, "type": "CONDITIONING" },
                [3, 4, 1, 6, 0, "CLIP"]
            ]
        })
    }

    // -- format detection -----------------------------------------------------

    #[test]
    fn api_document_detected() {
        let index = GraphIndex::build(&api_workflow()).unwrap();
        assert_eq!(index.format, WorkflowFormat::Api);
        assert_eq!(index.nodes_by_id.len(), 4);
    }

    #[test]
    fn ui_document_detected() {
        let index = GraphIndex::build(&ui_workflow()).unwrap();
        assert_eq!(index.format, WorkflowFormat::Ui);
        assert_eq!(index.nodes_by_id.len(), 3);
    }

    #[test]
    fn arbitrary_json_is_not_a_workflow() {
        assert_eq!(
            GraphIndex::build(&json!({"parameters": "a cat, Steps: 20"})),
            Err(GraphError::NotAWorkflow)
        );
        assert_eq!(
            GraphIndex::build(&json!("text")),
            Err(GraphError::NotAWorkflow)
        );
        assert_eq!(
            GraphIndex::build(&json!({"nodes": [], "links": []})),
            Err(GraphError::NotAWorkflow)
        );
    }

    #[test]
    fn nodes_not_an_array_is_malformed() {
        assert_matches!(
            GraphIndex::build(&json!({"nodes": {"1": {}}, "links": []})),
            Err(GraphError::Malformed { .. })
        );
    }

    // -- API adapter ----------------------------------------------------------

    #[test]
    fn api_links_and_literals_are_split() {
        let index = GraphIndex::build(&api_workflow()).unwrap();
        let sampler = index.node("3").unwrap();
        assert_eq!(sampler.literal("steps"), Some(&json!(20)));
        assert_eq!(
            sampler.link("model"),
            Some(&SourceRef {
                node_id: "4".into(),
                output_slot: 0
            })
        );
        // Integer source ids are normalised to strings.
        assert_eq!(sampler.link("latent_image").unwrap().node_id, "5");
        assert_eq!(
            index.links_by_target.get(&("3".to_string(), "positive".to_string())),
            Some(&SourceRef {
                node_id: "6".into(),
                output_slot: 0
            })
        );
    }

    #[test]
    fn api_node_missing_class_type_is_malformed_with_ids() {
        let doc = json!({
            "1": { "class_type": "KSampler", "inputs": {} },
            "2": { "inputs": {} }
        });
        assert_eq!(
            GraphIndex::build(&doc),
            Err(GraphError::Malformed {
                reason: "API node without an object body, a 'class_type' or object 'inputs'"
                    .into(),
                node_ids: vec!["2".into()],
            })
        );
    }

    #[test]
    fn api_dangling_link_is_dropped_and_recorded() {
        let doc = json!({
            "1": { "class_type": "KSampler", "inputs": { "model": ["99", 0], "steps": 4 } }
        });
        let index = GraphIndex::build(&doc).unwrap();
        let sampler = index.node("1").unwrap();
        assert!(sampler.input("model").is_none());
        assert_eq!(sampler.literal("steps"), Some(&json!(4)));
        assert!(index.links_by_target.is_empty());
        assert_eq!(
            index.anomalies,
            vec![GraphAnomaly::DanglingLink {
                target: "1".into(),
                input: "model".into(),
                source: "99".into(),
            }]
        );
    }

    #[test]
    fn unknown_kinds_are_retained() {
        let doc = json!({
            "1": { "class_type": "Seed Generator", "inputs": { "seed": 7 } },
            "2": { "class_type": "KSampler", "inputs": { "seed": ["1", 0] } }
        });
        let index = GraphIndex::build(&doc).unwrap();
        assert_eq!(index.node("1").unwrap().kind, "Seed Generator");
    }

    // -- UI adapter -----------------------------------------------------------

    #[test]
    fn ui_widgets_are_named_and_links_resolved() {
        let index = GraphIndex::build(&ui_workflow()).unwrap();
        let sampler = index.node("3").unwrap();
        assert_eq!(sampler.literal("seed"), Some(&json!(42)));
        assert_eq!(sampler.literal("steps"), Some(&json!(20)));
        assert_eq!(sampler.literal("sampler_name"), Some(&json!("euler")));
        assert_eq!(sampler.link("model").unwrap().node_id, "4");
        // Object-layout link entries decode the same way.
        assert_eq!(sampler.link("positive").unwrap().node_id, "6");
        // Unlinked inputs stay absent.
        assert!(sampler.input("negative").is_none());
        assert!(sampler.widget_values.is_some());
    }

    #[test]
    fn ui_unknown_link_id_recorded() {
        let doc = json!({
            "nodes": [
                { "id": 1, "type": "KSampler", "inputs": [{ "name": "model", "link": 77 }] }
            ],
            "links": [["bad"]]
        });
        let index = GraphIndex::build(&doc).unwrap();
        assert!(index.node("1").unwrap().input("model").is_none());
        assert!(index
            .anomalies
            .contains(&GraphAnomaly::InvalidLinkEntry { index: 0 }));
        assert!(index.anomalies.contains(&GraphAnomaly::UnknownLinkId {
            target: "1".into(),
            input: "model".into(),
            link_id: 77,
        }));
    }

    #[test]
    fn ui_node_without_type_is_malformed() {
        let doc = json!({
            "nodes": [{ "id": 5, "inputs": [] }],
            "links": []
        });
        assert_matches!(
            GraphIndex::build(&doc),
            Err(GraphError::Malformed { node_ids, .. }) if node_ids == vec!["5".to_string()]
        );
    }

    #[test]
    fn ui_node_without_id_is_reported_by_position() {
        let doc = json!({
            "nodes": [
                { "id": 1, "type": "KSampler", "widgets_values": [] },
                { "type": "CLIPTextEncode", "widgets_values": ["a cat"] }
            ],
            "links": []
        });
        assert_matches!(
            GraphIndex::build(&doc),
            Err(GraphError::Malformed { node_ids, .. }) if node_ids == vec!["#1".to_string()]
        );
    }

    #[test]
    fn ui_modes_are_decoded() {
        let doc = json!({
            "nodes": [
                { "id": 1, "type": "KSampler", "mode": 4 },
                { "id": 2, "type": "KSampler", "mode": 2 },
                { "id": 3, "type": "KSampler" }
            ],
            "links": []
        });
        let index = GraphIndex::build(&doc).unwrap();
        assert_eq!(index.node("1").unwrap().mode, NodeMode::Bypassed);
        assert_eq!(index.node("2").unwrap().mode, NodeMode::Muted);
        assert_eq!(index.node("3").unwrap().mode, NodeMode::Active);
    }

    // -- ordering -------------------------------------------------------------

    #[test]
    fn numeric_ids_sort_numerically() {
        let doc = json!({
            "10": { "class_type": "A" },
            "9": { "class_type": "B" },
            "x": { "class_type": "C" }
        });
        let index = GraphIndex::build(&doc).unwrap();
        let ids: Vec<_> = index
            .nodes_in_id_order()
            .into_iter()
            .map(|n| n.id.as_str())
            .collect();
        assert_eq!(ids, vec!["9", "10", "x"]);
    }
}
