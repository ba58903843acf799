//! The execution adapter: compiles a traversal's statement tree against
//! a connection and exposes a lazy, single-pass iterator of stringified
//! rows.
//!
//! Two output modes exist. [`OutputFormat::Regular`] stringifies the
//! result column of each row as it is pulled. [`OutputFormat::GraphSon`]
//! buffers one pull-batch of rows, issues a single batched adjacency
//! fetch for every emitted vertex whose adjacency list is still spilled
//! in the store, then serializes the batch to JSON in the original row
//! order. Vertices without a partition key ride along in the same batch
//! under an absent-partition marker.

use std::collections::VecDeque;
use std::sync::Arc;

use ahash::RandomState;
use hashbrown::HashMap;
use hodos_common::types::{Value, VertexId};
use hodos_common::Result;
use hodos_core::execution::{compile_statement, BoxedOperator, Cell, ExecutionContext};
use hodos_core::graph::{Connection, Direction, EdgeDoc, GraphStore};
use hodos_core::statement::DEFAULT_COLUMN;
use serde_json::{json, Map as JsonMap, Value as Json};
use tracing::debug;

use crate::query::steps::GraphTraversal;

/// Rows per GraphSON pull-batch, and so per adjacency fetch.
const GRAPHSON_BATCH: usize = 64;

/// How pulled rows are rendered to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// One stringified result value per row.
    #[default]
    Regular,
    /// JSON documents with adjacency lists resolved batch-wise.
    GraphSon,
}

impl GraphTraversal {
    /// Lowers, renders, and compiles the chain against the connection,
    /// returning the result iterator. Nothing is pulled yet.
    pub fn run(&self, connection: &Connection, format: OutputFormat) -> Result<TraversalResult> {
        let tree = self.to_statement()?;
        let cx = ExecutionContext::new(
            Arc::clone(connection.store()),
            connection.config().clone(),
        );
        let operator = compile_statement(&tree, &cx)?;
        debug!(?format, "traversal compiled");
        Ok(TraversalResult {
            operator,
            cx,
            format,
            pending: VecDeque::new(),
            exhausted: false,
        })
    }
}

/// A lazy, single-pass stream of stringified result rows.
///
/// Not restartable; re-running requires rebuilding from the traversal.
pub struct TraversalResult {
    operator: BoxedOperator,
    cx: ExecutionContext,
    format: OutputFormat,
    pending: VecDeque<String>,
    exhausted: bool,
}

impl Iterator for TraversalResult {
    type Item = Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(row) = self.pending.pop_front() {
                return Some(Ok(row));
            }
            if self.exhausted {
                return None;
            }
            if let Err(e) = self.fill() {
                self.exhausted = true;
                return Some(Err(e));
            }
        }
    }
}

impl TraversalResult {
    fn fill(&mut self) -> Result<()> {
        match self.format {
            OutputFormat::Regular => {
                match self.operator.next()? {
                    Some(record) => {
                        let cell = result_cell(&record);
                        self.pending.push_back(format_cell(&cell));
                    }
                    None => self.exhausted = true,
                }
                Ok(())
            }
            OutputFormat::GraphSon => self.fill_graphson_batch(),
        }
    }

    /// Pulls one batch, resolves spilled adjacency with a single fetch,
    /// and serializes the rows in their original order.
    fn fill_graphson_batch(&mut self) -> Result<()> {
        let mut batch = Vec::with_capacity(GRAPHSON_BATCH);
        while batch.len() < GRAPHSON_BATCH {
            match self.operator.next()? {
                Some(record) => batch.push(result_cell(&record)),
                None => {
                    self.exhausted = true;
                    break;
                }
            }
        }
        if batch.is_empty() {
            return Ok(());
        }

        let store = &self.cx.store;
        let mut ids: Vec<VertexId> = Vec::new();
        let mut partitions: Vec<Option<Value>> = Vec::new();
        for cell in &batch {
            collect_unfetched(cell, store, &mut ids, &mut partitions);
        }
        let fetched = if ids.is_empty() {
            HashMap::default()
        } else {
            store.fetch_adjacency(Direction::Both, &ids, &partitions)
        };

        for cell in &batch {
            let doc = graphson_cell(cell, store, &fetched);
            self.pending.push_back(doc.to_string());
        }
        Ok(())
    }
}

/// The result column of a record: the default column when present,
/// otherwise the whole record as a composite.
fn result_cell(record: &hodos_core::execution::Record) -> Cell {
    match record.get(DEFAULT_COLUMN) {
        Some(cell) => cell.clone(),
        None => record.as_map_cell(),
    }
}

fn format_cell(cell: &Cell) -> String {
    match cell {
        Cell::Value(v) => v.to_string(),
        Cell::Vertex(id) => format!("v[{id}]"),
        Cell::Edge(id) => format!("e[{id}]"),
        Cell::Map(_) | Cell::List(_) => value_to_json(&cell.as_value()).to_string(),
    }
}

/// Records every vertex in the cell whose adjacency list is still
/// spilled, keeping the id and partition slices offset-aligned.
fn collect_unfetched(
    cell: &Cell,
    store: &GraphStore,
    ids: &mut Vec<VertexId>,
    partitions: &mut Vec<Option<Value>>,
) {
    match cell {
        Cell::Vertex(id) => {
            if store.has_unfetched_adjacency(*id) && !ids.contains(id) {
                ids.push(*id);
                partitions.push(store.vertex(*id).and_then(|doc| doc.partition));
            }
        }
        Cell::Map(entries) => {
            for entry in entries.values() {
                collect_unfetched(entry, store, ids, partitions);
            }
        }
        Cell::List(items) => {
            for item in items {
                collect_unfetched(item, store, ids, partitions);
            }
        }
        Cell::Value(_) | Cell::Edge(_) => {}
    }
}

fn value_to_json(value: &Value) -> Json {
    match value {
        Value::Null => Json::Null,
        Value::Bool(b) => Json::Bool(*b),
        Value::Int64(n) => json!(n),
        Value::Float64(f) => json!(f),
        Value::String(s) => Json::String(s.clone()),
        Value::List(items) => Json::Array(items.iter().map(value_to_json).collect()),
        Value::Map(entries) => Json::Object(
            entries
                .iter()
                .map(|(k, v)| (k.to_string(), value_to_json(v)))
                .collect(),
        ),
    }
}

fn graphson_cell(
    cell: &Cell,
    store: &GraphStore,
    fetched: &HashMap<VertexId, Vec<EdgeDoc>, RandomState>,
) -> Json {
    match cell {
        Cell::Value(v) => value_to_json(v),
        Cell::Vertex(id) => graphson_vertex(*id, store, fetched),
        Cell::Edge(id) => graphson_edge(*id, store),
        Cell::Map(entries) => Json::Object(
            entries
                .iter()
                .map(|(k, v)| (k.clone(), graphson_cell(v, store, fetched)))
                .collect(),
        ),
        Cell::List(items) => Json::Array(
            items
                .iter()
                .map(|item| graphson_cell(item, store, fetched))
                .collect(),
        ),
    }
}

fn graphson_vertex(
    id: VertexId,
    store: &GraphStore,
    fetched: &HashMap<VertexId, Vec<EdgeDoc>, RandomState>,
) -> Json {
    let Some(doc) = store.vertex(id) else {
        return Json::Null;
    };
    let mut object = JsonMap::new();
    object.insert("id".to_string(), json!(id.as_u64()));
    object.insert("label".to_string(), Json::String(doc.label.clone()));
    object.insert("type".to_string(), Json::String("vertex".to_string()));
    if let Some(partition) = &doc.partition {
        object.insert("_partition".to_string(), value_to_json(partition));
    }

    let mut properties: Vec<(String, Json)> = doc
        .properties
        .iter()
        .map(|(k, v)| (k.to_string(), json!([{ "value": value_to_json(v) }])))
        .collect();
    properties.sort_by(|a, b| a.0.cmp(&b.0));
    object.insert(
        "properties".to_string(),
        Json::Object(properties.into_iter().collect()),
    );

    let edges = match fetched.get(&id) {
        Some(edges) => edges.clone(),
        None => store.edges_from(id, Direction::Both, true),
    };
    let mut out_e = JsonMap::new();
    let mut in_e = JsonMap::new();
    for edge in edges {
        let (bucket, endpoint, endpoint_name) = if edge.source == id {
            (&mut out_e, edge.target, "inV")
        } else {
            (&mut in_e, edge.source, "outV")
        };
        let entry = bucket
            .entry(edge.label.clone())
            .or_insert_with(|| Json::Array(Vec::new()));
        if let Json::Array(items) = entry {
            items.push(json!({
                "id": edge.id.as_u64(),
                endpoint_name: endpoint.as_u64(),
            }));
        }
    }
    if !out_e.is_empty() {
        object.insert("outE".to_string(), Json::Object(out_e));
    }
    if !in_e.is_empty() {
        object.insert("inE".to_string(), Json::Object(in_e));
    }
    Json::Object(object)
}

fn graphson_edge(id: hodos_common::types::EdgeId, store: &GraphStore) -> Json {
    let Some(doc) = store.edge(id) else {
        return Json::Null;
    };
    let mut properties: Vec<(String, Json)> = doc
        .properties
        .iter()
        .map(|(k, v)| (k.to_string(), value_to_json(v)))
        .collect();
    properties.sort_by(|a, b| a.0.cmp(&b.0));
    json!({
        "id": id.as_u64(),
        "label": doc.label,
        "type": "edge",
        "outV": doc.source.as_u64(),
        "inV": doc.target.as_u64(),
        "properties": Json::Object(properties.into_iter().collect()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::predicate::{between, gt, inside};
    use hodos_core::graph::GraphConfig;

    fn modern_connection() -> Connection {
        let config = GraphConfig::default();
        let store = Arc::new(GraphStore::new(config.edge_spill_threshold));
        let marko = store.add_vertex(
            "person",
            [("name", Value::from("marko")), ("age", Value::from(29i64))],
        );
        let vadas = store.add_vertex(
            "person",
            [("name", Value::from("vadas")), ("age", Value::from(27i64))],
        );
        let lop = store.add_vertex(
            "software",
            [("name", Value::from("lop")), ("lang", Value::from("java"))],
        );
        let josh = store.add_vertex(
            "person",
            [("name", Value::from("josh")), ("age", Value::from(32i64))],
        );
        let ripple = store.add_vertex(
            "software",
            [("name", Value::from("ripple")), ("lang", Value::from("java"))],
        );
        let peter = store.add_vertex(
            "person",
            [("name", Value::from("peter")), ("age", Value::from(35i64))],
        );
        store.add_edge("knows", marko, vadas, [("weight", Value::from(0.5))]);
        store.add_edge("knows", marko, josh, [("weight", Value::from(1.0))]);
        store.add_edge("created", marko, lop, [("weight", Value::from(0.4))]);
        store.add_edge("created", josh, ripple, [("weight", Value::from(1.0))]);
        store.add_edge("created", josh, lop, [("weight", Value::from(0.4))]);
        store.add_edge("created", peter, lop, [("weight", Value::from(0.2))]);
        Connection::new(store, config)
    }

    fn names(conn: &Connection, traversal: &GraphTraversal) -> Vec<String> {
        let rows: Result<Vec<String>> = traversal
            .run(conn, OutputFormat::Regular)
            .unwrap()
            .collect();
        let mut rows = rows.unwrap();
        rows.sort();
        rows
    }

    #[test]
    fn test_creators_of_co_created_software() {
        let conn = modern_connection();
        let chain = GraphTraversal::start()
            .v()
            .out(["created"])
            .in_(["created"])
            .dedup()
            .values(["name"]);
        assert_eq!(names(&conn, &chain), vec!["josh", "marko", "peter"]);
    }

    #[test]
    fn test_gt_filter_over_ages() {
        let conn = modern_connection();
        let chain = GraphTraversal::start()
            .v()
            .has("age", gt(30i64))
            .values(["name"]);
        assert_eq!(names(&conn, &chain), vec!["josh", "peter"]);
    }

    #[test]
    fn test_between_includes_lower_excludes_upper() {
        let conn = modern_connection();
        let chain = GraphTraversal::start()
            .v()
            .has("age", between(27i64, 32i64))
            .values(["name"]);
        assert_eq!(names(&conn, &chain), vec!["marko", "vadas"]);
    }

    #[test]
    fn test_inside_excludes_both_bounds() {
        let conn = modern_connection();
        let chain = GraphTraversal::start()
            .v()
            .has("age", inside(27i64, 32i64))
            .values(["name"]);
        assert_eq!(names(&conn, &chain), vec!["marko"]);
    }

    #[test]
    fn test_repeat_times_two_reaches_two_hop_neighbors() {
        let conn = modern_connection();
        let chain = GraphTraversal::start()
            .v()
            .has_value("name", "marko")
            .repeat(GraphTraversal::start().out([] as [&str; 0]))
            .times(2)
            .values(["name"]);
        assert_eq!(names(&conn, &chain), vec!["lop", "ripple"]);
    }

    #[test]
    fn test_repeat_count_tracks_two_hop_paths() {
        let config = GraphConfig::default();
        let store = Arc::new(GraphStore::new(config.edge_spill_threshold));
        let a = store.add_vertex("node", [("name", Value::from("a"))]);
        let b = store.add_vertex("node", [("name", Value::from("b"))]);
        store.add_edge("link", a, b, [] as [(&str, Value); 0]);
        let conn = Connection::new(Arc::clone(&store), config);

        let chain = GraphTraversal::start()
            .v()
            .repeat(GraphTraversal::start().out([] as [&str; 0]))
            .times(2)
            .count();
        let rows: Result<Vec<String>> = chain
            .run(&conn, OutputFormat::Regular)
            .unwrap()
            .collect();
        assert_eq!(rows.unwrap(), vec!["0"]);

        let c = store.add_vertex("node", [("name", Value::from("c"))]);
        store.add_edge("link", b, c, [] as [(&str, Value); 0]);
        let rows: Result<Vec<String>> = chain
            .run(&conn, OutputFormat::Regular)
            .unwrap()
            .collect();
        assert_eq!(rows.unwrap(), vec!["1"]);
    }

    #[test]
    fn test_order_sorts_scalar_stream() {
        let conn = modern_connection();
        let rows: Result<Vec<String>> = GraphTraversal::start()
            .v()
            .values(["age"])
            .order()
            .by_self()
            .unwrap()
            .run(&conn, OutputFormat::Regular)
            .unwrap()
            .collect();
        assert_eq!(rows.unwrap(), vec!["27", "29", "32", "35"]);
    }

    #[test]
    fn test_union_concatenates_branches() {
        let conn = modern_connection();
        let chain = GraphTraversal::start()
            .v()
            .has_value("name", "marko")
            .union([
                GraphTraversal::start().out(["knows"]),
                GraphTraversal::start().out(["created"]),
            ])
            .values(["name"]);
        assert_eq!(names(&conn, &chain), vec!["josh", "lop", "vadas"]);
    }

    #[test]
    fn test_coalesce_takes_first_non_empty_arm() {
        let conn = modern_connection();
        let chain = GraphTraversal::start()
            .v()
            .has_value("name", "lop")
            .coalesce([
                GraphTraversal::start().out(["created"]),
                GraphTraversal::start().values(["name"]),
            ]);
        let rows: Result<Vec<String>> = chain
            .run(&conn, OutputFormat::Regular)
            .unwrap()
            .collect();
        assert_eq!(rows.unwrap(), vec!["lop"]);
    }

    #[test]
    fn test_choose_routes_on_the_chooser() {
        let conn = modern_connection();
        let rows: Result<Vec<String>> = GraphTraversal::start()
            .v()
            .has_label(["person"])
            .choose(
                GraphTraversal::start().has("age", gt(30i64)),
                GraphTraversal::start().constant("old"),
                GraphTraversal::start().constant("young"),
            )
            .run(&conn, OutputFormat::Regular)
            .unwrap()
            .collect();
        assert_eq!(rows.unwrap(), vec!["young", "young", "old", "old"]);
    }

    #[test]
    fn test_count_over_filtered_stream() {
        let conn = modern_connection();
        let rows: Result<Vec<String>> = GraphTraversal::start()
            .v()
            .out(["created"])
            .count()
            .run(&conn, OutputFormat::Regular)
            .unwrap()
            .collect();
        assert_eq!(rows.unwrap(), vec!["4"]);
    }

    #[test]
    fn test_group_count_by_label() {
        let conn = modern_connection();
        let chain = GraphTraversal::start()
            .v()
            .group_count()
            .by("label")
            .unwrap();
        let rows: Result<Vec<String>> = chain
            .run(&conn, OutputFormat::Regular)
            .unwrap()
            .collect();
        let rows = rows.unwrap();
        assert_eq!(rows.len(), 1);
        assert!(rows[0].contains("\"person\":4"));
        assert!(rows[0].contains("\"software\":2"));
    }

    #[test]
    fn test_regular_output_stringifies_values() {
        let conn = modern_connection();
        let rows: Result<Vec<String>> = GraphTraversal::start()
            .v()
            .has_value("name", "marko")
            .out(["created"])
            .values(["name"])
            .run(&conn, OutputFormat::Regular)
            .unwrap()
            .collect();
        assert_eq!(rows.unwrap(), vec!["lop".to_string()]);
    }

    #[test]
    fn test_graphson_output_is_json_objects() {
        let conn = modern_connection();
        let rows: Result<Vec<String>> = GraphTraversal::start()
            .v()
            .has_label(["software"])
            .run(&conn, OutputFormat::GraphSon)
            .unwrap()
            .collect();
        let rows = rows.unwrap();
        assert_eq!(rows.len(), 2);
        let mut docs: Vec<Json> = rows
            .iter()
            .map(|row| serde_json::from_str(row).unwrap())
            .collect();
        docs.sort_by_key(|doc| doc["properties"]["name"][0]["value"].to_string());
        assert_eq!(docs[0]["type"], "vertex");
        assert_eq!(docs[0]["label"], "software");
        assert_eq!(docs[0]["properties"]["name"][0]["value"], "lop");
        assert_eq!(docs[1]["properties"]["name"][0]["value"], "ripple");
        assert!(docs[0]["inE"]["created"].is_array());
    }

    #[test]
    fn test_spilled_adjacency_is_fetched_once_per_batch() {
        let config = GraphConfig::default().with_edge_spill_threshold(1);
        let store = Arc::new(GraphStore::new(config.edge_spill_threshold));
        let hub = store.add_vertex("person", [("name", Value::from("hub"))]);
        for i in 0..4 {
            let leaf = store.add_vertex("software", [("rank", Value::from(i))]);
            store.add_edge("created", hub, leaf, [] as [(&str, Value); 0]);
        }
        let conn = Connection::new(Arc::clone(&store), config);

        let before = store.adjacency_fetch_count();
        let rows: Result<Vec<String>> = GraphTraversal::start()
            .v()
            .has_value("name", "hub")
            .run(&conn, OutputFormat::GraphSon)
            .unwrap()
            .collect();
        let rows = rows.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(store.adjacency_fetch_count(), before + 1);
        let doc: Json = serde_json::from_str(&rows[0]).unwrap();
        assert_eq!(doc["outE"]["created"].as_array().unwrap().len(), 4);
    }
}
