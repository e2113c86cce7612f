//! The federation directory: explicit owner of the backend connections, the
//! per-project write handles and the shared quantization params.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::Serialize;
use tempfile::TempDir;

use super::fanout::{fan_out, FanOutConfig};
use super::store::{self, UpsertMode};
use super::types::{
    FederationStats, IndexOptions, IndexReport, NewNode, Node, PageOptions, Project,
};
use crate::db::{self, pool::ReadPool};
use crate::error::{Error, Result};
use crate::fusion::{compute_content_hash, FusionConfig, FusionPipeline, SearchCandidate};
use crate::quant::{
    compute_morton_key_from_embedding, compute_quantization_params, MortonKey, QuantOptions,
    StoredQuantParams,
};

/// Everything a [`Federation`] needs besides its backend.
#[derive(Debug, Clone)]
pub struct FederationConfig {
    pub quant: QuantOptions,
    /// Re-key every stored node whenever the params are recomputed.
    pub auto_rekey: bool,
    pub fan_out: FanOutConfig,
    pub fusion: FusionConfig,
    /// Read-only connections opened next to the writer for file-backed stores.
    pub read_connections: usize,
}

impl Default for FederationConfig {
    fn default() -> Self {
        Self {
            quant: QuantOptions::default(),
            auto_rekey: true,
            fan_out: FanOutConfig::default(),
            fusion: FusionConfig::default(),
            read_connections: 4,
        }
    }
}

/// Options for [`Federation::federated_search`].
#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    /// Morton radius; the configured default when `None`.
    pub radius: Option<u128>,
    /// Candidates per project; the configured default when `None`.
    pub per_project_limit: Option<usize>,
    /// Restrict to these projects; every project when `None`.
    pub project_ids: Option<Vec<String>>,
    pub top_k: Option<usize>,
}

/// Fused fan-out results. A non-empty `failed_project_ids` means the ranking
/// covers only `searched_projects - failed` projects.
#[derive(Debug, Clone, Serialize)]
pub struct FederatedSearchResponse {
    pub results: Vec<SearchCandidate>,
    pub searched_projects: usize,
    pub failed_project_ids: Vec<String>,
    pub total_candidates: usize,
}

impl FederatedSearchResponse {
    pub fn is_partial(&self) -> bool {
        !self.failed_project_ids.is_empty()
    }
}

/// Write serialization handle for one project store.
#[derive(Debug, Default)]
struct ProjectHandle {
    write: tokio::sync::Mutex<()>,
}

/// The federation directory.
///
/// Cheap to clone; clones share the backend, handles and params lock.
///
/// Writes go through one connection. Reads check out a connection from the
/// read pool, so they do not queue behind a batch on another project.
#[derive(Clone)]
pub struct Federation {
    writer: Arc<Mutex<Connection>>,
    readers: Arc<ReadPool>,
    handles: Arc<Mutex<HashMap<String, Arc<ProjectHandle>>>>,
    quant_lock: Arc<tokio::sync::Mutex<()>>,
    config: Arc<FederationConfig>,
    fusion: FusionPipeline,
    db_path: Option<PathBuf>,
    // Last, so the directory outlives the connections into it.
    _scratch: Option<Arc<TempDir>>,
}

impl Federation {
    /// Wrap an injected connection, applying schema and migrations.
    ///
    /// A file-backed connection also gets a read pool on the same file; a
    /// purely in-memory one serves reads from the writer.
    pub fn new(conn: Connection, config: FederationConfig) -> Result<Self> {
        db::prepare(&conn)?;
        let db_path = conn
            .path()
            .filter(|p| !p.is_empty())
            .map(PathBuf::from);
        let readers = match &db_path {
            Some(path) => ReadPool::open(path, config.read_connections)?,
            None => ReadPool::empty(),
        };
        let fusion = FusionPipeline::new(config.fusion.clone());
        Ok(Self {
            writer: Arc::new(Mutex::new(conn)),
            readers: Arc::new(readers),
            handles: Arc::new(Mutex::new(HashMap::new())),
            quant_lock: Arc::new(tokio::sync::Mutex::new(())),
            config: Arc::new(config),
            fusion,
            db_path,
            _scratch: None,
        })
    }

    /// Open (or create) a file-backed federation.
    pub fn open(path: impl AsRef<Path>, config: FederationConfig) -> Result<Self> {
        Self::new(db::open_database(path.as_ref())?, config)
    }

    /// An ephemeral federation in a private temporary directory, removed
    /// when the last clone is dropped.
    pub fn open_in_memory(config: FederationConfig) -> Result<Self> {
        let scratch = tempfile::Builder::new().prefix("plexus-").tempdir()?;
        let conn = db::open_database(scratch.path().join("federation.db"))?;
        let mut federation = Self::new(conn, config)?;
        federation._scratch = Some(Arc::new(scratch));
        Ok(federation)
    }

    pub fn config(&self) -> &FederationConfig {
        &self.config
    }

    // ── Writes ────────────────────────────────────────────────────────────────

    /// Index a batch of nodes into a project in one transaction.
    ///
    /// With `recompute_quant`, the params are re-derived from this batch's
    /// embeddings and replace the federation-wide record.
    pub async fn add_project_index(
        &self,
        project_id: &str,
        nodes: Vec<NewNode>,
        options: IndexOptions,
    ) -> Result<IndexReport> {
        validate_project_id(project_id)?;
        if nodes.is_empty() {
            return Err(Error::invalid("node batch must not be empty"));
        }
        validate_nodes(&nodes)?;

        let handle = self.project_handle(project_id)?;
        let _write = handle.write.lock().await;
        let _quant = if options.recompute_quant {
            Some(self.quant_lock.lock().await)
        } else {
            None
        };

        let quant_options = self.config.quant;
        let auto_rekey = self.config.auto_rekey;
        let project = project_id.to_string();

        let report = self
            .with_writer(move |conn| {
                let tx = conn.transaction()?;
                let current = store::load_quant_params(&tx)?;

                let mut rekeyed = 0;
                let stored = if options.recompute_quant {
                    let corpus: Vec<Vec<f32>> =
                        nodes.iter().filter_map(|n| n.embedding.clone()).collect();
                    if corpus.is_empty() {
                        tracing::warn!(
                            project_id = %project,
                            "batch has no embeddings; keeping existing quantization params"
                        );
                        current
                    } else {
                        let params = compute_quantization_params(&corpus, quant_options)?;
                        let next = next_params(current.as_ref(), params);
                        store::save_quant_params(&tx, &next)?;
                        if auto_rekey {
                            rekeyed = store::rekey_nodes(&tx, None, &next)?;
                        }
                        tracing::info!(
                            project_id = %project,
                            version = next.version,
                            corpus = corpus.len(),
                            "quantization params recomputed from batch"
                        );
                        Some(next)
                    }
                } else {
                    Some(current.ok_or(Error::MissingQuantParams)?)
                };

                store::ensure_project(&tx, &project, options.name.as_deref(), options.weight)?;

                let mut keyed = 0;
                for node in &nodes {
                    let key = match (&node.embedding, &stored) {
                        (Some(embedding), Some(stored)) => store::derive_key(&node.id, embedding, stored),
                        _ => None,
                    };
                    keyed += usize::from(key.is_some());
                    store::upsert_node(&tx, &project, node, key.as_ref(), UpsertMode::Replace)?;
                }

                tx.commit()?;

                Ok(IndexReport {
                    project_id: project,
                    nodes_written: nodes.len(),
                    nodes_keyed: keyed,
                    quant_version: stored.map(|s| s.version),
                    rekeyed,
                })
            })
            .await?;

        tracing::info!(
            project_id = %report.project_id,
            written = report.nodes_written,
            keyed = report.nodes_keyed,
            rekeyed = report.rekeyed,
            "project index batch committed"
        );
        Ok(report)
    }

    /// Upsert nodes without touching the params. Embedding and key change only
    /// for nodes that carry a new embedding.
    pub async fn update_project_nodes(
        &self,
        project_id: &str,
        nodes: Vec<NewNode>,
    ) -> Result<IndexReport> {
        validate_project_id(project_id)?;
        validate_nodes(&nodes)?;

        let handle = self.project_handle(project_id)?;
        let _write = handle.write.lock().await;
        let project = project_id.to_string();

        let report = self
            .with_writer(move |conn| {
                let tx = conn.transaction()?;
                let stored = store::load_quant_params(&tx)?.ok_or(Error::MissingQuantParams)?;
                store::ensure_project(&tx, &project, None, None)?;

                let mut keyed = 0;
                for node in &nodes {
                    let key = node
                        .embedding
                        .as_deref()
                        .and_then(|e| store::derive_key(&node.id, e, &stored));
                    keyed += usize::from(key.is_some());
                    store::upsert_node(&tx, &project, node, key.as_ref(), UpsertMode::Merge)?;
                }

                tx.commit()?;
                Ok(IndexReport {
                    project_id: project,
                    nodes_written: nodes.len(),
                    nodes_keyed: keyed,
                    quant_version: Some(stored.version),
                    rekeyed: 0,
                })
            })
            .await?;

        tracing::debug!(
            project_id = %report.project_id,
            written = report.nodes_written,
            "project nodes updated"
        );
        Ok(report)
    }

    /// Clear and de-register a project. Removing an unknown project is a no-op.
    pub async fn remove_project_index(&self, project_id: &str) -> Result<()> {
        let handle = self.project_handle(project_id)?;
        let _write = handle.write.lock().await;
        let project = project_id.to_string();

        let removed = self
            .with_writer(move |conn| store::delete_project(conn, &project))
            .await?;

        {
            // Drop the handle only when no other task holds it.
            let mut handles = self.lock_handles()?;
            let idle = handles
                .get(project_id)
                .is_some_and(|h| Arc::ptr_eq(h, &handle) && Arc::strong_count(h) == 2);
            if idle {
                handles.remove(project_id);
            }
        }
        tracing::info!(project_id, nodes = removed, "project index removed");
        Ok(())
    }

    /// Derive params from the stored embeddings of `project_ids` (every
    /// project when `None`) and persist them as the shared record.
    pub async fn compute_global_quant_params(
        &self,
        project_ids: Option<Vec<String>>,
    ) -> Result<StoredQuantParams> {
        let _quant = self.quant_lock.lock().await;
        let quant_options = self.config.quant;
        let auto_rekey = self.config.auto_rekey;

        self.with_writer(move |conn| {
            let tx = conn.transaction()?;
            let corpus = store::collect_embeddings(&tx, project_ids.as_deref())?;
            if corpus.is_empty() {
                return Err(Error::invalid(
                    "no stored embeddings to derive quantization params from",
                ));
            }

            let params = compute_quantization_params(&corpus, quant_options)?;
            let current = store::load_quant_params(&tx)?;
            let next = next_params(current.as_ref(), params);
            store::save_quant_params(&tx, &next)?;

            let rekeyed = if auto_rekey {
                store::rekey_nodes(&tx, None, &next)?
            } else {
                0
            };
            tx.commit()?;

            tracing::info!(
                version = next.version,
                corpus = corpus.len(),
                rekeyed,
                "global quantization params recomputed"
            );
            Ok(next)
        })
        .await
    }

    /// Recompute one project's keys under the current params.
    pub async fn rekey_project(&self, project_id: &str) -> Result<usize> {
        let handle = self.project_handle(project_id)?;
        let _write = handle.write.lock().await;
        let project = project_id.to_string();

        self.with_writer(move |conn| {
            let tx = conn.transaction()?;
            let stored = store::load_quant_params(&tx)?.ok_or(Error::MissingQuantParams)?;
            let n = store::rekey_nodes(&tx, Some(&project), &stored)?;
            tx.commit()?;
            tracing::info!(project_id = %project, nodes = n, version = stored.version, "project re-keyed");
            Ok(n)
        })
        .await
    }

    /// Recompute every stored key under the current params.
    pub async fn rekey_all(&self) -> Result<usize> {
        let _quant = self.quant_lock.lock().await;
        self.with_writer(|conn| {
            let tx = conn.transaction()?;
            let stored = store::load_quant_params(&tx)?.ok_or(Error::MissingQuantParams)?;
            let n = store::rekey_nodes(&tx, None, &stored)?;
            tx.commit()?;
            Ok(n)
        })
        .await
    }

    /// Wipe every project and the params record.
    pub async fn clear_all_indices(&self) -> Result<()> {
        let _quant = self.quant_lock.lock().await;
        self.with_writer(|conn| {
            let tx = conn.transaction()?;
            store::delete_all(&tx)?;
            tx.commit()?;
            Ok(())
        })
        .await?;
        self.lock_handles()?
            .retain(|_, h| Arc::strong_count(h) > 1);
        tracing::info!("all indices cleared");
        Ok(())
    }

    // ── Reads ─────────────────────────────────────────────────────────────────

    pub async fn get_project_nodes(&self, project_id: &str, page: PageOptions) -> Result<Vec<Node>> {
        if page.limit == 0 {
            return Ok(Vec::new());
        }
        let project = project_id.to_string();
        self.with_reader(move |conn| store::get_nodes(conn, &project, page.limit, page.offset))
            .await
    }

    pub async fn get_project_node(&self, project_id: &str, node_id: &str) -> Result<Option<Node>> {
        let project = project_id.to_string();
        let node = node_id.to_string();
        self.with_reader(move |conn| store::get_node(conn, &project, &node))
            .await
    }

    /// Nodes whose key lies in `[center - radius, center + radius]`, in key order.
    ///
    /// Morton order is only locality-preserving on average; treat the result
    /// as a candidate set to re-rank, not as nearest neighbours.
    pub async fn search_project_by_morton(
        &self,
        project_id: &str,
        center: &MortonKey,
        radius: u128,
        limit: usize,
    ) -> Result<Vec<Node>> {
        let project = project_id.to_string();
        let center = *center;
        self.with_reader(move |conn| {
            // One snapshot for the params and the scan.
            let snapshot = conn.unchecked_transaction()?;
            let stored = store::load_quant_params(&snapshot)?.ok_or(Error::MissingQuantParams)?;
            if center.bits() != stored.params.key_bits() {
                return Err(Error::invalid(format!(
                    "center key is {} bits wide, current params produce {}-bit keys",
                    center.bits(),
                    stored.params.key_bits()
                )));
            }
            let (lo, hi) = center.range(radius);
            store::search_by_morton(&snapshot, &project, &lo.to_hex(), &hi.to_hex(), stored.version, limit)
        })
        .await
    }

    /// Key an arbitrary embedding (e.g. a query) under the current params.
    pub async fn morton_key_for(&self, embedding: &[f32]) -> Result<MortonKey> {
        let stored = self.get_quant_params().await?.ok_or(Error::MissingQuantParams)?;
        compute_morton_key_from_embedding(embedding, &stored.params)
    }

    pub async fn get_all_project_ids(&self) -> Result<Vec<String>> {
        let projects = self.list_projects().await?;
        Ok(projects.into_iter().map(|p| p.id).collect())
    }

    pub async fn list_projects(&self) -> Result<Vec<Project>> {
        self.with_reader(|conn| store::list_projects(conn)).await
    }

    pub async fn get_project(&self, project_id: &str) -> Result<Option<Project>> {
        let project = project_id.to_string();
        self.with_reader(move |conn| store::get_project(conn, &project))
            .await
    }

    pub async fn get_quant_params(&self) -> Result<Option<StoredQuantParams>> {
        self.with_reader(|conn| store::load_quant_params(conn)).await
    }

    pub async fn get_federation_stats(&self) -> Result<FederationStats> {
        let db_size_bytes = self
            .db_path
            .as_ref()
            .and_then(|p| std::fs::metadata(p).ok())
            .map(|m| m.len())
            .unwrap_or(0);

        self.with_reader(move |conn| {
            let snapshot = conn.unchecked_transaction()?;
            let stored = store::load_quant_params(&snapshot)?;
            let version = stored.as_ref().map(|s| s.version);
            let projects = store::project_stats(&snapshot, version)?;

            let total_nodes: u64 = projects.iter().map(|p| p.node_count).sum();
            let keyed_nodes: u64 = projects.iter().map(|p| p.keyed_nodes).sum();
            let stale_nodes: u64 = projects.iter().map(|p| p.stale_nodes).sum();

            Ok(FederationStats {
                project_count: projects.len() as u64,
                total_nodes,
                keyed_nodes,
                unkeyed_nodes: total_nodes - keyed_nodes,
                stale_nodes,
                quant_version: version,
                quant_updated_at: stored.map(|s| s.updated_at),
                projects,
                db_size_bytes,
            })
        })
        .await
    }

    // ── Fan-out ───────────────────────────────────────────────────────────────

    /// Range-search every (or the selected) project around the query's key,
    /// re-rank by cosine similarity weighted by project, and fuse.
    ///
    /// Projects that fail or exceed the fan-out deadline are dropped and listed
    /// in `failed_project_ids`.
    pub async fn federated_search(
        &self,
        query: &[f32],
        options: SearchOptions,
    ) -> Result<FederatedSearchResponse> {
        let center = self.morton_key_for(query).await?;
        let radius = options.radius.unwrap_or(self.config.fan_out.default_radius);
        let limit = options
            .per_project_limit
            .unwrap_or(self.config.fan_out.per_project_limit);

        let mut projects = self.list_projects().await?;
        if let Some(wanted) = &options.project_ids {
            projects.retain(|p| wanted.contains(&p.id));
        }
        let weights: HashMap<String, f64> =
            projects.iter().map(|p| (p.id.clone(), p.weight)).collect();
        let ids: Vec<String> = projects.into_iter().map(|p| p.id).collect();
        let searched_projects = ids.len();

        tracing::debug!(center = %center, radius, projects = searched_projects, "federated search");

        let federation = self.clone();
        let outcome = fan_out(
            ids,
            self.config.fan_out.max_concurrent,
            self.config.fan_out.timeout,
            move |project_id| {
                let federation = federation.clone();
                async move {
                    federation
                        .search_project_by_morton(&project_id, &center, radius, limit)
                        .await
                }
            },
        )
        .await;

        let lists: Vec<Vec<SearchCandidate>> = outcome
            .succeeded
            .into_iter()
            .map(|(project_id, nodes)| {
                let weight = weights.get(&project_id).copied().unwrap_or(1.0);
                nodes
                    .into_iter()
                    .map(|node| candidate_from_node(&project_id, node, query, weight))
                    .collect()
            })
            .collect();
        let total_candidates = lists.iter().map(Vec::len).sum();

        let pipeline = match options.top_k {
            Some(k) => self.fusion.clone().with_top_k(k),
            None => self.fusion.clone(),
        };
        let results = pipeline.fuse(lists, Utc::now());

        Ok(FederatedSearchResponse {
            results,
            searched_projects,
            failed_project_ids: outcome.failed,
            total_candidates,
        })
    }

    // ── Internals ─────────────────────────────────────────────────────────────

    /// Run blocking SQLite work on the writer, off the async runtime.
    async fn with_writer<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let writer = Arc::clone(&self.writer);
        tokio::task::spawn_blocking(move || {
            let mut conn = writer.lock().map_err(|_| writer_poisoned())?;
            f(&mut conn)
        })
        .await
        .map_err(|e| Error::Internal(format!("database task failed: {e}")))?
    }

    /// Run a read on a pooled connection, or on the writer when there is no pool.
    async fn with_reader<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let readers = Arc::clone(&self.readers);
        let writer = Arc::clone(&self.writer);
        tokio::task::spawn_blocking(move || {
            if let Some(conn) = readers.get()? {
                return f(&conn);
            }
            let conn = writer.lock().map_err(|_| writer_poisoned())?;
            f(&conn)
        })
        .await
        .map_err(|e| Error::Internal(format!("database task failed: {e}")))?
    }

    fn lock_handles(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Arc<ProjectHandle>>>> {
        self.handles
            .lock()
            .map_err(|_| Error::Internal("project handle map poisoned".into()))
    }

    fn project_handle(&self, project_id: &str) -> Result<Arc<ProjectHandle>> {
        let mut handles = self.lock_handles()?;
        Ok(Arc::clone(handles.entry(project_id.to_string()).or_default()))
    }
}

fn writer_poisoned() -> Error {
    Error::Internal("database lock poisoned".into())
}

fn validate_project_id(project_id: &str) -> Result<()> {
    if project_id.trim().is_empty() {
        return Err(Error::invalid("project id must not be empty"));
    }
    Ok(())
}

fn validate_nodes(nodes: &[NewNode]) -> Result<()> {
    if let Some(pos) = nodes.iter().position(|n| n.id.trim().is_empty()) {
        return Err(Error::invalid(format!("node at position {pos} has an empty id")));
    }
    Ok(())
}

fn next_params(
    current: Option<&StoredQuantParams>,
    params: crate::quant::QuantizationParams,
) -> StoredQuantParams {
    StoredQuantParams {
        params,
        version: current.map_or(1, |c| c.version + 1),
        updated_at: Utc::now().to_rfc3339(),
    }
}

fn candidate_from_node(project_id: &str, node: Node, query: &[f32], weight: f64) -> SearchCandidate {
    let similarity = node
        .embedding
        .as_deref()
        .map_or(0.0, |e| cosine_similarity(query, e));
    let content_hash = compute_content_hash(&node.text);
    SearchCandidate {
        project_id: Some(project_id.to_string()),
        node_id: node.id,
        title: node.title,
        score: similarity * weight,
        similarity: Some(similarity),
        content_hash: (!node.text.is_empty()).then_some(content_hash),
        updated_at: parse_timestamp(&node.updated_at),
        created_at: parse_timestamp(&node.created_at),
        text: node.text,
        ..SearchCandidate::default()
    }
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

/// Cosine similarity over the shared prefix; 0 for zero vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}
